use crate::{Device, Result, VulkanError};
use ash::vk;
use gpu_allocator::MemoryLocation;
use log::error;
use std::marker::PhantomData;
use std::sync::Arc;

pub(crate) fn as_bytes<T: Copy>(data: &[T]) -> &[u8] {
    unsafe { std::slice::from_raw_parts(data.as_ptr() as *const u8, std::mem::size_of_val(data)) }
}

/// Checks that `len` bytes at `offset` fit in a buffer of `size` bytes.
fn check_range(offset: vk::DeviceSize, len: vk::DeviceSize, size: vk::DeviceSize) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(VulkanError::Message(format!(
            "Write of {} bytes at offset {} exceeds buffer size {}",
            len, offset, size
        ))),
    }
}

fn element_count_of(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        VulkanError::Message(format!("Buffer of {} elements exceeds u32 element count", len))
    })
}

pub struct Buffer {
    device: Arc<Device>,
    pub(crate) handle: vk::Buffer,
    allocation: gpu_allocator::vulkan::Allocation,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    location: MemoryLocation,
    element_count: u32,
}

impl Buffer {
    pub fn new(
        device: &Arc<Device>,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<Self> {
        if size == 0 {
            return Err(VulkanError::Message(format!(
                "Buffer {} must not be empty",
                name
            )));
        }

        let handle = unsafe {
            device.core.create_buffer(
                &vk::BufferCreateInfo::builder()
                    .size(size)
                    .usage(usage)
                    .sharing_mode(vk::SharingMode::EXCLUSIVE),
                None,
            )
        }?;

        device.set_object_name(handle, name);

        let requirements = unsafe { device.core.get_buffer_memory_requirements(handle) };

        let allocation = match device.allocator().allocate(
            &gpu_allocator::vulkan::AllocationCreateDesc {
                name,
                requirements,
                location,
                linear: true,
                allocation_scheme: gpu_allocator::vulkan::AllocationScheme::GpuAllocatorManaged,
            },
        ) {
            Ok(allocation) => allocation,
            Err(err) => unsafe {
                error!("Failed to allocate memory for buffer {}: {}", name, err);
                device.core.destroy_buffer(handle, None);
                return Err(VulkanError::from(err));
            },
        };

        if let Err(err) = unsafe {
            device
                .core
                .bind_buffer_memory(handle, allocation.memory(), allocation.offset())
        } {
            error!("vkBindBufferMemory failed for buffer {}: {}", name, err);
            unsafe {
                device.core.destroy_buffer(handle, None);
            };
            let _ = device.allocator().free(allocation);
            return Err(VulkanError::from(err));
        }

        Ok(Self {
            device: device.clone(),
            handle,
            allocation,
            size,
            usage,
            location,
            element_count: 0,
        })
    }

    /// Creates a device local buffer holding `data`, uploaded through a staging buffer.
    pub fn from_slice<T: Copy>(
        device: &Arc<Device>,
        name: &str,
        data: &[T],
        usage: vk::BufferUsageFlags,
    ) -> Result<Self> {
        let element_count = element_count_of(data.len())?;
        let bytes = as_bytes(data);
        let size = bytes.len() as vk::DeviceSize;

        let mut staging = Self::new(
            device,
            &format!("{} Staging", name),
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
        )?;
        staging.write(0, bytes)?;

        let mut buffer = Self::new(
            device,
            name,
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
        )?;
        buffer.copy_from(&staging, size)?;
        buffer.element_count = element_count;

        Ok(buffer)
    }

    pub fn handle(&self) -> vk::Buffer {
        self.handle
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    pub fn location(&self) -> MemoryLocation {
        self.location
    }

    /// Number of elements uploaded by [`Buffer::from_slice`], zero otherwise.
    pub fn element_count(&self) -> u32 {
        self.element_count
    }

    /// Copies `data` into mapped memory at byte `offset`. Only valid for host visible buffers.
    pub fn write<T: Copy>(&mut self, offset: vk::DeviceSize, data: &[T]) -> Result<()> {
        let bytes = as_bytes(data);
        check_range(offset, bytes.len() as vk::DeviceSize, self.size)?;

        let mapped = self.allocation.mapped_slice_mut().ok_or_else(|| {
            VulkanError::Message(String::from("Buffer memory is not host visible"))
        })?;

        let offset = offset as usize;
        mapped[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Copies the first `size` bytes of `src` into this buffer and waits for completion.
    pub fn copy_from(&self, src: &Buffer, size: vk::DeviceSize) -> Result<()> {
        check_range(0, size, src.size)?;
        check_range(0, size, self.size)?;

        let dst = self.handle;
        let src = src.handle;
        self.device.immediate_submit(|command_buffer| {
            unsafe {
                self.device.core.cmd_copy_buffer(
                    command_buffer,
                    src,
                    dst,
                    &[vk::BufferCopy {
                        src_offset: 0,
                        dst_offset: 0,
                        size,
                    }],
                );
            }
            Ok(())
        })
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.device.core.destroy_buffer(self.handle, None);
        };
        let _ = self
            .device
            .allocator()
            .free(std::mem::take(&mut self.allocation));
    }
}

/// Persistently mapped uniform buffer holding one `T`.
pub struct UniformBuffer<T: Copy> {
    buffer: Buffer,
    _marker: PhantomData<T>,
}

impl<T: Copy> UniformBuffer<T> {
    pub fn new(device: &Arc<Device>, name: &str, value: &T) -> Result<Self> {
        let mut buffer = Buffer::new(
            device,
            name,
            std::mem::size_of::<T>() as vk::DeviceSize,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryLocation::CpuToGpu,
        )?;
        buffer.write(0, std::slice::from_ref(value))?;
        Ok(Self {
            buffer,
            _marker: PhantomData,
        })
    }

    pub fn update(&mut self, value: &T) -> Result<()> {
        self.buffer.write(0, std::slice::from_ref(value))
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C)]
    #[derive(Clone, Copy)]
    struct Vertex {
        position: [f32; 2],
        color: [f32; 3],
    }

    #[test]
    fn as_bytes_covers_whole_slice() {
        let vertices = [
            Vertex {
                position: [0.0, -0.5],
                color: [1.0, 0.0, 0.0],
            },
            Vertex {
                position: [0.5, 0.5],
                color: [0.0, 1.0, 0.0],
            },
        ];
        assert_eq!(as_bytes(&vertices).len(), 2 * 20);

        let indices: [u32; 3] = [0, 1, 2];
        let expected: Vec<u8> = indices.iter().flat_map(|index| index.to_ne_bytes()).collect();
        assert_eq!(as_bytes(&indices), &expected[..]);
    }

    #[test]
    fn range_check_rejects_overflow() {
        assert!(check_range(0, 16, 16).is_ok());
        assert!(check_range(8, 8, 16).is_ok());
        assert!(check_range(8, 9, 16).is_err());
        assert!(check_range(u64::MAX, 1, 16).is_err());
    }

    #[test]
    fn element_count_must_fit_u32() {
        assert_eq!(element_count_of(0).unwrap(), 0);
        assert_eq!(element_count_of(u32::MAX as usize).unwrap(), u32::MAX);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn element_count_rejects_truncation() {
        assert!(element_count_of(u32::MAX as usize + 1).is_err());
    }
}
