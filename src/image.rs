use crate::{Buffer, Device, Result, Sampler, SamplerDescription, VulkanError};
use ash::vk;
use gpu_allocator::MemoryLocation;
use log::{error, info};
use std::path::Path;
use std::sync::Arc;

/// Access masks and pipeline stages for one image layout change.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ImageLayoutTransition {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

impl ImageLayoutTransition {
    pub fn new(old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) -> Result<Self> {
        use vk::AccessFlags as Access;
        use vk::ImageLayout as Layout;
        use vk::PipelineStageFlags as Stage;

        let (src_access, dst_access, src_stage, dst_stage) = match (old_layout, new_layout) {
            (Layout::UNDEFINED, Layout::TRANSFER_DST_OPTIMAL) => (
                Access::empty(),
                Access::TRANSFER_WRITE,
                Stage::TOP_OF_PIPE,
                Stage::TRANSFER,
            ),
            (Layout::TRANSFER_DST_OPTIMAL, Layout::SHADER_READ_ONLY_OPTIMAL) => (
                Access::TRANSFER_WRITE,
                Access::SHADER_READ,
                Stage::TRANSFER,
                Stage::FRAGMENT_SHADER,
            ),
            // Chains with the acquire semaphore wait at color attachment output
            (Layout::UNDEFINED, Layout::COLOR_ATTACHMENT_OPTIMAL) => (
                Access::empty(),
                Access::COLOR_ATTACHMENT_WRITE,
                Stage::COLOR_ATTACHMENT_OUTPUT,
                Stage::COLOR_ATTACHMENT_OUTPUT,
            ),
            (Layout::COLOR_ATTACHMENT_OPTIMAL, Layout::PRESENT_SRC_KHR) => (
                Access::COLOR_ATTACHMENT_WRITE,
                Access::empty(),
                Stage::COLOR_ATTACHMENT_OUTPUT,
                Stage::BOTTOM_OF_PIPE,
            ),
            (old, new) => {
                return Err(VulkanError::Message(format!(
                    "Unsupported image layout transition: {:?} -> {:?}",
                    old, new
                )))
            }
        };

        Ok(Self {
            src_access,
            dst_access,
            src_stage,
            dst_stage,
        })
    }
}

/// Records a pipeline barrier moving every mip and layer of `image` between layouts.
pub fn record_layout_transition(
    device: &ash::Device,
    command_buffer: vk::CommandBuffer,
    image: vk::Image,
    aspect_mask: vk::ImageAspectFlags,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> Result<()> {
    let transition = ImageLayoutTransition::new(old_layout, new_layout)?;

    let barrier = vk::ImageMemoryBarrier::builder()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(full_subresource_range(aspect_mask))
        .src_access_mask(transition.src_access)
        .dst_access_mask(transition.dst_access)
        .build();

    unsafe {
        device.cmd_pipeline_barrier(
            command_buffer,
            transition.src_stage,
            transition.dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
    Ok(())
}

pub(crate) fn full_subresource_range(aspect_mask: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

fn create_image_view(
    device: &Device,
    image: vk::Image,
    format: vk::Format,
    aspect_mask: vk::ImageAspectFlags,
) -> Result<vk::ImageView> {
    Ok(unsafe {
        device.core.create_image_view(
            &vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(full_subresource_range(aspect_mask)),
            None,
        )
    }?)
}

/// View over an image owned elsewhere, such as a swapchain image.
pub struct ImageView {
    device: Arc<Device>,
    pub(crate) image: vk::Image,
    pub(crate) handle: vk::ImageView,
}

impl ImageView {
    pub fn new(
        device: &Arc<Device>,
        image: vk::Image,
        format: vk::Format,
        aspect_mask: vk::ImageAspectFlags,
    ) -> Result<Self> {
        let handle = create_image_view(device, image, format, aspect_mask)?;
        Ok(Self {
            device: device.clone(),
            image,
            handle,
        })
    }

    pub fn handle(&self) -> vk::ImageView {
        self.handle
    }

    pub fn image(&self) -> vk::Image {
        self.image
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        unsafe {
            self.device.core.destroy_image_view(self.handle, None);
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImageDescription {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub samples: vk::SampleCountFlags,
    pub location: MemoryLocation,
}

/// Allocated 2D image with a single mip and a view over it.
pub struct Image {
    device: Arc<Device>,
    pub(crate) handle: vk::Image,
    pub(crate) view: vk::ImageView,
    allocation: gpu_allocator::vulkan::Allocation,
    description: ImageDescription,
}

impl Image {
    pub fn new(device: &Arc<Device>, name: &str, description: &ImageDescription) -> Result<Self> {
        let extent = description.extent;
        if extent.width == 0 || extent.height == 0 {
            return Err(VulkanError::Message(format!(
                "Image {} has zero extent {}x{}",
                name, extent.width, extent.height
            )));
        }

        let handle = unsafe {
            device.core.create_image(
                &vk::ImageCreateInfo::builder()
                    .image_type(vk::ImageType::TYPE_2D)
                    .format(description.format)
                    .extent(vk::Extent3D {
                        width: extent.width,
                        height: extent.height,
                        depth: 1,
                    })
                    .mip_levels(1)
                    .array_layers(1)
                    .samples(description.samples)
                    .tiling(vk::ImageTiling::OPTIMAL)
                    .usage(description.usage)
                    .sharing_mode(vk::SharingMode::EXCLUSIVE)
                    .initial_layout(vk::ImageLayout::UNDEFINED),
                None,
            )
        }?;

        device.set_object_name(handle, name);

        let requirements = unsafe { device.core.get_image_memory_requirements(handle) };

        let allocation = match device.allocator().allocate(
            &gpu_allocator::vulkan::AllocationCreateDesc {
                name,
                requirements,
                location: description.location,
                linear: false,
                allocation_scheme: gpu_allocator::vulkan::AllocationScheme::GpuAllocatorManaged,
            },
        ) {
            Ok(allocation) => allocation,
            Err(err) => unsafe {
                error!("Failed to allocate memory for image {}: {}", name, err);
                device.core.destroy_image(handle, None);
                return Err(VulkanError::from(err));
            },
        };

        if let Err(err) = unsafe {
            device
                .core
                .bind_image_memory(handle, allocation.memory(), allocation.offset())
        } {
            error!("vkBindImageMemory failed for image {}: {}", name, err);
            unsafe {
                device.core.destroy_image(handle, None);
            };
            let _ = device.allocator().free(allocation);
            return Err(VulkanError::from(err));
        }

        let view = match create_image_view(
            device,
            handle,
            description.format,
            vk::ImageAspectFlags::COLOR,
        ) {
            Ok(view) => view,
            Err(err) => {
                unsafe {
                    device.core.destroy_image(handle, None);
                };
                let _ = device.allocator().free(allocation);
                return Err(err);
            }
        };

        Ok(Self {
            device: device.clone(),
            handle,
            view,
            allocation,
            description: description.clone(),
        })
    }

    pub fn handle(&self) -> vk::Image {
        self.handle
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.description.extent
    }

    pub fn format(&self) -> vk::Format {
        self.description.format
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            self.device.core.destroy_image_view(self.view, None);
            self.device.core.destroy_image(self.handle, None);
        };
        let _ = self
            .device
            .allocator()
            .free(std::mem::take(&mut self.allocation));
    }
}

fn rgba8_len(width: u32, height: u32) -> Option<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|pixels| pixels.checked_mul(4))
}

/// Sampled RGBA8 sRGB image with its sampler.
pub struct Texture {
    image: Image,
    sampler: Sampler,
}

impl Texture {
    pub fn from_file<P: AsRef<Path>>(device: &Arc<Device>, path: P) -> Result<Self> {
        let path = path.as_ref();
        let pixels = match ::image::open(path) {
            Ok(image) => image.to_rgba8(),
            Err(err) => {
                error!("Failed to load texture {}: {}", path.display(), err);
                return Err(err.into());
            }
        };

        let (width, height) = pixels.dimensions();
        info!("Loaded texture {} ({}x{})", path.display(), width, height);
        Self::from_rgba8(
            device,
            &path.display().to_string(),
            width,
            height,
            pixels.as_raw(),
        )
    }

    /// Uploads tightly packed RGBA8 `pixels` and leaves the image ready for fragment shader reads.
    pub fn from_rgba8(
        device: &Arc<Device>,
        name: &str,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<Self> {
        match rgba8_len(width, height) {
            Some(len) if len == pixels.len() && len > 0 => {}
            _ => {
                return Err(VulkanError::Message(format!(
                    "Texture {} expects {}x{} RGBA8 pixels, got {} bytes",
                    name,
                    width,
                    height,
                    pixels.len()
                )))
            }
        }

        let mut staging = Buffer::new(
            device,
            &format!("{} Staging", name),
            pixels.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
        )?;
        staging.write(0, pixels)?;

        let image = Image::new(
            device,
            name,
            &ImageDescription {
                extent: vk::Extent2D { width, height },
                format: vk::Format::R8G8B8A8_SRGB,
                usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
                samples: vk::SampleCountFlags::TYPE_1,
                location: MemoryLocation::GpuOnly,
            },
        )?;

        let core = &device.core;
        device.immediate_submit(|command_buffer| {
            record_layout_transition(
                core,
                command_buffer,
                image.handle,
                vk::ImageAspectFlags::COLOR,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            )?;

            unsafe {
                core.cmd_copy_buffer_to_image(
                    command_buffer,
                    staging.handle(),
                    image.handle,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[vk::BufferImageCopy {
                        buffer_offset: 0,
                        buffer_row_length: 0,
                        buffer_image_height: 0,
                        image_subresource: vk::ImageSubresourceLayers {
                            aspect_mask: vk::ImageAspectFlags::COLOR,
                            mip_level: 0,
                            base_array_layer: 0,
                            layer_count: 1,
                        },
                        image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
                        image_extent: vk::Extent3D {
                            width,
                            height,
                            depth: 1,
                        },
                    }],
                );
            }

            record_layout_transition(
                core,
                command_buffer,
                image.handle,
                vk::ImageAspectFlags::COLOR,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )
        })?;

        let sampler = Sampler::new(
            device,
            &format!("{} Sampler", name),
            &SamplerDescription {
                anisotropy: Some(device.physical_device().limits().max_sampler_anisotropy),
                ..Default::default()
            },
        )?;

        Ok(Self { image, sampler })
    }

    pub fn image(&self) -> &Image {
        &self.image
    }

    pub fn view(&self) -> vk::ImageView {
        self.image.view
    }

    pub fn sampler(&self) -> vk::Sampler {
        self.sampler.handle
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.image.extent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_transitions() {
        let to_transfer = ImageLayoutTransition::new(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .unwrap();
        assert_eq!(to_transfer.src_access, vk::AccessFlags::empty());
        assert_eq!(to_transfer.dst_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(to_transfer.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(to_transfer.dst_stage, vk::PipelineStageFlags::TRANSFER);

        let to_shader = ImageLayoutTransition::new(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(to_shader.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(to_shader.dst_access, vk::AccessFlags::SHADER_READ);
        assert_eq!(to_shader.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn frame_transitions() {
        let to_color = ImageLayoutTransition::new(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        )
        .unwrap();
        assert_eq!(to_color.dst_access, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
        assert_eq!(
            to_color.dst_stage,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        );

        let to_present = ImageLayoutTransition::new(
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        )
        .unwrap();
        assert_eq!(to_present.src_access, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
        assert_eq!(to_present.dst_stage, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
    }

    #[test]
    fn unsupported_transition_is_an_error() {
        assert!(ImageLayoutTransition::new(
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .is_err());
        assert!(ImageLayoutTransition::new(
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::ImageLayout::PRESENT_SRC_KHR,
        )
        .is_err());
    }

    #[test]
    fn rgba8_len_detects_overflow() {
        assert_eq!(rgba8_len(2, 3), Some(24));
        assert_eq!(rgba8_len(0, 3), Some(0));
        #[cfg(target_pointer_width = "64")]
        assert_eq!(rgba8_len(u32::MAX, u32::MAX), None);
    }
}
