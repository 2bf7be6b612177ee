use crate::instance::validation_layer_name;
use crate::physical_device::{clamp_sample_count, pick_physical_device, QueueFamilyIndices};
use crate::{
    c_str_to_string, require_names, DeviceSettings, Instance, PhysicalDevice, Result, Surface,
    VulkanError,
};
use ash::vk;
use gpu_allocator::vulkan::Allocator;
use log::{debug, error, info, warn};
use std::ffi::CStr;
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Copy, Clone, Debug)]
pub struct Queue {
    pub family_index: u32,
    pub handle: vk::Queue,
}

pub struct Device {
    pub(crate) instance: Arc<Instance>,
    pub(crate) surface: Arc<Surface>,
    pub(crate) physical: PhysicalDevice,
    pub(crate) queue_families: QueueFamilyIndices,
    pub(crate) core: ash::Device,
    pub(crate) swapchain_ext: ash::extensions::khr::Swapchain,

    pub graphics_queue: Queue,
    pub present_queue: Queue,
    pub transfer_queue: Queue,
    pub compute_queue: Option<Queue>,

    pub(crate) sample_count: vk::SampleCountFlags,
    allocator: ManuallyDrop<Mutex<Allocator>>,
    single_time_pool: Mutex<vk::CommandPool>,
}

/// Devices that can render to `surface` with dynamic rendering, paired with their queue families.
fn usable_devices(
    instance: &Instance,
    surface: &Surface,
) -> Result<Vec<(PhysicalDevice, QueueFamilyIndices)>> {
    let mut usable = Vec::new();
    for physical_device in instance.physical_devices()? {
        debug!("Found physical device: {:?}", physical_device);

        if !physical_device.info.supports_vulkan_1_3() {
            warn!(
                "Skipping {}: Vulkan 1.3 is required for dynamic rendering",
                physical_device.info.name
            );
            continue;
        }

        let queue_families =
            QueueFamilyIndices::find(physical_device.queue_family_properties(), |index| {
                surface.supports_present(physical_device.handle, index)
            });
        if !queue_families.is_complete() {
            warn!(
                "Skipping {}: no graphics or present queue family",
                physical_device.info.name
            );
            continue;
        }

        usable.push((physical_device, queue_families));
    }
    Ok(usable)
}

impl Device {
    pub fn new(
        instance: Arc<Instance>,
        surface: Arc<Surface>,
        settings: &DeviceSettings,
    ) -> Result<Arc<Self>> {
        let mut candidates = usable_devices(&instance, &surface)?;
        let infos: Vec<_> = candidates
            .iter()
            .map(|(physical_device, _)| physical_device.info.clone())
            .collect();
        let (physical, queue_families) = match pick_physical_device(&infos) {
            Some(index) => candidates.swap_remove(index),
            None => {
                error!("Failed to find a suitable GPU");
                return Err(VulkanError::Message(String::from(
                    "Failed to find a suitable GPU",
                )));
            }
        };
        info!("Selected physical device: {:?}", physical.info);

        let sample_count = clamp_sample_count(settings.sample_count, physical.info.max_sample_count);
        if sample_count != settings.sample_count {
            warn!(
                "Requested {:?} samples, using {:?}",
                settings.sample_count, sample_count
            );
        }

        let available_layers =
            unsafe { instance.core.enumerate_device_layer_properties(physical.handle) }?;
        for layer in available_layers.iter() {
            debug!("Device layer: {}", c_str_to_string(&layer.layer_name));
        }

        let available_extensions =
            unsafe { instance.core.enumerate_device_extension_properties(physical.handle) }?;
        for extension in available_extensions.iter() {
            debug!(
                "Device extension: {}",
                c_str_to_string(&extension.extension_name)
            );
        }

        let required_extensions = [ash::extensions::khr::Swapchain::name()];
        let available_extension_names: Vec<&CStr> = available_extensions
            .iter()
            .map(|extension| unsafe { CStr::from_ptr(extension.extension_name.as_ptr()) })
            .collect();
        require_names(
            "device extensions",
            &required_extensions,
            &available_extension_names,
        )?;

        // Device layers are ignored by current loaders, older ones still read them
        let layer_names_raw: Vec<*const std::os::raw::c_char> = if instance.validation_enabled() {
            vec![validation_layer_name().as_ptr()]
        } else {
            Vec::new()
        };
        let extension_names_raw: Vec<*const std::os::raw::c_char> = required_extensions
            .iter()
            .map(|name| name.as_ptr())
            .collect();

        let queue_priorities = [1.0];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = queue_families
            .unique_families()
            .into_iter()
            .map(|queue_family_index| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(queue_family_index)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let mut vulkan_1_3_features =
            vk::PhysicalDeviceVulkan13Features::builder().dynamic_rendering(true);

        let core = match unsafe {
            instance.core.create_device(
                physical.handle,
                &vk::DeviceCreateInfo::builder()
                    .queue_create_infos(&queue_create_infos)
                    .enabled_layer_names(&layer_names_raw)
                    .enabled_extension_names(&extension_names_raw)
                    .enabled_features(&physical.features)
                    .push_next(&mut vulkan_1_3_features),
                None,
            )
        } {
            Ok(core) => core,
            Err(err) => {
                error!("vkCreateDevice failed: {}", err);
                return Err(err.into());
            }
        };

        let get_queue = |family_index: u32| Queue {
            family_index,
            handle: unsafe { core.get_device_queue(family_index, 0) },
        };

        // Both are guaranteed by is_complete()
        let (Some(graphics_index), Some(present_index)) =
            (queue_families.graphics, queue_families.present)
        else {
            unsafe { core.destroy_device(None) };
            return Err(VulkanError::Message(String::from(
                "Missing graphics or present queue family",
            )));
        };

        let graphics_queue = get_queue(graphics_index);
        let present_queue = get_queue(present_index);
        let transfer_queue = get_queue(queue_families.transfer.unwrap_or(graphics_index));
        let compute_queue = queue_families.compute.map(get_queue);

        let single_time_pool = match unsafe {
            core.create_command_pool(
                &vk::CommandPoolCreateInfo::builder()
                    .flags(vk::CommandPoolCreateFlags::TRANSIENT)
                    .queue_family_index(graphics_index),
                None,
            )
        } {
            Ok(pool) => pool,
            Err(err) => {
                error!("vkCreateCommandPool failed: {}", err);
                unsafe { core.destroy_device(None) };
                return Err(err.into());
            }
        };

        let allocator = match Allocator::new(&gpu_allocator::vulkan::AllocatorCreateDesc {
            instance: instance.core.clone(),
            device: core.clone(),
            physical_device: physical.handle,
            debug_settings: gpu_allocator::AllocatorDebugSettings::default(),
            buffer_device_address: false,
            allocation_sizes: gpu_allocator::AllocationSizes::default(),
        }) {
            Ok(allocator) => allocator,
            Err(err) => {
                error!("Failed to create gpu allocator: {}", err);
                unsafe {
                    core.destroy_command_pool(single_time_pool, None);
                    core.destroy_device(None);
                }
                return Err(err.into());
            }
        };

        let swapchain_ext = ash::extensions::khr::Swapchain::new(&instance.core, &core);

        info!(
            "Created device: graphics {}, present {}, transfer {}, compute {:?}",
            graphics_queue.family_index,
            present_queue.family_index,
            transfer_queue.family_index,
            compute_queue.map(|queue| queue.family_index)
        );

        Ok(Arc::new(Self {
            instance,
            surface,
            physical,
            queue_families,
            core,
            swapchain_ext,
            graphics_queue,
            present_queue,
            transfer_queue,
            compute_queue,
            sample_count,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            single_time_pool: Mutex::new(single_time_pool),
        }))
    }

    pub fn core(&self) -> &ash::Device {
        &self.core
    }

    pub fn physical_device(&self) -> &PhysicalDevice {
        &self.physical
    }

    pub fn queue_families(&self) -> QueueFamilyIndices {
        self.queue_families
    }

    /// The MSAA sample count actually in use after clamping to device limits.
    pub fn sample_count(&self) -> vk::SampleCountFlags {
        self.sample_count
    }

    pub fn wait_idle(&self) -> Result<()> {
        Ok(unsafe { self.core.device_wait_idle() }?)
    }

    pub(crate) fn allocator(&self) -> MutexGuard<'_, Allocator> {
        self.allocator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_object_name<T: vk::Handle>(&self, object: T, name: &str) {
        if let Some(debug_utils) = &self.instance.debug_utils {
            debug_utils.set_object_name(self.core.handle(), object, name);
        }
    }

    /// Allocates a primary command buffer and begins it for one submission.
    /// Must be finished with [`Device::end_single_time`].
    pub fn begin_single_time(&self) -> Result<vk::CommandBuffer> {
        let pool = self
            .single_time_pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let command_buffer = unsafe {
            self.core.allocate_command_buffers(
                &vk::CommandBufferAllocateInfo::builder()
                    .command_pool(*pool)
                    .level(vk::CommandBufferLevel::PRIMARY)
                    .command_buffer_count(1),
            )
        }?[0];

        if let Err(err) = unsafe {
            self.core.begin_command_buffer(
                command_buffer,
                &vk::CommandBufferBeginInfo::builder()
                    .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
            )
        } {
            error!("vkBeginCommandBuffer failed: {}", err);
            unsafe { self.core.free_command_buffers(*pool, &[command_buffer]) };
            return Err(err.into());
        }

        Ok(command_buffer)
    }

    /// Ends, submits and waits for `command_buffer`, then frees it.
    pub fn end_single_time(&self, command_buffer: vk::CommandBuffer) -> Result<()> {
        let pool = self
            .single_time_pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let result = unsafe {
            self.core.end_command_buffer(command_buffer).and_then(|_| {
                let command_buffers = [command_buffer];
                self.core.queue_submit(
                    self.graphics_queue.handle,
                    &[vk::SubmitInfo::builder()
                        .command_buffers(&command_buffers)
                        .build()],
                    vk::Fence::null(),
                )?;
                self.core.queue_wait_idle(self.graphics_queue.handle)
            })
        };

        unsafe { self.core.free_command_buffers(*pool, &[command_buffer]) };

        if let Err(err) = result {
            error!("Single time command submission failed: {}", err);
            return Err(err.into());
        }
        Ok(())
    }

    /// Records `record` into a one-shot command buffer and waits for it to execute.
    pub fn immediate_submit<F>(&self, record: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer) -> Result<()>,
    {
        let command_buffer = self.begin_single_time()?;
        if let Err(err) = record(command_buffer) {
            let pool = self
                .single_time_pool
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            unsafe {
                let _ = self.core.end_command_buffer(command_buffer);
                self.core.free_command_buffers(*pool, &[command_buffer]);
            }
            return Err(err);
        }
        self.end_single_time(command_buffer)
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(err) = self.core.device_wait_idle() {
                error!("vkDeviceWaitIdle failed: {}", err);
            }

            let pool = *self
                .single_time_pool
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner);
            self.core.destroy_command_pool(pool, None);

            ManuallyDrop::drop(&mut self.allocator);
            self.core.destroy_device(None);
        }
    }
}
