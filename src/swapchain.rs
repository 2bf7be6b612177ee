use crate::{Device, Image, ImageDescription, ImageView, Result, SwapchainSettings, VulkanError};
use ash::vk;
use gpu_allocator::MemoryLocation;
use log::{error, info};
use std::sync::Arc;

pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    settings: &SwapchainSettings,
) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|surface_format| {
            surface_format.format == settings.preferred_format
                && surface_format.color_space == settings.preferred_color_space
        })
        .or_else(|| formats.first())
        .copied()
}

/// Mailbox when preferred and available, otherwise FIFO which every surface supports.
pub fn choose_present_mode(
    present_modes: &[vk::PresentModeKHR],
    prefer_mailbox: bool,
) -> vk::PresentModeKHR {
    if prefer_mailbox && present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// One more than the minimum, capped by the maximum when the surface has one.
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        desired.min(capabilities.max_image_count)
    } else {
        desired
    }
}

/// The surface's current extent, or the window size clamped to the supported range
/// when the surface lets the swapchain decide.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    window_extent: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: window_extent.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: window_extent.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

pub fn choose_composite_alpha(
    supported: vk::CompositeAlphaFlagsKHR,
) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::INHERIT,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
    ]
    .into_iter()
    .find(|&mode| supported.contains(mode))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

/// Concurrent sharing across both families when graphics and present differ.
pub fn sharing_mode(graphics_family: u32, present_family: u32) -> (vk::SharingMode, Vec<u32>) {
    if graphics_family == present_family {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (
            vk::SharingMode::CONCURRENT,
            vec![graphics_family, present_family],
        )
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum AcquireResult {
    Acquired { index: u32, suboptimal: bool },
    OutOfDate,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PresentResult {
    Presented,
    NeedsRebuild,
}

#[derive(Debug)]
struct SwapchainCapabilities {
    capabilities: vk::SurfaceCapabilitiesKHR,
    formats: Vec<vk::SurfaceFormatKHR>,
    present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainCapabilities {
    fn new(device: &Device) -> Result<Self> {
        let physical_device = device.physical.handle;
        Ok(Self {
            capabilities: device.surface.capabilities(physical_device)?,
            formats: device.surface.formats(physical_device)?,
            present_modes: device.surface.present_modes(physical_device)?,
        })
    }
}

struct SwapchainInstance {
    device: Arc<Device>,
    handle: vk::SwapchainKHR,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    views: Vec<ImageView>,
    color_target: Option<Image>,
}

impl SwapchainInstance {
    fn new(
        device: &Arc<Device>,
        settings: &SwapchainSettings,
        capabilities: &SwapchainCapabilities,
        extent: vk::Extent2D,
        old_swapchain: vk::SwapchainKHR,
    ) -> Result<Self> {
        let format = choose_surface_format(&capabilities.formats, settings).ok_or_else(|| {
            VulkanError::Message(String::from("Surface reports no formats"))
        })?;
        let present_mode = choose_present_mode(&capabilities.present_modes, settings.prefer_mailbox);
        let image_count = choose_image_count(&capabilities.capabilities);

        let (sharing_mode, queue_family_indices) = sharing_mode(
            device.graphics_queue.family_index,
            device.present_queue.family_index,
        );

        let handle = match unsafe {
            device.swapchain_ext.create_swapchain(
                &vk::SwapchainCreateInfoKHR::builder()
                    .surface(device.surface.handle)
                    .min_image_count(image_count)
                    .image_color_space(format.color_space)
                    .image_format(format.format)
                    .image_extent(extent)
                    .image_array_layers(1)
                    .image_usage(
                        vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
                    )
                    .image_sharing_mode(sharing_mode)
                    .queue_family_indices(&queue_family_indices)
                    .pre_transform(capabilities.capabilities.current_transform)
                    .composite_alpha(choose_composite_alpha(
                        capabilities.capabilities.supported_composite_alpha,
                    ))
                    .present_mode(present_mode)
                    .clipped(true)
                    .old_swapchain(old_swapchain),
                None,
            )
        } {
            Ok(handle) => handle,
            Err(err) => {
                error!("vkCreateSwapchainKHR failed: {}", err);
                return Err(err.into());
            }
        };

        // From here on drop cleans up whatever was created
        let mut instance = Self {
            device: device.clone(),
            handle,
            format,
            extent,
            views: Vec::new(),
            color_target: None,
        };

        let images = unsafe { device.swapchain_ext.get_swapchain_images(handle) }?;
        for image in images {
            instance.views.push(ImageView::new(
                device,
                image,
                format.format,
                vk::ImageAspectFlags::COLOR,
            )?);
        }

        if device.sample_count != vk::SampleCountFlags::TYPE_1 {
            instance.color_target = Some(Image::new(
                device,
                "Multisampled Color Target",
                &ImageDescription {
                    extent,
                    format: format.format,
                    usage: vk::ImageUsageFlags::COLOR_ATTACHMENT
                        | vk::ImageUsageFlags::TRANSIENT_ATTACHMENT,
                    samples: device.sample_count,
                    location: MemoryLocation::GpuOnly,
                },
            )?);
        }

        info!(
            "Created swapchain: {}x{} {:?} {:?}, {} images, {:?}",
            extent.width,
            extent.height,
            format.format,
            format.color_space,
            instance.views.len(),
            present_mode
        );

        Ok(instance)
    }
}

impl Drop for SwapchainInstance {
    fn drop(&mut self) {
        self.views.clear();
        self.color_target = None;
        unsafe {
            self.device.swapchain_ext.destroy_swapchain(self.handle, None);
        }
    }
}

pub struct Swapchain {
    device: Arc<Device>,
    settings: SwapchainSettings,
    current: SwapchainInstance,
}

impl Swapchain {
    pub fn new(
        device: Arc<Device>,
        settings: SwapchainSettings,
        window_extent: vk::Extent2D,
    ) -> Result<Self> {
        let capabilities = SwapchainCapabilities::new(&device)?;
        let extent = choose_extent(&capabilities.capabilities, window_extent);
        if extent.width == 0 || extent.height == 0 {
            return Err(VulkanError::Message(String::from(
                "Cannot create a swapchain for a zero sized surface",
            )));
        }

        let current = SwapchainInstance::new(
            &device,
            &settings,
            &capabilities,
            extent,
            vk::SwapchainKHR::null(),
        )?;

        Ok(Self {
            device,
            settings,
            current,
        })
    }

    /// Replaces the swapchain, images and views. Returns false and keeps the old
    /// swapchain while the surface has a zero sized extent.
    pub fn recreate(&mut self, window_extent: vk::Extent2D) -> Result<bool> {
        self.device.wait_idle()?;

        let capabilities = SwapchainCapabilities::new(&self.device)?;
        let extent = choose_extent(&capabilities.capabilities, window_extent);
        if extent.width == 0 || extent.height == 0 {
            return Ok(false);
        }

        self.current = SwapchainInstance::new(
            &self.device,
            &self.settings,
            &capabilities,
            extent,
            self.current.handle,
        )?;
        Ok(true)
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.current.handle
    }

    pub fn format(&self) -> vk::Format {
        self.current.format.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.current.extent
    }

    pub fn image_count(&self) -> usize {
        self.current.views.len()
    }

    pub fn image_view(&self, index: u32) -> Option<&ImageView> {
        self.current.views.get(index as usize)
    }

    pub fn color_target(&self) -> Option<&Image> {
        self.current.color_target.as_ref()
    }

    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<AcquireResult> {
        match unsafe {
            self.device.swapchain_ext.acquire_next_image(
                self.current.handle,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        } {
            Ok((index, suboptimal)) => Ok(AcquireResult::Acquired { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireResult::OutOfDate),
            Err(err) => {
                error!("vkAcquireNextImageKHR failed: {}", err);
                Err(err.into())
            }
        }
    }

    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<PresentResult> {
        let wait_semaphores = [wait_semaphore];
        let swapchains = [self.current.handle];
        let image_indices = [image_index];

        match unsafe {
            self.device.swapchain_ext.queue_present(
                queue,
                &vk::PresentInfoKHR::builder()
                    .wait_semaphores(&wait_semaphores)
                    .swapchains(&swapchains)
                    .image_indices(&image_indices),
            )
        } {
            Ok(false) => Ok(PresentResult::Presented),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentResult::NeedsRebuild),
            Err(err) => {
                error!("vkQueuePresentKHR failed: {}", err);
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(
        current: vk::Extent2D,
        min_images: u32,
        max_images: u32,
    ) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min_images,
            max_image_count: max_images,
            current_extent: current,
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 2048,
            },
            ..Default::default()
        }
    }

    fn surface_format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn preferred_format_wins_else_first() {
        let settings = SwapchainSettings::default();
        let formats = [
            surface_format(vk::Format::B8G8R8A8_UNORM),
            surface_format(vk::Format::B8G8R8A8_SRGB),
        ];
        assert_eq!(
            choose_surface_format(&formats, &settings).map(|format| format.format),
            Some(vk::Format::B8G8R8A8_SRGB)
        );

        let formats = [surface_format(vk::Format::R8G8B8A8_UNORM)];
        assert_eq!(
            choose_surface_format(&formats, &settings).map(|format| format.format),
            Some(vk::Format::R8G8B8A8_UNORM)
        );
        assert_eq!(choose_surface_format(&[], &settings), None);
    }

    #[test]
    fn mailbox_only_when_preferred_and_available() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&modes, true), vk::PresentModeKHR::MAILBOX);
        assert_eq!(choose_present_mode(&modes, false), vk::PresentModeKHR::FIFO);
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE], true),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn image_count_respects_maximum() {
        let extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        assert_eq!(choose_image_count(&capabilities(extent, 2, 0)), 3);
        assert_eq!(choose_image_count(&capabilities(extent, 2, 8)), 3);
        assert_eq!(choose_image_count(&capabilities(extent, 3, 3)), 3);
    }

    #[test]
    fn extent_uses_current_when_defined() {
        let current = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let window = vk::Extent2D {
            width: 1024,
            height: 768,
        };
        assert_eq!(choose_extent(&capabilities(current, 2, 0), window), current);
    }

    #[test]
    fn extent_clamps_window_size_when_undefined() {
        let undefined = vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        };
        let window = vk::Extent2D {
            width: 8000,
            height: 0,
        };
        assert_eq!(
            choose_extent(&capabilities(undefined, 2, 0), window),
            vk::Extent2D {
                width: 4096,
                height: 1,
            }
        );
    }

    #[test]
    fn sharing_mode_concurrent_only_for_split_families() {
        assert_eq!(sharing_mode(0, 0), (vk::SharingMode::EXCLUSIVE, vec![]));
        assert_eq!(
            sharing_mode(0, 2),
            (vk::SharingMode::CONCURRENT, vec![0, 2])
        );
    }

    #[test]
    fn composite_alpha_prefers_opaque() {
        assert_eq!(
            choose_composite_alpha(
                vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED | vk::CompositeAlphaFlagsKHR::OPAQUE
            ),
            vk::CompositeAlphaFlagsKHR::OPAQUE
        );
        assert_eq!(
            choose_composite_alpha(vk::CompositeAlphaFlagsKHR::INHERIT),
            vk::CompositeAlphaFlagsKHR::INHERIT
        );
    }
}
