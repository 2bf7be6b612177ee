use crate::{Instance, Result};
use ash::vk;
use log::error;
use std::sync::Arc;

pub struct Surface {
    pub(crate) instance: Arc<Instance>,
    pub(crate) handle: vk::SurfaceKHR,
}

impl Surface {
    pub(crate) fn new<
        T: raw_window_handle::HasRawWindowHandle + raw_window_handle::HasRawDisplayHandle,
    >(
        instance: Arc<Instance>,
        window: &T,
    ) -> Result<Self> {
        let handle = match unsafe {
            ash_window::create_surface(
                &instance.entry,
                &instance.core,
                window.raw_display_handle(),
                window.raw_window_handle(),
                None,
            )
        } {
            Ok(handle) => handle,
            Err(err) => {
                error!("Failed to create window surface: {}", err);
                return Err(err.into());
            }
        };

        Ok(Self { instance, handle })
    }

    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    pub fn capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<vk::SurfaceCapabilitiesKHR> {
        Ok(unsafe {
            self.instance
                .surface_ext
                .get_physical_device_surface_capabilities(physical_device, self.handle)
        }?)
    }

    pub fn formats(&self, physical_device: vk::PhysicalDevice) -> Result<Vec<vk::SurfaceFormatKHR>> {
        Ok(unsafe {
            self.instance
                .surface_ext
                .get_physical_device_surface_formats(physical_device, self.handle)
        }?)
    }

    pub fn present_modes(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Vec<vk::PresentModeKHR>> {
        Ok(unsafe {
            self.instance
                .surface_ext
                .get_physical_device_surface_present_modes(physical_device, self.handle)
        }?)
    }

    pub fn supports_present(&self, physical_device: vk::PhysicalDevice, family_index: u32) -> bool {
        match unsafe {
            self.instance.surface_ext.get_physical_device_surface_support(
                physical_device,
                family_index,
                self.handle,
            )
        } {
            Ok(supported) => supported,
            Err(err) => {
                error!("vkGetPhysicalDeviceSurfaceSupportKHR failed: {}", err);
                false
            }
        }
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.instance.surface_ext.destroy_surface(self.handle, None);
        }
    }
}
