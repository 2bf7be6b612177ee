use crate::debug_utils::{self, DebugUtils};
use crate::physical_device::PhysicalDevice;
use crate::surface::Surface;
use crate::{c_str_to_string, require_names, InstanceSettings, Result, VulkanError};
use ash::vk;
use log::{debug, error, info};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle, RawDisplayHandle};
use std::ffi::{CStr, CString};
use std::sync::Arc;

pub(crate) fn validation_layer_name() -> &'static CStr {
    unsafe { CStr::from_bytes_with_nul_unchecked(b"VK_LAYER_KHRONOS_validation\0") }
}

pub struct Instance {
    pub(crate) entry: ash::Entry,
    pub(crate) core: ash::Instance,
    pub(crate) surface_ext: ash::extensions::khr::Surface,
    pub(crate) debug_utils: Option<DebugUtils>,
}

impl Instance {
    /// `display_handle` decides which window-system surface extensions get enabled.
    pub fn new(settings: &InstanceSettings, display_handle: RawDisplayHandle) -> Result<Arc<Self>> {
        let entry = unsafe { ash::Entry::load() }?;

        let available_layers = entry.enumerate_instance_layer_properties()?;
        for layer in available_layers.iter() {
            debug!("Instance layer: {}", c_str_to_string(&layer.layer_name));
        }

        let available_extensions = entry.enumerate_instance_extension_properties(None)?;
        for extension in available_extensions.iter() {
            debug!(
                "Instance extension: {}",
                c_str_to_string(&extension.extension_name)
            );
        }

        let mut required_layers: Vec<&CStr> = Vec::new();
        if settings.validation {
            required_layers.push(validation_layer_name());
        }

        let mut required_extensions: Vec<&CStr> =
            ash_window::enumerate_required_extensions(display_handle)?
                .iter()
                .map(|&name| unsafe { CStr::from_ptr(name) })
                .collect();
        if settings.validation {
            required_extensions.push(ash::extensions::ext::DebugUtils::name());
        }

        let available_layer_names: Vec<&CStr> = available_layers
            .iter()
            .map(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) })
            .collect();
        require_names("instance layers", &required_layers, &available_layer_names)?;

        let available_extension_names: Vec<&CStr> = available_extensions
            .iter()
            .map(|extension| unsafe { CStr::from_ptr(extension.extension_name.as_ptr()) })
            .collect();
        require_names(
            "instance extensions",
            &required_extensions,
            &available_extension_names,
        )?;

        let app_name = CString::new(settings.app_name.as_str())
            .map_err(|err| VulkanError::Message(format!("Invalid app name: {}", err)))?;
        let engine_name = CString::new("vbr")
            .map_err(|err| VulkanError::Message(format!("Invalid engine name: {}", err)))?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(app_name.as_c_str())
            .application_version(settings.vk_app_version())
            .engine_name(engine_name.as_c_str())
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_3);

        let layer_names_raw: Vec<*const std::os::raw::c_char> =
            required_layers.iter().map(|name| name.as_ptr()).collect();
        let extension_names_raw: Vec<*const std::os::raw::c_char> = required_extensions
            .iter()
            .map(|name| name.as_ptr())
            .collect();

        // Chained so instance creation and destruction are validated too
        let mut messenger_info = debug_utils::messenger_create_info();

        let mut create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_layer_names(&layer_names_raw)
            .enabled_extension_names(&extension_names_raw);
        if settings.validation {
            create_info = create_info.push_next(&mut messenger_info);
        }

        let core = match unsafe { entry.create_instance(&create_info, None) } {
            Ok(core) => core,
            Err(err) => {
                error!("vkCreateInstance failed: {}", err);
                return Err(err.into());
            }
        };

        let debug_utils = if settings.validation {
            match DebugUtils::new(&entry, &core) {
                Ok(debug_utils) => Some(debug_utils),
                Err(err) => {
                    error!("vkCreateDebugUtilsMessengerEXT failed: {}", err);
                    unsafe { core.destroy_instance(None) };
                    return Err(err.into());
                }
            }
        } else {
            None
        };

        let surface_ext = ash::extensions::khr::Surface::new(&entry, &core);

        info!(
            "Created instance for {} (validation: {})",
            settings.app_name, settings.validation
        );

        Ok(Arc::new(Self {
            entry,
            core,
            surface_ext,
            debug_utils,
        }))
    }

    pub fn validation_enabled(&self) -> bool {
        self.debug_utils.is_some()
    }

    pub fn create_surface<T: HasRawWindowHandle + HasRawDisplayHandle>(
        self: &Arc<Self>,
        window: &T,
    ) -> Result<Surface> {
        Surface::new(self.clone(), window)
    }

    pub fn physical_devices(&self) -> Result<Vec<PhysicalDevice>> {
        let handles = unsafe { self.core.enumerate_physical_devices() }?;
        Ok(handles
            .into_iter()
            .map(|handle| PhysicalDevice::new(&self.core, handle))
            .collect())
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        drop(self.debug_utils.take());
        unsafe {
            self.core.destroy_instance(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_layer_name_is_khronos() {
        assert_eq!(
            validation_layer_name().to_str().unwrap(),
            "VK_LAYER_KHRONOS_validation"
        );
    }
}
