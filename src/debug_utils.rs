use ash::vk;
use std::ffi::{CStr, CString};

use log::{error, info, trace, warn};

pub(crate) fn messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT {
    vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(vulkan_debug_callback))
        .build()
}

pub(crate) struct DebugUtils {
    debug_utils: ash::extensions::ext::DebugUtils,
    debug_call_back: vk::DebugUtilsMessengerEXT,
}

impl DebugUtils {
    pub(crate) fn new(
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> ash::prelude::VkResult<Self> {
        let debug_utils_loader = ash::extensions::ext::DebugUtils::new(entry, instance);
        let debug_call_back = unsafe {
            debug_utils_loader.create_debug_utils_messenger(&messenger_create_info(), None)?
        };

        Ok(Self {
            debug_utils: debug_utils_loader,
            debug_call_back,
        })
    }

    pub(crate) fn set_object_name<T: vk::Handle>(
        &self,
        device: vk::Device,
        object: T,
        object_name: &str,
    ) {
        let object_name = match CString::new(object_name) {
            Ok(object_name) => object_name,
            Err(err) => {
                warn!("Invalid object name {:?}: {}", object_name, err);
                return;
            }
        };

        let result = unsafe {
            self.debug_utils.set_debug_utils_object_name(
                device,
                &vk::DebugUtilsObjectNameInfoEXT::builder()
                    .object_type(T::TYPE)
                    .object_handle(object.as_raw())
                    .object_name(object_name.as_c_str())
                    .build(),
            )
        };

        if let Err(err) = result {
            warn!("vkSetDebugUtilsObjectNameEXT failed: {}", err);
        }
    }
}

impl Drop for DebugUtils {
    fn drop(&mut self) {
        unsafe {
            self.debug_utils
                .destroy_debug_utils_messenger(self.debug_call_back, None);
        }
    }
}

unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    use std::borrow::Cow;
    let message = if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        Cow::from("")
    } else {
        CStr::from_ptr((*p_callback_data).p_message).to_string_lossy()
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => {
            trace!("[{:?}] {}", message_type, message)
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => info!("[{:?}] {}", message_type, message),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            warn!("[{:?}] {}", message_type, message)
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            error!("[{:?}] {}", message_type, message)
        }
        _ => info!("Unknown Severity {:?}: {}", message_severity, message),
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messenger_covers_validation_and_performance() {
        let info = messenger_create_info();
        assert!(info
            .message_type
            .contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION));
        assert!(info
            .message_type
            .contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE));
        assert!(info
            .message_severity
            .contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR));
        assert!(!info
            .message_severity
            .contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO));
        assert!(info.pfn_user_callback.is_some());
    }

    #[test]
    fn callback_tolerates_null_message() {
        let data = vk::DebugUtilsMessengerCallbackDataEXT::default();
        let result = unsafe {
            vulkan_debug_callback(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL,
                &data,
                std::ptr::null_mut(),
            )
        };
        assert_eq!(result, vk::FALSE);
    }
}
