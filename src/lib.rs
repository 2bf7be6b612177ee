mod buffer;
mod debug_utils;
mod descriptor;
mod device;
mod frame;
mod image;
mod instance;
mod layout;
mod physical_device;
mod pipeline;
mod sampler;
mod settings;
mod shader;
mod surface;
mod swapchain;
mod sync;

pub use buffer::*;
pub use descriptor::*;
pub use device::*;
pub use frame::*;
pub use self::image::*;
pub use instance::*;
pub use layout::*;
pub use physical_device::*;
pub use pipeline::*;
pub use sampler::*;
pub use settings::*;
pub use shader::*;
pub use surface::*;
pub use swapchain::*;
pub use sync::*;

pub use ash;
pub use gpu_allocator::MemoryLocation;

use std::ffi::{c_char, CStr};

#[derive(thiserror::Error, Debug)]
pub enum VulkanError {
    #[error("Vk error: {0}")]
    Vk(#[from] ash::vk::Result),

    #[error("Gpu alloc error: {0}")]
    GpuAlloc(#[from] gpu_allocator::AllocationError),

    #[error("Failed to load vulkan: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("Image error: {0}")]
    Image(#[from] ::image::ImageError),

    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Error: {0}")]
    Message(String),
}

pub type Result<T> = std::result::Result<T, VulkanError>;

pub(crate) fn c_str_to_string(c_str: &[c_char]) -> String {
    unsafe {
        CStr::from_ptr(c_str.as_ptr())
            .to_string_lossy()
            .into_owned()
    }
}

/// Returns every name in `required` that is absent from `available`.
pub(crate) fn missing_names<'a>(required: &[&'a CStr], available: &[&CStr]) -> Vec<&'a CStr> {
    required
        .iter()
        .filter(|&&name| !available.contains(&name))
        .copied()
        .collect()
}

pub(crate) fn require_names(kind: &str, required: &[&CStr], available: &[&CStr]) -> Result<()> {
    let missing = missing_names(required, available);
    if missing.is_empty() {
        Ok(())
    } else {
        let missing: Vec<String> = missing
            .iter()
            .map(|name| name.to_string_lossy().into_owned())
            .collect();
        log::error!("Missing required {}: {:?}", kind, missing);
        Err(VulkanError::Message(format!(
            "Missing required {}: {}",
            kind,
            missing.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(bytes: &'static [u8]) -> &'static CStr {
        CStr::from_bytes_with_nul(bytes).unwrap()
    }

    #[test]
    fn missing_names_reports_only_absent_entries() {
        let required = [name(b"VK_KHR_surface\0"), name(b"VK_EXT_debug_utils\0")];
        let available = [name(b"VK_KHR_surface\0"), name(b"VK_KHR_xlib_surface\0")];

        assert_eq!(
            missing_names(&required, &available),
            vec![name(b"VK_EXT_debug_utils\0")]
        );
    }

    #[test]
    fn missing_names_empty_when_all_present() {
        let required = [name(b"VK_LAYER_KHRONOS_validation\0")];
        let available = [name(b"VK_LAYER_KHRONOS_validation\0")];
        assert!(missing_names(&required, &available).is_empty());
    }

    #[test]
    fn require_names_names_the_missing_entry() {
        let required = [name(b"VK_KHR_swapchain\0")];
        match require_names("device extensions", &required, &[]) {
            Err(VulkanError::Message(message)) => assert!(message.contains("VK_KHR_swapchain")),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(require_names("device extensions", &required, &required).is_ok());
    }

    #[test]
    fn c_str_to_string_stops_at_nul() {
        let mut raw = [0 as c_char; 16];
        for (dst, src) in raw.iter_mut().zip(b"llvmpipe".iter()) {
            *dst = *src as c_char;
        }
        assert_eq!(c_str_to_string(&raw), "llvmpipe");
    }
}
