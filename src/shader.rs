use crate::{Device, Result, VulkanError};
use ash::vk;
use log::error;
use std::path::Path;
use std::sync::Arc;

const SPIRV_MAGIC: u32 = 0x0723_0203;

pub(crate) fn validate_spirv(code: &[u32]) -> Result<()> {
    match code.first() {
        None => Err(VulkanError::Message(String::from("SPIR-V code is empty"))),
        Some(&magic) if magic != SPIRV_MAGIC => Err(VulkanError::Message(format!(
            "Invalid SPIR-V magic number: {:#010x}",
            magic
        ))),
        Some(_) => Ok(()),
    }
}

/// Reads a compiled SPIR-V file, fixing up endianness and rejecting files that are not SPIR-V.
pub fn load_spirv<P: AsRef<Path>>(path: P) -> Result<Vec<u32>> {
    let path = path.as_ref();
    let code = std::fs::File::open(path)
        .and_then(|mut file| ash::util::read_spv(&mut file))
        .map_err(|err| {
            error!("Failed to read shader {}: {}", path.display(), err);
            VulkanError::from(err)
        })?;
    validate_spirv(&code)?;
    Ok(code)
}

pub struct ShaderModule {
    device: Arc<Device>,
    pub(crate) handle: vk::ShaderModule,
}

impl ShaderModule {
    pub fn new(device: &Arc<Device>, code: &[u32]) -> Result<Self> {
        validate_spirv(code)?;
        let handle = unsafe {
            device
                .core
                .create_shader_module(&vk::ShaderModuleCreateInfo::builder().code(code), None)
        }?;
        Ok(Self {
            device: device.clone(),
            handle,
        })
    }

    pub fn from_file<P: AsRef<Path>>(device: &Arc<Device>, path: P) -> Result<Self> {
        Self::new(device, &load_spirv(path)?)
    }

    pub fn handle(&self) -> vk::ShaderModule {
        self.handle
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.core.destroy_shader_module(self.handle, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn validate_rejects_bad_magic() {
        assert!(validate_spirv(&[]).is_err());
        assert!(validate_spirv(&[0xdead_beef, 0]).is_err());
        assert!(validate_spirv(&[SPIRV_MAGIC, 0x0001_0000]).is_ok());
    }

    #[test]
    fn load_spirv_reads_words_from_disk() {
        let path = std::env::temp_dir().join(format!("vbr_shader_{}.spv", std::process::id()));
        {
            let mut file = std::fs::File::create(&path).unwrap();
            for word in [SPIRV_MAGIC, 0x0001_0300, 0, 1, 0] {
                file.write_all(&word.to_le_bytes()).unwrap();
            }
        }

        let code = load_spirv(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(code.len(), 5);
        assert_eq!(code[0], SPIRV_MAGIC);
    }

    #[test]
    fn load_spirv_rejects_unaligned_file() {
        let path =
            std::env::temp_dir().join(format!("vbr_unaligned_{}.spv", std::process::id()));
        std::fs::write(&path, [0x03u8, 0x02, 0x23, 0x07, 0x00]).unwrap();

        let result = load_spirv(&path);
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(result, Err(VulkanError::Io(_))));
    }

    #[test]
    fn load_spirv_missing_file_is_io_error() {
        assert!(matches!(
            load_spirv("/nonexistent/vbr/shader.spv"),
            Err(VulkanError::Io(_))
        ));
    }
}
