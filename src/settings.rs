use ash::vk;

#[derive(Clone, Debug)]
pub struct InstanceSettings {
    pub app_name: String,
    pub app_version: [u32; 3],

    /// Enables VK_LAYER_KHRONOS_validation and the debug messenger.
    pub validation: bool,
}

impl Default for InstanceSettings {
    fn default() -> Self {
        Self {
            app_name: String::from("vbr"),
            app_version: [0, 1, 0],
            validation: cfg!(debug_assertions),
        }
    }
}

impl InstanceSettings {
    pub(crate) fn vk_app_version(&self) -> u32 {
        vk::make_api_version(
            0,
            self.app_version[0],
            self.app_version[1],
            self.app_version[2],
        )
    }
}

#[derive(Clone, Debug)]
pub struct DeviceSettings {
    /// Requested MSAA sample count, lowered to the highest count the device supports.
    pub sample_count: vk::SampleCountFlags,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            sample_count: vk::SampleCountFlags::TYPE_1,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SwapchainSettings {
    pub preferred_format: vk::Format,
    pub preferred_color_space: vk::ColorSpaceKHR,
    pub prefer_mailbox: bool,
}

impl Default for SwapchainSettings {
    fn default() -> Self {
        Self {
            preferred_format: vk::Format::B8G8R8A8_SRGB,
            preferred_color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            prefer_mailbox: true,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct RendererSettings {
    pub instance: InstanceSettings,
    pub device: DeviceSettings,
    pub swapchain: SwapchainSettings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_app_version_packs_into_api_version() {
        let settings = InstanceSettings::default();
        let version = settings.vk_app_version();
        assert_eq!(vk::api_version_major(version), 0);
        assert_eq!(vk::api_version_minor(version), 1);
        assert_eq!(vk::api_version_patch(version), 0);
    }

    #[test]
    fn defaults_are_single_sampled_srgb() {
        let settings = RendererSettings::default();
        assert_eq!(settings.device.sample_count, vk::SampleCountFlags::TYPE_1);
        assert_eq!(settings.swapchain.preferred_format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(settings.instance.app_name, "vbr");
    }
}
