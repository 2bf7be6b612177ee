use crate::{Device, Result};
use ash::vk;
use std::sync::Arc;

#[derive(Default, Debug, Clone, Copy, Eq, PartialEq)]
pub enum AddressMode {
    #[default]
    Repeat,
    MirroredRepeat,
    ClampToEdge,
    ClampToBorder,
}

impl AddressMode {
    fn to_vk(self) -> vk::SamplerAddressMode {
        match self {
            AddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
            AddressMode::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
            AddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
            AddressMode::ClampToBorder => vk::SamplerAddressMode::CLAMP_TO_BORDER,
        }
    }
}

#[derive(Default, Debug, Clone, Copy, Eq, PartialEq)]
pub enum FilterMode {
    Nearest,
    #[default]
    Linear,
}

impl FilterMode {
    fn to_vk(self) -> vk::Filter {
        match self {
            FilterMode::Nearest => vk::Filter::NEAREST,
            FilterMode::Linear => vk::Filter::LINEAR,
        }
    }

    fn to_mip_vk(self) -> vk::SamplerMipmapMode {
        match self {
            FilterMode::Nearest => vk::SamplerMipmapMode::NEAREST,
            FilterMode::Linear => vk::SamplerMipmapMode::LINEAR,
        }
    }
}

#[derive(Default, Debug, Clone, Copy, Eq, PartialEq)]
pub enum BorderColor {
    #[default]
    OpaqueBlack,
    TransparentBlack,
    OpaqueWhite,
}

impl BorderColor {
    fn to_vk(self) -> vk::BorderColor {
        match self {
            BorderColor::TransparentBlack => vk::BorderColor::INT_TRANSPARENT_BLACK,
            BorderColor::OpaqueBlack => vk::BorderColor::INT_OPAQUE_BLACK,
            BorderColor::OpaqueWhite => vk::BorderColor::INT_OPAQUE_WHITE,
        }
    }
}

#[derive(Default, Debug, Clone)]
pub struct SamplerDescription {
    pub address_mode_u: AddressMode,
    pub address_mode_v: AddressMode,
    pub address_mode_w: AddressMode,
    pub mag_filter: FilterMode,
    pub min_filter: FilterMode,
    pub mip_filter: FilterMode,

    /// Requested max anisotropy, ignored when the device lacks the feature.
    pub anisotropy: Option<f32>,
    pub border_color: BorderColor,
}

impl SamplerDescription {
    pub(crate) fn create_info(
        &self,
        anisotropy_supported: bool,
        max_anisotropy_limit: f32,
    ) -> vk::SamplerCreateInfo {
        let anisotropy = self
            .anisotropy
            .filter(|_| anisotropy_supported)
            .map(|value| value.clamp(1.0, max_anisotropy_limit));

        vk::SamplerCreateInfo::builder()
            .mag_filter(self.mag_filter.to_vk())
            .min_filter(self.min_filter.to_vk())
            .mipmap_mode(self.mip_filter.to_mip_vk())
            .address_mode_u(self.address_mode_u.to_vk())
            .address_mode_v(self.address_mode_v.to_vk())
            .address_mode_w(self.address_mode_w.to_vk())
            .anisotropy_enable(anisotropy.is_some())
            .max_anisotropy(anisotropy.unwrap_or(1.0))
            .border_color(self.border_color.to_vk())
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mip_lod_bias(0.0)
            .min_lod(0.0)
            .max_lod(0.0)
            .build()
    }
}

pub struct Sampler {
    device: Arc<Device>,
    pub(crate) handle: vk::Sampler,
}

impl Sampler {
    pub fn new(device: &Arc<Device>, name: &str, description: &SamplerDescription) -> Result<Self> {
        let physical = device.physical_device();
        let create_info = description.create_info(
            physical.info.sampler_anisotropy,
            physical.limits().max_sampler_anisotropy,
        );

        let handle = unsafe { device.core.create_sampler(&create_info, None) }?;
        device.set_object_name(handle, name);

        Ok(Self {
            device: device.clone(),
            handle,
        })
    }

    pub fn handle(&self) -> vk::Sampler {
        self.handle
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe {
            self.device.core.destroy_sampler(self.handle, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_description_is_linear_repeat() {
        let info = SamplerDescription::default().create_info(true, 16.0);
        assert_eq!(info.mag_filter, vk::Filter::LINEAR);
        assert_eq!(info.min_filter, vk::Filter::LINEAR);
        assert_eq!(info.address_mode_u, vk::SamplerAddressMode::REPEAT);
        assert_eq!(info.anisotropy_enable, vk::FALSE);
    }

    #[test]
    fn anisotropy_clamped_to_device_limit() {
        let description = SamplerDescription {
            anisotropy: Some(64.0),
            ..Default::default()
        };

        let info = description.create_info(true, 16.0);
        assert_eq!(info.anisotropy_enable, vk::TRUE);
        assert_eq!(info.max_anisotropy, 16.0);

        let info = description.create_info(false, 16.0);
        assert_eq!(info.anisotropy_enable, vk::FALSE);
        assert_eq!(info.max_anisotropy, 1.0);
    }
}
