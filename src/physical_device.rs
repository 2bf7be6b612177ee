use crate::c_str_to_string;
use ash::vk;
use std::fmt::{Debug, Formatter};

#[derive(Debug, Clone, Copy, Ord, PartialOrd, Eq, PartialEq)]
pub enum PhysicalDeviceVendor {
    Amd,
    Arm,
    ImgTec,
    Intel,
    Nvidia,
    Qualcomm,
    Broadcom,
    Unknown { vendor_id: u32 },
}

impl PhysicalDeviceVendor {
    pub(crate) fn from_vulkan(vendor_id: u32) -> Self {
        match vendor_id {
            0x1002 => Self::Amd,
            0x10DE => Self::Nvidia,
            0x8086 => Self::Intel,
            0x1010 => Self::ImgTec,
            0x13B5 => Self::Arm,
            0x5132 => Self::Qualcomm,
            0x14e4 => Self::Broadcom,
            vendor_id => Self::Unknown { vendor_id },
        }
    }
}

#[derive(Debug, Clone, Copy, Ord, PartialOrd, Eq, PartialEq)]
pub enum PhysicalDeviceType {
    Discrete,
    Integrated,
    Virtual,
    Cpu,
    Unknown,
}

impl PhysicalDeviceType {
    pub(crate) fn from_vulkan(device_type: vk::PhysicalDeviceType) -> Self {
        match device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => Self::Discrete,
            vk::PhysicalDeviceType::INTEGRATED_GPU => Self::Integrated,
            vk::PhysicalDeviceType::VIRTUAL_GPU => Self::Virtual,
            vk::PhysicalDeviceType::CPU => Self::Cpu,
            _ => Self::Unknown,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PhysicalDeviceInfo {
    pub name: String,
    pub device_id: u32,
    pub api_version: [u32; 3],
    pub vendor: PhysicalDeviceVendor,
    pub device_type: PhysicalDeviceType,
    pub geometry_shader: bool,
    pub sampler_anisotropy: bool,
    pub max_sample_count: vk::SampleCountFlags,
}

impl PhysicalDeviceInfo {
    pub fn supports_vulkan_1_3(&self) -> bool {
        self.api_version[0] > 1 || (self.api_version[0] == 1 && self.api_version[1] >= 3)
    }

    fn is_preferred(&self) -> bool {
        self.device_type == PhysicalDeviceType::Discrete && self.geometry_shader
    }
}

/// Index of the first discrete GPU with geometry shaders, otherwise the first device.
pub fn pick_physical_device(candidates: &[PhysicalDeviceInfo]) -> Option<usize> {
    if candidates.is_empty() {
        return None;
    }

    Some(
        candidates
            .iter()
            .position(PhysicalDeviceInfo::is_preferred)
            .unwrap_or(0),
    )
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
    pub transfer: Option<u32>,
    pub compute: Option<u32>,
}

fn find_queue_index(
    queue_family_properties: &[vk::QueueFamilyProperties],
    contains_flags: vk::QueueFlags,
) -> Option<u32> {
    queue_family_properties
        .iter()
        .enumerate()
        .find(|(_index, queue_family)| {
            queue_family.queue_count > 0 && queue_family.queue_flags.contains(contains_flags)
        })
        .map(|(index, _queue_family)| index as u32)
}

impl QueueFamilyIndices {
    /// `supports_present` is asked per family index; the graphics family wins when it can present.
    pub fn find(
        queue_family_properties: &[vk::QueueFamilyProperties],
        mut supports_present: impl FnMut(u32) -> bool,
    ) -> Self {
        let graphics = find_queue_index(queue_family_properties, vk::QueueFlags::GRAPHICS);
        let compute = find_queue_index(queue_family_properties, vk::QueueFlags::COMPUTE);
        let transfer =
            find_queue_index(queue_family_properties, vk::QueueFlags::TRANSFER).or(graphics);

        let present = match graphics {
            Some(index) if supports_present(index) => Some(index),
            _ => (0..queue_family_properties.len() as u32)
                .filter(|&index| queue_family_properties[index as usize].queue_count > 0)
                .find(|&index| supports_present(index)),
        };

        Self {
            graphics,
            present,
            transfer,
            compute,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// Sorted and deduplicated, one entry per queue that needs creating.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families: Vec<u32> = [self.graphics, self.present, self.transfer, self.compute]
            .into_iter()
            .flatten()
            .collect();
        families.sort_unstable();
        families.dedup();
        families
    }
}

const SAMPLE_COUNTS_DESCENDING: [vk::SampleCountFlags; 7] = [
    vk::SampleCountFlags::TYPE_64,
    vk::SampleCountFlags::TYPE_32,
    vk::SampleCountFlags::TYPE_16,
    vk::SampleCountFlags::TYPE_8,
    vk::SampleCountFlags::TYPE_4,
    vk::SampleCountFlags::TYPE_2,
    vk::SampleCountFlags::TYPE_1,
];

/// Highest sample count usable by both color and depth framebuffer attachments.
pub fn max_usable_sample_count(limits: &vk::PhysicalDeviceLimits) -> vk::SampleCountFlags {
    let counts = limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts;
    SAMPLE_COUNTS_DESCENDING
        .into_iter()
        .find(|&count| counts.contains(count))
        .unwrap_or(vk::SampleCountFlags::TYPE_1)
}

/// Largest single sample count not above `requested` that is also not above `max`.
pub fn clamp_sample_count(
    requested: vk::SampleCountFlags,
    max: vk::SampleCountFlags,
) -> vk::SampleCountFlags {
    SAMPLE_COUNTS_DESCENDING
        .into_iter()
        .find(|&count| count.as_raw() <= requested.as_raw() && count.as_raw() <= max.as_raw())
        .unwrap_or(vk::SampleCountFlags::TYPE_1)
}

#[derive(Clone)]
pub struct PhysicalDevice {
    pub(crate) handle: vk::PhysicalDevice,
    pub info: PhysicalDeviceInfo,
    pub(crate) features: vk::PhysicalDeviceFeatures,
    pub(crate) properties: vk::PhysicalDeviceProperties,
    pub(crate) queue_family_properties: Vec<vk::QueueFamilyProperties>,
}

impl PhysicalDevice {
    pub(crate) fn new(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let features = unsafe { instance.get_physical_device_features(physical_device) };
        let queue_family_properties =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

        let info = PhysicalDeviceInfo {
            name: c_str_to_string(&properties.device_name),
            device_id: properties.device_id,
            api_version: [
                vk::api_version_major(properties.api_version),
                vk::api_version_minor(properties.api_version),
                vk::api_version_patch(properties.api_version),
            ],
            vendor: PhysicalDeviceVendor::from_vulkan(properties.vendor_id),
            device_type: PhysicalDeviceType::from_vulkan(properties.device_type),
            geometry_shader: features.geometry_shader == vk::TRUE,
            sampler_anisotropy: features.sampler_anisotropy == vk::TRUE,
            max_sample_count: max_usable_sample_count(&properties.limits),
        };

        Self {
            handle: physical_device,
            info,
            features,
            properties,
            queue_family_properties,
        }
    }

    pub fn handle(&self) -> vk::PhysicalDevice {
        self.handle
    }

    pub fn limits(&self) -> &vk::PhysicalDeviceLimits {
        &self.properties.limits
    }

    pub fn queue_family_properties(&self) -> &[vk::QueueFamilyProperties] {
        &self.queue_family_properties
    }
}

impl Debug for PhysicalDevice {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalDevice")
            .field("handle", &self.handle)
            .field("info", &self.info)
            .field("queue_families", &self.queue_family_properties.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(device_type: PhysicalDeviceType, geometry_shader: bool) -> PhysicalDeviceInfo {
        PhysicalDeviceInfo {
            name: format!("{:?}", device_type),
            device_id: 0,
            api_version: [1, 3, 0],
            vendor: PhysicalDeviceVendor::Unknown { vendor_id: 0 },
            device_type,
            geometry_shader,
            sampler_anisotropy: false,
            max_sample_count: vk::SampleCountFlags::TYPE_1,
        }
    }

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn pick_prefers_discrete_with_geometry_shader() {
        let candidates = [
            info(PhysicalDeviceType::Integrated, true),
            info(PhysicalDeviceType::Discrete, false),
            info(PhysicalDeviceType::Discrete, true),
        ];
        assert_eq!(pick_physical_device(&candidates), Some(2));
    }

    #[test]
    fn pick_falls_back_to_first() {
        let candidates = [
            info(PhysicalDeviceType::Integrated, true),
            info(PhysicalDeviceType::Cpu, false),
        ];
        assert_eq!(pick_physical_device(&candidates), Some(0));
        assert_eq!(pick_physical_device(&[]), None);
    }

    #[test]
    fn present_prefers_graphics_family() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
        ];
        let indices = QueueFamilyIndices::find(&families, |_| true);
        assert_eq!(indices.graphics, Some(1));
        assert_eq!(indices.present, Some(1));
        assert_eq!(indices.transfer, Some(0));
        assert_eq!(indices.compute, Some(1));
        assert!(indices.is_complete());
        assert_eq!(indices.unique_families(), vec![0, 1]);
    }

    #[test]
    fn present_falls_back_to_other_family() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::COMPUTE),
        ];
        let indices = QueueFamilyIndices::find(&families, |index| index == 1);
        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.present, Some(1));
        assert_eq!(indices.transfer, Some(0));
        assert_eq!(indices.unique_families(), vec![0, 1]);
    }

    #[test]
    fn incomplete_without_present_support() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER)];
        let indices = QueueFamilyIndices::find(&families, |_| false);
        assert_eq!(indices.present, None);
        assert!(!indices.is_complete());
        assert_eq!(indices.unique_families(), vec![0]);
    }

    #[test]
    fn max_sample_count_uses_color_and_depth_intersection() {
        let limits = vk::PhysicalDeviceLimits {
            framebuffer_color_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_4
                | vk::SampleCountFlags::TYPE_8,
            framebuffer_depth_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_4,
            ..Default::default()
        };
        assert_eq!(max_usable_sample_count(&limits), vk::SampleCountFlags::TYPE_4);
        assert_eq!(
            max_usable_sample_count(&vk::PhysicalDeviceLimits::default()),
            vk::SampleCountFlags::TYPE_1
        );
    }

    #[test]
    fn clamp_sample_count_never_exceeds_max() {
        assert_eq!(
            clamp_sample_count(vk::SampleCountFlags::TYPE_8, vk::SampleCountFlags::TYPE_4),
            vk::SampleCountFlags::TYPE_4
        );
        assert_eq!(
            clamp_sample_count(vk::SampleCountFlags::TYPE_2, vk::SampleCountFlags::TYPE_8),
            vk::SampleCountFlags::TYPE_2
        );
        assert_eq!(
            clamp_sample_count(vk::SampleCountFlags::empty(), vk::SampleCountFlags::TYPE_8),
            vk::SampleCountFlags::TYPE_1
        );
    }

    #[test]
    fn vulkan_1_3_detection() {
        let mut device = info(PhysicalDeviceType::Discrete, true);
        assert!(device.supports_vulkan_1_3());
        device.api_version = [1, 2, 198];
        assert!(!device.supports_vulkan_1_3());
    }
}
