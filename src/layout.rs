use crate::{Device, Result};
use ash::vk;
use std::sync::Arc;

pub struct PipelineLayout {
    device: Arc<Device>,
    pub(crate) handle: vk::PipelineLayout,
}

impl PipelineLayout {
    pub fn new(
        device: &Arc<Device>,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> Result<Self> {
        let handle = unsafe {
            device.core.create_pipeline_layout(
                &vk::PipelineLayoutCreateInfo::builder()
                    .set_layouts(set_layouts)
                    .push_constant_ranges(push_constant_ranges),
                None,
            )
        }?;

        Ok(Self {
            device: device.clone(),
            handle,
        })
    }

    pub fn handle(&self) -> vk::PipelineLayout {
        self.handle
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.core.destroy_pipeline_layout(self.handle, None);
        }
    }
}
