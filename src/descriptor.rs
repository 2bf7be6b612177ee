use crate::{Buffer, Device, Result, Texture, VulkanError};
use ash::vk;
use std::sync::Arc;

/// Accumulates set layout bindings and the pool sizes needed to allocate them.
#[derive(Debug, Clone)]
pub struct DescriptorBuilder {
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
    max_sets: u32,
}

impl Default for DescriptorBuilder {
    fn default() -> Self {
        Self {
            bindings: Vec::new(),
            max_sets: 1,
        }
    }
}

impl DescriptorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        count: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(descriptor_type)
                .descriptor_count(count)
                .stage_flags(stage_flags)
                .build(),
        );
        self
    }

    pub fn max_sets(mut self, max_sets: u32) -> Self {
        self.max_sets = max_sets;
        self
    }

    pub fn bindings(&self) -> &[vk::DescriptorSetLayoutBinding] {
        &self.bindings
    }

    /// Descriptor counts per type for a single set, merged in binding order.
    pub fn pool_sizes(&self) -> Result<Vec<vk::DescriptorPoolSize>> {
        let mut pool_sizes: Vec<vk::DescriptorPoolSize> = Vec::new();
        for binding in self.bindings.iter() {
            match pool_sizes
                .iter_mut()
                .find(|pool_size| pool_size.ty == binding.descriptor_type)
            {
                Some(pool_size) => {
                    pool_size.descriptor_count = pool_size
                        .descriptor_count
                        .checked_add(binding.descriptor_count)
                        .ok_or_else(|| pool_size_overflow(binding.descriptor_type))?;
                }
                None => pool_sizes.push(vk::DescriptorPoolSize {
                    ty: binding.descriptor_type,
                    descriptor_count: binding.descriptor_count,
                }),
            }
        }
        Ok(pool_sizes)
    }

    fn validate(&self) -> Result<()> {
        if self.bindings.is_empty() {
            return Err(VulkanError::Message(String::from(
                "Descriptor has no bindings",
            )));
        }

        if self.max_sets == 0 {
            return Err(VulkanError::Message(String::from(
                "Descriptor pool needs at least one set",
            )));
        }

        for (index, binding) in self.bindings.iter().enumerate() {
            if binding.descriptor_count == 0 {
                return Err(VulkanError::Message(format!(
                    "Descriptor binding {} has a count of zero",
                    binding.binding
                )));
            }

            if self.bindings[..index]
                .iter()
                .any(|other| other.binding == binding.binding)
            {
                return Err(VulkanError::Message(format!(
                    "Descriptor binding {} declared twice",
                    binding.binding
                )));
            }
        }

        self.scaled_pool_sizes().map(|_| ())
    }

    /// Pool sizes scaled so every one of `max_sets` sets can be allocated.
    fn scaled_pool_sizes(&self) -> Result<Vec<vk::DescriptorPoolSize>> {
        self.pool_sizes()?
            .into_iter()
            .map(|pool_size| {
                Ok(vk::DescriptorPoolSize {
                    ty: pool_size.ty,
                    descriptor_count: pool_size
                        .descriptor_count
                        .checked_mul(self.max_sets)
                        .ok_or_else(|| pool_size_overflow(pool_size.ty))?,
                })
            })
            .collect()
    }

    pub fn build(&self, device: &Arc<Device>) -> Result<Descriptor> {
        self.validate()?;

        let layout = unsafe {
            device.core.create_descriptor_set_layout(
                &vk::DescriptorSetLayoutCreateInfo::builder().bindings(&self.bindings),
                None,
            )
        }?;

        let pool_sizes = self.scaled_pool_sizes()?;
        let pool = match unsafe {
            device.core.create_descriptor_pool(
                &vk::DescriptorPoolCreateInfo::builder()
                    .pool_sizes(&pool_sizes)
                    .max_sets(self.max_sets),
                None,
            )
        } {
            Ok(pool) => pool,
            Err(err) => {
                unsafe { device.core.destroy_descriptor_set_layout(layout, None) };
                return Err(err.into());
            }
        };

        // Destroying the pool and layout also covers a failed allocation
        let mut descriptor = Descriptor {
            device: device.clone(),
            layout,
            pool,
            set: vk::DescriptorSet::null(),
        };

        let layouts = [layout];
        descriptor.set = unsafe {
            device.core.allocate_descriptor_sets(
                &vk::DescriptorSetAllocateInfo::builder()
                    .descriptor_pool(pool)
                    .set_layouts(&layouts),
            )
        }?[0];

        Ok(descriptor)
    }
}

fn pool_size_overflow(descriptor_type: vk::DescriptorType) -> VulkanError {
    VulkanError::Message(format!(
        "Descriptor pool size for {:?} exceeds u32",
        descriptor_type
    ))
}

pub struct Descriptor {
    device: Arc<Device>,
    pub(crate) layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    pub(crate) set: vk::DescriptorSet,
}

impl Descriptor {
    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    pub fn set(&self) -> vk::DescriptorSet {
        self.set
    }

    pub fn write_buffer(
        &self,
        binding: u32,
        array_element: u32,
        buffer: &Buffer,
        descriptor_type: vk::DescriptorType,
    ) {
        let buffer_infos = [vk::DescriptorBufferInfo {
            buffer: buffer.handle(),
            offset: 0,
            range: vk::WHOLE_SIZE,
        }];

        let write = vk::WriteDescriptorSet::builder()
            .dst_set(self.set)
            .dst_binding(binding)
            .dst_array_element(array_element)
            .descriptor_type(descriptor_type)
            .buffer_info(&buffer_infos)
            .build();

        unsafe {
            self.device.core.update_descriptor_sets(&[write], &[]);
        }
    }

    pub fn write_texture(&self, binding: u32, array_element: u32, texture: &Texture) {
        let image_infos = [vk::DescriptorImageInfo {
            sampler: texture.sampler(),
            image_view: texture.view(),
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }];

        let write = vk::WriteDescriptorSet::builder()
            .dst_set(self.set)
            .dst_binding(binding)
            .dst_array_element(array_element)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(&image_infos)
            .build();

        unsafe {
            self.device.core.update_descriptor_sets(&[write], &[]);
        }
    }
}

impl Drop for Descriptor {
    fn drop(&mut self) {
        unsafe {
            self.device.core.destroy_descriptor_pool(self.pool, None);
            self.device
                .core
                .destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_sizes_merge_by_type() {
        let builder = DescriptorBuilder::new()
            .add_binding(
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                1,
                vk::ShaderStageFlags::VERTEX,
            )
            .add_binding(
                1,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                1,
                vk::ShaderStageFlags::FRAGMENT,
            )
            .add_binding(
                2,
                vk::DescriptorType::UNIFORM_BUFFER,
                2,
                vk::ShaderStageFlags::FRAGMENT,
            );

        let pool_sizes = builder.pool_sizes().unwrap();
        assert_eq!(builder.bindings().len(), 3);
        assert_eq!(pool_sizes.len(), 2);
        assert_eq!(pool_sizes[0].ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(pool_sizes[0].descriptor_count, 3);
        assert_eq!(pool_sizes[1].descriptor_count, 1);
        assert!(builder.validate().is_ok());
    }

    #[test]
    fn pool_sizes_scale_with_max_sets() {
        let builder = DescriptorBuilder::new()
            .add_binding(
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                2,
                vk::ShaderStageFlags::VERTEX,
            )
            .max_sets(3);
        assert_eq!(builder.scaled_pool_sizes().unwrap()[0].descriptor_count, 6);
    }

    #[test]
    fn invalid_builders_are_rejected() {
        assert!(DescriptorBuilder::new().validate().is_err());

        let duplicate = DescriptorBuilder::new()
            .add_binding(
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                1,
                vk::ShaderStageFlags::VERTEX,
            )
            .add_binding(
                0,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                1,
                vk::ShaderStageFlags::FRAGMENT,
            );
        assert!(duplicate.validate().is_err());

        let no_sets = DescriptorBuilder::new()
            .add_binding(
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                1,
                vk::ShaderStageFlags::VERTEX,
            )
            .max_sets(0);
        assert!(no_sets.validate().is_err());
    }

    #[test]
    fn oversized_pools_are_rejected() {
        let too_many_sets = DescriptorBuilder::new()
            .add_binding(
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                70_000,
                vk::ShaderStageFlags::VERTEX,
            )
            .max_sets(70_000);
        assert!(too_many_sets.scaled_pool_sizes().is_err());
        assert!(too_many_sets.validate().is_err());

        let too_many_descriptors = DescriptorBuilder::new()
            .add_binding(
                0,
                vk::DescriptorType::SAMPLED_IMAGE,
                u32::MAX,
                vk::ShaderStageFlags::FRAGMENT,
            )
            .add_binding(
                1,
                vk::DescriptorType::SAMPLED_IMAGE,
                1,
                vk::ShaderStageFlags::FRAGMENT,
            );
        assert!(too_many_descriptors.pool_sizes().is_err());
        assert!(too_many_descriptors.validate().is_err());
    }
}
