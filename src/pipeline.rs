use crate::shader::{load_spirv, ShaderModule};
use crate::{Device, PipelineLayout, Result, VulkanError};
use ash::vk;
use log::error;
use std::ffi::CString;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone)]
struct ShaderStage {
    stage: vk::ShaderStageFlags,
    code: Vec<u32>,
    entry_point: CString,
}

/// Color blend states for the common cases.
pub struct ColorBlend;

impl ColorBlend {
    pub fn opaque() -> vk::PipelineColorBlendAttachmentState {
        vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
            .build()
    }

    pub fn alpha() -> vk::PipelineColorBlendAttachmentState {
        vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD)
            .build()
    }
}

/// Accumulates graphics pipeline state for dynamic rendering.
#[derive(Debug, Clone)]
pub struct GraphicsPipelineBuilder {
    stages: Vec<ShaderStage>,
    vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    viewports: Vec<vk::Viewport>,
    scissors: Vec<vk::Rect2D>,
    color_blend_attachments: Vec<vk::PipelineColorBlendAttachmentState>,
    color_formats: Vec<vk::Format>,
    depth_format: Option<vk::Format>,
    topology: vk::PrimitiveTopology,
    polygon_mode: vk::PolygonMode,
    cull_mode: vk::CullModeFlags,
    front_face: vk::FrontFace,
    line_width: f32,
    sample_count: vk::SampleCountFlags,
    dynamic_states: Vec<vk::DynamicState>,
}

impl Default for GraphicsPipelineBuilder {
    fn default() -> Self {
        Self {
            stages: Vec::new(),
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            viewports: Vec::new(),
            scissors: Vec::new(),
            color_blend_attachments: Vec::new(),
            color_formats: Vec::new(),
            depth_format: None,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::CLOCKWISE,
            line_width: 1.0,
            sample_count: vk::SampleCountFlags::TYPE_1,
            dynamic_states: vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR],
        }
    }
}

impl GraphicsPipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shader(mut self, stage: vk::ShaderStageFlags, code: Vec<u32>, entry_point: &str) -> Result<Self> {
        let entry_point = CString::new(entry_point)
            .map_err(|err| VulkanError::Message(format!("Invalid entry point: {}", err)))?;
        self.stages.push(ShaderStage {
            stage,
            code,
            entry_point,
        });
        Ok(self)
    }

    /// Adds a stage loaded from a SPIR-V file with a `main` entry point.
    pub fn shader_file<P: AsRef<Path>>(self, stage: vk::ShaderStageFlags, path: P) -> Result<Self> {
        let code = load_spirv(path)?;
        self.shader(stage, code, "main")
    }

    pub fn vertex_binding(mut self, binding: u32, stride: u32, input_rate: vk::VertexInputRate) -> Self {
        self.vertex_bindings.push(vk::VertexInputBindingDescription {
            binding,
            stride,
            input_rate,
        });
        self
    }

    pub fn vertex_attribute(mut self, location: u32, binding: u32, format: vk::Format, offset: u32) -> Self {
        self.vertex_attributes.push(vk::VertexInputAttributeDescription {
            location,
            binding,
            format,
            offset,
        });
        self
    }

    pub fn viewport(mut self, viewport: vk::Viewport) -> Self {
        self.viewports.push(viewport);
        self
    }

    pub fn scissor(mut self, scissor: vk::Rect2D) -> Self {
        self.scissors.push(scissor);
        self
    }

    pub fn color_blend_attachment(mut self, attachment: vk::PipelineColorBlendAttachmentState) -> Self {
        self.color_blend_attachments.push(attachment);
        self
    }

    pub fn color_format(mut self, format: vk::Format) -> Self {
        self.color_formats.push(format);
        self
    }

    pub fn depth_format(mut self, format: vk::Format) -> Self {
        self.depth_format = Some(format);
        self
    }

    pub fn topology(mut self, topology: vk::PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    pub fn polygon_mode(mut self, polygon_mode: vk::PolygonMode) -> Self {
        self.polygon_mode = polygon_mode;
        self
    }

    pub fn cull_mode(mut self, cull_mode: vk::CullModeFlags) -> Self {
        self.cull_mode = cull_mode;
        self
    }

    pub fn front_face(mut self, front_face: vk::FrontFace) -> Self {
        self.front_face = front_face;
        self
    }

    pub fn line_width(mut self, line_width: f32) -> Self {
        self.line_width = line_width;
        self
    }

    pub fn sample_count(mut self, sample_count: vk::SampleCountFlags) -> Self {
        self.sample_count = sample_count;
        self
    }

    pub fn dynamic_state(mut self, state: vk::DynamicState) -> Self {
        if !self.dynamic_states.contains(&state) {
            self.dynamic_states.push(state);
        }
        self
    }

    fn is_dynamic(&self, state: vk::DynamicState) -> bool {
        self.dynamic_states.contains(&state)
    }

    fn validate(&self) -> Result<()> {
        if !self
            .stages
            .iter()
            .any(|stage| stage.stage == vk::ShaderStageFlags::VERTEX)
        {
            return Err(VulkanError::Message(String::from(
                "Graphics pipeline needs a vertex shader",
            )));
        }

        if let Some(attribute) = self.vertex_attributes.iter().find(|attribute| {
            !self
                .vertex_bindings
                .iter()
                .any(|binding| binding.binding == attribute.binding)
        }) {
            return Err(VulkanError::Message(format!(
                "Vertex attribute {} uses undeclared binding {}",
                attribute.location, attribute.binding
            )));
        }

        if self.color_formats.is_empty() && self.depth_format.is_none() {
            return Err(VulkanError::Message(String::from(
                "Graphics pipeline has no attachments",
            )));
        }

        if !self.color_blend_attachments.is_empty()
            && self.color_blend_attachments.len() != self.color_formats.len()
        {
            return Err(VulkanError::Message(format!(
                "{} color blend attachments for {} color formats",
                self.color_blend_attachments.len(),
                self.color_formats.len()
            )));
        }

        if self.viewport_count() != self.scissor_count() {
            return Err(VulkanError::Message(format!(
                "{} viewports but {} scissors",
                self.viewports.len(),
                self.scissors.len()
            )));
        }

        Ok(())
    }

    // Dynamic viewport and scissor still need a count of at least one
    fn viewport_count(&self) -> usize {
        if self.viewports.is_empty() && self.is_dynamic(vk::DynamicState::VIEWPORT) {
            1
        } else {
            self.viewports.len()
        }
    }

    fn scissor_count(&self) -> usize {
        if self.scissors.is_empty() && self.is_dynamic(vk::DynamicState::SCISSOR) {
            1
        } else {
            self.scissors.len()
        }
    }

    fn blend_attachments(&self) -> Vec<vk::PipelineColorBlendAttachmentState> {
        if self.color_blend_attachments.is_empty() {
            self.color_formats
                .iter()
                .map(|_format| ColorBlend::opaque())
                .collect()
        } else {
            self.color_blend_attachments.clone()
        }
    }

    pub fn build(&self, device: &Arc<Device>, layout: &PipelineLayout) -> Result<Pipeline> {
        self.validate()?;

        // Modules only need to live until pipeline creation returns
        let modules = self
            .stages
            .iter()
            .map(|stage| ShaderModule::new(device, &stage.code))
            .collect::<Result<Vec<_>>>()?;

        let shader_stages: Vec<vk::PipelineShaderStageCreateInfo> = self
            .stages
            .iter()
            .zip(modules.iter())
            .map(|(stage, module)| {
                vk::PipelineShaderStageCreateInfo::builder()
                    .stage(stage.stage)
                    .module(module.handle)
                    .name(&stage.entry_point)
                    .build()
            })
            .collect();

        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&self.vertex_bindings)
            .vertex_attribute_descriptions(&self.vertex_attributes);

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(self.topology)
            .primitive_restart_enable(false);

        let placeholder_viewport = [vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: 1.0,
            height: 1.0,
            min_depth: 0.0,
            max_depth: 1.0,
        }];
        let placeholder_scissor = [vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
        }];
        let viewports: &[vk::Viewport] = if self.viewports.is_empty() {
            &placeholder_viewport
        } else {
            &self.viewports
        };
        let scissors: &[vk::Rect2D] = if self.scissors.is_empty() {
            &placeholder_scissor
        } else {
            &self.scissors
        };
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewports(viewports)
            .scissors(scissors);

        let rasterizer_state = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(self.polygon_mode)
            .line_width(self.line_width)
            .cull_mode(self.cull_mode)
            .front_face(self.front_face)
            .depth_bias_enable(false);

        let multisampling_state = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(self.sample_count)
            .min_sample_shading(1.0)
            .alpha_to_coverage_enable(false)
            .alpha_to_one_enable(false);

        let mut depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::builder();
        if self.depth_format.is_some() {
            depth_stencil_state = depth_stencil_state
                .depth_test_enable(true)
                .depth_write_enable(true)
                .depth_compare_op(vk::CompareOp::LESS)
                .depth_bounds_test_enable(false)
                .min_depth_bounds(0.0)
                .max_depth_bounds(1.0)
                .stencil_test_enable(false);
        }

        let color_blend_attachments = self.blend_attachments();
        let color_blending_state = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&self.dynamic_states);

        let mut dynamic_rendering = vk::PipelineRenderingCreateInfo::builder()
            .color_attachment_formats(&self.color_formats);
        if let Some(depth_format) = self.depth_format {
            dynamic_rendering = dynamic_rendering.depth_attachment_format(depth_format);
        }

        let pipeline_create_info = vk::GraphicsPipelineCreateInfo::builder()
            .push_next(&mut dynamic_rendering)
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer_state)
            .multisample_state(&multisampling_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blending_state)
            .dynamic_state(&dynamic_state)
            .layout(layout.handle);

        let handle = match unsafe {
            device.core.create_graphics_pipelines(
                vk::PipelineCache::null(),
                &[pipeline_create_info.build()],
                None,
            )
        } {
            Ok(pipelines) => pipelines[0],
            Err((_, err)) => {
                error!("vkCreateGraphicsPipelines failed: {}", err);
                return Err(err.into());
            }
        };

        drop(modules);

        Ok(Pipeline {
            device: device.clone(),
            handle,
        })
    }
}

pub struct Pipeline {
    device: Arc<Device>,
    pub(crate) handle: vk::Pipeline,
}

impl Pipeline {
    pub fn handle(&self) -> vk::Pipeline {
        self.handle
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.core.destroy_pipeline(self.handle, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIRV_HEADER: [u32; 5] = [0x0723_0203, 0x0001_0300, 0, 1, 0];

    fn triangle_builder() -> GraphicsPipelineBuilder {
        GraphicsPipelineBuilder::new()
            .shader(vk::ShaderStageFlags::VERTEX, SPIRV_HEADER.to_vec(), "main")
            .unwrap()
            .shader(vk::ShaderStageFlags::FRAGMENT, SPIRV_HEADER.to_vec(), "main")
            .unwrap()
            .vertex_binding(0, 20, vk::VertexInputRate::VERTEX)
            .vertex_attribute(0, 0, vk::Format::R32G32_SFLOAT, 0)
            .vertex_attribute(1, 0, vk::Format::R32G32B32_SFLOAT, 8)
            .color_format(vk::Format::B8G8R8A8_SRGB)
    }

    #[test]
    fn defaults_match_forward_rendering() {
        let builder = GraphicsPipelineBuilder::new();
        assert_eq!(builder.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
        assert_eq!(builder.polygon_mode, vk::PolygonMode::FILL);
        assert_eq!(builder.cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(builder.front_face, vk::FrontFace::CLOCKWISE);
        assert_eq!(builder.line_width, 1.0);
        assert_eq!(
            builder.dynamic_states,
            vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR]
        );
    }

    #[test]
    fn triangle_pipeline_is_valid() {
        let builder = triangle_builder();
        assert!(builder.validate().is_ok());
        assert_eq!(builder.viewport_count(), 1);
        assert_eq!(builder.scissor_count(), 1);
        assert_eq!(builder.blend_attachments().len(), 1);
    }

    #[test]
    fn missing_vertex_stage_is_rejected() {
        let builder = GraphicsPipelineBuilder::new()
            .shader(vk::ShaderStageFlags::FRAGMENT, SPIRV_HEADER.to_vec(), "main")
            .unwrap()
            .color_format(vk::Format::B8G8R8A8_SRGB);
        assert!(builder.validate().is_err());
    }

    #[test]
    fn attribute_without_binding_is_rejected() {
        let builder = triangle_builder().vertex_attribute(2, 1, vk::Format::R32G32_SFLOAT, 0);
        assert!(builder.validate().is_err());
    }

    #[test]
    fn blend_attachment_count_must_match_formats() {
        let builder = triangle_builder()
            .color_blend_attachment(ColorBlend::alpha())
            .color_blend_attachment(ColorBlend::opaque());
        assert!(builder.validate().is_err());

        let builder = triangle_builder().color_blend_attachment(ColorBlend::alpha());
        assert!(builder.validate().is_ok());
        assert_eq!(builder.blend_attachments()[0].blend_enable, vk::TRUE);
    }

    #[test]
    fn static_viewports_need_matching_scissors() {
        let builder = triangle_builder()
            .viewport(vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: 800.0,
                height: 600.0,
                min_depth: 0.0,
                max_depth: 1.0,
            })
            .viewport(vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: 400.0,
                height: 300.0,
                min_depth: 0.0,
                max_depth: 1.0,
            });
        assert!(builder.validate().is_err());
    }

    #[test]
    fn dynamic_states_are_not_duplicated() {
        let builder = GraphicsPipelineBuilder::new()
            .dynamic_state(vk::DynamicState::VIEWPORT)
            .dynamic_state(vk::DynamicState::LINE_WIDTH);
        assert_eq!(builder.dynamic_states.len(), 3);
    }

    #[test]
    fn entry_point_with_nul_is_rejected() {
        assert!(GraphicsPipelineBuilder::new()
            .shader(vk::ShaderStageFlags::VERTEX, SPIRV_HEADER.to_vec(), "ma\0in")
            .is_err());
    }
}
