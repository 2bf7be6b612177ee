use crate::buffer::as_bytes;
use crate::image::record_layout_transition;
use crate::{
    AcquireResult, Buffer, CommandPool, Descriptor, Device, FrameSync, Instance, Pipeline,
    PipelineLayout, PresentResult, RendererSettings, Result, Surface, Swapchain, VulkanError,
};
use ash::vk;
use log::{error, info};
use std::sync::Arc;

/// Fills zero sized dimensions with the render extent.
fn resolve_viewport(extent: vk::Extent2D, x: f32, y: f32, width: f32, height: f32) -> vk::Viewport {
    vk::Viewport {
        x,
        y,
        width: if width == 0.0 {
            extent.width as f32
        } else {
            width
        },
        height: if height == 0.0 {
            extent.height as f32
        } else {
            height
        },
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

fn resolve_scissor(extent: vk::Extent2D, x: i32, y: i32, width: u32, height: u32) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x, y },
        extent: vk::Extent2D {
            width: if width == 0 { extent.width } else { width },
            height: if height == 0 { extent.height } else { height },
        },
    }
}

/// Color attachment for dynamic rendering. With a multisampled target the samples are
/// averaged into the swapchain view and the multisampled contents are discarded.
fn color_attachment(
    swapchain_view: vk::ImageView,
    multisampled_view: Option<vk::ImageView>,
    clear_color: [f32; 4],
) -> vk::RenderingAttachmentInfo {
    let clear_value = vk::ClearValue {
        color: vk::ClearColorValue {
            float32: clear_color,
        },
    };

    let attachment = vk::RenderingAttachmentInfo::builder()
        .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .clear_value(clear_value);

    match multisampled_view {
        Some(view) => attachment
            .image_view(view)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .resolve_mode(vk::ResolveModeFlags::AVERAGE)
            .resolve_image_view(swapchain_view)
            .resolve_image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .build(),
        None => attachment
            .image_view(swapchain_view)
            .store_op(vk::AttachmentStoreOp::STORE)
            .build(),
    }
}

/// Owns every object needed to render to one surface with a single frame in flight.
pub struct Renderer {
    frame_sync: FrameSync,
    command_buffer: vk::CommandBuffer,
    command_pool: CommandPool,
    swapchain: Swapchain,
    device: Arc<Device>,

    window_extent: vk::Extent2D,
    needs_rebuild: bool,
}

impl Renderer {
    pub fn new(
        instance: &Arc<Instance>,
        surface: Surface,
        settings: &RendererSettings,
        window_extent: vk::Extent2D,
    ) -> Result<Self> {
        let device = Device::new(instance.clone(), Arc::new(surface), &settings.device)?;
        let swapchain = Swapchain::new(device.clone(), settings.swapchain.clone(), window_extent)?;

        let command_pool = CommandPool::new(
            device.clone(),
            device.graphics_queue.family_index,
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        )?;
        let command_buffer = command_pool.allocate_one()?;
        device.set_object_name(command_buffer, "Frame Command Buffer");

        let frame_sync = FrameSync::new(device.clone())?;

        info!("Renderer initialized");

        Ok(Self {
            frame_sync,
            command_buffer,
            command_pool,
            swapchain,
            device,
            window_extent,
            needs_rebuild: false,
        })
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    pub fn color_format(&self) -> vk::Format {
        self.swapchain.format()
    }

    pub fn sample_count(&self) -> vk::SampleCountFlags {
        self.device.sample_count()
    }

    /// Records the new window size; the swapchain is rebuilt before the next frame.
    pub fn resize(&mut self, window_extent: vk::Extent2D) {
        self.window_extent = window_extent;
        self.needs_rebuild = true;
    }

    fn rebuild(&mut self) -> Result<bool> {
        let rebuilt = self.swapchain.recreate(self.window_extent)?;
        self.needs_rebuild = !rebuilt;
        Ok(rebuilt)
    }

    /// Returns `None` when no image can be rendered this frame, such as while the
    /// window is minimized or right after the swapchain went out of date.
    pub fn begin_frame(&mut self, clear_color: [f32; 4]) -> Result<Option<Frame>> {
        // A failed or dropped frame leaves the fence reset and unsubmitted
        self.frame_sync
            .signal_unsubmitted(self.device.graphics_queue.handle)?;

        if self.needs_rebuild && !self.rebuild()? {
            return Ok(None);
        }

        self.frame_sync.wait()?;

        let image_index = match self
            .swapchain
            .acquire_next_image(self.frame_sync.image_available)?
        {
            AcquireResult::Acquired { index, .. } => index,
            AcquireResult::OutOfDate => {
                info!("Swapchain out of date, rebuilding");
                self.rebuild()?;
                return Ok(None);
            }
        };

        let Some(swapchain_view) = self.swapchain.image_view(image_index) else {
            return Err(VulkanError::Message(format!(
                "Acquired swapchain image {} out of range",
                image_index
            )));
        };
        let swapchain_image = swapchain_view.image();
        let swapchain_view = swapchain_view.handle();

        // Only reset once work is guaranteed to be submitted
        self.frame_sync.reset()?;

        let core = &self.device.core;
        let command_buffer = self.command_buffer;
        unsafe {
            core.reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())?;
            core.begin_command_buffer(
                command_buffer,
                &vk::CommandBufferBeginInfo::builder()
                    .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
            )?;
        }

        record_layout_transition(
            core,
            command_buffer,
            swapchain_image,
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        )?;

        let multisampled_view = match self.swapchain.color_target() {
            Some(color_target) => {
                record_layout_transition(
                    core,
                    command_buffer,
                    color_target.handle(),
                    vk::ImageAspectFlags::COLOR,
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                )?;
                Some(color_target.view())
            }
            None => None,
        };

        let extent = self.swapchain.extent();
        let color_attachments = [color_attachment(
            swapchain_view,
            multisampled_view,
            clear_color,
        )];

        unsafe {
            core.cmd_begin_rendering(
                command_buffer,
                &vk::RenderingInfo::builder()
                    .render_area(vk::Rect2D {
                        offset: vk::Offset2D { x: 0, y: 0 },
                        extent,
                    })
                    .layer_count(1)
                    .color_attachments(&color_attachments),
            );
        }

        Ok(Some(Frame {
            device: self.device.clone(),
            command_buffer,
            image_index,
            image: swapchain_image,
            extent,
        }))
    }

    /// Submits the frame and presents it, rebuilding the swapchain when presentation
    /// reports it out of date or suboptimal.
    pub fn end_frame(&mut self, frame: Frame) -> Result<()> {
        let core = &self.device.core;
        let command_buffer = frame.command_buffer;

        unsafe { core.cmd_end_rendering(command_buffer) };

        record_layout_transition(
            core,
            command_buffer,
            frame.image,
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        )?;

        unsafe { core.end_command_buffer(command_buffer) }?;

        if let Err(err) = self
            .frame_sync
            .submit(self.device.graphics_queue.handle, command_buffer)
        {
            error!("Failed to submit frame: {}", err);
            return Err(err);
        }

        match self.swapchain.present(
            self.device.present_queue.handle,
            frame.image_index,
            self.frame_sync.render_done,
        )? {
            PresentResult::Presented => {}
            PresentResult::NeedsRebuild => {
                info!("Swapchain out of date or suboptimal, rebuilding");
                self.rebuild()?;
            }
        }

        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(err) = self.device.wait_idle() {
            error!("Failed to wait for device idle: {}", err);
        }
    }
}

/// Command recording for one frame between [`Renderer::begin_frame`] and [`Renderer::end_frame`].
/// A frame dropped without `end_frame` is discarded; the next `begin_frame` recovers its fence.
pub struct Frame {
    device: Arc<Device>,
    command_buffer: vk::CommandBuffer,
    image_index: u32,
    image: vk::Image,
    extent: vk::Extent2D,
}

impl Frame {
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// A width or height of zero covers the full render extent.
    pub fn set_viewport(&self, x: f32, y: f32, width: f32, height: f32) {
        let viewport = resolve_viewport(self.extent, x, y, width, height);
        unsafe {
            self.device
                .core
                .cmd_set_viewport(self.command_buffer, 0, &[viewport]);
        }
    }

    /// A width or height of zero covers the full render extent.
    pub fn set_scissor(&self, x: i32, y: i32, width: u32, height: u32) {
        let scissor = resolve_scissor(self.extent, x, y, width, height);
        unsafe {
            self.device
                .core
                .cmd_set_scissor(self.command_buffer, 0, &[scissor]);
        }
    }

    pub fn bind_pipeline(&self, pipeline: &Pipeline) {
        unsafe {
            self.device.core.cmd_bind_pipeline(
                self.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.handle,
            );
        }
    }

    pub fn bind_vertex_buffer(&self, binding: u32, buffer: &Buffer) {
        unsafe {
            self.device.core.cmd_bind_vertex_buffers(
                self.command_buffer,
                binding,
                &[buffer.handle()],
                &[0],
            );
        }
    }

    pub fn bind_index_buffer(&self, buffer: &Buffer) {
        unsafe {
            self.device.core.cmd_bind_index_buffer(
                self.command_buffer,
                buffer.handle(),
                0,
                vk::IndexType::UINT32,
            );
        }
    }

    pub fn bind_descriptor_set(&self, layout: &PipelineLayout, set_index: u32, descriptor: &Descriptor) {
        unsafe {
            self.device.core.cmd_bind_descriptor_sets(
                self.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                layout.handle,
                set_index,
                &[descriptor.set],
                &[],
            );
        }
    }

    pub fn push_constants<T: Copy>(
        &self,
        layout: &PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        value: &T,
    ) {
        unsafe {
            self.device.core.cmd_push_constants(
                self.command_buffer,
                layout.handle,
                stages,
                offset,
                as_bytes(std::slice::from_ref(value)),
            );
        }
    }

    pub fn draw(&self, vertex_count: u32, instance_count: u32) {
        unsafe {
            self.device
                .core
                .cmd_draw(self.command_buffer, vertex_count, instance_count, 0, 0);
        }
    }

    pub fn draw_indexed(&self, index_count: u32, instance_count: u32) {
        unsafe {
            self.device.core.cmd_draw_indexed(
                self.command_buffer,
                index_count,
                instance_count,
                0,
                0,
                0,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXTENT: vk::Extent2D = vk::Extent2D {
        width: 1280,
        height: 720,
    };

    #[test]
    fn zero_viewport_covers_extent() {
        let viewport = resolve_viewport(EXTENT, 0.0, 0.0, 0.0, 0.0);
        assert_eq!(viewport.width, 1280.0);
        assert_eq!(viewport.height, 720.0);
        assert_eq!(viewport.max_depth, 1.0);

        let viewport = resolve_viewport(EXTENT, 10.0, 20.0, 100.0, 0.0);
        assert_eq!(viewport.x, 10.0);
        assert_eq!(viewport.width, 100.0);
        assert_eq!(viewport.height, 720.0);
    }

    #[test]
    fn zero_scissor_covers_extent() {
        let scissor = resolve_scissor(EXTENT, 0, 0, 0, 0);
        assert_eq!(scissor.extent, EXTENT);

        let scissor = resolve_scissor(EXTENT, 5, 5, 64, 32);
        assert_eq!(scissor.offset, vk::Offset2D { x: 5, y: 5 });
        assert_eq!(
            scissor.extent,
            vk::Extent2D {
                width: 64,
                height: 32,
            }
        );
    }

    #[test]
    fn single_sampled_attachment_stores_to_swapchain() {
        let view = vk::ImageView::null();
        let attachment = color_attachment(view, None, [0.1, 0.2, 0.3, 1.0]);
        assert_eq!(attachment.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(attachment.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(attachment.resolve_mode, vk::ResolveModeFlags::NONE);
        assert_eq!(unsafe { attachment.clear_value.color.float32 }, [0.1, 0.2, 0.3, 1.0]);
    }

    #[test]
    fn multisampled_attachment_resolves_into_swapchain() {
        use ash::vk::Handle;
        let swapchain_view = vk::ImageView::from_raw(1);
        let multisampled_view = vk::ImageView::from_raw(2);

        let attachment = color_attachment(swapchain_view, Some(multisampled_view), [0.0; 4]);
        assert_eq!(attachment.image_view, multisampled_view);
        assert_eq!(attachment.resolve_image_view, swapchain_view);
        assert_eq!(attachment.resolve_mode, vk::ResolveModeFlags::AVERAGE);
        assert_eq!(attachment.store_op, vk::AttachmentStoreOp::DONT_CARE);
    }
}
