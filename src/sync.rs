use crate::{Device, Result, VulkanError};
use ash::vk;
use std::sync::Arc;

/// Tracks whether the in flight fence will be signaled by work already handed to a queue.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct FenceTracker {
    unsubmitted: bool,
}

impl FenceTracker {
    fn reset(&mut self) {
        self.unsubmitted = true;
    }

    fn submitted(&mut self) {
        self.unsubmitted = false;
    }

    fn needs_signal(&self) -> bool {
        self.unsubmitted
    }
}

/// Semaphores and fence for the single frame in flight.
pub struct FrameSync {
    device: Arc<Device>,
    pub image_available: vk::Semaphore,
    pub render_done: vk::Semaphore,
    pub in_flight: vk::Fence,
    fence: FenceTracker,
}

impl FrameSync {
    pub fn new(device: Arc<Device>) -> Result<Self> {
        // Null handles are valid to destroy, so a partial failure cleans up in drop
        let mut sync = Self {
            device,
            image_available: vk::Semaphore::null(),
            render_done: vk::Semaphore::null(),
            in_flight: vk::Fence::null(),
            fence: FenceTracker::default(),
        };

        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        unsafe {
            sync.image_available = sync.device.core.create_semaphore(&semaphore_info, None)?;
            sync.render_done = sync.device.core.create_semaphore(&semaphore_info, None)?;
            sync.in_flight = sync.device.core.create_fence(
                &vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED),
                None,
            )?;
        }

        sync.device
            .set_object_name(sync.image_available, "Image Available Semaphore");
        sync.device
            .set_object_name(sync.render_done, "Render Done Semaphore");
        sync.device.set_object_name(sync.in_flight, "In Flight Fence");

        Ok(sync)
    }

    pub fn wait(&self) -> Result<()> {
        Ok(unsafe {
            self.device
                .core
                .wait_for_fences(&[self.in_flight], true, u64::MAX)
        }?)
    }

    /// Resets the fence. Must only follow a successful acquire on `image_available`.
    pub fn reset(&mut self) -> Result<()> {
        unsafe { self.device.core.reset_fences(&[self.in_flight]) }?;
        self.fence.reset();
        Ok(())
    }

    /// Submits the frame's commands, waiting on `image_available` and signaling
    /// `render_done` and the fence.
    pub fn submit(&mut self, queue: vk::Queue, command_buffer: vk::CommandBuffer) -> Result<()> {
        let wait_semaphores = [self.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [command_buffer];
        let signal_semaphores = [self.render_done];

        unsafe {
            self.device.core.queue_submit(
                queue,
                &[vk::SubmitInfo::builder()
                    .wait_semaphores(&wait_semaphores)
                    .wait_dst_stage_mask(&wait_stages)
                    .command_buffers(&command_buffers)
                    .signal_semaphores(&signal_semaphores)
                    .build()],
                self.in_flight,
            )
        }?;
        self.fence.submitted();
        Ok(())
    }

    /// Signals a fence left unsignaled by a frame that was never submitted. An empty
    /// batch consumes the pending `image_available` signal and signals the fence.
    pub fn signal_unsubmitted(&mut self, queue: vk::Queue) -> Result<()> {
        if !self.fence.needs_signal() {
            return Ok(());
        }

        log::warn!("Previous frame was never submitted, signaling its fence");

        let wait_semaphores = [self.image_available];
        let wait_stages = [vk::PipelineStageFlags::ALL_COMMANDS];
        unsafe {
            self.device.core.queue_submit(
                queue,
                &[vk::SubmitInfo::builder()
                    .wait_semaphores(&wait_semaphores)
                    .wait_dst_stage_mask(&wait_stages)
                    .build()],
                self.in_flight,
            )
        }?;
        self.fence.submitted();
        Ok(())
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        unsafe {
            self.device.core.destroy_fence(self.in_flight, None);
            self.device.core.destroy_semaphore(self.render_done, None);
            self.device.core.destroy_semaphore(self.image_available, None);
        }
    }
}

pub struct CommandPool {
    device: Arc<Device>,
    pub(crate) handle: vk::CommandPool,
}

impl CommandPool {
    pub fn new(
        device: Arc<Device>,
        queue_family_index: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> Result<Self> {
        let handle = unsafe {
            device.core.create_command_pool(
                &vk::CommandPoolCreateInfo::builder()
                    .flags(flags)
                    .queue_family_index(queue_family_index),
                None,
            )
        }?;
        device.set_object_name(handle, "Frame Command Pool");
        Ok(Self { device, handle })
    }

    pub fn allocate_primary(&self, count: u32) -> Result<Vec<vk::CommandBuffer>> {
        Ok(unsafe {
            self.device.core.allocate_command_buffers(
                &vk::CommandBufferAllocateInfo::builder()
                    .command_pool(self.handle)
                    .level(vk::CommandBufferLevel::PRIMARY)
                    .command_buffer_count(count),
            )
        }?)
    }

    pub fn allocate_one(&self) -> Result<vk::CommandBuffer> {
        self.allocate_primary(1)?
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::Message(String::from("No command buffer allocated")))
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.core.destroy_command_pool(self.handle, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_fence_needs_no_signal() {
        assert!(!FenceTracker::default().needs_signal());
    }

    #[test]
    fn reset_without_submit_needs_signal() {
        let mut fence = FenceTracker::default();
        fence.reset();
        assert!(fence.needs_signal());

        // Recovery submission
        fence.submitted();
        assert!(!fence.needs_signal());
    }

    #[test]
    fn submitted_frame_needs_no_signal() {
        let mut fence = FenceTracker::default();
        fence.reset();
        fence.submitted();
        assert!(!fence.needs_signal());

        fence.reset();
        fence.reset();
        assert!(fence.needs_signal());
    }
}
