// Command pool and pre-recorded draw commands
//
// Every command buffer is recorded once right after allocation and then
// resubmitted each frame; they are re-recorded only on swap-chain rebuild.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;

/// Pool on the graphics queue family. Outlives every swap-chain set.
pub struct CommandPool {
    pub pool: vk::CommandPool,
    device: Arc<VulkanDevice>,
}

impl CommandPool {
    pub fn new(device: &Arc<VulkanDevice>) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.physical.queue_families.graphics);

        let pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .context("Failed to create command pool")?;

        Ok(Self {
            pool,
            device: device.clone(),
        })
    }

    /// Allocate `count` primary buffers
    pub fn allocate(&self, count: u32) -> Result<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        unsafe { self.device.device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate command buffers")
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        // Also frees any command buffers still allocated from it
        unsafe { self.device.device.destroy_command_pool(self.pool, None) };
    }
}

/// What each pre-recorded buffer draws
pub struct DrawRecording<'a> {
    pub render_pass: vk::RenderPass,
    pub pipeline: vk::Pipeline,
    pub framebuffers: &'a [vk::Framebuffer],
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
    pub vertex_buffer: vk::Buffer,
    pub vertex_count: u32,
}

/// Record one draw of the vertex buffer per framebuffer.
///
/// `command_buffers[i]` renders into `framebuffers[i]`.
pub fn record_draw_commands(
    device: &ash::Device,
    command_buffers: &[vk::CommandBuffer],
    recording: &DrawRecording<'_>,
) -> Result<()> {
    let clear_values = [vk::ClearValue {
        color: vk::ClearColorValue {
            float32: recording.clear_color,
        },
    }];

    for (&cmd, &framebuffer) in command_buffers.iter().zip(recording.framebuffers) {
        // Resubmitted while a previous submission may still be pending
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::SIMULTANEOUS_USE);

        let render_pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(recording.render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: recording.extent,
            })
            .clear_values(&clear_values);

        unsafe {
            device
                .begin_command_buffer(cmd, &begin_info)
                .context("Failed to begin command buffer")?;

            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, recording.pipeline);
            device.cmd_bind_vertex_buffers(cmd, 0, &[recording.vertex_buffer], &[0]);
            device.cmd_draw(cmd, recording.vertex_count, 1, 0, 0);
            device.cmd_end_render_pass(cmd);

            device
                .end_command_buffer(cmd)
                .context("Failed to record command buffer")?;
        }
    }

    Ok(())
}
