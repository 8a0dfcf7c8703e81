// =============================================================================
// RENDERER - owns every GPU object
// =============================================================================
//
// CREATION ORDER:
// instance -> surface -> physical device -> device -> command pool
//   -> vertex buffer -> frame sync -> swap-chain set
//
// Teardown is the reverse, driven by field order (see `Renderer`).

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use crate::backend::buffer::TRIANGLE;
use crate::backend::device::pick_physical_device;
use crate::backend::{
    CommandPool, FrameSynchronizer, Instance, Surface, SwapChainContext, SwapChainSet,
    VertexBuffer, VulkanDevice,
};
use crate::config::{Config, ShaderConfig};
use crate::frame::{Acquire, FrameTarget, Present};
use crate::window::{SurfaceProvider, WinitSurface};

/// All Vulkan state for the triangle.
///
/// IMPORTANT: Field order matters for Drop! Fields drop top to bottom, so
/// the swap-chain set goes first and the instance last. Child objects keep
/// the device alive through their own `Arc`, so `device` is the last owner.
pub struct Renderer {
    swap_set: Option<SwapChainSet>,
    vertex_buffer: VertexBuffer,
    frame_sync: FrameSynchronizer,
    command_pool: CommandPool,
    device: Arc<VulkanDevice>,
    surface: Surface,
    // Only needed alive; destroyed last
    _instance: Instance,

    shaders: ShaderConfig,
    clear_color: [f32; 4],
    wait_stages: [vk::PipelineStageFlags; 1],
}

impl Renderer {
    pub fn new(window: &WinitSurface, config: &Config) -> Result<Self> {
        let extensions = window.required_instance_extensions()?;
        let instance = Instance::new(
            &config.window.title,
            &extensions,
            config.validation_enabled(),
        )?;
        let surface = Surface::new(&instance, window)?;

        let physical = pick_physical_device(&instance, &surface)?;
        let device = VulkanDevice::new(&instance, physical)?;

        let command_pool = CommandPool::new(&device)?;
        let vertex_buffer = VertexBuffer::new(&device, &TRIANGLE)?;
        let frame_sync = FrameSynchronizer::new(&device)?;

        let mut renderer = Self {
            swap_set: None,
            vertex_buffer,
            frame_sync,
            command_pool,
            device,
            surface,
            _instance: instance,
            shaders: config.shaders.clone(),
            clear_color: config.graphics.clear_color,
            // Color output waits for the acquired image
            wait_stages: [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
        };

        let swap_set =
            SwapChainSet::build(&renderer.swap_chain_context(), window.framebuffer_size())?;
        renderer.swap_set = Some(swap_set);

        log::info!("Vulkan initialization complete");
        Ok(renderer)
    }

    fn swap_chain_context(&self) -> SwapChainContext<'_> {
        SwapChainContext {
            device: &self.device,
            surface: &self.surface,
            command_pool: &self.command_pool,
            vertex_buffer: &self.vertex_buffer,
            shaders: &self.shaders,
            clear_color: self.clear_color,
        }
    }

    fn swap_set(&self) -> Result<&SwapChainSet> {
        self.swap_set.as_ref().context("Swap chain not built")
    }
}

impl FrameTarget for Renderer {
    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        let fence = self.frame_sync.slot(slot).in_flight_fence;
        unsafe {
            self.device
                .device
                .wait_for_fences(&[fence], true, u64::MAX)
        }
        .context("Failed to wait for in-flight fence")
    }

    fn acquire(&mut self, slot: usize) -> Result<Acquire> {
        let semaphore = self.frame_sync.slot(slot).image_available;
        self.swap_set()?.acquire_next_image(semaphore)
    }

    fn submit(&mut self, slot: usize, image_index: u32) -> Result<()> {
        let sync = self.frame_sync.slot(slot);
        let cmd = self
            .swap_set()?
            .command_buffer(image_index)
            .with_context(|| format!("No command buffer for image {}", image_index))?;

        let wait_semaphores = [sync.image_available];
        let signal_semaphores = [sync.render_finished];
        let command_buffers = [cmd];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&self.wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        let device = &self.device.device;
        unsafe {
            // Only reset once work is certain to be submitted with this fence
            device
                .reset_fences(&[sync.in_flight_fence])
                .context("Failed to reset in-flight fence")?;

            device
                .queue_submit(
                    self.device.graphics_queue,
                    &[submit_info.build()],
                    sync.in_flight_fence,
                )
                .context("Failed to submit draw command buffer")
        }
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<Present> {
        let render_finished = self.frame_sync.slot(slot).render_finished;
        self.swap_set()?
            .present(self.device.present_queue, image_index, render_finished)
    }

    fn rebuild(&mut self, window_size: (u32, u32)) -> Result<()> {
        self.device.wait_idle()?;

        let swap_set = match self.swap_set.take() {
            Some(old) => old.rebuild(&self.swap_chain_context(), window_size)?,
            None => SwapChainSet::build(&self.swap_chain_context(), window_size)?,
        };
        self.swap_set = Some(swap_set);

        Ok(())
    }

    fn wait_idle(&self) -> Result<()> {
        self.device.wait_idle()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");

        // Fences alone do not cover the last present
        if let Err(e) = self.device.wait_idle() {
            log::error!("{:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    /// Owning fields, first dropped to last
    const TEARDOWN_ORDER: [&str; 7] = [
        "swap_set",
        "vertex_buffer",
        "frame_sync",
        "command_pool",
        "device",
        "surface",
        "_instance",
    ];

    fn renderer_fields(source: &str) -> Vec<&str> {
        let start = source.find("pub struct Renderer {").unwrap();
        let body = &source[start..];
        let body = &body[..body.find("\n}").unwrap()];

        body.lines()
            .filter_map(|line| line.trim().split_once(':'))
            .map(|(name, _)| name)
            .filter(|name| TEARDOWN_ORDER.contains(name))
            .collect()
    }

    // Fields drop in declaration order, so declaration order is the teardown order
    #[test]
    fn fields_are_declared_in_teardown_order() {
        assert_eq!(renderer_fields(include_str!("renderer.rs")), TEARDOWN_ORDER);
    }

    #[test]
    fn reordered_fields_are_detected() {
        let swapped = "pub struct Renderer {\n    vertex_buffer: VertexBuffer,\n    swap_set: Option<SwapChainSet>,\n}\n";
        assert_eq!(renderer_fields(swapped), vec!["vertex_buffer", "swap_set"]);
    }
}
