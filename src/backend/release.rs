// Handle release for the swap-chain set
//
// The set is torn down as one unit, strictly in reverse dependency order:
// framebuffers -> command buffers -> pipeline -> pipeline layout
// -> render pass -> image views -> swap chain.
// The destroy calls go through `ReleaseHandles` so the ordering can be
// checked without a GPU.

use ash::vk;

/// Destroy calls needed to release a swap-chain set
pub trait ReleaseHandles {
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);
    /// Returns buffers to their pool; the pool itself survives
    fn free_command_buffers(&self, command_buffers: &[vk::CommandBuffer]);
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    fn destroy_image_view(&self, view: vk::ImageView);
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
}

/// Real release path: device, swap-chain loader and the pool the command
/// buffers came from
pub struct DeviceRelease<'a> {
    pub device: &'a ash::Device,
    pub swapchain_loader: &'a ash::extensions::khr::Swapchain,
    pub command_pool: vk::CommandPool,
}

impl ReleaseHandles for DeviceRelease<'_> {
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) }
    }

    fn free_command_buffers(&self, command_buffers: &[vk::CommandBuffer]) {
        unsafe {
            self.device
                .free_command_buffers(self.command_pool, command_buffers)
        }
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device.destroy_pipeline(pipeline, None) }
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.device.destroy_pipeline_layout(layout, None) }
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.device.destroy_render_pass(render_pass, None) }
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) }
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) }
    }
}

/// Every handle a swap-chain set owns.
///
/// Filled in creation order while building; anything still null when
/// `release` runs (a build that failed halfway) is skipped.
#[derive(Debug, Default)]
pub struct SwapChainHandles {
    pub swapchain: vk::SwapchainKHR,
    pub image_views: Vec<vk::ImageView>,
    pub render_pass: vk::RenderPass,
    pub pipeline_layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub command_buffers: Vec<vk::CommandBuffer>,
}

impl SwapChainHandles {
    /// |image views| == |framebuffers| == |command buffers|
    pub fn is_consistent(&self) -> bool {
        self.image_views.len() == self.framebuffers.len()
            && self.framebuffers.len() == self.command_buffers.len()
    }

    pub fn release(&mut self, release: &impl ReleaseHandles) {
        for framebuffer in self.framebuffers.drain(..) {
            release.destroy_framebuffer(framebuffer);
        }

        if !self.command_buffers.is_empty() {
            release.free_command_buffers(&self.command_buffers);
            self.command_buffers.clear();
        }

        if self.pipeline != vk::Pipeline::null() {
            release.destroy_pipeline(std::mem::take(&mut self.pipeline));
        }
        if self.pipeline_layout != vk::PipelineLayout::null() {
            release.destroy_pipeline_layout(std::mem::take(&mut self.pipeline_layout));
        }
        if self.render_pass != vk::RenderPass::null() {
            release.destroy_render_pass(std::mem::take(&mut self.render_pass));
        }

        for view in self.image_views.drain(..) {
            release.destroy_image_view(view);
        }

        if self.swapchain != vk::SwapchainKHR::null() {
            release.destroy_swapchain(std::mem::take(&mut self.swapchain));
        }
    }
}
