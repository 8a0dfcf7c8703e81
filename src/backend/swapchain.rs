// Swapchain - the resize-dependent bundle
//
// Swap chain, image views, render pass, pipeline, framebuffers and the
// pre-recorded command buffers are built as one unit and torn down as one
// unit. A rebuild replaces the whole set.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::command::{record_draw_commands, CommandPool, DrawRecording};
use super::pipeline::{create_framebuffers, create_graphics_pipeline, create_render_pass};
use super::release::{DeviceRelease, SwapChainHandles};
use super::{Surface, VertexBuffer, VulkanDevice};
use crate::config::ShaderConfig;
use crate::frame::{Acquire, Present};

const PREFERRED_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Choose surface format.
///
/// A lone UNDEFINED entry means the surface has no preference.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    if let [only] = formats {
        if only.format == vk::Format::UNDEFINED {
            return Some(PREFERRED_SURFACE_FORMAT);
        }
    }

    formats
        .iter()
        .find(|f| {
            f.format == PREFERRED_SURFACE_FORMAT.format
                && f.color_space == PREFERRED_SURFACE_FORMAT.color_space
        })
        .or_else(|| formats.first())
        .copied()
}

/// Choose present mode.
///
/// MAILBOX: no tearing, never blocks on acquire
/// IMMEDIATE: lowest latency, may tear
/// FIFO: vsync, always supported
pub fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| present_modes.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Choose extent.
///
/// `u32::MAX` in `current_extent` means the surface size follows the swap
/// chain, so the window's pixel size is clamped into the allowed range.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    (width, height): (u32, u32),
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One more than the minimum; `max_image_count == 0` means unbounded
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let image_count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 && image_count > capabilities.max_image_count {
        capabilities.max_image_count
    } else {
        image_count
    }
}

/// Long-lived objects a swap-chain set is built against
pub struct SwapChainContext<'a> {
    pub device: &'a Arc<VulkanDevice>,
    pub surface: &'a Surface,
    pub command_pool: &'a CommandPool,
    pub vertex_buffer: &'a VertexBuffer,
    pub shaders: &'a ShaderConfig,
    pub clear_color: [f32; 4],
}

pub struct SwapChainSet {
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    handles: SwapChainHandles,
    command_pool: vk::CommandPool,
    device: Arc<VulkanDevice>,
}

impl SwapChainSet {
    /// Build swap chain -> image views -> render pass -> pipeline
    /// -> framebuffers -> command buffers
    pub fn build(ctx: &SwapChainContext<'_>, window_size: (u32, u32)) -> Result<Self> {
        let device = ctx.device;
        let support = ctx.surface.support(device.physical.handle)?;

        let format = choose_surface_format(&support.formats).context("Surface reports no formats")?;
        let present_mode = choose_present_mode(&support.present_modes);
        let extent = choose_extent(&support.capabilities, window_size);
        let image_count = choose_image_count(&support.capabilities);

        // Anything created before a failure is released by Drop
        let mut set = Self {
            format,
            present_mode,
            extent,
            images: Vec::new(),
            handles: SwapChainHandles::default(),
            command_pool: ctx.command_pool.pool,
            device: device.clone(),
        };
        set.create_handles(ctx, &support.capabilities, image_count)?;

        log::info!(
            "Created swap chain: {}x{}, {} images, {:?} / {:?}, {:?}",
            extent.width,
            extent.height,
            set.image_count(),
            format.format,
            format.color_space,
            present_mode
        );

        Ok(set)
    }

    fn create_handles(
        &mut self,
        ctx: &SwapChainContext<'_>,
        capabilities: &vk::SurfaceCapabilitiesKHR,
        image_count: u32,
    ) -> Result<()> {
        let device = &self.device.device;
        let (sharing_mode, queue_family_indices) =
            self.device.physical.queue_families.sharing_mode();

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(ctx.surface.handle)
            .min_image_count(image_count)
            .image_format(self.format.format)
            .image_color_space(self.format.color_space)
            .image_extent(self.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&queue_family_indices)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(self.present_mode)
            .clipped(true);

        self.handles.swapchain =
            unsafe { self.device.swapchain_loader.create_swapchain(&create_info, None) }
                .context("Failed to create swap chain")?;

        self.images = unsafe {
            self.device
                .swapchain_loader
                .get_swapchain_images(self.handles.swapchain)
        }
        .context("Failed to get swap chain images")?;

        for &image in &self.images {
            let view_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.format.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            let view = unsafe { device.create_image_view(&view_info, None) }
                .context("Failed to create image view")?;
            self.handles.image_views.push(view);
        }

        self.handles.render_pass = create_render_pass(device, self.format.format)?;

        let (pipeline, pipeline_layout) =
            create_graphics_pipeline(device, self.handles.render_pass, self.extent, ctx.shaders)?;
        self.handles.pipeline = pipeline;
        self.handles.pipeline_layout = pipeline_layout;

        create_framebuffers(
            device,
            &self.handles.image_views,
            self.handles.render_pass,
            self.extent,
            &mut self.handles.framebuffers,
        )?;

        self.handles.command_buffers = ctx
            .command_pool
            .allocate(self.handles.framebuffers.len() as u32)?;

        record_draw_commands(
            device,
            &self.handles.command_buffers,
            &DrawRecording {
                render_pass: self.handles.render_pass,
                pipeline: self.handles.pipeline,
                framebuffers: &self.handles.framebuffers,
                extent: self.extent,
                clear_color: ctx.clear_color,
                vertex_buffer: ctx.vertex_buffer.buffer(),
                vertex_count: ctx.vertex_buffer.vertex_count,
            },
        )?;

        debug_assert!(self.handles.is_consistent());
        debug_assert_eq!(self.handles.image_views.len(), self.images.len());

        Ok(())
    }

    /// Destroy this set and build a fresh one against the same context.
    ///
    /// The caller must make sure the device is idle.
    pub fn rebuild(self, ctx: &SwapChainContext<'_>, window_size: (u32, u32)) -> Result<Self> {
        drop(self);
        Self::build(ctx, window_size)
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn command_buffer(&self, image_index: u32) -> Option<vk::CommandBuffer> {
        self.handles
            .command_buffers
            .get(image_index as usize)
            .copied()
    }

    /// Acquire next image for rendering; signals `semaphore` when it is ready
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<Acquire> {
        let result = unsafe {
            self.device.swapchain_loader.acquire_next_image(
                self.handles.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, suboptimal)) => Ok(Acquire::Image { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquire::OutOfDate),
            Err(e) => Err(e).context("Failed to acquire swap chain image"),
        }
    }

    /// Present rendered image to screen once `wait_semaphore` is signaled
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<Present> {
        let wait_semaphores = [wait_semaphore];
        let swapchains = [self.handles.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.device
                .swapchain_loader
                .queue_present(queue, &present_info)
        };

        match result {
            Ok(false) => Ok(Present::Optimal),
            Ok(true) => Ok(Present::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Present::OutOfDate),
            Err(e) => Err(e).context("Failed to present swap chain image"),
        }
    }
}

impl Drop for SwapChainSet {
    fn drop(&mut self) {
        let release = DeviceRelease {
            device: &self.device.device,
            swapchain_loader: &self.device.swapchain_loader,
            command_pool: self.command_pool,
        };
        self.handles.release(&release);
        self.images.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn capabilities(
        current: (u32, u32),
        min: (u32, u32),
        max: (u32, u32),
    ) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: min.0,
                height: min.1,
            },
            max_image_extent: vk::Extent2D {
                width: max.0,
                height: max.1,
            },
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        }
    }

    fn extent_of(extent: vk::Extent2D) -> (u32, u32) {
        (extent.width, extent.height)
    }

    #[test]
    fn undefined_only_format_means_free_choice() {
        let chosen = choose_surface_format(&[format(
            vk::Format::UNDEFINED,
            vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
        )])
        .unwrap();

        assert_eq!(chosen.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn preferred_format_wins_over_order() {
        let formats = [
            format(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(
                vk::Format::B8G8R8A8_UNORM,
                vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT,
            ),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];

        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn first_format_is_the_fallback() {
        let formats = [
            format(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];

        assert_eq!(
            choose_surface_format(&formats).unwrap().format,
            vk::Format::R8G8B8A8_SRGB
        );
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn present_mode_prefers_mailbox_then_immediate_then_fifo() {
        use vk::PresentModeKHR as Mode;

        let cases = [
            (vec![Mode::FIFO, Mode::IMMEDIATE, Mode::MAILBOX], Mode::MAILBOX),
            (vec![Mode::MAILBOX], Mode::MAILBOX),
            (vec![Mode::FIFO, Mode::IMMEDIATE], Mode::IMMEDIATE),
            (vec![Mode::FIFO_RELAXED, Mode::FIFO], Mode::FIFO),
            (vec![], Mode::FIFO),
        ];

        for (available, expected) in cases {
            assert_eq!(choose_present_mode(&available), expected, "{:?}", available);
        }
    }

    #[test]
    fn fixed_current_extent_is_used_as_is() {
        let caps = capabilities((1024, 768), (1, 1), (4096, 4096));
        assert_eq!(extent_of(choose_extent(&caps, (1280, 720))), (1024, 768));
    }

    #[test]
    fn sentinel_extent_uses_window_size() {
        let caps = capabilities((u32::MAX, u32::MAX), (1, 1), (4096, 4096));
        assert_eq!(extent_of(choose_extent(&caps, (1280, 720))), (1280, 720));
    }

    #[test]
    fn sentinel_extent_clamps_each_axis() {
        let caps = capabilities((u32::MAX, u32::MAX), (64, 64), (1920, 1080));
        assert_eq!(extent_of(choose_extent(&caps, (4000, 10))), (1920, 64));
    }

    #[test]
    fn image_count_is_min_plus_one_capped_by_max() {
        let mut caps = capabilities((800, 600), (1, 1), (800, 600));
        assert_eq!(choose_image_count(&caps), 3);

        caps.max_image_count = 2;
        assert_eq!(choose_image_count(&caps), 2);

        caps.max_image_count = 8;
        assert_eq!(choose_image_count(&caps), 3);
    }
}
