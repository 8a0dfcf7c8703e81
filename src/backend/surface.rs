// Presentation surface bound to the OS window

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::vk;

use super::Instance;
use crate::window::WinitSurface;

/// Surface handle plus the loader needed to query and destroy it.
///
/// Must be dropped before the `Instance` it was created from.
pub struct Surface {
    pub loader: khr::Surface,
    pub handle: vk::SurfaceKHR,
}

impl Surface {
    pub fn new(instance: &Instance, window: &WinitSurface) -> Result<Self> {
        let loader = khr::Surface::new(&instance.entry, &instance.instance);
        let handle = window.create_surface(&instance.entry, &instance.instance)?;

        Ok(Self { loader, handle })
    }

    pub fn supports_present(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
    ) -> Result<bool> {
        unsafe {
            self.loader.get_physical_device_surface_support(
                physical_device,
                queue_family,
                self.handle,
            )
        }
        .context("Failed to query surface presentation support")
    }

    pub fn support(&self, physical_device: vk::PhysicalDevice) -> Result<SurfaceSupport> {
        SurfaceSupport::query(&self.loader, self.handle, physical_device)
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.handle, None) };
    }
}

/// What a physical device can do with this surface
#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    pub fn query(
        loader: &khr::Surface,
        surface: vk::SurfaceKHR,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let capabilities = unsafe {
            loader.get_physical_device_surface_capabilities(physical_device, surface)
        }
        .context("Failed to query surface capabilities")?;

        let formats = unsafe { loader.get_physical_device_surface_formats(physical_device, surface) }
            .context("Failed to query surface formats")?;

        let present_modes = unsafe {
            loader.get_physical_device_surface_present_modes(physical_device, surface)
        }
        .context("Failed to query surface present modes")?;

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// At least one format and one present mode
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}
