// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Physical device selection (score candidates, prefer discrete GPU)
// - Queue family discovery (graphics + present, possibly the same family)
// - Logical device + queue creation

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::vk;
use std::collections::BTreeSet;
use std::ffi::CStr;
use std::sync::Arc;

use super::{Instance, Surface};
use crate::error::InitError;

/// Queue families used by the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    /// First family with graphics support and first family that can present.
    ///
    /// `supports_present` is asked about each family until one says yes.
    pub fn find<F>(families: &[vk::QueueFamilyProperties], mut supports_present: F) -> Result<Option<Self>>
    where
        F: FnMut(u32) -> Result<bool>,
    {
        let mut graphics = None;
        let mut present = None;

        for (index, family) in families.iter().enumerate() {
            let index = index as u32;

            if graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                graphics = Some(index);
            }
            if present.is_none() && supports_present(index)? {
                present = Some(index);
            }
            if graphics.is_some() && present.is_some() {
                break;
            }
        }

        Ok(match (graphics, present) {
            (Some(graphics), Some(present)) => Some(Self { graphics, present }),
            _ => None,
        })
    }

    /// Distinct families, so a shared family gets a single queue
    pub fn unique(&self) -> BTreeSet<u32> {
        [self.graphics, self.present].into_iter().collect()
    }

    /// Concurrent sharing across both families when they differ
    pub fn sharing_mode(&self) -> (vk::SharingMode, Vec<u32>) {
        if self.graphics != self.present {
            (
                vk::SharingMode::CONCURRENT,
                vec![self.graphics, self.present],
            )
        } else {
            (vk::SharingMode::EXCLUSIVE, vec![])
        }
    }
}

/// Everything the selector learned about one GPU
#[derive(Debug, Clone)]
pub struct DeviceCandidate {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub queue_families: Option<QueueFamilyIndices>,
    pub supports_swapchain: bool,
    pub swapchain_adequate: bool,
}

impl DeviceCandidate {
    fn inspect(instance: &Instance, surface: &Surface, handle: vk::PhysicalDevice) -> Result<Self> {
        let properties = unsafe { instance.instance.get_physical_device_properties(handle) };
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        let families =
            unsafe { instance.instance.get_physical_device_queue_family_properties(handle) };
        let queue_families =
            QueueFamilyIndices::find(&families, |index| surface.supports_present(handle, index))?;

        let supports_swapchain = supports_extensions(instance, handle, &[khr::Swapchain::name()])?;

        // Swap chain support can only be queried once the extension is known to exist
        let swapchain_adequate = supports_swapchain && surface.support(handle)?.is_adequate();

        Ok(Self {
            handle,
            name,
            device_type: properties.device_type,
            queue_families,
            supports_swapchain,
            swapchain_adequate,
        })
    }

    /// 0 if any requirement fails; otherwise 10, plus 1000 for a discrete GPU
    pub fn score(&self) -> u32 {
        if self.queue_families.is_none() || !self.supports_swapchain || !self.swapchain_adequate {
            return 0;
        }

        let mut score = 10;
        if self.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
            score += 1000;
        }
        score
    }
}

/// The selected GPU. A plain value, re-derivable from instance + surface.
#[derive(Debug, Clone)]
pub struct PhysicalDeviceRecord {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub queue_families: QueueFamilyIndices,
    pub score: u32,
}

/// Highest score wins; ties keep enumeration order. `None` if nothing scores.
pub fn pick_best(mut candidates: Vec<DeviceCandidate>) -> Option<PhysicalDeviceRecord> {
    candidates.sort_by_key(|candidate| std::cmp::Reverse(candidate.score()));

    let best = candidates.into_iter().next()?;
    let score = best.score();
    if score == 0 {
        return None;
    }

    Some(PhysicalDeviceRecord {
        handle: best.handle,
        name: best.name,
        queue_families: best.queue_families?,
        score,
    })
}

/// Enumerate GPUs and pick the best one for this surface
pub fn pick_physical_device(instance: &Instance, surface: &Surface) -> Result<PhysicalDeviceRecord> {
    let devices = unsafe { instance.instance.enumerate_physical_devices() }
        .context("Failed to enumerate physical devices")?;

    let candidates = devices
        .into_iter()
        .map(|handle| DeviceCandidate::inspect(instance, surface, handle))
        .collect::<Result<Vec<_>>>()?;

    for candidate in &candidates {
        log::info!(
            "Found GPU: {} ({:?}), score {}",
            candidate.name,
            candidate.device_type,
            candidate.score()
        );
    }

    let record = pick_best(candidates).ok_or(InitError::NoSuitableDevice)?;
    log::info!(
        "Selected GPU: {} (score {}, graphics family {}, present family {})",
        record.name,
        record.score,
        record.queue_families.graphics,
        record.queue_families.present
    );

    Ok(record)
}

fn supports_extensions(
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
    required: &[&CStr],
) -> Result<bool> {
    let available = unsafe {
        instance
            .instance
            .enumerate_device_extension_properties(physical_device)
    }
    .context("Failed to enumerate device extensions")?;

    Ok(required.iter().all(|&name| {
        available
            .iter()
            .any(|props| unsafe { CStr::from_ptr(props.extension_name.as_ptr()) } == name)
    }))
}

/// Logical device with its graphics and present queues
pub struct VulkanDevice {
    pub device: ash::Device,
    pub swapchain_loader: khr::Swapchain,
    pub physical: PhysicalDeviceRecord,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,

    // May be the same queue when the families coincide
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
}

impl VulkanDevice {
    pub fn new(instance: &Instance, physical: PhysicalDeviceRecord) -> Result<Arc<Self>> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = physical
            .queue_families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extensions = [khr::Swapchain::name().as_ptr()];
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe {
            instance
                .instance
                .create_device(physical.handle, &create_info, None)
        }
        .context("Failed to create logical device")?;

        let graphics_queue = unsafe { device.get_device_queue(physical.queue_families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(physical.queue_families.present, 0) };

        let memory_properties = unsafe {
            instance
                .instance
                .get_physical_device_memory_properties(physical.handle)
        };

        let swapchain_loader = khr::Swapchain::new(&instance.instance, &device);

        Ok(Arc::new(Self {
            device,
            swapchain_loader,
            physical,
            memory_properties,
            graphics_queue,
            present_queue,
        }))
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.context("Failed to wait for device idle")
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        let _ = self.wait_idle();
        unsafe { self.device.destroy_device(None) };
    }
}
