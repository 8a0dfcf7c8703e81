// Vertex data and host-visible GPU buffers
//
// The triangle lives in host-visible, host-coherent memory: it is written
// once through a mapping and never flushed.

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use std::sync::Arc;

use super::VulkanDevice;
use crate::error::InitError;

/// Interleaved vertex: position then color
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub color: Vec3,
}

impl Vertex {
    pub const fn new(position: Vec3, color: Vec3) -> Self {
        Self { position, color }
    }

    /// One binding, advanced per vertex
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(std::mem::size_of::<Vertex>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build()
    }

    /// Position at location 0, color at location 1
    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 2] {
        [
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(0)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(std::mem::offset_of!(Vertex, position) as u32)
                .build(),
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(1)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(std::mem::offset_of!(Vertex, color) as u32)
                .build(),
        ]
    }
}

pub const TRIANGLE: [Vertex; 3] = [
    Vertex::new(Vec3::new(0.0, -0.5, 0.0), Vec3::new(1.0, 1.0, 1.0)),
    Vertex::new(Vec3::new(0.5, 0.5, 0.0), Vec3::new(0.0, 1.0, 0.0)),
    Vertex::new(Vec3::new(-0.5, 0.5, 0.0), Vec3::new(0.0, 0.0, 1.0)),
];

/// Lowest memory type index allowed by `type_bits` whose flags include `required`
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..memory_properties.memory_type_count).find(|&i| {
        let allowed = (type_bits & (1 << i)) != 0;
        allowed
            && memory_properties.memory_types[i as usize]
                .property_flags
                .contains(required)
    })
}

/// Copy `data` into the front of a mapped range
pub fn copy_to_mapped<T: Pod>(mapped: &mut [u8], data: &[T]) {
    let bytes: &[u8] = bytemuck::cast_slice(data);
    mapped[..bytes.len()].copy_from_slice(bytes);
}

/// A buffer and the memory bound to it
pub struct HostBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
    device: Arc<VulkanDevice>,
}

impl HostBuffer {
    /// Create a host-visible, host-coherent buffer sized exactly for `data`
    /// and fill it
    pub fn with_data<T: Pod>(
        device: &Arc<VulkanDevice>,
        usage: vk::BufferUsageFlags,
        data: &[T],
    ) -> Result<Self> {
        let size = std::mem::size_of_val(data) as vk::DeviceSize;

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .context("Failed to create buffer")?;

        // From here on `Drop` owns cleanup, including on the error paths below
        let mut host_buffer = Self {
            buffer,
            memory: vk::DeviceMemory::null(),
            size,
            device: device.clone(),
        };

        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };
        let required =
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let memory_type_index = find_memory_type(
            &device.memory_properties,
            requirements.memory_type_bits,
            required,
        )
        .ok_or(InitError::NoSuitableMemoryType {
            type_bits: requirements.memory_type_bits,
            required,
        })?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        host_buffer.memory = unsafe { device.device.allocate_memory(&alloc_info, None) }
            .context("Failed to allocate buffer memory")?;

        unsafe {
            device
                .device
                .bind_buffer_memory(buffer, host_buffer.memory, 0)
                .context("Failed to bind buffer memory")?;

            let ptr = device
                .device
                .map_memory(host_buffer.memory, 0, size, vk::MemoryMapFlags::empty())
                .context("Failed to map buffer memory")?;
            let mapped = std::slice::from_raw_parts_mut(ptr.cast::<u8>(), size as usize);
            copy_to_mapped(mapped, data);
            device.device.unmap_memory(host_buffer.memory);
        }

        Ok(host_buffer)
    }
}

impl Drop for HostBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_buffer(self.buffer, None);
            if self.memory != vk::DeviceMemory::null() {
                self.device.device.free_memory(self.memory, None);
            }
        }
    }
}

/// The triangle's vertex buffer
pub struct VertexBuffer {
    inner: HostBuffer,
    pub vertex_count: u32,
}

impl VertexBuffer {
    pub fn new(device: &Arc<VulkanDevice>, vertices: &[Vertex]) -> Result<Self> {
        let inner = HostBuffer::with_data(device, vk::BufferUsageFlags::VERTEX_BUFFER, vertices)
            .context("Failed to create vertex buffer")?;

        log::info!(
            "Uploaded {} vertices ({} bytes)",
            vertices.len(),
            inner.size
        );

        Ok(Self {
            inner,
            vertex_count: vertices.len() as u32,
        })
    }

    pub fn buffer(&self) -> vk::Buffer {
        self.inner.buffer
    }
}
