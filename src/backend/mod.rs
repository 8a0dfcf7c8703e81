// Backend module - Vulkan abstraction layer
//
// Thin wrappers around ash. Long-lived objects release their handles in
// Drop; child objects hold an `Arc<VulkanDevice>` so the device outlives them.

pub mod buffer;
pub mod command;
pub mod device;
pub mod instance;
pub mod pipeline;
pub mod release;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use buffer::VertexBuffer;
pub use command::CommandPool;
pub use device::VulkanDevice;
pub use instance::Instance;
pub use surface::Surface;
pub use swapchain::{SwapChainContext, SwapChainSet};
pub use sync::{FrameSynchronizer, MAX_FRAMES_IN_FLIGHT};
