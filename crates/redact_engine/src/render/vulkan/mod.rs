//! Vulkan backend
//!
//! Low-level Vulkan implementation. Every Vulkan object is held by an RAII
//! wrapper whose `Drop` destroys it; containers tear down their members in
//! reverse construction order through field declaration order.

/// Instance, device selection, logical device, and the shared command pool
pub mod context;
/// Command pool and single-time-submit recording
pub mod commands;
/// Compute stage: pixelation pipeline and binding ring
pub mod compute;
/// Framebuffers over the swapchain color views
pub mod framebuffer;
/// Device-local storage images and the host upload path
pub mod image;
/// Presentation stage: surface, swapchain, copy-composite, present
pub mod present;
/// Single-attachment presentation render pass
pub mod render_pass;
/// SPIR-V artifact loading and shader modules
pub mod shader;
/// Display surface wrapper
pub mod surface;
/// Swapchain wrapper and capability selection
pub mod swapchain;
/// Semaphores, fences, and per-cycle frame sync
pub mod sync;
/// GLFW window system wrapper
pub mod window;

pub use commands::CommandPool;
pub use compute::ComputeStage;
pub use context::{LogicalDevice, PhysicalDeviceInfo, VulkanContext, VulkanError, VulkanInstance, VulkanResult};
pub use framebuffer::Framebuffer;
pub use image::{ImageRole, StorageImage};
pub use present::PresentationStage;
pub use render_pass::RenderPass;
pub use shader::ShaderModule;
pub use surface::Surface;
pub use swapchain::Swapchain;
pub use sync::{Fence, FrameSync, Semaphore};
pub use window::{Window, WindowError, WindowSystem};
