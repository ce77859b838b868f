//! # Redact Engine
//!
//! A real-time video redaction engine built on Vulkan compute.
//!
//! The engine pulls frames from a [`capture::FrameSource`], uploads them to a
//! device-local image, runs a block-pixelation compute dispatch over them, and
//! copy-composites the result onto a presentable swapchain image, all driven
//! by a single-threaded per-frame loop in [`runtime::Redactor`].
//!
//! ## Architecture
//!
//! - [`render::vulkan::VulkanContext`]: instance, device/queue selection,
//!   shared command pool; lifetime superset of every other GPU object.
//! - [`render::vulkan::ComputeStage`]: the pixelation pipeline and its
//!   double-buffered binding ring.
//! - [`render::vulkan::PresentationStage`]: window, surface, swapchain, and
//!   the present submission.
//! - [`runtime::Redactor`]: the orchestrator tying the stages together.
//!
//! GPU execution is asynchronous relative to the host: `dispatch` and
//! `present_frame` return once work is *submitted*; completion is observed
//! through the fence protocol at the start of the next cycle that reuses the
//! same resource.

pub mod capture;
pub mod foundation;
pub mod pixelate;
pub mod render;
pub mod runtime;

pub use capture::{Frame, FrameSource, TestPatternSource};
pub use render::vulkan::{VulkanError, VulkanResult};
pub use runtime::{Redactor, RedactorConfig};
