//! Rendering and GPU compute layer
//!
//! Everything device-facing lives under [`vulkan`]; the rest of the crate
//! only sees the stage types and the shared error/result aliases re-exported
//! here.

pub mod vulkan;

pub use vulkan::{
    ComputeStage, PresentationStage, StorageImage, VulkanContext, VulkanError, VulkanResult,
};
