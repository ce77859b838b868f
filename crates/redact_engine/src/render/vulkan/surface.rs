//! Display surface wrapper
//!
//! Owns the `VkSurfaceKHR` and its extension loader. Dropped after the
//! swapchain but before the window, per the presentation teardown order.

use ash::extensions::khr::Surface as SurfaceLoader;
use ash::vk;

use crate::render::vulkan::context::VulkanContext;
use crate::render::vulkan::window::Window;
use crate::render::vulkan::{VulkanError, VulkanResult};

/// Surface wrapper with RAII cleanup
pub struct Surface {
    loader: SurfaceLoader,
    surface: vk::SurfaceKHR,
}

impl Surface {
    /// Create a surface for the window.
    pub fn new(ctx: &VulkanContext, window: &mut Window) -> VulkanResult<Self> {
        let loader = ctx.surface_loader();
        let surface = window.create_vulkan_surface(ctx.instance().handle())?;
        Ok(Self { loader, surface })
    }

    /// Get the surface handle
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Query surface capabilities for a physical device.
    pub fn capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> VulkanResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.loader
                .get_physical_device_surface_capabilities(physical_device, self.surface)
                .map_err(VulkanError::Api)
        }
    }

    /// Query supported surface formats.
    pub fn formats(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> VulkanResult<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.loader
                .get_physical_device_surface_formats(physical_device, self.surface)
                .map_err(VulkanError::Api)
        }
    }

    /// Query supported present modes.
    pub fn present_modes(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> VulkanResult<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.loader
                .get_physical_device_surface_present_modes(physical_device, self.surface)
                .map_err(VulkanError::Api)
        }
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.surface, None);
        }
    }
}
