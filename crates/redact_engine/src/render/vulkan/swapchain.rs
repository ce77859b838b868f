//! Vulkan swapchain management
//!
//! Swap images are created with transfer-destination usage because the
//! presentation path is a copy composite, not a rasterized draw. The window
//! is fixed size, so there is no recreation path.

use ash::vk;

use crate::render::vulkan::context::VulkanContext;
use crate::render::vulkan::image::color_subresource_range;
use crate::render::vulkan::surface::Surface;
use crate::render::vulkan::{VulkanError, VulkanResult};

/// Prefer an 8-bit RGBA format with a non-linear (display-referred) color
/// space; fall back to the first reported format.
pub(crate) fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    let is_rgba8 = |format: vk::Format| {
        matches!(
            format,
            vk::Format::R8G8B8A8_UNORM
                | vk::Format::B8G8R8A8_UNORM
                | vk::Format::R8G8B8A8_SRGB
                | vk::Format::B8G8R8A8_SRGB
        )
    };

    formats
        .iter()
        .find(|sf| is_rgba8(sf.format) && sf.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        .copied()
        .unwrap_or(formats[0])
}

/// MAILBOX (low-latency, tearing-free) if offered, else FIFO, which every
/// conformant surface supports.
pub(crate) fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    modes
        .iter()
        .copied()
        .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// `min + 1` images, clamped by `max` when the surface bounds it
/// (`max == 0` means unbounded).
pub(crate) fn choose_image_count(min_image_count: u32, max_image_count: u32) -> u32 {
    let preferred = min_image_count + 1;
    if max_image_count > 0 {
        preferred.min(max_image_count)
    } else {
        preferred
    }
}

/// Swapchain wrapper with RAII cleanup
pub struct Swapchain {
    device: ash::Device,
    swapchain_loader: ash::extensions::khr::Swapchain,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Create a swapchain for the fixed-size surface.
    pub fn new(ctx: &VulkanContext, surface: &Surface, window_extent: vk::Extent2D) -> VulkanResult<Self> {
        let device = ctx.raw_device();
        let swapchain_loader = ctx.swapchain_loader().clone();
        let physical_device = ctx.physical_device.device;

        let surface_caps = surface.capabilities(physical_device)?;
        let surface_formats = surface.formats(physical_device)?;
        if surface_formats.is_empty() {
            return Err(VulkanError::Initialization(
                "surface reports no formats".to_string(),
            ));
        }
        let present_modes = surface.present_modes(physical_device)?;

        let format = choose_surface_format(&surface_formats);
        let present_mode = choose_present_mode(&present_modes);
        let image_count =
            choose_image_count(surface_caps.min_image_count, surface_caps.max_image_count);

        let extent = if surface_caps.current_extent.width != u32::MAX {
            surface_caps.current_extent
        } else {
            vk::Extent2D {
                width: window_extent.width.clamp(
                    surface_caps.min_image_extent.width,
                    surface_caps.max_image_extent.width,
                ),
                height: window_extent.height.clamp(
                    surface_caps.min_image_extent.height,
                    surface_caps.max_image_extent.height,
                ),
            }
        };

        log::debug!(
            "Swapchain: {} images, {:?}/{:?}, mode {:?}, {}x{}",
            image_count,
            format.format,
            format.color_space,
            present_mode,
            extent.width,
            extent.height
        );

        let swapchain_create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.handle())
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            // The processed frame is blitted in by copy, then presented.
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        let swapchain = unsafe {
            swapchain_loader
                .create_swapchain(&swapchain_create_info, None)
                .map_err(VulkanError::Api)?
        };

        let images = unsafe {
            swapchain_loader
                .get_swapchain_images(swapchain)
                .map_err(VulkanError::Api)?
        };

        // One view per image.
        let image_views: Result<Vec<_>, _> = images
            .iter()
            .map(|&image| {
                let create_info = vk::ImageViewCreateInfo::builder()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(format.format)
                    .components(vk::ComponentMapping {
                        r: vk::ComponentSwizzle::IDENTITY,
                        g: vk::ComponentSwizzle::IDENTITY,
                        b: vk::ComponentSwizzle::IDENTITY,
                        a: vk::ComponentSwizzle::IDENTITY,
                    })
                    .subresource_range(color_subresource_range());

                unsafe { device.create_image_view(&create_info, None) }
            })
            .collect();

        let image_views = match image_views {
            Ok(views) => views,
            Err(e) => {
                unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(VulkanError::Api(e));
            }
        };

        Ok(Self {
            device,
            swapchain_loader,
            swapchain,
            images,
            image_views,
            format,
            extent,
        })
    }

    /// Get swapchain extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Get surface format
    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    /// Get swapchain images
    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    /// Get image views
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    /// Get swapchain handle
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Get the swapchain extension loader
    pub fn loader(&self) -> &ash::extensions::khr::Swapchain {
        &self.swapchain_loader
    }

    /// Get image count
    pub fn image_count(&self) -> usize {
        self.images.len()
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &image_view in &self.image_views {
                self.device.destroy_image_view(image_view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_count_min_plus_one_when_unbounded() {
        // max == 0 reports an unbounded surface.
        assert_eq!(choose_image_count(2, 0), 3);
        assert_eq!(choose_image_count(1, 0), 2);
    }

    #[test]
    fn test_image_count_clamped_by_max() {
        assert_eq!(choose_image_count(2, 2), 2);
        assert_eq!(choose_image_count(2, 3), 3);
        assert_eq!(choose_image_count(3, 8), 4);
    }

    #[test]
    fn test_image_count_within_reported_bounds() {
        for min in 1..5u32 {
            for max in [0u32, min, min + 1, min + 5] {
                let count = choose_image_count(min, max);
                assert!(count >= min);
                if max > 0 {
                    assert!(count <= max);
                } else {
                    assert_eq!(count, min + 1);
                }
            }
        }
    }

    fn surface_format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    #[test]
    fn test_format_prefers_rgba8_nonlinear() {
        let formats = [
            surface_format(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            surface_format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(choose_surface_format(&formats).format, vk::Format::B8G8R8A8_UNORM);
    }

    #[test]
    fn test_format_falls_back_to_first_reported() {
        let formats = [
            surface_format(vk::Format::R5G6B5_UNORM_PACK16, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            surface_format(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
        ];
        let chosen = choose_surface_format(&formats);
        assert_eq!(chosen.format, vk::Format::R5G6B5_UNORM_PACK16);
    }

    #[test]
    fn test_present_mode_prefers_mailbox_else_fifo() {
        assert_eq!(
            choose_present_mode(&[
                vk::PresentModeKHR::FIFO,
                vk::PresentModeKHR::MAILBOX,
                vk::PresentModeKHR::IMMEDIATE,
            ]),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE]),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(choose_present_mode(&[]), vk::PresentModeKHR::FIFO);
    }
}
