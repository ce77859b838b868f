//! Device-local storage images and the host upload path
//!
//! A [`StorageImage`] is a 2D RGBA8 pixel buffer living in device memory,
//! used as a compute-shader storage binding. Each image is exclusively owned
//! by the component that created it; hand-off between stages is always a
//! copy, never a shared reference.

use ash::{vk, Device};

use crate::capture::Frame;
use crate::render::vulkan::context::VulkanContext;
use crate::render::vulkan::{VulkanError, VulkanResult};

/// Pixel format used throughout the pipeline
pub const PIXEL_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Usage role of a storage image within the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageRole {
    /// Read by the compute dispatch; written by the host upload path
    ComputeRead,
    /// Written by the compute dispatch; read by the presentation copy
    ComputeWrite,
}

impl ImageRole {
    fn usage_flags(self) -> vk::ImageUsageFlags {
        match self {
            Self::ComputeRead => {
                vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::TRANSFER_DST
            }
            Self::ComputeWrite => {
                vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::TRANSFER_SRC
            }
        }
    }
}

/// Device-local 2D storage image with RAII cleanup
///
/// The image lives in `GENERAL` layout from creation onward; upload and copy
/// operations barrier in and out of transfer layouts as needed.
pub struct StorageImage {
    device: Device,
    image: vk::Image,
    memory: vk::DeviceMemory,
    image_view: vk::ImageView,
    extent: vk::Extent2D,
    role: ImageRole,
}

impl StorageImage {
    /// Create a device-local storage image and transition it to `GENERAL`.
    pub fn new(
        ctx: &VulkanContext,
        width: u32,
        height: u32,
        role: ImageRole,
    ) -> VulkanResult<Self> {
        let device = ctx.raw_device();
        let extent = vk::Extent2D { width, height };

        let image_create_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(PIXEL_FORMAT)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(role.usage_flags())
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1);

        let image = unsafe {
            device
                .create_image(&image_create_info, None)
                .map_err(VulkanError::Api)?
        };

        let memory_requirements = unsafe { device.get_image_memory_requirements(image) };
        let memory_type_index = match ctx.find_memory_type(
            memory_requirements.memory_type_bits,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ) {
            Ok(index) => index,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(memory_requirements.size)
            .memory_type_index(memory_type_index);

        let memory = match unsafe { device.allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(VulkanError::Api(e));
            }
        };

        if let Err(e) = unsafe { device.bind_image_memory(image, memory, 0) } {
            unsafe {
                device.destroy_image(image, None);
                device.free_memory(memory, None);
            }
            return Err(VulkanError::Api(e));
        }

        let view_create_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(PIXEL_FORMAT)
            .subresource_range(color_subresource_range());

        let image_view = match unsafe { device.create_image_view(&view_create_info, None) } {
            Ok(view) => view,
            Err(e) => {
                unsafe {
                    device.destroy_image(image, None);
                    device.free_memory(memory, None);
                }
                return Err(VulkanError::Api(e));
            }
        };

        let storage = Self {
            device,
            image,
            memory,
            image_view,
            extent,
            role,
        };

        // Storage bindings require GENERAL layout; do the one-time transition
        // now so dispatch recording never sees UNDEFINED.
        ctx.command_pool
            .submit_single_time(ctx.compute_queue(), |device, cb| {
                let barrier = vk::ImageMemoryBarrier::builder()
                    .old_layout(vk::ImageLayout::UNDEFINED)
                    .new_layout(vk::ImageLayout::GENERAL)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(storage.image)
                    .subresource_range(color_subresource_range())
                    .src_access_mask(vk::AccessFlags::empty())
                    .dst_access_mask(
                        vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
                    );

                unsafe {
                    device.cmd_pipeline_barrier(
                        cb,
                        vk::PipelineStageFlags::TOP_OF_PIPE,
                        vk::PipelineStageFlags::COMPUTE_SHADER,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[],
                        &[barrier.build()],
                    );
                }
            })?;

        Ok(storage)
    }

    /// Upload a host frame into the image through a staging buffer.
    ///
    /// The frame's dimensions must match the image; the row stride is
    /// honored during the copy. Blocks until the transfer completes, so the
    /// frame may be discarded immediately afterwards.
    pub fn upload(&self, ctx: &VulkanContext, frame: &Frame) -> VulkanResult<()> {
        if self.role != ImageRole::ComputeRead {
            return Err(VulkanError::Initialization(
                "upload target must be a compute-readable image".to_string(),
            ));
        }
        if frame.width != self.extent.width || frame.height != self.extent.height {
            return Err(VulkanError::Initialization(format!(
                "frame size {}x{} does not match image {}x{}",
                frame.width, frame.height, self.extent.width, self.extent.height
            )));
        }
        let expected_bytes = frame.stride as usize * frame.height as usize;
        if frame.data.len() < expected_bytes {
            return Err(VulkanError::Initialization(format!(
                "frame buffer holds {} bytes, stride/height imply {}",
                frame.data.len(),
                expected_bytes
            )));
        }

        let device = &self.device;
        let row_bytes = self.extent.width as usize * 4;
        let tight_size = (row_bytes * self.extent.height as usize) as vk::DeviceSize;

        // Staging buffer, host visible and coherent.
        let buffer_create_info = vk::BufferCreateInfo::builder()
            .size(tight_size)
            .usage(vk::BufferUsageFlags::TRANSFER_SRC)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let staging_buffer = unsafe {
            device
                .create_buffer(&buffer_create_info, None)
                .map_err(VulkanError::Api)?
        };

        let staging = (|| {
            let memory_requirements =
                unsafe { device.get_buffer_memory_requirements(staging_buffer) };
            let memory_type_index = ctx.find_memory_type(
                memory_requirements.memory_type_bits,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )?;

            let alloc_info = vk::MemoryAllocateInfo::builder()
                .allocation_size(memory_requirements.size)
                .memory_type_index(memory_type_index);

            let staging_memory = unsafe {
                device
                    .allocate_memory(&alloc_info, None)
                    .map_err(VulkanError::Api)?
            };

            if let Err(e) = unsafe { device.bind_buffer_memory(staging_buffer, staging_memory, 0) }
            {
                unsafe { device.free_memory(staging_memory, None) };
                return Err(VulkanError::Api(e));
            }
            Ok(staging_memory)
        })();

        let staging_memory = match staging {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_buffer(staging_buffer, None) };
                return Err(e);
            }
        };

        let result = self.copy_frame_through_staging(ctx, frame, staging_buffer, staging_memory, row_bytes, tight_size);

        unsafe {
            device.destroy_buffer(staging_buffer, None);
            device.free_memory(staging_memory, None);
        }

        result
    }

    fn copy_frame_through_staging(
        &self,
        ctx: &VulkanContext,
        frame: &Frame,
        staging_buffer: vk::Buffer,
        staging_memory: vk::DeviceMemory,
        row_bytes: usize,
        tight_size: vk::DeviceSize,
    ) -> VulkanResult<()> {
        let device = &self.device;

        unsafe {
            let dst = device
                .map_memory(staging_memory, 0, tight_size, vk::MemoryMapFlags::empty())
                .map_err(VulkanError::Api)? as *mut u8;

            if frame.stride as usize == row_bytes {
                std::ptr::copy_nonoverlapping(frame.data.as_ptr(), dst, tight_size as usize);
            } else {
                // Source rows are padded; pack them tight in the staging copy.
                for y in 0..self.extent.height as usize {
                    let src_row = &frame.data[y * frame.stride as usize..][..row_bytes];
                    std::ptr::copy_nonoverlapping(
                        src_row.as_ptr(),
                        dst.add(y * row_bytes),
                        row_bytes,
                    );
                }
            }
            device.unmap_memory(staging_memory);
        }

        let image = self.image;
        let extent = self.extent;
        ctx.command_pool
            .submit_single_time(ctx.compute_queue(), |device, cb| {
                let to_transfer = vk::ImageMemoryBarrier::builder()
                    .old_layout(vk::ImageLayout::GENERAL)
                    .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(image)
                    .subresource_range(color_subresource_range())
                    .src_access_mask(vk::AccessFlags::SHADER_READ)
                    .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE);

                let region = vk::BufferImageCopy::builder()
                    .buffer_offset(0)
                    .buffer_row_length(0)
                    .buffer_image_height(0)
                    .image_subresource(vk::ImageSubresourceLayers {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level: 0,
                        base_array_layer: 0,
                        layer_count: 1,
                    })
                    .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
                    .image_extent(vk::Extent3D {
                        width: extent.width,
                        height: extent.height,
                        depth: 1,
                    });

                let to_general = vk::ImageMemoryBarrier::builder()
                    .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .new_layout(vk::ImageLayout::GENERAL)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(image)
                    .subresource_range(color_subresource_range())
                    .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                    .dst_access_mask(vk::AccessFlags::SHADER_READ);

                unsafe {
                    device.cmd_pipeline_barrier(
                        cb,
                        vk::PipelineStageFlags::COMPUTE_SHADER,
                        vk::PipelineStageFlags::TRANSFER,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[],
                        &[to_transfer.build()],
                    );
                    device.cmd_copy_buffer_to_image(
                        cb,
                        staging_buffer,
                        image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[region.build()],
                    );
                    device.cmd_pipeline_barrier(
                        cb,
                        vk::PipelineStageFlags::TRANSFER,
                        vk::PipelineStageFlags::COMPUTE_SHADER,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[],
                        &[to_general.build()],
                    );
                }
            })
    }

    /// Get the image handle
    pub fn image(&self) -> vk::Image {
        self.image
    }

    /// Get the image view for descriptor binding
    pub fn image_view(&self) -> vk::ImageView {
        self.image_view
    }

    /// Image dimensions
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Usage role assigned at creation
    pub fn role(&self) -> ImageRole {
        self.role
    }
}

impl Drop for StorageImage {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.image_view, None);
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

/// Single-mip, single-layer color subresource range
pub(crate) fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}
