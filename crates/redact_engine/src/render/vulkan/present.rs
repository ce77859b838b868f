//! Presentation stage: surface ownership and the copy-composite present path
//!
//! Per presentation cycle the stage walks Idle -> Acquiring -> Recording ->
//! Submitted -> Presented -> Idle. Exactly one cycle is ever in flight,
//! guarded by the single pre-signaled in-flight fence: it is waited on and
//! reset before the acquired image's command buffer is re-recorded.

use ash::{vk, Device};

use crate::render::vulkan::context::VulkanContext;
use crate::render::vulkan::framebuffer::Framebuffer;
use crate::render::vulkan::image::{color_subresource_range, ImageRole, StorageImage};
use crate::render::vulkan::render_pass::RenderPass;
use crate::render::vulkan::surface::Surface;
use crate::render::vulkan::swapchain::Swapchain;
use crate::render::vulkan::sync::FrameSync;
use crate::render::vulkan::window::{Window, WindowSystem};
use crate::render::vulkan::{VulkanError, VulkanResult};

/// Owns the window, surface, swapchain, and present submission.
///
/// Field declaration order is teardown order: sync primitives, framebuffers,
/// render pass, swapchain (views first), surface, window, the strict reverse
/// of construction. `Drop` blocks on device idle before any of that runs, so
/// no recorded command is still executing when resources go away.
pub struct PresentationStage {
    sync: FrameSync,
    framebuffers: Vec<Framebuffer>,
    render_pass: RenderPass,
    swapchain: Swapchain,
    surface: Surface,
    window: Window,
    command_buffers: Vec<vk::CommandBuffer>,
    device: Device,
    present_queue: vk::Queue,
}

impl PresentationStage {
    /// Open the fixed-size window and build the presentation chain.
    pub fn new(
        ctx: &VulkanContext,
        window_system: WindowSystem,
        width: u32,
        height: u32,
        title: &str,
    ) -> VulkanResult<Self> {
        let device = ctx.raw_device();
        let mut window = window_system.into_window(title, width, height)?;
        let surface = Surface::new(ctx, &mut window)?;

        let (fb_width, fb_height) = window.framebuffer_size();
        let swapchain = Swapchain::new(
            ctx,
            &surface,
            vk::Extent2D {
                width: fb_width,
                height: fb_height,
            },
        )?;

        let render_pass =
            RenderPass::new_present_pass(device.clone(), swapchain.format().format)?;

        // One framebuffer per swap image.
        let framebuffers: VulkanResult<Vec<Framebuffer>> = swapchain
            .image_views()
            .iter()
            .map(|&view| {
                Framebuffer::new(
                    device.clone(),
                    render_pass.handle(),
                    &[view],
                    swapchain.extent(),
                )
            })
            .collect();
        let framebuffers = framebuffers?;

        // One command buffer per swap image, from the shared pool.
        let command_buffers = ctx
            .command_pool
            .allocate_command_buffers(swapchain.image_count() as u32)?;

        let sync = FrameSync::new(device.clone())?;

        log::info!(
            "Presentation stage initialized ({}x{}, {} swap images)",
            width,
            height,
            swapchain.image_count()
        );

        Ok(Self {
            sync,
            framebuffers,
            render_pass,
            swapchain,
            surface,
            window,
            command_buffers,
            device,
            present_queue: ctx.present_queue(),
        })
    }

    /// Poll the platform event queue once and report any close request.
    pub fn should_close(&mut self) -> bool {
        self.window.poll_events();
        self.window.should_close()
    }

    /// Copy-composite the processed image onto the next swap image and
    /// present it.
    ///
    /// Returns `Ok(false)` without touching the device when a close request
    /// is already pending; `Ok(true)` once the present request is issued.
    pub fn present_frame(&mut self, processed: &StorageImage) -> VulkanResult<bool> {
        if self.window.should_close() {
            return Ok(false);
        }

        if processed.role() != ImageRole::ComputeWrite {
            return Err(VulkanError::Initialization(
                "presented image must be the compute-writable output".to_string(),
            ));
        }
        let extent = self.swapchain.extent();
        let src_extent = processed.extent();
        if src_extent.width != extent.width || src_extent.height != extent.height {
            // No scaling is performed on this path.
            return Err(VulkanError::Initialization(format!(
                "processed image {}x{} does not match swap extent {}x{}",
                src_extent.width, src_extent.height, extent.width, extent.height
            )));
        }

        // Only one cycle in flight: reclaim the previous one first.
        self.sync.in_flight.wait(u64::MAX)?;
        self.sync.in_flight.reset()?;

        // Acquiring: indefinite wait for the next swap image.
        let (image_index, _suboptimal) = unsafe {
            self.swapchain
                .loader()
                .acquire_next_image(
                    self.swapchain.handle(),
                    u64::MAX,
                    self.sync.image_available.handle(),
                    vk::Fence::null(),
                )
                .map_err(VulkanError::Api)?
        };

        // Recording: transition, copy, transition to presentable.
        let command_buffer = self.command_buffers[image_index as usize];
        self.record_copy(command_buffer, processed, self.swapchain.images()[image_index as usize])?;

        // Submitted: wait for the acquired image at the stage that first
        // touches it, signal both completion primitives.
        let wait_semaphores = [self.sync.image_available.handle()];
        let wait_stages = [vk::PipelineStageFlags::TRANSFER];
        let command_buffers = [command_buffer];
        let signal_semaphores = [self.sync.render_finished.handle()];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .queue_submit(
                    self.present_queue,
                    &[submit_info.build()],
                    self.sync.in_flight.handle(),
                )
                .map_err(VulkanError::Submission)?;
        }

        // Presented: the request waits on render completion.
        let wait_semaphores = [self.sync.render_finished.handle()];
        let swapchains = [self.swapchain.handle()];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe {
            self.swapchain
                .loader()
                .queue_present(self.present_queue, &present_info)
                .map_err(VulkanError::Submission)?;
        }

        Ok(true)
    }

    fn record_copy(
        &self,
        command_buffer: vk::CommandBuffer,
        processed: &StorageImage,
        swap_image: vk::Image,
    ) -> VulkanResult<()> {
        let extent = self.swapchain.extent();
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            self.device
                .begin_command_buffer(command_buffer, &begin_info)
                .map_err(VulkanError::Api)?;

            // Compute write on the processed image must land before the copy
            // reads it; the swap image moves into transfer-destination layout.
            let src_barrier = vk::ImageMemoryBarrier::builder()
                .old_layout(vk::ImageLayout::GENERAL)
                .new_layout(vk::ImageLayout::GENERAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(processed.image())
                .subresource_range(color_subresource_range())
                .src_access_mask(vk::AccessFlags::SHADER_WRITE)
                .dst_access_mask(vk::AccessFlags::TRANSFER_READ)
                .build();
            let dst_barrier = vk::ImageMemoryBarrier::builder()
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(swap_image)
                .subresource_range(color_subresource_range())
                .src_access_mask(vk::AccessFlags::empty())
                .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .build();

            self.device.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[src_barrier, dst_barrier],
            );

            // Region copy; dimensions already match, no scaling.
            let subresource = vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            };
            let region = vk::ImageCopy::builder()
                .src_subresource(subresource)
                .src_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
                .dst_subresource(subresource)
                .dst_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
                .extent(vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                });

            self.device.cmd_copy_image(
                command_buffer,
                processed.image(),
                vk::ImageLayout::GENERAL,
                swap_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region.build()],
            );

            let present_barrier = vk::ImageMemoryBarrier::builder()
                .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(swap_image)
                .subresource_range(color_subresource_range())
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::empty())
                .build();

            self.device.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[present_barrier],
            );

            self.device
                .end_command_buffer(command_buffer)
                .map_err(VulkanError::Api)
        }
    }

    /// Swapchain extent
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    /// The display surface
    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    /// Number of swap images
    pub fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    /// Render pass over the swapchain color attachment
    pub fn render_pass(&self) -> &RenderPass {
        &self.render_pass
    }

    /// Framebuffers, one per swap image
    pub fn framebuffers(&self) -> &[Framebuffer] {
        &self.framebuffers
    }

    /// Block until the device is fully idle.
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe {
            self.device
                .device_wait_idle()
                .map_err(VulkanError::Api)
        }
    }
}

impl Drop for PresentationStage {
    fn drop(&mut self) {
        // Guarantee no recorded command is still executing, then let the
        // fields tear down in declaration order.
        unsafe {
            let _ = self.device.device_wait_idle();
        }
    }
}
