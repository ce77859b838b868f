//! Compute stage: the pixelation dispatch and its binding ring
//!
//! The stage owns the compiled pixelation program, a binding-set ring of
//! configurable depth (default 2), and the dispatch submission path. Each
//! ring slot carries its own descriptor set, command buffer, and completion
//! fence, so the host can record slot `N` while the device may still be
//! executing slot `N - 1`. A slot's fence is waited on and reset before its
//! command buffer is re-recorded; that wait is the only thing standing
//! between the host and a write-after-read hazard on the slot's bindings.

use ash::{vk, Device};
use std::ffi::CStr;

use crate::render::vulkan::context::VulkanContext;
use crate::render::vulkan::image::{color_subresource_range, StorageImage};
use crate::render::vulkan::shader::{load_spirv, ShaderModule};
use crate::render::vulkan::sync::Fence;
use crate::render::vulkan::{VulkanError, VulkanResult};

/// Fixed well-known path of the compiled pixelation program
pub const SHADER_ARTIFACT_PATH: &str = "shaders/pixelation.comp.spv";

/// Default binding-set ring depth (double buffering)
pub const DEFAULT_RING_DEPTH: usize = 2;

/// Round-robin slot selection: `frame_index mod ring_depth`.
pub(crate) fn ring_slot_index(frame_index: u64, ring_depth: usize) -> usize {
    (frame_index % ring_depth as u64) as usize
}

/// Workgroups needed to cover `extent_px` pixels in `block`-sized tiles,
/// rounding up so a partial trailing tile gets its own group.
pub(crate) fn dispatch_group_count(extent_px: u32, block: u32) -> u32 {
    let block = block.max(1);
    (extent_px + block - 1) / block
}

/// One ring slot: bindings, recording storage, and its completion fence
struct BindingSlot {
    descriptor_set: vk::DescriptorSet,
    command_buffer: vk::CommandBuffer,
    fence: Fence,
}

/// Pixelation compute stage with a double-buffered binding ring
pub struct ComputeStage {
    device: Device,
    queue: vk::Queue,
    extent: vk::Extent2D,
    ring: Vec<BindingSlot>,
    descriptor_pool: vk::DescriptorPool,
    pipeline: vk::Pipeline,
    pipeline_layout: vk::PipelineLayout,
    descriptor_set_layout: vk::DescriptorSetLayout,
    frame_index: u64,
}

impl ComputeStage {
    /// Build the stage for a fixed frame size.
    ///
    /// The shader artifact is loaded and validated before any Vulkan object
    /// is created, so a missing or malformed artifact fails without leaving
    /// pipeline, layout, or descriptor state behind.
    pub fn new(
        ctx: &VulkanContext,
        width: u32,
        height: u32,
        ring_depth: usize,
    ) -> VulkanResult<Self> {
        let ring_depth = ring_depth.max(1);

        // Fail-fast path: nothing device-side exists until this succeeds.
        let words = load_spirv(SHADER_ARTIFACT_PATH)?;

        let device = ctx.raw_device();
        let shader = ShaderModule::from_words(device.clone(), &words)?;

        // Exactly two storage-image bindings: 0 = input, 1 = output.
        let bindings = [
            vk::DescriptorSetLayoutBinding::builder()
                .binding(0)
                .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::COMPUTE)
                .build(),
            vk::DescriptorSetLayoutBinding::builder()
                .binding(1)
                .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::COMPUTE)
                .build(),
        ];

        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        let descriptor_set_layout = unsafe {
            device
                .create_descriptor_set_layout(&layout_info, None)
                .map_err(VulkanError::Api)?
        };

        let built = Self::build_pipeline_and_ring(
            ctx,
            &device,
            &shader,
            descriptor_set_layout,
            ring_depth,
        );

        let (pipeline_layout, pipeline, descriptor_pool, ring) = match built {
            Ok(parts) => parts,
            Err(e) => {
                unsafe { device.destroy_descriptor_set_layout(descriptor_set_layout, None) };
                return Err(e);
            }
        };

        log::info!("Compute stage initialized ({}x{}, ring depth {})", width, height, ring_depth);
        Ok(Self {
            device,
            queue: ctx.compute_queue(),
            extent: vk::Extent2D { width, height },
            ring,
            descriptor_pool,
            pipeline,
            pipeline_layout,
            descriptor_set_layout,
            frame_index: 0,
        })
    }

    #[allow(clippy::type_complexity)]
    fn build_pipeline_and_ring(
        ctx: &VulkanContext,
        device: &Device,
        shader: &ShaderModule,
        descriptor_set_layout: vk::DescriptorSetLayout,
        ring_depth: usize,
    ) -> VulkanResult<(
        vk::PipelineLayout,
        vk::Pipeline,
        vk::DescriptorPool,
        Vec<BindingSlot>,
    )> {
        // Block size reaches the shader as a single u32 push constant.
        let push_range = vk::PushConstantRange::builder()
            .stage_flags(vk::ShaderStageFlags::COMPUTE)
            .offset(0)
            .size(std::mem::size_of::<u32>() as u32)
            .build();

        let set_layouts = [descriptor_set_layout];
        let push_ranges = [push_range];
        let pipeline_layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_ranges);

        let pipeline_layout = unsafe {
            device
                .create_pipeline_layout(&pipeline_layout_info, None)
                .map_err(VulkanError::Api)?
        };

        let entry_point = CStr::from_bytes_with_nul(b"main\0").expect("static entry point");
        let stage_info = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(shader.handle())
            .name(entry_point)
            .build();

        let pipeline_info = vk::ComputePipelineCreateInfo::builder()
            .stage(stage_info)
            .layout(pipeline_layout)
            .build();

        let pipeline = match unsafe {
            device.create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        } {
            Ok(pipelines) => pipelines[0],
            Err((_, e)) => {
                unsafe { device.destroy_pipeline_layout(pipeline_layout, None) };
                return Err(VulkanError::Api(e));
            }
        };

        // Pool sized for the whole ring: two storage images per set.
        let pool_sizes = [vk::DescriptorPoolSize::builder()
            .ty(vk::DescriptorType::STORAGE_IMAGE)
            .descriptor_count(2 * ring_depth as u32)
            .build()];
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&pool_sizes)
            .max_sets(ring_depth as u32);

        let descriptor_pool = match unsafe { device.create_descriptor_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(e) => {
                unsafe {
                    device.destroy_pipeline(pipeline, None);
                    device.destroy_pipeline_layout(pipeline_layout, None);
                }
                return Err(VulkanError::Api(e));
            }
        };

        let ring = Self::allocate_ring(ctx, device, descriptor_set_layout, descriptor_pool, ring_depth);
        let ring = match ring {
            Ok(ring) => ring,
            Err(e) => {
                unsafe {
                    device.destroy_descriptor_pool(descriptor_pool, None);
                    device.destroy_pipeline(pipeline, None);
                    device.destroy_pipeline_layout(pipeline_layout, None);
                }
                return Err(e);
            }
        };

        Ok((pipeline_layout, pipeline, descriptor_pool, ring))
    }

    fn allocate_ring(
        ctx: &VulkanContext,
        device: &Device,
        descriptor_set_layout: vk::DescriptorSetLayout,
        descriptor_pool: vk::DescriptorPool,
        ring_depth: usize,
    ) -> VulkanResult<Vec<BindingSlot>> {
        let layouts = vec![descriptor_set_layout; ring_depth];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(descriptor_pool)
            .set_layouts(&layouts);

        let descriptor_sets = unsafe {
            device
                .allocate_descriptor_sets(&alloc_info)
                .map_err(VulkanError::Api)?
        };

        let command_buffers = ctx
            .command_pool
            .allocate_command_buffers(ring_depth as u32)?;

        descriptor_sets
            .into_iter()
            .zip(command_buffers)
            .map(|(descriptor_set, command_buffer)| {
                // Pre-signaled so the first wait on each slot never blocks.
                let fence = Fence::new(device.clone(), true)?;
                Ok(BindingSlot {
                    descriptor_set,
                    command_buffer,
                    fence,
                })
            })
            .collect()
    }

    /// Record and submit one pixelation dispatch; returns once submitted.
    ///
    /// Asynchronous relative to the device: completion is only observed when
    /// this slot comes around again. Ordering against the presentation copy
    /// is the orchestrator's responsibility (same-queue submission order plus
    /// the barriers recorded here and in the present path).
    pub fn dispatch(
        &mut self,
        input: &StorageImage,
        output: &StorageImage,
        block_size: u32,
    ) -> VulkanResult<()> {
        let slot_index = ring_slot_index(self.frame_index, self.ring.len());
        let slot = &self.ring[slot_index];

        // Reuse gate: the command buffer must not still be executing.
        slot.fence.wait(u64::MAX)?;
        slot.fence.reset()?;

        self.write_binding_set(slot.descriptor_set, input, output);
        self.record_dispatch(slot, input, output, block_size)?;

        let command_buffers = [slot.command_buffer];
        let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);
        unsafe {
            self.device
                .queue_submit(self.queue, &[submit_info.build()], slot.fence.handle())
                .map_err(VulkanError::Submission)?;
        }

        self.frame_index += 1;
        Ok(())
    }

    fn write_binding_set(
        &self,
        descriptor_set: vk::DescriptorSet,
        input: &StorageImage,
        output: &StorageImage,
    ) {
        let input_info = [vk::DescriptorImageInfo {
            sampler: vk::Sampler::null(),
            image_view: input.image_view(),
            image_layout: vk::ImageLayout::GENERAL,
        }];
        let output_info = [vk::DescriptorImageInfo {
            sampler: vk::Sampler::null(),
            image_view: output.image_view(),
            image_layout: vk::ImageLayout::GENERAL,
        }];

        let writes = [
            vk::WriteDescriptorSet::builder()
                .dst_set(descriptor_set)
                .dst_binding(0)
                .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                .image_info(&input_info)
                .build(),
            vk::WriteDescriptorSet::builder()
                .dst_set(descriptor_set)
                .dst_binding(1)
                .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                .image_info(&output_info)
                .build(),
        ];

        unsafe {
            self.device.update_descriptor_sets(&writes, &[]);
        }
    }

    fn record_dispatch(
        &self,
        slot: &BindingSlot,
        input: &StorageImage,
        output: &StorageImage,
        block_size: u32,
    ) -> VulkanResult<()> {
        let cb = slot.command_buffer;
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            self.device
                .begin_command_buffer(cb, &begin_info)
                .map_err(VulkanError::Api)?;

            // Make the upload visible to shader reads, and order this write
            // pass after any still-pending presentation copy of the output.
            let input_barrier = vk::ImageMemoryBarrier::builder()
                .old_layout(vk::ImageLayout::GENERAL)
                .new_layout(vk::ImageLayout::GENERAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(input.image())
                .subresource_range(color_subresource_range())
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::SHADER_READ)
                .build();
            let output_barrier = vk::ImageMemoryBarrier::builder()
                .old_layout(vk::ImageLayout::GENERAL)
                .new_layout(vk::ImageLayout::GENERAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(output.image())
                .subresource_range(color_subresource_range())
                .src_access_mask(vk::AccessFlags::TRANSFER_READ)
                .dst_access_mask(vk::AccessFlags::SHADER_WRITE)
                .build();

            self.device.cmd_pipeline_barrier(
                cb,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[input_barrier, output_barrier],
            );

            self.device
                .cmd_bind_pipeline(cb, vk::PipelineBindPoint::COMPUTE, self.pipeline);
            self.device.cmd_bind_descriptor_sets(
                cb,
                vk::PipelineBindPoint::COMPUTE,
                self.pipeline_layout,
                0,
                &[slot.descriptor_set],
                &[],
            );
            self.device.cmd_push_constants(
                cb,
                self.pipeline_layout,
                vk::ShaderStageFlags::COMPUTE,
                0,
                &block_size.max(1).to_ne_bytes(),
            );

            // One workgroup per tile; trailing partial tiles clamp in-shader.
            self.device.cmd_dispatch(
                cb,
                dispatch_group_count(self.extent.width, block_size),
                dispatch_group_count(self.extent.height, block_size),
                1,
            );

            self.device.end_command_buffer(cb).map_err(VulkanError::Api)
        }
    }

    /// Binding set that dispatch number `frame_index` uses (pure lookup).
    pub fn binding_set(&self, frame_index: u64) -> vk::DescriptorSet {
        self.ring[ring_slot_index(frame_index, self.ring.len())].descriptor_set
    }

    /// Configured ring depth
    pub fn ring_depth(&self) -> usize {
        self.ring.len()
    }

    /// Number of dispatches submitted so far
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }
}

impl Drop for ComputeStage {
    fn drop(&mut self) {
        // Every slot's submission must have retired before its command
        // buffer and bindings go away.
        for slot in &self.ring {
            let _ = slot.fence.wait(u64::MAX);
        }
        unsafe {
            self.device.destroy_descriptor_pool(self.descriptor_pool, None);
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.pipeline_layout, None);
            self.device
                .destroy_descriptor_set_layout(self.descriptor_set_layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_selection_is_periodic() {
        for depth in 1..=4usize {
            for i in 0..64u64 {
                assert_eq!(
                    ring_slot_index(i, depth),
                    ring_slot_index(i + depth as u64, depth)
                );
            }
        }
    }

    #[test]
    fn test_ring_selection_round_robin() {
        assert_eq!(ring_slot_index(0, 2), 0);
        assert_eq!(ring_slot_index(1, 2), 1);
        assert_eq!(ring_slot_index(2, 2), 0);
        assert_eq!(ring_slot_index(3, 2), 1);
    }

    #[test]
    fn test_group_count_rounds_up_partial_tiles() {
        // 5 pixels with block 2: two full tiles and one trailing 1px tile.
        assert_eq!(dispatch_group_count(5, 2), 3);
        assert_eq!(dispatch_group_count(4, 2), 2);
        assert_eq!(dispatch_group_count(1920, 16), 120);
        assert_eq!(dispatch_group_count(1080, 16), 68);
    }

    #[test]
    fn test_group_count_block_larger_than_extent() {
        assert_eq!(dispatch_group_count(5, 16), 1);
        assert_eq!(dispatch_group_count(0, 16), 0);
    }

    #[test]
    fn test_group_count_zero_block_treated_as_one() {
        assert_eq!(dispatch_group_count(7, 0), 7);
    }
}
