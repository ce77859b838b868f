//! Per-frame orchestration
//!
//! [`Redactor`] wires the capture source, compute stage, and presentation
//! stage together and drives the single-threaded loop:
//! pull frame -> upload -> dispatch compute -> present -> measure throughput,
//! gated by the close signal from the presentation surface.
//!
//! Both GPU queues are only ever submitted to from this thread. The only
//! cancellation point is the close-request check at the loop head; no
//! in-flight submission is ever aborted, and shutdown waits for full device
//! idle before any resource is released.

use crate::capture::FrameSource;
use crate::foundation::time::ThroughputMeter;
use crate::render::vulkan::compute::DEFAULT_RING_DEPTH;
use crate::render::vulkan::image::ImageRole;
use crate::render::vulkan::window::WindowSystem;
use crate::render::vulkan::{
    ComputeStage, PresentationStage, StorageImage, VulkanContext, VulkanError, VulkanResult,
};

/// Orchestrator configuration.
///
/// A plain struct by design: buffering depth and block size are configuration
/// values, not hardcoded constants, but no on-disk configuration format is
/// part of the core.
#[derive(Debug, Clone)]
pub struct RedactorConfig {
    /// Frame and window width in pixels
    pub width: u32,
    /// Frame and window height in pixels
    pub height: u32,
    /// Pixelation tile edge in pixels
    pub block_size: u32,
    /// Compute binding-set ring depth
    pub ring_depth: usize,
    /// Presentation window title
    pub window_title: String,
    /// Emit a throughput report every this many frames
    pub throughput_window: u64,
}

impl Default for RedactorConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            block_size: 16,
            ring_depth: DEFAULT_RING_DEPTH,
            window_title: "ObscuraRT - Real-time Video Redaction".to_string(),
            throughput_window: 30,
        }
    }
}

/// Drives the per-frame redaction loop.
///
/// Field declaration order encodes destruction order: the presentation and
/// compute stages go first (each gated on device/fence completion), then the
/// orchestrator-owned images, and the context last. That is the strict
/// reverse of construction, since the stages borrow the device the context
/// owns.
pub struct Redactor {
    presentation: PresentationStage,
    compute: ComputeStage,
    input_image: StorageImage,
    output_image: StorageImage,
    context: VulkanContext,
    source: Box<dyn FrameSource>,
    config: RedactorConfig,
    meter: ThroughputMeter,
}

impl Redactor {
    /// Build the whole pipeline: window system, context, images, stages.
    pub fn new(config: RedactorConfig, source: Box<dyn FrameSource>) -> VulkanResult<Self> {
        if source.width() != config.width || source.height() != config.height {
            return Err(VulkanError::Initialization(format!(
                "frame source {}x{} does not match configured size {}x{}",
                source.width(),
                source.height(),
                config.width,
                config.height
            )));
        }

        let window_system = WindowSystem::init()?;
        let context = VulkanContext::new(&window_system, "ObscuraRT")?;

        let input_image =
            StorageImage::new(&context, config.width, config.height, ImageRole::ComputeRead)?;
        let output_image =
            StorageImage::new(&context, config.width, config.height, ImageRole::ComputeWrite)?;

        let compute = ComputeStage::new(&context, config.width, config.height, config.ring_depth)?;
        let presentation = PresentationStage::new(
            &context,
            window_system,
            config.width,
            config.height,
            &config.window_title,
        )?;

        let meter = ThroughputMeter::new(config.throughput_window);

        Ok(Self {
            presentation,
            compute,
            input_image,
            output_image,
            context,
            source,
            config,
            meter,
        })
    }

    /// Run the per-frame loop until the window closes or the source ends.
    pub fn run(&mut self) -> VulkanResult<()> {
        log::info!("Starting main loop");

        while !self.presentation.should_close() {
            let frame = match self.source.grab() {
                Some(frame) => frame,
                None => {
                    log::info!("Frame source ended the stream");
                    break;
                }
            };

            self.input_image.upload(&self.context, &frame)?;
            self.compute
                .dispatch(&self.input_image, &self.output_image, self.config.block_size)?;

            if !self.presentation.present_frame(&self.output_image)? {
                break;
            }

            if let Some(fps) = self.meter.tick() {
                log::info!("[FPS] {:.1}", fps);
            }
        }

        // A pending submission always runs to completion before teardown.
        self.context.wait_idle()?;
        log::info!("Loop ended. Total frames: {}", self.meter.frames());
        Ok(())
    }

    /// Frames presented so far
    pub fn frames_presented(&self) -> u64 {
        self.meter.frames()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RedactorConfig::default();
        assert_eq!(config.width, 1920);
        assert_eq!(config.height, 1080);
        assert_eq!(config.block_size, 16);
        assert_eq!(config.ring_depth, 2);
        assert_eq!(config.throughput_window, 30);
    }
}
