//! ObscuraRT: real-time video redaction
//!
//! Pulls frames from the capture source, pixelates them on the GPU, and
//! presents the result. Exits 0 on a user-initiated close or end-of-stream,
//! non-zero with a diagnostic on any initialization or runtime failure.

use redact_engine::{Redactor, RedactorConfig, TestPatternSource};

fn run() -> Result<(), redact_engine::VulkanError> {
    let config = RedactorConfig::default();
    let source = TestPatternSource::new(config.width, config.height);

    log::info!(
        "Initializing ObscuraRT ({}x{}, block size {})",
        config.width,
        config.height,
        config.block_size
    );

    let mut redactor = Redactor::new(config, Box::new(source))?;
    redactor.run()
}

fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    if let Err(e) = run() {
        log::error!("{}", e);
        eprintln!("error: {}", e);
        std::process::exit(1);
    }

    log::info!("Shutdown complete");
}
