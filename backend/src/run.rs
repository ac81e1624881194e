use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, anyhow};
use log::info;

use crate::{
    Settings,
    detect::YoloDetector,
    pipeline::{self, VideoSummary},
};

/// Loads the ONNX Runtime library from `settings.onnxruntime_path` if set.
///
/// Only the first call has an effect. Without a path the library is resolved by `ort` from the
/// `ORT_DYLIB_PATH` environment variable or the default search path.
pub fn init(settings: &Settings) -> Result<()> {
    static INITIALIZED: AtomicBool = AtomicBool::new(false);

    if INITIALIZED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::Acquire)
        .is_err()
    {
        return Ok(());
    }

    if let Some(path) = settings.onnxruntime_path.as_ref() {
        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow!("non UTF-8 path {}", path.display()))?;
        ort::init_from(path_str).commit()?;
        info!("loaded onnxruntime from {}", path.display());
    }

    Ok(())
}

/// Builds the detector from `settings` and processes every video of the data directory.
pub fn run(settings: &Settings) -> Result<Vec<VideoSummary>> {
    init(settings)?;

    let mut detector = YoloDetector::new(
        &settings.model_path,
        settings.entity_classes(),
        settings.confidence_threshold,
    )?;
    let summaries = pipeline::run_batch(settings, &mut detector)?;
    info!("processed {} video(s)", summaries.len());

    Ok(summaries)
}
