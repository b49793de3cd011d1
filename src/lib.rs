//! Frame Pipeline
//!
//! Paced producer / consumer pipeline that synthesizes random RGB frames at a
//! target rate and writes them to disk through a fixed pool of workers.
//!
//! # Architecture
//!
//! The pipeline consists of:
//!
//! - **I/O**: Frame generation and image file encoding behind the
//!   `Generator` / `Sink` traits
//! - **Pipeline**: Bounded channel with overflow policies, rate pacing,
//!   a single producer, a consumer pool and shared metrics
//!
//! # Usage
//!
//! ```no_run
//! use frame_pipeline::{Config, run_pipeline};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file(&"config.yaml".into())?;
//!     run_pipeline(config).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod io;
pub mod pipeline;

pub use config::Config;
pub use io::{Frame, Generator, ImageFileSink, RandomFrameGenerator, Sink};
pub use pipeline::{
    DeadlinePolicy, Metrics, MetricsReporter, OverflowPolicy, PipelineConfig, PipelineReport,
    Scheduler,
};

use anyhow::Result;
use std::sync::Arc;

/// Run the frame pipeline with the given configuration.
///
/// Ctrl-C stops production; frames already queued are still written.
pub async fn run_pipeline(config: Config) -> Result<PipelineReport> {
    // Validate configuration
    config.validate()?;

    tracing::info!("Starting frame pipeline");

    let sink = Arc::new(ImageFileSink::new(
        config.output.directory.clone(),
        &config.image.format,
    )?);
    tracing::info!(
        "Writing {}x{} {} frames to {}",
        config.image.width,
        config.image.height,
        config.image.format,
        sink.directory().display()
    );

    let pipeline_config = config.pipeline_config();
    let expected_items = pipeline_config.expected_items();

    let metrics = Metrics::new();
    let scheduler = Scheduler::new(pipeline_config, metrics.clone());

    let stop = scheduler.stop_token();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, stopping producer");
            stop.cancel();
        }
    });

    let dyn_sink: Arc<dyn Sink<Frame>> = sink.clone();
    let result = scheduler.run(RandomFrameGenerator::new(), dyn_sink).await;
    ctrl_c.abort();
    let report = result?;

    MetricsReporter::new(metrics, config.metrics.interval_secs, expected_items).print_summary();

    if config.metrics.verify_output {
        let files = sink.count_files()?;
        if files as u64 == report.metrics.saved {
            tracing::info!("Verified {} files in {}", files, sink.directory().display());
        } else {
            tracing::warn!(
                "Output directory holds {} files but {} frames were saved",
                files,
                report.metrics.saved
            );
        }
    }

    if let Some(path) = &config.metrics.output_path {
        report.metrics.save_to_file(path)?;
    }

    Ok(report)
}

/// Build a Tokio runtime with the specified configuration.
pub fn build_runtime(worker_threads: Option<usize>) -> Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();

    if let Some(threads) = worker_threads {
        builder.worker_threads(threads);
    }

    builder.enable_all();

    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_run_pipeline_writes_frames_and_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let metrics_path = dir.path().join("metrics.json");

        let mut config = Config::default();
        config.image.width = 8;
        config.image.height = 8;
        config.image.format = "bmp".to_string();
        config.output.directory = dir.path().join("frames");
        config.pipeline.rate = 0.0;
        config.pipeline.duration_secs = None;
        config.pipeline.total_items = Some(20);
        config.pipeline.consumers = 3;
        config.metrics.enable = false;
        config.metrics.output_path = Some(metrics_path.to_string_lossy().into_owned());

        let report = run_pipeline(config).await.unwrap();

        assert_eq!(report.metrics.saved, 20);
        assert_eq!(std::fs::read_dir(dir.path().join("frames")).unwrap().count(), 20);

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&metrics_path).unwrap()).unwrap();
        assert_eq!(json["saved"], 20);
    }

    #[tokio::test]
    async fn test_run_pipeline_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.output.directory = dir.path().join("never-created");
        config.pipeline.capacity = 0;

        assert!(run_pipeline(config).await.is_err());
        assert!(!dir.path().join("never-created").exists());
    }

    #[test]
    fn test_build_runtime() {
        let runtime = build_runtime(Some(2)).unwrap();
        assert_eq!(runtime.block_on(async { 1 + 1 }), 2);
    }
}
