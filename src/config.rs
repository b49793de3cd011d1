//! Configuration for the frame pipeline.

use crate::pipeline::{DeadlinePolicy, OverflowPolicy, PipelineConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the frame pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Generated image configuration
    #[serde(default)]
    pub image: ImageConfig,

    /// Output configuration
    #[serde(default)]
    pub output: OutputConfig,

    /// Producer/consumer configuration
    #[serde(default)]
    pub pipeline: PipelineSection,

    /// Runtime configuration
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Generated image configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Frame width in pixels
    #[serde(default = "default_width")]
    pub width: u32,

    /// Frame height in pixels
    #[serde(default = "default_height")]
    pub height: u32,

    /// File extension selecting the encoder (png, jpg, bmp, ppm)
    #[serde(default = "default_format")]
    pub format: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            format: default_format(),
        }
    }
}

/// Output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory receiving one file per saved frame
    #[serde(default = "default_output_directory")]
    pub directory: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_directory(),
        }
    }
}

/// Producer/consumer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    /// Channel capacity
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Number of consumer workers
    #[serde(default = "default_consumers")]
    pub consumers: usize,

    /// Frames per second (0 = as fast as possible)
    #[serde(default = "default_rate")]
    pub rate: f64,

    /// Wall-clock run duration in seconds
    #[serde(default = "default_duration_secs")]
    pub duration_secs: Option<f64>,

    /// Slot limit; defaults to rate * duration when both are set
    #[serde(default)]
    pub total_items: Option<u64>,

    /// What a full channel does with new frames
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,

    /// What the producer does when it falls behind schedule
    #[serde(default)]
    pub deadline_policy: DeadlinePolicy,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            consumers: default_consumers(),
            rate: default_rate(),
            duration_secs: default_duration_secs(),
            total_items: None,
            overflow_policy: OverflowPolicy::default(),
            deadline_policy: DeadlinePolicy::default(),
        }
    }
}

impl PipelineSection {
    /// Slot limit after applying the rate * duration default.
    pub fn effective_total_items(&self) -> Option<u64> {
        match (self.total_items, self.duration_secs) {
            (Some(total), _) => Some(total),
            (None, Some(secs)) if self.rate > 0.0 => Some((self.rate * secs) as u64),
            _ => None,
        }
    }
}

/// Runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Number of Tokio worker threads
    #[serde(default)]
    pub worker_threads: Option<usize>,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable periodic progress reporting
    #[serde(default = "default_true")]
    pub enable: bool,

    /// Reporting interval in seconds
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,

    /// Optional path to save metrics JSON after the run completes
    #[serde(default)]
    pub output_path: Option<String>,

    /// Count files in the output directory after the run
    #[serde(default = "default_true")]
    pub verify_output: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enable: true,
            interval_secs: default_metrics_interval(),
            output_path: None,
            verify_output: true,
        }
    }
}

impl Config {
    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "yaml" | "yml" => serde_yaml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => serde_yaml::from_str(&contents)?,
        };
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Load configuration from a JSON string.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        Ok(config)
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.image.width == 0 || self.image.height == 0 {
            anyhow::bail!("Image dimensions must be > 0");
        }
        let format = image::ImageFormat::from_extension(&self.image.format)
            .ok_or_else(|| anyhow::anyhow!("Unsupported image format '{}'", self.image.format))?;
        if !format.writing_enabled() {
            anyhow::bail!("Image format '{}' cannot be written", self.image.format);
        }
        if self.pipeline.capacity == 0 {
            anyhow::bail!("Capacity must be > 0");
        }
        if self.pipeline.consumers == 0 {
            anyhow::bail!("Consumers must be > 0");
        }
        if !self.pipeline.rate.is_finite() || self.pipeline.rate < 0.0 {
            anyhow::bail!("Rate must be a finite value >= 0");
        }
        if let Some(secs) = self.pipeline.duration_secs {
            if !secs.is_finite() || secs < 0.0 {
                anyhow::bail!("Duration must be a finite value >= 0");
            }
            if Duration::try_from_secs_f64(secs).is_err() {
                anyhow::bail!("Duration of {} seconds is out of range", secs);
            }
        }
        if self.processing.worker_threads == Some(0) {
            anyhow::bail!("Worker threads must be > 0");
        }
        Ok(())
    }

    /// Build the scheduler configuration.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            width: self.image.width,
            height: self.image.height,
            capacity: self.pipeline.capacity,
            consumers: self.pipeline.consumers,
            target_rate: self.pipeline.rate,
            total_items: self.pipeline.effective_total_items(),
            duration: self
                .pipeline
                .duration_secs
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok()),
            overflow_policy: self.pipeline.overflow_policy,
            deadline_policy: self.pipeline.deadline_policy,
            enable_metrics: self.metrics.enable,
            metrics_interval_secs: self.metrics.interval_secs,
        }
    }
}

// Default value functions for serde
fn default_width() -> u32 { 640 }
fn default_height() -> u32 { 480 }
fn default_format() -> String { "png".to_string() }
fn default_output_directory() -> PathBuf { PathBuf::from("generated_images") }
fn default_capacity() -> usize { 64 }
fn default_consumers() -> usize { 7 }
fn default_rate() -> f64 { 30.0 }
fn default_duration_secs() -> Option<f64> { Some(10.0) }
fn default_true() -> bool { true }
fn default_metrics_interval() -> u64 { 10 }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.image.width, 640);
        assert_eq!(config.image.height, 480);
        assert_eq!(config.image.format, "png");
        assert_eq!(config.pipeline.consumers, 7);
        assert_eq!(config.output.directory, PathBuf::from("generated_images"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_total_items_from_rate_and_duration() {
        let config = Config::default();
        let pipeline = config.pipeline_config();

        assert_eq!(pipeline.total_items, Some(300));
        assert_eq!(pipeline.duration, Some(Duration::from_secs(10)));
        assert_eq!(pipeline.consumers, 7);
    }

    #[test]
    fn test_explicit_total_items_wins() {
        let mut config = Config::default();
        config.pipeline.total_items = Some(5);
        assert_eq!(config.pipeline_config().total_items, Some(5));

        config.pipeline.total_items = None;
        config.pipeline.rate = 0.0;
        assert_eq!(config.pipeline_config().total_items, None);
    }

    #[test]
    fn test_from_yaml_partial() {
        let yaml = r#"
image:
  width: 320
  format: jpg
pipeline:
  capacity: 8
  overflow_policy: drop_newest
  deadline_policy: skip
"#;
        let config = Config::from_yaml(yaml).unwrap();

        assert_eq!(config.image.width, 320);
        assert_eq!(config.image.height, 480);
        assert_eq!(config.image.format, "jpg");
        assert_eq!(config.pipeline.capacity, 8);
        assert_eq!(config.pipeline.consumers, 7);
        assert_eq!(config.pipeline.overflow_policy, OverflowPolicy::DropNewest);
        assert_eq!(config.pipeline.deadline_policy, DeadlinePolicy::Skip);
        assert!(config.metrics.enable);
    }

    #[test]
    fn test_from_json() {
        let json = r#"{"pipeline": {"rate": 0, "total_items": 100, "duration_secs": null}}"#;
        let config = Config::from_json(json).unwrap();

        let pipeline = config.pipeline_config();
        assert_eq!(pipeline.target_rate, 0.0);
        assert_eq!(pipeline.total_items, Some(100));
        assert_eq!(pipeline.duration, None);
    }

    #[test]
    fn test_yaml_round_trip() {
        let mut config = Config::default();
        config.pipeline.overflow_policy = OverflowPolicy::DropOldest;

        let parsed = Config::from_yaml(&config.to_yaml().unwrap()).unwrap();
        assert_eq!(parsed.pipeline.overflow_policy, OverflowPolicy::DropOldest);
        assert_eq!(parsed.image.format, config.image.format);
    }

    #[test]
    fn test_from_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"image": {"width": 100, "height": 50}}"#).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!((config.image.width, config.image.height), (100, 50));
    }

    #[test]
    fn test_config_validation_invalid() {
        let mut config = Config::default();
        config.pipeline.capacity = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.pipeline.consumers = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.image.height = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.pipeline.rate = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.image.format = "xyz".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_out_of_range_duration_rejected() {
        let mut config = Config::default();
        config.pipeline.duration_secs = Some(1e30);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("out of range"));

        // Large but representable durations still bound the run.
        config.pipeline.duration_secs = Some(1e9);
        assert!(config.validate().is_ok());
        assert!(config.pipeline_config().duration.is_some());
    }
}
