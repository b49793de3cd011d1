//! Frame Pipeline CLI
//!
//! Generate random frames at a target rate and write them to disk.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use frame_pipeline::{build_runtime, run_pipeline, Config, DeadlinePolicy, OverflowPolicy};

#[derive(Parser)]
#[command(name = "frame-pipeline")]
#[command(about = "Generate random frames at a target rate and save them with a worker pool", long_about = None)]
struct Cli {
    /// Path to configuration file (defaults are used when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Command-line overrides applied on top of the configuration file.
#[derive(Args, Debug, Default)]
struct Overrides {
    /// Frame width in pixels
    #[arg(long, global = true)]
    width: Option<u32>,

    /// Frame height in pixels
    #[arg(long, global = true)]
    height: Option<u32>,

    /// Run duration in seconds
    #[arg(long, global = true)]
    duration: Option<f64>,

    /// Frames per second (0 = unpaced)
    #[arg(long, global = true)]
    rate: Option<f64>,

    /// Number of slots to run
    #[arg(long, global = true)]
    items: Option<u64>,

    /// Image file extension (png, jpg, bmp, ppm)
    #[arg(long, global = true)]
    format: Option<String>,

    /// Number of consumer workers
    #[arg(long, global = true)]
    consumers: Option<usize>,

    /// Channel capacity
    #[arg(long, global = true)]
    capacity: Option<usize>,

    /// Overflow policy: block, drop-oldest or drop-newest
    #[arg(long, global = true)]
    overflow: Option<OverflowPolicy>,

    /// Deadline policy: elastic or skip
    #[arg(long, global = true)]
    deadline_policy: Option<DeadlinePolicy>,

    /// Output directory
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,
}

impl Overrides {
    fn apply(&self, config: &mut Config) {
        if let Some(width) = self.width {
            config.image.width = width;
        }
        if let Some(height) = self.height {
            config.image.height = height;
        }
        if let Some(format) = &self.format {
            config.image.format = format.clone();
        }
        if let Some(duration) = self.duration {
            config.pipeline.duration_secs = Some(duration);
        }
        if let Some(rate) = self.rate {
            config.pipeline.rate = rate;
        }
        if let Some(items) = self.items {
            config.pipeline.total_items = Some(items);
        }
        if let Some(consumers) = self.consumers {
            config.pipeline.consumers = consumers;
        }
        if let Some(capacity) = self.capacity {
            config.pipeline.capacity = capacity;
        }
        if let Some(policy) = self.overflow {
            config.pipeline.overflow_policy = policy;
        }
        if let Some(policy) = self.deadline_policy {
            config.pipeline.deadline_policy = policy;
        }
        if let Some(output) = &self.output {
            config.output.directory = output.clone();
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the frame pipeline (default if no command specified)
    Run,

    /// Validate configuration
    Validate,

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(long, default_value = "config.yaml")]
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        None | Some(Commands::Run) => {
            run_command(cli.config, &cli.overrides)?;
        }

        Some(Commands::Validate) => {
            validate_command(cli.config, &cli.overrides)?;
        }

        Some(Commands::GenerateConfig { path }) => {
            generate_config_command(path)?;
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, overrides: &Overrides) -> Result<Config> {
    let mut config = match config_path {
        Some(path) => Config::from_file(&path)?,
        None => Config::default(),
    };
    overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}

fn run_command(config_path: Option<PathBuf>, overrides: &Overrides) -> Result<()> {
    let config = load_config(config_path, overrides)?;

    // Build and run Tokio runtime
    let runtime = build_runtime(config.processing.worker_threads)?;
    runtime.block_on(async { run_pipeline(config).await })?;

    Ok(())
}

fn validate_command(config_path: Option<PathBuf>, overrides: &Overrides) -> Result<()> {
    let config = load_config(config_path, overrides)?;
    let pipeline = config.pipeline_config();
    println!("Configuration is valid");
    println!(
        "  {}x{} {} -> {}",
        config.image.width,
        config.image.height,
        config.image.format,
        config.output.directory.display()
    );
    println!(
        "  capacity {} ({}), {} consumers, rate {}/s, deadline policy {}",
        pipeline.capacity,
        pipeline.overflow_policy,
        pipeline.consumers,
        pipeline.target_rate,
        pipeline.deadline_policy
    );
    println!(
        "  item limit: {:?}, duration: {:?}",
        pipeline.total_items, pipeline.duration
    );
    Ok(())
}

fn generate_config_command(output: PathBuf) -> Result<()> {
    // Generate a commented YAML config
    let yaml = r#"# Frame Pipeline Configuration

# === IMAGE: What the producer synthesizes ===
image:
  width: 640
  height: 480

  # File extension selecting the encoder: png, jpg, bmp, ppm
  format: "png"

# === OUTPUT: Where frames are written ===
output:
  directory: "generated_images"

# === PIPELINE: Producer / consumer tuning ===
pipeline:
  # Frames the channel holds before the overflow policy applies
  capacity: 64

  # Number of consumer workers
  consumers: 7

  # Frames per second (0 = as fast as possible)
  rate: 30.0

  # Wall-clock limit in seconds (null = none)
  duration_secs: 10

  # Slot limit (defaults to rate * duration_secs)
  # total_items: 300

  # block | drop_oldest | drop_newest
  overflow_policy: block

  # elastic: late slots run immediately
  # skip: late slots are dropped and counted
  deadline_policy: elastic

# === PROCESSING: Runtime ===
processing:
  # Tokio worker threads (null = num CPUs)
  worker_threads: null

# === METRICS ===
metrics:
  # Log progress during the run
  enable: true

  # Reporting interval in seconds
  interval_secs: 10

  # Save final metrics as JSON
  # output_path: "metrics.json"

  # Count files in the output directory after the run
  verify_output: true
"#;

    std::fs::write(&output, yaml)?;
    println!("Generated sample configuration at: {}", output.display());

    Ok(())
}
