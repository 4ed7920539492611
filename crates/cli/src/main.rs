use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use candle_core::{DType, Device, Module, Tensor};
use clap::{Parser, Subcommand};
use freqmamba_core::loader::{load_block, save_weights};
use freqmamba_core::{BlockConfig, FrequencyAxisMixer};

mod logging;

#[derive(Parser)]
#[command(
    name = "freqmamba-cli",
    about = "Frequency-axis Mamba block: build, initialize, probe"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build the block and run one forward pass on random input
    Probe {
        /// JSON config with a `model_cfg` section
        #[arg(long)]
        config: PathBuf,

        /// Safetensors checkpoints; random init when omitted (repeatable)
        #[arg(long = "weights")]
        weights: Vec<PathBuf>,

        /// Module prefix of the block inside the checkpoint (e.g. "tf_blocks.0")
        #[arg(long)]
        prefix: Option<String>,

        #[arg(long, default_value_t = 1)]
        batch: usize,

        /// Number of time frames
        #[arg(long, default_value_t = 100)]
        frames: usize,

        /// Number of frequency bins
        #[arg(long, default_value_t = 8)]
        freq: usize,

        /// Seed for weight initialization
        #[arg(long, default_value_t = 0)]
        seed: u64,

        /// Run on CPU even when CUDA is available
        #[arg(long)]
        cpu: bool,

        #[arg(long, default_value = "info")]
        log_level: String,
    },

    /// Write a freshly initialized checkpoint
    Init {
        #[arg(long)]
        config: PathBuf,

        /// Output safetensors file
        #[arg(long)]
        out: PathBuf,

        #[arg(long, default_value_t = 0)]
        seed: u64,

        #[arg(long, default_value = "info")]
        log_level: String,
    },
}

fn select_device(cpu: bool) -> anyhow::Result<Device> {
    if cpu {
        Ok(Device::Cpu)
    } else {
        Ok(Device::cuda_if_available(0)?)
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Probe {
            config,
            weights,
            prefix,
            batch,
            frames,
            freq,
            seed,
            cpu,
            log_level,
        } => {
            logging::init_with_level(&log_level);
            let device = select_device(cpu)?;

            let model = if weights.is_empty() {
                let cfg = BlockConfig::from_path(&config)
                    .with_context(|| format!("reading {}", config.display()))?;
                let (model, _varmap) =
                    FrequencyAxisMixer::initialized(&cfg, DType::F32, &device, seed)?;
                tracing::info!(seed, "initialized random weights");
                model
            } else {
                load_block(&config, &weights, prefix.as_deref(), DType::F32, &device)?
            };

            let channels = model.config().hid_feature;
            let input = Tensor::randn(0f32, 1.0, (batch, channels, frames, freq), &device)?;

            let start = Instant::now();
            let output = model.forward(&input)?;
            let elapsed = start.elapsed();

            tracing::info!(
                input = ?input.dims(),
                output = ?output.dims(),
                elapsed_ms = elapsed.as_secs_f64() * 1e3,
                "forward pass complete"
            );
        }
        Command::Init {
            config,
            out,
            seed,
            log_level,
        } => {
            logging::init_with_level(&log_level);
            let cfg = BlockConfig::from_path(&config)
                .with_context(|| format!("reading {}", config.display()))?;
            let (_model, varmap) =
                FrequencyAxisMixer::initialized(&cfg, DType::F32, &Device::Cpu, seed)?;
            save_weights(&varmap, &out)?;
        }
    }

    Ok(())
}
