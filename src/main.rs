use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use hicsr::checkpoint::DEFAULT_FALLBACK_DIR;
use hicsr::chunk_params::{ChunkParams, Resolutions, NO_POOLING};
use hicsr::device::DeviceConfig;
use hicsr::loader::DEFAULT_BATCH_SIZE;
use hicsr::optim::DEFAULT_LEARNING_RATE;
use hicsr::predict::PredictConfig;
use hicsr::reassemble::{OverlapPolicy, ReassemblyConfig};
use hicsr::train::{TrainConfig, DEFAULT_EPOCHS};

/// Parse a batch size, rejecting zero
fn parse_batch_size(s: &str) -> Result<usize, String> {
    let size: usize = s
        .parse()
        .map_err(|e| format!("Invalid batch size: {e}"))?;
    if size == 0 {
        return Err("Batch size must be at least 1".to_string());
    }
    Ok(size)
}

/// hicsr - GAN super-resolution of Hi-C contact matrices
///
/// Trains a generator on chunked low/high resolution pairs and reassembles
/// its predictions into whole-chromosome matrices
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Commands,

    /// Worker threads for network arithmetic (0 = one per core)
    #[clap(short = 't', long = "threads", default_value = "0", global = true)]
    threads: usize,

    /// Quiet mode (warnings only, no progress bars)
    #[clap(long = "quiet", global = true)]
    quiet: bool,
}

/// Resolution pair shared by both subcommands
#[derive(clap::Args, Debug)]
struct ResolutionArgs {
    /// Low resolution in bp (the chunked input)
    #[clap(long = "low-res", default_value = "40000")]
    low_res: u64,

    /// High resolution in bp (the training target)
    #[clap(long = "high-res", default_value = "10000")]
    high_res: u64,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train a generator/discriminator pair
    Train {
        /// Directory holding train/ and valid/ archives
        #[clap(long = "data-dir")]
        data_dir: PathBuf,

        /// Directory receiving checkpoints
        #[clap(long = "out-dir")]
        out_dir: PathBuf,

        #[clap(flatten)]
        resolutions: ResolutionArgs,

        /// Chunk edge in bins
        #[clap(long = "chunk", default_value = "40")]
        chunk: usize,

        /// Step between chunk origins in bins
        #[clap(long = "stride", default_value = "40")]
        stride: usize,

        /// Maximum genomic distance in bins
        #[clap(long = "bound", default_value = "201")]
        bound: usize,

        /// Pooling token ("nonpool" or e.g. "p2")
        #[clap(long = "pool", default_value = NO_POOLING)]
        pool: String,

        /// Generator upscaling factor
        #[clap(long = "upscale", default_value = "1")]
        upscale: usize,

        /// Number of epochs
        #[clap(short = 'e', long = "epochs", default_value_t = DEFAULT_EPOCHS)]
        epochs: usize,

        /// Samples per batch
        #[clap(short = 'b', long = "batch-size", default_value_t = DEFAULT_BATCH_SIZE, value_parser = parse_batch_size)]
        batch_size: usize,

        /// Adam learning rate for both networks
        #[clap(long = "learning-rate", default_value_t = DEFAULT_LEARNING_RATE)]
        learning_rate: f32,

        /// Seed for batch shuffling
        #[clap(long = "seed")]
        seed: Option<u64>,
    },

    /// Predict high-resolution matrices from a trained generator
    Predict {
        /// Directory searched for the low-resolution archive
        #[clap(long = "data-dir")]
        data_dir: PathBuf,

        /// Directory receiving predict_chr<id>_<res>.npz files
        #[clap(long = "out-dir")]
        out_dir: PathBuf,

        /// Generator checkpoint (also looked up under save/)
        #[clap(short = 'c', long = "checkpoint")]
        checkpoint: PathBuf,

        #[clap(flatten)]
        resolutions: ResolutionArgs,

        /// Samples per batch
        #[clap(short = 'b', long = "batch-size", default_value_t = DEFAULT_BATCH_SIZE, value_parser = parse_batch_size)]
        batch_size: usize,

        /// Genomic distance bound in bins instead of the dataset's
        #[clap(long = "bound-override")]
        bound_override: Option<usize>,

        /// How overlapping chunk predictions combine: overwrite or average
        #[clap(long = "overlap", default_value = "overwrite")]
        overlap: OverlapPolicy,

        /// Bins trimmed from every chunk edge before placement
        #[clap(long = "crop", default_value = "0")]
        crop: usize,

        /// Keep matrices in compact coordinates
        #[clap(long = "compact-output")]
        compact_output: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.quiet { "warn" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();

    let device = DeviceConfig {
        threads: args.threads,
    };
    let progress = !args.quiet;

    match args.command {
        Commands::Train {
            data_dir,
            out_dir,
            resolutions,
            chunk,
            stride,
            bound,
            pool,
            upscale,
            epochs,
            batch_size,
            learning_rate,
            seed,
        } => {
            let config = TrainConfig {
                data_dir,
                out_dir,
                resolutions: Resolutions::new(resolutions.high_res, resolutions.low_res),
                params: ChunkParams::new(chunk, stride, bound, &pool)?,
                upscale,
                num_epochs: epochs,
                batch_size,
                learning_rate,
                seed,
                progress,
            };
            let report = hicsr::train::train(config, device)?;
            match &report.best_checkpoint {
                Some(path) => log::info!(
                    "Best SSIM {:.6} saved to {}",
                    report.best_ssim,
                    path.display()
                ),
                None => log::warn!("Validation SSIM never exceeded 0; no best checkpoint written"),
            }
        }
        Commands::Predict {
            data_dir,
            out_dir,
            checkpoint,
            resolutions,
            batch_size,
            bound_override,
            overlap,
            crop,
            compact_output,
        } => {
            let config = PredictConfig {
                data_dir,
                out_dir,
                checkpoint,
                fallback_dir: PathBuf::from(DEFAULT_FALLBACK_DIR),
                resolutions: Resolutions::new(resolutions.high_res, resolutions.low_res),
                batch_size,
                reassembly: ReassemblyConfig {
                    bound: bound_override,
                    overlap,
                    crop,
                    expand: !compact_output,
                },
                progress,
            };
            let written = hicsr::predict::predict(&config, device)?;
            log::info!("Wrote {} chromosome matrices", written.len());
        }
    }

    Ok(())
}
