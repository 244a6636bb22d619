/// Inference with a trained generator and reconstruction of its output
use anyhow::{ensure, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use ndarray::{concatenate, Array2, Array4, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::checkpoint::{load_generator_params, resolve_checkpoint, DEFAULT_FALLBACK_DIR};
use crate::chunk_params::{ChunkParams, Resolutions};
use crate::conv_net::ConvGenerator;
use crate::dataset::ChunkDataset;
use crate::device::{Device, DeviceConfig};
use crate::loader::{BatchLoader, BatchPolicy, DEFAULT_BATCH_SIZE};
use crate::network::Generator;
use crate::reassemble::{save_predictions, ReassemblyConfig};

#[derive(Debug, Clone)]
pub struct PredictConfig {
    /// Directory searched for the low-resolution archive
    pub data_dir: PathBuf,
    pub out_dir: PathBuf,
    pub checkpoint: PathBuf,
    /// Tried when `checkpoint` does not exist as given
    pub fallback_dir: PathBuf,
    pub resolutions: Resolutions,
    pub batch_size: usize,
    /// `bound: None` uses the bound parsed from the dataset name
    pub reassembly: ReassemblyConfig,
    pub progress: bool,
}

impl Default for PredictConfig {
    fn default() -> Self {
        PredictConfig {
            data_dir: PathBuf::from("data"),
            out_dir: PathBuf::from("predict"),
            checkpoint: PathBuf::new(),
            fallback_dir: PathBuf::from(DEFAULT_FALLBACK_DIR),
            resolutions: Resolutions::new(10000, 40000),
            batch_size: DEFAULT_BATCH_SIZE,
            reassembly: ReassemblyConfig {
                expand: true,
                ..ReassemblyConfig::default()
            },
            progress: true,
        }
    }
}

/// Generator outputs in input order with their index rows
#[derive(Debug, Clone)]
pub struct Prediction {
    pub outputs: Array4<f32>,
    pub inds: Array2<i64>,
}

/// First `.npz` file (by name) in `dir` whose name contains the low resolution
pub fn find_dataset<P: AsRef<Path>>(dir: P, low_res: u64) -> Result<PathBuf> {
    let dir = dir.as_ref();
    let needle = low_res.to_string();
    let mut candidates: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read input directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.contains(&needle) && n.contains(".npz"))
        })
        .collect();
    candidates.sort();
    candidates.into_iter().next().with_context(|| {
        format!(
            "No .npz dataset for resolution {} in {}",
            low_res,
            dir.display()
        )
    })
}

/// Build a generator for `scale` and load its parameters
///
/// Fails when the checkpoint was trained at a different scale.
pub fn load_generator<G, F>(factory: F, scale: usize, checkpoint: &Path, fallback_dir: &Path) -> Result<G>
where
    G: Generator,
    F: FnOnce(usize) -> G,
{
    let path = resolve_checkpoint(checkpoint, fallback_dir)?;
    let mut generator = factory(scale);
    load_generator_params(&mut generator, &path)
        .with_context(|| format!("Checkpoint {} does not fit the generator", path.display()))?;
    log::info!("Loading checkpoint file from \"{}\"", path.display());
    Ok(generator)
}

/// Run `generator` over every chunk in input order without updating it
pub fn run_generator<G: Generator>(
    generator: &G,
    dataset: &ChunkDataset,
    batch_size: usize,
    progress: bool,
) -> Result<Prediction> {
    ensure!(!dataset.is_empty(), "Dataset has no chunks to predict");

    let loader = BatchLoader::new(dataset, batch_size, BatchPolicy::Sequential);
    let bar = if progress {
        let bar = ProgressBar::new(loader.num_batches() as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("Predicting: {bar:30.cyan} {pos}/{len}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar
    } else {
        ProgressBar::hidden()
    };

    // sequential batching never draws from the rng
    let mut rng = StdRng::seed_from_u64(0);
    let (h, w) = dataset.input_extent();
    let scale = generator.scale();
    let mut outputs = Vec::with_capacity(loader.num_batches());
    let mut inds = Vec::with_capacity(loader.num_batches());
    for batch in loader.iter(&mut rng) {
        let out = generator.forward(&batch.input)?;
        ensure!(
            out.shape()[2..] == [h * scale, w * scale],
            "Generator produced {:?}, expected {}x{} chunks",
            out.shape(),
            h * scale,
            w * scale
        );
        outputs.push(out);
        inds.push(batch.inds);
        bar.inc(1);
    }
    bar.finish_and_clear();

    let output_views: Vec<_> = outputs.iter().map(|a| a.view()).collect();
    let ind_views: Vec<_> = inds.iter().map(|a| a.view()).collect();
    Ok(Prediction {
        outputs: concatenate(Axis(0), &output_views)?,
        inds: concatenate(Axis(0), &ind_views)?,
    })
}

/// Predict with a generator built by `factory`, then reassemble and save
pub fn predict_with<G, F>(config: &PredictConfig, device: DeviceConfig, factory: F) -> Result<Vec<PathBuf>>
where
    G: Generator,
    F: FnOnce(usize) -> G,
{
    ensure!(config.batch_size > 0, "Batch size must be at least 1");
    log::warn!("Prediction holds whole datasets and chromosome matrices in memory; ensure enough is available.");
    let start = Instant::now();

    let dataset_path = find_dataset(&config.data_dir, config.resolutions.low)?;
    let params = ChunkParams::from_filename(&dataset_path)?;
    log::info!("Loading data: {} ({})", dataset_path.display(), params);
    let dataset = ChunkDataset::load(&dataset_path)?;

    let generator = load_generator(factory, params.scale, &config.checkpoint, &config.fallback_dir)?;
    let device = Device::new(device)?;
    let prediction = device.run(|| run_generator(&generator, &dataset, config.batch_size, config.progress))?;

    let mut reassembly = config.reassembly.clone();
    if reassembly.bound.is_none() {
        reassembly.bound = Some(params.bound);
    }
    if !params.is_non_overlapping() {
        log::info!(
            "Chunks overlap (stride {} < chunk {}); resolving with '{}'",
            params.stride,
            params.chunk,
            reassembly.overlap
        );
    }

    log::info!("Start saving predicted data to {}", config.out_dir.display());
    let written = save_predictions(
        &prediction.outputs,
        &prediction.inds,
        &dataset,
        &reassembly,
        config.resolutions.high,
        &config.out_dir,
    )?;
    log::info!(
        "All data saved. Running cost is {:.1} min.",
        start.elapsed().as_secs_f64() / 60.0
    );
    Ok(written)
}

/// Predict with the reference convolutional generator
pub fn predict(config: &PredictConfig, device: DeviceConfig) -> Result<Vec<PathBuf>> {
    predict_with(config, device, ConvGenerator::new)
}
