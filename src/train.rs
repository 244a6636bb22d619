/// Adversarial training of the generator/discriminator pair
///
/// Each epoch runs a training pass (one discriminator update followed by one
/// generator update per batch), a validation pass with MSE/SSIM/PSNR, and a
/// best-checkpoint decision on the epoch's final SSIM. Final generator and
/// discriminator snapshots are written after the last epoch.
use anyhow::{ensure, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};

use crate::checkpoint::{checkpoint_filename, run_stamp, save_generator, save_params, CheckpointRole};
use crate::chunk_params::{dataset_filename, ChunkParams, Resolutions, NO_POOLING};
use crate::conv_net::{ConvGenerator, PoolDiscriminator};
use crate::dataset::ChunkDataset;
use crate::device::{Device, DeviceConfig};
use crate::loader::{Batch, BatchLoader, BatchPolicy, DEFAULT_BATCH_SIZE};
use crate::metrics::{self, QualityAccumulator};
use crate::network::{accumulate, bce, AdversarialMseLoss, Discriminator, Generator, GeneratorLoss};
use crate::optim::{Adam, DEFAULT_LEARNING_RATE};

pub const DEFAULT_EPOCHS: usize = 200;

#[derive(Debug, Clone)]
pub struct TrainConfig {
    /// Directory holding `train/` and `valid/` archives
    pub data_dir: PathBuf,
    /// Checkpoint directory
    pub out_dir: PathBuf,
    pub resolutions: Resolutions,
    pub params: ChunkParams,
    /// Generator upscaling factor
    pub upscale: usize,
    pub num_epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    /// Seed for the shuffling RNG; entropy when unset
    pub seed: Option<u64>,
    pub progress: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig {
            data_dir: PathBuf::from("data"),
            out_dir: PathBuf::from("checkpoints"),
            resolutions: Resolutions::new(10000, 40000),
            params: ChunkParams {
                chunk: 40,
                stride: 40,
                bound: 201,
                scale: 1,
                pool: NO_POOLING.to_string(),
            },
            upscale: 1,
            num_epochs: DEFAULT_EPOCHS,
            batch_size: DEFAULT_BATCH_SIZE,
            learning_rate: DEFAULT_LEARNING_RATE,
            seed: None,
            progress: true,
        }
    }
}

impl TrainConfig {
    pub fn train_file(&self) -> PathBuf {
        self.data_dir
            .join("train")
            .join(dataset_filename(&self.resolutions, &self.params, "train"))
    }

    pub fn valid_file(&self) -> PathBuf {
        self.data_dir
            .join("valid")
            .join(dataset_filename(&self.resolutions, &self.params, "valid"))
    }
}

/// Batch-size weighted sums of losses and discriminator scores
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningLosses {
    pub nsamples: usize,
    pub d_loss: f64,
    pub g_loss: f64,
    /// D(x) on real targets
    pub d_score: f64,
    /// D(G(z)) on generated images
    pub g_score: f64,
}

impl RunningLosses {
    pub fn add(&mut self, batch_size: usize, step: &StepLosses) {
        let n = batch_size as f64;
        self.nsamples += batch_size;
        self.d_loss += step.d_loss as f64 * n;
        self.g_loss += step.g_loss as f64 * n;
        self.d_score += step.d_score as f64 * n;
        self.g_score += step.g_score as f64 * n;
    }

    /// Per-sample averages
    pub fn means(&self) -> RunningLosses {
        let n = self.nsamples.max(1) as f64;
        RunningLosses {
            nsamples: self.nsamples,
            d_loss: self.d_loss / n,
            g_loss: self.g_loss / n,
            d_score: self.d_score / n,
            g_score: self.g_score / n,
        }
    }

    fn describe(&self) -> String {
        let m = self.means();
        format!(
            "Loss_D: {:.4} Loss_G: {:.4} D(x): {:.4} D(G(z)): {:.4}",
            m.d_loss, m.g_loss, m.d_score, m.g_score
        )
    }
}

/// Losses and mean scores of one batch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepLosses {
    pub d_loss: f32,
    pub g_loss: f32,
    pub d_score: f32,
    pub g_score: f32,
}

#[derive(Debug, Clone)]
pub struct EpochStats {
    pub epoch: usize,
    /// Per-sample training averages
    pub train: RunningLosses,
    /// Per-sample validation averages
    pub valid: RunningLosses,
    pub psnr: f64,
    pub ssim: f64,
    pub improved: bool,
}

/// Best validation SSIM so far; only strict improvements count
#[derive(Debug, Clone, Copy, Default)]
pub struct BestTracker {
    best: f64,
}

impl BestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    /// Record `score`, returning true when it beats every earlier score
    pub fn observe(&mut self, score: f64) -> bool {
        if score > self.best {
            self.best = score;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrainReport {
    pub epochs: Vec<EpochStats>,
    pub best_ssim: f64,
    pub best_checkpoint: Option<PathBuf>,
    pub final_generator: PathBuf,
    pub final_discriminator: PathBuf,
}

pub struct Trainer<G, D, L> {
    generator: G,
    discriminator: D,
    loss: L,
    opt_g: Adam,
    opt_d: Adam,
    config: TrainConfig,
    rng: StdRng,
    stamp: String,
}

impl<G: Generator, D: Discriminator, L: GeneratorLoss> Trainer<G, D, L> {
    pub fn new(generator: G, discriminator: D, loss: L, config: TrainConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Trainer {
            generator,
            discriminator,
            loss,
            opt_g: Adam::new(config.learning_rate),
            opt_d: Adam::new(config.learning_rate),
            config,
            rng,
            stamp: run_stamp(),
        }
    }

    /// Override the run stamp used in checkpoint names
    pub fn with_stamp(mut self, stamp: &str) -> Self {
        self.stamp = stamp.to_string();
        self
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    pub fn discriminator(&self) -> &D {
        &self.discriminator
    }

    fn checkpoint_path(&self, role: CheckpointRole) -> PathBuf {
        self.config.out_dir.join(checkpoint_filename(
            &self.stamp,
            role,
            &self.config.resolutions,
            &self.config.params,
        ))
    }

    /// One discriminator update followed by one generator update
    ///
    /// Both updates come from a single forward pass. The generator's
    /// adversarial gradient flows through the discriminator as it was before
    /// its update; the discriminator is not evaluated again afterwards.
    pub fn train_step(&mut self, batch: &Batch) -> Result<StepLosses> {
        let real = batch
            .target
            .as_ref()
            .context("Training batch has no high-resolution target")?;
        let fake = self.generator.forward(&batch.input)?;
        ensure!(
            fake.shape() == real.shape(),
            "Generator output {:?} does not match target {:?}",
            fake.shape(),
            real.shape()
        );

        let real_out = self.discriminator.forward(real)?;
        let fake_out = self.discriminator.forward(&fake)?;
        let (d_loss_real, grad_real) = bce(&real_out, 1.0);
        let (d_loss_fake, grad_fake_out) = bce(&fake_out, 0.0);
        let fake_score = fake_out.mean().unwrap_or(0.0);
        let g_out = self.loss.evaluate(fake_score, &fake, real);

        let n = fake_out.len().max(1) as f32;
        let grad_scores = Array1::from_elem(fake_out.len(), g_out.grad_score / n);
        let (_, grad_fake_adv) = self.discriminator.backward(&fake, &grad_scores)?;

        // discriminator
        let (mut d_grads, _) = self.discriminator.backward(real, &grad_real)?;
        let (fake_grads, _) = self.discriminator.backward(&fake, &grad_fake_out)?;
        accumulate(&mut d_grads, &fake_grads)?;
        self.opt_d.step(self.discriminator.params_mut(), &d_grads)?;

        // generator
        let grad_fake = g_out.grad_fake + &grad_fake_adv;
        let g_grads = self.generator.backward(&batch.input, &grad_fake)?;
        self.opt_g.step(self.generator.params_mut(), &g_grads)?;

        Ok(StepLosses {
            d_loss: d_loss_real + d_loss_fake,
            g_loss: g_out.value,
            d_score: real_out.mean().unwrap_or(0.0),
            g_score: fake_score,
        })
    }

    /// Losses, scores, MSE and SSIM of one batch without updating anything
    pub fn evaluate_batch(&self, batch: &Batch) -> Result<(StepLosses, f64, f64)> {
        let hr = batch
            .target
            .as_ref()
            .context("Validation batch has no high-resolution target")?;
        let sr = self.generator.forward(&batch.input)?;
        ensure!(
            sr.shape() == hr.shape(),
            "Generator output {:?} does not match target {:?}",
            sr.shape(),
            hr.shape()
        );

        let sr_out = self.discriminator.forward(&sr)?;
        let hr_out = self.discriminator.forward(hr)?;
        let (d_loss_real, _) = bce(&hr_out, 1.0);
        let (d_loss_fake, _) = bce(&sr_out, 0.0);
        let g_score = sr_out.mean().unwrap_or(0.0);
        let g_loss = self.loss.evaluate(g_score, &sr, hr).value;

        let losses = StepLosses {
            d_loss: d_loss_real + d_loss_fake,
            g_loss,
            d_score: hr_out.mean().unwrap_or(0.0),
            g_score,
        };
        Ok((losses, metrics::mse(&sr, hr), metrics::ssim(&sr, hr)))
    }

    pub fn train_epoch(&mut self, epoch: usize, train_set: &ChunkDataset) -> Result<RunningLosses> {
        let loader = BatchLoader::new(train_set, self.config.batch_size, BatchPolicy::Shuffled);
        let bar = progress_bar(loader.num_batches(), self.config.progress);
        let mut running = RunningLosses::default();

        for batch in loader.iter(&mut self.rng) {
            let step = self.train_step(&batch)?;
            running.add(batch.len(), &step);
            bar.set_message(format!(
                "[{}/{}] {}",
                epoch,
                self.config.num_epochs,
                running.describe()
            ));
            bar.inc(1);
        }
        bar.finish_and_clear();
        Ok(running.means())
    }

    pub fn validate(&mut self, valid_set: &ChunkDataset) -> Result<(RunningLosses, QualityAccumulator)> {
        let loader = BatchLoader::new(valid_set, self.config.batch_size, BatchPolicy::Sequential);
        let bar = progress_bar(loader.num_batches(), self.config.progress);
        let mut running = RunningLosses::default();
        let mut quality = QualityAccumulator::new();

        for batch in loader.iter(&mut self.rng) {
            let (step, batch_mse, batch_ssim) = self.evaluate_batch(&batch)?;
            running.add(batch.len(), &step);
            quality.add(batch.len(), batch_mse, batch_ssim);
            bar.set_message(format!(
                "[Predicting in Test set] PSNR: {:.4} dB SSIM: {:.4}",
                quality.psnr(),
                quality.ssim()
            ));
            bar.inc(1);
        }
        bar.finish_and_clear();
        Ok((running.means(), quality))
    }

    /// Run every epoch and write best/final checkpoints
    pub fn fit(&mut self, train_set: &ChunkDataset, valid_set: &ChunkDataset) -> Result<TrainReport> {
        std::fs::create_dir_all(&self.config.out_dir).with_context(|| {
            format!(
                "Failed to create checkpoint directory {}",
                self.config.out_dir.display()
            )
        })?;

        let best_path = self.checkpoint_path(CheckpointRole::BestGenerator);
        let mut best = BestTracker::new();
        let mut best_checkpoint = None;
        let mut epochs = Vec::with_capacity(self.config.num_epochs);

        for epoch in 1..=self.config.num_epochs {
            let train = self.train_epoch(epoch, train_set)?;
            let (valid, quality) = self.validate(valid_set)?;
            let (psnr, ssim) = (quality.psnr(), quality.ssim());

            log::info!(
                "[{}/{}] train Loss_D: {:.4} Loss_G: {:.4} D(x): {:.4} D(G(z)): {:.4} | valid Loss_D: {:.4} Loss_G: {:.4} PSNR: {:.4} dB SSIM: {:.4}",
                epoch,
                self.config.num_epochs,
                train.d_loss,
                train.g_loss,
                train.d_score,
                train.g_score,
                valid.d_loss,
                valid.g_loss,
                psnr,
                ssim
            );

            let improved = best.observe(ssim);
            if improved {
                log::info!("Now, best ssim is {:.6}", best.best());
                save_generator(&self.generator, &best_path)?;
                best_checkpoint = Some(best_path.clone());
            }

            epochs.push(EpochStats {
                epoch,
                train,
                valid,
                psnr,
                ssim,
                improved,
            });
        }

        let final_generator = self.checkpoint_path(CheckpointRole::FinalGenerator);
        let final_discriminator = self.checkpoint_path(CheckpointRole::FinalDiscriminator);
        save_generator(&self.generator, &final_generator)?;
        save_params(&self.discriminator, &final_discriminator)?;

        Ok(TrainReport {
            epochs,
            best_ssim: best.best(),
            best_checkpoint,
            final_generator,
            final_discriminator,
        })
    }
}

fn progress_bar(len: usize, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{bar:30.green} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar
}

fn load_training_set(path: &Path, what: &str) -> Result<ChunkDataset> {
    log::info!("Loading {} data: {}", what, path.display());
    let dataset = ChunkDataset::load(path)
        .with_context(|| format!("Failed to load {} dataset {}", what, path.display()))?;
    ensure!(
        dataset.target.is_some(),
        "{} dataset {} has no 'target' array",
        what,
        path.display()
    );
    Ok(dataset)
}

/// Train the reference networks on the archives named by `config`
///
/// Both archives are loaded before the first epoch; a missing or unreadable
/// file aborts the run.
pub fn train(config: TrainConfig, device: DeviceConfig) -> Result<TrainReport> {
    ensure!(config.batch_size > 0, "Batch size must be at least 1");
    let train_set = load_training_set(&config.train_file(), "training")?;
    let valid_set = load_training_set(&config.valid_file(), "validation")?;
    log::info!(
        "{} training / {} validation chunks, {}",
        train_set.len(),
        valid_set.len(),
        config.params
    );

    let device = Device::new(device)?;
    let generator = ConvGenerator::new(config.upscale);
    let discriminator = PoolDiscriminator::new();
    let mut trainer = Trainer::new(generator, discriminator, AdversarialMseLoss::default(), config);
    device.run(|| trainer.fit(&train_set, &valid_set))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{Network, Params};
    use ndarray::{Array2, Array4, ArrayD, IxDyn};
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_best_tracker_strict() {
        let mut best = BestTracker::new();
        let saves: Vec<bool> = [0.5, 0.7, 0.7, 0.6, 0.8, 0.8]
            .iter()
            .map(|&s| best.observe(s))
            .collect();
        assert_eq!(saves, vec![true, true, false, false, true, false]);
        assert_eq!(best.best(), 0.8);
    }

    #[test]
    fn test_zero_score_never_saves() {
        let mut best = BestTracker::new();
        assert!(!best.observe(0.0));
        assert!(!best.observe(-0.1));
    }

    #[test]
    fn test_running_means() {
        let mut running = RunningLosses::default();
        let step = |v: f32| StepLosses {
            d_loss: v,
            g_loss: v,
            d_score: v,
            g_score: v,
        };
        running.add(2, &step(1.0));
        running.add(1, &step(4.0));
        let means = running.means();
        assert_eq!(means.nsamples, 3);
        assert!((means.d_loss - 2.0).abs() < 1e-12);
    }

    fn paired(n: usize) -> ChunkDataset {
        let target = Array4::from_shape_fn((n, 1, 4, 4), |(s, _, i, j)| {
            ((s + i * 2 + j) % 5) as f32 / 5.0
        });
        let input = target.mapv(|v| v * 0.5);
        let inds = Array2::from_shape_fn((n, 3), |(s, c)| if c == 0 { 1 } else { s as i64 });
        ChunkDataset::new(input, Some(target), inds).unwrap()
    }

    fn trainer(dir: &Path) -> Trainer<ConvGenerator, PoolDiscriminator, AdversarialMseLoss> {
        let config = TrainConfig {
            out_dir: dir.to_path_buf(),
            num_epochs: 2,
            batch_size: 4,
            learning_rate: 1e-2,
            seed: Some(11),
            progress: false,
            ..TrainConfig::default()
        };
        Trainer::new(
            ConvGenerator::new(1),
            PoolDiscriminator::new(),
            AdversarialMseLoss::default(),
            config,
        )
        .with_stamp("01_02_03_04")
    }

    fn first_batch(data: &ChunkDataset) -> Batch {
        BatchLoader::new(data, data.len(), BatchPolicy::Sequential)
            .iter(&mut StdRng::seed_from_u64(0))
            .next()
            .unwrap()
    }

    #[test]
    fn test_train_step_updates_both_networks() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut t = trainer(dir.path());
        let g_before = t.generator().params().clone();
        let d_before = t.discriminator().params().clone();

        let batch = first_batch(&paired(4));
        let step = t.train_step(&batch).unwrap();

        assert!(step.d_loss.is_finite() && step.g_loss.is_finite());
        assert!(step.d_score > 0.0 && step.d_score < 1.0);
        assert_ne!(t.generator().params(), &g_before);
        assert_ne!(t.discriminator().params(), &d_before);
    }

    /// Network calls seen during a step, shared by both recording networks
    #[derive(Default)]
    struct CallLog {
        calls: Vec<&'static str>,
        d_weight_at_backward: Vec<f32>,
        g_grad_output: Option<Array4<f32>>,
    }

    type SharedLog = Arc<Mutex<CallLog>>;

    const D_INIT_WEIGHT: f32 = 0.5;
    const D_BIAS: f32 = 0.25;

    fn scalar_params(value: f32) -> Params {
        let mut params = Params::new();
        params.insert("w".to_string(), ArrayD::from_elem(IxDyn(&[1]), value));
        params
    }

    fn weight(params: &Params) -> f32 {
        params["w"].sum()
    }

    fn sample_means(input: &Array4<f32>) -> Array1<f32> {
        input.outer_iter().map(|s| s.mean().unwrap_or(0.0)).collect()
    }

    /// `w * x`, logging every call
    struct RecordingGenerator {
        params: Params,
        log: SharedLog,
    }

    impl Network for RecordingGenerator {
        fn params(&self) -> &Params {
            &self.params
        }

        fn params_mut(&mut self) -> &mut Params {
            self.log.lock().unwrap().calls.push("G.step");
            &mut self.params
        }
    }

    impl Generator for RecordingGenerator {
        fn scale(&self) -> usize {
            1
        }

        fn forward(&self, input: &Array4<f32>) -> Result<Array4<f32>> {
            self.log.lock().unwrap().calls.push("G.forward");
            Ok(input * weight(&self.params))
        }

        fn backward(&self, input: &Array4<f32>, grad_output: &Array4<f32>) -> Result<Params> {
            let mut log = self.log.lock().unwrap();
            log.calls.push("G.backward");
            log.g_grad_output = Some(grad_output.clone());
            Ok(scalar_params((input * grad_output).sum()))
        }
    }

    /// Scores each sample as `w * mean(x) + D_BIAS`, logging every call
    struct RecordingDiscriminator {
        params: Params,
        log: SharedLog,
    }

    impl RecordingDiscriminator {
        fn new(log: &SharedLog, w: f32) -> Self {
            RecordingDiscriminator {
                params: scalar_params(w),
                log: Arc::clone(log),
            }
        }
    }

    impl Network for RecordingDiscriminator {
        fn params(&self) -> &Params {
            &self.params
        }

        fn params_mut(&mut self) -> &mut Params {
            self.log.lock().unwrap().calls.push("D.step");
            &mut self.params
        }
    }

    impl Discriminator for RecordingDiscriminator {
        fn forward(&self, input: &Array4<f32>) -> Result<Array1<f32>> {
            self.log.lock().unwrap().calls.push("D.forward");
            let w = weight(&self.params);
            Ok(sample_means(input).mapv(|m| w * m + D_BIAS))
        }

        fn backward(&self, input: &Array4<f32>, grad_output: &Array1<f32>) -> Result<(Params, Array4<f32>)> {
            let w = weight(&self.params);
            let mut log = self.log.lock().unwrap();
            log.calls.push("D.backward");
            log.d_weight_at_backward.push(w);

            let pixels = (input.len() / input.shape()[0].max(1)) as f32;
            let grad_w = (sample_means(input) * grad_output).sum();
            let mut grad_input = Array4::zeros(input.raw_dim());
            for (mut sample, &g) in grad_input.outer_iter_mut().zip(grad_output) {
                sample.fill(g * w / pixels);
            }
            Ok((scalar_params(grad_w), grad_input))
        }
    }

    fn max_abs_diff(a: &Array4<f32>, b: &Array4<f32>) -> f32 {
        a.iter().zip(b).map(|(x, y)| (x - y).abs()).fold(0.0, f32::max)
    }

    #[test]
    fn test_train_step_call_order_and_gradient_source() {
        let log = SharedLog::default();
        let loss = AdversarialMseLoss {
            adversarial_weight: 1.0,
            image_weight: 1.0,
        };
        let config = TrainConfig {
            learning_rate: 0.5,
            batch_size: 4,
            seed: Some(3),
            progress: false,
            ..TrainConfig::default()
        };
        let generator = RecordingGenerator {
            params: scalar_params(1.0),
            log: Arc::clone(&log),
        };
        let discriminator = RecordingDiscriminator::new(&log, D_INIT_WEIGHT);
        let mut t = Trainer::new(generator, discriminator, loss.clone(), config);

        let batch = first_batch(&paired(4));
        t.train_step(&batch).unwrap();

        let seen = log.lock().unwrap();
        // one forward pass; D is updated first and never re-scored afterwards
        assert_eq!(
            seen.calls,
            vec![
                "G.forward",
                "D.forward",
                "D.forward",
                "D.backward",
                "D.backward",
                "D.backward",
                "D.step",
                "G.backward",
                "G.step",
            ]
        );
        assert_eq!(seen.d_weight_at_backward, vec![D_INIT_WEIGHT; 3]);
        let d_after = weight(t.discriminator().params());
        assert!((d_after - D_INIT_WEIGHT).abs() > 0.1, "D weight barely moved: {d_after}");

        // generator gradient as produced through a discriminator with weight `w`
        let expected = |w: f32| {
            let d = RecordingDiscriminator::new(&SharedLog::default(), w);
            let real = batch.target.as_ref().unwrap();
            let fake = batch.input.clone();
            let scores = d.forward(&fake).unwrap();
            let g_out = loss.evaluate(scores.mean().unwrap(), &fake, real);
            let grad_scores = Array1::from_elem(scores.len(), g_out.grad_score / scores.len() as f32);
            let (_, adv) = d.backward(&fake, &grad_scores).unwrap();
            g_out.grad_fake + &adv
        };
        let recorded = seen.g_grad_output.as_ref().unwrap();
        assert!(max_abs_diff(recorded, &expected(D_INIT_WEIGHT)) < 1e-7);
        assert!(max_abs_diff(recorded, &expected(d_after)) > 1e-4);
    }

    #[test]
    fn test_train_step_rejects_shape_mismatch() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut t = trainer(dir.path());
        let batch = Batch {
            input: Array4::zeros((2, 1, 2, 2)),
            target: Some(Array4::zeros((2, 1, 4, 4))),
            inds: Array2::zeros((2, 3)),
        };
        assert!(t.train_step(&batch).is_err());
    }

    #[test]
    fn test_fit_writes_checkpoints() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut t = trainer(dir.path());
        let report = t.fit(&paired(9), &paired(5)).unwrap();

        assert_eq!(report.epochs.len(), 2);
        assert!(report.epochs[0].improved);
        assert!(report.best_checkpoint.as_ref().unwrap().is_file());
        assert!(report.final_generator.is_file());
        assert!(report.final_discriminator.is_file());
        assert!(report
            .final_generator
            .to_string_lossy()
            .ends_with("01_02_03_04_finalg_1000040000_c40_s40_b201_nonpool_hicsr.npz"));
        // 9 training chunks at batch size 4 -> 8 samples seen
        assert_eq!(report.epochs[0].train.nsamples, 8);
        assert_eq!(report.epochs[0].valid.nsamples, 5);
    }

    #[test]
    fn test_missing_inputs_are_fatal() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = TrainConfig {
            data_dir: dir.path().to_path_buf(),
            out_dir: dir.path().join("ckpt"),
            progress: false,
            ..TrainConfig::default()
        };
        assert!(train(config, DeviceConfig { threads: 1 }).is_err());
        assert!(!dir.path().join("ckpt").exists());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = TrainConfig {
            data_dir: dir.path().to_path_buf(),
            out_dir: dir.path().join("ckpt"),
            batch_size: 0,
            progress: false,
            ..TrainConfig::default()
        };
        let err = train(config, DeviceConfig { threads: 1 }).unwrap_err();
        assert!(err.to_string().contains("Batch size"), "{err}");
    }
}
