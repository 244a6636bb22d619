/// Reconstruction quality metrics: MSE, SSIM and cumulative PSNR
use ndarray::{Array1, Array2, Array4, ArrayView2, Axis};
use rayon::prelude::*;

const SSIM_WINDOW: usize = 11;
const SSIM_SIGMA: f64 = 1.5;
const SSIM_C1: f64 = 0.01 * 0.01;
const SSIM_C2: f64 = 0.03 * 0.03;

/// Mean squared error over every element of the batch
pub fn mse(a: &Array4<f32>, b: &Array4<f32>) -> f64 {
    let n = a.len().max(1) as f64;
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let d = x as f64 - y as f64;
            d * d
        })
        .sum::<f64>()
        / n
}

/// `10 * log10(1 / mse)`; infinite when the MSE is zero
pub fn psnr_from_mse(mse: f64) -> f64 {
    10.0 * (1.0 / mse).log10()
}

fn gaussian_window(size: usize, sigma: f64) -> Array1<f64> {
    let center = (size / 2) as f64;
    let g: Array1<f64> = (0..size)
        .map(|i| (-((i as f64 - center).powi(2)) / (2.0 * sigma * sigma)).exp())
        .collect();
    let total = g.sum();
    g / total
}

/// Separable zero-padded filtering keeping the image extent
fn blur(x: &Array2<f64>, window: &Array1<f64>) -> Array2<f64> {
    let (h, w) = x.dim();
    let r = (window.len() / 2) as isize;
    let horizontal = Array2::from_shape_fn((h, w), |(i, j)| {
        window
            .iter()
            .enumerate()
            .filter_map(|(k, &wk)| {
                let jj = j as isize + k as isize - r;
                (jj >= 0 && jj < w as isize).then(|| wk * x[[i, jj as usize]])
            })
            .sum::<f64>()
    });
    Array2::from_shape_fn((h, w), |(i, j)| {
        window
            .iter()
            .enumerate()
            .filter_map(|(k, &wk)| {
                let ii = i as isize + k as isize - r;
                (ii >= 0 && ii < h as isize).then(|| wk * horizontal[[ii as usize, j]])
            })
            .sum::<f64>()
    })
}

/// Mean SSIM of one image pair (11x11 Gaussian window, sigma 1.5)
pub fn ssim_image(a: ArrayView2<f32>, b: ArrayView2<f32>) -> f64 {
    let window = gaussian_window(SSIM_WINDOW, SSIM_SIGMA);
    let a = a.mapv(f64::from);
    let b = b.mapv(f64::from);

    let mu_a = blur(&a, &window);
    let mu_b = blur(&b, &window);
    let sigma_a = blur(&(&a * &a), &window) - &mu_a * &mu_a;
    let sigma_b = blur(&(&b * &b), &window) - &mu_b * &mu_b;
    let sigma_ab = blur(&(&a * &b), &window) - &mu_a * &mu_b;

    let numerator = (&mu_a * &mu_b * 2.0 + SSIM_C1) * (sigma_ab * 2.0 + SSIM_C2);
    let denominator = (&mu_a * &mu_a + &mu_b * &mu_b + SSIM_C1) * (sigma_a + sigma_b + SSIM_C2);
    (numerator / denominator).mean().unwrap_or(0.0)
}

/// Mean SSIM over a batch of single-channel images
pub fn ssim(a: &Array4<f32>, b: &Array4<f32>) -> f64 {
    let n = a.len_of(Axis(0));
    if n == 0 {
        return 0.0;
    }
    let total: f64 = (0..n)
        .into_par_iter()
        .map(|s| {
            let x = a.index_axis(Axis(0), s);
            let y = b.index_axis(Axis(0), s);
            ssim_image(x.index_axis(Axis(0), 0), y.index_axis(Axis(0), 0))
        })
        .sum();
    total / n as f64
}

/// Running quality over an epoch's validation batches
///
/// PSNR is recomputed after every batch from the accumulated MSE, not
/// averaged from per-batch PSNR values.
#[derive(Debug, Clone, Default)]
pub struct QualityAccumulator {
    pub nsamples: usize,
    pub mse_sum: f64,
    pub ssim_sum: f64,
}

impl QualityAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in one batch's mean MSE and mean SSIM
    pub fn add(&mut self, batch_size: usize, batch_mse: f64, batch_ssim: f64) {
        self.nsamples += batch_size;
        self.mse_sum += batch_mse * batch_size as f64;
        self.ssim_sum += batch_ssim * batch_size as f64;
    }

    pub fn mse(&self) -> f64 {
        if self.nsamples == 0 {
            return 0.0;
        }
        self.mse_sum / self.nsamples as f64
    }

    pub fn psnr(&self) -> f64 {
        psnr_from_mse(self.mse())
    }

    pub fn ssim(&self) -> f64 {
        if self.nsamples == 0 {
            return 0.0;
        }
        self.ssim_sum / self.nsamples as f64
    }
}
