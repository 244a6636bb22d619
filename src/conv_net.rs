/// Reference generator and discriminator
///
/// `ConvGenerator` upsamples each chunk by nearest neighbour and applies one
/// same-padded convolution. `PoolDiscriminator` scores an image from its first
/// two pooled moments through a logistic unit. Both are intentionally small;
/// they make the training and prediction pipelines runnable without an
/// external tensor runtime.
use anyhow::{ensure, Context, Result};
use ndarray::{Array1, Array2, Array4, ArrayD, ArrayView2, Axis, Ix2, IxDyn};
use rayon::prelude::*;

use crate::network::{Discriminator, Generator, Network, Params};

pub const CONV_WEIGHT: &str = "conv.weight";
pub const CONV_BIAS: &str = "conv.bias";
pub const LINEAR_WEIGHT: &str = "linear.weight";
pub const LINEAR_BIAS: &str = "linear.bias";

const DEFAULT_KERNEL: usize = 3;

#[derive(Debug)]
pub struct ConvGenerator {
    scale: usize,
    params: Params,
}

impl ConvGenerator {
    /// Identity-initialised generator (centre tap 1, bias 0)
    pub fn new(scale: usize) -> Self {
        Self::with_kernel(scale, DEFAULT_KERNEL)
    }

    pub fn with_kernel(scale: usize, kernel: usize) -> Self {
        let kernel = kernel.max(1) | 1;
        let mut weight = ArrayD::zeros(IxDyn(&[kernel, kernel]));
        weight[[kernel / 2, kernel / 2]] = 1.0;
        let mut params = Params::new();
        params.insert(CONV_WEIGHT.to_string(), weight);
        params.insert(CONV_BIAS.to_string(), ArrayD::zeros(IxDyn(&[1])));
        ConvGenerator {
            scale: scale.max(1),
            params,
        }
    }

    /// Square, odd-sized kernel
    fn kernel(&self) -> Result<ArrayView2<f32>> {
        let kernel = self
            .params
            .get(CONV_WEIGHT)
            .with_context(|| format!("Generator has no '{CONV_WEIGHT}' parameter"))?
            .view()
            .into_dimensionality::<Ix2>()
            .with_context(|| format!("'{CONV_WEIGHT}' must be two-dimensional"))?;
        ensure!(
            kernel.nrows() == kernel.ncols() && kernel.nrows() % 2 == 1,
            "'{}' must be square with odd size, found {:?}",
            CONV_WEIGHT,
            kernel.dim()
        );
        Ok(kernel)
    }

    fn bias(&self) -> Result<f32> {
        let bias = self
            .params
            .get(CONV_BIAS)
            .with_context(|| format!("Generator has no '{CONV_BIAS}' parameter"))?;
        ensure!(bias.len() == 1, "'{}' must hold one value, found {}", CONV_BIAS, bias.len());
        Ok(bias.iter().next().copied().unwrap_or(0.0))
    }
}

impl Network for ConvGenerator {
    fn params(&self) -> &Params {
        &self.params
    }

    fn params_mut(&mut self) -> &mut Params {
        &mut self.params
    }
}

impl Generator for ConvGenerator {
    fn scale(&self) -> usize {
        self.scale
    }

    fn forward(&self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let (n, _, h, w) = input.dim();
        let (oh, ow) = (h * self.scale, w * self.scale);
        let kernel = self.kernel()?;
        let bias = self.bias()?;

        let outputs: Vec<Array2<f32>> = (0..n)
            .into_par_iter()
            .map(|s| {
                let up = upsample(input.index_axis(Axis(0), s).index_axis(Axis(0), 0), self.scale);
                conv_same(&up, kernel, bias)
            })
            .collect();

        let mut out = Array4::zeros((n, 1, oh, ow));
        for (s, sample) in outputs.into_iter().enumerate() {
            out.index_axis_mut(Axis(0), s)
                .index_axis_mut(Axis(0), 0)
                .assign(&sample);
        }
        Ok(out)
    }

    fn backward(&self, input: &Array4<f32>, grad_output: &Array4<f32>) -> Result<Params> {
        let n = input.len_of(Axis(0));
        let k = self.kernel()?.nrows();

        let (grad_w, grad_b) = (0..n)
            .into_par_iter()
            .map(|s| {
                let up = upsample(input.index_axis(Axis(0), s).index_axis(Axis(0), 0), self.scale);
                let g = grad_output.index_axis(Axis(0), s);
                let g = g.index_axis(Axis(0), 0);
                (kernel_grad(&up, g, k), g.sum())
            })
            .reduce(
                || (Array2::zeros((k, k)), 0.0f32),
                |(wa, ba), (wb, bb)| (wa + wb, ba + bb),
            );

        let mut grads = Params::new();
        grads.insert(CONV_WEIGHT.to_string(), grad_w.into_dyn());
        grads.insert(
            CONV_BIAS.to_string(),
            ArrayD::from_elem(IxDyn(&[1]), grad_b),
        );
        Ok(grads)
    }
}

/// Nearest-neighbour upsampling by an integer factor
pub fn upsample(x: ArrayView2<f32>, scale: usize) -> Array2<f32> {
    if scale == 1 {
        return x.to_owned();
    }
    let (h, w) = x.dim();
    Array2::from_shape_fn((h * scale, w * scale), |(i, j)| x[[i / scale, j / scale]])
}

/// Zero-padded convolution that keeps the spatial extent
fn conv_same(x: &Array2<f32>, kernel: ArrayView2<f32>, bias: f32) -> Array2<f32> {
    let (h, w) = x.dim();
    let k = kernel.nrows();
    let r = (k / 2) as isize;
    Array2::from_shape_fn((h, w), |(i, j)| {
        let mut acc = bias;
        for a in 0..k {
            let ii = i as isize + a as isize - r;
            if ii < 0 || ii >= h as isize {
                continue;
            }
            for b in 0..k {
                let jj = j as isize + b as isize - r;
                if jj < 0 || jj >= w as isize {
                    continue;
                }
                acc += kernel[[a, b]] * x[[ii as usize, jj as usize]];
            }
        }
        acc
    })
}

/// d(loss)/d(kernel) of `conv_same` given the output gradient
fn kernel_grad(x: &Array2<f32>, grad: ArrayView2<f32>, k: usize) -> Array2<f32> {
    let (h, w) = x.dim();
    let r = (k / 2) as isize;
    Array2::from_shape_fn((k, k), |(a, b)| {
        let mut acc = 0.0f32;
        for i in 0..h {
            let ii = i as isize + a as isize - r;
            if ii < 0 || ii >= h as isize {
                continue;
            }
            for j in 0..w {
                let jj = j as isize + b as isize - r;
                if jj < 0 || jj >= w as isize {
                    continue;
                }
                acc += grad[[i, j]] * x[[ii as usize, jj as usize]];
            }
        }
        acc
    })
}

pub struct PoolDiscriminator {
    params: Params,
}

impl Default for PoolDiscriminator {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolDiscriminator {
    pub fn new() -> Self {
        let mut params = Params::new();
        params.insert(
            LINEAR_WEIGHT.to_string(),
            ArrayD::from_elem(IxDyn(&[2]), 0.1f32),
        );
        params.insert(LINEAR_BIAS.to_string(), ArrayD::zeros(IxDyn(&[1])));
        PoolDiscriminator { params }
    }

    fn weights(&self) -> Result<(f32, f32, f32)> {
        let flat = |name: &str, len: usize| -> Result<Vec<f32>> {
            let values: Vec<f32> = self
                .params
                .get(name)
                .with_context(|| format!("Discriminator has no '{name}' parameter"))?
                .iter()
                .copied()
                .collect();
            ensure!(values.len() == len, "'{}' must hold {} values, found {}", name, len, values.len());
            Ok(values)
        };
        let w = flat(LINEAR_WEIGHT, 2)?;
        let b = flat(LINEAR_BIAS, 1)?;
        Ok((w[0], w[1], b[0]))
    }

    /// Mean and mean square of each sample
    fn moments(input: &Array4<f32>) -> Vec<(f32, f32)> {
        input
            .outer_iter()
            .map(|sample| {
                let count = sample.len().max(1) as f32;
                let m1 = sample.sum() / count;
                let m2 = sample.iter().map(|v| v * v).sum::<f32>() / count;
                (m1, m2)
            })
            .collect()
    }
}

fn sigmoid(z: f32) -> f32 {
    1.0 / (1.0 + (-z).exp())
}

impl Network for PoolDiscriminator {
    fn params(&self) -> &Params {
        &self.params
    }

    fn params_mut(&mut self) -> &mut Params {
        &mut self.params
    }
}

impl Discriminator for PoolDiscriminator {
    fn forward(&self, input: &Array4<f32>) -> Result<Array1<f32>> {
        let (w0, w1, b) = self.weights()?;
        Ok(Self::moments(input)
            .into_iter()
            .map(|(m1, m2)| sigmoid(w0 * m1 + w1 * m2 + b))
            .collect())
    }

    fn backward(&self, input: &Array4<f32>, grad_output: &Array1<f32>) -> Result<(Params, Array4<f32>)> {
        let (w0, w1, b) = self.weights()?;
        ensure!(
            grad_output.len() == input.len_of(Axis(0)),
            "{} score gradients for {} samples",
            grad_output.len(),
            input.len_of(Axis(0))
        );
        let mut grad_w = [0.0f32; 2];
        let mut grad_b = 0.0f32;
        let mut grad_input = Array4::zeros(input.raw_dim());

        for (s, (m1, m2)) in Self::moments(input).into_iter().enumerate() {
            let score = sigmoid(w0 * m1 + w1 * m2 + b);
            let dz = grad_output[s] * score * (1.0 - score);
            grad_w[0] += dz * m1;
            grad_w[1] += dz * m2;
            grad_b += dz;

            let sample = input.index_axis(Axis(0), s);
            let count = sample.len().max(1) as f32;
            grad_input
                .index_axis_mut(Axis(0), s)
                .zip_mut_with(&sample, |g, &x| *g = dz * (w0 + 2.0 * w1 * x) / count);
        }

        let mut grads = Params::new();
        grads.insert(
            LINEAR_WEIGHT.to_string(),
            Array1::from(grad_w.to_vec()).into_dyn(),
        );
        grads.insert(
            LINEAR_BIAS.to_string(),
            ArrayD::from_elem(IxDyn(&[1]), grad_b),
        );
        Ok((grads, grad_input))
    }
}
