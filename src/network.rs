/// Seams for the generator, discriminator and generator loss
///
/// Networks expose their learnable tensors as a named parameter set and
/// compute parameter gradients from an upstream output gradient. The
/// training loop only ever talks to these traits.
use anyhow::{ensure, Result};
use indexmap::IndexMap;
use ndarray::{Array1, Array4, ArrayD, Zip};

/// Named learnable tensors, in a stable order
pub type Params = IndexMap<String, ArrayD<f32>>;

pub trait Network {
    fn params(&self) -> &Params;
    fn params_mut(&mut self) -> &mut Params;
}

/// Image-to-image upscaler: N x 1 x h x w -> N x 1 x (scale*h) x (scale*w)
pub trait Generator: Network + Send + Sync {
    fn scale(&self) -> usize;

    fn forward(&self, input: &Array4<f32>) -> Result<Array4<f32>>;

    /// Parameter gradients given d(loss)/d(output)
    fn backward(&self, input: &Array4<f32>, grad_output: &Array4<f32>) -> Result<Params>;
}

/// Real/fake scorer: N x 1 x H x W -> N scores in [0, 1]
pub trait Discriminator: Network + Send + Sync {
    fn forward(&self, input: &Array4<f32>) -> Result<Array1<f32>>;

    /// Parameter gradients and input gradient given d(loss)/d(score)
    fn backward(&self, input: &Array4<f32>, grad_output: &Array1<f32>) -> Result<(Params, Array4<f32>)>;
}

/// Scalar loss with its gradients
#[derive(Debug, Clone)]
pub struct GeneratorLossOutput {
    pub value: f32,
    /// d(loss)/d(mean fake score)
    pub grad_score: f32,
    /// d(loss)/d(generated image)
    pub grad_fake: Array4<f32>,
}

/// Composite generator objective of (mean discriminator score on fakes,
/// generated batch, real batch)
pub trait GeneratorLoss: Send + Sync {
    fn evaluate(&self, fake_score: f32, fake: &Array4<f32>, real: &Array4<f32>) -> GeneratorLossOutput;
}

/// Adversarial term `w_adv * (1 - D(G(z)))` plus pixel MSE
#[derive(Debug, Clone)]
pub struct AdversarialMseLoss {
    pub adversarial_weight: f32,
    pub image_weight: f32,
}

impl Default for AdversarialMseLoss {
    fn default() -> Self {
        AdversarialMseLoss {
            adversarial_weight: 0.001,
            image_weight: 1.0,
        }
    }
}

impl GeneratorLoss for AdversarialMseLoss {
    fn evaluate(&self, fake_score: f32, fake: &Array4<f32>, real: &Array4<f32>) -> GeneratorLossOutput {
        let count = fake.len().max(1) as f32;
        let diff = fake - real;
        let mse = diff.mapv(|d| d * d).sum() / count;
        GeneratorLossOutput {
            value: self.adversarial_weight * (1.0 - fake_score) + self.image_weight * mse,
            grad_score: -self.adversarial_weight,
            grad_fake: diff.mapv(|d| 2.0 * self.image_weight * d / count),
        }
    }
}

/// log() is clamped at -100 like common BCE implementations
const LOG_FLOOR: f32 = -100.0;

/// Mean binary cross-entropy of `pred` against a constant label, with the
/// gradient with respect to each prediction
pub fn bce(pred: &Array1<f32>, label: f32) -> (f32, Array1<f32>) {
    let n = pred.len().max(1) as f32;
    let eps = 1e-12f32;
    let loss = pred
        .iter()
        .map(|&p| {
            let log_p = p.ln().max(LOG_FLOOR);
            let log_q = (1.0 - p).ln().max(LOG_FLOOR);
            -(label * log_p + (1.0 - label) * log_q)
        })
        .sum::<f32>()
        / n;
    let grad = pred.mapv(|p| {
        let p = p.clamp(eps, 1.0 - eps);
        (p - label) / (p * (1.0 - p)) / n
    });
    (loss, grad)
}

/// Element-wise `acc += other` over matching parameter sets
pub fn accumulate(acc: &mut Params, other: &Params) -> Result<()> {
    for (name, grad) in other {
        match acc.get_mut(name) {
            Some(existing) => {
                ensure!(
                    existing.shape() == grad.shape(),
                    "Gradient shape mismatch for '{}'",
                    name
                );
                Zip::from(existing).and(grad).for_each(|a, &g| *a += g);
            }
            None => {
                acc.insert(name.clone(), grad.clone());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_bce_perfect_and_wrong() {
        let (loss, _) = bce(&array![1.0f32, 1.0], 1.0);
        assert!(loss.abs() < 1e-6);
        let (loss, _) = bce(&array![0.0f32], 1.0);
        assert!((loss - 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_bce_gradient_sign() {
        let (_, grad) = bce(&array![0.3f32, 0.7], 1.0);
        assert!(grad.iter().all(|&g| g < 0.0));
        let (_, grad) = bce(&array![0.3f32, 0.7], 0.0);
        assert!(grad.iter().all(|&g| g > 0.0));
    }

    #[test]
    fn test_bce_gradient_matches_finite_difference() {
        let p = array![0.4f32];
        let (_, grad) = bce(&p, 1.0);
        let h = 1e-3f32;
        let (up, _) = bce(&array![0.4f32 + h], 1.0);
        let (down, _) = bce(&array![0.4f32 - h], 1.0);
        let numeric = (up - down) / (2.0 * h);
        assert!((grad[0] - numeric).abs() < 1e-2);
    }

    #[test]
    fn test_generator_loss_zero_on_match() {
        let real = Array4::from_elem((2, 1, 3, 3), 0.5f32);
        let out = AdversarialMseLoss::default().evaluate(1.0, &real, &real);
        assert!(out.value.abs() < 1e-7);
        assert!(out.grad_fake.iter().all(|&g| g == 0.0));
        assert!(out.grad_score < 0.0);
    }

    #[test]
    fn test_accumulate() {
        let mut acc = Params::new();
        let mut g = Params::new();
        g.insert("w".to_string(), ArrayD::from_elem(vec![2], 1.5f32));
        accumulate(&mut acc, &g).unwrap();
        accumulate(&mut acc, &g).unwrap();
        assert_eq!(acc["w"].as_slice().unwrap(), &[3.0, 3.0]);

        let mut bad = Params::new();
        bad.insert("w".to_string(), ArrayD::from_elem(vec![3], 1.0f32));
        assert!(accumulate(&mut acc, &bad).is_err());
    }
}
