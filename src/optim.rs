/// Adam optimizer over named parameter sets
use anyhow::{Context, Result};
use indexmap::IndexMap;
use ndarray::{ArrayD, Zip};

use crate::network::Params;

pub const DEFAULT_LEARNING_RATE: f32 = 1e-4;

#[derive(Debug, Clone)]
pub struct Adam {
    pub learning_rate: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub eps: f32,
    step: i32,
    first: IndexMap<String, ArrayD<f32>>,
    second: IndexMap<String, ArrayD<f32>>,
}

impl Adam {
    pub fn new(learning_rate: f32) -> Self {
        Adam {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            step: 0,
            first: IndexMap::new(),
            second: IndexMap::new(),
        }
    }

    pub fn steps(&self) -> i32 {
        self.step
    }

    /// Apply one update; every gradient must name an existing parameter
    pub fn step(&mut self, params: &mut Params, grads: &Params) -> Result<()> {
        self.step += 1;
        let bias1 = 1.0 - self.beta1.powi(self.step);
        let bias2 = 1.0 - self.beta2.powi(self.step);
        let (b1, b2, lr, eps) = (self.beta1, self.beta2, self.learning_rate, self.eps);

        for (name, grad) in grads {
            let param = params
                .get_mut(name)
                .with_context(|| format!("Gradient for unknown parameter '{name}'"))?;
            anyhow::ensure!(
                param.shape() == grad.shape(),
                "Gradient shape {:?} does not match parameter '{}' {:?}",
                grad.shape(),
                name,
                param.shape()
            );
            let m = self
                .first
                .entry(name.clone())
                .or_insert_with(|| ArrayD::zeros(grad.raw_dim()));
            let v = self
                .second
                .entry(name.clone())
                .or_insert_with(|| ArrayD::zeros(grad.raw_dim()));

            Zip::from(&mut *param)
                .and(&mut *m)
                .and(&mut *v)
                .and(grad)
                .for_each(|p, m, v, &g| {
                    *m = b1 * *m + (1.0 - b1) * g;
                    *v = b2 * *v + (1.0 - b2) * g * g;
                    let m_hat = *m / bias1;
                    let v_hat = *v / bias2;
                    *p -= lr * m_hat / (v_hat.sqrt() + eps);
                });
        }
        Ok(())
    }
}
