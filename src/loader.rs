/// Batching over a chunk dataset
use ndarray::{Array2, Array4, Axis};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::dataset::ChunkDataset;

/// Default number of chunks per batch
pub const DEFAULT_BATCH_SIZE: usize = 64;

/// How batches are drawn from a dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPolicy {
    /// Fresh permutation each pass, trailing partial batch dropped so every
    /// step sees exactly `batch_size` samples
    Shuffled,
    /// Input order, trailing partial batch kept
    Sequential,
}

/// One batch of inputs with optional targets and their index rows
#[derive(Debug, Clone)]
pub struct Batch {
    pub input: Array4<f32>,
    pub target: Option<Array4<f32>>,
    pub inds: Array2<i64>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.input.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Partition `0..n` into batches of sample positions
pub fn batch_plan<R: Rng + ?Sized>(
    n: usize,
    batch_size: usize,
    policy: BatchPolicy,
    rng: &mut R,
) -> Vec<Vec<usize>> {
    let batch_size = batch_size.max(1);
    let mut order: Vec<usize> = (0..n).collect();
    match policy {
        BatchPolicy::Shuffled => {
            order.shuffle(rng);
            order
                .chunks_exact(batch_size)
                .map(|c| c.to_vec())
                .collect()
        }
        BatchPolicy::Sequential => order.chunks(batch_size).map(|c| c.to_vec()).collect(),
    }
}

pub struct BatchLoader<'a> {
    dataset: &'a ChunkDataset,
    batch_size: usize,
    policy: BatchPolicy,
}

impl<'a> BatchLoader<'a> {
    pub fn new(dataset: &'a ChunkDataset, batch_size: usize, policy: BatchPolicy) -> Self {
        BatchLoader {
            dataset,
            batch_size: batch_size.max(1),
            policy,
        }
    }

    /// Number of batches one pass yields
    pub fn num_batches(&self) -> usize {
        let n = self.dataset.len();
        match self.policy {
            BatchPolicy::Shuffled => n / self.batch_size,
            BatchPolicy::Sequential => n.div_ceil(self.batch_size),
        }
    }

    /// One pass over the dataset; shuffled loaders draw a new order per call
    pub fn iter<R: Rng + ?Sized>(&self, rng: &mut R) -> impl Iterator<Item = Batch> + 'a {
        let dataset = self.dataset;
        batch_plan(dataset.len(), self.batch_size, self.policy, rng)
            .into_iter()
            .map(move |positions| gather(dataset, &positions))
    }
}

fn gather(dataset: &ChunkDataset, positions: &[usize]) -> Batch {
    Batch {
        input: dataset.data.select(Axis(0), positions),
        target: dataset.target.as_ref().map(|t| t.select(Axis(0), positions)),
        inds: dataset.inds.select(Axis(0), positions),
    }
}
