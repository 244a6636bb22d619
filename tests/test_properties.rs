
use hicsr::chunk_params::{extract_digits, ChunkParams};
use hicsr::loader::{batch_plan, BatchPolicy};
use hicsr::reassemble::{reassemble, OverlapPolicy, ReassemblyConfig};
use indexmap::IndexMap;
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use test_utils::*;

/// Property: a letter prefix never changes the parsed number
#[test]
fn prop_digits_ignore_prefix() {
    proptest!(|(value in 0usize..1_000_000, prefix in "[a-z]{0,3}")| {
        let plain = value.to_string();
        let tagged = format!("{prefix}{plain}");
        prop_assert_eq!(extract_digits(&tagged).unwrap(), value);
        prop_assert_eq!(extract_digits(&plain).unwrap(), value);
    });
}

/// Property: formatted chunking tokens parse back to the same parameters
#[test]
fn prop_params_from_generated_name() {
    proptest!(|(
        chunk in 1usize..200,
        stride in 1usize..200,
        bound in 0usize..1000,
        pool in prop_oneof![Just(0usize), 2usize..32]
    )| {
        let pool_token = if pool == 0 { "nonpool".to_string() } else { format!("p{pool}") };
        let name = format!("hicsr_1000040000_c{chunk}_s{stride}_b{bound}_{pool_token}_train.npz");
        let params = ChunkParams::from_filename(&name).unwrap();
        prop_assert_eq!(params.chunk, chunk);
        prop_assert_eq!(params.stride, stride);
        prop_assert_eq!(params.bound, bound);
        prop_assert_eq!(params.scale, pool.max(1));
    });
}

/// Property: shuffled plans hold floor(N/B) full batches of distinct samples
#[test]
fn prop_shuffled_batch_counts() {
    proptest!(|(n in 0usize..300, batch in 1usize..70, seed in any::<u64>())| {
        let mut rng = StdRng::seed_from_u64(seed);
        let plan = batch_plan(n, batch, BatchPolicy::Shuffled, &mut rng);
        prop_assert_eq!(plan.len(), n / batch);
        prop_assert!(plan.iter().all(|b| b.len() == batch));

        let mut seen: Vec<usize> = plan.into_iter().flatten().collect();
        let total = seen.len();
        seen.sort_unstable();
        seen.dedup();
        prop_assert_eq!(seen.len(), total);
        prop_assert!(seen.iter().all(|&i| i < n));
    });
}

/// Property: sequential plans cover 0..N in order with only the last batch short
#[test]
fn prop_sequential_covers_all() {
    proptest!(|(n in 0usize..300, batch in 1usize..70)| {
        let mut rng = StdRng::seed_from_u64(0);
        let plan = batch_plan(n, batch, BatchPolicy::Sequential, &mut rng);
        prop_assert_eq!(plan.len(), n.div_ceil(batch));
        if let Some((last, full)) = plan.split_last() {
            prop_assert!(full.iter().all(|b| b.len() == batch));
            prop_assert!(!last.is_empty() && last.len() <= batch);
        }
        let flat: Vec<usize> = plan.into_iter().flatten().collect();
        prop_assert_eq!(flat, (0..n).collect::<Vec<_>>());
    });
}

/// Property: non-overlapping tilings reproduce the matrix inside the bound
/// and leave everything beyond it zero
#[test]
fn prop_tiling_reassembles() {
    proptest!(|(chunk in 1usize..6, tiles in 1usize..6, bound_tiles in 0usize..6, seed in 0u64..50)| {
        let dim = chunk * tiles;
        let bound = bound_tiles * chunk;
        let params = ChunkParams::new(chunk, chunk, bound, "nonpool").unwrap();
        let chrom = SyntheticChrom {
            matrix: contact_matrix(dim, seed),
            ..SyntheticChrom::dense(1, dim)
        };
        let dataset = tile_dataset(std::slice::from_ref(&chrom), &params, false);

        let config = ReassemblyConfig {
            bound: Some(bound),
            overlap: OverlapPolicy::Overwrite,
            crop: 0,
            expand: false,
        };
        let record = reassemble(&dataset.data, &dataset.inds, &dataset.compacts, &config).unwrap();
        let mat = &record[&1];
        prop_assert_eq!(mat.dim(), (dim, dim));

        for i in 0..dim {
            for j in 0..dim {
                let inside = (i / chunk).abs_diff(j / chunk) * chunk <= bound;
                let expected = if inside { chrom.matrix[[i, j]] } else { 0.0 };
                prop_assert_eq!(mat[[i, j]], expected, "cell ({}, {})", i, j);
            }
        }
    });
}

/// Property: averaging identical overlapping chunks changes nothing
#[test]
fn prop_average_of_consistent_overlaps() {
    proptest!(|(chunk in 2usize..5, steps in 1usize..5, seed in 0u64..50)| {
        let stride = 1;
        let dim = chunk + steps;
        let params = ChunkParams::new(chunk, stride, dim, "nonpool").unwrap();
        let chrom = SyntheticChrom {
            matrix: contact_matrix(dim, seed),
            ..SyntheticChrom::dense(1, dim)
        };
        let dataset = tile_dataset(std::slice::from_ref(&chrom), &params, false);
        let config = ReassemblyConfig {
            bound: None,
            overlap: OverlapPolicy::Average,
            ..ReassemblyConfig::default()
        };
        let record = reassemble(&dataset.data, &dataset.inds, &IndexMap::new(), &config).unwrap();
        let mat = &record[&1];
        for (a, b) in mat.iter().zip(chrom.matrix.iter()) {
            prop_assert!((a - b).abs() < 1e-5);
        }
    });
}
