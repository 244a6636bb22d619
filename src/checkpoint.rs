/// Parameter snapshots of generator and discriminator networks
///
/// A checkpoint is an `.npz` archive holding one float32 array per named
/// parameter. Generator checkpoints also record the upscaling factor under
/// `meta.scale`. Loading checks that every parameter the network expects is
/// present with the same shape.
use anyhow::{bail, ensure, Context, Result};
use chrono::Local;
use ndarray::Array1;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::chunk_params::{ChunkParams, Resolutions, TOOL_TAG};
use crate::format_io::{create_npz, finish_npz, has_array, open_npz, read_f32, read_i64, write_array};
use crate::network::{Generator, Network};

/// Directory tried when a checkpoint path does not exist as given
pub const DEFAULT_FALLBACK_DIR: &str = "save";

/// Archive member holding a generator's upscaling factor
pub const SCALE_KEY: &str = "meta.scale";

/// What a checkpoint file holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointRole {
    BestGenerator,
    FinalGenerator,
    FinalDiscriminator,
}

impl fmt::Display for CheckpointRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            CheckpointRole::BestGenerator => "bestg",
            CheckpointRole::FinalGenerator => "finalg",
            CheckpointRole::FinalDiscriminator => "finald",
        };
        f.write_str(tag)
    }
}

/// Month/day/hour/minute stamp shared by every checkpoint of one run
pub fn run_stamp() -> String {
    Local::now().format("%m_%d_%H_%M").to_string()
}

/// `<stamp>_<role>_<high><low>_c<chunk>_s<stride>_b<bound>_<pool>_hicsr.npz`
pub fn checkpoint_filename(
    stamp: &str,
    role: CheckpointRole,
    resolutions: &Resolutions,
    params: &ChunkParams,
) -> String {
    format!(
        "{stamp}_{role}_{}_{}_{TOOL_TAG}.npz",
        resolutions.tag(),
        params.tag()
    )
}

/// The literal path if it exists, else the same path under `fallback_dir`
pub fn resolve_checkpoint<P: AsRef<Path>, Q: AsRef<Path>>(path: P, fallback_dir: Q) -> Result<PathBuf> {
    let path = path.as_ref();
    if path.is_file() {
        return Ok(path.to_path_buf());
    }
    let fallback = fallback_dir.as_ref().join(path);
    if fallback.is_file() {
        return Ok(fallback);
    }
    bail!(
        "Checkpoint file not found: {} (also tried {})",
        path.display(),
        fallback.display()
    )
}

/// Write every parameter of `net` to `path`, replacing any existing file
pub fn save_params<N: Network + ?Sized, P: AsRef<Path>>(net: &N, path: P) -> Result<()> {
    write_checkpoint(net, None, path.as_ref())
}

/// Write a generator's parameters together with its upscaling factor
pub fn save_generator<G: Generator + ?Sized, P: AsRef<Path>>(generator: &G, path: P) -> Result<()> {
    write_checkpoint(generator, Some(generator.scale()), path.as_ref())
}

/// The archive is written next to its destination and renamed into place,
/// so an interrupted save never leaves a truncated best checkpoint.
fn write_checkpoint<N: Network + ?Sized>(net: &N, scale: Option<usize>, path: &Path) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let temp = tempfile::Builder::new()
        .prefix(".ckpt")
        .suffix(".npz")
        .tempfile_in(dir)
        .with_context(|| format!("Failed to create temporary checkpoint in {}", dir.display()))?;

    let mut npz = create_npz(temp.path())?;
    for (name, value) in net.params() {
        write_array(&mut npz, name, value)?;
    }
    if let Some(scale) = scale {
        write_array(&mut npz, SCALE_KEY, &Array1::from_elem(1, scale as i64))?;
    }
    finish_npz(npz).with_context(|| format!("Failed to finalize checkpoint {}", path.display()))?;

    temp.persist(path)
        .with_context(|| format!("Failed to move checkpoint into {}", path.display()))?;
    log::info!("Saved checkpoint {}", path.display());
    Ok(())
}

/// Load parameters saved by `save_params` into `net`
pub fn load_params<N: Network + ?Sized, P: AsRef<Path>>(net: &mut N, path: P) -> Result<()> {
    let path = path.as_ref();
    let mut npz = open_npz(path)?;

    let mut loaded = Vec::with_capacity(net.params().len());
    for (name, expected) in net.params() {
        if !has_array(&mut npz, name)? {
            bail!(
                "Checkpoint {} has no parameter '{}'",
                path.display(),
                name
            );
        }
        let value = read_f32(&mut npz, name)?;
        if value.shape() != expected.shape() {
            bail!(
                "Parameter '{}' in {} has shape {:?}, network expects {:?}",
                name,
                path.display(),
                value.shape(),
                expected.shape()
            );
        }
        loaded.push((name.clone(), value));
    }

    let params = net.params_mut();
    for (name, value) in loaded {
        params.insert(name, value);
    }
    Ok(())
}

/// Upscaling factor recorded in a generator checkpoint, if any
pub fn checkpoint_scale<P: AsRef<Path>>(path: P) -> Result<Option<usize>> {
    let path = path.as_ref();
    let mut npz = open_npz(path)?;
    if !has_array(&mut npz, SCALE_KEY)? {
        return Ok(None);
    }
    let values = read_i64(&mut npz, SCALE_KEY)?;
    ensure!(
        values.len() == 1,
        "'{}' in {} must hold one value, found {}",
        SCALE_KEY,
        path.display(),
        values.len()
    );
    let scale = values.iter().next().copied().unwrap_or(0);
    let scale = usize::try_from(scale)
        .ok()
        .filter(|&s| s > 0)
        .with_context(|| format!("Invalid generator scale {} in {}", scale, path.display()))?;
    Ok(Some(scale))
}

/// Load a generator checkpoint after checking its recorded upscaling factor
pub fn load_generator_params<G: Generator + ?Sized, P: AsRef<Path>>(generator: &mut G, path: P) -> Result<()> {
    let path = path.as_ref();
    match checkpoint_scale(path)? {
        Some(scale) if scale != generator.scale() => bail!(
            "Checkpoint {} was trained at scale {}, but the dataset needs scale {}",
            path.display(),
            scale,
            generator.scale()
        ),
        Some(_) => load_params(generator, path),
        None => bail!(
            "Checkpoint {} records no generator scale ('{}')",
            path.display(),
            SCALE_KEY
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conv_net::{ConvGenerator, PoolDiscriminator, CONV_WEIGHT};
    use ndarray::Array4;
    use tempfile::TempDir;

    #[test]
    fn test_checkpoint_name() {
        let params = ChunkParams::new(40, 40, 201, "nonpool").unwrap();
        let name = checkpoint_filename(
            "10_19_08_30",
            CheckpointRole::BestGenerator,
            &Resolutions::new(10000, 40000),
            &params,
        );
        assert_eq!(name, "10_19_08_30_bestg_1000040000_c40_s40_b201_nonpool_hicsr.npz");
    }

    #[test]
    fn test_round_trip_preserves_output() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("g.npz");

        let mut trained = ConvGenerator::new(2);
        trained.params_mut().get_mut(CONV_WEIGHT).unwrap()[[0, 0]] = 0.25;
        save_params(&trained, &path).unwrap();

        let mut fresh = ConvGenerator::new(2);
        load_params(&mut fresh, &path).unwrap();

        let x = Array4::from_shape_fn((2, 1, 3, 3), |(s, _, i, j)| (s + i * 3 + j) as f32);
        assert_eq!(fresh.forward(&x).unwrap(), trained.forward(&x).unwrap());
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("g5.npz");
        save_params(&ConvGenerator::with_kernel(1, 5), &path).unwrap();
        let err = load_params(&mut ConvGenerator::new(1), &path).unwrap_err();
        assert!(err.to_string().contains("shape"));
    }

    #[test]
    fn test_generator_scale_recorded_and_checked() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("g4.npz");
        save_generator(&ConvGenerator::new(4), &path).unwrap();
        assert_eq!(checkpoint_scale(&path).unwrap(), Some(4));

        let err = load_generator_params(&mut ConvGenerator::new(1), &path).unwrap_err();
        assert!(err.to_string().contains("scale 4"), "{err}");
        load_generator_params(&mut ConvGenerator::new(4), &path).unwrap();
    }

    #[test]
    fn test_generator_load_requires_scale() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain.npz");
        save_params(&ConvGenerator::new(1), &path).unwrap();
        assert_eq!(checkpoint_scale(&path).unwrap(), None);
        assert!(load_generator_params(&mut ConvGenerator::new(1), &path).is_err());

        // extra scale entry does not disturb plain parameter loading
        let scaled = dir.path().join("scaled.npz");
        save_generator(&ConvGenerator::new(2), &scaled).unwrap();
        load_params(&mut ConvGenerator::new(2), &scaled).unwrap();

        let d = dir.path().join("d.npz");
        save_params(&PoolDiscriminator::new(), &d).unwrap();
        load_params(&mut PoolDiscriminator::new(), &d).unwrap();
    }

    #[test]
    fn test_resolve_with_fallback() {
        let dir = TempDir::new().unwrap();
        let save_dir = dir.path().join("save");
        std::fs::create_dir_all(&save_dir).unwrap();
        save_params(&ConvGenerator::new(1), save_dir.join("model.npz")).unwrap();

        let resolved = resolve_checkpoint("model.npz", &save_dir).unwrap();
        assert_eq!(resolved, save_dir.join("model.npz"));
        assert!(resolve_checkpoint("absent.npz", &save_dir).is_err());
    }
}
