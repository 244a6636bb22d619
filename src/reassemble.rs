/// Reassembly of predicted chunks into per-chromosome matrices
///
/// Chunk index rows give each prediction's origin inside its chromosome's
/// compact matrix (output-resolution bins). Chunks whose origin lies further
/// than `bound` bins from the diagonal are skipped; uncovered cells stay zero.
use anyhow::{ensure, Context, Result};
use indexmap::IndexMap;
use ndarray::{s, Array1, Array2, Array4, ArrayView2, Axis};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::dataset::{chunk_index, ChromId, ChunkDataset, ChunkIndex};
use crate::format_io::{create_npz, finish_npz, write_array};

/// How cells covered by more than one chunk are resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverlapPolicy {
    /// Chunks are written in input order; the last write wins
    #[default]
    Overwrite,
    /// Every covered cell holds the mean of all chunk values written to it
    Average,
}

impl FromStr for OverlapPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "overwrite" | "last" => Ok(OverlapPolicy::Overwrite),
            "average" | "mean" => Ok(OverlapPolicy::Average),
            other => Err(format!(
                "Unknown overlap policy '{other}'. Use 'overwrite' or 'average'"
            )),
        }
    }
}

impl fmt::Display for OverlapPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverlapPolicy::Overwrite => f.write_str("overwrite"),
            OverlapPolicy::Average => f.write_str("average"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReassemblyConfig {
    /// Maximum |row_start - col_start| of chunks to place; `None` places all
    pub bound: Option<usize>,
    pub overlap: OverlapPolicy,
    /// Border removed from every side of a chunk before placement
    pub crop: usize,
    /// Re-expand compact matrices to full coordinates before saving
    pub expand: bool,
}

/// Chromosome id to reconstructed compact matrix
pub type PredictionRecord = IndexMap<ChromId, Array2<f32>>;

/// Decoded index rows per chromosome as `(row number, index)` pairs,
/// ascending by id and in input order within each chromosome
pub type ChunkGroups = IndexMap<ChromId, Vec<(usize, ChunkIndex)>>;

/// Accumulation buffer for one chromosome
struct Canvas {
    values: Array2<f32>,
    counts: Option<Array2<u32>>,
}

impl Canvas {
    fn new(dim: usize, overlap: OverlapPolicy) -> Self {
        Canvas {
            values: Array2::zeros((dim, dim)),
            counts: match overlap {
                OverlapPolicy::Overwrite => None,
                OverlapPolicy::Average => Some(Array2::zeros((dim, dim))),
            },
        }
    }

    fn place(&mut self, chunk: ArrayView2<f32>, row: usize, col: usize) {
        let dim = self.values.nrows();
        if row >= dim || col >= dim {
            return;
        }
        let h = chunk.nrows().min(dim - row);
        let w = chunk.ncols().min(dim - col);
        let src = chunk.slice(s![..h, ..w]);
        let mut dst = self.values.slice_mut(s![row..row + h, col..col + w]);
        match &mut self.counts {
            None => dst.assign(&src),
            Some(counts) => {
                dst += &src;
                counts
                    .slice_mut(s![row..row + h, col..col + w])
                    .mapv_inplace(|c| c + 1);
            }
        }
    }

    fn finish(self) -> Array2<f32> {
        let mut values = self.values;
        if let Some(counts) = self.counts {
            values.zip_mut_with(&counts, |v, &c| {
                if c > 1 {
                    *v /= c as f32;
                }
            });
        }
        values
    }
}

/// Remove `crop` cells from every side of a chunk
fn cropped(chunk: ArrayView2<f32>, crop: usize) -> ArrayView2<f32> {
    if crop == 0 {
        return chunk;
    }
    let (h, w) = chunk.dim();
    let (r_end, c_end) = (h.saturating_sub(crop).max(crop), w.saturating_sub(crop).max(crop));
    chunk.slice_move(s![crop.min(h)..r_end.min(h), crop.min(w)..c_end.min(w)])
}

/// Decode every index row once and bucket it by chromosome
pub fn group_chunks(inds: &Array2<i64>) -> Result<ChunkGroups> {
    let mut groups = ChunkGroups::new();
    for (k, row) in inds.outer_iter().enumerate() {
        let idx = chunk_index(row).with_context(|| format!("Invalid index row {k}"))?;
        groups.entry(idx.chrom).or_default().push((k, idx));
    }
    groups.sort_keys();
    Ok(groups)
}

/// Compact dimension of every grouped chromosome
///
/// Taken from the compaction vector when known, then from a size column in
/// the index rows, and finally from the furthest chunk extent.
fn group_dims(
    groups: &ChunkGroups,
    extent: usize,
    compacts: &IndexMap<ChromId, Array1<i64>>,
) -> IndexMap<ChromId, usize> {
    let mut dims = IndexMap::with_capacity(groups.len());
    for (&chrom, chunks) in groups {
        let dim = if let Some(compact) = compacts.get(&chrom) {
            compact.len()
        } else if let Some(size) = chunks.iter().rev().find_map(|(_, idx)| idx.compact_size) {
            size
        } else {
            let reach = chunks
                .iter()
                .map(|(_, idx)| idx.row.max(idx.col) + extent)
                .max()
                .unwrap_or(0);
            log::warn!(
                "Chromosome {} has no compaction vector; sizing its matrix from chunk extents ({})",
                chrom,
                reach
            );
            reach
        };
        dims.insert(chrom, dim);
    }
    dims
}

fn check_rows(outputs: &Array4<f32>, inds: &Array2<i64>) -> Result<()> {
    ensure!(
        outputs.len_of(Axis(0)) == inds.nrows(),
        "{} outputs but {} index rows",
        outputs.len_of(Axis(0)),
        inds.nrows()
    );
    Ok(())
}

/// Place one chromosome's chunks; row numbers index `outputs`
fn place_chunks(
    chrom: ChromId,
    dim: usize,
    outputs: &Array4<f32>,
    chunks: &[(usize, ChunkIndex)],
    config: &ReassemblyConfig,
) -> Array2<f32> {
    let mut canvas = Canvas::new(dim, config.overlap);
    let mut placed = 0usize;
    let mut skipped = 0usize;

    for &(k, idx) in chunks {
        if let Some(bound) = config.bound {
            if idx.row.abs_diff(idx.col) > bound {
                skipped += 1;
                continue;
            }
        }
        let chunk = outputs.index_axis(Axis(0), k);
        let chunk = chunk.index_axis(Axis(0), 0);
        canvas.place(cropped(chunk, config.crop), idx.row, idx.col);
        placed += 1;
    }

    log::debug!(
        "Chromosome {}: placed {} chunks into {}x{} matrix ({} beyond bound)",
        chrom,
        placed,
        dim,
        dim,
        skipped
    );
    canvas.finish()
}

/// Rebuild one chromosome's compact matrix from the chunks tagged with it
pub fn reassemble_chromosome(
    chrom: ChromId,
    dim: usize,
    outputs: &Array4<f32>,
    inds: &Array2<i64>,
    config: &ReassemblyConfig,
) -> Result<Array2<f32>> {
    check_rows(outputs, inds)?;
    let mut chunks = Vec::new();
    for (k, row) in inds.outer_iter().enumerate() {
        let idx = chunk_index(row).with_context(|| format!("Invalid index row {k}"))?;
        if idx.chrom == chrom {
            chunks.push((k, idx));
        }
    }
    Ok(place_chunks(chrom, dim, outputs, &chunks, config))
}

/// Rebuild every chromosome present in `inds`, ascending by id
pub fn reassemble(
    outputs: &Array4<f32>,
    inds: &Array2<i64>,
    compacts: &IndexMap<ChromId, Array1<i64>>,
    config: &ReassemblyConfig,
) -> Result<PredictionRecord> {
    check_rows(outputs, inds)?;
    let groups = group_chunks(inds)?;
    let dims = group_dims(&groups, outputs.len_of(Axis(2)), compacts);
    log::info!("Reconstructing chromosomes {:?}", dims.keys().collect::<Vec<_>>());

    let mut record = PredictionRecord::new();
    for ((&chrom, chunks), &dim) in groups.iter().zip(dims.values()) {
        record.insert(chrom, place_chunks(chrom, dim, outputs, chunks, config));
    }
    Ok(record)
}

/// Map a compact matrix back to full coordinates: `full[c[i], c[j]] = m[i, j]`
pub fn spread(compact_mat: &Array2<f32>, compaction: &Array1<i64>, size: usize) -> Result<Array2<f32>> {
    let n = compaction.len();
    ensure!(
        compact_mat.dim() == (n, n),
        "Compact matrix is {:?} but compaction vector has {} entries",
        compact_mat.dim(),
        n
    );
    let positions: Vec<usize> = compaction
        .iter()
        .map(|&c| {
            usize::try_from(c)
                .ok()
                .filter(|&c| c < size)
                .with_context(|| format!("Compaction index {c} outside full size {size}"))
        })
        .collect::<Result<_>>()?;

    let mut full = Array2::zeros((size, size));
    for (i, &pi) in positions.iter().enumerate() {
        for (j, &pj) in positions.iter().enumerate() {
            full[[pi, pj]] = compact_mat[[i, j]];
        }
    }
    Ok(full)
}

/// `predict_chr<id>_<high_res>.npz`
pub fn prediction_filename(chrom: ChromId, high_res: u64) -> String {
    format!("predict_chr{chrom}_{high_res}.npz")
}

/// Write one chromosome archive holding `hic` and `compact`
pub fn save_prediction<P: AsRef<Path>>(
    path: P,
    hic: &Array2<f32>,
    compaction: &Array1<i64>,
) -> Result<()> {
    let path = path.as_ref();
    let mut npz = create_npz(path)?;
    write_array(&mut npz, "hic", hic)?;
    write_array(&mut npz, "compact", compaction)?;
    finish_npz(npz).with_context(|| format!("Failed to write {}", path.display()))?;
    log::info!("Saving file: {}", path.display());
    Ok(())
}

/// Reassemble, optionally re-expand and persist every chromosome of `dataset`
///
/// Chromosomes without a compaction vector are saved in compact coordinates
/// with an identity `compact` array. Only one chromosome's matrices are alive
/// at a time.
pub fn save_predictions<P: AsRef<Path>>(
    outputs: &Array4<f32>,
    inds: &Array2<i64>,
    dataset: &ChunkDataset,
    config: &ReassemblyConfig,
    high_res: u64,
    out_dir: P,
) -> Result<Vec<PathBuf>> {
    let out_dir = out_dir.as_ref();
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create output directory {}", out_dir.display()))?;

    check_rows(outputs, inds)?;
    let groups = group_chunks(inds)?;
    let dims = group_dims(&groups, outputs.len_of(Axis(2)), &dataset.compacts);
    for chrom in dataset.compacts.keys() {
        if !groups.contains_key(chrom) {
            log::warn!("No predicted chunks for chromosome {}, skipping", chrom);
        }
    }

    let mut written = Vec::with_capacity(groups.len());
    for ((&chrom, chunks), &dim) in groups.iter().zip(dims.values()) {
        let compact_mat = place_chunks(chrom, dim, outputs, chunks, config);
        let (hic, compaction) = match dataset.compacts.get(&chrom) {
            Some(compaction) if config.expand => {
                let size = *dataset
                    .sizes
                    .get(&chrom)
                    .with_context(|| format!("No size recorded for chromosome {chrom}"))?;
                (spread(&compact_mat, compaction, size)?, compaction.clone())
            }
            Some(compaction) => (compact_mat, compaction.clone()),
            None => (compact_mat, Array1::from_iter(0..dim as i64)),
        };
        let path = out_dir.join(prediction_filename(chrom, high_res));
        save_prediction(&path, &hic, &compaction)?;
        written.push(path);
    }
    Ok(written)
}
