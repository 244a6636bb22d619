/// Chunked Hi-C dataset archives
///
/// A dataset holds stacked low-resolution chunks, optional high-resolution
/// targets, one index row per chunk and the per-chromosome compaction
/// vectors and full sizes needed to put predictions back in place.
use anyhow::{bail, ensure, Context, Result};
use indexmap::IndexMap;
use ndarray::{Array1, Array2, Array4, ArrayD, Axis, Ix1, Ix2, Ix4};
use std::path::Path;

use crate::format_io::{
    create_npz, finish_npz, has_array, open_npz, read_f32, read_i64, write_array,
};

pub type ChromId = i64;

/// Layout of the per-chunk index rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexLayout {
    /// `(chrom, row_start, col_start)`
    Triple,
    /// `(chrom, compact_size, row_start, col_start)`
    WithSize,
}

impl IndexLayout {
    fn from_columns(cols: usize) -> Result<Self> {
        match cols {
            3 => Ok(IndexLayout::Triple),
            4 => Ok(IndexLayout::WithSize),
            n => bail!("Index array must have 3 or 4 columns, found {}", n),
        }
    }
}

/// Location of one chunk inside its chromosome's compact matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkIndex {
    pub chrom: ChromId,
    pub row: usize,
    pub col: usize,
    /// Compact dimension recorded alongside the index, if any
    pub compact_size: Option<usize>,
}

/// Decode one index row
pub fn chunk_index(row: ndarray::ArrayView1<i64>) -> Result<ChunkIndex> {
    let layout = IndexLayout::from_columns(row.len())?;
    let coord = |v: i64| -> Result<usize> {
        usize::try_from(v).with_context(|| format!("Negative chunk coordinate {v}"))
    };
    Ok(match layout {
        IndexLayout::Triple => ChunkIndex {
            chrom: row[0],
            row: coord(row[1])?,
            col: coord(row[2])?,
            compact_size: None,
        },
        IndexLayout::WithSize => ChunkIndex {
            chrom: row[0],
            compact_size: Some(coord(row[1])?),
            row: coord(row[2])?,
            col: coord(row[3])?,
        },
    })
}

#[derive(Debug, Clone)]
pub struct ChunkDataset {
    /// N x 1 x h x w low-resolution chunks
    pub data: Array4<f32>,
    /// N x 1 x H x W high-resolution targets (training archives only)
    pub target: Option<Array4<f32>>,
    /// N x 3 or N x 4 index rows
    pub inds: Array2<i64>,
    pub compacts: IndexMap<ChromId, Array1<i64>>,
    pub sizes: IndexMap<ChromId, usize>,
}

impl ChunkDataset {
    pub fn new(data: Array4<f32>, target: Option<Array4<f32>>, inds: Array2<i64>) -> Result<Self> {
        let dataset = ChunkDataset {
            data,
            target,
            inds,
            compacts: IndexMap::new(),
            sizes: IndexMap::new(),
        };
        dataset.validate()?;
        Ok(dataset)
    }

    /// Attach a chromosome's compaction vector and full dimension
    pub fn with_chromosome(mut self, chrom: ChromId, compact: Array1<i64>, size: usize) -> Result<Self> {
        self.compacts.insert(chrom, compact);
        self.sizes.insert(chrom, size);
        self.validate()?;
        Ok(self)
    }

    /// Number of chunks
    pub fn len(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn index_layout(&self) -> Result<IndexLayout> {
        IndexLayout::from_columns(self.inds.ncols())
    }

    pub fn chunk_index(&self, i: usize) -> Result<ChunkIndex> {
        chunk_index(self.inds.row(i))
    }

    /// Spatial extent of the low-resolution chunks
    pub fn input_extent(&self) -> (usize, usize) {
        let s = self.data.shape();
        (s[2], s[3])
    }

    pub fn validate(&self) -> Result<()> {
        let n = self.len();
        ensure!(
            self.data.len_of(Axis(1)) == 1,
            "Chunks must have a single channel, found {}",
            self.data.len_of(Axis(1))
        );
        if let Some(target) = &self.target {
            ensure!(
                target.len_of(Axis(0)) == n,
                "Target count {} does not match data count {}",
                target.len_of(Axis(0)),
                n
            );
        }
        ensure!(
            self.inds.nrows() == n,
            "Index count {} does not match data count {}",
            self.inds.nrows(),
            n
        );
        self.index_layout()?;

        for (chrom, compact) in &self.compacts {
            let size = self
                .sizes
                .get(chrom)
                .with_context(|| format!("Chromosome {chrom} has a compaction vector but no size"))?;
            ensure!(
                compact.len() <= *size,
                "Compaction vector of chromosome {} has {} entries, larger than size {}",
                chrom,
                compact.len(),
                size
            );
            ensure!(
                compact.iter().all(|&c| c >= 0 && (c as usize) < *size),
                "Compaction vector of chromosome {} has indices outside 0..{}",
                chrom,
                size
            );
        }
        Ok(())
    }

    /// Load an archive; `target` is read when present
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut npz = open_npz(path)?;

        let data = as_chunks(read_f32(&mut npz, "data")?)
            .with_context(|| format!("Bad 'data' array in {}", path.display()))?;
        let target = if has_array(&mut npz, "target")? {
            Some(
                as_chunks(read_f32(&mut npz, "target")?)
                    .with_context(|| format!("Bad 'target' array in {}", path.display()))?,
            )
        } else {
            None
        };
        let inds = read_i64(&mut npz, "inds")?
            .into_dimensionality::<Ix2>()
            .with_context(|| format!("'inds' in {} must be two-dimensional", path.display()))?;

        let mut compacts = IndexMap::new();
        let mut sizes = IndexMap::new();
        if has_array(&mut npz, "chroms")? {
            let chroms = read_i64(&mut npz, "chroms")?.into_dimensionality::<Ix1>()?;
            let chrom_sizes = read_i64(&mut npz, "sizes")?.into_dimensionality::<Ix1>()?;
            ensure!(
                chroms.len() == chrom_sizes.len(),
                "'chroms' and 'sizes' differ in length in {}",
                path.display()
            );
            for (&chrom, &size) in chroms.iter().zip(chrom_sizes.iter()) {
                let compact = read_i64(&mut npz, &compact_key(chrom))?
                    .into_dimensionality::<Ix1>()
                    .with_context(|| format!("Bad compaction vector for chromosome {chrom}"))?;
                compacts.insert(chrom, compact);
                sizes.insert(
                    chrom,
                    usize::try_from(size).with_context(|| format!("Negative size for chromosome {chrom}"))?,
                );
            }
        }

        let dataset = ChunkDataset {
            data,
            target,
            inds,
            compacts,
            sizes,
        };
        dataset
            .validate()
            .with_context(|| format!("Inconsistent dataset {}", path.display()))?;
        log::debug!(
            "Loaded {} chunks ({} chromosomes) from {}",
            dataset.len(),
            dataset.compacts.len(),
            path.display()
        );
        Ok(dataset)
    }

    /// Write the archive in the layout `load` reads
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut npz = create_npz(path.as_ref())?;
        write_array(&mut npz, "data", &self.data)?;
        if let Some(target) = &self.target {
            write_array(&mut npz, "target", target)?;
        }
        write_array(&mut npz, "inds", &self.inds)?;

        let chroms: Array1<i64> = self.compacts.keys().copied().collect();
        let sizes: Array1<i64> = self
            .compacts
            .keys()
            .map(|c| self.sizes.get(c).map_or(0, |&s| s as i64))
            .collect();
        write_array(&mut npz, "chroms", &chroms)?;
        write_array(&mut npz, "sizes", &sizes)?;
        for (chrom, compact) in &self.compacts {
            write_array(&mut npz, &compact_key(*chrom), compact)?;
        }
        finish_npz(npz)
    }
}

fn compact_key(chrom: ChromId) -> String {
    format!("compact_{chrom}")
}

/// Accept N x h x w or N x 1 x h x w
fn as_chunks(array: ArrayD<f32>) -> Result<Array4<f32>> {
    match array.ndim() {
        3 => Ok(array.insert_axis(Axis(1)).into_dimensionality::<Ix4>()?),
        4 => Ok(array.into_dimensionality::<Ix4>()?),
        n => bail!("Chunk array must be 3- or 4-dimensional, found {} dimensions", n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::TempDir;

    fn tiny() -> ChunkDataset {
        let data = Array4::from_shape_fn((3, 1, 2, 2), |(n, _, i, j)| (n * 4 + i * 2 + j) as f32);
        let inds = array![[1i64, 0, 0], [1, 0, 2], [2, 2, 2]];
        ChunkDataset::new(data.clone(), Some(data), inds)
            .unwrap()
            .with_chromosome(1, array![0i64, 1, 2, 3], 6)
            .unwrap()
            .with_chromosome(2, array![1i64, 2, 4, 5], 6)
            .unwrap()
    }

    #[test]
    fn test_save_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tiny.npz");
        let dataset = tiny();
        dataset.save(&path).unwrap();

        let loaded = ChunkDataset::load(&path).unwrap();
        assert_eq!(loaded.data, dataset.data);
        assert_eq!(loaded.target, dataset.target);
        assert_eq!(loaded.inds, dataset.inds);
        assert_eq!(loaded.compacts[&2], array![1i64, 2, 4, 5]);
        assert_eq!(loaded.sizes[&1], 6);
        assert_eq!(loaded.compacts.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let data = Array4::<f32>::zeros((3, 1, 2, 2));
        let target = Array4::<f32>::zeros((2, 1, 2, 2));
        let inds = Array2::<i64>::zeros((3, 3));
        assert!(ChunkDataset::new(data.clone(), Some(target), inds).is_err());
        assert!(ChunkDataset::new(data, None, Array2::zeros((3, 5))).is_err());
    }

    #[test]
    fn test_compaction_longer_than_size_rejected() {
        let dataset = ChunkDataset::new(
            Array4::zeros((1, 1, 2, 2)),
            None,
            array![[1i64, 0, 0]],
        )
        .unwrap();
        assert!(dataset.with_chromosome(1, array![0i64, 1, 2], 2).is_err());
    }

    #[test]
    fn test_four_column_index() {
        let idx = chunk_index(array![3i64, 80, 40, 0].view()).unwrap();
        assert_eq!(idx.chrom, 3);
        assert_eq!(idx.compact_size, Some(80));
        assert_eq!((idx.row, idx.col), (40, 0));
        assert!(chunk_index(array![3i64, -1, 0].view()).is_err());
    }
}
