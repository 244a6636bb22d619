/// chunkstats - Summary of chunked Hi-C dataset archives
///
/// Reports chunk counts, compact and full matrix sizes and value ranges for
/// each chromosome in a dataset archive.
use anyhow::Result;
use clap::Parser;
use indexmap::IndexMap;
use ndarray::{Array4, Axis};

use hicsr::chunk_params::{ChunkParams, Resolutions};
use hicsr::dataset::{ChromId, ChunkDataset};

#[derive(Parser)]
#[clap(
    name = "chunkstats",
    about = "Statistics for chunked Hi-C dataset archives (.npz)"
)]
struct Args {
    /// Dataset archive
    file: String,

    /// Show per-chromosome offset ranges and target values
    #[clap(short = 'd', long)]
    detailed: bool,

    /// Low resolution in bp, used to split the file name's resolution token
    #[clap(long = "low-res", default_value = "40000")]
    low_res: u64,
}

#[derive(Debug, Clone, Copy)]
struct Range {
    min: f32,
    max: f32,
}

impl Range {
    fn empty() -> Self {
        Range {
            min: f32::INFINITY,
            max: f32::NEG_INFINITY,
        }
    }

    fn add(&mut self, v: f32) {
        self.min = self.min.min(v);
        self.max = self.max.max(v);
    }
}

impl std::fmt::Display for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.min > self.max {
            write!(f, "-")
        } else {
            write!(f, "[{:.4}, {:.4}]", self.min, self.max)
        }
    }
}

#[derive(Debug)]
struct ChromStats {
    chunks: usize,
    max_row: usize,
    max_col: usize,
    max_offset: usize,
    data: Range,
    target: Range,
}

impl Default for ChromStats {
    fn default() -> Self {
        ChromStats {
            chunks: 0,
            max_row: 0,
            max_col: 0,
            max_offset: 0,
            data: Range::empty(),
            target: Range::empty(),
        }
    }
}

fn chunk_range(chunks: &Array4<f32>, i: usize, range: &mut Range) {
    for &v in chunks.index_axis(Axis(0), i).iter() {
        range.add(v);
    }
}

fn collect_stats(dataset: &ChunkDataset) -> Result<IndexMap<ChromId, ChromStats>> {
    let mut per_chrom: IndexMap<ChromId, ChromStats> = IndexMap::new();
    for i in 0..dataset.len() {
        let idx = dataset.chunk_index(i)?;
        let stats = per_chrom.entry(idx.chrom).or_default();
        stats.chunks += 1;
        stats.max_row = stats.max_row.max(idx.row);
        stats.max_col = stats.max_col.max(idx.col);
        stats.max_offset = stats.max_offset.max(idx.row.abs_diff(idx.col));
        chunk_range(&dataset.data, i, &mut stats.data);
        if let Some(target) = &dataset.target {
            chunk_range(target, i, &mut stats.target);
        }
    }
    per_chrom.sort_keys();
    Ok(per_chrom)
}

/// `<high>bp / <low>bp` from the file name, or "unknown"
fn describe_resolutions(file: &str, low_res: u64) -> String {
    match Resolutions::from_filename(file, low_res) {
        Ok(res) => format!("{}bp / {}bp", res.high, res.low),
        Err(_) => "unknown".to_string(),
    }
}

fn format_size(size: Option<usize>) -> String {
    size.map_or_else(|| "?".to_string(), |s| s.to_string())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let dataset = ChunkDataset::load(&args.file)?;
    let per_chrom = collect_stats(&dataset)?;
    let (h, w) = dataset.input_extent();

    println!("\nStatistics for {}:", args.file);
    println!("{}", "=".repeat(60));
    match ChunkParams::from_filename(&args.file) {
        Ok(params) => println!("Chunk parameters:      {:>12}", params.to_string()),
        Err(_) => println!("Chunk parameters:      {:>12}", "unknown"),
    }
    println!(
        "Resolutions:           {:>12}",
        describe_resolutions(&args.file, args.low_res)
    );
    println!("Chunks:                {:>12}", dataset.len());
    println!("Chunk extent:          {:>12}", format!("{h}x{w}"));
    println!(
        "Targets:               {:>12}",
        dataset
            .target
            .as_ref()
            .map_or_else(|| "none".to_string(), |t| format!("{}x{}", t.shape()[2], t.shape()[3]))
    );
    println!("Chromosomes:           {:>12}", per_chrom.len());

    println!("\n{:>6} {:>8} {:>8} {:>8}  data range", "chrom", "chunks", "compact", "full");
    println!("{}", "-".repeat(60));
    for (chrom, stats) in &per_chrom {
        println!(
            "{:>6} {:>8} {:>8} {:>8}  {}",
            chrom,
            stats.chunks,
            format_size(dataset.compacts.get(chrom).map(|c| c.len())),
            format_size(dataset.sizes.get(chrom).copied()),
            stats.data
        );
    }

    if args.detailed {
        println!("\nPer-chromosome detail:");
        println!("{}", "-".repeat(60));
        for (chrom, stats) in &per_chrom {
            println!(
                "chr{:<4} last origin ({}, {}), max |row-col| {}, target {}",
                chrom, stats.max_row, stats.max_col, stats.max_offset, stats.target
            );
        }
        let unused: Vec<_> = dataset
            .compacts
            .keys()
            .filter(|c| !per_chrom.contains_key(*c))
            .collect();
        if !unused.is_empty() {
            println!("Chromosomes without chunks: {unused:?}");
        }
    }

    Ok(())
}
