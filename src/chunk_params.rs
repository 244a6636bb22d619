/// Chunking parameters and the filename conventions that carry them
///
/// Dataset and checkpoint names look like
/// `hicsr_1000040000_c40_s40_b201_nonpool_train.npz`: a tool tag, the
/// resolution pair, four chunking tokens and a trailing split/model tag.
use anyhow::{bail, Context, Result};
use std::fmt;
use std::path::Path;

/// Pool token meaning "no pooling was applied" (scale factor 1)
pub const NO_POOLING: &str = "nonpool";

/// Leading tag of every file name this crate writes
pub const TOOL_TAG: &str = "hicsr";

/// Keep only the ASCII digits of `token` and parse them as a base-10 integer
pub fn extract_digits(token: &str) -> Result<usize> {
    let digits: String = token.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        bail!("Token '{}' contains no digits", token);
    }
    digits
        .parse()
        .with_context(|| format!("Token '{token}' does not fit an integer"))
}

/// Chunk extent, stride between chunk origins, off-diagonal bound (bins) and
/// upscaling factor of one dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkParams {
    pub chunk: usize,
    pub stride: usize,
    pub bound: usize,
    pub scale: usize,
    /// Pool token as written in file names (`nonpool`, `p16`, ...)
    pub pool: String,
}

impl ChunkParams {
    /// Build parameters from a pool token, deriving the scale from it
    pub fn new(chunk: usize, stride: usize, bound: usize, pool: &str) -> Result<Self> {
        Ok(ChunkParams {
            chunk,
            stride,
            bound,
            scale: scale_from_pool(pool)?,
            pool: pool.to_string(),
        })
    }

    /// Recover chunking parameters from a structured dataset file name
    pub fn from_filename<P: AsRef<Path>>(path: P) -> Result<Self> {
        let tokens = info_tokens(path.as_ref())?;
        if tokens.len() < 4 {
            bail!(
                "File name '{}' has {} chunking tokens, expected 4 (c<chunk>_s<stride>_b<bound>_<pool>)",
                path.as_ref().display(),
                tokens.len()
            );
        }

        let parse = |idx: usize, what: &str| {
            extract_digits(&tokens[idx]).with_context(|| {
                format!("Invalid {what} token in '{}'", path.as_ref().display())
            })
        };

        Ok(ChunkParams {
            chunk: parse(0, "chunk")?,
            stride: parse(1, "stride")?,
            bound: parse(2, "bound")?,
            scale: scale_from_pool(&tokens[3]).with_context(|| {
                format!("Invalid pool token in '{}'", path.as_ref().display())
            })?,
            pool: tokens[3].clone(),
        })
    }

    /// `c<chunk>_s<stride>_b<bound>_<pool>`
    pub fn tag(&self) -> String {
        format!(
            "c{}_s{}_b{}_{}",
            self.chunk, self.stride, self.bound, self.pool
        )
    }

    /// True when neighbouring chunks never share cells
    pub fn is_non_overlapping(&self) -> bool {
        self.stride >= self.chunk
    }
}

impl fmt::Display for ChunkParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "chunk={} stride={} bound={} scale={}",
            self.chunk, self.stride, self.bound, self.scale
        )
    }
}

fn scale_from_pool(pool: &str) -> Result<usize> {
    if pool == NO_POOLING {
        Ok(1)
    } else {
        extract_digits(pool)
    }
}

/// Tokens between the resolution pair and the trailing tag
fn info_tokens(path: &Path) -> Result<Vec<String>> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("'{}' has no usable file name", path.display()))?;
    let stem = name.split('.').next().unwrap_or(name);
    let tokens: Vec<&str> = stem.split('_').collect();
    if tokens.len() < 3 {
        return Ok(Vec::new());
    }
    Ok(tokens[2..tokens.len() - 1]
        .iter()
        .map(|t| t.to_string())
        .collect())
}

/// High and low resolution of a dataset, in base pairs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolutions {
    pub high: u64,
    pub low: u64,
}

impl Resolutions {
    pub fn new(high: u64, low: u64) -> Self {
        Resolutions { high, low }
    }

    /// Concatenated `<high><low>` token used in file names
    pub fn tag(&self) -> String {
        format!("{}{}", self.high, self.low)
    }

    /// Split the resolution token of a file name given the known low resolution
    pub fn from_filename<P: AsRef<Path>>(path: P, low: u64) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("'{}' has no usable file name", path.display()))?;
        let stem = name.split('.').next().unwrap_or(name);
        let token = stem
            .split('_')
            .nth(1)
            .with_context(|| format!("No resolution token in '{name}'"))?;
        let low_str = low.to_string();
        let high_str = token
            .strip_suffix(&low_str)
            .filter(|h| !h.is_empty())
            .with_context(|| {
                format!("Resolution token '{token}' does not end with low resolution {low}")
            })?;
        let high = high_str
            .parse()
            .with_context(|| format!("Invalid high resolution in token '{token}'"))?;
        Ok(Resolutions { high, low })
    }
}

/// `hicsr_<high><low>_<tag>_<split>.npz`
pub fn dataset_filename(resolutions: &Resolutions, params: &ChunkParams, split: &str) -> String {
    format!(
        "{TOOL_TAG}_{}_{}_{split}.npz",
        resolutions.tag(),
        params.tag()
    )
}
