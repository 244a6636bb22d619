/// NumPy `.npz` archive access shared by datasets, checkpoints and outputs
///
/// Archives written by NumPy store members as `<key>.npy`; some writers omit
/// the suffix. Lookups accept both spellings. Float arrays may be stored as
/// float32 or float64 and index arrays as int64 or int32; both are widened or
/// narrowed to the crate's working types on read.
use anyhow::{Context, Result};
use ndarray::{ArrayBase, ArrayD, Data, Dimension, IxDyn, OwnedRepr};
use ndarray_npy::{NpzReader, NpzWriter, WritableElement};
use std::fs::File;
use std::path::Path;

pub type NpzIn = NpzReader<File>;
pub type NpzOut = NpzWriter<File>;

/// Open an archive for reading
pub fn open_npz<P: AsRef<Path>>(path: P) -> Result<NpzIn> {
    let path = path.as_ref();
    let file =
        File::open(path).with_context(|| format!("Failed to open archive {}", path.display()))?;
    NpzReader::new(file).with_context(|| format!("Failed to read archive {}", path.display()))
}

/// Create a compressed archive for writing
pub fn create_npz<P: AsRef<Path>>(path: P) -> Result<NpzOut> {
    let path = path.as_ref();
    let file = File::create(path)
        .with_context(|| format!("Failed to create archive {}", path.display()))?;
    Ok(NpzWriter::new_compressed(file))
}

/// Member names with any `.npy` suffix removed
pub fn array_names(npz: &mut NpzIn) -> Result<Vec<String>> {
    Ok(npz
        .names()?
        .into_iter()
        .map(|n| n.strip_suffix(".npy").map(str::to_string).unwrap_or(n))
        .collect())
}

pub fn has_array(npz: &mut NpzIn, key: &str) -> Result<bool> {
    Ok(array_names(npz)?.iter().any(|n| n == key))
}

fn by_name<A>(npz: &mut NpzIn, key: &str) -> Option<ArrayD<A>>
where
    A: ndarray_npy::ReadableElement,
{
    npz.by_name::<OwnedRepr<A>, IxDyn>(&format!("{key}.npy"))
        .or_else(|_| npz.by_name::<OwnedRepr<A>, IxDyn>(key))
        .ok()
}

/// Read a float array stored as float32 or float64
pub fn read_f32(npz: &mut NpzIn, key: &str) -> Result<ArrayD<f32>> {
    if let Some(array) = by_name::<f32>(npz, key) {
        return Ok(array);
    }
    by_name::<f64>(npz, key)
        .map(|a| a.mapv(|v| v as f32))
        .with_context(|| format!("Array '{key}' is missing or not float32/float64"))
}

/// Read an integer array stored as int64 or int32
pub fn read_i64(npz: &mut NpzIn, key: &str) -> Result<ArrayD<i64>> {
    if let Some(array) = by_name::<i64>(npz, key) {
        return Ok(array);
    }
    by_name::<i32>(npz, key)
        .map(|a| a.mapv(i64::from))
        .with_context(|| format!("Array '{key}' is missing or not int64/int32"))
}

pub fn write_array<S, D>(npz: &mut NpzOut, key: &str, array: &ArrayBase<S, D>) -> Result<()>
where
    S: Data,
    S::Elem: WritableElement,
    D: Dimension,
{
    npz.add_array(key, array)
        .with_context(|| format!("Failed to write array '{key}'"))
}

pub fn finish_npz(npz: NpzOut) -> Result<()> {
    npz.finish().context("Failed to finalize archive")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1};
    use tempfile::TempDir;

    #[test]
    fn test_widening_reads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mixed.npz");
        let mut npz = create_npz(&path).unwrap();
        write_array(&mut npz, "floats", &array![[1.5f64, 2.5], [3.0, 4.0]]).unwrap();
        write_array(&mut npz, "ints", &Array1::from(vec![3i32, 7, 9])).unwrap();
        finish_npz(npz).unwrap();

        let mut npz = open_npz(&path).unwrap();
        assert!(has_array(&mut npz, "floats").unwrap());
        assert!(!has_array(&mut npz, "target").unwrap());
        let floats = read_f32(&mut npz, "floats").unwrap();
        assert_eq!(floats.shape(), &[2, 2]);
        assert_eq!(floats[[1, 0]], 3.0);
        let ints = read_i64(&mut npz, "ints").unwrap();
        assert_eq!(ints.as_slice().unwrap(), &[3, 7, 9]);
        assert!(read_i64(&mut npz, "missing").is_err());
    }

    #[test]
    fn test_open_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(open_npz(dir.path().join("nope.npz")).is_err());
    }
}
