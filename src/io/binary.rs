//! Packed binary CRS reader and writer with partial row-range reads.
//!
//! Layout, native byte order:
//!
//! ```text
//! matrix:  [rows: u64][cols: u64][ptr: (rows+1) x u64][col: nnz x u64][val: nnz x f64]
//! vector:  [len: u64][val: len x f64]
//! ```
//!
//! `read_crs` seeks directly to the pointer and value spans covering
//! `[row_beg, row_end)`, so a process only touches the bytes of its own chunk.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{Error, Result};

const HEADER: u64 = 16;

fn read_u64s(f: &mut File, count: usize) -> Result<Vec<u64>> {
    let mut buf = vec![0u8; count * 8];
    f.read_exact(&mut buf)?;
    Ok(bytemuck::pod_collect_to_vec(&buf))
}

fn read_f64s(f: &mut File, count: usize) -> Result<Vec<f64>> {
    let mut buf = vec![0u8; count * 8];
    f.read_exact(&mut buf)?;
    Ok(bytemuck::pod_collect_to_vec(&buf))
}

/// Global `(rows, cols)` of a binary CRS file; reads the header only.
pub fn crs_size(path: &Path) -> Result<(usize, usize)> {
    let mut f = File::open(path)?;
    let dims = read_u64s(&mut f, 2)?;
    Ok((dims[0] as usize, dims[1] as usize))
}

/// Read the CRS arrays for rows `[row_beg, row_end)`; the returned pointer
/// array is rebased to start at 0 and columns stay global.
pub fn read_crs(
    path: &Path,
    row_beg: usize,
    row_end: usize,
) -> Result<(Vec<usize>, Vec<usize>, Vec<f64>)> {
    let name = path.display().to_string();
    let mut f = File::open(path)?;
    let dims = read_u64s(&mut f, 2)?;
    let (rows, cols) = (dims[0] as usize, dims[1] as usize);
    if row_end > rows || row_beg > row_end {
        return Err(Error::parse(
            &name,
            format!("requested rows [{row_beg}, {row_end}) exceed matrix of {rows} rows"),
        ));
    }

    f.seek(SeekFrom::Start(HEADER + (row_beg as u64) * 8))?;
    let ptr_span = read_u64s(&mut f, row_end - row_beg + 1)?;
    let nnz_beg = ptr_span[0];
    let nnz_end = ptr_span[row_end - row_beg];
    if ptr_span.windows(2).any(|w| w[0] > w[1]) {
        return Err(Error::parse(&name, "row pointers are not non-decreasing"));
    }
    let nnz = (nnz_end - nnz_beg) as usize;

    // total nnz lives in the last pointer entry
    f.seek(SeekFrom::Start(HEADER + (rows as u64) * 8))?;
    let total_nnz = read_u64s(&mut f, 1)?[0];

    let col_base = HEADER + (rows as u64 + 1) * 8;
    f.seek(SeekFrom::Start(col_base + nnz_beg * 8))?;
    let col = read_u64s(&mut f, nnz)?;
    if let Some(&bad) = col.iter().find(|&&c| c as usize >= cols) {
        return Err(Error::parse(&name, format!("column index {bad} out of bounds ({cols} columns)")));
    }

    let val_base = col_base + total_nnz * 8;
    f.seek(SeekFrom::Start(val_base + nnz_beg * 8))?;
    let val = read_f64s(&mut f, nnz)?;

    let ptr = ptr_span.iter().map(|&p| (p - nnz_beg) as usize).collect();
    let col = col.into_iter().map(|c| c as usize).collect();
    Ok((ptr, col, val))
}

/// Read the segment `[row_beg, row_end)` of a binary vector file.
pub fn read_vector(path: &Path, row_beg: usize, row_end: usize) -> Result<Vec<f64>> {
    let name = path.display().to_string();
    let mut f = File::open(path)?;
    let len = read_u64s(&mut f, 1)?[0] as usize;
    if row_end > len || row_beg > row_end {
        return Err(Error::parse(
            &name,
            format!("requested rows [{row_beg}, {row_end}) exceed vector of length {len}"),
        ));
    }
    f.seek(SeekFrom::Start(8 + (row_beg as u64) * 8))?;
    read_f64s(&mut f, row_end - row_beg)
}

/// Write a complete matrix (`rows = ptr.len() - 1`).
pub fn write_crs(path: &Path, cols: usize, ptr: &[usize], col: &[usize], val: &[f64]) -> Result<()> {
    let rows = ptr.len() - 1;
    debug_assert_eq!(ptr[rows], col.len());
    let mut f = std::io::BufWriter::new(File::create(path)?);
    let header = [rows as u64, cols as u64];
    f.write_all(bytemuck::cast_slice(&header))?;
    let ptr64: Vec<u64> = ptr.iter().map(|&p| p as u64).collect();
    f.write_all(bytemuck::cast_slice(&ptr64))?;
    let col64: Vec<u64> = col.iter().map(|&c| c as u64).collect();
    f.write_all(bytemuck::cast_slice(&col64))?;
    f.write_all(bytemuck::cast_slice(val))?;
    Ok(())
}

/// Write a complete vector.
pub fn write_vector(path: &Path, v: &[f64]) -> Result<()> {
    let mut f = std::io::BufWriter::new(File::create(path)?);
    f.write_all(bytemuck::cast_slice(&[v.len() as u64]))?;
    f.write_all(bytemuck::cast_slice(v))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("parmg-bin-{}-{name}", std::process::id()))
    }

    #[test]
    fn full_roundtrip() {
        let path = tmp("full.bin");
        let ptr = vec![0, 2, 3, 5];
        let col = vec![0, 2, 1, 0, 2];
        let val = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        write_crs(&path, 3, &ptr, &col, &val).unwrap();

        assert_eq!(crs_size(&path).unwrap(), (3, 3));
        let (p, c, v) = read_crs(&path, 0, 3).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(p, ptr);
        assert_eq!(c, col);
        assert_eq!(v, val);
    }

    #[test]
    fn restricted_read_rebases_pointers() {
        let path = tmp("part.bin");
        let ptr = vec![0, 2, 3, 5];
        let col = vec![0, 2, 1, 0, 2];
        let val = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        write_crs(&path, 3, &ptr, &col, &val).unwrap();

        let (p, c, v) = read_crs(&path, 1, 3).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(p, vec![0, 1, 3]);
        assert_eq!(c, vec![1, 0, 2]);
        assert_eq!(v, vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn vector_roundtrip_and_segment() {
        let path = tmp("vec.bin");
        write_vector(&path, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(read_vector(&path, 0, 4).unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(read_vector(&path, 1, 3).unwrap(), vec![2.0, 3.0]);
        let err = read_vector(&path, 2, 5).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[test]
    fn out_of_range_rows_are_rejected() {
        let path = tmp("range.bin");
        write_crs(&path, 2, &[0, 1, 2], &[0, 1], &[1.0, 1.0]).unwrap();
        let err = read_crs(&path, 1, 3).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(err, Error::Parse { .. }));
    }
}
