//! Problem sources: each process obtains the CRS rows and right-hand-side
//! segment for its assigned row range, either by assembling a synthetic
//! finite-difference stencil or by a restricted read of an on-disk matrix.
//!
//! Both strategies produce the same shape and share [`core::range::assign`]
//! for chunk boundaries, so concatenating per-rank chunks in rank order
//! reconstructs the same global system regardless of process count.
//!
//! [`core::range::assign`]: crate::core::range::assign

use std::path::Path;

use crate::core::range::{self, RowRange};
use crate::error::Result;
use crate::io;

/// A process-local slice of the global system: scalar CRS rows (global column
/// indices) plus the matching right-hand-side segment.
#[derive(Clone, Debug)]
pub struct Problem {
    /// Global scalar row count.
    pub glob_rows: usize,
    pub range: RowRange,
    pub ptr: Vec<usize>,
    pub col: Vec<usize>,
    pub val: Vec<f64>,
    pub rhs: Vec<f64>,
}

/// Assemble the rows of a 3D Poisson problem on an `n`×`n`×`n` unit-cube grid
/// (`N = n³`) owned by `rank`. Each row carries a `6/h²` diagonal and `-1/h²`
/// entries for the axis neighbors that exist within grid bounds, `h = 1/(n-1)`;
/// boundary rows simply have fewer neighbors. The right-hand side is ones.
pub fn poisson3d(n: usize, align: usize, rank: usize, nproc: usize) -> Problem {
    let n3 = n * n * n;
    let range = range::assign(n3, nproc, rank, align);
    let chunk = range.len();

    let mut ptr = Vec::with_capacity(chunk + 1);
    let mut col = Vec::with_capacity(chunk * 7);
    let mut val = Vec::with_capacity(chunk * 7);

    let h2i = ((n - 1) * (n - 1)) as f64;
    ptr.push(0);

    for idx in range.beg..range.end {
        let k = idx / (n * n);
        let j = (idx / n) % n;
        let i = idx % n;

        if k > 0 {
            col.push(idx - n * n);
            val.push(-h2i);
        }
        if j > 0 {
            col.push(idx - n);
            val.push(-h2i);
        }
        if i > 0 {
            col.push(idx - 1);
            val.push(-h2i);
        }

        col.push(idx);
        val.push(6.0 * h2i);

        if i + 1 < n {
            col.push(idx + 1);
            val.push(-h2i);
        }
        if j + 1 < n {
            col.push(idx + n);
            val.push(-h2i);
        }
        if k + 1 < n {
            col.push(idx + n * n);
            val.push(-h2i);
        }

        ptr.push(col.len());
    }

    Problem { glob_rows: n3, range, ptr, col, val, rhs: vec![1.0; chunk] }
}

/// Read this rank's rows of a MatrixMarket matrix, and of the companion
/// right-hand-side file when given; otherwise the rhs defaults to ones.
pub fn read_matrix_market(
    a_path: &Path,
    rhs_path: Option<&Path>,
    align: usize,
    rank: usize,
    nproc: usize,
) -> Result<Problem> {
    let reader = io::mm::MmReader::open(a_path)?;
    let n = reader.rows();
    let range = range::assign(n, nproc, rank, align);

    let (ptr, col, val) = reader.read(range.beg, range.end)?;
    let rhs = match rhs_path {
        Some(p) => io::mm::read_vector(p, range.beg, range.end)?,
        None => vec![1.0; range.len()],
    };

    Ok(Problem { glob_rows: n, range, ptr, col, val, rhs })
}

/// Read this rank's rows of a packed binary CRS matrix, and of the companion
/// binary right-hand-side file when given; otherwise the rhs defaults to ones.
pub fn read_binary(
    a_path: &Path,
    rhs_path: Option<&Path>,
    align: usize,
    rank: usize,
    nproc: usize,
) -> Result<Problem> {
    let (n, _cols) = io::binary::crs_size(a_path)?;
    let range = range::assign(n, nproc, rank, align);

    let (ptr, col, val) = io::binary::read_crs(a_path, range.beg, range.end)?;
    let rhs = match rhs_path {
        Some(p) => io::binary::read_vector(p, range.beg, range.end)?,
        None => vec![1.0; range.len()],
    };

    Ok(Problem { glob_rows: n, range, ptr, col, val, rhs })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poisson_corner_row_of_4x4x4_grid() {
        // n=4: h = 1/3, 1/h² = 9. Row 0 sits in the grid corner, so only the
        // diagonal (6*9 = 54) and the +x, +y, +z neighbors (-9) survive.
        let p = poisson3d(4, 1, 0, 1);
        assert_eq!(p.glob_rows, 64);
        assert_eq!(p.rhs, vec![1.0; 64]);

        let row0: Vec<(usize, f64)> = (p.ptr[0]..p.ptr[1]).map(|k| (p.col[k], p.val[k])).collect();
        assert_eq!(row0, vec![(0, 54.0), (1, -9.0), (4, -9.0), (16, -9.0)]);
    }

    #[test]
    fn poisson_interior_row_has_seven_entries() {
        let n = 4;
        let p = poisson3d(n, 1, 0, 1);
        // (i, j, k) = (1, 1, 1)
        let idx = 1 + n + n * n;
        assert_eq!(p.ptr[idx + 1] - p.ptr[idx], 7);
        let diag = (p.ptr[idx]..p.ptr[idx + 1]).find(|&k| p.col[k] == idx).unwrap();
        assert_eq!(p.val[diag], 54.0);
    }

    #[test]
    fn chunks_concatenate_to_the_serial_assembly() {
        let n = 5;
        let serial = poisson3d(n, 1, 0, 1);
        for nproc in [2usize, 3, 4] {
            for align in [1usize, 3] {
                let mut ptr = vec![0usize];
                let mut col = Vec::new();
                let mut val = Vec::new();
                let mut rhs = Vec::new();
                for rank in 0..nproc {
                    let p = poisson3d(n, align, rank, nproc);
                    let base = ptr[ptr.len() - 1];
                    ptr.extend(p.ptr[1..].iter().map(|&q| base + q));
                    col.extend_from_slice(&p.col);
                    val.extend_from_slice(&p.val);
                    rhs.extend_from_slice(&p.rhs);
                }
                assert_eq!(ptr, serial.ptr, "nproc={nproc} align={align}");
                assert_eq!(col, serial.col);
                assert_eq!(val, serial.val);
                assert_eq!(rhs, serial.rhs);
            }
        }
    }
}
