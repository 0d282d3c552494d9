//! Grouping of scalar CRS chunks into block-valued chunks.
//!
//! Problem sources always produce scalar arrays; the solve paths reinterpret
//! them with the block size chosen at run time. Row ranges are aligned to the
//! block size by construction, so a local chunk always covers whole block rows.

use crate::core::value::{Block, BlockValue};
use crate::error::{Error, Result};
use crate::matrix::CsrChunk;
use std::collections::BTreeMap;

/// Conversion of a process-local scalar CRS chunk (global scalar columns) into
/// a chunk of this value type (global block columns).
pub trait FromScalarCsr: BlockValue {
    /// `row_beg` is the first global scalar row of the chunk; `glob_cols` the
    /// global scalar column count. Both must be divisible by `Self::DIM`.
    fn from_scalar_csr(
        row_beg: usize,
        glob_cols: usize,
        ptr: &[usize],
        col: &[usize],
        val: &[f64],
    ) -> Result<CsrChunk<Self>>;

    /// Group a scalar rhs segment into rhs blocks.
    fn group_rhs(rhs: &[f64]) -> Result<Vec<Self::Rhs>>;
}

impl FromScalarCsr for f64 {
    fn from_scalar_csr(
        _row_beg: usize,
        glob_cols: usize,
        ptr: &[usize],
        col: &[usize],
        val: &[f64],
    ) -> Result<CsrChunk<f64>> {
        CsrChunk::new(ptr.len() - 1, glob_cols, ptr.to_vec(), col.to_vec(), val.to_vec())
    }

    fn group_rhs(rhs: &[f64]) -> Result<Vec<f64>> {
        Ok(rhs.to_vec())
    }
}

impl<const B: usize> FromScalarCsr for Block<B> {
    fn from_scalar_csr(
        row_beg: usize,
        glob_cols: usize,
        ptr: &[usize],
        col: &[usize],
        val: &[f64],
    ) -> Result<CsrChunk<Block<B>>> {
        let nrows = ptr.len() - 1;
        if row_beg % B != 0 || nrows % B != 0 || glob_cols % B != 0 {
            return Err(Error::InvalidMatrix(format!(
                "matrix of {glob_cols} columns with chunk [{row_beg}, {}) is not divisible \
                 into {B}x{B} blocks",
                row_beg + nrows
            )));
        }

        let brows = nrows / B;
        let mut bptr = Vec::with_capacity(brows + 1);
        let mut bcol = Vec::new();
        let mut bval = Vec::new();
        bptr.push(0);

        for bi in 0..brows {
            let mut row: BTreeMap<usize, Block<B>> = BTreeMap::new();
            for r in 0..B {
                let i = bi * B + r;
                for k in ptr[i]..ptr[i + 1] {
                    let (bj, c) = (col[k] / B, col[k] % B);
                    row.entry(bj).or_insert_with(Block::zero).0[r][c] = val[k];
                }
            }
            for (bj, blk) in row {
                bcol.push(bj);
                bval.push(blk);
            }
            bptr.push(bcol.len());
        }

        CsrChunk::new(brows, glob_cols / B, bptr, bcol, bval)
    }

    fn group_rhs(rhs: &[f64]) -> Result<Vec<Self::Rhs>> {
        use crate::core::value::RhsValue;
        if rhs.len() % B != 0 {
            return Err(Error::InvalidMatrix(format!(
                "rhs segment of {} entries is not divisible into blocks of {B}",
                rhs.len()
            )));
        }
        Ok(rhs.chunks_exact(B).map(Self::Rhs::read_scalars).collect())
    }
}
