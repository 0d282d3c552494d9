//! Sparse matrix types: process-local CRS chunks and the distributed operator.

pub mod block;
pub mod distributed;

pub use block::FromScalarCsr;
pub use distributed::DistributedMatrix;

use crate::core::value::BlockValue;
use crate::error::{Error, Result};

/// Process-local compressed-row-storage chunk.
///
/// `ptr` has one entry per stored row plus one, starts at 0 and is
/// non-decreasing; `col`/`val` hold one entry per stored non-zero. What the
/// column indices mean (global rows, local columns, ghost slots) depends on
/// the owner; `ncols` is always the size of the indexed column space.
#[derive(Clone, Debug)]
pub struct CsrChunk<V> {
    nrows: usize,
    ncols: usize,
    ptr: Vec<usize>,
    col: Vec<usize>,
    val: Vec<V>,
}

impl<V: BlockValue> CsrChunk<V> {
    /// Build a chunk from raw CRS arrays, validating the invariants that make
    /// a chunk usable: pointer shape, array lengths, and column bounds.
    /// A malformed chunk is a fatal construction error, never a partial matrix.
    pub fn new(
        nrows: usize,
        ncols: usize,
        ptr: Vec<usize>,
        col: Vec<usize>,
        val: Vec<V>,
    ) -> Result<Self> {
        if ptr.len() != nrows + 1 {
            return Err(Error::InvalidMatrix(format!(
                "row pointer length {} does not match {} local rows",
                ptr.len(),
                nrows
            )));
        }
        if ptr[0] != 0 {
            return Err(Error::InvalidMatrix("row pointers must start at 0".into()));
        }
        if ptr.windows(2).any(|w| w[0] > w[1]) {
            return Err(Error::InvalidMatrix("row pointers must be non-decreasing".into()));
        }
        let nnz = ptr[nrows];
        if col.len() != nnz || val.len() != nnz {
            return Err(Error::InvalidMatrix(format!(
                "{} column indices / {} values for {} pointed non-zeros",
                col.len(),
                val.len(),
                nnz
            )));
        }
        if let Some(&bad) = col.iter().find(|&&c| c >= ncols) {
            return Err(Error::InvalidMatrix(format!(
                "column index {bad} out of bounds for column space of size {ncols}"
            )));
        }
        Ok(CsrChunk { nrows, ncols, ptr, col, val })
    }

    pub fn empty(nrows: usize, ncols: usize) -> Self {
        CsrChunk { nrows, ncols, ptr: vec![0; nrows + 1], col: Vec::new(), val: Vec::new() }
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }
    pub fn ncols(&self) -> usize {
        self.ncols
    }
    pub fn nnz(&self) -> usize {
        self.col.len()
    }
    pub fn ptr(&self) -> &[usize] {
        &self.ptr
    }
    pub fn col(&self) -> &[usize] {
        &self.col
    }
    pub fn val(&self) -> &[V] {
        &self.val
    }

    /// Column indices and values of row `i`.
    pub fn row(&self, i: usize) -> (&[usize], &[V]) {
        let span = self.ptr[i]..self.ptr[i + 1];
        (&self.col[span.clone()], &self.val[span])
    }

    /// y = beta*y + alpha*A*x against a plain slice; the sequential reference
    /// kernel used by tests and by pattern-free (diagonal) operators.
    pub fn spmv_into(&self, alpha: f64, x: &[V::Rhs], beta: f64, y: &mut [V::Rhs]) {
        use crate::core::value::RhsValue;
        assert_eq!(x.len(), self.ncols);
        assert_eq!(y.len(), self.nrows);
        for i in 0..self.nrows {
            let (cols, vals) = self.row(i);
            let mut acc = V::Rhs::zero();
            for (&c, v) in cols.iter().zip(vals) {
                acc = acc.add(&v.apply(&x[c]));
            }
            y[i] = y[i].scale(beta).add(&acc.scale(alpha));
        }
    }
}
