//! Compute backend capability: vector residency and the kernels the solve
//! stage needs (SpMV, axpy, dot). Exactly one backend is compiled in per build
//! configuration; the solve paths are generic over it.

use std::sync::Arc;

use crate::core::range::RowRange;
use crate::core::value::{BlockValue, RhsValue};
use crate::matrix::CsrChunk;
use crate::matrix::distributed::CommPattern;
use crate::parallel::{Comm, Communicator};

/// Backend capability over one value type.
///
/// `Matrix` and `Vector` are the backend-resident forms; for an accelerator
/// backend they live on the device and `download`/`gather` imply transfers.
pub trait Backend<V: BlockValue>: Sized + Send + Sync + 'static {
    type Params: Clone + Default + Send + Sync;
    type Matrix: Send + Sync;
    type Vector: Send + Sync;

    fn name() -> &'static str;

    fn matrix(prm: &Self::Params, chunk: &CsrChunk<V>) -> Self::Matrix;
    fn vector_from(prm: &Self::Params, data: Vec<V::Rhs>) -> Self::Vector;
    fn zeros(prm: &Self::Params, len: usize) -> Self::Vector;

    fn len(v: &Self::Vector) -> usize;
    fn fill(v: &mut Self::Vector, value: V::Rhs);
    fn copy(src: &Self::Vector, dst: &mut Self::Vector);
    fn download(v: &Self::Vector) -> Vec<V::Rhs>;
    fn gather(v: &Self::Vector, idx: &[usize]) -> Vec<V::Rhs>;

    /// y = beta*y + alpha*A*x.
    fn spmv(
        prm: &Self::Params,
        alpha: f64,
        a: &Self::Matrix,
        x: &Self::Vector,
        beta: f64,
        y: &mut Self::Vector,
    );

    /// y += alpha*x.
    fn axpy(alpha: f64, x: &Self::Vector, y: &mut Self::Vector);
    /// y = alpha*x + beta*y.
    fn axpby(alpha: f64, x: &Self::Vector, beta: f64, y: &mut Self::Vector);
    fn scale(v: &mut Self::Vector, s: f64);
    /// Process-local inner product over owned entries; callers reduce across
    /// the group themselves.
    fn dot_local(x: &Self::Vector, y: &Self::Vector) -> f64;
}

/// CPU backend: plain vectors, rayon-parallel SpMV rows.
pub struct CpuBackend;

#[derive(Clone, Debug)]
pub struct CpuParams {
    /// Worker threads reported in the solve summary; the rayon pool itself is
    /// process-global.
    pub threads: usize,
}

impl Default for CpuParams {
    fn default() -> Self {
        #[cfg(feature = "rayon")]
        let threads = num_cpus::get();
        #[cfg(not(feature = "rayon"))]
        let threads = 1;
        CpuParams { threads }
    }
}

impl<V: BlockValue> Backend<V> for CpuBackend {
    type Params = CpuParams;
    type Matrix = CsrChunk<V>;
    type Vector = Vec<V::Rhs>;

    fn name() -> &'static str {
        "cpu"
    }

    fn matrix(_prm: &CpuParams, chunk: &CsrChunk<V>) -> CsrChunk<V> {
        chunk.clone()
    }

    fn vector_from(_prm: &CpuParams, data: Vec<V::Rhs>) -> Vec<V::Rhs> {
        data
    }

    fn zeros(_prm: &CpuParams, len: usize) -> Vec<V::Rhs> {
        vec![V::Rhs::zero(); len]
    }

    fn len(v: &Vec<V::Rhs>) -> usize {
        v.len()
    }

    fn fill(v: &mut Vec<V::Rhs>, value: V::Rhs) {
        v.iter_mut().for_each(|x| *x = value);
    }

    fn copy(src: &Vec<V::Rhs>, dst: &mut Vec<V::Rhs>) {
        dst.copy_from_slice(src);
    }

    fn download(v: &Vec<V::Rhs>) -> Vec<V::Rhs> {
        v.clone()
    }

    fn gather(v: &Vec<V::Rhs>, idx: &[usize]) -> Vec<V::Rhs> {
        idx.iter().map(|&i| v[i]).collect()
    }

    #[cfg(feature = "rayon")]
    fn spmv(
        _prm: &CpuParams,
        alpha: f64,
        a: &CsrChunk<V>,
        x: &Vec<V::Rhs>,
        beta: f64,
        y: &mut Vec<V::Rhs>,
    ) {
        use rayon::prelude::*;
        assert_eq!(x.len(), a.ncols());
        assert_eq!(y.len(), a.nrows());
        y.par_iter_mut().enumerate().for_each(|(i, yi)| {
            let (cols, vals) = a.row(i);
            let mut acc = V::Rhs::zero();
            for (&c, v) in cols.iter().zip(vals) {
                acc = acc.add(&v.apply(&x[c]));
            }
            *yi = yi.scale(beta).add(&acc.scale(alpha));
        });
    }

    #[cfg(not(feature = "rayon"))]
    fn spmv(
        _prm: &CpuParams,
        alpha: f64,
        a: &CsrChunk<V>,
        x: &Vec<V::Rhs>,
        beta: f64,
        y: &mut Vec<V::Rhs>,
    ) {
        a.spmv_into(alpha, x, beta, y);
    }

    fn axpy(alpha: f64, x: &Vec<V::Rhs>, y: &mut Vec<V::Rhs>) {
        for (yi, xi) in y.iter_mut().zip(x) {
            *yi = yi.add(&xi.scale(alpha));
        }
    }

    fn axpby(alpha: f64, x: &Vec<V::Rhs>, beta: f64, y: &mut Vec<V::Rhs>) {
        for (yi, xi) in y.iter_mut().zip(x) {
            *yi = yi.scale(beta).add(&xi.scale(alpha));
        }
    }

    fn scale(v: &mut Vec<V::Rhs>, s: f64) {
        for x in v.iter_mut() {
            *x = x.scale(s);
        }
    }

    fn dot_local(x: &Vec<V::Rhs>, y: &Vec<V::Rhs>) -> f64 {
        x.iter().zip(y).map(|(a, b)| a.dot(b)).sum()
    }
}

/// Backend-resident distributed operator: the execution form a composable
/// [`DistributedMatrix`](crate::matrix::DistributedMatrix) turns into. Only
/// matrix-vector products remain available; the transition back does not
/// exist.
pub struct BackendOperator<V: BlockValue, B: Backend<V>> {
    comm: Arc<Communicator>,
    row_range: RowRange,
    col_range: RowRange,
    local: B::Matrix,
    remote: B::Matrix,
    nghost: usize,
    pattern: CommPattern,
    prm: B::Params,
}

impl<V: BlockValue, B: Backend<V>> BackendOperator<V, B> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        comm: Arc<Communicator>,
        row_range: RowRange,
        col_range: RowRange,
        local: &CsrChunk<V>,
        remote: &CsrChunk<V>,
        nghost: usize,
        pattern: CommPattern,
        prm: &B::Params,
    ) -> Self {
        BackendOperator {
            comm,
            row_range,
            col_range,
            local: B::matrix(prm, local),
            remote: B::matrix(prm, remote),
            nghost,
            pattern,
            prm: prm.clone(),
        }
    }

    pub fn comm(&self) -> &Arc<Communicator> {
        &self.comm
    }
    pub fn params(&self) -> &B::Params {
        &self.prm
    }
    pub fn loc_rows(&self) -> usize {
        self.row_range.len()
    }
    pub fn loc_cols(&self) -> usize {
        self.col_range.len()
    }

    /// Collective. y = beta*y + alpha*A*x.
    pub fn spmv(&self, alpha: f64, x: &B::Vector, beta: f64, y: &mut B::Vector) {
        let ghosts = self
            .pattern
            .exchange_rhs::<V::Rhs>(&self.comm, |idx| B::gather(x, idx));
        debug_assert_eq!(ghosts.len(), self.nghost);
        let ghosts = B::vector_from(&self.prm, ghosts);
        B::spmv(&self.prm, alpha, &self.local, x, beta, y);
        B::spmv(&self.prm, alpha, &self.remote, &ghosts, 1.0, y);
    }

    /// Collective. Group-wide inner product of distributed vectors.
    pub fn dot(&self, x: &B::Vector, y: &B::Vector) -> f64 {
        self.comm.all_reduce_sum(B::dot_local(x, y))
    }

    /// Collective. Group-wide 2-norm.
    pub fn norm(&self, x: &B::Vector) -> f64 {
        self.dot(x, x).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::range;
    use crate::matrix::DistributedMatrix;

    fn laplace1d(n: usize) -> (Vec<usize>, Vec<usize>, Vec<f64>) {
        let mut ptr = vec![0];
        let mut col = Vec::new();
        let mut val = Vec::new();
        for i in 0..n {
            if i > 0 {
                col.push(i - 1);
                val.push(-1.0);
            }
            col.push(i);
            val.push(2.0);
            if i + 1 < n {
                col.push(i + 1);
                val.push(-1.0);
            }
            ptr.push(col.len());
        }
        (ptr, col, val)
    }

    #[test]
    fn moved_operator_matches_composable_spmv() {
        let n = 8;
        let comm = Arc::new(Communicator::serial());
        let (ptr, col, val) = laplace1d(n);
        let r = range::assign(n, 1, 0, 1);
        let a = DistributedMatrix::<f64>::new(comm, n, n, r, r, ptr, col, val).unwrap();

        let x: Vec<f64> = (0..n).map(|i| (i as f64).sin()).collect();
        let mut y_ref = vec![0.0; n];
        a.spmv(1.0, &x, 0.0, &mut y_ref);

        let op = a.move_to_backend::<CpuBackend>(&CpuParams::default());
        let mut y = vec![0.0; n];
        op.spmv(1.0, &x, 0.0, &mut y);
        assert_eq!(y, y_ref);

        assert_eq!(op.loc_rows(), n);
        assert!((op.dot(&x, &x) - x.iter().map(|v| v * v).sum::<f64>()).abs() < 1e-12);
    }

    #[test]
    fn axpby_and_fill() {
        let mut y = vec![1.0, 2.0];
        <CpuBackend as Backend<f64>>::axpby(2.0, &vec![10.0, 20.0], -1.0, &mut y);
        assert_eq!(y, vec![19.0, 38.0]);
        <CpuBackend as Backend<f64>>::fill(&mut y, 0.5);
        assert_eq!(y, vec![0.5, 0.5]);
    }
}
