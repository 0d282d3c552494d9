//! Tests for the distributed operator against dense references.
//!
//! A single-process group exercises the full collective code paths (pattern
//! construction, transpose, products, move-to-backend); results are compared
//! elementwise against dense reconstructions built with faer.

use std::sync::Arc;

use approx::assert_abs_diff_eq;
use faer::Mat;
use parmg::backend::{CpuBackend, CpuParams};
use parmg::core::range;
use parmg::core::value::BlockValue;
use parmg::matrix::DistributedMatrix;
use parmg::parallel::Communicator;
use parmg::problem;
use parmg::{Error, RowRange};
use rand::Rng;

fn poisson_matrix(n: usize) -> DistributedMatrix<f64> {
    let comm = Arc::new(Communicator::serial());
    let p = problem::poisson3d(n, 1, 0, 1);
    let r = range::assign(p.glob_rows, 1, 0, 1);
    DistributedMatrix::new(comm, p.glob_rows, p.glob_rows, r, r, p.ptr, p.col, p.val).unwrap()
}

fn dense_of(a: &DistributedMatrix<f64>) -> Mat<f64> {
    let mut m = Mat::<f64>::zeros(a.glob_rows(), a.glob_cols());
    for (i, j, v) in a.triples() {
        m[(i, j)] += v;
    }
    m
}

/// Aggregation-style restriction: maps `n` rows onto `n / w` coarse rows by
/// grouping `w` consecutive fine rows, with weight 1 entries.
fn grouping_restriction(comm: &Arc<Communicator>, n: usize, w: usize) -> DistributedMatrix<f64> {
    let nc = n / w;
    let ptr: Vec<usize> = (0..=n).collect();
    let col: Vec<usize> = (0..n).map(|i| (i / w).min(nc - 1)).collect();
    let val = vec![1.0; n];
    DistributedMatrix::new(
        comm.clone(),
        n,
        nc,
        RowRange::new(0, n),
        RowRange::new(0, nc),
        ptr,
        col,
        val,
    )
    .unwrap()
}

#[test]
fn spmv_matches_dense() {
    let a = poisson_matrix(4);
    let n = a.glob_rows();
    let dense = dense_of(&a);

    let mut rng = rand::thread_rng();
    let x: Vec<f64> = (0..n).map(|_| rng.r#gen::<f64>() - 0.5).collect();
    let mut y = vec![0.0; n];
    a.spmv(1.0, &x, 0.0, &mut y);

    for i in 0..n {
        let want: f64 = (0..n).map(|j| dense[(i, j)] * x[j]).sum();
        assert_abs_diff_eq!(y[i], want, epsilon = 1e-10);
    }
}

#[test]
fn transpose_matches_dense() {
    let a = poisson_matrix(3);
    let at = a.transpose().unwrap();
    assert_eq!(at.glob_rows(), a.glob_cols());
    assert_eq!(at.glob_cols(), a.glob_rows());

    let d = dense_of(&a);
    let dt = dense_of(&at);
    for i in 0..a.glob_rows() {
        for j in 0..a.glob_cols() {
            assert_abs_diff_eq!(dt[(j, i)], d[(i, j)], epsilon = 0.0);
        }
    }
}

#[test]
fn rectangular_transpose_roundtrips() {
    let comm = Arc::new(Communicator::serial());
    let i = grouping_restriction(&comm, 12, 3);
    let j = i.transpose().unwrap();
    let back = j.transpose().unwrap();

    let before = dense_of(&i);
    let after = dense_of(&back);
    for r in 0..12 {
        for c in 0..4 {
            assert_abs_diff_eq!(before[(r, c)], after[(r, c)], epsilon = 0.0);
        }
    }
}

#[test]
fn product_matches_dense() {
    let a = poisson_matrix(3);
    let n = a.glob_rows();
    let comm = a.comm().clone();
    let i = grouping_restriction(&comm, n, 3);

    let ai = a.product(&i).unwrap();
    assert_eq!(ai.glob_rows(), n);
    assert_eq!(ai.glob_cols(), n / 3);

    let da = dense_of(&a);
    let di = dense_of(&i);
    let dai = dense_of(&ai);
    let want = &da * &di;
    for r in 0..n {
        for c in 0..n / 3 {
            assert_abs_diff_eq!(dai[(r, c)], want[(r, c)], epsilon = 1e-10);
        }
    }
}

#[test]
fn galerkin_triple_product_is_consistent() {
    // x^T (J A I) x' computed distributed must equal (I x)^T A (I x')
    // reconstructed densely.
    let a = poisson_matrix(3); // 27 rows
    let n = a.glob_rows();
    let nc = n / 3;
    let comm = a.comm().clone();

    let i = grouping_restriction(&comm, n, 3);
    let j = i.transpose().unwrap();
    let coarse = j.product(&a.product(&i).unwrap()).unwrap();
    assert_eq!(coarse.glob_rows(), nc);
    assert_eq!(coarse.glob_cols(), nc);

    let mut rng = rand::thread_rng();
    let x: Vec<f64> = (0..nc).map(|_| rng.r#gen::<f64>() - 0.5).collect();
    let x2: Vec<f64> = (0..nc).map(|_| rng.r#gen::<f64>() - 0.5).collect();

    // distributed: x^T (J A I) x2
    let mut cx2 = vec![0.0; nc];
    coarse.spmv(1.0, &x2, 0.0, &mut cx2);
    let got: f64 = x.iter().zip(&cx2).map(|(a, b)| a * b).sum();

    // dense: (I x)^T A (I x2)
    let da = dense_of(&a);
    let di = dense_of(&i);
    let ix = |v: &[f64]| -> Vec<f64> {
        (0..n).map(|r| (0..nc).map(|c| di[(r, c)] * v[c]).sum()).collect()
    };
    let ix1 = ix(&x);
    let ix2 = ix(&x2);
    let mut aix2 = vec![0.0; n];
    for r in 0..n {
        aix2[r] = (0..n).map(|c| da[(r, c)] * ix2[c]).sum();
    }
    let want: f64 = ix1.iter().zip(&aix2).map(|(a, b)| a * b).sum();

    assert_abs_diff_eq!(got, want, epsilon = 1e-8 * want.abs().max(1.0));
}

#[test]
fn block_valued_product_matches_scalar_product() {
    use parmg::core::value::Block;
    use parmg::matrix::FromScalarCsr;

    // group the 27-row Poisson matrix into 3x3 blocks and check A*A agrees
    // with the scalar result.
    let comm = Arc::new(Communicator::serial());
    let p = problem::poisson3d(3, 3, 0, 1);
    let n = p.glob_rows;

    let r = RowRange::new(0, n);
    let a_s = DistributedMatrix::new(
        comm.clone(),
        n,
        n,
        r,
        r,
        p.ptr.clone(),
        p.col.clone(),
        p.val.clone(),
    )
    .unwrap();
    let aa_s = a_s.product(&a_s).unwrap();

    let chunk = Block::<3>::from_scalar_csr(0, n, &p.ptr, &p.col, &p.val).unwrap();
    let rb = RowRange::new(0, n / 3);
    let a_b = DistributedMatrix::from_chunk(comm, n / 3, rb, rb, chunk).unwrap();
    let aa_b = a_b.product(&a_b).unwrap();

    let ds = dense_of(&aa_s);
    let mut db = Mat::<f64>::zeros(n, n);
    for (bi, bj, v) in aa_b.triples() {
        for r in 0..3 {
            for c in 0..3 {
                db[(bi * 3 + r, bj * 3 + c)] += v.get(r, c);
            }
        }
    }
    for i in 0..n {
        for j in 0..n {
            assert_abs_diff_eq!(db[(i, j)], ds[(i, j)], epsilon = 1e-9);
        }
    }
}

#[test]
fn malformed_chunks_fail_construction() {
    let comm = Arc::new(Communicator::serial());
    let r = RowRange::new(0, 2);

    // column index beyond the global size
    let err = DistributedMatrix::<f64>::new(
        comm.clone(),
        2,
        2,
        r,
        r,
        vec![0, 1, 2],
        vec![0, 5],
        vec![1.0, 1.0],
    )
    .unwrap_err();
    assert!(matches!(err, Error::InvalidMatrix(_)));

    // pointer array does not match the claimed row count
    let err = DistributedMatrix::<f64>::new(
        comm,
        2,
        2,
        r,
        r,
        vec![0, 2],
        vec![0, 1],
        vec![1.0, 1.0],
    )
    .unwrap_err();
    assert!(matches!(err, Error::InvalidMatrix(_)));
}

#[test]
fn empty_range_operations_yield_empty_results() {
    let comm = Arc::new(Communicator::serial());
    let r = RowRange::new(0, 0);
    let a = DistributedMatrix::<f64>::new(comm, 0, 0, r, r, vec![0], vec![], vec![]).unwrap();
    assert_eq!(a.loc_rows(), 0);

    let at = a.transpose().unwrap();
    assert_eq!(at.loc_rows(), 0);
    let aa = a.product(&a).unwrap();
    assert_eq!(aa.loc_nnz(), 0);

    let mut y: Vec<f64> = vec![];
    a.spmv(1.0, &[], 0.0, &mut y);

    let op = a.move_to_backend::<CpuBackend>(&CpuParams::default());
    assert_eq!(op.loc_rows(), 0);
}
