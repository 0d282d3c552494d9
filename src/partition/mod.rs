//! Repartitioning: named strategies produce a restriction operator, and the
//! operator and right-hand side are rebuilt under the new row distribution
//! through the Galerkin triple product.
//!
//! The triple-product formulation is the key correctness property here: with
//! `I` mapping the old row space to the new one and `J = Iᵗ`, the transformed
//! system `(J A I, J rhs)` stays algebraically consistent with the original
//! under the new ownership without any process materializing the full matrix.

use std::str::FromStr;

use crate::backend::Backend;
use crate::core::range::RowRange;
use crate::core::value::BlockValue;
use crate::error::{Error, Result};
use crate::matrix::DistributedMatrix;
use crate::parallel::Comm;
use crate::utils::Profiler;

/// Named repartition strategies. `merge` keeps the current distribution;
/// `balance` redistributes rows so each process owns a near-equal share of
/// the non-zeros, in aggregation-block-aligned units.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartitionKind {
    Merge,
    Balance,
}

impl FromStr for PartitionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "merge" => Ok(PartitionKind::Merge),
            "balance" => Ok(PartitionKind::Balance),
            other => Err(Error::Config(format!(
                "unknown partition strategy `{other}` (available: merge, balance)"
            ))),
        }
    }
}

/// Collective. Apply the repartition protocol to a square distributed
/// operator and its right-hand side:
///
/// 1. with one process, or with the `merge` strategy, return both unchanged;
/// 2. otherwise obtain the restriction `I` from the strategy,
/// 3. form `J = Iᵗ` and the Galerkin product `A' = J (A I)`,
/// 4. move `J` to the backend and compute `rhs' = J rhs`.
///
/// `A'` stays in composable form; the caller decides when to move it.
pub fn repartition<V: BlockValue, B: Backend<V>>(
    a: DistributedMatrix<V>,
    rhs: B::Vector,
    kind: PartitionKind,
    aggr_block: usize,
    bprm: &B::Params,
    prof: &mut Profiler,
) -> Result<(DistributedMatrix<V>, B::Vector)> {
    if a.comm().size() == 1 || kind == PartitionKind::Merge {
        return Ok((a, rhs));
    }

    prof.tic("partition");
    let i = match kind {
        PartitionKind::Merge => unreachable!(),
        PartitionKind::Balance => balance_restriction(&a, aggr_block)?,
    };
    let j = i.transpose()?;
    let ai = a.product(&i)?;
    let a = j.product(&ai)?;

    let j = j.move_to_backend::<B>(bprm);
    let mut new_rhs = B::zeros(bprm, j.loc_rows());
    j.spmv(1.0, &rhs, 0.0, &mut new_rhs);
    prof.toc("partition");

    Ok((a, new_rhs))
}

/// Collective. Deterministic nnz-balancing restriction: recompute row
/// ownership so every process carries a near-equal non-zero load, with chunk
/// boundaries on multiples of `aggr_block`. The operator is the identity with
/// the new column distribution, so the triple product is a pure
/// redistribution of the same matrix.
fn balance_restriction<V: BlockValue>(
    a: &DistributedMatrix<V>,
    aggr_block: usize,
) -> Result<DistributedMatrix<V>> {
    let comm = a.comm().clone();
    let nproc = comm.size();
    let rank = comm.rank();
    let n = a.glob_rows();
    let align = aggr_block.max(1);
    let range = a.row_range();

    // Non-zero weight of each alignment unit this process owns. Ranges are
    // aligned by construction, so units never straddle a rank boundary.
    let (lptr, rptr) = (a.local_part().ptr(), a.remote_part().ptr());
    let mut unit_w: Vec<u64> = Vec::with_capacity(range.len().div_ceil(align));
    for u in (0..range.len()).step_by(align) {
        let hi = (u + align).min(range.len());
        let w = (lptr[hi] - lptr[u]) + (rptr[hi] - rptr[u]);
        unit_w.push(w as u64);
    }

    let units = comm.all_gather_v_u64(&unit_w);
    let total: u64 = units.iter().sum();

    // Greedy scan: close a bucket whenever its share of the total is reached.
    // Every rank runs the same scan on the same data, so boundaries agree.
    let mut begs = vec![0usize; nproc + 1];
    begs[nproc] = n;
    let mut cum = 0u64;
    let mut bucket = 1usize;
    for (u, &w) in units.iter().enumerate() {
        if bucket == nproc {
            break;
        }
        cum += w;
        if cum * (nproc as u64) >= total * (bucket as u64) {
            begs[bucket] = ((u + 1) * align).min(n);
            bucket += 1;
        }
    }
    // buckets the scan never closed become empty trailing ranges
    for b in bucket..nproc {
        begs[b] = n;
    }
    for b in 1..nproc {
        begs[b] = begs[b].max(begs[b - 1]);
    }

    let new_range = RowRange::new(begs[rank], begs[rank + 1]);

    // Identity restriction: rows per the old partition, columns per the new.
    let len = range.len();
    let ptr: Vec<usize> = (0..=len).collect();
    let col: Vec<usize> = (range.beg..range.end).collect();
    let val = vec![V::one(); len];
    DistributedMatrix::new(comm, n, n, range, new_range, ptr, col, val)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CpuBackend, CpuParams};
    use crate::core::range;
    use crate::parallel::Communicator;
    use crate::problem;
    use std::sync::Arc;

    fn poisson_operator(n: usize) -> (DistributedMatrix<f64>, Vec<f64>) {
        let comm = Arc::new(Communicator::serial());
        let p = problem::poisson3d(n, 1, 0, 1);
        let r = range::assign(p.glob_rows, 1, 0, 1);
        let a = DistributedMatrix::new(comm, p.glob_rows, p.glob_rows, r, r, p.ptr, p.col, p.val)
            .unwrap();
        (a, p.rhs)
    }

    #[test]
    fn merge_is_a_no_op() {
        let (a, rhs) = poisson_operator(3);
        let before = a.triples();
        let mut prof = Profiler::new("test");
        let (a2, rhs2) = repartition::<f64, CpuBackend>(
            a,
            rhs.clone(),
            PartitionKind::Merge,
            1,
            &CpuParams::default(),
            &mut prof,
        )
        .unwrap();
        assert_eq!(a2.triples(), before);
        assert_eq!(rhs2, rhs);
    }

    #[test]
    fn single_process_skips_any_strategy() {
        let (a, rhs) = poisson_operator(3);
        let before = a.triples();
        let mut prof = Profiler::new("test");
        let (a2, rhs2) = repartition::<f64, CpuBackend>(
            a,
            rhs.clone(),
            PartitionKind::Balance,
            1,
            &CpuParams::default(),
            &mut prof,
        )
        .unwrap();
        assert_eq!(a2.triples(), before);
        assert_eq!(rhs2, rhs);
    }

    #[test]
    fn strategy_names_parse() {
        assert_eq!("merge".parse::<PartitionKind>().unwrap(), PartitionKind::Merge);
        assert_eq!("balance".parse::<PartitionKind>().unwrap(), PartitionKind::Balance);
        assert!("scotch".parse::<PartitionKind>().is_err());
    }
}
