//! Distributed algebraic multigrid preconditioner.
//!
//! The hierarchy is built from the composable operator alone: strength of
//! connection over the owned rows, greedy aggregation (each unaggregated row
//! absorbs its strong unaggregated neighbors), a piecewise-constant
//! prolongation, and Galerkin coarsening `R (A P)` through the same
//! distributed triple product the repartitioner uses. Aggregation is
//! decoupled: aggregates never straddle process boundaries, which keeps the
//! transfer operators perfectly row-partitioned.
//!
//! Smoothing is damped block-Jacobi, expressed with the diagonal-inverse as a
//! one-entry-per-row operator so the whole V-cycle runs on backend kernels.
//! The coarsest level is gathered to every rank once and factorized dense,
//! then solved redundantly; the result is deterministic across ranks.

use std::fmt;
use std::sync::Arc;

use faer::linalg::solvers::SolveCore;

use crate::backend::{Backend, BackendOperator};
use crate::config::Params;
use crate::core::range::RowRange;
use crate::core::value::{BlockValue, RhsValue};
use crate::error::Result;
use crate::matrix::DistributedMatrix;
use crate::parallel::{Comm, Communicator};
use crate::preconditioner::Preconditioner;

#[derive(Clone, Debug)]
pub struct AmgParams {
    /// Strength-of-connection threshold.
    pub eps_strong: f64,
    /// Hierarchy depth cap, counting the coarsest level.
    pub max_levels: usize,
    /// Stop coarsening once the global (block-)row count drops to this.
    pub coarse_enough: usize,
    pub npre: usize,
    pub npost: usize,
    /// Jacobi damping factor.
    pub damping: f64,
}

impl Default for AmgParams {
    fn default() -> Self {
        AmgParams {
            eps_strong: 0.08,
            max_levels: 16,
            coarse_enough: 500,
            npre: 1,
            npost: 1,
            damping: 0.72,
        }
    }
}

impl AmgParams {
    pub fn from_config(prm: &Params) -> Self {
        let d = AmgParams::default();
        AmgParams {
            eps_strong: prm.get_f64("precond.coarsening.eps_strong", d.eps_strong),
            max_levels: prm.get_usize("precond.max_levels", d.max_levels),
            coarse_enough: prm.get_usize("precond.coarse_enough", d.coarse_enough),
            npre: prm.get_usize("precond.npre", d.npre),
            npost: prm.get_usize("precond.npost", d.npost),
            damping: prm.get_f64("precond.relax.damping", d.damping),
        }
    }
}

struct Transfer<V: BlockValue, B: Backend<V>> {
    p: BackendOperator<V, B>,
    r: BackendOperator<V, B>,
    dinv: BackendOperator<V, B>,
    loc_coarse: usize,
}

struct Level<V: BlockValue, B: Backend<V>> {
    a: BackendOperator<V, B>,
    /// `None` on the coarsest level, which is handled by the direct solver.
    transfer: Option<Transfer<V, B>>,
}

#[derive(Clone, Copy)]
struct LevelInfo {
    rows: usize,
    nnz: usize,
}

/// The assembled hierarchy. Owns backend-resident operators for every level,
/// so it must be rebuilt after any redistribution of the fine operator.
pub struct Amg<V: BlockValue, B: Backend<V>> {
    comm: Arc<Communicator>,
    levels: Vec<Level<V, B>>,
    coarse: CoarseSolver,
    prm: AmgParams,
    bprm: B::Params,
    info: Vec<LevelInfo>,
}

impl<V: BlockValue, B: Backend<V>> Amg<V, B> {
    /// Collective. Consume the composable fine operator and build the
    /// hierarchy, moving every level to the backend.
    pub fn build(a: DistributedMatrix<V>, prm: AmgParams, bprm: &B::Params) -> Result<Self> {
        let comm = a.comm().clone();
        let mut levels: Vec<Level<V, B>> = Vec::new();
        let mut info = Vec::new();
        let mut current = a;

        let coarse = loop {
            let glob = current.glob_rows();
            info.push(LevelInfo { rows: glob, nnz: current.glob_nnz() });

            if glob <= prm.coarse_enough || levels.len() + 2 > prm.max_levels.max(1) {
                let solver = CoarseSolver::build(&current)?;
                levels.push(Level { a: current.move_to_backend::<B>(bprm), transfer: None });
                break solver;
            }

            let agg = aggregate(&current, prm.eps_strong);
            let n_agg = agg.iter().max().map_or(0, |&m| m + 1);
            let counts = comm.all_gather_usize(n_agg);
            let n_coarse: usize = counts.iter().sum();

            // coarsening stalled; settle for a direct solve at this size
            if n_coarse * 10 > glob * 9 {
                let solver = CoarseSolver::build(&current)?;
                levels.push(Level { a: current.move_to_backend::<B>(bprm), transfer: None });
                break solver;
            }

            let coarse_beg: usize = counts[..comm.rank()].iter().sum();
            let coarse_range = RowRange::new(coarse_beg, coarse_beg + n_agg);

            let loc = current.loc_rows();
            let p = DistributedMatrix::new(
                comm.clone(),
                glob,
                n_coarse,
                current.row_range(),
                coarse_range,
                (0..=loc).collect(),
                agg.iter().map(|&a| coarse_beg + a).collect(),
                vec![V::one(); loc],
            )?;
            let r = p.transpose()?;
            let ap = current.product(&p)?;
            let a_next = r.product(&ap)?;

            let dinv_vals: Vec<V> = current.diagonal().iter().map(V::inverse).collect();
            let range = current.row_range();
            let dinv = DistributedMatrix::new(
                comm.clone(),
                glob,
                glob,
                range,
                range,
                (0..=loc).collect(),
                (range.beg..range.end).collect(),
                dinv_vals,
            )?;

            levels.push(Level {
                a: current.move_to_backend::<B>(bprm),
                transfer: Some(Transfer {
                    p: p.move_to_backend::<B>(bprm),
                    r: r.move_to_backend::<B>(bprm),
                    dinv: dinv.move_to_backend::<B>(bprm),
                    loc_coarse: n_agg,
                }),
            });
            current = a_next;
        };

        Ok(Amg { comm, levels, coarse, prm, bprm: bprm.clone(), info })
    }

    /// Collective. Build with parameters taken from the flat config map.
    pub fn from_config(a: DistributedMatrix<V>, prm: &Params, bprm: &B::Params) -> Result<Self> {
        Self::build(a, AmgParams::from_config(prm), bprm)
    }

    /// The finest-level operator in backend form; this is what the iterative
    /// solver iterates against.
    pub fn finest(&self) -> &BackendOperator<V, B> {
        &self.levels[0].a
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    fn smooth(&self, lvl: &Level<V, B>, t: &Transfer<V, B>, r: &B::Vector, z: &mut B::Vector) {
        let mut res = B::zeros(&self.bprm, lvl.a.loc_rows());
        B::copy(r, &mut res);
        lvl.a.spmv(-1.0, z, 1.0, &mut res);
        t.dinv.spmv(self.prm.damping, &res, 1.0, z);
    }

    fn cycle(&self, level: usize, r: &B::Vector, z: &mut B::Vector) {
        let lvl = &self.levels[level];
        let Some(t) = &lvl.transfer else {
            self.coarse.apply::<V, B>(&self.comm, &self.bprm, r, z);
            return;
        };

        B::fill(z, V::Rhs::zero());
        for _ in 0..self.prm.npre {
            self.smooth(lvl, t, r, z);
        }

        let mut res = B::zeros(&self.bprm, lvl.a.loc_rows());
        B::copy(r, &mut res);
        lvl.a.spmv(-1.0, z, 1.0, &mut res);

        let mut rc = B::zeros(&self.bprm, t.loc_coarse);
        t.r.spmv(1.0, &res, 0.0, &mut rc);
        let mut zc = B::zeros(&self.bprm, t.loc_coarse);
        self.cycle(level + 1, &rc, &mut zc);
        t.p.spmv(1.0, &zc, 1.0, z);

        for _ in 0..self.prm.npost {
            self.smooth(lvl, t, r, z);
        }
    }
}

impl<V: BlockValue, B: Backend<V>> Preconditioner<B::Vector> for Amg<V, B> {
    fn apply(&self, r: &B::Vector, z: &mut B::Vector) -> Result<()> {
        self.cycle(0, r, z);
        Ok(())
    }
}

impl<V: BlockValue, B: Backend<V>> fmt::Display for Amg<V, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fine_rows = self.info[0].rows as f64;
        let fine_nnz = self.info[0].nnz as f64;
        let grid: f64 = self.info.iter().map(|l| l.rows as f64).sum::<f64>() / fine_rows;
        let oper: f64 = self.info.iter().map(|l| l.nnz as f64).sum::<f64>() / fine_nnz;

        writeln!(f, "Number of levels:    {}", self.info.len())?;
        writeln!(f, "Operator complexity: {oper:.2}")?;
        writeln!(f, "Grid complexity:     {grid:.2}")?;
        writeln!(f)?;
        writeln!(f, "level     unknowns       nonzeros")?;
        writeln!(f, "---------------------------------")?;
        for (l, info) in self.info.iter().enumerate() {
            writeln!(
                f,
                "{l:>5} {:>12} {:>14} ({:>4.1}%)",
                info.rows,
                info.nnz,
                100.0 * info.nnz as f64 / fine_nnz
            )?;
        }
        Ok(())
    }
}

/// Greedy decoupled aggregation over the owned rows: every row not yet
/// aggregated opens a new aggregate and absorbs its strong, still-free
/// neighbors. Rows with no strong connections become singletons, so every row
/// belongs to exactly one aggregate.
fn aggregate<V: BlockValue>(a: &DistributedMatrix<V>, eps: f64) -> Vec<usize> {
    let local = a.local_part();
    let n = local.nrows();
    let diag: Vec<f64> = a.diagonal().iter().map(V::norm).collect();

    let mut agg = vec![usize::MAX; n];
    let mut next = 0;
    for i in 0..n {
        if agg[i] != usize::MAX {
            continue;
        }
        agg[i] = next;
        let (cols, vals) = local.row(i);
        for (&j, v) in cols.iter().zip(vals) {
            if j != i && agg[j] == usize::MAX && v.norm() > eps * (diag[i] * diag[j]).sqrt() {
                agg[j] = next;
            }
        }
        next += 1;
    }
    agg
}

/// Dense factorization of the gathered coarsest-level matrix. Every rank
/// holds the factor and solves the full coarse system redundantly; being a
/// deterministic computation on identical data, the ranks agree bit-for-bit.
struct CoarseSolver {
    lu: faer::linalg::solvers::FullPivLu<f64>,
    n_scalar: usize,
    beg_scalar: usize,
    len_scalar: usize,
}

impl CoarseSolver {
    fn build<V: BlockValue>(a: &DistributedMatrix<V>) -> Result<Self> {
        let comm = a.comm();
        let ns = a.glob_rows() * V::DIM;

        let mut coords: Vec<u64> = Vec::new();
        let mut vals: Vec<f64> = Vec::new();
        for (i, j, v) in a.triples() {
            for r in 0..V::DIM {
                for c in 0..V::DIM {
                    coords.push((i * V::DIM + r) as u64);
                    coords.push((j * V::DIM + c) as u64);
                    vals.push(v.get(r, c));
                }
            }
        }
        let coords = comm.all_gather_v_u64(&coords);
        let vals = comm.all_gather_v_f64(&vals);

        let mut dense = faer::Mat::<f64>::zeros(ns, ns);
        for (pair, &v) in coords.chunks_exact(2).zip(&vals) {
            dense[(pair[0] as usize, pair[1] as usize)] += v;
        }

        let lu = faer::linalg::solvers::FullPivLu::new(dense.as_ref());
        Ok(CoarseSolver {
            lu,
            n_scalar: ns,
            beg_scalar: a.row_range().beg * V::DIM,
            len_scalar: a.loc_rows() * V::DIM,
        })
    }

    fn apply<V: BlockValue, B: Backend<V>>(
        &self,
        comm: &Arc<Communicator>,
        bprm: &B::Params,
        r: &B::Vector,
        z: &mut B::Vector,
    ) {
        let local = B::download(r);
        let mut flat = Vec::with_capacity(local.len() * V::DIM);
        for v in &local {
            v.write_scalars(&mut flat);
        }
        let mut glob = comm.all_gather_v_f64(&flat);
        debug_assert_eq!(glob.len(), self.n_scalar);

        let x = faer::MatMut::from_column_major_slice_mut(&mut glob, self.n_scalar, 1);
        self.lu.solve_in_place_with_conj(faer::Conj::No, x);

        let mine = &glob[self.beg_scalar..self.beg_scalar + self.len_scalar];
        let out: Vec<V::Rhs> = mine.chunks_exact(V::DIM).map(V::Rhs::read_scalars).collect();
        *z = B::vector_from(bprm, out);
    }
}
