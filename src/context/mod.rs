//! Solve orchestration: run-time dispatch over the closed set of compiled
//! block sizes, the assemble → distribute → repartition → setup → solve
//! pipeline, and rank-0 reporting.
//!
//! Block size is a run-time configuration value, but the numeric value types
//! must be compile-time specializations; the dispatch is a plain branch over
//! the supported sizes {1, 3, 4}, and anything else is a user-facing
//! configuration error before any collective work starts.

use std::sync::Arc;

use crate::backend::{Backend, CpuBackend};
use crate::config::Params;
use crate::core::range::RowRange;
use crate::core::value::{Block, BlockValue};
use crate::error::{Error, Result};
use crate::matrix::{DistributedMatrix, FromScalarCsr};
use crate::parallel::{Comm, Communicator};
use crate::partition::{self, PartitionKind};
use crate::preconditioner::Amg;
use crate::problem::Problem;
use crate::solver::BiCgStab;
use crate::utils::Profiler;

/// Everything the orchestrator needs beyond the assembled problem.
pub struct SolveConfig {
    pub block_size: usize,
    pub partition: PartitionKind,
    pub params: Params,
    /// Print the solver summary and results on rank 0.
    pub verbose: bool,
}

#[derive(Clone, Debug)]
pub struct SolveReport {
    pub iterations: usize,
    pub relative_residual: f64,
    pub converged: bool,
}

/// Collective. Dispatch on the configured block size and run the solve
/// pipeline with the compiled-in backend.
pub fn solve(
    comm: Arc<Communicator>,
    problem: Problem,
    cfg: &SolveConfig,
    prof: &mut Profiler,
) -> Result<SolveReport> {
    match cfg.block_size {
        1 => solve_typed::<f64, CpuBackend>(comm, problem, cfg, prof),
        3 => solve_typed::<Block<3>, CpuBackend>(comm, problem, cfg, prof),
        4 => solve_typed::<Block<4>, CpuBackend>(comm, problem, cfg, prof),
        b => Err(Error::UnsupportedBlockSize(b)),
    }
}

fn solve_typed<V, B>(
    comm: Arc<Communicator>,
    problem: Problem,
    cfg: &SolveConfig,
    prof: &mut Profiler,
) -> Result<SolveReport>
where
    V: BlockValue + FromScalarCsr,
    B: Backend<V>,
{
    let rank = comm.rank();
    let bprm = B::Params::default();
    let aggr_block = cfg.params.get_usize("precond.coarsening.aggr.block_size", 1);

    if problem.glob_rows % V::DIM != 0 {
        return Err(Error::Config(format!(
            "global row count {} is not divisible by block size {}",
            problem.glob_rows,
            V::DIM
        )));
    }

    // Scalar rows were assigned with align = block * aggr_block, so the block
    // view keeps whole aggregation units per rank.
    let chunk = V::from_scalar_csr(
        problem.range.beg,
        problem.glob_rows,
        &problem.ptr,
        &problem.col,
        &problem.val,
    )?;
    let rhs = V::group_rhs(&problem.rhs)?;

    let brange = RowRange::new(problem.range.beg / V::DIM, problem.range.end / V::DIM);
    let a = DistributedMatrix::from_chunk(
        comm.clone(),
        problem.glob_rows / V::DIM,
        brange,
        brange,
        chunk,
    )?;
    let rhs = B::vector_from(&bprm, rhs);

    let (a, rhs) =
        partition::repartition::<V, B>(a, rhs, cfg.partition, aggr_block, &bprm, prof)?;

    prof.tic("setup");
    let amg = Amg::<V, B>::from_config(a, &cfg.params, &bprm)?;
    let solver = BiCgStab::from_config(&cfg.params);
    prof.toc("setup");

    if cfg.verbose && rank == 0 {
        println!("{amg}");
        println!("{solver}");
        println!();
    }

    let mut x = B::zeros(&bprm, amg.finest().loc_rows());

    prof.tic("solve");
    let stats = solver.solve(amg.finest(), Some(&amg), &rhs, &mut x)?;
    prof.toc("solve");

    if cfg.verbose && rank == 0 {
        println!("Iterations: {}", stats.iterations);
        println!("Error:      {:e}", stats.final_residual);
        println!();
    }

    Ok(SolveReport {
        iterations: stats.iterations,
        relative_residual: stats.final_residual,
        converged: stats.converged,
    })
}
