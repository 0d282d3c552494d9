//! parmg command-line driver.
//!
//! Assembles a synthetic 3D Poisson problem or reads a matrix from disk,
//! splits it across the process group, optionally rebalances the
//! distribution, and solves with AMG-preconditioned BiCGStab. Configuration
//! errors are reported on rank 0 and exit with a non-zero status before any
//! solve starts.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use parmg::config::Params;
use parmg::context::{self, SolveConfig};
use parmg::error::Result;
use parmg::parallel::{Comm, Communicator};
use parmg::partition::PartitionKind;
use parmg::problem;
use parmg::utils::Profiler;

#[derive(Parser)]
#[command(name = "parmg")]
#[command(about = "Distributed AMG-preconditioned iterative solver for sparse linear systems")]
#[command(version)]
struct Args {
    /// System matrix in the MatrixMarket format. When not specified, a 3D
    /// Poisson problem on the unit cube is assembled.
    #[arg(short = 'A', long)]
    matrix: Option<PathBuf>,

    /// Right-hand-side vector file. When omitted, a vector of ones is used.
    /// Should only be provided together with a system matrix.
    #[arg(short = 'f', long)]
    rhs: Option<PathBuf>,

    /// Treat input files as packed binary CRS instead of MatrixMarket.
    #[arg(short = 'B', long, default_value_t = false)]
    binary: bool,

    /// Block size of the system matrix; systems from elasticity or coupled
    /// PDEs usually have block-wise structure.
    #[arg(short = 'b', long, default_value_t = 1)]
    block_size: usize,

    /// Repartition strategy applied to the assembled matrix (merge, balance).
    #[arg(short = 'r', long, default_value = "merge")]
    partitioner: String,

    /// Grid side for the synthetic problem (N = n^3).
    #[arg(short = 'n', long, default_value_t = 128)]
    size: usize,

    /// Parameter file in JSON format.
    #[arg(short = 'P', long)]
    prm_file: Option<PathBuf>,

    /// Parameters as name=value pairs, may be given multiple times, e.g.
    /// -p solver.tol=1e-3 -p precond.coarse_enough=300
    #[arg(short = 'p', long = "prm")]
    prm: Vec<String>,
}

fn main() {
    let args = Args::parse();
    let comm = Arc::new(Communicator::world());

    if let Err(e) = run(&args, comm.clone()) {
        if comm.rank() == 0 {
            eprintln!("parmg: {e}");
        }
        std::process::exit(1);
    }
}

fn run(args: &Args, comm: Arc<Communicator>) -> Result<()> {
    let rank = comm.rank();
    if rank == 0 {
        println!("World size: {}", comm.size());
    }

    let mut params = Params::new();
    if let Some(path) = &args.prm_file {
        params.merge_json_file(path)?;
    }
    for pair in &args.prm {
        params.insert_pair(pair)?;
    }

    let aggr_block = params.get_usize("precond.coarsening.aggr.block_size", 1);
    let align = args.block_size * aggr_block;
    let partition: PartitionKind = args.partitioner.parse()?;

    let mut prof = Profiler::new("parmg");

    let problem = match &args.matrix {
        Some(matrix) => {
            prof.tic("read");
            let p = if args.binary {
                problem::read_binary(matrix, args.rhs.as_deref(), align, rank, comm.size())?
            } else {
                problem::read_matrix_market(matrix, args.rhs.as_deref(), align, rank, comm.size())?
            };
            prof.toc("read");
            p
        }
        None => {
            prof.tic("assemble");
            let p = problem::poisson3d(args.size, align, rank, comm.size());
            prof.toc("assemble");
            p
        }
    };

    let cfg = SolveConfig { block_size: args.block_size, partition, params, verbose: true };
    context::solve(comm.clone(), problem, &cfg, &mut prof)?;

    if rank == 0 {
        println!("{prof}");
    }
    Ok(())
}
