//! Preconditioned BiCGStab (Saad §7.4.2) over backend vectors.
//!
//! Inner products reduce across the process group through the operator's
//! communicator; everything else is local backend kernels, so the same code
//! runs serially and distributed. Right preconditioning keeps the reported
//! residual that of the original system.

use std::fmt;

use crate::backend::{Backend, BackendOperator};
use crate::config::Params;
use crate::core::value::{BlockValue, RhsValue};
use crate::error::{Error, Result};
use crate::preconditioner::Preconditioner;
use crate::utils::convergence::{Convergence, SolveStats};

pub struct BiCgStab {
    pub conv: Convergence<f64>,
}

impl BiCgStab {
    pub fn new(tol: f64, max_iters: usize) -> Self {
        BiCgStab { conv: Convergence { tol, max_iters } }
    }

    /// Tolerance from `solver.tol`, iteration budget from `solver.maxiter`.
    pub fn from_config(prm: &Params) -> Self {
        Self::new(prm.get_f64("solver.tol", 1e-8), prm.get_usize("solver.maxiter", 100))
    }

    /// Collective. Solve A·x = b to the configured relative tolerance,
    /// starting from the current content of `x`.
    ///
    /// Running out of iterations is not an error: the stats are returned with
    /// `converged: false` and the caller judges the residual. Breakdowns of
    /// the recurrence (vanishing `rho`, `omega`, or search direction) are
    /// errors.
    pub fn solve<V, B, P>(
        &self,
        a: &BackendOperator<V, B>,
        pc: Option<&P>,
        b: &B::Vector,
        x: &mut B::Vector,
    ) -> Result<SolveStats<f64>>
    where
        V: BlockValue,
        B: Backend<V>,
        P: Preconditioner<B::Vector> + ?Sized,
    {
        let n = a.loc_rows();
        let bprm = a.params().clone();

        let apply_pc = |r: &B::Vector, z: &mut B::Vector| -> Result<()> {
            match pc {
                Some(p) => p.apply(r, z),
                None => {
                    B::copy(r, z);
                    Ok(())
                }
            }
        };

        // r0 = b - A x0
        let mut r = B::zeros(&bprm, n);
        B::copy(b, &mut r);
        a.spmv(-1.0, x, 1.0, &mut r);
        let r_hat = B::download(&r);
        let r_hat = B::vector_from(&bprm, r_hat); // shadow residual, frozen

        let b_norm = a.norm(b);
        if b_norm == 0.0 {
            B::fill(x, V::Rhs::zero());
            return Ok(SolveStats { iterations: 0, final_residual: 0.0, converged: true });
        }

        let res0 = a.norm(&r);
        let (stop, mut stats) = self.conv.check(res0, b_norm, 0);
        if stop {
            return Ok(stats);
        }

        let mut rho_prev = 1.0;
        let mut alpha = 1.0;
        let mut omega = 1.0;
        let mut p = B::zeros(&bprm, n);
        let mut v = B::zeros(&bprm, n);
        let mut p_hat = B::zeros(&bprm, n);
        let mut s_hat = B::zeros(&bprm, n);
        let mut t = B::zeros(&bprm, n);

        for i in 1..=self.conv.max_iters {
            let rho = a.dot(&r_hat, &r);
            if rho.abs() < f64::EPSILON * b_norm * b_norm {
                return Err(Error::Breakdown("rho vanished in BiCGStab"));
            }

            if i == 1 {
                B::copy(&r, &mut p);
            } else {
                let beta = (rho / rho_prev) * (alpha / omega);
                // p = r + beta * (p - omega * v)
                B::axpy(-omega, &v, &mut p);
                B::axpby(1.0, &r, beta, &mut p);
            }

            apply_pc(&p, &mut p_hat)?;
            a.spmv(1.0, &p_hat, 0.0, &mut v);

            let denom = a.dot(&r_hat, &v);
            if denom.abs() < f64::EPSILON * b_norm * b_norm {
                return Err(Error::Breakdown("search direction collapsed in BiCGStab"));
            }
            alpha = rho / denom;

            // s = r - alpha * v (reuse r)
            B::axpy(-alpha, &v, &mut r);
            let s_norm = a.norm(&r);
            let (stop, st) = self.conv.check(s_norm, b_norm, i);
            if stop {
                B::axpy(alpha, &p_hat, x);
                return Ok(st);
            }

            apply_pc(&r, &mut s_hat)?;
            a.spmv(1.0, &s_hat, 0.0, &mut t);

            let tt = a.dot(&t, &t);
            if tt.abs() < f64::EPSILON {
                return Err(Error::Breakdown("stabilization step vanished in BiCGStab"));
            }
            omega = a.dot(&t, &r) / tt;

            // x += alpha * p_hat + omega * s_hat
            B::axpy(alpha, &p_hat, x);
            B::axpy(omega, &s_hat, x);

            // r = s - omega * t
            B::axpy(-omega, &t, &mut r);

            let r_norm = a.norm(&r);
            let (stop, st) = self.conv.check(r_norm, b_norm, i);
            stats = st;
            if stop {
                return Ok(stats);
            }
            if omega.abs() < f64::EPSILON {
                return Err(Error::Breakdown("omega vanished in BiCGStab"));
            }
            rho_prev = rho;
        }

        Ok(stats)
    }
}

impl fmt::Display for BiCgStab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Solver: BiCGStab (tol: {:.0e}, maxiter: {})",
            self.conv.tol, self.conv.max_iters
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CpuBackend, CpuParams};
    use crate::core::range;
    use crate::matrix::DistributedMatrix;
    use crate::parallel::Communicator;
    use crate::preconditioner::{Amg, AmgParams};
    use crate::problem;
    use approx::assert_abs_diff_eq;
    use std::sync::Arc;

    fn poisson_operator(n: usize) -> DistributedMatrix<f64> {
        let comm = Arc::new(Communicator::serial());
        let p = problem::poisson3d(n, 1, 0, 1);
        let r = range::assign(p.glob_rows, 1, 0, 1);
        DistributedMatrix::new(comm, p.glob_rows, p.glob_rows, r, r, p.ptr, p.col, p.val).unwrap()
    }

    #[test]
    fn unpreconditioned_solve_recovers_known_solution() {
        let a = poisson_operator(3);
        let n = a.glob_rows();
        let x_true: Vec<f64> = (0..n).map(|i| ((i % 5) as f64) - 2.0).collect();
        let mut b = vec![0.0; n];
        a.spmv(1.0, &x_true, 0.0, &mut b);

        let op = a.move_to_backend::<CpuBackend>(&CpuParams::default());
        let mut x = vec![0.0; n];
        let solver = BiCgStab::new(1e-10, 500);
        let stats = solver
            .solve::<f64, CpuBackend, Amg<f64, CpuBackend>>(&op, None, &b, &mut x)
            .unwrap();
        assert!(stats.converged, "stats: {stats:?}");
        for i in 0..n {
            assert_abs_diff_eq!(x[i], x_true[i], epsilon = 1e-6);
        }
    }

    #[test]
    fn amg_preconditioned_solve_converges_fast() {
        let a = poisson_operator(6);
        let n = a.glob_rows();
        let b = vec![1.0; n];
        let bprm = CpuParams::default();

        let prm = AmgParams { coarse_enough: 30, ..AmgParams::default() };
        let amg = Amg::<f64, CpuBackend>::build(a, prm, &bprm).unwrap();

        let mut x = vec![0.0; n];
        let solver = BiCgStab::new(1e-8, 100);
        let stats = solver.solve(amg.finest(), Some(&amg), &b, &mut x).unwrap();
        assert!(stats.converged, "stats: {stats:?}");
        assert!(stats.iterations < 50, "AMG should accelerate: {stats:?}");
        assert!(stats.final_residual <= 1e-8);
    }

    #[test]
    fn zero_rhs_returns_zero_solution() {
        let a = poisson_operator(3);
        let n = a.glob_rows();
        let op = a.move_to_backend::<CpuBackend>(&CpuParams::default());
        let mut x = vec![1.0; n];
        let solver = BiCgStab::new(1e-8, 10);
        let stats = solver
            .solve::<f64, CpuBackend, Amg<f64, CpuBackend>>(&op, None, &vec![0.0; n], &mut x)
            .unwrap();
        assert!(stats.converged);
        assert_eq!(stats.iterations, 0);
        assert!(x.iter().all(|&v| v == 0.0));
    }
}
