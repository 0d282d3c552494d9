//! Convergence tracking & tolerance checks for iterative solvers.

/// Stopping criteria & stats.
pub struct Convergence<T> {
    pub tol: T,
    pub max_iters: usize,
}

#[derive(Clone, Debug)]
pub struct SolveStats<T> {
    pub iterations: usize,
    /// Residual norm relative to the right-hand side.
    pub final_residual: T,
    pub converged: bool,
}

impl<T: Copy + num_traits::Float> Convergence<T> {
    /// Returns (should_stop, stats) given current `res_norm` and iteration `i`.
    pub fn check(&self, res_norm: T, res0_norm: T, i: usize) -> (bool, SolveStats<T>) {
        let rel = res_norm / res0_norm;
        let converged = rel <= self.tol;
        (
            converged || i >= self.max_iters,
            SolveStats { iterations: i, final_residual: rel, converged },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stops_on_tolerance_or_budget() {
        let conv = Convergence { tol: 1e-6, max_iters: 10 };
        let (stop, stats) = conv.check(1e-3, 1.0, 2);
        assert!(!stop && !stats.converged);

        let (stop, stats) = conv.check(5e-7, 1.0, 3);
        assert!(stop && stats.converged);
        assert_eq!(stats.iterations, 3);

        let (stop, stats) = conv.check(1e-2, 1.0, 10);
        assert!(stop, "iteration budget exhausts the solver");
        assert!(!stats.converged);
    }
}
