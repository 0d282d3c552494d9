//! Shared utilities: convergence bookkeeping and phase timing.

pub mod convergence;
pub mod profiler;

pub use convergence::{Convergence, SolveStats};
pub use profiler::Profiler;
