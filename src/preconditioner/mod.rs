//! Preconditioner capability consumed by the iterative solver.

use crate::error::Result;

/// A preconditioner M ≈ A⁻¹ acting on backend vectors.
pub trait Preconditioner<Vec> {
    /// Apply M⁻¹ to r, writing z = M⁻¹ r. Collective for distributed
    /// preconditioners: all ranks must apply in step.
    fn apply(&self, r: &Vec, z: &mut Vec) -> Result<()>;
}

pub mod amg;

pub use amg::{Amg, AmgParams};
