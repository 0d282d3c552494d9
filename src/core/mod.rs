//! Core numeric building blocks: row-range assignment and block value algebra.

pub mod range;
pub mod value;

pub use range::RowRange;
pub use value::{Block, BlockValue, BlockVec, RhsValue};
