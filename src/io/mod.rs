//! Row-range-restricted readers and writers for on-disk sparse matrices.
//!
//! Two encodings are supported: human-readable MatrixMarket coordinate files
//! ([`mm`]) and a packed binary CRS format ([`binary`]). Both readers return
//! the CRS arrays for a contiguous global row range without materializing the
//! whole matrix on one process.

pub mod binary;
pub mod mm;
