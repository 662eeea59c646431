//! `am-matrix` - Matrix value type with pluggable multiplication backends for async-math.
//!
//! This crate provides:
//! - A row-major `Matrix` type that owns its buffer
//! - The build-time element width (`Real`, `Precision`)
//! - A `ComputeBackend` trait for pluggable multiplication (CPU, compute devices)
//! - A reference `CpuBackend` implementation

pub mod backend;
pub mod cpu;
pub mod error;
pub mod matrix;
pub mod precision;

// Re-export primary types at the crate root for convenience.
pub use backend::ComputeBackend;
pub use cpu::CpuBackend;
pub use error::{MatrixError, Result};
pub use matrix::Matrix;
pub use precision::{Precision, Real};
