use std::fmt::Debug;

use crate::error::Result;
use crate::precision::Real;

/// Trait for pluggable multiplication backends (host CPU, compute devices).
///
/// Data is passed in as row-major slices and returned as an owned vector.
/// The backend is responsible for performing the computation and returning
/// the result; callers have already checked that the shapes agree.
pub trait ComputeBackend: Send + Sync + Debug {
    /// Returns the name of this backend (e.g., "cpu", "device").
    fn name(&self) -> &str;

    /// Matrix multiplication: C = A @ B.
    ///
    /// - `a`: row-major data of shape [m, k]
    /// - `b`: row-major data of shape [k, n]
    /// - Returns: row-major data of shape [m, n]
    fn matmul(&self, a: &[Real], b: &[Real], m: usize, k: usize, n: usize) -> Result<Vec<Real>>;
}
