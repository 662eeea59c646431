use crate::backend::ComputeBackend;
use crate::error::{MatrixError, Result};
use crate::precision::Real;

/// Pure-Rust CPU backend.
///
/// The naive triple loop, kept as the reference every device result is
/// checked against.
#[derive(Debug, Clone)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        CpuBackend
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &str {
        "cpu"
    }

    fn matmul(&self, a: &[Real], b: &[Real], m: usize, k: usize, n: usize) -> Result<Vec<Real>> {
        if a.len() != m * k {
            return Err(MatrixError::ShapeMismatch {
                rows: m,
                cols: k,
                got: a.len(),
            });
        }
        if b.len() != k * n {
            return Err(MatrixError::ShapeMismatch {
                rows: k,
                cols: n,
                got: b.len(),
            });
        }

        let mut c = vec![0.0 as Real; m * n];
        for i in 0..m {
            for j in 0..n {
                let mut sum = 0.0 as Real;
                for p in 0..k {
                    sum += a[i * k + p] * b[p * n + j];
                }
                c[i * n + j] = sum;
            }
        }
        Ok(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> CpuBackend {
        CpuBackend::new()
    }

    #[test]
    fn test_matmul_identity() {
        let b = backend();
        let a = vec![1.0, 0.0, 0.0, 1.0];
        let x = vec![1.0, 2.0, 3.0, 4.0];
        let c = b.matmul(&a, &x, 2, 2, 2).unwrap();
        assert_eq!(c, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_matmul_basic() {
        let b = backend();
        // [1,2;3,4] @ [5,6;7,8] = [19,22;43,50]
        let a = vec![1.0, 2.0, 3.0, 4.0];
        let x = vec![5.0, 6.0, 7.0, 8.0];
        let c = b.matmul(&a, &x, 2, 2, 2).unwrap();
        assert_eq!(c, vec![19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_matmul_rectangular() {
        let b = backend();
        // [1,2,3] @ [1;1;1] = [6]
        let c = b.matmul(&[1.0, 2.0, 3.0], &[1.0, 1.0, 1.0], 1, 3, 1).unwrap();
        assert_eq!(c, vec![6.0]);
    }

    #[test]
    fn test_matmul_length_mismatch() {
        let b = backend();
        assert!(b.matmul(&[1.0, 2.0, 3.0], &[1.0, 2.0], 2, 2, 1).is_err());
        assert!(b.matmul(&[1.0, 2.0], &[1.0], 1, 2, 1).is_err());
    }
}
