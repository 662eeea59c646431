use std::fmt;

use crate::backend::ComputeBackend;
use crate::error::{MatrixError, Result};
use crate::precision::Real;

/// A dense, row-major matrix that owns its buffer.
///
/// Both dimensions are at least 1 and `data.len() == rows * cols`; every
/// constructor checks this, so a `Matrix` value is always well formed.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<Real>,
}

impl Matrix {
    /// Create a matrix from row-major data.
    ///
    /// # Errors
    /// Returns an error if either dimension is zero or `data.len() != rows * cols`.
    pub fn new(rows: usize, cols: usize, data: Vec<Real>) -> Result<Self> {
        if rows == 0 || cols == 0 {
            return Err(MatrixError::EmptyDimension { rows, cols });
        }
        if rows.checked_mul(cols) != Some(data.len()) {
            return Err(MatrixError::ShapeMismatch {
                rows,
                cols,
                got: data.len(),
            });
        }
        Ok(Matrix { rows, cols, data })
    }

    /// Create a zero-filled matrix.
    pub fn zeros(rows: usize, cols: usize) -> Result<Self> {
        Self::new(rows, cols, vec![0.0; rows.saturating_mul(cols)])
    }

    /// Create a square identity matrix.
    pub fn identity(n: usize) -> Result<Self> {
        Self::from_fn(n, n, |i, j| if i == j { 1.0 } else { 0.0 })
    }

    /// Create a matrix whose element (i, j) is `f(i, j)`.
    pub fn from_fn<F>(rows: usize, cols: usize, mut f: F) -> Result<Self>
    where
        F: FnMut(usize, usize) -> Real,
    {
        let mut data = Vec::with_capacity(rows.saturating_mul(cols));
        for i in 0..rows {
            for j in 0..cols {
                data.push(f(i, j));
            }
        }
        Self::new(rows, cols, data)
    }

    /// Create a matrix from a list of rows, which must all have the same length.
    pub fn from_rows<R: AsRef<[Real]>>(rows: &[R]) -> Result<Self> {
        let n_rows = rows.len();
        let n_cols = rows.first().map(|r| r.as_ref().len()).unwrap_or(0);
        let mut data = Vec::with_capacity(n_rows * n_cols);
        for row in rows {
            let row = row.as_ref();
            if row.len() != n_cols {
                return Err(MatrixError::ShapeMismatch {
                    rows: n_rows,
                    cols: n_cols,
                    got: data.len() + row.len(),
                });
            }
            data.extend_from_slice(row);
        }
        Self::new(n_rows, n_cols, data)
    }

    /// Create a matrix from column-major data, as handed over by numeric
    /// libraries that store matrices by column.
    pub fn from_column_major(rows: usize, cols: usize, data: &[Real]) -> Result<Self> {
        if rows.checked_mul(cols) != Some(data.len()) {
            return Err(MatrixError::ShapeMismatch {
                rows,
                cols,
                got: data.len(),
            });
        }
        Self::from_fn(rows, cols, |i, j| data[j * rows + i])
    }

    /// Returns the elements in column-major order.
    pub fn to_column_major(&self) -> Vec<Real> {
        let mut out = Vec::with_capacity(self.data.len());
        for j in 0..self.cols {
            for i in 0..self.rows {
                out.push(self.data[i * self.cols + j]);
            }
        }
        out
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Returns (rows, cols).
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Returns element (i, j), or `None` when out of range.
    pub fn get(&self, i: usize, j: usize) -> Option<Real> {
        if i < self.rows && j < self.cols {
            Some(self.data[i * self.cols + j])
        } else {
            None
        }
    }

    /// Returns the row-major data.
    pub fn data(&self) -> &[Real] {
        &self.data
    }

    /// Consumes the matrix, returning its buffer.
    pub fn into_data(self) -> Vec<Real> {
        self.data
    }

    /// Consumes the matrix, returning (data, rows, cols).
    pub fn into_parts(self) -> (Vec<Real>, usize, usize) {
        (self.data, self.rows, self.cols)
    }

    /// Largest absolute elementwise difference, or `None` if the shapes differ.
    pub fn max_abs_diff(&self, other: &Matrix) -> Option<Real> {
        if self.shape() != other.shape() {
            return None;
        }
        Some(
            self.data
                .iter()
                .zip(other.data.iter())
                .map(|(x, y)| (x - y).abs())
                .fold(0.0, Real::max),
        )
    }

    /// Matrix multiplication using the given backend.
    ///
    /// self is [m, k], other is [k, n], result is [m, n].
    pub fn matmul(&self, other: &Matrix, backend: &dyn ComputeBackend) -> Result<Matrix> {
        let (m, k) = self.shape();
        let (k2, n) = other.shape();
        if k != k2 {
            return Err(MatrixError::MatmulMismatch { m, k, k2, n });
        }

        let result = backend.matmul(&self.data, &other.data, m, k, n)?;
        Matrix::new(m, n, result)
    }
}

impl fmt::Display for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, row) in self.data.chunks(self.cols).enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "[")?;
            for (j, v) in row.iter().enumerate() {
                if j > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", v)?;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::CpuBackend;

    #[test]
    fn test_new_matrix() {
        let m = Matrix::new(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(m.shape(), (2, 3));
        assert_eq!(m.get(1, 0), Some(4.0));
        assert_eq!(m.get(2, 0), None);
    }

    #[test]
    fn test_new_rejects_bad_shapes() {
        assert!(matches!(
            Matrix::new(0, 3, vec![]),
            Err(MatrixError::EmptyDimension { .. })
        ));
        assert!(matches!(
            Matrix::new(2, 2, vec![1.0; 3]),
            Err(MatrixError::ShapeMismatch { got: 3, .. })
        ));
    }

    #[test]
    fn test_from_rows() {
        let m = Matrix::from_rows(&[[1.0, 2.0], [3.0, 4.0]]).unwrap();
        assert_eq!(m.data(), &[1.0, 2.0, 3.0, 4.0]);

        let ragged: Vec<Vec<Real>> = vec![vec![1.0, 2.0], vec![3.0]];
        assert!(Matrix::from_rows(&ragged).is_err());
    }

    #[test]
    fn test_column_major_conversion() {
        // [[1,2,3],[4,5,6]] stored by column
        let m = Matrix::from_column_major(2, 3, &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]).unwrap();
        assert_eq!(m.data(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(m.to_column_major(), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_identity() {
        let i = Matrix::identity(3).unwrap();
        assert_eq!(i.get(1, 1), Some(1.0));
        assert_eq!(i.get(0, 2), Some(0.0));
    }

    #[test]
    fn test_matmul() {
        let backend = CpuBackend::new();
        let a = Matrix::from_rows(&[[1.0, 2.0], [3.0, 4.0]]).unwrap();
        let b = Matrix::from_rows(&[[5.0, 6.0], [7.0, 8.0]]).unwrap();
        let c = a.matmul(&b, &backend).unwrap();
        assert_eq!(c.shape(), (2, 2));
        assert_eq!(c.data(), &[19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_matmul_dimension_mismatch() {
        let backend = CpuBackend::new();
        let a = Matrix::zeros(2, 3).unwrap();
        let b = Matrix::zeros(4, 5).unwrap();
        assert!(matches!(
            a.matmul(&b, &backend),
            Err(MatrixError::MatmulMismatch { m: 2, k: 3, k2: 4, n: 5 })
        ));
    }

    #[test]
    fn test_max_abs_diff() {
        let a = Matrix::from_rows(&[[1.0, 2.0]]).unwrap();
        let b = Matrix::from_rows(&[[1.5, 2.0]]).unwrap();
        assert_eq!(a.max_abs_diff(&b), Some(0.5));
        assert_eq!(a.max_abs_diff(&Matrix::zeros(2, 1).unwrap()), None);
    }

    #[test]
    fn test_matmul_fractional() {
        use approx::assert_relative_eq;

        let a = Matrix::from_rows(&[[0.1, 0.2, 0.3]]).unwrap();
        let b = Matrix::from_rows(&[[0.5], [0.25], [0.125]]).unwrap();
        let c = a.matmul(&b, &CpuBackend::new()).unwrap();
        assert_eq!(c.shape(), (1, 1));
        assert_relative_eq!(c.data()[0], 0.1375, max_relative = 1e-6);
    }

    #[test]
    fn test_into_parts() {
        let (data, rows, cols) = Matrix::identity(2).unwrap().into_parts();
        assert_eq!((rows, cols), (2, 2));
        assert_eq!(data, vec![1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_display() {
        let m = Matrix::from_rows(&[[1.0, 2.0], [3.0, 4.0]]).unwrap();
        assert_eq!(m.to_string(), "[1, 2]\n[3, 4]");
    }
}
