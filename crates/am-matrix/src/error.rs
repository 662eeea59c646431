use thiserror::Error;

#[derive(Error, Debug)]
pub enum MatrixError {
    #[error("matrix dimensions must be at least 1x1, got {rows}x{cols}")]
    EmptyDimension { rows: usize, cols: usize },
    #[error("data length {got} does not match a {rows}x{cols} matrix")]
    ShapeMismatch { rows: usize, cols: usize, got: usize },
    #[error("matmul dimension mismatch: [{m}x{k}] @ [{k2}x{n}]")]
    MatmulMismatch {
        m: usize,
        k: usize,
        k2: usize,
        n: usize,
    },
    #[error("backend failure: {0}")]
    Backend(Box<dyn std::error::Error + Send + Sync>),
}

pub type Result<T> = std::result::Result<T, MatrixError>;
