// Host implementations of the three program kernels.
//
// Each function reproduces what one launch computes on a device, including
// the fold guard, and rejects launches that would touch memory outside the
// bound buffers instead of reading it.

use am_matrix::Real;
use rayon::prelude::*;

/// Scalar shape arguments shared by every kernel.
#[derive(Debug, Clone, Copy)]
pub(super) struct PlaneShape {
    pub a_rows: usize,
    pub b_cols: usize,
}

impl PlaneShape {
    fn plane(&self) -> usize {
        self.a_rows * self.b_cols
    }

    /// Rows and columns of the grid must stay inside one product plane so
    /// layers can be processed independently.
    fn check_grid(&self, rows: usize, cols: usize) -> Result<(), String> {
        if rows > self.a_rows || cols > self.b_cols {
            return Err(format!(
                "grid {}x{} exceeds the {}x{} product plane",
                rows, cols, self.a_rows, self.b_cols
            ));
        }
        Ok(())
    }
}

fn check_reach(what: &str, needed: usize, len: usize) -> Result<(), String> {
    if needed > len {
        return Err(format!(
            "out-of-range access to {}: needs {} elements, buffer holds {}",
            what, needed, len
        ));
    }
    Ok(())
}

/// `products[layer][row][col] = a[row][layer] * b[layer][col]`.
pub(super) fn elementwise_multiply(
    a: &[Real],
    b: &[Real],
    products: &mut [Real],
    shape: PlaneShape,
    a_cols: usize,
    grid: [usize; 3],
) -> Result<(), String> {
    let [rows, cols, layers] = grid;
    shape.check_grid(rows, cols)?;
    let plane = shape.plane();
    let b_cols = shape.b_cols;
    check_reach("a", (rows - 1) * a_cols + layers, a.len())?;
    check_reach("b", (layers - 1) * b_cols + cols, b.len())?;
    check_reach("products", layers * plane, products.len())?;

    products[..layers * plane]
        .par_chunks_mut(plane)
        .enumerate()
        .for_each(|(layer, out)| {
            for row in 0..rows {
                let a_val = a[row * a_cols + layer];
                for col in 0..cols {
                    out[row * b_cols + col] = a_val * b[layer * b_cols + col];
                }
            }
        });
    Ok(())
}

/// Folds layer `layer + n` into `layer` for every `layer < n` with
/// `layer + n < layers`, where `n` is the grid's third extent.
pub(super) fn partial_reduce(
    products: &mut [Real],
    shape: PlaneShape,
    layers: usize,
    grid: [usize; 3],
) -> Result<(), String> {
    let [rows, cols, n] = grid;
    shape.check_grid(rows, cols)?;
    let plane = shape.plane();
    let b_cols = shape.b_cols;
    check_reach("products", n * plane, products.len())?;
    check_reach("products", layers.min(2 * n) * plane, products.len())?;

    let (lower, upper) = products.split_at_mut(n * plane);
    let upper: &[Real] = upper;
    lower
        .par_chunks_mut(plane)
        .enumerate()
        .for_each(|(layer, dst)| {
            if layer + n < layers {
                let src = &upper[layer * plane..(layer + 1) * plane];
                for row in 0..rows {
                    for col in 0..cols {
                        let cell = row * b_cols + col;
                        dst[cell] += src[cell];
                    }
                }
            }
        });
    Ok(())
}

/// Sums the first `live_layers` layers of every cell into layer 0.
pub(super) fn final_reduce(
    products: &mut [Real],
    shape: PlaneShape,
    live_layers: usize,
    grid: [usize; 2],
) -> Result<(), String> {
    let [rows, cols] = grid;
    shape.check_grid(rows, cols)?;
    let plane = shape.plane();
    check_reach("products", live_layers.max(1) * plane, products.len())?;

    for row in 0..rows {
        for col in 0..cols {
            let cell = row * shape.b_cols + col;
            let mut sum = 0.0 as Real;
            for layer in 0..live_layers {
                sum += products[layer * plane + cell];
            }
            products[cell] = sum;
        }
    }
    Ok(())
}
