use crate::error::{DeviceError, Result};

/// Default reduction cutoff: the tree reduction stops once at most
/// `2^(cutoff - 1)` layers are live, and the final kernel sums the rest.
pub const DEFAULT_CUTOFF: u32 = 8;

/// Launch grids for one multiplication of an `[rows x layers] @ [layers x cols]`
/// product.
///
/// The tree reduction runs `reduction_rounds` times. Round `s` (from 1) uses a
/// third grid extent of `2^(log_layers - s)` and folds layer `layer + n` into
/// `layer` whenever `layer + n < layers`. Whatever layers are still live after
/// the last round are summed sequentially by the final kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionPlan {
    rows: usize,
    layers: usize,
    cols: usize,
    log_layers: u32,
    cutoff: u32,
    reduction_rounds: i32,
}

impl ExecutionPlan {
    /// Plans the pipeline for `a: [rows x layers]`, `b: [layers x cols]`.
    ///
    /// `cutoff` must be at least 1; `EngineConfig::validate` enforces this.
    pub fn new(rows: usize, layers: usize, cols: usize, cutoff: u32) -> Self {
        let log_layers = ceil_log2(layers);
        let reduction_rounds = log_layers as i32 - (cutoff as i32 - 1);
        ExecutionPlan {
            rows,
            layers,
            cols,
            log_layers,
            cutoff,
            reduction_rounds,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// The shared dimension `k`: one product layer per value.
    pub fn layers(&self) -> usize {
        self.layers
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// `ceil(log2(layers))`.
    pub fn log_layers(&self) -> u32 {
        self.log_layers
    }

    pub fn cutoff(&self) -> u32 {
        self.cutoff
    }

    /// `log_layers - (cutoff - 1)`; zero or negative means no tree rounds.
    pub fn reduction_rounds(&self) -> i32 {
        self.reduction_rounds
    }

    /// Number of tree-reduction launches actually enqueued.
    pub fn rounds_to_run(&self) -> u32 {
        self.reduction_rounds.max(0) as u32
    }

    /// Grid of the elementwise multiply kernel.
    pub fn multiply_grid(&self) -> [usize; 3] {
        [self.rows, self.cols, self.layers]
    }

    /// Grids of the tree-reduction rounds, in launch order.
    pub fn reduction_grids(&self) -> impl Iterator<Item = [usize; 3]> + '_ {
        (1..=self.rounds_to_run()).map(move |s| {
            [self.rows, self.cols, 1usize << (self.log_layers - s)]
        })
    }

    /// Grid of the final sequential-sum kernel.
    pub fn final_grid(&self) -> [usize; 2] {
        [self.rows, self.cols]
    }

    /// Layers still holding partial sums when the final kernel runs.
    ///
    /// Never more than `layers`, so the final kernel only reads layers the
    /// multiply kernel wrote.
    pub fn live_layers(&self) -> usize {
        let live = match self.rounds_to_run() {
            0 => self.layers,
            rounds => 1usize << (self.log_layers - rounds),
        };
        live.min(self.layers)
    }

    /// Elements in the intermediate product buffer, or `DimensionOverflow`
    /// if the count does not fit in `usize`.
    pub fn working_len(&self) -> Result<usize> {
        self.rows
            .checked_mul(self.cols)
            .and_then(|plane| plane.checked_mul(self.layers))
            .ok_or(DeviceError::DimensionOverflow(self.layers))
    }

    /// Elements in the result.
    pub fn output_len(&self) -> usize {
        self.rows * self.cols
    }
}

/// `ceil(log2(n))`, with `ceil_log2(0) == ceil_log2(1) == 0`.
pub fn ceil_log2(n: usize) -> u32 {
    if n <= 1 {
        0
    } else {
        usize::BITS - (n - 1).leading_zeros()
    }
}
