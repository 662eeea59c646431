use am_matrix::Precision;

/// Program text for the three multiplication kernels.
///
/// Compiled once per device session. `CONFIG_USE_DOUBLE` selects the element
/// width and must agree with the host's `Real`; see [`build_options`].
///
/// The product buffer is laid out as `layers` planes of `a_rows * b_cols`
/// elements; plane `k` holds `a[i][k] * b[k][j]` at `i * b_cols + j`.
pub const PROGRAM_SOURCE: &str = r#"
#if CONFIG_USE_DOUBLE
#if defined(cl_khr_fp64)
#pragma OPENCL EXTENSION cl_khr_fp64 : enable
#elif defined(cl_amd_fp64)
#pragma OPENCL EXTENSION cl_amd_fp64 : enable
#else
#error "double precision requested but the device has no fp64 extension"
#endif
typedef double real_t;
#else
typedef float real_t;
#endif

kernel void elementwise_multiply(global const real_t* a, global const real_t* b,
                                 global real_t* products, const int a_rows,
                                 const int a_cols, const int b_cols) {
  const size_t row = get_global_id(0);
  const size_t col = get_global_id(1);
  const size_t layer = get_global_id(2);
  const size_t plane = (size_t)a_rows * (size_t)b_cols;
  products[layer * plane + row * b_cols + col] =
      a[row * a_cols + layer] * b[layer * b_cols + col];
}

kernel void partial_reduce(global real_t* products, const int a_rows,
                           const int b_cols, const int layers) {
  const size_t row = get_global_id(0);
  const size_t col = get_global_id(1);
  const size_t layer = get_global_id(2);
  const size_t fold = layer + get_global_size(2);
  if (fold < (size_t)layers) {
    const size_t plane = (size_t)a_rows * (size_t)b_cols;
    const size_t cell = row * b_cols + col;
    products[layer * plane + cell] += products[fold * plane + cell];
  }
}

kernel void final_reduce(global real_t* products, const int a_rows,
                         const int b_cols, const int live_layers) {
  const size_t row = get_global_id(0);
  const size_t col = get_global_id(1);
  const size_t plane = (size_t)a_rows * (size_t)b_cols;
  const size_t cell = row * b_cols + col;
  real_t sum = 0;
  for (int i = 0; i < live_layers; i++)
    sum += products[(size_t)i * plane + cell];
  products[cell] = sum;
}
"#;

/// Name of the preprocessor symbol that selects the element width.
pub const PRECISION_DEFINE: &str = "CONFIG_USE_DOUBLE";

/// Returns the build options for compiling [`PROGRAM_SOURCE`] at `precision`.
pub fn build_options(precision: Precision) -> String {
    format!("-D {}={}", PRECISION_DEFINE, u8::from(precision.is_double()))
}

/// The three kernels of the multiplication pipeline, in launch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelKind {
    /// One work-item per (row, col, layer):
    /// `products[layer][row][col] = a[row][layer] * b[layer][col]`.
    ElementwiseMultiply,
    /// Folds layer `layer + n` into `layer`, halving the live layers.
    PartialReduce,
    /// Sums the remaining live layers into layer 0.
    FinalReduce,
}

/// Kind of a kernel parameter, used to check argument binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Buffer,
    Int,
}

impl KernelKind {
    /// All kernels, in pipeline order.
    pub const ALL: [KernelKind; 3] = [
        KernelKind::ElementwiseMultiply,
        KernelKind::PartialReduce,
        KernelKind::FinalReduce,
    ];

    /// Entry point name inside [`PROGRAM_SOURCE`].
    pub fn name(&self) -> &'static str {
        match self {
            KernelKind::ElementwiseMultiply => "elementwise_multiply",
            KernelKind::PartialReduce => "partial_reduce",
            KernelKind::FinalReduce => "final_reduce",
        }
    }

    /// Parameter list, by index.
    pub fn params(&self) -> &'static [ParamKind] {
        use ParamKind::{Buffer, Int};
        match self {
            KernelKind::ElementwiseMultiply => &[Buffer, Buffer, Buffer, Int, Int, Int],
            KernelKind::PartialReduce | KernelKind::FinalReduce => &[Buffer, Int, Int, Int],
        }
    }

    /// Number of launch-grid dimensions.
    pub fn work_dim(&self) -> usize {
        match self {
            KernelKind::ElementwiseMultiply | KernelKind::PartialReduce => 3,
            KernelKind::FinalReduce => 2,
        }
    }

    /// Looks a kernel up by its entry point name.
    pub fn from_name(name: &str) -> Option<KernelKind> {
        KernelKind::ALL.into_iter().find(|k| k.name() == name)
    }
}

/// Lists the `kernel void <name>(` entry points declared in `source`.
pub fn declared_kernels(source: &str) -> Vec<&str> {
    source
        .split("kernel void ")
        .skip(1)
        .filter_map(|rest| rest.split('(').next())
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .collect()
}
