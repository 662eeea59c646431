/// Status codes returned by all FFI functions.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AMStatus {
    Ok = 0,
    ErrorInvalidArgument = 1,
    ErrorDimensionMismatch = 2,
    ErrorDevice = 3,
    ErrorOutOfMemory = 4,
    ErrorInternal = 5,
}

/// Compute runtime selector.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AMBackendType {
    /// Host emulation of the device kernels.
    Emulated = 0,
    /// OpenCL device; only available when built with the `opencl` feature.
    OpenCl = 1,
}

/// Element type of every matrix crossing the boundary.
#[cfg(not(feature = "f64"))]
pub type AMReal = f32;
#[cfg(feature = "f64")]
pub type AMReal = f64;

/// Row-major matrix owned by the library until passed to `am_matrix_free`.
#[repr(C)]
#[derive(Debug)]
pub struct AMMatrix {
    pub data: *mut AMReal,
    pub rows: usize,
    pub cols: usize,
}

impl AMMatrix {
    pub const fn empty() -> Self {
        Self {
            data: std::ptr::null_mut(),
            rows: 0,
            cols: 0,
        }
    }
}
