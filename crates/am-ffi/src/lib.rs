//! C ABI for the device matrix multiplication engine.
//!
//! Matrices cross the boundary as flat row-major buffers. Results are
//! allocated here and must be returned with `am_matrix_free`.

mod context;
mod error;
mod types;

pub use context::*;
pub use error::*;
pub use types::*;

use std::ffi::CString;
use std::os::raw::c_char;
use std::panic::AssertUnwindSafe;

/// Execute a closure that returns an `AMStatus`, catching any panics
/// and converting them into `AMStatus::ErrorInternal`.
fn catch_panic<F: FnOnce() -> AMStatus>(f: F) -> AMStatus {
    // A panic inside the engine poisons its session lock; later calls on the
    // same context report `ErrorInternal`.
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(status) => status,
        Err(_) => {
            set_last_error("internal panic".to_string());
            AMStatus::ErrorInternal
        }
    }
}

/// Create a new multiplication context.
///
/// On success, writes a heap-allocated `AMContext` pointer into `*ctx_out`
/// and returns `AMStatus::Ok`. The device session is opened lazily by the
/// first multiplication. The caller must later call `am_context_destroy`.
#[no_mangle]
pub extern "C" fn am_context_create(
    backend: AMBackendType,
    ctx_out: *mut *mut AMContext,
) -> AMStatus {
    catch_panic(|| {
        if ctx_out.is_null() {
            set_last_error("ctx_out is null".to_string());
            return AMStatus::ErrorInvalidArgument;
        }
        match AMContext::new(backend) {
            Ok(ctx) => {
                unsafe {
                    *ctx_out = Box::into_raw(Box::new(ctx));
                }
                AMStatus::Ok
            }
            Err(e) => {
                set_last_error(e);
                AMStatus::ErrorInvalidArgument
            }
        }
    })
}

/// Destroy a context previously created by `am_context_create`, releasing
/// its device session.
///
/// Passing a null pointer is a no-op and returns `AMStatus::Ok`.
///
/// # Safety
/// `ctx` must be null or a pointer returned by `am_context_create` that has
/// not been destroyed yet.
#[no_mangle]
pub unsafe extern "C" fn am_context_destroy(ctx: *mut AMContext) -> AMStatus {
    if ctx.is_null() {
        return AMStatus::Ok;
    }
    drop(Box::from_raw(ctx));
    AMStatus::Ok
}

/// Multiply `a (a_rows x a_cols)` by `b (b_rows x b_cols)`.
///
/// On success, `*out` receives an owned `a_rows x b_cols` matrix. On failure
/// `*out` is left empty and `am_last_error` describes the problem.
///
/// # Safety
/// `ctx` must be a live context. `a` and `b` must point to at least
/// `a_rows * a_cols` and `b_rows * b_cols` readable elements respectively.
#[no_mangle]
pub unsafe extern "C" fn am_matrix_mult(
    ctx: *mut AMContext,
    a: *const AMReal,
    a_rows: usize,
    a_cols: usize,
    b: *const AMReal,
    b_rows: usize,
    b_cols: usize,
    out: *mut AMMatrix,
) -> AMStatus {
    catch_panic(|| {
        if ctx.is_null() || a.is_null() || b.is_null() || out.is_null() {
            set_last_error("null argument".to_string());
            return AMStatus::ErrorInvalidArgument;
        }
        unsafe { *out = AMMatrix::empty() };
        if a_cols != b_rows {
            set_last_error(format!(
                "cannot multiply {}x{} by {}x{}",
                a_rows, a_cols, b_rows, b_cols
            ));
            return AMStatus::ErrorDimensionMismatch;
        }
        let (a_len, b_len) = match (a_rows.checked_mul(a_cols), b_rows.checked_mul(b_cols)) {
            (Some(a_len), Some(b_len)) if a_len > 0 && b_len > 0 => (a_len, b_len),
            _ => {
                set_last_error(format!(
                    "invalid dimensions {}x{} and {}x{}",
                    a_rows, a_cols, b_rows, b_cols
                ));
                return AMStatus::ErrorInvalidArgument;
            }
        };

        let ctx = unsafe { &*ctx };
        let a = unsafe { std::slice::from_raw_parts(a, a_len) };
        let b = unsafe { std::slice::from_raw_parts(b, b_len) };

        match ctx.engine.matmul(a, b, a_rows, a_cols, b_cols) {
            Ok(data) => {
                let data = Box::into_raw(data.into_boxed_slice()) as *mut AMReal;
                unsafe {
                    *out = AMMatrix {
                        data,
                        rows: a_rows,
                        cols: b_cols,
                    };
                }
                AMStatus::Ok
            }
            Err(e) => {
                let status = matrix_status(&e);
                set_last_error(format!("{} multiply failed: {}", ctx.engine.name(), e));
                status
            }
        }
    })
}

/// Free a matrix produced by `am_matrix_mult` and reset it to empty.
///
/// # Safety
/// `matrix` must be null or point to an `AMMatrix` filled by `am_matrix_mult`.
#[no_mangle]
pub unsafe extern "C" fn am_matrix_free(matrix: *mut AMMatrix) {
    if matrix.is_null() {
        return;
    }
    let m = &mut *matrix;
    if !m.data.is_null() {
        let len = m.rows * m.cols;
        drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(m.data, len)));
    }
    *m = AMMatrix::empty();
}

/// Size in bytes of `AMReal` as compiled into this library.
#[no_mangle]
pub extern "C" fn am_real_size() -> usize {
    std::mem::size_of::<AMReal>()
}

/// Retrieve the last error message.
///
/// Returns a pointer to a C string describing the most recent error, or
/// null if no error has occurred. The caller must free the returned string
/// with `am_free_string`.
#[no_mangle]
pub extern "C" fn am_last_error() -> *const c_char {
    match error::take_last_error() {
        Some(e) => e.into_raw(),
        None => std::ptr::null(),
    }
}

/// Free a string previously returned by `am_last_error`.
///
/// # Safety
/// `s` must be null or a string returned by `am_last_error`.
#[no_mangle]
pub unsafe extern "C" fn am_free_string(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}
