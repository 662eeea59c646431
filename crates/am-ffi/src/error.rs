use std::cell::RefCell;
use std::ffi::CString;

use am_device::DeviceError;
use am_matrix::MatrixError;

use crate::types::AMStatus;

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Store an error message for later retrieval via `am_last_error`.
pub fn set_last_error(msg: String) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

/// Take the last error message, leaving `None` in its place.
pub fn take_last_error() -> Option<CString> {
    LAST_ERROR.with(|e| e.borrow_mut().take())
}

/// Maps a device error onto the status code a C caller sees.
pub fn device_status(err: &DeviceError) -> AMStatus {
    match err {
        DeviceError::DimensionMismatch { .. } => AMStatus::ErrorDimensionMismatch,
        DeviceError::BufferAllocation { .. } => AMStatus::ErrorOutOfMemory,
        DeviceError::DimensionOverflow(_) | DeviceError::InvalidConfig(_) => {
            AMStatus::ErrorInvalidArgument
        }
        DeviceError::SessionPoisoned => AMStatus::ErrorInternal,
        DeviceError::Matrix(inner) => matrix_status(inner),
        _ => AMStatus::ErrorDevice,
    }
}

/// Maps a matrix error, looking through boxed device failures.
pub fn matrix_status(err: &MatrixError) -> AMStatus {
    match err {
        MatrixError::MatmulMismatch { .. } => AMStatus::ErrorDimensionMismatch,
        MatrixError::EmptyDimension { .. } | MatrixError::ShapeMismatch { .. } => {
            AMStatus::ErrorInvalidArgument
        }
        MatrixError::Backend(inner) => match inner.downcast_ref::<DeviceError>() {
            Some(device) => device_status(device),
            None => AMStatus::ErrorDevice,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_error_taken_once() {
        set_last_error("boom".to_string());
        assert_eq!(take_last_error().unwrap().to_str().unwrap(), "boom");
        assert!(take_last_error().is_none());
    }

    #[test]
    fn test_status_through_backend_box() {
        let err = MatrixError::Backend(Box::new(DeviceError::BufferAllocation {
            bytes: 8,
            reason: "full".to_string(),
        }));
        assert_eq!(matrix_status(&err), AMStatus::ErrorOutOfMemory);

        let err = MatrixError::Backend(Box::new(DeviceError::ProgramBuild {
            log: "error".to_string(),
        }));
        assert_eq!(matrix_status(&err), AMStatus::ErrorDevice);
    }

    #[test]
    fn test_status_mismatch() {
        let err = DeviceError::DimensionMismatch { m: 2, k: 3, k2: 4, n: 5 };
        assert_eq!(device_status(&err), AMStatus::ErrorDimensionMismatch);
    }
}
