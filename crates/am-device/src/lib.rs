//! `am-device` - Dense matrix multiplication offloaded to a compute device.
//!
//! This crate provides:
//! - The three-kernel program (`elementwise_multiply`, `partial_reduce`,
//!   `final_reduce`) and its build options
//! - Device enumeration and selection by compute-unit count
//! - An `ExecutionPlan` deriving launch grids and reduction rounds from shapes
//! - A `ComputeRuntime` trait over the device API, with a host-emulated runtime
//!   and an OpenCL runtime (`opencl` feature)
//! - `MatmulEngine`, which owns the device session and runs the pipeline

pub mod config;
pub mod device;
pub mod emulated;
pub mod engine;
pub mod error;
pub mod kernel;
#[cfg(feature = "opencl")]
pub mod opencl;
mod pipeline;
pub mod plan;
pub mod runtime;
pub mod session;

// Re-export primary types at the crate root for convenience.
pub use config::{EngineConfig, SessionPolicy};
pub use device::{select_device, DeviceDescriptor};
pub use emulated::EmulatedRuntime;
pub use engine::MatmulEngine;
pub use error::{DeviceError, Result};
pub use kernel::KernelKind;
#[cfg(feature = "opencl")]
pub use opencl::OpenClRuntime;
pub use plan::{ExecutionPlan, DEFAULT_CUTOFF};
pub use runtime::{ComputeRuntime, KernelArg, MemAccess};
pub use session::DeviceSession;
