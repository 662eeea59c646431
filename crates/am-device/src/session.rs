use am_matrix::Precision;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::device::{select_device, DeviceDescriptor};
use crate::error::{DeviceError, Result};
use crate::kernel::{build_options, KernelKind, PROGRAM_SOURCE};
use crate::runtime::ComputeRuntime;

/// The three compiled kernels of the pipeline.
pub struct KernelSet<K> {
    pub multiply: K,
    pub partial_reduce: K,
    pub final_reduce: K,
}

/// Everything compiled for one device: context, program, kernels and queue.
///
/// Dropping the session releases the kernels, then the queue, the program and
/// finally the context (fields drop in declaration order).
pub struct DeviceSession<R: ComputeRuntime> {
    pub(crate) kernels: KernelSet<R::Kernel>,
    pub(crate) queue: R::Queue,
    // Never read; held so the program outlives its kernels.
    _program: R::Program,
    pub(crate) context: R::Context,
    pub(crate) device: DeviceDescriptor<R::Device>,
}

impl<R: ComputeRuntime> DeviceSession<R> {
    /// Selects a device and compiles the multiplication program for it.
    ///
    /// Any failure aborts with the error of the step that failed; handles
    /// created before it are dropped on the way out.
    pub fn open(runtime: &R, config: &EngineConfig) -> Result<Self> {
        let devices = runtime.devices()?;
        for (i, d) in devices.iter().enumerate() {
            debug!(
                index = i,
                name = %d.name,
                compute_units = d.compute_units,
                max_alloc_bytes = d.max_alloc_bytes,
                "found compute device"
            );
        }

        let index = select_device(&devices, config.device_filter.as_deref()).ok_or_else(|| {
            DeviceError::NoDevice {
                filter: config.device_filter.clone(),
            }
        })?;
        let device = devices.into_iter().nth(index).ok_or(DeviceError::NoDevice {
            filter: config.device_filter.clone(),
        })?;
        info!(
            runtime = runtime.name(),
            platform = %device.platform,
            device = %device.name,
            compute_units = device.compute_units,
            "selected compute device"
        );

        let context = runtime.create_context(&device.handle)?;
        let options = build_options(Precision::HOST);
        let program = runtime.build_program(&context, PROGRAM_SOURCE, &options)?;
        let kernels = KernelSet {
            multiply: runtime.create_kernel(&program, KernelKind::ElementwiseMultiply)?,
            partial_reduce: runtime.create_kernel(&program, KernelKind::PartialReduce)?,
            final_reduce: runtime.create_kernel(&program, KernelKind::FinalReduce)?,
        };
        let queue = runtime.create_queue(&context, &device.handle)?;
        debug!(options = %options, "device program built");

        Ok(DeviceSession {
            kernels,
            queue,
            _program: program,
            context,
            device,
        })
    }

    /// The device this session was compiled for.
    pub fn device(&self) -> &DeviceDescriptor<R::Device> {
        &self.device
    }
}
