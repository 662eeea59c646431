//! OpenCL runtime backed by the `opencl3` crate.
//!
//! Enabled with the `opencl` feature. Requires an OpenCL ICD loader at link
//! time and at least one installed platform at run time.

use std::ffi::c_void;
use std::fmt;
use std::ptr;

use am_matrix::Real;
use opencl3::command_queue::CommandQueue;
use opencl3::context::Context;
use opencl3::device::{Device, CL_DEVICE_TYPE_ALL};
use opencl3::kernel::Kernel;
use opencl3::error_codes::ClError;
use opencl3::memory::{Buffer, ClMem, CL_MEM_COPY_HOST_PTR, CL_MEM_READ_ONLY, CL_MEM_READ_WRITE};
use opencl3::platform::{get_platforms, Platform};
use opencl3::program::Program;
use opencl3::types::{cl_device_id, cl_int, CL_BLOCKING};
use tracing::debug;

use crate::device::DeviceDescriptor;
use crate::error::{DeviceError, Result};
use crate::kernel::KernelKind;
use crate::runtime::{ComputeRuntime, KernelArg, MemAccess};

/// Raw OpenCL device id.
#[derive(Debug, Clone, Copy)]
pub struct ClDevice(cl_device_id);

// Device ids are plain handles owned by the platform; the OpenCL API allows
// them to be used from any thread.
unsafe impl Send for ClDevice {}

/// Kernel plus the name it was created under, for error reporting.
pub struct ClKernel {
    kind: KernelKind,
    kernel: Kernel,
}

/// `ComputeRuntime` over the OpenCL platform at `platform_index`.
#[derive(Debug, Clone)]
pub struct OpenClRuntime {
    platform_index: usize,
}

impl OpenClRuntime {
    /// Uses the first platform reported by the ICD loader.
    pub fn new() -> Self {
        Self { platform_index: 0 }
    }

    pub fn with_platform(platform_index: usize) -> Self {
        Self { platform_index }
    }

    fn platform(&self) -> Result<Platform> {
        let platforms = get_platforms().map_err(|e| DeviceError::DeviceEnumeration(e.to_string()))?;
        platforms
            .into_iter()
            .nth(self.platform_index)
            .ok_or_else(|| {
                DeviceError::DeviceEnumeration(format!(
                    "no OpenCL platform at index {}",
                    self.platform_index
                ))
            })
    }
}

impl Default for OpenClRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ClKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClKernel").field("kind", &self.kind).finish()
    }
}

impl ComputeRuntime for OpenClRuntime {
    type Device = ClDevice;
    type Context = Context;
    type Program = Program;
    type Kernel = ClKernel;
    type Queue = CommandQueue;
    type Buffer = Buffer<Real>;

    fn name(&self) -> &str {
        "opencl"
    }

    fn devices(&self) -> Result<Vec<DeviceDescriptor<ClDevice>>> {
        let platform = self.platform()?;
        let platform_name = platform
            .name()
            .map_err(|e| DeviceError::DeviceEnumeration(e.to_string()))?;
        let ids = platform
            .get_devices(CL_DEVICE_TYPE_ALL)
            .map_err(|e| DeviceError::DeviceEnumeration(e.to_string()))?;

        let mut devices = Vec::with_capacity(ids.len());
        for id in ids {
            let device = Device::new(id);
            let query = |e: ClError| DeviceError::DeviceEnumeration(e.to_string());
            devices.push(DeviceDescriptor {
                handle: ClDevice(id),
                platform: platform_name.trim_end_matches('\0').to_string(),
                name: device.name().map_err(query)?.trim_end_matches('\0').to_string(),
                compute_units: device.max_compute_units().map_err(query)?,
                max_alloc_bytes: device.max_mem_alloc_size().map_err(query)?,
            });
        }
        Ok(devices)
    }

    fn create_context(&self, device: &ClDevice) -> Result<Context> {
        let handle = Device::new(device.0);
        Context::from_device(&handle).map_err(|e| DeviceError::ContextCreation {
            device: handle.name().unwrap_or_default(),
            reason: e.to_string(),
        })
    }

    fn build_program(&self, context: &Context, source: &str, options: &str) -> Result<Program> {
        debug!(options, "building OpenCL program");
        Program::create_and_build_from_source(context, source, options)
            .map_err(|log| DeviceError::ProgramBuild { log })
    }

    fn create_kernel(&self, program: &Program, kind: KernelKind) -> Result<ClKernel> {
        let kernel = Kernel::create(program, kind.name()).map_err(|e| DeviceError::KernelCreation {
            kernel: kind.name(),
            reason: e.to_string(),
        })?;
        Ok(ClKernel { kind, kernel })
    }

    fn create_queue(&self, context: &Context, _device: &ClDevice) -> Result<CommandQueue> {
        // Context::from_device binds a single device, which is the default
        // queue target.
        #[allow(deprecated)]
        CommandQueue::create_default(context, 0)
            .map_err(|e| DeviceError::QueueCreation(e.to_string()))
    }

    fn create_buffer(
        &self,
        context: &Context,
        access: MemAccess,
        len: usize,
        init: Option<&[Real]>,
    ) -> Result<Buffer<Real>> {
        let bytes = len * std::mem::size_of::<Real>();
        let mut flags = match access {
            MemAccess::ReadOnly => CL_MEM_READ_ONLY,
            MemAccess::ReadWrite => CL_MEM_READ_WRITE,
        };
        let host_ptr = match init {
            Some(data) => {
                if data.len() < len {
                    return Err(DeviceError::BufferAllocation {
                        bytes,
                        reason: format!("initial data holds {} of {} elements", data.len(), len),
                    });
                }
                flags |= CL_MEM_COPY_HOST_PTR;
                data.as_ptr() as *mut c_void
            }
            None => ptr::null_mut(),
        };
        // SAFETY: with COPY_HOST_PTR the driver copies `len` elements out of
        // `init`, which was checked to be long enough; otherwise no host
        // pointer is passed.
        unsafe { Buffer::<Real>::create(context, flags, len, host_ptr) }.map_err(|e| {
            DeviceError::BufferAllocation {
                bytes,
                reason: e.to_string(),
            }
        })
    }

    fn set_kernel_arg(
        &self,
        kernel: &mut ClKernel,
        index: u32,
        arg: KernelArg<'_, Buffer<Real>>,
    ) -> Result<()> {
        // SAFETY: argument types match the kernel signatures in PROGRAM_SOURCE:
        // buffers are `__global real*`, scalars are `int`.
        let result = match arg {
            KernelArg::Buffer(buffer) => unsafe { kernel.kernel.set_arg(index, &buffer.get()) },
            KernelArg::Int(value) => {
                let value: cl_int = value;
                unsafe { kernel.kernel.set_arg(index, &value) }
            }
        };
        result.map_err(|e| DeviceError::KernelArgument {
            kernel: kernel.kind.name(),
            index,
            reason: e.to_string(),
        })
    }

    fn enqueue_kernel(
        &self,
        queue: &CommandQueue,
        kernel: &ClKernel,
        global: &[usize],
    ) -> Result<()> {
        // SAFETY: `global` holds exactly `work_dim` extents and every argument
        // was bound before the launch.
        unsafe {
            queue.enqueue_nd_range_kernel(
                kernel.kernel.get(),
                global.len() as u32,
                ptr::null(),
                global.as_ptr(),
                ptr::null(),
                &[],
            )
        }
        .map(|_event| ())
        .map_err(|e| DeviceError::KernelEnqueue {
            kernel: kernel.kind.name(),
            reason: e.to_string(),
        })
    }

    fn finish(&self, queue: &CommandQueue) -> Result<()> {
        queue
            .flush()
            .and_then(|_| queue.finish())
            .map_err(|e| DeviceError::Synchronization(e.to_string()))
    }

    fn read_buffer(
        &self,
        queue: &CommandQueue,
        buffer: &Buffer<Real>,
        out: &mut [Real],
    ) -> Result<()> {
        // SAFETY: blocking read into a host slice that outlives the call.
        unsafe { queue.enqueue_read_buffer(buffer, CL_BLOCKING, 0, out, &[]) }
            .map(|_event| ())
            .map_err(|e| DeviceError::Readback(e.to_string()))
    }
}
