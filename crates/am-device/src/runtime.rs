use std::fmt::Debug;

use am_matrix::Real;

use crate::device::DeviceDescriptor;
use crate::error::Result;
use crate::kernel::KernelKind;

/// Access a kernel has to a device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemAccess {
    ReadOnly,
    ReadWrite,
}

/// A value bound to a kernel parameter.
#[derive(Debug)]
pub enum KernelArg<'a, B> {
    Buffer(&'a B),
    Int(i32),
}

// Derived impls would require `B: Copy`; only the reference is copied.
impl<B> Clone for KernelArg<'_, B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B> Copy for KernelArg<'_, B> {}

/// Trait for the device API underneath the multiplication pipeline
/// (an OpenCL driver, a host emulator, etc.).
///
/// Handles are owned Rust values: dropping one releases the device object
/// behind it. Every call reports failure as the `DeviceError` kind that
/// names the failing step.
pub trait ComputeRuntime: Send + Sync + Debug {
    type Device: Clone + Send + Debug;
    type Context: Send;
    type Program: Send;
    type Kernel: Send;
    type Queue: Send;
    type Buffer: Send;

    /// Returns the name of this runtime (e.g., "opencl", "emulated").
    fn name(&self) -> &str;

    /// Lists the devices of the runtime's platform, in enumeration order.
    fn devices(&self) -> Result<Vec<DeviceDescriptor<Self::Device>>>;

    /// Creates a context bound to a single device.
    fn create_context(&self, device: &Self::Device) -> Result<Self::Context>;

    /// Compiles program text with the given build options.
    ///
    /// Failures carry the compiler's build log.
    fn build_program(
        &self,
        context: &Self::Context,
        source: &str,
        options: &str,
    ) -> Result<Self::Program>;

    /// Creates a kernel object for one entry point of a built program.
    fn create_kernel(&self, program: &Self::Program, kind: KernelKind) -> Result<Self::Kernel>;

    /// Creates an in-order command queue on `device`.
    fn create_queue(&self, context: &Self::Context, device: &Self::Device) -> Result<Self::Queue>;

    /// Allocates a buffer of `len` elements, copying `init` into it when given.
    ///
    /// Without `init` the contents are unspecified.
    fn create_buffer(
        &self,
        context: &Self::Context,
        access: MemAccess,
        len: usize,
        init: Option<&[Real]>,
    ) -> Result<Self::Buffer>;

    /// Binds argument `index` of `kernel`.
    fn set_kernel_arg(
        &self,
        kernel: &mut Self::Kernel,
        index: u32,
        arg: KernelArg<'_, Self::Buffer>,
    ) -> Result<()>;

    /// Enqueues `kernel` over `global` work-items (one extent per dimension).
    fn enqueue_kernel(
        &self,
        queue: &Self::Queue,
        kernel: &Self::Kernel,
        global: &[usize],
    ) -> Result<()>;

    /// Flushes the queue and blocks until all enqueued work has completed.
    fn finish(&self, queue: &Self::Queue) -> Result<()>;

    /// Blocking read of the first `out.len()` elements of `buffer`.
    fn read_buffer(
        &self,
        queue: &Self::Queue,
        buffer: &Self::Buffer,
        out: &mut [Real],
    ) -> Result<()>;
}
