//! Host-emulated compute device.
//!
//! `EmulatedRuntime` implements `ComputeRuntime` without any driver: programs
//! are "built" by checking the precision define and the declared entry points,
//! and kernel launches run on the host over the same grids a device would use.
//! Fresh buffers are filled with NaN so reads of unwritten layers show up in
//! results, and launches that would access memory outside their buffers fail.
//!
//! The runtime also lists configurable devices, can inject a failure at any
//! device step, and counts live objects and launches for inspection.

mod kernels;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use am_matrix::{Precision, Real};

use crate::device::DeviceDescriptor;
use crate::error::{DeviceError, Result};
use crate::kernel::{declared_kernels, KernelKind, ParamKind, PRECISION_DEFINE};
use crate::runtime::{ComputeRuntime, KernelArg, MemAccess};

use kernels::PlaneShape;

/// Default per-buffer allocation limit of an emulated device (1 GiB).
pub const DEFAULT_MAX_ALLOC_BYTES: u64 = 1 << 30;

/// A device the emulated platform reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmulatedDevice {
    pub name: String,
    pub compute_units: u32,
    pub max_alloc_bytes: u64,
}

impl EmulatedDevice {
    pub fn new(name: impl Into<String>, compute_units: u32) -> Self {
        Self {
            name: name.into(),
            compute_units,
            max_alloc_bytes: DEFAULT_MAX_ALLOC_BYTES,
        }
    }

    /// Builder-style allocation limit.
    pub fn with_max_alloc_bytes(mut self, bytes: u64) -> Self {
        self.max_alloc_bytes = bytes;
        self
    }
}

/// A device step at which the runtime can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Enumerate,
    Context,
    Build,
    CreateKernel(KernelKind),
    Queue,
    Allocate,
    BindArg,
    Enqueue(KernelKind),
    Finish,
    Read,
}

/// One recorded kernel launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launch {
    pub kernel: KernelKind,
    pub grid: Vec<usize>,
}

/// Counters shared by a runtime and every object it creates.
#[derive(Debug, Default)]
pub struct DeviceStats {
    live_contexts: AtomicUsize,
    live_buffers: AtomicUsize,
    buffers_allocated: AtomicUsize,
    programs_built: AtomicUsize,
    launches: Mutex<Vec<Launch>>,
}

impl DeviceStats {
    /// Contexts created and not yet dropped.
    pub fn live_contexts(&self) -> usize {
        self.live_contexts.load(Ordering::SeqCst)
    }

    /// Buffers created and not yet dropped.
    pub fn live_buffers(&self) -> usize {
        self.live_buffers.load(Ordering::SeqCst)
    }

    /// Buffers ever created.
    pub fn buffers_allocated(&self) -> usize {
        self.buffers_allocated.load(Ordering::SeqCst)
    }

    /// Successful program builds.
    pub fn programs_built(&self) -> usize {
        self.programs_built.load(Ordering::SeqCst)
    }

    /// Every launch so far, in submission order.
    pub fn launches(&self) -> Vec<Launch> {
        self.launches.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// Forgets recorded launches.
    pub fn clear_launches(&self) {
        if let Ok(mut l) = self.launches.lock() {
            l.clear();
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    stats: DeviceStats,
    fault: Mutex<Option<Fault>>,
}

/// Host-emulated `ComputeRuntime`.
///
/// Clones share devices, counters and the injected fault, so a test can keep
/// a handle while an engine owns another.
#[derive(Debug, Clone)]
pub struct EmulatedRuntime {
    platform: String,
    devices: Vec<EmulatedDevice>,
    shared: Arc<Shared>,
}

impl EmulatedRuntime {
    /// A platform with one device that has a compute unit per host thread.
    pub fn new() -> Self {
        let units = std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(1);
        Self::with_devices(vec![EmulatedDevice::new("host emulator", units)])
    }

    /// A platform reporting exactly `devices`, in this order.
    pub fn with_devices(devices: Vec<EmulatedDevice>) -> Self {
        Self {
            platform: "async-math emulation".to_string(),
            devices,
            shared: Arc::new(Shared::default()),
        }
    }

    /// Makes the next calls of `fault`'s step fail until cleared.
    pub fn inject_fault(&self, fault: Fault) {
        if let Ok(mut f) = self.shared.fault.lock() {
            *f = Some(fault);
        }
    }

    /// Removes any injected fault.
    pub fn clear_fault(&self) {
        if let Ok(mut f) = self.shared.fault.lock() {
            *f = None;
        }
    }

    /// Counters for this runtime and its clones.
    pub fn stats(&self) -> &DeviceStats {
        &self.shared.stats
    }

    fn faulted(&self, step: Fault) -> bool {
        self.shared
            .fault
            .lock()
            .map(|f| *f == Some(step))
            .unwrap_or(false)
    }
}

impl Default for EmulatedRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Context handle; counts as live until dropped.
pub struct EmulatedContext {
    max_alloc_bytes: u64,
    shared: Arc<Shared>,
}

impl Drop for EmulatedContext {
    fn drop(&mut self) {
        self.shared.stats.live_contexts.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A built program: its entry points and element width.
#[derive(Debug, Clone)]
pub struct EmulatedProgram {
    kernels: Vec<KernelKind>,
    precision: Precision,
}

impl EmulatedProgram {
    pub fn precision(&self) -> Precision {
        self.precision
    }
}

#[derive(Debug, Clone)]
enum BoundArg {
    Buffer(Weak<BufferStore>),
    Int(i32),
}

/// A kernel object with its bound arguments.
#[derive(Debug)]
pub struct EmulatedKernel {
    kind: KernelKind,
    args: Vec<Option<BoundArg>>,
}

/// In-order queue. Commands complete as they are submitted, which keeps
/// submission order and makes `finish` a barrier with nothing left to wait on.
#[derive(Debug)]
pub struct EmulatedQueue;

#[derive(Debug)]
struct BufferStore {
    access: MemAccess,
    data: RwLock<Vec<Real>>,
    shared: Arc<Shared>,
}

impl Drop for BufferStore {
    fn drop(&mut self) {
        self.shared.stats.live_buffers.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Buffer handle. Kernels hold only weak references, so dropping the handle
/// frees the memory.
#[derive(Debug)]
pub struct EmulatedBuffer {
    store: Arc<BufferStore>,
}

/// Reads the value given to `-D NAME=value` (or `-DNAME=value`) in `options`.
fn define_value<'a>(options: &'a str, name: &str) -> Option<&'a str> {
    let mut tokens = options.split_whitespace();
    while let Some(token) = tokens.next() {
        let define = match token {
            "-D" => tokens.next()?,
            t => match t.strip_prefix("-D") {
                Some(rest) => rest,
                None => continue,
            },
        };
        match define.split_once('=') {
            Some((key, value)) if key == name => return Some(value),
            None if define == name => return Some("1"),
            _ => {}
        }
    }
    None
}

impl ComputeRuntime for EmulatedRuntime {
    type Device = usize;
    type Context = EmulatedContext;
    type Program = EmulatedProgram;
    type Kernel = EmulatedKernel;
    type Queue = EmulatedQueue;
    type Buffer = EmulatedBuffer;

    fn name(&self) -> &str {
        "emulated"
    }

    fn devices(&self) -> Result<Vec<DeviceDescriptor<usize>>> {
        if self.faulted(Fault::Enumerate) {
            return Err(DeviceError::DeviceEnumeration(
                "injected fault: platform query failed".to_string(),
            ));
        }
        Ok(self
            .devices
            .iter()
            .enumerate()
            .map(|(i, d)| DeviceDescriptor {
                handle: i,
                platform: self.platform.clone(),
                name: d.name.clone(),
                compute_units: d.compute_units,
                max_alloc_bytes: d.max_alloc_bytes,
            })
            .collect())
    }

    fn create_context(&self, device: &usize) -> Result<EmulatedContext> {
        let name = self
            .devices
            .get(*device)
            .map(|d| d.name.clone())
            .unwrap_or_else(|| format!("#{}", device));
        if self.faulted(Fault::Context) {
            return Err(DeviceError::ContextCreation {
                device: name,
                reason: "injected fault".to_string(),
            });
        }
        let spec = self.devices.get(*device).ok_or(DeviceError::ContextCreation {
            device: name,
            reason: "invalid device handle".to_string(),
        })?;

        self.shared.stats.live_contexts.fetch_add(1, Ordering::SeqCst);
        Ok(EmulatedContext {
            max_alloc_bytes: spec.max_alloc_bytes,
            shared: Arc::clone(&self.shared),
        })
    }

    fn build_program(
        &self,
        _context: &EmulatedContext,
        source: &str,
        options: &str,
    ) -> Result<EmulatedProgram> {
        if self.faulted(Fault::Build) {
            return Err(DeviceError::ProgramBuild {
                log: "error: injected fault".to_string(),
            });
        }

        // An undefined symbol evaluates to 0 in `#if`, selecting f32.
        let precision = match define_value(options, PRECISION_DEFINE) {
            Some(value) => Precision::from_define(value).ok_or_else(|| DeviceError::ProgramBuild {
                log: format!("error: {}={} is not an integer constant", PRECISION_DEFINE, value),
            })?,
            None => Precision::F32,
        };
        if precision != Precision::HOST {
            return Err(DeviceError::ProgramBuild {
                log: format!(
                    "error: program built for {} elements but the host uses {}",
                    precision,
                    Precision::HOST
                ),
            });
        }

        let kernels: Vec<KernelKind> = declared_kernels(source)
            .into_iter()
            .filter_map(KernelKind::from_name)
            .collect();
        if kernels.is_empty() {
            return Err(DeviceError::ProgramBuild {
                log: "error: program declares no known kernels".to_string(),
            });
        }

        self.shared.stats.programs_built.fetch_add(1, Ordering::SeqCst);
        Ok(EmulatedProgram { kernels, precision })
    }

    fn create_kernel(&self, program: &EmulatedProgram, kind: KernelKind) -> Result<EmulatedKernel> {
        if self.faulted(Fault::CreateKernel(kind)) {
            return Err(DeviceError::KernelCreation {
                kernel: kind.name(),
                reason: "injected fault".to_string(),
            });
        }
        if !program.kernels.contains(&kind) {
            return Err(DeviceError::KernelCreation {
                kernel: kind.name(),
                reason: "no such kernel in program".to_string(),
            });
        }
        Ok(EmulatedKernel {
            kind,
            args: vec![None; kind.params().len()],
        })
    }

    fn create_queue(&self, _context: &EmulatedContext, _device: &usize) -> Result<EmulatedQueue> {
        if self.faulted(Fault::Queue) {
            return Err(DeviceError::QueueCreation("injected fault".to_string()));
        }
        Ok(EmulatedQueue)
    }

    fn create_buffer(
        &self,
        context: &EmulatedContext,
        access: MemAccess,
        len: usize,
        init: Option<&[Real]>,
    ) -> Result<EmulatedBuffer> {
        let bytes = len.saturating_mul(std::mem::size_of::<Real>());
        let fail = |reason: String| DeviceError::BufferAllocation { bytes, reason };
        if self.faulted(Fault::Allocate) {
            return Err(fail("injected fault".to_string()));
        }
        if len == 0 {
            return Err(fail("zero-sized buffer".to_string()));
        }
        if bytes as u64 > context.max_alloc_bytes {
            return Err(fail(format!(
                "exceeds the device limit of {} bytes",
                context.max_alloc_bytes
            )));
        }

        let data = match init {
            Some(host) if host.len() == len => host.to_vec(),
            Some(host) => {
                return Err(fail(format!(
                    "host data has {} elements for a buffer of {}",
                    host.len(),
                    len
                )))
            }
            None => vec![Real::NAN; len],
        };

        let stats = &self.shared.stats;
        stats.live_buffers.fetch_add(1, Ordering::SeqCst);
        stats.buffers_allocated.fetch_add(1, Ordering::SeqCst);
        Ok(EmulatedBuffer {
            store: Arc::new(BufferStore {
                access,
                data: RwLock::new(data),
                shared: Arc::clone(&self.shared),
            }),
        })
    }

    fn set_kernel_arg(
        &self,
        kernel: &mut EmulatedKernel,
        index: u32,
        arg: KernelArg<'_, EmulatedBuffer>,
    ) -> Result<()> {
        let fail = |reason: &str| DeviceError::KernelArgument {
            kernel: kernel.kind.name(),
            index,
            reason: reason.to_string(),
        };
        if self.faulted(Fault::BindArg) {
            return Err(fail("injected fault"));
        }
        let param = *kernel
            .kind
            .params()
            .get(index as usize)
            .ok_or_else(|| fail("invalid argument index"))?;

        let bound = match (param, arg) {
            (ParamKind::Buffer, KernelArg::Buffer(buf)) => {
                BoundArg::Buffer(Arc::downgrade(&buf.store))
            }
            (ParamKind::Int, KernelArg::Int(v)) => BoundArg::Int(v),
            (ParamKind::Buffer, KernelArg::Int(_)) => return Err(fail("expected a buffer")),
            (ParamKind::Int, KernelArg::Buffer(_)) => return Err(fail("expected an int")),
        };
        kernel.args[index as usize] = Some(bound);
        Ok(())
    }

    fn enqueue_kernel(
        &self,
        _queue: &EmulatedQueue,
        kernel: &EmulatedKernel,
        global: &[usize],
    ) -> Result<()> {
        let kind = kernel.kind;
        let fail = |reason: String| DeviceError::KernelEnqueue {
            kernel: kind.name(),
            reason,
        };
        if self.faulted(Fault::Enqueue(kind)) {
            return Err(fail("injected fault".to_string()));
        }
        if global.len() != kind.work_dim() {
            return Err(fail(format!(
                "expected {} grid dimensions, got {}",
                kind.work_dim(),
                global.len()
            )));
        }
        if global.contains(&0) {
            return Err(fail(format!("empty global work size {:?}", global)));
        }

        let args = resolve_args(kernel).map_err(fail)?;
        if let Ok(mut launches) = self.shared.stats.launches.lock() {
            launches.push(Launch {
                kernel: kind,
                grid: global.to_vec(),
            });
        }
        execute(kind, &args, global).map_err(fail)
    }

    fn finish(&self, _queue: &EmulatedQueue) -> Result<()> {
        if self.faulted(Fault::Finish) {
            return Err(DeviceError::Synchronization("injected fault".to_string()));
        }
        Ok(())
    }

    fn read_buffer(
        &self,
        _queue: &EmulatedQueue,
        buffer: &EmulatedBuffer,
        out: &mut [Real],
    ) -> Result<()> {
        if self.faulted(Fault::Read) {
            return Err(DeviceError::Readback("injected fault".to_string()));
        }
        let data = buffer
            .store
            .data
            .read()
            .map_err(|_| DeviceError::Readback("buffer lock poisoned".to_string()))?;
        if out.len() > data.len() {
            return Err(DeviceError::Readback(format!(
                "read of {} elements from a buffer of {}",
                out.len(),
                data.len()
            )));
        }
        out.copy_from_slice(&data[..out.len()]);
        Ok(())
    }
}

enum ResolvedArg {
    Buffer(Arc<BufferStore>),
    Int(usize),
}

fn resolve_args(kernel: &EmulatedKernel) -> std::result::Result<Vec<ResolvedArg>, String> {
    kernel
        .args
        .iter()
        .enumerate()
        .map(|(i, arg)| match arg {
            None => Err(format!("argument {} is not set", i)),
            Some(BoundArg::Buffer(weak)) => weak
                .upgrade()
                .map(ResolvedArg::Buffer)
                .ok_or_else(|| format!("argument {} refers to a released buffer", i)),
            Some(BoundArg::Int(v)) => usize::try_from(*v)
                .map(ResolvedArg::Int)
                .map_err(|_| format!("argument {} is negative ({})", i, v)),
        })
        .collect()
}

fn buffer_arg(args: &[ResolvedArg], i: usize) -> std::result::Result<&Arc<BufferStore>, String> {
    match args.get(i) {
        Some(ResolvedArg::Buffer(b)) => Ok(b),
        _ => Err(format!("argument {} is not a buffer", i)),
    }
}

fn int_arg(args: &[ResolvedArg], i: usize) -> std::result::Result<usize, String> {
    match args.get(i) {
        Some(ResolvedArg::Int(v)) => Ok(*v),
        _ => Err(format!("argument {} is not an int", i)),
    }
}

fn writable(store: &BufferStore) -> std::result::Result<(), String> {
    if store.access == MemAccess::ReadOnly {
        return Err("kernel writes to a read-only buffer".to_string());
    }
    Ok(())
}

const POISONED: &str = "buffer lock poisoned";

fn execute(
    kind: KernelKind,
    args: &[ResolvedArg],
    global: &[usize],
) -> std::result::Result<(), String> {
    match kind {
        KernelKind::ElementwiseMultiply => {
            let a = buffer_arg(args, 0)?;
            let b = buffer_arg(args, 1)?;
            let out = buffer_arg(args, 2)?;
            writable(out)?;
            if Arc::ptr_eq(out, a) || Arc::ptr_eq(out, b) {
                return Err("output buffer aliases an input".to_string());
            }
            let shape = PlaneShape {
                a_rows: int_arg(args, 3)?,
                b_cols: int_arg(args, 5)?,
            };
            let a_cols = int_arg(args, 4)?;
            let a = a.data.read().map_err(|_| POISONED.to_string())?;
            let b = b.data.read().map_err(|_| POISONED.to_string())?;
            let mut out = out.data.write().map_err(|_| POISONED.to_string())?;
            let grid = [global[0], global[1], global[2]];
            kernels::elementwise_multiply(&a, &b, &mut out, shape, a_cols, grid)
        }
        KernelKind::PartialReduce => {
            let products = buffer_arg(args, 0)?;
            writable(products)?;
            let shape = PlaneShape {
                a_rows: int_arg(args, 1)?,
                b_cols: int_arg(args, 2)?,
            };
            let layers = int_arg(args, 3)?;
            let mut products = products.data.write().map_err(|_| POISONED.to_string())?;
            let grid = [global[0], global[1], global[2]];
            kernels::partial_reduce(&mut products, shape, layers, grid)
        }
        KernelKind::FinalReduce => {
            let products = buffer_arg(args, 0)?;
            writable(products)?;
            let shape = PlaneShape {
                a_rows: int_arg(args, 1)?,
                b_cols: int_arg(args, 2)?,
            };
            let live_layers = int_arg(args, 3)?;
            let mut products = products.data.write().map_err(|_| POISONED.to_string())?;
            kernels::final_reduce(&mut products, shape, live_layers, [global[0], global[1]])
        }
    }
}
