use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("device enumeration failed: {0}")]
    DeviceEnumeration(String),
    #[error("no compute device available{}", filter_suffix(.filter))]
    NoDevice { filter: Option<String> },
    #[error("context creation failed on '{device}': {reason}")]
    ContextCreation { device: String, reason: String },
    #[error("program build failed:\n{log}")]
    ProgramBuild { log: String },
    #[error("kernel '{kernel}' could not be created: {reason}")]
    KernelCreation { kernel: &'static str, reason: String },
    #[error("command queue creation failed: {0}")]
    QueueCreation(String),
    #[error("buffer allocation of {bytes} bytes failed: {reason}")]
    BufferAllocation { bytes: usize, reason: String },
    #[error("argument {index} of kernel '{kernel}' could not be bound: {reason}")]
    KernelArgument {
        kernel: &'static str,
        index: u32,
        reason: String,
    },
    #[error("kernel '{kernel}' could not be enqueued: {reason}")]
    KernelEnqueue { kernel: &'static str, reason: String },
    #[error("device synchronization failed: {0}")]
    Synchronization(String),
    #[error("result readback failed: {0}")]
    Readback(String),
    #[error("matmul dimension mismatch: [{m}x{k}] @ [{k2}x{n}]")]
    DimensionMismatch {
        m: usize,
        k: usize,
        k2: usize,
        n: usize,
    },
    #[error("dimension {0} does not fit a device int argument")]
    DimensionOverflow(usize),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("device session lock poisoned")]
    SessionPoisoned,
    #[error("matrix error: {0}")]
    Matrix(#[from] am_matrix::MatrixError),
}

impl DeviceError {
    /// Stable name of the failing step, for logs and status mapping.
    pub fn kind(&self) -> &'static str {
        match self {
            DeviceError::DeviceEnumeration(_) => "device_enumeration",
            DeviceError::NoDevice { .. } => "no_device",
            DeviceError::ContextCreation { .. } => "context_creation",
            DeviceError::ProgramBuild { .. } => "program_build",
            DeviceError::KernelCreation { .. } => "kernel_creation",
            DeviceError::QueueCreation(_) => "queue_creation",
            DeviceError::BufferAllocation { .. } => "buffer_allocation",
            DeviceError::KernelArgument { .. } => "kernel_argument",
            DeviceError::KernelEnqueue { .. } => "kernel_enqueue",
            DeviceError::Synchronization(_) => "synchronization",
            DeviceError::Readback(_) => "readback",
            DeviceError::DimensionMismatch { .. } => "dimension_mismatch",
            DeviceError::DimensionOverflow(_) => "dimension_overflow",
            DeviceError::InvalidConfig(_) => "invalid_config",
            DeviceError::SessionPoisoned => "session_poisoned",
            DeviceError::Matrix(_) => "matrix",
        }
    }
}

pub type Result<T> = std::result::Result<T, DeviceError>;

fn filter_suffix(filter: &Option<String>) -> String {
    filter
        .as_ref()
        .map(|f| format!(" matching '{}'", f))
        .unwrap_or_default()
}
