use am_device::{EmulatedRuntime, EngineConfig, MatmulEngine};
use am_matrix::ComputeBackend;

use crate::types::AMBackendType;

/// Opaque context handle that owns the multiplication engine.
pub struct AMContext {
    pub backend_type: AMBackendType,
    pub engine: Box<dyn ComputeBackend>,
}

impl AMContext {
    /// Builds an engine for `backend_type` configured from the environment.
    pub fn new(backend_type: AMBackendType) -> Result<Self, String> {
        let config = EngineConfig::from_env().map_err(|e| e.to_string())?;
        let engine: Box<dyn ComputeBackend> = match backend_type {
            AMBackendType::Emulated => Box::new(
                MatmulEngine::with_config(EmulatedRuntime::new(), config)
                    .map_err(|e| e.to_string())?,
            ),
            #[cfg(feature = "opencl")]
            AMBackendType::OpenCl => Box::new(
                MatmulEngine::with_config(am_device::OpenClRuntime::new(), config)
                    .map_err(|e| e.to_string())?,
            ),
            #[cfg(not(feature = "opencl"))]
            AMBackendType::OpenCl => {
                return Err("built without the opencl feature".to_string());
            }
        };
        Ok(Self {
            backend_type,
            engine,
        })
    }
}
