use std::fmt;
use std::sync::{Mutex, MutexGuard};

use am_matrix::{ComputeBackend, Matrix, MatrixError, Real};
use tracing::{debug, info, instrument, warn};

use crate::config::{EngineConfig, SessionPolicy};
use crate::error::{DeviceError, Result};
use crate::pipeline;
use crate::plan::ExecutionPlan;
use crate::runtime::ComputeRuntime;
use crate::session::DeviceSession;

/// Multiplies matrices on a compute device.
///
/// The engine owns the runtime and at most one `DeviceSession`. The session is
/// created on first use (or by `ensure_loaded`) and kept or released after each
/// call according to `EngineConfig::session_policy`. A mutex serializes access,
/// so one multiplication runs at a time per engine; the engine can be shared
/// across threads.
pub struct MatmulEngine<R: ComputeRuntime> {
    runtime: R,
    config: EngineConfig,
    session: Mutex<Option<DeviceSession<R>>>,
}

impl<R: ComputeRuntime> MatmulEngine<R> {
    /// Create an engine with the default configuration.
    pub fn new(runtime: R) -> Self {
        Self {
            runtime,
            config: EngineConfig::default(),
            session: Mutex::new(None),
        }
    }

    /// Create an engine with an explicit configuration.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the configuration does not validate.
    pub fn with_config(runtime: R, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            runtime,
            config,
            session: Mutex::new(None),
        })
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Opens the device session if none is loaded. Idempotent.
    pub fn ensure_loaded(&self) -> Result<()> {
        let mut slot = self.lock()?;
        self.load(&mut slot)?;
        Ok(())
    }

    /// Drops the device session if one is loaded. Idempotent.
    pub fn release(&self) -> Result<()> {
        let mut slot = self.lock()?;
        if let Some(session) = slot.take() {
            info!(device = %session.device().name, "device session released");
        }
        Ok(())
    }

    /// Returns true while a device session is loaded.
    pub fn is_loaded(&self) -> bool {
        self.lock().map(|s| s.is_some()).unwrap_or(false)
    }

    /// Name of the device the loaded session runs on.
    pub fn device_name(&self) -> Option<String> {
        self.lock()
            .ok()
            .and_then(|s| s.as_ref().map(|session| session.device().name.clone()))
    }

    /// Computes `a @ b` on the device.
    ///
    /// `a` is [m, k] and `b` is [k, n]; the result is [m, n]. Shapes are checked
    /// before the session is touched, so a mismatch allocates nothing. Any
    /// device failure aborts the call, and the session is torn down so the next
    /// call starts from a fresh one.
    #[instrument(skip_all, fields(m = a.rows(), k = a.cols(), n = b.cols()))]
    pub fn multiply(&self, a: &Matrix, b: &Matrix) -> Result<Matrix> {
        let (m, k) = a.shape();
        let (k2, n) = b.shape();
        if k != k2 {
            return Err(DeviceError::DimensionMismatch { m, k, k2, n });
        }

        let plan = ExecutionPlan::new(m, k, n, self.config.cutoff);
        debug!(
            log_layers = plan.log_layers(),
            reduction_rounds = plan.reduction_rounds(),
            live_layers = plan.live_layers(),
            "execution plan"
        );

        let mut slot = self.lock()?;
        let session = self.load(&mut slot)?;
        let result = pipeline::run(&self.runtime, session, &plan, a, b);

        match &result {
            Err(e) => {
                warn!(
                    kind = e.kind(),
                    error = %e,
                    "multiplication failed, releasing device session"
                );
                *slot = None;
            }
            Ok(_) if self.config.session_policy == SessionPolicy::PerCall => {
                debug!("per-call session policy, releasing device session");
                *slot = None;
            }
            Ok(_) => {}
        }
        result
    }

    /// Computes the product of two flat row-major buffers.
    ///
    /// `a` is [a_rows, a_cols] and `b` is [b_rows, b_cols]; `a_cols` must equal
    /// `b_rows`. Use `Matrix::into_parts` on the result to get
    /// `(data, rows, cols)`.
    pub fn multiply_flat(
        &self,
        a: &[Real],
        a_rows: usize,
        a_cols: usize,
        b: &[Real],
        b_rows: usize,
        b_cols: usize,
    ) -> Result<Matrix> {
        if a_cols != b_rows {
            return Err(DeviceError::DimensionMismatch {
                m: a_rows,
                k: a_cols,
                k2: b_rows,
                n: b_cols,
            });
        }
        let a = Matrix::new(a_rows, a_cols, a.to_vec())?;
        let b = Matrix::new(b_rows, b_cols, b.to_vec())?;
        self.multiply(&a, &b)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<DeviceSession<R>>>> {
        self.session.lock().map_err(|_| DeviceError::SessionPoisoned)
    }

    fn load<'s>(&self, slot: &'s mut Option<DeviceSession<R>>) -> Result<&'s mut DeviceSession<R>> {
        let session = match slot.take() {
            Some(session) => session,
            None => {
                let session = DeviceSession::open(&self.runtime, &self.config)?;
                info!(device = %session.device().name, "device session loaded");
                session
            }
        };
        Ok(slot.insert(session))
    }
}

impl<R: ComputeRuntime> fmt::Debug for MatmulEngine<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatmulEngine")
            .field("runtime", &self.runtime)
            .field("config", &self.config)
            .field("loaded", &self.session.try_lock().map(|s| s.is_some()).ok())
            .finish()
    }
}

impl<R: ComputeRuntime> ComputeBackend for MatmulEngine<R> {
    fn name(&self) -> &str {
        self.runtime.name()
    }

    fn matmul(
        &self,
        a: &[Real],
        b: &[Real],
        m: usize,
        k: usize,
        n: usize,
    ) -> am_matrix::Result<Vec<Real>> {
        self.multiply_flat(a, m, k, b, k, n)
            .map(Matrix::into_data)
            .map_err(|e| match e {
                DeviceError::Matrix(inner) => inner,
                other => MatrixError::Backend(Box::new(other)),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulated::{EmulatedDevice, EmulatedRuntime, Fault};
    use crate::kernel::KernelKind;
    use am_matrix::CpuBackend;

    fn engine() -> MatmulEngine<EmulatedRuntime> {
        MatmulEngine::new(EmulatedRuntime::new())
    }

    fn ramp(rows: usize, cols: usize, seed: usize) -> Matrix {
        Matrix::from_fn(rows, cols, |i, j| ((i * 7 + j * 3 + seed) % 5) as Real - 2.0).unwrap()
    }

    fn reference(a: &Matrix, b: &Matrix) -> Matrix {
        a.matmul(b, &CpuBackend::new()).unwrap()
    }

    #[test]
    fn test_two_by_two() {
        let engine = engine();
        let a = Matrix::from_rows(&[[1.0, 2.0], [3.0, 4.0]]).unwrap();
        let b = Matrix::from_rows(&[[5.0, 6.0], [7.0, 8.0]]).unwrap();
        let c = engine.multiply(&a, &b).unwrap();
        assert_eq!(c.shape(), (2, 2));
        assert_eq!(c.data(), &[19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_rectangular_product() {
        let engine = engine();
        let a = ramp(3, 7, 1);
        let b = ramp(7, 2, 4);
        let c = engine.multiply(&a, &b).unwrap();
        assert_eq!(c, reference(&a, &b));
    }

    #[test]
    fn test_non_power_of_two_layers() {
        // Cutoff 1 forces tree rounds with extents 4, 2, 1 over 5 layers.
        let rt = EmulatedRuntime::new();
        let engine =
            MatmulEngine::with_config(rt.clone(), EngineConfig::default().with_cutoff(1)).unwrap();
        let a = ramp(5, 5, 2);
        let b = ramp(5, 5, 3);
        let c = engine.multiply(&a, &b).unwrap();
        assert_eq!(c, reference(&a, &b));

        let extents: Vec<usize> = rt
            .stats()
            .launches()
            .iter()
            .filter(|l| l.kernel == KernelKind::PartialReduce)
            .map(|l| l.grid[2])
            .collect();
        assert_eq!(extents, vec![4, 2, 1]);
    }

    #[test]
    fn test_default_cutoff_five_rows() {
        let engine = engine();
        let a = ramp(5, 5, 0);
        let b = Matrix::identity(5).unwrap();
        assert_eq!(engine.multiply(&a, &b).unwrap(), a);
    }

    #[test]
    fn test_layers_around_cutoff() {
        for k in [127, 128, 129, 255, 256, 257, 300] {
            let rt = EmulatedRuntime::new();
            let engine = MatmulEngine::new(rt.clone());
            let a = ramp(2, k, 1);
            let b = ramp(k, 3, 2);
            let c = engine.multiply(&a, &b).unwrap();
            assert!(c.data().iter().all(|v| v.is_finite()), "k = {}", k);
            assert_eq!(c, reference(&a, &b), "k = {}", k);
        }
    }

    #[test]
    fn test_launch_sequence_for_300_layers() {
        let rt = EmulatedRuntime::new();
        let engine = MatmulEngine::new(rt.clone());
        engine.multiply(&ramp(2, 2, 0), &ramp(2, 2, 1)).unwrap();
        assert_eq!(rt.stats().launches().len(), 2);
        rt.stats().clear_launches();

        engine.multiply(&ramp(2, 300, 0), &ramp(300, 2, 1)).unwrap();
        let launches = rt.stats().launches();
        let kinds: Vec<KernelKind> = launches.iter().map(|l| l.kernel).collect();
        assert_eq!(
            kinds,
            vec![
                KernelKind::ElementwiseMultiply,
                KernelKind::PartialReduce,
                KernelKind::PartialReduce,
                KernelKind::FinalReduce,
            ]
        );
        assert_eq!(launches[0].grid, vec![2, 2, 300]);
        assert_eq!(launches[1].grid, vec![2, 2, 256]);
        assert_eq!(launches[2].grid, vec![2, 2, 128]);
        assert_eq!(launches[3].grid, vec![2, 2]);
    }

    #[test]
    fn test_dimension_mismatch_allocates_nothing() {
        let rt = EmulatedRuntime::new();
        let engine = MatmulEngine::new(rt.clone());
        let err = engine
            .multiply(&Matrix::zeros(2, 3).unwrap(), &Matrix::zeros(4, 5).unwrap())
            .unwrap_err();
        assert!(matches!(
            err,
            DeviceError::DimensionMismatch { m: 2, k: 3, k2: 4, n: 5 }
        ));
        assert_eq!(rt.stats().buffers_allocated(), 0);
        assert!(!engine.is_loaded());
    }

    #[test]
    fn test_repeated_calls_are_identical() {
        let rt = EmulatedRuntime::new();
        let engine = MatmulEngine::new(rt.clone());
        let a = ramp(9, 4, 1);
        let b = ramp(4, 6, 2);
        let first = engine.multiply(&a, &b).unwrap();
        let second = engine.multiply(&a, &b).unwrap();
        assert_eq!(first, second);
        assert_eq!(rt.stats().programs_built(), 1);
        assert_eq!(rt.stats().live_buffers(), 0);
        assert!(engine.is_loaded());
    }

    #[test]
    fn test_per_call_policy_releases_session() {
        let rt = EmulatedRuntime::new();
        let config = EngineConfig::default().with_session_policy(SessionPolicy::PerCall);
        let engine = MatmulEngine::with_config(rt.clone(), config).unwrap();
        let a = ramp(3, 3, 0);
        let first = engine.multiply(&a, &a).unwrap();
        assert!(!engine.is_loaded());
        assert_eq!(rt.stats().live_contexts(), 0);
        let second = engine.multiply(&a, &a).unwrap();
        assert_eq!(first, second);
        assert_eq!(rt.stats().programs_built(), 2);
    }

    #[test]
    fn test_selects_device_with_most_compute_units() {
        let rt = EmulatedRuntime::with_devices(vec![
            EmulatedDevice::new("gpu-a", 2),
            EmulatedDevice::new("gpu-b", 8),
            EmulatedDevice::new("gpu-c", 5),
        ]);
        let engine = MatmulEngine::new(rt);
        engine.ensure_loaded().unwrap();
        assert_eq!(engine.device_name().as_deref(), Some("gpu-b"));
    }

    #[test]
    fn test_device_filter() {
        let rt = EmulatedRuntime::with_devices(vec![
            EmulatedDevice::new("cpu", 32),
            EmulatedDevice::new("gpu", 8),
        ]);
        let engine =
            MatmulEngine::with_config(rt.clone(), EngineConfig::default().with_device_filter("GPU"))
                .unwrap();
        engine.ensure_loaded().unwrap();
        assert_eq!(engine.device_name().as_deref(), Some("gpu"));

        let config = EngineConfig::default().with_device_filter("fpga");
        let engine = MatmulEngine::with_config(rt, config).unwrap();
        assert!(matches!(
            engine.ensure_loaded(),
            Err(DeviceError::NoDevice { filter: Some(_) })
        ));
    }

    #[test]
    fn test_no_devices() {
        let engine = MatmulEngine::new(EmulatedRuntime::with_devices(vec![]));
        let a = ramp(2, 2, 0);
        assert!(matches!(
            engine.multiply(&a, &a),
            Err(DeviceError::NoDevice { filter: None })
        ));
    }

    #[test]
    fn test_ensure_loaded_and_release_are_idempotent() {
        let rt = EmulatedRuntime::new();
        let engine = MatmulEngine::new(rt.clone());
        engine.ensure_loaded().unwrap();
        engine.ensure_loaded().unwrap();
        assert_eq!(rt.stats().programs_built(), 1);
        assert_eq!(rt.stats().live_contexts(), 1);
        engine.release().unwrap();
        engine.release().unwrap();
        assert!(!engine.is_loaded());
        assert_eq!(rt.stats().live_contexts(), 0);
    }

    #[test]
    fn test_session_faults_map_to_error_kinds() {
        let cases = [
            (Fault::Enumerate, "device_enumeration"),
            (Fault::Context, "context_creation"),
            (Fault::Build, "program_build"),
            (Fault::CreateKernel(KernelKind::PartialReduce), "kernel_creation"),
            (Fault::Queue, "queue_creation"),
        ];
        for (fault, expected) in cases {
            let rt = EmulatedRuntime::new();
            rt.inject_fault(fault);
            let engine = MatmulEngine::new(rt.clone());
            let err = engine.ensure_loaded().unwrap_err();
            assert_eq!(err.kind(), expected, "{:?} produced {}", fault, err);
            assert!(!engine.is_loaded());
            assert_eq!(rt.stats().live_contexts(), 0, "{:?}", fault);
        }
    }

    #[test]
    fn test_pipeline_faults_release_everything() {
        let cases = [
            (Fault::Allocate, "buffer_allocation"),
            (Fault::BindArg, "kernel_argument"),
            (Fault::Enqueue(KernelKind::ElementwiseMultiply), "kernel_enqueue"),
            (Fault::Enqueue(KernelKind::PartialReduce), "kernel_enqueue"),
            (Fault::Enqueue(KernelKind::FinalReduce), "kernel_enqueue"),
            (Fault::Finish, "synchronization"),
            (Fault::Read, "readback"),
        ];
        // k = 300 plans two reduction rounds at the default cutoff.
        let a = ramp(3, 300, 1);
        let b = ramp(300, 2, 0);
        for (fault, expected) in cases {
            let rt = EmulatedRuntime::new();
            let engine = MatmulEngine::new(rt.clone());
            engine.ensure_loaded().unwrap();
            rt.inject_fault(fault);
            let err = engine.multiply(&a, &b).unwrap_err();
            assert_eq!(err.kind(), expected, "{:?} produced {}", fault, err);
            assert_eq!(rt.stats().live_buffers(), 0, "{:?}", fault);
            assert!(!engine.is_loaded(), "{:?}", fault);
            assert_eq!(rt.stats().live_contexts(), 0, "{:?}", fault);

            rt.clear_fault();
            assert_eq!(engine.multiply(&a, &b).unwrap(), reference(&a, &b));
        }
    }

    #[test]
    fn test_partial_reduce_fault_stops_after_multiply() {
        let rt = EmulatedRuntime::new();
        let config = EngineConfig::default().with_cutoff(1);
        let engine = MatmulEngine::with_config(rt.clone(), config).unwrap();
        rt.inject_fault(Fault::Enqueue(KernelKind::PartialReduce));

        let err = engine.multiply(&ramp(2, 5, 0), &ramp(5, 2, 1)).unwrap_err();
        assert!(matches!(
            err,
            DeviceError::KernelEnqueue {
                kernel: "partial_reduce",
                ..
            }
        ));
        let kinds: Vec<KernelKind> = rt.stats().launches().iter().map(|l| l.kernel).collect();
        assert_eq!(kinds, vec![KernelKind::ElementwiseMultiply]);
        assert_eq!(rt.stats().live_buffers(), 0);
        assert!(!engine.is_loaded());
    }

    #[test]
    fn test_failing_kernel_is_named() {
        let rt = EmulatedRuntime::new();
        rt.inject_fault(Fault::Enqueue(KernelKind::FinalReduce));
        let engine = MatmulEngine::new(rt);
        let a = ramp(2, 2, 0);
        assert!(matches!(
            engine.multiply(&a, &a),
            Err(DeviceError::KernelEnqueue { kernel: "final_reduce", .. })
        ));
    }

    #[test]
    fn test_working_buffer_over_device_limit() {
        let rt = EmulatedRuntime::with_devices(vec![
            EmulatedDevice::new("small", 4).with_max_alloc_bytes(1024)
        ]);
        let engine = MatmulEngine::new(rt.clone());
        let err = engine
            .multiply(&ramp(8, 8, 0), &ramp(8, 8, 1))
            .unwrap_err();
        assert!(matches!(err, DeviceError::BufferAllocation { .. }));
        assert_eq!(rt.stats().buffers_allocated(), 0);
    }

    #[test]
    fn test_multiply_flat() {
        let engine = engine();
        let c = engine
            .multiply_flat(&[1.0, 2.0, 3.0, 4.0], 2, 2, &[5.0, 6.0, 7.0, 8.0], 2, 2)
            .unwrap();
        let (data, rows, cols) = c.into_parts();
        assert_eq!((rows, cols), (2, 2));
        assert_eq!(data, vec![19.0, 22.0, 43.0, 50.0]);

        assert!(matches!(
            engine.multiply_flat(&[1.0; 6], 2, 3, &[1.0; 20], 4, 5),
            Err(DeviceError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            engine.multiply_flat(&[1.0; 3], 2, 2, &[1.0; 4], 2, 2),
            Err(DeviceError::Matrix(_))
        ));
    }

    #[test]
    fn test_as_compute_backend() {
        let engine = engine();
        let backend: &dyn ComputeBackend = &engine;
        assert_eq!(backend.name(), "emulated");
        let a = ramp(3, 5, 0);
        let b = ramp(5, 4, 1);
        assert_eq!(a.matmul(&b, backend).unwrap(), reference(&a, &b));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = EngineConfig::default().with_cutoff(0);
        assert!(matches!(
            MatmulEngine::with_config(EmulatedRuntime::new(), config),
            Err(DeviceError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_engine_is_shareable_across_threads() {
        let engine = std::sync::Arc::new(engine());
        let a = ramp(6, 6, 1);
        let expected = reference(&a, &a);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let engine = std::sync::Arc::clone(&engine);
                let a = a.clone();
                std::thread::spawn(move || engine.multiply(&a, &a).unwrap())
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), expected);
        }
    }
}
