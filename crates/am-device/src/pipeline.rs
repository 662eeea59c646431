use am_matrix::{Matrix, Precision, Real};
use tracing::debug;

use crate::error::{DeviceError, Result};
use crate::kernel::KernelKind;
use crate::plan::ExecutionPlan;
use crate::runtime::{ComputeRuntime, KernelArg, MemAccess};
use crate::session::DeviceSession;

/// Runs the three-stage pipeline for `a @ b` on an open session.
///
/// Buffers are locals, so they are released on every return path. The caller
/// has already checked that `a.cols() == b.rows()`.
pub(crate) fn run<R: ComputeRuntime>(
    runtime: &R,
    session: &mut DeviceSession<R>,
    plan: &ExecutionPlan,
    a: &Matrix,
    b: &Matrix,
) -> Result<Matrix> {
    let element = Precision::HOST.size_in_bytes();
    let working_len = plan.working_len()?;
    let working_bytes = working_len
        .checked_mul(element)
        .ok_or(DeviceError::DimensionOverflow(working_len))?;
    if working_bytes as u64 > session.device.max_alloc_bytes {
        return Err(DeviceError::BufferAllocation {
            bytes: working_bytes,
            reason: format!(
                "exceeds the {} byte allocation limit of '{}'",
                session.device.max_alloc_bytes, session.device.name
            ),
        });
    }

    let a_rows = device_int(plan.rows())?;
    let a_cols = device_int(plan.layers())?;
    let b_cols = device_int(plan.cols())?;
    let live_layers = device_int(plan.live_layers())?;

    let context = &session.context;
    let a_in = runtime.create_buffer(context, MemAccess::ReadOnly, a.data().len(), Some(a.data()))?;
    let b_in = runtime.create_buffer(context, MemAccess::ReadOnly, b.data().len(), Some(b.data()))?;
    let products = runtime.create_buffer(context, MemAccess::ReadWrite, working_len, None)?;

    let kernels = &mut session.kernels;
    let multiply_args = [
        KernelArg::Buffer(&a_in),
        KernelArg::Buffer(&b_in),
        KernelArg::Buffer(&products),
        KernelArg::Int(a_rows),
        KernelArg::Int(a_cols),
        KernelArg::Int(b_cols),
    ];
    bind(runtime, &mut kernels.multiply, &multiply_args)?;

    let partial_args = [
        KernelArg::Buffer(&products),
        KernelArg::Int(a_rows),
        KernelArg::Int(b_cols),
        KernelArg::Int(a_cols),
    ];
    bind(runtime, &mut kernels.partial_reduce, &partial_args)?;

    let final_args = [
        KernelArg::Buffer(&products),
        KernelArg::Int(a_rows),
        KernelArg::Int(b_cols),
        KernelArg::Int(live_layers),
    ];
    bind(runtime, &mut kernels.final_reduce, &final_args)?;

    let queue = &session.queue;
    let grid = plan.multiply_grid();
    debug!(kernel = KernelKind::ElementwiseMultiply.name(), ?grid, "enqueue");
    runtime.enqueue_kernel(queue, &kernels.multiply, &grid)?;

    for grid in plan.reduction_grids() {
        debug!(kernel = KernelKind::PartialReduce.name(), ?grid, "enqueue");
        runtime.enqueue_kernel(queue, &kernels.partial_reduce, &grid)?;
    }

    let grid = plan.final_grid();
    debug!(kernel = KernelKind::FinalReduce.name(), ?grid, live_layers, "enqueue");
    runtime.enqueue_kernel(queue, &kernels.final_reduce, &grid)?;

    runtime.finish(queue)?;

    let mut out = vec![0.0 as Real; plan.output_len()];
    runtime.read_buffer(queue, &products, &mut out)?;

    Ok(Matrix::new(plan.rows(), plan.cols(), out)?)
}

fn bind<R: ComputeRuntime>(
    runtime: &R,
    kernel: &mut R::Kernel,
    args: &[KernelArg<'_, R::Buffer>],
) -> Result<()> {
    for (index, arg) in args.iter().enumerate() {
        runtime.set_kernel_arg(kernel, index as u32, *arg)?;
    }
    Ok(())
}

/// Converts an extent to the `int` the kernels take.
pub(crate) fn device_int(value: usize) -> Result<i32> {
    i32::try_from(value).map_err(|_| DeviceError::DimensionOverflow(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_int_range() {
        assert_eq!(device_int(300).unwrap(), 300);
        assert_eq!(device_int(i32::MAX as usize).unwrap(), i32::MAX);
        assert!(matches!(
            device_int(i32::MAX as usize + 1),
            Err(DeviceError::DimensionOverflow(_))
        ));
    }
}
