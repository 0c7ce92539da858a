use crate::kernel::{self, CompiledKernel, KernelSource, WORKGROUP_SIZE};
use anyhow::Result;
use tracing::debug;

/// A dispatch target for the offset kernel.
///
/// Backends see the kernel through its fixed binding contract: SPIR-V words
/// and entry point, a 1-D workgroup count, the input buffer contents at
/// binding 0 (read-only), and the byte size shared by both buffers.
pub trait ComputeBackend: Sized {
    /// Initialize the backend. Failing to find a device is an ordinary
    /// error; callers running under test treat it as a skip.
    fn init() -> Result<Self>;

    /// Bind `input_bytes` at binding 0 and a zeroed output buffer of
    /// `buffer_size` bytes at binding 1, dispatch `groups` workgroups along
    /// X, and return the output buffer contents after completion.
    fn run_compute(
        &self,
        kernel: &CompiledKernel,
        groups: u32,
        input_bytes: &[u8],
        buffer_size: u64,
    ) -> Result<Vec<u8>>;
}

/// Host-side keeper of the kernel's caller contract.
///
/// The kernel has no bounds check, so a partial last workgroup runs
/// invocations whose global index is past the logical length. Both buffers
/// are sized to a whole number of workgroups so those invocations stay
/// inside their allocations; the padding slots are discarded on readback.
pub struct OffsetDispatch<B> {
    backend: B,
}

impl<B: ComputeBackend> OffsetDispatch<B> {
    pub fn new() -> Result<Self> {
        Ok(Self {
            backend: B::init()?,
        })
    }

    /// Runs `output[i] = input[i] + OFFSET` over the whole input.
    ///
    /// An empty input dispatches nothing and yields an empty vector.
    pub fn run(&self, source: KernelSource, input: &[f32]) -> Result<Vec<f32>> {
        if input.is_empty() {
            return Ok(Vec::new());
        }
        let compiled = kernel::compile(source)?;
        let groups = kernel::workgroup_count(input.len());
        let padded_len = groups as usize * WORKGROUP_SIZE as usize;
        let mut padded = input.to_vec();
        padded.resize(padded_len, 0.0);
        let buffer_size = (padded_len * size_of::<f32>()) as u64;
        debug!(
            n = input.len(),
            groups, padded_len, "dispatching offset kernel"
        );

        let raw = self
            .backend
            .run_compute(&compiled, groups, bytemuck::cast_slice(&padded), buffer_size)?;
        let output: Vec<f32> = raw
            .chunks_exact(4)
            .take(input.len())
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Ok(output)
    }
}
