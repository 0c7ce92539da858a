//! Host-side dispatch scaffolding for the offset kernel.

mod ash;
mod backend;
mod wgpu;

pub use ash::AshBackend;
pub use backend::{ComputeBackend, OffsetDispatch};
pub use wgpu::WgpuBackend;
