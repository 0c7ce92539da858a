//! An elementwise offset kernel for GPU compute, plus the host-side
//! scaffolding needed to dispatch it and read results back.
//!
//! The kernel itself is a one-liner: each invocation reads one `f32` from the
//! input buffer at its global index, adds [`kernel::OFFSET`], and writes the
//! sum to the output buffer at the same index. What this crate packages is
//! the contract around that line: the kernel source in WGSL and in both GLSL
//! binding-declaration conventions, translation to SPIR-V, and dispatch
//! backends for `wgpu` and raw Vulkan.

pub mod kernel;
pub mod scaffold;
