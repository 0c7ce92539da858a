//! GPU dispatch tests for the offset kernel.
//!
//! Every test that needs a device skips itself (with a note on stderr) when
//! no adapter can be acquired, so the suite passes on machines without a
//! GPU or a software Vulkan implementation.

use offset_kernel::kernel::{self, BindingDialect, KernelSource};
use offset_kernel::scaffold::{AshBackend, OffsetDispatch, WgpuBackend};
use std::sync::Once;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

fn wgpu_dispatch() -> Option<OffsetDispatch<WgpuBackend>> {
    init_tracing();
    match OffsetDispatch::new() {
        Ok(dispatch) => Some(dispatch),
        Err(e) => {
            eprintln!("skipping: no usable wgpu adapter: {e:#}");
            None
        }
    }
}

fn ash_dispatch() -> Option<OffsetDispatch<AshBackend>> {
    init_tracing();
    match OffsetDispatch::new() {
        Ok(dispatch) => Some(dispatch),
        Err(e) => {
            eprintln!("skipping: no usable Vulkan device: {e:#}");
            None
        }
    }
}

fn bits(values: &[f32]) -> Vec<u32> {
    values.iter().map(|v| v.to_bits()).collect()
}

#[test]
fn concrete_example() {
    let Some(dispatch) = wgpu_dispatch() else {
        return;
    };
    let output = dispatch.run(KernelSource::Wgsl, &[1.0, 2.0, 3.0]).unwrap();
    assert_eq!(output, vec![1.5, 2.5, 3.5]);
}

#[test]
fn single_element_uses_one_workgroup() {
    let Some(dispatch) = wgpu_dispatch() else {
        return;
    };
    let input = [41.0_f32];
    assert_eq!(kernel::workgroup_count(input.len()), 1);
    let output = dispatch.run(KernelSource::Wgsl, &input).unwrap();
    assert_eq!(output, vec![41.5]);
}

#[test]
fn full_workgroup() {
    let Some(dispatch) = wgpu_dispatch() else {
        return;
    };
    let input: Vec<f32> = (0..32).map(|i| i as f32).collect();
    assert_eq!(kernel::workgroup_count(input.len()), 1);
    let output = dispatch.run(KernelSource::Wgsl, &input).unwrap();
    assert_eq!(bits(&output), bits(&kernel::reference(&input)));
}

#[test]
fn partial_second_workgroup() {
    let Some(dispatch) = wgpu_dispatch() else {
        return;
    };
    let input: Vec<f32> = (0..33).map(|i| i as f32).collect();
    assert_eq!(kernel::workgroup_count(input.len()), 2);
    let output = dispatch.run(KernelSource::Wgsl, &input).unwrap();
    assert_eq!(output.len(), 33);
    assert_eq!(bits(&output), bits(&kernel::reference(&input)));
}

#[test]
fn empty_input_dispatches_nothing() {
    let Some(dispatch) = wgpu_dispatch() else {
        return;
    };
    let output = dispatch.run(KernelSource::Wgsl, &[]).unwrap();
    assert!(output.is_empty());
}

#[test]
fn redispatch_is_bit_identical() {
    let Some(dispatch) = wgpu_dispatch() else {
        return;
    };
    let input: Vec<f32> = (0..100).map(|i| i as f32 * 0.25 - 7.0).collect();
    let first = dispatch.run(KernelSource::Wgsl, &input).unwrap();
    let second = dispatch.run(KernelSource::Wgsl, &input).unwrap();
    assert_eq!(bits(&first), bits(&second));
}

#[test]
fn source_variants_agree() {
    let Some(dispatch) = wgpu_dispatch() else {
        return;
    };
    let input: Vec<f32> = (0..65).map(|i| i as f32).collect();
    let wgsl = dispatch.run(KernelSource::Wgsl, &input).unwrap();
    for dialect in [BindingDialect::ImplicitSet, BindingDialect::ExplicitSet] {
        let glsl = dispatch.run(KernelSource::Glsl(dialect), &input).unwrap();
        assert_eq!(bits(&wgsl), bits(&glsl), "dialect {dialect:?} diverged");
    }
}

#[test]
fn ash_backend_matches_reference() {
    let Some(dispatch) = ash_dispatch() else {
        return;
    };
    let input: Vec<f32> = (0..33).map(|i| i as f32).collect();
    let output = dispatch
        .run(KernelSource::Glsl(BindingDialect::ExplicitSet), &input)
        .unwrap();
    assert_eq!(bits(&output), bits(&kernel::reference(&input)));
}
