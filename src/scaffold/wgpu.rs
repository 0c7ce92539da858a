use super::backend::ComputeBackend;
use crate::kernel::{CompiledKernel, INPUT_BINDING, OUTPUT_BINDING};
use anyhow::Context;
use futures::executor::block_on;
use std::borrow::Cow;
use tracing::debug;
use wgpu::{PipelineCompilationOptions, util::DeviceExt};

/// Dispatches the kernel through wgpu.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
}

impl ComputeBackend for WgpuBackend {
    fn init() -> anyhow::Result<Self> {
        block_on(async {
            let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
                #[cfg(target_os = "linux")]
                backends: wgpu::Backends::VULKAN,
                #[cfg(not(target_os = "linux"))]
                backends: wgpu::Backends::PRIMARY,
                flags: Default::default(),
                backend_options: Default::default(),
            });
            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .context("Failed to find a suitable GPU adapter")?;
            debug!(adapter = %adapter.get_info().name, "wgpu adapter selected");
            let (device, queue) = adapter
                .request_device(&wgpu::DeviceDescriptor {
                    label: Some("Offset Kernel Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: Default::default(),
                    trace: Default::default(),
                })
                .await
                .context("Failed to create device")?;
            Ok(Self { device, queue })
        })
    }

    fn run_compute(
        &self,
        kernel: &CompiledKernel,
        groups: u32,
        input_bytes: &[u8],
        buffer_size: u64,
    ) -> anyhow::Result<Vec<u8>> {
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("Offset Kernel"),
                source: wgpu::ShaderSource::SpirV(Cow::Borrowed(&kernel.spirv)),
            });
        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("Offset Pipeline"),
                layout: None,
                module: &module,
                entry_point: Some(kernel.entry_point),
                compilation_options: PipelineCompilationOptions::default(),
                cache: None,
            });

        let input_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Input Buffer"),
                contents: input_bytes,
                usage: wgpu::BufferUsages::STORAGE,
            });
        let output_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Output Buffer"),
            size: buffer_size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &pipeline.get_bind_group_layout(0),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: INPUT_BINDING,
                    resource: input_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: OUTPUT_BINDING,
                    resource: output_buffer.as_entire_binding(),
                },
            ],
            label: Some("Offset Bind Group"),
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Offset Encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Offset Pass"),
                timestamp_writes: Default::default(),
            });
            pass.set_pipeline(&pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(groups, 1, 1);
        }

        // Read back through a staging buffer.
        let staging_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Staging Buffer"),
            size: buffer_size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        encoder.copy_buffer_to_buffer(&output_buffer, 0, &staging_buffer, 0, buffer_size);
        self.queue.submit(Some(encoder.finish()));

        let buffer_slice = staging_buffer.slice(..);
        let (sender, receiver) = futures::channel::oneshot::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = sender.send(res);
        });
        self.device.poll(wgpu::PollType::Wait)?;
        block_on(receiver)
            .context("mapping canceled")?
            .context("mapping failed")?;
        let data = buffer_slice.get_mapped_range().to_vec();
        staging_buffer.unmap();
        Ok(data)
    }
}
