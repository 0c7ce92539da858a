use super::backend::ComputeBackend;
use crate::kernel::{CompiledKernel, INPUT_BINDING, OUTPUT_BINDING};
use anyhow::{Context, Result};
use ash::vk;
use gpu_alloc::{GpuAllocator, MemoryBlock, Request, UsageFlags};
use gpu_alloc_ash::AshMemoryDevice;
use std::ffi::{CStr, CString};
use std::sync::Mutex;
use tracing::debug;

/// Dispatches the kernel through raw Vulkan.
///
/// This is the binding model the kernel's GLSL forms target directly: one
/// descriptor set with two storage-buffer bindings.
pub struct AshBackend {
    instance: ash::Instance,
    device: ash::Device,
    queue: vk::Queue,
    memory_allocator: Mutex<GpuAllocator<vk::DeviceMemory>>,
    command_pool: vk::CommandPool,
    _entry: ash::Entry,
}

struct HostBuffer {
    buffer: vk::Buffer,
    block: MemoryBlock<vk::DeviceMemory>,
}

impl AshBackend {
    unsafe fn create_buffer(&self, size: u64, initial_data: Option<&[u8]>) -> Result<HostBuffer> {
        unsafe {
            let buffer = self
                .device
                .create_buffer(
                    &vk::BufferCreateInfo::default()
                        .size(size)
                        .usage(vk::BufferUsageFlags::STORAGE_BUFFER)
                        .sharing_mode(vk::SharingMode::EXCLUSIVE),
                    None,
                )
                .context("Failed to create buffer")?;

            let memory_requirements = self.device.get_buffer_memory_requirements(buffer);
            let mut block = self.memory_allocator.lock().unwrap().alloc(
                AshMemoryDevice::wrap(&self.device),
                Request {
                    usage: UsageFlags::HOST_ACCESS,
                    align_mask: memory_requirements.alignment,
                    size: memory_requirements.size,
                    memory_types: memory_requirements.memory_type_bits,
                },
            )?;

            if let Some(data) = initial_data {
                block.write_bytes(AshMemoryDevice::wrap(&self.device), 0, data)?;
            }

            self.device
                .bind_buffer_memory(buffer, *block.memory(), 0)
                .context("Failed to bind buffer memory")?;

            Ok(HostBuffer { buffer, block })
        }
    }

    unsafe fn destroy_buffer(&self, buffer: HostBuffer) {
        unsafe {
            self.device.destroy_buffer(buffer.buffer, None);
            let mut allocator = self.memory_allocator.lock().unwrap();
            allocator.dealloc(AshMemoryDevice::wrap(&self.device), buffer.block);
        }
    }
}

impl ComputeBackend for AshBackend {
    fn init() -> Result<Self> {
        unsafe {
            let entry = ash::Entry::load().context("Failed to load Vulkan entry")?;

            let instance = entry
                .create_instance(
                    &vk::InstanceCreateInfo::default().application_info(
                        &vk::ApplicationInfo::default()
                            .application_name(CStr::from_bytes_with_nul_unchecked(
                                b"offset-kernel\0",
                            ))
                            .application_version(vk::make_api_version(0, 1, 0, 0))
                            .engine_name(CStr::from_bytes_with_nul_unchecked(b"offset-kernel\0"))
                            .engine_version(vk::make_api_version(0, 1, 0, 0))
                            .api_version(vk::API_VERSION_1_2),
                    ),
                    None,
                )
                .context("Failed to create Vulkan instance")?;

            let physical_devices = instance
                .enumerate_physical_devices()
                .context("Failed to enumerate physical devices")?;
            let physical_device = *physical_devices
                .first()
                .context("No Vulkan devices found")?;
            let properties = instance.get_physical_device_properties(physical_device);
            debug!(
                device = %CStr::from_ptr(properties.device_name.as_ptr()).to_string_lossy(),
                "Vulkan physical device selected"
            );

            let queue_family_properties =
                instance.get_physical_device_queue_family_properties(physical_device);
            let queue_family_index = queue_family_properties
                .iter()
                .enumerate()
                .find(|(_, props)| props.queue_flags.contains(vk::QueueFlags::COMPUTE))
                .map(|(index, _)| index as u32)
                .context("No compute queue family found")?;

            let device = instance
                .create_device(
                    physical_device,
                    &vk::DeviceCreateInfo::default()
                        .queue_create_infos(&[vk::DeviceQueueCreateInfo::default()
                            .queue_family_index(queue_family_index)
                            .queue_priorities(&[1.0])])
                        .enabled_features(&vk::PhysicalDeviceFeatures::default()),
                    None,
                )
                .context("Failed to create Vulkan device")?;
            let queue = device.get_device_queue(queue_family_index, 0);

            let memory_allocator = Mutex::new(GpuAllocator::new(
                gpu_alloc::Config::i_am_potato(),
                gpu_alloc_ash::device_properties(&instance, 0, physical_device)?,
            ));

            let command_pool = device
                .create_command_pool(
                    &vk::CommandPoolCreateInfo::default().queue_family_index(queue_family_index),
                    None,
                )
                .context("Failed to create command pool")?;

            Ok(Self {
                instance,
                device,
                queue,
                memory_allocator,
                command_pool,
                _entry: entry,
            })
        }
    }

    fn run_compute(
        &self,
        kernel: &CompiledKernel,
        groups: u32,
        input_bytes: &[u8],
        buffer_size: u64,
    ) -> Result<Vec<u8>> {
        unsafe {
            // Fixed layout: binding 0 input, binding 1 output, both storage.
            let bindings = [INPUT_BINDING, OUTPUT_BINDING].map(|binding| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::COMPUTE)
            });
            let descriptor_set_layout = self
                .device
                .create_descriptor_set_layout(
                    &vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings),
                    None,
                )
                .context("Failed to create descriptor set layout")?;

            let pipeline_layout = self
                .device
                .create_pipeline_layout(
                    &vk::PipelineLayoutCreateInfo::default().set_layouts(&[descriptor_set_layout]),
                    None,
                )
                .context("Failed to create pipeline layout")?;

            let pipeline = {
                let shader_module = self
                    .device
                    .create_shader_module(
                        &vk::ShaderModuleCreateInfo::default().code(&kernel.spirv),
                        None,
                    )
                    .context("Failed to create shader module")?;
                let entry_point = CString::new(kernel.entry_point)?;
                let pipeline = self
                    .device
                    .create_compute_pipelines(
                        vk::PipelineCache::null(),
                        &[vk::ComputePipelineCreateInfo::default()
                            .stage(
                                vk::PipelineShaderStageCreateInfo::default()
                                    .stage(vk::ShaderStageFlags::COMPUTE)
                                    .module(shader_module)
                                    .name(&entry_point),
                            )
                            .layout(pipeline_layout)],
                        None,
                    )
                    .map_err(|(_, e)| e)
                    .context("Failed to create compute pipeline")?[0];
                self.device.destroy_shader_module(shader_module, None);
                pipeline
            };

            let input_buffer = self.create_buffer(buffer_size, Some(input_bytes))?;
            let output_buffer =
                self.create_buffer(buffer_size, Some(&vec![0u8; buffer_size as usize]))?;

            let descriptor_pool = self
                .device
                .create_descriptor_pool(
                    &vk::DescriptorPoolCreateInfo::default()
                        .pool_sizes(&[vk::DescriptorPoolSize {
                            ty: vk::DescriptorType::STORAGE_BUFFER,
                            descriptor_count: 2,
                        }])
                        .max_sets(1),
                    None,
                )
                .context("Failed to create descriptor pool")?;
            let descriptor_set = self
                .device
                .allocate_descriptor_sets(
                    &vk::DescriptorSetAllocateInfo::default()
                        .descriptor_pool(descriptor_pool)
                        .set_layouts(&[descriptor_set_layout]),
                )
                .context("Failed to allocate descriptor sets")?[0];

            {
                let buffer_infos = [&input_buffer, &output_buffer].map(|buffer| {
                    vk::DescriptorBufferInfo::default()
                        .buffer(buffer.buffer)
                        .offset(0)
                        .range(vk::WHOLE_SIZE)
                });
                let descriptor_writes = [INPUT_BINDING, OUTPUT_BINDING].map(|binding| {
                    vk::WriteDescriptorSet::default()
                        .dst_set(descriptor_set)
                        .dst_binding(binding)
                        .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                        .descriptor_count(1)
                        .buffer_info(std::slice::from_ref(&buffer_infos[binding as usize]))
                });
                self.device.update_descriptor_sets(&descriptor_writes, &[]);
            }

            let command_buffer = self
                .device
                .allocate_command_buffers(
                    &vk::CommandBufferAllocateInfo::default()
                        .command_pool(self.command_pool)
                        .level(vk::CommandBufferLevel::PRIMARY)
                        .command_buffer_count(1),
                )
                .context("Failed to allocate command buffer")?[0];

            self.device
                .begin_command_buffer(
                    command_buffer,
                    &vk::CommandBufferBeginInfo::default()
                        .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
                )
                .context("Failed to begin command buffer")?;
            self.device
                .cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::COMPUTE, pipeline);
            self.device.cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::COMPUTE,
                pipeline_layout,
                0,
                &[descriptor_set],
                &[],
            );
            self.device.cmd_dispatch(command_buffer, groups, 1, 1);
            self.device
                .end_command_buffer(command_buffer)
                .context("Failed to end command buffer")?;

            self.device
                .queue_submit(
                    self.queue,
                    &[vk::SubmitInfo::default().command_buffers(&[command_buffer])],
                    vk::Fence::null(),
                )
                .context("Failed to submit queue")?;
            self.device
                .queue_wait_idle(self.queue)
                .context("Failed to wait for queue")?;

            let mut result = vec![0u8; buffer_size as usize];
            let mut output_buffer = output_buffer;
            output_buffer.block.read_bytes(
                AshMemoryDevice::wrap(&self.device),
                0,
                &mut result,
            )?;

            self.device
                .free_command_buffers(self.command_pool, &[command_buffer]);
            self.destroy_buffer(input_buffer);
            self.destroy_buffer(output_buffer);
            self.device.destroy_descriptor_pool(descriptor_pool, None);
            self.device.destroy_pipeline(pipeline, None);
            self.device.destroy_pipeline_layout(pipeline_layout, None);
            self.device
                .destroy_descriptor_set_layout(descriptor_set_layout, None);

            Ok(result)
        }
    }
}

impl Drop for AshBackend {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}
