//! Command pool and command buffer recording
//!
//! Recording goes through the [`CommandSink`] trait so the frame and upload
//! sequences can be recorded into something other than a real command buffer.

use ash::{vk, Device};
use crate::render::vulkan::{VulkanError, VulkanResult};

/// Command pool wrapper with RAII cleanup
pub struct CommandPool {
    device: Device,
    command_pool: vk::CommandPool,
}

impl CommandPool {
    /// Create a new command pool whose buffers can be reset individually
    pub fn new(device: Device, queue_family_index: u32) -> VulkanResult<Self> {
        let pool_create_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family_index);

        let command_pool = unsafe {
            device.create_command_pool(&pool_create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self {
            device,
            command_pool,
        })
    }

    /// Allocate primary command buffers
    pub fn allocate_command_buffers(&self, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        unsafe {
            self.device.allocate_command_buffers(&alloc_info)
                .map_err(VulkanError::Api)
        }
    }

    /// Allocate one reusable command buffer
    pub fn allocate_command_buffer(&self) -> VulkanResult<vk::CommandBuffer> {
        self.allocate_command_buffers(1)?
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::InitializationFailed(
                "Driver returned no command buffer".to_string()
            ))
    }

    /// Get the command pool handle
    pub fn handle(&self) -> vk::CommandPool {
        self.command_pool
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            // Frees every command buffer allocated from it
            self.device.destroy_command_pool(self.command_pool, None);
        }
    }
}

/// Destination for recorded GPU commands
///
/// Only the commands the star renderer issues are exposed. Everything
/// dispatched here is compute or transfer work.
pub trait CommandSink {
    /// Start a one-time-submit recording, resetting previous contents
    fn begin(&mut self) -> VulkanResult<()>;

    /// Finish recording
    fn end(&mut self) -> VulkanResult<()>;

    /// Discard a partial recording so the next `begin` starts clean
    fn reset(&mut self) -> VulkanResult<()>;

    /// Copy `size` bytes from the start of `src` to the start of `dst`
    fn copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize);

    /// Record buffer memory barriers between two pipeline stages
    fn buffer_barriers(
        &mut self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barriers: &[vk::BufferMemoryBarrier],
    );

    /// Record a single image memory barrier between two pipeline stages
    fn image_barrier(
        &mut self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barrier: vk::ImageMemoryBarrier,
    );

    /// Bind a compute pipeline
    fn bind_compute_pipeline(&mut self, pipeline: vk::Pipeline);

    /// Bind descriptor sets at the compute bind point starting at set 0
    fn bind_descriptor_sets(&mut self, layout: vk::PipelineLayout, sets: &[vk::DescriptorSet]);

    /// Push constant bytes visible to the compute stage
    fn push_constants(&mut self, layout: vk::PipelineLayout, bytes: &[u8]);

    /// Dispatch compute workgroups
    fn dispatch(&mut self, x: u32, y: u32, z: u32);

    /// Copy a color image region of `extent` from TRANSFER_SRC to TRANSFER_DST layout
    fn copy_image(&mut self, src: vk::Image, dst: vk::Image, extent: vk::Extent2D);
}

/// Records into a real Vulkan command buffer
pub struct CommandRecorder {
    command_buffer: vk::CommandBuffer,
    device: Device,
    recording: bool,
}

impl CommandRecorder {
    /// Create a new command recorder
    pub fn new(command_buffer: vk::CommandBuffer, device: Device) -> Self {
        Self {
            command_buffer,
            device,
            recording: false,
        }
    }

    /// Get the command buffer handle
    pub fn handle(&self) -> vk::CommandBuffer {
        self.command_buffer
    }
}

impl CommandSink for CommandRecorder {
    fn begin(&mut self) -> VulkanResult<()> {
        if self.recording {
            return Err(VulkanError::InvalidOperation {
                reason: "Command buffer already recording".to_string()
            });
        }

        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            self.device.begin_command_buffer(self.command_buffer, &begin_info)
                .map_err(VulkanError::Api)?;
        }

        self.recording = true;
        Ok(())
    }

    fn end(&mut self) -> VulkanResult<()> {
        if !self.recording {
            return Err(VulkanError::InvalidOperation {
                reason: "Command buffer not recording".to_string()
            });
        }

        unsafe {
            self.device.end_command_buffer(self.command_buffer)
                .map_err(VulkanError::Api)?;
        }

        self.recording = false;
        Ok(())
    }

    fn reset(&mut self) -> VulkanResult<()> {
        unsafe {
            self.device
                .reset_command_buffer(self.command_buffer, vk::CommandBufferResetFlags::empty())
                .map_err(VulkanError::Api)?;
        }

        self.recording = false;
        Ok(())
    }

    fn copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) {
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        unsafe {
            self.device.cmd_copy_buffer(self.command_buffer, src, dst, &[region]);
        }
    }

    fn buffer_barriers(
        &mut self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barriers: &[vk::BufferMemoryBarrier],
    ) {
        unsafe {
            self.device.cmd_pipeline_barrier(
                self.command_buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                barriers,
                &[],
            );
        }
    }

    fn image_barrier(
        &mut self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barrier: vk::ImageMemoryBarrier,
    ) {
        unsafe {
            self.device.cmd_pipeline_barrier(
                self.command_buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }

    fn bind_compute_pipeline(&mut self, pipeline: vk::Pipeline) {
        unsafe {
            self.device.cmd_bind_pipeline(self.command_buffer, vk::PipelineBindPoint::COMPUTE, pipeline);
        }
    }

    fn bind_descriptor_sets(&mut self, layout: vk::PipelineLayout, sets: &[vk::DescriptorSet]) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                self.command_buffer,
                vk::PipelineBindPoint::COMPUTE,
                layout,
                0,
                sets,
                &[],
            );
        }
    }

    fn push_constants(&mut self, layout: vk::PipelineLayout, bytes: &[u8]) {
        unsafe {
            self.device.cmd_push_constants(
                self.command_buffer,
                layout,
                vk::ShaderStageFlags::COMPUTE,
                0,
                bytes,
            );
        }
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        unsafe {
            self.device.cmd_dispatch(self.command_buffer, x, y, z);
        }
    }

    fn copy_image(&mut self, src: vk::Image, dst: vk::Image, extent: vk::Extent2D) {
        let subresource = vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        };
        let region = vk::ImageCopy {
            src_subresource: subresource,
            src_offset: vk::Offset3D::default(),
            dst_subresource: subresource,
            dst_offset: vk::Offset3D::default(),
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
        };
        unsafe {
            self.device.cmd_copy_image(
                self.command_buffer,
                src,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
    }
}

/// Submit one recorded command buffer
///
/// Each `(semaphore, stage)` pair in `waits` is waited on at that stage;
/// `fence` is signaled when the work completes.
pub fn submit_commands(
    device: &Device,
    queue: vk::Queue,
    command_buffer: vk::CommandBuffer,
    waits: &[(vk::Semaphore, vk::PipelineStageFlags)],
    fence: vk::Fence,
) -> VulkanResult<()> {
    let wait_semaphores: Vec<vk::Semaphore> = waits.iter().map(|&(s, _)| s).collect();
    let wait_stages: Vec<vk::PipelineStageFlags> = waits.iter().map(|&(_, stage)| stage).collect();
    let command_buffers = [command_buffer];

    let submit_info = vk::SubmitInfo::builder()
        .wait_semaphores(&wait_semaphores)
        .wait_dst_stage_mask(&wait_stages)
        .command_buffers(&command_buffers)
        .build();

    unsafe {
        device.queue_submit(queue, &[submit_info], fence)
            .map_err(VulkanError::Api)
    }
}

/// Command log used by unit tests in place of a real command buffer
#[cfg(test)]
pub(crate) mod recording {
    use super::*;

    /// One recorded command, with just enough detail to assert ordering
    #[derive(Debug, Clone, PartialEq)]
    pub enum Recorded {
        Begin,
        End,
        Reset,
        CopyBuffer { src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize },
        BufferBarriers {
            src_stage: vk::PipelineStageFlags,
            dst_stage: vk::PipelineStageFlags,
            /// (buffer, src_access, dst_access)
            barriers: Vec<(vk::Buffer, vk::AccessFlags, vk::AccessFlags)>,
        },
        ImageBarrier {
            image: vk::Image,
            old_layout: vk::ImageLayout,
            new_layout: vk::ImageLayout,
            src_stage: vk::PipelineStageFlags,
            dst_stage: vk::PipelineStageFlags,
        },
        BindPipeline(vk::Pipeline),
        BindDescriptorSets(Vec<vk::DescriptorSet>),
        PushConstants(Vec<u8>),
        Dispatch(u32, u32, u32),
        CopyImage { src: vk::Image, dst: vk::Image, extent: (u32, u32) },
    }

    #[derive(Default)]
    pub struct RecordingSink {
        pub commands: Vec<Recorded>,
        /// Make `end` fail with `ERROR_OUT_OF_DEVICE_MEMORY`
        pub fail_end: bool,
    }

    impl CommandSink for RecordingSink {
        fn begin(&mut self) -> VulkanResult<()> {
            self.commands.push(Recorded::Begin);
            Ok(())
        }

        fn end(&mut self) -> VulkanResult<()> {
            if self.fail_end {
                return Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
            }
            self.commands.push(Recorded::End);
            Ok(())
        }

        fn reset(&mut self) -> VulkanResult<()> {
            self.commands.push(Recorded::Reset);
            Ok(())
        }

        fn copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) {
            self.commands.push(Recorded::CopyBuffer { src, dst, size });
        }

        fn buffer_barriers(
            &mut self,
            src_stage: vk::PipelineStageFlags,
            dst_stage: vk::PipelineStageFlags,
            barriers: &[vk::BufferMemoryBarrier],
        ) {
            self.commands.push(Recorded::BufferBarriers {
                src_stage,
                dst_stage,
                barriers: barriers
                    .iter()
                    .map(|b| (b.buffer, b.src_access_mask, b.dst_access_mask))
                    .collect(),
            });
        }

        fn image_barrier(
            &mut self,
            src_stage: vk::PipelineStageFlags,
            dst_stage: vk::PipelineStageFlags,
            barrier: vk::ImageMemoryBarrier,
        ) {
            self.commands.push(Recorded::ImageBarrier {
                image: barrier.image,
                old_layout: barrier.old_layout,
                new_layout: barrier.new_layout,
                src_stage,
                dst_stage,
            });
        }

        fn bind_compute_pipeline(&mut self, pipeline: vk::Pipeline) {
            self.commands.push(Recorded::BindPipeline(pipeline));
        }

        fn bind_descriptor_sets(&mut self, _layout: vk::PipelineLayout, sets: &[vk::DescriptorSet]) {
            self.commands.push(Recorded::BindDescriptorSets(sets.to_vec()));
        }

        fn push_constants(&mut self, _layout: vk::PipelineLayout, bytes: &[u8]) {
            self.commands.push(Recorded::PushConstants(bytes.to_vec()));
        }

        fn dispatch(&mut self, x: u32, y: u32, z: u32) {
            self.commands.push(Recorded::Dispatch(x, y, z));
        }

        fn copy_image(&mut self, src: vk::Image, dst: vk::Image, extent: vk::Extent2D) {
            self.commands.push(Recorded::CopyImage {
                src,
                dst,
                extent: (extent.width, extent.height),
            });
        }
    }
}
