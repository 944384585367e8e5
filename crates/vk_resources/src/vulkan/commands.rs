//! One-shot transfer command buffers
//!
//! Load-time uploads, layout transitions and mip generation are recorded into
//! a single-use command buffer, submitted, and waited on with a full queue
//! idle. Every transfer is therefore a synchronous stall point, which is
//! acceptable for setup work but serializes all transfers on the queue.
//!
//! The command pool and queue belong to the caller. A pool must only be used
//! from one thread, so threads loading assets concurrently each need their own
//! `TransferContext` over their own pool.

use std::sync::Arc;

use ash::vk;

use crate::vulkan::layout::{BarrierMasks, ImageLayout};
use crate::vulkan::{GpuBuffer, GpuContext, VulkanError, VulkanResult};

/// Issues one-shot command buffers from a caller-owned pool to a
/// caller-owned queue
pub struct TransferContext {
    context: Arc<GpuContext>,
    command_pool: vk::CommandPool,
    queue: vk::Queue,
}

impl TransferContext {
    /// Wrap a command pool and a transfer-capable queue of the same family
    pub fn new(context: Arc<GpuContext>, command_pool: vk::CommandPool, queue: vk::Queue) -> Self {
        Self {
            context,
            command_pool,
            queue,
        }
    }

    /// Get the shared device context
    pub const fn context(&self) -> &Arc<GpuContext> {
        &self.context
    }

    /// Allocate a primary command buffer and begin recording it for a single
    /// submission
    pub fn begin_one_shot(&self) -> VulkanResult<OneShotCommands<'_>> {
        let device = self.context.device();

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let command_buffer = unsafe {
            device
                .allocate_command_buffers(&alloc_info)
                .map_err(|result| VulkanError::ObjectCreation {
                    object: "command buffer",
                    result,
                })?
                .into_iter()
                .next()
                .ok_or_else(|| VulkanError::InvalidOperation {
                    reason: "Command buffer allocation returned no buffers".to_string(),
                })?
        };

        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        if let Err(result) = unsafe { device.begin_command_buffer(command_buffer, &begin_info) } {
            unsafe { device.free_command_buffers(self.command_pool, &[command_buffer]) };
            return Err(VulkanError::Api(result));
        }

        Ok(OneShotCommands {
            device: self.context.device(),
            command_buffer,
        })
    }

    /// End recording, submit, and block until the queue is idle. The command
    /// buffer is freed whether or not submission succeeds.
    pub fn end_and_submit(&self, commands: OneShotCommands<'_>) -> VulkanResult<()> {
        let device = self.context.device();
        let command_buffer = commands.command_buffer;

        let result = unsafe { self.submit_and_wait(command_buffer) };

        unsafe { device.free_command_buffers(self.command_pool, &[command_buffer]) };

        result
    }

    unsafe fn submit_and_wait(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        let device = self.context.device();

        device
            .end_command_buffer(command_buffer)
            .map_err(VulkanError::Api)?;

        let command_buffers = [command_buffer];
        let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);

        device
            .queue_submit(self.queue, &[submit_info.build()], vk::Fence::null())
            .map_err(VulkanError::Api)?;

        device.queue_wait_idle(self.queue).map_err(VulkanError::Api)
    }

    /// Record with `record` inside a one-shot command buffer and wait for it
    pub fn submit_one_shot<F>(&self, record: F) -> VulkanResult<()>
    where
        F: FnOnce(&OneShotCommands<'_>),
    {
        let commands = self.begin_one_shot()?;
        record(&commands);
        self.end_and_submit(commands)
    }

    /// Copy the first `size` bytes of `src` into `dst`
    pub fn copy_buffer(
        &self,
        src: &GpuBuffer,
        dst: &GpuBuffer,
        size: vk::DeviceSize,
    ) -> VulkanResult<()> {
        if size > src.size() || size > dst.size() {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "copy of {} bytes exceeds source ({}) or destination ({}) size",
                    size,
                    src.size(),
                    dst.size()
                ),
            });
        }

        log::trace!("Transfer: copying {} bytes between buffers", size);
        self.submit_one_shot(|cmd| cmd.copy_buffer(src.handle(), dst.handle(), size))
    }
}

/// A command buffer in the recording state, valid for one submission
pub struct OneShotCommands<'a> {
    device: &'a ash::Device,
    command_buffer: vk::CommandBuffer,
}

/// One image layout barrier over a range of mip levels
#[derive(Debug, Clone, Copy)]
pub struct ImageBarrier {
    /// Image being transitioned
    pub image: vk::Image,
    /// Aspect the barrier covers
    pub aspect: vk::ImageAspectFlags,
    /// Layout the levels are leaving
    pub from: ImageLayout,
    /// Layout the levels are entering
    pub to: ImageLayout,
    /// First mip level affected
    pub base_mip_level: u32,
    /// Number of mip levels affected
    pub level_count: u32,
    /// Access masks and stages
    pub masks: BarrierMasks,
}

impl OneShotCommands<'_> {
    /// Raw command buffer handle
    pub const fn handle(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    /// Record a single-region buffer copy
    pub fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) {
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };

        unsafe {
            self.device
                .cmd_copy_buffer(self.command_buffer, src, dst, &[region]);
        }
    }

    /// Record an image memory barrier
    pub fn image_barrier(&self, barrier: &ImageBarrier) {
        let image_barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(barrier.from.to_vk())
            .new_layout(barrier.to.to_vk())
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(barrier.image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: barrier.aspect,
                base_mip_level: barrier.base_mip_level,
                level_count: barrier.level_count,
                base_array_layer: 0,
                layer_count: 1,
            })
            .src_access_mask(barrier.masks.src_access)
            .dst_access_mask(barrier.masks.dst_access);

        unsafe {
            self.device.cmd_pipeline_barrier(
                self.command_buffer,
                barrier.masks.src_stage,
                barrier.masks.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[image_barrier.build()],
            );
        }
    }

    /// Record a tightly packed buffer copy into mip level 0 of an image in
    /// `TRANSFER_DST_OPTIMAL` layout
    pub fn copy_buffer_to_image(
        &self,
        buffer: vk::Buffer,
        image: vk::Image,
        width: u32,
        height: u32,
    ) {
        let region = vk::BufferImageCopy::builder()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
            .image_extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            });

        unsafe {
            self.device.cmd_copy_buffer_to_image(
                self.command_buffer,
                buffer,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region.build()],
            );
        }
    }

    /// Record a linear-filtered blit between two mip levels of one image
    pub fn blit_mip_level(
        &self,
        image: vk::Image,
        src_level: u32,
        src_extent: (i32, i32),
        dst_level: u32,
        dst_extent: (i32, i32),
    ) {
        let blit = vk::ImageBlit::builder()
            .src_offsets([
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D {
                    x: src_extent.0,
                    y: src_extent.1,
                    z: 1,
                },
            ])
            .src_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: src_level,
                base_array_layer: 0,
                layer_count: 1,
            })
            .dst_offsets([
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D {
                    x: dst_extent.0,
                    y: dst_extent.1,
                    z: 1,
                },
            ])
            .dst_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: dst_level,
                base_array_layer: 0,
                layer_count: 1,
            });

        unsafe {
            self.device.cmd_blit_image(
                self.command_buffer,
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit.build()],
                vk::Filter::LINEAR,
            );
        }
    }
}
