//! Buffer management for vertex data, index data and staging
//!
//! Every buffer owns exactly one device memory allocation. The buffer object
//! is destroyed before its memory is freed, exactly once, when the wrapper is
//! dropped.

use std::sync::Arc;

use ash::vk;
use bytemuck::Pod;

use crate::vulkan::memory::allocate_buffer;
use crate::vulkan::{GpuContext, TransferContext, VulkanError, VulkanResult};

/// Buffer wrapper with memory management
pub struct GpuBuffer {
    context: Arc<GpuContext>,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
}

impl GpuBuffer {
    /// Create a buffer with the given usage backed by memory with `properties`
    pub fn new(
        context: &Arc<GpuContext>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<Self> {
        if size == 0 {
            return Err(VulkanError::InvalidOperation {
                reason: "Buffer size must be non-zero".to_string(),
            });
        }

        let (buffer, memory) = allocate_buffer(context, size, usage, properties)?;

        Ok(Self {
            context: Arc::clone(context),
            buffer,
            memory,
            size,
        })
    }

    /// Host-visible, coherent transfer source filled with `data`
    pub fn staging_from_slice<T: Pod>(context: &Arc<GpuContext>, data: &[T]) -> VulkanResult<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(data);

        let staging = Self::new(
            context,
            bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        staging.write_slice(data)?;

        Ok(staging)
    }

    /// Device-local buffer with `usage` (plus transfer destination) holding
    /// `data`, uploaded through a temporary staging buffer.
    ///
    /// Blocks until the copy has completed; the staging buffer is released
    /// before returning.
    pub fn device_local_from_slice<T: Pod>(
        context: &Arc<GpuContext>,
        transfer: &TransferContext,
        data: &[T],
        usage: vk::BufferUsageFlags,
    ) -> VulkanResult<Self> {
        let staging = Self::staging_from_slice(context, data)?;

        let buffer = Self::new(
            context,
            staging.size(),
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        transfer.copy_buffer(&staging, &buffer, staging.size())?;

        log::debug!("Uploaded {} bytes to device-local buffer ({:?})", buffer.size, usage);
        Ok(buffer)
    }

    /// Copy `data` into host-visible memory through a temporary mapping
    pub fn write_slice<T: Pod>(&self, data: &[T]) -> VulkanResult<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let len = bytes.len() as vk::DeviceSize;

        if len > self.size {
            return Err(VulkanError::InvalidOperation {
                reason: format!("write of {} bytes exceeds buffer size {}", len, self.size),
            });
        }

        let device = self.context.device();
        unsafe {
            let ptr = device
                .map_memory(self.memory, 0, len, vk::MemoryMapFlags::empty())
                .map_err(VulkanError::Api)?
                .cast::<u8>();
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len());
            device.unmap_memory(self.memory);
        }

        Ok(())
    }

    /// Get buffer handle
    pub const fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Get backing memory handle
    pub const fn memory(&self) -> vk::DeviceMemory {
        self.memory
    }

    /// Get size in bytes
    pub const fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        let device = self.context.device();
        unsafe {
            device.destroy_buffer(self.buffer, None);
            device.free_memory(self.memory, None);
        }
    }
}

/// Device-local vertex buffer
pub struct VertexBuffer {
    buffer: GpuBuffer,
    vertex_count: u32,
}

impl VertexBuffer {
    /// Upload `vertices` into a device-local vertex buffer
    pub fn new<V: Pod>(
        context: &Arc<GpuContext>,
        transfer: &TransferContext,
        vertices: &[V],
    ) -> VulkanResult<Self> {
        let buffer = GpuBuffer::device_local_from_slice(
            context,
            transfer,
            vertices,
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;

        Ok(Self {
            buffer,
            vertex_count: element_count(vertices.len())?,
        })
    }

    /// Get buffer handle
    pub const fn handle(&self) -> vk::Buffer {
        self.buffer.handle()
    }

    /// Number of vertices
    pub const fn vertex_count(&self) -> u32 {
        self.vertex_count
    }
}

/// Device-local 32-bit index buffer
pub struct IndexBuffer {
    buffer: GpuBuffer,
    index_count: u32,
}

impl IndexBuffer {
    /// Upload `indices` into a device-local index buffer
    pub fn new(
        context: &Arc<GpuContext>,
        transfer: &TransferContext,
        indices: &[u32],
    ) -> VulkanResult<Self> {
        let buffer = GpuBuffer::device_local_from_slice(
            context,
            transfer,
            indices,
            vk::BufferUsageFlags::INDEX_BUFFER,
        )?;

        Ok(Self {
            buffer,
            index_count: element_count(indices.len())?,
        })
    }

    /// Get buffer handle
    pub const fn handle(&self) -> vk::Buffer {
        self.buffer.handle()
    }

    /// Index element type
    pub const fn index_type(&self) -> vk::IndexType {
        vk::IndexType::UINT32
    }

    /// Number of indices
    pub const fn index_count(&self) -> u32 {
        self.index_count
    }
}

fn element_count(len: usize) -> VulkanResult<u32> {
    u32::try_from(len).map_err(|_| VulkanError::InvalidOperation {
        reason: format!("{} elements exceed the 32-bit draw count limit", len),
    })
}
