//! Device memory selection and binding
//!
//! Buffers and images are backed by one dedicated allocation each, bound at
//! offset 0. Allocation failures are returned to the caller and never
//! retried.

use ash::vk;

use crate::vulkan::{GpuContext, VulkanError, VulkanResult};

/// Find the lowest memory type index allowed by `type_filter` whose property
/// flags contain all of `properties`
pub fn find_memory_type(
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
) -> VulkanResult<u32> {
    let count = memory_properties.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32);

    (0..count)
        .find(|&i| {
            (type_filter & (1 << i)) != 0
                && memory_properties.memory_types[i as usize]
                    .property_flags
                    .contains(properties)
        })
        .ok_or(VulkanError::NoSuitableMemoryType {
            type_filter,
            properties,
        })
}

/// Allocate exactly `requirements.size` bytes from a memory type matching
/// the requirements and `properties`
fn allocate_memory(
    context: &GpuContext,
    requirements: vk::MemoryRequirements,
    properties: vk::MemoryPropertyFlags,
) -> VulkanResult<vk::DeviceMemory> {
    let memory_type_index = find_memory_type(
        requirements.memory_type_bits,
        properties,
        context.memory_properties(),
    )?;

    let alloc_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);

    unsafe {
        context
            .device()
            .allocate_memory(&alloc_info, None)
            .map_err(|result| VulkanError::MemoryAllocation {
                size: requirements.size,
                result,
            })
    }
}

/// Create a buffer with the requested usage and bind freshly allocated memory
/// to it. On failure nothing is left allocated.
pub fn allocate_buffer(
    context: &GpuContext,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    properties: vk::MemoryPropertyFlags,
) -> VulkanResult<(vk::Buffer, vk::DeviceMemory)> {
    let device = context.device();

    let buffer_info = vk::BufferCreateInfo::builder()
        .size(size)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let buffer = unsafe {
        device
            .create_buffer(&buffer_info, None)
            .map_err(|result| VulkanError::ObjectCreation {
                object: "buffer",
                result,
            })?
    };

    let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

    let memory = match allocate_memory(context, requirements, properties) {
        Ok(memory) => memory,
        Err(err) => {
            unsafe { device.destroy_buffer(buffer, None) };
            return Err(err);
        }
    };

    if let Err(result) = unsafe { device.bind_buffer_memory(buffer, memory, 0) } {
        unsafe {
            device.destroy_buffer(buffer, None);
            device.free_memory(memory, None);
        }
        return Err(VulkanError::Api(result));
    }

    Ok((buffer, memory))
}

/// Create an image from `create_info` and bind freshly allocated memory to
/// it. On failure nothing is left allocated.
pub fn allocate_image(
    context: &GpuContext,
    create_info: &vk::ImageCreateInfo,
    properties: vk::MemoryPropertyFlags,
) -> VulkanResult<(vk::Image, vk::DeviceMemory)> {
    let device = context.device();

    let image = unsafe {
        device
            .create_image(create_info, None)
            .map_err(|result| VulkanError::ObjectCreation {
                object: "image",
                result,
            })?
    };

    let requirements = unsafe { device.get_image_memory_requirements(image) };

    let memory = match allocate_memory(context, requirements, properties) {
        Ok(memory) => memory,
        Err(err) => {
            unsafe { device.destroy_image(image, None) };
            return Err(err);
        }
    };

    if let Err(result) = unsafe { device.bind_image_memory(image, memory, 0) } {
        unsafe {
            device.destroy_image(image, None);
            device.free_memory(memory, None);
        }
        return Err(VulkanError::Api(result));
    }

    Ok((image, memory))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_table(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut table = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (i, &property_flags) in flags.iter().enumerate() {
            table.memory_types[i] = vk::MemoryType {
                property_flags,
                heap_index: 0,
            };
        }
        table
    }

    #[test]
    fn test_lowest_index_satisfying_filter_and_properties() {
        let table = memory_table(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);

        // Indices 0 and 2 pass the filter; only 2 has the properties
        let index = find_memory_type(
            0b0101,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            &table,
        )
        .unwrap();

        assert_eq!(index, 2);
    }

    #[test]
    fn test_superset_of_properties_matches() {
        let table = memory_table(&[
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE,
        ]);

        let index = find_memory_type(0b11, vk::MemoryPropertyFlags::DEVICE_LOCAL, &table).unwrap();
        assert_eq!(index, 1);
    }

    #[test]
    fn test_no_suitable_memory_type() {
        let table = memory_table(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
        ]);

        let result = find_memory_type(0b01, vk::MemoryPropertyFlags::HOST_VISIBLE, &table);
        assert!(matches!(
            result,
            Err(VulkanError::NoSuitableMemoryType { type_filter: 0b01, .. })
        ));
    }

    #[test]
    fn test_filter_bits_beyond_type_count_are_ignored() {
        let table = memory_table(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);

        let result = find_memory_type(0b10, vk::MemoryPropertyFlags::empty(), &table);
        assert!(result.is_err());
    }
}
