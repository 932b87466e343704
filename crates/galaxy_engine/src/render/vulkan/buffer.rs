//! Buffer management
//!
//! Plain device-memory buffers with one allocation each, plus the batched
//! staging-to-device copy used to upload star data.

use ash::{vk, Device};
use crate::render::vulkan::commands::CommandSink;
use crate::render::vulkan::{VulkanError, VulkanResult};

/// Find a memory type index allowed by `type_filter` that has all of `properties`
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> VulkanResult<u32> {
    (0..memory_properties.memory_type_count)
        .find(|&i| {
            (type_filter & (1 << i)) != 0
                && memory_properties.memory_types[i as usize]
                    .property_flags
                    .contains(properties)
        })
        .ok_or(VulkanError::NoSuitableMemoryType)
}

/// Buffer wrapper with memory management
pub struct Buffer {
    device: Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
}

impl Buffer {
    /// Create a new buffer with its own memory allocation
    pub fn new(
        device: Device,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe {
            device.create_buffer(&buffer_info, None)
                .map_err(VulkanError::Api)?
        };

        let mem_requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let memory_type_index = match find_memory_type(
            memory_properties,
            mem_requirements.memory_type_bits,
            properties,
        ) {
            Ok(index) => index,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(mem_requirements.size)
            .memory_type_index(memory_type_index);

        let memory = match unsafe { device.allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(VulkanError::Api(e));
            }
        };

        // Built before binding so Drop releases both on failure
        let wrapped = Self {
            device,
            buffer,
            memory,
            size,
        };

        unsafe {
            wrapped.device.bind_buffer_memory(buffer, memory, 0)
                .map_err(VulkanError::Api)?;
        }

        Ok(wrapped)
    }

    /// Host-visible, coherent buffer used as a copy source
    pub fn staging(
        device: Device,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        size: vk::DeviceSize,
    ) -> VulkanResult<Self> {
        Self::new(
            device,
            memory_properties,
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
    }

    /// Device-local storage buffer filled by transfer
    pub fn device_local_storage(
        device: Device,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        size: vk::DeviceSize,
    ) -> VulkanResult<Self> {
        Self::new(
            device,
            memory_properties,
            size,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )
    }

    /// Copy bytes into the start of a host-visible buffer
    pub fn write_bytes(&self, bytes: &[u8]) -> VulkanResult<()> {
        if bytes.len() as vk::DeviceSize > self.size {
            return Err(VulkanError::InvalidOperation {
                reason: format!("Write of {} bytes into {}-byte buffer", bytes.len(), self.size),
            });
        }

        unsafe {
            let data_ptr = self.device
                .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
                .map_err(VulkanError::Api)?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), data_ptr.cast::<u8>(), bytes.len());
            self.device.unmap_memory(self.memory);
        }
        Ok(())
    }

    /// Get buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Get size
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

/// Check that a batched copy has something to do and that its lists line up
pub fn validate_copy_lists(
    staging: &[vk::Buffer],
    device: &[vk::Buffer],
    sizes: &[vk::DeviceSize],
) -> VulkanResult<()> {
    if staging.is_empty() || device.is_empty() || sizes.is_empty() {
        return Err(VulkanError::EmptyBufferList);
    }
    if staging.len() != device.len() || staging.len() != sizes.len() {
        return Err(VulkanError::BufferCountMismatch {
            staging: staging.len(),
            device: device.len(),
            sizes: sizes.len(),
        });
    }
    Ok(())
}

/// Record one whole-range copy per `(staging[i], device[i], sizes[i])` triple
///
/// The lists are validated before anything is recorded, so a rejected batch
/// leaves the sink untouched.
pub fn record_buffer_copies(
    sink: &mut impl CommandSink,
    staging: &[vk::Buffer],
    device: &[vk::Buffer],
    sizes: &[vk::DeviceSize],
) -> VulkanResult<()> {
    validate_copy_lists(staging, device, sizes)?;

    sink.begin()?;
    for ((&src, &dst), &size) in staging.iter().zip(device).zip(sizes) {
        sink.copy_buffer(src, dst, size);
    }
    if let Err(e) = sink.end() {
        if let Err(reset) = sink.reset() {
            log::error!("[UPLOAD] Failed to reset command buffer after {}: {}", e, reset);
        }
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::vulkan::commands::recording::{Recorded, RecordingSink};
    use ash::vk::Handle;

    fn memory_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (i, &flags) in types.iter().enumerate() {
            props.memory_types[i].property_flags = flags;
        }
        props
    }

    fn buffers(raw: &[u64]) -> Vec<vk::Buffer> {
        raw.iter().map(|&r| vk::Buffer::from_raw(r)).collect()
    }

    #[test]
    fn test_find_memory_type_matches_properties() {
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);

        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        assert_eq!(find_memory_type(&props, 0b11, host).unwrap(), 1);
        assert_eq!(find_memory_type(&props, 0b11, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(), 0);
    }

    #[test]
    fn test_find_memory_type_honours_filter() {
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);

        assert_eq!(find_memory_type(&props, 0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(), 1);
        assert!(matches!(
            find_memory_type(&props, 0b01, vk::MemoryPropertyFlags::HOST_VISIBLE),
            Err(VulkanError::NoSuitableMemoryType)
        ));
    }

    #[test]
    fn test_copies_recorded_in_order() {
        let staging = buffers(&[1, 2, 3]);
        let device = buffers(&[11, 12, 13]);
        let sizes = [24, 12, 4];
        let mut sink = RecordingSink::default();

        record_buffer_copies(&mut sink, &staging, &device, &sizes).unwrap();

        assert_eq!(sink.commands.len(), 5);
        assert_eq!(sink.commands[0], Recorded::Begin);
        assert_eq!(
            sink.commands[2],
            Recorded::CopyBuffer { src: staging[1], dst: device[1], size: 12 }
        );
        assert_eq!(sink.commands[4], Recorded::End);
    }

    #[test]
    fn test_mismatched_lists_record_nothing() {
        let mut sink = RecordingSink::default();

        let result = record_buffer_copies(
            &mut sink,
            &buffers(&[1, 2, 3]),
            &buffers(&[11, 12, 13, 14]),
            &[4, 4, 4],
        );

        assert!(matches!(
            result,
            Err(VulkanError::BufferCountMismatch { staging: 3, device: 4, sizes: 3 })
        ));
        assert!(sink.commands.is_empty());
    }

    #[test]
    fn test_empty_lists_rejected() {
        let mut sink = RecordingSink::default();

        let result = record_buffer_copies(&mut sink, &[], &[], &[]);

        assert!(matches!(result, Err(VulkanError::EmptyBufferList)));
        assert!(sink.commands.is_empty());
    }

    #[test]
    fn test_failed_end_resets_sink() {
        let mut sink = RecordingSink {
            fail_end: true,
            ..RecordingSink::default()
        };

        let result = record_buffer_copies(&mut sink, &buffers(&[1]), &buffers(&[11]), &[4]);

        assert!(matches!(result, Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY))));
        assert_eq!(sink.commands.last(), Some(&Recorded::Reset));
    }
}
