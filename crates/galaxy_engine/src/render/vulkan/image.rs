//! Storage image and image layout transitions

use ash::{vk, Device};
use crate::render::vulkan::buffer::find_memory_type;
use crate::render::vulkan::{VulkanError, VulkanResult};

/// Format the rasterizer writes; matches `rgba8` in the shader
pub const STORAGE_IMAGE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

/// A layout transition ready to record
#[derive(Debug, Clone, Copy)]
pub struct LayoutTransition {
    /// Barrier carrying the layout change and access masks
    pub barrier: vk::ImageMemoryBarrier,
    /// Stage that must finish before the transition
    pub src_stage: vk::PipelineStageFlags,
    /// Stage that waits for the transition
    pub dst_stage: vk::PipelineStageFlags,
}

/// Build the barrier for one of the transitions the frame uses
///
/// `UNDEFINED → TRANSFER_DST` waits on color attachment output, the stage the
/// acquire semaphore is waited at, so it is ordered after the acquire.
pub fn image_layout_barrier(
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> VulkanResult<LayoutTransition> {
    use vk::AccessFlags as A;
    use vk::ImageLayout as L;
    use vk::PipelineStageFlags as S;

    let (src_access, dst_access, src_stage, dst_stage) = match (old_layout, new_layout) {
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => {
            (A::empty(), A::TRANSFER_WRITE, S::COLOR_ATTACHMENT_OUTPUT, S::TRANSFER)
        }
        (L::UNDEFINED, L::GENERAL) => {
            (A::empty(), A::SHADER_WRITE, S::TOP_OF_PIPE, S::COMPUTE_SHADER)
        }
        (L::GENERAL, L::TRANSFER_SRC_OPTIMAL) => {
            (A::SHADER_WRITE, A::TRANSFER_READ, S::COMPUTE_SHADER, S::TRANSFER)
        }
        (L::TRANSFER_DST_OPTIMAL, L::PRESENT_SRC_KHR) => {
            (A::TRANSFER_WRITE, A::empty(), S::TRANSFER, S::BOTTOM_OF_PIPE)
        }
        _ => {
            return Err(VulkanError::InvalidOperation {
                reason: format!("Unsupported layout transition {:?} -> {:?}", old_layout, new_layout),
            })
        }
    };

    let barrier = vk::ImageMemoryBarrier::builder()
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(COLOR_RANGE)
        .build();

    Ok(LayoutTransition {
        barrier,
        src_stage,
        dst_stage,
    })
}

/// Device-local image the rasterizer writes and the frame copies from
pub struct StorageImage {
    device: Device,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    extent: vk::Extent2D,
}

impl StorageImage {
    /// Create an RGBA8 storage image usable as a transfer source
    pub fn new(
        device: Device,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(STORAGE_IMAGE_FORMAT)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::TRANSFER_SRC)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe {
            device.create_image(&image_info, None)
                .map_err(VulkanError::Api)?
        };

        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let memory_type_index = match find_memory_type(
            memory_properties,
            requirements.memory_type_bits,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ) {
            Ok(index) => index,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        let memory = match unsafe { device.allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(VulkanError::Api(e));
            }
        };

        let mut storage = Self {
            device,
            image,
            memory,
            view: vk::ImageView::null(),
            extent,
        };

        unsafe {
            storage.device.bind_image_memory(image, memory, 0)
                .map_err(VulkanError::Api)?;
        }

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(STORAGE_IMAGE_FORMAT)
            .subresource_range(COLOR_RANGE);

        storage.view = unsafe {
            storage.device.create_image_view(&view_info, None)
                .map_err(VulkanError::Api)?
        };

        log::debug!("Created {}x{} storage image", extent.width, extent.height);
        Ok(storage)
    }

    /// Get image handle
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    /// Get the view bound to the rasterizer
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Get extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for StorageImage {
    fn drop(&mut self) {
        unsafe {
            // Destroying a null view is a no-op
            self.device.destroy_image_view(self.view, None);
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_swapchain_acquire_transition() {
        let image = vk::Image::from_raw(3);
        let t = image_layout_barrier(image, vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .unwrap();

        assert_eq!(t.barrier.image, image);
        assert_eq!(t.barrier.dst_access_mask, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(t.src_stage, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(t.dst_stage, vk::PipelineStageFlags::TRANSFER);
    }

    #[test]
    fn test_rasterized_image_to_copy_source() {
        let t = image_layout_barrier(
            vk::Image::from_raw(4),
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        )
        .unwrap();

        assert_eq!(t.barrier.src_access_mask, vk::AccessFlags::SHADER_WRITE);
        assert_eq!(t.barrier.dst_access_mask, vk::AccessFlags::TRANSFER_READ);
        assert_eq!(t.src_stage, vk::PipelineStageFlags::COMPUTE_SHADER);
    }

    #[test]
    fn test_present_transition() {
        let t = image_layout_barrier(
            vk::Image::from_raw(5),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        )
        .unwrap();

        assert_eq!(t.barrier.src_access_mask, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(t.dst_stage, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
        assert_eq!(t.barrier.subresource_range.layer_count, 1);
    }

    #[test]
    fn test_unknown_transition_rejected() {
        let result = image_layout_barrier(
            vk::Image::from_raw(6),
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::ImageLayout::GENERAL,
        );
        assert!(matches!(result, Err(VulkanError::InvalidOperation { .. })));
    }
}
