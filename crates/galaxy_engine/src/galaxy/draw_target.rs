//! Rasterization target
//!
//! The off-screen storage image the rasterizer writes, the uniform block it
//! reads, and descriptor set 0 binding both.

use ash::{vk, Device};
use bytemuck::{Pod, Zeroable};

use crate::render::vulkan::{
    Buffer, DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBuilder, DescriptorSetWriter,
    StorageImage, VulkanError, VulkanResult,
};

/// Uniform block of the rasterizer (std140)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct DrawUniforms {
    /// Starting color of every pixel
    pub background: [f32; 4],
    /// Non-zero when the swapchain stores blue first
    pub swap_red_blue: u32,
    _padding: [u32; 3],
}

impl DrawUniforms {
    /// Uniforms for a background and channel order
    pub fn new(background: [f32; 4], swap_red_blue: bool) -> Self {
        Self {
            background,
            swap_red_blue: u32::from(swap_red_blue),
            _padding: [0; 3],
        }
    }
}

/// Set 0 slots
pub const UNIFORMS_BINDING: u32 = 0;
/// Storage image slot in set 0
pub const IMAGE_BINDING: u32 = 1;

/// Layout of the draw descriptor set
pub fn draw_set_layout_builder() -> DescriptorSetLayoutBuilder {
    DescriptorSetLayoutBuilder::new()
        .add_uniform_buffer(UNIFORMS_BINDING, vk::ShaderStageFlags::COMPUTE)
        .add_storage_image(IMAGE_BINDING, vk::ShaderStageFlags::COMPUTE)
}

/// Intermediate image, uniforms and the set binding them
pub struct DrawTarget {
    image: StorageImage,
    _uniforms: Buffer,
    _pool: DescriptorPool,
    layout: DescriptorSetLayout,
    set: vk::DescriptorSet,
}

impl DrawTarget {
    /// Allocate the image, upload `uniforms` once and write the set
    pub fn new(
        device: &Device,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        extent: vk::Extent2D,
        uniforms: DrawUniforms,
    ) -> VulkanResult<Self> {
        let image = StorageImage::new(device.clone(), memory_properties, extent)?;

        let uniform_bytes = bytemuck::bytes_of(&uniforms);
        let uniform_buffer = Buffer::new(
            device.clone(),
            memory_properties,
            uniform_bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        uniform_buffer.write_bytes(uniform_bytes)?;

        let builder = draw_set_layout_builder();
        let pool = DescriptorPool::new(device.clone(), 1, &builder.pool_sizes())?;
        let layout = builder.build(device)?;
        let set = pool
            .allocate_descriptor_sets(&[layout.handle()])?
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::InitializationFailed("No draw descriptor set allocated".to_string()))?;

        DescriptorSetWriter::new()
            .write_uniform_buffer(set, UNIFORMS_BINDING, uniform_buffer.handle())
            .write_storage_image(set, IMAGE_BINDING, image.view(), vk::ImageLayout::GENERAL)
            .update(device);

        log::debug!(
            "Draw target ready: {}x{}, swap_red_blue={}",
            extent.width,
            extent.height,
            uniforms.swap_red_blue
        );

        Ok(Self {
            image,
            _uniforms: uniform_buffer,
            _pool: pool,
            layout,
            set,
        })
    }

    /// The rasterized image
    pub fn image(&self) -> vk::Image {
        self.image.handle()
    }

    /// Image size
    pub fn extent(&self) -> vk::Extent2D {
        self.image.extent()
    }

    /// Layout of set 0
    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout.handle()
    }

    /// Set 0
    pub fn descriptor_set(&self) -> vk::DescriptorSet {
        self.set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniforms_std140_size() {
        assert_eq!(std::mem::size_of::<DrawUniforms>(), 32);
        let uniforms = DrawUniforms::new([0.1, 0.2, 0.3, 1.0], true);
        let bytes = bytemuck::bytes_of(&uniforms);
        assert_eq!(&bytes[16..20], &1_u32.to_ne_bytes());
    }

    #[test]
    fn test_draw_layout_bindings() {
        let builder = draw_set_layout_builder();
        let bindings = builder.bindings();

        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].binding, UNIFORMS_BINDING);
        assert_eq!(bindings[0].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(bindings[1].binding, IMAGE_BINDING);
        assert_eq!(bindings[1].descriptor_type, vk::DescriptorType::STORAGE_IMAGE);
    }
}
