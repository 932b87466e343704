//! Descriptor set layouts, pools and writes

use ash::{vk, Device};
use crate::render::vulkan::{VulkanError, VulkanResult};

/// Descriptor set layout builder for creating reusable layouts
#[derive(Default)]
pub struct DescriptorSetLayoutBuilder {
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
}

impl DescriptorSetLayoutBuilder {
    /// Create a new descriptor set layout builder
    pub fn new() -> Self {
        Self::default()
    }

    fn add(mut self, binding: u32, ty: vk::DescriptorType, stage_flags: vk::ShaderStageFlags) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(ty)
                .descriptor_count(1)
                .stage_flags(stage_flags)
                .build()
        );
        self
    }

    /// Add a uniform buffer binding
    pub fn add_uniform_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add(binding, vk::DescriptorType::UNIFORM_BUFFER, stage_flags)
    }

    /// Add a storage buffer binding
    pub fn add_storage_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add(binding, vk::DescriptorType::STORAGE_BUFFER, stage_flags)
    }

    /// Add a storage image binding
    pub fn add_storage_image(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add(binding, vk::DescriptorType::STORAGE_IMAGE, stage_flags)
    }

    /// Bindings added so far
    pub fn bindings(&self) -> &[vk::DescriptorSetLayoutBinding] {
        &self.bindings
    }

    /// Descriptor counts per type, for sizing a pool
    pub fn pool_sizes(&self) -> Vec<vk::DescriptorPoolSize> {
        let mut sizes: Vec<vk::DescriptorPoolSize> = Vec::new();
        for binding in &self.bindings {
            match sizes.iter_mut().find(|s| s.ty == binding.descriptor_type) {
                Some(size) => size.descriptor_count += binding.descriptor_count,
                None => sizes.push(vk::DescriptorPoolSize {
                    ty: binding.descriptor_type,
                    descriptor_count: binding.descriptor_count,
                }),
            }
        }
        sizes
    }

    /// Build the descriptor set layout
    pub fn build(self, device: &Device) -> VulkanResult<DescriptorSetLayout> {
        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder()
            .bindings(&self.bindings);

        let layout = unsafe { device.create_descriptor_set_layout(&layout_info, None) }
            .map_err(VulkanError::Api)?;

        Ok(DescriptorSetLayout {
            layout,
            device: device.clone(),
            bindings: self.bindings,
        })
    }
}

/// Descriptor set layout wrapper with automatic cleanup
pub struct DescriptorSetLayout {
    layout: vk::DescriptorSetLayout,
    device: Device,
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
}

impl DescriptorSetLayout {
    /// Get the Vulkan descriptor set layout handle
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Get the bindings used in this layout
    pub fn bindings(&self) -> &[vk::DescriptorSetLayoutBinding] {
        &self.bindings
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Descriptor pool for allocating descriptor sets
pub struct DescriptorPool {
    pool: vk::DescriptorPool,
    device: Device,
}

impl DescriptorPool {
    /// Create a pool holding exactly `pool_sizes` descriptors across `max_sets` sets
    pub fn new(device: Device, max_sets: u32, pool_sizes: &[vk::DescriptorPoolSize]) -> VulkanResult<Self> {
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);

        let pool = unsafe { device.create_descriptor_pool(&pool_info, None) }
            .map_err(VulkanError::Api)?;

        Ok(Self { pool, device })
    }

    /// Allocate one set per layout
    pub fn allocate_descriptor_sets(
        &self,
        layouts: &[vk::DescriptorSetLayout],
    ) -> VulkanResult<Vec<vk::DescriptorSet>> {
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(layouts);

        unsafe { self.device.allocate_descriptor_sets(&alloc_info) }
            .map_err(VulkanError::Api)
    }

    /// Get the pool handle
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            // Frees every set allocated from it
            self.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

enum PendingInfo {
    Buffer(vk::DescriptorBufferInfo),
    Image(vk::DescriptorImageInfo),
}

struct PendingWrite {
    set: vk::DescriptorSet,
    binding: u32,
    ty: vk::DescriptorType,
    info: PendingInfo,
}

/// Descriptor set writer for updating descriptor sets
///
/// Infos are kept by value until [`DescriptorSetWriter::update`], which builds
/// the write structs pointing into them.
#[derive(Default)]
pub struct DescriptorSetWriter {
    pending: Vec<PendingWrite>,
}

impl DescriptorSetWriter {
    /// Create a new descriptor set writer
    pub fn new() -> Self {
        Self::default()
    }

    fn write_buffer(
        mut self,
        set: vk::DescriptorSet,
        binding: u32,
        ty: vk::DescriptorType,
        buffer: vk::Buffer,
        range: vk::DeviceSize,
    ) -> Self {
        self.pending.push(PendingWrite {
            set,
            binding,
            ty,
            info: PendingInfo::Buffer(vk::DescriptorBufferInfo {
                buffer,
                offset: 0,
                range,
            }),
        });
        self
    }

    /// Bind the first `range` bytes of a storage buffer
    pub fn write_storage_buffer(
        self,
        set: vk::DescriptorSet,
        binding: u32,
        buffer: vk::Buffer,
        range: vk::DeviceSize,
    ) -> Self {
        self.write_buffer(set, binding, vk::DescriptorType::STORAGE_BUFFER, buffer, range)
    }

    /// Bind a whole uniform buffer
    pub fn write_uniform_buffer(self, set: vk::DescriptorSet, binding: u32, buffer: vk::Buffer) -> Self {
        self.write_buffer(set, binding, vk::DescriptorType::UNIFORM_BUFFER, buffer, vk::WHOLE_SIZE)
    }

    /// Bind a storage image view in `layout`
    pub fn write_storage_image(
        mut self,
        set: vk::DescriptorSet,
        binding: u32,
        view: vk::ImageView,
        layout: vk::ImageLayout,
    ) -> Self {
        self.pending.push(PendingWrite {
            set,
            binding,
            ty: vk::DescriptorType::STORAGE_IMAGE,
            info: PendingInfo::Image(vk::DescriptorImageInfo {
                sampler: vk::Sampler::null(),
                image_view: view,
                image_layout: layout,
            }),
        });
        self
    }

    /// Number of queued writes
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing has been queued
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Queued buffer writes as `(binding, buffer, range)`
    #[cfg(test)]
    pub(crate) fn queued_buffers(&self) -> Vec<(u32, vk::Buffer, vk::DeviceSize)> {
        self.pending
            .iter()
            .filter_map(|pending| match &pending.info {
                PendingInfo::Buffer(info) => Some((pending.binding, info.buffer, info.range)),
                PendingInfo::Image(_) => None,
            })
            .collect()
    }

    /// Execute all write operations
    pub fn update(self, device: &Device) {
        let writes: Vec<vk::WriteDescriptorSet> = self
            .pending
            .iter()
            .map(|pending| {
                let write = vk::WriteDescriptorSet::builder()
                    .dst_set(pending.set)
                    .dst_binding(pending.binding)
                    .dst_array_element(0)
                    .descriptor_type(pending.ty);
                match &pending.info {
                    PendingInfo::Buffer(info) => write.buffer_info(std::slice::from_ref(info)).build(),
                    PendingInfo::Image(info) => write.image_info(std::slice::from_ref(info)).build(),
                }
            })
            .collect();

        unsafe {
            device.update_descriptor_sets(&writes, &[]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_pool_sizes_grouped_by_type() {
        let builder = DescriptorSetLayoutBuilder::new()
            .add_uniform_buffer(0, vk::ShaderStageFlags::COMPUTE)
            .add_storage_image(1, vk::ShaderStageFlags::COMPUTE)
            .add_storage_buffer(2, vk::ShaderStageFlags::COMPUTE)
            .add_storage_buffer(3, vk::ShaderStageFlags::COMPUTE);

        let sizes = builder.pool_sizes();
        assert_eq!(sizes.len(), 3);
        let storage = sizes
            .iter()
            .find(|s| s.ty == vk::DescriptorType::STORAGE_BUFFER)
            .unwrap();
        assert_eq!(storage.descriptor_count, 2);
    }

    #[test]
    fn test_bindings_keep_order_and_stage() {
        let builder = DescriptorSetLayoutBuilder::new()
            .add_storage_buffer(4, vk::ShaderStageFlags::COMPUTE)
            .add_storage_buffer(1, vk::ShaderStageFlags::COMPUTE);

        let bindings = builder.bindings();
        assert_eq!(bindings[0].binding, 4);
        assert_eq!(bindings[1].binding, 1);
        assert!(bindings.iter().all(|b| b.stage_flags == vk::ShaderStageFlags::COMPUTE));
    }

    #[test]
    fn test_writer_queues_writes() {
        let set = vk::DescriptorSet::from_raw(1);
        let writer = DescriptorSetWriter::new()
            .write_uniform_buffer(set, 0, vk::Buffer::from_raw(2))
            .write_storage_image(set, 1, vk::ImageView::from_raw(3), vk::ImageLayout::GENERAL);

        assert_eq!(writer.len(), 2);
        assert!(!writer.is_empty());
    }

    #[test]
    fn test_storage_buffers_keep_their_range() {
        let set = vk::DescriptorSet::from_raw(1);
        let writer = DescriptorSetWriter::new()
            .write_storage_buffer(set, 3, vk::Buffer::from_raw(7), 800)
            .write_uniform_buffer(set, 0, vk::Buffer::from_raw(2));

        assert_eq!(
            writer.queued_buffers(),
            vec![
                (3, vk::Buffer::from_raw(7), 800),
                (0, vk::Buffer::from_raw(2), vk::WHOLE_SIZE),
            ]
        );
    }
}
