//! Device-resident star buffers
//!
//! Uploads a [`StarData`] once, keeps two position generations for
//! ping-ponging, and exposes all six buffers through one descriptor set whose
//! bindings never change.

use ash::{vk, Device};

use crate::core::config::FenceTimeoutPolicy;
use crate::galaxy::star_data::{StarBufferSizes, StarData};
use crate::render::vulkan::buffer::record_buffer_copies;
use crate::render::vulkan::commands::submit_commands;
use crate::render::vulkan::sync::wait_once;
use crate::render::vulkan::{
    Buffer, CommandRecorder, CommandSink, DescriptorPool, DescriptorSetLayout,
    DescriptorSetLayoutBuilder, DescriptorSetWriter, Fence, FenceWait, VulkanError, VulkanResult,
};

/// Descriptor set slots of the star buffers, in binding order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum StarBinding {
    /// Position generation 0
    PositionsA = 0,
    /// Tints
    Tints = 1,
    /// Weights
    Weights = 2,
    /// Screen-space coordinates
    Coords = 3,
    /// Position generation 1
    PositionsB = 4,
    /// Velocities
    Velocities = 5,
}

impl StarBinding {
    /// All slots in binding order
    pub const ALL: [Self; 6] = [
        Self::PositionsA,
        Self::Tints,
        Self::Weights,
        Self::Coords,
        Self::PositionsB,
        Self::Velocities,
    ];

    /// Binding number
    pub fn slot(self) -> u32 {
        self as u32
    }

    /// Slot holding position generation `generation` (0 or 1)
    pub fn positions(generation: u32) -> Self {
        if generation % 2 == 0 {
            Self::PositionsA
        } else {
            Self::PositionsB
        }
    }
}

/// One entry of the binding table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingEntry {
    /// Which slot
    pub binding: StarBinding,
    /// Buffer bound there
    pub buffer: vk::Buffer,
    /// Bound range in bytes, from offset 0
    pub range: vk::DeviceSize,
}

/// Raw handles of the six star buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StarBufferHandles {
    /// Position generations 0 and 1
    pub positions: [vk::Buffer; 2],
    /// Tints
    pub tints: vk::Buffer,
    /// Weights
    pub weights: vk::Buffer,
    /// Screen-space coordinates
    pub coords: vk::Buffer,
    /// Velocities
    pub velocities: vk::Buffer,
}

/// Byte size of the buffer in `binding`
pub fn binding_size(sizes: &StarBufferSizes, binding: StarBinding) -> vk::DeviceSize {
    match binding {
        StarBinding::PositionsA | StarBinding::PositionsB => sizes.positions,
        StarBinding::Tints => sizes.tints,
        StarBinding::Weights => sizes.weights,
        StarBinding::Coords => sizes.coords,
        StarBinding::Velocities => sizes.velocities,
    }
}

/// Binding table for a set of star buffers, in slot order
pub fn binding_table(handles: &StarBufferHandles, sizes: &StarBufferSizes) -> [BindingEntry; 6] {
    StarBinding::ALL.map(|binding| {
        let buffer = match binding {
            StarBinding::PositionsA => handles.positions[0],
            StarBinding::Tints => handles.tints,
            StarBinding::Weights => handles.weights,
            StarBinding::Coords => handles.coords,
            StarBinding::PositionsB => handles.positions[1],
            StarBinding::Velocities => handles.velocities,
        };
        BindingEntry {
            binding,
            buffer,
            range: binding_size(sizes, binding),
        }
    })
}

/// Layout of the star descriptor set: six compute storage buffers
pub fn star_set_layout_builder() -> DescriptorSetLayoutBuilder {
    StarBinding::ALL
        .iter()
        .fold(DescriptorSetLayoutBuilder::new(), |builder, binding| {
            builder.add_storage_buffer(binding.slot(), vk::ShaderStageFlags::COMPUTE)
        })
}

/// Writes binding every table entry over its recorded range
pub fn star_set_writer(set: vk::DescriptorSet, bindings: &[BindingEntry; 6]) -> DescriptorSetWriter {
    bindings
        .iter()
        .fold(DescriptorSetWriter::new(), |writer, entry| {
            writer.write_storage_buffer(set, entry.binding.slot(), entry.buffer, entry.range)
        })
}

/// One staging to device copy of the upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadCopy<'a> {
    /// Host bytes placed in the staging buffer
    pub source: &'a [u8],
    /// Device buffer they are copied into
    pub destination: vk::Buffer,
    /// Bytes copied
    pub size: vk::DeviceSize,
}

/// Copies seeding the device buffers, in submission order
///
/// Both position generations start from the same column, followed by tints
/// and weights. Coords and velocities are left uninitialized.
pub fn upload_plan<'a>(stars: &'a StarData, handles: &StarBufferHandles) -> [UploadCopy<'a>; 4] {
    let sizes = stars.buffer_sizes();
    [
        UploadCopy {
            source: stars.position_bytes(),
            destination: handles.positions[0],
            size: sizes.positions,
        },
        UploadCopy {
            source: stars.position_bytes(),
            destination: handles.positions[1],
            size: sizes.positions,
        },
        UploadCopy {
            source: stars.tint_bytes(),
            destination: handles.tints,
            size: sizes.tints,
        },
        UploadCopy {
            source: stars.weight_bytes(),
            destination: handles.weights,
            size: sizes.weights,
        },
    ]
}

/// Record `plan` as one batch, staging buffer `i` feeding entry `i`
pub fn record_upload(
    sink: &mut impl CommandSink,
    staging: &[vk::Buffer],
    plan: &[UploadCopy<'_>],
) -> VulkanResult<()> {
    let destinations: Vec<vk::Buffer> = plan.iter().map(|copy| copy.destination).collect();
    let sizes: Vec<vk::DeviceSize> = plan.iter().map(|copy| copy.size).collect();
    record_buffer_copies(sink, staging, &destinations, &sizes)
}

/// What the upload needs from the device
pub struct UploadContext<'a> {
    /// Logical device
    pub device: &'a Device,
    /// Memory types for allocation
    pub memory_properties: &'a vk::PhysicalDeviceMemoryProperties,
    /// Recorder over a reusable command buffer
    pub recorder: &'a mut CommandRecorder,
    /// Queue the copy is submitted to
    pub queue: vk::Queue,
    /// Bound for the fence wait
    pub timeout_ns: u64,
    /// What a fence timeout means
    pub fence_policy: FenceTimeoutPolicy,
}

/// Star buffers on the device plus their descriptor set
pub struct GpuStarData {
    // Indexed by binding slot
    buffers: Vec<Buffer>,
    _pool: DescriptorPool,
    layout: DescriptorSetLayout,
    set: vk::DescriptorSet,
    star_count: u32,
}

impl GpuStarData {
    /// Upload `stars` and build the descriptor set
    ///
    /// Blocks until the copy completes, or until the timeout under
    /// [`FenceTimeoutPolicy::Warn`].
    pub fn new(upload: UploadContext<'_>, stars: &StarData) -> VulkanResult<Self> {
        if stars.is_empty() {
            return Err(VulkanError::InvalidOperation {
                reason: "Cannot upload an empty star set".to_string(),
            });
        }
        let star_count = u32::try_from(stars.len()).map_err(|_| VulkanError::InvalidOperation {
            reason: format!("{} stars exceed the dispatchable range", stars.len()),
        })?;

        let device = upload.device;
        let memory = upload.memory_properties;
        let sizes = stars.buffer_sizes();

        log::info!("[UPLOAD] Uploading {} stars", star_count);

        let buffers = StarBinding::ALL
            .iter()
            .map(|&binding| Buffer::device_local_storage(device.clone(), memory, binding_size(&sizes, binding)))
            .collect::<VulkanResult<Vec<_>>>()?;
        let handle = |binding: StarBinding| buffers[binding.slot() as usize].handle();
        let handles = StarBufferHandles {
            positions: [handle(StarBinding::PositionsA), handle(StarBinding::PositionsB)],
            tints: handle(StarBinding::Tints),
            weights: handle(StarBinding::Weights),
            coords: handle(StarBinding::Coords),
            velocities: handle(StarBinding::Velocities),
        };

        let plan = upload_plan(stars, &handles);
        let staging = plan
            .iter()
            .map(|copy| {
                let buffer = Buffer::staging(device.clone(), memory, copy.size)?;
                buffer.write_bytes(copy.source)?;
                Ok(buffer)
            })
            .collect::<VulkanResult<Vec<_>>>()?;
        let staging_handles: Vec<vk::Buffer> = staging.iter().map(Buffer::handle).collect();

        record_upload(&mut *upload.recorder, &staging_handles, &plan)?;

        let fence = Fence::new(device.clone(), false)?;
        submit_commands(device, upload.queue, upload.recorder.handle(), &[], fence.handle())?;
        wait_once(|| fence.poll(upload.timeout_ns), upload.fence_policy, "upload fence")?;
        log::debug!("[UPLOAD] Copied {} staging buffers to device memory", staging.len());

        // Staging memory may still be read by a timed-out copy
        if fence.poll(0)? != FenceWait::Signaled {
            log::warn!("[UPLOAD] Waiting for the copy before releasing staging memory");
            unsafe { device.queue_wait_idle(upload.queue) }.map_err(VulkanError::Api)?;
        }
        drop(staging);

        let bindings = binding_table(&handles, &sizes);

        let layout_builder = star_set_layout_builder();
        let pool = DescriptorPool::new(device.clone(), 1, &layout_builder.pool_sizes())?;
        let layout = layout_builder.build(device)?;
        let set = pool
            .allocate_descriptor_sets(&[layout.handle()])?
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::InitializationFailed("No star descriptor set allocated".to_string()))?;

        star_set_writer(set, &bindings).update(device);

        log::info!(
            "[UPLOAD] Star buffers ready: {} bytes per position generation",
            sizes.positions
        );

        Ok(Self {
            buffers,
            _pool: pool,
            layout,
            set,
            star_count,
        })
    }

    /// Number of stars
    pub fn star_count(&self) -> u32 {
        self.star_count
    }

    /// Buffer bound in `binding`
    pub fn buffer(&self, binding: StarBinding) -> vk::Buffer {
        self.buffers[binding.slot() as usize].handle()
    }

    /// Position buffer of `generation` (0 or 1)
    pub fn positions(&self, generation: u32) -> vk::Buffer {
        self.buffer(StarBinding::positions(generation))
    }

    /// Screen coordinate buffer
    pub fn coords(&self) -> vk::Buffer {
        self.buffer(StarBinding::Coords)
    }

    /// Layout of the star set
    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout.handle()
    }

    /// The star descriptor set
    pub fn descriptor_set(&self) -> vk::DescriptorSet {
        self.set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::vulkan::commands::recording::{Recorded, RecordingSink};
    use ash::vk::Handle;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn handles() -> StarBufferHandles {
        StarBufferHandles {
            positions: [vk::Buffer::from_raw(10), vk::Buffer::from_raw(14)],
            tints: vk::Buffer::from_raw(11),
            weights: vk::Buffer::from_raw(12),
            coords: vk::Buffer::from_raw(13),
            velocities: vk::Buffer::from_raw(15),
        }
    }

    #[test]
    fn test_binding_slots_fixed() {
        let slots: Vec<u32> = StarBinding::ALL.iter().map(|b| b.slot()).collect();
        assert_eq!(slots, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(StarBinding::positions(0), StarBinding::PositionsA);
        assert_eq!(StarBinding::positions(1), StarBinding::PositionsB);
        assert_eq!(StarBinding::positions(2), StarBinding::PositionsA);
    }

    #[test]
    fn test_binding_table_order_and_ranges() {
        let sizes = StarBufferSizes::for_count(2048);
        let table = binding_table(&handles(), &sizes);

        let raw: Vec<u64> = table.iter().map(|e| e.buffer.as_raw()).collect();
        assert_eq!(raw, vec![10, 11, 12, 13, 14, 15]);

        assert_eq!(table[StarBinding::Coords.slot() as usize].range, 2048 * 8);
        assert_eq!(table[StarBinding::Velocities.slot() as usize].range, 2048 * 12);
        assert_eq!(table[StarBinding::PositionsB.slot() as usize].range, table[0].range);
        // Velocities, not coords, live in the last slot
        assert_eq!(table[5].buffer, handles().velocities);
    }

    #[test]
    fn test_layout_has_six_compute_storage_buffers() {
        let builder = star_set_layout_builder();

        assert_eq!(builder.bindings().len(), 6);
        assert!(builder.bindings().iter().all(|b| {
            b.descriptor_type == vk::DescriptorType::STORAGE_BUFFER
                && b.stage_flags == vk::ShaderStageFlags::COMPUTE
                && b.descriptor_count == 1
        }));

        let sizes = builder.pool_sizes();
        assert_eq!(sizes.len(), 1);
        assert_eq!(sizes[0].descriptor_count, 6);
    }

    #[test]
    fn test_writer_binds_each_slot_over_its_range() {
        let sizes = StarBufferSizes::for_count(100);
        let table = binding_table(&handles(), &sizes);
        let set = vk::DescriptorSet::from_raw(99);

        let queued = star_set_writer(set, &table).queued_buffers();

        let expected: Vec<_> = table
            .iter()
            .map(|entry| (entry.binding.slot(), entry.buffer, entry.range))
            .collect();
        assert_eq!(queued, expected);
        assert_eq!(queued[5], (5, handles().velocities, 100 * 12));
        assert!(queued.iter().all(|&(_, _, range)| range != vk::WHOLE_SIZE));
    }

    #[test]
    fn test_upload_plan_pairs_columns_with_buffers() {
        let stars = StarData::random(37, &mut StdRng::seed_from_u64(5));
        let sizes = stars.buffer_sizes();
        let plan = upload_plan(&stars, &handles());

        // Both generations start from the same positions
        assert_eq!(plan[0].source, stars.position_bytes());
        assert_eq!(plan[1].source, plan[0].source);
        assert_eq!(plan[2].source, stars.tint_bytes());
        assert_eq!(plan[3].source, stars.weight_bytes());

        let destinations: Vec<_> = plan.iter().map(|c| c.destination).collect();
        assert_eq!(
            destinations,
            vec![handles().positions[0], handles().positions[1], handles().tints, handles().weights]
        );

        let plan_sizes: Vec<_> = plan.iter().map(|c| c.size).collect();
        assert_eq!(plan_sizes, vec![sizes.positions, sizes.positions, sizes.tints, sizes.weights]);
        assert!(plan.iter().all(|c| c.source.len() as vk::DeviceSize == c.size));
    }

    #[test]
    fn test_upload_records_four_copies_in_plan_order() {
        let stars = StarData::random(8, &mut StdRng::seed_from_u64(1));
        let plan = upload_plan(&stars, &handles());
        let staging: Vec<_> = (0..4).map(|i| vk::Buffer::from_raw(100 + i)).collect();
        let mut sink = RecordingSink::default();

        record_upload(&mut sink, &staging, &plan).unwrap();

        let copies: Vec<_> = sink
            .commands
            .iter()
            .filter(|c| matches!(c, Recorded::CopyBuffer { .. }))
            .cloned()
            .collect();
        assert_eq!(
            copies,
            vec![
                Recorded::CopyBuffer { src: staging[0], dst: handles().positions[0], size: 8 * 12 },
                Recorded::CopyBuffer { src: staging[1], dst: handles().positions[1], size: 8 * 12 },
                Recorded::CopyBuffer { src: staging[2], dst: handles().tints, size: 8 * 12 },
                Recorded::CopyBuffer { src: staging[3], dst: handles().weights, size: 8 * 4 },
            ]
        );
        assert_eq!(sink.commands.first(), Some(&Recorded::Begin));
        assert_eq!(sink.commands.last(), Some(&Recorded::End));
    }

    #[test]
    fn test_upload_with_missing_staging_records_nothing() {
        let stars = StarData::random(8, &mut StdRng::seed_from_u64(1));
        let plan = upload_plan(&stars, &handles());
        let staging: Vec<_> = (0..3).map(|i| vk::Buffer::from_raw(100 + i)).collect();
        let mut sink = RecordingSink::default();

        let result = record_upload(&mut sink, &staging, &plan);

        assert!(matches!(
            result,
            Err(VulkanError::BufferCountMismatch { staging: 3, device: 4, sizes: 4 })
        ));
        assert!(sink.commands.is_empty());
    }
}
