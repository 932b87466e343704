//! Per-frame orchestration
//!
//! One frame is strictly sequential and nothing overlaps between frames:
//!
//! acquire → simulate → barrier → project → barrier → rasterize → copy to
//! swapchain → transition for present → submit → wait → present → advance
//!
//! Recording goes through [`CommandSink`] and everything that talks to the
//! queue or swapchain goes through [`FramePresenter`], so the sequence can be
//! driven without a GPU.

use ash::{vk, Device};

use crate::galaxy::pipelines::{pixel_workgroups, star_workgroups, Pass};
use crate::galaxy::push_constants::PushConstants;
use crate::render::vulkan::commands::submit_commands;
use crate::render::vulkan::sync::wait_until_signaled;
use crate::render::vulkan::{
    image_layout_barrier, BufferBarrierBuilder, CommandSink, Fence, PresentStatus, Semaphore,
    Swapchain, VulkanError, VulkanResult,
};

/// Completed-frame counter; its parity picks the position generations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameCounter {
    frame: u64,
}

impl FrameCounter {
    /// Counter starting at `frame`
    pub fn new(frame: u64) -> Self {
        Self { frame }
    }

    /// Frames completed so far
    pub fn value(&self) -> u64 {
        self.frame
    }

    /// Generation simulate reads this frame
    pub fn read_index(&self) -> u32 {
        (self.frame % 2) as u32
    }

    /// Generation simulate writes and project reads this frame
    pub fn write_index(&self) -> u32 {
        ((self.frame + 1) % 2) as u32
    }

    /// Count one completed frame
    pub fn advance(&mut self) {
        self.frame += 1;
    }
}

/// Handles one frame's commands refer to
///
/// None of these change after startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameResources {
    /// Layout shared by the three pipelines
    pub layout: vk::PipelineLayout,
    /// Simulate, project and rasterize pipelines
    pub pipelines: [vk::Pipeline; 3],
    /// Draw set (set 0) and star set (set 1)
    pub descriptor_sets: [vk::DescriptorSet; 2],
    /// Position generations 0 and 1
    pub positions: [vk::Buffer; 2],
    /// Screen coordinate buffer
    pub coords: vk::Buffer,
    /// Image the rasterizer writes
    pub intermediate_image: vk::Image,
    /// Size of the intermediate image
    pub intermediate_extent: vk::Extent2D,
    /// Stars simulated per dispatch
    pub star_count: u32,
}

impl FrameResources {
    fn pipeline(&self, pass: Pass) -> vk::Pipeline {
        match pass {
            Pass::Simulate => self.pipelines[0],
            Pass::Project => self.pipelines[1],
            Pass::Rasterize => self.pipelines[2],
        }
    }
}

/// A swapchain image ready to be written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredImage {
    /// Index to present
    pub index: u32,
    /// Image handle
    pub image: vk::Image,
    /// Image size
    pub extent: vk::Extent2D,
}

/// Region copied from the intermediate image into the swapchain image
#[must_use]
pub fn copy_extent(source: vk::Extent2D, destination: vk::Extent2D) -> vk::Extent2D {
    vk::Extent2D {
        width: source.width.min(destination.width),
        height: source.height.min(destination.height),
    }
}

fn record_transition(
    sink: &mut impl CommandSink,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> VulkanResult<()> {
    let transition = image_layout_barrier(image, old_layout, new_layout)?;
    sink.image_barrier(transition.src_stage, transition.dst_stage, transition.barrier);
    Ok(())
}

/// Record one frame's commands into `sink`
///
/// `push` supplies the matrix and screen size; its positions index is
/// overwritten per pass from `counter`. If recording fails after `begin`,
/// the sink is reset so it can record again.
pub fn record_frame(
    sink: &mut impl CommandSink,
    resources: &FrameResources,
    counter: &FrameCounter,
    target: &AcquiredImage,
    push: &PushConstants,
) -> VulkanResult<()> {
    sink.begin()?;

    if let Err(e) = record_frame_body(sink, resources, counter, target, push) {
        if let Err(reset) = sink.reset() {
            log::error!("[FRAME] Failed to reset command buffer after {}: {}", e, reset);
        }
        return Err(e);
    }
    Ok(())
}

fn record_frame_body(
    sink: &mut impl CommandSink,
    resources: &FrameResources,
    counter: &FrameCounter,
    target: &AcquiredImage,
    push: &PushConstants,
) -> VulkanResult<()> {
    let read = counter.read_index();
    let write = counter.write_index();
    let star_groups = star_workgroups(resources.star_count);

    record_transition(
        sink,
        target.image,
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    )?;
    record_transition(
        sink,
        resources.intermediate_image,
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::GENERAL,
    )?;

    // Simulate: read generation `read`, write `write` and velocities
    sink.push_constants(resources.layout, push.with_positions_index(read).as_bytes());
    sink.bind_compute_pipeline(resources.pipeline(Pass::Simulate));
    sink.bind_descriptor_sets(resources.layout, &resources.descriptor_sets);
    sink.dispatch(star_groups, 1, 1);

    sink.buffer_barriers(
        vk::PipelineStageFlags::COMPUTE_SHADER,
        vk::PipelineStageFlags::COMPUTE_SHADER,
        &[
            BufferBarrierBuilder::shader_write_to_read(resources.positions[write as usize]),
            BufferBarrierBuilder::shader_write_to_write(resources.coords),
        ],
    );

    // Project: the generation simulate just wrote
    sink.push_constants(resources.layout, push.with_positions_index(write).as_bytes());
    sink.bind_compute_pipeline(resources.pipeline(Pass::Project));
    sink.dispatch(star_groups, 1, 1);

    sink.buffer_barriers(
        vk::PipelineStageFlags::COMPUTE_SHADER,
        vk::PipelineStageFlags::COMPUTE_SHADER,
        &[BufferBarrierBuilder::shader_write_to_read(resources.coords)],
    );

    let (groups_x, groups_y) = pixel_workgroups(resources.intermediate_extent);
    sink.bind_compute_pipeline(resources.pipeline(Pass::Rasterize));
    sink.dispatch(groups_x, groups_y, 1);

    record_transition(
        sink,
        resources.intermediate_image,
        vk::ImageLayout::GENERAL,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
    )?;
    sink.copy_image(
        resources.intermediate_image,
        target.image,
        copy_extent(resources.intermediate_extent, target.extent),
    );
    record_transition(
        sink,
        target.image,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::ImageLayout::PRESENT_SRC_KHR,
    )?;

    sink.end()
}

/// Queue and swapchain side of a frame
pub trait FramePresenter {
    /// Acquire the next swapchain image; any non-success result is an error
    fn acquire_image(&mut self) -> VulkanResult<AcquiredImage>;

    /// Submit the recorded frame, waiting on the acquire
    fn submit(&mut self) -> VulkanResult<()>;

    /// Block until the submitted frame completes, then rearm
    fn wait_for_completion(&mut self) -> VulkanResult<()>;

    /// Present an image
    fn present(&mut self, image_index: u32) -> VulkanResult<PresentStatus>;
}

/// Drives frames through the fixed sequence
pub struct FrameOrchestrator {
    counter: FrameCounter,
    resources: FrameResources,
    push: PushConstants,
}

impl FrameOrchestrator {
    /// Orchestrator starting at frame 0
    pub fn new(resources: FrameResources, push: PushConstants) -> Self {
        Self {
            counter: FrameCounter::default(),
            resources,
            push,
        }
    }

    /// Frame counter
    pub fn counter(&self) -> FrameCounter {
        self.counter
    }

    /// Handles used every frame
    pub fn resources(&self) -> &FrameResources {
        &self.resources
    }

    /// Run one frame to completion
    ///
    /// A suboptimal present still counts as a completed frame. On error the
    /// counter is left unchanged.
    pub fn draw_frame<S, P>(&mut self, sink: &mut S, presenter: &mut P) -> VulkanResult<PresentStatus>
    where
        S: CommandSink,
        P: FramePresenter,
    {
        let target = presenter.acquire_image()?;
        log::trace!(
            "[FRAME] {} acquired image {} (read {}, write {})",
            self.counter.value(),
            target.index,
            self.counter.read_index(),
            self.counter.write_index()
        );

        record_frame(sink, &self.resources, &self.counter, &target, &self.push)?;
        presenter.submit()?;
        presenter.wait_for_completion()?;

        let status = presenter.present(target.index)?;
        if status == PresentStatus::Suboptimal {
            log::warn!("[FRAME] {} presented suboptimally", self.counter.value());
        }

        self.counter.advance();
        Ok(status)
    }
}

/// Objects a frame synchronizes with, owned by the frame loop
pub struct FrameSync {
    /// Reusable primary command buffer
    pub command_buffer: vk::CommandBuffer,
    /// Signaled by acquire, waited on by submit
    pub image_acquired: Semaphore,
    /// Signaled when the frame's work completes
    pub frame_fence: Fence,
}

impl FrameSync {
    /// Create the semaphore and an unsignaled fence
    pub fn new(device: Device, command_buffer: vk::CommandBuffer) -> VulkanResult<Self> {
        Ok(Self {
            command_buffer,
            image_acquired: Semaphore::new(device.clone())?,
            frame_fence: Fence::new(device, false)?,
        })
    }
}

/// [`FramePresenter`] over a real swapchain and queues
pub struct SwapchainPresenter<'a> {
    /// Logical device
    pub device: &'a Device,
    /// Swapchain presented to
    pub swapchain: &'a Swapchain,
    /// Queue frames are submitted to
    pub graphics_queue: vk::Queue,
    /// Queue used for present
    pub present_queue: vk::Queue,
    /// Semaphore, fence and command buffer
    pub sync: &'a FrameSync,
    /// Bound on every wait
    pub timeout_ns: u64,
    /// Timed-out fence polls tolerated before giving up
    pub poll_limit: u32,
}

impl FramePresenter for SwapchainPresenter<'_> {
    fn acquire_image(&mut self) -> VulkanResult<AcquiredImage> {
        let index = self
            .swapchain
            .acquire_next_image(self.timeout_ns, self.sync.image_acquired.handle())?;
        let image = self
            .swapchain
            .images()
            .get(index as usize)
            .copied()
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: format!("Acquired image index {} out of range", index),
            })?;

        Ok(AcquiredImage {
            index,
            image,
            extent: self.swapchain.extent(),
        })
    }

    fn submit(&mut self) -> VulkanResult<()> {
        submit_commands(
            self.device,
            self.graphics_queue,
            self.sync.command_buffer,
            &[(
                self.sync.image_acquired.handle(),
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            )],
            self.sync.frame_fence.handle(),
        )
    }

    fn wait_for_completion(&mut self) -> VulkanResult<()> {
        let fence = &self.sync.frame_fence;
        wait_until_signaled(|| fence.poll(self.timeout_ns), Some(self.poll_limit), "frame fence")?;
        fence.reset()
    }

    fn present(&mut self, image_index: u32) -> VulkanResult<PresentStatus> {
        // The fence wait already ordered present after the frame's work
        self.swapchain.present(self.present_queue, image_index, &[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Mat4;
    use crate::render::vulkan::commands::recording::{Recorded, RecordingSink};
    use ash::vk::Handle;
    use std::collections::VecDeque;

    fn resources() -> FrameResources {
        FrameResources {
            layout: vk::PipelineLayout::from_raw(1),
            pipelines: [
                vk::Pipeline::from_raw(21),
                vk::Pipeline::from_raw(22),
                vk::Pipeline::from_raw(23),
            ],
            descriptor_sets: [vk::DescriptorSet::from_raw(31), vk::DescriptorSet::from_raw(32)],
            positions: [vk::Buffer::from_raw(40), vk::Buffer::from_raw(41)],
            coords: vk::Buffer::from_raw(42),
            intermediate_image: vk::Image::from_raw(50),
            intermediate_extent: vk::Extent2D { width: 640, height: 480 },
            star_count: 2048,
        }
    }

    fn swapchain_image(index: u32) -> AcquiredImage {
        AcquiredImage {
            index,
            image: vk::Image::from_raw(60 + u64::from(index)),
            extent: vk::Extent2D { width: 640, height: 480 },
        }
    }

    fn push() -> PushConstants {
        PushConstants::new(&Mat4::identity(), (640, 480), 0)
    }

    fn pushed_indices(commands: &[Recorded]) -> Vec<u32> {
        commands
            .iter()
            .filter_map(|c| match c {
                Recorded::PushConstants(bytes) => {
                    Some(u32::from_ne_bytes([bytes[72], bytes[73], bytes[74], bytes[75]]))
                }
                _ => None,
            })
            .collect()
    }

    /// Presenter that replays scripted results and logs calls
    #[derive(Default)]
    struct ScriptedPresenter {
        acquire_results: VecDeque<VulkanResult<AcquiredImage>>,
        present_results: VecDeque<VulkanResult<PresentStatus>>,
        calls: Vec<&'static str>,
    }

    impl ScriptedPresenter {
        fn healthy(frames: u32) -> Self {
            let mut presenter = Self::default();
            for f in 0..frames {
                presenter.acquire_results.push_back(Ok(swapchain_image(f % 3)));
                presenter.present_results.push_back(Ok(PresentStatus::Optimal));
            }
            presenter
        }
    }

    impl FramePresenter for ScriptedPresenter {
        fn acquire_image(&mut self) -> VulkanResult<AcquiredImage> {
            self.calls.push("acquire");
            self.acquire_results
                .pop_front()
                .unwrap_or(Err(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST)))
        }

        fn submit(&mut self) -> VulkanResult<()> {
            self.calls.push("submit");
            Ok(())
        }

        fn wait_for_completion(&mut self) -> VulkanResult<()> {
            self.calls.push("wait");
            Ok(())
        }

        fn present(&mut self, _image_index: u32) -> VulkanResult<PresentStatus> {
            self.calls.push("present");
            self.present_results
                .pop_front()
                .unwrap_or(Ok(PresentStatus::Optimal))
        }
    }

    #[test]
    fn test_generation_parity() {
        let mut counter = FrameCounter::default();
        for _ in 0..6 {
            assert_eq!(counter.read_index(), (counter.value() % 2) as u32);
            assert_eq!(counter.write_index(), ((counter.value() + 1) % 2) as u32);
            assert_ne!(counter.read_index(), counter.write_index());
            counter.advance();
        }
        assert_eq!(counter.value(), 6);
    }

    #[test]
    fn test_frame_records_full_sequence() {
        let mut sink = RecordingSink::default();
        let res = resources();
        let target = swapchain_image(1);

        record_frame(&mut sink, &res, &FrameCounter::new(0), &target, &push()).unwrap();

        let c = &sink.commands;
        assert_eq!(c.first(), Some(&Recorded::Begin));
        assert_eq!(c.last(), Some(&Recorded::End));

        assert!(matches!(c[1], Recorded::ImageBarrier {
            image, old_layout: vk::ImageLayout::UNDEFINED, new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL, ..
        } if image == target.image));
        assert!(matches!(c[2], Recorded::ImageBarrier {
            image, old_layout: vk::ImageLayout::UNDEFINED, new_layout: vk::ImageLayout::GENERAL, ..
        } if image == res.intermediate_image));

        let dispatches: Vec<_> = c
            .iter()
            .filter_map(|cmd| match cmd {
                Recorded::Dispatch(x, y, z) => Some((*x, *y, *z)),
                _ => None,
            })
            .collect();
        assert_eq!(dispatches, vec![(64, 1, 1), (64, 1, 1), (80, 60, 1)]);

        let pipelines: Vec<_> = c
            .iter()
            .filter_map(|cmd| match cmd {
                Recorded::BindPipeline(p) => Some(*p),
                _ => None,
            })
            .collect();
        assert_eq!(pipelines, res.pipelines.to_vec());

        assert!(c.contains(&Recorded::BindDescriptorSets(res.descriptor_sets.to_vec())));
        assert!(c.contains(&Recorded::CopyImage {
            src: res.intermediate_image,
            dst: target.image,
            extent: (640, 480),
        }));

        assert!(matches!(c[c.len() - 2], Recorded::ImageBarrier {
            old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            new_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            ..
        }));
    }

    #[test]
    fn test_barriers_guard_written_generation() {
        for frame in 0..2_u64 {
            let mut sink = RecordingSink::default();
            let res = resources();
            let counter = FrameCounter::new(frame);

            record_frame(&mut sink, &res, &counter, &swapchain_image(0), &push()).unwrap();

            let barriers: Vec<_> = sink
                .commands
                .iter()
                .filter_map(|cmd| match cmd {
                    Recorded::BufferBarriers { src_stage, dst_stage, barriers } => {
                        assert_eq!(*src_stage, vk::PipelineStageFlags::COMPUTE_SHADER);
                        assert_eq!(*dst_stage, vk::PipelineStageFlags::COMPUTE_SHADER);
                        Some(barriers.clone())
                    }
                    _ => None,
                })
                .collect();

            let written = res.positions[counter.write_index() as usize];
            assert_eq!(barriers.len(), 2);
            assert_eq!(barriers[0], vec![
                (written, vk::AccessFlags::SHADER_WRITE, vk::AccessFlags::SHADER_READ),
                (res.coords, vk::AccessFlags::SHADER_WRITE, vk::AccessFlags::SHADER_WRITE),
            ]);
            assert_eq!(barriers[1], vec![
                (res.coords, vk::AccessFlags::SHADER_WRITE, vk::AccessFlags::SHADER_READ),
            ]);
        }
    }

    #[test]
    fn test_push_constants_follow_parity() {
        let mut sink = RecordingSink::default();
        record_frame(&mut sink, &resources(), &FrameCounter::new(0), &swapchain_image(0), &push()).unwrap();
        assert_eq!(pushed_indices(&sink.commands), vec![0, 1]);

        let mut sink = RecordingSink::default();
        record_frame(&mut sink, &resources(), &FrameCounter::new(7), &swapchain_image(0), &push()).unwrap();
        assert_eq!(pushed_indices(&sink.commands), vec![1, 0]);
    }

    #[test]
    fn test_copy_clamped_to_smaller_image() {
        let mut sink = RecordingSink::default();
        let target = AcquiredImage {
            extent: vk::Extent2D { width: 600, height: 500 },
            ..swapchain_image(2)
        };

        record_frame(&mut sink, &resources(), &FrameCounter::new(0), &target, &push()).unwrap();

        assert!(sink.commands.iter().any(|c| matches!(
            c,
            Recorded::CopyImage { extent: (600, 480), .. }
        )));
    }

    #[test]
    fn test_failed_recording_resets_sink() {
        let mut sink = RecordingSink {
            fail_end: true,
            ..RecordingSink::default()
        };

        let err = record_frame(&mut sink, &resources(), &FrameCounter::new(0), &swapchain_image(0), &push())
            .unwrap_err();

        assert!(matches!(err, VulkanError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)));
        assert_eq!(sink.commands.first(), Some(&Recorded::Begin));
        assert_eq!(sink.commands.last(), Some(&Recorded::Reset));

        // The next frame records normally
        sink.fail_end = false;
        sink.commands.clear();
        record_frame(&mut sink, &resources(), &FrameCounter::new(1), &swapchain_image(0), &push()).unwrap();
        assert_eq!(sink.commands.last(), Some(&Recorded::End));
        assert!(!sink.commands.contains(&Recorded::Reset));
    }

    #[test]
    fn test_frames_alternate_and_count() {
        let mut orchestrator = FrameOrchestrator::new(resources(), push());
        let mut presenter = ScriptedPresenter::healthy(5);

        for _ in 0..5 {
            let mut sink = RecordingSink::default();
            orchestrator.draw_frame(&mut sink, &mut presenter).unwrap();
        }

        assert_eq!(orchestrator.counter().value(), 5);
        assert_eq!(
            &presenter.calls[..4],
            &["acquire", "submit", "wait", "present"]
        );
        assert_eq!(presenter.calls.len(), 20);
    }

    #[test]
    fn test_bindings_unchanged_across_frames() {
        let mut orchestrator = FrameOrchestrator::new(resources(), push());
        let mut presenter = ScriptedPresenter::healthy(4);
        let mut bound = Vec::new();

        for _ in 0..4 {
            let mut sink = RecordingSink::default();
            orchestrator.draw_frame(&mut sink, &mut presenter).unwrap();
            for cmd in sink.commands {
                if let Recorded::BindDescriptorSets(sets) = cmd {
                    bound.push(sets);
                }
            }
        }

        assert_eq!(bound.len(), 4);
        assert!(bound.iter().all(|sets| *sets == resources().descriptor_sets.to_vec()));
        assert_eq!(*orchestrator.resources(), resources());
    }

    #[test]
    fn test_suboptimal_present_still_advances() {
        let mut orchestrator = FrameOrchestrator::new(resources(), push());
        let mut presenter = ScriptedPresenter::healthy(3);
        presenter.present_results[1] = Ok(PresentStatus::Suboptimal);

        let mut statuses = Vec::new();
        for _ in 0..3 {
            let mut sink = RecordingSink::default();
            statuses.push(orchestrator.draw_frame(&mut sink, &mut presenter).unwrap());
        }

        assert_eq!(statuses[1], PresentStatus::Suboptimal);
        assert_eq!(orchestrator.counter().value(), 3);
    }

    #[test]
    fn test_acquire_failure_is_fatal_and_records_nothing() {
        let mut orchestrator = FrameOrchestrator::new(resources(), push());
        let mut presenter = ScriptedPresenter::default();
        presenter
            .acquire_results
            .push_back(Err(VulkanError::Api(vk::Result::SUBOPTIMAL_KHR)));
        let mut sink = RecordingSink::default();

        let err = orchestrator.draw_frame(&mut sink, &mut presenter).unwrap_err();

        assert!(matches!(err, VulkanError::Api(vk::Result::SUBOPTIMAL_KHR)));
        assert!(sink.commands.is_empty());
        assert_eq!(presenter.calls, vec!["acquire"]);
        assert_eq!(orchestrator.counter().value(), 0);
    }

    #[test]
    fn test_present_failure_does_not_advance() {
        let mut orchestrator = FrameOrchestrator::new(resources(), push());
        let mut presenter = ScriptedPresenter::healthy(1);
        presenter.present_results[0] = Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_DATE_KHR));
        let mut sink = RecordingSink::default();

        assert!(orchestrator.draw_frame(&mut sink, &mut presenter).is_err());
        assert_eq!(orchestrator.counter().value(), 0);
    }
}
