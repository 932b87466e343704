//! The star simulation: data, GPU resources, pipelines and the frame loop

pub mod draw_target;
pub mod frame;
pub mod gpu_star_data;
pub mod pipelines;
pub mod push_constants;
pub mod star_data;

pub use draw_target::{DrawTarget, DrawUniforms};
pub use frame::{FrameCounter, FrameOrchestrator, FramePresenter, FrameResources, FrameSync, SwapchainPresenter};
pub use gpu_star_data::{BindingEntry, GpuStarData, StarBinding};
pub use pipelines::{Pass, PipelineSet};
pub use push_constants::PushConstants;
pub use star_data::{Star, StarData};

use ash::{vk, Device};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::core::config::{GalaxyConfig, TimingConfig};
use crate::render::vulkan::{CommandRecorder, PresentStatus, VulkanContext, VulkanResult};
use crate::render::Camera;
use gpu_star_data::UploadContext;

/// A running star simulation bound to one [`VulkanContext`]
///
/// Owns every GPU object the frames use. Must be dropped before the
/// context it was created from.
pub struct Galaxy {
    orchestrator: FrameOrchestrator,
    recorder: CommandRecorder,
    sync: FrameSync,
    pipelines: PipelineSet,
    draw_target: DrawTarget,
    stars: GpuStarData,
    timing: TimingConfig,
    device: Device,
}

impl Galaxy {
    /// Generate stars, upload them and build the pipelines
    pub fn new(context: &VulkanContext, config: &GalaxyConfig) -> VulkanResult<Self> {
        let device = context.raw_device();
        let memory_properties = context.memory_properties();
        let swapchain = context.swapchain()?;

        let mut rng = match config.simulation.seed {
            Some(seed) => {
                log::info!("Generating {} stars from seed {}", config.simulation.star_count, seed);
                StdRng::seed_from_u64(seed)
            }
            None => {
                log::info!("Generating {} stars", config.simulation.star_count);
                StdRng::from_entropy()
            }
        };
        let star_data = StarData::random(config.simulation.star_count as usize, &mut rng);

        let command_buffer = context.command_pool()?.allocate_command_buffer()?;
        let mut recorder = CommandRecorder::new(command_buffer, device.clone());

        let stars = GpuStarData::new(
            UploadContext {
                device: &device,
                memory_properties,
                recorder: &mut recorder,
                queue: context.graphics_queue(),
                timeout_ns: config.timing.timeout_ns,
                fence_policy: config.timing.upload_fence_policy,
            },
            &star_data,
        )?;

        let extent = vk::Extent2D {
            width: config.window.width,
            height: config.window.height,
        };
        let draw_target = DrawTarget::new(
            &device,
            memory_properties,
            extent,
            DrawUniforms::new(config.window.background, swapchain.swap_red_blue()),
        )?;

        let pipelines = PipelineSet::new(&device, &config.shaders, [draw_target.layout(), stars.layout()])?;

        let camera = Camera::from_config(&config.camera, extent.width, extent.height);
        let push = camera.push_constants((extent.width, extent.height), 0);

        let resources = FrameResources {
            layout: pipelines.layout(),
            pipelines: [
                pipelines.pipeline(Pass::Simulate),
                pipelines.pipeline(Pass::Project),
                pipelines.pipeline(Pass::Rasterize),
            ],
            descriptor_sets: [draw_target.descriptor_set(), stars.descriptor_set()],
            positions: [stars.positions(0), stars.positions(1)],
            coords: stars.coords(),
            intermediate_image: draw_target.image(),
            intermediate_extent: draw_target.extent(),
            star_count: stars.star_count(),
        };
        let sync = FrameSync::new(device.clone(), command_buffer)?;

        log::info!(
            "Galaxy ready: {} stars, {}x{} target",
            stars.star_count(),
            extent.width,
            extent.height
        );

        Ok(Self {
            orchestrator: FrameOrchestrator::new(resources, push),
            recorder,
            sync,
            pipelines,
            draw_target,
            stars,
            timing: config.timing.clone(),
            device,
        })
    }

    /// Simulate, draw and present one frame
    pub fn draw_frame(&mut self, context: &VulkanContext) -> VulkanResult<PresentStatus> {
        let mut presenter = SwapchainPresenter {
            device: &self.device,
            swapchain: context.swapchain()?,
            graphics_queue: context.graphics_queue(),
            present_queue: context.present_queue(),
            sync: &self.sync,
            timeout_ns: self.timing.timeout_ns,
            poll_limit: self.timing.frame_fence_poll_limit,
        };
        self.orchestrator.draw_frame(&mut self.recorder, &mut presenter)
    }

    /// Frames completed so far
    pub fn frame_count(&self) -> u64 {
        self.orchestrator.counter().value()
    }

    /// Star buffers and their bindings
    pub fn stars(&self) -> &GpuStarData {
        &self.stars
    }

    /// Intermediate image and its descriptor set
    pub fn draw_target(&self) -> &DrawTarget {
        &self.draw_target
    }

    /// The compute pipelines
    pub fn pipelines(&self) -> &PipelineSet {
        &self.pipelines
    }
}

impl Drop for Galaxy {
    fn drop(&mut self) {
        log::debug!("Dropping galaxy after {} frames", self.frame_count());
        // Buffers and images may still be in use by the last submission
        if let Err(e) = unsafe { self.device.device_wait_idle() } {
            log::error!("Failed to wait for device idle: {:?}", e);
        }
    }
}
