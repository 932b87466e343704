//! The three compute pipelines and their shared layout
//!
//! Set 0 is the draw set, set 1 the star set; one 76-byte push constant
//! range. Pipelines carry no state between dispatches.

use ash::{vk, Device};

use crate::core::config::ShaderConfig;
use crate::galaxy::push_constants::push_constant_range;
use crate::render::vulkan::{ComputePipeline, PipelineLayout, ShaderModule, VulkanResult};

/// Local size of the per-star passes
pub const STAR_WORKGROUP_SIZE: u32 = 32;

/// Local size (each axis) of the per-pixel pass
pub const PIXEL_WORKGROUP_SIZE: u32 = 8;

/// Workgroups covering `star_count` stars
#[must_use]
pub fn star_workgroups(star_count: u32) -> u32 {
    star_count.div_ceil(STAR_WORKGROUP_SIZE)
}

/// Workgroups covering every pixel of `extent`
#[must_use]
pub fn pixel_workgroups(extent: vk::Extent2D) -> (u32, u32) {
    (
        extent.width.div_ceil(PIXEL_WORKGROUP_SIZE),
        extent.height.div_ceil(PIXEL_WORKGROUP_SIZE),
    )
}

/// One of the three passes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    /// Advance positions into the other generation
    Simulate,
    /// Project the new positions to screen coordinates
    Project,
    /// Draw stars into the intermediate image
    Rasterize,
}

impl Pass {
    /// Log name
    pub fn name(self) -> &'static str {
        match self {
            Self::Simulate => "simulate",
            Self::Project => "project",
            Self::Rasterize => "rasterize",
        }
    }
}

/// Compute pipelines sharing one layout
pub struct PipelineSet {
    simulate: ComputePipeline,
    project: ComputePipeline,
    rasterize: ComputePipeline,
    layout: PipelineLayout,
}

impl PipelineSet {
    /// Load the three shaders and build their pipelines
    ///
    /// `set_layouts` are the draw and star set layouts, in that order.
    pub fn new(
        device: &Device,
        shaders: &ShaderConfig,
        set_layouts: [vk::DescriptorSetLayout; 2],
    ) -> VulkanResult<Self> {
        let layout = PipelineLayout::new(device, &set_layouts, &[push_constant_range()])?;

        let build = |pass: Pass, path: std::path::PathBuf| -> VulkanResult<ComputePipeline> {
            log::info!("[SHADER] Loading {} pass from {}", pass.name(), path.display());
            // The module is only needed until the pipeline exists
            let module = ShaderModule::from_file(device, &path)?;
            ComputePipeline::new(device, &layout, &module, pass.name())
        };

        let simulate = build(Pass::Simulate, shaders.simulate_path())?;
        let project = build(Pass::Project, shaders.project_path())?;
        let rasterize = build(Pass::Rasterize, shaders.rasterize_path())?;

        Ok(Self {
            simulate,
            project,
            rasterize,
            layout,
        })
    }

    /// Pipeline for a pass
    pub fn pipeline(&self, pass: Pass) -> vk::Pipeline {
        match pass {
            Pass::Simulate => self.simulate.handle(),
            Pass::Project => self.project.handle(),
            Pass::Rasterize => self.rasterize.handle(),
        }
    }

    /// Shared layout
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout.handle()
    }
}
