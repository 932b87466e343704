//! Vulkan backend
//!
//! Thin RAII wrappers over `ash`. Every wrapper holds a cloned `ash::Device`
//! and destroys only the objects it created.

pub mod buffer;
pub mod commands;
pub mod context;
pub mod descriptor_set;
pub mod image;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod window;

pub use buffer::Buffer;
pub use commands::{CommandPool, CommandRecorder, CommandSink};
pub use context::{
    LogicalDevice, PhysicalDeviceInfo, QueueFamilyIndices, VulkanContext, VulkanError,
    VulkanInstance, VulkanResult,
};
pub use descriptor_set::{DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBuilder, DescriptorSetWriter};
pub use image::{image_layout_barrier, LayoutTransition, StorageImage};
pub use shader::{ComputePipeline, PipelineLayout, ShaderModule};
pub use swapchain::{PresentStatus, Swapchain};
pub use sync::{BufferBarrierBuilder, Fence, FenceWait, Semaphore};
pub use window::{Window, WindowError};
