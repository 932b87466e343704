//! Shader modules and compute pipelines

use ash::{vk, Device};
use std::ffi::CStr;
use std::io::Cursor;
use std::path::Path;
use crate::render::vulkan::{VulkanError, VulkanResult};

/// Decode SPIR-V bytes into words, rejecting input that is not whole words
pub fn spirv_words(bytes: &[u8]) -> VulkanResult<Vec<u32>> {
    ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|e| {
        log::error!("[SHADER] Invalid SPIR-V ({} bytes): {}", bytes.len(), e);
        VulkanError::InitializationFailed(format!("Invalid SPIR-V: {}", e))
    })
}

/// SPIR-V shader module wrapper with automatic resource management
pub struct ShaderModule {
    device: Device,
    module: vk::ShaderModule,
}

impl ShaderModule {
    /// Create shader module from SPIR-V bytecode
    pub fn from_bytes(device: &Device, bytes: &[u8]) -> VulkanResult<Self> {
        log::debug!("[SHADER] Creating shader module from {} bytes", bytes.len());

        let words = spirv_words(bytes)?;
        let create_info = vk::ShaderModuleCreateInfo::builder().code(&words);

        let module = unsafe {
            device.create_shader_module(&create_info, None)
                .map_err(|e| {
                    log::error!("[SHADER] vkCreateShaderModule failed: {:?}", e);
                    VulkanError::Api(e)
                })?
        };

        Ok(Self { device: device.clone(), module })
    }

    /// Load shader from SPIR-V file
    pub fn from_file<P: AsRef<Path>>(device: &Device, path: P) -> VulkanResult<Self> {
        let path_ref = path.as_ref();
        log::debug!("[SHADER] Loading shader from: {:?}", path_ref);

        let bytes = std::fs::read(path_ref).map_err(|e| {
            log::error!("[SHADER] Failed to read shader file {:?}: {}", path_ref, e);
            VulkanError::ShaderLoad {
                path: path_ref.display().to_string(),
                reason: e.to_string(),
            }
        })?;

        Self::from_bytes(device, &bytes)
    }

    /// Get shader module handle
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.module, None);
        }
    }
}

/// Pipeline layout wrapper with RAII cleanup
pub struct PipelineLayout {
    device: Device,
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    /// Create a layout from descriptor set layouts (in set order) and push constant ranges
    pub fn new(
        device: &Device,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> VulkanResult<Self> {
        let create_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constant_ranges);

        let layout = unsafe {
            device.create_pipeline_layout(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device: device.clone(), layout })
    }

    /// Get the layout handle
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Compute pipeline wrapper with RAII cleanup
///
/// The layout is borrowed at creation and must outlive the pipeline.
pub struct ComputePipeline {
    device: Device,
    pipeline: vk::Pipeline,
    name: String,
}

impl ComputePipeline {
    /// Build a compute pipeline from a module's `main` entry point
    pub fn new(
        device: &Device,
        layout: &PipelineLayout,
        shader: &ShaderModule,
        name: &str,
    ) -> VulkanResult<Self> {
        let entry = CStr::from_bytes_with_nul(b"main\0")
            .map_err(|e| VulkanError::InitializationFailed(e.to_string()))?;

        let stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(shader.handle())
            .name(entry)
            .build();

        let create_info = vk::ComputePipelineCreateInfo::builder()
            .stage(stage)
            .layout(layout.handle())
            .build();

        let pipelines = unsafe {
            device.create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|(_, e)| {
                    log::error!("[SHADER] Failed to create {} pipeline: {:?}", name, e);
                    VulkanError::Api(e)
                })?
        };

        let pipeline = pipelines.into_iter().next().ok_or_else(|| {
            VulkanError::InitializationFailed(format!("No pipeline returned for {}", name))
        })?;

        log::debug!("[SHADER] Created {} compute pipeline", name);
        Ok(Self {
            device: device.clone(),
            pipeline,
            name: name.to_string(),
        })
    }

    /// Get the pipeline handle
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Name used in logs
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for ComputePipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn test_spirv_words_decodes_little_endian() {
        let mut bytes = SPIRV_MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&0x0001_0300_u32.to_le_bytes());

        let words = spirv_words(&bytes).unwrap();
        assert_eq!(words, vec![SPIRV_MAGIC, 0x0001_0300]);
    }

    #[test]
    fn test_spirv_words_rejects_truncated_input() {
        let mut bytes = SPIRV_MAGIC.to_le_bytes().to_vec();
        bytes.push(0);

        assert!(spirv_words(&bytes).is_err());
    }
}
