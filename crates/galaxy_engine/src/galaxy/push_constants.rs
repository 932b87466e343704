//! Push constants shared by the three compute passes

use ash::vk;
use bytemuck::{Pod, Zeroable};

use crate::foundation::math::{to_columns, Mat4};

/// Per-dispatch constants, laid out exactly like the shaders' push block
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PushConstants {
    /// World → clip transform, column-major
    pub view_projection: [[f32; 4]; 4],
    /// Target size in pixels
    pub screen_dimensions: [i32; 2],
    /// Position generation the pass reads
    pub positions_index: u32,
}

/// Size of [`PushConstants`] in bytes
pub const PUSH_CONSTANTS_SIZE: u32 = std::mem::size_of::<PushConstants>() as u32;

impl PushConstants {
    /// Build from a matrix, a pixel size and a generation index
    pub fn new(view_projection: &Mat4, screen: (u32, u32), positions_index: u32) -> Self {
        Self {
            view_projection: to_columns(view_projection),
            screen_dimensions: [
                i32::try_from(screen.0).unwrap_or(i32::MAX),
                i32::try_from(screen.1).unwrap_or(i32::MAX),
            ],
            positions_index,
        }
    }

    /// Same constants for another generation
    #[must_use]
    pub fn with_positions_index(mut self, positions_index: u32) -> Self {
        self.positions_index = positions_index;
        self
    }

    /// Raw bytes for `vkCmdPushConstants`
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

/// The single compute-stage range covering [`PushConstants`]
pub fn push_constant_range() -> vk::PushConstantRange {
    vk::PushConstantRange {
        stage_flags: vk::ShaderStageFlags::COMPUTE,
        offset: 0,
        size: PUSH_CONSTANTS_SIZE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_is_76_bytes() {
        assert_eq!(PUSH_CONSTANTS_SIZE, 76);
        assert_eq!(std::mem::align_of::<PushConstants>(), 4);
    }

    #[test]
    fn test_range_matches_struct() {
        let range = push_constant_range();
        assert_eq!(range.offset, 0);
        assert_eq!(range.size, 76);
        assert_eq!(range.stage_flags, vk::ShaderStageFlags::COMPUTE);
    }

    #[test]
    fn test_bytes_carry_index_last() {
        let push = PushConstants::new(&Mat4::identity(), (640, 480), 0).with_positions_index(1);
        let bytes = push.as_bytes();

        assert_eq!(bytes.len(), 76);
        assert_eq!(&bytes[72..76], &1_u32.to_ne_bytes());
        assert_eq!(&bytes[64..68], &640_i32.to_ne_bytes());
        assert_eq!(&bytes[0..4], &1.0_f32.to_ne_bytes());
    }
}
