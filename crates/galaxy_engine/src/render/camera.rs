//! # Camera
//!
//! Right-handed look-at camera with a perspective projection. The projection
//! flips Y so that +Y in world space ends up at the top of the Vulkan
//! framebuffer. Only clip-space x, y and w are consumed by the projection
//! pass, so the depth convention of the projection does not matter here.

use crate::core::config::CameraConfig;
use crate::foundation::math::{Mat4, Point3, Vec3};
use crate::galaxy::push_constants::PushConstants;

/// Perspective camera
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    /// Eye position in world space
    pub position: Point3,
    /// Point the camera looks at
    pub target: Point3,
    /// Up direction
    pub up: Vec3,
    /// Vertical field of view in radians
    pub fov: f32,
    /// Width / height
    pub aspect: f32,
    /// Near clip distance
    pub near: f32,
    /// Far clip distance
    pub far: f32,
}

impl Camera {
    /// Camera for a `width` × `height` target
    pub fn from_config(config: &CameraConfig, width: u32, height: u32) -> Self {
        Self {
            position: config.eye(),
            target: config.look_at(),
            up: config.up_vector(),
            fov: config.fov_degrees.to_radians(),
            aspect: width as f32 / height.max(1) as f32,
            near: config.near,
            far: config.far,
        }
    }

    /// World → view transform
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(&self.position, &self.target, &self.up)
    }

    /// View → clip transform with Vulkan's downward Y
    pub fn projection_matrix(&self) -> Mat4 {
        let mut projection = Mat4::new_perspective(self.aspect, self.fov, self.near, self.far);
        projection[(1, 1)] *= -1.0;
        projection
    }

    /// World → clip transform
    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// Push constants for one pass over a `screen` sized target
    pub fn push_constants(&self, screen: (u32, u32), positions_index: u32) -> PushConstants {
        PushConstants::new(&self.view_projection(), screen, positions_index)
    }
}
