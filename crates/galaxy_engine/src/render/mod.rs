//! Rendering
//!
//! Vulkan plumbing plus the camera that feeds the projection pass.

pub mod camera;
pub mod vulkan;

pub use camera::Camera;
