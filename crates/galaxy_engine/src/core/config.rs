//! # Galaxy configuration
//!
//! Every fixed parameter of a run (star count, resolution, timeouts, camera,
//! shader paths) lives in one immutable [`GalaxyConfig`] value that is passed
//! into construction. Missing fields fall back to the defaults below, so a
//! config file only needs to name what it changes.
//!
//! ```toml
//! [simulation]
//! star_count = 4096
//! seed = 7
//!
//! [timing]
//! upload_fence_policy = "fatal"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::{Config, ConfigError};
use crate::foundation::math::{Point3, Vec3};

/// Directories searched for compiled shaders, in order
pub const SHADER_SEARCH_DIRS: [&str; 3] = ["target/shaders/", "shaders/", "resources/shaders/"];

/// What to do when the one-time upload fence does not signal in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FenceTimeoutPolicy {
    /// Log and carry on
    #[default]
    Warn,
    /// Fail construction
    Fatal,
}

/// Window and output image settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Window title
    pub title: String,
    /// Width in pixels; also the rasterized image width
    pub width: u32,
    /// Height in pixels; also the rasterized image height
    pub height: u32,
    /// Color the rasterizer starts every pixel from (RGBA)
    pub background: [f32; 4],
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Galaxy".to_string(),
            width: 640,
            height: 480,
            background: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// Star population settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Number of stars
    pub star_count: u32,
    /// RNG seed for the initial star field; entropy when absent
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            star_count: 2048,
            seed: None,
        }
    }
}

/// Camera placement and projection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Eye position in simulation units
    pub position: [f32; 3],
    /// Point the camera looks at
    pub target: [f32; 3],
    /// Up direction
    pub up: [f32; 3],
    /// Vertical field of view in degrees
    pub fov_degrees: f32,
    /// Near clip distance
    pub near: f32,
    /// Far clip distance
    pub far: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            position: [0.0, 0.0, -1.0e11],
            target: [0.0, 0.0, 0.0],
            up: [0.0, 1.0, 0.0],
            fov_degrees: 90.0,
            near: 1.0e8,
            far: 1.0e13,
        }
    }
}

impl CameraConfig {
    /// Eye position as a point
    pub fn eye(&self) -> Point3 {
        Point3::from(self.position)
    }

    /// Look-at target as a point
    pub fn look_at(&self) -> Point3 {
        Point3::from(self.target)
    }

    /// Up vector
    pub fn up_vector(&self) -> Vec3 {
        Vec3::from(self.up)
    }
}

/// Compiled shader locations
///
/// Explicit paths win; otherwise each file name is looked up in
/// [`SHADER_SEARCH_DIRS`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    /// Simulation pass SPIR-V
    pub simulate: Option<PathBuf>,
    /// Projection pass SPIR-V
    pub project: Option<PathBuf>,
    /// Rasterization pass SPIR-V
    pub rasterize: Option<PathBuf>,
}

impl ShaderConfig {
    /// Simulation shader path
    pub fn simulate_path(&self) -> PathBuf {
        Self::resolve(self.simulate.as_deref(), "simulate.spv")
    }

    /// Projection shader path
    pub fn project_path(&self) -> PathBuf {
        Self::resolve(self.project.as_deref(), "project.spv")
    }

    /// Rasterization shader path
    pub fn rasterize_path(&self) -> PathBuf {
        Self::resolve(self.rasterize.as_deref(), "rasterize.spv")
    }

    fn resolve(explicit: Option<&Path>, file_name: &str) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        Self::with_path_resolution(file_name, &SHADER_SEARCH_DIRS)
    }

    /// First directory containing `file_name`, else the first candidate
    pub fn with_path_resolution(file_name: &str, dirs: &[&str]) -> PathBuf {
        dirs.iter()
            .map(|dir| Path::new(dir).join(file_name))
            .find(|candidate| candidate.exists())
            .unwrap_or_else(|| Path::new(dirs.first().copied().unwrap_or("./")).join(file_name))
    }
}

/// Wait bounds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Timeout for every bounded GPU wait, in nanoseconds
    pub timeout_ns: u64,
    /// How many timed-out polls of the frame fence are tolerated
    pub frame_fence_poll_limit: u32,
    /// Upload fence behaviour on timeout
    pub upload_fence_policy: FenceTimeoutPolicy,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            timeout_ns: 100_000_000,
            frame_fence_poll_limit: 50,
            upload_fence_policy: FenceTimeoutPolicy::Warn,
        }
    }
}

/// Diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level (`error`, `warn`, `info`, `debug`, `trace`)
    pub level: String,
    /// Enable Vulkan validation layers (debug builds only)
    pub validation_layers: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            validation_layers: cfg!(debug_assertions),
        }
    }
}

impl LoggingConfig {
    /// Parsed level filter
    pub fn level_filter(&self) -> Result<log::LevelFilter, ConfigError> {
        self.level
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("Unknown log level '{}'", self.level)))
    }
}

/// Complete configuration of one run
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GalaxyConfig {
    /// Window and image size
    pub window: WindowConfig,
    /// Star population
    pub simulation: SimulationConfig,
    /// Camera
    pub camera: CameraConfig,
    /// Shader paths
    pub shaders: ShaderConfig,
    /// Wait bounds
    pub timing: TimingConfig,
    /// Logging and validation
    pub logging: LoggingConfig,
}

impl Config for GalaxyConfig {}

impl GalaxyConfig {
    /// Set the star count
    pub fn with_star_count(mut self, star_count: u32) -> Self {
        self.simulation.star_count = star_count;
        self
    }

    /// Set the resolution
    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.window.width = width;
        self.window.height = height;
        self
    }

    /// Set the RNG seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.simulation.seed = Some(seed);
        self
    }

    /// Set the upload fence policy
    pub fn with_upload_fence_policy(mut self, policy: FenceTimeoutPolicy) -> Self {
        self.timing.upload_fence_policy = policy;
        self
    }

    /// Load from `path`, or return defaults when the file does not exist
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            log::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let config = Self::load_from_file(path)?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Reject values the renderer cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.simulation.star_count == 0 {
            return Err(ConfigError::Invalid("Star count must be at least 1".to_string()));
        }
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "Resolution must be non-zero, got {}x{}",
                self.window.width, self.window.height
            )));
        }
        if self.timing.timeout_ns == 0 {
            return Err(ConfigError::Invalid("Timeout must be non-zero".to_string()));
        }
        if self.timing.frame_fence_poll_limit == 0 {
            return Err(ConfigError::Invalid("Frame fence poll limit must be at least 1".to_string()));
        }
        if !(self.camera.fov_degrees > 0.0 && self.camera.fov_degrees < 180.0) {
            return Err(ConfigError::Invalid(format!(
                "Field of view must be in (0, 180) degrees, got {}",
                self.camera.fov_degrees
            )));
        }
        if !(self.camera.near > 0.0 && self.camera.far > self.camera.near) {
            return Err(ConfigError::Invalid("Clip planes must satisfy 0 < near < far".to_string()));
        }
        self.logging.level_filter()?;
        Ok(())
    }
}
