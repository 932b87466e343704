//! Host-side star storage
//!
//! Stars are kept column-wise so each attribute can be handed to a staging
//! buffer as one tightly packed byte slice.

use ash::vk;
use rand::Rng;

use crate::foundation::math::Vec3;

/// Scale applied to the unit position range when seeding
pub const POSITION_SCALE: f32 = 3.0e9;

/// Smallest seeded weight (18^8)
pub const MIN_WEIGHT: f32 = 11_019_960_576.0;

/// Upper bound (exclusive) of seeded weights
pub const MAX_WEIGHT: f32 = 2.0e20;

/// One point mass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Star {
    /// Position in simulation units
    pub position: Vec3,
    /// Linear RGB color in [0, 1]
    pub tint: Vec3,
    /// Mass-like weight
    pub weight: f32,
}

impl Star {
    /// Create a star
    pub fn new(position: Vec3, tint: Vec3, weight: f32) -> Self {
        Self { position, tint, weight }
    }
}

/// Index-aligned columns of star attributes
///
/// The three columns always have the same length and a star keeps its index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StarData {
    positions: Vec<[f32; 3]>,
    tints: Vec<[f32; 3]>,
    weights: Vec<f32>,
}

impl StarData {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty store with room for `capacity` stars
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            positions: Vec::with_capacity(capacity),
            tints: Vec::with_capacity(capacity),
            weights: Vec::with_capacity(capacity),
        }
    }

    /// Seed `count` stars
    ///
    /// Tints are uniform in [0, 1), positions uniform in [-10, 10) scaled by
    /// [`POSITION_SCALE`], weights uniform in [`MIN_WEIGHT`], [`MAX_WEIGHT`]).
    pub fn random<R: Rng>(count: usize, rng: &mut R) -> Self {
        let mut stars = Self::with_capacity(count);
        for _ in 0..count {
            let tint = Vec3::new(rng.gen(), rng.gen(), rng.gen());
            let position = Vec3::new(
                rng.gen_range(-10.0_f32..10.0),
                rng.gen_range(-10.0_f32..10.0),
                rng.gen_range(-10.0_f32..10.0),
            ) * POSITION_SCALE;
            let weight = rng.gen_range(MIN_WEIGHT..MAX_WEIGHT);
            stars.push(Star::new(position, tint, weight));
        }
        stars
    }

    /// Append a star
    pub fn push(&mut self, star: Star) {
        self.positions.push(star.position.into());
        self.tints.push(star.tint.into());
        self.weights.push(star.weight);
    }

    /// Number of stars
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Whether the store holds no stars
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Star at `index`, if any
    pub fn get(&self, index: usize) -> Option<Star> {
        Some(Star {
            position: Vec3::from(*self.positions.get(index)?),
            tint: Vec3::from(*self.tints.get(index)?),
            weight: *self.weights.get(index)?,
        })
    }

    /// All stars in index order
    pub fn iter(&self) -> impl Iterator<Item = Star> + '_ {
        (0..self.len()).filter_map(|i| self.get(i))
    }

    /// Position column as bytes (12 per star)
    pub fn position_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.positions)
    }

    /// Tint column as bytes (12 per star)
    pub fn tint_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.tints)
    }

    /// Weight column as bytes (4 per star)
    pub fn weight_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.weights)
    }

    /// Device buffer sizes for this many stars
    pub fn buffer_sizes(&self) -> StarBufferSizes {
        StarBufferSizes::for_count(self.len())
    }
}

impl FromIterator<Star> for StarData {
    fn from_iter<I: IntoIterator<Item = Star>>(iter: I) -> Self {
        let mut stars = Self::new();
        for star in iter {
            stars.push(star);
        }
        stars
    }
}

/// Byte sizes of the per-star device buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StarBufferSizes {
    /// One position generation (vec3 per star)
    pub positions: vk::DeviceSize,
    /// Tints (vec3 per star)
    pub tints: vk::DeviceSize,
    /// Weights (float per star)
    pub weights: vk::DeviceSize,
    /// Screen coordinates (vec2 per star)
    pub coords: vk::DeviceSize,
    /// Velocities (vec3 per star)
    pub velocities: vk::DeviceSize,
}

impl StarBufferSizes {
    /// Sizes for `count` stars
    pub fn for_count(count: usize) -> Self {
        let n = count as vk::DeviceSize;
        Self {
            positions: n * 12,
            tints: n * 12,
            weights: n * 4,
            coords: n * 8,
            velocities: n * 12,
        }
    }
}
