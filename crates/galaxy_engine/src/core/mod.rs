//! Core engine types

pub mod config;

pub use config::{FenceTimeoutPolicy, GalaxyConfig};
