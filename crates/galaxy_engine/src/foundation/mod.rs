//! Foundation module - math aliases and logging

pub mod logging;
pub mod math;
