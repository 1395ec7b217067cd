//! Common volumetric layers and operations in Burn.

pub mod blocks;
pub mod interpolate;
pub mod pool;
