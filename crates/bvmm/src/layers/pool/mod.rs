//! # Volumetric Pooling Layers

mod global_avg_pool_3d;
mod max_pool_3d;

pub use global_avg_pool_3d::*;
pub use max_pool_3d::*;
