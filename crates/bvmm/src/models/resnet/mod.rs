//! # `ResNet`
//!
//! Volumetric `ResNet` stages, blocks and the classification network.

pub mod basic_block;
pub mod bottleneck;
pub mod downsample;
pub mod layer_block;
pub mod residual_block;
pub mod resnet_model;
pub mod stems;
pub mod util;
