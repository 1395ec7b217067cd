//! # `DeepLabV3`
//!
//! Volumetric `DeepLabV3`: an output-stride constrained `ResNet` backbone,
//! an atrous spatial pyramid pooling head, and a depth-collapsing output conv.

pub mod aspp;
pub mod backbone;
pub mod deeplab_model;
pub mod kinds;
