//! # Model Families

pub mod deeplab;
pub mod resnet;
