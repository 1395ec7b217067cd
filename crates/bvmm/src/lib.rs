#![warn(missing_docs)]
//!# bvmm - Burn Volumetric Models
//!
//! ## Notable Components
//!
//! * [`compat`] - compat code, for volumetric support not (yet) in ``burn``.
//!   * [`compat::normalization_wrapper::Normalization`] - norm layer abstraction wrapper.
//! * [`layers`] - reusable neural network modules.
//!   * [`layers::blocks`] - miscellaneous blocks.
//!     * [`layers::blocks::cna`] - ``Conv3d + Norm + Act`` block.
//!     * [`layers::blocks::conv_norm`] - ``Conv3d + Norm`` block.
//!   * [`layers::pool`] - 3d max and global average pooling.
//!   * [`layers::interpolate`] - align-corners trilinear interpolation.
//! * [`models`] - complete model families.
//!   * [`models::resnet`] - volumetric `ResNet`.
//!   * [`models::deeplab`] - volumetric `DeepLabV3`.
//!     * [`models::deeplab::deeplab_model::DeepLabV3`] - the segmentation model.

/// Test-only macro import.
#[cfg(test)]
#[allow(unused_imports)]
#[macro_use]
extern crate hamcrest;

pub mod compat;
pub mod layers;
pub mod models;
