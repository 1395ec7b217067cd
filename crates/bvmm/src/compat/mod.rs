//! # Compat
//!
//! Layer abstraction wrappers, and volumetric support code
//! not (yet) provided by ``burn``.

pub mod conv_shape;
pub mod normalization_wrapper;
