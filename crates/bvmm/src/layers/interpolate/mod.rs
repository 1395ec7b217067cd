//! # Interpolation

pub mod trilinear;
