//! # Composite Blocks

pub mod cna;
pub mod conv_norm;
