//! # Global Average Pooling

use burn::module::Module;
use burn::prelude::{Backend, Tensor};

/// Averages each channel over the whole volume.
///
/// Maps ``[batch, channels, depth, height, width]`` to ``[batch, channels, 1, 1, 1]``;
/// an adaptive average pool with a unit output size.
#[derive(Module, Clone, Debug, Default)]
pub struct GlobalAvgPool3d;

impl GlobalAvgPool3d {
    /// Create the layer.
    pub fn new() -> Self {
        Self
    }

    /// Forward Pass.
    pub fn forward<B: Backend>(
        &self,
        input: Tensor<B, 5>,
    ) -> Tensor<B, 5> {
        input.mean_dim(2).mean_dim(3).mean_dim(4)
    }
}
