//! # Input Stem
//!
//! The `ResNet` stem: a ``7x7x7`` stride 2 conv/norm/act followed by a
//! ``3x3x3`` stride 2 max pool; a total reduction of 4.

use crate::compat::normalization_wrapper::NormalizationConfig;
use crate::layers::blocks::cna::{CNA3d, CNA3dConfig, CNA3dMeta};
use crate::layers::pool::{MaxPool3d, MaxPool3dConfig, MaxPool3dMeta};
use crate::models::resnet::util::{CONV_INTO_RELU_INITIALIZER, scalar_to_array};
use bimm_contracts::unpack_shape_contract;
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::Conv3dConfig;
use burn::nn::{Initializer, PaddingConfig3d};
use burn::prelude::{Backend, Tensor};

/// [`ResNetStem`] Meta.
pub trait ResNetStemMeta {
    /// Input channels.
    fn in_channels(&self) -> usize;

    /// Output channels.
    fn out_channels(&self) -> usize;

    /// Predict the ``[depth, height, width]`` output resolution.
    fn output_resolution(
        &self,
        input_resolution: [usize; 3],
    ) -> [usize; 3];
}

/// [`ResNetStem`] Config.
#[derive(Config, Debug)]
pub struct ResNetStemConfig {
    /// Input channels.
    pub in_channels: usize,

    /// Output channels.
    #[config(default = 64)]
    pub out_channels: usize,

    /// Conv initializer.
    #[config(default = "CONV_INTO_RELU_INITIALIZER.clone()")]
    pub initializer: Initializer,

    /// Normalization config; the feature size is auto-matched.
    #[config(default = "NormalizationConfig::default()")]
    pub normalization: NormalizationConfig,
}

impl ResNetStemConfig {
    /// The stem conv/norm/act config.
    pub fn cna_config(&self) -> CNA3dConfig {
        CNA3dConfig::new(
            Conv3dConfig::new([self.in_channels, self.out_channels], scalar_to_array(7))
                .with_stride(scalar_to_array(2))
                .with_padding(PaddingConfig3d::Explicit(3, 3, 3))
                .with_initializer(self.initializer.clone())
                .with_bias(false),
        )
        .with_norm(self.normalization.clone())
        .match_norm_features()
    }

    /// The stem pool config.
    pub fn pool_config(&self) -> MaxPool3dConfig {
        MaxPool3dConfig::new(scalar_to_array(3))
            .with_strides(scalar_to_array(2))
            .with_padding(scalar_to_array(1))
    }

    /// Initialize a [`ResNetStem`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ResNetStem<B> {
        ResNetStem {
            cna: self.cna_config().init(device),
            pool: self.pool_config().init(),
        }
    }
}

impl ResNetStemMeta for ResNetStemConfig {
    fn in_channels(&self) -> usize {
        self.in_channels
    }

    fn out_channels(&self) -> usize {
        self.out_channels
    }

    fn output_resolution(
        &self,
        input_resolution: [usize; 3],
    ) -> [usize; 3] {
        let x = self.cna_config().output_resolution(input_resolution);
        self.pool_config().output_resolution(x)
    }
}

/// `ResNet` stem.
#[derive(Module, Debug)]
pub struct ResNetStem<B: Backend> {
    /// The stem convolution.
    pub cna: CNA3d<B>,

    /// The stem pooling.
    pub pool: MaxPool3d,
}

impl<B: Backend> ResNetStemMeta for ResNetStem<B> {
    fn in_channels(&self) -> usize {
        self.cna.in_channels()
    }

    fn out_channels(&self) -> usize {
        self.cna.out_channels()
    }

    fn output_resolution(
        &self,
        input_resolution: [usize; 3],
    ) -> [usize; 3] {
        self.pool
            .output_resolution(self.cna.output_resolution(input_resolution))
    }
}

impl<B: Backend> ResNetStem<B> {
    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, depth, height, width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, out_depth, out_height, out_width]``
    pub fn forward(
        &self,
        input: Tensor<B, 5>,
    ) -> Tensor<B, 5> {
        let [_batch] = unpack_shape_contract!(
            ["batch", "in_channels", "depth", "height", "width"],
            &input,
            &["batch"],
            &[("in_channels", self.in_channels())],
        );

        let x = self.cna.forward(input);
        self.pool.forward(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn test_stem_config() {
        let config = ResNetStemConfig::new(1);
        assert_eq!(config.in_channels(), 1);
        assert_eq!(config.out_channels(), 64);
        assert_eq!(config.output_resolution([16, 16, 16]), [4, 4, 4]);
        assert_eq!(config.output_resolution([15, 9, 1]), [4, 3, 1]);
        assert_eq!(config.cna_config().norm.num_features(), 64);
    }

    #[test]
    fn test_stem_forward() {
        type B = NdArray<f32>;
        let device = Default::default();

        let stem: ResNetStem<B> = ResNetStemConfig::new(2).with_out_channels(8).init(&device);
        assert_eq!(stem.in_channels(), 2);
        assert_eq!(stem.out_channels(), 8);
        assert!(stem.cna.conv.bias.is_none());

        let output = stem.forward(Tensor::ones([1, 2, 8, 12, 5], &device));
        assert_eq!(output.dims(), [1, 8, 2, 3, 2]);
        assert_eq!(stem.output_resolution([8, 12, 5]), [2, 3, 2]);
    }
}
