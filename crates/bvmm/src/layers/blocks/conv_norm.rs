//! # `ConvNorm3d` Module
//!
//! A [`ConvNorm3d`] module is a [`Conv3d`] layer followed by a [`Normalization`] layer.

use crate::compat::conv_shape::{
    conv3d_output_resolution, expect_conv_output_shape, explicit_padding_3d,
};
use crate::compat::normalization_wrapper::{Normalization, NormalizationConfig};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv3d, Conv3dConfig};
use burn::prelude::{Backend, Tensor};

/// [`ConvNorm3d`] Meta.
pub trait ConvNorm3dMeta {
    /// Number of input channels.
    fn in_channels(&self) -> usize;

    /// Number of output channels.
    fn out_channels(&self) -> usize;

    /// Get the stride.
    fn stride(&self) -> [usize; 3];

    /// Predict the ``[depth, height, width]`` output resolution.
    fn output_resolution(
        &self,
        input_resolution: [usize; 3],
    ) -> [usize; 3];
}

/// [`ConvNorm3d`] Config.
#[derive(Config, Debug)]
pub struct ConvNorm3dConfig {
    /// The [`Conv3d`] config.
    pub conv: Conv3dConfig,

    /// The [`Normalization`] config.
    ///
    /// The feature size is matched to the conv output channels on init.
    #[config(default = "NormalizationConfig::default()")]
    pub norm: NormalizationConfig,
}

impl ConvNorm3dMeta for ConvNorm3dConfig {
    fn in_channels(&self) -> usize {
        self.conv.channels[0]
    }

    fn out_channels(&self) -> usize {
        self.conv.channels[1]
    }

    fn stride(&self) -> [usize; 3] {
        self.conv.stride
    }

    fn output_resolution(
        &self,
        input_resolution: [usize; 3],
    ) -> [usize; 3] {
        conv3d_output_resolution(&self.conv, input_resolution)
    }
}

impl From<Conv3dConfig> for ConvNorm3dConfig {
    fn from(conv: Conv3dConfig) -> Self {
        Self::new(conv)
    }
}

impl ConvNorm3dConfig {
    /// Initialize a [`ConvNorm3d`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> ConvNorm3d<B> {
        let norm = self.norm.with_num_features(self.conv.channels[1]);
        ConvNorm3d {
            conv: self.conv.init(device),
            norm: norm.init(device),
        }
    }
}

/// [`Conv3d`] and [`Normalization`] layer.
#[derive(Module, Debug)]
pub struct ConvNorm3d<B: Backend> {
    /// Internal Conv3d layer.
    pub conv: Conv3d<B>,

    /// Internal Norm Layer.
    pub norm: Normalization<B>,
}

impl<B: Backend> ConvNorm3dMeta for ConvNorm3d<B> {
    fn in_channels(&self) -> usize {
        self.conv.weight.shape().dims[1] * self.conv.groups
    }

    fn out_channels(&self) -> usize {
        self.conv.weight.shape().dims[0]
    }

    fn stride(&self) -> [usize; 3] {
        self.conv.stride
    }

    fn output_resolution(
        &self,
        input_resolution: [usize; 3],
    ) -> [usize; 3] {
        expect_conv_output_shape(
            input_resolution,
            self.conv.kernel_size,
            self.conv.stride,
            explicit_padding_3d(&self.conv.padding.0),
            self.conv.dilation,
        )
    }
}

impl<B: Backend> ConvNorm3d<B> {
    /// Forward Pass.
    pub fn forward(
        &self,
        input: Tensor<B, 5>,
    ) -> Tensor<B, 5> {
        let [batch, in_depth, in_height, in_width] = unpack_shape_contract!(
            ["batch", "in_channels", "in_depth", "in_height", "in_width"],
            &input,
            &["batch", "in_depth", "in_height", "in_width"],
            &[("in_channels", self.in_channels())],
        );

        let x = self.conv.forward(input);
        let x = self.norm.forward(x);

        #[cfg(debug_assertions)]
        {
            let [out_depth, out_height, out_width] =
                self.output_resolution([in_depth, in_height, in_width]);
            assert_shape_contract_periodically!(
                ["batch", "out_channels", "out_depth", "out_height", "out_width"],
                &x,
                &[
                    ("batch", batch),
                    ("out_channels", self.out_channels()),
                    ("out_depth", out_depth),
                    ("out_height", out_height),
                    ("out_width", out_width),
                ],
            );
        }
        #[cfg(not(debug_assertions))]
        let _ = (batch, in_depth, in_height, in_width);

        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::nn::{GroupNormConfig, PaddingConfig3d};

    #[test]
    fn test_conv_norm_config() {
        let config: ConvNorm3dConfig = Conv3dConfig::new([2, 4], [1, 1, 1])
            .with_stride([2, 2, 2])
            .with_padding(PaddingConfig3d::Explicit(0, 0, 0))
            .into();

        assert_eq!(config.in_channels(), 2);
        assert_eq!(config.out_channels(), 4);
        assert_eq!(config.stride(), [2, 2, 2]);
        assert_eq!(config.output_resolution([8, 7, 1]), [4, 4, 1]);
    }

    #[test]
    fn test_conv_norm_forward() {
        type B = NdArray<f32>;
        let device = Default::default();

        let layer: ConvNorm3d<B> = ConvNorm3dConfig::new(
            Conv3dConfig::new([2, 4], [1, 1, 1])
                .with_stride([2, 2, 2])
                .with_padding(PaddingConfig3d::Explicit(0, 0, 0))
                .with_bias(false),
        )
        .with_norm(GroupNormConfig::new(2, 0).into())
        .init(&device);

        assert_eq!(layer.norm.num_features(), 4);
        assert_eq!(layer.in_channels(), 2);
        assert_eq!(layer.out_channels(), 4);

        let input = Tensor::ones([1, 2, 4, 3, 2], &device);
        let output = layer.forward(input.clone());
        assert_eq!(output.dims(), [1, 4, 2, 2, 1]);

        let expected = layer.norm.forward(layer.conv.forward(input));
        output.to_data().assert_eq(&expected.to_data(), true);
    }
}
