//! # The `ResNet` Downsample Implementation.
//!
//! The projection shortcut of a residual unit; a strided ``1x1x1`` conv and a norm.

use crate::compat::normalization_wrapper::NormalizationConfig;
use crate::layers::blocks::conv_norm::{ConvNorm3d, ConvNorm3dConfig, ConvNorm3dMeta};
use crate::models::resnet::util::{
    CONV_INTO_RELU_INITIALIZER, scalar_to_array, strided_output_resolution,
};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::nn::conv::Conv3dConfig;
use burn::nn::{Initializer, PaddingConfig3d};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`ConvDownsample`] Meta trait.
pub trait ConvDownsampleMeta {
    /// The size of the in channels dimension.
    fn in_channels(&self) -> usize;

    /// The size of the out channels dimension.
    fn out_channels(&self) -> usize;

    /// The stride of the downsample layer.
    fn stride(&self) -> usize;

    /// Get the output resolution for a given input resolution.
    ///
    /// # Arguments
    ///
    /// - `input_resolution`: ``[in_depth, in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// ``[ceil(in_depth/stride), ceil(in_height/stride), ceil(in_width/stride)]``
    fn output_resolution(
        &self,
        input_resolution: [usize; 3],
    ) -> [usize; 3] {
        strided_output_resolution(input_resolution, self.stride())
    }
}

/// [`ConvDownsample`] configuration.
#[derive(Config, Debug)]
pub struct ConvDownsampleConfig {
    /// The size of the in channels dimension.
    pub in_channels: usize,

    /// The size of the out channels dimension.
    pub out_channels: usize,

    /// The stride of the downsample layer.
    #[config(default = 1)]
    pub stride: usize,

    /// The conv initializer.
    #[config(default = "CONV_INTO_RELU_INITIALIZER.clone()")]
    pub initializer: Initializer,

    /// The norm config; the feature size is auto-matched.
    #[config(default = "NormalizationConfig::default()")]
    pub norm: NormalizationConfig,
}

impl ConvDownsampleMeta for ConvDownsampleConfig {
    fn in_channels(&self) -> usize {
        self.in_channels
    }

    fn out_channels(&self) -> usize {
        self.out_channels
    }

    fn stride(&self) -> usize {
        self.stride
    }
}

impl ConvDownsampleConfig {
    /// Initialize a [`ConvDownsample`] `Module`.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ConvDownsample<B> {
        let config = ConvNorm3dConfig::new(
            Conv3dConfig::new([self.in_channels, self.out_channels], scalar_to_array(1))
                .with_stride(scalar_to_array(self.stride))
                .with_padding(PaddingConfig3d::Explicit(0, 0, 0))
                .with_initializer(self.initializer.clone())
                .with_bias(false),
        )
        .with_norm(self.norm.clone());

        ConvDownsample {
            conv_norm: config.init(device),
        }
    }
}

/// Downsample layer; a ``1x1x1`` conv to reduce the resolution and adjust the number of channels.
///
/// Maps ``[batch, in_channels, in_depth, in_height, in_width]`` to
/// ``[batch, out_channels, out_depth, out_height, out_width]`` tensors.
#[derive(Module, Debug)]
pub struct ConvDownsample<B: Backend> {
    /// Embedded conv/norm.
    pub conv_norm: ConvNorm3d<B>,
}

impl<B: Backend> ConvDownsampleMeta for ConvDownsample<B> {
    fn in_channels(&self) -> usize {
        self.conv_norm.in_channels()
    }

    fn out_channels(&self) -> usize {
        self.conv_norm.out_channels()
    }

    fn stride(&self) -> usize {
        self.conv_norm.stride()[0]
    }
}

impl<B: Backend> ConvDownsample<B> {
    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: a ``[batch, in_channels, in_depth, in_height, in_width]`` tensor.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_channels, out_depth, out_height, out_width]`` tensor.
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

        let out = self.conv_norm.forward(input);

        let [out_depth, out_height, out_width] =
            self.output_resolution([in_depth, in_height, in_width]);
        assert_shape_contract_periodically!(
            ["batch", "out_channels", "out_depth", "out_height", "out_width"],
            &out,
            &[
                ("batch", batch),
                ("out_channels", self.out_channels()),
                ("out_depth", out_depth),
                ("out_height", out_height),
                ("out_width", out_width),
            ],
        );

        out
    }
}
