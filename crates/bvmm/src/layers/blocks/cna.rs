//! # `CNA3d` - conv/norm/activation block.
//!
//! A [`CNA3d`] module is:
//! * a [`Conv3d`] layer,
//! * a [`Normalization`] layer,
//! * a [`Relu`] activation.
//!
//! With support for hooking the forward method,
//! to run code between the norm and activation layers.

use crate::compat::conv_shape::{
    conv3d_output_resolution, expect_conv_output_shape, explicit_padding_3d,
};
use crate::compat::normalization_wrapper::{Normalization, NormalizationConfig};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::Relu;
use burn::nn::conv::{Conv3d, Conv3dConfig};
use burn::prelude::{Backend, Tensor};

/// Abstract policy for [`CNA3d`] Config.
///
/// Defines a [`NormalizationConfig`],
/// and can be lifted to a [`CNA3dConfig`] to match a [`Conv3dConfig`].
///
/// The abstract [`NormalizationConfig`] will be feature matched
/// with the target [`Conv3dConfig`].
#[derive(Config, Debug)]
pub struct AbstractCNA3dConfig {
    /// The [`Normalization`] config.
    #[config(default = "NormalizationConfig::default()")]
    pub norm: NormalizationConfig,
}

impl AbstractCNA3dConfig {
    /// Merge with a [`Conv3dConfig`] to construct a [`CNA3dConfig`].
    pub fn build_config(
        &self,
        conv: Conv3dConfig,
    ) -> CNA3dConfig {
        CNA3dConfig {
            conv,
            norm: self.norm.clone(),
        }
        .match_norm_features()
    }
}

/// [`CNA3d`] Meta.
pub trait CNA3dMeta {
    /// Number of input channels.
    fn in_channels(&self) -> usize;

    /// Number of output channels.
    fn out_channels(&self) -> usize;

    /// Get the stride.
    fn stride(&self) -> [usize; 3];

    /// Get the dilation.
    fn dilation(&self) -> [usize; 3];

    /// Predict the ``[depth, height, width]`` output resolution.
    fn output_resolution(
        &self,
        input_resolution: [usize; 3],
    ) -> [usize; 3];
}

/// [`CNA3d`] Config.
///
/// Implements [`CNA3dMeta`].
#[derive(Config, Debug)]
pub struct CNA3dConfig {
    /// The [`Conv3d`] config.
    pub conv: Conv3dConfig,

    /// The [`Normalization`] config.
    #[config(default = "NormalizationConfig::default()")]
    pub norm: NormalizationConfig,
}

impl From<Conv3dConfig> for CNA3dConfig {
    fn from(conv: Conv3dConfig) -> Self {
        Self::new(conv)
    }
}

impl CNA3dMeta for CNA3dConfig {
    fn in_channels(&self) -> usize {
        self.conv.channels[0]
    }

    fn out_channels(&self) -> usize {
        self.conv.channels[1]
    }

    fn stride(&self) -> [usize; 3] {
        self.conv.stride
    }

    fn dilation(&self) -> [usize; 3] {
        self.conv.dilation
    }

    fn output_resolution(
        &self,
        input_resolution: [usize; 3],
    ) -> [usize; 3] {
        conv3d_output_resolution(&self.conv, input_resolution)
    }
}

impl CNA3dConfig {
    /// Initialize a [`CNA3d`].
    ///
    /// Auto-matches the norm layer input channels
    /// to the conv layer's output channels.
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> CNA3d<B> {
        let cfg = self.match_norm_features();
        CNA3d {
            conv: cfg.conv.init(device),
            norm: cfg.norm.init(device),
            act: Relu::new(),
        }
    }

    /// Adjust the norm features to match the conv output size.
    ///
    /// [`CNA3dConfig::init`] does this automatically.
    pub fn match_norm_features(self) -> Self {
        let features = self.out_channels();
        let norm = self.norm.with_num_features(features);
        Self { norm, ..self }
    }
}

/// Sequenced conv/norm/activation block.
///
/// Implements [`CNA3dMeta`].
#[derive(Module, Debug)]
pub struct CNA3d<B: Backend> {
    /// Internal Conv3d layer.
    pub conv: Conv3d<B>,

    /// Internal Norm Layer.
    pub norm: Normalization<B>,

    /// Activation layer.
    pub act: Relu,
}

impl<B: Backend> CNA3dMeta for CNA3d<B> {
    fn in_channels(&self) -> usize {
        self.conv.weight.shape().dims[1] * self.conv.groups
    }

    fn out_channels(&self) -> usize {
        self.conv.weight.shape().dims[0]
    }

    fn stride(&self) -> [usize; 3] {
        self.conv.stride
    }

    fn dilation(&self) -> [usize; 3] {
        self.conv.dilation
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

impl<B: Backend> CNA3d<B> {
    /// Forward Pass.
    ///
    /// Applies the conv/norm/act layers in sequence.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, in_depth, in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, out_depth, out_height, out_width]``
    pub fn forward(
        &self,
        input: Tensor<B, 5>,
    ) -> Tensor<B, 5> {
        self.hook_forward(input, |x| x)
    }

    /// Hooked Forward Pass.
    ///
    /// Applies the hook after normalization but before activation.
    ///
    /// ```rust,ignore
    /// let x = self.conv.forward(input);
    /// let x = self.norm.forward(x);
    /// let x = hook(x);
    /// let x = self.act.forward(x);
    /// return x
    /// ```
    pub fn hook_forward<F>(
        &self,
        input: Tensor<B, 5>,
        hook: F,
    ) -> Tensor<B, 5>
    where
        F: FnOnce(Tensor<B, 5>) -> Tensor<B, 5>,
    {
        let [batch, in_depth, in_height, in_width] = unpack_shape_contract!(
            ["batch", "in_channels", "in_depth", "in_height", "in_width"],
            &input,
            &["batch", "in_depth", "in_height", "in_width"],
            &[("in_channels", self.in_channels())]
        );
        let [out_depth, out_height, out_width] =
            self.output_resolution([in_depth, in_height, in_width]);

        let x = self.conv.forward(input);
        let x = self.norm.forward(x);
        let x = hook(x);
        let x = self.act.forward(x);

        assert_shape_contract_periodically!(
            ["batch", "out_channels", "out_depth", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("out_channels", self.out_channels()),
                ("out_depth", out_depth),
                ("out_height", out_height),
                ("out_width", out_width)
            ]
        );

        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use burn::nn::{BatchNormConfig, GroupNormConfig, PaddingConfig3d};
    use burn::tensor::Distribution;

    #[test]
    fn test_cna_config() {
        let abstract_config = AbstractCNA3dConfig::new()
            .with_norm(GroupNormConfig::new(2, 0).into());

        let config = abstract_config.build_config(
            Conv3dConfig::new([2, 4], [3, 3, 3])
                .with_stride([2, 2, 2])
                .with_padding(PaddingConfig3d::Explicit(1, 1, 1))
                .with_bias(false),
        );

        assert_eq!(config.in_channels(), 2);
        assert_eq!(config.out_channels(), 4);
        assert_eq!(config.stride(), [2, 2, 2]);
        assert_eq!(config.dilation(), [1, 1, 1]);
        assert_eq!(config.norm.num_features(), 4);
        assert_eq!(config.output_resolution([8, 7, 6]), [4, 4, 3]);
    }

    #[test]
    fn test_cna() {
        type B = Autodiff<NdArray<f32>>;
        let device = Default::default();

        let config = CNA3dConfig::new(
            Conv3dConfig::new([2, 4], [3, 3, 3])
                .with_stride([2, 2, 2])
                .with_padding(PaddingConfig3d::Explicit(1, 1, 1))
                .with_bias(false),
        )
        .with_norm(BatchNormConfig::new(0).into());

        let layer: CNA3d<B> = config.init(&device);
        assert_eq!(layer.in_channels(), 2);
        assert_eq!(layer.out_channels(), 4);
        assert_eq!(layer.stride(), [2, 2, 2]);
        assert_eq!(layer.output_resolution([6, 6, 5]), [3, 3, 3]);

        let input = Tensor::random([2, 2, 6, 6, 5], Distribution::Default, &device);

        let output = layer.forward(input.clone());
        assert_eq!(output.dims(), [2, 4, 3, 3, 3]);

        let expected = {
            let x = layer.conv.forward(input.clone());
            let x = layer.norm.forward(x);
            layer.act.forward(x)
        };
        output.to_data().assert_eq(&expected.to_data(), true);

        let hook = |x| x * 2.0;
        let output = layer.hook_forward(input.clone(), hook);
        let expected = {
            let x = layer.conv.forward(input);
            let x = layer.norm.forward(x);
            layer.act.forward(hook(x))
        };
        output.to_data().assert_eq(&expected.to_data(), true);
    }

    #[test]
    #[should_panic]
    fn test_cna_channel_mismatch() {
        type B = NdArray<f32>;
        let device = Default::default();

        let layer: CNA3d<B> = CNA3dConfig::new(Conv3dConfig::new([2, 4], [1, 1, 1])).init(&device);
        layer.forward(Tensor::zeros([1, 3, 2, 2, 2], &device));
    }
}
