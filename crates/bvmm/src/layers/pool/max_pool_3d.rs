//! # `MaxPool3d`
//!
//! Volumetric max pooling over ``[batch, channels, depth, height, width]`` tensors.
//!
//! The pooling box is the product of per-axis windows, so the max over the box
//! is the max over depth of the max over ``(height, width)``. The module composes
//! a [`MaxPool2d`] over each depth slice with a [`MaxPool1d`] over depth.

use crate::compat::conv_shape::expect_conv_output_shape;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::pool::{MaxPool1d, MaxPool1dConfig, MaxPool2d, MaxPool2dConfig};
use burn::nn::{PaddingConfig1d, PaddingConfig2d};
use burn::prelude::{Backend, Tensor};

/// [`MaxPool3d`] Meta.
pub trait MaxPool3dMeta {
    /// ``[depth, height, width]`` kernel size.
    fn kernel_size(&self) -> [usize; 3];

    /// ``[depth, height, width]`` strides.
    fn strides(&self) -> [usize; 3];

    /// ``[depth, height, width]`` symmetric padding.
    fn padding(&self) -> [usize; 3];

    /// ``[depth, height, width]`` dilation.
    fn dilation(&self) -> [usize; 3];

    /// Predict the ``[depth, height, width]`` output resolution.
    fn output_resolution(
        &self,
        input_resolution: [usize; 3],
    ) -> [usize; 3] {
        expect_conv_output_shape(
            input_resolution,
            self.kernel_size(),
            self.strides(),
            self.padding(),
            self.dilation(),
        )
    }
}

/// [`MaxPool3d`] Config.
#[derive(Config, Debug)]
pub struct MaxPool3dConfig {
    /// The size of the kernel.
    pub kernel_size: [usize; 3],

    /// The strides.
    #[config(default = "[1, 1, 1]")]
    pub strides: [usize; 3],

    /// Symmetric padding; padded cells never win the max.
    #[config(default = "[0, 0, 0]")]
    pub padding: [usize; 3],

    /// The dilation.
    #[config(default = "[1, 1, 1]")]
    pub dilation: [usize; 3],
}

impl MaxPool3dMeta for MaxPool3dConfig {
    fn kernel_size(&self) -> [usize; 3] {
        self.kernel_size
    }

    fn strides(&self) -> [usize; 3] {
        self.strides
    }

    fn padding(&self) -> [usize; 3] {
        self.padding
    }

    fn dilation(&self) -> [usize; 3] {
        self.dilation
    }
}

impl MaxPool3dConfig {
    /// Initialize a [`MaxPool3d`].
    pub fn init(&self) -> MaxPool3d {
        let [kd, kh, kw] = self.kernel_size;
        let [sd, sh, sw] = self.strides;
        let [pd, ph, pw] = self.padding;
        let [dd, dh, dw] = self.dilation;

        MaxPool3d {
            plane: MaxPool2dConfig::new([kh, kw])
                .with_strides([sh, sw])
                .with_padding(PaddingConfig2d::Explicit(ph, pw))
                .with_dilation([dh, dw])
                .init(),
            depth: MaxPool1dConfig::new(kd)
                .with_stride(sd)
                .with_padding(PaddingConfig1d::Explicit(pd))
                .with_dilation(dd)
                .init(),
        }
    }
}

/// 3D max pooling layer.
///
/// Implements [`MaxPool3dMeta`].
#[derive(Module, Clone, Debug)]
pub struct MaxPool3d {
    /// Pooling over ``(height, width)``.
    pub plane: MaxPool2d,

    /// Pooling over ``depth``.
    pub depth: MaxPool1d,
}

impl MaxPool3dMeta for MaxPool3d {
    fn kernel_size(&self) -> [usize; 3] {
        let [kh, kw] = self.plane.kernel_size;
        [self.depth.kernel_size, kh, kw]
    }

    fn strides(&self) -> [usize; 3] {
        let [sh, sw] = self.plane.stride;
        [self.depth.stride, sh, sw]
    }

    fn padding(&self) -> [usize; 3] {
        let pd = match &self.depth.padding.0 {
            PaddingConfig1d::Explicit(p) => *p,
            _ => 0,
        };
        let [ph, pw] = match &self.plane.padding.0 {
            PaddingConfig2d::Explicit(h, w) => [*h, *w],
            _ => [0, 0],
        };
        [pd, ph, pw]
    }

    fn dilation(&self) -> [usize; 3] {
        let [dh, dw] = self.plane.dilation;
        [self.depth.dilation, dh, dw]
    }
}

impl MaxPool3d {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, channels, in_depth, in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, channels, out_depth, out_height, out_width]``
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn forward<B: Backend>(
        &self,
        input: Tensor<B, 5>,
    ) -> Tensor<B, 5> {
        let [batch, channels, in_depth, in_height, in_width] = unpack_shape_contract!(
            ["batch", "channels", "in_depth", "in_height", "in_width"],
            &input,
            &["batch", "channels", "in_depth", "in_height", "in_width"],
            &[],
        );

        let x = input.reshape([batch, channels * in_depth, in_height, in_width]);
        let x = self.plane.forward(x);
        let [_, _, out_height, out_width] = x.dims();

        let x = x
            .reshape([batch * channels, in_depth, out_height * out_width])
            .swap_dims(1, 2);
        let x = self.depth.forward(x);
        let out_depth = x.dims()[2];

        let x = x
            .swap_dims(1, 2)
            .reshape([batch, channels, out_depth, out_height, out_width]);

        #[cfg(debug_assertions)]
        {
            let [d, h, w] = self.output_resolution([in_depth, in_height, in_width]);
            assert_shape_contract_periodically!(
                ["batch", "channels", "out_depth", "out_height", "out_width"],
                &x,
                &[
                    ("batch", batch),
                    ("channels", channels),
                    ("out_depth", d),
                    ("out_height", h),
                    ("out_width", w),
                ],
            );
        }

        x
    }
}
