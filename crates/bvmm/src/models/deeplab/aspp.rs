//! # Atrous Spatial Pyramid Pooling
//!
//! [`Aspp`] fuses parallel views of a feature map:
//! * a ``1x1x1`` conv/norm/act branch,
//! * one ``3x3x3`` conv/norm/act branch per atrous rate, with ``padding = dilation = rate``,
//! * a global branch: average pool, ``1x1x1`` conv/norm/act, upsampled back to the feature map.
//!
//! The branches are concatenated on the channel axis, fused by a ``1x1x1``
//! conv/norm/act, and projected to class scores by a ``1x1x1`` conv.
//!
//! Every branch preserves the feature map resolution. The convs carry a bias and
//! use the default conv initializer.

use crate::compat::normalization_wrapper::NormalizationConfig;
use crate::layers::blocks::cna::{AbstractCNA3dConfig, CNA3d, CNA3dMeta};
use crate::layers::interpolate::trilinear::trilinear_interpolate;
use crate::layers::pool::GlobalAvgPool3d;
use crate::models::resnet::util::{CONV_DEFAULT_INITIALIZER, scalar_to_array};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::PaddingConfig3d;
use burn::nn::conv::{Conv3d, Conv3dConfig};
use burn::prelude::{Backend, Tensor};

/// Input channels of the head over a basic-block backbone.
pub const BASIC_FEATURE_CHANNELS: usize = 512;

/// Input channels of the head over a bottleneck backbone.
pub const BOTTLENECK_FEATURE_CHANNELS: usize = 4 * 512;

/// [`Aspp`] Meta API.
pub trait AsppMeta {
    /// Feature map channels.
    fn in_channels(&self) -> usize;

    /// Width of each branch.
    fn branch_channels(&self) -> usize;

    /// Number of parallel branches; the atrous rates plus the ``1x1x1`` and global branches.
    fn num_branches(&self) -> usize;

    /// Number of output classes.
    fn num_classes(&self) -> usize;

    /// Width of the concatenated branches.
    fn fuse_channels(&self) -> usize {
        self.num_branches() * self.branch_channels()
    }
}

/// [`Aspp`] Config.
#[derive(Config, Debug)]
pub struct AsppConfig {
    /// Feature map channels.
    pub in_channels: usize,

    /// Number of output classes.
    pub num_classes: usize,

    /// Width of each branch, and of the fused features.
    #[config(default = 256)]
    pub branch_channels: usize,

    /// Atrous rates of the ``3x3x3`` branches.
    #[config(default = "vec![6, 12, 18]")]
    pub rates: Vec<usize>,

    /// Normalization config; the feature size is auto-matched.
    #[config(default = "NormalizationConfig::default()")]
    pub normalization: NormalizationConfig,
}

impl AsppMeta for AsppConfig {
    fn in_channels(&self) -> usize {
        self.in_channels
    }

    fn branch_channels(&self) -> usize {
        self.branch_channels
    }

    fn num_branches(&self) -> usize {
        self.rates.len() + 2
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }
}

impl AsppConfig {
    /// Head over a basic-block backbone; 512 input channels.
    pub fn basic(num_classes: usize) -> Self {
        Self::new(BASIC_FEATURE_CHANNELS, num_classes)
    }

    /// Head over a bottleneck backbone; 2048 input channels.
    pub fn bottleneck(num_classes: usize) -> Self {
        Self::new(BOTTLENECK_FEATURE_CHANNELS, num_classes)
    }

    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), String> {
        if self.in_channels == 0 {
            return Err("in_channels must be > 0".to_string());
        }
        if self.num_classes == 0 {
            return Err("num_classes must be > 0".to_string());
        }
        if self.branch_channels == 0 {
            return Err("branch_channels must be > 0".to_string());
        }
        if self.rates.contains(&0) {
            return Err(format!("rates must be > 0: {:?}", self.rates));
        }
        Ok(())
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        if let Err(err) = self.try_validate() {
            panic!("{err}");
        }
    }

    /// Initialize an [`Aspp`] head.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Aspp<B> {
        self.expect_valid();

        let cna = AbstractCNA3dConfig::new().with_norm(self.normalization.clone());
        let pointwise = |in_channels: usize, out_channels: usize| {
            Conv3dConfig::new([in_channels, out_channels], scalar_to_array(1))
                .with_padding(PaddingConfig3d::Explicit(0, 0, 0))
                .with_initializer(CONV_DEFAULT_INITIALIZER.clone())
        };

        let mut branches = Vec::with_capacity(self.rates.len() + 1);
        branches.push(
            cna.build_config(pointwise(self.in_channels, self.branch_channels))
                .init(device),
        );
        for &rate in &self.rates {
            branches.push(
                cna.build_config(
                    Conv3dConfig::new([self.in_channels, self.branch_channels], scalar_to_array(3))
                        .with_dilation(scalar_to_array(rate))
                        .with_padding(PaddingConfig3d::Explicit(rate, rate, rate))
                        .with_initializer(CONV_DEFAULT_INITIALIZER.clone()),
                )
                .init(device),
            );
        }

        Aspp {
            branches,
            pool: GlobalAvgPool3d::new(),
            image: cna
                .build_config(pointwise(self.in_channels, self.branch_channels))
                .init(device),
            fuse: cna
                .build_config(pointwise(self.fuse_channels(), self.branch_channels))
                .init(device),
            classifier: pointwise(self.branch_channels, self.num_classes).init(device),
        }
    }
}

/// Atrous Spatial Pyramid Pooling head.
///
/// Maps ``[batch, in_channels, depth, height, width]`` features to
/// ``[batch, num_classes, depth, height, width]`` scores.
#[derive(Module, Debug)]
pub struct Aspp<B: Backend> {
    /// The ``1x1x1`` branch, then the atrous branches.
    pub branches: Vec<CNA3d<B>>,

    /// Global pooling of the image branch.
    pub pool: GlobalAvgPool3d,

    /// Image branch projection.
    pub image: CNA3d<B>,

    /// Fuses the concatenated branches.
    pub fuse: CNA3d<B>,

    /// Class score projection.
    pub classifier: Conv3d<B>,
}

impl<B: Backend> AsppMeta for Aspp<B> {
    fn in_channels(&self) -> usize {
        self.image.in_channels()
    }

    fn branch_channels(&self) -> usize {
        self.image.out_channels()
    }

    fn num_branches(&self) -> usize {
        self.branches.len() + 1
    }

    fn num_classes(&self) -> usize {
        self.classifier.weight.shape().dims[0]
    }
}

impl<B: Backend> Aspp<B> {
    /// The atrous rates of the ``3x3x3`` branches.
    pub fn rates(&self) -> Vec<usize> {
        self.branches[1..]
            .iter()
            .map(|branch| branch.dilation()[0])
            .collect()
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `feature_map`: ``[batch, in_channels, depth, height, width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, num_classes, depth, height, width]``
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn forward(
        &self,
        feature_map: Tensor<B, 5>,
    ) -> Tensor<B, 5> {
        let [batch, depth, height, width] = unpack_shape_contract!(
            ["batch", "in_channels", "depth", "height", "width"],
            &feature_map,
            &["batch", "depth", "height", "width"],
            &[("in_channels", self.in_channels())],
        );

        let mut views: Vec<Tensor<B, 5>> = self
            .branches
            .iter()
            .map(|branch| branch.forward(feature_map.clone()))
            .collect();

        let image = self.pool.forward(feature_map);
        let image = self.image.forward(image);
        views.push(trilinear_interpolate(image, [depth, height, width]));

        let x = Tensor::cat(views, 1);
        let x = self.fuse.forward(x);
        let x = self.classifier.forward(x);

        assert_shape_contract_periodically!(
            ["batch", "num_classes", "depth", "height", "width"],
            &x,
            &[
                ("batch", batch),
                ("num_classes", self.num_classes()),
                ("depth", depth),
                ("height", height),
                ("width", width),
            ],
        );
        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::Distribution;

    #[test]
    fn test_aspp_config() {
        let config = AsppConfig::basic(3);
        assert_eq!(config.in_channels(), 512);
        assert_eq!(config.num_classes(), 3);
        assert_eq!(config.branch_channels(), 256);
        assert_eq!(config.rates, vec![6, 12, 18]);
        assert_eq!(config.num_branches(), 5);
        assert_eq!(config.fuse_channels(), 1280);

        let config = AsppConfig::bottleneck(2);
        assert_eq!(config.in_channels(), 2048);

        let config = AsppConfig::new(8, 2).with_rates(vec![2]).with_branch_channels(4);
        assert_eq!(config.fuse_channels(), 12);
    }

    #[test]
    fn test_aspp_validate() {
        assert_eq!(
            AsppConfig::new(8, 0).try_validate(),
            Err("num_classes must be > 0".to_string())
        );
        assert_eq!(
            AsppConfig::new(8, 2).with_rates(vec![6, 0]).try_validate(),
            Err("rates must be > 0: [6, 0]".to_string())
        );
    }

    #[test]
    fn test_aspp_meta() {
        type B = NdArray<f32>;
        let device = Default::default();

        let aspp: Aspp<B> = AsppConfig::new(8, 3)
            .with_branch_channels(4)
            .init(&device);
        assert_eq!(aspp.in_channels(), 8);
        assert_eq!(aspp.branch_channels(), 4);
        assert_eq!(aspp.num_branches(), 5);
        assert_eq!(aspp.fuse_channels(), 20);
        assert_eq!(aspp.num_classes(), 3);
        assert_eq!(aspp.rates(), vec![6, 12, 18]);
        assert!(aspp.classifier.bias.is_some());
        for branch in &aspp.branches {
            assert!(branch.conv.bias.is_some());
        }
    }

    #[test]
    fn test_aspp_forward_autodiff() {
        type B = Autodiff<NdArray<f32>>;
        let device = Default::default();

        let aspp: Aspp<B> = AsppConfig::new(8, 3)
            .with_branch_channels(4)
            .with_rates(vec![1, 2])
            .init(&device);

        let input = Tensor::random([2, 8, 3, 4, 2], Distribution::Default, &device);
        let output = aspp.forward(input.clone());
        assert_eq!(output.dims(), [2, 3, 3, 4, 2]);

        let expected = {
            let mut views: Vec<Tensor<B, 5>> = aspp
                .branches
                .iter()
                .map(|branch| branch.forward(input.clone()))
                .collect();
            let image = aspp.image.forward(aspp.pool.forward(input));
            views.push(image.expand([2, 4, 3, 4, 2]));
            aspp.classifier.forward(aspp.fuse.forward(Tensor::cat(views, 1)))
        };
        output.to_data().assert_eq(&expected.to_data(), true);
    }
}
