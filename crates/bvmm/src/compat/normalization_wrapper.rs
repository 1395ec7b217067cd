//! # Normalization Wrapper
//!
//! Provides support for channel-first ``burn::nn::norm`` layers over
//! ``[batch, channels, depth, height, width]`` volumes:
//! * [`Batch`] - [`BatchNorm`] (3 spatial dims)
//! * [`Group`] - [`GroupNorm`]
//! * [`Instance`] - [`InstanceNorm`]
//!
//! [`LayerNorm`](burn::nn::LayerNorm) normalizes the trailing axis,
//! which is a spatial axis for volumes; it is not offered here.
//!
//! The enum is non-exhaustive, to prepare for future additions.

use burn::nn::{
    BatchNorm, BatchNormConfig, GroupNorm, GroupNormConfig, InstanceNorm, InstanceNormConfig,
};
use burn::prelude::{Backend, Config, Module, Tensor};

/// ['Normalization'] Configuration.
#[derive(Config, Debug)]
#[non_exhaustive]
pub enum NormalizationConfig {
    /// ['`BatchNorm`'] Configuration.
    Batch(BatchNormConfig),

    /// ['`GroupNorm`'] Configuration.
    Group(GroupNormConfig),

    /// ['`InstanceNorm`'] Configuration.
    Instance(InstanceNormConfig),
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self::Batch(BatchNormConfig::new(0))
    }
}

impl From<BatchNormConfig> for NormalizationConfig {
    fn from(config: BatchNormConfig) -> Self {
        Self::Batch(config)
    }
}

impl From<GroupNormConfig> for NormalizationConfig {
    fn from(config: GroupNormConfig) -> Self {
        Self::Group(config)
    }
}

impl From<InstanceNormConfig> for NormalizationConfig {
    fn from(config: InstanceNormConfig) -> Self {
        Self::Instance(config)
    }
}

impl NormalizationConfig {
    /// Initialize a ['Normalization'] layer.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Normalization<B> {
        match self {
            NormalizationConfig::Batch(config) => Normalization::Batch(config.init(device)),
            NormalizationConfig::Group(config) => config.init(device).into(),
            NormalizationConfig::Instance(config) => config.init(device).into(),
        }
    }

    /// Adjust a norm config to the feature size.
    pub fn with_num_features(
        self,
        num_features: usize,
    ) -> Self {
        match self {
            NormalizationConfig::Batch(config) => BatchNormConfig {
                num_features,
                ..config
            }
            .into(),
            NormalizationConfig::Group(config) => GroupNormConfig {
                num_channels: num_features,
                ..config
            }
            .into(),
            NormalizationConfig::Instance(config) => InstanceNormConfig {
                num_channels: num_features,
                ..config
            }
            .into(),
        }
    }

    /// Get the number of features.
    pub fn num_features(&self) -> usize {
        match self {
            NormalizationConfig::Batch(config) => config.num_features,
            NormalizationConfig::Group(config) => config.num_channels,
            NormalizationConfig::Instance(config) => config.num_channels,
        }
    }
}

/// Normalization Layer Wrapper.
///
/// The enum is non-exhaustive, to prepare for future additions.
#[derive(Module, Debug)]
#[non_exhaustive]
pub enum Normalization<B: Backend> {
    /// [`BatchNorm`] layer; restricted to `BatchNorm`<3>.
    Batch(BatchNorm<B, 3>),

    /// [`GroupNorm`] layer.
    Group(GroupNorm<B>),

    /// ['`InstanceNorm`'] layer.
    Instance(InstanceNorm<B>),
}

impl<B: Backend> From<BatchNorm<B, 3>> for Normalization<B> {
    fn from(layer: BatchNorm<B, 3>) -> Self {
        Self::Batch(layer)
    }
}

impl<B: Backend> From<GroupNorm<B>> for Normalization<B> {
    fn from(layer: GroupNorm<B>) -> Self {
        Self::Group(layer)
    }
}

impl<B: Backend> From<InstanceNorm<B>> for Normalization<B> {
    fn from(layer: InstanceNorm<B>) -> Self {
        Self::Instance(layer)
    }
}

impl<B: Backend> Normalization<B> {
    /// Applies normalization to a ``[batch, channels, depth, height, width]`` tensor.
    pub fn forward(
        &self,
        input: Tensor<B, 5>,
    ) -> Tensor<B, 5> {
        match self {
            Normalization::Batch(norm) => norm.forward(input),
            Normalization::Group(norm) => norm.forward(input),
            Normalization::Instance(norm) => norm.forward(input),
        }
    }

    /// Get the number of features.
    pub fn num_features(&self) -> usize {
        match self {
            Normalization::Batch(norm) => norm.gamma.shape().dims[0],
            Normalization::Group(norm) => norm.num_channels,
            Normalization::Instance(norm) => norm.num_channels,
        }
    }

    /// Zero the affine scale.
    ///
    /// A residual branch ending in a zeroed norm starts out as the identity.
    /// Non-affine layers are left untouched.
    pub fn zero_init_gamma(&mut self) {
        match self {
            Normalization::Batch(norm) => {
                norm.gamma = norm.gamma.clone().map(|gamma| gamma.zeros_like());
            }
            Normalization::Group(norm) => {
                norm.gamma = norm
                    .gamma
                    .take()
                    .map(|param| param.map(|gamma| gamma.zeros_like()));
            }
            Normalization::Instance(norm) => {
                norm.gamma = norm
                    .gamma
                    .take()
                    .map(|param| param.map(|gamma| gamma.zeros_like()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::Distribution;

    type B = Autodiff<NdArray<f32>>;

    fn make_input(
        num_features: usize,
        device: &<B as Backend>::Device,
    ) -> Tensor<B, 5> {
        Tensor::random(
            [2, num_features, 3, 4, 5],
            Distribution::Default,
            device,
        )
    }

    #[test]
    fn test_batch_norm() {
        let device = Default::default();
        let input = make_input(12, &device);

        let config: NormalizationConfig = BatchNormConfig::new(12).into();
        assert_eq!(config.num_features(), 12);

        let layer: Normalization<B> = config.init(&device);
        assert_eq!(layer.num_features(), 12);

        let expected = match &layer {
            Normalization::Batch(inner) => inner.forward(input.clone()),
            _ => unreachable!(),
        };

        layer
            .forward(input)
            .to_data()
            .assert_eq(&expected.to_data(), true);
    }

    #[test]
    fn test_group_norm() {
        let device = Default::default();
        let input = make_input(12, &device);

        let config: NormalizationConfig = GroupNormConfig::new(3, 12).into();
        let layer: Normalization<B> = config.init(&device);

        let expected = match &layer {
            Normalization::Group(inner) => inner.forward(input.clone()),
            _ => unreachable!(),
        };

        layer
            .forward(input)
            .to_data()
            .assert_eq(&expected.to_data(), true);
    }

    #[test]
    fn test_instance_norm() {
        let device = Default::default();
        let input = make_input(12, &device);

        let config: NormalizationConfig = InstanceNormConfig::new(12).into();
        let layer: Normalization<B> = config.init(&device);

        let expected = match &layer {
            Normalization::Instance(inner) => inner.forward(input.clone()),
            _ => unreachable!(),
        };

        layer
            .forward(input)
            .to_data()
            .assert_eq(&expected.to_data(), true);
    }

    #[test]
    fn test_with_num_features() {
        let config = NormalizationConfig::default().with_num_features(7);
        assert_eq!(config.num_features(), 7);

        let config: NormalizationConfig = GroupNormConfig::new(2, 4).into();
        assert_eq!(config.with_num_features(8).num_features(), 8);
    }

    #[test]
    fn test_zero_init_gamma() {
        let device = Default::default();
        let mut layer: Normalization<NdArray<f32>> =
            NormalizationConfig::from(BatchNormConfig::new(4)).init(&device);
        layer.zero_init_gamma();

        match &layer {
            Normalization::Batch(norm) => norm
                .gamma
                .val()
                .to_data()
                .assert_eq(&Tensor::<NdArray<f32>, 1>::zeros([4], &device).to_data(), true),
            _ => unreachable!(),
        }
    }
}
