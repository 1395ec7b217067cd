//! # `ResNet` Utilities
use crate::compat::conv_shape::expect_conv1d_output_size;
use burn::nn::Initializer;

/// Kaiming-normal, fan-out, ReLU gain.
///
/// Used for every conv of the `ResNet` classification network.
pub static CONV_INTO_RELU_INITIALIZER: Initializer = Initializer::KaimingNormal {
    gain: core::f64::consts::SQRT_2,
    fan_out_only: true,
};

/// The `burn` default [`Conv3dConfig`](burn::nn::conv::Conv3dConfig) initializer.
///
/// Kaiming-uniform, fan-in, gain ``1/sqrt(3)``.
pub static CONV_DEFAULT_INITIALIZER: Initializer = Initializer::KaimingUniform {
    gain: 0.577_350_269_189_625_8,
    fan_out_only: false,
};

/// Expand a scalar to a cube.
#[inline(always)]
pub fn scalar_to_array<const D: usize>(value: usize) -> [usize; D] {
    [value; D]
}

/// Get the output resolution of a strided residual unit.
///
/// Every strided op in a residual unit is either a ``1x1x1`` conv without padding
/// or a ``3x3x3`` conv with ``padding = dilation``; both map ``in`` to ``ceil(in / stride)``.
///
/// # Arguments
///
/// - `input_resolution`: ``[in_depth, in_height, in_width]``.
///
/// # Returns
///
/// ``[out_depth, out_height, out_width]``
#[inline(always)]
pub fn strided_output_resolution(
    input_resolution: [usize; 3],
    stride: usize,
) -> [usize; 3] {
    input_resolution.map(|size| expect_conv1d_output_size(size, 1, stride, 0, 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strided_output_resolution() {
        assert_eq!(strided_output_resolution([8, 8, 8], 1), [8, 8, 8]);
        assert_eq!(strided_output_resolution([8, 7, 1], 2), [4, 4, 1]);
        assert_eq!(strided_output_resolution([9, 3, 2], 4), [3, 1, 1]);
    }

    #[test]
    fn test_scalar_to_array() {
        assert_eq!(scalar_to_array::<3>(2), [2, 2, 2]);
    }
}
