//! # Trilinear Interpolation
//!
//! Resizes ``[batch, channels, depth, height, width]`` volumes with
//! ``align_corners = true`` semantics: the corner voxels of the input and the
//! output are aligned, and output index ``j`` samples input position
//! ``j * (in - 1) / (out - 1)``.
//!
//! Trilinear interpolation is separable; each axis is resized by a dense
//! ``[in, out]`` interpolation matrix.

use bimm_contracts::unpack_shape_contract;
use burn::prelude::{Backend, Tensor};
use burn::tensor::TensorData;

/// Build the ``[n_in, n_out]`` align-corners linear interpolation matrix.
///
/// Column ``j`` holds the weights of output sample ``j``; each column sums to 1.
///
/// # Panics
///
/// If either size is zero.
pub fn align_corners_weights<B: Backend>(
    n_in: usize,
    n_out: usize,
    device: &B::Device,
) -> Tensor<B, 2> {
    assert!(
        n_in > 0 && n_out > 0,
        "interpolation sizes must be positive: {n_in} -> {n_out}"
    );

    let scale = if n_out > 1 {
        (n_in - 1) as f64 / (n_out - 1) as f64
    } else {
        0.0
    };

    let mut weights = vec![0.0f32; n_in * n_out];
    for j in 0..n_out {
        let pos = j as f64 * scale;
        let lo = (pos.floor() as usize).min(n_in - 1);
        let hi = (lo + 1).min(n_in - 1);
        let frac = pos - lo as f64;

        weights[lo * n_out + j] += (1.0 - frac) as f32;
        weights[hi * n_out + j] += frac as f32;
    }

    Tensor::from_data(TensorData::new(weights, [n_in, n_out]), device)
}

/// Resize one spatial axis of a volume.
fn resize_axis<B: Backend>(
    input: Tensor<B, 5>,
    axis: usize,
    n_out: usize,
) -> Tensor<B, 5> {
    let n_in = input.dims()[axis];
    if n_in == n_out {
        return input;
    }

    let weights = align_corners_weights::<B>(n_in, n_out, &input.device());

    let x = if axis == 4 {
        input
    } else {
        input.swap_dims(axis, 4)
    };
    let [a, b, c, d, _] = x.dims();

    let x = x.reshape([a * b * c * d, n_in]).matmul(weights);
    let x = x.reshape([a, b, c, d, n_out]);

    if axis == 4 { x } else { x.swap_dims(axis, 4) }
}

/// Trilinear resize with aligned corners.
///
/// # Arguments
///
/// - `input`: ``[batch, channels, in_depth, in_height, in_width]``.
/// - `output_size`: ``[out_depth, out_height, out_width]``.
///
/// # Returns
///
/// ``[batch, channels, out_depth, out_height, out_width]``
#[tracing::instrument(level = "trace", skip(input))]
pub fn trilinear_interpolate<B: Backend>(
    input: Tensor<B, 5>,
    output_size: [usize; 3],
) -> Tensor<B, 5> {
    let [batch, channels] = unpack_shape_contract!(
        ["batch", "channels", "in_depth", "in_height", "in_width"],
        &input,
        &["batch", "channels"],
        &[],
    );

    let [out_depth, out_height, out_width] = output_size;
    let x = resize_axis(input, 2, out_depth);
    let x = resize_axis(x, 3, out_height);
    let x = resize_axis(x, 4, out_width);

    debug_assert_eq!(
        x.dims(),
        [batch, channels, out_depth, out_height, out_width]
    );
    x
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::{Distribution, Tolerance};

    type B = NdArray<f32>;

    #[test]
    fn test_weights() {
        let device = Default::default();

        // 2 -> 3: midpoint sample.
        align_corners_weights::<B>(2, 3, &device)
            .to_data()
            .assert_approx_eq::<f32>(
                &TensorData::from([[1.0f32, 0.5, 0.0], [0.0, 0.5, 1.0]]),
                Tolerance::default(),
            );

        // 1 -> n broadcasts.
        align_corners_weights::<B>(1, 4, &device)
            .to_data()
            .assert_eq(&TensorData::from([[1.0f32, 1.0, 1.0, 1.0]]), true);

        // n -> 1 takes the first sample.
        align_corners_weights::<B>(3, 1, &device)
            .to_data()
            .assert_eq(&TensorData::from([[1.0f32], [0.0], [0.0]]), true);
    }

    #[test]
    fn test_linear_ramp_is_preserved() {
        let device = Default::default();

        // f(z, y, x) = z + 2y + 3x is reproduced exactly by trilinear interpolation.
        let ramp = |d: usize, h: usize, w: usize, scale: [f32; 3]| {
            let mut values = Vec::with_capacity(d * h * w);
            for z in 0..d {
                for y in 0..h {
                    for x in 0..w {
                        values.push(
                            z as f32 * scale[0] + 2.0 * y as f32 * scale[1]
                                + 3.0 * x as f32 * scale[2],
                        );
                    }
                }
            }
            Tensor::<B, 5>::from_data(TensorData::new(values, [1, 1, d, h, w]), &device)
        };

        let input = ramp(2, 3, 5, [1.0, 1.0, 1.0]);
        let output = trilinear_interpolate(input, [5, 5, 9]);
        assert_eq!(output.dims(), [1, 1, 5, 5, 9]);

        let expected = ramp(5, 5, 9, [1.0 / 4.0, 2.0 / 4.0, 4.0 / 8.0]);
        output
            .to_data()
            .assert_approx_eq::<f32>(&expected.to_data(), Tolerance::absolute(1e-4));
    }

    #[test]
    fn test_unit_volume_broadcasts() {
        let device = Default::default();

        let input: Tensor<B, 5> = Tensor::random([2, 3, 1, 1, 1], Distribution::Default, &device);
        let output = trilinear_interpolate(input.clone(), [2, 3, 4]);

        output
            .to_data()
            .assert_eq(&input.expand([2, 3, 2, 3, 4]).to_data(), true);
    }

    #[test]
    fn test_identity_size() {
        let device = Default::default();

        let input: Tensor<B, 5> = Tensor::random([1, 2, 3, 4, 5], Distribution::Default, &device);
        trilinear_interpolate(input.clone(), [3, 4, 5])
            .to_data()
            .assert_eq(&input.to_data(), true);
    }
}
