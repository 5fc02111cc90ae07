//! Direct CPU kernels for each operator variant.
//!
//! Every kernel writes every element of its output exactly once per call and never reads the previous contents,
//! so output buffers can be reused across runs without clearing. Work is split over output channels or features
//! with rayon parallel iterators, and the reduction order within a single output element is fixed,
//! which makes the results independent of the number of threads.

use ndarray::parallel::prelude::*;
use ndarray::{ArrayView1, ArrayView2, ArrayView3, ArrayView4, ArrayViewD, ArrayViewMut1, ArrayViewMut3, ArrayViewMutD, Axis, Zip};

use crate::operator::{ConvParams, PoolParams};

/// The input position read by output position `o` at kernel offset `k`, or `None` if it falls in the padding.
#[inline]
fn source_index(o: usize, k: usize, stride: usize, padding: usize, extent: usize) -> Option<usize> {
    let pos = o * stride + k;
    if pos < padding {
        return None;
    }
    let i = pos - padding;
    (i < extent).then_some(i)
}

/// 2D convolution with bias, zero padding is implicit.
pub fn conv(
    params: ConvParams,
    input: ArrayView3<f32>,
    filter: ArrayView4<f32>,
    bias: ArrayView1<f32>,
    mut output: ArrayViewMut3<f32>,
) {
    let ConvParams {
        input_channels,
        kernel_h,
        kernel_w,
        stride,
        padding,
        ..
    } = params;
    let (_, in_h, in_w) = input.dim();
    let (_, out_h, out_w) = output.dim();

    output
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .zip(filter.axis_iter(Axis(0)).into_par_iter())
        .enumerate()
        .for_each(|(co, (mut plane, filter))| {
            plane.fill(bias[co]);

            for ci in 0..input_channels {
                let input = input.index_axis(Axis(0), ci);

                for ky in 0..kernel_h {
                    for kx in 0..kernel_w {
                        let weight = filter[(ci, ky, kx)];

                        for oy in 0..out_h {
                            let Some(iy) = source_index(oy, ky, stride, padding, in_h) else {
                                continue;
                            };
                            for ox in 0..out_w {
                                if let Some(ix) = source_index(ox, kx, stride, padding, in_w) {
                                    plane[(oy, ox)] += weight * input[(iy, ix)];
                                }
                            }
                        }
                    }
                }
            }
        });
}

/// Per-channel `x * scale + shift`, channels are the first axis.
pub fn batch_norm(input: ArrayViewD<f32>, scale: ArrayView1<f32>, shift: ArrayView1<f32>, mut output: ArrayViewMutD<f32>) {
    output
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .zip(input.axis_iter(Axis(0)).into_par_iter())
        .enumerate()
        .for_each(|(c, (mut output, input))| {
            let (scale, shift) = (scale[c], shift[c]);
            Zip::from(&mut output).and(&input).for_each(|o, &x| *o = x * scale + shift);
        });
}

/// Max pooling over windows clipped to the input, padded positions never contribute.
pub fn max_pool(params: PoolParams, input: ArrayView3<f32>, mut output: ArrayViewMut3<f32>) {
    let PoolParams {
        size, stride, padding, ..
    } = params;
    let (_, in_h, in_w) = input.dim();
    let (_, out_h, out_w) = output.dim();

    output
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .zip(input.axis_iter(Axis(0)).into_par_iter())
        .for_each(|(mut output, input)| {
            for oy in 0..out_h {
                for ox in 0..out_w {
                    let mut max = f32::NEG_INFINITY;
                    for ky in 0..size {
                        let Some(iy) = source_index(oy, ky, stride, padding, in_h) else {
                            continue;
                        };
                        for kx in 0..size {
                            if let Some(ix) = source_index(ox, kx, stride, padding, in_w) {
                                max = max.max(input[(iy, ix)]);
                            }
                        }
                    }
                    output[(oy, ox)] = max;
                }
            }
        });
}

/// Elementwise `left + right`, all three shapes are equal.
pub fn add(left: ArrayViewD<f32>, right: ArrayViewD<f32>, output: ArrayViewMutD<f32>) {
    Zip::from(output)
        .and(&left)
        .and(&right)
        .par_for_each(|o, &l, &r| *o = l + r);
}

/// `weight @ input + bias` with the input flattened in row-major order.
pub fn fully_connected(input: ArrayView1<f32>, weight: ArrayView2<f32>, bias: ArrayView1<f32>, output: ArrayViewMut1<f32>) {
    Zip::from(output)
        .and(weight.rows())
        .and(&bias)
        .par_for_each(|o, row, &b| *o = row.dot(&input) + b);
}
