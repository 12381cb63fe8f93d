//! Reconstruction of interpolated-out points from the coarse solution.
//!
//! From the coarsest step down to one, points marked [`NONE`] are filled
//! by fixed stencils: six-point interpolation for points lying between
//! two solved points on a grid line, four-point interpolation for the
//! centres of 2x2 coarse cells. Near unaligned lower/right boundaries
//! the missing arm is replaced by a reflected one of length `b` and the
//! coefficients become the `(a, b) / (a + b)` convex combinations below.

use crate::grid::{step_for_level, NONE};

/// Fill the interpolated-out points of one grid step.
pub fn interpolate(levels: &mut [u32], data: &mut [f64], xres: usize, yres: usize, step: usize) {
    let nx = (xres + step - 1) / step;
    let ny = (yres + step - 1) / step;
    let vstep = xres * step;

    if nx < 3 || ny < 3 {
        return;
    }

    // Six-point interpolation.
    for i in 0..ny {
        if i % 2 == 0 {
            // Interpolated point horizontally between two other points.
            let mut j = 1;
            while j < nx {
                let k = (i * xres + j) * step;
                if levels[k] != NONE {
                    j += 2;
                    continue;
                }

                if i >= 2 && i < ny - 2 && j < nx - 1 {
                    data[k] = 0.375 * (data[k - step] + data[k + step])
                        + 0.0625
                            * (data[k - 2 * vstep - step]
                                + data[k - 2 * vstep + step]
                                + data[k + 2 * vstep - step]
                                + data[k + 2 * vstep + step]);
                    levels[k] = (levels[k - step] + levels[k + step]) / 2;
                } else if j < nx - 1 && i < ny - 2 {
                    // Upper boundary is aligned.
                    data[k] = 0.375 * (data[k - step] + data[k + step])
                        + 0.125 * (data[k + 2 * vstep - step] + data[k + 2 * vstep + step]);
                    levels[k] = (levels[k - step] + levels[k + step]) / 2;
                } else if j < nx - 1 && i >= 2 {
                    // Lower boundary can be unaligned.
                    let bdist = yres - 1 - i * step;
                    let a = (4 * bdist + 3 * step) as f64;
                    let b = step as f64;
                    let d = (8 * (bdist + step)) as f64;
                    data[k] = (a * (data[k - step] + data[k + step])
                        + b * (data[k - 2 * vstep - step] + data[k - 2 * vstep + step]))
                        / d;
                    levels[k] = (levels[k - step] + levels[k + step]) / 2;
                } else if i >= 2 && i < ny - 2 {
                    // Right boundary can be unaligned.
                    let bdist = xres - 1 - j * step;
                    let a = (6 * step - 4 * bdist) as f64;
                    let b = (2 * bdist + step) as f64;
                    let d = (8 * step) as f64;
                    data[k] = (a * data[k - step]
                        + b * (data[k - 2 * vstep - step] + data[k + 2 * vstep - step]))
                        / d;
                    levels[k] = levels[k - step];
                } else if i < ny - 2 {
                    // Upper boundary aligned, right boundary can be
                    // unaligned.
                    let bdist = xres - 1 - j * step;
                    let a = (3 * step - 2 * bdist) as f64;
                    let b = (2 * bdist + step) as f64;
                    let d = (4 * step) as f64;
                    data[k] = (a * data[k - step] + b * data[k - step + 2 * vstep]) / d;
                    levels[k] = levels[k - step];
                } else {
                    // Lower and right boundaries can both be unaligned.
                    debug_assert!(i >= 2);
                    let xbdist = xres - 1 - j * step;
                    let ybdist = yres - 1 - i * step;
                    let a = (3 * step + 4 * ybdist) as f64 - (2 * xbdist) as f64;
                    let b = (2 * xbdist + step) as f64;
                    data[k] = (a * data[k - step] + b * data[k - 2 * vstep]) / (a + b);
                    levels[k] = levels[k - step];
                }
                j += 2;
            }
        } else {
            // Interpolated point vertically between two other points.
            let mut j = 0;
            while j < nx {
                let k = (i * xres + j) * step;
                if levels[k] != NONE {
                    j += 2;
                    continue;
                }

                if j >= 2 && j < nx - 2 && i < ny - 1 {
                    data[k] = 0.375 * (data[k - vstep] + data[k + vstep])
                        + 0.0625
                            * (data[k - vstep - 2 * step]
                                + data[k - vstep + 2 * step]
                                + data[k + vstep - 2 * step]
                                + data[k + vstep + 2 * step]);
                    levels[k] = (levels[k - vstep] + levels[k + vstep]) / 2;
                } else if j < nx - 2 && i < ny - 1 {
                    // Left boundary is aligned.
                    data[k] = 0.375 * (data[k - vstep] + data[k + vstep])
                        + 0.125 * (data[k - vstep + 2 * step] + data[k + vstep + 2 * step]);
                    levels[k] = (levels[k - vstep] + levels[k + vstep]) / 2;
                } else if j >= 2 && i < ny - 1 {
                    // Right boundary can be unaligned.
                    let bdist = xres - 1 - j * step;
                    let a = (4 * bdist + 3 * step) as f64;
                    let b = step as f64;
                    let d = (8 * (bdist + step)) as f64;
                    data[k] = (a * (data[k - vstep] + data[k + vstep])
                        + b * (data[k - vstep - 2 * step] + data[k + vstep - 2 * step]))
                        / d;
                    levels[k] = (levels[k - vstep] + levels[k + vstep]) / 2;
                } else if j >= 2 && j < nx - 2 {
                    // Lower boundary can be unaligned.
                    let bdist = yres - 1 - i * step;
                    let a = (6 * step - 4 * bdist) as f64;
                    let b = (2 * bdist + step) as f64;
                    let d = (8 * step) as f64;
                    data[k] = (a * data[k - vstep]
                        + b * (data[k - vstep - 2 * step] + data[k - vstep + 2 * step]))
                        / d;
                    levels[k] = levels[k - vstep];
                } else if j < nx - 2 {
                    // Left boundary aligned, lower boundary can be
                    // unaligned.
                    let bdist = yres - 1 - i * step;
                    let a = (3 * step - 2 * bdist) as f64;
                    let b = (2 * bdist + step) as f64;
                    let d = (4 * step) as f64;
                    data[k] = (a * data[k - vstep] + b * data[k + 2 * step - vstep]) / d;
                    levels[k] = levels[k - vstep];
                } else {
                    // Lower and right boundaries can both be unaligned.
                    debug_assert!(j >= 2);
                    let xbdist = xres - 1 - j * step;
                    let ybdist = yres - 1 - i * step;
                    let a = (3 * step + 4 * xbdist) as f64 - (2 * ybdist) as f64;
                    let b = (2 * ybdist + step) as f64;
                    data[k] = (a * data[k - vstep] + b * data[k - 2 * step]) / (a + b);
                    levels[k] = levels[k - vstep];
                }
                j += 2;
            }
        }
    }

    // Four-point interpolation for 2x2-cell centres.
    let mut i = 1;
    while i < ny {
        let mut j = 1;
        while j < nx {
            let k = (i * xres + j) * step;
            if levels[k] != NONE {
                j += 2;
                continue;
            }

            if i < ny - 1 && j < nx - 1 {
                data[k] = 0.25
                    * (data[k - vstep] + data[k + vstep] + data[k - step] + data[k + step]);
                levels[k] =
                    (levels[k - vstep] + levels[k + vstep] + levels[k - step] + levels[k + step])
                        / 4;
            } else if i < ny - 1 {
                // Right boundary can be unaligned.
                let bdist = xres - 1 - j * step;
                let a = (2 * bdist + step) as f64;
                let b = (2 * step) as f64;
                let d = (4 * (bdist + step)) as f64;
                data[k] = (a * (data[k - vstep] + data[k + vstep]) + b * data[k - step]) / d;
                levels[k] = (levels[k - vstep] + levels[k + vstep]) / 2;
            } else if j < nx - 1 {
                // Lower boundary can be unaligned.
                let bdist = yres - 1 - i * step;
                let a = (2 * bdist + step) as f64;
                let b = (2 * step) as f64;
                let d = (4 * (bdist + step)) as f64;
                data[k] = (a * (data[k - step] + data[k + step]) + b * data[k - vstep]) / d;
                levels[k] = (levels[k - step] + levels[k + step]) / 2;
            } else {
                // Right and lower boundaries can both be unaligned.
                let xbdist = xres - 1 - j * step;
                let ybdist = yres - 1 - i * step;
                let a = (2 * ybdist + step) as f64;
                let b = (2 * xbdist + step) as f64;
                data[k] = (a * data[k - step] + b * data[k - vstep]) / (a + b);
                levels[k] = (levels[k - step] + levels[k - vstep]) / 2;
            }
            j += 2;
        }
        i += 2;
    }
}

/// Fill all interpolated-out points from the coarsest level down.
pub fn reconstruct(levels: &mut [u32], data: &mut [f64], xres: usize, yres: usize, maxlevel: u32) {
    let mut step = step_for_level(maxlevel);
    while step > 0 {
        interpolate(levels, data, xres, yres, step);
        step /= 2;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_four_point_centre() {
        // A lone NONE centre surrounded by solved values takes their mean.
        let xres = 3;
        let yres = 3;
        let mut levels = vec![3u32; 9];
        let mut data = vec![0.0; 9];
        levels[4] = NONE;
        data[1] = 1.0;
        data[3] = 2.0;
        data[5] = 3.0;
        data[7] = 4.0;
        interpolate(&mut levels, &mut data, xres, yres, 1);
        assert!((data[4] - 2.5).abs() < 1e-15);
        assert!(levels[4] != NONE);
    }

    #[test]
    fn test_six_point_weights() {
        // An interpolated point between two horizontal neighbours with the
        // full six-point stencil available: 0.375 each for the immediate
        // neighbours, 0.0625 for the four second-row corners.
        let xres = 5;
        let yres = 5;
        let mut levels = vec![3u32; 25];
        let mut data = vec![0.0; 25];
        let k = 2 * xres + 3;
        levels[k] = NONE;
        data[k - 1] = 1.0;
        data[k + 1] = 1.0;
        data[k - 2 * xres - 1] = 2.0;
        data[k - 2 * xres + 1] = 2.0;
        data[k + 2 * xres - 1] = 2.0;
        data[k + 2 * xres + 1] = 2.0;
        interpolate(&mut levels, &mut data, xres, yres, 1);
        let expected = 0.375 * 2.0 + 0.0625 * 8.0;
        assert!((data[k] - expected).abs() < 1e-15, "{}", data[k]);
    }

    #[test]
    fn test_reconstruct_constant_field() {
        // Interpolating a constant field must reproduce the constant at
        // every interpolated-out point, at any step.
        let n = 17;
        let mut levels = vec![5u32; n * n];
        let mut data = vec![7.5; n * n];
        // Punch NONE holes in a checkerboard of the step-2 grid.
        for i in (1..n).step_by(2) {
            for j in (1..n).step_by(2) {
                levels[i * n + j] = NONE;
                data[i * n + j] = 0.0;
            }
        }
        reconstruct(&mut levels, &mut data, n, n, 3);
        for (k, &v) in data.iter().enumerate() {
            assert!((v - 7.5).abs() < 1e-12, "point {k}: {v}");
            assert!(levels[k] != NONE);
        }
    }
}
