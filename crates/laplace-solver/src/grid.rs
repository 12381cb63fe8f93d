//! Adaptive coarsening grid for the sparse solver phase.
//!
//! Every interior pixel carries a level; levels grow as the grid coarsens
//! away from the boundary. Odd-to-even promotion checks the four axial
//! neighbours at the current step; even-to-odd reduction doubles the step,
//! marking the eight surrounding half-step points as interpolated-out
//! ([`NONE`]). A dense demotion pass after the first promotion keeps a
//! fine representation within one pixel of the boundary.

/// Sentinel level of interpolated-out points.
pub const NONE: u32 = u32::MAX;

/// Grid step of a point at `level`.
#[inline]
pub fn step_for_level(level: u32) -> usize {
    1usize << ((level - 1) / 2)
}

/// Promote points at `level` whose four axial `step`-neighbours share the
/// level. Returns whether anything was promoted.
fn promote(levels: &[u32], buffer: &mut [u32], xres: usize, yres: usize, level: u32, step: usize) -> bool {
    let nx = (xres + step - 1) / step;
    let ny = (yres + step - 1) / step;
    let vstep = xres * step;
    let mut ok = false;

    if nx < 3 || ny < 3 {
        return false;
    }

    for i in 0..ny {
        for j in 0..nx {
            let k = (i * xres + j) * step;
            if levels[k] == level
                && (i == 0 || levels[k - vstep] == level)
                && (j == 0 || levels[k - step] == level)
                && (j == nx - 1 || levels[k + step] == level)
                && (i == ny - 1 || levels[k + vstep] == level)
            {
                buffer[k] = level + 1;
                ok = true;
            }
        }
    }
    ok
}

/// Cap the 8-neighbourhood of points touching the boundary back to
/// `level`, ensuring a dense representation next to it.
fn demote(levels: &[u32], buffer: &mut [u32], xres: usize, yres: usize, level: u32, step: usize) {
    let nx = (xres + step - 1) / step;
    let ny = (yres + step - 1) / step;
    let vstep = xres * step;

    if nx < 3 || ny < 3 {
        return;
    }

    for i in 1..ny - 1 {
        for j in 1..nx - 1 {
            let k = (i * xres + j) * step;
            if levels[k] != level {
                continue;
            }
            let touches_lower = levels[k - vstep - step] == level - 1
                || levels[k - vstep] == level - 1
                || levels[k - vstep + step] == level - 1
                || levels[k - step] == level - 1
                || levels[k + step] == level - 1
                || levels[k + vstep - step] == level - 1
                || levels[k + vstep] == level - 1
                || levels[k + vstep + step] == level - 1;
            if !touches_lower {
                continue;
            }
            for kk in [
                k - vstep - step,
                k - vstep,
                k - vstep + step,
                k - step,
                k + step,
                k + vstep - step,
                k + vstep,
                k + vstep + step,
            ] {
                if buffer[kk] > level && buffer[kk] != NONE {
                    buffer[kk] = level;
                }
            }
        }
    }
}

/// Promote `step`-grid points whose eight `step`-neighbours are all at
/// least at `level`, interpolating out the eight half-step points around
/// them. Returns whether anything was reduced.
fn reduce(levels: &[u32], buffer: &mut [u32], xres: usize, yres: usize, level: u32, step: usize) -> bool {
    debug_assert!(step % 2 == 0);

    let nx = (xres + step - 1) / step;
    let ny = (yres + step - 1) / step;
    let halfstep = step / 2;
    let vstep = xres * step;
    let vhalfstep = xres * halfstep;
    let mut ok = false;
    let right = (nx - 1) * step + halfstep < xres;
    let down = (ny - 1) * step + halfstep < yres;

    if nx < 3 || ny < 3 {
        return false;
    }

    for i in 0..ny {
        for j in 0..nx {
            let k = (i * xres + j) * step;
            if levels[k] == level
                && (i == 0 || j == 0 || levels[k - vstep - step] >= level)
                && (i == 0 || levels[k - vstep] == level)
                && (i == 0 || j == nx - 1 || levels[k - vstep + step] >= level)
                && (j == 0 || levels[k - step] == level)
                && (j == nx - 1 || levels[k + step] == level)
                && (i == ny - 1 || j == 0 || levels[k + vstep - step] >= level)
                && (i == ny - 1 || levels[k + vstep] == level)
                && (i == ny - 1 || j == nx - 1 || levels[k + vstep + step] >= level)
            {
                buffer[k] = level + 1;
                if i > 0 && j > 0 {
                    buffer[k - vhalfstep - halfstep] = NONE;
                }
                if i > 0 {
                    buffer[k - vhalfstep] = NONE;
                }
                if i > 0 && (right || j < nx - 1) {
                    buffer[k - vhalfstep + halfstep] = NONE;
                }
                if j > 0 {
                    buffer[k - halfstep] = NONE;
                }
                if right || j < nx - 1 {
                    buffer[k + halfstep] = NONE;
                }
                if (down || i < ny - 1) && j > 0 {
                    buffer[k + vhalfstep - halfstep] = NONE;
                }
                if down || i < ny - 1 {
                    buffer[k + vhalfstep] = NONE;
                }
                if (down || i < ny - 1) && (right || j < nx - 1) {
                    buffer[k + vhalfstep + halfstep] = NONE;
                }
                ok = true;
            }
        }
    }
    ok
}

/// Remove points that would have to be interpolated from two opposite
/// sides: their interpolated-out neighbour pattern is a vertical or
/// horizontal pair.
fn remove_spikes(levels: &mut [u32], xres: usize, yres: usize, level: u32, step: usize) {
    let nx = (xres + step - 1) / step;
    let ny = (yres + step - 1) / step;

    if nx < 3 || ny < 3 {
        return;
    }

    for i in 1..ny - 1 {
        for j in 1..nx - 1 {
            let k = (i * xres + j) * step;
            if levels[k] != level {
                continue;
            }
            let su = levels[k - xres * step] == NONE;
            let sd = levels[k + xres * step] == NONE;
            let sl = levels[k - step] == NONE;
            let sr = levels[k + step] == NONE;
            if (su && sd && !sl && !sr) || (!su && !sd && sl && sr) {
                levels[k] = NONE;
            }
        }
    }
}

/// Build the full level field from a 0/1 interior map. Returns the
/// maximum level reached.
pub fn build_levels(levels: &mut [u32], buffer: &mut [u32], xres: usize, yres: usize) -> u32 {
    let mut step = 1usize;
    let mut level = 0u32;

    buffer.copy_from_slice(levels);
    loop {
        // Promote odd levels to one-greater even levels where they do not
        // touch lower levels.
        level += 1;
        if !promote(levels, buffer, xres, yres, level, step) {
            break;
        }

        if level == 1 {
            levels.copy_from_slice(buffer);
            demote(levels, buffer, xres, yres, level, step);
        }

        levels.copy_from_slice(buffer);
        // Clear the space around even levels and promote them to
        // one-greater odd levels where they do not touch lower levels.
        level += 1;
        step *= 2;
        if !reduce(levels, buffer, xres, yres, level, step) {
            break;
        }

        // Points that both promoted sides skipped would need two-sided
        // interpolation; drop them.
        if level > 1 {
            remove_spikes(buffer, xres, yres, level, step / 2);
        }

        levels.copy_from_slice(buffer);
    }

    level
}

/// Fill small or thin grains directly from boundary values by repeated
/// neighbour averaging; for single pixels this already is the solution.
pub fn init_data_simple(data: &mut [f64], levels: &mut [u32], xres: usize, yres: usize) {
    for l in levels.iter_mut() {
        *l = (*l != 0) as u32;
    }

    let mut level = 1u32;
    loop {
        let mut finished = true;
        for i in 0..yres {
            for j in 0..xres {
                let k = i * xres + j;
                if levels[k] != level {
                    continue;
                }
                let mut s = 0.0;
                let mut n = 0usize;
                if i > 0 && levels[k - xres] < level {
                    s += data[k - xres];
                    n += 1;
                }
                if j > 0 && levels[k - 1] < level {
                    s += data[k - 1];
                    n += 1;
                }
                if j + 1 < xres && levels[k + 1] < level {
                    s += data[k + 1];
                    n += 1;
                }
                if i + 1 < yres && levels[k + xres] < level {
                    s += data[k + xres];
                    n += 1;
                }
                if n > 0 {
                    data[k] = s / n as f64;
                } else {
                    levels[k] = level + 1;
                    finished = false;
                }
            }
        }
        if finished {
            break;
        }
        level += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_grid_never_coarsens() {
        // A 4x4 interior cannot host three step-2 grid lines.
        let mut levels = vec![1u32; 16];
        let mut buffer = vec![0u32; 16];
        let maxlevel = build_levels(&mut levels, &mut buffer, 4, 4);
        assert!(maxlevel < 3);
    }

    #[test]
    fn test_large_block_coarsens() {
        // A solid 38x38 interior inside a Dirichlet ring must develop
        // coarse levels inside while staying fine next to the boundary.
        let n = 40;
        let mut levels = vec![0u32; n * n];
        for i in 1..n - 1 {
            for j in 1..n - 1 {
                levels[i * n + j] = 1;
            }
        }
        let mut buffer = vec![0u32; n * n];
        let maxlevel = build_levels(&mut levels, &mut buffer, n, n);
        assert!(maxlevel >= 3, "maxlevel {maxlevel}");
        // Some interpolated-out points exist.
        assert!(levels.iter().any(|&l| l == NONE));
        // Pixels touching the boundary keep a fine representation.
        for i in 1..n - 1 {
            for j in 1..n - 1 {
                let k = i * n + j;
                let touches = levels[k - n] == 0
                    || levels[k + n] == 0
                    || levels[k - 1] == 0
                    || levels[k + 1] == 0;
                if touches {
                    assert!(
                        levels[k] >= 1 && levels[k] <= 2,
                        "({j},{i}) level {}",
                        levels[k]
                    );
                }
            }
        }
    }

    #[test]
    fn test_init_data_simple_single_pixel() {
        // A single interior pixel gets the mean of its four neighbours.
        let mut data = vec![0.0; 9];
        data[1] = 4.0;
        data[3] = 8.0;
        data[5] = 0.0;
        data[7] = 0.0;
        let mut levels = vec![0u32; 9];
        levels[4] = 1;
        init_data_simple(&mut data, &mut levels, 3, 3);
        assert!((data[4] - 3.0).abs() < 1e-15);
    }

    #[test]
    fn test_init_data_simple_propagates() {
        // A 2-wide strip needs two rounds; all values end finite and
        // between the boundary extremes.
        let mut data = vec![0.0; 16];
        for (k, v) in data.iter_mut().enumerate() {
            *v = k as f64;
        }
        let mut levels = vec![0u32; 16];
        for i in 1..3 {
            for j in 1..3 {
                levels[i * 4 + j] = 1;
            }
        }
        init_data_simple(&mut data, &mut levels, 4, 4);
        for i in 1..3 {
            for j in 1..3 {
                let v = data[i * 4 + j];
                assert!(v > 0.0 && v < 15.0);
            }
        }
    }
}
