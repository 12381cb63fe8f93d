//! Squared Euclidean distance transform of mask grains.
//!
//! A multi-wave queue algorithm: the first wave assigns 1 or 2 to pixels
//! with a clear 4- or 8-neighbour (field borders count as clear), then each
//! wave `l` relaxes 8-neighbours of the previous wave's pixels with
//! increments `2l - 1` (axial) and `2(2l - 1)` (diagonal). The high bit of
//! a distance marks pixels already sitting in the output queue.

use tracing::debug;

use crate::mask::MaskField;

/// Queued-pixel flag stored in the high bit of a working distance.
const QUEUED: u32 = 0x8000_0000;
/// Sentinel for not-yet-reached pixels; all real distances are below it.
const SEDINF: u32 = 0x7fff_ffff;

/// Assign the first wave: 1 for a clear 4-neighbour (or border), 2 for a
/// clear 8-neighbour only, and enqueue every assigned pixel.
fn first_step(distances: &mut [u32], xres: usize, yres: usize, queue: &mut Vec<usize>) {
    queue.clear();
    let mut enqueue_border = |d: &mut [u32], k: usize, queue: &mut Vec<usize>| {
        if d[k] != 0 {
            d[k] = 1;
            queue.push(k);
        }
    };

    for k in 0..xres {
        enqueue_border(distances, k, queue);
    }
    if yres == 1 {
        return;
    }

    for i in 1..yres - 1 {
        let base = i * xres;
        enqueue_border(distances, base, queue);
        if xres > 1 {
            for j in 1..xres - 1 {
                let k = base + j;
                if distances[k] == 0 {
                    continue;
                }
                if distances[k - xres] == 0
                    || distances[k - 1] == 0
                    || distances[k + 1] == 0
                    || distances[k + xres] == 0
                {
                    distances[k] = 1;
                    queue.push(k);
                } else if distances[k - xres - 1] == 0
                    || distances[k - xres + 1] == 0
                    || distances[k + xres - 1] == 0
                    || distances[k + xres + 1] == 0
                {
                    distances[k] = 2;
                    queue.push(k);
                }
            }
            enqueue_border(distances, base + xres - 1, queue);
        }
    }

    for k in (yres - 1) * xres..yres * xres {
        enqueue_border(distances, k, queue);
    }
}

#[inline]
fn relax(distances: &mut [u32], kk: usize, cand: u32, outqueue: &mut Vec<usize>) {
    if (distances[kk] & !QUEUED) > cand {
        if distances[kk] & QUEUED == 0 {
            outqueue.push(kk);
        }
        distances[kk] = QUEUED | cand;
    }
}

/// Wave 2: candidates may touch the field border, so every neighbour access
/// is bounds-checked.
fn erode_sed2(
    distances: &mut [u32],
    olddist: &[u32],
    xres: usize,
    yres: usize,
    inqueue: &[usize],
    outqueue: &mut Vec<usize>,
) {
    const HVSED2: u32 = 3;
    const DIAG2: u32 = 6;
    outqueue.clear();

    for &k in inqueue {
        let i = k / xres;
        let j = k % xres;
        let d2hv = olddist[k] + HVSED2;
        let d2d = olddist[k] + DIAG2;

        if i > 0 {
            if j > 0 {
                relax(distances, k - xres - 1, d2d, outqueue);
            }
            relax(distances, k - xres, d2hv, outqueue);
            if j + 1 < xres {
                relax(distances, k - xres + 1, d2d, outqueue);
            }
        }
        if j > 0 {
            relax(distances, k - 1, d2hv, outqueue);
        }
        if j + 1 < xres {
            relax(distances, k + 1, d2hv, outqueue);
        }
        if i + 1 < yres {
            if j > 0 {
                relax(distances, k + xres - 1, d2d, outqueue);
            }
            relax(distances, k + xres, d2hv, outqueue);
            if j + 1 < xres {
                relax(distances, k + xres + 1, d2d, outqueue);
            }
        }
    }
}

/// Waves 3 and up: queued pixels are guaranteed at least two pixels away
/// from any clear pixel or border, so neighbour indices need no checks.
fn erode_sed(
    distances: &mut [u32],
    olddist: &[u32],
    xres: usize,
    l: u32,
    inqueue: &[usize],
    outqueue: &mut Vec<usize>,
) {
    let hvsed2 = 2 * l - 1;
    let diag2 = 2 * hvsed2;
    outqueue.clear();

    for &k in inqueue {
        let d2hv = olddist[k] + hvsed2;
        let d2d = olddist[k] + diag2;
        let kk = k - xres - 1;

        relax(distances, kk, d2d, outqueue);
        relax(distances, kk + 1, d2hv, outqueue);
        relax(distances, kk + 2, d2d, outqueue);
        relax(distances, k - 1, d2hv, outqueue);
        relax(distances, k + 1, d2hv, outqueue);
        relax(distances, k + xres - 1, d2d, outqueue);
        relax(distances, k + xres, d2hv, outqueue);
        relax(distances, k + xres + 1, d2d, outqueue);
    }
}

/// Run the transform in place over `distances` holding nonzero values at
/// in-shape pixels and zeroes outside.
///
/// Exposed for consumers that transform shapes other than a mask field's
/// own bits, such as upsampled per-grain maps.
pub fn distance_transform_raw(distances: &mut [u32], xres: usize, yres: usize) {
    for d in distances.iter_mut() {
        *d = if *d != 0 { SEDINF } else { 0 };
    }

    let mut workspace = vec![0u32; distances.len()];
    let mut inqueue: Vec<usize> = Vec::new();
    let mut outqueue: Vec<usize> = Vec::new();

    first_step(distances, xres, yres, &mut inqueue);

    let mut l = 2u32;
    let mut waves = 0usize;
    while !inqueue.is_empty() {
        for &k in &inqueue {
            workspace[k] = distances[k];
        }
        if l == 2 {
            erode_sed2(distances, &workspace, xres, yres, &inqueue, &mut outqueue);
        } else {
            erode_sed(distances, &workspace, xres, l, &inqueue, &mut outqueue);
        }
        for &k in &outqueue {
            distances[k] &= !QUEUED;
        }
        std::mem::swap(&mut inqueue, &mut outqueue);
        l += 1;
        waves += 1;
    }
    debug!(waves, "distance transform finished");
}

impl MaskField {
    /// The squared Euclidean distance transform, computing and caching it
    /// if necessary.
    ///
    /// Each set pixel receives its squared distance (in pixel units) to the
    /// nearest clear pixel, field borders included; clear pixels are 0.
    pub fn distance_transform(&mut self) -> &[u32] {
        if self.distances.is_none() {
            let xres = self.xres();
            let yres = self.yres();
            let mut distances = vec![0u32; xres * yres];
            for i in 0..yres {
                let mut iter = self.iter_row(0, i);
                for j in 0..xres {
                    distances[i * xres + j] = iter.get() as u32;
                    iter.next();
                }
            }
            distance_transform_raw(&mut distances, xres, yres);
            self.distances = Some(distances);
        }
        self.distances.as_deref().expect("distances just computed")
    }
}
