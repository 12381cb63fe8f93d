//! Maximum inscribed discs and mean edge distances of grains.
//!
//! Each grain is upsampled twice (and rescaled to near-square pixels when
//! `dx != dy`), distance-transformed, and scored for disc-centre
//! candidates. The exact polygon edges bounding the grain are collected
//! by marching the 2x2 corner patterns, and each candidate centre is then
//! improved by probing twelve directions per quadrant with an adaptive
//! step. Rectangular grains are handled by closed-form shortcuts.

use mask_engine::distance::distance_transform_raw;
use spm_common::FieldPart;

use crate::hull::{Disc, NDIRECTIONS, SHIFT_DIRECTIONS};

/// Default cap on the number of disc-centre candidates tried per grain.
pub const NCAND_MAX: usize = 15;

const SEDINF: u32 = 0x7fff_ffff;

/// A boundary segment of the grain polygon, in squeezed coordinates.
#[derive(Debug, Clone, Copy, Default)]
struct Edge {
    xa: f64,
    ya: f64,
    xb: f64,
    yb: f64,
    /// Squared distance from the current centre, updated while probing.
    r2: f64,
}

/// Upsample one grain's bounding box by two, additionally stretching the
/// denser axis so the upsampled pixels are near-square. In-shape pixels
/// get the distance sentinel, everything else zero.
fn extract_upsampled_square_pixel_grain(
    grains: &[u32],
    xres: usize,
    gno: u32,
    bbox: FieldPart,
    dx: f64,
    dy: f64,
) -> (Vec<u32>, usize, usize) {
    let (col, row, w, h) = (bbox.col, bbox.row, bbox.width, bbox.height);
    let mut w2 = 2 * w;
    let mut h2 = 2 * h;

    // Nearly square pixels upsample plainly by two.
    if (dy / dx).ln().abs() < 0.05
        || (dy < dx && (dx / dy * w2 as f64).round() as usize == w2)
        || (dy > dx && (dy / dx * h2 as f64).round() as usize == h2)
    {
        let mut grain = vec![0u32; w2 * h2];
        for i in 0..h {
            let k2 = w2 * 2 * i;
            let k = (i + row) * xres + col;
            for j in 0..w {
                let v = if grains[k + j] == gno { SEDINF } else { 0 };
                grain[k2 + 2 * j] = v;
                grain[k2 + 2 * j + 1] = v;
                grain[k2 + w2 + 2 * j] = v;
                grain[k2 + w2 + 2 * j + 1] = v;
            }
        }
        (grain, w2, h2)
    } else if dy < dx {
        // Horizontal stretching; precompute the column index map.
        w2 = (dx / dy * w2 as f64).round() as usize;
        let indices: Vec<usize> = (0..w2)
            .map(|j| {
                let jj = ((j as f64 + 0.5) * w as f64 / w2 as f64).floor() as isize;
                jj.clamp(0, w as isize - 1) as usize
            })
            .collect();
        let mut grain = vec![0u32; w2 * h2];
        for i in 0..h {
            let k = (i + row) * xres + col;
            let k2 = w2 * 2 * i;
            for j in 0..w2 {
                let v = if grains[k + indices[j]] == gno { SEDINF } else { 0 };
                grain[k2 + j] = v;
                grain[k2 + w2 + j] = v;
            }
        }
        (grain, w2, h2)
    } else {
        // Vertical stretching; rows are doubled copies but unevenly.
        h2 = (dy / dx * h2 as f64).round() as usize;
        let mut grain = vec![0u32; w2 * h2];
        for i in 0..h2 {
            let ii = ((i as f64 + 0.5) * h as f64 / h2 as f64).floor() as isize;
            let ii = ii.clamp(0, h as isize - 1) as usize;
            let k = (ii + row) * xres + col;
            let k2 = i * w2;
            for j in 0..w {
                let v = if grains[k + j] == gno { SEDINF } else { 0 };
                grain[k2 + 2 * j] = v;
                grain[k2 + 2 * j + 1] = v;
            }
        }
        (grain, w2, h2)
    }
}

fn compare_candidates(a: &Disc, b: &Disc) -> std::cmp::Ordering {
    b.size
        .cmp(&a.size)
        .then_with(|| a.r2.partial_cmp(&b.r2).unwrap_or(std::cmp::Ordering::Equal))
}

/// Score interior pixels of the distance map and keep the best candidate
/// centres, ordered by score and then by distance from the grain's mass
/// centre. Returns the distance-map value at the best candidate.
fn find_disc_centre_candidates(
    candidates: &mut Vec<Disc>,
    ncandmax: usize,
    grain: &[u32],
    width: usize,
    height: usize,
    dx: f64,
    dy: f64,
    centrex: f64,
    centrey: f64,
) -> f64 {
    debug_assert!(width >= 4 && height >= 4);

    candidates.clear();
    let mut bestsize: u32 = 0;
    let mut worstgoodsize: u32 = 0;
    let mut maxd2: u32 = 0;
    for i in 1..height - 1 {
        for j in 1..width - 1 {
            let k = i * width + j;
            let d = grain[k];
            // Boundary pixels cannot be candidates and may fall outside the
            // original pixels after aspect correction.
            if d <= 1 {
                continue;
            }
            let size = 4 * d
                + (grain[k - width - 1]
                    + 2 * grain[k - width]
                    + grain[k - width + 1]
                    + 2 * grain[k - 1]
                    + 2 * grain[k + 1]
                    + grain[k + width - 1]
                    + 2 * grain[k + width]
                    + grain[k + width + 1]);
            if candidates.len() == ncandmax && size < worstgoodsize {
                continue;
            }
            if size < bestsize / 2 {
                continue;
            }

            let cand_x = (j as f64 + 0.5) * dx;
            let cand_y = (i as f64 + 0.5) * dy;
            let cand = Disc {
                x: cand_x,
                y: cand_y,
                // Distance from the whole-grain centre, only for sorting.
                r2: (cand_x - centrex) * (cand_x - centrex)
                    + (cand_y - centrey) * (cand_y - centrey),
                size,
            };

            let mut insertpos = candidates.len();
            while insertpos > 0 {
                if compare_candidates(&cand, &candidates[insertpos - 1]).is_ge() {
                    break;
                }
                insertpos -= 1;
            }
            candidates.insert(insertpos, cand);
            if insertpos == 0 {
                maxd2 = d;
                bestsize = size;
                for m in 1..candidates.len() {
                    if candidates[m].size < bestsize / 2 {
                        candidates.truncate(m);
                        break;
                    }
                }
            }
            candidates.truncate(ncandmax);
            worstgoodsize = candidates.last().expect("just inserted").size;
        }
    }

    debug_assert!(!candidates.is_empty());
    (maxd2 as f64).sqrt()
}

/// Collect the exact set of polygon edges bounding the grain by marching
/// the 2x2 corner pattern over the vertex grid.
fn find_all_edges(
    edges: &mut Vec<Edge>,
    grains: &[u32],
    xres: usize,
    gno: u32,
    bbox: FieldPart,
    dx: f64,
    dy: f64,
) {
    let (col, row, w, h) = (bbox.col, bbox.row, bbox.width, bbox.height);

    // Per-column start row of the open vertical run.
    let mut vertices = vec![usize::MAX; w + 1];
    edges.clear();

    for i in 0..=h {
        // Start column of the open horizontal run.
        let mut vertex = usize::MAX;
        for j in 0..=w {
            let k = (i + row) * xres + col + j;
            // Corner pattern bits: 1 2 over 4 8.
            let g0 = (i > 0 && j > 0 && grains[k - xres - 1] == gno) as u32;
            let g1 = (i > 0 && j < w && grains[k - xres] == gno) as u32;
            let g2 = (i < h && j > 0 && grains[k - 1] == gno) as u32;
            let g3 = (i < h && j < w && grains[k] == gno) as u32;
            let g = g0 | (g1 << 1) | (g2 << 2) | (g3 << 3);

            match g {
                8 | 7 => {
                    vertex = j;
                    vertices[j] = i;
                }
                2 | 13 => {
                    edges.push(Edge {
                        xa: dx * j as f64,
                        ya: dy * vertices[j] as f64,
                        xb: dx * j as f64,
                        yb: dy * i as f64,
                        r2: 0.0,
                    });
                    vertex = j;
                    vertices[j] = usize::MAX;
                }
                4 | 11 => {
                    edges.push(Edge {
                        xa: dx * vertex as f64,
                        ya: dy * i as f64,
                        xb: dx * j as f64,
                        yb: dy * i as f64,
                        r2: 0.0,
                    });
                    vertex = usize::MAX;
                    vertices[j] = i;
                }
                1 | 14 => {
                    edges.push(Edge {
                        xa: dx * vertex as f64,
                        ya: dy * i as f64,
                        xb: dx * j as f64,
                        yb: dy * i as f64,
                        r2: 0.0,
                    });
                    edges.push(Edge {
                        xa: dx * j as f64,
                        ya: dy * vertices[j] as f64,
                        xb: dx * j as f64,
                        yb: dy * i as f64,
                        r2: 0.0,
                    });
                    vertex = usize::MAX;
                    vertices[j] = usize::MAX;
                }
                6 | 9 => {
                    edges.push(Edge {
                        xa: dx * vertex as f64,
                        ya: dy * i as f64,
                        xb: dx * j as f64,
                        yb: dy * i as f64,
                        r2: 0.0,
                    });
                    edges.push(Edge {
                        xa: dx * j as f64,
                        ya: dy * vertices[j] as f64,
                        xb: dx * j as f64,
                        yb: dy * i as f64,
                        r2: 0.0,
                    });
                    vertex = j;
                    vertices[j] = i;
                }
                _ => {}
            }
        }
    }
}

/// Distance from the disc centre to the nearest point of each edge,
/// remembering per-edge distances; returns the minimum.
fn maximize_disc_radius(disc: &Disc, edges: &mut [Edge]) -> f64 {
    let x = disc.x;
    let y = disc.y;
    let mut r2best = f64::MAX;

    for edge in edges.iter_mut() {
        let rax = edge.xa - x;
        let ray = edge.ya - y;
        let rbx = edge.xb - x;
        let rby = edge.yb - y;
        let deltax = edge.xb - edge.xa;
        let deltay = edge.yb - edge.ya;
        let ca = -(deltax * rax + deltay * ray);
        let cb = deltax * rbx + deltay * rby;

        edge.r2 = if ca <= 0.0 {
            rax * rax + ray * ray
        } else if cb <= 0.0 {
            rbx * rbx + rby * rby
        } else {
            let tx = cb * rax + ca * rbx;
            let ty = cb * ray + ca * rby;
            let d = ca + cb;
            (tx * tx + ty * ty) / (d * d)
        };

        if edge.r2 < r2best {
            r2best = edge.r2;
        }
    }
    r2best
}

/// Move edges within reach of the current radius to the front; only they
/// can constrain nearby candidate centres.
fn filter_relevant_edges(edges: &mut [Edge], r2: f64, eps: f64) -> usize {
    let limitr = r2.sqrt() + 4.0 * eps + 0.5;
    let limit = limitr * limitr;
    let mut near = 0;
    for i in 0..edges.len() {
        if edges[i].r2 <= limit {
            edges.swap(i, near);
            near += 1;
        }
    }
    near
}

/// Iteratively maximise the minimum edge distance of the disc centre,
/// enlarging the step on successive improvements and halving it on
/// failure.
fn improve_inscribed_disc(disc: &mut Disc, edges: &mut Vec<Edge>, dist: f64) {
    let mut eps = 0.5 + 0.25 * (dist >= 4.0) as u32 as f64 + 0.25 * (dist >= 16.0) as u32 as f64;
    let mut nsuccessive = 0u32;

    loop {
        disc.r2 = maximize_disc_radius(disc, edges);
        eps = eps.min(0.5 * disc.r2.sqrt());
        let mut best = *disc;
        let nr = filter_relevant_edges(edges, best.r2, eps);

        let mut improvement = 0.0;
        for &(cx, cy) in SHIFT_DIRECTIONS.iter().take(NDIRECTIONS) {
            let sx = eps * cx;
            let sy = eps * cy;
            for (px, py) in [(sx, sy), (-sy, sx), (-sx, -sy), (sy, -sx)] {
                let mut cand = Disc {
                    x: disc.x + px,
                    y: disc.y + py,
                    size: disc.size,
                    r2: 0.0,
                };
                cand.r2 = maximize_disc_radius(&cand, &mut edges[..nr]);
                if cand.r2 > best.r2 {
                    best = cand;
                }
            }
        }

        if best.r2 > disc.r2 {
            improvement = best.r2.sqrt() - disc.r2.sqrt();
            *disc = best;
            // Each further improvement past the third scales the step up,
            // so eps can grow quickly.
            nsuccessive += 1;
            if nsuccessive > 3 {
                eps *= 1.5;
            }
        } else {
            eps *= 0.5;
            nsuccessive = 0;
        }
        if !(eps > 1e-3 || improvement > 1e-3) {
            break;
        }
    }
}

/// Mean of the Euclidean distance map over in-shape pixels, corrected by
/// the half-pixel and scaled to real units.
fn mean_euclidean_distance(sedt: &[u32], dx: f64, dy: f64) -> f64 {
    let mut dmean = 0.0;
    let mut np = 0usize;
    for &d in sedt {
        if d != 0 {
            dmean += (d as f64).sqrt();
            np += 1;
        }
    }
    (dmean / np as f64 - 0.5) * 0.5 * (dx + dy)
}

/// Compute inscribed-disc parameters and mean edge distances for all
/// grains. Output slices have `ngrains + 1` entries; any may be `None`.
/// Disc coordinates are real-valued within the field (no field offsets).
#[allow(clippy::too_many_arguments)]
pub fn inscribed_discs_and_friends(
    mut inscrdr: Option<&mut [f64]>,
    mut inscrdx: Option<&mut [f64]>,
    mut inscrdy: Option<&mut [f64]>,
    mut edmean: Option<&mut [f64]>,
    xvalues: &[f64],
    yvalues: &[f64],
    grains: &[u32],
    sizes: &[u32],
    bboxes: &[FieldPart],
    xres: usize,
    dx: f64,
    dy: f64,
) {
    let ngrains = sizes.len() - 1;
    let qgeom = (dx * dy).sqrt();
    let nodiscs = inscrdr.is_none() && inscrdx.is_none() && inscrdy.is_none();

    let mut candidates: Vec<Disc> = Vec::new();
    let mut edges: Vec<Edge> = Vec::new();

    for gno in 1..=ngrains {
        let bbox = bboxes[gno];
        let (w, h) = (bbox.width, bbox.height);
        let xoff = dx * bbox.col as f64;
        let yoff = dy * bbox.row as f64;

        // Rectangular grains have closed forms; the point is mainly to
        // catch grains of width or height one.
        if sizes[gno] as usize == w * h {
            let sdx = 0.5 * w as f64 * dx;
            let sdy = 0.5 * h as f64 * dy;
            let lmax = sdx.max(sdy);
            let lmin = sdx.min(sdy);
            if let Some(v) = inscrdr.as_deref_mut() {
                v[gno] = 0.999999 * lmin;
            }
            if let Some(v) = inscrdx.as_deref_mut() {
                v[gno] = sdx + xoff;
            }
            if let Some(v) = inscrdy.as_deref_mut() {
                v[gno] = sdy + yoff;
            }
            if let Some(v) = edmean.as_deref_mut() {
                v[gno] = lmin / 6.0 * (3.0 - lmin / lmax);
            }
            continue;
        }

        // Upsampling twice combined with the octagonal erosion scoring
        // yields candidates even in corners and junctions of thin lines.
        let (mut grain, width, height) =
            extract_upsampled_square_pixel_grain(grains, xres, gno as u32, bbox, dx, dy);
        // Upsampled pixel size in squeezed coordinates where the pixel
        // area is one; normally about a half on each side.
        let sdx = w as f64 * (dx / qgeom) / width as f64;
        let sdy = h as f64 * (dy / qgeom) / height as f64;
        // Grain centre in squeezed coordinates within the bounding box.
        let centrex = (xvalues[gno] + 0.5) * (dx / qgeom) - xoff / qgeom;
        let centrey = (yvalues[gno] + 0.5) * (dy / qgeom) - yoff / qgeom;

        distance_transform_raw(&mut grain, width, height);

        if let Some(v) = edmean.as_deref_mut() {
            v[gno] = mean_euclidean_distance(
                &grain,
                w as f64 * dx / width as f64,
                h as f64 * dy / height as f64,
            );
        }
        if nodiscs {
            continue;
        }

        let dist = find_disc_centre_candidates(
            &mut candidates,
            NCAND_MAX,
            &grain,
            width,
            height,
            sdx,
            sdy,
            centrex,
            centrey,
        );
        find_all_edges(
            &mut edges,
            grains,
            xres,
            gno as u32,
            bbox,
            dx / qgeom,
            dy / qgeom,
        );

        for cand in candidates.iter_mut() {
            improve_inscribed_disc(cand, &mut edges, dist);
        }
        let best = candidates
            .iter()
            .max_by(|a, b| a.r2.partial_cmp(&b.r2).unwrap_or(std::cmp::Ordering::Equal))
            .expect("at least one candidate");

        if let Some(v) = inscrdr.as_deref_mut() {
            v[gno] = best.r2.sqrt() * qgeom;
        }
        if let Some(v) = inscrdx.as_deref_mut() {
            v[gno] = best.x * qgeom + xoff;
        }
        if let Some(v) = inscrdy.as_deref_mut() {
            v[gno] = best.y * qgeom + yoff;
        }
    }
}

/// Compute representative grain positions and install them into the
/// mask's grain cache.
///
/// The position of a grain is the centre of its maximum inscribed disc in
/// pixel coordinates (unit pixel size is sufficient even for displays
/// with unequal pixel sides), not its centroid.
pub fn install_grain_positions(mask: &mut mask_engine::MaskField) -> crate::GrainResult<()> {
    let ngrains = mask.n_grains();
    let grains = mask.grain_numbers().to_vec();
    let sizes = mask.grain_sizes().to_vec();
    let bboxes = mask.grain_bounding_boxes().to_vec();
    let xres = mask.xres();
    let yres = mask.yres();

    // Pixel mass centres seed the candidate ordering.
    let mut xc = vec![0.0; ngrains + 1];
    let mut yc = vec![0.0; ngrains + 1];
    for i in 0..yres {
        for j in 0..xres {
            let g = grains[i * xres + j] as usize;
            xc[g] += j as f64;
            yc[g] += i as f64;
        }
    }
    for g in 0..=ngrains {
        if sizes[g] != 0 {
            xc[g] /= sizes[g] as f64;
            yc[g] /= sizes[g] as f64;
        }
    }

    let mut px = vec![f64::NAN; ngrains + 1];
    let mut py = vec![f64::NAN; ngrains + 1];
    inscribed_discs_and_friends(
        None,
        Some(&mut px),
        Some(&mut py),
        None,
        &xc,
        &yc,
        &grains,
        &sizes,
        &bboxes,
        xres,
        1.0,
        1.0,
    );

    let positions: Vec<(f64, f64)> = px.into_iter().zip(py).collect();
    mask.set_grain_positions(positions)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grains_from_rows(rows: &[&str]) -> (Vec<u32>, usize, usize) {
        let yres = rows.len();
        let xres = rows[0].len();
        let mut grains = vec![0u32; xres * yres];
        for (i, r) in rows.iter().enumerate() {
            for (j, ch) in r.chars().enumerate() {
                if ch == '#' {
                    grains[i * xres + j] = 1;
                }
            }
        }
        (grains, xres, yres)
    }

    fn bbox_of(grains: &[u32], xres: usize, yres: usize) -> FieldPart {
        let mut min_c = usize::MAX;
        let mut min_r = usize::MAX;
        let mut max_c = 0;
        let mut max_r = 0;
        for i in 0..yres {
            for j in 0..xres {
                if grains[i * xres + j] == 1 {
                    min_c = min_c.min(j);
                    max_c = max_c.max(j);
                    min_r = min_r.min(i);
                    max_r = max_r.max(i);
                }
            }
        }
        FieldPart::new(min_c, min_r, max_c + 1 - min_c, max_r + 1 - min_r)
    }

    #[test]
    fn test_rectangle_shortcut() {
        let (grains, xres, yres) = grains_from_rows(&[
            "........",
            ".####...",
            ".####...",
            "........",
        ]);
        let bboxes = vec![FieldPart::new(0, 0, 0, 0), bbox_of(&grains, xres, yres)];
        let sizes = vec![0u32, 8];
        let mut r = vec![0.0; 2];
        let mut x = vec![0.0; 2];
        let mut y = vec![0.0; 2];
        let xv = vec![0.0, 2.5];
        let yv = vec![0.0, 1.5];
        inscribed_discs_and_friends(
            Some(&mut r),
            Some(&mut x),
            Some(&mut y),
            None,
            &xv,
            &yv,
            &grains,
            &sizes,
            &bboxes,
            xres,
            1.0,
            1.0,
        );
        // Half the smaller side of the 4x2 rectangle.
        assert!((r[1] - 1.0).abs() < 1e-3, "r = {}", r[1]);
        assert!((x[1] - 3.0).abs() < 1e-9);
        assert!((y[1] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_l_shape_disc() {
        // An L-shaped grain; the disc must fit in the thick corner block.
        let (grains, xres, yres) = grains_from_rows(&[
            "..........",
            ".####.....",
            ".####.....",
            ".####.....",
            ".####.....",
            ".#........",
            "..........",
        ]);
        let bboxes = vec![FieldPart::new(0, 0, 0, 0), bbox_of(&grains, xres, yres)];
        let size: u32 = grains.iter().map(|&g| g).sum();
        let sizes = vec![0u32, size];
        // Pixel mass centre of the grain.
        let mut sx = 0.0;
        let mut sy = 0.0;
        for i in 0..yres {
            for j in 0..xres {
                if grains[i * xres + j] == 1 {
                    sx += j as f64;
                    sy += i as f64;
                }
            }
        }
        let xv = vec![0.0, sx / size as f64];
        let yv = vec![0.0, sy / size as f64];
        let mut r = vec![0.0; 2];
        let mut x = vec![0.0; 2];
        let mut y = vec![0.0; 2];
        inscribed_discs_and_friends(
            Some(&mut r),
            Some(&mut x),
            Some(&mut y),
            None,
            &xv,
            &yv,
            &grains,
            &sizes,
            &bboxes,
            xres,
            1.0,
            1.0,
        );
        // The 4x4 block admits a disc of radius 2.
        assert!((r[1] - 2.0).abs() < 0.05, "r = {}", r[1]);
        assert!(x[1] > 2.0 && x[1] < 4.1, "x = {}", x[1]);
        assert!(y[1] > 2.0 && y[1] < 4.1, "y = {}", y[1]);
    }

    #[test]
    fn test_edmean_square() {
        // For a large square of side a the mean distance to the boundary
        // is a/6; with side 12 that is 2 (the discrete estimate is close).
        let mut rows = Vec::new();
        rows.push("..............".to_string());
        for _ in 0..12 {
            rows.push(format!(".{}.", "#".repeat(12)));
        }
        rows.push("..............".to_string());
        let refs: Vec<&str> = rows.iter().map(|s| s.as_str()).collect();
        let (grains, xres, yres) = grains_from_rows(&refs);
        let bboxes = vec![FieldPart::new(0, 0, 0, 0), bbox_of(&grains, xres, yres)];
        let sizes = vec![0u32, 144];
        let xv = vec![0.0, 6.5];
        let yv = vec![0.0, 7.0];
        let mut ed = vec![0.0; 2];
        inscribed_discs_and_friends(
            None,
            None,
            None,
            Some(&mut ed),
            &xv,
            &yv,
            &grains,
            &sizes,
            &bboxes,
            xres,
            1.0,
            1.0,
        );
        assert!((ed[1] - 2.0).abs() < 0.3, "edmean = {}", ed[1]);
    }
}
