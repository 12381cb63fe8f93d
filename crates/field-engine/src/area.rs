//! Area integrals computed by the quarter-pixel processor.
//!
//! Quantities like surface area and volume are defined on the squares
//! formed by four neighbouring pixels, while masks lie on pixels. The
//! smallest processed element is therefore a quarter-pixel: every 2x2
//! corner set is visited with 0/1 weights recording which corners
//! participate. Half-pixel stripes at the field boundary are handled by
//! mirror extension when borders are included.

use std::cell::Cell;

use mask_engine::MaskField;
use serde::{Deserialize, Serialize};
use spm_common::{FieldPart, Masking};

use crate::error::FieldResult;
use crate::field::Field;
use crate::stats::MaskCtx;

/// Volume quadrature coefficient sets.
///
/// Only the self and orthogonal weights are stored, the diagonal weight is
/// always 1; each set is normalised so a flat field yields `z * A`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeMethod {
    /// Exact integration of biquadratic interpolation (the default).
    #[default]
    Biquadratic,
    /// Weights of unclear origin kept for backward comparability.
    Legacy,
    /// Volume under the triangulated surface.
    Triangular,
    /// Exact integration of bilinear interpolation.
    Bilinear,
}

impl VolumeMethod {
    fn weights(self) -> (f64, f64) {
        match self {
            VolumeMethod::Biquadratic => (484.0, 22.0),
            VolumeMethod::Legacy => (52.0, 10.0),
            VolumeMethod::Triangular => (36.0, 6.0),
            VolumeMethod::Bilinear => (28.0, 4.0),
        }
    }
}

/// Drive `func` over every 2x2 corner square touching the part.
///
/// Corner order is clockwise from the upper left: `(z1, z2, z3, z4)` =
/// (UL, UR, LR, LL), with matching weights. `allfunc`, when supplied, is
/// called instead of `func` for squares whose four corners all participate.
/// Boundary squares reuse edge values by mirroring; they are visited only
/// when `include_borders` is set or the outside row/column actually exists
/// in the field (in which case its pixels contribute values with weight 0).
#[allow(clippy::too_many_arguments)]
pub(crate) fn process_quarters(
    field: &Field,
    part: FieldPart,
    ctx: Option<&MaskCtx<'_>>,
    include_borders: bool,
    func: &mut dyn FnMut(f64, f64, f64, f64, u32, u32, u32, u32),
    mut allfunc: Option<&mut dyn FnMut(f64, f64, f64, f64)>,
) {
    let xres = field.xres();
    let yres = field.yres();
    let (col, row, width, height) = (part.col, part.row, part.width, part.height);

    let participates = |local_col: isize, local_row: isize| -> u32 {
        if local_col < 0
            || local_row < 0
            || local_col >= width as isize
            || local_row >= height as isize
        {
            return 0;
        }
        match ctx {
            None => 1,
            Some(ctx) => ctx.participates(local_col as usize, local_row as usize) as u32,
        }
    };

    for si in 0..=height {
        if si == 0 && !(include_borders || row > 0) {
            continue;
        }
        if si == height && !(include_borders || row + height < yres) {
            continue;
        }
        let r1 = row as isize + si as isize - 1;
        let r2 = r1 + 1;
        // Mirror at the field edges only.
        let r1c = if r1 < 0 { r2 } else { r1 } as usize;
        let r2c = if r2 >= yres as isize { r1 } else { r2 } as usize;

        for sj in 0..=width {
            if sj == 0 && !(include_borders || col > 0) {
                continue;
            }
            if sj == width && !(include_borders || col + width < xres) {
                continue;
            }
            let c1 = col as isize + sj as isize - 1;
            let c2 = c1 + 1;
            let c1c = if c1 < 0 { c2 } else { c1 } as usize;
            let c2c = if c2 >= xres as isize { c1 } else { c2 } as usize;

            let w1 = participates(c1 - col as isize, r1 - row as isize);
            let w2 = participates(c2 - col as isize, r1 - row as isize);
            let w3 = participates(c2 - col as isize, r2 - row as isize);
            let w4 = participates(c1 - col as isize, r2 - row as isize);
            if w1 | w2 | w3 | w4 == 0 {
                continue;
            }

            let z1 = field.get(c1c, r1c);
            let z2 = field.get(c2c, r1c);
            let z3 = field.get(c2c, r2c);
            let z4 = field.get(c1c, r2c);

            if w1 & w2 & w3 & w4 == 1 {
                if let Some(all) = allfunc.as_deref_mut() {
                    all(z1, z2, z3, z4);
                    continue;
                }
            }
            func(z1, z2, z3, z4, w1, w2, w3, w4);
        }
    }
}

/// Quarter-by-quarter surface area of one pixel square with some corners
/// possibly missing.
#[allow(clippy::too_many_arguments)]
fn pixel_quarter_area(
    z1: f64,
    z2: f64,
    z3: f64,
    z4: f64,
    w1: u32,
    w2: u32,
    w3: u32,
    w4: u32,
    dx: f64,
    dy: f64,
) -> f64 {
    let d21 = (z2 - z1) / dx;
    let d23 = (z2 - z3) / dy;
    let d14 = (z1 - z4) / dy;
    let d34 = (z3 - z4) / dx;
    let d1423 = 0.75 * d14 + 0.25 * d23;
    let d2134 = 0.75 * d21 + 0.25 * d34;
    let d2314 = 0.75 * d23 + 0.25 * d14;
    let d3421 = 0.75 * d34 + 0.25 * d21;
    let dd1423 = d1423 * d1423;
    let dd2134 = d2134 * d2134;
    let dd2314 = d2314 * d2314;
    let dd3421 = d3421 * d3421;
    let dd21 = 1.0 + d21 * d21;
    let dd14 = 1.0 + d14 * d14;
    let dd34 = 1.0 + d34 * d34;
    let dd23 = 1.0 + d23 * d23;
    let dv = 1.0 + 0.25 * (d14 + d23) * (d14 + d23);
    let dh = 1.0 + 0.25 * (d21 + d34) * (d21 + d34);

    let mut s = 0.0;
    let w = w1 + w2;
    if w != 0 {
        s += w as f64 * (dv + dd2134).sqrt();
    }
    let w = w2 + w3;
    if w != 0 {
        s += w as f64 * (dh + dd2314).sqrt();
    }
    let w = w3 + w4;
    if w != 0 {
        s += w as f64 * (dv + dd3421).sqrt();
    }
    let w = w4 + w1;
    if w != 0 {
        s += w as f64 * (dh + dd1423).sqrt();
    }
    if w1 != 0 {
        s += (dd21 + dd1423).sqrt() + (dd14 + dd2134).sqrt();
    }
    if w2 != 0 {
        s += (dd21 + dd2314).sqrt() + (dd23 + dd2134).sqrt();
    }
    if w3 != 0 {
        s += (dd34 + dd2314).sqrt() + (dd23 + dd3421).sqrt();
    }
    if w4 != 0 {
        s += (dd34 + dd1423).sqrt() + (dd14 + dd3421).sqrt();
    }
    s
}

/// Fast path of [`pixel_quarter_area`] for all four corners included.
fn pixel_allquarter_area(z1: f64, z2: f64, z3: f64, z4: f64, dx: f64, dy: f64) -> f64 {
    let d21 = (z2 - z1) / dx;
    let d23 = (z2 - z3) / dy;
    let d14 = (z1 - z4) / dy;
    let d34 = (z3 - z4) / dx;
    let d1423 = 0.75 * d14 + 0.25 * d23;
    let d2134 = 0.75 * d21 + 0.25 * d34;
    let d2314 = 0.75 * d23 + 0.25 * d14;
    let d3421 = 0.75 * d34 + 0.25 * d21;
    let dd1423 = d1423 * d1423;
    let dd2134 = d2134 * d2134;
    let dd2314 = d2314 * d2314;
    let dd3421 = d3421 * d3421;
    let dd21 = 1.0 + d21 * d21;
    let dd14 = 1.0 + d14 * d14;
    let dd34 = 1.0 + d34 * d34;
    let dd23 = 1.0 + d23 * d23;
    let dv = 1.0 + 0.25 * (d14 + d23) * (d14 + d23);
    let dh = 1.0 + 0.25 * (d21 + d34) * (d21 + d34);

    2.0 * ((dv + dd2134).sqrt()
        + (dh + dd2314).sqrt()
        + (dv + dd3421).sqrt()
        + (dh + dd1423).sqrt())
        + ((dd21 + dd1423).sqrt()
            + (dd14 + dd2134).sqrt()
            + (dd21 + dd2314).sqrt()
            + (dd23 + dd2134).sqrt()
            + (dd34 + dd2314).sqrt()
            + (dd23 + dd3421).sqrt()
            + (dd34 + dd1423).sqrt()
            + (dd14 + dd3421).sqrt())
}

/// Positive part of the volume of a triangular prism against the base
/// plane, with piecewise-linear intersections.
fn triprism_material(za: f64, zb: f64, zc: f64) -> f64 {
    let min1 = za.min(zc);
    let min = min1.min(zb);
    if min >= 0.0 {
        return za + zb + zc;
    }

    let max1 = za.max(zc);
    let max = max1.max(zb);
    if max <= 0.0 {
        return 0.0;
    }

    // The base plane crosses the triangle; integrate the positive part.
    let mut mid = zb;
    if min1 != min {
        mid = min1;
    } else if max1 != max {
        mid = max1;
    }

    if mid <= 0.0 {
        return max * max * max / (max - min) / (max - mid);
    }

    let p = mid / (mid - min);
    let q = max / (max - min);
    p * mid + q * max - p * q * min
}

#[allow(clippy::too_many_arguments)]
fn material_quadrature(
    z1: f64,
    z2: f64,
    z3: f64,
    z4: f64,
    w1: u32,
    w2: u32,
    w3: u32,
    w4: u32,
) -> f64 {
    let zc = 0.25 * (z1 + z2 + z3 + z4);
    let mut v = 0.0;
    if w1 != 0 {
        v += triprism_material(0.5 * (z1 + z2), z1, zc) + triprism_material(0.5 * (z4 + z1), zc, z1);
    }
    if w2 != 0 {
        v += triprism_material(0.5 * (z1 + z2), z2, zc) + triprism_material(0.5 * (z2 + z3), zc, z2);
    }
    if w3 != 0 {
        v += triprism_material(0.5 * (z2 + z3), zc, z3) + triprism_material(0.5 * (z3 + z4), z3, zc);
    }
    if w4 != 0 {
        v += triprism_material(0.5 * (z4 + z1), zc, z4) + triprism_material(0.5 * (z3 + z4), z4, zc);
    }
    v
}

fn material_quadrature_all(z1: f64, z2: f64, z3: f64, z4: f64) -> f64 {
    let zc = 0.25 * (z1 + z2 + z3 + z4);
    2.0 * (triprism_material(zc, z1, z2)
        + triprism_material(zc, z2, z3)
        + triprism_material(zc, z3, z4)
        + triprism_material(zc, z4, z1))
}

impl Field {
    /// Surface area of an area, by quarter-pixel triangulation with the
    /// gradient of each quarter mixing its two adjacent edges with weights
    /// 0.75 and 0.25.
    ///
    /// The value is meaningful only when lateral and value units agree.
    /// The full-field unmasked result is cached.
    pub fn surface_area(
        &mut self,
        part: Option<FieldPart>,
        mask: Option<&MaskField>,
        masking: Masking,
    ) -> FieldResult<f64> {
        let (rpart, maskcol, maskrow, masking) = self.check_mask(part, mask, masking)?;
        let full_field = masking == Masking::Ignore && rpart.is_entire(self.xres(), self.yres());
        if full_field {
            if let Some(are) = self.cache.are {
                return Ok(are);
            }
        }
        let dx = self.dx();
        let dy = self.dy();
        let ctx = MaskCtx::new(mask, maskcol, maskrow, masking);
        // Both the masked and the fast-path closure feed one accumulator.
        let s = Cell::new(0.0);
        process_quarters(
            self,
            rpart,
            ctx.as_ref(),
            true,
            &mut |z1, z2, z3, z4, w1, w2, w3, w4| {
                s.set(s.get() + pixel_quarter_area(z1, z2, z3, z4, w1, w2, w3, w4, dx, dy));
            },
            Some(&mut |z1, z2, z3, z4| {
                s.set(s.get() + pixel_allquarter_area(z1, z2, z3, z4, dx, dy));
            }),
        );
        let area = s.get() * dx * dy / 16.0;
        if full_field {
            self.cache.are = Some(area);
        }
        Ok(area)
    }

    /// Volume under the surface with basis at `z = 0`, by the weighted
    /// quadrature selected by `method`. Negative values subtract.
    pub fn volume(
        &mut self,
        part: Option<FieldPart>,
        mask: Option<&MaskField>,
        masking: Masking,
        method: VolumeMethod,
    ) -> FieldResult<f64> {
        let (rpart, maskcol, maskrow, masking) = self.check_mask(part, mask, masking)?;
        let (wself, wortho) = method.weights();
        let wself_q = 0.25 * wself;
        let wortho_q = 0.5 * wortho;
        let wall = 0.25 * wself + wortho + 1.0;
        let ctx = MaskCtx::new(mask, maskcol, maskrow, masking);
        let s = Cell::new(0.0);
        process_quarters(
            self,
            rpart,
            ctx.as_ref(),
            true,
            &mut |z1, z2, z3, z4, w1, w2, w3, w4| {
                let (w1, w2, w3, w4) = (w1 as f64, w2 as f64, w3 as f64, w4 as f64);
                let ss = (w1 * z1 + w2 * z2 + w3 * z3 + w4 * z4) * wself_q;
                let so = ((w1 + w3) * (z2 + z4) + (w2 + w4) * (z1 + z3)) * wortho_q;
                let sd = w1 * z3 + w2 * z4 + w3 * z1 + w4 * z2;
                s.set(s.get() + ss + so + sd);
            },
            Some(&mut |z1, z2, z3, z4| {
                s.set(s.get() + (z1 + z2 + z3 + z4) * wall);
            }),
        );
        Ok(s.get() * self.dx() * self.dy() / (wself + 4.0 * wortho + 4.0))
    }

    /// Volume of material above `base` (or of voids below it) between the
    /// surface and the base plane.
    ///
    /// Only surface parts on the material side of `base` contribute;
    /// intersections with the base plane are piecewise linear under the
    /// triangular subdivision.
    pub fn material_volume(
        &mut self,
        part: Option<FieldPart>,
        mask: Option<&MaskField>,
        masking: Masking,
        material: bool,
        base: f64,
    ) -> FieldResult<f64> {
        let (rpart, maskcol, maskrow, masking) = self.check_mask(part, mask, masking)?;
        let ctx = MaskCtx::new(mask, maskcol, maskrow, masking);
        let v = Cell::new(0.0);
        let sgn = if material { 1.0 } else { -1.0 };
        process_quarters(
            self,
            rpart,
            ctx.as_ref(),
            true,
            &mut |z1, z2, z3, z4, w1, w2, w3, w4| {
                v.set(
                    v.get()
                        + material_quadrature(
                            sgn * (z1 - base),
                            sgn * (z2 - base),
                            sgn * (z3 - base),
                            sgn * (z4 - base),
                            w1,
                            w2,
                            w3,
                            w4,
                        ),
                );
            },
            Some(&mut |z1, z2, z3, z4| {
                v.set(
                    v.get()
                        + material_quadrature_all(
                            sgn * (z1 - base),
                            sgn * (z2 - base),
                            sgn * (z3 - base),
                            sgn * (z4 - base),
                        ),
                );
            }),
        );
        Ok(v.get() * self.dx() * self.dy() / 24.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_from(data: &[f64], xres: usize, yres: usize) -> Field {
        Field::with_data(xres, yres, xres as f64, yres as f64, data.to_vec()).unwrap()
    }

    #[test]
    fn test_flat_surface_area_equals_projected() {
        // Scenario: 4x4 field of ones, dx = dy = 1; the surface is flat so
        // its area equals xreal * yreal = 16.
        let mut f = field_from(&[1.0; 16], 4, 4);
        let area = f.surface_area(None, None, Masking::Ignore).unwrap();
        assert!((area - 16.0).abs() < 1e-9, "area {area}");
        assert_eq!(f.cache.are, Some(area));
    }

    #[test]
    fn test_tilted_plane_surface_area() {
        // A plane z = x has slope 1: interior square columns contribute
        // sqrt(2) per unit of projected area while the two mirror-extended
        // half-pixel border columns are flat. For a 16x16 field that is
        // 15 * 16 * sqrt(2) for the sloped interior plus 16 for the flat
        // border strips.
        let mut data = Vec::new();
        for _i in 0..16 {
            for j in 0..16 {
                data.push(j as f64);
            }
        }
        let mut f = field_from(&data, 16, 16);
        let area = f.surface_area(None, None, Masking::Ignore).unwrap();
        let expected = 240.0 * 2.0_f64.sqrt() + 16.0;
        assert!(
            (area - expected).abs() < 1e-9,
            "area {area} expected {expected}"
        );
    }

    #[test]
    fn test_volume_flat_field_all_methods() {
        // Every quadrature is normalised so a flat field gives z * A.
        let mut f = field_from(&[2.0; 16], 4, 4);
        for method in [
            VolumeMethod::Biquadratic,
            VolumeMethod::Legacy,
            VolumeMethod::Triangular,
            VolumeMethod::Bilinear,
        ] {
            let v = f.volume(None, None, Masking::Ignore, method).unwrap();
            assert!((v - 32.0).abs() < 1e-9, "{method:?}: {v}");
        }
    }

    #[test]
    fn test_volume_negative_values_subtract() {
        let mut f = field_from(&[-1.0; 16], 4, 4);
        let v = f
            .volume(None, None, Masking::Ignore, VolumeMethod::default())
            .unwrap();
        assert!((v + 16.0).abs() < 1e-9);
    }

    #[test]
    fn test_masked_volume_half() {
        let mut f = field_from(&[1.0; 16], 4, 4);
        let mut mask = MaskField::new(4, 4).unwrap();
        mask.fill(Some(FieldPart::new(0, 0, 2, 4)), true).unwrap();
        let v = f
            .volume(None, Some(&mask), Masking::Include, VolumeMethod::default())
            .unwrap();
        // Half of the pixels participate; the flat-field value halves.
        assert!((v - 8.0).abs() < 1e-9, "volume {v}");
    }

    #[test]
    fn test_material_volume_flat_above_base() {
        // Flat field at z = 2 over base 0: material volume is the full
        // prism, void volume is zero.
        let mut f = field_from(&[2.0; 16], 4, 4);
        let vm = f
            .material_volume(None, None, Masking::Ignore, true, 0.0)
            .unwrap();
        assert!((vm - 32.0).abs() < 1e-9, "material {vm}");
        let vv = f
            .material_volume(None, None, Masking::Ignore, false, 0.0)
            .unwrap();
        assert!(vv.abs() < 1e-12, "voids {vv}");
    }

    #[test]
    fn test_material_volume_crossing_base() {
        // Field is -1 on the left half, +1 on the right half. Material
        // above 0 and voids below 0 are mirror images.
        let mut data = vec![-1.0; 8];
        data.extend_from_slice(&[1.0; 8]);
        let mut data2 = Vec::new();
        for _ in 0..4 {
            data2.extend_from_slice(&[-1.0, -1.0, 1.0, 1.0]);
        }
        let _ = data;
        let mut f = field_from(&data2, 4, 4);
        let vm = f
            .material_volume(None, None, Masking::Ignore, true, 0.0)
            .unwrap();
        let vv = f
            .material_volume(None, None, Masking::Ignore, false, 0.0)
            .unwrap();
        assert!((vm - vv).abs() < 1e-9, "material {vm} voids {vv}");
        assert!(vm > 0.0);
    }

    #[test]
    fn test_volume_against_sum_for_smooth_data() {
        // For a gently varying field the quadrature should stay close to
        // the plain Riemann sum.
        let mut data = Vec::new();
        for i in 0..12 {
            for j in 0..12 {
                data.push(1.0 + 0.1 * (i as f64) + 0.05 * (j as f64));
            }
        }
        let riemann: f64 = data.iter().sum();
        let mut f = field_from(&data, 12, 12);
        let v = f
            .volume(None, None, Masking::Ignore, VolumeMethod::default())
            .unwrap();
        assert!((v - riemann).abs() / riemann < 0.01, "{v} vs {riemann}");
    }
}
