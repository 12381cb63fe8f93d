//! Pixel-wise arithmetic and field-combining operations.

use mask_engine::MaskField;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use spm_common::{CommonError, FieldPart, Masking};
use tracing::debug;

use crate::error::FieldResult;
use crate::field::Field;

/// Flags controlling [`Field::normalize`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizeFlags {
    /// Normalise the mean value.
    pub mean: bool,
    /// Normalise the root mean square.
    pub rms: bool,
    /// Apply the computed transform to the entire field; the part and mask
    /// then only delimit the measurement area.
    pub entire_data: bool,
}

/// Direction of the local surface deformation done by [`sculpt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SculptMethod {
    /// Form an upward protrusion from positive source values.
    Upward,
    /// Form a downward depression from negative source values.
    Downward,
}

/// Apply `f` to every participating pixel of a part.
fn modify_area<F: FnMut(&mut f64)>(
    field: &mut Field,
    part: FieldPart,
    mask: Option<&MaskField>,
    maskcol: usize,
    maskrow: usize,
    masking: Masking,
    mut f: F,
) {
    let xres = field.xres();
    let data = field.data_mut_raw();
    match masking {
        Masking::Ignore => {
            for i in 0..part.height {
                let start = (part.row + i) * xres + part.col;
                for d in &mut data[start..start + part.width] {
                    f(d);
                }
            }
        }
        _ => {
            let invert = masking == Masking::Exclude;
            let mask = mask.expect("masked mode without mask");
            for i in 0..part.height {
                let mut iter = mask.iter_row(maskcol, maskrow + i);
                let start = (part.row + i) * xres + part.col;
                for d in &mut data[start..start + part.width] {
                    if iter.get() != invert {
                        f(d);
                    }
                    iter.next();
                }
            }
        }
    }
}

impl Field {
    /// Fill a (possibly masked) part with zeroes.
    pub fn clear(
        &mut self,
        part: Option<FieldPart>,
        mask: Option<&MaskField>,
        masking: Masking,
    ) -> FieldResult<()> {
        self.fill(part, mask, masking, 0.0)
    }

    /// Fill a (possibly masked) part with a constant.
    ///
    /// Writing the entire field unmasked installs the corresponding flat
    /// cache; any other write drops it.
    pub fn fill(
        &mut self,
        part: Option<FieldPart>,
        mask: Option<&MaskField>,
        masking: Masking,
        value: f64,
    ) -> FieldResult<()> {
        let (part, maskcol, maskrow, masking) = self.check_mask(part, mask, masking)?;
        modify_area(self, part, mask, maskcol, maskrow, masking, |d| *d = value);
        if masking == Masking::Ignore && part.is_entire(self.xres(), self.yres()) {
            let flat_area = self.xreal() * self.yreal();
            self.cache.set_for_flat(value, flat_area);
            debug!(value, "filled entire field");
        } else {
            self.invalidate();
        }
        Ok(())
    }

    /// Add a constant to a (possibly masked) part.
    ///
    /// A whole-field unmasked add keeps the cache valid through the uniform
    /// shift rule.
    pub fn add(
        &mut self,
        part: Option<FieldPart>,
        mask: Option<&MaskField>,
        masking: Masking,
        value: f64,
    ) -> FieldResult<()> {
        let (part, maskcol, maskrow, masking) = self.check_mask(part, mask, masking)?;
        modify_area(self, part, mask, maskcol, maskrow, masking, |d| *d += value);
        if masking == Masking::Ignore && part.is_entire(self.xres(), self.yres()) {
            self.cache.apply_shift(value);
        } else {
            self.invalidate();
        }
        Ok(())
    }

    /// Multiply a (possibly masked) part by a constant.
    ///
    /// A whole-field unmasked multiply keeps the cache valid through the
    /// uniform scale rule.
    pub fn multiply(
        &mut self,
        part: Option<FieldPart>,
        mask: Option<&MaskField>,
        masking: Masking,
        value: f64,
    ) -> FieldResult<()> {
        let (part, maskcol, maskrow, masking) = self.check_mask(part, mask, masking)?;
        modify_area(self, part, mask, maskcol, maskrow, masking, |d| *d *= value);
        if masking == Masking::Ignore && part.is_entire(self.xres(), self.yres()) {
            self.cache.apply_scale(value);
        } else {
            self.invalidate();
        }
        Ok(())
    }

    /// Take the square root of every participating pixel. Negative values
    /// become NaN.
    pub fn sqrt_in_place(
        &mut self,
        part: Option<FieldPart>,
        mask: Option<&MaskField>,
        masking: Masking,
    ) -> FieldResult<()> {
        let (part, maskcol, maskrow, masking) = self.check_mask(part, mask, masking)?;
        modify_area(self, part, mask, maskcol, maskrow, masking, |d| *d = d.sqrt());
        self.invalidate();
        Ok(())
    }

    /// Apply a function to every participating pixel.
    pub fn apply_func<F>(
        &mut self,
        part: Option<FieldPart>,
        mask: Option<&MaskField>,
        masking: Masking,
        function: F,
    ) -> FieldResult<()>
    where
        F: Fn(f64) -> f64 + Sync,
    {
        let (part, maskcol, maskrow, masking) = self.check_mask(part, mask, masking)?;
        if masking == Masking::Ignore {
            // Pixel-wise and order-independent, so row bands can go wide.
            let xres = self.xres();
            let (col, width) = (part.col, part.width);
            self.data_mut_raw()
                .par_chunks_mut(xres)
                .skip(part.row)
                .take(part.height)
                .for_each(|row| {
                    for d in &mut row[col..col + width] {
                        *d = function(*d);
                    }
                });
        } else {
            modify_area(self, part, mask, maskcol, maskrow, masking, |d| {
                *d = function(*d)
            });
        }
        self.invalidate();
        Ok(())
    }

    /// Limit values of a part to `[lower, upper]`, returning the number of
    /// changed pixels.
    ///
    /// On a whole-field clamp the cache follows the clamp rule; min and max
    /// stay valid, the median survives if it already lay inside the range.
    pub fn clamp(
        &mut self,
        part: Option<FieldPart>,
        lower: f64,
        upper: f64,
    ) -> FieldResult<usize> {
        if !(lower <= upper) {
            return Err(CommonError::invalid("clamp range is empty").into());
        }
        let part = FieldPart::resolve(part, self.xres(), self.yres())?;
        let mut count = 0usize;
        modify_area(
            self,
            part,
            None,
            0,
            0,
            Masking::Ignore,
            |d| {
                if *d < lower {
                    *d = lower;
                    count += 1;
                } else if *d > upper {
                    *d = upper;
                    count += 1;
                }
            },
        );
        if count == 0 {
            return Ok(0);
        }
        if part.is_entire(self.xres(), self.yres()) {
            self.cache.apply_clamp(lower, upper);
        } else {
            self.invalidate();
        }
        Ok(count)
    }

    /// Normalise a (possibly masked) area to the given mean and rms.
    ///
    /// With only `rms` requested the current mean is preserved. Returns
    /// `Ok(false)` without touching the data when the area is empty or a
    /// non-zero rms is requested from zero-rms data.
    pub fn normalize(
        &mut self,
        part: Option<FieldPart>,
        mask: Option<&MaskField>,
        masking: Masking,
        mean: f64,
        rms: f64,
        flags: NormalizeFlags,
    ) -> FieldResult<bool> {
        let mut flags = flags;
        let fmean = self.mean(part, mask, masking)?;
        if fmean.is_nan() {
            return Ok(false);
        }
        let frms = self.rms(part, mask, masking)?;

        // Only rms requested: correct the shift to keep the current mean.
        let mut mean = mean;
        if flags.rms && !flags.mean {
            mean = fmean;
            flags.mean = true;
        }

        let mut q = 1.0;
        let mut ok = true;
        if flags.rms && frms != rms {
            if frms != 0.0 {
                q = rms / frms;
                if flags.entire_data {
                    self.multiply(None, None, Masking::Ignore, q)?;
                } else {
                    self.multiply(part, mask, masking, q)?;
                }
            } else {
                ok = false;
            }
        }
        if flags.mean && q * fmean != mean {
            let shift = mean - q * fmean;
            if flags.entire_data {
                self.add(None, None, Masking::Ignore, shift)?;
            } else {
                self.add(part, mask, masking, shift)?;
            }
        }
        Ok(ok)
    }

    /// Replace this field's values with `sqrt(op1^2 + op2^2)` pixel by
    /// pixel. All three fields must have identical resolutions.
    pub fn hypot_field(&mut self, op1: &Field, op2: &Field) -> FieldResult<()> {
        for other in [op1, op2] {
            if other.xres() != self.xres() || other.yres() != self.yres() {
                return Err(CommonError::DimensionMismatch(
                    self.xres(),
                    self.yres(),
                    other.xres(),
                    other.yres(),
                )
                .into());
            }
        }
        let a = op1.data();
        let b = op2.data();
        self.data_mut_raw()
            .par_iter_mut()
            .zip(a.par_iter().zip(b.par_iter()))
            .for_each(|(d, (&x, &y))| *d = x.hypot(y));
        self.invalidate();
        Ok(())
    }
}

/// Accumulate `dest += factor * src` over the intersection of `srcpart`
/// translated to `(destcol, destrow)` with `dest`.
///
/// The transferred rectangle is clipped to both fields; a vanishing overlap
/// is a no-op. Pass `factor = -1.0` for subtraction.
pub fn add_field(
    src: &Field,
    srcpart: Option<FieldPart>,
    dest: &mut Field,
    destcol: usize,
    destrow: usize,
    factor: f64,
) {
    let Some((col, row, width, height)) = clip_parts(src, srcpart, dest, destcol, destrow)
    else {
        return;
    };
    if factor == 0.0 {
        return;
    }
    let sxres = src.xres();
    let dxres = dest.xres();
    let sdata = src.data();
    let ddata = dest.data_mut_raw();
    for i in 0..height {
        let srow = &sdata[(row + i) * sxres + col..];
        let drow = &mut ddata[(destrow + i) * dxres + destcol..];
        for j in 0..width {
            drow[j] += factor * srow[j];
        }
    }
    dest.invalidate();
}

fn clip_parts(
    src: &Field,
    srcpart: Option<FieldPart>,
    dest: &Field,
    destcol: usize,
    destrow: usize,
) -> Option<(usize, usize, usize, usize)> {
    let (col, row, mut width, mut height) = match srcpart {
        Some(p) => (p.col, p.row, p.width, p.height),
        None => (0, 0, src.xres(), src.yres()),
    };
    if col >= src.xres() || row >= src.yres() {
        return None;
    }
    width = width.min(src.xres() - col);
    height = height.min(src.yres() - row);
    if destcol >= dest.xres() || destrow >= dest.yres() {
        return None;
    }
    width = width.min(dest.xres() - destcol);
    height = height.min(dest.yres() - destrow);
    if width == 0 || height == 0 {
        return None;
    }
    Some((col, row, width, height))
}

/// Locally deform `dest` to emboss the shape encoded by `src`.
///
/// Positive source values (for [`SculptMethod::Upward`]) or negative ones
/// (for [`SculptMethod::Downward`]) select the modified pixels. First the
/// extremum `m` of `dest` over the selected pixels is found, then each
/// selected destination pixel becomes `max(dest, m + src)` (respectively
/// `min`). In periodic mode the source block wraps around the destination
/// and `m` is taken over all wrapped blocks before the second pass.
pub fn sculpt(
    src: &Field,
    srcpart: Option<FieldPart>,
    dest: &mut Field,
    destcol: isize,
    destrow: isize,
    method: SculptMethod,
    periodic: bool,
) -> FieldResult<()> {
    let part = FieldPart::resolve(srcpart, src.xres(), src.yres())?;
    let (mut col, mut row) = (part.col, part.row);
    let (mut width, mut height) = (part.width, part.height);
    let dxres = dest.xres() as isize;
    let dyres = dest.yres() as isize;
    let (mut destcol, mut destrow) = (destcol, destrow);

    let mut periodic = periodic;
    if periodic {
        destcol = destcol.rem_euclid(dxres);
        destrow = destrow.rem_euclid(dyres);
        // Everything in one block degenerates to the plain case.
        if destcol + width as isize <= dxres && destrow + height as isize <= dyres {
            periodic = false;
        }
    } else {
        if destcol >= dxres
            || destrow >= dyres
            || destcol + width as isize <= 0
            || destrow + height as isize <= 0
        {
            return Ok(());
        }
        if destcol + (width as isize) > dxres {
            width = (dxres - destcol) as usize;
        }
        if destrow + (height as isize) > dyres {
            height = (dyres - destrow) as usize;
        }
        if destcol < 0 {
            // The columns sticking out on the left are dropped from the
            // source as well.
            width = (width as isize + destcol) as usize;
            col = (col as isize - destcol) as usize;
            destcol = 0;
        }
        if destrow < 0 {
            height = (height as isize + destrow) as usize;
            row = (row as isize - destrow) as usize;
            destrow = 0;
        }
    }
    let destcol = destcol as usize;
    let destrow = destrow as usize;

    let upward = method == SculptMethod::Upward;
    let mut m = if upward { f64::MAX } else { -f64::MAX };
    let mempty = m;

    let find_block = |m: f64, scol: usize, srow: usize, dcol: usize, drow: usize,
                      w: usize, h: usize, dest: &Field| {
        let mut m = m;
        for i in 0..h {
            for j in 0..w {
                let s = src.get(scol + j, srow + i);
                let d = dest.get(dcol + j, drow + i);
                if upward {
                    if s > 0.0 && d < m {
                        m = d;
                    }
                } else if s < 0.0 && d > m {
                    m = d;
                }
            }
        }
        m
    };

    if !periodic {
        m = find_block(m, col, row, destcol, destrow, width, height, dest);
        if m == mempty {
            return Ok(());
        }
        sculpt_block(src, dest, col, row, destcol, destrow, width, height, upward, m);
        dest.invalidate();
        return Ok(());
    }

    // Toroidal overlap: walk destination-space blocks wrapping at the edges.
    let dxres = dxres as usize;
    let dyres = dyres as usize;
    let mut i = 0usize;
    let mut ii = destrow;
    while i < height {
        let lower = dyres.min(ii + (height - i));
        let mut j = 0usize;
        let mut jj = destcol;
        while j < width {
            let right = dxres.min(jj + (width - j));
            m = find_block(m, col + j, row + i, jj, ii, right - jj, lower - ii, dest);
            j += right - jj;
            jj = 0;
        }
        i += lower - ii;
        ii = 0;
    }
    if m == mempty {
        return Ok(());
    }

    let mut i = 0usize;
    let mut ii = destrow;
    while i < height {
        let lower = dyres.min(ii + (height - i));
        let mut j = 0usize;
        let mut jj = destcol;
        while j < width {
            let right = dxres.min(jj + (width - j));
            sculpt_block(
                src,
                dest,
                col + j,
                row + i,
                jj,
                ii,
                right - jj,
                lower - ii,
                upward,
                m,
            );
            j += right - jj;
            jj = 0;
        }
        i += lower - ii;
        ii = 0;
    }
    dest.invalidate();
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn sculpt_block(
    src: &Field,
    dest: &mut Field,
    scol: usize,
    srow: usize,
    dcol: usize,
    drow: usize,
    width: usize,
    height: usize,
    upward: bool,
    m: f64,
) {
    let dxres = dest.xres();
    let sxres = src.xres();
    let sdata = src.data();
    let ddata = dest.data_mut_raw();
    for i in 0..height {
        for j in 0..width {
            let s = sdata[(srow + i) * sxres + scol + j];
            let d = &mut ddata[(drow + i) * dxres + dcol + j];
            if upward {
                if s > 0.0 {
                    *d = d.max(m + s);
                }
            } else if s < 0.0 {
                *d = d.min(m + s);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_from(data: &[f64], xres: usize, yres: usize) -> Field {
        Field::with_data(xres, yres, xres as f64, yres as f64, data.to_vec()).unwrap()
    }

    #[test]
    fn test_fill_full_installs_cache() {
        let mut f = Field::new(4, 4, 4.0, 4.0).unwrap();
        f.fill(None, None, Masking::Ignore, 2.5).unwrap();
        assert_eq!(f.cache.min, Some(2.5));
        assert_eq!(f.cache.max, Some(2.5));
        assert_eq!(f.cache.rms, Some(0.0));
        assert_eq!(f.cache.msq, Some(6.25));
        assert_eq!(f.cache.are, Some(16.0));
    }

    #[test]
    fn test_fill_part_invalidates() {
        let mut f = Field::new(4, 4, 4.0, 4.0).unwrap();
        f.fill(None, None, Masking::Ignore, 1.0).unwrap();
        f.fill(Some(FieldPart::new(0, 0, 2, 2)), None, Masking::Ignore, 3.0)
            .unwrap();
        assert!(f.cache.min.is_none());
        assert_eq!(f.get(0, 0), 3.0);
        assert_eq!(f.get(3, 3), 1.0);
    }

    #[test]
    fn test_add_updates_cache() {
        let mut f = field_from(&[0.0, 1.0, 2.0, 3.0], 2, 2);
        // Materialise the cache.
        let (min, max) = f.min_max(None, None, Masking::Ignore).unwrap();
        assert_eq!((min, max), (0.0, 3.0));
        f.add(None, None, Masking::Ignore, 10.0).unwrap();
        assert_eq!(f.cache.min, Some(10.0));
        assert_eq!(f.cache.max, Some(13.0));
        // Values really shifted.
        assert_eq!(f.get(1, 1), 13.0);
    }

    #[test]
    fn test_multiply_negative_swaps_min_max() {
        let mut f = field_from(&[0.0, 1.0, 2.0, 3.0], 2, 2);
        f.min_max(None, None, Masking::Ignore).unwrap();
        f.multiply(None, None, Masking::Ignore, -2.0).unwrap();
        assert_eq!(f.cache.min, Some(-6.0));
        assert_eq!(f.cache.max, Some(0.0));
        let (min, max) = f.min_max(None, None, Masking::Ignore).unwrap();
        assert_eq!((min, max), (-6.0, 0.0));
    }

    #[test]
    fn test_masked_add() {
        let mut f = field_from(&[1.0; 9], 3, 3);
        let mut mask = MaskField::new(3, 3).unwrap();
        mask.set(1, 1, true);
        f.add(None, Some(&mask), Masking::Include, 5.0).unwrap();
        assert_eq!(f.get(1, 1), 6.0);
        assert_eq!(f.get(0, 0), 1.0);
        f.add(None, Some(&mask), Masking::Exclude, 2.0).unwrap();
        assert_eq!(f.get(1, 1), 6.0);
        assert_eq!(f.get(0, 0), 3.0);
    }

    #[test]
    fn test_clamp_counts_and_cache() {
        let mut f = field_from(&[-2.0, 0.5, 1.0, 7.0], 2, 2);
        f.min_max(None, None, Masking::Ignore).unwrap();
        let changed = f.clamp(None, 0.0, 2.0).unwrap();
        assert_eq!(changed, 2);
        assert_eq!(f.cache.min, Some(0.0));
        assert_eq!(f.cache.max, Some(2.0));
        assert_eq!(f.get(0, 0), 0.0);
        assert_eq!(f.get(1, 1), 2.0);
        assert!(f.clamp(None, 3.0, 1.0).is_err());
    }

    #[test]
    fn test_normalize_mean_and_rms() {
        let mut f = field_from(&[0.0, 2.0, 0.0, 2.0], 2, 2);
        let ok = f
            .normalize(
                None,
                None,
                Masking::Ignore,
                5.0,
                2.0,
                NormalizeFlags {
                    mean: true,
                    rms: true,
                    entire_data: false,
                },
            )
            .unwrap();
        assert!(ok);
        let mean = f.mean(None, None, Masking::Ignore).unwrap();
        let rms = f.rms(None, None, Masking::Ignore).unwrap();
        assert!((mean - 5.0).abs() < 1e-12);
        assert!((rms - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_normalize_rms_only_keeps_mean() {
        let mut f = field_from(&[0.0, 2.0, 0.0, 2.0], 2, 2);
        f.normalize(
            None,
            None,
            Masking::Ignore,
            0.0,
            3.0,
            NormalizeFlags {
                mean: false,
                rms: true,
                entire_data: false,
            },
        )
        .unwrap();
        let mean = f.mean(None, None, Masking::Ignore).unwrap();
        assert!((mean - 1.0).abs() < 1e-12);
        let rms = f.rms(None, None, Masking::Ignore).unwrap();
        assert!((rms - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_normalize_zero_rms_fails() {
        let mut f = field_from(&[1.0; 4], 2, 2);
        let ok = f
            .normalize(
                None,
                None,
                Masking::Ignore,
                0.0,
                1.0,
                NormalizeFlags {
                    mean: false,
                    rms: true,
                    entire_data: false,
                },
            )
            .unwrap();
        assert!(!ok);
    }

    #[test]
    fn test_hypot_field() {
        let a = field_from(&[3.0, 0.0, 3.0, 0.0], 2, 2);
        let b = field_from(&[4.0, 1.0, 4.0, 1.0], 2, 2);
        let mut f = Field::new(2, 2, 2.0, 2.0).unwrap();
        f.hypot_field(&a, &b).unwrap();
        assert_eq!(f.get(0, 0), 5.0);
        assert_eq!(f.get(1, 0), 1.0);
        let c = Field::new(3, 2, 3.0, 2.0).unwrap();
        assert!(f.hypot_field(&a, &c).is_err());
    }

    #[test]
    fn test_add_field_subtract_roundtrip() {
        let a = field_from(&[1.0, 2.0, 3.0, 4.0], 2, 2);
        let mut dest = field_from(&[10.0, 10.0, 10.0, 10.0], 2, 2);
        add_field(&a, None, &mut dest, 0, 0, 1.0);
        assert_eq!(dest.get(1, 1), 14.0);
        add_field(&a, None, &mut dest, 0, 0, -1.0);
        for i in 0..4 {
            assert!((dest.data()[i] - 10.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_add_field_clips() {
        let src = field_from(&[1.0; 16], 4, 4);
        let mut dest = field_from(&[0.0; 4], 2, 2);
        add_field(&src, None, &mut dest, 1, 1, 2.0);
        assert_eq!(dest.get(1, 1), 2.0);
        assert_eq!(dest.get(0, 0), 0.0);
    }

    #[test]
    fn test_sculpt_upward() {
        // Dest is a flat floor at 1; src is a positive bump of height 2 on
        // a single pixel. The modified pixel becomes m + src = 1 + 2.
        let mut dest = field_from(&[1.0; 9], 3, 3);
        let mut srcdata = vec![0.0; 9];
        srcdata[4] = 2.0;
        let src = field_from(&srcdata, 3, 3);
        sculpt(&src, None, &mut dest, 0, 0, SculptMethod::Upward, false).unwrap();
        assert_eq!(dest.get(1, 1), 3.0);
        assert_eq!(dest.get(0, 0), 1.0);
    }

    #[test]
    fn test_sculpt_downward_ignores_positive() {
        let mut dest = field_from(&[0.0; 9], 3, 3);
        let mut srcdata = vec![0.0; 9];
        srcdata[4] = 2.0; // positive, Downward looks at negative values only
        srcdata[0] = -1.0;
        let src = field_from(&srcdata, 3, 3);
        sculpt(&src, None, &mut dest, 0, 0, SculptMethod::Downward, false).unwrap();
        assert_eq!(dest.get(1, 1), 0.0);
        assert_eq!(dest.get(0, 0), -1.0);
    }

    #[test]
    fn test_sculpt_negative_destination_clips_source() {
        // Placing a 2x2 source at destcol = -1 leaves only its right
        // column visible, mapped to destination column 0.
        let mut dest = field_from(&[0.0; 9], 3, 3);
        let src = field_from(&[1.0, 2.0, 3.0, 4.0], 2, 2);
        sculpt(&src, None, &mut dest, -1, 0, SculptMethod::Upward, false).unwrap();
        assert_eq!(dest.get(0, 0), 2.0);
        assert_eq!(dest.get(0, 1), 4.0);
        assert_eq!(dest.get(1, 0), 0.0);
        assert_eq!(dest.get(2, 2), 0.0);
    }

    #[test]
    fn test_sculpt_periodic_wraps() {
        // A 2x2 positive source placed so it wraps around both edges of a
        // 4x4 destination.
        let mut dest = field_from(&[0.0; 16], 4, 4);
        let src = field_from(&[1.0; 4], 2, 2);
        sculpt(&src, None, &mut dest, 3, 3, SculptMethod::Upward, true).unwrap();
        // Touched pixels: (3,3), (0,3), (3,0), (0,0).
        assert_eq!(dest.get(3, 3), 1.0);
        assert_eq!(dest.get(0, 3), 1.0);
        assert_eq!(dest.get(3, 0), 1.0);
        assert_eq!(dest.get(0, 0), 1.0);
        assert_eq!(dest.get(1, 1), 0.0);
    }

    #[test]
    fn test_apply_func() {
        let mut f = field_from(&[1.0, 2.0, 3.0, 4.0], 2, 2);
        f.apply_func(None, None, Masking::Ignore, |v| v * v).unwrap();
        assert_eq!(f.data(), &[1.0, 4.0, 9.0, 16.0]);
    }
}
