//! Field levelling: plane and polynomial fits, facet inclination, and
//! row-shift alignment.
//!
//! All fits work in coordinates normalised to `[-1, 1]`:
//! `xi = 2 col / (xres - 1) - 1`, `eta = 2 row / (yres - 1) - 1`.

use mask_engine::MaskField;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use spm_common::{CommonError, FieldPart, Masking};

use crate::error::FieldResult;
use crate::field::Field;
use crate::stats::{median_in_place, MaskCtx};

/// How [`Field::find_row_shifts`] derives the per-row values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowShiftMethod {
    /// Difference of consecutive row means.
    Mean,
    /// Difference of consecutive row medians.
    Median,
    /// Mean of pixel differences to the next row.
    MeanDiff,
    /// Median of pixel differences to the next row.
    MedianDiff,
}

/// Solve the normal equations `A^T A x = A^T b` of a least-squares
/// problem, with a relative pivot tolerance as the rank check.
///
/// Plain `Cholesky::new` would accept or reject an exactly singular
/// system depending on rounding noise in the last pivot; the explicit
/// tolerance makes rank deficiency deterministic.
pub fn solve_normal_equations(ata: DMatrix<f64>, atb: &DVector<f64>) -> Option<Vec<f64>> {
    let n = ata.nrows();
    let mut l = ata;
    for k in 0..n {
        let orig = l[(k, k)];
        let mut pivot = orig;
        for m in 0..k {
            pivot -= l[(k, m)] * l[(k, m)];
        }
        if !(pivot > 1e-12 * orig.abs().max(f64::MIN_POSITIVE)) {
            return None;
        }
        let pivot = pivot.sqrt();
        l[(k, k)] = pivot;
        for i in k + 1..n {
            let mut v = l[(i, k)];
            for m in 0..k {
                v -= l[(i, m)] * l[(k, m)];
            }
            l[(i, k)] = v / pivot;
        }
    }
    // Forward then back substitution on the factor.
    let mut x = vec![0.0; n];
    for i in 0..n {
        let mut v = atb[i];
        for m in 0..i {
            v -= l[(i, m)] * x[m];
        }
        x[i] = v / l[(i, i)];
    }
    for i in (0..n).rev() {
        let mut v = x[i];
        for m in i + 1..n {
            v -= l[(m, i)] * x[m];
        }
        x[i] = v / l[(i, i)];
    }
    Some(x)
}

/// Accumulate and solve a linear least-squares fit over an area.
///
/// `basis` fills the basis-function values for one point; points are
/// enumerated in row-major order over the part and skipped when the mask
/// excludes them. Returns `None` on rank deficiency.
fn linear_fit<B>(
    field: &Field,
    part: FieldPart,
    ctx: Option<&MaskCtx<'_>>,
    nterms: usize,
    mut basis: B,
) -> Option<Vec<f64>>
where
    B: FnMut(usize, usize, &mut [f64]),
{
    let mut ata = DMatrix::<f64>::zeros(nterms, nterms);
    let mut atb = DVector::<f64>::zeros(nterms);
    let mut fvalues = vec![0.0; nterms];
    let mut npoints = 0usize;

    for i in 0..part.height {
        for j in 0..part.width {
            if let Some(ctx) = ctx {
                if !ctx.participates(j, i) {
                    continue;
                }
            }
            let z = field.get(part.col + j, part.row + i);
            basis(j, i, &mut fvalues);
            for a in 0..nterms {
                for b in a..nterms {
                    ata[(a, b)] += fvalues[a] * fvalues[b];
                }
                atb[a] += fvalues[a] * z;
            }
            npoints += 1;
        }
    }
    if npoints < nterms {
        return None;
    }
    for a in 0..nterms {
        for b in 0..a {
            ata[(a, b)] = ata[(b, a)];
        }
    }

    solve_normal_equations(ata, &atb)
}

/// Powers of the normalised coordinate for every index of one axis.
fn enumerate_powers(
    powers: &[usize],
    first: usize,
    len: usize,
    dim: usize,
) -> (Vec<f64>, usize) {
    let maxpower = powers.iter().copied().max().unwrap_or(0);
    let mut table = Vec::with_capacity((maxpower + 1) * len);
    for i in 0..len {
        let t = if dim > 1 {
            2.0 * (i + first) as f64 / (dim - 1) as f64 - 1.0
        } else {
            0.0
        };
        let mut tp = 1.0;
        for _ in 0..maxpower {
            table.push(tp);
            tp *= t;
        }
        table.push(tp);
    }
    (table, maxpower)
}

impl Field {
    /// Fit a plane `a + bx * xi + by * eta` through an area by least
    /// squares in normalised coordinates.
    ///
    /// Returns `None` when there are too few points or the points lack two
    /// distinct coordinates in either dimension.
    pub fn fit_plane(
        &self,
        part: Option<FieldPart>,
        mask: Option<&MaskField>,
        masking: Masking,
    ) -> FieldResult<Option<(f64, f64, f64)>> {
        let (rpart, maskcol, maskrow, masking) = self.check_mask(part, mask, masking)?;
        if rpart.width < 2 || rpart.height < 2 {
            return Ok(None);
        }
        let ctx = MaskCtx::new(mask, maskcol, maskrow, masking);
        let xres = self.xres() as f64;
        let yres = self.yres() as f64;
        let (col, row) = (rpart.col, rpart.row);
        let coeffs = linear_fit(self, rpart, ctx.as_ref(), 3, |j, i, fvalues| {
            fvalues[0] = 1.0;
            fvalues[1] = 2.0 * (col + j) as f64 / (xres - 1.0) - 1.0;
            fvalues[2] = 2.0 * (row + i) as f64 / (yres - 1.0) - 1.0;
        });
        Ok(coeffs.map(|c| (c[0], c[1], c[2])))
    }

    /// Subtract a plane expressed in the normalised coordinates of
    /// [`Field::fit_plane`].
    pub fn subtract_plane(&mut self, a: f64, bx: f64, by: f64) {
        let a = a - bx - by;
        let bx = if self.xres() > 1 {
            bx * 2.0 / (self.xres() - 1) as f64
        } else {
            0.0
        };
        let by = if self.yres() > 1 {
            by * 2.0 / (self.yres() - 1) as f64
        } else {
            0.0
        };
        let xres = self.xres();
        let data = self.data_mut_raw();
        for (k, d) in data.iter_mut().enumerate() {
            let i = k / xres;
            let j = k % xres;
            *d -= a + j as f64 * bx + i as f64 * by;
        }
        self.invalidate();
    }

    /// Fit a general polynomial selected by parallel power arrays.
    ///
    /// `xpowers[k]`, `ypowers[k]` give the monomial of the `k`-th term in
    /// normalised coordinates. Returns `None` when the points do not
    /// determine the polynomial uniquely (including numerically dependent
    /// high-degree terms).
    pub fn fit_poly(
        &self,
        part: Option<FieldPart>,
        mask: Option<&MaskField>,
        masking: Masking,
        xpowers: &[usize],
        ypowers: &[usize],
    ) -> FieldResult<Option<Vec<f64>>> {
        if xpowers.len() != ypowers.len() {
            return Err(CommonError::invalid("power arrays must have equal length").into());
        }
        let nterms = xpowers.len();
        if nterms == 0 {
            return Ok(Some(Vec::new()));
        }
        let (rpart, maskcol, maskrow, masking) = self.check_mask(part, mask, masking)?;
        let ctx = MaskCtx::new(mask, maskcol, maskrow, masking);

        let (xp, xmaxpower) = enumerate_powers(xpowers, rpart.col, rpart.width, self.xres());
        let (yp, ymaxpower) = enumerate_powers(ypowers, rpart.row, rpart.height, self.yres());

        let coeffs = linear_fit(self, rpart, ctx.as_ref(), nterms, |j, i, fvalues| {
            let xrow = &xp[j * (xmaxpower + 1)..];
            let yrow = &yp[i * (ymaxpower + 1)..];
            for k in 0..nterms {
                fvalues[k] = xrow[xpowers[k]] * yrow[ypowers[k]];
            }
        });
        Ok(coeffs)
    }

    /// Subtract a polynomial fitted by [`Field::fit_poly`] from the whole
    /// field.
    pub fn subtract_poly(
        &mut self,
        xpowers: &[usize],
        ypowers: &[usize],
        coeffs: &[f64],
    ) -> FieldResult<()> {
        if xpowers.len() != ypowers.len() || xpowers.len() != coeffs.len() {
            return Err(CommonError::invalid("power arrays must have equal length").into());
        }
        if coeffs.is_empty() {
            return Ok(());
        }
        let (xp, xmaxpower) = enumerate_powers(xpowers, 0, self.xres(), self.xres());
        let (yp, ymaxpower) = enumerate_powers(ypowers, 0, self.yres(), self.yres());
        let xres = self.xres();
        let data = self.data_mut_raw();
        for (k, d) in data.iter_mut().enumerate() {
            let i = k / xres;
            let j = k % xres;
            let xrow = &xp[j * (xmaxpower + 1)..];
            let yrow = &yp[i * (ymaxpower + 1)..];
            let mut s = 0.0;
            for t in 0..coeffs.len() {
                s += coeffs[t] * xrow[xpowers[t]] * yrow[ypowers[t]];
            }
            *d -= s;
        }
        self.invalidate();
        Ok(())
    }

    /// Determine the mean surface inclination by facet averaging.
    ///
    /// Local 2x2 facet slopes are first summarised into an rms scale, then
    /// averaged with Gaussian weights `exp((vx^2 + vy^2) / sigma^2)^-1`
    /// where `sigma^2` includes the `damping` factor, so steep facets
    /// (edges, noise) contribute little. Returns coefficients in the
    /// normalised-coordinate convention of [`Field::fit_plane`], or `None`
    /// for degenerate areas. `damping` must be positive; around 20 works
    /// well.
    pub fn inclination(
        &self,
        part: Option<FieldPart>,
        mask: Option<&MaskField>,
        masking: Masking,
        damping: f64,
    ) -> FieldResult<Option<(f64, f64)>> {
        if !(damping > 0.0) {
            return Err(CommonError::invalid("damping must be positive").into());
        }
        let (rpart, maskcol, maskrow, masking) = self.check_mask(part, mask, masking)?;
        if rpart.width < 2 || rpart.height < 2 {
            return Ok(None);
        }
        let ctx = MaskCtx::new(mask, maskcol, maskrow, masking);
        let dx = self.dx();
        let dy = self.dy();

        let facet_ok = |j: usize, i: usize| -> bool {
            match ctx.as_ref() {
                None => true,
                Some(ctx) => {
                    ctx.participates(j, i)
                        && ctx.participates(j + 1, i)
                        && ctx.participates(j, i + 1)
                        && ctx.participates(j + 1, i + 1)
                }
            }
        };
        let facet_slope = |j: usize, i: usize| -> (f64, f64) {
            let z11 = self.get(rpart.col + j, rpart.row + i);
            let z21 = self.get(rpart.col + j + 1, rpart.row + i);
            let z12 = self.get(rpart.col + j, rpart.row + i + 1);
            let z22 = self.get(rpart.col + j + 1, rpart.row + i + 1);
            let vx = 0.5 * (z21 + z22 - z11 - z12) / dx;
            let vy = 0.5 * (z12 + z22 - z11 - z21) / dy;
            (vx, vy)
        };

        // First pass: the rms of local slopes sets the scale.
        let mut sigma2 = 0.0;
        let mut n = 0usize;
        for i in 0..rpart.height - 1 {
            for j in 0..rpart.width - 1 {
                if !facet_ok(j, i) {
                    continue;
                }
                let (vx, vy) = facet_slope(j, i);
                sigma2 += vx * vx + vy * vy;
                n += 1;
            }
        }
        if n < 4 {
            return Ok(None);
        }
        let sigma2 = sigma2 / (n as f64 * damping);

        let mut sumvx = 0.0;
        let mut sumvy = 0.0;
        let mut sumvz = 0.0;
        for i in 0..rpart.height - 1 {
            for j in 0..rpart.width - 1 {
                if !facet_ok(j, i) {
                    continue;
                }
                let (vx, vy) = facet_slope(j, i);
                let q = ((vx * vx + vy * vy) / sigma2).exp();
                sumvx += vx / q;
                sumvy += vy / q;
                sumvz += 1.0 / q;
            }
        }
        Ok(Some((
            0.5 * sumvx / sumvz * self.xreal(),
            0.5 * sumvy / sumvz * self.yreal(),
        )))
    }

    /// Find relative corrective shifts of rows against their neighbours.
    ///
    /// Returns one value per row; element 0 is always zero and element
    /// `i` is the offset of row `i` relative to row `i - 1`. Accumulating
    /// with [`accumulate_shifts`] and applying [`Field::shift_rows`]
    /// aligns all rows. Rows with fewer than `1 + min_freedom`
    /// participating pixels (or pixel pairs for the difference methods)
    /// do not shift against their neighbours.
    pub fn find_row_shifts(
        &self,
        mask: Option<&MaskField>,
        masking: Masking,
        method: RowShiftMethod,
        min_freedom: usize,
    ) -> FieldResult<Vec<f64>> {
        let (_, _, maskrow, masking) = self.check_mask(None, mask, masking)?;
        let yres = self.yres();
        let xres = self.xres();
        let mut shifts = vec![0.0; yres];
        if yres < 2 {
            return Ok(shifts);
        }
        let invert = masking == Masking::Exclude;
        let participates = |j: usize, i: usize| -> bool {
            match masking {
                Masking::Ignore => true,
                _ => mask.expect("masked mode without mask").get(j, maskrow + i) != invert,
            }
        };

        match method {
            RowShiftMethod::Mean | RowShiftMethod::Median => {
                // Per-row absolute values, then differences of good rows.
                let mut values = vec![0.0; yres];
                let mut good = vec![false; yres];
                let mut buffer = Vec::with_capacity(xres);
                for i in 0..yres {
                    buffer.clear();
                    for j in 0..xres {
                        if participates(j, i) {
                            buffer.push(self.get(j, i));
                        }
                    }
                    if buffer.len() >= 1 + min_freedom {
                        good[i] = true;
                        values[i] = match method {
                            RowShiftMethod::Mean => {
                                buffer.iter().sum::<f64>() / buffer.len() as f64
                            }
                            _ => median_in_place(&mut buffer),
                        };
                    }
                }
                for i in 1..yres {
                    shifts[i] = if good[i] && good[i - 1] {
                        values[i] - values[i - 1]
                    } else {
                        0.0
                    };
                }
            }
            RowShiftMethod::MeanDiff => {
                for i in 0..yres - 1 {
                    let mut sum = 0.0;
                    let mut count = 0usize;
                    for j in 0..xres {
                        if participates(j, i) && participates(j, i + 1) {
                            sum += self.get(j, i + 1) - self.get(j, i);
                            count += 1;
                        }
                    }
                    shifts[i + 1] = if count >= 1 + min_freedom {
                        sum / count as f64
                    } else {
                        0.0
                    };
                }
            }
            RowShiftMethod::MedianDiff => {
                let mut buffer = Vec::with_capacity(xres);
                for i in 0..yres - 1 {
                    buffer.clear();
                    for j in 0..xres {
                        if participates(j, i) && participates(j, i + 1) {
                            buffer.push(self.get(j, i + 1) - self.get(j, i));
                        }
                    }
                    shifts[i + 1] = if buffer.len() >= 1 + min_freedom {
                        median_in_place(&mut buffer)
                    } else {
                        0.0
                    };
                }
            }
        }
        Ok(shifts)
    }

    /// Shift rows by absolute per-row values: row `i` has `shifts[i]`
    /// subtracted from every pixel.
    pub fn shift_rows(&mut self, shifts: &[f64]) -> FieldResult<()> {
        if shifts.len() != self.yres() {
            return Err(
                CommonError::DimensionMismatch(self.yres(), 1, shifts.len(), 1).into(),
            );
        }
        let xres = self.xres();
        let data = self.data_mut_raw();
        for (i, &s) in shifts.iter().enumerate() {
            if s != 0.0 {
                for d in &mut data[i * xres..(i + 1) * xres] {
                    *d -= s;
                }
            }
        }
        self.invalidate();
        Ok(())
    }
}

/// Turn relative row shifts into absolute ones by prefix accumulation.
pub fn accumulate_shifts(shifts: &mut [f64]) {
    let mut total = 0.0;
    for s in shifts.iter_mut() {
        total += *s;
        *s = total;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::create_plane_buffer;

    #[test]
    fn test_fit_plane_recovers_coefficients() {
        // Rows hold [0, 1, 2, 3]: a = 1.5, bx = 1.5, by = 0 in normalised
        // coordinates.
        let data = create_plane_buffer(4, 4, 1.5, 1.5, 0.0);
        let f = Field::with_data(4, 4, 4.0, 4.0, data).unwrap();
        let (a, bx, by) = f.fit_plane(None, None, Masking::Ignore).unwrap().unwrap();
        assert!((a - 1.5).abs() < 1e-10, "a = {a}");
        assert!((bx - 1.5).abs() < 1e-10, "bx = {bx}");
        assert!(by.abs() < 1e-10, "by = {by}");
    }

    #[test]
    fn test_subtract_plane_zeroes_field() {
        let data = create_plane_buffer(4, 4, 1.5, 1.5, 0.0);
        let mut f = Field::with_data(4, 4, 4.0, 4.0, data).unwrap();
        f.subtract_plane(1.5, 1.5, 0.0);
        for &v in f.data() {
            assert!(v.abs() < 1e-12, "residual {v}");
        }
    }

    #[test]
    fn test_fit_plane_roundtrip_noisy() {
        let mut data = create_plane_buffer(8, 6, -0.5, 2.0, 1.0);
        // A deterministic ripple that averages out.
        for (k, v) in data.iter_mut().enumerate() {
            *v += if k % 2 == 0 { 1e-3 } else { -1e-3 };
        }
        let mut f = Field::with_data(8, 6, 8.0, 6.0, data).unwrap();
        let (a, bx, by) = f.fit_plane(None, None, Masking::Ignore).unwrap().unwrap();
        f.subtract_plane(a, bx, by);
        let resid = f.rms(None, None, Masking::Ignore).unwrap();
        assert!(resid < 2e-3, "residual rms {resid}");
    }

    #[test]
    fn test_fit_plane_degenerate() {
        let f = Field::new(1, 8, 1.0, 8.0).unwrap();
        assert!(f.fit_plane(None, None, Masking::Ignore).unwrap().is_none());
    }

    #[test]
    fn test_fit_poly_quadratic() {
        // z = 2 + xi^2 over normalised coordinates.
        let mut data = Vec::new();
        for _i in 0..8 {
            for j in 0..8 {
                let xi = 2.0 * j as f64 / 7.0 - 1.0;
                data.push(2.0 + xi * xi);
            }
        }
        let f = Field::with_data(8, 8, 8.0, 8.0, data).unwrap();
        let coeffs = f
            .fit_poly(None, None, Masking::Ignore, &[0, 1, 0, 2], &[0, 0, 1, 0])
            .unwrap()
            .unwrap();
        assert!((coeffs[0] - 2.0).abs() < 1e-9);
        assert!(coeffs[1].abs() < 1e-9);
        assert!(coeffs[2].abs() < 1e-9);
        assert!((coeffs[3] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_fit_subtract_poly_roundtrip() {
        let mut data = Vec::new();
        for i in 0..6 {
            for j in 0..9 {
                let xi = 2.0 * j as f64 / 8.0 - 1.0;
                let eta = 2.0 * i as f64 / 5.0 - 1.0;
                data.push(1.0 - 0.5 * xi + 0.25 * eta * eta + xi * eta);
            }
        }
        let mut f = Field::with_data(9, 6, 9.0, 6.0, data).unwrap();
        let xp = [0usize, 1, 0, 1];
        let yp = [0usize, 0, 2, 1];
        let coeffs = f
            .fit_poly(None, None, Masking::Ignore, &xp, &yp)
            .unwrap()
            .unwrap();
        f.subtract_poly(&xp, &yp, &coeffs).unwrap();
        for &v in f.data() {
            assert!(v.abs() < 1e-10, "residual {v}");
        }
    }

    #[test]
    fn test_fit_poly_rank_deficiency() {
        // Fitting x and 3x simultaneously is singular.
        let f = Field::with_data(4, 4, 4.0, 4.0, create_plane_buffer(4, 4, 0.0, 1.0, 0.0))
            .unwrap();
        let r = f
            .fit_poly(None, None, Masking::Ignore, &[1, 1], &[0, 0])
            .unwrap();
        assert!(r.is_none());
    }

    #[test]
    fn test_inclination_matches_plane_for_flat_data() {
        let data = create_plane_buffer(16, 16, 0.0, 1.0, 0.5);
        let f = Field::with_data(16, 16, 16.0, 16.0, data).unwrap();
        let (bx, by) = f
            .inclination(None, None, Masking::Ignore, 20.0)
            .unwrap()
            .unwrap();
        // For a perfect plane all facets agree, damping has no effect.
        assert!((bx - 1.0).abs() < 1e-6, "bx = {bx}");
        assert!((by - 0.5).abs() < 1e-6, "by = {by}");
    }

    #[test]
    fn test_row_shifts_mean() {
        // Rows at levels 0, 5, 5, 9: corrective relative shifts are the
        // backward differences.
        let mut data = Vec::new();
        for (i, level) in [0.0, 5.0, 5.0, 9.0].iter().enumerate() {
            let _ = i;
            data.extend(std::iter::repeat(*level).take(4));
        }
        let mut f = Field::with_data(4, 4, 4.0, 4.0, data).unwrap();
        let mut shifts = f
            .find_row_shifts(None, Masking::Ignore, RowShiftMethod::Mean, 0)
            .unwrap();
        assert_eq!(shifts[0], 0.0);
        assert!((shifts[1] - 5.0).abs() < 1e-12);
        assert!((shifts[2] - 0.0).abs() < 1e-12);
        assert!((shifts[3] - 4.0).abs() < 1e-12);

        // Accumulate and apply: all rows align to row 0's level.
        accumulate_shifts(&mut shifts);
        f.shift_rows(&shifts).unwrap();
        let rms = f.rms(None, None, Masking::Ignore).unwrap();
        assert!(rms < 1e-12, "rows still misaligned, rms {rms}");
    }

    #[test]
    fn test_row_shifts_median_diff() {
        let mut data = Vec::new();
        for level in [1.0, 2.0, 4.0] {
            data.extend(std::iter::repeat(level).take(5));
        }
        let f = Field::with_data(5, 3, 5.0, 3.0, data).unwrap();
        let shifts = f
            .find_row_shifts(None, Masking::Ignore, RowShiftMethod::MedianDiff, 0)
            .unwrap();
        assert_eq!(shifts[0], 0.0);
        assert!((shifts[1] - 1.0).abs() < 1e-12);
        assert!((shifts[2] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_row_shifts_min_freedom() {
        let mut f = Field::new(3, 3, 3.0, 3.0).unwrap();
        f.data_mut().copy_from_slice(&[0.0, 0.0, 0.0, 7.0, 7.0, 7.0, 7.0, 7.0, 7.0]);
        let mut mask = MaskField::new(3, 3).unwrap();
        mask.set(0, 1, true); // single usable pixel in row 1
        mask.fill(Some(FieldPart::new(0, 0, 3, 1)), true).unwrap();
        mask.fill(Some(FieldPart::new(0, 2, 3, 1)), true).unwrap();
        let shifts = f
            .find_row_shifts(Some(&mask), Masking::Include, RowShiftMethod::Mean, 2)
            .unwrap();
        // Row 1 has one pixel < 1 + 2 required, so it cannot shift.
        assert_eq!(shifts[1], 0.0);
    }
}
