//! Masking-aware sample statistics of fields.
//!
//! Full-field unmasked calls consult and install the scalar-summary cache;
//! any partial or masked call computes from scratch.

use mask_engine::{LogicalOp, MaskField};
use spm_common::{FieldPart, Masking};

use crate::error::FieldResult;
use crate::field::Field;
use crate::mark::DeviationType;

/// Compound statistical characteristics of an area, see
/// [`Field::statistics`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AreaStatistics {
    /// Mean value.
    pub mean: f64,
    /// Mean absolute deviation from the mean (Ra).
    pub ra: f64,
    /// Root mean square deviation from the mean (Rq).
    pub rms: f64,
    /// Skewness of the value distribution.
    pub skew: f64,
    /// Excess kurtosis of the value distribution.
    pub kurtosis: f64,
}

pub(crate) struct MaskCtx<'a> {
    pub mask: &'a MaskField,
    pub col: usize,
    pub row: usize,
    pub invert: bool,
}

impl<'a> MaskCtx<'a> {
    pub(crate) fn new(
        mask: Option<&'a MaskField>,
        maskcol: usize,
        maskrow: usize,
        masking: Masking,
    ) -> Option<Self> {
        match masking {
            Masking::Ignore => None,
            _ => Some(MaskCtx {
                mask: mask.expect("masked mode without mask"),
                col: maskcol,
                row: maskrow,
                invert: masking == Masking::Exclude,
            }),
        }
    }

    #[inline]
    pub(crate) fn participates(&self, local_col: usize, local_row: usize) -> bool {
        self.mask.get(self.col + local_col, self.row + local_row) != self.invert
    }
}

/// Visit every participating value of a part in row-major order.
pub(crate) fn visit_area<F: FnMut(f64)>(
    field: &Field,
    part: FieldPart,
    ctx: Option<&MaskCtx<'_>>,
    mut f: F,
) {
    match ctx {
        None => {
            for i in 0..part.height {
                for &v in &field.row(part.row + i)[part.col..part.col + part.width] {
                    f(v);
                }
            }
        }
        Some(ctx) => {
            for i in 0..part.height {
                let mut iter = ctx.mask.iter_row(ctx.col, ctx.row + i);
                for &v in &field.row(part.row + i)[part.col..part.col + part.width] {
                    if iter.get() != ctx.invert {
                        f(v);
                    }
                    iter.next();
                }
            }
        }
    }
}

/// Median of a buffer by partial selection; even-sized buffers average the
/// two central order statistics. The buffer is reordered.
pub fn median_in_place(values: &mut [f64]) -> f64 {
    let n = values.len();
    if n == 0 {
        return f64::NAN;
    }
    let mid = n / 2;
    let (_, upper, _) = values.select_nth_unstable_by(mid, f64::total_cmp);
    let upper = *upper;
    if n % 2 == 1 {
        upper
    } else {
        let lower = values[..mid]
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        0.5 * (lower + upper)
    }
}

impl Field {
    /// Minimum and maximum of an area.
    ///
    /// An empty area yields `(+inf, -inf)`.
    pub fn min_max(
        &mut self,
        part: Option<FieldPart>,
        mask: Option<&MaskField>,
        masking: Masking,
    ) -> FieldResult<(f64, f64)> {
        let (rpart, maskcol, maskrow, masking) = self.check_mask(part, mask, masking)?;
        let full_field = masking == Masking::Ignore && rpart.is_entire(self.xres(), self.yres());
        if full_field {
            if let (Some(min), Some(max)) = (self.cache.min, self.cache.max) {
                return Ok((min, max));
            }
        }
        let ctx = MaskCtx::new(mask, maskcol, maskrow, masking);
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        visit_area(self, rpart, ctx.as_ref(), |v| {
            if v < min {
                min = v;
            }
            if v > max {
                max = v;
            }
        });
        if full_field {
            self.cache.min = Some(min);
            self.cache.max = Some(max);
        }
        Ok((min, max))
    }

    /// Mean value of an area; NaN for an empty area.
    pub fn mean(
        &mut self,
        part: Option<FieldPart>,
        mask: Option<&MaskField>,
        masking: Masking,
    ) -> FieldResult<f64> {
        let (rpart, maskcol, maskrow, masking) = self.check_mask(part, mask, masking)?;
        let full_field = masking == Masking::Ignore && rpart.is_entire(self.xres(), self.yres());
        if full_field {
            if let Some(avg) = self.cache.avg {
                return Ok(avg);
            }
        }
        let ctx = MaskCtx::new(mask, maskcol, maskrow, masking);
        let mut sum = 0.0;
        let mut n = 0usize;
        visit_area(self, rpart, ctx.as_ref(), |v| {
            sum += v;
            n += 1;
        });
        if n == 0 {
            return Ok(f64::NAN);
        }
        let mean = sum / n as f64;
        if full_field {
            self.cache.avg = Some(mean);
        }
        Ok(mean)
    }

    /// Median value of an area; NaN for an empty area.
    pub fn median(
        &mut self,
        part: Option<FieldPart>,
        mask: Option<&MaskField>,
        masking: Masking,
    ) -> FieldResult<f64> {
        let (rpart, maskcol, maskrow, masking) = self.check_mask(part, mask, masking)?;
        let full_field = masking == Masking::Ignore && rpart.is_entire(self.xres(), self.yres());
        if full_field {
            if let Some(med) = self.cache.med {
                return Ok(med);
            }
        }
        let ctx = MaskCtx::new(mask, maskcol, maskrow, masking);
        let mut buffer = Vec::with_capacity(rpart.len());
        visit_area(self, rpart, ctx.as_ref(), |v| buffer.push(v));
        let median = median_in_place(&mut buffer);
        if full_field {
            self.cache.med = Some(median);
        }
        Ok(median)
    }

    /// Root mean square of deviations from the mean; 0 for an empty area.
    pub fn rms(
        &mut self,
        part: Option<FieldPart>,
        mask: Option<&MaskField>,
        masking: Masking,
    ) -> FieldResult<f64> {
        let (rpart, maskcol, maskrow, masking) = self.check_mask(part, mask, masking)?;
        let full_field = masking == Masking::Ignore && rpart.is_entire(self.xres(), self.yres());
        if full_field {
            if let Some(rms) = self.cache.rms {
                return Ok(rms);
            }
        }
        let avg = self.mean(part, mask, masking)?;
        if avg.is_nan() {
            return Ok(0.0);
        }
        let ctx = MaskCtx::new(mask, maskcol, maskrow, masking);
        let mut sum2 = 0.0;
        let mut n = 0usize;
        visit_area(self, rpart, ctx.as_ref(), |v| {
            let d = v - avg;
            sum2 += d * d;
            n += 1;
        });
        let rms = (sum2 / n as f64).sqrt();
        if full_field {
            self.cache.rms = Some(rms);
        }
        Ok(rms)
    }

    /// Mean square of the values themselves; 0 for an empty area.
    pub fn meansq(
        &mut self,
        part: Option<FieldPart>,
        mask: Option<&MaskField>,
        masking: Masking,
    ) -> FieldResult<f64> {
        let (rpart, maskcol, maskrow, masking) = self.check_mask(part, mask, masking)?;
        let full_field = masking == Masking::Ignore && rpart.is_entire(self.xres(), self.yres());
        if full_field {
            if let Some(msq) = self.cache.msq {
                return Ok(msq);
            }
        }
        let ctx = MaskCtx::new(mask, maskcol, maskrow, masking);
        let mut sum2 = 0.0;
        let mut n = 0usize;
        visit_area(self, rpart, ctx.as_ref(), |v| {
            sum2 += v * v;
            n += 1;
        });
        let msq = if n != 0 { sum2 / n as f64 } else { 0.0 };
        if full_field {
            self.cache.msq = Some(msq);
        }
        Ok(msq)
    }

    /// Compound statistics: mean, Ra, Rq, skewness and excess kurtosis.
    ///
    /// For an empty area mean, skew and kurtosis are NaN and Ra, Rq zero.
    /// Skew and kurtosis are NaN also for perfectly flat data.
    pub fn statistics(
        &mut self,
        part: Option<FieldPart>,
        mask: Option<&MaskField>,
        masking: Masking,
    ) -> FieldResult<AreaStatistics> {
        let (rpart, maskcol, maskrow, masking) = self.check_mask(part, mask, masking)?;
        let avg = self.mean(part, mask, masking)?;
        if avg.is_nan() {
            return Ok(AreaStatistics {
                mean: f64::NAN,
                ra: 0.0,
                rms: 0.0,
                skew: f64::NAN,
                kurtosis: f64::NAN,
            });
        }
        let full_field = masking == Masking::Ignore && rpart.is_entire(self.xres(), self.yres());
        let ctx = MaskCtx::new(mask, maskcol, maskrow, masking);
        let (mut sumabs, mut sum2, mut sum3, mut sum4) = (0.0, 0.0, 0.0, 0.0);
        let mut n = 0usize;
        visit_area(self, rpart, ctx.as_ref(), |v| {
            let d = v - avg;
            let d2 = d * d;
            sumabs += d.abs();
            sum2 += d2;
            sum3 += d2 * d;
            sum4 += d2 * d2;
            n += 1;
        });
        let nf = n as f64;
        sumabs /= nf;
        sum2 /= nf;
        sum3 /= nf;
        sum4 /= nf;
        let rms = sum2.sqrt();
        let skew = sum3 / (sum2 * rms);
        let kurtosis = sum4 / (sum2 * sum2) - 3.0;
        if full_field {
            self.cache.rms = Some(rms);
            self.cache.msq = Some(sum2 + avg * avg);
        }
        Ok(AreaStatistics {
            mean: avg,
            ra: sumabs,
            rms,
            skew,
            kurtosis,
        })
    }

    /// Count values above and below two independent bounds.
    ///
    /// Returns `(total, n_above, n_below)`; `strict` selects open instead
    /// of closed comparisons. The two counts are fully independent, values
    /// can contribute to both.
    pub fn count_above_below(
        &self,
        part: Option<FieldPart>,
        mask: Option<&MaskField>,
        masking: Masking,
        above: f64,
        below: f64,
        strict: bool,
    ) -> FieldResult<(usize, usize, usize)> {
        let (rpart, maskcol, maskrow, masking) = self.check_mask(part, mask, masking)?;
        let ctx = MaskCtx::new(mask, maskcol, maskrow, masking);
        let mut na = 0usize;
        let mut nb = 0usize;
        let mut n = 0usize;
        visit_area(self, rpart, ctx.as_ref(), |v| {
            if strict {
                if v > above {
                    na += 1;
                }
                if v < below {
                    nb += 1;
                }
            } else {
                if v >= above {
                    na += 1;
                }
                if v <= below {
                    nb += 1;
                }
            }
            n += 1;
        });
        Ok((n, na, nb))
    }

    /// Estimate the entropy of the value distribution.
    ///
    /// The estimator `S = ln(n * delta) - (1/n) sum n_i ln n_i` is evaluated
    /// on a dyadic ladder of bin widths after outlier removal; the value at
    /// the flattest part of the ladder is returned. The entropy of no data
    /// is NaN and the entropy of single-valued data infinity.
    pub fn entropy(
        &mut self,
        part: Option<FieldPart>,
        mask: Option<&MaskField>,
        masking: Masking,
    ) -> FieldResult<f64> {
        let (rpart, maskcol, maskrow, masking0) = self.check_mask(part, mask, masking)?;
        let n = match masking0 {
            Masking::Ignore => rpart.len(),
            _ => {
                let mask = mask.expect("masked mode without mask");
                let mpart = FieldPart::new(maskcol, maskrow, rpart.width, rpart.height);
                mask.count_part(Some(mpart), masking0 == Masking::Include)?
            }
        };
        if n == 0 {
            return Ok(f64::NAN);
        }

        let (mut min, mut max) = self.min_max(part, mask, masking0)?;
        if min == max {
            return Ok(f64::INFINITY);
        }
        // Explicit estimates for tiny samples keep maxdiv at least 2.
        if n == 2 {
            return Ok((max - min).ln());
        }
        if n == 3 {
            return Ok((max - min).ln() + 0.5 * 1.5f64.ln() - std::f64::consts::LN_2 / 3.0);
        }

        // Serious outliers would stretch the value range and starve the
        // histogram; mark them and exclude them from binning while keeping
        // the original n. Each outlier would sit in its own bin and thus
        // contribute zero to the sum anyway.
        let mut tmpmask = MaskField::new(rpart.width, rpart.height)?;
        let nout = self.mark_outliers(
            part,
            &mut tmpmask,
            mask,
            masking,
            DeviationType::Both,
            0.0,
        )?;
        let mut effective_masking = masking0;
        if nout > 0 {
            match masking0 {
                Masking::Ignore => {
                    effective_masking = Masking::Exclude;
                }
                Masking::Include | Masking::Exclude => {
                    let mask = mask.expect("masked mode without mask");
                    let op = if masking0 == Masking::Exclude {
                        LogicalOp::Or
                    } else {
                        LogicalOp::NCImpl
                    };
                    tmpmask.logical_part(None, mask, maskcol, maskrow, op)?;
                }
            }
            let mm = self.min_max(part, Some(&tmpmask), effective_masking)?;
            min = mm.0;
            max = mm.1;
            if min == max {
                return Ok(f64::INFINITY);
            }
        }

        let maxdiv = (n as f64).log2().floor() as usize;
        let mut size = 1usize << maxdiv;
        let mut counts = vec![0usize; size];
        {
            let ctx = if nout > 0 {
                MaskCtx::new(Some(&tmpmask), 0, 0, effective_masking)
            } else {
                MaskCtx::new(mask, maskcol, maskrow, masking0)
            };
            visit_area(self, rpart, ctx.as_ref(), |v| {
                let k = ((v - min) / (max - min) * size as f64).floor() as isize;
                let k = k.clamp(0, size as isize - 1) as usize;
                counts[k] += 1;
            });
        }

        // Entropy for every bin size of the dyadic ladder.
        let mut ecurve = Vec::with_capacity(maxdiv + 1);
        let nf = n as f64;
        for _div in 0..=maxdiv {
            let mut s = 0.0;
            for &c in &counts[..size] {
                if c > 1 {
                    s += c as f64 * (c as f64).ln();
                }
            }
            let s = (nf * (max - min) / size as f64).ln() - s / nf;
            ecurve.push(s);
            size >>= 1;
            for k in 0..size {
                counts[k] = counts[2 * k] + counts[2 * k + 1];
            }
        }

        // Use the value at the flattest part of the ladder, averaging
        // locally when the ladder is long enough.
        let s = if maxdiv < 5 {
            let mut mindiff = f64::MAX;
            let mut imin = 1;
            for k in 0..=maxdiv.saturating_sub(2) {
                let diff =
                    (ecurve[k] - ecurve[k + 1]).abs() + (ecurve[k + 1] - ecurve[k + 2]).abs();
                if diff < mindiff {
                    mindiff = diff;
                    imin = k + 1;
                }
            }
            ecurve[imin]
        } else {
            let mut mindiff = f64::MAX;
            let mut imin = 2;
            for k in 0..=maxdiv - 4 {
                let diff = (ecurve[k] - ecurve[k + 1]).abs()
                    + (ecurve[k + 1] - ecurve[k + 2]).abs()
                    + (ecurve[k + 2] - ecurve[k + 3]).abs()
                    + (ecurve[k + 3] - ecurve[k + 4]).abs();
                if diff < mindiff {
                    mindiff = diff;
                    imin = k + 2;
                }
            }
            (ecurve[imin - 1] + ecurve[imin] + ecurve[imin + 1]) / 3.0
        };

        Ok(s)
    }
}
