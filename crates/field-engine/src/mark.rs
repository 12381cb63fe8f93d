//! Marking of distribution outliers into a mask field.

use mask_engine::{LogicalOp, MaskField};
use serde::{Deserialize, Serialize};
use spm_common::{resolve_mask_origin, FieldPart, Masking};

use crate::error::FieldResult;
use crate::field::Field;
use crate::stats::{median_in_place, MaskCtx};

/// Standard normal quantile at 5/6, the scale of the 1/6..5/6 sample range.
const K2_3: f64 = 0.9674215661017012;
/// Standard normal quantile at 3/4, the scale of the interquartile range.
const K1_2: f64 = 0.6744897501960818;

/// Which tail of the distribution to mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviationType {
    /// Only values above the upper threshold.
    Up,
    /// Only values below the lower threshold.
    Down,
    /// Both tails.
    Both,
}

impl Field {
    /// Mark global outliers of an area into `outliers` by robust
    /// distribution thresholding.
    ///
    /// Bits are set for outliers and cleared for the other processed
    /// pixels; bits outside the processed set are left alone. Thresholds
    /// are derived from sample quantiles scaled to the equivalent normal
    /// deviation, multiplied by `threshold` (pass 0 for the default 3.5).
    /// Areas of fewer than 6 pixels never mark anything.
    ///
    /// Returns the number of outliers marked.
    pub fn mark_outliers(
        &self,
        part: Option<FieldPart>,
        outliers: &mut MaskField,
        mask: Option<&MaskField>,
        masking: Masking,
        deviation: DeviationType,
        threshold: f64,
    ) -> FieldResult<usize> {
        let (rpart, maskcol, maskrow, masking) = self.check_mask(part, mask, masking)?;
        let (targetcol, targetrow) = resolve_mask_origin(
            &rpart,
            outliers.xres(),
            outliers.yres(),
            self.xres(),
            self.yres(),
        )?;
        let threshold = if threshold == 0.0 { 3.5 } else { threshold };

        let tpart = FieldPart::new(targetcol, targetrow, rpart.width, rpart.height);
        let n = match masking {
            Masking::Ignore => {
                outliers.fill(Some(tpart), false)?;
                rpart.len()
            }
            _ => {
                let mask = mask.expect("masked mode without mask");
                let mpart = FieldPart::new(maskcol, maskrow, rpart.width, rpart.height);
                // Clear target bits for processed pixels only.
                let op = if masking == Masking::Include {
                    LogicalOp::NImpl
                } else {
                    LogicalOp::And
                };
                outliers.logical_part(Some(tpart), mask, maskcol, maskrow, op)?;
                mask.count_part(Some(mpart), masking == Masking::Include)?
            }
        };
        if n < 6 {
            return Ok(0);
        }

        // Deterministic subsample: roughly sqrt(n) evenly spaced processed
        // values are enough for stable quantiles.
        let stride = (0.618 * (n as f64).sqrt()).round().max(1.0) as usize;
        let ns = (n / stride + 12).min(n);
        let ctx = MaskCtx::new(mask, maskcol, maskrow, masking);
        let mut samples = Vec::with_capacity(ns);
        {
            let mut kk = 0usize;
            let mut next = 0usize;
            crate::stats::visit_area(self, rpart, ctx.as_ref(), |v| {
                if kk == next && samples.len() < ns {
                    samples.push(v);
                    next = samples.len() * (n - 1) / (ns - 1);
                }
                kk += 1;
            });
        }
        let ns = samples.len();
        let median = median_in_place(&mut samples);
        samples.sort_by(f64::total_cmp);

        let (lowerthresh, upperthresh) = if ns >= 40 {
            let upper56 = samples[(5 * ns - 1) / 6];
            let lower16 = samples[ns / 6];
            (
                (lower16 - median) * threshold / K2_3 + median,
                (upper56 - median) * threshold / K2_3 + median,
            )
        } else {
            let upper34 = samples[(3 * ns - 1) / 4];
            let lower14 = samples[ns / 4];
            (
                (lower14 - median) * threshold / K1_2 + median,
                (upper34 - median) * threshold / K1_2 + median,
            )
        };

        let marklower = matches!(deviation, DeviationType::Down | DeviationType::Both);
        let markupper = matches!(deviation, DeviationType::Up | DeviationType::Both);

        let mut nout = 0usize;
        for i in 0..rpart.height {
            for j in 0..rpart.width {
                if let Some(ctx) = ctx.as_ref() {
                    if !ctx.participates(j, i) {
                        continue;
                    }
                }
                let v = self.get(rpart.col + j, rpart.row + i);
                if (markupper && v > upperthresh) || (marklower && v < lowerthresh) {
                    outliers.set(targetcol + j, targetrow + i, true);
                    nout += 1;
                }
            }
        }
        Ok(nout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_outliers_in_uniform_data() {
        let data: Vec<f64> = (0..100).map(|k| (k % 10) as f64).collect();
        let f = Field::with_data(10, 10, 10.0, 10.0, data).unwrap();
        let mut out = MaskField::new(10, 10).unwrap();
        let n = f
            .mark_outliers(None, &mut out, None, Masking::Ignore, DeviationType::Both, 0.0)
            .unwrap();
        assert_eq!(n, 0);
        assert_eq!(out.count(None, true).unwrap(), 0);
    }

    #[test]
    fn test_single_spike_marked() {
        let mut data = vec![0.0; 100];
        // Mild noise so the quantile range is non-degenerate.
        for (k, v) in data.iter_mut().enumerate() {
            *v = 0.001 * ((k * 37 % 11) as f64 - 5.0);
        }
        data[55] = 1000.0;
        let f = Field::with_data(10, 10, 10.0, 10.0, data).unwrap();
        let mut out = MaskField::new(10, 10).unwrap();
        let n = f
            .mark_outliers(None, &mut out, None, Masking::Ignore, DeviationType::Both, 0.0)
            .unwrap();
        assert_eq!(n, 1);
        assert!(out.get(5, 5));
    }

    #[test]
    fn test_deviation_direction() {
        let mut data = vec![0.0; 64];
        for (k, v) in data.iter_mut().enumerate() {
            *v = 0.001 * ((k * 13 % 7) as f64 - 3.0);
        }
        data[0] = -500.0;
        data[63] = 500.0;
        let f = Field::with_data(8, 8, 8.0, 8.0, data).unwrap();

        let mut up = MaskField::new(8, 8).unwrap();
        f.mark_outliers(None, &mut up, None, Masking::Ignore, DeviationType::Up, 0.0)
            .unwrap();
        assert!(up.get(7, 7));
        assert!(!up.get(0, 0));

        let mut down = MaskField::new(8, 8).unwrap();
        f.mark_outliers(None, &mut down, None, Masking::Ignore, DeviationType::Down, 0.0)
            .unwrap();
        assert!(down.get(0, 0));
        assert!(!down.get(7, 7));
    }

    #[test]
    fn test_tiny_area_never_marks() {
        let f = Field::with_data(2, 2, 2.0, 2.0, vec![0.0, 0.0, 0.0, 1e9]).unwrap();
        let mut out = MaskField::new(2, 2).unwrap();
        let n = f
            .mark_outliers(None, &mut out, None, Masking::Ignore, DeviationType::Both, 0.0)
            .unwrap();
        assert_eq!(n, 0);
    }
}
