//! The scalar-summary cache of a field.

/// Cached whole-field scalar summaries.
///
/// Every summary is independently valid (`Some`) or invalid (`None`). A
/// summary that is `Some` always equals the result of the corresponding
/// full-field computation on the current buffer; mutations must either
/// update it by a proven rule or drop it before the mutation is observable.
#[derive(Debug, Clone, Copy, Default)]
pub struct CachedStats {
    /// Minimum value.
    pub min: Option<f64>,
    /// Maximum value.
    pub max: Option<f64>,
    /// Mean value.
    pub avg: Option<f64>,
    /// Root mean square of deviations from the mean.
    pub rms: Option<f64>,
    /// Mean square of the values themselves.
    pub msq: Option<f64>,
    /// Median value.
    pub med: Option<f64>,
    /// Surface area.
    pub are: Option<f64>,
}

impl CachedStats {
    /// Drop everything.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Update for a uniform shift `value` of the whole field.
    ///
    /// Position summaries shift, the deviation summaries rms and surface
    /// area are unchanged, mean square has no simple rule and is dropped.
    pub fn apply_shift(&mut self, value: f64) {
        self.min = self.min.map(|v| v + value);
        self.max = self.max.map(|v| v + value);
        self.avg = self.avg.map(|v| v + value);
        self.med = self.med.map(|v| v + value);
        self.msq = None;
        // rms and are unchanged
    }

    /// Update for a uniform scaling of the whole field by `value`.
    ///
    /// Surface area has no simple rule and is dropped; min and max swap for
    /// negative factors.
    pub fn apply_scale(&mut self, value: f64) {
        let (min, max) = (self.min, self.max);
        if value < 0.0 {
            self.min = max.map(|v| v * value);
            self.max = min.map(|v| v * value);
        } else {
            self.min = min.map(|v| v * value);
            self.max = max.map(|v| v * value);
        }
        self.avg = self.avg.map(|v| v * value);
        self.rms = self.rms.map(|v| v * value.abs());
        self.msq = self.msq.map(|v| v * value * value);
        self.med = self.med.map(|v| v * value);
        self.are = None;
    }

    /// Update for a whole-field clamp to `[lower, upper]` that changed at
    /// least one value.
    ///
    /// Min and max clamp; the median survives only if it already lay inside
    /// the interval; everything else is dropped.
    pub fn apply_clamp(&mut self, lower: f64, upper: f64) {
        self.min = self.min.map(|v| v.clamp(lower, upper));
        self.max = self.max.map(|v| v.clamp(lower, upper));
        self.med = self.med.filter(|&m| m >= lower && m <= upper);
        self.avg = None;
        self.rms = None;
        self.msq = None;
        self.are = None;
    }

    /// Install the summaries of a field holding `value` everywhere, with
    /// the given flat surface area.
    pub fn set_for_flat(&mut self, value: f64, flat_area: f64) {
        self.min = Some(value);
        self.max = Some(value);
        self.avg = Some(value);
        self.rms = Some(0.0);
        self.msq = Some(value * value);
        self.med = Some(value);
        self.are = Some(flat_area);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full() -> CachedStats {
        CachedStats {
            min: Some(-1.0),
            max: Some(3.0),
            avg: Some(1.0),
            rms: Some(0.5),
            msq: Some(1.25),
            med: Some(1.5),
            are: Some(42.0),
        }
    }

    #[test]
    fn test_shift() {
        let mut c = full();
        c.apply_shift(2.0);
        assert_eq!(c.min, Some(1.0));
        assert_eq!(c.max, Some(5.0));
        assert_eq!(c.avg, Some(3.0));
        assert_eq!(c.med, Some(3.5));
        assert_eq!(c.rms, Some(0.5));
        assert_eq!(c.are, Some(42.0));
        assert_eq!(c.msq, None);
    }

    #[test]
    fn test_negative_scale_swaps_min_max() {
        let mut c = full();
        c.apply_scale(-2.0);
        assert_eq!(c.min, Some(-6.0));
        assert_eq!(c.max, Some(2.0));
        assert_eq!(c.rms, Some(1.0));
        assert_eq!(c.msq, Some(5.0));
        assert_eq!(c.are, None);
    }

    #[test]
    fn test_clamp_keeps_median_inside() {
        let mut c = full();
        c.apply_clamp(0.0, 2.0);
        assert_eq!(c.min, Some(0.0));
        assert_eq!(c.max, Some(2.0));
        assert_eq!(c.med, Some(1.5));

        let mut c2 = full();
        c2.apply_clamp(-0.5, 1.0);
        assert_eq!(c2.med, None);
    }

    #[test]
    fn test_flat() {
        let mut c = CachedStats::default();
        c.set_for_flat(3.0, 16.0);
        assert_eq!(c.min, Some(3.0));
        assert_eq!(c.rms, Some(0.0));
        assert_eq!(c.msq, Some(9.0));
        assert_eq!(c.are, Some(16.0));
    }
}
