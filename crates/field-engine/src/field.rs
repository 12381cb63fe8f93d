//! The two-dimensional data field.

use mask_engine::MaskField;
use spm_common::{resolve_mask_origin, CommonError, FieldPart, Masking, Unit};

use crate::cache::CachedStats;
use crate::error::FieldResult;

/// Relative tolerance of real-valued compatibility comparisons.
const COMPAT_EPSILON: f64 = 1e-6;

/// A dense two-dimensional array of `f64` values with spatial metadata.
///
/// Values are stored in row-major order; `data[row * xres + col]` is the
/// pixel at (`col`, `row`). The physical dimensions `xreal` x `yreal` give
/// pixel sizes `dx = xreal / xres` and `dy = yreal / yres`.
///
/// Whole-field scalar summaries are cached with per-item validity, see
/// [`CachedStats`]. All buffer writes go through methods so the cache can
/// be updated or dropped; [`Field::data_mut`] hands out the raw buffer but
/// drops the entire cache first.
#[derive(Debug, Clone)]
pub struct Field {
    xres: usize,
    yres: usize,
    xreal: f64,
    yreal: f64,
    xoff: f64,
    yoff: f64,
    xunit: Unit,
    yunit: Unit,
    zunit: Unit,
    data: Vec<f64>,
    pub(crate) cache: CachedStats,
}

/// Field properties checked by [`Field::is_incompatible`], combined by
/// bitwise or.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompatFlags(u32);

impl CompatFlags {
    /// Horizontal resolution.
    pub const XRES: Self = Self(1 << 0);
    /// Vertical resolution.
    pub const YRES: Self = Self(1 << 1);
    /// Physical x-dimension.
    pub const XREAL: Self = Self(1 << 2);
    /// Physical y-dimension.
    pub const YREAL: Self = Self(1 << 3);
    /// Pixel size in x.
    pub const DX: Self = Self(1 << 4);
    /// Pixel size in y.
    pub const DY: Self = Self(1 << 5);
    /// Horizontal lateral unit.
    pub const XUNIT: Self = Self(1 << 6);
    /// Vertical lateral unit.
    pub const YUNIT: Self = Self(1 << 7);
    /// Value unit.
    pub const ZUNIT: Self = Self(1 << 8);

    /// Both resolutions.
    pub const RES: Self = Self(Self::XRES.0 | Self::YRES.0);
    /// Both physical dimensions.
    pub const REAL: Self = Self(Self::XREAL.0 | Self::YREAL.0);
    /// Both pixel sizes.
    pub const DXDY: Self = Self(Self::DX.0 | Self::DY.0);
    /// All units.
    pub const UNITS: Self = Self(Self::XUNIT.0 | Self::YUNIT.0 | Self::ZUNIT.0);
    /// Everything.
    pub const ALL: Self =
        Self(Self::RES.0 | Self::REAL.0 | Self::DXDY.0 | Self::UNITS.0);

    /// No failed checks.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether all bits of `other` are present.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for CompatFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for CompatFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl std::ops::BitAnd for CompatFlags {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl Field {
    /// Create a zero-filled field with the given resolutions and physical
    /// dimensions.
    pub fn new(xres: usize, yres: usize, xreal: f64, yreal: f64) -> FieldResult<Self> {
        if xres == 0 || yres == 0 {
            return Err(CommonError::invalid("field dimensions must be positive").into());
        }
        if !(xreal > 0.0) || !(yreal > 0.0) {
            return Err(CommonError::invalid("field physical dimensions must be positive").into());
        }
        Ok(Self {
            xres,
            yres,
            xreal,
            yreal,
            xoff: 0.0,
            yoff: 0.0,
            xunit: Unit::none(),
            yunit: Unit::none(),
            zunit: Unit::none(),
            data: vec![0.0; xres * yres],
            cache: CachedStats::default(),
        })
    }

    /// Create a field from an existing row-major buffer.
    pub fn with_data(
        xres: usize,
        yres: usize,
        xreal: f64,
        yreal: f64,
        data: Vec<f64>,
    ) -> FieldResult<Self> {
        let mut field = Self::new(xres, yres, xreal, yreal)?;
        if data.len() != xres * yres {
            return Err(CommonError::DimensionMismatch(xres, yres, data.len(), 1).into());
        }
        field.data = data;
        Ok(field)
    }

    /// Number of columns.
    pub fn xres(&self) -> usize {
        self.xres
    }

    /// Number of rows.
    pub fn yres(&self) -> usize {
        self.yres
    }

    /// Physical width.
    pub fn xreal(&self) -> f64 {
        self.xreal
    }

    /// Physical height.
    pub fn yreal(&self) -> f64 {
        self.yreal
    }

    /// Horizontal origin offset.
    pub fn xoff(&self) -> f64 {
        self.xoff
    }

    /// Vertical origin offset.
    pub fn yoff(&self) -> f64 {
        self.yoff
    }

    /// Set the origin offsets.
    pub fn set_offsets(&mut self, xoff: f64, yoff: f64) {
        self.xoff = xoff;
        self.yoff = yoff;
    }

    /// Set the physical dimensions; the data are unchanged.
    pub fn set_real(&mut self, xreal: f64, yreal: f64) -> FieldResult<()> {
        if !(xreal > 0.0) || !(yreal > 0.0) {
            return Err(CommonError::invalid("field physical dimensions must be positive").into());
        }
        self.xreal = xreal;
        self.yreal = yreal;
        // Surface area depends on the pixel sizes.
        self.cache.are = None;
        Ok(())
    }

    /// Horizontal pixel size.
    pub fn dx(&self) -> f64 {
        self.xreal / self.xres as f64
    }

    /// Vertical pixel size.
    pub fn dy(&self) -> f64 {
        self.yreal / self.yres as f64
    }

    /// Horizontal lateral unit.
    pub fn xunit(&self) -> &Unit {
        &self.xunit
    }

    /// Vertical lateral unit.
    pub fn yunit(&self) -> &Unit {
        &self.yunit
    }

    /// Value unit.
    pub fn zunit(&self) -> &Unit {
        &self.zunit
    }

    /// Set the three unit descriptors.
    pub fn set_units(&mut self, xunit: Unit, yunit: Unit, zunit: Unit) {
        self.xunit = xunit;
        self.yunit = yunit;
        self.zunit = zunit;
    }

    /// The raw row-major buffer.
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Mutable access to the raw buffer; drops the entire summary cache
    /// since arbitrary writes cannot be tracked.
    pub fn data_mut(&mut self) -> &mut [f64] {
        self.cache.clear();
        &mut self.data
    }

    /// Raw mutable access for kernels that maintain the cache themselves.
    pub(crate) fn data_mut_raw(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// One pixel value.
    #[inline]
    pub fn get(&self, col: usize, row: usize) -> f64 {
        debug_assert!(col < self.xres && row < self.yres);
        self.data[row * self.xres + col]
    }

    /// Write one pixel value; drops the summary cache.
    #[inline]
    pub fn set(&mut self, col: usize, row: usize, value: f64) {
        debug_assert!(col < self.xres && row < self.yres);
        self.cache.clear();
        self.data[row * self.xres + col] = value;
    }

    /// One row as a slice.
    #[inline]
    pub fn row(&self, row: usize) -> &[f64] {
        &self.data[row * self.xres..(row + 1) * self.xres]
    }

    /// Drop all cached scalar summaries.
    pub fn invalidate(&mut self) {
        self.cache.clear();
    }

    /// Shared validation of a part and mask for mask-aware operations.
    ///
    /// Returns the resolved part, the mask origin offset, and the effective
    /// masking mode (`Ignore` whenever no mask is supplied).
    pub(crate) fn check_mask(
        &self,
        part: Option<FieldPart>,
        mask: Option<&MaskField>,
        masking: Masking,
    ) -> FieldResult<(FieldPart, usize, usize, Masking)> {
        let part = FieldPart::resolve(part, self.xres, self.yres)?;
        let masking = if mask.is_none() { Masking::Ignore } else { masking };
        if masking == Masking::Ignore {
            return Ok((part, 0, 0, Masking::Ignore));
        }
        let mask = mask.expect("masking without mask rewritten to Ignore");
        let (maskcol, maskrow) = resolve_mask_origin(
            &part,
            mask.xres(),
            mask.yres(),
            self.xres,
            self.yres,
        )?;
        Ok((part, maskcol, maskrow, masking))
    }

    /// Compare fields property by property, returning the checked flags
    /// that failed.
    ///
    /// Real-valued comparisons are kept in negative form so NaNs and other
    /// odd values compare as incompatible.
    pub fn is_incompatible(&self, other: &Field, check: CompatFlags) -> CompatFlags {
        let mut result = CompatFlags::default();

        if check.contains(CompatFlags::XRES) && self.xres != other.xres {
            result |= CompatFlags::XRES;
        }
        if check.contains(CompatFlags::YRES) && self.yres != other.yres {
            result |= CompatFlags::YRES;
        }
        if check.contains(CompatFlags::XREAL)
            && !((self.xreal / other.xreal).ln().abs() <= COMPAT_EPSILON)
        {
            result |= CompatFlags::XREAL;
        }
        if check.contains(CompatFlags::YREAL)
            && !((self.yreal / other.yreal).ln().abs() <= COMPAT_EPSILON)
        {
            result |= CompatFlags::YREAL;
        }
        if check.contains(CompatFlags::DX) && !((self.dx() / other.dx()).ln().abs() <= COMPAT_EPSILON)
        {
            result |= CompatFlags::DX;
        }
        if check.contains(CompatFlags::DY) && !((self.dy() / other.dy()).ln().abs() <= COMPAT_EPSILON)
        {
            result |= CompatFlags::DY;
        }
        if check.contains(CompatFlags::XUNIT) && !self.xunit.equal(&other.xunit) {
            result |= CompatFlags::XUNIT;
        }
        if check.contains(CompatFlags::YUNIT) && !self.yunit.equal(&other.yunit) {
            result |= CompatFlags::YUNIT;
        }
        if check.contains(CompatFlags::ZUNIT) && !self.zunit.equal(&other.zunit) {
            result |= CompatFlags::ZUNIT;
        }

        result
    }
}
