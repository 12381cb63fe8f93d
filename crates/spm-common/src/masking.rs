//! Masking policy and mask/field geometry resolution.

use serde::{Deserialize, Serialize};

use crate::error::{CommonError, CommonResult};
use crate::part::FieldPart;

/// Three-mode participation policy for mask-aware operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Masking {
    /// All pixels participate; the mask is not consulted.
    #[default]
    Ignore,
    /// A pixel participates iff its mask bit is set.
    Include,
    /// A pixel participates iff its mask bit is clear.
    Exclude,
}

impl Masking {
    /// Whether a pixel with the given mask bit participates.
    #[inline]
    pub fn admits(self, bit: bool) -> bool {
        match self {
            Masking::Ignore => true,
            Masking::Include => bit,
            Masking::Exclude => !bit,
        }
    }

    /// Whether this policy consults the mask at all.
    #[inline]
    pub fn uses_mask(self) -> bool {
        !matches!(self, Masking::Ignore)
    }
}

/// Resolve where a mask's origin sits relative to a processed part.
///
/// Callers pass masks in one of two layouts: the mask has the dimensions
/// of the whole field (its origin is the field origin), or the dimensions
/// of the processed part (its origin is the part origin). Returns the
/// `(mask_col, mask_row)` to add to part-local coordinates when indexing
/// the mask, or an incompatibility error for any other geometry.
pub fn resolve_mask_origin(
    part: &FieldPart,
    mask_xres: usize,
    mask_yres: usize,
    field_xres: usize,
    field_yres: usize,
) -> CommonResult<(usize, usize)> {
    if mask_xres == field_xres && mask_yres == field_yres {
        return Ok((part.col, part.row));
    }
    if mask_xres == part.width && mask_yres == part.height {
        return Ok((0, 0));
    }
    Err(CommonError::MaskMismatch {
        mask_xres,
        mask_yres,
        xres: field_xres,
        yres: field_yres,
        width: part.width,
        height: part.height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admits() {
        assert!(Masking::Ignore.admits(true));
        assert!(Masking::Ignore.admits(false));
        assert!(Masking::Include.admits(true));
        assert!(!Masking::Include.admits(false));
        assert!(!Masking::Exclude.admits(true));
        assert!(Masking::Exclude.admits(false));
    }

    #[test]
    fn test_resolve_field_sized_mask() {
        let part = FieldPart::new(2, 3, 4, 5);
        let origin = resolve_mask_origin(&part, 10, 10, 10, 10).unwrap();
        assert_eq!(origin, (2, 3));
    }

    #[test]
    fn test_resolve_part_sized_mask() {
        let part = FieldPart::new(2, 3, 4, 5);
        let origin = resolve_mask_origin(&part, 4, 5, 10, 10).unwrap();
        assert_eq!(origin, (0, 0));
    }

    #[test]
    fn test_resolve_mismatch() {
        let part = FieldPart::new(2, 3, 4, 5);
        assert!(resolve_mask_origin(&part, 7, 7, 10, 10).is_err());
    }
}
