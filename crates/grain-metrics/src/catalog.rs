//! The closed catalogue of built-in per-grain quantities.

use spm_common::Unit;

/// Shared intermediates a grain value depends on, combined as a bitfield.
pub mod need {
    pub const SIZE: u32 = 1 << 0;
    pub const ANYBOUNDPOS: u32 = 1 << 1;
    pub const MIN: u32 = 1 << 2;
    pub const MAX: u32 = 1 << 3;
    pub const XMEAN: u32 = (1 << 4) | SIZE;
    pub const YMEAN: u32 = (1 << 5) | SIZE;
    pub const CENTRE: u32 = XMEAN | YMEAN;
    pub const ZMEAN: u32 = (1 << 6) | SIZE;
    pub const LINEAR: u32 = (1 << 7) | ZMEAN | CENTRE;
    pub const QUADRATIC: u32 = (1 << 8) | LINEAR;
    pub const VOLUME: u32 = 1 << 9;
    pub const EDMEAN: u32 = (1 << 10) | CENTRE;
    pub const ZRMS: u32 = (1 << 11) | ZMEAN;
}

/// Whether a quantity is only meaningful when certain field units match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameUnits {
    /// No unit requirement.
    None,
    /// The two lateral units must match.
    Lateral,
    /// Lateral and value units must all match.
    All,
}

/// Identifier of one built-in grain quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(usize)]
pub enum GrainValueId {
    CenterX = 0,
    CenterY,
    ProjectedArea,
    EquivDiscRadius,
    SurfaceArea,
    HalfHeightArea,
    ConvexHullArea,
    Minimum,
    Maximum,
    Mean,
    Median,
    RmsIntra,
    SkewnessIntra,
    KurtosisIntra,
    FlatBoundaryLength,
    MinimumBoundSize,
    MinimumBoundAngle,
    MaximumBoundSize,
    MaximumBoundAngle,
    BoundaryMinimum,
    BoundaryMaximum,
    InscribedDiscR,
    InscribedDiscX,
    InscribedDiscY,
    CircumcircleR,
    CircumcircleX,
    CircumcircleY,
    MeanRadius,
    MeanEdgeDistance,
    ShapeNumber,
    Volume0,
    VolumeMin,
    VolumeLaplace,
    SlopeTheta,
    SlopePhi,
    CurvatureCenterX,
    CurvatureCenterY,
    CurvatureCenterZ,
    Curvature1,
    Curvature2,
    CurvatureAngle1,
    CurvatureAngle2,
    SemimajorAxis,
    SemiminorAxis,
    SemimajorAngle,
    SemiminorAngle,
}

/// Number of built-in grain quantities.
pub const NVALUES: usize = 46;

/// Static description of one built-in quantity.
#[derive(Debug, Clone, Copy)]
pub struct GrainValueDef {
    pub id: GrainValueId,
    /// Shared intermediates this value needs, see [`need`].
    pub need: u32,
    /// Human-readable name.
    pub name: &'static str,
    /// Group tag.
    pub group: &'static str,
    /// Formula-variable identifier.
    pub ident: &'static str,
    /// Display symbol.
    pub symbol: &'static str,
    pub same_units: SameUnits,
    /// Computed in radians, unitless.
    pub is_angle: bool,
    pub power_x: i32,
    pub power_y: i32,
    pub power_z: i32,
    /// Initial fill of the per-grain array (identity of the aggregation).
    pub fill: f64,
}

macro_rules! def {
    ($id:ident, $need:expr, $name:literal, $group:literal, $ident:literal, $symbol:literal
     $(, same_units: $su:ident)? $(, angle: $angle:literal)?
     $(, px: $px:literal)? $(, py: $py:literal)? $(, pz: $pz:literal)? $(, fill: $fill:expr)?) => {
        {
            #[allow(unused_mut, unused_assignments)]
            let mut d = GrainValueDef {
                id: GrainValueId::$id,
                need: $need,
                name: $name,
                group: $group,
                ident: $ident,
                symbol: $symbol,
                same_units: SameUnits::None,
                is_angle: false,
                power_x: 0,
                power_y: 0,
                power_z: 0,
                fill: 0.0,
            };
            $(d.same_units = SameUnits::$su;)?
            $(d.is_angle = $angle;)?
            $(d.power_x = $px;)?
            $(d.power_y = $py;)?
            $(d.power_z = $pz;)?
            $(d.fill = $fill;)?
            d
        }
    };
}

/// The catalogue, indexed by `GrainValueId as usize`.
pub static CATALOG: [GrainValueDef; NVALUES] = [
    def!(CenterX, need::XMEAN, "Center x position", "Position", "x_0", "x₀", px: 1),
    def!(CenterY, need::YMEAN, "Center y position", "Position", "y_0", "y₀", py: 1),
    def!(ProjectedArea, need::SIZE, "Projected area", "Area", "A_0", "A₀", px: 1, py: 1),
    def!(EquivDiscRadius, need::SIZE, "Equivalent disc radius", "Area", "r_eq", "r_eq",
         same_units: Lateral, px: 1),
    def!(SurfaceArea, 0, "Surface area", "Area", "A_s", "A_s", same_units: All, px: 1, py: 1),
    def!(HalfHeightArea, need::MIN | need::MAX, "Area above half-height", "Area", "A_h", "A_h",
         px: 1, py: 1),
    def!(ConvexHullArea, need::ANYBOUNDPOS, "Area of convex hull", "Area", "A_c", "A_c",
         px: 1, py: 1),
    def!(Minimum, need::MIN, "Minimum value", "Value", "z_min", "z_min", pz: 1, fill: f64::MAX),
    def!(Maximum, need::MAX, "Maximum value", "Value", "z_max", "z_max", pz: 1, fill: -f64::MAX),
    def!(Mean, need::ZMEAN, "Mean value", "Value", "z_m", "z_m", pz: 1),
    def!(Median, need::SIZE, "Median value", "Value", "z_med", "z_med", pz: 1),
    def!(RmsIntra, need::ZMEAN, "Value rms (intragrain)", "Value", "sigma_i", "σ_i", pz: 1),
    def!(SkewnessIntra, need::ZMEAN | need::ZRMS, "Value skewness (intragrain)", "Value",
         "gamma_1i", "γ_1i"),
    def!(KurtosisIntra, need::ZMEAN | need::ZRMS, "Value kurtosis (intragrain)", "Value",
         "gamma_2i", "γ_2i"),
    def!(FlatBoundaryLength, 0, "Projected boundary length", "Boundary", "L_b0", "L_b0",
         same_units: Lateral, px: 1),
    def!(MinimumBoundSize, need::ANYBOUNDPOS, "Minimum bounding size", "Boundary", "D_min",
         "D_min", same_units: Lateral, px: 1, fill: f64::MAX),
    def!(MinimumBoundAngle, need::ANYBOUNDPOS, "Minimum bounding direction", "Boundary",
         "phi_min", "φ_min", same_units: Lateral, angle: true),
    def!(MaximumBoundSize, need::ANYBOUNDPOS, "Maximum bounding size", "Boundary", "D_max",
         "D_max", same_units: Lateral, px: 1, fill: -f64::MAX),
    def!(MaximumBoundAngle, need::ANYBOUNDPOS, "Maximum bounding direction", "Boundary",
         "phi_max", "φ_max", same_units: Lateral, angle: true),
    def!(BoundaryMinimum, 0, "Minimum value on boundary", "Boundary", "b_min", "b_min",
         pz: 1, fill: f64::MAX),
    def!(BoundaryMaximum, 0, "Maximum value on boundary", "Boundary", "b_max", "b_max",
         pz: 1, fill: -f64::MAX),
    def!(InscribedDiscR, need::SIZE | need::CENTRE, "Maximum inscribed disc radius", "Boundary",
         "R_i", "R_i", same_units: Lateral, px: 1),
    def!(InscribedDiscX, need::SIZE | need::CENTRE, "Maximum inscribed disc center x position",
         "Boundary", "x_i", "x_i", same_units: Lateral, px: 1),
    def!(InscribedDiscY, need::SIZE | need::CENTRE, "Maximum inscribed disc center y position",
         "Boundary", "y_i", "y_i", py: 1),
    def!(CircumcircleR, need::ANYBOUNDPOS, "Minimum circumcircle radius", "Boundary", "R_e",
         "R_e", same_units: Lateral, px: 1),
    def!(CircumcircleX, need::ANYBOUNDPOS, "Minimum circumcircle center x position", "Boundary",
         "x_e", "x_e", same_units: Lateral, px: 1),
    def!(CircumcircleY, need::ANYBOUNDPOS, "Minimum circumcircle center y position", "Boundary",
         "y_e", "y_e", same_units: Lateral, py: 1),
    def!(MeanRadius, need::CENTRE, "Mean radius", "Boundary", "R_m", "R_m",
         same_units: Lateral, px: 1),
    def!(MeanEdgeDistance, need::EDMEAN, "Mean edge distance", "Boundary", "d_e", "d_e",
         same_units: Lateral, px: 1),
    def!(ShapeNumber, need::EDMEAN, "Shape number", "Boundary", "F_s", "F_s",
         same_units: Lateral),
    def!(Volume0, need::VOLUME, "Zero-based volume", "Volume", "V_0", "V₀",
         px: 1, py: 1, pz: 1),
    def!(VolumeMin, need::MIN | need::VOLUME | need::SIZE, "Minimum-based volume", "Volume",
         "V_min", "V_min", px: 1, py: 1, pz: 1),
    def!(VolumeLaplace, need::VOLUME | need::SIZE, "Laplace-based volume", "Volume", "V_L",
         "V_L", px: 1, py: 1, pz: 1),
    def!(SlopeTheta, need::LINEAR, "Slope normal angle", "Slope", "theta", "ϑ",
         same_units: All, angle: true),
    def!(SlopePhi, need::LINEAR, "Slope direction", "Slope", "phi", "φ",
         same_units: Lateral, angle: true),
    def!(CurvatureCenterX, need::QUADRATIC, "Curvature center x position", "Curvature", "x_c",
         "x_c", same_units: Lateral, px: 1),
    def!(CurvatureCenterY, need::QUADRATIC, "Curvature center y position", "Curvature", "y_c",
         "y_c", same_units: Lateral, py: 1),
    def!(CurvatureCenterZ, need::QUADRATIC, "Curvature center value", "Curvature", "z_c",
         "z_c", same_units: Lateral, pz: 1),
    def!(Curvature1, need::QUADRATIC, "Curvature 1", "Curvature", "kappa_1", "κ₁",
         same_units: All, pz: -1),
    def!(Curvature2, need::QUADRATIC, "Curvature 2", "Curvature", "kappa_2", "κ₂",
         same_units: All, pz: -1),
    def!(CurvatureAngle1, need::QUADRATIC, "Curvature direction 1", "Curvature", "phi_1",
         "φ₁", same_units: Lateral, angle: true),
    def!(CurvatureAngle2, need::QUADRATIC, "Curvature direction 2", "Curvature", "phi_2",
         "φ₂", same_units: Lateral, angle: true),
    def!(SemimajorAxis, need::CENTRE, "Semimajor axis length", "Moment", "a_maj", "a_maj",
         same_units: Lateral, px: 1),
    def!(SemiminorAxis, need::CENTRE, "Semiminor axis length", "Moment", "a_min", "a_min",
         same_units: Lateral, px: 1),
    def!(SemimajorAngle, need::CENTRE, "Semimajor axis direction", "Moment", "alpha_maj",
         "α_maj", same_units: Lateral, angle: true),
    def!(SemiminorAngle, need::CENTRE, "Semiminor axis direction", "Moment", "alpha_min",
         "α_min", same_units: Lateral, angle: true),
];

impl GrainValueId {
    /// All catalogue identifiers in order.
    pub fn all() -> impl Iterator<Item = GrainValueId> {
        CATALOG.iter().map(|d| d.id)
    }

    /// The static description of this quantity.
    pub fn def(self) -> &'static GrainValueDef {
        &CATALOG[self as usize]
    }

    /// Look a quantity up by its formula identifier.
    pub fn from_ident(ident: &str) -> Option<GrainValueId> {
        CATALOG.iter().find(|d| d.ident == ident).map(|d| d.id)
    }

    /// Derive the unit of this quantity from the field's unit descriptors.
    ///
    /// Angles are computed in radians and stay unitless.
    pub fn unit(self, xunit: &Unit, yunit: &Unit, zunit: &Unit) -> Unit {
        let def = self.def();
        if def.is_angle {
            return Unit::none();
        }
        let lateral = Unit::power_multiply(xunit, def.power_x, yunit, def.power_y);
        Unit::power_multiply(&lateral, 1, zunit, def.power_z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_is_consistent() {
        assert_eq!(CATALOG.len(), NVALUES);
        for (i, def) in CATALOG.iter().enumerate() {
            assert_eq!(def.id as usize, i, "misplaced {:?}", def.id);
        }
    }

    #[test]
    fn test_idents_unique() {
        for (i, a) in CATALOG.iter().enumerate() {
            for b in &CATALOG[i + 1..] {
                assert_ne!(a.ident, b.ident);
            }
        }
    }

    #[test]
    fn test_from_ident() {
        assert_eq!(GrainValueId::from_ident("V_0"), Some(GrainValueId::Volume0));
        assert_eq!(GrainValueId::from_ident("x_0"), Some(GrainValueId::CenterX));
        assert_eq!(GrainValueId::from_ident("nonsense"), None);
    }

    #[test]
    fn test_units() {
        let m = Unit::base("m");
        let v = Unit::base("V");
        let u = GrainValueId::Volume0.unit(&m, &m, &v);
        assert_eq!(u.to_string(), "V m^2");
        let angle = GrainValueId::SlopeTheta.unit(&m, &m, &v);
        assert!(angle.is_none());
        let curv = GrainValueId::Curvature1.unit(&m, &m, &m);
        assert_eq!(curv.to_string(), "m^-1");
    }

    #[test]
    fn test_need_composition() {
        assert_eq!(need::XMEAN & need::SIZE, need::SIZE);
        assert_eq!(need::QUADRATIC & need::LINEAR, need::LINEAR);
        assert_eq!(need::LINEAR & need::ZMEAN, need::ZMEAN);
    }
}
