//! Principal curvatures of a fitted quadratic surface.

use crate::hull::standardize_direction;

/// Curvature parameters at the centre of a quadratic surface.
#[derive(Debug, Clone, Copy, Default)]
pub struct CurvatureParams {
    /// Centre x in the fit's coordinates.
    pub xc: f64,
    /// Centre y in the fit's coordinates.
    pub yc: f64,
    /// Surface value at the centre.
    pub zc: f64,
    /// Smaller principal curvature.
    pub k1: f64,
    /// Larger principal curvature.
    pub k2: f64,
    /// Direction of the first principal axis.
    pub phi1: f64,
    /// Direction of the second principal axis.
    pub phi2: f64,
}

/// Derive centre position and principal curvatures from the coefficients
/// of `z = a + bx x + by y + cxx x^2 + cxy x y + cyy y^2`.
///
/// The centre is the stationary point of the quadratic. Nearly flat or
/// parabolic surfaces keep the centre at the origin and report the
/// curvatures that do exist (possibly zero).
pub fn curvature_at_centre(coeffs: &[f64; 6]) -> CurvatureParams {
    let [a, bx, by, cxx, cxy, cyy] = *coeffs;

    // Hessian H = [2cxx, cxy; cxy, 2cyy].
    let hxx = 2.0 * cxx;
    let hxy = cxy;
    let hyy = 2.0 * cyy;
    let scale = hxx.abs().max(hyy.abs()).max(hxy.abs());

    let mut params = CurvatureParams {
        zc: a,
        phi2: std::f64::consts::FRAC_PI_2,
        ..Default::default()
    };
    if scale == 0.0 {
        return params;
    }

    // Stationary point: H [xc, yc]^T = -[bx, by]^T.
    let det = hxx * hyy - hxy * hxy;
    if det.abs() > 1e-10 * scale * scale {
        params.xc = -(hyy * bx - hxy * by) / det;
        params.yc = -(hxx * by - hxy * bx) / det;
        params.zc = a
            + bx * params.xc
            + by * params.yc
            + cxx * params.xc * params.xc
            + cxy * params.xc * params.yc
            + cyy * params.yc * params.yc;
    }

    // Eigenvalues of the Hessian are the principal curvatures.
    let tr = hxx + hyy;
    let disc = ((hxx - hyy) * (hxx - hyy) + 4.0 * hxy * hxy).sqrt();
    let l1 = 0.5 * (tr - disc);
    let l2 = 0.5 * (tr + disc);
    let (k1, k2) = if l1.abs() <= l2.abs() { (l1, l2) } else { (l2, l1) };
    params.k1 = k1;
    params.k2 = k2;

    // Eigenvector direction of k1; the other axis is orthogonal.
    let phi1 = if hxy.abs() > 1e-12 * scale {
        (k1 - hxx).atan2(hxy)
    } else if hxx.abs() <= hyy.abs() {
        0.0
    } else {
        std::f64::consts::FRAC_PI_2
    };
    params.phi1 = standardize_direction(phi1);
    params.phi2 = standardize_direction(phi1 + std::f64::consts::FRAC_PI_2);
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_surface() {
        let p = curvature_at_centre(&[1.5, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(p.k1, 0.0);
        assert_eq!(p.k2, 0.0);
        assert_eq!(p.zc, 1.5);
    }

    #[test]
    fn test_paraboloid() {
        // z = x^2 + 2 y^2: curvatures 2 and 4, centre at origin.
        let p = curvature_at_centre(&[0.0, 0.0, 0.0, 1.0, 0.0, 2.0]);
        assert!((p.k1 - 2.0).abs() < 1e-12);
        assert!((p.k2 - 4.0).abs() < 1e-12);
        assert!(p.xc.abs() < 1e-12 && p.yc.abs() < 1e-12);
        // Small curvature along x, its direction is the x axis.
        assert!(p.phi1.abs() < 1e-12);
    }

    #[test]
    fn test_shifted_centre() {
        // z = (x - 1)^2 + (y + 2)^2 = x^2 - 2x + y^2 + 4y + 5.
        let p = curvature_at_centre(&[5.0, -2.0, 4.0, 1.0, 0.0, 1.0]);
        assert!((p.xc - 1.0).abs() < 1e-12);
        assert!((p.yc + 2.0).abs() < 1e-12);
        assert!(p.zc.abs() < 1e-12);
        assert!((p.k1 - 2.0).abs() < 1e-12);
        assert!((p.k2 - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_rotated_saddle() {
        // z = x y is a saddle with principal curvatures -1 and 1 along the
        // diagonals.
        let p = curvature_at_centre(&[0.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
        assert!((p.k1.abs() - 1.0).abs() < 1e-12);
        assert!((p.k2.abs() - 1.0).abs() < 1e-12);
        assert!((p.k1 + p.k2).abs() < 1e-12);
        assert!((p.phi1.abs() - std::f64::consts::FRAC_PI_4).abs() < 1e-12);
    }
}
