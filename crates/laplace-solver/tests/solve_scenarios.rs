//! End-to-end scenarios for the Laplace interpolator.

use field_engine::Field;
use laplace_solver::{laplace_solve, FillRegion};
use mask_engine::MaskField;
use spm_common::FieldPart;

fn field_from(data: Vec<f64>, xres: usize, yres: usize) -> Field {
    Field::with_data(xres, yres, xres as f64, yres as f64, data).unwrap()
}

/// Scenario: a 3x3 field with 1 at the masked centre becomes all zeroes,
/// the mean of the four zero neighbours.
#[test]
fn centre_pixel_scenario() {
    let mut data = vec![0.0; 9];
    data[4] = 1.0;
    let mut f = field_from(data, 3, 3);
    let mut mask = MaskField::new(3, 3).unwrap();
    mask.set(1, 1, true);
    laplace_solve(&mut f, &mask, FillRegion::Grain(1)).unwrap();
    for &v in f.data() {
        assert!(v.abs() < 1e-6, "residual {v}");
    }
}

/// Invariant: an empty mask leaves the field untouched.
#[test]
fn idempotent_on_empty_mask() {
    let data: Vec<f64> = (0..100).map(|k| (k as f64).sin()).collect();
    let mut f = field_from(data.clone(), 10, 10);
    let mask = MaskField::new(10, 10).unwrap();
    laplace_solve(&mut f, &mask, FillRegion::AllGrains).unwrap();
    assert_eq!(f.data(), &data[..]);
}

/// Invariant: away from the mask boundary the solution satisfies the
/// five-point Laplace equation within the iteration tolerance.
#[test]
fn interior_discrete_harmonicity() {
    let n = 24;
    let mut data = Vec::with_capacity(n * n);
    for i in 0..n {
        for j in 0..n {
            // A smooth boundary condition.
            data.push((i as f64 * 0.3).sin() + 0.1 * j as f64);
        }
    }
    let mut f = field_from(data, n, n);
    let mut mask = MaskField::new(n, n).unwrap();
    mask.fill(Some(FieldPart::new(5, 5, 14, 14)), true).unwrap();
    laplace_solve(&mut f, &mask, FillRegion::AllGrains).unwrap();

    for i in 7..17 {
        for j in 7..17 {
            let z = f.get(j, i);
            let nb = 0.25 * (f.get(j, i - 1) + f.get(j, i + 1) + f.get(j - 1, i) + f.get(j + 1, i));
            assert!(
                (z - nb).abs() <= 1e-4,
                "pixel ({j},{i}): {z} vs neighbour mean {nb}"
            );
        }
    }
}

/// A masked region surrounded by a constant boundary becomes constant.
#[test]
fn constant_boundary_reproduced() {
    let n = 16;
    let mut f = field_from(vec![2.5; n * n], n, n);
    // Destroy the interior so the solver has real work to do.
    for i in 4..12 {
        for j in 4..12 {
            f.set(j, i, -100.0);
        }
    }
    let mut mask = MaskField::new(n, n).unwrap();
    mask.fill(Some(FieldPart::new(4, 4, 8, 8)), true).unwrap();
    laplace_solve(&mut f, &mask, FillRegion::AllGrains).unwrap();
    for i in 0..n {
        for j in 0..n {
            assert!(
                (f.get(j, i) - 2.5).abs() < 1e-4,
                "pixel ({j},{i}) = {}",
                f.get(j, i)
            );
        }
    }
}

/// A linear gradient across the mask is reproduced by the interpolation
/// (the harmonic extension of a plane is the plane).
#[test]
fn linear_gradient_reproduced() {
    let n = 20;
    let mut data = Vec::with_capacity(n * n);
    for _i in 0..n {
        for j in 0..n {
            data.push(j as f64);
        }
    }
    let mut f = field_from(data, n, n);
    let original = f.data().to_vec();
    let mut mask = MaskField::new(n, n).unwrap();
    mask.fill(Some(FieldPart::new(6, 6, 8, 8)), true).unwrap();
    laplace_solve(&mut f, &mask, FillRegion::AllGrains).unwrap();
    for i in 0..n {
        for j in 0..n {
            assert!(
                (f.get(j, i) - original[i * n + j]).abs() < 5e-3,
                "pixel ({j},{i}) = {} expected {}",
                f.get(j, i),
                original[i * n + j]
            );
        }
    }
}

/// Solving a single grain leaves other grains' pixels alone.
#[test]
fn single_grain_is_local() {
    let n = 12;
    let mut f = field_from(vec![0.0; n * n], n, n);
    f.set(2, 2, 5.0);
    f.set(9, 9, 7.0);
    let mut mask = MaskField::new(n, n).unwrap();
    mask.set(2, 2, true);
    mask.set(9, 9, true);
    laplace_solve(&mut f, &mask, FillRegion::Grain(1)).unwrap();
    assert!(f.get(2, 2).abs() < 1e-9);
    assert_eq!(f.get(9, 9), 7.0);
}
