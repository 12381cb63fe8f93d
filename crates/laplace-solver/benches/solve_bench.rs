//! Benchmark of the whole-field Laplace driver.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use field_engine::Field;
use laplace_solver::{laplace_solve, FillRegion};
use mask_engine::MaskField;
use spm_common::FieldPart;

fn bench_solve(c: &mut Criterion) {
    let n = 128;
    let mut data = Vec::with_capacity(n * n);
    for i in 0..n {
        for j in 0..n {
            data.push((i as f64 * 0.13).sin() * (j as f64 * 0.07).cos());
        }
    }
    let field = Field::with_data(n, n, n as f64, n as f64, data).unwrap();
    let mut mask = MaskField::new(n, n).unwrap();
    mask.fill(Some(FieldPart::new(20, 20, 60, 60)), true).unwrap();
    mask.fill(Some(FieldPart::new(90, 30, 20, 8)), true).unwrap();

    c.bench_function("laplace_solve_128", |bench| {
        bench.iter(|| {
            let mut f = field.clone();
            laplace_solve(&mut f, black_box(&mask), FillRegion::AllGrains).unwrap();
            f
        })
    });
}

criterion_group!(benches, bench_solve);
criterion_main!(benches);
