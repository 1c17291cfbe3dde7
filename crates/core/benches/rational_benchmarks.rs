use criterion::{black_box, criterion_group, criterion_main, Criterion};

use avflow::rational::Rational;

fn bench_arithmetic(c: &mut Criterion) {
    let a = Rational::new(48000, 1001);
    let b = Rational::new(30, 1);

    c.bench_function("rational_add", |bencher| {
        bencher.iter(|| black_box(a) + black_box(b))
    });
    c.bench_function("rational_mul", |bencher| {
        bencher.iter(|| black_box(a) * black_box(b))
    });
    c.bench_function("rational_rescale", |bencher| {
        bencher.iter(|| black_box(a).rescale(black_box(90_000), black_box(b)))
    });
}

criterion_group!(benches, bench_arithmetic);
criterion_main!(benches);
