use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::Array3;
use std::hint::black_box;
use vrdf::{decompose, Affine, LabelSet, Labelmap, Volume};

fn bench_decompose(c: &mut Criterion) {
    let mut group = c.benchmark_group("decompose");
    let labels = LabelSet::default();

    for side in [32usize, 64, 128] {
        let dim = (side, side, side);
        let volume = Volume::new(
            Array3::from_shape_fn(dim, |(i, j, k)| (i + j + k) as f32),
            Affine::identity(),
        );
        let labelmap = Labelmap::new(Array3::from_shape_fn(dim, |(i, j, k)| ((i ^ j ^ k) % 5) as i32));

        group.bench_with_input(BenchmarkId::from_parameter(side), &side, |b, _| {
            b.iter(|| decompose(black_box(&volume), black_box(&labelmap), &labels).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_decompose);
criterion_main!(benches);
