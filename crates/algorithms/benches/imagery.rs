//! Benchmarks for per-pixel imagery kernels

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use landpulse_algorithms::composite::{composite, CompositeStatistic};
use landpulse_algorithms::filters::median_filter;
use landpulse_algorithms::imagery::ndvi;
use landpulse_algorithms::reproject::reproject;
use landpulse_core::{GeoTransform, Raster, CRS};

fn create_band(size: usize, base: f64) -> Raster<f64> {
    let mut r = Raster::new(size, size);
    r.set_transform(GeoTransform::north_up(440_000.0, 4_475_000.0, 10.0));
    r.set_crs(Some(CRS::utm(30, true)));
    for row in 0..size {
        for col in 0..size {
            let v = base + ((row * 7 + col * 13) % 200) as f64;
            r.set(row, col, v).unwrap();
        }
    }
    r
}

fn bench_ndvi(c: &mut Criterion) {
    let mut group = c.benchmark_group("imagery/ndvi");
    for size in [256, 512, 1024, 2048] {
        let nir = create_band(size, 300.0);
        let red = create_band(size, 100.0);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| ndvi(black_box(&red), black_box(&nir)).unwrap())
        });
    }
    group.finish();
}

fn bench_median(c: &mut Criterion) {
    let mut group = c.benchmark_group("imagery/median_filter");
    for size in [256, 512, 1024] {
        let band = create_band(size, 0.0);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| median_filter(black_box(&band), 3).unwrap())
        });
    }
    group.finish();
}

fn bench_composite(c: &mut Criterion) {
    let mut group = c.benchmark_group("imagery/composite_median");
    for size in [256, 512, 1024] {
        let scenes: Vec<Raster<f64>> = (0..6).map(|i| create_band(size, i as f64 * 10.0)).collect();
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| composite(black_box(&scenes), CompositeStatistic::Median).unwrap())
        });
    }
    group.finish();
}

fn bench_reproject(c: &mut Criterion) {
    let mut group = c.benchmark_group("imagery/reproject_utm_to_3857");
    for size in [256, 512] {
        let band = create_band(size, 0.0);
        let target = CRS::web_mercator();
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| reproject(black_box(&band), &target, 10.0).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_ndvi, bench_median, bench_composite, bench_reproject);
criterion_main!(benches);
