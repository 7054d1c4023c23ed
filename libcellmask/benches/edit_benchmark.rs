use criterion::{black_box, criterion_group, criterion_main, Criterion};
use cellmask::edit::MergeLog;
use cellmask::*;
use ndarray::Array2;

/// 512x512 grid of 16x16 cells separated by one background pixel
fn tiled_matrix() -> LabelMatrix {
    let labels = Array2::from_shape_fn((512, 512), |(y, x)| {
        if x % 17 == 16 || y % 17 == 16 {
            0
        } else {
            (y / 17 * 31 + x / 17 + 1) as u32
        }
    });
    LabelMatrix::from_array(labels).unwrap()
}

fn bench_region_index(c: &mut Criterion) {
    let matrix = tiled_matrix();
    c.bench_function("region_index_512", |b| {
        b.iter(|| black_box(RegionIndex::build(black_box(&matrix))))
    });
}

fn bench_draw(c: &mut Criterion) {
    let matrix = tiled_matrix();
    let engine = EditEngine::new("bench");
    let polygon: Vec<Point> = (0..64)
        .map(|i| {
            let angle = f64::from(i) / 64.0 * std::f64::consts::TAU;
            Point::new(
                (256.0 + 120.0 * angle.cos()) as i32,
                (256.0 + 120.0 * angle.sin()) as i32,
            )
        })
        .collect();

    c.bench_function("draw_circle_r120", |b| {
        b.iter(|| black_box(engine.draw(black_box(&matrix), black_box(&polygon)).unwrap()))
    });
}

fn bench_connect_round_trip(c: &mut Criterion) {
    let matrix = tiled_matrix();
    let engine = EditEngine::new("bench");
    let stroke = [Point::new(8, 8), Point::new(25, 8)];
    let none = ExclusionSet::new();

    c.bench_function("connect_round_trip", |b| {
        b.iter(|| {
            let (merged, log, _) = engine.connect(&matrix, &MergeLog::new(), &stroke, &none);
            black_box(engine.connect(&merged, &log, &stroke, &none))
        })
    });
}

fn bench_extract(c: &mut Criterion) {
    let matrix = tiled_matrix();
    let regions = RegionIndex::build(&matrix).into_regions();
    let channels = IntensityImage::single(IntensityChannel::new(
        "marker",
        Array2::from_shape_fn((512, 512), |(y, x)| ((x * y) % 255) as f32),
    ));
    let metadata = RecordMetadata::default();

    c.bench_function("extract_900_cells", |b| {
        b.iter(|| {
            black_box(
                features::extract("bench", black_box(&regions), &channels, 0.5, &metadata)
                    .unwrap(),
            )
        })
    });
}

criterion_group!(
    benches,
    bench_region_index,
    bench_draw,
    bench_connect_round_trip,
    bench_extract
);
criterion_main!(benches);
