//! Performance benchmarks for the capture path
//!
//! Run with: cargo bench --bench conversion_benchmarks
//!
//! Measures the CPU conversion kernels, pooled buffer turnover and the copy
//! made for every additional session output.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use framemux::gpu::{
    convert_image, AlphaType, ConversionOptions, ConversionPlan, ImageView, ImageViewMut,
    SurfaceFormat,
};
use framemux::testing::synthetic_video_frame;
use framemux::{PixelBuffer, PoolFactory};
use std::time::Duration;

const RESOLUTIONS: [(u32, u32, &str); 2] = [(640, 480, "480p"), (1280, 720, "720p")];

fn bench_surface_conversion(c: &mut Criterion) {
    let mut group = c.benchmark_group("Surface Conversion");
    group.measurement_time(Duration::from_secs(5));

    let sources = [
        SurfaceFormat::Bgra8Unorm,
        SurfaceFormat::Rgba8Unorm,
        SurfaceFormat::Bgr10Xr,
        SurfaceFormat::Bgra10XrSrgb,
    ];

    for (width, height, name) in RESOLUTIONS {
        group.throughput(Throughput::Elements((width * height) as u64));
        for source in sources {
            let plan = ConversionPlan::select(
                source,
                AlphaType::Premultiplied,
                &ConversionOptions::default(),
            );
            let input = synthetic_video_frame(0, width, height, source).unwrap();
            let output = PixelBuffer::new(width, height, plan.destination_format()).unwrap();

            group.bench_with_input(
                BenchmarkId::new(format!("{:?}", source), name),
                &(width, height),
                |b, &(w, h)| {
                    let src = input.read().unwrap();
                    let mut dst = output.write().unwrap();
                    let src_view = ImageView {
                        data: &src,
                        bytes_per_row: input.bytes_per_row(),
                        encoding: plan.source,
                    };
                    let mut dst_view = ImageViewMut {
                        data: &mut dst,
                        bytes_per_row: output.bytes_per_row(),
                        encoding: plan.destination,
                    };
                    b.iter(|| convert_image(black_box(&src_view), &mut dst_view, w, h).unwrap());
                },
            );
        }
    }

    group.finish();
}

fn bench_pool_turnover(c: &mut Criterion) {
    let mut group = c.benchmark_group("Buffer Pool");
    let factory = PoolFactory::default();

    for (width, height, name) in RESOLUTIONS {
        group.bench_function(BenchmarkId::new("get_release", name), |b| {
            b.iter(|| {
                let buffer = factory
                    .get_buffer(width, height, framemux::PixelFormat::Bgra32)
                    .unwrap();
                black_box(buffer.bytes_per_row());
            });
        });

        let original = synthetic_video_frame(0, width, height, SurfaceFormat::Bgra8Unorm).unwrap();
        group.throughput(Throughput::Bytes(
            (original.bytes_per_row() * height as usize) as u64,
        ));
        group.bench_function(BenchmarkId::new("fan_out_copy", name), |b| {
            b.iter(|| black_box(factory.copy_buffer(&original).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_surface_conversion, bench_pool_turnover);
criterion_main!(benches);
