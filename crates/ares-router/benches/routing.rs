//! Routing benchmarks.
//!
//! Run with: `cargo bench -p ares-router`

use ares_router::Router;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use http::Method;

fn build_router(num_routes: usize) -> Router<usize> {
    let mut router = Router::new();
    let per_kind = num_routes / 3;

    for i in 0..per_kind {
        router
            .insert(Method::GET, format!("/api/v1/resource{i}"), i)
            .expect("static route");
    }
    for i in 0..per_kind {
        router
            .insert(Method::GET, format!("/api/v1/resource{i}/:id"), per_kind + i)
            .expect("param route");
    }
    for i in 0..per_kind {
        router
            .insert(
                Method::GET,
                format!("/api/v1/org/:org/resource{i}/:id"),
                2 * per_kind + i,
            )
            .expect("nested route");
    }
    router
        .insert(Method::GET, "/static/*", usize::MAX)
        .expect("wildcard route");

    router
}

fn bench_static_match(c: &mut Criterion) {
    let router = build_router(100);
    c.bench_function("static_match", |b| {
        b.iter(|| black_box(router.find(&Method::GET, black_box("/api/v1/resource20"))));
    });
}

fn bench_param_match(c: &mut Criterion) {
    let router = build_router(100);
    c.bench_function("param_match", |b| {
        b.iter(|| black_box(router.find(&Method::GET, black_box("/api/v1/resource25/12345"))));
    });
}

fn bench_nested_param_match(c: &mut Criterion) {
    let router = build_router(100);
    c.bench_function("nested_param_match", |b| {
        b.iter(|| {
            black_box(router.find(
                &Method::GET,
                black_box("/api/v1/org/acme-corp/resource10/12345"),
            ))
        });
    });
}

fn bench_wildcard_match(c: &mut Criterion) {
    let router = build_router(100);
    c.bench_function("wildcard_match", |b| {
        b.iter(|| black_box(router.find(&Method::GET, black_box("/static/css/app/site.css"))));
    });
}

fn bench_miss(c: &mut Criterion) {
    let router = build_router(100);
    c.bench_function("miss", |b| {
        b.iter(|| black_box(router.find(&Method::GET, black_box("/api/v1/nonexistent/path"))));
    });
}

fn bench_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("scaling");
    for size in [30, 300, 3000] {
        let router = build_router(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &router, |b, router| {
            b.iter(|| black_box(router.find(&Method::GET, black_box("/api/v1/resource7/99"))));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_static_match,
    bench_param_match,
    bench_nested_param_match,
    bench_wildcard_match,
    bench_miss,
    bench_scaling
);
criterion_main!(benches);
