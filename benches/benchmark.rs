use criterion::{black_box, criterion_group, criterion_main, Criterion};
use render_pool::{
    classify, default_headers, merge_headers, resolve_proxy, Headers, Job, NetError, Settlement,
};
use std::time::Duration;

#[cfg(feature = "integration_benchmarks")]
use render_pool::{Config, RenderService};
#[cfg(feature = "integration_benchmarks")]
use tokio::runtime::Runtime;

// Fast settings for all benchmarks
fn configure_fast_group(group: &mut criterion::BenchmarkGroup<criterion::measurement::WallTime>) {
    group.warm_up_time(Duration::from_millis(500));
    group.measurement_time(Duration::from_millis(500));
    group.sample_size(20);
}

// === UNIT BENCHMARKS ===

fn benchmark_job_creation(c: &mut Criterion) {
    let mut group = c.benchmark_group("job");
    configure_fast_group(&mut group);

    group.bench_function("creation", |b| {
        b.iter(|| {
            let job = Job::png("https://example.com")
                .with_header("X-Trace", "1")
                .with_timeout(Duration::from_secs(2));
            black_box(job);
        });
    });

    group.bench_function("validate", |b| {
        let jobs = [
            Job::html("https://example.com"),
            Job::html("data:text/html,<p>hi</p>"),
            Job::html("invalid-url"),
        ];
        b.iter(|| {
            for job in &jobs {
                let _ = black_box(job.validate());
            }
        });
    });

    group.finish();
}

fn benchmark_classification(c: &mut Criterion) {
    let mut group = c.benchmark_group("classification");
    configure_fast_group(&mut group);

    let signals = vec![
        Settlement::LoadSucceeded,
        Settlement::DomReady,
        Settlement::Crashed,
        Settlement::TimedOut,
        Settlement::LoadFailed {
            code: -105,
            description: "net::ERR_NAME_NOT_RESOLVED".to_string(),
        },
    ];

    group.bench_function("classify", |b| {
        b.iter(|| {
            for signal in &signals {
                let _ = black_box(classify(signal.clone(), Duration::from_secs(5)));
            }
        });
    });

    group.bench_function("net_error_from_text", |b| {
        b.iter(|| {
            black_box(NetError::from_error_text("net::ERR_CONNECTION_REFUSED"));
        });
    });

    group.finish();
}

fn benchmark_navigation_settings(c: &mut Criterion) {
    let mut group = c.benchmark_group("navigation_settings");
    configure_fast_group(&mut group);

    let mut overrides = Headers::new();
    overrides.insert("cache-control".to_string(), "max-age=60".to_string());
    overrides.insert("Accept-Language".to_string(), "en".to_string());

    group.bench_function("merge_headers", |b| {
        b.iter(|| {
            black_box(merge_headers(default_headers(), &overrides));
        });
    });

    group.bench_function("resolve_proxy", |b| {
        b.iter(|| {
            black_box(resolve_proxy(Some(""), Some("http=proxy:3128")));
            black_box(resolve_proxy(None, Some("http=proxy:3128")));
        });
    });

    group.finish();
}

fn benchmark_filename_sanitization(c: &mut Criterion) {
    let mut group = c.benchmark_group("filename_sanitization");
    configure_fast_group(&mut group);

    let targets = vec![
        "https://example.com",
        "https://example.com/docs?page=2",
        "http://example.com/a/b/c/",
    ];

    group.bench_function("output_filename", |b| {
        b.iter(|| {
            for target in &targets {
                black_box(render_pool::output_filename(target, render_pool::JobKind::ImageCapture));
            }
        });
    });

    group.finish();
}

// === INTEGRATION BENCHMARKS (require Chrome) ===

#[cfg(feature = "integration_benchmarks")]
fn benchmark_service_creation(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("service_creation");
    configure_fast_group(&mut group);

    group.bench_function("single_engine", |b| {
        b.iter(|| {
            rt.block_on(async {
                let config = Config {
                    pool_size: 1,
                    ..Default::default()
                };

                let service = RenderService::new(config).await.unwrap();
                service.shutdown(Duration::from_secs(1)).await;
                black_box(service.stats());
            })
        });
    });

    group.finish();
}

#[cfg(feature = "integration_benchmarks")]
fn benchmark_concurrent_renders(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let service = rt
        .block_on(RenderService::new(Config {
            pool_size: 2,
            ..Default::default()
        }))
        .unwrap();

    let mut group = c.benchmark_group("concurrent_renders");
    configure_fast_group(&mut group);

    group.bench_function("html_3", |b| {
        b.iter(|| {
            rt.block_on(async {
                let jobs = (0..3)
                    .map(|i| Job::html(format!("data:text/html,<p>{i}</p>")))
                    .collect();
                let successful = service
                    .render_batch(jobs)
                    .await
                    .iter()
                    .filter(|outcome| outcome.is_ok())
                    .count();
                black_box(successful);
            })
        });
    });

    group.bench_function("png_1", |b| {
        b.iter(|| {
            rt.block_on(async {
                let result = service.render(Job::png("data:text/html,<h1>bench</h1>")).await;
                black_box(result.is_ok());
            })
        });
    });

    group.finish();
    rt.block_on(service.shutdown(Duration::from_secs(5)));
}

// === BENCHMARK GROUPS ===

criterion_group!(
    unit_benches,
    benchmark_job_creation,
    benchmark_classification,
    benchmark_navigation_settings,
    benchmark_filename_sanitization,
);

#[cfg(feature = "integration_benchmarks")]
criterion_group!(
    integration_benches,
    benchmark_service_creation,
    benchmark_concurrent_renders,
);

#[cfg(feature = "integration_benchmarks")]
criterion_main!(unit_benches, integration_benches);

#[cfg(not(feature = "integration_benchmarks"))]
criterion_main!(unit_benches);
