//! Benchmarks for payload extraction.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use draftflow::extract::{extract, RequiredFields};

fn long_response(fenced: bool) -> String {
    let body = format!(
        r#"{{"concepts": [{}], "logic_flow": "a -> b"}}"#,
        (0..200).map(|i| format!(r#"{{"name": "c{i}"}}"#)).collect::<Vec<_>>().join(", ")
    );
    let prose = "Some reasoning before the answer. ".repeat(100);
    if fenced {
        format!("{prose}\n```json\n{body}\n```\n{prose}")
    } else {
        format!("{prose}{body}{prose}")
    }
}

fn extract_benchmark(c: &mut Criterion) {
    let fenced = long_response(true);
    let bare = long_response(false);
    let validator = RequiredFields::new(["concepts", "logic_flow"]);

    c.bench_function("extract_tagged_fence", |b| {
        b.iter(|| extract(black_box(&fenced), None));
    });
    c.bench_function("extract_brace_span", |b| {
        b.iter(|| extract(black_box(&bare), None));
    });
    c.bench_function("extract_validated", |b| {
        b.iter(|| extract(black_box(&fenced), Some(&validator)));
    });
    c.bench_function("extract_garbage", |b| {
        b.iter(|| extract(black_box("no payload here at all"), None));
    });
}

criterion_group!(benches, extract_benchmark);
criterion_main!(benches);
