use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use std::time::{Duration, Instant};
use verdict_relay::normalize::normalize;
use verdict_relay::rate_limit::FixedWindowLimiter;
use verdict_relay::validate::parse_body;

fn bench_rate_limiter(c: &mut Criterion) {
    let limiter = FixedWindowLimiter::new(u32::MAX, Duration::from_secs(60));
    let now = Instant::now();
    c.bench_function("rate_limit_single_key", |b| {
        b.iter(|| limiter.check_at(black_box("203.0.113.1"), now))
    });

    let keys: Vec<String> = (0..1024).map(|i| format!("10.0.{}.{}", i / 256, i % 256)).collect();
    let mut idx = 0usize;
    c.bench_function("rate_limit_1024_keys", |b| {
        b.iter(|| {
            idx = (idx + 1) % keys.len();
            limiter.check_at(black_box(&keys[idx]), now)
        })
    });
}

fn bench_validate(c: &mut Criterion) {
    let small = json!({"code": "def f(): pass"}).to_string();
    let large = json!({ "code": "x = 1\n".repeat(16_000) }).to_string();
    c.bench_function("validate_small", |b| {
        b.iter(|| parse_body(black_box(small.as_bytes())))
    });
    c.bench_function("validate_near_limit", |b| {
        b.iter(|| parse_body(black_box(large.as_bytes())))
    });
}

fn bench_normalize(c: &mut Criterion) {
    let findings: Vec<_> = (0..32)
        .map(|i| json!({"label": format!("f{}", i), "evidence": "seen at line 3", "confidence": 0.5}))
        .collect();
    let payload = json!({
        "decision": "needs more info",
        "summary": "Several concerns",
        "findings": findings
    });
    c.bench_function("normalize_32_findings", |b| {
        b.iter(|| normalize(black_box(payload.clone())))
    });
}

criterion_group!(benches, bench_rate_limiter, bench_validate, bench_normalize);
criterion_main!(benches);
