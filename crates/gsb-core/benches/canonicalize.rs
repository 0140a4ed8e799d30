//! Canonicalization and prefix derivation throughput.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use gsb_core::hash::{host_keys, url_prefixes};
use gsb_core::url::{canonicalize_bytes, TEST_VECTORS};

fn bench_canonicalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("canonicalize");
    group.throughput(Throughput::Elements(TEST_VECTORS.len() as u64));

    group.bench_function("published_vectors", |b| {
        b.iter(|| {
            for (input, _) in TEST_VECTORS {
                black_box(canonicalize_bytes(black_box(input)));
            }
        })
    });
    group.finish();
}

fn bench_prefixes(c: &mut Criterion) {
    let form = canonicalize_bytes(b"http://a.b.c.d.e.f.g/1/2/3/4/5/6.html?q=1");

    c.bench_function("host_keys", |b| b.iter(|| black_box(host_keys(&form.host, form.is_ip))));
    c.bench_function("url_prefixes", |b| b.iter(|| black_box(url_prefixes(&form))));
}

criterion_group!(benches, bench_canonicalize, bench_prefixes);
criterion_main!(benches);
