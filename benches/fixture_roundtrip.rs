//! Fixture benchmarks
//!
//! Measures request-line parsing and full request/response exchanges against
//! a running fixture, over plain TCP and TLS.
//!
//! Run with: cargo bench --bench fixture_roundtrip

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use httpbin_fixture::app::AppResult;
use httpbin_fixture::http::parser::parse_request_line;
use httpbin_fixture::{Environ, Server, StartResponse, TestClient};
use std::io::Read;
use std::time::Duration;

fn sized_body(environ: &Environ, _: &mut dyn Read, start: &mut StartResponse) -> AppResult {
    let size = environ
        .get("QUERY_STRING")
        .and_then(|q| q.parse::<usize>().ok())
        .unwrap_or(0);
    start.start("200 OK", [("Content-Type", "application/octet-stream")])?;
    Ok(vec![Bytes::from(vec![b'x'; size])])
}

fn bench_parse_request_line(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_request_line");

    group.bench_function("short", |b| {
        b.iter(|| parse_request_line(black_box("GET / HTTP/1.1")))
    });
    group.bench_function("long_target", |b| {
        let line = format!("GET /anything/{}?a=1&b=2 HTTP/1.1", "seg/".repeat(64));
        b.iter(|| parse_request_line(black_box(&line)))
    });

    group.finish();
}

fn bench_plain_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("plain_roundtrip");
    let mut server = Server::new(sized_body).unwrap();
    let running = server.scope().unwrap();
    let client = TestClient::new();

    for size in [0usize, 1024, 64 * 1024] {
        let url = running.concat(&format!("/bytes?{}", size));
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &url, |b, url| {
            b.iter(|| black_box(client.get(url).unwrap()))
        });
    }

    group.finish();
}

fn bench_tls_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("tls_roundtrip");
    let mut server = Server::secure(sized_body).unwrap();
    let running = server.scope().unwrap();
    let client = TestClient::with_client_pem().unwrap();

    let url = running.concat("/bytes?1024");
    group.bench_function("get_1k", |b| b.iter(|| black_box(client.get(&url).unwrap())));

    group.finish();
}

criterion_group!(parsing, bench_parse_request_line);

criterion_group! {
    name = roundtrips;
    config = Criterion::default()
        .measurement_time(Duration::from_secs(5))
        .sample_size(50);
    targets = bench_plain_roundtrip, bench_tls_roundtrip
}

criterion_main!(parsing, roundtrips);
