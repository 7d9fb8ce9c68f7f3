use criterion::{black_box, criterion_group, criterion_main, Criterion};
use poolhttpd::date::http_date_now;
use poolhttpd::{HttpParser, Method, PathResolver, Response, Status};
use std::fs;

fn benchmark_http_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("http_parser");

    group.bench_function("parse_simple_request", |b| {
        b.iter(|| {
            let request = HttpParser::parse(black_box("GET / HTTP/1.0\r\nHost: localhost")).unwrap();
            assert_eq!(request.method, Method::Get);
        })
    });

    group.bench_function("parse_encoded_request", |b| {
        b.iter(|| {
            let request =
                HttpParser::parse(black_box("GET /some%20dir/file%2Ename.html?x=1 HTTP/1.0")).unwrap();
            assert_eq!(request.path, "/some dir/file.name.html");
        })
    });

    group.finish();
}

fn benchmark_path_resolution(c: &mut Criterion) {
    let root = std::env::temp_dir().join(format!("poolhttpd-bench-{}", std::process::id()));
    fs::create_dir_all(root.join("a").join("b")).unwrap();
    fs::write(root.join("a").join("b").join("index.html"), b"<html></html>").unwrap();
    let resolver = PathResolver::new(&root).unwrap();

    let mut group = c.benchmark_group("path_resolver");

    group.bench_function("resolve_existing", |b| {
        b.iter(|| resolver.resolve(black_box("/a/b/")).unwrap())
    });

    group.bench_function("resolve_traversal", |b| {
        b.iter(|| resolver.resolve(black_box("/a/../../etc/passwd")).is_err())
    });

    group.finish();
    fs::remove_dir_all(root).unwrap();
}

fn benchmark_response(c: &mut Criterion) {
    let mut group = c.benchmark_group("response");

    group.bench_function("http_date", |b| b.iter(http_date_now));

    group.bench_function("serialize_error", |b| {
        b.iter(|| {
            let response = Response::error(black_box(Status::NotFound), "bench");
            response.to_bytes().unwrap()
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_http_parsing,
    benchmark_path_resolution,
    benchmark_response
);
criterion_main!(benches);
