use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use echo_service::body::{self, EchoBody};
use echo_service::common::spawn_test_server;
use echo_service::config::ServerConfig;
use echo_service::http::{ClientRequest, EchoRequest, HttpEchoClient, ResponseRecorder, serve_echo};
use tokio::runtime::Runtime;

fn sample_request(header_count: usize) -> Vec<u8> {
    let mut raw = String::from("GET /bench/path?with=query HTTP/1.1\r\nHost: bench.local\r\n");
    for i in 0..header_count {
        raw.push_str(&format!("X-Header-{i}: value-{i}\r\n"));
    }
    raw.push_str("\r\n");
    raw.into_bytes()
}

fn bench_body_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("body_codec");

    for header_count in [0, 8, 32] {
        let request = EchoRequest::parse(&sample_request(header_count)).unwrap();
        let echo = EchoBody::from_request(&request);
        let encoded = body::encode(&echo);

        group.throughput(Throughput::Bytes(encoded.len() as u64));
        group.bench_with_input(BenchmarkId::new("encode", header_count), &echo, |b, echo| {
            b.iter(|| body::encode(black_box(echo)))
        });
        group.bench_with_input(BenchmarkId::new("decode", header_count), &encoded, |b, encoded| {
            b.iter(|| body::decode(black_box(encoded)).unwrap())
        });
    }

    group.finish();
}

fn bench_serve_echo(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("serve_echo");

    let plain = EchoRequest::parse(&sample_request(8)).unwrap();
    let shaped = EchoRequest::parse(
        b"GET / HTTP/1.1\r\nHost: h\r\nExpect-Status: 201\r\nExpect-Headers: {\"X-A\":\"1\",\"X-B\":\"2\"}\r\nExpect-Chunked: 1\r\n\r\n",
    )
    .unwrap();

    for (name, request) in [("plain", &plain), ("directives", &shaped)] {
        group.bench_function(name, |b| {
            b.to_async(&rt).iter(|| async move {
                let mut recorder = ResponseRecorder::new();
                serve_echo(black_box(request), &mut recorder).await.unwrap();
                recorder
            })
        });
    }

    group.finish();
}

fn bench_http_round_trip(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let server = rt.block_on(spawn_test_server(ServerConfig::default())).unwrap();
    let mut client = rt.block_on(HttpEchoClient::connect(server.addr())).unwrap();

    let mut group = c.benchmark_group("http_round_trip");
    group.bench_function("keep_alive_get", |b| {
        b.iter(|| rt.block_on(client.get("/bench")).unwrap())
    });
    group.bench_function("expect_chunked_get", |b| {
        b.iter(|| {
            rt.block_on(client.send(ClientRequest::get("/bench").header("Expect-Chunked", "1")))
                .unwrap()
        })
    });
    group.finish();

    rt.block_on(server.shutdown()).unwrap();
}

criterion_group!(benches, bench_body_codec, bench_serve_echo, bench_http_round_trip);
criterion_main!(benches);
