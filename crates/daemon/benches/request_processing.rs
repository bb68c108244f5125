//! Performance benchmarks for request processing.
//!
//! These benchmarks measure the hot paths in the daemon:
//! - Request line parsing
//! - Response rendering
//! - Dispatch of rejected requests

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use prussd::protocol::{Command, ErrorCode, Response};
use prussd::{Config, Dispatcher};

/// Benchmark request line parsing.
fn bench_command_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("command_parse");

    let lines = [
        ("unit_command", "STATE_0"),
        ("load", "LOAD_1 /lib/firmware/am335x-pru1-fw"),
        ("eventwait", "EVENTWAIT rpmsg_pru 31 10"),
        ("unknown", "FOO BAR"),
    ];

    for (name, line) in lines {
        group.throughput(Throughput::Bytes(line.len() as u64));
        group.bench_function(name, |b| b.iter(|| Command::parse(black_box(line))));
    }

    // Long message (many words)
    let long_message = format!("SENDMSG rpmsg_pru 30 {}", vec!["word"; 500].join(" "));
    group.throughput(Throughput::Bytes(long_message.len() as u64));
    group.bench_function("sendmsg_500_words", |b| {
        b.iter(|| Command::parse(black_box(&long_message)))
    });

    group.finish();
}

/// Benchmark response rendering.
fn bench_response_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("response_render");

    let regs = Response::Text("R0: 0x00000000\n".repeat(32));
    group.bench_function("text_regs", |b| b.iter(|| black_box(&regs).to_string()));

    let done = Response::Done;
    group.bench_function("done", |b| b.iter(|| black_box(&done).to_string()));

    let error = Response::Error(ErrorCode::Permission);
    group.bench_function("error", |b| b.iter(|| black_box(&error).to_string()));

    group.bench_function("parse_status", |b| b.iter(|| Response::parse(black_box("-19"))));

    group.finish();
}

/// Benchmark dispatching requests that fail before touching the kernel.
fn bench_dispatch_rejected(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let dispatcher = Dispatcher::new(&Config::default());

    let mut group = c.benchmark_group("dispatch_rejected");

    group.bench_function("invalid_argument", |b| {
        b.iter(|| runtime.block_on(dispatcher.dispatch_line(black_box("ENABLE_x"))))
    });

    group.bench_function("channel_not_allowed", |b| {
        b.iter(|| runtime.block_on(dispatcher.dispatch_line(black_box("GETMSG ttyS 0"))))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_command_parse,
    bench_response_render,
    bench_dispatch_rejected,
);

criterion_main!(benches);
