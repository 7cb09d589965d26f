//! Performance benchmarks for kubectl output parsing
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use rke2_testkit::kubectl::{parse_nodes, parse_pods};
use rke2_testkit::secrets::EncryptionStatus;

fn node_listing(count: usize) -> String {
    (0..count)
        .map(|i| {
            format!(
                "agent-{i}   Ready    <none>   {i}m   v1.31.1+rke2r1   10.10.{}.{}   <none>   Ubuntu 24.04 LTS   6.8.0-31-generic   containerd://1.7.21-k3s2\n",
                i / 250,
                i % 250
            )
        })
        .collect()
}

fn pod_listing(count: usize) -> String {
    (0..count)
        .map(|i| {
            // every tenth pod carries a restart annotation
            let restarts = if i % 10 == 0 { "1 (3m ago)" } else { "0" };
            format!(
                "kube-system   workload-{i}   1/1   Running   {restarts}   5m   10.42.{}.{}   agent-{}   <none>   <none>\n",
                i / 250,
                i % 250,
                i % 7
            )
        })
        .collect()
}

/// Benchmark node table parsing
fn bench_parse_nodes(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_nodes");

    for count in [3, 50, 500].iter() {
        let listing = node_listing(*count);
        group.throughput(Throughput::Bytes(listing.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &listing, |b, listing| {
            b.iter(|| parse_nodes(black_box(listing)))
        });
    }

    group.finish();
}

/// Benchmark pod table parsing, including restart annotation folding
fn bench_parse_pods(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_pods");

    for count in [20, 200, 2000].iter() {
        let listing = pod_listing(*count);
        group.throughput(Throughput::Bytes(listing.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &listing, |b, listing| {
            b.iter(|| parse_pods(black_box(listing)))
        });
    }

    group.finish();
}

fn bench_encryption_status(c: &mut Criterion) {
    let output = "Encryption Status: Enabled\n\
        Current Rotation Stage: reencrypt_finished\n\
        Server Encryption Hashes: All hashes match\n\
        \n\
        Active  Key Type  Name\n\
        ------  --------  ----\n \
         *      AES-CBC   aescbckey-2024-10-19T10:00:00Z\n";

    c.bench_function("encryption_status", |b| {
        b.iter(|| EncryptionStatus::parse(black_box(output)))
    });
}

criterion_group!(benches, bench_parse_nodes, bench_parse_pods, bench_encryption_status);
criterion_main!(benches);
