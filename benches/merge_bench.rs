use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use mergetree_core::{MergeClient, MergeTreeOptions, Perspective, SequencedOp, Snapshot};

fn client(id: &str) -> MergeClient {
    MergeClient::new(id, MergeTreeOptions::default()).unwrap()
}

/// Type `ops` characters, acknowledging each one as it is sequenced
fn typed_doc(ops: usize) -> (MergeClient, Vec<SequencedOp>) {
    let mut doc = client("client1");
    let mut log = Vec::with_capacity(ops);
    for i in 0..ops {
        doc.insert_text(i, "a").unwrap();
        let seq = i as u64 + 1;
        for op in doc.take_outbound() {
            let op = op.sequence(seq, "client1", seq - 1);
            doc.apply_remote(&op).unwrap();
            log.push(op);
        }
    }
    (doc, log)
}

/// Benchmark single local insert
fn bench_single_insert(c: &mut Criterion) {
    c.bench_function("merge_single_insert", |b| {
        b.iter(|| {
            let mut doc = client("client1");
            black_box(doc.insert_text(0, "a").unwrap());
        });
    });
}

/// Benchmark sequential typing with every keystroke pending
fn bench_sequential_typing(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_sequential_typing");

    for size in [10, 100, 1000, 10000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let mut doc = client("client1");
                for i in 0..size {
                    black_box(doc.insert_text(i, "a").unwrap());
                }
            });
        });
    }

    group.finish();
}

/// Benchmark typing with acks and window advance after every keystroke
fn bench_acked_typing(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_acked_typing");
    group.sample_size(10);

    for ops in [1000, 10000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(ops), ops, |b, &ops| {
            b.iter(|| {
                let (doc, _) = typed_doc(ops);
                assert_eq!(doc.length(), ops);
            });
        });
    }

    group.finish();
}

/// Benchmark replaying a remote op stream into a fresh replica
fn bench_remote_apply(c: &mut Criterion) {
    let (_, log) = typed_doc(1000);

    c.bench_function("merge_remote_apply_1000_ops", |b| {
        b.iter(|| {
            let mut replica = client("client2");
            for op in &log {
                replica.apply_remote(op).unwrap();
            }
            black_box(replica.length());
        });
    });
}

/// Benchmark a range removal over a fragmented document
fn bench_remove(c: &mut Criterion) {
    c.bench_function("merge_remove_1000_segments", |b| {
        b.iter_batched(
            || {
                let mut doc = client("client1");
                for i in 0..1000 {
                    doc.insert_text(i, "a").unwrap();
                }
                doc
            },
            |mut doc| {
                doc.remove(0, 1000).unwrap();
                black_box(doc.length());
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

/// Benchmark length lookups inside the collaboration window
fn bench_length_at(c: &mut Criterion) {
    let mut doc = client("client1");
    for i in 0..1000u64 {
        doc.insert_text(i as usize, "a").unwrap();
        for op in doc.take_outbound() {
            doc.apply_remote(&op.sequence(i + 1, "client1", 0)).unwrap();
        }
    }

    c.bench_function("merge_length_at_window_1000", |b| {
        b.iter(|| {
            for seq in (0..=1000).step_by(100) {
                black_box(doc.tree().length_at(&Perspective::at(seq)));
            }
        });
    });
}

/// Benchmark compaction after a mass removal
fn bench_compaction(c: &mut Criterion) {
    c.bench_function("merge_compact_1000_tombstones", |b| {
        b.iter_batched(
            || {
                let mut options = MergeTreeOptions::default();
                options.compact_on_advance = false;
                let mut doc = MergeClient::new("client1", options).unwrap();
                for i in 0..1000u64 {
                    doc.insert_text(i as usize, "a").unwrap();
                    for op in doc.take_outbound() {
                        doc.apply_remote(&op.sequence(i + 1, "client1", i)).unwrap();
                    }
                }
                doc.remove(0, 1000).unwrap();
                for op in doc.take_outbound() {
                    doc.apply_remote(&op.sequence(1001, "client1", 1000)).unwrap();
                }
                doc.insert_text(0, "b").unwrap();
                for op in doc.take_outbound() {
                    doc.apply_remote(&op.sequence(1002, "client1", 1002)).unwrap();
                }
                doc
            },
            |mut doc| {
                black_box(doc.compact());
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

/// Benchmark snapshot serialization
fn bench_snapshot(c: &mut Criterion) {
    let (doc, _) = typed_doc(10000);

    c.bench_function("merge_snapshot_10k_doc", |b| {
        b.iter(|| {
            black_box(doc.snapshot().to_json().unwrap());
        });
    });

    let json = doc.snapshot().to_json().unwrap();
    c.bench_function("merge_load_snapshot_10k_doc", |b| {
        b.iter(|| {
            let snapshot = Snapshot::from_json(&json).unwrap();
            black_box(
                MergeClient::from_snapshot("client2", &snapshot, MergeTreeOptions::default())
                    .unwrap(),
            );
        });
    });
}

criterion_group!(
    benches,
    bench_single_insert,
    bench_sequential_typing,
    bench_acked_typing,
    bench_remote_apply,
    bench_remove,
    bench_length_at,
    bench_compaction,
    bench_snapshot,
);

criterion_main!(benches);
