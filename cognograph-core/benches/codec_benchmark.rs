use cognograph_core::collab::{SharedWorkspace, WorkspaceEdit};
use cognograph_core::{EdgeRecord, NodeRecord, Point, WorkspaceSnapshot};
use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use std::hint::black_box;

fn create_test_snapshot(nodes: usize) -> WorkspaceSnapshot {
    let mut snapshot = WorkspaceSnapshot::new("bench");
    for i in 0..nodes {
        snapshot.nodes.push(
            NodeRecord::with_id(format!("n{i}"), "note", Point::new(i as f64 * 10.0, 0.0))
                .field("title", format!("Note {i}"))
                .field("content", "lorem ipsum dolor sit amet"),
        );
        if i > 0 {
            snapshot
                .edges
                .push(EdgeRecord::with_id(format!("e{i}"), format!("n{}", i - 1), format!("n{i}")));
        }
    }
    snapshot
}

fn bench_populate_and_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("Codec");
    let snapshot = create_test_snapshot(500);
    group.throughput(Throughput::Elements(snapshot.nodes.len() as u64));

    group.bench_function("populate_500_nodes", |b| {
        b.iter(|| {
            let mut shared = SharedWorkspace::new();
            black_box(shared.populate(black_box(&snapshot)));
        })
    });

    let mut shared = SharedWorkspace::new();
    shared.populate(&snapshot);
    group.bench_function("snapshot_500_nodes", |b| {
        b.iter(|| black_box(shared.snapshot_strict().unwrap()))
    });

    group.finish();
}

fn bench_local_edit(c: &mut Criterion) {
    let mut group = c.benchmark_group("CRDT Operations");
    group.throughput(Throughput::Elements(1));

    // Edits land on an ever-growing history, as in a long session.
    let mut shared = SharedWorkspace::new();
    shared.populate(&create_test_snapshot(100));
    let mut step = 0.0;
    group.bench_function("move_node_delta", |b| {
        b.iter(|| {
            step += 1.0;
            let edit = WorkspaceEdit::MoveNode {
                id: "n50".into(),
                position: Point::new(step, step),
            };
            black_box(shared.apply(&[edit]).unwrap());
        })
    });

    group.finish();
}

fn bench_apply_remote(c: &mut Criterion) {
    let mut group = c.benchmark_group("CRDT Operations");
    group.throughput(Throughput::Elements(1));

    let mut source = SharedWorkspace::new();
    let update = source.populate(&create_test_snapshot(100));

    group.bench_function("apply_remote_populate", |b| {
        b.iter(|| {
            let mut dest = SharedWorkspace::new();
            dest.apply_remote_update(black_box(&update)).unwrap();
        })
    });

    group.finish();
}

criterion_group!(benches, bench_populate_and_decode, bench_local_edit, bench_apply_remote);
criterion_main!(benches);
