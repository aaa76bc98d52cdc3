//! Benchmarks for smb-walker
//!
//! Run with: cargo bench

use criterion::{criterion_group, criterion_main, Criterion};
use smb_walker::smb::{Connector, Dirent, EntryKind, MemoryShare};
use smb_walker::walker::{child_file_path, classify, completion_channel, WalkOptions, Walker};
use std::hint::black_box;

fn benchmark_classify(c: &mut Criterion) {
    let entries = [
        Dirent::new(".", EntryKind::Directory),
        Dirent::new("..", EntryKind::Directory),
        Dirent::new("reports", EntryKind::Directory),
        Dirent::new("q3.xlsx", EntryKind::File),
        Dirent::new("latest", EntryKind::Other),
    ];

    c.bench_function("classify_and_compose", |b| {
        b.iter(|| {
            for entry in &entries {
                black_box(classify(black_box(entry)));
                black_box(child_file_path("smb://server/share/dept/", &entry.name));
            }
        })
    });
}

fn benchmark_memory_walk(c: &mut Criterion) {
    let mut builder = MemoryShare::builder("smb://localhost");
    for d in 0..4 {
        for f in 0..8 {
            builder = builder.file(format!("smb://localhost/public/{}/{}", d, f), vec![0u8; 4096]);
        }
    }
    let share = builder.build();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap();

    for (name, max_in_flight) in [("walk_4x8_unbounded", None), ("walk_4x8_bounded_16", Some(16))] {
        c.bench_function(name, |b| {
            b.iter(|| {
                runtime.block_on(async {
                    let (signals, mut aggregator) = completion_channel();
                    let walker = Walker::new(
                        WalkOptions {
                            max_in_flight,
                            ..Default::default()
                        },
                        signals,
                    );
                    for id in 0..4 {
                        walker.walk(share.connect(id).await.unwrap(), "smb://localhost/public/");
                    }
                    drop(walker);
                    black_box(aggregator.wait_until_settled(4).await.unwrap());
                })
            })
        });
    }
}

criterion_group!(benches, benchmark_classify, benchmark_memory_walk);
criterion_main!(benches);
