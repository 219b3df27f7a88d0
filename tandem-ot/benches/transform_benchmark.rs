use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use tandem_ot::{apply, diff, transform, DocumentEngine, Operation};

fn sample_content(len: usize) -> String {
    "lorem ipsum dolor sit amet ".chars().cycle().take(len).collect()
}

fn bench_transform(c: &mut Criterion) {
    let mut group = c.benchmark_group("OT Algebra");
    group.throughput(Throughput::Elements(1));

    let a = Operation::Insert {
        position: 40,
        text: "abc".to_string(),
        client: "a1".to_string(),
        version: 0,
    };
    let b = Operation::Delete {
        position: 20,
        length: 30,
        client: "b2".to_string(),
        version: 0,
    };

    group.bench_function("transform_insert_delete", |bch| {
        bch.iter(|| black_box(transform(black_box(&a), black_box(&b))))
    });

    group.finish();
}

fn bench_apply_and_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("OT Algebra");
    group.throughput(Throughput::Elements(1));

    let content = sample_content(4096);
    let op = Operation::Insert {
        position: 2048,
        text: "x".to_string(),
        client: "a1".to_string(),
        version: 0,
    };
    group.bench_function("apply_insert_4k", |b| {
        b.iter(|| apply(black_box(&content), black_box(&op)).unwrap())
    });

    let edited = apply(&content, &op).unwrap();
    group.bench_function("diff_4k", |b| {
        b.iter(|| black_box(diff(black_box(&content), black_box(&edited), "a1")))
    });

    group.finish();
}

fn bench_engine_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("Document Engine");
    group.throughput(Throughput::Elements(1));

    group.bench_function("process_update_typing", |b| {
        let mut engine = DocumentEngine::new();
        let mut buffer = String::new();
        let mut version = 0u64;
        b.iter(|| {
            buffer.push('x');
            let up = engine.process_update("a1", &buffer, version).unwrap();
            version = up.version;
            black_box(up.version)
        })
    });

    group.finish();
}

criterion_group!(benches, bench_transform, bench_apply_and_diff, bench_engine_update);
criterion_main!(benches);
