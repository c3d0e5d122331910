use changeq::{ChangeWriter, OpCode, SharedBuf, StringInterner, Value};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;

// 64 KiB body fits 2340 SetMetricAttr records (28 bytes each); fill a round
// 2048 per iteration, then hand the region back like a draining consumer.
const RECORDS_PER_FILL: usize = 2048;

fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("append");
    group.throughput(Throughput::Elements(RECORDS_PER_FILL as u64));

    group.bench_function("set_metric_attr", |b| {
        let queue = Arc::new(SharedBuf::new(64 * 1024));
        let table = Arc::new(SharedBuf::new(4 * 1024));
        let mut writer = ChangeWriter::new(Arc::clone(&queue));
        let mut interner = StringInterner::new(table);

        b.iter(|| {
            for i in 0..RECORDS_PER_FILL {
                writer
                    .append(
                        &mut interner,
                        OpCode::SetMetricAttr,
                        black_box(i as u64 + 1),
                        &[Value::Str("request.size"), Value::F64(1.5)],
                    )
                    .unwrap();
            }
            // Simulated consumer drain; the next append reconciles.
            queue.reset();
        });
    });

    group.finish();
}

criterion_group!(benches, bench_append);
criterion_main!(benches);
