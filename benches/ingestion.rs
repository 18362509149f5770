use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use soh_pipeline::execution::{CancellationToken, IngestionOptions, run_ingestion};
use soh_pipeline::ingestion::SourceHandle;

fn generated_csv(rows: usize) -> Vec<u8> {
    let mut out = String::from("Barcode,Quantity,Size,Color,Age,StyleNumber,Department,RetailPrice,BoxNumber\n");
    for i in 0..rows {
        let boxed = if i % 3 == 0 { format!("BOX{}", i % 97) } else { String::new() };
        out.push_str(&format!(
            "{:012},{},M,Blue,Adult,STY{:04},Menswear,{}.99,{}\n",
            i,
            i % 40,
            i % 500,
            10 + i % 90,
            boxed
        ));
    }
    out.into_bytes()
}

fn bench_csv_ingestion(c: &mut Criterion) {
    let mut group = c.benchmark_group("csv_ingestion");
    for rows in [10_000usize, 100_000] {
        let data = generated_csv(rows);
        group.throughput(Throughput::Elements(rows as u64));
        for batch in [1_000usize, 10_000] {
            let options = IngestionOptions {
                row_batch_size: batch,
                progress_interval_ms: 100,
                ..Default::default()
            };
            group.bench_with_input(BenchmarkId::new(format!("batch_{batch}"), rows), &data, |b, data| {
                b.iter(|| {
                    let source = SourceHandle::from_bytes("bench.csv", data.clone());
                    let outcome =
                        run_ingestion(source, &options, &CancellationToken::new(), &mut |_| {}).expect("ingest");
                    black_box(outcome.records.len())
                })
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_csv_ingestion);
criterion_main!(benches);
