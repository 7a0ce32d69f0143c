use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::Utc;
use jobline_core::{JobType, QueueName};
use jobline_scheduler::{InMemoryJobStore, Job, JobOptions, JobStore};

fn filled_store(count: usize) -> InMemoryJobStore {
    let mut store = InMemoryJobStore::new();
    for i in 0..count {
        let options = JobOptions::default().with_priority((i % 7) as i32 - 3);
        store
            .insert(Job::new(
                QueueName::Analysis,
                JobType::AnalyzeItem,
                serde_json::json!({ "item": i }),
                &options,
            ))
            .unwrap();
    }
    store
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_insert");
    group.throughput(Throughput::Elements(1));

    group.bench_function("insert_into_pending", |b| {
        let mut store = filled_store(1_000);
        b.iter(|| {
            let job = Job::new(
                QueueName::Analysis,
                JobType::AnalyzeItem,
                serde_json::json!({}),
                &JobOptions::default(),
            );
            black_box(store.insert(job).unwrap());
        });
    });

    group.finish();
}

fn bench_claim_and_settle(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_claim_and_settle");

    for pending in [10usize, 100, 1_000, 10_000].iter() {
        group.bench_with_input(
            BenchmarkId::new("claim_complete", pending),
            pending,
            |b, &pending| {
                let mut store = filled_store(pending);
                b.iter(|| {
                    let now = Utc::now();
                    let id = store
                        .claim_next(QueueName::Analysis, now, &|_| true)
                        .unwrap();
                    let job = store.get_mut(id).unwrap();
                    job.mark_active(now);

                    // Put a fresh job back so the pending set stays the same size.
                    let priority = job.priority;
                    job.mark_completed(serde_json::Value::Null, now);
                    store.settle(id).unwrap();
                    store
                        .insert(Job::new(
                            QueueName::Analysis,
                            JobType::AnalyzeItem,
                            serde_json::json!({}),
                            &JobOptions::default().with_priority(priority),
                        ))
                        .unwrap();
                });
            },
        );
    }

    group.finish();
}

fn bench_claim_skipping_unready(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_claim_skipping");

    // Every job but the lowest-priority one lacks a handler, so claim scans the whole set.
    group.bench_function("claim_last_of_1000", |b| {
        b.iter(|| {
            let mut store = filled_store(999);
            let target = store
                .insert(Job::new(
                    QueueName::Analysis,
                    JobType::custom("runnable"),
                    serde_json::json!({}),
                    &JobOptions::default().with_priority(-100),
                ))
                .unwrap();
            let runnable = |job: &Job| job.job_type == JobType::custom("runnable");
            let claimed = store.claim_next(QueueName::Analysis, Utc::now(), &runnable);
            assert_eq!(claimed, Some(target));
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_insert,
    bench_claim_and_settle,
    bench_claim_skipping_unready
);
criterion_main!(benches);
