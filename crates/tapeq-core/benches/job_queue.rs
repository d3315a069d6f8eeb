use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use tapeq_core::{
    InsertDate, Job, JobQueue, NoopHooks, ObjectName, OrderKey, QueryCollection, QueryRecord, WorkerPool,
    WorkerPoolOptions,
};

fn synthetic_cost(job_index: usize) -> usize {
    match job_index % 4 {
        0 => 400,
        1 => 250,
        2 => 140,
        _ => 60,
    }
}

fn simulate_work(cost: usize) -> u64 {
    let mut acc = 0x9E37_79B9_7F4A_7C15u64 ^ (cost as u64);
    for i in 0..(cost * 32) {
        acc = acc
            .wrapping_mul(6364136223846793005)
            .wrapping_add(i as u64 + 1442695040888963407);
    }
    acc
}

fn run_shared_queue(jobs: &[usize], num_workers: usize) -> u64 {
    let queue = Arc::new(JobQueue::new());
    for &job in jobs {
        queue.enqueue(job).expect("enqueue should succeed");
    }

    let checksum = Arc::new(AtomicU64::new(0));
    let mut handles = Vec::with_capacity(num_workers);
    for _ in 0..num_workers.max(1) {
        let queue = Arc::clone(&queue);
        let checksum = Arc::clone(&checksum);
        handles.push(thread::spawn(move || {
            while let Some(cost) = queue.dequeue() {
                checksum.fetch_xor(simulate_work(cost), Ordering::AcqRel);
            }
        }));
    }

    for handle in handles {
        handle.join().expect("queue consumer panicked");
    }

    checksum.load(Ordering::Acquire)
}

fn run_worker_pool(jobs: &[usize], num_workers: usize) -> u64 {
    let options = WorkerPoolOptions {
        idle_poll_interval: Duration::from_millis(5),
        controller_tick: Duration::from_millis(1),
        ..WorkerPoolOptions::default()
    };
    let pool = WorkerPool::with_options(num_workers.max(1), NoopHooks, options)
        .expect("pool should start");

    let checksum = Arc::new(AtomicU64::new(0));
    for &cost in jobs {
        let checksum = Arc::clone(&checksum);
        pool.add_work(Job::new(move |_worker| {
            checksum.fetch_xor(simulate_work(cost), Ordering::AcqRel);
            Ok(())
        }))
        .expect("pool should accept work");
    }

    pool.join().expect("pool should drain cleanly");
    checksum.load(Ordering::Acquire)
}

fn build_restore_plan(count: usize) -> usize {
    let mut queries = QueryCollection::new().expect("collection should allocate");
    for index in 0..count {
        let record = QueryRecord::new(
            ObjectName::new("/lustre", "/bench", format!("/{index:08}")),
            InsertDate::new(2024, 1, 1, 0, 0, (index % 60) as u8),
            OrderKey::new((index % 7) as u16, 0, 0, (index % 13) as u32, index as u32),
            index,
        );
        queries.add(record, true).expect("keys are ascending");
    }
    queries.sort_for_locality();
    queries.len()
}

fn bench_job_queue(c: &mut Criterion) {
    let workers = num_cpus::get().clamp(2, 8);
    let jobs: Vec<usize> = (0..512).map(synthetic_cost).collect();

    let mut group = c.benchmark_group("job_queue");
    group.throughput(Throughput::Elements(jobs.len() as u64));

    group.bench_function("shared_queue", |b| {
        b.iter(|| black_box(run_shared_queue(&jobs, workers)))
    });

    group.bench_function("worker_pool", |b| {
        b.iter(|| black_box(run_worker_pool(&jobs, workers)))
    });

    group.finish();

    let mut group = c.benchmark_group("query_collection");
    group.throughput(Throughput::Elements(10_000));
    group.bench_function("dedup_and_sort", |b| {
        b.iter(|| black_box(build_restore_plan(10_000)))
    });
    group.finish();
}

criterion_group!(benches, bench_job_queue);
criterion_main!(benches);
