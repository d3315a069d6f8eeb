use std::collections::BTreeSet;
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tapeq_core::JobQueue;

#[test]
fn single_consumer_sees_fifo_order() -> Result<(), Box<dyn std::error::Error>> {
    let queue = JobQueue::new();

    queue.enqueue("j1")?;
    queue.enqueue("j2")?;
    queue.enqueue("j3")?;

    assert_eq!(queue.len(), 3);
    assert_eq!(queue.dequeue(), Some("j1"));
    assert_eq!(queue.dequeue(), Some("j2"));
    assert_eq!(queue.dequeue(), Some("j3"));
    assert_eq!(queue.dequeue(), None);
    assert!(queue.is_empty());
    Ok(())
}

#[test]
fn empty_queue_returns_none() {
    let queue = JobQueue::<u32>::new();

    assert_eq!(queue.dequeue(), None);
    assert_eq!(queue.dequeue(), None);
}

#[test]
fn clear_discards_pending_jobs() -> Result<(), Box<dyn std::error::Error>> {
    let queue = JobQueue::new();
    for id in 0..5u32 {
        queue.enqueue(id)?;
    }

    assert_eq!(queue.clear(), 5);
    assert!(queue.is_empty());
    assert_eq!(queue.clear(), 0);
    Ok(())
}

#[test]
fn concurrent_consumers_never_lose_or_duplicate_jobs() -> Result<(), Box<dyn std::error::Error>> {
    let queue = Arc::new(JobQueue::new());
    for id in 0..2_000usize {
        queue.enqueue(id)?;
    }

    let mut handles = Vec::new();
    for _ in 0..4 {
        let queue = Arc::clone(&queue);
        handles.push(thread::spawn(move || {
            let mut taken = Vec::new();
            while let Some(id) = queue.dequeue() {
                taken.push(id);
            }
            taken
        }));
    }

    let mut seen = BTreeSet::new();
    let mut total = 0;
    for handle in handles {
        let taken = handle
            .join()
            .map_err(|_| io::Error::other("consumer thread panicked"))?;
        // Each consumer observes its own jobs in enqueue order.
        assert!(taken.windows(2).all(|pair| pair[0] < pair[1]));
        total += taken.len();
        seen.extend(taken);
    }

    assert_eq!(total, 2_000);
    assert_eq!(seen.len(), 2_000);
    Ok(())
}

#[test]
fn wait_for_work_returns_immediately_when_jobs_pending() -> Result<(), Box<dyn std::error::Error>> {
    let queue = JobQueue::new();
    queue.enqueue(1u8)?;

    let started = Instant::now();
    queue.wait_for_work(Duration::from_secs(5));

    assert!(started.elapsed() < Duration::from_secs(1));
    Ok(())
}

#[test]
fn wait_for_work_times_out_on_empty_queue() {
    let queue = JobQueue::<u8>::new();

    let started = Instant::now();
    queue.wait_for_work(Duration::from_millis(20));

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(queue.dequeue(), None);
}

#[test]
fn enqueue_wakes_waiting_consumer() -> Result<(), Box<dyn std::error::Error>> {
    let queue = Arc::new(JobQueue::new());
    let waiter_queue = Arc::clone(&queue);

    let waiter = thread::spawn(move || {
        let started = Instant::now();
        while waiter_queue.is_empty() {
            waiter_queue.wait_for_work(Duration::from_secs(10));
        }
        (started.elapsed(), waiter_queue.dequeue())
    });

    thread::sleep(Duration::from_millis(20));
    queue.enqueue(7u32)?;

    let (elapsed, job) = waiter
        .join()
        .map_err(|_| io::Error::other("waiter thread panicked"))?;
    assert_eq!(job, Some(7));
    assert!(elapsed < Duration::from_secs(5));
    Ok(())
}
