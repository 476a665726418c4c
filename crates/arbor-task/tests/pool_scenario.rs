//! Pool under load: bounded execution, then cancel everything at once.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use arbor_core::TaskState;
use arbor_resource::{BusyLevelEstimator, FixedSampler};
use arbor_scheduler::{Scheduler, SchedulerConfig};
use arbor_task::{ControllableThreadPool, PoolConfig, TaskContext};

fn scheduler() -> Arc<Scheduler> {
    let estimator = BusyLevelEstimator::new(Box::new(FixedSampler::unavailable()));
    Arc::new(Scheduler::new(Arc::new(estimator), &SchedulerConfig::default()).expect("scheduler"))
}

#[test]
fn test_twenty_five_long_tasks_then_cancel_all() {
    let pool = ControllableThreadPool::new(PoolConfig::sized(5, 20, 1000), scheduler()).unwrap();
    let started = Arc::new(AtomicUsize::new(0));
    let exited = Arc::new(AtomicUsize::new(0));

    let ids: Vec<String> = (0..25)
        .map(|_| {
            let started = Arc::clone(&started);
            let exited = Arc::clone(&exited);
            pool.submit(move |ctx: &TaskContext| -> anyhow::Result<()> {
                started.fetch_add(1, Ordering::SeqCst);
                let outcome = (|| -> anyhow::Result<()> {
                    for _ in 0..2_000 {
                        ctx.checkpoint()?;
                        thread::sleep(Duration::from_millis(5));
                    }
                    Ok(())
                })();
                exited.fetch_add(1, Ordering::SeqCst);
                outcome
            })
            .unwrap()
        })
        .collect();

    let mut peak = 0;
    let observe_until = Instant::now() + Duration::from_millis(300);
    while Instant::now() < observe_until {
        peak = peak.max(pool.running_count());
        thread::sleep(Duration::from_millis(10));
    }
    assert!(peak <= 20, "{peak} tasks running at once");
    assert_eq!(peak, 20, "pool should fill every slot");
    assert_eq!(started.load(Ordering::SeqCst), 20);

    let mut cancelled = pool.cancel_all();
    cancelled.sort();
    let mut expected = ids.clone();
    expected.sort();
    assert_eq!(cancelled, expected);

    for id in &ids {
        assert_eq!(pool.state(id), Some(TaskState::Cancelled));
    }

    // workers reach their next checkpoint within one watchdog interval
    let deadline = Instant::now() + Duration::from_millis(150);
    while exited.load(Ordering::SeqCst) < started.load(Ordering::SeqCst) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(
        exited.load(Ordering::SeqCst),
        started.load(Ordering::SeqCst),
        "workers still running after cancel"
    );
    assert_eq!(started.load(Ordering::SeqCst), 20, "queued tasks must not start after cancel");
    assert!(pool.shutdown(Duration::from_secs(1)));
}
