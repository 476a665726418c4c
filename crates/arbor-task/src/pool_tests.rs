use super::*;
use crate::task::Progress;
use arbor_resource::{BusyLevelEstimator, FixedSampler};
use arbor_scheduler::SchedulerConfig;
use std::thread;

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

fn scheduler() -> Arc<Scheduler> {
    let estimator = BusyLevelEstimator::new(Box::new(FixedSampler::unavailable()));
    Arc::new(Scheduler::new(Arc::new(estimator), &SchedulerConfig::default()).expect("scheduler"))
}

fn pool_with(config: PoolConfig) -> ControllableThreadPool {
    ControllableThreadPool::new(config, scheduler()).expect("pool")
}

fn pool(core: usize, max: usize, queue: usize) -> ControllableThreadPool {
    let mut config = PoolConfig::sized(core, max, queue);
    config.watchdog_interval_ms = 20;
    pool_with(config)
}

/// Work that runs until cancelled, up to `limit`.
fn long_running(limit: Duration) -> impl FnOnce(&TaskContext) -> anyhow::Result<()> + Send + 'static {
    move |ctx: &TaskContext| {
        let started = Instant::now();
        while started.elapsed() < limit {
            ctx.sleep(ms(10))?;
        }
        Ok(())
    }
}

fn wait_for(pool: &ControllableThreadPool, id: &str, want: TaskState) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if pool.state(id) == Some(want) {
            return true;
        }
        thread::sleep(ms(5));
    }
    false
}

#[test]
fn test_invalid_config_rejected() {
    let err = ControllableThreadPool::new(PoolConfig::sized(4, 2, 10), scheduler()).unwrap_err();
    assert!(err.to_string().contains("max_size"));
}

#[test]
fn test_submit_generates_sequential_ids() {
    let pool = pool(1, 2, 10);
    let a = pool.submit(|_| Ok(1_u8)).unwrap();
    let b = pool.submit(|_| Ok(2_u8)).unwrap();
    assert_eq!(a, "task-1");
    assert_eq!(b, "task-2");
}

#[test]
fn test_generated_id_skips_taken_id() {
    let pool = pool(1, 2, 10);
    pool.submit_with_id("task-1", |_| Ok(())).unwrap();
    assert_eq!(pool.submit(|_| Ok(())).unwrap(), "task-2");
}

#[test]
fn test_result_after_completion() {
    let pool = pool(1, 2, 10);
    let id = pool.submit(|_| Ok(vec![1_u32, 2, 3])).unwrap();
    assert_eq!(pool.wait(&id, Duration::from_secs(2)), Some(TaskState::Completed));
    assert_eq!(pool.result::<Vec<u32>>(&id).as_deref(), Some(&vec![1, 2, 3]));
    assert!(pool.error(&id).is_none());
}

#[test]
fn test_failure_is_captured() {
    let pool = pool(1, 2, 10);
    let id = pool
        .submit(|_| -> anyhow::Result<()> { anyhow::bail!("no such directory") })
        .unwrap();
    assert_eq!(pool.wait(&id, Duration::from_secs(2)), Some(TaskState::Failed));
    assert!(pool.result::<()>(&id).is_none());
    assert!(pool.error(&id).unwrap().to_string().contains("no such directory"));
}

#[test]
fn test_duplicate_and_empty_ids() {
    let pool = pool(1, 2, 10);
    pool.submit_with_id("refresh-root", long_running(ms(500))).unwrap();
    let err = pool
        .submit_with_id("refresh-root", |_| Ok(()))
        .unwrap_err();
    assert!(matches!(err, AppError::DuplicateTaskId(ref id) if id == "refresh-root"));
    assert!(matches!(
        pool.submit_with_id("", |_| Ok(())),
        Err(AppError::EmptyTaskId)
    ));
    pool.cancel("refresh-root");
}

#[test]
fn test_unknown_id() {
    let pool = pool(1, 2, 10);
    assert_eq!(pool.state("nope"), None);
    assert!(!pool.cancel("nope"));
    assert!(!pool.pause("nope"));
    assert!(!pool.resume("nope"));
    assert!(pool.result::<()>("nope").is_none());
}

#[test]
fn test_cancel_removes_from_registry() {
    let pool = pool(1, 2, 10);
    let id = pool.submit(long_running(Duration::from_secs(10))).unwrap();
    assert!(wait_for(&pool, &id, TaskState::Running));

    assert!(pool.cancel(&id));
    assert!(!pool.cancel(&id));
    assert_eq!(pool.state(&id), Some(TaskState::Cancelled));
    assert!(pool.task_info(&id).is_none());
    assert!(pool.is_empty());
}

#[test]
fn test_cancelled_id_can_be_reused() {
    let pool = pool(1, 2, 10);
    pool.submit_with_id("job", long_running(Duration::from_secs(10)))
        .unwrap();
    assert!(pool.cancel("job"));
    pool.submit_with_id("job", |_| Ok(7_i32)).unwrap();
    assert_eq!(pool.wait("job", Duration::from_secs(2)), Some(TaskState::Completed));
    assert_eq!(pool.result::<i32>("job").as_deref(), Some(&7));
}

#[test]
fn test_cancelled_history_is_bounded() {
    let mut config = PoolConfig::sized(1, 2, 10);
    config.cancelled_history = 2;
    let pool = pool_with(config);
    for id in ["a", "b", "c"] {
        pool.submit_with_id(id, long_running(Duration::from_secs(10)))
            .unwrap();
        assert!(pool.cancel(id));
    }
    assert_eq!(pool.state("a"), None);
    assert_eq!(pool.state("b"), Some(TaskState::Cancelled));
    assert_eq!(pool.state("c"), Some(TaskState::Cancelled));
}

#[test]
fn test_pause_all_and_resume_all() {
    let pool = pool(2, 4, 10);
    let a = pool.submit(long_running(ms(300))).unwrap();
    let b = pool.submit(long_running(ms(300))).unwrap();
    assert!(wait_for(&pool, &a, TaskState::Running));
    assert!(wait_for(&pool, &b, TaskState::Running));

    let mut paused = pool.pause_all();
    paused.sort();
    assert_eq!(paused, vec![a.clone(), b.clone()]);
    assert!(pool.pause_all().is_empty());
    assert_eq!(pool.running_count(), 0);

    let mut resumed = pool.resume_all();
    resumed.sort();
    assert_eq!(resumed, vec![a.clone(), b.clone()]);
    assert_eq!(pool.wait(&a, Duration::from_secs(3)), Some(TaskState::Completed));
    assert_eq!(pool.wait(&b, Duration::from_secs(3)), Some(TaskState::Completed));
}

#[test]
fn test_concurrency_bounded_by_max_size() {
    let pool = pool(1, 2, 10);
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let ids: Vec<String> = (0..6)
        .map(|_| {
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            pool.submit(move |_| {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(ms(40));
                current.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap()
        })
        .collect();
    for id in &ids {
        assert_eq!(pool.wait(id, Duration::from_secs(3)), Some(TaskState::Completed));
    }
    assert!(peak.load(Ordering::SeqCst) <= 2);
}

#[test]
fn test_queued_task_cancelled_before_start() {
    let pool = pool(1, 1, 10);
    let blocker = pool.submit(long_running(Duration::from_secs(10))).unwrap();
    assert!(wait_for(&pool, &blocker, TaskState::Running));

    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);
    let queued = pool
        .submit(move |_| {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
    assert_eq!(pool.state(&queued), Some(TaskState::Pending));
    assert!(pool.cancel(&queued));
    pool.cancel(&blocker);
    thread::sleep(ms(100));
    assert!(!ran.load(Ordering::SeqCst));
}

#[test]
fn test_reject_policy_when_queue_full() {
    let mut config = PoolConfig::sized(1, 1, 1);
    config.overflow = OverflowPolicy::Reject;
    let pool = pool_with(config);
    let running = pool.submit(long_running(Duration::from_secs(10))).unwrap();
    let queued = pool.submit(long_running(Duration::from_secs(10))).unwrap();

    let err = pool.submit(|_| Ok(())).unwrap_err();
    assert!(matches!(err, AppError::QueueFull { capacity: 1 }));
    assert_eq!(pool.len(), 2);
    pool.cancel(&queued);
    pool.cancel(&running);
}

#[test]
fn test_caller_runs_policy_when_queue_full() {
    let pool = pool(1, 1, 0);
    let running = pool.submit(long_running(Duration::from_secs(10))).unwrap();
    assert!(wait_for(&pool, &running, TaskState::Running));

    let caller = thread::current().id();
    let id = pool.submit(move |_| Ok(thread::current().id() == caller)).unwrap();
    // ran synchronously, so it is already finished
    assert_eq!(pool.state(&id), Some(TaskState::Completed));
    assert_eq!(pool.result::<bool>(&id).as_deref(), Some(&true));
    pool.cancel(&running);
}

#[test]
fn test_prune_finished_keeps_live_tasks() {
    let pool = pool(2, 4, 10);
    let done = pool.submit(|_| Ok(())).unwrap();
    let failed = pool
        .submit(|_| -> anyhow::Result<()> { anyhow::bail!("boom") })
        .unwrap();
    let live = pool.submit(long_running(Duration::from_secs(10))).unwrap();
    pool.wait(&done, Duration::from_secs(2));
    pool.wait(&failed, Duration::from_secs(2));

    assert_eq!(pool.prune_finished(), 2);
    assert_eq!(pool.state(&done), None);
    assert_eq!(pool.state(&failed), None);
    assert!(pool.state(&live).is_some());
    pool.cancel(&live);
}

#[test]
fn test_snapshot_lists_tasks_oldest_first() {
    let pool = pool(1, 2, 10);
    let a = pool.submit(|_| Ok(())).unwrap();
    thread::sleep(ms(2));
    let b = pool.submit(|_| Ok(())).unwrap();
    pool.wait(&a, Duration::from_secs(2));
    pool.wait(&b, Duration::from_secs(2));

    let snapshot = pool.snapshot();
    let ids: Vec<&str> = snapshot.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec![a.as_str(), b.as_str()]);
    let json = serde_json::to_value(&snapshot[0]).unwrap();
    assert_eq!(json["state"], "completed");
}

#[test]
fn test_shutdown_cancels_and_refuses() {
    let pool = pool(2, 4, 10);
    let id = pool.submit(long_running(Duration::from_secs(10))).unwrap();
    assert!(wait_for(&pool, &id, TaskState::Running));

    assert!(pool.shutdown(Duration::from_secs(2)));
    assert!(pool.is_shut_down());
    assert_eq!(pool.state(&id), Some(TaskState::Cancelled));
    assert!(matches!(
        pool.submit(|_| Ok(())),
        Err(AppError::PoolShutdown)
    ));
    assert!(pool.shutdown(ms(10)), "second shutdown is a no-op");
}

#[test]
fn test_shutdown_abandons_uncooperative_work() {
    let pool = pool(1, 2, 10);
    let id = pool
        .submit(|_| {
            // never reaches a checkpoint
            thread::sleep(ms(400));
            Ok(())
        })
        .unwrap();
    assert!(wait_for(&pool, &id, TaskState::Running));
    assert!(!pool.shutdown(ms(50)));
}

#[test]
fn test_remove_finished_only_drops_terminal_task() {
    let pool = pool(2, 4, 10);
    let done = pool.submit(|_| Ok(())).unwrap();
    let live = pool.submit(long_running(Duration::from_secs(10))).unwrap();
    pool.wait(&done, Duration::from_secs(2));

    assert!(!pool.remove_finished(&live));
    assert!(pool.contains(&live));
    assert!(pool.remove_finished(&done));
    assert!(!pool.contains(&done));
    assert!(!pool.remove_finished(&done));
    assert_eq!(pool.len(), 1);
    pool.cancel(&live);
}

#[test]
fn test_snapshot_carries_progress() {
    let pool = pool(1, 2, 10);
    let id = pool
        .submit(|ctx| {
            ctx.set_progress(3, 5);
            Ok(())
        })
        .unwrap();
    pool.wait(&id, Duration::from_secs(2));
    let info = pool.task_info(&id).unwrap();
    assert_eq!(info.progress, Some(Progress { done: 3, total: 5 }));
    assert_eq!(pool.snapshot()[0].progress, info.progress);
}

#[test]
fn test_core_size_does_not_cap_running_tasks() {
    let pool = pool(1, 4, 10);
    let arrived = Arc::new(AtomicUsize::new(0));
    let ids: Vec<String> = (0..4)
        .map(|_| {
            let arrived = Arc::clone(&arrived);
            pool.submit(move |_| {
                arrived.fetch_add(1, Ordering::SeqCst);
                let deadline = Instant::now() + Duration::from_secs(2);
                while arrived.load(Ordering::SeqCst) < 4 {
                    anyhow::ensure!(Instant::now() < deadline, "tasks did not overlap");
                    thread::sleep(ms(2));
                }
                Ok(())
            })
            .unwrap()
        })
        .collect();
    for id in &ids {
        assert_eq!(pool.wait(id, Duration::from_secs(3)), Some(TaskState::Completed));
    }
}
