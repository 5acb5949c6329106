use jobgraph::{JobError, JobSystem, SchedulerConfig, WorkerAffinity, WorkerStatus};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_shutdown_with_queued_jobs() {
    let job_system = JobSystem::new(SchedulerConfig::default().with_workers(2).with_job_capacity(64)).unwrap();
    let ctx = job_system.start().unwrap();

    // Submit jobs and stop without waiting; queued jobs are simply dropped.
    for _ in 0..10 {
        let job = ctx
            .create_job(|_, _| {
                std::thread::sleep(Duration::from_millis(5));
            })
            .unwrap();
        ctx.run(job).unwrap();
    }

    drop(ctx);
    let result = job_system.shutdown();
    assert!(result.is_ok(), "Shutdown should join every worker");
}

#[test]
fn test_shutdown_without_start() {
    let job_system = JobSystem::new(SchedulerConfig::default().with_job_capacity(64)).unwrap();
    assert!(job_system.shutdown().is_ok());
}

#[test]
fn test_drop_joins_workers() {
    let job_system = JobSystem::new(SchedulerConfig::default().with_job_capacity(64)).unwrap();
    drop(job_system.start().unwrap());
    drop(job_system);
}

#[test]
fn test_stopped_workers_cannot_be_restarted() {
    let job_system = JobSystem::new(SchedulerConfig::default().with_workers(2).with_job_capacity(64)).unwrap();
    drop(job_system.start().unwrap());
    job_system.stop();

    assert_eq!(job_system.worker(0).unwrap().status(), WorkerStatus::Stopped);
    assert!(matches!(
        job_system.start_worker(0),
        Err(JobError::Stopped(_))
    ));
    assert!(matches!(job_system.attach(1), Err(JobError::Stopped(_))));
    job_system.shutdown().expect("Shutdown failed");
}

#[test]
fn test_start_workers_one_at_a_time() {
    let job_system = JobSystem::builder(SchedulerConfig::default().with_job_capacity(64))
        .worker("Worker_0", WorkerAffinity::Background, true)
        .worker("Worker_1", WorkerAffinity::Background, true)
        .worker("Worker_MAIN", WorkerAffinity::Main, true)
        .build()
        .unwrap();

    job_system.start_worker(1).unwrap();
    assert_eq!(job_system.worker(0).unwrap().status(), WorkerStatus::Suspended);
    assert_eq!(job_system.worker(1).unwrap().status(), WorkerStatus::Running);

    // Only worker 1 runs alongside the main thread.
    let ctx = job_system.attach(2).unwrap();
    let job = ctx.run(ctx.create_job(|_, _| {}).unwrap()).unwrap();
    ctx.wait(job);
    assert_eq!(job_system.worker(0).unwrap().jobs_done(), 0);

    drop(ctx);
    job_system.shutdown().expect("Shutdown failed");
}

#[test]
fn test_shutdown_releases_abandoned_jobs() {
    let state = Arc::new(());
    // Main worker only: nothing runs the queued job once the context is gone.
    let job_system = JobSystem::new(SchedulerConfig::default().with_workers(1).with_job_capacity(64)).unwrap();
    let ctx = job_system.start().unwrap();

    let captured = state.clone();
    let queued = ctx
        .create_job(move |_, _| {
            drop(captured);
        })
        .unwrap();
    ctx.run(queued).unwrap();

    let captured = state.clone();
    let root = ctx.create_job(|_, _| {}).unwrap();
    let unrun = ctx
        .create_job_as_child(root.handle(), move |_, _| {
            drop(captured);
        })
        .unwrap();
    assert_eq!(Arc::strong_count(&state), 3);

    // Dropping a pending job releases its capture right away.
    drop(unrun);
    drop(root);
    assert_eq!(Arc::strong_count(&state), 2);

    drop(ctx);
    job_system.shutdown().expect("Shutdown failed");
    assert_eq!(Arc::strong_count(&state), 1);
}
