use jobgraph::{CountSplitter, DataSizeSplitter, JobSystem, SchedulerConfig};
use std::sync::atomic::{AtomicUsize, Ordering};

fn increment(values: &mut [u32]) {
    for v in values {
        *v += 1;
    }
}

#[test]
fn test_parallel_for_covers_every_element_once() {
    let job_system = JobSystem::new(SchedulerConfig::default().with_job_capacity(4096)).unwrap();
    let ctx = job_system.start().unwrap();

    let mut values = vec![0u32; 100_000];
    ctx.parallel_for_slice(&mut values, increment, CountSplitter::new(1000))
        .unwrap();

    assert!(values.iter().all(|&v| v == 1));
}

#[test]
fn test_parallel_for_data_size_splitter() {
    let job_system = JobSystem::new(SchedulerConfig::default().with_job_capacity(4096)).unwrap();
    let ctx = job_system.start().unwrap();

    let mut values = vec![7u64; 50_001];
    ctx.parallel_for_slice(
        &mut values,
        |chunk: &mut [u64]| {
            // 32 KiB / 8 bytes per element.
            assert!(chunk.len() <= 4096);
            chunk.iter_mut().for_each(|v| *v *= 2);
        },
        DataSizeSplitter::new(32 * 1024),
    )
    .unwrap();

    assert!(values.iter().all(|&v| v == 14));
}

static LEAVES: AtomicUsize = AtomicUsize::new(0);

#[test]
fn test_leaf_ranges_respect_threshold() {
    let job_system = JobSystem::new(SchedulerConfig::default().with_job_capacity(1024)).unwrap();
    let ctx = job_system.start().unwrap();

    let mut values: Vec<usize> = (0..1024).collect();
    ctx.parallel_for_slice(
        &mut values,
        |chunk: &mut [usize]| {
            assert!(!chunk.is_empty() && chunk.len() <= 64);
            LEAVES.fetch_add(1, Ordering::SeqCst);
            chunk.iter_mut().for_each(|v| *v += 1);
        },
        CountSplitter::new(64),
    )
    .unwrap();

    // 1024 halves evenly into 16 leaves of 64.
    assert_eq!(LEAVES.load(Ordering::SeqCst), 16);
    assert!(values.iter().enumerate().all(|(i, &v)| v == i + 1));
}

#[test]
fn test_parallel_for_small_and_empty_ranges() {
    let job_system = JobSystem::new(SchedulerConfig::default().with_job_capacity(256)).unwrap();
    let ctx = job_system.start().unwrap();

    let mut empty: Vec<u32> = Vec::new();
    ctx.parallel_for_slice(&mut empty, increment, CountSplitter::new(0))
        .unwrap();

    // A zero threshold still stops at single elements.
    let mut one = vec![0u32; 3];
    ctx.parallel_for_slice(&mut one, increment, CountSplitter::new(0))
        .unwrap();
    assert_eq!(one, vec![1, 1, 1]);
}

#[test]
fn test_raw_parallel_for_job() {
    let job_system = JobSystem::new(SchedulerConfig::default().with_job_capacity(1024)).unwrap();
    let ctx = job_system.start().unwrap();

    let mut values = vec![0u32; 10_000];
    // SAFETY: `values` is not touched until the root job completed.
    let root = unsafe {
        ctx.parallel_for(values.as_mut_ptr(), values.len(), increment, CountSplitter::new(500))
            .unwrap()
    };
    assert!(!root.handle().is_complete());
    let root = ctx.run(root).unwrap();
    ctx.wait(root);

    assert!(root.is_complete());
    assert!(values.iter().all(|&v| v == 1));
}
