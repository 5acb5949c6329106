use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, ValueEnum};
use jobgraph::{Context, DataSizeSplitter, JobError, JobHandle, JobSystem, SchedulerConfig, config::MAX_JOB_COUNT};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Workload {
    /// Create, run and wait on each job in turn.
    Independent,
    /// One root job with many children, awaited once.
    Children,
    /// A parallel-for over a particle buffer.
    ParallelFor,
}

#[derive(Debug, Parser)]
#[command(about = "Runs a workload on the job system and prints per-worker job counts")]
struct Args {
    /// Workload to run.
    #[arg(long, value_enum, default_value = "children")]
    workload: Workload,

    /// Total number of workers, including the main thread.
    #[arg(long, default_value_t = jobgraph::config::DEFAULT_WORKER_COUNT)]
    workers: usize,

    /// Number of jobs for the independent and children workloads.
    #[arg(long, default_value_t = MAX_JOB_COUNT - 1)]
    jobs: usize,

    /// Number of particles for the parallel-for workload.
    #[arg(long, default_value_t = 100_000)]
    particles: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct Particle {
    position: [f32; 3],
    velocity: [f32; 3],
}

fn update_particles(particles: &mut [Particle]) {
    const DT: f32 = 1.0 / 60.0;
    for particle in particles {
        for axis in 0..3 {
            particle.position[axis] += particle.velocity[axis] * DT;
        }
    }
}

fn empty_job(_: &Context<'_>, _: JobHandle<'_>) {}

fn run_workload(ctx: &Context<'_>, args: &Args) -> Result<(), JobError> {
    match args.workload {
        Workload::Independent => {
            for _ in 0..args.jobs {
                let job = ctx.run(ctx.create_job(empty_job)?)?;
                ctx.wait(job);
            }
        }
        Workload::Children => {
            let root = ctx.create_job(empty_job)?;
            for _ in 0..args.jobs {
                ctx.run(ctx.create_job_as_child(root.handle(), empty_job)?)?;
            }
            let root = ctx.run(root)?;
            ctx.wait(root);
        }
        Workload::ParallelFor => {
            let mut particles: Vec<Particle> = (0..args.particles)
                .map(|i| Particle {
                    position: [0.0; 3],
                    velocity: [i as f32, 1.0, -1.0],
                })
                .collect();
            ctx.parallel_for_slice(&mut particles, update_particles, DataSizeSplitter::new(32 * 1024))?;
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = SchedulerConfig::default().with_workers(args.workers);

    let job_system = match JobSystem::new(config) {
        Ok(job_system) => job_system,
        Err(err) => {
            eprintln!("Failed to create job system: {err}");
            return ExitCode::FAILURE;
        }
    };
    println!(
        "Initialized job system with {} workers ({:?} workload)\n",
        job_system.num_workers(),
        args.workload
    );

    let result = job_system.start().and_then(|ctx| {
        let start = Instant::now();
        run_workload(&ctx, &args)?;
        println!("Time: {:?}", start.elapsed());
        Ok(())
    });
    if let Err(err) = result {
        eprintln!("Workload failed: {err}");
        return ExitCode::FAILURE;
    }

    for i in 0..job_system.num_workers() {
        if let Some(worker) = job_system.worker(i) {
            println!("{} jobs done: {}", worker.name(), worker.jobs_done());
        }
    }
    println!("Total jobs done: {}", job_system.total_jobs_done());

    match job_system.shutdown() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Shutdown error: {err}");
            ExitCode::FAILURE
        }
    }
}
