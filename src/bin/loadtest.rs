use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use que::{Client, Job, WorkMap, Worker};

#[derive(Parser)]
#[command(version, about = "Loadtest for the que job queueing crate.", long_about = None)]
struct Cli {
    #[arg(short, long, default_value_t = 1_000)]
    jobs_count: usize,

    #[arg(short, long, default_value_t = 4)]
    workers_count: usize,

    #[arg(short, long, default_value = "loadtest")]
    queue: String,
}

#[tokio::main]
async fn main() -> Result<(), que::Error> {
    tracing_subscriber::fmt::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let cli = Cli::parse();
    tracing::info!(
        jobs_count = cli.jobs_count,
        workers_count = cli.workers_count,
        queue = %cli.queue,
        "running loadtest"
    );

    let client = Client::builder().connect().await?;

    let started = Instant::now();
    for _ in 0..cli.jobs_count {
        client
            .enqueue(
                &Job::builder()
                    .queue(cli.queue.as_str())
                    .job_type("Nil")
                    .build(),
            )
            .await?;
    }
    tracing::info!(elapsed = ?started.elapsed(), "enqueued");

    let worked = Arc::new(AtomicUsize::new(0));
    let started = Instant::now();

    let mut tasks = Vec::new();
    for _ in 0..cli.workers_count {
        let mut work_map = WorkMap::new();
        let worked = Arc::clone(&worked);
        work_map.insert(
            "Nil".to_string(),
            Box::new(move |_job| {
                let worked = Arc::clone(&worked);
                Box::pin(async move {
                    worked.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                })
            }),
        );

        let worker = Worker::builder()
            .queue(cli.queue.as_str())
            .build(client.clone(), work_map);
        tasks.push(tokio::spawn(async move {
            while worker.work_one().await {}
        }));
    }
    for task in tasks {
        let _ = task.await;
    }

    let worked = worked.load(Ordering::Relaxed);
    let elapsed = started.elapsed();
    tracing::info!(
        worked,
        elapsed = ?elapsed,
        jobs_per_sec = worked as f64 / elapsed.as_secs_f64(),
        "drained"
    );

    Ok(())
}
