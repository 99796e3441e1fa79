use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::utils;
use que::{Client, DelayFn, Job, WorkMap, Worker};

#[tokio::test]
async fn work_one_runs_a_job_to_completion() {
    let queue = utils::unique_queue("work_one");
    let pool = utils::create_pool(5).await;
    let c = Client::builder().with_pool(pool.clone()).await.unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let mut work_map = WorkMap::new();
    let handler_calls = Arc::clone(&calls);
    work_map.insert(
        "MyJob".to_string(),
        Box::new(move |_job| {
            let calls = Arc::clone(&handler_calls);
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }),
    );
    let w = Worker::builder()
        .queue(queue.as_str())
        .build(c.clone(), work_map);

    assert!(!w.work_one().await, "no job queued yet");

    c.enqueue(&Job {
        queue: queue.clone(),
        job_type: "MyJob".to_string(),
        ..Default::default()
    })
    .await
    .unwrap();

    assert!(w.work_one().await);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(utils::find_one_job(&pool, &queue).await.is_none());
}

#[tokio::test]
async fn handler_error_is_recorded_and_rescheduled() {
    let queue = utils::unique_queue("work_error");
    let pool = utils::create_pool(5).await;
    let c = Client::builder().with_pool(pool.clone()).await.unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let mut work_map = WorkMap::new();
    let handler_calls = Arc::clone(&calls);
    work_map.insert(
        "MyJob".to_string(),
        Box::new(move |_job| {
            let calls = Arc::clone(&handler_calls);
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("the error msg".into())
            })
        }),
    );
    let w = Worker::builder()
        .queue(queue.as_str())
        .build(c.clone(), work_map);

    c.enqueue(&Job {
        queue: queue.clone(),
        job_type: "MyJob".to_string(),
        ..Default::default()
    })
    .await
    .unwrap();

    assert!(w.work_one().await);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let row = utils::find_one_job(&pool, &queue).await.expect("rescheduled");
    assert_eq!(row.error_count, 1);
    assert_eq!(row.last_error.as_deref(), Some("the error msg"));
}

fn panicking_handler() -> que::WorkResult {
    panic!("the panic msg")
}

#[tokio::test]
async fn handler_panic_is_rescued_with_a_backtrace() {
    let queue = utils::unique_queue("work_panic");
    let pool = utils::create_pool(5).await;
    let c = Client::builder().with_pool(pool.clone()).await.unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let mut work_map = WorkMap::new();
    let handler_calls = Arc::clone(&calls);
    work_map.insert(
        "MyJob".to_string(),
        Box::new(move |_job| {
            let calls = Arc::clone(&handler_calls);
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                panicking_handler()
            })
        }),
    );
    let w = Worker::builder()
        .queue(queue.as_str())
        .build(c.clone(), work_map);

    c.enqueue(&Job {
        queue: queue.clone(),
        job_type: "MyJob".to_string(),
        ..Default::default()
    })
    .await
    .unwrap();

    assert!(w.work_one().await);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let row = utils::find_one_job(&pool, &queue).await.expect("rescheduled");
    assert_eq!(row.error_count, 1);

    let last_error = row.last_error.expect("panic recorded");
    assert!(
        last_error.contains("the panic msg\n"),
        "panic payload missing: {last_error}"
    );
    // basic check that a backtrace is attached, with frames for the worker's
    // invocation and for the handler's site
    assert!(
        last_error.contains("src/worker.rs"),
        "no worker frame: {last_error}"
    );
    assert!(
        last_error.contains("tests/e2e/worker.rs"),
        "no handler frame: {last_error}"
    );
}

#[tokio::test]
async fn unknown_job_type_is_recorded_without_leaking_connections() {
    let queue = utils::unique_queue("work_unknown");
    let pool = utils::create_pool(5).await;
    let c = Client::builder().with_pool(pool.clone()).await.unwrap();

    c.enqueue(&Job {
        queue: queue.clone(),
        job_type: "MyJob".to_string(),
        ..Default::default()
    })
    .await
    .unwrap();

    let (size_before, idle_before) = utils::settled_counts(&pool).await;

    let w = Worker::builder()
        .queue(queue.as_str())
        .build(c.clone(), WorkMap::new());
    assert!(w.work_one().await);

    let (size_after, idle_after) = utils::settled_counts(&pool).await;
    assert_eq!(size_before, size_after);
    assert_eq!(idle_before, idle_after);

    let row = utils::find_one_job(&pool, &queue).await.expect("rescheduled");
    assert_eq!(row.error_count, 1);
    assert_eq!(row.last_error.as_deref(), Some("unknown job type: \"MyJob\""));
}

#[tokio::test]
async fn shutdown_stops_the_work_loop() {
    let queue = utils::unique_queue("work_shutdown");
    let pool = utils::create_pool(5).await;
    let c = Client::builder().with_pool(pool).await.unwrap();

    let w = Arc::new(
        Worker::builder()
            .queue(queue.as_str())
            .poll_interval(Duration::from_millis(50))
            .build(c, WorkMap::new()),
    );

    let loop_worker = Arc::clone(&w);
    let handle = tokio::spawn(async move { loop_worker.work().await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    tokio::time::timeout(Duration::from_secs(5), w.shutdown())
        .await
        .expect("shutdown should return once the loop exits");
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("the loop task should have finished")
        .unwrap();

    // idempotent
    w.shutdown().await;
}

#[tokio::test]
async fn concurrent_workers_claim_each_job_exactly_once() {
    const JOBS: usize = 20;
    const WORKERS: usize = 4;

    let queue = utils::unique_queue("work_race");
    let pool = utils::create_pool(10).await;
    let c = Client::builder().with_pool(pool.clone()).await.unwrap();

    for _ in 0..JOBS {
        c.enqueue(&Job {
            queue: queue.clone(),
            job_type: "MyJob".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    }

    let worked = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for _ in 0..WORKERS {
        let mut work_map = WorkMap::new();
        let worked = Arc::clone(&worked);
        work_map.insert(
            "MyJob".to_string(),
            Box::new(move |_job| {
                let worked = Arc::clone(&worked);
                Box::pin(async move {
                    worked.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
        );

        let w = Worker::builder()
            .queue(queue.as_str())
            .build(c.clone(), work_map);
        handles.push(tokio::spawn(async move {
            let mut claims = 0usize;
            while w.work_one().await {
                claims += 1;
            }
            claims
        }));
    }

    let mut total = 0;
    for handle in handles {
        total += handle.await.unwrap();
    }

    assert_eq!(total, JOBS);
    assert_eq!(worked.load(Ordering::SeqCst), JOBS);
    assert_eq!(utils::count_jobs(&pool, &queue).await, 0);
}

#[tokio::test]
async fn retry_delay_follows_the_quartic_backoff() {
    let queue = utils::unique_queue("work_backoff");
    let pool = utils::create_pool(5).await;
    let c = Client::builder().with_pool(pool.clone()).await.unwrap();

    let mut work_map = WorkMap::new();
    work_map.insert(
        "MyJob".to_string(),
        Box::new(|_job| Box::pin(async { Err("flaky".into()) })),
    );
    let w = Worker::builder()
        .queue(queue.as_str())
        .build(c.clone(), work_map);

    c.enqueue(&Job {
        queue: queue.clone(),
        job_type: "MyJob".to_string(),
        ..Default::default()
    })
    .await
    .unwrap();

    assert!(w.work_one().await);
    let row = utils::find_one_job(&pool, &queue).await.expect("rescheduled");
    assert_eq!(row.error_count, 1);
    let delay = (row.run_at - utils::db_now(&pool).await).num_seconds();
    assert!((1..=3).contains(&delay), "delay(0) should be 3s, got {delay}");

    utils::make_ready(&pool, &queue).await;

    assert!(w.work_one().await);
    let row = utils::find_one_job(&pool, &queue).await.expect("rescheduled");
    assert_eq!(row.error_count, 2);
    let delay = (row.run_at - utils::db_now(&pool).await).num_seconds();
    assert!((2..=4).contains(&delay), "delay(1) should be 4s, got {delay}");
}

#[tokio::test]
async fn client_delay_function_overrides_the_default() {
    let queue = utils::unique_queue("work_delay_fn");
    let pool = utils::create_pool(5).await;
    let delay_fn: DelayFn = Arc::new(|error_count| 100 * (error_count as u64 + 1));
    let c = Client::builder()
        .delay_function(delay_fn)
        .with_pool(pool.clone())
        .await
        .unwrap();

    let mut work_map = WorkMap::new();
    work_map.insert(
        "MyJob".to_string(),
        Box::new(|_job| Box::pin(async { Err("flaky".into()) })),
    );
    let w = Worker::builder()
        .queue(queue.as_str())
        .build(c.clone(), work_map);

    c.enqueue(&Job {
        queue: queue.clone(),
        job_type: "MyJob".to_string(),
        ..Default::default()
    })
    .await
    .unwrap();

    assert!(w.work_one().await);
    let row = utils::find_one_job(&pool, &queue).await.expect("rescheduled");
    assert_eq!(row.error_count, 1);
    let delay = (row.run_at - utils::db_now(&pool).await).num_seconds();
    assert!((95..=100).contains(&delay), "expected ~100s, got {delay}");
}

#[tokio::test]
async fn a_job_can_override_its_delay_function() {
    let queue = utils::unique_queue("work_job_delay");
    let pool = utils::create_pool(5).await;
    let c = Client::builder().with_pool(pool.clone()).await.unwrap();

    let mut work_map = WorkMap::new();
    work_map.insert(
        "MyJob".to_string(),
        Box::new(|job| {
            Box::pin(async move {
                job.set_delay_function(Arc::new(|_| 300)).await;
                Err("needs a custom delay".into())
            })
        }),
    );
    let w = Worker::builder()
        .queue(queue.as_str())
        .build(c.clone(), work_map);

    c.enqueue(&Job {
        queue: queue.clone(),
        job_type: "MyJob".to_string(),
        ..Default::default()
    })
    .await
    .unwrap();

    assert!(w.work_one().await);
    let row = utils::find_one_job(&pool, &queue).await.expect("rescheduled");
    assert_eq!(row.error_count, 1);
    let delay = (row.run_at - utils::db_now(&pool).await).num_seconds();
    assert!((295..=300).contains(&delay), "expected ~300s, got {delay}");
}
