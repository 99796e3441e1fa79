//! A persistent, transactional job queue backed by PostgreSQL.
//!
//! Jobs live in a `que_jobs` table; workers claim them with session-level
//! advisory locks layered on top of MVCC, so at most one worker runs a given
//! job even under heavy contention, and no broker process is needed. Jobs
//! can be enqueued atomically with the caller's own transaction, giving
//! transactional-outbox semantics. Delivery is at-least-once; handlers
//! should be idempotent.
//!
//! ```no_run
//! use que::{Client, Job, WorkMap, Worker};
//!
//! # async fn demo() -> Result<(), que::Error> {
//! let client = Client::builder().connect().await?;
//!
//! client
//!     .enqueue(
//!         &Job::builder()
//!             .job_type("Email")
//!             .args(serde_json::json!({"to": "user@example.org"}))
//!             .build(),
//!     )
//!     .await?;
//!
//! let mut work_map = WorkMap::new();
//! work_map.insert(
//!     "Email".to_string(),
//!     Box::new(|job| {
//!         Box::pin(async move {
//!             println!("sending {}", job.args());
//!             Ok(())
//!         })
//!     }),
//! );
//!
//! let worker = Worker::new(client, work_map);
//! worker.work().await;
//! # Ok(())
//! # }
//! ```
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod client;
mod error;
mod job;
mod sql;
mod utils;
mod worker;

pub use client::{Client, ClientBuilder};
pub use error::Error;
pub use job::{DelayFn, Job, JobBuilder, LockedJob};
pub use worker::{WorkFn, WorkMap, WorkResult, Worker, WorkerBuilder};
