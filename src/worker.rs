use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Once};
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::watch;
use tracing::{debug, error, trace, warn};

use crate::job::LockedJob;
use crate::Client;

/// Default wait between empty polls.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// The outcome a handler reports for a job.
pub type WorkResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// A handler invoked for jobs of one type.
pub type WorkFn =
    Box<dyn Fn(Arc<LockedJob>) -> Pin<Box<dyn Future<Output = WorkResult> + Send>> + Send + Sync>;

/// Maps job types to handlers. Read-only once the worker is built.
pub type WorkMap = HashMap<String, WorkFn>;

/// A polling worker.
///
/// Claims one job at a time from its queue, dispatches it to the matching
/// handler, and records the outcome. Returned handler errors and panics are
/// recorded on the job and never escape the worker. For parallelism, spawn
/// several workers; the database coordinates them.
pub struct Worker {
    client: Client,
    work_map: WorkMap,
    queue: String,
    poll_interval: Duration,
    shutdown: watch::Sender<bool>,
    done: watch::Sender<bool>,
}

impl Worker {
    /// Create a worker polling the default queue every 5 seconds. Use
    /// [`Worker::builder`] to change either.
    pub fn new(client: Client, work_map: WorkMap) -> Self {
        Worker::builder().build(client, work_map)
    }

    /// Create an instance of [`WorkerBuilder`].
    pub fn builder() -> WorkerBuilder {
        WorkerBuilder::default()
    }

    /// Pull a single job off the queue and work it. Returns whether a job
    /// was found, whatever its outcome.
    pub async fn work_one(&self) -> bool {
        let job = match self.client.lock_job(&self.queue).await {
            Ok(Some(job)) => job,
            Ok(None) => return false,
            Err(e) => {
                error!("could not lock job: {e}");
                return false;
            }
        };

        self.run_job(job).await;
        true
    }

    /// Poll for jobs until [`Worker::shutdown`] is called.
    ///
    /// After an empty poll the loop sleeps for the poll interval or until
    /// shutdown is signalled, whichever comes first. An in-flight job is
    /// never interrupted.
    pub async fn work(&self) {
        let mut shutdown = self.shutdown.subscribe();

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            if self.work_one().await {
                continue;
            }

            trace!("no job found, sleeping");
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.changed() => {}
            }
        }

        debug!("worker loop exited");
        let _ = self.done.send(true);
    }

    /// Signal the `work` loop to stop and wait until it has finished its
    /// in-flight job, if any, and exited. Idempotent.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);

        let mut done = self.done.subscribe();
        while !*done.borrow_and_update() {
            if done.changed().await.is_err() {
                break;
            }
        }
    }

    async fn run_job(&self, job: LockedJob) {
        let job = Arc::new(job);

        let Some(work_fn) = self.work_map.get(job.job_type()) else {
            let msg = format!("unknown job type: {:?}", job.job_type());
            error!(job_id = job.id(), "{msg}");
            if let Err(e) = job.error(&msg).await {
                error!(job_id = job.id(), "failed to record job error: {e}");
            }
            job.done().await;
            return;
        };

        match invoke(work_fn, Arc::clone(&job)).await {
            Ok(Ok(())) => {
                if let Err(e) = job.delete().await {
                    error!(job_id = job.id(), "failed to delete finished job: {e}");
                }
            }
            Ok(Err(e)) => {
                warn!(job_id = job.id(), job_type = job.job_type(), "job failed: {e}");
                if let Err(e) = job.error(&e.to_string()).await {
                    error!(job_id = job.id(), "failed to record job error: {e}");
                }
            }
            Err(panic_msg) => {
                error!(job_id = job.id(), job_type = job.job_type(), "job panicked");
                if let Err(e) = job.error(&panic_msg).await {
                    error!(job_id = job.id(), "failed to record job error: {e}");
                }
            }
        }

        job.done().await;
    }
}

// Runs the handler under a panic guard. A panic is converted to
// "<payload>\n<backtrace>", with the backtrace captured at the panic site so
// last_error shows both the handler frame and this invocation.
async fn invoke(work_fn: &WorkFn, job: Arc<LockedJob>) -> Result<WorkResult, String> {
    install_panic_recorder();

    AssertUnwindSafe(work_fn(job))
        .catch_unwind()
        .await
        .map_err(|payload| {
            let msg = panic_message(&*payload);
            match take_panic_backtrace() {
                Some(backtrace) => format!("{msg}\n{backtrace}"),
                None => msg,
            }
        })
}

/// Builder for [`Worker`].
#[derive(Debug, Clone)]
pub struct WorkerBuilder {
    queue: String,
    poll_interval: Duration,
}

impl Default for WorkerBuilder {
    fn default() -> Self {
        WorkerBuilder {
            queue: String::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl WorkerBuilder {
    /// Queue this worker polls.
    pub fn queue<S>(mut self, queue: S) -> Self
    where
        S: Into<String>,
    {
        self.queue = queue.into();
        self
    }

    /// Wait between empty polls.
    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Build the [`Worker`].
    pub fn build(self, client: Client, work_map: WorkMap) -> Worker {
        let (shutdown, _) = watch::channel(false);
        let (done, _) = watch::channel(false);
        Worker {
            client,
            work_map,
            queue: self.queue,
            poll_interval: self.poll_interval,
            shutdown,
            done,
        }
    }
}

thread_local! {
    static PANIC_BACKTRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

static PANIC_RECORDER: Once = Once::new();

// Chains a hook that stashes a backtrace captured at the panic site in a
// thread local. Capturing after catch_unwind would only see the catch site;
// the hook runs before the stack unwinds.
fn install_panic_recorder() {
    PANIC_RECORDER.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            PANIC_BACKTRACE.with(|slot| {
                *slot.borrow_mut() = Some(Backtrace::force_capture());
            });
            previous(info);
        }));
    });
}

// The panic and the catch complete within one poll of the guarded future, so
// the thread local is read on the thread that panicked.
fn take_panic_backtrace() -> Option<Backtrace> {
    PANIC_BACKTRACE.with(|slot| slot.borrow_mut().take())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "job handler panicked".to_string()
    }
}
