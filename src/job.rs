use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::{FromRow, PgConnection, Postgres};
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::warn;

use crate::sql::Stmt;
use crate::Error;

/// Computes the retry delay in seconds from the number of times the job has
/// already errored (i.e. the count *before* the current failure is recorded).
pub type DelayFn = Arc<dyn Fn(i32) -> u64 + Send + Sync>;

/// Quartic backoff: 3, 4, 19, 84, 259, ... seconds for counts 0, 1, 2, 3, 4.
pub(crate) fn default_delay(error_count: i32) -> u64 {
    let count = error_count.max(0) as u64;
    count.pow(4) + 3
}

/// A job to be enqueued.
///
/// Unset fields fall back to the database defaults on insert: empty `queue`
/// stays the default queue `""`, zero `priority` becomes `100`, `None`
/// `run_at` becomes `now()`, and `Null` `args` becomes `{}`.
#[derive(Debug, Clone, Default)]
pub struct Job {
    /// Name of the queue; `""` is the default queue.
    pub queue: String,

    /// Priority of the job. Lower numbers run first; `0` falls back to the
    /// default of `100`.
    pub priority: i16,

    /// When the job should first become ready. Set a future time to delay
    /// execution.
    pub run_at: Option<DateTime<Utc>>,

    /// Handler key. Must be non-empty on enqueue.
    pub job_type: String,

    /// JSON arguments, opaque to the queue.
    pub args: serde_json::Value,
}

impl Job {
    /// Create an instance of [`JobBuilder`].
    pub fn builder() -> JobBuilder {
        JobBuilder::default()
    }
}

/// Builder for [`Job`].
#[derive(Debug, Clone, Default)]
pub struct JobBuilder {
    job: Job,
}

impl JobBuilder {
    /// Queue name.
    pub fn queue<S>(mut self, queue: S) -> Self
    where
        S: Into<String>,
    {
        self.job.queue = queue.into();
        self
    }

    /// Priority; lower runs first.
    pub fn priority(mut self, priority: i16) -> Self {
        self.job.priority = priority;
        self
    }

    /// Earliest time the job may run.
    pub fn run_at(mut self, run_at: DateTime<Utc>) -> Self {
        self.job.run_at = Some(run_at);
        self
    }

    /// Handler key.
    pub fn job_type<S>(mut self, job_type: S) -> Self
    where
        S: Into<String>,
    {
        self.job.job_type = job_type.into();
        self
    }

    /// JSON arguments.
    pub fn args(mut self, args: serde_json::Value) -> Self {
        self.job.args = args;
        self
    }

    /// Build the [`Job`].
    pub fn build(self) -> Job {
        self.job
    }
}

/// Row shape produced by the claim statement.
#[derive(Debug, FromRow)]
pub(crate) struct LockedRow {
    pub(crate) queue: String,
    pub(crate) priority: i16,
    pub(crate) run_at: DateTime<Utc>,
    pub(crate) job_id: i64,
    pub(crate) job_class: String,
    pub(crate) args: serde_json::Value,
    pub(crate) error_count: i32,
}

// Mutable half of a claimed job. One mutex serializes delete, done, conn
// access and the deleted flag, so a handler and a cleanup path cannot race.
struct Inner {
    deleted: bool,
    conn: Option<PoolConnection<Postgres>>,
    delay_fn: Option<DelayFn>,
}

/// A claimed job, pinned to the pool connection whose session holds its
/// advisory lock.
///
/// The connection stays out of the pool from claim until [`LockedJob::done`]
/// releases it, so the session-level lock remains visible to every statement
/// the job runs. After working the job, call [`LockedJob::delete`] on
/// success or [`LockedJob::error`] on failure, then `done` in either case.
pub struct LockedJob {
    queue: String,
    priority: i16,
    run_at: DateTime<Utc>,
    id: i64,
    job_type: String,
    args: serde_json::Value,
    error_count: i32,

    stmt: Arc<Stmt>,
    state: Mutex<Inner>,
}

impl LockedJob {
    pub(crate) fn new(
        conn: PoolConnection<Postgres>,
        stmt: Arc<Stmt>,
        delay_fn: Option<DelayFn>,
        row: LockedRow,
    ) -> Self {
        LockedJob {
            queue: row.queue,
            priority: row.priority,
            run_at: row.run_at,
            id: row.job_id,
            job_type: row.job_class,
            args: row.args,
            error_count: row.error_count,
            stmt,
            state: Mutex::new(Inner {
                deleted: false,
                conn: Some(conn),
                delay_fn,
            }),
        }
    }

    /// Unique database id of the job.
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Queue the job was claimed from.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Priority of the job; lower runs first.
    pub fn priority(&self) -> i16 {
        self.priority
    }

    /// When the job became ready.
    pub fn run_at(&self) -> DateTime<Utc> {
        self.run_at
    }

    /// Handler key.
    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    /// JSON arguments.
    pub fn args(&self) -> &serde_json::Value {
        &self.args
    }

    /// How many times the job has errored so far.
    pub fn error_count(&self) -> i32 {
        self.error_count
    }

    /// The connection this job is locked to.
    ///
    /// You may run your own statements or transactions on it until
    /// [`LockedJob::done`] releases it back to the pool; they execute in the
    /// same session that holds the advisory lock. Returns `None` once the
    /// connection has been released.
    pub async fn conn(&self) -> Option<MappedMutexGuard<'_, PgConnection>> {
        let inner = self.state.lock().await;
        MutexGuard::try_map(inner, |inner| inner.conn.as_deref_mut()).ok()
    }

    /// Override the retry-delay policy for this job only.
    pub async fn set_delay_function(&self, delay_fn: DelayFn) {
        self.state.lock().await.delay_fn = Some(delay_fn);
    }

    /// Mark the job complete by deleting its row.
    ///
    /// At most one round-trip is made; repeated calls succeed without
    /// touching the database. You must still call [`LockedJob::done`]
    /// afterwards to release the connection.
    pub async fn delete(&self) -> Result<(), Error> {
        let mut inner = self.state.lock().await;
        if inner.deleted {
            return Ok(());
        }
        let conn = inner.conn.as_deref_mut().ok_or(Error::ConnectionReleased)?;

        sqlx::query(&self.stmt.delete_job)
            .bind(&self.queue)
            .bind(self.priority)
            .bind(self.run_at)
            .bind(self.id)
            .execute(&mut *conn)
            .await?;

        inner.deleted = true;
        Ok(())
    }

    /// Record a failure and schedule the job to be reworked.
    ///
    /// Increments `error_count`, stores `msg` as `last_error`, and pushes
    /// `run_at` forward by the delay policy applied to the current error
    /// count. The database row is authoritative; the in-memory count is left
    /// untouched. You must still call [`LockedJob::done`] afterwards.
    pub async fn error(&self, msg: &str) -> Result<(), Error> {
        let mut inner = self.state.lock().await;
        let delay = match &inner.delay_fn {
            Some(delay_fn) => delay_fn(self.error_count),
            None => default_delay(self.error_count),
        };
        let conn = inner.conn.as_deref_mut().ok_or(Error::ConnectionReleased)?;

        sqlx::query(&self.stmt.set_error)
            .bind(self.error_count + 1)
            .bind(i64::try_from(delay).unwrap_or(i64::MAX))
            .bind(msg)
            .bind(&self.queue)
            .bind(self.priority)
            .bind(self.run_at)
            .bind(self.id)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    /// Release the advisory lock and return the connection to the pool.
    ///
    /// An unlock failure is logged and swallowed so it cannot mask the error
    /// that already brought the job here; the connection is released either
    /// way. Idempotent; after the first call the job is inert and
    /// [`LockedJob::delete`] / [`LockedJob::error`] no longer reach the
    /// database.
    pub async fn done(&self) {
        let mut inner = self.state.lock().await;
        let Some(mut conn) = inner.conn.take() else {
            return;
        };

        if let Err(e) = sqlx::query_scalar::<_, bool>(&self.stmt.unlock_job)
            .bind(self.id)
            .fetch_one(&mut *conn)
            .await
        {
            warn!(job_id = self.id, "failed to release advisory lock: {e}");
        }

        // conn drops here and returns to the pool
    }
}

impl Drop for LockedJob {
    fn drop(&mut self) {
        if self.state.get_mut().conn.is_some() {
            // The session keeps the advisory lock until the physical
            // connection closes; the job is unclaimable until then.
            warn!(
                job_id = self.id,
                "claimed job dropped without done(); its advisory lock stays with the pooled session"
            );
        }
    }
}
