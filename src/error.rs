use thiserror::Error;

/// Enumerates all errors that this crate may return.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Sqlx PostgreSQL driver error.
    #[error("db driver error")]
    Sqlx(#[from] sqlx::Error),

    /// A job was enqueued without a job type.
    #[error("job type must be specified")]
    MissingJobType,

    /// A claimed job was used after [`LockedJob::done`](crate::LockedJob::done)
    /// released its connection.
    #[error("job connection already released")]
    ConnectionReleased,

    /// [`Client::lock_job`](crate::Client::lock_job) gave up after the
    /// configured number of claim attempts because of concurrently running
    /// transactions.
    ///
    /// Should not be seen unless the queue is under extremely heavy
    /// concurrency; callers typically retry after a delay.
    #[error("maximum number of lock_job attempts reached")]
    Again,
}
