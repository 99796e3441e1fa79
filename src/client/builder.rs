use sqlx::postgres::PgPool;

use super::{opts, Client};
use crate::job::DelayFn;
use crate::utils;
use crate::Error;

/// Builder for [`Client`].
#[derive(Debug, Clone, Default)]
pub struct ClientBuilder {
    opts: opts::ClientOptions,
}

impl ClientBuilder {
    /// Schema holding the `que_jobs` table.
    ///
    /// Advisory locks are keyed by `job_id` alone, so two schemas sharing a
    /// database will contend on lock keys; prefer distinct queues within one
    /// schema over distinct schemas.
    pub fn schema<S>(mut self, schema: S) -> Self
    where
        S: Into<String>,
    {
        self.opts.schema = schema.into();
        self
    }

    /// Bound on the claim race-retry loop in
    /// [`Client::lock_job`](crate::Client::lock_job).
    pub fn max_lock_attempts(mut self, attempts: u32) -> Self {
        self.opts.max_lock_attempts = attempts;
        self
    }

    /// Default retry-delay policy applied to jobs claimed by this client,
    /// replacing the quartic backoff. Individual jobs may still override it
    /// via [`LockedJob::set_delay_function`](crate::LockedJob::set_delay_function).
    pub fn delay_function(mut self, delay_fn: DelayFn) -> Self {
        self.opts.delay_fn = Some(delay_fn);
        self
    }

    /// Connect to the PostgreSQL server.
    pub async fn connect(self) -> Result<Client, Error> {
        let pool = utils::create_pool(None).await?;
        self.with_pool(pool).await
    }

    /// Connect to the PostgreSQL server using specific url.
    ///
    /// To configure `ssl` (e.g. `sslmode=require`), you will need to build
    /// your own `Pool` and use [`ClientBuilder::with_pool`] method instead.
    pub async fn connect_to<U>(self, url: U) -> Result<Client, Error>
    where
        U: AsRef<str>,
    {
        let pool = utils::create_pool(Some(url.as_ref())).await?;
        self.with_pool(pool).await
    }

    /// Bring your own pool.
    ///
    /// The pool's `max_connections` is the concurrency ceiling: each claimed
    /// job occupies one connection until it is done, so size the pool to at
    /// least the worker count plus the enqueuers.
    pub async fn with_pool(self, pool: PgPool) -> Result<Client, Error> {
        Client::new(pool, self.opts).await
    }
}
