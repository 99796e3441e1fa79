use std::sync::Arc;

use super::Client;
use crate::job::{LockedJob, LockedRow};
use crate::Error;

impl Client {
    /// Claim the highest-priority ready job in `queue`, or `None` if the
    /// queue has no ready job.
    ///
    /// On success the returned [`LockedJob`] owns a pool connection whose
    /// session holds the advisory lock on the job's id; no other worker can
    /// claim that job until [`LockedJob::done`] releases it. Work the job,
    /// then call [`LockedJob::delete`] or [`LockedJob::error`], and finally
    /// `done`.
    pub async fn lock_job(&self, queue: &str) -> Result<Option<LockedJob>, Error> {
        let mut conn = self.pool.acquire().await?;

        for _ in 0..self.opts.max_lock_attempts {
            let Some(row) = sqlx::query_as::<_, LockedRow>(&self.stmt.lock_job)
                .bind(queue)
                .fetch_optional(&mut *conn)
                .await?
            else {
                return Ok(None);
            };

            // The claim query walks its MVCC snapshot, so it can hand back a
            // row a peer finished and deleted after the snapshot was taken;
            // the advisory lock then "succeeds" on an id that no longer
            // denotes work. Re-read the committed state before trusting it.
            let found: Option<bool> = sqlx::query_scalar(&self.stmt.check_job)
                .bind(&row.queue)
                .bind(row.priority)
                .bind(row.run_at)
                .bind(row.job_id)
                .fetch_optional(&mut *conn)
                .await?;

            if found.is_some() {
                return Ok(Some(LockedJob::new(
                    conn,
                    Arc::clone(&self.stmt),
                    self.opts.delay_fn.clone(),
                    row,
                )));
            }

            // Lost the race. The session still holds the advisory lock on
            // the stale id; drop it before retrying or it leaks for the
            // session's lifetime. Errors and `false` returns are ignored,
            // as in done().
            let _ = sqlx::query_scalar::<_, bool>(&self.stmt.unlock_job)
                .bind(row.job_id)
                .fetch_one(&mut *conn)
                .await;
        }

        Err(Error::Again)
    }
}
