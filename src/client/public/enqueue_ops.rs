use sqlx::types::Json;
use sqlx::{PgExecutor, Postgres, Transaction};

use super::Client;
use crate::job::Job;
use crate::Error;

impl Client {
    /// Enqueue a job. Each call runs in its own implicit transaction.
    pub async fn enqueue(&self, job: &Job) -> Result<(), Error> {
        self.exec_enqueue(job, &self.pool).await
    }

    /// Enqueue a job within the scope of the caller's transaction.
    ///
    /// This guarantees the job is committed or rolled back atomically with
    /// the rest of the transaction's changes. Committing or rolling back is
    /// the caller's responsibility.
    pub async fn enqueue_in_tx(
        &self,
        job: &Job,
        tx: &mut Transaction<'_, Postgres>,
    ) -> Result<(), Error> {
        self.exec_enqueue(job, &mut **tx).await
    }

    async fn exec_enqueue<'e, E>(&self, job: &Job, executor: E) -> Result<(), Error>
    where
        E: PgExecutor<'e>,
    {
        if job.job_type.is_empty() {
            return Err(Error::MissingJobType);
        }

        // Unset fields bind NULL so the statement's coalesce defaults apply.
        sqlx::query(&self.stmt.insert_job)
            .bind((!job.queue.is_empty()).then_some(job.queue.as_str()))
            .bind((job.priority != 0).then_some(job.priority))
            .bind(job.run_at)
            .bind(&job.job_type)
            .bind((!job.args.is_null()).then_some(Json(&job.args)))
            .execute(executor)
            .await?;

        Ok(())
    }
}
