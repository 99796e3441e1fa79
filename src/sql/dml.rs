pub(super) fn insert_job(schema: &str) -> String {
    format!(
        "
        INSERT INTO {schema}.que_jobs (queue, priority, run_at, job_class, args)
        VALUES (
            coalesce($1::text, ''::text),
            coalesce($2::smallint, 100::smallint),
            coalesce($3::timestamptz, now()::timestamptz),
            $4::text,
            coalesce($5::json, '{{}}'::json)
        );
        "
    )
}

/// Walks the claim index in `(priority, run_at, job_id)` order, attempting a
/// non-blocking session advisory lock on each candidate, and emits the first
/// row whose lock was acquired. Rows locked by any other session are skipped
/// without blocking.
pub(super) fn lock_job(schema: &str) -> String {
    format!(
        "
        WITH RECURSIVE jobs AS (
            SELECT (j).*, pg_try_advisory_lock((j).job_id) AS locked
            FROM (
                SELECT j
                FROM {schema}.que_jobs AS j
                WHERE queue = $1::text
                AND run_at <= now()
                ORDER BY priority, run_at, job_id
                LIMIT 1
            ) AS t1
            UNION ALL (
                SELECT (j).*, pg_try_advisory_lock((j).job_id) AS locked
                FROM (
                    SELECT (
                        SELECT j
                        FROM {schema}.que_jobs AS j
                        WHERE queue = $1::text
                        AND run_at <= now()
                        AND (priority, run_at, job_id) >
                            (jobs.priority, jobs.run_at, jobs.job_id)
                        ORDER BY priority, run_at, job_id
                        LIMIT 1
                    ) AS j
                    FROM jobs
                    WHERE jobs.job_id IS NOT NULL
                    LIMIT 1
                ) AS t1
            )
        )
        SELECT queue, priority, run_at, job_id, job_class, args, error_count
        FROM jobs
        WHERE locked
        LIMIT 1;
        "
    )
}

pub(super) fn check_job(schema: &str) -> String {
    format!(
        "
        SELECT true
        FROM {schema}.que_jobs
        WHERE queue = $1::text
        AND priority = $2::smallint
        AND run_at = $3::timestamptz
        AND job_id = $4::bigint;
        "
    )
}

pub(super) fn delete_job(schema: &str) -> String {
    format!(
        "
        DELETE FROM {schema}.que_jobs
        WHERE queue = $1::text
        AND priority = $2::smallint
        AND run_at = $3::timestamptz
        AND job_id = $4::bigint;
        "
    )
}

pub(super) fn set_error(schema: &str) -> String {
    format!(
        "
        UPDATE {schema}.que_jobs
        SET error_count = $1::integer,
            run_at = now() + $2::bigint * '1 second'::interval,
            last_error = $3::text
        WHERE queue = $4::text
        AND priority = $5::smallint
        AND run_at = $6::timestamptz
        AND job_id = $7::bigint;
        "
    )
}

pub(super) fn unlock_job() -> String {
    "SELECT pg_advisory_unlock($1::bigint);".to_string()
}
