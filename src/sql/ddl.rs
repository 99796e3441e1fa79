pub(super) fn create_schema(schema: &str) -> String {
    format!("CREATE SCHEMA IF NOT EXISTS {};", schema)
}

pub(super) fn create_jobs_table(schema: &str) -> String {
    format!(
        "
        CREATE TABLE IF NOT EXISTS {schema}.que_jobs (
            priority smallint not null default(100),
            run_at timestamp with time zone not null default now(),
            job_id bigserial primary key,
            job_class text not null,
            args json not null default('{{}}'),
            error_count integer not null default(0),
            last_error text,
            queue text not null default('')
        );
        "
    )
}

pub(super) fn create_claim_index(schema: &str) -> String {
    format!(
        "
        CREATE INDEX IF NOT EXISTS que_jobs_claim_idx
            ON {schema}.que_jobs (queue, priority, run_at, job_id);
        "
    )
}
