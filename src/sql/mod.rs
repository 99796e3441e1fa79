mod ddl;
mod dml;

/// The fixed set of statements the client and claimed jobs execute.
///
/// Built once per [`crate::Client`] for its schema; sqlx's per-connection
/// statement cache prepares each of them on first use.
#[derive(Debug)]
pub(crate) struct Stmt {
    pub(crate) insert_job: String,
    pub(crate) lock_job: String,
    pub(crate) check_job: String,
    pub(crate) delete_job: String,
    pub(crate) set_error: String,
    pub(crate) unlock_job: String,
}

impl Stmt {
    pub(crate) fn for_schema(schema: &str) -> Self {
        Stmt {
            insert_job: dml::insert_job(schema),
            lock_job: dml::lock_job(schema),
            check_job: dml::check_job(schema),
            delete_job: dml::delete_job(schema),
            set_error: dml::set_error(schema),
            unlock_job: dml::unlock_job(),
        }
    }
}

fn locked<I>(schema: &str, stmts: I) -> String
where
    I: IntoIterator<Item = String>,
{
    format!(
        "
        BEGIN;
        SET LOCAL lock_timeout = '30s';
        SET LOCAL idle_in_transaction_session_timeout = '30s';
        SELECT pg_advisory_xact_lock(('x' || encode(sha224((current_database() || '.que.{schema}')::bytea), 'hex'))::bit(64)::bigint);
        {};
        COMMIT;
        ",
        stmts.into_iter().collect::<Vec<_>>().join("\n"),
    )
}

pub(crate) fn install_schema(schema: &str) -> String {
    locked(
        schema,
        [
            ddl::create_schema(schema),
            ddl::create_jobs_table(schema),
            ddl::create_claim_index(schema),
        ],
    )
}
