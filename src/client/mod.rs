use std::sync::Arc;

use sqlx::postgres::PgPool;

use crate::sql;
use crate::Error;

mod builder;
mod opts;
mod public;

pub use builder::ClientBuilder;

/// Queue client: enqueues jobs and claims them for workers.
///
/// Cloning is cheap; clones share the pool and the prepared statement set.
#[derive(Debug, Clone)]
pub struct Client {
    pool: PgPool,
    opts: opts::ClientOptions,
    stmt: Arc<sql::Stmt>,
}

impl Client {
    async fn new(pool: PgPool, opts: opts::ClientOptions) -> Result<Self, Error> {
        let stmt = Arc::new(sql::Stmt::for_schema(&opts.schema));
        let c = Client { pool, opts, stmt };
        c.init().await?;
        Ok(c)
    }

    // Installs the jobs table and claim index if missing. Serialized by an
    // advisory transaction lock so concurrently connecting clients do not
    // trip over each other's DDL.
    async fn init(&self) -> Result<(), Error> {
        let ddl = sql::install_schema(&self.opts.schema);
        sqlx::raw_sql(&ddl).execute(&self.pool).await?;
        Ok(())
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
