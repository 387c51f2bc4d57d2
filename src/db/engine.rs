use anyhow::{Context, Result};
use deadpool_postgres::Pool;

use super::query::{execute_query, QueryResult};
use crate::spec::plan::{CountQuery, SelectPlan};
use crate::spec::sql::{compile_count, compile_select};

/// Executes query plans. Implementations own connections and transactions.
#[allow(async_fn_in_trait)]
pub trait StorageEngine {
    /// Rows of `plan`, labelled with the plan's projection labels.
    async fn fetch(&self, plan: &SelectPlan) -> Result<QueryResult>;

    /// Distinct root entities matching `query`.
    async fn count(&self, query: &CountQuery) -> Result<u64>;
}

/// PostgreSQL engine backed by a connection pool.
#[derive(Clone)]
pub struct PgEngine {
    pool: Pool,
}

impl PgEngine {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

impl StorageEngine for PgEngine {
    async fn fetch(&self, plan: &SelectPlan) -> Result<QueryResult> {
        let compiled = compile_select(plan)?;
        let client = self
            .pool
            .get()
            .await
            .context("Failed to check out a database connection")?;
        let result = execute_query(&client, &compiled, &compiled.labels).await?;
        tracing::info!(
            rows = result.row_count,
            elapsed_ms = result.execution_time.as_millis() as u64,
            "fetch complete"
        );
        Ok(result)
    }

    async fn count(&self, query: &CountQuery) -> Result<u64> {
        let compiled = compile_count(query)?;
        let client = self
            .pool
            .get()
            .await
            .context("Failed to check out a database connection")?;
        let result = execute_query(&client, &compiled, &compiled.labels).await?;
        count_total(&result)
    }
}

/// The single `total` cell of a count statement.
fn count_total(result: &QueryResult) -> Result<u64> {
    let total = result
        .rows
        .first()
        .and_then(|row| row.first())
        .and_then(|cell| cell.as_i64())
        .context("Count query returned no total")?;
    u64::try_from(total).with_context(|| format!("Count query returned a negative total ({})", total))
}
