use async_trait::async_trait;
use cdc_core::TableChange;
use tracing::{error, warn};

use crate::connect::connect;
use crate::error::PgResult;

/// `(successCount, totalCount)` from a `Store` call. Succeeds iff
/// `success_count > 0 || total_count == 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreResult {
    pub success_count: usize,
    pub total_count: usize,
}

impl StoreResult {
    pub fn succeeded(&self) -> bool {
        self.success_count > 0 || self.total_count == 0
    }
}

/// The history-writer capability the polling engine depends on, extracted so
/// tests can swap in a fake that counts calls instead of hitting Postgres.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn store(&self, changes: &[TableChange], batch_size: usize) -> PgResult<StoreResult>;
}

/// Batched, idempotent insert into `change_history`.
#[derive(Debug, Clone)]
pub struct HistoryWriter {
    connection_string: String,
}

impl HistoryWriter {
    pub fn new(connection_string: String) -> Self {
        Self { connection_string }
    }

    /// `CREATE TABLE IF NOT EXISTS change_history ...` with the idempotency
    /// index from §4.6/§6: at most one row per `(lsn, table_name, data->>'id')`,
    /// falling back to `row_position` when no `id` is present in `data`.
    pub async fn ensure_schema(&self) -> PgResult<()> {
        let client = connect(&self.connection_string).await?;
        client
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS change_history (
                    id BIGSERIAL PRIMARY KEY,
                    lsn TEXT NOT NULL,
                    table_name TEXT NOT NULL,
                    operation TEXT NOT NULL,
                    data JSONB NOT NULL,
                    row_position INTEGER NOT NULL DEFAULT 0,
                    timestamp TIMESTAMPTZ NOT NULL
                );
                CREATE INDEX IF NOT EXISTS change_history_lsn_idx ON change_history (lsn);
                CREATE UNIQUE INDEX IF NOT EXISTS change_history_idempotency_idx
                    ON change_history (lsn, table_name, COALESCE(data->>'id', row_position::text));",
            )
            .await
            .map_err(cdc_pg_error_from)?;
        Ok(())
    }

    /// `Store(changes, batchSize)`. Empty input is a no-op success. Batch-level
    /// failures do not abort remaining batches.
    pub async fn store(&self, changes: &[TableChange], batch_size: usize) -> PgResult<StoreResult> {
        if changes.is_empty() {
            return Ok(StoreResult {
                success_count: 0,
                total_count: 0,
            });
        }

        let client = connect(&self.connection_string).await?;
        let mut success_count = 0;

        for (chunk_index, chunk) in changes.chunks(batch_size.max(1)).enumerate() {
            match insert_chunk(&client, chunk, chunk_index * batch_size).await {
                Ok(()) => success_count += chunk.len(),
                Err(e) => {
                    error!(
                        event = "replication.history.store_failed",
                        chunk = chunk_index,
                        size = chunk.len(),
                        error = %e,
                        "history batch insert failed"
                    );
                }
            }
        }

        let result = StoreResult {
            success_count,
            total_count: changes.len(),
        };
        if !result.succeeded() {
            warn!(event = "replication.history.store_all_failed", "every batch in this store call failed");
        }
        Ok(result)
    }
}

#[async_trait]
impl HistoryStore for HistoryWriter {
    async fn store(&self, changes: &[TableChange], batch_size: usize) -> PgResult<StoreResult> {
        HistoryWriter::store(self, changes, batch_size).await
    }
}

async fn insert_chunk(
    client: &tokio_postgres::Client,
    chunk: &[TableChange],
    position_offset: usize,
) -> Result<(), tokio_postgres::Error> {
    let mut sql = String::from(
        "INSERT INTO change_history (lsn, table_name, operation, data, row_position, timestamp) VALUES ",
    );
    let mut params: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> = Vec::new();

    let lsns: Vec<String> = chunk.iter().map(|c| c.lsn.format()).collect();
    let tables: Vec<&str> = chunk.iter().map(|c| c.table.as_str()).collect();
    let ops: Vec<&str> = chunk.iter().map(|c| c.op.as_str()).collect();
    let datas: Vec<serde_json::Value> = chunk
        .iter()
        .map(|c| serde_json::Value::Object(c.data.clone()))
        .collect();
    let positions: Vec<i32> = (0..chunk.len() as i32)
        .map(|i| i + position_offset as i32)
        .collect();
    let timestamps: Vec<&str> = chunk.iter().map(|c| c.updated_at.as_str()).collect();

    for i in 0..chunk.len() {
        if i > 0 {
            sql.push(',');
        }
        let base = i * 6;
        sql.push_str(&format!(
            " (${}, ${}, ${}, ${}::jsonb, ${}, ${}::timestamptz)",
            base + 1,
            base + 2,
            base + 3,
            base + 4,
            base + 5,
            base + 6
        ));
        params.push(&lsns[i]);
        params.push(&tables[i]);
        params.push(&ops[i]);
        params.push(&datas[i]);
        params.push(&positions[i]);
        params.push(&timestamps[i]);
    }
    sql.push_str(" ON CONFLICT (lsn, table_name, COALESCE(data->>'id', row_position::text)) DO NOTHING");

    client.execute(&sql, &params).await?;
    Ok(())
}

fn cdc_pg_error_from(e: tokio_postgres::Error) -> crate::error::PgError {
    crate::error::PgError::from(e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdc_core::{Lsn, Operation};
    use serde_json::Map;

    fn change(id: &str, lsn: &str) -> TableChange {
        let mut data = Map::new();
        data.insert("id".into(), serde_json::Value::String(id.into()));
        TableChange {
            table: "tasks".into(),
            op: Operation::Insert,
            data,
            lsn: Lsn::parse(lsn).unwrap(),
            updated_at: "2025-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn empty_store_is_a_no_op_success() {
        let result = StoreResult {
            success_count: 0,
            total_count: 0,
        };
        assert!(result.succeeded());
    }

    #[test]
    fn partial_failure_still_succeeds_if_any_chunk_landed() {
        let result = StoreResult {
            success_count: 1,
            total_count: 2,
        };
        assert!(result.succeeded());
    }

    #[test]
    fn total_failure_does_not_succeed() {
        let result = StoreResult {
            success_count: 0,
            total_count: 2,
        };
        assert!(!result.succeeded());
    }

    #[tokio::test]
    #[ignore]
    async fn store_is_idempotent_against_live_db() {
        let conn = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set");
        let writer = HistoryWriter::new(conn);
        writer.ensure_schema().await.unwrap();
        let changes = vec![change("T1", "0/10A")];

        let first = writer.store(&changes, 100).await.unwrap();
        let second = writer.store(&changes, 100).await.unwrap();

        assert_eq!(first.success_count, 1);
        assert!(second.succeeded());
    }
}
