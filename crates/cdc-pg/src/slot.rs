use async_trait::async_trait;
use cdc_core::{ChangeTransformer, FilterCounters, Lsn, TableChange, WalRecord};
use serde::Serialize;
use tokio_postgres::Client;
use tracing::{debug, info};

use crate::connect::connect;
use crate::error::{PgError, PgResult};

/// The subset of the slot adapter the polling engine depends on, extracted
/// so tests can drive the poller against a fake slot instead of a live
/// Postgres connection (§8's scenario tests).
#[async_trait]
pub trait SlotSource: Send + Sync {
    async fn peek_changes(&self, after_lsn: Lsn, limit: usize) -> PgResult<Vec<WalRecord>>;
    async fn consume_changes(&self, upto_lsn: Lsn, limit: usize) -> PgResult<usize>;
}

/// Configuration needed to reach a logical-replication slot.
#[derive(Debug, Clone)]
pub struct SlotConfig {
    pub connection_string: String,
    pub slot_name: String,
}

/// The status of a replication slot as reported by `pg_replication_slots`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotStatus {
    pub exists: bool,
    pub confirmed_flush_lsn: Option<String>,
    pub active: bool,
}

/// Result shape for the admin `/peek` surface.
#[derive(Debug, Clone, Serialize)]
pub struct PeekHistoryResult {
    pub changes: Vec<TableChange>,
    pub has_more: bool,
    pub next_lsn: Option<Lsn>,
    pub slot_status: SlotStatus,
}

/// Wraps the `pg_logical_slot_*` functions used to drive a `wal2json` slot.
///
/// Every operation acquires its own connection and releases it on every exit
/// path (the connection's driver task ends as soon as the `Client` is dropped).
#[derive(Debug, Clone)]
pub struct SlotAdapter {
    config: SlotConfig,
}

impl SlotAdapter {
    pub fn new(config: SlotConfig) -> Self {
        Self { config }
    }

    /// Idempotently ensure the slot exists with the `wal2json` output plugin,
    /// creating it if absent.
    pub async fn ensure_slot(&self) -> PgResult<SlotStatus> {
        let client = connect(&self.config.connection_string).await?;
        let status = slot_status(&client, &self.config.slot_name).await?;
        if status.exists {
            return Ok(status);
        }

        info!(slot = %self.config.slot_name, "creating replication slot");
        client
            .execute(
                "SELECT pg_create_logical_replication_slot($1, 'wal2json')",
                &[&self.config.slot_name],
            )
            .await
            .map_err(|e| PgError::SlotCreationFailed(e.to_string()))?;

        slot_status(&client, &self.config.slot_name).await
    }

    /// `GetSlotStatus(slot) → {exists, confirmedFlushLsn?}`.
    pub async fn get_slot_status(&self) -> PgResult<SlotStatus> {
        let client = connect(&self.config.connection_string).await?;
        slot_status(&client, &self.config.slot_name).await
    }

    /// `PeekChanges(slot, afterLSN, limit)` — reads without consuming.
    ///
    /// `pg_logical_slot_peek_changes` always starts from the slot's own
    /// confirmed position, which under the default `skipWALConsumption`
    /// configuration never advances. `after_lsn` is therefore applied as a
    /// client-side cursor: rows at or below it are dropped before the
    /// `limit` cap is applied, matching callers that track their own
    /// `confirmed_lsn` independently of the physical slot position.
    pub async fn peek_changes(&self, after_lsn: Lsn, limit: usize) -> PgResult<Vec<WalRecord>> {
        let client = connect(&self.config.connection_string).await?;
        let rows = peek_or_get(&client, &self.config.slot_name, None, None, PeekOrGet::Peek).await?;
        Ok(filter_and_cap(rows, after_lsn, limit))
    }

    /// `ConsumeChanges(slot, uptoLSN, limit) → count consumed` (advances the slot).
    pub async fn consume_changes(&self, upto_lsn: Lsn, limit: usize) -> PgResult<usize> {
        let client = connect(&self.config.connection_string).await?;
        let rows = peek_or_get(
            &client,
            &self.config.slot_name,
            Some(upto_lsn),
            Some(limit),
            PeekOrGet::Get,
        )
        .await?;
        debug!(count = rows.len(), upto_lsn = %upto_lsn, "consumed WAL records");
        Ok(rows.len())
    }

    /// `AdvanceSlot(slot, uptoLSN)` via `pg_replication_slot_advance`.
    pub async fn advance_slot(&self, upto_lsn: Lsn) -> PgResult<()> {
        let client = connect(&self.config.connection_string).await?;
        client
            .execute(
                "SELECT pg_replication_slot_advance($1, $2::pg_lsn)",
                &[&self.config.slot_name, &upto_lsn.format()],
            )
            .await
            .map_err(PgError::from)?;
        Ok(())
    }

    /// Drop the slot, e.g. during a `/cleanup` cycle or test teardown.
    pub async fn drop_slot(&self) -> PgResult<()> {
        let client = connect(&self.config.connection_string).await?;
        client
            .execute(
                "SELECT pg_drop_replication_slot($1)",
                &[&self.config.slot_name],
            )
            .await
            .map_err(PgError::from)?;
        Ok(())
    }

    /// `PeekHistory(slot, fromLSN?, limit) → {changes[], hasMore, nextLSN?, slotStatus?}`.
    /// Reads at most `limit + 1` transformed changes to compute `hasMore`.
    pub async fn peek_history(
        &self,
        from_lsn: Lsn,
        limit: usize,
        transformer: &ChangeTransformer,
    ) -> PgResult<PeekHistoryResult> {
        let client = connect(&self.config.connection_string).await?;
        let slot_status = slot_status(&client, &self.config.slot_name).await?;
        let rows = peek_or_get(&client, &self.config.slot_name, None, None, PeekOrGet::Peek).await?;
        let rows = filter_and_cap(rows, from_lsn, usize::MAX);

        let mut counters = FilterCounters::default();
        let mut changes = Vec::new();
        for record in &rows {
            changes.extend(transformer.transform(record, &mut counters));
            if changes.len() > limit {
                break;
            }
        }

        let has_more = changes.len() > limit;
        if has_more {
            changes.truncate(limit);
        }
        let next_lsn = changes.last().map(|c| c.lsn);

        Ok(PeekHistoryResult {
            changes,
            has_more,
            next_lsn,
            slot_status,
        })
    }
}

#[async_trait]
impl SlotSource for SlotAdapter {
    async fn peek_changes(&self, after_lsn: Lsn, limit: usize) -> PgResult<Vec<WalRecord>> {
        SlotAdapter::peek_changes(self, after_lsn, limit).await
    }

    async fn consume_changes(&self, upto_lsn: Lsn, limit: usize) -> PgResult<usize> {
        SlotAdapter::consume_changes(self, upto_lsn, limit).await
    }
}

enum PeekOrGet {
    Peek,
    Get,
}

async fn peek_or_get(
    client: &Client,
    slot_name: &str,
    upto_lsn: Option<Lsn>,
    upto_nchanges: Option<usize>,
    kind: PeekOrGet,
) -> PgResult<Vec<WalRecord>> {
    let func = match kind {
        PeekOrGet::Peek => "pg_logical_slot_peek_changes",
        PeekOrGet::Get => "pg_logical_slot_get_changes",
    };
    let upto_lsn_text = upto_lsn.map(|l| l.format());
    let nchanges = upto_nchanges.map(|n| n as i32);

    let sql = format!(
        "SELECT lsn::text, xid::text, data FROM {func}($1, $2::pg_lsn, $3, \
         'include-xids', '1', 'include-timestamp', 'true')"
    );

    let rows = client
        .query(&sql, &[&slot_name, &upto_lsn_text, &nchanges])
        .await
        .map_err(PgError::from)?;

    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        let lsn_text: String = row.get(0);
        let xid: String = row.get(1);
        let data: String = row.get(2);
        let lsn = Lsn::parse(&lsn_text).map_err(|_| PgError::InvalidLsn(lsn_text.clone()))?;
        out.push(WalRecord { data, lsn, xid });
    }
    Ok(out)
}

fn filter_and_cap(rows: Vec<WalRecord>, after_lsn: Lsn, limit: usize) -> Vec<WalRecord> {
    let mut filtered: Vec<WalRecord> = rows.into_iter().filter(|r| r.lsn > after_lsn).collect();
    if filtered.len() > limit {
        filtered.truncate(limit);
    }
    filtered
}

async fn slot_status(client: &Client, slot_name: &str) -> PgResult<SlotStatus> {
    let rows = client
        .query(
            "SELECT confirmed_flush_lsn::text, active FROM pg_replication_slots WHERE slot_name = $1",
            &[&slot_name],
        )
        .await
        .map_err(PgError::from)?;

    match rows.first() {
        Some(row) => Ok(SlotStatus {
            exists: true,
            confirmed_flush_lsn: row.get(0),
            active: row.get(1),
        }),
        None => Ok(SlotStatus {
            exists: false,
            confirmed_flush_lsn: None,
            active: false,
        }),
    }
}
