use std::sync::Arc;
use std::time::Duration;

use cdc_core::{ChangeTransformer, ClientNotifier, FilterCounters};
use cdc_pg::{HistoryStore, SlotSource, StoreResult};
use cdc_state::{ClientRegistry, StateStore};
use cdc_core::notify::{self, DispatchOutcome};
use cdc_core::Lsn;
use tracing::{debug, info, warn};

use crate::config::Config;

/// How often a heartbeat log line is emitted, counted in ticks (§4.9).
const HEARTBEAT_INTERVAL: u64 = 60;

/// Tunables the polling engine needs out of `Config`, split out so the engine
/// doesn't depend on unrelated config fields (admin bind address, slot name
/// used only by the adapter, ...).
#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub wal_batch_size: usize,
    pub wal_consume_size: usize,
    pub wal_batch_threshold: f64,
    pub store_batch_size: usize,
    pub skip_wal_consumption: bool,
    pub polling_interval: Duration,
    pub fast_polling_interval: Duration,
    pub max_consecutive_polls: u32,
    pub client_timeout_millis: i64,
}

impl PollerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            wal_batch_size: config.wal_batch_size,
            wal_consume_size: config.wal_consume_size,
            wal_batch_threshold: config.wal_batch_threshold,
            store_batch_size: config.store_batch_size,
            skip_wal_consumption: config.skip_wal_consumption,
            polling_interval: Duration::from_millis(config.polling_interval_ms),
            fast_polling_interval: Duration::from_millis(config.fast_polling_interval_ms),
            max_consecutive_polls: config.max_consecutive_polls,
            client_timeout_millis: config.client_timeout_millis(),
        }
    }
}

/// The outcome of a single poll tick, used by the controller to decide the
/// next interval and to log heartbeats/scenario-level detail.
#[derive(Debug)]
pub enum TickOutcome {
    /// The slot was busy; treated as a no-op for this cycle (§4.2, §7).
    SlotBusy,
    /// The peek returned nothing.
    NoChanges,
    /// A batch was peeked but every entry was filtered out; the LSN still
    /// advances (§4.9 step 6, §8's "transform(wal) = ∅" property).
    AdvancedOnly { last_lsn: Lsn, batch_len: usize },
    /// A batch produced changes that were stored and (if storage succeeded)
    /// dispatched to clients.
    Processed {
        last_lsn: Lsn,
        batch_len: usize,
        changes: usize,
        stored: StoreResult,
        notified: Option<DispatchOutcome>,
    },
}

impl TickOutcome {
    /// Whether this batch should trigger fast-poll pacing (§4.9: peek
    /// returned at least `walBatchThreshold * walBatchSize` rows).
    fn batch_len(&self) -> usize {
        match self {
            TickOutcome::SlotBusy | TickOutcome::NoChanges => 0,
            TickOutcome::AdvancedOnly { batch_len, .. } => *batch_len,
            TickOutcome::Processed { batch_len, .. } => *batch_len,
        }
    }
}

/// Peek/consume of logical-slot changes with LSN bookkeeping, reentrancy
/// guards, and adaptive pacing (C9). Owned exclusively by the controller
/// actor, which is what gives every `tick()` call the "operations do not
/// interleave with themselves" guarantee — there is no internal locking here.
pub struct PollingEngine {
    slot: Arc<dyn SlotSource>,
    history: Arc<dyn HistoryStore>,
    state: Arc<dyn StateStore>,
    registry: Arc<dyn ClientRegistry>,
    notifier: Arc<dyn ClientNotifier>,
    transformer: ChangeTransformer,
    config: PollerConfig,
    counters: FilterCounters,
    completed_first_poll: bool,
    counter: u64,
    consecutive_fast: u32,
    initial_poll_tx: tokio::sync::watch::Sender<bool>,
}

impl PollingEngine {
    pub fn new(
        slot: Arc<dyn SlotSource>,
        history: Arc<dyn HistoryStore>,
        state: Arc<dyn StateStore>,
        registry: Arc<dyn ClientRegistry>,
        notifier: Arc<dyn ClientNotifier>,
        transformer: ChangeTransformer,
        config: PollerConfig,
    ) -> Self {
        let (initial_poll_tx, _rx) = tokio::sync::watch::channel(false);
        Self {
            slot,
            history,
            state,
            registry,
            notifier,
            transformer,
            config,
            counters: FilterCounters::default(),
            completed_first_poll: false,
            counter: 0,
            consecutive_fast: 0,
            initial_poll_tx,
        }
    }

    /// A one-shot completion latch that resolves the first time the engine
    /// completes step 3 or steps 6-9 of §4.9 after startup.
    pub fn wait_for_initial_poll(&self) -> impl std::future::Future<Output = ()> {
        let mut rx = self.initial_poll_tx.subscribe();
        async move {
            let _ = rx.wait_for(|done| *done).await;
        }
    }

    pub fn has_completed_first_poll(&self) -> bool {
        self.completed_first_poll
    }

    pub fn filter_counters(&self) -> &FilterCounters {
        &self.counters
    }

    pub fn poll_counter(&self) -> u64 {
        self.counter
    }

    /// Reset the "has this engine completed its first poll since restart"
    /// latch, used when the controller re-enters `Initializing` after waking
    /// from hibernation (§4.10: "rebuilds its initial poll latch").
    pub fn reset_initial_poll_latch(&mut self) {
        self.completed_first_poll = false;
        let (tx, _rx) = tokio::sync::watch::channel(false);
        self.initial_poll_tx = tx;
    }

    /// The interval to wait before the next tick, given the outcome of the
    /// last one: fast pacing kicks in once the last peek returned at least
    /// `walBatchThreshold * walBatchSize` rows, for up to
    /// `maxConsecutivePolls` consecutive cycles.
    pub fn next_interval(&mut self, last: &TickOutcome) -> Duration {
        let threshold = (self.config.wal_batch_threshold * self.config.wal_batch_size as f64) as usize;
        let saturated = last.batch_len() >= threshold.max(1);

        if saturated && self.consecutive_fast < self.config.max_consecutive_polls {
            self.consecutive_fast += 1;
            self.config.fast_polling_interval
        } else {
            self.consecutive_fast = 0;
            self.config.polling_interval
        }
    }

    /// Run one poll tick per the algorithm in §4.9.
    pub async fn tick(&mut self) -> TickOutcome {
        self.counter += 1;
        if self.counter % HEARTBEAT_INTERVAL == 0 {
            if let Ok(lsn) = self.state.get_confirmed_lsn() {
                info!(
                    event = "replication.poll.heartbeat",
                    counter = self.counter,
                    interval_ms = self.config.polling_interval.as_millis() as u64,
                    current_lsn = %lsn,
                    "heartbeat"
                );
            }
        }

        let current_lsn = match self.state.get_confirmed_lsn() {
            Ok(lsn) => lsn,
            Err(e) => {
                warn!(event = "replication.state.read_failed", error = %e, "failed to read confirmed_lsn");
                return TickOutcome::NoChanges;
            }
        };

        let batch = match self.slot.peek_changes(current_lsn, self.config.wal_batch_size).await {
            Ok(batch) => batch,
            Err(e) if e.is_slot_busy() => {
                debug!(event = "replication.poll.slot_busy", "slot busy, skipping this tick");
                return TickOutcome::SlotBusy;
            }
            Err(e) => {
                warn!(event = "replication.poll.slot_unavailable", error = %e, "peek failed");
                return TickOutcome::SlotBusy;
            }
        };

        if batch.is_empty() {
            if !self.completed_first_poll {
                info!(event = "replication.poll.no_changes", "no changes on initial poll");
                self.completed_first_poll = true;
                let _ = self.initial_poll_tx.send(true);
            }
            return TickOutcome::NoChanges;
        }

        let last_lsn = batch.last().expect("checked non-empty above").lsn;
        let batch_len = batch.len();

        let mut changes = Vec::new();
        for record in &batch {
            changes.extend(self.transformer.transform(record, &mut self.counters));
        }

        if changes.is_empty() {
            if let Err(e) = self.state.set_confirmed_lsn(last_lsn) {
                warn!(event = "replication.state.write_failed", error = %e, "failed to advance confirmed_lsn");
            }
            self.mark_first_poll_complete();
            return TickOutcome::AdvancedOnly { last_lsn, batch_len };
        }

        let stored = match self.history.store(&changes, self.config.store_batch_size).await {
            Ok(result) => result,
            Err(e) => {
                warn!(event = "replication.history.write_failed", error = %e, "history store call failed outright");
                StoreResult {
                    success_count: 0,
                    total_count: changes.len(),
                }
            }
        };

        // Always advance, even on failure, to avoid unbounded reprocessing of
        // poisonous data (§7 HistoryWriteFailure, §9 open question #1).
        if let Err(e) = self.state.set_confirmed_lsn(last_lsn) {
            warn!(event = "replication.state.write_failed", error = %e, "failed to advance confirmed_lsn");
        }
        if !stored.succeeded() {
            warn!(
                event = "replication.history.advance_despite_failure",
                last_lsn = %last_lsn,
                "advancing confirmed_lsn despite a failed store"
            );
        }

        let notified = if stored.succeeded() {
            let now = chrono::Utc::now().timestamp_millis();
            match self.registry.list_active(now, self.config.client_timeout_millis) {
                Ok(clients) => Some(notify::dispatch(&changes, &clients, last_lsn, self.notifier.as_ref()).await),
                Err(e) => {
                    warn!(event = "replication.registry.read_failed", error = %e, "failed to list active clients");
                    None
                }
            }
        } else {
            None
        };

        if !self.config.skip_wal_consumption {
            if let Err(e) = self.slot.consume_changes(last_lsn, self.config.wal_consume_size).await {
                warn!(event = "replication.slot.consume_failed", error = %e, "best-effort slot consume failed");
            }
        }

        self.mark_first_poll_complete();
        TickOutcome::Processed {
            last_lsn,
            batch_len,
            changes: changes.len(),
            stored,
            notified,
        }
    }

    fn mark_first_poll_complete(&mut self) {
        if !self.completed_first_poll {
            self.completed_first_poll = true;
            let _ = self.initial_poll_tx.send(true);
        }
    }
}
