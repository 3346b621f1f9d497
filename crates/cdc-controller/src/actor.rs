use std::sync::Arc;
use std::time::Duration;

use cdc_core::{ClientNotifier, ClientState, DomainTableFilter, ChangeTransformer, Lsn};
use cdc_pg::{HistoryStore, PeekHistoryResult, SlotSource, SlotStatus};
use cdc_state::{ClientRegistry, StateStore};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::config::Config;
use crate::poller::{PollerConfig, PollingEngine};

/// Single-writer actor lifecycle states (§4.10). Persisted nowhere; derived
/// fresh from `HasActive()`/the initial poll on every cold start or wake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorState {
    Cold,
    Initializing,
    Active,
    Hibernating,
    Stopping,
}

const CLIENT_CHECK_INTERVAL: Duration = Duration::from_secs(60);
const HIBERNATION_CHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Serialize)]
pub struct InitResult {
    pub success: bool,
    pub slot_status: SlotStatus,
    pub state: ReplicationState,
}

#[derive(Debug, Serialize)]
pub struct ReplicationState {
    pub confirmed_lsn: String,
    pub state: ActorState,
}

#[derive(Debug, Serialize)]
pub struct StatusResult {
    pub slot: SlotSummary,
    pub metrics: Metrics,
}

#[derive(Debug, Serialize)]
pub struct SlotSummary {
    pub name: String,
    pub status: SlotStatus,
}

#[derive(Debug, Serialize)]
pub struct Metrics {
    pub state: ActorState,
    pub confirmed_lsn: String,
    pub last_active_timestamp: Option<i64>,
    pub active_clients: usize,
    pub poll_counter: u64,
    pub filter_invalid_json: u64,
    pub filter_delete_missing_oldkeys: u64,
    pub filter_column_misaligned: u64,
}

#[derive(Debug, Serialize)]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub slot_exists: bool,
    pub confirmed_lsn: String,
    pub last_active_timestamp: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct VerificationCheck {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub struct VerificationResult {
    pub ok: bool,
    pub checks: Vec<VerificationCheck>,
}

#[derive(Debug, Serialize)]
pub struct InitialCleanupResult {
    pub removed_clients: usize,
}

#[derive(Debug, Serialize)]
pub struct ClientsCleanupResult {
    pub success: bool,
    pub removed_count: usize,
}

pub type ActorResult<T> = Result<T, String>;

enum ActorMessage {
    Init(oneshot::Sender<ActorResult<InitResult>>),
    Status(oneshot::Sender<ActorResult<StatusResult>>),
    Health(oneshot::Sender<HealthCheckResult>),
    Verify(oneshot::Sender<VerificationResult>),
    Cleanup(oneshot::Sender<ActorResult<InitialCleanupResult>>),
    Peek {
        from_lsn: Lsn,
        limit: usize,
        reply: oneshot::Sender<ActorResult<PeekHistoryResult>>,
    },
    ListClients(oneshot::Sender<Vec<ClientState>>),
    CleanupClients(oneshot::Sender<ClientsCleanupResult>),
    Shutdown(oneshot::Sender<()>),
}

/// A handle callers (the HTTP surface, the CLI) use to talk to the actor.
/// Every public operation is a message with a reply channel, giving the
/// "operations do not interleave with themselves" guarantee from serialized
/// dispatch rather than a mutex (§5, §9).
#[derive(Clone)]
pub struct ControllerHandle {
    tx: mpsc::Sender<ActorMessage>,
}

impl ControllerHandle {
    pub async fn init(&self) -> ActorResult<InitResult> {
        self.call(ActorMessage::Init).await
    }

    pub async fn status(&self) -> ActorResult<StatusResult> {
        self.call(ActorMessage::Status).await
    }

    pub async fn health(&self) -> HealthCheckResult {
        self.call_infallible(ActorMessage::Health).await
    }

    pub async fn verify(&self) -> VerificationResult {
        self.call_infallible(ActorMessage::Verify).await
    }

    pub async fn cleanup(&self) -> ActorResult<InitialCleanupResult> {
        self.call(ActorMessage::Cleanup).await
    }

    pub async fn peek(&self, from_lsn: Lsn, limit: usize) -> ActorResult<PeekHistoryResult> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ActorMessage::Peek { from_lsn, limit, reply })
            .await
            .map_err(|_| "controller actor is not running".to_string())?;
        rx.await.map_err(|_| "controller actor dropped the reply channel".to_string())?
    }

    pub async fn list_clients(&self) -> Vec<ClientState> {
        self.call_infallible(ActorMessage::ListClients).await
    }

    pub async fn cleanup_clients(&self) -> ClientsCleanupResult {
        self.call_infallible(ActorMessage::CleanupClients).await
    }

    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(ActorMessage::Shutdown(reply)).await.is_ok() {
            let _ = rx.await;
        }
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<ActorResult<T>>) -> ActorMessage,
    ) -> ActorResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| "controller actor is not running".to_string())?;
        rx.await.map_err(|_| "controller actor dropped the reply channel".to_string())?
    }

    async fn call_infallible<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> ActorMessage) -> T {
        let (reply, rx) = oneshot::channel();
        // The mailbox only closes during shutdown; callers racing a shutdown
        // get a best-effort default rather than a panic.
        if self.tx.send(build(reply)).await.is_err() {
            unreachable!("actor task owns the receiver for its own lifetime");
        }
        rx.await.expect("actor never drops a reply sender without answering")
    }
}

/// Dependencies the controller actor needs, assembled once in `main` and
/// moved into the spawned task (§9: "global singletons -> injected
/// dependencies").
pub struct ControllerDeps {
    pub slot: Arc<dyn SlotSource>,
    pub status_slot: Arc<cdc_pg::SlotAdapter>,
    pub history: Arc<dyn HistoryStore>,
    pub state: Arc<dyn StateStore>,
    pub registry: Arc<dyn ClientRegistry>,
    pub notifier: Arc<dyn ClientNotifier>,
    pub config: Config,
}

/// Spawn the controller actor and return a handle to it. The actor begins in
/// `Cold` and does nothing until the first `Init` message (or the CLI's
/// `run` command, which sends one immediately on startup).
pub fn spawn(deps: ControllerDeps) -> ControllerHandle {
    let (tx, rx) = mpsc::channel(32);
    tokio::spawn(run(deps, rx));
    ControllerHandle { tx }
}

async fn run(deps: ControllerDeps, mut mailbox: mpsc::Receiver<ActorMessage>) {
    let filter = DomainTableFilter::new(deps.config.tracked_tables.iter().cloned());
    let transformer = ChangeTransformer::new(filter);
    let slot_name = deps.config.slot.clone();
    let poller_config = PollerConfig::from_config(&deps.config);
    let initial_interval = poller_config.polling_interval;

    let mut poller = PollingEngine::new(
        deps.slot.clone(),
        deps.history.clone(),
        deps.state.clone(),
        deps.registry.clone(),
        deps.notifier.clone(),
        transformer.clone(),
        poller_config,
    );

    let mut state = ActorState::Cold;
    let mut poll_interval = tokio::time::interval(initial_interval);
    poll_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut client_check = tokio::time::interval(CLIENT_CHECK_INTERVAL);
    client_check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut alarm: Option<std::pin::Pin<Box<tokio::time::Sleep>>> = None;
    let mut in_flight = false;

    touch_last_active(&deps);

    loop {
        tokio::select! {
            biased;

            Some(msg) = mailbox.recv() => {
                if matches!(msg, ActorMessage::Shutdown(_)) {
                    state = ActorState::Stopping;
                    touch_last_active(&deps);
                    if let ActorMessage::Shutdown(reply) = msg {
                        let _ = reply.send(());
                    }
                    info!(event = "replication.actor.stopped", "controller actor shutting down");
                    return;
                }
                handle_message(msg, &deps, &mut poller, &mut state, &slot_name).await;
            }

            _ = poll_interval.tick(), if state == ActorState::Active || state == ActorState::Initializing => {
                if in_flight {
                    // Reentrant fire while a tick is still running: skipped, no queuing (§4.9).
                    continue;
                }
                in_flight = true;
                let outcome = poller.tick().await;
                in_flight = false;
                poll_interval = tokio::time::interval(poller.next_interval(&outcome));
                poll_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

                if state == ActorState::Initializing && poller.has_completed_first_poll() {
                    state = transition_after_initial_poll(&deps, &mut alarm);
                }
            }

            _ = client_check.tick(), if state == ActorState::Active => {
                let now = chrono::Utc::now().timestamp_millis();
                let has_active = deps.registry.has_active(now, deps.config.client_timeout_millis()).unwrap_or(true);
                if !has_active {
                    info!(event = "replication.actor.hibernate", "no active clients, hibernating");
                    state = ActorState::Hibernating;
                    touch_last_active(&deps);
                    alarm = Some(Box::pin(tokio::time::sleep(HIBERNATION_CHECK_INTERVAL)));
                }
            }

            _ = async { alarm.as_mut().unwrap().as_mut().await }, if alarm.is_some() => {
                alarm = None;
                info!(event = "replication.actor.wake", "alarm fired, re-entering Initializing");
                poller.reset_initial_poll_latch();
                state = ActorState::Initializing;
                touch_last_active(&deps);
            }
        }
    }
}

fn touch_last_active(deps: &ControllerDeps) {
    let now = chrono::Utc::now().timestamp_millis();
    if let Err(e) = deps.state.set_last_active_timestamp(now) {
        warn!(event = "replication.state.write_failed", error = %e, "failed to record last_active_timestamp");
    }
}

fn transition_after_initial_poll(
    deps: &ControllerDeps,
    alarm: &mut Option<std::pin::Pin<Box<tokio::time::Sleep>>>,
) -> ActorState {
    let now = chrono::Utc::now().timestamp_millis();
    let has_active = deps
        .registry
        .has_active(now, deps.config.client_timeout_millis())
        .unwrap_or(false);
    touch_last_active(deps);
    if has_active {
        info!(event = "replication.actor.active", "clients present, entering Active");
        ActorState::Active
    } else {
        info!(event = "replication.actor.hibernate", "no clients after initial poll, hibernating");
        *alarm = Some(Box::pin(tokio::time::sleep(HIBERNATION_CHECK_INTERVAL)));
        ActorState::Hibernating
    }
}

async fn handle_message(
    msg: ActorMessage,
    deps: &ControllerDeps,
    poller: &mut PollingEngine,
    state: &mut ActorState,
    slot_name: &str,
) {
    match msg {
        ActorMessage::Init(reply) => {
            if *state == ActorState::Cold {
                *state = ActorState::Initializing;
                touch_last_active(deps);
            }
            let slot_status = deps
                .status_slot
                .ensure_slot()
                .await
                .map_err(|e| e.to_string());
            let result = slot_status.map(|slot_status| InitResult {
                success: true,
                slot_status,
                state: ReplicationState {
                    confirmed_lsn: deps.state.get_confirmed_lsn().map(|l| l.format()).unwrap_or_default(),
                    state: *state,
                },
            });
            let _ = reply.send(result);
        }

        ActorMessage::Status(reply) => {
            let slot_status = deps.status_slot.get_slot_status().await.map_err(|e| e.to_string());
            let confirmed_lsn = deps.state.get_confirmed_lsn().map(|l| l.format()).unwrap_or_default();
            let last_active = deps.state.get_last_active_timestamp().unwrap_or(None);
            let now = chrono::Utc::now().timestamp_millis();
            let active_clients = deps
                .registry
                .list_active(now, deps.config.client_timeout_millis())
                .map(|c| c.len())
                .unwrap_or(0);
            let counters = poller.filter_counters();

            let result = slot_status.map(|slot_status| StatusResult {
                slot: SlotSummary {
                    name: slot_name.to_string(),
                    status: slot_status,
                },
                metrics: Metrics {
                    state: *state,
                    confirmed_lsn,
                    last_active_timestamp: last_active,
                    active_clients,
                    poll_counter: poller.poll_counter(),
                    filter_invalid_json: counters.invalid_json,
                    filter_delete_missing_oldkeys: counters.delete_missing_oldkeys,
                    filter_column_misaligned: counters.column_misaligned,
                },
            });
            let _ = reply.send(result);
        }

        ActorMessage::Health(reply) => {
            let slot_status = deps.status_slot.get_slot_status().await;
            let confirmed_lsn = deps.state.get_confirmed_lsn().map(|l| l.format()).unwrap_or_default();
            let last_active = deps.state.get_last_active_timestamp().unwrap_or(None);
            let result = HealthCheckResult {
                healthy: slot_status.as_ref().map(|s| s.exists).unwrap_or(false),
                slot_exists: slot_status.map(|s| s.exists).unwrap_or(false),
                confirmed_lsn,
                last_active_timestamp: last_active,
            };
            let _ = reply.send(result);
        }

        ActorMessage::Verify(reply) => {
            let mut checks = Vec::new();

            let slot_status = deps.status_slot.get_slot_status().await;
            checks.push(VerificationCheck {
                name: "slot_exists".into(),
                passed: slot_status.as_ref().map(|s| s.exists).unwrap_or(false),
                detail: match &slot_status {
                    Ok(s) => format!("exists={}", s.exists),
                    Err(e) => e.to_string(),
                },
            });

            let lsn = deps.state.get_confirmed_lsn();
            checks.push(VerificationCheck {
                name: "confirmed_lsn_readable".into(),
                passed: lsn.is_ok(),
                detail: lsn.map(|l| l.format()).unwrap_or_else(|e| e.to_string()),
            });

            let now = chrono::Utc::now().timestamp_millis();
            let active = deps.registry.has_active(now, deps.config.client_timeout_millis());
            checks.push(VerificationCheck {
                name: "client_registry_reachable".into(),
                passed: active.is_ok(),
                detail: active.map(|a| format!("has_active={a}")).unwrap_or_else(|e| e.to_string()),
            });

            let ok = checks.iter().all(|c| c.passed);
            let _ = reply.send(VerificationResult { ok, checks });
        }

        ActorMessage::Cleanup(reply) => {
            let now = chrono::Utc::now().timestamp_millis();
            let result = deps
                .registry
                .purge(now, deps.config.client_timeout_millis())
                .map(|removed_clients| InitialCleanupResult { removed_clients })
                .map_err(|e| e.to_string());
            let _ = reply.send(result);
        }

        ActorMessage::Peek { from_lsn, limit, reply } => {
            let transformer_filter = DomainTableFilter::new(deps.config.tracked_tables.iter().cloned());
            let transformer = ChangeTransformer::new(transformer_filter);
            let result = deps
                .status_slot
                .peek_history(from_lsn, limit, &transformer)
                .await
                .map_err(|e| e.to_string());
            let _ = reply.send(result);
        }

        ActorMessage::ListClients(reply) => {
            let now = chrono::Utc::now().timestamp_millis();
            let clients = deps
                .registry
                .list_active(now, deps.config.client_timeout_millis())
                .unwrap_or_default();
            let _ = reply.send(clients);
        }

        ActorMessage::CleanupClients(reply) => {
            let now = chrono::Utc::now().timestamp_millis();
            let result = match deps.registry.purge(now, deps.config.client_timeout_millis()) {
                Ok(removed_count) => ClientsCleanupResult { success: true, removed_count },
                Err(_) => ClientsCleanupResult { success: false, removed_count: 0 },
            };
            let _ = reply.send(result);
        }

        ActorMessage::Shutdown(_) => unreachable!("handled by the caller before dispatch"),
    }
}
