use async_trait::async_trait;
use tracing::warn;

use crate::lsn::Lsn;
use crate::types::{ClientState, TableChange};

/// The one capability the core requires of the transport layer. The core
/// does not care what transport is used underneath; failures are non-fatal.
#[async_trait]
pub trait ClientNotifier: Send + Sync {
    async fn notify(
        &self,
        client_id: &str,
        changes: &[TableChange],
        last_lsn: Lsn,
    ) -> Result<(), String>;
}

/// Aggregate result of a single `dispatch` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub total: usize,
    pub notified: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Fan a batch of changes out to every active client, suppressing echoes of
/// changes the client itself authored. Best-effort: a failed delivery is
/// logged and counted but never blocks delivery to other clients.
pub async fn dispatch(
    changes: &[TableChange],
    clients: &[ClientState],
    last_lsn: Lsn,
    notifier: &dyn ClientNotifier,
) -> DispatchOutcome {
    let mut outcome = DispatchOutcome {
        total: clients.len(),
        ..Default::default()
    };

    for client in clients {
        let relevant: Vec<TableChange> = changes
            .iter()
            .filter(|ch| ch.client_id() != Some(client.client_id.as_str()))
            .cloned()
            .collect();

        if relevant.is_empty() {
            outcome.skipped += 1;
            continue;
        }

        match notifier.notify(&client.client_id, &relevant, last_lsn).await {
            Ok(()) => outcome.notified += 1,
            Err(err) => {
                outcome.failed += 1;
                warn!(
                    event = "replication.notify.failed",
                    client_id = %client.client_id,
                    error = %err,
                    "client notification failed"
                );
            }
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use std::sync::Mutex;

    fn change(table: &str, client_id: Option<&str>) -> TableChange {
        let mut data = Map::new();
        if let Some(cid) = client_id {
            data.insert("client_id".into(), serde_json::Value::String(cid.into()));
        }
        TableChange {
            table: table.into(),
            op: crate::types::Operation::Insert,
            data,
            lsn: Lsn::parse("0/10A").unwrap(),
            updated_at: "2025-01-01T00:00:00Z".into(),
        }
    }

    fn client(id: &str) -> ClientState {
        ClientState {
            client_id: id.into(),
            active: true,
            last_seen_millis: 0,
        }
    }

    struct RecordingNotifier {
        calls: Mutex<Vec<(String, usize)>>,
        fail_for: Vec<String>,
    }

    #[async_trait]
    impl ClientNotifier for RecordingNotifier {
        async fn notify(
            &self,
            client_id: &str,
            changes: &[TableChange],
            _last_lsn: Lsn,
        ) -> Result<(), String> {
            self.calls
                .lock()
                .unwrap()
                .push((client_id.to_string(), changes.len()));
            if self.fail_for.iter().any(|c| c == client_id) {
                Err("boom".into())
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn suppresses_echo_to_authoring_client() {
        let changes = vec![change("tasks", Some("c-A"))];
        let clients = vec![client("c-A"), client("c-B")];
        let notifier = RecordingNotifier {
            calls: Mutex::new(Vec::new()),
            fail_for: vec![],
        };

        let outcome = dispatch(&changes, &clients, Lsn::parse("0/10A").unwrap(), &notifier).await;

        assert_eq!(outcome.notified, 1);
        assert_eq!(outcome.skipped, 1);
        let calls = notifier.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "c-B");
    }

    #[tokio::test]
    async fn no_origin_delivers_to_all() {
        let changes = vec![change("tasks", None)];
        let clients = vec![client("c-A"), client("c-B")];
        let notifier = RecordingNotifier {
            calls: Mutex::new(Vec::new()),
            fail_for: vec![],
        };

        let outcome = dispatch(&changes, &clients, Lsn::parse("0/10A").unwrap(), &notifier).await;
        assert_eq!(outcome.notified, 2);
        assert_eq!(outcome.skipped, 0);
    }

    #[tokio::test]
    async fn a_failed_delivery_does_not_block_others() {
        let changes = vec![change("tasks", None)];
        let clients = vec![client("c-A"), client("c-B")];
        let notifier = RecordingNotifier {
            calls: Mutex::new(Vec::new()),
            fail_for: vec!["c-A".into()],
        };

        let outcome = dispatch(&changes, &clients, Lsn::parse("0/10A").unwrap(), &notifier).await;
        assert_eq!(outcome.notified, 1);
        assert_eq!(outcome.failed, 1);
    }
}
