use async_trait::async_trait;
use cdc_core::{ClientNotifier, Lsn, TableChange};
use tracing::info;

/// Stand-in for the transport-layer `NotifyClient` capability (§6's "one
/// capability the core requires"). The actual client sync endpoint — the
/// websocket handlers that hold per-client queues — is explicitly out of
/// scope for this core (§1); this implementation only logs what would have
/// been delivered, so the controller and admin surface are runnable without
/// a concrete transport wired in.
#[derive(Debug, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl ClientNotifier for LoggingNotifier {
    async fn notify(
        &self,
        client_id: &str,
        changes: &[TableChange],
        last_lsn: Lsn,
    ) -> Result<(), String> {
        info!(
            event = "replication.notify.delivered",
            client_id,
            count = changes.len(),
            last_lsn = %last_lsn,
            "would notify client"
        );
        Ok(())
    }
}
