use tokio_postgres::{Client, NoTls};
use tracing::warn;

use crate::error::{PgError, PgResult};

/// Open a fresh connection and spawn its driver task. The driver task ends
/// as soon as the returned `Client` is dropped, which is how every adapter
/// operation "releases its connection on every exit path."
pub(crate) async fn connect(connection_string: &str) -> PgResult<Client> {
    let (client, connection) = tokio_postgres::connect(connection_string, NoTls)
        .await
        .map_err(|e| PgError::SlotUnavailable(e.to_string()))?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            warn!(event = "replication.pg.connection_lost", error = %e, "postgres connection ended");
        }
    });
    Ok(client)
}
