use std::path::Path;
use std::sync::Mutex;

use cdc_core::ClientState;
use rusqlite::Connection;
use tracing::{info, warn};

use crate::error::StateResult;
use crate::registry::ClientRegistry;
use crate::store::StateStore;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS kv_state (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS clients (
        client_id TEXT PRIMARY KEY,
        active INTEGER NOT NULL,
        last_seen INTEGER NOT NULL
    );
";

/// SQLite-backed durable store for the controller actor: the `replication_state`/
/// `last_active_timestamp`/alarm keys (`StateStore`) and the client directory
/// (`ClientRegistry`) live side by side in one file, matching §6's "persisted
/// state layout" being a single keyed store owned by one actor.
pub struct SqliteStateStore {
    conn: Mutex<Connection>,
}

impl SqliteStateStore {
    /// Open or create a state store at the given path.
    pub fn open(path: impl AsRef<Path>) -> StateResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening state store");

        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory state store (for testing).
    pub fn in_memory() -> StateResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Rows that fail to parse as a `ClientState` are treated as corrupt and
    /// deleted in place rather than surfaced; `ClientRegistryCorruption` (§7)
    /// recovers by dropping the offending entry, not by aborting the scan.
    fn load_clients(&self, conn: &Connection) -> StateResult<Vec<ClientState>> {
        let mut stmt = conn.prepare("SELECT client_id, active, last_seen FROM clients")?;
        let rows = stmt.query_map([], |row| {
            Ok(ClientState {
                client_id: row.get(0)?,
                active: row.get::<_, i64>(1)? != 0,
                last_seen_millis: row.get(2)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            match row {
                Ok(c) => out.push(c),
                Err(e) => warn!(
                    event = "replication.registry.corrupt_entry",
                    error = %e,
                    "dropping unparsable client entry"
                ),
            }
        }
        Ok(out)
    }

    fn delete_client(&self, conn: &Connection, client_id: &str) -> StateResult<()> {
        conn.execute("DELETE FROM clients WHERE client_id = ?1", [client_id])?;
        Ok(())
    }
}

impl StateStore for SqliteStateStore {
    fn get(&self, key: &str) -> StateResult<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            "SELECT value FROM kv_state WHERE key = ?1",
            [key],
            |row| row.get::<_, String>(0),
        );
        match result {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &str, value: &str) -> StateResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO kv_state (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = ?2",
            rusqlite::params![key, value],
        )?;
        Ok(())
    }
}

impl ClientRegistry for SqliteStateStore {
    fn upsert(&self, client: &ClientState) -> StateResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO clients (client_id, active, last_seen) VALUES (?1, ?2, ?3)
             ON CONFLICT(client_id) DO UPDATE SET active = ?2, last_seen = ?3",
            rusqlite::params![client.client_id, client.active as i64, client.last_seen_millis],
        )?;
        Ok(())
    }

    fn has_active(&self, now_millis: i64, timeout_millis: i64) -> StateResult<bool> {
        let conn = self.conn.lock().unwrap();
        let clients = self.load_clients(&conn)?;
        let mut any_active = false;
        for c in &clients {
            if !c.active || c.is_stale(now_millis, timeout_millis) {
                self.delete_client(&conn, &c.client_id)?;
            } else {
                any_active = true;
            }
        }
        Ok(any_active)
    }

    fn list_active(&self, now_millis: i64, timeout_millis: i64) -> StateResult<Vec<ClientState>> {
        let conn = self.conn.lock().unwrap();
        let clients = self.load_clients(&conn)?;
        let mut out = Vec::new();
        for c in clients {
            if c.is_stale(now_millis, timeout_millis) {
                self.delete_client(&conn, &c.client_id)?;
                continue;
            }
            if c.active {
                out.push(c);
            }
        }
        Ok(out)
    }

    fn purge(&self, now_millis: i64, timeout_millis: i64) -> StateResult<usize> {
        let conn = self.conn.lock().unwrap();
        let clients = self.load_clients(&conn)?;
        let mut removed = 0;
        for c in &clients {
            if !c.active || c.is_stale(now_millis, timeout_millis) {
                self.delete_client(&conn, &c.client_id)?;
                removed += 1;
            }
        }
        drop(conn);
        self.put("last_full_cleanup_time", &now_millis.to_string())?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdc_core::Lsn;

    fn client(id: &str, active: bool, last_seen: i64) -> ClientState {
        ClientState {
            client_id: id.into(),
            active,
            last_seen_millis: last_seen,
        }
    }

    #[test]
    fn kv_state_roundtrips_and_updates() {
        let store = SqliteStateStore::in_memory().unwrap();
        assert_eq!(store.get("confirmed_lsn").unwrap(), None);

        store.put("confirmed_lsn", "0/10A").unwrap();
        assert_eq!(store.get("confirmed_lsn").unwrap().as_deref(), Some("0/10A"));

        store.put("confirmed_lsn", "0/20B").unwrap();
        assert_eq!(store.get("confirmed_lsn").unwrap().as_deref(), Some("0/20B"));
    }

    #[test]
    fn cold_start_default_lsn_via_store_trait_helpers() {
        let store = SqliteStateStore::in_memory().unwrap();
        assert_eq!(store.get_confirmed_lsn().unwrap(), Lsn::ZERO);
        store.set_confirmed_lsn(Lsn::parse("0/5").unwrap()).unwrap();
        assert_eq!(store.get_confirmed_lsn().unwrap(), Lsn::parse("0/5").unwrap());
    }

    #[test]
    fn has_active_purges_inactive_and_stale_entries() {
        let store = SqliteStateStore::in_memory().unwrap();
        store.upsert(&client("c-A", true, 1_000)).unwrap();
        store.upsert(&client("c-B", false, 1_000)).unwrap();
        store.upsert(&client("c-C", true, 0)).unwrap();

        assert!(store.has_active(1_100, 10_000).unwrap());

        let remaining = store.load_clients(&store.conn.lock().unwrap()).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].client_id, "c-A");
    }

    #[test]
    fn empty_registry_has_no_active_clients() {
        let store = SqliteStateStore::in_memory().unwrap();
        assert!(!store.has_active(0, 10_000).unwrap());
    }

    #[test]
    fn list_active_excludes_stale_and_inactive() {
        let store = SqliteStateStore::in_memory().unwrap();
        store.upsert(&client("c-A", true, 1_000)).unwrap();
        store.upsert(&client("c-B", true, 0)).unwrap();

        let active = store.list_active(1_100, 500).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].client_id, "c-A");
    }

    #[test]
    fn purge_removes_everything_stale_or_inactive_and_tracks_timestamp() {
        let store = SqliteStateStore::in_memory().unwrap();
        store.upsert(&client("c-A", true, 1_000)).unwrap();
        store.upsert(&client("c-B", false, 1_000)).unwrap();

        let removed = store.purge(1_100, 10_000).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(
            store.get("last_full_cleanup_time").unwrap().as_deref(),
            Some("1100")
        );
    }
}
