//! SQLite-backed partition storage
//!
//! Every partition owns its own database file: registry partitions get
//! `colonies` and `agents` tables, the metrics partition a `kv` table.
//! Sequence-valued fields (`endpoints`, `metadata`, `observed_endpoint`,
//! `public_endpoint`) are stored as serialized JSON columns.

use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use thiserror::Error;

use coral::types::{AgentRecord, ColonyRecord, ObservedEndpoint, PublicEndpoint};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn open_connection(path: &Path) -> Result<Connection, StoreError> {
    let conn = Connection::open(path)?;
    let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
    conn.busy_timeout(std::time::Duration::from_millis(5_000))?;
    Ok(conn)
}

// ==================== Registry Store ====================

/// Storage for one registry partition.
pub struct RegistryStore {
    conn: Connection,
}

impl RegistryStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let store = Self {
            conn: open_connection(path)?,
        };
        store.initialize()?;
        Ok(store)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS colonies (
                mesh_id           TEXT PRIMARY KEY,
                pubkey            TEXT NOT NULL,
                endpoints         TEXT NOT NULL,
                mesh_ipv4         TEXT,
                mesh_ipv6         TEXT,
                connect_port      INTEGER,
                public_port       INTEGER,
                metadata          TEXT NOT NULL,
                observed_endpoint TEXT,
                public_endpoint   TEXT,
                nat_hint          INTEGER NOT NULL DEFAULT 0,
                created_at        INTEGER NOT NULL,
                updated_at        INTEGER NOT NULL,
                expires_at        INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_colonies_expires_at ON colonies(expires_at);
            CREATE TABLE IF NOT EXISTS agents (
                agent_id          TEXT PRIMARY KEY,
                mesh_id           TEXT NOT NULL,
                pubkey            TEXT NOT NULL,
                endpoints         TEXT NOT NULL,
                metadata          TEXT NOT NULL,
                observed_endpoint TEXT,
                created_at        INTEGER NOT NULL,
                updated_at        INTEGER NOT NULL,
                expires_at        INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_agents_mesh_id ON agents(mesh_id);
            CREATE INDEX IF NOT EXISTS idx_agents_expires_at ON agents(expires_at);",
        )?;
        Ok(())
    }

    pub fn upsert_colony(&self, record: &ColonyRecord) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO colonies (mesh_id, pubkey, endpoints, mesh_ipv4, mesh_ipv6,
                connect_port, public_port, metadata, observed_endpoint, public_endpoint,
                nat_hint, created_at, updated_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(mesh_id) DO UPDATE SET
                pubkey = excluded.pubkey,
                endpoints = excluded.endpoints,
                mesh_ipv4 = excluded.mesh_ipv4,
                mesh_ipv6 = excluded.mesh_ipv6,
                connect_port = excluded.connect_port,
                public_port = excluded.public_port,
                metadata = excluded.metadata,
                observed_endpoint = excluded.observed_endpoint,
                public_endpoint = excluded.public_endpoint,
                nat_hint = excluded.nat_hint,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                expires_at = excluded.expires_at",
            params![
                record.mesh_id,
                record.pubkey,
                serde_json::to_string(&record.endpoints)?,
                record.mesh_ipv4,
                record.mesh_ipv6,
                record.connect_port,
                record.public_port,
                serde_json::to_string(&record.metadata)?,
                record
                    .observed_endpoint
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                record
                    .public_endpoint
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                record.nat_hint,
                record.created_at,
                record.updated_at,
                record.expires_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_colony(&self, mesh_id: &str) -> Result<Option<ColonyRecord>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT mesh_id, pubkey, endpoints, mesh_ipv4, mesh_ipv6, connect_port,
                        public_port, metadata, observed_endpoint, public_endpoint, nat_hint,
                        created_at, updated_at, expires_at
                 FROM colonies WHERE mesh_id = ?1",
                params![mesh_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<u16>>(5)?,
                        row.get::<_, Option<u16>>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, Option<String>>(8)?,
                        row.get::<_, Option<String>>(9)?,
                        row.get::<_, i32>(10)?,
                        row.get::<_, i64>(11)?,
                        row.get::<_, i64>(12)?,
                        row.get::<_, i64>(13)?,
                    ))
                },
            )
            .optional()?;

        let Some((
            mesh_id,
            pubkey,
            endpoints,
            mesh_ipv4,
            mesh_ipv6,
            connect_port,
            public_port,
            metadata,
            observed_endpoint,
            public_endpoint,
            nat_hint,
            created_at,
            updated_at,
            expires_at,
        )) = row
        else {
            return Ok(None);
        };

        Ok(Some(ColonyRecord {
            mesh_id,
            pubkey,
            endpoints: serde_json::from_str(&endpoints)?,
            mesh_ipv4,
            mesh_ipv6,
            connect_port,
            public_port,
            metadata: serde_json::from_str(&metadata)?,
            observed_endpoint: observed_endpoint
                .as_deref()
                .map(serde_json::from_str::<ObservedEndpoint>)
                .transpose()?,
            public_endpoint: public_endpoint
                .as_deref()
                .map(serde_json::from_str::<PublicEndpoint>)
                .transpose()?,
            nat_hint,
            created_at,
            updated_at,
            expires_at,
        }))
    }

    pub fn upsert_agent(&self, record: &AgentRecord) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO agents (agent_id, mesh_id, pubkey, endpoints, metadata,
                observed_endpoint, created_at, updated_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(agent_id) DO UPDATE SET
                mesh_id = excluded.mesh_id,
                pubkey = excluded.pubkey,
                endpoints = excluded.endpoints,
                metadata = excluded.metadata,
                observed_endpoint = excluded.observed_endpoint,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                expires_at = excluded.expires_at",
            params![
                record.agent_id,
                record.mesh_id,
                record.pubkey,
                serde_json::to_string(&record.endpoints)?,
                serde_json::to_string(&record.metadata)?,
                record
                    .observed_endpoint
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                record.created_at,
                record.updated_at,
                record.expires_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_agent(&self, agent_id: &str) -> Result<Option<AgentRecord>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT agent_id, mesh_id, pubkey, endpoints, metadata, observed_endpoint,
                        created_at, updated_at, expires_at
                 FROM agents WHERE agent_id = ?1",
                params![agent_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, i64>(6)?,
                        row.get::<_, i64>(7)?,
                        row.get::<_, i64>(8)?,
                    ))
                },
            )
            .optional()?;

        let Some((
            agent_id,
            mesh_id,
            pubkey,
            endpoints,
            metadata,
            observed_endpoint,
            created_at,
            updated_at,
            expires_at,
        )) = row
        else {
            return Ok(None);
        };

        Ok(Some(AgentRecord {
            agent_id,
            mesh_id,
            pubkey,
            endpoints: serde_json::from_str(&endpoints)?,
            metadata: serde_json::from_str(&metadata)?,
            observed_endpoint: observed_endpoint
                .as_deref()
                .map(serde_json::from_str::<ObservedEndpoint>)
                .transpose()?,
            created_at,
            updated_at,
            expires_at,
        }))
    }

    pub fn delete_expired_colonies(&self, now: i64) -> Result<usize, StoreError> {
        Ok(self
            .conn
            .execute("DELETE FROM colonies WHERE expires_at < ?1", params![now])?)
    }

    pub fn delete_expired_agents(&self, now: i64) -> Result<usize, StoreError> {
        Ok(self
            .conn
            .execute("DELETE FROM agents WHERE expires_at < ?1", params![now])?)
    }

    /// Counts of non-expired (colonies, agents).
    pub fn count_live(&self, now: i64) -> Result<(i64, i64), StoreError> {
        let colonies: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM colonies WHERE expires_at >= ?1",
            params![now],
            |row| row.get(0),
        )?;
        let agents: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM agents WHERE expires_at >= ?1",
            params![now],
            |row| row.get(0),
        )?;
        Ok((colonies, agents))
    }
}

// ==================== Metrics Store ====================

/// Key-value storage for the metrics partition. Keys are prefixed
/// `count:<op>:<iso-hour>` and `cleanup:<origin_id>`.
pub struct MetricsStore {
    conn: Connection,
}

impl MetricsStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let store = Self {
            conn: open_connection(path)?,
        };
        store.initialize()?;
        Ok(store)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?)
    }

    pub fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// Writes a batch of entries in one transaction.
    pub fn put_many(&mut self, entries: &[(String, String)]) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            )?;
            for (key, value) in entries {
                stmt.execute(params![key, value])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value FROM kv WHERE key LIKE ?1 || '%' ORDER BY key")?;
        let rows = stmt.query_map(params![prefix], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    pub fn delete_keys(&mut self, keys: &[String]) -> Result<usize, StoreError> {
        let tx = self.conn.transaction()?;
        let mut deleted = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM kv WHERE key = ?1")?;
            for key in keys {
                deleted += stmt.execute(params![key])?;
            }
        }
        tx.commit()?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample_colony(mesh_id: &str, expires_at: i64) -> ColonyRecord {
        ColonyRecord {
            mesh_id: mesh_id.to_string(),
            pubkey: "dGVzdA==".to_string(),
            endpoints: vec!["1.2.3.4:51820".to_string()],
            mesh_ipv4: Some("10.42.0.1".to_string()),
            mesh_ipv6: None,
            connect_port: Some(9000),
            public_port: None,
            metadata: HashMap::from([("region".to_string(), "eu".to_string())]),
            observed_endpoint: Some(ObservedEndpoint {
                ip: "1.2.3.4".to_string(),
                port: 0,
                protocol: "udp".to_string(),
            }),
            public_endpoint: None,
            nat_hint: 0,
            created_at: 1_000,
            updated_at: 1_000,
            expires_at,
        }
    }

    #[test]
    fn test_colony_roundtrip() {
        let store = RegistryStore::open_in_memory().unwrap();
        let record = sample_colony("m1", 10_000);
        store.upsert_colony(&record).unwrap();

        let loaded = store.get_colony("m1").unwrap().unwrap();
        assert_eq!(loaded, record);
        assert!(store.get_colony("missing").unwrap().is_none());
    }

    #[test]
    fn test_colony_upsert_overwrites() {
        let store = RegistryStore::open_in_memory().unwrap();
        store.upsert_colony(&sample_colony("m1", 10_000)).unwrap();

        let mut updated = sample_colony("m1", 20_000);
        updated.endpoints = vec!["5.6.7.8:51820".to_string()];
        updated.updated_at = 2_000;
        store.upsert_colony(&updated).unwrap();

        let loaded = store.get_colony("m1").unwrap().unwrap();
        assert_eq!(loaded.endpoints, vec!["5.6.7.8:51820".to_string()]);
        assert_eq!(loaded.expires_at, 20_000);
    }

    #[test]
    fn test_agent_roundtrip() {
        let store = RegistryStore::open_in_memory().unwrap();
        let record = AgentRecord {
            agent_id: "a1".to_string(),
            mesh_id: "m1".to_string(),
            pubkey: "cGs=".to_string(),
            endpoints: vec![],
            metadata: HashMap::new(),
            observed_endpoint: None,
            created_at: 1,
            updated_at: 1,
            expires_at: 10_000,
        };
        store.upsert_agent(&record).unwrap();
        assert_eq!(store.get_agent("a1").unwrap().unwrap(), record);
    }

    #[test]
    fn test_expiry_sweep_and_counts() {
        let store = RegistryStore::open_in_memory().unwrap();
        store.upsert_colony(&sample_colony("live", 10_000)).unwrap();
        store.upsert_colony(&sample_colony("dead", 500)).unwrap();

        assert_eq!(store.count_live(1_000).unwrap(), (1, 0));
        assert_eq!(store.delete_expired_colonies(1_000).unwrap(), 1);
        assert_eq!(store.delete_expired_colonies(1_000).unwrap(), 0);
        assert!(store.get_colony("dead").unwrap().is_none());
        assert!(store.get_colony("live").unwrap().is_some());
    }

    #[test]
    fn test_kv_roundtrip_and_scan() {
        let mut store = MetricsStore::open_in_memory().unwrap();
        store.put("count:RegisterColony:2026-08-02T10", "3").unwrap();
        store
            .put_many(&[
                ("count:RegisterColony:2026-08-02T11".to_string(), "5".to_string()),
                ("cleanup:abc".to_string(), "{}".to_string()),
            ])
            .unwrap();

        assert_eq!(
            store.get("count:RegisterColony:2026-08-02T11").unwrap(),
            Some("5".to_string())
        );

        let counts = store.scan_prefix("count:").unwrap();
        assert_eq!(counts.len(), 2);
        let cleanups = store.scan_prefix("cleanup:").unwrap();
        assert_eq!(cleanups.len(), 1);

        store
            .delete_keys(&["count:RegisterColony:2026-08-02T10".to_string()])
            .unwrap();
        assert_eq!(store.scan_prefix("count:").unwrap().len(), 1);
    }
}
