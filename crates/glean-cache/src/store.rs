//! Persistent table stores.
//!
//! A [`TableStore`] holds serialized record bodies, one logical table per
//! record kind, with secondary `(index, key) -> id` lookups. A `put`
//! replaces a row and all of its index entries in one step, so readers
//! never see a body with stale index entries.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Mutex;

use dashmap::DashMap;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use crate::error::StoreFault;
use crate::records::Table;

/// A stored row: identifier plus serialized body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRow {
    pub id: String,
    pub body: String,
}

/// Storage engine behind the record store.
///
/// Rows come back ordered by identifier.
pub trait TableStore: Send + Sync {
    /// Insert or replace a row and its index entries.
    fn put(
        &self,
        table: Table,
        id: &str,
        body: &str,
        index: &[(&'static str, String)],
    ) -> Result<(), StoreFault>;

    /// Fetch one row's body.
    fn get(&self, table: Table, id: &str) -> Result<Option<String>, StoreFault>;

    /// Rows whose `index` entry equals `key`.
    fn lookup(&self, table: Table, index: &str, key: &str) -> Result<Vec<StoredRow>, StoreFault>;

    /// Every row of a table.
    fn scan(&self, table: Table) -> Result<Vec<StoredRow>, StoreFault>;
}

#[derive(Debug, Default)]
struct MemoryTable {
    rows: BTreeMap<String, MemoryRow>,
    index: BTreeMap<(String, String), BTreeSet<String>>,
}

#[derive(Debug)]
struct MemoryRow {
    body: String,
    index: Vec<(&'static str, String)>,
}

/// Process-local table store.
#[derive(Debug, Default)]
pub struct MemoryTableStore {
    tables: DashMap<Table, MemoryTable>,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TableStore for MemoryTableStore {
    fn put(
        &self,
        table: Table,
        id: &str,
        body: &str,
        index: &[(&'static str, String)],
    ) -> Result<(), StoreFault> {
        let mut entry = self.tables.entry(table).or_default();
        let t = entry.value_mut();

        if let Some(old) = t.rows.remove(id) {
            for (name, key) in old.index {
                let slot = (name.to_string(), key);
                if let Some(ids) = t.index.get_mut(&slot) {
                    ids.remove(id);
                    if ids.is_empty() {
                        t.index.remove(&slot);
                    }
                }
            }
        }

        for (name, key) in index {
            t.index
                .entry((name.to_string(), key.clone()))
                .or_default()
                .insert(id.to_string());
        }
        t.rows.insert(
            id.to_string(),
            MemoryRow {
                body: body.to_string(),
                index: index.to_vec(),
            },
        );
        Ok(())
    }

    fn get(&self, table: Table, id: &str) -> Result<Option<String>, StoreFault> {
        Ok(self
            .tables
            .get(&table)
            .and_then(|t| t.rows.get(id).map(|row| row.body.clone())))
    }

    fn lookup(&self, table: Table, index: &str, key: &str) -> Result<Vec<StoredRow>, StoreFault> {
        let Some(t) = self.tables.get(&table) else {
            return Ok(Vec::new());
        };
        let Some(ids) = t.index.get(&(index.to_string(), key.to_string())) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| {
                t.rows.get(id).map(|row| StoredRow {
                    id: id.clone(),
                    body: row.body.clone(),
                })
            })
            .collect())
    }

    fn scan(&self, table: Table) -> Result<Vec<StoredRow>, StoreFault> {
        Ok(self
            .tables
            .get(&table)
            .map(|t| {
                t.rows
                    .iter()
                    .map(|(id, row)| StoredRow {
                        id: id.clone(),
                        body: row.body.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// SQLite-backed durable table store.
pub struct SqliteTableStore {
    conn: Mutex<Connection>,
}

impl SqliteTableStore {
    /// Open or create the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreFault> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;

        // Enable WAL mode for concurrent reads
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        let store = Self::init(conn)?;

        info!(path = %path.display(), "record database initialized");
        Ok(store)
    }

    /// A database that lives only as long as this store.
    pub fn open_in_memory() -> Result<Self, StoreFault> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreFault> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS records (
                tbl TEXT NOT NULL,
                id TEXT NOT NULL,
                body TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (tbl, id)
            );

            CREATE TABLE IF NOT EXISTS record_index (
                tbl TEXT NOT NULL,
                idx TEXT NOT NULL,
                key TEXT NOT NULL,
                id TEXT NOT NULL,
                PRIMARY KEY (tbl, idx, key, id)
            );
            CREATE INDEX IF NOT EXISTS idx_record_index_row ON record_index(tbl, id);
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreFault> {
        self.conn
            .lock()
            .map_err(|_| StoreFault::Io("database lock poisoned".to_string()))
    }

    fn rows(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<StoredRow>, StoreFault> {
        let mut stmt = conn.prepare_cached(sql)?;
        let rows = stmt
            .query_map(params, |row| {
                Ok(StoredRow {
                    id: row.get(0)?,
                    body: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

impl TableStore for SqliteTableStore {
    fn put(
        &self,
        table: Table,
        id: &str,
        body: &str,
        index: &[(&'static str, String)],
    ) -> Result<(), StoreFault> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO records (tbl, id, body) VALUES (?1, ?2, ?3)
             ON CONFLICT(tbl, id) DO UPDATE SET
                body = excluded.body,
                updated_at = datetime('now')",
            params![table.as_str(), id, body],
        )?;
        tx.execute(
            "DELETE FROM record_index WHERE tbl = ?1 AND id = ?2",
            params![table.as_str(), id],
        )?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO record_index (tbl, idx, key, id) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (name, key) in index {
                stmt.execute(params![table.as_str(), name, key, id])?;
            }
        }
        tx.commit()?;

        debug!(table = %table, id = %id, "row written");
        Ok(())
    }

    fn get(&self, table: Table, id: &str) -> Result<Option<String>, StoreFault> {
        let conn = self.conn()?;
        let body = conn
            .query_row(
                "SELECT body FROM records WHERE tbl = ?1 AND id = ?2",
                params![table.as_str(), id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(body)
    }

    fn lookup(&self, table: Table, index: &str, key: &str) -> Result<Vec<StoredRow>, StoreFault> {
        let conn = self.conn()?;
        Self::rows(
            &conn,
            "SELECT r.id, r.body FROM record_index i
             JOIN records r ON r.tbl = i.tbl AND r.id = i.id
             WHERE i.tbl = ?1 AND i.idx = ?2 AND i.key = ?3
             ORDER BY r.id",
            params![table.as_str(), index, key],
        )
    }

    fn scan(&self, table: Table) -> Result<Vec<StoredRow>, StoreFault> {
        let conn = self.conn()?;
        Self::rows(
            &conn,
            "SELECT id, body FROM records WHERE tbl = ?1 ORDER BY id",
            params![table.as_str()],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn exercise(store: &dyn TableStore) {
        store
            .put(Table::Notes, "n1", "{\"v\":1}", &[("pubkey", "alice".to_string())])
            .unwrap();
        store
            .put(Table::Notes, "n2", "{\"v\":2}", &[("pubkey", "alice".to_string())])
            .unwrap();
        assert_eq!(
            store.get(Table::Notes, "n1").unwrap().as_deref(),
            Some("{\"v\":1}")
        );
        assert_eq!(store.get(Table::Highlights, "n1").unwrap(), None);
        assert_eq!(store.lookup(Table::Notes, "pubkey", "alice").unwrap().len(), 2);

        // Overwrite moves n1 to a different index key
        store
            .put(Table::Notes, "n1", "{\"v\":3}", &[("pubkey", "bob".to_string())])
            .unwrap();
        let alice = store.lookup(Table::Notes, "pubkey", "alice").unwrap();
        assert_eq!(
            alice,
            vec![StoredRow {
                id: "n2".to_string(),
                body: "{\"v\":2}".to_string()
            }]
        );
        let bob = store.lookup(Table::Notes, "pubkey", "bob").unwrap();
        assert_eq!(bob[0].body, "{\"v\":3}");

        let ids: Vec<_> = store
            .scan(Table::Notes)
            .unwrap()
            .into_iter()
            .map(|row| row.id)
            .collect();
        assert_eq!(ids, vec!["n1", "n2"]);
        assert!(store.scan(Table::Zaps).unwrap().is_empty());
    }

    #[test]
    fn test_memory_store() {
        exercise(&MemoryTableStore::new());
    }

    #[test]
    fn test_sqlite_store() {
        exercise(&SqliteTableStore::open_in_memory().unwrap());
    }

    #[test]
    fn test_sqlite_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("glean.db");

        {
            let store = SqliteTableStore::open(&path).unwrap();
            store
                .put(Table::Articles, "a1", "{}", &[("url", "https://x".to_string())])
                .unwrap();
        }

        let reopened = SqliteTableStore::open(&path).unwrap();
        assert_eq!(reopened.get(Table::Articles, "a1").unwrap().as_deref(), Some("{}"));
        assert_eq!(
            reopened.lookup(Table::Articles, "url", "https://x").unwrap().len(),
            1
        );
    }
}
