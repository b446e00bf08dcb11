//! Local Table Store
//!
//! The tables held by one storage worker. Volatile tables live in memory;
//! persistent tables (names starting with `pt-`) are directories under the
//! storage directory with one file per row, each file holding the row's
//! codec encoding.
//!
//! Every table has a coarse lock: operations on one table serialize against
//! each other inside this process. Persistent rows are plain file writes,
//! so two processes sharing a storage directory can still race on a row.

use super::keys::{encode_file_name, is_persistent};
use super::row::Row;

use anyhow::{Context, Result};
use dashmap::DashMap;
use rand::Rng;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

type VolatileTable = Arc<Mutex<HashMap<String, Row>>>;

/// Outcome of a (possibly conditional) cell write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Applied,
    /// The `ifcolumn`/`equals` condition did not hold; nothing was written.
    NotApplied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameOutcome {
    Renamed,
    NotFound,
    AlreadyExists,
    /// Persistent tables cannot become volatile.
    PersistentToVolatile,
}

pub struct TableStore {
    storage_dir: PathBuf,
    volatile: DashMap<String, VolatileTable>,
    persistent_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl TableStore {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            volatile: DashMap::new(),
            persistent_locks: DashMap::new(),
        }
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    fn table_dir(&self, table: &str) -> PathBuf {
        self.storage_dir.join(encode_file_name(table))
    }

    fn row_path(&self, table: &str, row_key: &str) -> PathBuf {
        self.table_dir(table).join(encode_file_name(row_key))
    }

    fn persistent_lock(&self, table: &str) -> Arc<Mutex<()>> {
        self.persistent_locks
            .entry(table.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn volatile_table(&self, table: &str) -> Option<VolatileTable> {
        self.volatile.get(table).map(|entry| entry.value().clone())
    }

    fn volatile_table_or_create(&self, table: &str) -> VolatileTable {
        self.volatile
            .entry(table.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(HashMap::new())))
            .clone()
    }

    async fn persistent_exists(&self, table: &str) -> bool {
        tokio::fs::metadata(self.table_dir(table))
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false)
    }

    pub async fn exists(&self, table: &str) -> bool {
        if is_persistent(table) {
            self.persistent_exists(table).await
        } else {
            self.volatile.contains_key(table)
        }
    }

    async fn read_row_file(path: &Path) -> Result<Option<Row>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Row::decode(&bytes)
                .with_context(|| format!("corrupt row file {}", path.display()))?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
        }
    }

    async fn write_row_file(&self, table: &str, row: &Row) -> Result<()> {
        let dir = self.table_dir(table);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;
        let path = self.row_path(table, row.key());
        tokio::fs::write(&path, row.encode())
            .await
            .with_context(|| format!("failed to write {}", path.display()))
    }

    /// Writes one cell, creating the table and row if needed.
    ///
    /// With a condition `(column, expected)`, the write only happens when the
    /// existing row holds exactly `expected` under `column`.
    pub async fn put_cell(
        &self,
        table: &str,
        row_key: &str,
        column: &str,
        value: Vec<u8>,
        condition: Option<(&str, &[u8])>,
    ) -> Result<PutOutcome> {
        if is_persistent(table) {
            let lock = self.persistent_lock(table);
            let _guard = lock.lock().await;

            let path = self.row_path(table, row_key);
            let existing = Self::read_row_file(&path).await?;
            if !condition_holds(existing.as_ref(), condition) {
                return Ok(PutOutcome::NotApplied);
            }
            let mut row = existing.unwrap_or_else(|| Row::new(row_key));
            row.put(column, value);
            self.write_row_file(table, &row).await?;
        } else {
            let table = self.volatile_table_or_create(table);
            let mut rows = table.lock().await;
            if !condition_holds(rows.get(row_key), condition) {
                return Ok(PutOutcome::NotApplied);
            }
            rows.entry(row_key.to_string())
                .or_insert_with(|| Row::new(row_key))
                .put(column, value);
        }
        Ok(PutOutcome::Applied)
    }

    /// Inserts (replaces) whole rows.
    pub async fn put_rows(&self, table: &str, rows: Vec<Row>) -> Result<usize> {
        let count = rows.len();
        if is_persistent(table) {
            let lock = self.persistent_lock(table);
            let _guard = lock.lock().await;
            tokio::fs::create_dir_all(self.table_dir(table)).await?;
            for row in rows {
                self.write_row_file(table, &row).await?;
            }
        } else {
            let table = self.volatile_table_or_create(table);
            let mut stored = table.lock().await;
            for row in rows {
                stored.insert(row.key().to_string(), row);
            }
        }
        Ok(count)
    }

    pub async fn get_row(&self, table: &str, row_key: &str) -> Result<Option<Row>> {
        if is_persistent(table) {
            let lock = self.persistent_lock(table);
            let _guard = lock.lock().await;
            Self::read_row_file(&self.row_path(table, row_key)).await
        } else {
            match self.volatile_table(table) {
                Some(rows) => Ok(rows.lock().await.get(row_key).cloned()),
                None => Ok(None),
            }
        }
    }

    pub async fn get_cell(&self, table: &str, row_key: &str, column: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .get_row(table, row_key)
            .await?
            .and_then(|row| row.get_bytes(column).map(<[u8]>::to_vec)))
    }

    /// Rows with `start <= key < end`, in whatever order the backing store
    /// yields them. `None` when the table does not exist.
    pub async fn scan(
        &self,
        table: &str,
        start: Option<&str>,
        end_exclusive: Option<&str>,
    ) -> Result<Option<Vec<Row>>> {
        let in_range = |key: &str| {
            start.is_none_or(|s| key >= s) && end_exclusive.is_none_or(|e| key < e)
        };

        if !is_persistent(table) {
            let Some(rows) = self.volatile_table(table) else {
                return Ok(None);
            };
            let rows = rows.lock().await;
            return Ok(Some(
                rows.values()
                    .filter(|row| in_range(row.key()))
                    .cloned()
                    .collect(),
            ));
        }

        let lock = self.persistent_lock(table);
        let _guard = lock.lock().await;
        let dir = self.table_dir(table);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("failed to list {}", dir.display())),
        };

        let mut rows = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            match Self::read_row_file(&entry.path()).await {
                Ok(Some(row)) if in_range(row.key()) => rows.push(row),
                Ok(_) => {}
                Err(e) => tracing::warn!("Skipping unreadable row in {}: {:#}", table, e),
            }
        }
        Ok(Some(rows))
    }

    pub async fn count(&self, table: &str) -> Result<Option<usize>> {
        if !is_persistent(table) {
            return match self.volatile_table(table) {
                Some(rows) => Ok(Some(rows.lock().await.len())),
                None => Ok(None),
            };
        }

        let mut entries = match tokio::fs::read_dir(self.table_dir(table)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut count = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                count += 1;
            }
        }
        Ok(Some(count))
    }

    pub async fn rename(&self, old: &str, new: &str) -> Result<RenameOutcome> {
        if !self.exists(old).await {
            return Ok(RenameOutcome::NotFound);
        }
        if self.exists(new).await {
            return Ok(RenameOutcome::AlreadyExists);
        }
        if is_persistent(old) && !is_persistent(new) {
            return Ok(RenameOutcome::PersistentToVolatile);
        }

        if is_persistent(old) {
            let lock = self.persistent_lock(old);
            let _guard = lock.lock().await;
            tokio::fs::rename(self.table_dir(old), self.table_dir(new))
                .await
                .with_context(|| format!("failed to rename {} to {}", old, new))?;
            return Ok(RenameOutcome::Renamed);
        }

        if is_persistent(new) {
            let Some(table) = self.volatile_table(old) else {
                return Ok(RenameOutcome::NotFound);
            };
            let rows: Vec<Row> = table.lock().await.values().cloned().collect();
            // the source survives until every row is on disk
            self.put_rows(new, rows).await?;
            self.volatile.remove(old);
            return Ok(RenameOutcome::Renamed);
        }

        let Some((_, table)) = self.volatile.remove(old) else {
            return Ok(RenameOutcome::NotFound);
        };
        self.volatile.insert(new.to_string(), table);
        Ok(RenameOutcome::Renamed)
    }

    /// Drops every row of `table`. Returns false if it did not exist.
    pub async fn delete(&self, table: &str) -> Result<bool> {
        if !is_persistent(table) {
            return Ok(self.volatile.remove(table).is_some());
        }

        let lock = self.persistent_lock(table);
        let _guard = lock.lock().await;
        match tokio::fs::remove_dir_all(self.table_dir(table)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("failed to delete {}", table)),
        }
    }

    /// Names of all volatile and persistent tables, sorted.
    pub async fn list_tables(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.volatile.iter().map(|e| e.key().clone()).collect();

        if let Ok(mut entries) = tokio::fs::read_dir(&self.storage_dir).await {
            while let Some(entry) = entries.next_entry().await? {
                if !entry.file_type().await?.is_dir() {
                    continue;
                }
                if let Some(name) = entry
                    .file_name()
                    .to_str()
                    .and_then(super::keys::decode_file_name)
                {
                    names.push(name);
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

fn condition_holds(existing: Option<&Row>, condition: Option<(&str, &[u8])>) -> bool {
    match condition {
        None => true,
        Some((column, expected)) => existing
            .and_then(|row| row.get_bytes(column))
            .is_some_and(|value| value == expected),
    }
}

/// Reads the worker id kept in `<storage_dir>/id`, creating a random
/// five-letter id on first start.
pub fn load_or_create_worker_id(storage_dir: &Path) -> Result<String> {
    std::fs::create_dir_all(storage_dir)
        .with_context(|| format!("failed to create {}", storage_dir.display()))?;
    let path = storage_dir.join("id");
    if let Ok(existing) = std::fs::read_to_string(&path) {
        let id = existing.trim();
        if !id.is_empty() {
            return Ok(id.to_string());
        }
    }

    let mut rng = rand::thread_rng();
    let id: String = (0..5).map(|_| rng.gen_range(b'a'..=b'z') as char).collect();
    std::fs::write(&path, &id).with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!("Generated new worker id {}", id);
    Ok(id)
}
