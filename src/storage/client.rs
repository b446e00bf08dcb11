//! Storage Client
//!
//! Routes every single-row operation to the storage worker that owns the
//! row key, and fans table-wide operations (count, rename, delete) out to
//! every worker. The worker list is fetched from the storage coordinator
//! once and cached until [`KvsClient::refresh_workers`] is called.

use anyhow::{Context, Result, anyhow, bail};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::partitioner::{owner_index, scan_ranges};
use super::protocol::{
    ENDPOINT_COUNT, ENDPOINT_DATA, ENDPOINT_DELETE, ENDPOINT_RENAME, REPLY_FAIL, REPLY_OK,
};
use super::row::Row;
use super::scan::DistributedScan;
use crate::membership::protocol::{ENDPOINT_WORKERS, parse_worker_list};
use crate::membership::types::WorkerInfo;

pub struct KvsClient {
    coordinator: String,
    http: reqwest::Client,
    workers: RwLock<Option<Arc<Vec<WorkerInfo>>>>,
}

impl KvsClient {
    /// `coordinator` is the storage coordinator's `host:port`.
    pub fn new(coordinator: impl Into<String>) -> Self {
        Self::with_http(coordinator, reqwest::Client::new())
    }

    pub fn with_http(coordinator: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            coordinator: coordinator.into(),
            http,
            workers: RwLock::new(None),
        }
    }

    pub fn coordinator(&self) -> &str {
        &self.coordinator
    }

    /// Current (cached) worker list, sorted by id.
    pub async fn workers(&self) -> Result<Arc<Vec<WorkerInfo>>> {
        if let Some(workers) = self.workers.read().await.as_ref() {
            return Ok(workers.clone());
        }
        self.refresh_workers().await
    }

    pub async fn refresh_workers(&self) -> Result<Arc<Vec<WorkerInfo>>> {
        let url = format!("http://{}{}", self.coordinator, ENDPOINT_WORKERS);
        let body = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("storage coordinator {} unreachable", self.coordinator))?
            .error_for_status()?
            .text()
            .await?;

        let mut workers = parse_worker_list(&body)?;
        workers.sort_by(|a, b| a.id.cmp(&b.id));
        let workers = Arc::new(workers);
        *self.workers.write().await = Some(workers.clone());
        tracing::debug!("Storage ring has {} workers", workers.len());
        Ok(workers)
    }

    pub async fn num_workers(&self) -> Result<usize> {
        Ok(self.workers().await?.len())
    }

    async fn owner_of(&self, row: &str) -> Result<WorkerInfo> {
        let workers = self.workers().await?;
        workers
            .get(owner_index(row, &workers))
            .cloned()
            .ok_or_else(|| anyhow!("no storage workers"))
    }

    fn url(worker: &WorkerInfo, endpoint: &str, segments: &[&str]) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&worker.base_url())?;
        url.set_path(endpoint);
        url.path_segments_mut()
            .map_err(|_| anyhow!("worker address {} cannot be a base", worker.address))?
            .extend(segments);
        Ok(url)
    }

    async fn put_cell(
        &self,
        table: &str,
        row: &str,
        column: &str,
        value: Vec<u8>,
        condition: Option<(&str, &str)>,
    ) -> Result<bool> {
        let worker = self.owner_of(row).await?;
        let mut url = Self::url(&worker, ENDPOINT_DATA, &[table, row, column])?;
        if let Some((if_column, equals)) = condition {
            url.query_pairs_mut()
                .append_pair("ifcolumn", if_column)
                .append_pair("equals", equals);
        }

        let resp = self.http.put(url).body(value).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            bail!("put {}/{}/{} failed: {} {}", table, row, column, status, body);
        }
        match body.as_str() {
            REPLY_OK => Ok(true),
            REPLY_FAIL => Ok(false),
            other => bail!("unexpected put reply '{}'", other),
        }
    }

    pub async fn put(&self, table: &str, row: &str, column: &str, value: impl Into<Vec<u8>>) -> Result<()> {
        self.put_cell(table, row, column, value.into(), None).await?;
        Ok(())
    }

    /// Conditional put; `Ok(false)` when `if_column` did not hold `equals`.
    pub async fn put_if(
        &self,
        table: &str,
        row: &str,
        column: &str,
        value: impl Into<Vec<u8>>,
        if_column: &str,
        equals: &str,
    ) -> Result<bool> {
        self.put_cell(table, row, column, value.into(), Some((if_column, equals)))
            .await
    }

    pub async fn put_row(&self, table: &str, row: &Row) -> Result<()> {
        let worker = self.owner_of(row.key()).await?;
        self.put_encoded(&worker, table, row.encode()).await
    }

    /// Bulk insert, one request per owning worker.
    pub async fn put_rows(&self, table: &str, rows: &[Row]) -> Result<()> {
        let workers = self.workers().await?;
        let mut batches: BTreeMap<usize, Vec<u8>> = BTreeMap::new();
        for row in rows {
            let batch = batches.entry(owner_index(row.key(), &workers)).or_default();
            batch.extend(row.encode());
            batch.push(b'\n');
        }
        for (index, body) in batches {
            self.put_encoded(&workers[index], table, body).await?;
        }
        Ok(())
    }

    async fn put_encoded(&self, worker: &WorkerInfo, table: &str, body: Vec<u8>) -> Result<()> {
        let url = Self::url(worker, ENDPOINT_DATA, &[table])?;
        let resp = self.http.put(url).body(body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let reason = resp.text().await.unwrap_or_default();
            bail!(
                "bulk insert into {} on {} failed: {} {}",
                table,
                worker.address,
                status,
                reason
            );
        }
        Ok(())
    }

    pub async fn get(&self, table: &str, row: &str, column: &str) -> Result<Option<Vec<u8>>> {
        let worker = self.owner_of(row).await?;
        let url = Self::url(&worker, ENDPOINT_DATA, &[table, row, column])?;
        let resp = self.http.get(url).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = resp.error_for_status()?;
        Ok(Some(resp.bytes().await?.to_vec()))
    }

    pub async fn get_row(&self, table: &str, row: &str) -> Result<Option<Row>> {
        let worker = self.owner_of(row).await?;
        let url = Self::url(&worker, ENDPOINT_DATA, &[table, row])?;
        let resp = self.http.get(url).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let bytes = resp.error_for_status()?.bytes().await?;
        Ok(Row::decode(&bytes)?)
    }

    pub async fn exists_row(&self, table: &str, row: &str) -> Result<bool> {
        Ok(self.get_row(table, row).await?.is_some())
    }

    /// Row count summed over all workers; workers without the table count 0.
    pub async fn count(&self, table: &str) -> Result<usize> {
        let workers = self.workers().await?;
        let mut total = 0;
        for worker in workers.iter() {
            let url = Self::url(worker, ENDPOINT_COUNT, &[table])?;
            let resp = self.http.get(url).send().await?;
            if resp.status() == reqwest::StatusCode::NOT_FOUND {
                continue;
            }
            let text = resp.error_for_status()?.text().await?;
            total += text
                .trim()
                .parse::<usize>()
                .with_context(|| format!("bad count '{}' from {}", text, worker.address))?;
        }
        Ok(total)
    }

    /// Rows with `start <= key < end` across the whole ring.
    pub async fn scan(&self, table: &str, start: Option<&str>, end: Option<&str>) -> Result<DistributedScan> {
        let workers = self.workers().await?;
        let ranges = scan_ranges(&workers, start, end);
        Ok(DistributedScan::new(self.http.clone(), table, workers, ranges))
    }

    /// Renames `old` on every worker. True only if every worker agreed;
    /// a worker that never held the table answers 404, which counts as
    /// agreement as long as at least one worker renamed it.
    pub async fn rename(&self, old: &str, new: &str) -> Result<bool> {
        let workers = self.workers().await?;
        let mut renamed = 0;
        let mut ok = true;
        for worker in workers.iter() {
            let url = Self::url(worker, ENDPOINT_RENAME, &[old])?;
            let resp = self.http.put(url).body(new.to_string()).send().await?;
            match resp.status() {
                s if s.is_success() => renamed += 1,
                s if s == reqwest::StatusCode::NOT_FOUND => {}
                s => {
                    tracing::warn!("Rename {} -> {} refused by {}: {}", old, new, worker.address, s);
                    ok = false;
                }
            }
        }
        Ok(ok && renamed > 0)
    }

    /// Deletes `table` everywhere; workers that fail or lack it are ignored.
    pub async fn delete(&self, table: &str) -> Result<()> {
        let workers = self.workers().await?;
        for worker in workers.iter() {
            let url = Self::url(worker, ENDPOINT_DELETE, &[table])?;
            match self.http.put(url).send().await {
                Ok(resp) if resp.status().is_success() => {}
                Ok(resp) => tracing::debug!("Delete of {} on {}: {}", table, worker.address, resp.status()),
                Err(e) => tracing::warn!("Delete of {} on {} failed: {}", table, worker.address, e),
            }
        }
        Ok(())
    }
}
