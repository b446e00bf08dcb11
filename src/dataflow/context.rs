//! Dataflow Driver
//!
//! Runs inside the dataflow coordinator on behalf of one submitted job.
//! `invoke_operation` plans partitions against the current storage ring and
//! compute workers, dispatches one request per partition concurrently, and
//! waits for every one of them before reporting.
//!
//! There is no retry and no rollback: when some partitions fail the output
//! table keeps whatever the others wrote, and the caller gets
//! [`DataflowError::PartitionsFailed`].

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::error::{DataflowError, DataflowResult, FailureKind, PartitionFailure};
use super::planner::{Partition, Partitioner};
use super::protocol::{ENDPOINT_FROM_TABLE, ENDPOINT_RDD, encode_bound};
use super::rdd::Rdd;
use super::types::{Closure, Operation};
use crate::membership::service::WorkerRegistry;
use crate::storage::client::KvsClient;
use crate::storage::keys::{PERSISTENT_PREFIX, hash_key};
use crate::storage::row::Row;

/// Row key under which `fold` writes its single result.
pub const FOLD_ROW_KEY: &str = "fold";
/// Column holding a value in row-shaped tables.
pub const VALUE_COLUMN: &str = "value";

pub struct DataflowContext {
    kvs: Arc<KvsClient>,
    compute: Arc<WorkerRegistry>,
    bundle: String,
    http: reqwest::Client,
    output: Mutex<String>,
    sequence: AtomicU64,
    concurrency_level: AtomicUsize,
    persistent_outputs: AtomicBool,
}

impl DataflowContext {
    /// `bundle` is the name the job's bundle was uploaded under on every
    /// compute worker.
    pub fn new(kvs: Arc<KvsClient>, compute: Arc<WorkerRegistry>, bundle: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            kvs,
            compute,
            bundle: bundle.into(),
            http: reqwest::Client::new(),
            output: Mutex::new(String::new()),
            sequence: AtomicU64::new(0),
            concurrency_level: AtomicUsize::new(1),
            persistent_outputs: AtomicBool::new(false),
        })
    }

    pub fn kvs(&self) -> &Arc<KvsClient> {
        &self.kvs
    }

    pub fn bundle(&self) -> &str {
        &self.bundle
    }

    /// Appends to the text returned by `/submit`.
    pub fn output(&self, text: &str) {
        let mut output = self.output.lock().unwrap_or_else(|e| e.into_inner());
        output.push_str(text);
    }

    pub fn take_output(&self) -> String {
        let mut output = self.output.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *output)
    }

    /// Sets the number of key ranges planned per compute worker.
    pub fn set_concurrency_level(&self, level: usize) -> DataflowResult<()> {
        if level == 0 {
            return Err(DataflowError::InvalidParameter {
                name: "concurrency level",
                reason: "must be at least 1".to_string(),
            });
        }
        self.concurrency_level.store(level, Ordering::Relaxed);
        Ok(())
    }

    pub fn concurrency_level(&self) -> usize {
        self.concurrency_level.load(Ordering::Relaxed)
    }

    /// When set, every table produced from here on is persistent.
    pub fn set_persistent_outputs(&self, persistent: bool) {
        self.persistent_outputs.store(persistent, Ordering::Relaxed);
    }

    pub fn persistent_outputs(&self) -> bool {
        self.persistent_outputs.load(Ordering::Relaxed)
    }

    /// A table name no other job or call has used.
    pub fn fresh_table_name(&self, persistent: bool) -> String {
        let prefix = if persistent { PERSISTENT_PREFIX } else { "" };
        let ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("{}output_{}_{}_{}", prefix, self.bundle, ms, seq)
    }

    /// Seeds a new table with one row per value.
    pub async fn parallelize(self: &Arc<Self>, values: Vec<String>) -> DataflowResult<Rdd> {
        let table = self.fresh_table_name(self.persistent_outputs());
        let rows: Vec<Row> = values
            .into_iter()
            .enumerate()
            .map(|(i, value)| {
                let mut row = Row::new(hash_key(&format!("{}:{}", table, i)));
                row.put(VALUE_COLUMN, value);
                row
            })
            .collect();
        self.kvs.put_rows(&table, &rows).await?;
        tracing::info!("Parallelized {} values into {}", rows.len(), table);
        Ok(Rdd::new(self.clone(), table))
    }

    /// Projects every row of an existing table to a string.
    pub async fn from_table(self: &Arc<Self>, table: &str, closure: &Closure) -> DataflowResult<Rdd> {
        let output = self
            .invoke_operation(table, &Operation::FromTable, closure, self.persistent_outputs())
            .await?;
        Ok(Rdd::new(self.clone(), output))
    }

    /// Runs `operation` over every partition of `input` and returns the name
    /// of the output table.
    pub async fn invoke_operation(
        &self,
        input: &str,
        operation: &Operation,
        closure: &Closure,
        persistent: bool,
    ) -> DataflowResult<String> {
        let output = self.fresh_table_name(persistent);
        let storage = self.kvs.refresh_workers().await?;
        let compute = self.compute.list_workers();
        let partitions = Partitioner::new(self.concurrency_level()).plan(&storage, &compute)?;
        let body = closure.to_bytes()?;

        tracing::info!(
            "{} on {} -> {} ({} partitions, closure {})",
            operation.name(),
            input,
            output,
            partitions.len(),
            closure.name
        );

        let mut handles = Vec::with_capacity(partitions.len());
        for partition in partitions {
            let request = self.dispatch_request(&partition, input, &output, operation)?;
            let body = body.clone();
            handles.push(tokio::spawn(async move {
                let outcome = send_dispatch(request, body).await;
                (partition, outcome)
            }));
        }

        let mut failures = Vec::new();
        for handle in handles {
            match handle.await {
                Ok((_, Ok(()))) => {}
                Ok((partition, Err(kind))) => {
                    tracing::warn!("Partition on {} failed: {:?}", partition.compute_worker, kind);
                    failures.push(PartitionFailure {
                        compute_worker: partition.compute_worker,
                        from: partition.from,
                        to_exclusive: partition.to_exclusive,
                        kind,
                    });
                }
                Err(e) => failures.push(PartitionFailure {
                    compute_worker: "driver".to_string(),
                    from: None,
                    to_exclusive: None,
                    kind: FailureKind::Transport(format!("dispatch task aborted: {}", e)),
                }),
            }
        }

        if !failures.is_empty() {
            return Err(DataflowError::PartitionsFailed {
                output_table: output,
                failures,
            });
        }
        Ok(output)
    }

    fn dispatch_request(
        &self,
        partition: &Partition,
        input: &str,
        output: &str,
        operation: &Operation,
    ) -> DataflowResult<reqwest::RequestBuilder> {
        let endpoint = match operation {
            Operation::FromTable => ENDPOINT_FROM_TABLE,
            _ => ENDPOINT_RDD,
        };
        let mut url = reqwest::Url::parse(&format!("http://{}{}", partition.compute_worker, endpoint))
            .map_err(|e| DataflowError::Other(e.into()))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("oper", operation.name())
                .append_pair("kvs", self.kvs.coordinator())
                .append_pair("input", input)
                .append_pair("output", output)
                .append_pair("from", encode_bound(partition.from.as_deref()))
                .append_pair("to", encode_bound(partition.to_exclusive.as_deref()))
                .append_pair("jar", &self.bundle);
            if let Some((name, value)) = operation.extra_param() {
                query.append_pair(name, &value);
            }
        }
        Ok(self.http.post(url))
    }
}

async fn send_dispatch(request: reqwest::RequestBuilder, body: Vec<u8>) -> Result<(), FailureKind> {
    let response = request
        .body(body)
        .send()
        .await
        .map_err(|e| FailureKind::Transport(e.to_string()))?;
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let reason = response.text().await.unwrap_or_default();
    if status.is_client_error() {
        Err(FailureKind::Rejected {
            status: status.as_u16(),
            reason,
        })
    } else {
        Err(FailureKind::Failed {
            status: status.as_u16(),
            reason,
        })
    }
}
