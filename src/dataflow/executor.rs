//! Dataflow Executor
//!
//! Runs on every compute worker. A dispatch names an operation, an input
//! table, a key sub-range and a closure; the executor scans that sub-range
//! from the storage layer, applies the closure row by row, and writes each
//! result to the output table with one remote put.
//!
//! ## Output keys
//! Operations that produce fresh rows key them with `hash_key("{uuid}-{n}")`,
//! where the uuid is drawn once per dispatch. `intersection` keys rows by the
//! hash of the value, and `fold` always writes [`FOLD_ROW_KEY`], so those
//! outputs do not depend on how the input was partitioned.

use dashmap::DashMap;
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;

use super::context::{FOLD_ROW_KEY, VALUE_COLUMN};
use super::error::{DataflowError, DataflowResult};
use super::protocol::{DispatchQuery, decode_bound};
use super::registry::{OperationFn, OperationRegistry};
use super::types::{BundleManifest, Closure, Operation, Pair};
use crate::storage::client::KvsClient;
use crate::storage::keys::hash_key;
use crate::storage::row::Row;

/// Column written by `foldByKey`.
pub const ACC_COLUMN: &str = "acc";

/// A fully validated dispatch.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub operation: Operation,
    pub kvs: String,
    pub input: String,
    pub output: String,
    pub from: Option<String>,
    pub to_exclusive: Option<String>,
    pub bundle: String,
}

impl Dispatch {
    pub fn from_query(query: &DispatchQuery) -> DataflowResult<Self> {
        let required = |value: &Option<String>, name: &'static str| {
            value.clone().ok_or(DataflowError::MissingParameter(name))
        };
        Ok(Self {
            operation: Operation::from_query(query)?,
            kvs: required(&query.kvs, "kvs")?,
            input: required(&query.input, "input")?,
            output: required(&query.output, "output")?,
            from: decode_bound(query.from.as_deref()),
            to_exclusive: decode_bound(query.to.as_deref()),
            bundle: required(&query.jar, "jar")?,
        })
    }
}

pub struct DataflowExecutor {
    operations: Arc<OperationRegistry>,
    bundles: DashMap<String, Arc<BundleManifest>>,
    kvs_clients: DashMap<String, Arc<KvsClient>>,
}

impl DataflowExecutor {
    pub fn new(operations: Arc<OperationRegistry>) -> Arc<Self> {
        Arc::new(Self {
            operations,
            bundles: DashMap::new(),
            kvs_clients: DashMap::new(),
        })
    }

    /// Caches a bundle under `name`. Refused if it references an operation
    /// this worker does not have.
    pub fn install_bundle(&self, name: &str, manifest: BundleManifest) -> DataflowResult<()> {
        if let Some(missing) = manifest
            .operations
            .iter()
            .find(|op| !self.operations.has_operation(op))
        {
            return Err(DataflowError::UnknownOperation(missing.clone()));
        }
        tracing::info!(
            "Installed bundle {} (job {}, {} operations)",
            name,
            manifest.job,
            manifest.operations.len()
        );
        self.bundles.insert(name.to_string(), Arc::new(manifest));
        Ok(())
    }

    pub fn has_bundle(&self, name: &str) -> bool {
        self.bundles.contains_key(name)
    }

    /// Client for `coordinator` with a ring fetched for this dispatch, so
    /// storage workers that joined since the last dispatch are routed to.
    async fn kvs(&self, coordinator: &str) -> DataflowResult<Arc<KvsClient>> {
        let kvs = self
            .kvs_clients
            .entry(coordinator.to_string())
            .or_insert_with(|| Arc::new(KvsClient::new(coordinator)))
            .clone();
        kvs.refresh_workers().await?;
        Ok(kvs)
    }

    /// Looks the closure up in the dispatch's bundle and in the registry.
    fn resolve(&self, bundle: &str, closure: &Closure) -> DataflowResult<OperationFn> {
        let manifest = self
            .bundles
            .get(bundle)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| DataflowError::BundleNotFound(bundle.to_string()))?;
        if !manifest.operations.iter().any(|op| op == &closure.name) {
            return Err(DataflowError::UnknownOperation(closure.name.clone()));
        }
        self.operations.get(&closure.name)
    }

    /// Runs one dispatch to completion; returns the number of cells written.
    pub async fn execute(&self, dispatch: &Dispatch, closure: &Closure) -> DataflowResult<usize> {
        if !self.bundles.contains_key(&dispatch.bundle) {
            return Err(DataflowError::BundleNotFound(dispatch.bundle.clone()));
        }
        let function = match &dispatch.operation {
            Operation::Intersection { .. } | Operation::Sample { .. } | Operation::Join { .. } => None,
            _ => Some(self.resolve(&dispatch.bundle, closure)?),
        };

        let kvs = self.kvs(&dispatch.kvs).await?;
        let rows = match &dispatch.operation {
            Operation::Fold { .. } => scan_all(&kvs, &dispatch.input, None, None).await?,
            _ => {
                scan_all(
                    &kvs,
                    &dispatch.input,
                    dispatch.from.as_deref(),
                    dispatch.to_exclusive.as_deref(),
                )
                .await?
            }
        };

        tracing::debug!(
            "{} over [{:?}, {:?}) of {}: {} rows",
            dispatch.operation.name(),
            dispatch.from,
            dispatch.to_exclusive,
            dispatch.input,
            rows.len()
        );

        let mut sink = Sink::new(&kvs, &dispatch.output);
        let args = closure.args.as_slice();
        let name = closure.name.as_str();

        match (&dispatch.operation, function) {
            (Operation::FlatMap, Some(OperationFn::FlatMap(f))) => {
                for value in values(&rows) {
                    for produced in f(args, &value).map_err(execution)? {
                        sink.push(produced).await?;
                    }
                }
            }
            (Operation::MapToPair, Some(OperationFn::ToPair(f))) => {
                for row in &rows {
                    if let Some(value) = row.get(VALUE_COLUMN) {
                        let pair = f(args, &value).map_err(execution)?;
                        sink.put(pair.key(), row.key(), pair.value()).await?;
                    }
                }
            }
            (Operation::FlatMapToPair, Some(OperationFn::ToPairs(f))) => {
                for row in &rows {
                    if let Some(value) = row.get(VALUE_COLUMN) {
                        let pairs = f(args, &value).map_err(execution)?;
                        for (i, pair) in pairs.iter().enumerate() {
                            let column = output_column(&[row.key(), i.to_string().as_str()]);
                            sink.put(pair.key(), &column, pair.value()).await?;
                        }
                    }
                }
            }
            (Operation::GroupBy, Some(OperationFn::KeyOf(f))) => {
                for row in &rows {
                    if let Some(value) = row.get(VALUE_COLUMN) {
                        let key = f(args, &value).map_err(execution)?;
                        sink.put(&key, row.key(), &value).await?;
                    }
                }
            }
            (Operation::Filter, Some(OperationFn::Predicate(f))) => {
                for row in &rows {
                    if let Some(value) = row.get(VALUE_COLUMN)
                        && f(args, &value).map_err(execution)?
                    {
                        sink.put(row.key(), VALUE_COLUMN, &value).await?;
                    }
                }
            }
            (Operation::MapPartitions, Some(OperationFn::Partition(f))) => {
                for produced in f(args, values(&rows)).map_err(execution)? {
                    sink.push(produced).await?;
                }
            }
            (Operation::FoldByKey { zero }, Some(OperationFn::Combine(f))) => {
                for row in &rows {
                    let mut acc = zero.clone();
                    for (_, value) in row.values() {
                        acc = f(args, &acc, &String::from_utf8_lossy(value)).map_err(execution)?;
                    }
                    sink.put(row.key(), ACC_COLUMN, &acc).await?;
                }
            }
            (Operation::Fold { zero }, Some(OperationFn::Combine(f))) => {
                let mut acc = zero.clone();
                for value in values(&rows) {
                    acc = f(args, &acc, &value).map_err(execution)?;
                }
                sink.put(FOLD_ROW_KEY, VALUE_COLUMN, &acc).await?;
            }
            (Operation::Intersection { other }, None) => {
                let theirs: HashSet<String> = values(&scan_all(&kvs, other, None, None).await?)
                    .into_iter()
                    .collect();
                let mut seen = HashSet::new();
                for value in values(&rows) {
                    if theirs.contains(&value) && seen.insert(value.clone()) {
                        sink.put(&hash_key(&value), VALUE_COLUMN, &value).await?;
                    }
                }
            }
            (Operation::Sample { probability }, None) => {
                let kept: Vec<String> = {
                    let mut rng = rand::thread_rng();
                    values(&rows)
                        .into_iter()
                        .filter(|_| rng.gen_bool(*probability))
                        .collect()
                };
                for value in kept {
                    sink.push(value).await?;
                }
            }
            (Operation::Join { other_table }, None) => {
                for row in &rows {
                    let Some(other) = kvs.get_row(other_table, row.key()).await? else {
                        continue;
                    };
                    for (left_column, left) in row.values() {
                        for (right_column, right) in other.values() {
                            let column = output_column(&[left_column, right_column]);
                            let joined = format!(
                                "{},{}",
                                String::from_utf8_lossy(left),
                                String::from_utf8_lossy(right)
                            );
                            sink.put(row.key(), &column, &joined).await?;
                        }
                    }
                }
            }
            (Operation::FlatMapFromPair, Some(OperationFn::PairToStrings(f))) => {
                for pair in pairs(&rows) {
                    for produced in f(args, &pair).map_err(execution)? {
                        sink.push(produced).await?;
                    }
                }
            }
            (Operation::FlatMapToPairFromPair, Some(OperationFn::PairToPairs(f))) => {
                for row in &rows {
                    for (column, value) in row.values() {
                        let pair = Pair::new(row.key(), String::from_utf8_lossy(value).into_owned());
                        let produced = f(args, &pair).map_err(execution)?;
                        for (i, out) in produced.iter().enumerate() {
                            let out_column = output_column(&[row.key(), column, i.to_string().as_str()]);
                            sink.put(out.key(), &out_column, out.value()).await?;
                        }
                    }
                }
            }
            (Operation::FromTable, Some(OperationFn::RowToString(f))) => {
                for row in &rows {
                    if let Some(value) = f(args, row).map_err(execution)? {
                        sink.push(value).await?;
                    }
                }
            }
            (operation, Some(function)) => {
                return Err(DataflowError::KindMismatch {
                    name: name.to_string(),
                    expected: expected_kind(operation),
                    actual: function.kind(),
                });
            }
            (operation, None) => {
                return Err(DataflowError::Execution(format!(
                    "no function resolved for {}",
                    operation.name()
                )));
            }
        }

        tracing::info!(
            "{} {} -> {}: wrote {} cells",
            dispatch.operation.name(),
            dispatch.input,
            dispatch.output,
            sink.written
        );
        Ok(sink.written)
    }
}

/// Column name for one produced cell. Row keys and column names never hold
/// a space, so joining the parts on one keeps distinct inputs distinct.
fn output_column(parts: &[&str]) -> String {
    hash_key(&parts.join(" "))
}

/// The function shape each closure-taking operation requires.
fn expected_kind(operation: &Operation) -> &'static str {
    match operation {
        Operation::FlatMap => "flat_map",
        Operation::MapToPair => "to_pair",
        Operation::FlatMapToPair => "to_pairs",
        Operation::GroupBy => "key_of",
        Operation::Filter => "predicate",
        Operation::MapPartitions => "partition",
        Operation::FoldByKey { .. } | Operation::Fold { .. } => "combine",
        Operation::FlatMapFromPair => "pair_to_strings",
        Operation::FlatMapToPairFromPair => "pair_to_pairs",
        Operation::FromTable => "row_to_string",
        Operation::Intersection { .. } | Operation::Sample { .. } | Operation::Join { .. } => "none",
    }
}

fn execution(e: anyhow::Error) -> DataflowError {
    DataflowError::Execution(format!("{:#}", e))
}

async fn scan_all(
    kvs: &KvsClient,
    table: &str,
    from: Option<&str>,
    to: Option<&str>,
) -> DataflowResult<Vec<Row>> {
    Ok(kvs.scan(table, from, to).await?.collect().await)
}

fn values(rows: &[Row]) -> Vec<String> {
    rows.iter().filter_map(|row| row.get(VALUE_COLUMN)).collect()
}

fn pairs(rows: &[Row]) -> Vec<Pair> {
    rows.iter()
        .flat_map(|row| {
            row.values()
                .map(move |(_, value)| Pair::new(row.key(), String::from_utf8_lossy(value).into_owned()))
        })
        .collect()
}

/// Writes results to the output table.
struct Sink<'a> {
    kvs: &'a KvsClient,
    table: &'a str,
    prefix: String,
    counter: u64,
    written: usize,
}

impl<'a> Sink<'a> {
    fn new(kvs: &'a KvsClient, table: &'a str) -> Self {
        Self {
            kvs,
            table,
            prefix: uuid::Uuid::new_v4().to_string(),
            counter: 0,
            written: 0,
        }
    }

    /// Writes `value` under a freshly generated row key.
    async fn push(&mut self, value: String) -> DataflowResult<()> {
        let key = hash_key(&format!("{}-{}", self.prefix, self.counter));
        self.counter += 1;
        self.put(&key, VALUE_COLUMN, &value).await
    }

    async fn put(&mut self, row: &str, column: &str, value: &str) -> DataflowResult<()> {
        self.kvs.put(self.table, row, column, value.as_bytes()).await?;
        self.written += 1;
        Ok(())
    }
}
