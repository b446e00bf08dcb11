//! Table Handles
//!
//! `Rdd` wraps a row-shaped table (one value per row under `value`),
//! `PairRdd` a pair-shaped table (row key = pair key, one value per column).
//! A handle is just a table name: every transformation runs one distributed
//! operation and returns a handle to its output table.
//!
//! Clones of a handle share its state: once `destroy` has run on any of
//! them, every method on all of them returns [`DataflowError::Destroyed`].

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::context::{DataflowContext, FOLD_ROW_KEY, VALUE_COLUMN};
use super::error::{DataflowError, DataflowResult};
use super::types::{Closure, Operation, Pair};
use crate::storage::keys::hash_key;
use crate::storage::row::Row;

/// Name and lifecycle of the backing table, shared by every clone of a handle.
#[derive(Debug)]
struct HandleState {
    table: String,
    destroyed: bool,
}

#[derive(Clone)]
struct Handle {
    ctx: Arc<DataflowContext>,
    state: Arc<RwLock<HandleState>>,
}

impl Handle {
    fn new(ctx: Arc<DataflowContext>, table: String) -> Self {
        Self {
            ctx,
            state: Arc::new(RwLock::new(HandleState {
                table,
                destroyed: false,
            })),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HandleState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HandleState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn table(&self) -> String {
        self.read().table.clone()
    }

    fn is_destroyed(&self) -> bool {
        self.read().destroyed
    }

    fn live(&self) -> DataflowResult<String> {
        let state = self.read();
        if state.destroyed {
            return Err(DataflowError::Destroyed {
                table: state.table.clone(),
            });
        }
        Ok(state.table.clone())
    }

    async fn invoke(&self, operation: Operation, closure: &Closure) -> DataflowResult<String> {
        let table = self.live()?;
        self.ctx
            .invoke_operation(&table, &operation, closure, self.ctx.persistent_outputs())
            .await
    }

    async fn rows(&self, limit: Option<usize>) -> DataflowResult<Vec<Row>> {
        let table = self.live()?;
        let mut scan = self.ctx.kvs().scan(&table, None, None).await?;
        let mut rows = Vec::new();
        while limit.is_none_or(|n| rows.len() < n) {
            match scan.next().await {
                Some(row) => rows.push(row),
                None => break,
            }
        }
        Ok(rows)
    }

    async fn count(&self) -> DataflowResult<usize> {
        let table = self.live()?;
        Ok(self.ctx.kvs().count(&table).await?)
    }

    async fn save_as_table(&self, name: &str) -> DataflowResult<()> {
        let table = self.live()?;
        if !self.ctx.kvs().rename(&table, name).await? {
            return Err(DataflowError::Other(anyhow::anyhow!(
                "could not rename {} to {}",
                table,
                name
            )));
        }
        tracing::info!("Saved {} as {}", table, name);
        self.write().table = name.to_string();
        Ok(())
    }

    async fn destroy(&self) -> DataflowResult<()> {
        let table = self.live()?;
        self.ctx.kvs().delete(&table).await?;
        self.write().destroyed = true;
        Ok(())
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read();
        f.debug_struct("Handle")
            .field("table", &state.table)
            .field("destroyed", &state.destroyed)
            .finish()
    }
}

/// Handle to a table of plain values.
#[derive(Clone, Debug)]
pub struct Rdd {
    inner: Handle,
}

impl Rdd {
    pub fn new(ctx: Arc<DataflowContext>, table: impl Into<String>) -> Self {
        Self {
            inner: Handle::new(ctx, table.into()),
        }
    }

    /// Current name of the backing table; follows `save_as_table` on any clone.
    pub fn table_name(&self) -> String {
        self.inner.table()
    }

    /// True once `destroy` has run on this handle or any of its clones.
    pub fn is_destroyed(&self) -> bool {
        self.inner.is_destroyed()
    }

    fn wrap(&self, table: String) -> Rdd {
        Rdd::new(self.inner.ctx.clone(), table)
    }

    fn wrap_pairs(&self, table: String) -> PairRdd {
        PairRdd::new(self.inner.ctx.clone(), table)
    }

    /// Every value, in scan order.
    pub async fn collect(&self) -> DataflowResult<Vec<String>> {
        Ok(values_of(self.inner.rows(None).await?))
    }

    pub async fn take(&self, n: usize) -> DataflowResult<Vec<String>> {
        Ok(values_of(self.inner.rows(Some(n)).await?))
    }

    pub async fn count(&self) -> DataflowResult<usize> {
        self.inner.count().await
    }

    /// Renames the backing table; the old name stops existing.
    pub async fn save_as_table(&mut self, name: &str) -> DataflowResult<()> {
        self.inner.save_as_table(name).await
    }

    pub async fn destroy(&mut self) -> DataflowResult<()> {
        self.inner.destroy().await
    }

    pub async fn flat_map(&self, closure: &Closure) -> DataflowResult<Rdd> {
        let table = self.inner.invoke(Operation::FlatMap, closure).await?;
        Ok(self.wrap(table))
    }

    pub async fn map_to_pair(&self, closure: &Closure) -> DataflowResult<PairRdd> {
        let table = self.inner.invoke(Operation::MapToPair, closure).await?;
        Ok(self.wrap_pairs(table))
    }

    pub async fn flat_map_to_pair(&self, closure: &Closure) -> DataflowResult<PairRdd> {
        let table = self.inner.invoke(Operation::FlatMapToPair, closure).await?;
        Ok(self.wrap_pairs(table))
    }

    /// Groups values by the key the closure computes for each.
    pub async fn group_by(&self, closure: &Closure) -> DataflowResult<PairRdd> {
        let table = self.inner.invoke(Operation::GroupBy, closure).await?;
        Ok(self.wrap_pairs(table))
    }

    pub async fn filter(&self, closure: &Closure) -> DataflowResult<Rdd> {
        let table = self.inner.invoke(Operation::Filter, closure).await?;
        Ok(self.wrap(table))
    }

    pub async fn map_partitions(&self, closure: &Closure) -> DataflowResult<Rdd> {
        let table = self.inner.invoke(Operation::MapPartitions, closure).await?;
        Ok(self.wrap(table))
    }

    /// Values present in both tables, each once.
    pub async fn intersection(&self, other: &Rdd) -> DataflowResult<Rdd> {
        let other = other.inner.live()?;
        let table = self
            .inner
            .invoke(Operation::Intersection { other }, &Closure::new("intersection"))
            .await?;
        Ok(self.wrap(table))
    }

    /// Keeps each value independently with probability `probability`.
    pub async fn sample(&self, probability: f64) -> DataflowResult<Rdd> {
        if !(0.0..=1.0).contains(&probability) {
            return Err(DataflowError::InvalidParameter {
                name: "prob",
                reason: format!("{} is outside [0, 1]", probability),
            });
        }
        let table = self
            .inner
            .invoke(Operation::Sample { probability }, &Closure::new("sample"))
            .await?;
        Ok(self.wrap(table))
    }

    /// Folds every value of the table into one, starting from `zero`.
    pub async fn fold(&self, zero: &str, closure: &Closure) -> DataflowResult<String> {
        let table = self
            .inner
            .invoke(
                Operation::Fold {
                    zero: zero.to_string(),
                },
                closure,
            )
            .await?;

        let kvs = self.inner.ctx.kvs();
        let result = kvs.get(&table, FOLD_ROW_KEY, VALUE_COLUMN).await?;
        kvs.delete(&table).await?;
        Ok(result
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_else(|| zero.to_string()))
    }

    /// One row per distinct value, computed on the driver.
    pub async fn distinct(&self) -> DataflowResult<Rdd> {
        let values: BTreeSet<String> = self.collect().await?.into_iter().collect();
        let ctx = &self.inner.ctx;
        let table = ctx.fresh_table_name(ctx.persistent_outputs());
        let rows: Vec<Row> = values
            .into_iter()
            .map(|value| {
                let mut row = Row::new(hash_key(&value));
                row.put(VALUE_COLUMN, value);
                row
            })
            .collect();
        ctx.kvs().put_rows(&table, &rows).await?;
        Ok(self.wrap(table))
    }
}

/// Handle to a table of key/value pairs.
#[derive(Clone, Debug)]
pub struct PairRdd {
    inner: Handle,
}

impl PairRdd {
    pub fn new(ctx: Arc<DataflowContext>, table: impl Into<String>) -> Self {
        Self {
            inner: Handle::new(ctx, table.into()),
        }
    }

    /// Current name of the backing table; follows `save_as_table` on any clone.
    pub fn table_name(&self) -> String {
        self.inner.table()
    }

    /// True once `destroy` has run on this handle or any of its clones.
    pub fn is_destroyed(&self) -> bool {
        self.inner.is_destroyed()
    }

    /// Every (row key, column value) pair.
    pub async fn collect(&self) -> DataflowResult<Vec<Pair>> {
        let rows = self.inner.rows(None).await?;
        Ok(rows
            .iter()
            .flat_map(|row| {
                row.values().map(move |(_, value)| {
                    Pair::new(row.key(), String::from_utf8_lossy(value).into_owned())
                })
            })
            .collect())
    }

    pub async fn count(&self) -> DataflowResult<usize> {
        self.inner.count().await
    }

    pub async fn save_as_table(&mut self, name: &str) -> DataflowResult<()> {
        self.inner.save_as_table(name).await
    }

    pub async fn destroy(&mut self) -> DataflowResult<()> {
        self.inner.destroy().await
    }

    /// Folds each key's values, starting from `zero`.
    pub async fn fold_by_key(&self, zero: &str, closure: &Closure) -> DataflowResult<PairRdd> {
        let table = self
            .inner
            .invoke(
                Operation::FoldByKey {
                    zero: zero.to_string(),
                },
                closure,
            )
            .await?;
        Ok(PairRdd::new(self.inner.ctx.clone(), table))
    }

    pub async fn flat_map(&self, closure: &Closure) -> DataflowResult<Rdd> {
        let table = self.inner.invoke(Operation::FlatMapFromPair, closure).await?;
        Ok(Rdd::new(self.inner.ctx.clone(), table))
    }

    pub async fn flat_map_to_pair(&self, closure: &Closure) -> DataflowResult<PairRdd> {
        let table = self
            .inner
            .invoke(Operation::FlatMapToPairFromPair, closure)
            .await?;
        Ok(PairRdd::new(self.inner.ctx.clone(), table))
    }

    /// Equi-join on key; every combination of values becomes `"left,right"`.
    pub async fn join(&self, other: &PairRdd) -> DataflowResult<PairRdd> {
        let other_table = other.inner.live()?;
        let table = self
            .inner
            .invoke(Operation::Join { other_table }, &Closure::new("join"))
            .await?;
        Ok(PairRdd::new(self.inner.ctx.clone(), table))
    }
}

fn values_of(rows: Vec<Row>) -> Vec<String> {
    rows.iter().filter_map(|row| row.get(VALUE_COLUMN)).collect()
}
