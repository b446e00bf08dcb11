//! Operation and Job Registries
//!
//! Maps names to executable Rust closures. Jobs and every operation they use
//! are linked into the binary and registered at startup; a dispatch carries
//! only a name plus captured arguments, never code.
//!
//! An operation is registered with one of the [`OperationFn`] shapes. The
//! shape decides which dataflow operations can use it: a `flat_map` function
//! can back `flatMap`, a `pair_to_pairs` function can back
//! `flatMapToPairFromPair`, and so on.

use super::context::DataflowContext;
use super::error::{DataflowError, DataflowResult};
use super::types::Pair;
use crate::storage::row::Row;

use anyhow::Result;
use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type StringToStrings = Arc<dyn Fn(&[String], &str) -> Result<Vec<String>> + Send + Sync>;
pub type StringToPair = Arc<dyn Fn(&[String], &str) -> Result<Pair> + Send + Sync>;
pub type StringToPairs = Arc<dyn Fn(&[String], &str) -> Result<Vec<Pair>> + Send + Sync>;
pub type StringToString = Arc<dyn Fn(&[String], &str) -> Result<String> + Send + Sync>;
pub type StringToBool = Arc<dyn Fn(&[String], &str) -> Result<bool> + Send + Sync>;
pub type StringsToStrings = Arc<dyn Fn(&[String], Vec<String>) -> Result<Vec<String>> + Send + Sync>;
pub type TwoStringsToString = Arc<dyn Fn(&[String], &str, &str) -> Result<String> + Send + Sync>;
pub type PairToStrings = Arc<dyn Fn(&[String], &Pair) -> Result<Vec<String>> + Send + Sync>;
pub type PairToPairs = Arc<dyn Fn(&[String], &Pair) -> Result<Vec<Pair>> + Send + Sync>;
/// `None` drops the row.
pub type RowToString = Arc<dyn Fn(&[String], &Row) -> Result<Option<String>> + Send + Sync>;

/// A registered operation. The first argument of every function is the
/// closure's captured `args`.
#[derive(Clone)]
pub enum OperationFn {
    FlatMap(StringToStrings),
    ToPair(StringToPair),
    ToPairs(StringToPairs),
    KeyOf(StringToString),
    Predicate(StringToBool),
    Partition(StringsToStrings),
    Combine(TwoStringsToString),
    PairToStrings(PairToStrings),
    PairToPairs(PairToPairs),
    RowToString(RowToString),
}

impl OperationFn {
    pub fn flat_map<F>(f: F) -> Self
    where
        F: Fn(&[String], &str) -> Result<Vec<String>> + Send + Sync + 'static,
    {
        OperationFn::FlatMap(Arc::new(f))
    }

    pub fn to_pair<F>(f: F) -> Self
    where
        F: Fn(&[String], &str) -> Result<Pair> + Send + Sync + 'static,
    {
        OperationFn::ToPair(Arc::new(f))
    }

    pub fn to_pairs<F>(f: F) -> Self
    where
        F: Fn(&[String], &str) -> Result<Vec<Pair>> + Send + Sync + 'static,
    {
        OperationFn::ToPairs(Arc::new(f))
    }

    pub fn key_of<F>(f: F) -> Self
    where
        F: Fn(&[String], &str) -> Result<String> + Send + Sync + 'static,
    {
        OperationFn::KeyOf(Arc::new(f))
    }

    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&[String], &str) -> Result<bool> + Send + Sync + 'static,
    {
        OperationFn::Predicate(Arc::new(f))
    }

    pub fn partition<F>(f: F) -> Self
    where
        F: Fn(&[String], Vec<String>) -> Result<Vec<String>> + Send + Sync + 'static,
    {
        OperationFn::Partition(Arc::new(f))
    }

    pub fn combine<F>(f: F) -> Self
    where
        F: Fn(&[String], &str, &str) -> Result<String> + Send + Sync + 'static,
    {
        OperationFn::Combine(Arc::new(f))
    }

    pub fn pair_to_strings<F>(f: F) -> Self
    where
        F: Fn(&[String], &Pair) -> Result<Vec<String>> + Send + Sync + 'static,
    {
        OperationFn::PairToStrings(Arc::new(f))
    }

    pub fn pair_to_pairs<F>(f: F) -> Self
    where
        F: Fn(&[String], &Pair) -> Result<Vec<Pair>> + Send + Sync + 'static,
    {
        OperationFn::PairToPairs(Arc::new(f))
    }

    pub fn row_to_string<F>(f: F) -> Self
    where
        F: Fn(&[String], &Row) -> Result<Option<String>> + Send + Sync + 'static,
    {
        OperationFn::RowToString(Arc::new(f))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OperationFn::FlatMap(_) => "flat_map",
            OperationFn::ToPair(_) => "to_pair",
            OperationFn::ToPairs(_) => "to_pairs",
            OperationFn::KeyOf(_) => "key_of",
            OperationFn::Predicate(_) => "predicate",
            OperationFn::Partition(_) => "partition",
            OperationFn::Combine(_) => "combine",
            OperationFn::PairToStrings(_) => "pair_to_strings",
            OperationFn::PairToPairs(_) => "pair_to_pairs",
            OperationFn::RowToString(_) => "row_to_string",
        }
    }
}

/// Registry of the named operations this process can execute.
pub struct OperationRegistry {
    operations: DashMap<String, OperationFn>,
}

impl OperationRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, name: &str, operation: OperationFn) {
        tracing::debug!("Registered operation {} ({})", name, operation.kind());
        self.operations.insert(name.to_string(), operation);
    }

    pub fn get(&self, name: &str) -> DataflowResult<OperationFn> {
        self.operations
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| DataflowError::UnknownOperation(name.to_string()))
    }

    pub fn has_operation(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }

    pub fn list_operations(&self) -> Vec<String> {
        let mut names: Vec<String> = self.operations.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl Default for OperationRegistry {
    fn default() -> Self {
        Self {
            operations: DashMap::new(),
        }
    }
}

/// Type-erased job entry point: receives the driver context and the
/// `/submit` arguments.
pub type JobFn = Arc<
    dyn Fn(Arc<DataflowContext>, Vec<String>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>>
        + Send
        + Sync,
>;

/// A job: its entry point and the operations it references.
#[derive(Clone)]
pub struct JobEntry {
    pub run: JobFn,
    pub operations: Vec<String>,
}

/// Registry of runnable jobs, consulted by the dataflow coordinator's
/// `/submit` handler and by the `submit` client to build manifests.
pub struct JobRegistry {
    jobs: DashMap<String, JobEntry>,
}

impl JobRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            jobs: DashMap::new(),
        })
    }

    pub fn register<F, Fut>(&self, name: &str, operations: &[&str], job: F)
    where
        F: Fn(Arc<DataflowContext>, Vec<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let run: JobFn = Arc::new(move |ctx, args| {
            Box::pin(job(ctx, args)) as Pin<Box<dyn Future<Output = Result<()>> + Send>>
        });
        self.jobs.insert(
            name.to_string(),
            JobEntry {
                run,
                operations: operations.iter().map(|s| s.to_string()).collect(),
            },
        );
        tracing::info!("Registered job: {}", name);
    }

    pub fn get(&self, name: &str) -> Option<JobEntry> {
        self.jobs.get(name).map(|entry| entry.value().clone())
    }

    pub fn has_job(&self, name: &str) -> bool {
        self.jobs.contains_key(name)
    }

    /// Runs the named job to completion.
    pub async fn run(&self, name: &str, ctx: Arc<DataflowContext>, args: Vec<String>) -> Result<()> {
        let Some(entry) = self.get(name) else {
            let error = format!("Unknown job: {}", name);
            tracing::error!("{}", error);
            return Err(anyhow::anyhow!(error));
        };
        tracing::info!("Running job {} with {} argument(s)", name, args.len());
        (entry.run)(ctx, args).await
    }
}
