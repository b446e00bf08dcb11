use std::fmt;
use thiserror::Error;

/// Why one dispatched partition did not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// The compute worker could not be reached or the connection broke.
    Transport(String),
    /// The worker refused the request (4xx): bad parameters, unknown
    /// operation or bundle.
    Rejected { status: u16, reason: String },
    /// The worker accepted the request but the operation failed (5xx).
    Failed { status: u16, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionFailure {
    pub compute_worker: String,
    pub from: Option<String>,
    pub to_exclusive: Option<String>,
    pub kind: FailureKind,
}

impl fmt::Display for PartitionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}) on {}: ",
            self.from.as_deref().unwrap_or("-"),
            self.to_exclusive.as_deref().unwrap_or("-"),
            self.compute_worker
        )?;
        match &self.kind {
            FailureKind::Transport(e) => write!(f, "transport error: {}", e),
            FailureKind::Rejected { status, reason } => write!(f, "rejected ({}): {}", status, reason),
            FailureKind::Failed { status, reason } => write!(f, "failed ({}): {}", status, reason),
        }
    }
}

fn summarize(failures: &[PartitionFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum DataflowError {
    #[error("table handle '{table}' has already been destroyed")]
    Destroyed { table: String },

    /// The output table exists but holds only the successful partitions'
    /// rows; it must not be used.
    #[error("{} partition(s) of {output_table} failed: {}", .failures.len(), summarize(.failures))]
    PartitionsFailed {
        output_table: String,
        failures: Vec<PartitionFailure>,
    },

    #[error("missing parameter '{0}'")]
    MissingParameter(&'static str),

    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("unknown operation '{0}'")]
    UnknownOperation(String),

    #[error("operation '{name}' is registered as {actual}, not {expected}")]
    KindMismatch {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("bundle '{0}' has not been uploaded to this worker")]
    BundleNotFound(String),

    #[error("no compute workers registered")]
    NoComputeWorkers,

    #[error("operation failed: {0}")]
    Execution(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DataflowError {
    /// HTTP status a worker answers with when a dispatch ends in this error.
    pub fn status_code(&self) -> u16 {
        match self {
            DataflowError::MissingParameter(_)
            | DataflowError::InvalidParameter { .. }
            | DataflowError::UnknownOperation(_)
            | DataflowError::KindMismatch { .. } => 400,
            DataflowError::BundleNotFound(_) => 404,
            DataflowError::Destroyed { .. } => 409,
            DataflowError::NoComputeWorkers => 503,
            DataflowError::PartitionsFailed { .. }
            | DataflowError::Execution(_)
            | DataflowError::Other(_) => 500,
        }
    }
}

pub type DataflowResult<T> = Result<T, DataflowError>;
