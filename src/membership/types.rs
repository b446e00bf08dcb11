use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Opaque worker identifier. Sorting ids defines the storage ring.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub String);

impl WorkerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A worker as seen by clients: its id and `host:port`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerInfo {
    pub id: WorkerId,
    pub address: String,
}

impl WorkerInfo {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: WorkerId(id.into()),
            address: address.into(),
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.address)
    }
}

/// Registry entry: the advertised worker plus the time of its last heartbeat.
#[derive(Debug, Clone)]
pub struct RegisteredWorker {
    pub info: WorkerInfo,
    pub last_heartbeat: Instant,
}
