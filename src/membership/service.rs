use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

use super::protocol::UNKNOWN_WORKER_ID;
use super::types::{RegisteredWorker, WorkerId, WorkerInfo};

/// A worker that has not pinged for this long is dropped from the registry.
pub const DEFAULT_WORKER_EXPIRY: Duration = Duration::from_secs(15);
const EVICTION_INTERVAL: Duration = Duration::from_secs(1);

/// Live set of workers maintained from heartbeats.
///
/// One registry exists per coordinator process and is handed to the
/// `/ping` and `/workers` handlers as an extension.
pub struct WorkerRegistry {
    workers: DashMap<WorkerId, RegisteredWorker>,
    expiry: Duration,
}

impl WorkerRegistry {
    pub fn new(expiry: Duration) -> Arc<Self> {
        Arc::new(Self {
            workers: DashMap::new(),
            expiry,
        })
    }

    /// Records a heartbeat and returns the id the worker is filed under.
    pub fn heartbeat(&self, id: &str, ip: &str, port: u16) -> WorkerId {
        let address = format!("{}:{}", ip, port);
        let id = if id == UNKNOWN_WORKER_ID {
            WorkerId(address.clone())
        } else {
            WorkerId(id.to_string())
        };

        let now = Instant::now();
        match self.workers.get_mut(&id) {
            Some(mut existing) => {
                if existing.info.address != address {
                    info!("Worker {} moved {} -> {}", id, existing.info.address, address);
                    existing.info.address = address;
                }
                existing.last_heartbeat = now;
            }
            None => {
                info!("Worker {} registered at {}", id, address);
                self.workers.insert(
                    id.clone(),
                    RegisteredWorker {
                        info: WorkerInfo {
                            id: id.clone(),
                            address,
                        },
                        last_heartbeat: now,
                    },
                );
            }
        }
        id
    }

    /// Live workers sorted by id.
    pub fn list_workers(&self) -> Vec<WorkerInfo> {
        self.list_workers_at(Instant::now())
    }

    pub fn list_workers_at(&self, now: Instant) -> Vec<WorkerInfo> {
        let mut workers: Vec<WorkerInfo> = self
            .workers
            .iter()
            .filter(|entry| !self.is_expired(entry.value(), now))
            .map(|entry| entry.value().info.clone())
            .collect();
        workers.sort_by(|a, b| a.id.cmp(&b.id));
        workers
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    fn is_expired(&self, worker: &RegisteredWorker, now: Instant) -> bool {
        now.saturating_duration_since(worker.last_heartbeat) > self.expiry
    }

    /// Removes every worker whose last heartbeat is older than the expiry.
    pub fn evict_expired_at(&self, now: Instant) -> Vec<WorkerId> {
        let expired: Vec<WorkerId> = self
            .workers
            .iter()
            .filter(|entry| self.is_expired(entry.value(), now))
            .map(|entry| entry.key().clone())
            .collect();

        // re-check on removal: a heartbeat may have arrived since the scan
        expired
            .into_iter()
            .filter(|id| {
                let removed = self
                    .workers
                    .remove_if(id, |_, worker| self.is_expired(worker, now))
                    .is_some();
                if removed {
                    tracing::warn!("Worker {} evicted (no heartbeat for {:?})", id, self.expiry);
                }
                removed
            })
            .collect()
    }

    pub fn start_eviction(self: &Arc<Self>) {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(EVICTION_INTERVAL);
            loop {
                interval.tick().await;
                let evicted = registry.evict_expired_at(Instant::now());
                if !evicted.is_empty() {
                    info!("Registry size now: {}", registry.len());
                }
            }
        });
    }
}
