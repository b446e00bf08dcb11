//! In-process cluster fixtures shared by the subsystem tests.

use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use crate::membership::service::WorkerRegistry;
use crate::storage::client::KvsClient;
use crate::storage::table::TableStore;

/// Serves `app` on an ephemeral localhost port.
pub async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

/// An address nothing listens on.
pub async fn dead_address() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub struct StorageCluster {
    pub coordinator: SocketAddr,
    pub registry: Arc<WorkerRegistry>,
    pub stores: Vec<Arc<TableStore>>,
    pub addresses: Vec<SocketAddr>,
    _dirs: Vec<TempDir>,
}

impl StorageCluster {
    pub fn client(&self) -> KvsClient {
        KvsClient::new(self.coordinator.to_string())
    }

    /// Starts another storage worker and registers it under `id`.
    pub async fn add_worker(&mut self, id: &str) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TableStore::new(dir.path()));
        let addr = serve(crate::storage::handlers::router(store.clone())).await;
        self.registry.heartbeat(id, "127.0.0.1", addr.port());
        self.stores.push(store);
        self.addresses.push(addr);
        self._dirs.push(dir);
    }
}

/// A storage coordinator plus one storage worker per id, each with its own
/// temporary storage directory.
pub async fn spawn_storage_cluster(ids: &[&str]) -> StorageCluster {
    let registry = WorkerRegistry::new(Duration::from_secs(60));
    let coordinator = serve(crate::membership::handlers::router(registry.clone())).await;

    let mut cluster = StorageCluster {
        coordinator,
        registry,
        stores: Vec::new(),
        addresses: Vec::new(),
        _dirs: Vec::new(),
    };
    for id in ids {
        cluster.add_worker(id).await;
    }
    cluster
}
