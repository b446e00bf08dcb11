//! HTTP surfaces of the dataflow engine.
//!
//! Compute workers serve `/bundle`, `/rdd` and `/fromTable`. The dataflow
//! coordinator serves `/submit` plus the compute workers' `/ping` and
//! `/workers`, and runs each submitted job's driver in-process.

use axum::{
    Router,
    body::Bytes,
    extract::{Extension, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use std::collections::HashMap;
use std::sync::Arc;

use super::context::DataflowContext;
use super::error::{DataflowError, DataflowResult};
use super::executor::{DataflowExecutor, Dispatch};
use super::protocol::{
    BundleQuery, DispatchQuery, ENDPOINT_BUNDLE, ENDPOINT_FROM_TABLE, ENDPOINT_RDD, ENDPOINT_SUBMIT,
};
use super::registry::JobRegistry;
use super::types::{BundleManifest, Closure};
use crate::membership::service::WorkerRegistry;
use crate::storage::client::KvsClient;
use crate::storage::protocol::REPLY_OK;

fn error_response(e: &DataflowError) -> Response {
    let status = StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, e.to_string()).into_response()
}

// ============================================================================
// Compute worker
// ============================================================================

pub fn worker_router(executor: Arc<DataflowExecutor>) -> Router {
    Router::new()
        .route(ENDPOINT_BUNDLE, post(handle_bundle))
        .route(ENDPOINT_RDD, post(handle_rdd))
        .route(ENDPOINT_FROM_TABLE, post(handle_from_table))
        .layer(Extension(executor))
}

pub async fn handle_bundle(
    Extension(executor): Extension<Arc<DataflowExecutor>>,
    Query(query): Query<BundleQuery>,
    body: Bytes,
) -> Response {
    let Some(name) = query.name else {
        return error_response(&DataflowError::MissingParameter("name"));
    };
    let manifest = match BundleManifest::from_bytes(&body) {
        Ok(manifest) => manifest,
        Err(e) => {
            return error_response(&DataflowError::InvalidParameter {
                name: "bundle",
                reason: e.to_string(),
            });
        }
    };
    match executor.install_bundle(&name, manifest) {
        Ok(()) => (StatusCode::OK, REPLY_OK).into_response(),
        Err(e) => {
            tracing::warn!("Refused bundle {}: {}", name, e);
            error_response(&e)
        }
    }
}

pub async fn handle_rdd(
    Extension(executor): Extension<Arc<DataflowExecutor>>,
    Query(query): Query<DispatchQuery>,
    body: Bytes,
) -> Response {
    run_dispatch(&executor, &query, &body).await
}

pub async fn handle_from_table(
    Extension(executor): Extension<Arc<DataflowExecutor>>,
    Query(mut query): Query<DispatchQuery>,
    body: Bytes,
) -> Response {
    query.oper.get_or_insert_with(|| "fromTable".to_string());
    run_dispatch(&executor, &query, &body).await
}

async fn execute(executor: &DataflowExecutor, query: &DispatchQuery, body: &[u8]) -> DataflowResult<usize> {
    let dispatch = Dispatch::from_query(query)?;
    let closure = Closure::from_bytes(body)?;
    executor.execute(&dispatch, &closure).await
}

async fn run_dispatch(executor: &DataflowExecutor, query: &DispatchQuery, body: &[u8]) -> Response {
    match execute(executor, query, body).await {
        Ok(_) => (StatusCode::OK, REPLY_OK).into_response(),
        Err(e) => {
            tracing::error!("Dispatch {:?} failed: {}", query.oper, e);
            error_response(&e)
        }
    }
}

// ============================================================================
// Dataflow coordinator
// ============================================================================

pub struct DataflowCoordinator {
    kvs: Arc<KvsClient>,
    compute: Arc<WorkerRegistry>,
    jobs: Arc<JobRegistry>,
    http: reqwest::Client,
}

impl DataflowCoordinator {
    pub fn new(kvs: Arc<KvsClient>, compute: Arc<WorkerRegistry>, jobs: Arc<JobRegistry>) -> Arc<Self> {
        Arc::new(Self {
            kvs,
            compute,
            jobs,
            http: reqwest::Client::new(),
        })
    }

    /// Uploads the bundle to every registered compute worker under a fresh
    /// name, then runs the job's driver. Returns the job's output text.
    pub async fn submit(&self, manifest: BundleManifest, args: Vec<String>) -> anyhow::Result<String> {
        if !self.jobs.has_job(&manifest.job) {
            anyhow::bail!("Unknown job: {}", manifest.job);
        }
        let uuid = uuid::Uuid::new_v4().simple().to_string();
        let bundle = format!("{}-{}", manifest.job, &uuid[..8]);
        let body = manifest.to_bytes()?;

        for worker in self.compute.list_workers() {
            upload_bundle(&self.http, &worker.address, &bundle, body.clone()).await?;
        }
        tracing::info!("Uploaded bundle {} for job {}", bundle, manifest.job);

        let ctx = DataflowContext::new(self.kvs.clone(), self.compute.clone(), bundle);
        self.jobs.run(&manifest.job, ctx.clone(), args).await?;
        Ok(ctx.take_output())
    }
}

/// `/submit` plus the compute workers' `/ping` and `/workers`.
pub fn coordinator_router(coordinator: Arc<DataflowCoordinator>) -> Router {
    Router::new()
        .route(ENDPOINT_SUBMIT, post(handle_submit))
        .layer(Extension(coordinator.clone()))
        .merge(crate::membership::handlers::router(coordinator.compute.clone()))
}

pub async fn handle_submit(
    Extension(coordinator): Extension<Arc<DataflowCoordinator>>,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let Some(class) = params.get("class") else {
        return (StatusCode::BAD_REQUEST, "class is required").into_response();
    };
    let manifest = match BundleManifest::from_bytes(&body) {
        Ok(manifest) => manifest,
        Err(e) => return (StatusCode::BAD_REQUEST, format!("malformed bundle: {}", e)).into_response(),
    };
    if &manifest.job != class {
        return (
            StatusCode::BAD_REQUEST,
            format!("bundle is for job {}, not {}", manifest.job, class),
        )
            .into_response();
    }

    let args = submit_args(&params);
    tracing::info!("Submitting job {} with {} argument(s)", class, args.len());
    match coordinator.submit(manifest, args).await {
        Ok(output) => (StatusCode::OK, output).into_response(),
        Err(e) => {
            tracing::error!("Job {} failed: {:#}", class, e);
            (StatusCode::INTERNAL_SERVER_ERROR, format!("{:?}", e)).into_response()
        }
    }
}

/// `arg1`, `arg2`, ... in numeric order; stops at the first gap.
fn submit_args(params: &HashMap<String, String>) -> Vec<String> {
    (1..)
        .map_while(|i| params.get(&format!("arg{}", i)).cloned())
        .collect()
}

pub async fn upload_bundle(
    http: &reqwest::Client,
    worker: &str,
    name: &str,
    manifest: Vec<u8>,
) -> anyhow::Result<()> {
    let url = format!("http://{}{}", worker, ENDPOINT_BUNDLE);
    let resp = http.post(&url).query(&[("name", name)]).body(manifest).send().await?;
    if !resp.status().is_success() {
        let status = resp.status();
        let reason = resp.text().await.unwrap_or_default();
        anyhow::bail!("compute worker {} refused bundle {}: {} {}", worker, name, status, reason);
    }
    Ok(())
}

/// Client side of `/submit`: returns the job's output, or the coordinator's
/// error text.
pub async fn submit_job(
    http: &reqwest::Client,
    coordinator: &str,
    manifest: &BundleManifest,
    args: &[String],
) -> anyhow::Result<String> {
    let mut query = vec![("class".to_string(), manifest.job.clone())];
    query.extend(
        args.iter()
            .enumerate()
            .map(|(i, arg)| (format!("arg{}", i + 1), arg.clone())),
    );

    let url = format!("http://{}{}", coordinator, ENDPOINT_SUBMIT);
    let resp = http
        .post(&url)
        .query(&query)
        .body(manifest.to_bytes()?)
        .send()
        .await?;
    let status = resp.status();
    let text = resp.text().await?;
    if !status.is_success() {
        anyhow::bail!("job {} failed ({}): {}", manifest.job, status, text);
    }
    Ok(text)
}
