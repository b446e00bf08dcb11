use axum::{
    Router,
    body::Bytes,
    extract::{Extension, Path, Query},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, put},
};
use std::sync::Arc;

use super::keys::{validate_table_name, validate_token};
use super::protocol::{PutCellQuery, REPLY_FAIL, REPLY_OK, ScanQuery};
use super::row::decode_all;
use super::table::{PutOutcome, RenameOutcome, TableStore};

/// Routes served by a storage worker, with the store injected as an extension.
pub fn router(store: Arc<TableStore>) -> Router {
    Router::new()
        .route(
            "/data/:table/:row/:column",
            put(handle_put_cell).get(handle_get_cell),
        )
        .route("/data/:table/:row", get(handle_get_row))
        .route("/data/:table", get(handle_scan).put(handle_put_rows))
        .route("/data/:table/", put(handle_put_rows))
        .route("/count/:table", get(handle_count))
        .route("/rename/:table", put(handle_rename))
        .route("/delete/:table", put(handle_delete))
        .route("/tables", get(handle_list_tables))
        .layer(Extension(store))
}

fn bad_request(reason: &str) -> Response {
    (StatusCode::BAD_REQUEST, reason.to_string()).into_response()
}

fn internal_error(context: &str, e: anyhow::Error) -> Response {
    tracing::error!("{}: {:#}", context, e);
    (StatusCode::INTERNAL_SERVER_ERROR, format!("{}: {}", context, e)).into_response()
}

fn not_found(what: &str) -> Response {
    (StatusCode::NOT_FOUND, format!("{} not found", what)).into_response()
}

fn check_names(table: &str, tokens: &[&str]) -> Result<(), Response> {
    validate_table_name(table).map_err(bad_request)?;
    for token in tokens {
        validate_token(token).map_err(bad_request)?;
    }
    Ok(())
}

pub async fn handle_put_cell(
    Extension(store): Extension<Arc<TableStore>>,
    Path((table, row, column)): Path<(String, String, String)>,
    Query(query): Query<PutCellQuery>,
    body: Bytes,
) -> Response {
    if let Err(resp) = check_names(&table, &[&row, &column]) {
        return resp;
    }

    let condition = match (&query.ifcolumn, &query.equals) {
        (Some(if_column), Some(expected)) => Some((if_column.as_str(), expected.as_bytes())),
        (None, None) => None,
        _ => return bad_request("ifcolumn and equals must be given together"),
    };

    match store
        .put_cell(&table, &row, &column, body.to_vec(), condition)
        .await
    {
        Ok(PutOutcome::Applied) => (StatusCode::OK, REPLY_OK).into_response(),
        Ok(PutOutcome::NotApplied) => {
            tracing::debug!("Conditional put on {}/{}/{} not applied", table, row, column);
            (StatusCode::OK, REPLY_FAIL).into_response()
        }
        Err(e) => internal_error("put failed", e),
    }
}

pub async fn handle_get_cell(
    Extension(store): Extension<Arc<TableStore>>,
    Path((table, row, column)): Path<(String, String, String)>,
) -> Response {
    if let Err(resp) = check_names(&table, &[&row, &column]) {
        return resp;
    }

    match store.get_cell(&table, &row, &column).await {
        Ok(Some(value)) => (StatusCode::OK, value).into_response(),
        Ok(None) => not_found("cell"),
        Err(e) => internal_error("get failed", e),
    }
}

pub async fn handle_get_row(
    Extension(store): Extension<Arc<TableStore>>,
    Path((table, row)): Path<(String, String)>,
) -> Response {
    if let Err(resp) = check_names(&table, &[&row]) {
        return resp;
    }

    match store.get_row(&table, &row).await {
        Ok(Some(row)) => (StatusCode::OK, row.encode()).into_response(),
        Ok(None) => not_found("row"),
        Err(e) => internal_error("getRow failed", e),
    }
}

/// Streams every row in range, one record per line, then an empty line.
pub async fn handle_scan(
    Extension(store): Extension<Arc<TableStore>>,
    Path(table): Path<String>,
    Query(query): Query<ScanQuery>,
) -> Response {
    if let Err(resp) = check_names(&table, &[]) {
        return resp;
    }

    let rows = match store
        .scan(
            &table,
            query.start_row.as_deref(),
            query.end_row_exclusive.as_deref(),
        )
        .await
    {
        Ok(Some(rows)) => rows,
        Ok(None) => return not_found("table"),
        Err(e) => return internal_error("scan failed", e),
    };

    let mut body = Vec::new();
    for row in &rows {
        body.extend(row.encode());
        body.push(b'\n');
    }
    body.push(b'\n');

    tracing::debug!("Scan of {} returned {} rows", table, rows.len());
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        body,
    )
        .into_response()
}

pub async fn handle_put_rows(
    Extension(store): Extension<Arc<TableStore>>,
    Path(table): Path<String>,
    body: Bytes,
) -> Response {
    if let Err(resp) = check_names(&table, &[]) {
        return resp;
    }

    let rows = match decode_all(&body) {
        Ok(rows) => rows,
        Err(e) => {
            tracing::warn!("Rejected bulk insert into {}: {}", table, e);
            return bad_request(&e.to_string());
        }
    };

    match store.put_rows(&table, rows).await {
        Ok(count) => {
            tracing::debug!("Bulk inserted {} rows into {}", count, table);
            (StatusCode::OK, REPLY_OK).into_response()
        }
        Err(e) => internal_error("bulk insert failed", e),
    }
}

pub async fn handle_count(
    Extension(store): Extension<Arc<TableStore>>,
    Path(table): Path<String>,
) -> Response {
    if let Err(resp) = check_names(&table, &[]) {
        return resp;
    }

    match store.count(&table).await {
        Ok(Some(count)) => (StatusCode::OK, count.to_string()).into_response(),
        Ok(None) => not_found("table"),
        Err(e) => internal_error("count failed", e),
    }
}

pub async fn handle_rename(
    Extension(store): Extension<Arc<TableStore>>,
    Path(table): Path<String>,
    body: Bytes,
) -> Response {
    let new_name = String::from_utf8_lossy(&body).trim().to_string();
    if let Err(resp) = check_names(&table, &[]) {
        return resp;
    }
    if let Err(reason) = validate_table_name(&new_name) {
        return bad_request(reason);
    }

    match store.rename(&table, &new_name).await {
        Ok(RenameOutcome::Renamed) => {
            tracing::info!("Renamed table {} to {}", table, new_name);
            (StatusCode::OK, REPLY_OK).into_response()
        }
        Ok(RenameOutcome::NotFound) => not_found("table"),
        Ok(RenameOutcome::AlreadyExists) => {
            (StatusCode::CONFLICT, format!("table {} already exists", new_name)).into_response()
        }
        Ok(RenameOutcome::PersistentToVolatile) => {
            bad_request("a persistent table cannot become volatile")
        }
        Err(e) => internal_error("rename failed", e),
    }
}

pub async fn handle_delete(
    Extension(store): Extension<Arc<TableStore>>,
    Path(table): Path<String>,
) -> Response {
    if let Err(resp) = check_names(&table, &[]) {
        return resp;
    }

    match store.delete(&table).await {
        Ok(true) => {
            tracing::info!("Deleted table {}", table);
            (StatusCode::OK, REPLY_OK).into_response()
        }
        Ok(false) => not_found("table"),
        Err(e) => internal_error("delete failed", e),
    }
}

pub async fn handle_list_tables(Extension(store): Extension<Arc<TableStore>>) -> Response {
    match store.list_tables().await {
        Ok(names) => {
            let mut body = String::new();
            for name in names {
                body.push_str(&name);
                body.push('\n');
            }
            (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain")], body).into_response()
        }
        Err(e) => internal_error("listing tables failed", e),
    }
}
