//! Storage Network Protocol
//!
//! Endpoints served by every storage worker. Row payloads are always the
//! row codec (see [`super::row`]), never JSON; plain-text replies carry a
//! count, a status word or a list of names.

use serde::Deserialize;

// --- API Endpoints ---

/// `/data/:table/:row/:column` for cells, `/data/:table/:row` for rows,
/// `/data/:table` for scans and bulk inserts.
pub const ENDPOINT_DATA: &str = "/data";
/// `GET /count/:table`
pub const ENDPOINT_COUNT: &str = "/count";
/// `PUT /rename/:table` with the new name as the body.
pub const ENDPOINT_RENAME: &str = "/rename";
/// `PUT /delete/:table`
pub const ENDPOINT_DELETE: &str = "/delete";
/// `GET /tables`
pub const ENDPOINT_TABLES: &str = "/tables";

/// Body of a successful (or plain) acknowledgment.
pub const REPLY_OK: &str = "OK";
/// Body returned when a conditional put did not apply.
pub const REPLY_FAIL: &str = "FAIL";

// --- Query parameters ---

/// Optional condition on a cell write: only write when `ifcolumn`
/// currently holds exactly `equals`.
#[derive(Debug, Default, Deserialize)]
pub struct PutCellQuery {
    pub ifcolumn: Option<String>,
    pub equals: Option<String>,
}

/// Bounds of a table scan; `startRow` is inclusive, `endRowExclusive` is not.
#[derive(Debug, Default, Deserialize)]
pub struct ScanQuery {
    #[serde(rename = "startRow")]
    pub start_row: Option<String>,
    #[serde(rename = "endRowExclusive")]
    pub end_row_exclusive: Option<String>,
}
