//! Dataflow Network Protocol
//!
//! A dispatch is `POST /rdd` (or `/fromTable`) on a compute worker with the
//! bincode-encoded [`Closure`](super::types::Closure) as the body and
//! everything else in the query string. Open range bounds travel as the
//! `!!` sentinel, which is never a valid row key.

use serde::Deserialize;

pub const ENDPOINT_RDD: &str = "/rdd";
pub const ENDPOINT_FROM_TABLE: &str = "/fromTable";
/// `POST /bundle?name=` with a bincode `BundleManifest` body.
pub const ENDPOINT_BUNDLE: &str = "/bundle";
/// `POST /submit?class=&arg1=...` on the dataflow coordinator.
pub const ENDPOINT_SUBMIT: &str = "/submit";

pub const OPEN_KEY_SENTINEL: &str = "!!";

#[derive(Debug, Default, Clone, Deserialize)]
pub struct DispatchQuery {
    pub oper: Option<String>,
    /// Storage coordinator `host:port`.
    pub kvs: Option<String>,
    pub input: Option<String>,
    pub output: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    /// Name of the uploaded bundle the closure belongs to.
    pub jar: Option<String>,
    pub zero: Option<String>,
    pub zero2: Option<String>,
    pub that: Option<String>,
    pub prob: Option<String>,
    #[serde(rename = "otherTable")]
    pub other_table: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BundleQuery {
    pub name: Option<String>,
}

/// Encodes an optional range bound for the wire.
pub fn encode_bound(bound: Option<&str>) -> &str {
    bound.unwrap_or(OPEN_KEY_SENTINEL)
}

/// Decodes a wire range bound; absent and `!!` both mean open.
pub fn decode_bound(raw: Option<&str>) -> Option<String> {
    match raw {
        None | Some(OPEN_KEY_SENTINEL) => None,
        Some(key) => Some(key.to_string()),
    }
}
