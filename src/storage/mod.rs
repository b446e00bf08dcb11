//! Distributed Storage Module
//!
//! A key-value store of named tables, range-partitioned over storage workers.
//!
//! ## Core Concepts
//! - **Rows**: a string key plus named byte columns, moved and stored in a
//!   self-delimiting codec (`row`).
//! - **Tables**: volatile (memory only) or persistent (`pt-` prefix, one file
//!   per row), held per worker by a `TableStore` (`table`).
//! - **Ring**: workers sorted by id each own the keys from their id up to the
//!   next id; the last also owns the keys below the first (`partitioner`).
//! - **Access**: `KvsClient` routes row operations to the owning worker and
//!   stitches per-worker scans into one `DistributedScan`.

pub mod client;
pub mod handlers;
pub mod keys;
pub mod partitioner;
pub mod protocol;
pub mod row;
pub mod scan;
pub mod table;
