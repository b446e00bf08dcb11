//! Dataflow Engine Module
//!
//! Spark-style transformations over storage tables. A job runs as a driver
//! inside the dataflow coordinator; each transformation is split into key
//! ranges that compute workers process in parallel, reading from and
//! writing to the storage layer directly.
//!
//! ## Flow
//! 1. **Submit**: a client posts a job's bundle manifest to `/submit`. The
//!    coordinator uploads it to every compute worker and starts the driver.
//! 2. **Plan**: for each transformation the `planner` cuts the storage ring
//!    into partitions and deals them to compute workers.
//! 3. **Dispatch**: the driver (`context`) posts one request per partition
//!    and waits for all of them.
//! 4. **Execute**: a compute worker (`executor`) scans its range, runs the
//!    named closure from the `registry`, and writes the results.
//!
//! Tables are the only intermediate state: an `Rdd` or `PairRdd` is a table
//! name.

pub mod context;
pub mod error;
pub mod executor;
pub mod handlers;
pub mod planner;
pub mod protocol;
pub mod rdd;
pub mod registry;
pub mod types;

#[cfg(test)]
mod tests;
