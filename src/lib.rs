//! Distributed Key-Value Store and Dataflow Engine
//!
//! This library crate defines the subsystems that the `dataflow-node`
//! binary (`main.rs`) runs in one of its roles.
//!
//! ## Architecture Modules
//!
//! - **`storage`**: range-partitioned tables of rows. Storage workers hold
//!   volatile (in-memory) and persistent (on-disk) tables; `KvsClient`
//!   routes row operations to the owning worker and scans across the ring.
//! - **`membership`**: the heartbeat registry a coordinator keeps of its
//!   workers, and the worker-side heartbeat loop.
//! - **`dataflow`**: Spark-style transformations over storage tables. The
//!   driver plans partitions and dispatches them to compute workers, which
//!   run named closures from the operation registry.
//! - **`jobs`**: the built-in operations and jobs every process registers.
//! - **`config`**: command-line configuration for each role.

pub mod config;
pub mod dataflow;
pub mod jobs;
pub mod membership;
pub mod storage;

#[cfg(test)]
mod testing;
