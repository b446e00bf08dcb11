//! Worker Registry Module
//!
//! A coordinator tracks the live workers of one pool (storage workers or
//! compute workers) from periodic heartbeats and answers "which workers are
//! alive, sorted by id". Storage clients derive the key ring from that list.
//!
//! ## Core Mechanisms
//! - **Heartbeats**: Workers call `/ping` every few seconds. A worker that
//!   has not chosen an id yet sends `!!` and is filed under its `ip:port`.
//! - **Expiry**: Workers silent for longer than the expiry window are
//!   evicted by a background task and disappear from `/workers`.

pub mod handlers;
pub mod heartbeat;
pub mod protocol;
pub mod service;
pub mod types;
