//! Distributed Scan
//!
//! Walks the per-worker sub-ranges of a table scan as one sequence of rows.
//! Exactly one worker connection is open at any time: a range's response is
//! read to its end (or dropped on error) before the next range's request is
//! sent.
//!
//! Ranges are visited in key order, but rows *within* a range come in
//! whatever order the worker's table yields them. Callers must not assume
//! the whole scan is sorted.
//!
//! A range whose request fails, answers 404 (table absent on that worker)
//! or sends an undecodable record is logged and treated as empty.

use std::collections::VecDeque;
use std::sync::Arc;

use super::partitioner::OwnedRange;
use super::protocol::ENDPOINT_DATA;
use super::row::{Decoded, Row, decode_prefix};
use crate::membership::types::WorkerInfo;

struct OpenRange {
    worker: String,
    response: reqwest::Response,
    buffer: Vec<u8>,
    eof: bool,
}

pub struct DistributedScan {
    http: reqwest::Client,
    table: String,
    workers: Arc<Vec<WorkerInfo>>,
    pending: VecDeque<OwnedRange>,
    current: Option<OpenRange>,
    peeked: Option<Row>,
}

impl DistributedScan {
    pub fn new(
        http: reqwest::Client,
        table: impl Into<String>,
        workers: Arc<Vec<WorkerInfo>>,
        ranges: Vec<OwnedRange>,
    ) -> Self {
        Self {
            http,
            table: table.into(),
            workers,
            pending: ranges.into(),
            current: None,
            peeked: None,
        }
    }

    /// True while at least one more row can be pulled.
    pub async fn has_next(&mut self) -> bool {
        if self.peeked.is_none() {
            self.peeked = self.advance().await;
        }
        self.peeked.is_some()
    }

    pub async fn next(&mut self) -> Option<Row> {
        match self.peeked.take() {
            Some(row) => Some(row),
            None => self.advance().await,
        }
    }

    /// Drains the remaining rows.
    pub async fn collect(mut self) -> Vec<Row> {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await {
            rows.push(row);
        }
        rows
    }

    async fn advance(&mut self) -> Option<Row> {
        loop {
            if self.current.is_none() {
                let range = self.pending.pop_front()?;
                self.current = self.open(range).await;
                continue;
            }

            let Some(open) = self.current.as_mut() else {
                continue;
            };
            match decode_prefix(&open.buffer, open.eof) {
                Ok(Decoded::Row(row, used)) => {
                    open.buffer.drain(..used);
                    return Some(row);
                }
                Ok(Decoded::End(_)) => {
                    // dropping the response closes the connection
                    self.current = None;
                }
                Ok(Decoded::Incomplete) => match open.response.chunk().await {
                    Ok(Some(bytes)) => open.buffer.extend_from_slice(&bytes),
                    Ok(None) => open.eof = true,
                    Err(e) => {
                        tracing::warn!(
                            "Scan of {} on {} broke off: {}",
                            self.table,
                            open.worker,
                            e
                        );
                        self.current = None;
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        "Undecodable row from {} while scanning {}: {}",
                        open.worker,
                        self.table,
                        e
                    );
                    self.current = None;
                }
            }
        }
    }

    async fn open(&self, range: OwnedRange) -> Option<OpenRange> {
        let worker = self.workers.get(range.worker_index)?;
        let mut url = reqwest::Url::parse(&worker.base_url()).ok()?;
        url.set_path(ENDPOINT_DATA);
        url.path_segments_mut().ok()?.push(&self.table);
        {
            let mut query = url.query_pairs_mut();
            if let Some(from) = &range.range.from {
                query.append_pair("startRow", from);
            }
            if let Some(to) = &range.range.to_exclusive {
                query.append_pair("endRowExclusive", to);
            }
        }

        match self.http.get(url).send().await {
            Ok(response) if response.status().is_success() => Some(OpenRange {
                worker: worker.address.clone(),
                response,
                buffer: Vec::new(),
                eof: false,
            }),
            Ok(response) => {
                tracing::debug!(
                    "Worker {} has no rows of {} ({})",
                    worker.address,
                    self.table,
                    response.status()
                );
                None
            }
            Err(e) => {
                tracing::warn!("Could not reach {} to scan {}: {}", worker.address, self.table, e);
                None
            }
        }
    }
}
