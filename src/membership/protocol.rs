//! Registry Protocol
//!
//! Workers announce themselves with `GET /ping?id=&port=`; clients fetch the
//! live set with `GET /workers`, a plain-text body whose first line is the
//! number of workers followed by one `id,address` line per worker.

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use super::types::WorkerInfo;

pub const ENDPOINT_PING: &str = "/ping";
pub const ENDPOINT_WORKERS: &str = "/workers";

/// Worker id meaning "not chosen yet"; the registry substitutes the
/// caller's `ip:port`.
pub const UNKNOWN_WORKER_ID: &str = "!!";

#[derive(Debug, Deserialize)]
pub struct PingQuery {
    pub id: Option<String>,
    pub port: Option<u16>,
}

pub fn render_worker_list(workers: &[WorkerInfo]) -> String {
    let mut body = format!("{}\n", workers.len());
    for worker in workers {
        body.push_str(&format!("{},{}\n", worker.id, worker.address));
    }
    body
}

/// Parses a `/workers` body. An empty registry is an error for callers
/// that need somewhere to send requests.
pub fn parse_worker_list(body: &str) -> Result<Vec<WorkerInfo>> {
    let mut lines = body.lines();
    let count: usize = lines
        .next()
        .context("empty worker list")?
        .trim()
        .parse()
        .context("malformed worker count")?;
    if count < 1 {
        bail!("no workers registered");
    }

    let mut workers = Vec::with_capacity(count);
    for _ in 0..count {
        let line = lines.next().context("worker list is shorter than its count")?;
        let (id, address) = line
            .split_once(',')
            .with_context(|| format!("malformed worker entry '{}'", line))?;
        workers.push(WorkerInfo::new(id.trim(), address.trim()));
    }
    Ok(workers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_and_parse() {
        let workers = vec![
            WorkerInfo::new("aaaaa", "127.0.0.1:8001"),
            WorkerInfo::new("mmmmm", "127.0.0.1:8002"),
        ];
        let body = render_worker_list(&workers);
        assert_eq!(body, "2\naaaaa,127.0.0.1:8001\nmmmmm,127.0.0.1:8002\n");
        assert_eq!(parse_worker_list(&body).unwrap(), workers);
    }

    #[test]
    fn test_parse_rejects_empty_and_truncated() {
        assert!(parse_worker_list("0\n").is_err());
        assert!(parse_worker_list("2\naaaaa,127.0.0.1:8001\n").is_err());
        assert!(parse_worker_list("").is_err());
        assert!(parse_worker_list("1\nno-comma\n").is_err());
    }
}
