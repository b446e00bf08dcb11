//! Worker-side heartbeat: pings the coordinator at a fixed interval so the
//! worker stays in the registry.

use std::time::Duration;

use super::protocol::ENDPOINT_PING;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Sends one `/ping` to `coordinator` (`host:port`).
pub async fn send_heartbeat(
    http: &reqwest::Client,
    coordinator: &str,
    id: &str,
    port: u16,
) -> anyhow::Result<()> {
    let url = format!("http://{}{}", coordinator, ENDPOINT_PING);
    let resp = http
        .get(&url)
        .query(&[("id", id.to_string()), ("port", port.to_string())])
        .send()
        .await?;
    if !resp.status().is_success() {
        anyhow::bail!("coordinator answered {}", resp.status());
    }
    Ok(())
}

/// Spawns the heartbeat loop. The first ping is sent immediately.
pub fn start_heartbeat(
    coordinator: String,
    id: String,
    port: u16,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let http = reqwest::Client::new();
        let mut ticker = tokio::time::interval(interval);
        let mut failing = false;
        loop {
            ticker.tick().await;
            match send_heartbeat(&http, &coordinator, &id, port).await {
                Ok(()) => {
                    if failing {
                        tracing::info!("Coordinator {} reachable again", coordinator);
                        failing = false;
                    }
                }
                Err(e) => {
                    // logged once per outage
                    if !failing {
                        tracing::warn!("Heartbeat to {} failed: {}", coordinator, e);
                        failing = true;
                    }
                }
            }
        }
    })
}
