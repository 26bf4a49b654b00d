//! Health & Status API endpoints
//!
//! Minimal HTTP endpoints for monitoring:
//! - GET /health - Simple health check
//! - GET /metrics - Prometheus metrics
//! - GET /status - Uptime and per-chain scan progress

use eyre::Result;
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::metrics;
use crate::types::Chain;

/// Server start time for uptime calculation
static START_TIME: OnceLock<Instant> = OnceLock::new();

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    uptime_seconds: u64,
    latest_blocks: LatestBlocks,
    queued_jobs: u64,
}

#[derive(Serialize)]
struct LatestBlocks {
    mainchain: u64,
    sidechain: u64,
}

/// Serve until the shutdown flag is raised
pub async fn start_api_server(addr: SocketAddr, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "API server started");

    START_TIME.get_or_init(Instant::now);
    metrics::UP.set(1.0);

    loop {
        let (mut socket, _) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = shutdown.wait_for(|stop| *stop) => {
                tracing::info!("API server stopping");
                metrics::UP.set(0.0);
                return Ok(());
            }
        };

        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            if socket.readable().await.is_ok() {
                let _ = socket.try_read(&mut buf);
            }

            let request = String::from_utf8_lossy(&buf);
            let response = route(&request);
            let _ = socket.write_all(&response).await;
        });
    }
}

fn route(request: &str) -> Vec<u8> {
    if request.starts_with("GET /metrics") {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        let _ = encoder.encode(&prometheus::gather(), &mut buffer);
        respond("text/plain; charset=utf-8", buffer)
    } else if request.starts_with("GET /health") {
        respond("text/plain", b"OK".to_vec())
    } else if request.starts_with("GET /status") {
        let body = serde_json::to_vec(&build_status_response()).unwrap_or_else(|_| b"{}".to_vec());
        respond("application/json", body)
    } else {
        b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n".to_vec()
    }
}

fn respond(content_type: &str, body: Vec<u8>) -> Vec<u8> {
    let mut response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
        content_type,
        body.len()
    )
    .into_bytes();
    response.extend(body);
    response
}

fn build_status_response() -> StatusResponse {
    let latest = |chain: Chain| metrics::LATEST_BLOCK.with_label_values(&[chain.as_str()]).get() as u64;

    StatusResponse {
        status: "ok",
        uptime_seconds: START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0),
        latest_blocks: LatestBlocks {
            mainchain: latest(Chain::Main),
            sidechain: latest(Chain::Side),
        },
        queued_jobs: metrics::QUEUED_JOBS.get() as u64,
    }
}
