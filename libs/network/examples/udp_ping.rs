//! Two network engines talking over loopback UDP
//!
//! The "pong" engine registers a handler on endpoint 1; the "ping" engine
//! calls it through a remote delegate and waits for each acknowledgment.
//!
//! ```bash
//! RUST_LOG=network=debug cargo run -p network --example udp_ping
//! ```

use network::{EngineConfig, NetworkEngine, UdpConfig, UdpTransport};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

const PING_ENDPOINT: u16 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Ping {
    round: u32,
    note: String,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_thread_names(true)
        .init();

    let loopback = SocketAddr::from(([127, 0, 0, 1], 0));
    let pong_wire = UdpTransport::bind(UdpConfig::new(loopback))?;
    let pong_addr = pong_wire.local_addr();
    let ping_wire = UdpTransport::bind(UdpConfig::new(loopback).with_remote(pong_addr))?;

    let config = EngineConfig::default()
        .with_ack_timeout(Duration::from_millis(200))
        .with_max_retries(3)
        .with_process_interval(Duration::from_millis(20));

    let pong = NetworkEngine::new(config.clone().with_thread_name("pong").with_dedupe_window(128))?;
    pong.initialize(Arc::new(pong_wire))?;
    pong.register(PING_ENDPOINT, |ping: Ping| {
        info!(round = ping.round, note = %ping.note, "Ping received");
    })?;
    pong.start()?;

    let ping = NetworkEngine::new(config.with_thread_name("ping"))?;
    ping.initialize(Arc::new(ping_wire))?;
    ping.start()?;

    let remote = ping.remote::<Ping>(PING_ENDPOINT);
    for round in 0..5 {
        let started = Instant::now();
        let seq = remote.invoke_wait(&Ping {
            round,
            note: format!("hello #{round}"),
        })?;
        info!(round, seq, rtt_us = started.elapsed().as_micros() as u64, "Ping acknowledged");
    }

    if let Some(stats) = ping.stats() {
        info!(
            sent = stats.frames_sent,
            received = stats.frames_received,
            bytes = stats.bytes_sent,
            "Ping transport totals"
        );
    }

    ping.shutdown()?;
    pong.shutdown()?;
    Ok(())
}
