// nodelink-probe: connect to a device, log what it sends, optionally push one payload
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::time::sleep;
use tracing::{info, warn};

use nodelink::common::logging::{self, events};
use nodelink::structures::config::{DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_RECV_BUFFER_SIZE};
use nodelink::{event_channel, Endpoint, Link, LinkConfig, LinkEvent};

#[derive(Parser, Debug)]
#[command(name = "nodelink-probe", about = "Connect to a device and log its traffic")]
struct Args {
    /// Device endpoint, tcp://host:port
    #[arg(long, env = "NODELINK_ENDPOINT", default_value = "tcp://127.0.0.1:55555")]
    endpoint: String,

    #[arg(long, default_value_t = DEFAULT_RECV_BUFFER_SIZE)]
    buffer_size: usize,

    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT_MS)]
    connect_timeout_ms: u64,

    /// Payload sent once connected (UTF-8 text)
    #[arg(long)]
    send: Option<String>,

    /// Stop after this many seconds instead of waiting for Ctrl+C
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Print Prometheus text metrics on exit
    #[arg(long)]
    metrics: bool,
}

fn preview(data: &[u8]) -> String {
    data.iter().take(32).map(|b| format!("{:02x}", b)).collect::<Vec<_>>().join(" ")
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let args = Args::parse();

    let endpoint = Endpoint::from_uri(&args.endpoint).context("parse endpoint")?;
    let config = LinkConfig {
        endpoint,
        recv_buffer_size: args.buffer_size,
        connect_timeout_ms: args.connect_timeout_ms,
        ..LinkConfig::default()
    };
    let link = Link::new(config);
    info!(event = events::APP_START, link_id = %link.id(), endpoint = %endpoint, msg = "Probe start");

    let (listener, mut link_events) = event_channel();
    link.subscribe(listener);

    link.connect().await.with_context(|| format!("connect to {endpoint}"))?;
    let receiver = link.start_continuous_receive(vec![0u8; args.buffer_size]);

    if let Some(payload) = &args.send {
        match link.send(payload.as_bytes()).await {
            Ok(n) => info!(link_id = %link.id(), bytes = n, msg = "Payload sent"),
            Err(e) => warn!(link_id = %link.id(), error = %e, msg = "Payload not sent"),
        }
    }

    let deadline = async {
        match args.duration_secs {
            Some(secs) => sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            ev = link_events.recv() => match ev {
                Some(LinkEvent::Connected) => info!(link_id = %link.id(), msg = "Link up"),
                Some(LinkEvent::Data(data)) => {
                    info!(link_id = %link.id(), bytes = data.len(), preview = %preview(&data), msg = "Device data");
                }
                Some(LinkEvent::Disconnected(reason)) => {
                    info!(link_id = %link.id(), reason = %reason, msg = "Link down");
                    break;
                }
                None => break,
            },
            _ = &mut ctrl_c => break,
            _ = &mut deadline => break,
        }
    }

    link.disconnect().await;
    if let Some(handle) = receiver {
        if let Err(e) = handle.join().await.exit {
            warn!(link_id = %link.id(), error = %e, msg = "Receive ended with a fault");
        }
    }

    println!("{}", serde_json::to_string_pretty(&link.stats())?);
    if args.metrics {
        print!("{}", link.metrics().gather_text());
    }
    info!(event = events::APP_SHUTDOWN, link_id = %link.id(), msg = "Probe stop");
    Ok(())
}
