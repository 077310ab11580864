//! detect_proxy - HTTP forwarding proxy for the detection service.
//!
//! Listens on `--addr`/`LIVECAM_PROXY_ADDR` (or the config file) and forwards
//! uploads and camera-frame requests to the detection service until Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::mpsc;

use livecam_detect::{LiveCamConfig, ProxyConfig, ProxyServer};

#[derive(Parser, Debug)]
#[command(author, version, about = "Forward detection requests to the detection service")]
struct Args {
    /// Listen address (overrides config).
    #[arg(long, env = "LIVECAM_PROXY_ADDR")]
    addr: Option<String>,

    /// Detection service base URL (overrides config).
    #[arg(long, env = "LIVECAM_DETECTION_URL")]
    upstream: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = LiveCamConfig::load()?;

    let proxy_config = ProxyConfig {
        addr: args.addr.unwrap_or(config.proxy.addr),
        upstream_url: args.upstream.unwrap_or(config.detection_url),
        upstream_timeout: config.proxy.upstream_timeout,
    };
    let handle = ProxyServer::new(proxy_config).spawn()?;
    log::info!("detect_proxy running on http://{}", handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("error setting Ctrl-C handler")?;

    log::info!("detect_proxy waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping proxy...");
    handle.stop()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_fall_back_to_environment() {
        std::env::set_var("LIVECAM_PROXY_ADDR", "0.0.0.0:6060");
        std::env::set_var("LIVECAM_DETECTION_URL", "http://10.0.0.2:8000/api");
        let from_env = Args::try_parse_from(["detect_proxy"]);
        let from_flags = Args::try_parse_from(["detect_proxy", "--addr", "127.0.0.1:7070"]);
        std::env::remove_var("LIVECAM_PROXY_ADDR");
        std::env::remove_var("LIVECAM_DETECTION_URL");

        let from_env = from_env.unwrap();
        assert_eq!(from_env.addr.as_deref(), Some("0.0.0.0:6060"));
        assert_eq!(from_env.upstream.as_deref(), Some("http://10.0.0.2:8000/api"));
        assert_eq!(from_flags.unwrap().addr.as_deref(), Some("127.0.0.1:7070"));
    }
}
