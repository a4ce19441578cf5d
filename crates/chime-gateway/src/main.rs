//! # chime-gateway
//!
//! Chime relay server binary — loads configuration, installs the metrics
//! recorder, and runs the WebSocket relay until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use chime_server::{ChimeServer, ServerConfig, config};

/// Chime notification relay server.
#[derive(Parser, Debug)]
#[command(name = "chime-gateway", about = "Chime notification relay server")]
struct Cli {
    /// Host to bind, overriding configuration.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, overriding configuration (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the settings file (default `~/.chime/relay.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON.
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    }
}

fn apply_cli_overrides(config: &mut ServerConfig, cli: &Cli) {
    if let Some(host) = &cli.host {
        config.host.clone_from(host);
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut server_config =
        config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    apply_cli_overrides(&mut server_config, &cli);

    let metrics = chime_server::metrics::install_recorder();
    let server = ChimeServer::new(server_config, metrics);
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;

    tracing::info!("Chime relay listening on ws://{addr}/ws");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server.stop().await;
    let _ = handle.await;
    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_leave_everything_unset() {
        let cli = Cli::parse_from(["chime-gateway"]);
        assert_eq!(cli.host, None);
        assert_eq!(cli.port, None);
        assert_eq!(cli.config, None);
        assert!(!cli.log_json);
    }

    #[test]
    fn cli_custom_host() {
        let cli = Cli::parse_from(["chime-gateway", "--host", "0.0.0.0"]);
        assert_eq!(cli.host.as_deref(), Some("0.0.0.0"));
    }

    #[test]
    fn cli_custom_port() {
        let cli = Cli::parse_from(["chime-gateway", "--port", "7000"]);
        assert_eq!(cli.port, Some(7000));
    }

    #[test]
    fn cli_config_path() {
        let cli = Cli::parse_from(["chime-gateway", "--config", "/etc/chime/relay.json"]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/chime/relay.json")));
    }

    #[test]
    fn cli_log_json_flag() {
        let cli = Cli::parse_from(["chime-gateway", "--log-json"]);
        assert!(cli.log_json);
    }

    #[test]
    fn cli_overrides_apply_to_config() {
        let cli = Cli::parse_from(["chime-gateway", "--host", "0.0.0.0", "--port", "7000"]);
        let mut config = ServerConfig::default();
        apply_cli_overrides(&mut config, &cli);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 7000);
    }

    #[test]
    fn absent_flags_leave_config_alone() {
        let cli = Cli::parse_from(["chime-gateway"]);
        let mut config = ServerConfig::default();
        apply_cli_overrides(&mut config, &cli);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9600);
    }

    #[tokio::test]
    async fn assembled_server_boots_and_reports_health() {
        let metrics = metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle();
        let server_config = ServerConfig {
            port: 0,
            ..ServerConfig::default()
        };
        let server = ChimeServer::new(server_config, metrics);
        let (addr, _handle) = server.listen().await.expect("server binds");

        let body: serde_json::Value = reqwest::get(format!("http://{addr}/health"))
            .await
            .expect("health request")
            .json()
            .await
            .expect("health body");
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connections"], 0);

        server.stop().await;
    }
}
