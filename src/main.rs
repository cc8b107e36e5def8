// src/main.rs

//! Entry point for the cluster daemon.

use std::env;
use std::sync::Arc;

use anyhow::Result;
use tracing::error;
use tracing_subscriber::{filter::EnvFilter, prelude::*, reload};
use wazuh_cluster::agents::InMemoryAgentDirectory;
use wazuh_cluster::config::Config;
use wazuh_cluster::server;

#[tokio::main]
async fn main() -> Result<()> {
    run_app().await
}

async fn run_app() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("wazuh-clusterd {VERSION}");
        return Ok(());
    }

    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or("cluster.toml");

    let mut config = match Config::from_file(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from \"{config_path}\": {e}");
            std::process::exit(1);
        }
    };

    if let Some(port_index) = args.iter().position(|arg| arg == "--port") {
        match args.get(port_index + 1) {
            Some(port_str) => match port_str.parse::<u16>() {
                Ok(port) => config.port = port,
                Err(_) => {
                    eprintln!("Invalid port number: {port_str}");
                    std::process::exit(1);
                }
            },
            None => {
                eprintln!("--port flag requires a value");
                std::process::exit(1);
            }
        }
    }

    let initial_log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    let (filter, reload_handle) = reload::Layer::new(EnvFilter::new(initial_log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact().with_ansi(true))
        .init();

    // Production wiring to the real agent domain model is out of scope here;
    // a fuller deployment would seed this from the manager's agent database.
    let agent_directory = Arc::new(InMemoryAgentDirectory::default());

    if let Err(e) = server::run(config, agent_directory, Some(reload_handle)).await {
        error!("server runtime error: {e}");
        return Err(e);
    }

    Ok(())
}
