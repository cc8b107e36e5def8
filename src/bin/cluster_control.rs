//! Thin CLI front-end over the admin endpoint. Exit codes: `0` success, `1`
//! any error (connection, transport, or an `err` response).

use bytes::Bytes;
use clap::{Parser, Subcommand};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use wazuh_cluster::protocol::ClusterFrameCodec;
use wazuh_cluster::protocol::Frame;

#[derive(Parser)]
#[command(name = "cluster_control", about = "Query and control a wazuh-clusterd admin endpoint")]
struct Cli {
    #[arg(long, default_value = "127.0.0.1:1517")]
    admin_addr: String,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// List connected nodes.
    Nodes,
    /// Show per-node sync health, optionally filtered by name substring.
    Health {
        #[arg(long)]
        filter: Option<String>,
    },
    /// List known agents, optionally filtered by substring.
    Agents {
        #[arg(long, default_value = "")]
        search: String,
    },
    /// Report the permit state of the named nodes (or all, if omitted).
    Sync {
        #[arg(long)]
        nodes: Option<String>,
    },
    /// Show catalog entries for the given comma-separated paths.
    Files {
        #[arg(long)]
        paths: Option<String>,
        #[arg(long)]
        nodes: Option<String>,
    },
    /// Show a single path's catalog entry.
    FileStatus { path: String },
    /// Reload the node's tracing filter without a restart.
    SetLogLevel { level: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    match run(&cli).await {
        Ok(body) => {
            println!("{body}");
            std::process::exit(0);
        }
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}

async fn run(cli: &Cli) -> anyhow::Result<String> {
    let socket = TcpStream::connect(&cli.admin_addr).await?;
    let mut framed = Framed::new(socket, ClusterFrameCodec);

    let request = match &cli.command {
        CliCommand::Nodes => "get_nodes".to_string(),
        CliCommand::Health { filter } => match filter {
            Some(f) => format!("get_health {f}"),
            None => "get_health".to_string(),
        },
        CliCommand::Agents { search } => format!("get_agents {search}"),
        CliCommand::Sync { nodes } => match nodes {
            Some(n) => format!("sync {n}"),
            None => "sync".to_string(),
        },
        CliCommand::Files { paths, nodes } => {
            let paths = paths.clone().unwrap_or_default();
            match nodes {
                Some(n) => format!("get_files {paths};{n}"),
                None => format!("get_files {paths}"),
            }
        }
        CliCommand::FileStatus { path } => format!("file_status {path}"),
        CliCommand::SetLogLevel { level } => format!("set_log_level {level}"),
    };

    framed.send(Frame::new(1, Bytes::from(request))).await?;
    let response = framed
        .next()
        .await
        .ok_or_else(|| anyhow::anyhow!("connection closed before a response arrived"))??;

    let (kind, body) = response.split_command();
    let text = String::from_utf8_lossy(body).to_string();
    if kind == "ok" {
        Ok(text)
    } else {
        anyhow::bail!(text)
    }
}
