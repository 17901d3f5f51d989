use clap::Parser;
use serde_json::json;
use slog::Drain;
use std::error::Error;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Parser, Debug)]
#[command(about = "Replicated key-value store node")]
struct Args {
    /// Node ID, unique within the cluster
    #[arg(long)]
    id: String,

    /// HTTP API address
    #[arg(long, default_value = "127.0.0.1:8000")]
    http: String,

    /// Raft address
    #[arg(long, default_value = "127.0.0.1:7000")]
    raft: String,

    /// HTTP address of an existing node to join
    #[arg(long)]
    join: Option<String>,

    /// Data directory
    #[arg(long, default_value = "data")]
    data: PathBuf,

    /// Bootstrap a new cluster with this node as its only member
    #[arg(long)]
    bootstrap: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let logger = create_root_logger_for_stdout();

    if let Err(e) = run(args, logger.clone()).await {
        slog::crit!(logger, "Node failed: {}", e);
        // Last handle on the async drain; dropping it flushes.
        drop(logger);
        process::exit(1);
    }
}

async fn run(args: Args, logger: slog::Logger) -> Result<(), Box<dyn Error>> {
    std::fs::create_dir_all(&args.data)?;

    let node = kvraft::try_create_node(kvraft::NodeConfig {
        node_id: args.id.clone(),
        raft_address: args.raft.clone(),
        data_directory: Some(args.data.clone()),
        bootstrap: args.bootstrap,
        logger: logger.clone(),
        options: kvraft::NodeOptions::default(),
    })
    .await?;
    let node = Arc::new(node);

    let listener = TcpListener::bind(&args.http).await?;
    let (server_shutdown_handle, server_shutdown_signal) = kvraft::shutdown_signal();
    let server = kvraft::HttpServer::new(logger.clone(), node.clone());
    let server_task = tokio::spawn(server.run(listener, server_shutdown_signal));

    if let Some(join_address) = args.join.as_deref().filter(|addr| *addr != args.http) {
        request_join(&logger, join_address, &args.id, &args.raft).await?;
    }

    tokio::signal::ctrl_c().await?;
    slog::info!(logger, "Received interrupt, shutting down");

    node.shutdown().await;
    server_shutdown_handle.shutdown();
    server_task.await??;

    Ok(())
}

async fn request_join(logger: &slog::Logger, join_address: &str, node_id: &str, raft_address: &str) -> Result<(), Box<dyn Error>> {
    let url = format!("http://{}/join", join_address);
    slog::info!(logger, "Requesting to join cluster"; "url" => &url);

    let response = reqwest::Client::new()
        .post(&url)
        .json(&json!({ "node_id": node_id, "addr": raft_address }))
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(format!("join request to {} failed with {}: {}", join_address, status, body).into());
    }

    slog::info!(logger, "Joined cluster"; "via" => join_address);
    Ok(())
}

fn create_root_logger_for_stdout() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!())
}
