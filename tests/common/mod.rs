#![allow(dead_code)]

use slog::Drain;
use tokio::time::{Duration, Instant};

pub fn create_root_logger_for_stdout(node_id: &str) -> slog::Logger {
    let decorator = slog_term::PlainSyncDecorator::new(slog_term::TestStdoutWriter);
    let drain = slog_term::FullFormat::new(decorator).use_file_location().build().fuse();

    slog::Logger::root(drain, slog::o!("test_node" => node_id.to_string()))
}

pub fn config(node_id: &str, raft_port: u16, bootstrap: bool) -> kvraft::NodeConfig {
    kvraft::NodeConfig {
        node_id: node_id.to_string(),
        raft_address: format!("127.0.0.1:{}", raft_port),
        data_directory: None,
        bootstrap,
        logger: create_root_logger_for_stdout(node_id),
        options: kvraft::NodeOptions::default(),
    }
}

/// Polls `condition` until it holds or `timeout` passes. Returns whether it held.
pub async fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    condition()
}
