mod common;

use bytes::Bytes;
use common::{config, create_root_logger_for_stdout, eventually};
use kvraft::{ConsensusEngine, KvError, NodeCreationError, RaftState};
use std::error::Error;
use std::sync::Arc;
use tokio::time::Duration;

#[tokio::test]
async fn set_get_delete_on_bootstrapped_node() -> Result<(), Box<dyn Error>> {
    let node = kvraft::try_create_node(config("n1", 7000, true)).await?;

    assert_eq!(node.state(), RaftState::Leader);
    assert_eq!(node.leader(), Some("127.0.0.1:7000".to_string()));

    node.set("x", "1").await?;
    assert_eq!(node.get("x"), Some("1".to_string()));

    node.set("x", "2").await?;
    assert_eq!(node.get("x"), Some("2".to_string()));

    node.delete("x").await?;
    assert_eq!(node.get("x"), None);

    // Deleting an absent key is still a success.
    node.delete("x").await?;

    node.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn fresh_node_without_bootstrap_rejects_writes() -> Result<(), Box<dyn Error>> {
    let node = kvraft::try_create_node(config("n2", 7001, false)).await?;

    assert_eq!(node.state(), RaftState::Follower);
    assert_eq!(node.leader(), None);

    let result = node.set("k", "v").await;
    assert!(matches!(result, Err(KvError::NotLeader { leader: None })));

    let result = node.join("n3", "127.0.0.1:7002").await;
    assert!(matches!(result, Err(kvraft::MembershipError::NotLeader { .. })));

    Ok(())
}

#[tokio::test]
async fn timed_out_write_is_applied_later() -> Result<(), Box<dyn Error>> {
    let mut node_config = config("n1", 7000, true);
    node_config.options = kvraft::NodeOptions {
        apply_timeout: Some(Duration::from_millis(50)),
        replication_latency: Some(Duration::from_millis(300)),
        ..Default::default()
    };
    let node = kvraft::try_create_node(node_config).await?;

    let result = node.set("slow", "v").await;
    assert!(matches!(result, Err(KvError::Timeout(_))), "{:?}", result);

    assert!(eventually(Duration::from_secs(5), || node.get("slow").is_some()).await);
    assert_eq!(node.get("slow"), Some("v".to_string()));

    Ok(())
}

#[tokio::test]
async fn join_is_idempotent_by_id_or_address() -> Result<(), Box<dyn Error>> {
    let logger = create_root_logger_for_stdout("n1");
    let local = kvraft::ServerInfo::new("n1", "127.0.0.1:7000");
    let state_machine = Arc::new(kvraft::KvStateMachine::new(logger.clone()));
    let engine = Arc::new(
        kvraft::LocalEngine::start(kvraft::LocalEngineConfig {
            logger: logger.clone(),
            local: local.clone(),
            state_machine: state_machine.clone(),
            snapshot_store: Arc::new(kvraft::InMemorySnapshotStore::new()),
            log_path: None,
            snapshot_threshold: 1024,
            snapshot_interval: Duration::ZERO,
            replication_latency: Duration::ZERO,
            snapshot_on_shutdown: false,
        })
        .await?,
    );
    let node = kvraft::KvNode::new(logger, local, state_machine, engine.clone(), Duration::from_secs(5));
    node.bootstrap().await?;

    node.join("n2", "127.0.0.1:7001").await?;
    // Retried join, same id under a new address, new id under a known address.
    node.join("n2", "127.0.0.1:7001").await?;
    node.join("n2", "127.0.0.1:9999").await?;
    node.join("n3", "127.0.0.1:7001").await?;

    let configuration = engine.configuration().await?;
    assert_eq!(
        configuration.servers(),
        &[
            kvraft::ServerInfo::new("n1", "127.0.0.1:7000"),
            kvraft::ServerInfo::new("n2", "127.0.0.1:7001"),
        ]
    );

    Ok(())
}

#[tokio::test]
async fn undecodable_entry_does_not_stop_later_writes() -> Result<(), Box<dyn Error>> {
    let logger = create_root_logger_for_stdout("n1");
    let local = kvraft::ServerInfo::new("n1", "127.0.0.1:7000");
    let state_machine = Arc::new(kvraft::KvStateMachine::new(logger.clone()));
    let engine = Arc::new(
        kvraft::LocalEngine::start(kvraft::LocalEngineConfig {
            logger: logger.clone(),
            local: local.clone(),
            state_machine: state_machine.clone(),
            snapshot_store: Arc::new(kvraft::InMemorySnapshotStore::new()),
            log_path: None,
            snapshot_threshold: 1024,
            snapshot_interval: Duration::ZERO,
            replication_latency: Duration::ZERO,
            snapshot_on_shutdown: false,
        })
        .await?,
    );
    let node = kvraft::KvNode::new(logger, local, state_machine, engine.clone(), Duration::from_secs(5));
    node.bootstrap().await?;

    let poisoned = engine
        .propose_entry(Bytes::from_static(b"{\"op\":"), Duration::from_secs(5))
        .await?;
    assert!(matches!(poisoned.result, kvraft::ApplyResult::DecodeFailed(_)));

    node.set("after", "ok").await?;
    assert_eq!(node.get("after"), Some("ok".to_string()));

    Ok(())
}

#[tokio::test]
async fn restart_restores_state_from_snapshot() -> Result<(), Box<dyn Error>> {
    let data_directory = tempfile::tempdir()?;

    let mut first_config = config("n1", 7000, true);
    first_config.data_directory = Some(data_directory.path().to_path_buf());
    let first = kvraft::try_create_node(first_config).await?;
    first.set("a", "1").await?;
    first.set("b", "2").await?;
    first.delete("a").await?;
    first.shutdown().await;

    let mut second_config = config("n1", 7000, false);
    second_config.data_directory = Some(data_directory.path().to_path_buf());
    let second = kvraft::try_create_node(second_config).await?;

    assert_eq!(second.get("a"), None);
    assert_eq!(second.get("b"), Some("2".to_string()));
    assert_eq!(second.state(), RaftState::Leader);

    second.set("c", "3").await?;
    assert_eq!(second.get("c"), Some("3".to_string()));

    Ok(())
}

#[tokio::test]
async fn restart_replays_log_without_any_snapshot() -> Result<(), Box<dyn Error>> {
    let data_directory = tempfile::tempdir()?;
    let options = || kvraft::NodeOptions {
        snapshot_on_shutdown: Some(false),
        snapshot_interval: Some(Duration::ZERO),
        ..Default::default()
    };

    let mut first_config = config("n1", 7000, true);
    first_config.data_directory = Some(data_directory.path().to_path_buf());
    first_config.options = options();
    let first = kvraft::try_create_node(first_config).await?;
    first.set("a", "1").await?;
    first.set("b", "2").await?;
    first.delete("a").await?;
    first.shutdown().await;

    let snapshots = std::fs::read_dir(data_directory.path().join("raft").join("snapshots"))?.count();
    assert_eq!(snapshots, 0);

    let mut second_config = config("n1", 7000, false);
    second_config.data_directory = Some(data_directory.path().to_path_buf());
    second_config.options = options();
    let second = kvraft::try_create_node(second_config).await?;

    assert_eq!(second.get("a"), None);
    assert_eq!(second.get("b"), Some("2".to_string()));
    assert_eq!(second.state(), RaftState::Leader);

    Ok(())
}

#[tokio::test]
async fn bootstrap_on_existing_state_is_fatal() -> Result<(), Box<dyn Error>> {
    let data_directory = tempfile::tempdir()?;

    let mut first_config = config("n1", 7000, true);
    first_config.data_directory = Some(data_directory.path().to_path_buf());
    let first = kvraft::try_create_node(first_config).await?;
    first.set("a", "1").await?;
    first.shutdown().await;

    let mut second_config = config("n1", 7000, true);
    second_config.data_directory = Some(data_directory.path().to_path_buf());
    let result = kvraft::try_create_node(second_config).await;

    assert!(matches!(
        result,
        Err(NodeCreationError::Bootstrap(kvraft::BootstrapError::AlreadyBootstrapped))
    ));

    Ok(())
}

#[tokio::test]
async fn corrupt_snapshot_fails_startup() -> Result<(), Box<dyn Error>> {
    let data_directory = tempfile::tempdir()?;

    let mut first_config = config("n1", 7000, true);
    first_config.data_directory = Some(data_directory.path().to_path_buf());
    let first = kvraft::try_create_node(first_config).await?;
    first.set("a", "1").await?;
    first.shutdown().await;

    for snapshot_dir in std::fs::read_dir(data_directory.path().join("raft").join("snapshots"))? {
        std::fs::write(snapshot_dir?.path().join("state.bin"), b"{\"a\":")?;
    }

    let mut second_config = config("n1", 7000, false);
    second_config.data_directory = Some(data_directory.path().to_path_buf());
    let result = kvraft::try_create_node(second_config).await;

    assert!(matches!(result, Err(NodeCreationError::Restore(_))));

    Ok(())
}

#[tokio::test]
async fn shutdown_is_idempotent_and_final() -> Result<(), Box<dyn Error>> {
    let node = kvraft::try_create_node(config("n1", 7000, true)).await?;
    node.set("k", "v").await?;

    node.shutdown().await;
    node.shutdown().await;

    assert_eq!(node.state(), RaftState::Shutdown);
    assert!(matches!(node.set("k", "v2").await, Err(KvError::Shutdown)));
    // Local reads still see the last applied state.
    assert_eq!(node.get("k"), Some("v".to_string()));

    Ok(())
}

#[tokio::test]
async fn illegal_options_are_rejected() {
    let mut node_config = config("n1", 7000, true);
    node_config.options.snapshot_threshold = Some(0);

    let result = kvraft::try_create_node(node_config).await;

    assert!(matches!(result, Err(NodeCreationError::IllegalOptions(_))));
}
