mod support;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lobridge::{
    BridgeError, BridgeSession, ConnectionManager, ConverterError, PropertyValue,
    ProtocolNegotiator, ProcessSupervisor, SocketConnector,
};
use support::{FakeConnector, FakeEngine, FakeProcessManager, init_tracing, test_config};
use tokio::net::TcpStream;

struct Fixture {
    manager: FakeProcessManager,
    engine: FakeEngine,
    supervisor: Arc<ProcessSupervisor<FakeProcessManager>>,
    connections: ConnectionManager<FakeConnector, FakeProcessManager>,
    _profiles: tempfile::TempDir,
}

fn fixture(port: u16) -> Fixture {
    let profiles = tempfile::tempdir().unwrap();
    let manager = FakeProcessManager::new();
    let engine = FakeEngine::new();
    let supervisor = Arc::new(ProcessSupervisor::new(
        test_config(port, profiles.path(), 10),
        Arc::new(manager.clone()),
    ));
    let connections = ConnectionManager::new(engine.connector(), supervisor.clone());
    Fixture {
        manager,
        engine,
        supervisor,
        connections,
        _profiles: profiles,
    }
}

#[tokio::test]
async fn test_unreachable_after_exactly_max_attempts() {
    init_tracing();
    let fixture = fixture(2010);
    fixture.engine.set_down(true);
    fixture.supervisor.ensure_started().await.unwrap();

    let result = fixture.connections.ensure_connected(4).await;

    match result {
        Err(ConverterError::EngineUnreachable {
            port,
            attempts,
            last_error,
        }) => {
            assert_eq!(port, 2010);
            assert_eq!(attempts, 4);
            assert!(matches!(last_error, Some(BridgeError::Io(_))));
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("connected to a dead engine"),
    }
    assert_eq!(fixture.connections.connector().attempts(), 4);
}

struct UnusedNegotiator;

#[async_trait]
impl ProtocolNegotiator for UnusedNegotiator {
    async fn negotiate(
        &self,
        _stream: TcpStream,
        _uno_url: &str,
        _bridge_name: &str,
    ) -> Result<Box<dyn BridgeSession>, BridgeError> {
        Err(BridgeError::remote("nothing should be listening"))
    }
}

#[tokio::test]
async fn test_closed_port_is_unreachable() {
    init_tracing();
    let port = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let profiles = tempfile::tempdir().unwrap();
    let supervisor = Arc::new(ProcessSupervisor::new(
        test_config(port, profiles.path(), 3),
        Arc::new(FakeProcessManager::new()),
    ));
    let connections = ConnectionManager::new(SocketConnector::new(UnusedNegotiator), supervisor);

    let result = connections.ensure_connected(3).await;
    assert!(matches!(
        result,
        Err(ConverterError::EngineUnreachable {
            attempts: 3,
            last_error: Some(BridgeError::Io(_)),
            ..
        })
    ));
}

#[tokio::test]
async fn test_engine_exit_during_startup_is_not_retried() {
    init_tracing();
    let fixture = fixture(2011);
    fixture.manager.exit_on_spawn(true);
    fixture.supervisor.ensure_started().await.unwrap();

    let result = fixture.connections.ensure_connected(5).await;

    assert!(matches!(result, Err(ConverterError::LaunchFailure(_))));
    assert_eq!(fixture.connections.connector().attempts(), 0);
}

#[tokio::test]
async fn test_live_connection_is_reused() {
    init_tracing();
    let fixture = fixture(2012);
    fixture.supervisor.ensure_started().await.unwrap();

    let first = fixture.connections.ensure_connected(3).await.unwrap();
    let second = fixture.connections.ensure_connected(3).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(fixture.connections.connector().attempts(), 1);
}

#[tokio::test]
async fn test_terminated_engine_fences_connection() {
    init_tracing();
    let fixture = fixture(2013);
    let documents = tempfile::tempdir().unwrap();
    let source = documents.path().join("a.txt");
    std::fs::write(&source, "a").unwrap();
    let url = url::Url::from_file_path(&source).unwrap().to_string();

    fixture.supervisor.ensure_started().await.unwrap();
    let stale = fixture.connections.ensure_connected(3).await.unwrap();
    assert!(stale.is_current());

    fixture.supervisor.terminate().await;
    assert!(!stale.is_current());

    // Never silently reconnects
    let result = stale.open(&url, &[]).await;
    assert!(matches!(result, Err(BridgeError::Disposed)));
    assert!(stale.probe().await.is_err());

    fixture.supervisor.ensure_started().await.unwrap();
    let fresh = fixture.connections.ensure_connected(3).await.unwrap();
    assert!(!Arc::ptr_eq(&stale, &fresh));
    assert!(fresh.is_current());
    assert_eq!(stale.generation(), 0);
    assert_eq!(fresh.generation(), 1);
    assert_eq!(fixture.connections.connector().attempts(), 2);
}

#[tokio::test]
async fn test_interleaved_tasks_close_wrong_document() {
    init_tracing();
    let fixture = fixture(2014);
    let documents = tempfile::tempdir().unwrap();
    let mut urls = Vec::new();
    for name in ["a.txt", "b.txt"] {
        let path = documents.path().join(name);
        std::fs::write(&path, name).unwrap();
        urls.push(url::Url::from_file_path(&path).unwrap().to_string());
    }

    fixture.supervisor.ensure_started().await.unwrap();
    let connection = fixture.connections.ensure_connected(3).await.unwrap();
    let hidden = [PropertyValue::new("Hidden", true)];

    // Task A opens, then task B opens before A is done
    connection.open(&urls[0], &hidden).await.unwrap();
    let second = connection.open(&urls[1], &hidden).await.unwrap();
    assert!(Arc::ptr_eq(&connection.current_document().unwrap(), &second));

    // A finishes first and closes "its" document, then B does the same
    assert!(connection.close_current().await.unwrap());
    assert!(!connection.close_current().await.unwrap());

    let loaded = fixture.engine.loaded();
    assert_eq!(loaded.len(), 2);
    // A's document was never closed, B's exactly once
    assert_eq!(fixture.engine.closed(), vec![loaded[1]]);
}

#[tokio::test]
async fn test_hung_engine_is_recycled() {
    init_tracing();
    let fixture = fixture(2016);
    fixture.supervisor.ensure_started().await.unwrap();
    let first = fixture.connections.ensure_connected(3).await.unwrap();
    let hung = fixture.manager.spawned()[0];

    fixture.engine.hang_next_liveness_check();
    let fresh = tokio::time::timeout(
        Duration::from_secs(5),
        fixture.connections.ensure_connected(3),
    )
    .await
    .expect("waited on a hung engine")
    .unwrap();

    assert!(!Arc::ptr_eq(&first, &fresh));
    assert!(!fixture.manager.is_alive(hung));
    let spawned = fixture.manager.spawned();
    assert_eq!(spawned.len(), 2);
    assert!(fixture.manager.is_alive(spawned[1]));
    assert!(fresh.is_current());
    assert_eq!(fixture.connections.connector().attempts(), 2);
}

#[tokio::test]
async fn test_close_connection_never_fails() {
    init_tracing();
    let fixture = fixture(2015);

    // Nothing to close
    fixture.connections.close_connection().await;

    fixture.supervisor.ensure_started().await.unwrap();
    fixture.connections.ensure_connected(3).await.unwrap();
    fixture.connections.close_connection().await;
    fixture.connections.close_connection().await;

    assert!(fixture.connections.current().await.is_none());
    assert!(
        fixture
            .engine
            .events()
            .contains(&support::EngineEvent::Disposed)
    );
}
