use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::RwLock;

use eitec_vpn_core::command::CommandRunner;
use eitec_vpn_core::types::{HeartbeatReport, TrafficReport};
use eitec_vpn_module::agent::{sync_config_once, AgentContext};
use eitec_vpn_module::client::{ClientError, ServerClient};
use eitec_vpn_module::config::ModuleConfig;
use eitec_vpn_module::db::LocalStore;
use eitec_vpn_module::status::{StatusService, StatusSnapshot};
use eitec_vpn_module::tunnel::TunnelDriver;
use eitec_vpn_module::AgentError;

const CLIENT_CONFIG: &str = "\
[Interface]
PrivateKey = cHJpdmF0ZS1rZXktcHJpdmF0ZS1rZXktcHJpdmF0ZT0=
Address = 10.10.0.2/32

[Peer]
PublicKey = cHVibGljLWtleS1wdWJsaWMta2V5LXB1YmxpYy1rZXk9
Endpoint = vpn.example.com:51820
AllowedIPs = 10.10.0.0/24, 192.168.50.0/24
PersistentKeepalive = 25
";

/// Tiny HTTP server answering every request with a fixed status and body;
/// records the request heads it saw.
async fn spawn_mock_api(
    status: u16,
    body: &str,
) -> (
    SocketAddr,
    Arc<std::sync::Mutex<Vec<String>>>,
    tokio::sync::oneshot::Sender<()>,
) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let body = body.to_string();
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen_writer = seen.clone();
    let (tx, mut rx) = tokio::sync::oneshot::channel();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                accept = listener.accept() => {
                    let (mut stream, _) = accept.unwrap();
                    let request = read_request(&mut stream).await;
                    seen_writer.lock().unwrap().push(request);

                    let response = format!(
                        "HTTP/1.1 {status} X\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body,
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                }
                _ = &mut rx => break,
            }
        }
    });

    (addr, seen, tx)
}

/// Read one HTTP request: headers, then the declared body length.
async fn read_request(stream: &mut tokio::net::TcpStream) -> String {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];

    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        data.extend_from_slice(&buf[..n]);

        let text = String::from_utf8_lossy(&data);
        let Some(header_end) = text.find("\r\n\r\n") else {
            continue;
        };
        let content_length = text
            .lines()
            .find_map(|line| line.to_lowercase().strip_prefix("content-length:").map(str::trim).map(String::from))
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);
        if data.len() >= header_end + 4 + content_length {
            break;
        }
    }

    String::from_utf8_lossy(&data).into_owned()
}

async fn test_store() -> LocalStore {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let store = LocalStore::new(pool);

    let mut config = ModuleConfig::default();
    config.module.id = 42;
    config.module.private_key = "k".into();
    config.module.api_key = "test-api-key".into();
    config.server.url = "http://unused".into();
    store.sync_from_config(&config, None).await.unwrap();
    store
}

fn agent_context(base_url: &str, config_path: std::path::PathBuf, store: LocalStore) -> AgentContext {
    let runner = CommandRunner::new();
    AgentContext {
        client: ServerClient::new(base_url, 42, "test-api-key"),
        driver: Arc::new(TunnelDriver::new(runner.clone(), "wg-test", config_path.clone())),
        status: StatusService::new(runner, "wg-test", config_path),
        store,
        snapshot: Arc::new(RwLock::new(StatusSnapshot::default())),
        heartbeat_interval: Duration::from_secs(30),
        sync_interval: Duration::from_secs(300),
    }
}

// -- Server client -----------------------------------------------------------

#[tokio::test]
async fn heartbeat_carries_the_api_key() {
    let (addr, seen, _shutdown) = spawn_mock_api(200, "{}").await;
    let client = ServerClient::new(&format!("http://{addr}"), 42, "secret-key");

    client.send_heartbeat(&HeartbeatReport::default()).await.unwrap();

    let requests = seen.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].starts_with("POST /api/v1/modules/42/heartbeat"));
    assert!(requests[0].to_lowercase().contains("x-api-key: secret-key"));
}

#[tokio::test]
async fn traffic_report_posts_counters() {
    let (addr, seen, _shutdown) = spawn_mock_api(200, "{}").await;
    let client = ServerClient::new(&format!("http://{addr}"), 42, "secret-key");

    client
        .report_traffic(&TrafficReport {
            rx_bytes: 1024,
            tx_bytes: 2048,
        })
        .await
        .unwrap();

    let requests = seen.lock().unwrap();
    assert!(requests[0].starts_with("POST /api/v1/modules/42/traffic"));
    assert!(requests[0].contains("\"rx_bytes\":1024"));
    assert!(requests[0].contains("\"tx_bytes\":2048"));
}

#[tokio::test]
async fn server_errors_are_surfaced_with_body() {
    let (addr, _seen, _shutdown) = spawn_mock_api(500, "boom").await;
    let client = ServerClient::new(&format!("http://{addr}"), 42, "secret-key");

    let err = client.send_heartbeat(&HeartbeatReport::default()).await.unwrap_err();
    match err {
        ClientError::Server { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "boom");
        }
        other => panic!("expected server error, got {other:?}"),
    }
}

#[tokio::test]
async fn fetch_config_returns_raw_bytes() {
    let (addr, seen, _shutdown) = spawn_mock_api(200, CLIENT_CONFIG).await;
    let client = ServerClient::new(&format!("http://{addr}"), 42, "secret-key");

    let bytes = client.fetch_config().await.unwrap();
    assert_eq!(bytes, CLIENT_CONFIG.as_bytes());

    let requests = seen.lock().unwrap();
    assert!(requests[0].starts_with("GET /api/v1/modules/42/config"));
}

// -- Config sync -------------------------------------------------------------

#[tokio::test]
async fn identical_config_is_a_no_op() {
    let (addr, _seen, _shutdown) = spawn_mock_api(200, CLIENT_CONFIG).await;
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("wg-test.conf");
    std::fs::write(&config_path, CLIENT_CONFIG).unwrap();

    let ctx = agent_context(&format!("http://{addr}"), config_path.clone(), test_store().await);
    let changed = sync_config_once(&ctx).await.unwrap();

    assert!(!changed);
    // The file is untouched.
    assert_eq!(std::fs::read_to_string(&config_path).unwrap(), CLIENT_CONFIG);
}

#[tokio::test]
async fn malformed_config_is_rejected_before_write() {
    let (addr, _seen, _shutdown) = spawn_mock_api(200, "not a wireguard config").await;
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("wg-test.conf");
    std::fs::write(&config_path, CLIENT_CONFIG).unwrap();

    let ctx = agent_context(&format!("http://{addr}"), config_path.clone(), test_store().await);
    let err = sync_config_once(&ctx).await.unwrap_err();

    assert!(matches!(err, AgentError::Ini(_)));
    // The on-disk config survived.
    assert_eq!(std::fs::read_to_string(&config_path).unwrap(), CLIENT_CONFIG);
}

#[tokio::test]
async fn fetch_failure_leaves_disk_alone() {
    let (addr, _seen, _shutdown) = spawn_mock_api(401, "unauthorized").await;
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("wg-test.conf");
    std::fs::write(&config_path, CLIENT_CONFIG).unwrap();

    let ctx = agent_context(&format!("http://{addr}"), config_path.clone(), test_store().await);
    let err = sync_config_once(&ctx).await.unwrap_err();

    assert!(matches!(err, AgentError::Client(ClientError::Server { status: 401, .. })));
    assert_eq!(std::fs::read_to_string(&config_path).unwrap(), CLIENT_CONFIG);
}
