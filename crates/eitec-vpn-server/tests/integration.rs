use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tempfile::TempDir;

use eitec_vpn_core::command::CommandRunner;
use eitec_vpn_core::telemetry::parse_dump;
use eitec_vpn_server::db::interfaces::{InterfaceStatus, InterfaceStore};
use eitec_vpn_server::db::peers::{ModuleStatus, PeerStore};
use eitec_vpn_server::db::pool::AddressPool;
use eitec_vpn_server::db::test_pool;
use eitec_vpn_server::error::VpnError;
use eitec_vpn_server::locks::InterfaceLocks;
use eitec_vpn_server::manager::{InterfaceManager, InterfaceTemplate};
use eitec_vpn_server::reconciler::StatusReconciler;
use eitec_vpn_server::registry::{CreateModuleRequest, CreateUserVpnRequest, PeerRegistry};

struct Harness {
    manager: Arc<InterfaceManager>,
    registry: PeerRegistry,
    reconciler: StatusReconciler,
    peers: PeerStore,
    pool: AddressPool,
    interfaces: InterfaceStore,
    _config_dir: TempDir,
    config_dir: std::path::PathBuf,
}

async fn harness() -> Harness {
    let db = test_pool().await;
    let runner = CommandRunner::new();
    let locks = InterfaceLocks::new();
    let config_dir = TempDir::new().unwrap();
    let config_path = config_dir.path().to_path_buf();

    let manager = Arc::new(InterfaceManager::new(
        db.clone(),
        runner.clone(),
        locks.clone(),
        config_path.clone(),
    ));
    let registry = PeerRegistry::new(db.clone(), manager.clone(), locks.clone());
    let reconciler = StatusReconciler::new(db.clone(), runner, locks);

    Harness {
        peers: PeerStore::new(db.clone()),
        pool: AddressPool::new(db.clone()),
        interfaces: InterfaceStore::new(db),
        manager,
        registry,
        reconciler,
        _config_dir: config_dir,
        config_dir: config_path,
    }
}

fn wg0_template() -> InterfaceTemplate {
    InterfaceTemplate {
        name: "wg0".into(),
        description: "primary segment".into(),
        network: "10.10.0.0/24".into(),
        listen_port: 51820,
        max_peers: 100,
        dns: "8.8.8.8,8.8.4.4".into(),
        mtu: 1420,
        external_interface: "eth0".into(),
        pre_up: None,
        post_up: None,
        pre_down: None,
        post_down: None,
        save_config: true,
    }
}

fn edge_module(interface_id: i64) -> CreateModuleRequest {
    CreateModuleRequest {
        name: "edge-01".into(),
        location: "plant 1".into(),
        description: String::new(),
        interface_id,
        allowed_ips: "192.168.50.0/24".into(),
        local_ip: None,
        persistent_keepalive: Some(25),
        endpoint: None,
        auto_generate_keys: true,
        auto_assign_ip: true,
        public_key: None,
        private_key: None,
        ip_address: None,
    }
}

// -- Interface creation ------------------------------------------------------

#[tokio::test]
async fn create_interface_populates_pool_and_server_ip() {
    let h = harness().await;

    let iface = h.manager.create(wg0_template()).await.unwrap();
    assert_eq!(iface.server_ip, "10.10.0.1");
    assert_eq!(iface.status, InterfaceStatus::Down);
    assert_eq!(h.pool.free_count("10.10.0.0/24").await.unwrap(), 253);

    // No config file is written at creation time.
    assert!(!h.config_dir.join("wg0.conf").exists());
}

#[tokio::test]
async fn interface_validation_rejects_bad_templates() {
    let h = harness().await;
    h.manager.create(wg0_template()).await.unwrap();

    let mut duplicate_name = wg0_template();
    duplicate_name.listen_port = 51821;
    duplicate_name.network = "10.11.0.0/24".into();
    assert!(matches!(
        h.manager.create(duplicate_name).await,
        Err(VpnError::Validation(_))
    ));

    let mut duplicate_port = wg0_template();
    duplicate_port.name = "wg1".into();
    duplicate_port.network = "10.11.0.0/24".into();
    assert!(matches!(
        h.manager.create(duplicate_port).await,
        Err(VpnError::Validation(_))
    ));

    let mut public_network = wg0_template();
    public_network.name = "wg1".into();
    public_network.listen_port = 51821;
    public_network.network = "8.8.0.0/24".into();
    assert!(matches!(
        h.manager.create(public_network).await,
        Err(VpnError::Validation(_))
    ));

    let mut tiny_network = wg0_template();
    tiny_network.name = "wg1".into();
    tiny_network.listen_port = 51821;
    tiny_network.network = "10.11.0.0/31".into();
    assert!(matches!(
        h.manager.create(tiny_network).await,
        Err(VpnError::Validation(_))
    ));

    let mut no_external = wg0_template();
    no_external.name = "wg1".into();
    no_external.listen_port = 51821;
    no_external.network = "10.11.0.0/24".into();
    no_external.external_interface = String::new();
    assert!(matches!(
        h.manager.create(no_external).await,
        Err(VpnError::Validation(_))
    ));
}

// -- Module lifecycle --------------------------------------------------------

#[tokio::test]
async fn first_module_gets_first_pool_address_and_config_on_disk() {
    let h = harness().await;
    let iface = h.manager.create(wg0_template()).await.unwrap();

    let module = h.registry.create_module(edge_module(iface.id)).await.unwrap();
    assert_eq!(module.ip_address, "10.10.0.2");
    assert_eq!(module.status, ModuleStatus::Unconfigured);
    assert!(module.preshared_key.is_some());
    assert_eq!(h.pool.free_count("10.10.0.0/24").await.unwrap(), 252);

    let config = std::fs::read_to_string(h.config_dir.join("wg0.conf")).unwrap();
    assert!(config.contains(&format!("PublicKey = {}", module.public_key)));
    assert!(config.contains("AllowedIPs = 10.10.0.2/32, 192.168.50.0/24"));

    // The pool entry is bound to the module, and the disk config is the
    // canonical render.
    let entry = h.pool.entry("10.10.0.0/24", "10.10.0.2").await.unwrap().unwrap();
    assert!(entry.is_used);
    assert_eq!(entry.peer_id, Some(module.id));
    assert_eq!(config, h.manager.render_config(iface.id).await.unwrap());
}

#[tokio::test]
async fn local_ip_is_inferred_from_allowed_ips() {
    let h = harness().await;
    let iface = h.manager.create(wg0_template()).await.unwrap();

    let module = h.registry.create_module(edge_module(iface.id)).await.unwrap();
    assert_eq!(module.local_ip.as_deref(), Some("192.168.50.1"));
}

#[tokio::test]
async fn peer_mutation_refused_while_interface_is_up() {
    let h = harness().await;
    let iface = h.manager.create(wg0_template()).await.unwrap();
    h.interfaces.set_status(iface.id, InterfaceStatus::Up).await.unwrap();

    let err = h.registry.create_module(edge_module(iface.id)).await.unwrap_err();
    match err {
        VpnError::StateConflict(message) => {
            assert!(message.contains("wg0"), "message should name the interface: {message}");
        }
        other => panic!("expected StateConflict, got {other:?}"),
    }
}

#[tokio::test]
async fn capacity_limit_counts_modules_and_active_users() {
    let h = harness().await;
    let mut template = wg0_template();
    template.max_peers = 1;
    let iface = h.manager.create(template).await.unwrap();

    h.registry.create_module(edge_module(iface.id)).await.unwrap();

    let mut second = edge_module(iface.id);
    second.name = "edge-02".into();
    let err = h.registry.create_module(second).await.unwrap_err();
    assert!(matches!(err, VpnError::Capacity(_)));
}

#[tokio::test]
async fn pool_exhaustion_fails_creation_cleanly() {
    let h = harness().await;
    let mut template = wg0_template();
    template.network = "10.10.0.0/30".into();
    let iface = h.manager.create(template).await.unwrap();

    // Exactly one allocatable address.
    let first = h.registry.create_module(edge_module(iface.id)).await.unwrap();
    assert_eq!(first.ip_address, "10.10.0.2");

    let mut second = edge_module(iface.id);
    second.name = "edge-02".into();
    let err = h.registry.create_module(second).await.unwrap_err();
    assert!(matches!(
        err,
        VpnError::Store(eitec_vpn_server::db::StoreError::PoolExhausted { .. })
    ));

    // The failed create left no residue.
    let mut third = edge_module(iface.id);
    third.name = "edge-03".into();
    third.auto_assign_ip = false;
    third.ip_address = Some("10.10.0.2".into());
    assert!(h.registry.create_module(third).await.is_err());
}

#[tokio::test]
async fn duplicate_module_name_rolls_back_allocation() {
    let h = harness().await;
    let iface = h.manager.create(wg0_template()).await.unwrap();

    h.registry.create_module(edge_module(iface.id)).await.unwrap();
    let free_before = h.pool.free_count("10.10.0.0/24").await.unwrap();

    let err = h.registry.create_module(edge_module(iface.id)).await.unwrap_err();
    assert!(matches!(err, VpnError::Validation(_)));

    // The address picked inside the failed transaction was released.
    assert_eq!(h.pool.free_count("10.10.0.0/24").await.unwrap(), free_before);
}

#[tokio::test]
async fn regenerate_keys_keeps_address_and_updates_config() {
    let h = harness().await;
    let iface = h.manager.create(wg0_template()).await.unwrap();
    let module = h.registry.create_module(edge_module(iface.id)).await.unwrap();
    let old_key = module.public_key.clone();

    let regenerated = h.registry.regenerate_module_keys(module.id).await.unwrap();
    assert_ne!(regenerated.public_key, old_key);
    assert_eq!(regenerated.ip_address, "10.10.0.2");
    assert_eq!(regenerated.status, ModuleStatus::Unconfigured);

    let config = std::fs::read_to_string(h.config_dir.join("wg0.conf")).unwrap();
    assert!(config.contains(&regenerated.public_key));
    assert!(!config.contains(&old_key));
}

#[tokio::test]
async fn delete_module_releases_address_and_rewrites_config() {
    let h = harness().await;
    let iface = h.manager.create(wg0_template()).await.unwrap();
    let module = h.registry.create_module(edge_module(iface.id)).await.unwrap();
    let key = module.public_key.clone();

    h.registry.delete_module(module.id).await.unwrap();

    let entry = h.pool.entry("10.10.0.0/24", "10.10.0.2").await.unwrap().unwrap();
    assert!(!entry.is_used);
    assert_eq!(h.pool.free_count("10.10.0.0/24").await.unwrap(), 253);

    let config = std::fs::read_to_string(h.config_dir.join("wg0.conf")).unwrap();
    assert!(!config.contains(&key));
}

#[tokio::test]
async fn interface_delete_refuses_with_peers_then_succeeds() {
    let h = harness().await;
    let iface = h.manager.create(wg0_template()).await.unwrap();
    let module = h.registry.create_module(edge_module(iface.id)).await.unwrap();

    assert!(matches!(
        h.manager.delete(iface.id).await,
        Err(VpnError::StateConflict(_))
    ));

    h.registry.delete_module(module.id).await.unwrap();
    h.manager.delete(iface.id).await.unwrap();

    assert!(!h.config_dir.join("wg0.conf").exists());
    assert_eq!(h.pool.free_count("10.10.0.0/24").await.unwrap(), 0);
    assert!(h.manager.get(iface.id).await.is_err());
}

// -- Rebuild -----------------------------------------------------------------

#[tokio::test]
async fn rebuild_is_idempotent() {
    let h = harness().await;
    let iface = h.manager.create(wg0_template()).await.unwrap();
    h.registry.create_module(edge_module(iface.id)).await.unwrap();

    // The create already wrote the file; an unchanged model writes nothing.
    assert!(!h.manager.rebuild(iface.id).await.unwrap());

    let before = std::fs::read_to_string(h.config_dir.join("wg0.conf")).unwrap();
    assert!(!h.manager.rebuild(iface.id).await.unwrap());
    let after = std::fs::read_to_string(h.config_dir.join("wg0.conf")).unwrap();
    assert_eq!(before, after);
}

// -- User VPNs ---------------------------------------------------------------

#[tokio::test]
async fn user_vpn_gets_derived_allowed_ips_and_next_address() {
    let h = harness().await;
    let iface = h.manager.create(wg0_template()).await.unwrap();
    let module = h.registry.create_module(edge_module(iface.id)).await.unwrap();

    let user = h
        .registry
        .create_user_vpn(CreateUserVpnRequest {
            module_id: module.id,
            username: "ops-laptop".into(),
            email: "ops@example.com".into(),
            description: String::new(),
            allowed_ips: None,
            max_devices: None,
            expires_at: None,
        })
        .await
        .unwrap();

    assert_eq!(user.ip_address, "10.10.0.3");
    assert_eq!(user.allowed_ips, "10.10.0.0/24, 192.168.50.0/24");
    assert!(user.is_active);

    let config = std::fs::read_to_string(h.config_dir.join("wg0.conf")).unwrap();
    assert!(config.contains(&format!("PublicKey = {}", user.public_key)));
    assert!(config.contains("AllowedIPs = 10.10.0.3/32"));
}

#[tokio::test]
async fn duplicate_username_on_module_is_rejected() {
    let h = harness().await;
    let iface = h.manager.create(wg0_template()).await.unwrap();
    let module = h.registry.create_module(edge_module(iface.id)).await.unwrap();

    let request = CreateUserVpnRequest {
        module_id: module.id,
        username: "ops-laptop".into(),
        email: String::new(),
        description: String::new(),
        allowed_ips: None,
        max_devices: None,
        expires_at: None,
    };
    h.registry.create_user_vpn(request.clone()).await.unwrap();

    let err = h.registry.create_user_vpn(request).await.unwrap_err();
    assert!(matches!(err, VpnError::Validation(_)));
}

// -- Reconciliation ----------------------------------------------------------

const IFACE_DUMP_LINE: &str =
    "U0VSVkVSLVBSSVZBVEUta2V5LXNlcnZlci1wcml2YXQ9\tU0VSVkVSLVBVQkxJQy1rZXktc2VydmVyLXB1YmxpYz0=\t51820\toff";

#[tokio::test]
async fn reconciliation_merges_counters_and_derives_status() {
    let h = harness().await;
    let iface = h.manager.create(wg0_template()).await.unwrap();
    let module = h.registry.create_module(edge_module(iface.id)).await.unwrap();
    let iface = h.manager.get(iface.id).await.unwrap();

    let now = Utc::now();
    let handshake = (now - ChronoDuration::seconds(30)).timestamp();
    let dump = format!(
        "{IFACE_DUMP_LINE}\n{}\t(none)\t203.0.113.9:40044\t10.10.0.2/32\t{handshake}\t1024\t2048\t25\n",
        module.public_key
    );
    let snapshot = parse_dump(&dump, now).unwrap();

    h.reconciler.apply_snapshot(&iface, &snapshot).await.unwrap();

    let merged = h.peers.get_module(module.id).await.unwrap();
    assert_eq!(merged.status, ModuleStatus::Online);
    assert_eq!(merged.total_rx_bytes, 1024);
    assert_eq!(merged.total_tx_bytes, 2048);
    assert!(merged.latest_handshake.is_some());
    assert!(merged.last_seen.is_some());

    let iface = h.manager.get(iface.id).await.unwrap();
    assert_eq!(iface.total_peers, 1);
    assert_eq!(iface.active_peers, 1);
    assert_eq!(iface.total_traffic, 3072);

    // Fifteen minutes later the peer is gone from telemetry: offline, with
    // counters untouched.
    let later = now + ChronoDuration::minutes(15);
    let empty = parse_dump(&format!("{IFACE_DUMP_LINE}\n"), later).unwrap();
    h.reconciler.apply_snapshot(&iface, &empty).await.unwrap();

    let aged = h.peers.get_module(module.id).await.unwrap();
    assert_eq!(aged.status, ModuleStatus::Offline);
    assert_eq!(aged.total_rx_bytes, 1024);
    assert_eq!(aged.total_tx_bytes, 2048);
}

#[tokio::test]
async fn stale_handshake_is_warning_then_offline() {
    let h = harness().await;
    let iface = h.manager.create(wg0_template()).await.unwrap();
    let module = h.registry.create_module(edge_module(iface.id)).await.unwrap();
    let iface = h.manager.get(iface.id).await.unwrap();

    let now = Utc::now();

    // Three-minute-old handshake: present but stale.
    let handshake = (now - ChronoDuration::minutes(3)).timestamp();
    let dump = format!(
        "{IFACE_DUMP_LINE}\n{}\t(none)\t(none)\t10.10.0.2/32\t{handshake}\t10\t20\t25\n",
        module.public_key
    );
    h.reconciler
        .apply_snapshot(&iface, &parse_dump(&dump, now).unwrap())
        .await
        .unwrap();
    assert_eq!(
        h.peers.get_module(module.id).await.unwrap().status,
        ModuleStatus::Warning
    );

    // Fifteen-minute-old handshake: offline even while listed.
    let handshake = (now - ChronoDuration::minutes(15)).timestamp();
    let dump = format!(
        "{IFACE_DUMP_LINE}\n{}\t(none)\t(none)\t10.10.0.2/32\t{handshake}\t10\t20\t25\n",
        module.public_key
    );
    h.reconciler
        .apply_snapshot(&iface, &parse_dump(&dump, now).unwrap())
        .await
        .unwrap();
    assert_eq!(
        h.peers.get_module(module.id).await.unwrap().status,
        ModuleStatus::Offline
    );
}

#[tokio::test]
async fn counter_updates_replace_never_sum() {
    let h = harness().await;
    let iface = h.manager.create(wg0_template()).await.unwrap();
    let module = h.registry.create_module(edge_module(iface.id)).await.unwrap();
    let iface = h.manager.get(iface.id).await.unwrap();

    let now = Utc::now();
    for (rx, tx) in [(100i64, 200i64), (150, 250), (150, 250)] {
        let handshake = now.timestamp();
        let dump = format!(
            "{IFACE_DUMP_LINE}\n{}\t(none)\t(none)\t10.10.0.2/32\t{handshake}\t{rx}\t{tx}\t25\n",
            module.public_key
        );
        h.reconciler
            .apply_snapshot(&iface, &parse_dump(&dump, now).unwrap())
            .await
            .unwrap();

        let merged = h.peers.get_module(module.id).await.unwrap();
        assert_eq!(merged.total_rx_bytes, rx);
        assert_eq!(merged.total_tx_bytes, tx);
    }

    // A smaller snapshot (peer reset) replaces the stored value.
    let dump = format!(
        "{IFACE_DUMP_LINE}\n{}\t(none)\t(none)\t10.10.0.2/32\t{}\t5\t7\t25\n",
        module.public_key,
        now.timestamp()
    );
    h.reconciler
        .apply_snapshot(&iface, &parse_dump(&dump, now).unwrap())
        .await
        .unwrap();
    let merged = h.peers.get_module(module.id).await.unwrap();
    assert_eq!(merged.total_rx_bytes, 5);
    assert_eq!(merged.total_tx_bytes, 7);
}

#[tokio::test]
async fn offline_aging_flips_stale_peers() {
    let h = harness().await;
    let iface = h.manager.create(wg0_template()).await.unwrap();
    let module = h.registry.create_module(edge_module(iface.id)).await.unwrap();
    let iface = h.manager.get(iface.id).await.unwrap();

    // Mark the module online with a last_seen in the past by applying a
    // snapshot taken three minutes ago.
    let then = Utc::now() - ChronoDuration::minutes(3);
    let dump = format!(
        "{IFACE_DUMP_LINE}\n{}\t(none)\t(none)\t10.10.0.2/32\t{}\t1\t1\t25\n",
        module.public_key,
        then.timestamp()
    );
    h.reconciler
        .apply_snapshot(&iface, &parse_dump(&dump, then).unwrap())
        .await
        .unwrap();
    assert_eq!(
        h.peers.get_module(module.id).await.unwrap().status,
        ModuleStatus::Online
    );

    // The 30-second job ages anything unseen for two minutes.
    h.reconciler.mark_offline_peers().await;
    assert_eq!(
        h.peers.get_module(module.id).await.unwrap().status,
        ModuleStatus::Offline
    );
}

#[tokio::test]
async fn heartbeat_and_traffic_updates_touch_the_row() {
    let h = harness().await;
    let iface = h.manager.create(wg0_template()).await.unwrap();
    let module = h.registry.create_module(edge_module(iface.id)).await.unwrap();

    h.peers.touch_module(module.id).await.unwrap();
    let touched = h.peers.get_module(module.id).await.unwrap();
    assert!(touched.last_seen.is_some());

    h.peers.record_module_traffic(module.id, 4096, 8192).await.unwrap();
    let reported = h.peers.get_module(module.id).await.unwrap();
    assert_eq!(reported.total_rx_bytes, 4096);
    assert_eq!(reported.total_tx_bytes, 8192);
}
