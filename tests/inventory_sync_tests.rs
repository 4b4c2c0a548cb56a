// Integration tests for inventory synchronization against the simulator
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vmtool::error::{SyncError, VmToolError};
use vmtool::remote::{Credentials, Endpoint, ObjectKind, RemoteErrorKind};
use vmtool::sync::NoProgress;
use vmtool::{ConnectionManager, DataTree, InventoryKind, MoRef, SessionState, SimulatedEndpoint};

fn connected(sim: &Arc<SimulatedEndpoint>) -> ConnectionManager {
    ConnectionManager::new(sim.clone(), DataTree::shared())
}

fn creds() -> Credentials {
    Credentials::new("admin", "secret")
}

#[tokio::test]
async fn test_every_page_is_collected() {
    // No hosts exist, so only the VM kind issues property collections
    let sim = Arc::new(
        SimulatedEndpoint::builder()
            .user("admin", "secret")
            .vm("a", "nowhere")
            .vm("b", "nowhere")
            .vm("c", "nowhere")
            .vm("d", "nowhere")
            .vm("e", "nowhere")
            .page_size(2)
            .build(),
    );
    let manager = connected(&sim);

    let report = manager
        .connect_and_synchronize(Endpoint::new("vc"), creds(), Arc::new(NoProgress))
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(report.counts[&InventoryKind::Vm], 5);
    assert!(report.warnings.is_empty());

    let calls = sim.calls();
    assert_eq!(calls.retrieve, 1);
    assert_eq!(calls.continue_retrieve, 2);
    assert_eq!(
        manager.tree().names(InventoryKind::Vm),
        vec!["a", "b", "c", "d", "e"]
    );
}

#[tokio::test]
async fn test_explicit_page_size_is_honoured() {
    let sim = Arc::new(
        SimulatedEndpoint::builder()
            .user("admin", "secret")
            .vm("a", "nowhere")
            .vm("b", "nowhere")
            .vm("c", "nowhere")
            .build(),
    );
    let manager = connected(&sim).with_page_size(Some(1));

    manager
        .connect_and_synchronize(Endpoint::new("vc"), creds(), Arc::new(NoProgress))
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(sim.calls().retrievals(), 3);
    assert_eq!(manager.tree().inventory().index(InventoryKind::Vm).len(), 3);
}

#[tokio::test]
async fn test_duplicate_names_keep_the_last_object() {
    let sim = Arc::new(
        SimulatedEndpoint::builder()
            .user("admin", "secret")
            .vm("web", "nowhere")
            .vm("web", "nowhere")
            .build(),
    );
    let manager = connected(&sim);

    manager
        .connect_and_synchronize(Endpoint::new("vc"), creds(), Arc::new(NoProgress))
        .unwrap()
        .wait()
        .await
        .unwrap();

    let index = manager.tree().inventory();
    assert_eq!(index.index(InventoryKind::Vm).len(), 1);
    assert_eq!(
        manager.tree().lookup(InventoryKind::Vm, "web"),
        Some(MoRef::new(ObjectKind::VirtualMachine, "vm-2"))
    );
}

#[tokio::test]
async fn test_stale_view_skips_only_that_kind() {
    let sim = Arc::new(
        SimulatedEndpoint::builder()
            .user("admin", "secret")
            .host("esx01", &["ds1", "ds2"])
            .vm("db01", "esx01")
            .stale_view(ObjectKind::Datastore)
            .build(),
    );
    let manager = connected(&sim);

    let report = manager
        .connect_and_synchronize(Endpoint::new("vc"), creds(), Arc::new(NoProgress))
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].kind, InventoryKind::Datastore);
    assert_eq!(
        report.warnings[0].cause.kind,
        RemoteErrorKind::ManagedObjectNotFound
    );

    let tree = manager.tree();
    assert!(tree.is_connected());
    assert!(tree.inventory().index(InventoryKind::Datastore).is_empty());
    assert!(tree.lookup(InventoryKind::Vm, "db01").is_some());
    assert!(tree.lookup(InventoryKind::Host, "esx01").is_some());
}

#[tokio::test]
async fn test_failed_continuation_skips_the_kind() {
    let sim = Arc::new(
        SimulatedEndpoint::builder()
            .user("admin", "secret")
            .host("esx01", &["ds1"])
            .vm("a", "esx01")
            .vm("b", "esx01")
            .page_size(1)
            .failing_continuation(ObjectKind::VirtualMachine)
            .build(),
    );
    let manager = connected(&sim);

    let report = manager
        .connect_and_synchronize(Endpoint::new("vc"), creds(), Arc::new(NoProgress))
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].kind, InventoryKind::Vm);
    assert!(manager.tree().names(InventoryKind::Vm).is_empty());
    assert_eq!(manager.tree().names(InventoryKind::Host), vec!["esx01"]);
}

#[tokio::test]
async fn test_root_failure_aborts_and_releases_the_session() {
    let sim = Arc::new(
        SimulatedEndpoint::builder()
            .user("admin", "secret")
            .host("esx01", &[])
            .root_unavailable()
            .build(),
    );
    let manager = connected(&sim);

    let err = manager
        .connect_and_synchronize(Endpoint::new("vc"), creds(), Arc::new(NoProgress))
        .unwrap()
        .wait()
        .await
        .unwrap_err();

    assert!(matches!(err, VmToolError::Sync(SyncError::Fatal(_))));
    assert_eq!(manager.tree().status(), SessionState::Disconnected);
    assert!(manager.tree().inventory().is_empty());
    assert_eq!(sim.open_sessions(), 0);
}

#[tokio::test]
async fn test_portgroups_are_indexed_as_networks_too() {
    let sim = Arc::new(
        SimulatedEndpoint::builder()
            .user("admin", "secret")
            .network("VM Network")
            .portgroup("dv-pg-web")
            .dvswitch("dvs-core")
            .build(),
    );
    let manager = connected(&sim);

    manager
        .connect_and_synchronize(Endpoint::new("vc"), creds(), Arc::new(NoProgress))
        .unwrap()
        .wait()
        .await
        .unwrap();

    let tree = manager.tree();
    assert_eq!(tree.names(InventoryKind::PortGroup), vec!["dv-pg-web"]);
    assert_eq!(
        tree.names(InventoryKind::Network),
        vec!["dv-pg-web", "VM Network"]
    );
    assert_eq!(tree.names(InventoryKind::DvSwitch), vec!["dvs-core"]);
}

#[tokio::test]
async fn test_progress_is_monotonic_and_finishes() {
    let sim = Arc::new(
        SimulatedEndpoint::builder()
            .user("admin", "secret")
            .host("esx01", &["ds1"])
            .vm("a", "esx01")
            .vm("b", "esx01")
            .page_size(1)
            .build(),
    );
    let manager = connected(&sim);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();

    manager
        .connect_and_synchronize(
            Endpoint::new("vc"),
            creds(),
            Arc::new(move |_stage: &str, fraction: f32| {
                sink.lock().unwrap().push(fraction);
            }),
        )
        .unwrap()
        .wait()
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    assert!(seen.windows(2).all(|pair| pair[0] <= pair[1]), "{:?}", seen);
    assert_eq!(seen.last().copied(), Some(1.0));
}

#[tokio::test]
async fn test_refresh_picks_up_remote_renames() {
    let sim = Arc::new(
        SimulatedEndpoint::builder()
            .user("admin", "secret")
            .host("esx01", &[])
            .vm("old-name", "esx01")
            .build(),
    );
    let manager = connected(&sim);

    manager
        .connect_and_synchronize(Endpoint::new("vc"), creds(), Arc::new(NoProgress))
        .unwrap()
        .wait()
        .await
        .unwrap();
    let vm = manager.tree().lookup(InventoryKind::Vm, "old-name").unwrap();

    sim.rename_object(&vm, "new-name");
    manager.refresh(Arc::new(NoProgress)).unwrap().wait().await.unwrap();

    let tree = manager.tree();
    assert_eq!(tree.lookup(InventoryKind::Vm, "new-name"), Some(vm));
    assert!(tree.lookup(InventoryKind::Vm, "old-name").is_none());
    assert_eq!(sim.calls().login, 1);
}

#[tokio::test]
async fn test_unreadable_first_page_skips_only_that_kind() {
    let sim = Arc::new(
        SimulatedEndpoint::builder()
            .user("admin", "secret")
            .host("esx01", &["ds1"])
            .vm("db01", "esx01")
            .stale_retrieval(ObjectKind::HostSystem)
            .build(),
    );
    let manager = connected(&sim);

    let report = manager
        .connect_and_synchronize(Endpoint::new("vc"), creds(), Arc::new(NoProgress))
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].kind, InventoryKind::Host);
    assert_eq!(
        report.warnings[0].cause.kind,
        RemoteErrorKind::ManagedObjectNotFound
    );

    let tree = manager.tree();
    assert!(tree.is_connected());
    assert!(tree.names(InventoryKind::Host).is_empty());
    assert_eq!(tree.names(InventoryKind::Vm), vec!["db01"]);
    assert_eq!(tree.names(InventoryKind::Datastore), vec!["ds1"]);
}

#[tokio::test]
async fn test_disconnect_waits_for_the_running_pass() {
    let sim = Arc::new(
        SimulatedEndpoint::builder()
            .user("admin", "secret")
            .host("esx01", &["ds1"])
            .vm("db01", "esx01")
            .login_delay(Duration::from_millis(100))
            .build(),
    );
    let manager = connected(&sim);

    let pass = manager
        .connect_and_synchronize(Endpoint::new("vc"), creds(), Arc::new(NoProgress))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    manager.disconnect().await;

    // The pass finished before disconnect cleared the store
    assert!(pass.wait().await.is_ok());
    let tree = manager.tree();
    assert_eq!(tree.status(), SessionState::Disconnected);
    assert!(tree.names(InventoryKind::Vm).is_empty());
    assert_eq!(sim.open_sessions(), 0);
    assert_eq!(sim.calls().logout, 1);
}
