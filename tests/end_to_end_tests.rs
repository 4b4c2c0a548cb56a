// End-to-end workflow against the lab fixture
use std::sync::Arc;
use vmtool::details::{host_summary, vm_summary};
use vmtool::remote::{Credentials, Endpoint, TaskState};
use vmtool::sync::NoProgress;
use vmtool::{
    CommandDispatcher, ConnectionManager, DataTree, InventoryKind, SessionState,
    SimulatedEndpoint, TaskReporter, ToolConfig,
};

const LAB_FIXTURE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/fixtures/lab.toml");

fn lab() -> Arc<SimulatedEndpoint> {
    Arc::new(SimulatedEndpoint::from_fixture_file(LAB_FIXTURE).expect("lab fixture loads"))
}

fn admin() -> Credentials {
    Credentials::new("administrator@vsphere.local", "VMware1!")
}

#[tokio::test]
async fn test_select_power_on_and_list_tasks() {
    let sim = lab();
    let manager = ConnectionManager::new(sim.clone(), DataTree::shared());

    let report = manager
        .connect_and_synchronize(Endpoint::new("vcenter.lab.local"), admin(), Arc::new(NoProgress))
        .expect("gate is free")
        .wait()
        .await
        .expect("synchronization succeeds");

    assert_eq!(report.counts[&InventoryKind::Vm], 3);
    assert_eq!(report.counts[&InventoryKind::Host], 2);
    assert_eq!(report.counts[&InventoryKind::Datastore], 3);
    assert_eq!(report.counts[&InventoryKind::PortGroup], 2);
    assert_eq!(report.counts[&InventoryKind::Network], 4);
    assert_eq!(report.counts[&InventoryKind::DvSwitch], 1);

    let tree = manager.tree();
    assert_eq!(tree.status(), SessionState::Connected);
    assert_eq!(
        tree.names(InventoryKind::Vm),
        vec!["Build-Agent", "db01", "web01"]
    );

    let db01 = tree.lookup(InventoryKind::Vm, "db01");
    let dispatcher = CommandDispatcher::new(sim.clone());
    let accepted = dispatcher.power_on(db01.as_ref()).await.expect("accepted");
    let task = accepted.task().cloned().expect("task handle");

    let reporter = TaskReporter::new(sim.clone());
    let records = reporter.list_tasks(db01.as_ref()).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].task, task);
    assert_eq!(records[0].description_id, "VirtualMachine.powerOn");
    assert_eq!(records[0].state, TaskState::Running);
    assert_eq!(records[0].display_progress(), 0);
    assert_eq!(records[0].row()[4], "0");

    sim.set_task_progress(&task, 60);
    let records = reporter.list_tasks(db01.as_ref()).await.unwrap();
    assert_eq!(records[0].display_progress(), 60);

    sim.complete_tasks();
    let records = reporter.list_tasks(db01.as_ref()).await.unwrap();
    assert_eq!(records[0].state, TaskState::Success);
    assert_eq!(records[0].display_progress(), 100);
    assert!(records[0].duration().is_some());

    manager.disconnect().await;
    manager.disconnect().await;

    assert_eq!(tree.status(), SessionState::Disconnected);
    assert!(tree.session().is_none());
    assert!(tree.inventory().is_empty());
    assert_eq!(sim.open_sessions(), 0);
    assert_eq!(sim.calls().logout, 1);
}

#[tokio::test]
async fn test_tasks_of_other_entities_are_not_listed() {
    let sim = lab();
    let manager = ConnectionManager::new(sim.clone(), DataTree::shared());
    manager
        .connect_and_synchronize(Endpoint::new("vc"), admin(), Arc::new(NoProgress))
        .unwrap()
        .wait()
        .await
        .unwrap();

    let tree = manager.tree();
    let web01 = tree.lookup(InventoryKind::Vm, "web01");
    let db01 = tree.lookup(InventoryKind::Vm, "db01");
    CommandDispatcher::new(sim.clone())
        .reset(web01.as_ref())
        .await
        .unwrap();

    let reporter = TaskReporter::new(sim.clone());
    assert!(reporter.list_tasks(db01.as_ref()).await.unwrap().is_empty());
    assert_eq!(reporter.list_tasks(web01.as_ref()).await.unwrap().len(), 1);
    assert!(reporter.list_tasks(None).await.is_err());
}

#[tokio::test]
async fn test_selection_details_for_vm_and_host() {
    let sim = lab();
    let manager = ConnectionManager::new(sim.clone(), DataTree::shared());
    manager
        .connect_and_synchronize(Endpoint::new("vc"), admin(), Arc::new(NoProgress))
        .unwrap()
        .wait()
        .await
        .unwrap();
    let tree = manager.tree();

    let db01 = tree.lookup(InventoryKind::Vm, "db01");
    let vm = vm_summary(&*sim, db01.as_ref()).await.unwrap();
    assert_eq!(vm.num_cpu, 8);
    assert_eq!(vm.total_memory_mb, 32768);
    assert!(vm.powered_on);
    assert!(!vm.frozen);
    assert_eq!(vm.host_name.as_deref(), Some("esx01.lab.local"));

    let esx02 = tree.lookup(InventoryKind::Host, "esx02.lab.local");
    let host = host_summary(&*sim, esx02.as_ref()).await.unwrap();
    assert!(host.in_maintenance_mode);
    assert!(host.storage_free_percent > 0.0 && host.storage_free_percent <= 100.0);

    // A VM is not a host selection
    assert!(host_summary(&*sim, db01.as_ref()).await.is_err());
}

#[tokio::test]
async fn test_wrong_password_keeps_store_empty() {
    let sim = lab();
    let manager = ConnectionManager::new(sim.clone(), DataTree::shared());

    let result = manager
        .connect_and_synchronize(
            Endpoint::new("vc"),
            Credentials::new("administrator@vsphere.local", "nope"),
            Arc::new(NoProgress),
        )
        .unwrap()
        .wait()
        .await;

    assert!(result.is_err());
    assert_eq!(manager.tree().status(), SessionState::Disconnected);
    assert!(manager.tree().inventory().is_empty());
    assert_eq!(sim.calls().create_view, 0);
}

#[test]
fn test_config_points_at_fixture() {
    let config = ToolConfig::from_str(&format!(
        "[simulator]\nfixture = \"{}\"\n[sync]\npage_size = 2\n",
        LAB_FIXTURE
    ))
    .unwrap();

    let fixture = config.simulator.fixture.expect("fixture path");
    assert!(fixture.exists());
    assert!(SimulatedEndpoint::from_fixture_file(fixture).is_ok());
}
