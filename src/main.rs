use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use vmtool::{
    CommandDispatcher, ConnectionManager, DataTree, InventoryKind, MoRef,
    Rejected, SimulatedEndpoint, TaskReporter, ToolConfig,
    details::{host_summary, vm_summary},
    dispatch::{Accepted, AcceptedHandle, Outcome, SnapshotRequest},
    freeze::{FreezeCatalog, FreezeScriptKind, GuestFamily},
    log_debug, log_info, logger,
    migration::MigrationSelection,
    remote::{Credentials, Endpoint, GuestCredentials},
    sync::SyncReport,
    tasks::TASK_COLUMNS,
};

#[derive(Parser)]
#[command(name = "vmtool")]
#[command(about = "Inventory and lifecycle commands for a vSphere-style endpoint")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Simulator fixture served instead of a live endpoint
    #[arg(long)]
    fixture: Option<PathBuf>,

    /// Endpoint host name
    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    #[arg(short, long)]
    user: Option<String>,

    #[arg(long, env = "VMTOOL_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Accept self-signed certificates
    #[arg(long)]
    insecure: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Synchronize and list the inventory
    Inventory {
        /// Only list one kind
        #[arg(value_enum)]
        kind: Option<KindArg>,
    },
    /// Power on a VM
    PowerOn { vm: String },
    /// Power off a VM
    PowerOff { vm: String },
    /// Hard reset a VM
    Reset { vm: String },
    /// Ask the guest OS to reboot
    Reboot { vm: String },
    /// Ask the guest OS to shut down
    Shutdown { vm: String },
    /// Rename an inventory object
    Rename {
        name: String,
        new_name: String,
        #[arg(long, value_enum, default_value = "vm")]
        kind: KindArg,
    },
    /// Clone a VM
    Clone {
        vm: String,
        /// Name of the clone; required for full clones
        name: Option<String>,
        #[arg(long, value_enum, default_value = "full")]
        mode: CloneArg,
    },
    /// Promote the disks of a linked clone
    Promote { vm: String },
    /// Relocate a VM to another host and datastore
    Migrate {
        vm: String,
        host: String,
        datastore: String,
    },
    /// Take a snapshot
    Snapshot {
        vm: String,
        /// Defaults to today's date
        #[arg(long)]
        name: Option<String>,
        #[arg(long, default_value = "")]
        description: String,
        /// Include guest memory
        #[arg(long)]
        memory: bool,
        /// Quiesce the guest file system
        #[arg(long)]
        quiesce: bool,
    },
    /// Destroy a VM
    Delete { vm: String },
    /// Run a freeze script inside the guest
    Freeze {
        vm: String,
        #[arg(long, default_value = "linux-bsd-restart")]
        script: FreezeScriptKind,
        #[arg(long)]
        guest_user: String,
        #[arg(long, env = "VMTOOL_GUEST_PASSWORD", hide_env_values = true)]
        guest_password: String,
    },
    /// Change the guest display resolution
    Resolution {
        vm: String,
        #[arg(long)]
        width: Option<u32>,
        #[arg(long)]
        height: Option<u32>,
    },
    /// Enter firmware setup on the next boot
    BiosBoot { vm: String },
    /// List the tasks recorded against an object
    Tasks {
        name: String,
        #[arg(long, value_enum, default_value = "vm")]
        kind: KindArg,
    },
    /// Runtime summary of a VM
    VmInfo { vm: String },
    /// Runtime summary of a host
    HostInfo { host: String },
    /// List the freeze script catalog
    Scripts,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    Vm,
    Host,
    Datastore,
    Network,
    Dvswitch,
    Portgroup,
}

impl From<KindArg> for InventoryKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Vm => InventoryKind::Vm,
            KindArg::Host => InventoryKind::Host,
            KindArg::Datastore => InventoryKind::Datastore,
            KindArg::Network => InventoryKind::Network,
            KindArg::Dvswitch => InventoryKind::DvSwitch,
            KindArg::Portgroup => InventoryKind::PortGroup,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CloneArg {
    Full,
    Linked,
    Instant,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logger::init_logger_with_level(cli.verbose);

    if let Commands::Scripts = cli.command {
        print_scripts();
        return Ok(());
    }

    let config = ToolConfig::load_or_default(cli.config.as_deref())
        .context("failed to load configuration")?;

    let fixture = cli
        .fixture
        .clone()
        .or_else(|| config.simulator.fixture.clone())
        .ok_or_else(|| {
            anyhow!("no endpoint backend configured; pass --fixture or set [simulator] fixture")
        })?;
    let api = Arc::new(
        SimulatedEndpoint::from_fixture_file(&fixture)
            .with_context(|| format!("failed to load fixture {}", fixture.display()))?,
    );

    let endpoint = endpoint_from(&cli, &config);
    let user = cli
        .user
        .clone()
        .or_else(|| config.connection.user.clone())
        .ok_or_else(|| anyhow!("no user given; pass --user or set [connection] user"))?;
    let credentials = Credentials::new(user, cli.password.clone().unwrap_or_default());

    let manager = ConnectionManager::new(api.clone(), DataTree::shared())
        .with_connect_timeout(config.connection.timeout())
        .with_page_size(config.sync.page_size);

    let handle = manager.connect_and_synchronize(
        endpoint,
        credentials,
        Arc::new(|stage: &str, fraction: f32| {
            log_debug!("{} ({:.0}%)", stage, fraction * 100.0);
        }),
    )?;
    let report = handle.wait().await.context("synchronization failed")?;
    print_warnings(&report);

    let result = run(cli.command, &config, api, &manager, &report).await;
    manager.disconnect().await;
    result
}

fn endpoint_from(cli: &Cli, config: &ToolConfig) -> Endpoint {
    let mut endpoint = config
        .connection
        .endpoint()
        .unwrap_or_else(|| Endpoint::new("localhost"));
    if let Some(host) = &cli.host {
        endpoint.host = host.clone();
    }
    if let Some(port) = cli.port {
        endpoint.port = port;
    }
    endpoint.insecure |= cli.insecure;
    endpoint
}

async fn run(
    command: Commands,
    config: &ToolConfig,
    api: Arc<SimulatedEndpoint>,
    manager: &ConnectionManager,
    report: &SyncReport,
) -> anyhow::Result<()> {
    let tree = manager.tree();
    let dispatcher = CommandDispatcher::new(api.clone());
    let vm = |name: &str| lookup(tree, InventoryKind::Vm, name);

    match command {
        Commands::Inventory { kind } => {
            let kinds = match kind {
                Some(kind) => vec![InventoryKind::from(kind)],
                None => InventoryKind::ALL.to_vec(),
            };
            if let Some(at) = tree.synchronized_at() {
                println!("Synchronized at {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
            }
            for kind in kinds {
                let names = tree.names(kind);
                println!("{} ({})", kind, report.counts.get(&kind).copied().unwrap_or(0));
                for name in names {
                    println!("  {}", name);
                }
            }
        }
        Commands::PowerOn { vm: name } => {
            report_outcome(tree, dispatcher.power_on(vm(&name).as_ref()).await)?
        }
        Commands::PowerOff { vm: name } => {
            report_outcome(tree, dispatcher.power_off(vm(&name).as_ref()).await)?
        }
        Commands::Reset { vm: name } => {
            report_outcome(tree, dispatcher.reset(vm(&name).as_ref()).await)?
        }
        Commands::Reboot { vm: name } => {
            report_outcome(tree, dispatcher.reboot_guest(vm(&name).as_ref()).await)?
        }
        Commands::Shutdown { vm: name } => {
            report_outcome(tree, dispatcher.shutdown_guest(vm(&name).as_ref()).await)?
        }
        Commands::Rename {
            name,
            new_name,
            kind,
        } => {
            let target = lookup(tree, kind.into(), &name);
            report_outcome(tree, dispatcher.rename(target.as_ref(), &new_name).await)?
        }
        Commands::Clone {
            vm: name,
            name: clone_name,
            mode,
        } => {
            let source = vm(&name);
            let outcome = match mode {
                CloneArg::Full => {
                    dispatcher
                        .clone_vm(source.as_ref(), clone_name.as_deref().unwrap_or_default())
                        .await
                }
                CloneArg::Linked => {
                    dispatcher
                        .linked_clone(source.as_ref(), clone_name.as_deref())
                        .await
                }
                CloneArg::Instant => {
                    dispatcher
                        .instant_clone(source.as_ref(), clone_name.as_deref())
                        .await
                }
            };
            report_outcome(tree, outcome)?
        }
        Commands::Promote { vm: name } => {
            report_outcome(tree, dispatcher.promote(vm(&name).as_ref()).await)?
        }
        Commands::Migrate {
            vm: name,
            host,
            datastore,
        } => {
            let mut selection = MigrationSelection::new(vm(&name));
            let datastores = selection.choose_host(&*api, tree, &host).await?;
            log_debug!("{} offers {}", host, datastores.join(", "));
            selection.choose_datastore(&datastore)?;
            report_outcome(tree, dispatcher.migrate(&selection).await)?
        }
        Commands::Snapshot {
            vm: name,
            name: snapshot_name,
            description,
            memory,
            quiesce,
        } => {
            let request = SnapshotRequest {
                name: snapshot_name,
                description,
                memory,
                quiesce,
            };
            report_outcome(tree, dispatcher.snapshot(vm(&name).as_ref(), &request).await)?
        }
        Commands::Delete { vm: name } => {
            report_outcome(tree, dispatcher.delete(vm(&name).as_ref()).await)?
        }
        Commands::Freeze {
            vm: name,
            script,
            guest_user,
            guest_password,
        } => {
            let auth = GuestCredentials::new(guest_user, guest_password);
            report_outcome(tree, dispatcher.freeze(vm(&name).as_ref(), script, &auth).await)?
        }
        Commands::Resolution {
            vm: name,
            width,
            height,
        } => {
            let width = width.unwrap_or(config.display.screen_width);
            let height = height.unwrap_or(config.display.screen_height);
            report_outcome(
                tree,
                dispatcher
                    .set_screen_resolution(vm(&name).as_ref(), width, height)
                    .await,
            )?
        }
        Commands::BiosBoot { vm: name } => {
            report_outcome(tree, dispatcher.boot_into_setup(vm(&name).as_ref()).await)?
        }
        Commands::Tasks { name, kind } => {
            let entity = lookup(tree, kind.into(), &name);
            let tasks = TaskReporter::new(api.clone())
                .list_tasks(entity.as_ref())
                .await?;

            println!(
                "{:<12} {:<10} {:<36} {:<10} {:<14} {:<18} {:<8}",
                TASK_COLUMNS[0],
                TASK_COLUMNS[1],
                TASK_COLUMNS[2],
                TASK_COLUMNS[3],
                TASK_COLUMNS[4],
                TASK_COLUMNS[5],
                TASK_COLUMNS[6]
            );
            println!("{}", "=".repeat(114));
            for task in &tasks {
                let row = task.row();
                println!(
                    "{:<12} {:<10} {:<36} {:<10} {:<14} {:<18} {:<8}",
                    row[0], row[1], row[2], row[3], row[4], row[5], row[6]
                );
            }
            if tasks.is_empty() {
                println!("No tasks recorded for '{}'", name);
            }
        }
        Commands::VmInfo { vm: name } => {
            let summary = vm_summary(&*api, vm(&name).as_ref()).await?;
            println!("VM: {}", name);
            println!("  vCPUs:          {}", summary.num_cpu);
            println!("  CPU usage:      {}%", summary.cpu_usage_percent);
            println!(
                "  Memory:         {} / {} MB",
                summary.memory_usage_mb, summary.total_memory_mb
            );
            println!("  Swapped:        {} MB", summary.swapped_memory_mb);
            println!("  Disk usage:     {} GB", summary.disk_usage_gb);
            println!("  Disks:          {}", summary.num_disks);
            println!("  Files per disk: {:?}", summary.files_per_disk);
            println!("  Snapshots:      {}", summary.num_snapshots);
            println!("  Powered on:     {}", summary.powered_on);
            println!("  Frozen:         {}", summary.frozen);
            println!(
                "  Host:           {}",
                summary.host_name.as_deref().unwrap_or("-")
            );
        }
        Commands::HostInfo { host } => {
            let target = lookup(tree, InventoryKind::Host, &host);
            let summary = host_summary(&*api, target.as_ref()).await?;
            println!("Host: {}", host);
            println!("  CPU usage:      {}%", summary.cpu_usage_percent);
            println!("  Memory usage:   {}%", summary.memory_usage_percent);
            println!("  Storage free:   {}%", summary.storage_free_percent);
            println!("  Powered on:     {}", summary.powered_on);
            println!("  Maintenance:    {}", summary.in_maintenance_mode);
        }
        Commands::Scripts => print_scripts(),
    }

    Ok(())
}

fn lookup(tree: &DataTree, kind: InventoryKind, name: &str) -> Option<MoRef> {
    let found = tree.lookup(kind, name);
    if found.is_none() {
        log_info!("No {} named '{}' in the inventory", kind, name);
    }
    found
}

fn report_outcome(tree: &DataTree, outcome: Outcome) -> anyhow::Result<()> {
    let Accepted {
        operation,
        target,
        handle,
    } = outcome.map_err(reject)?;
    let target = match tree.name_of(&target) {
        Some(name) => format!("{} ({})", name, target),
        None => target.to_string(),
    };

    match handle {
        AcceptedHandle::Task(task) => {
            println!("✅ {} accepted for {} (task {})", operation, target, task.value)
        }
        AcceptedHandle::GuestProcess(pid) => {
            println!("✅ {} started in {} (pid {})", operation, target, pid)
        }
        AcceptedHandle::Submitted => println!("✅ {} submitted for {}", operation, target),
    }
    Ok(())
}

fn reject(rejected: Rejected) -> anyhow::Error {
    anyhow!("❌ {}", rejected)
}

fn print_warnings(report: &SyncReport) {
    for warning in &report.warnings {
        println!("⚠️  {}", warning);
    }
}

fn print_scripts() {
    println!("{:<20} {:<28} {:<16}", "NAME", "LABEL", "FILE");
    println!("{}", "=".repeat(64));
    for family in GuestFamily::ALL {
        println!("{}", family.as_str());
        for script in FreezeCatalog::for_family(family) {
            println!(
                "{:<20} {:<28} {:<16}",
                script.kind.as_str(),
                script.label,
                script.file_name
            );
        }
    }
}

