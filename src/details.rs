//! Per-selection detail summaries, fetched only when an object is selected.

use crate::dispatch::Operation;
use crate::error::Rejected;
use crate::remote::{ManagementApi, MoRef, PowerState};
use serde::Serialize;

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VmSummary {
    pub num_cpu: u32,
    pub cpu_usage_percent: f64,
    pub memory_usage_mb: u64,
    pub total_memory_mb: u64,
    pub disk_usage_gb: f64,
    pub powered_on: bool,
    pub frozen: bool,
    pub num_disks: u32,
    pub num_snapshots: u32,
    pub files_per_disk: Vec<u32>,
    pub swapped_memory_mb: u64,
    pub host_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostSummary {
    pub cpu_usage_percent: f64,
    pub memory_usage_percent: f64,
    pub storage_free_percent: f64,
    pub powered_on: bool,
    pub in_maintenance_mode: bool,
}

fn percent(part: f64, whole: f64) -> f64 {
    if whole <= 0.0 {
        return 0.0;
    }
    let value = part / whole * 100.0;
    (value * 10.0).round() / 10.0
}

pub async fn vm_summary(
    api: &dyn ManagementApi,
    vm: Option<&MoRef>,
) -> Result<VmSummary, Rejected> {
    let vm = vm.filter(|vm| vm.is_vm()).ok_or(Rejected::NoTargetSelected)?;
    let runtime = api
        .vm_runtime(vm)
        .await
        .map_err(|e| Rejected::remote(Operation::Details, e))?;

    Ok(VmSummary {
        num_cpu: runtime.num_cpu,
        cpu_usage_percent: percent(
            runtime.overall_cpu_usage_mhz as f64,
            runtime.max_cpu_usage_mhz as f64,
        ),
        memory_usage_mb: runtime.guest_memory_usage_mb,
        total_memory_mb: runtime.memory_size_mb,
        disk_usage_gb: (runtime.committed_storage_bytes as f64 / GIB as f64 * 100.0).round()
            / 100.0,
        powered_on: runtime.power_state == PowerState::PoweredOn,
        frozen: runtime.instant_clone_frozen,
        num_disks: runtime.disk_count,
        num_snapshots: runtime.snapshot_count,
        files_per_disk: runtime.files_per_disk,
        swapped_memory_mb: runtime.swapped_memory_mb,
        host_name: runtime.host_name,
    })
}

pub async fn host_summary(
    api: &dyn ManagementApi,
    host: Option<&MoRef>,
) -> Result<HostSummary, Rejected> {
    let host = host
        .filter(|host| host.is_host())
        .ok_or(Rejected::NoTargetSelected)?;
    let runtime = api
        .host_runtime(host)
        .await
        .map_err(|e| Rejected::remote(Operation::Details, e))?;
    let datastores = api
        .host_datastores(host)
        .await
        .map_err(|e| Rejected::remote(Operation::Details, e))?;

    let (free, capacity) = datastores
        .iter()
        .fold((0u64, 0u64), |(free, capacity), ds| {
            (free + ds.free_bytes, capacity + ds.capacity_bytes)
        });
    let cpu_capacity = runtime.cpu_mhz as f64 * runtime.num_cpu_cores as f64;

    Ok(HostSummary {
        cpu_usage_percent: percent(runtime.overall_cpu_usage_mhz as f64, cpu_capacity),
        memory_usage_percent: percent(
            runtime.overall_memory_usage_mb as f64,
            (runtime.memory_size_bytes / MIB) as f64,
        ),
        storage_free_percent: percent(free as f64, capacity as f64),
        powered_on: runtime.power_state == PowerState::PoweredOn,
        in_maintenance_mode: runtime.in_maintenance_mode,
    })
}
