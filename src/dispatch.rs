use crate::error::Rejected;
use crate::freeze::{FreezeCatalog, FreezeScriptKind};
use crate::migration::MigrationSelection;
use crate::remote::{CloneMode, GuestCredentials, ManagementApi, MoRef, RemoteRequest};
use crate::{log_debug, log_info, log_warn};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Operation names used in outcomes and errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    PowerOn,
    PowerOff,
    Reset,
    RebootGuest,
    ShutdownGuest,
    Rename,
    Clone,
    LinkedClone,
    InstantClone,
    Promote,
    Migrate,
    Snapshot,
    Delete,
    Freeze,
    SetScreenResolution,
    BootIntoSetup,
    ListTasks,
    Details,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::PowerOn => "power-on",
            Operation::PowerOff => "power-off",
            Operation::Reset => "reset",
            Operation::RebootGuest => "reboot-guest",
            Operation::ShutdownGuest => "shutdown-guest",
            Operation::Rename => "rename",
            Operation::Clone => "clone",
            Operation::LinkedClone => "linked-clone",
            Operation::InstantClone => "instant-clone",
            Operation::Promote => "promote",
            Operation::Migrate => "migrate",
            Operation::Snapshot => "snapshot",
            Operation::Delete => "delete",
            Operation::Freeze => "freeze",
            Operation::SetScreenResolution => "set-screen-resolution",
            Operation::BootIntoSetup => "boot-into-setup",
            Operation::ListTasks => "list-tasks",
            Operation::Details => "details",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the endpoint handed back for an accepted command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptedHandle {
    /// A remote task to follow through the task reporter
    Task(MoRef),
    /// Process id of a program started inside the guest
    GuestProcess(i64),
    /// The call went through; the endpoint returns nothing to follow
    Submitted,
}

/// The endpoint enqueued the command. Completion is not implied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub operation: Operation,
    pub target: MoRef,
    pub handle: AcceptedHandle,
}

impl Accepted {
    pub fn task(&self) -> Option<&MoRef> {
        match &self.handle {
            AcceptedHandle::Task(task) => Some(task),
            _ => None,
        }
    }
}

pub type Outcome = Result<Accepted, Rejected>;

/// Parameters of a snapshot request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotRequest {
    /// Defaults to today's date
    pub name: Option<String>,
    pub description: String,
    pub memory: bool,
    pub quiesce: bool,
}

impl SnapshotRequest {
    pub fn resolved_name(&self) -> String {
        match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => Local::now().date_naive().to_string(),
        }
    }
}

/// Single-shot lifecycle commands against managed objects.
///
/// Every command validates locally first and makes no remote call when
/// validation fails. Remote failures come back as
/// [`Rejected::RemoteOperationFailed`]; nothing is retried.
pub struct CommandDispatcher {
    api: Arc<dyn ManagementApi>,
}

impl CommandDispatcher {
    pub fn new(api: Arc<dyn ManagementApi>) -> Self {
        Self { api }
    }

    pub async fn power_on(&self, vm: Option<&MoRef>) -> Outcome {
        self.vm_task(Operation::PowerOn, vm, RemoteRequest::PowerOn).await
    }

    pub async fn power_off(&self, vm: Option<&MoRef>) -> Outcome {
        self.vm_task(Operation::PowerOff, vm, RemoteRequest::PowerOff).await
    }

    pub async fn reset(&self, vm: Option<&MoRef>) -> Outcome {
        self.vm_task(Operation::Reset, vm, RemoteRequest::Reset).await
    }

    pub async fn reboot_guest(&self, vm: Option<&MoRef>) -> Outcome {
        self.vm_task(Operation::RebootGuest, vm, RemoteRequest::RebootGuest)
            .await
    }

    pub async fn shutdown_guest(&self, vm: Option<&MoRef>) -> Outcome {
        self.vm_task(Operation::ShutdownGuest, vm, RemoteRequest::ShutdownGuest)
            .await
    }

    /// Rename any managed entity
    pub async fn rename(&self, target: Option<&MoRef>, new_name: &str) -> Outcome {
        let target = target.ok_or(Rejected::NoTargetSelected)?;
        let new_name = non_empty(new_name, "new name")?;
        self.issue(
            Operation::Rename,
            target,
            RemoteRequest::Rename { new_name },
            true,
        )
        .await
    }

    /// Full clone under a new name
    pub async fn clone_vm(&self, vm: Option<&MoRef>, name: &str) -> Outcome {
        let vm = require_vm(vm)?;
        let name = non_empty(name, "clone name")?;
        self.issue(
            Operation::Clone,
            vm,
            RemoteRequest::Clone {
                mode: CloneMode::Full,
                name: Some(name),
            },
            true,
        )
        .await
    }

    /// Linked clone; the endpoint picks a name when none is given
    pub async fn linked_clone(&self, vm: Option<&MoRef>, name: Option<&str>) -> Outcome {
        let vm = require_vm(vm)?;
        let request = RemoteRequest::Clone {
            mode: CloneMode::Linked,
            name: optional_name(name),
        };
        self.issue(Operation::LinkedClone, vm, request, true).await
    }

    /// Instant clone. The source must already be frozen (see [`Self::freeze`]);
    /// that precondition is the caller's to ensure.
    pub async fn instant_clone(&self, vm: Option<&MoRef>, name: Option<&str>) -> Outcome {
        let vm = require_vm(vm)?;
        let request = RemoteRequest::Clone {
            mode: CloneMode::Instant,
            name: optional_name(name),
        };
        self.issue(Operation::InstantClone, vm, request, true).await
    }

    /// Consolidate the disks of a linked clone
    pub async fn promote(&self, vm: Option<&MoRef>) -> Outcome {
        self.vm_task(
            Operation::Promote,
            vm,
            RemoteRequest::PromoteDisks { unlink: true },
        )
        .await
    }

    pub async fn migrate(&self, selection: &MigrationSelection) -> Outcome {
        let vm = require_vm(selection.vm())?;
        let target = selection.target()?;
        log_debug!(
            "Relocating {} to {} / {}",
            vm,
            target.host_name,
            target.datastore_name
        );
        self.issue(
            Operation::Migrate,
            vm,
            RemoteRequest::Relocate {
                host: target.host,
                datastore: target.datastore,
            },
            true,
        )
        .await
    }

    pub async fn snapshot(&self, vm: Option<&MoRef>, request: &SnapshotRequest) -> Outcome {
        let vm = require_vm(vm)?;
        let remote = RemoteRequest::CreateSnapshot {
            name: request.resolved_name(),
            description: request.description.clone(),
            memory: request.memory,
            quiesce: request.quiesce,
        };
        self.issue(Operation::Snapshot, vm, remote, true).await
    }

    /// Destroy the VM. There is no undo.
    pub async fn delete(&self, vm: Option<&MoRef>) -> Outcome {
        self.vm_task(Operation::Delete, vm, RemoteRequest::Destroy).await
    }

    /// Reconfigure the VM to enter firmware setup on its next boot
    pub async fn boot_into_setup(&self, vm: Option<&MoRef>) -> Outcome {
        self.vm_task(
            Operation::BootIntoSetup,
            vm,
            RemoteRequest::EnterSetupOnNextBoot,
        )
        .await
    }

    /// Ask the guest to change its display resolution
    pub async fn set_screen_resolution(
        &self,
        vm: Option<&MoRef>,
        width: u32,
        height: u32,
    ) -> Outcome {
        let vm = require_vm(vm)?;
        if width == 0 || height == 0 {
            return Err(Rejected::InvalidArgument(format!(
                "resolution {}x{} is not drawable",
                width, height
            )));
        }
        self.issue(
            Operation::SetScreenResolution,
            vm,
            RemoteRequest::SetScreenResolution { width, height },
            false,
        )
        .await
    }

    /// Upload the chosen freeze script into the guest and start it.
    pub async fn freeze(
        &self,
        vm: Option<&MoRef>,
        script: FreezeScriptKind,
        auth: &GuestCredentials,
    ) -> Outcome {
        let vm = require_vm(vm)?;
        if auth.user.trim().is_empty() {
            return Err(Rejected::InvalidArgument("guest user is empty".to_string()));
        }

        let script = FreezeCatalog::get(script);
        let guest_path = script.guest_path();
        log_info!("Uploading {} to {} at {}", script.label, vm, guest_path);

        self.api
            .upload_guest_file(vm, auth, &guest_path, script.content.as_bytes())
            .await
            .map_err(|e| self.failed(Operation::Freeze, vm, e))?;

        let pid = self
            .api
            .start_guest_program(vm, auth, &script.launch_spec())
            .await
            .map_err(|e| self.failed(Operation::Freeze, vm, e))?;

        if pid <= 0 {
            log_warn!("Freeze script on {} did not start (returned {})", vm, pid);
            return Err(Rejected::FreezeNotStarted { code: pid });
        }

        log_info!("Freeze script started on {} (pid {})", vm, pid);
        Ok(Accepted {
            operation: Operation::Freeze,
            target: vm.clone(),
            handle: AcceptedHandle::GuestProcess(pid),
        })
    }

    async fn vm_task(
        &self,
        operation: Operation,
        vm: Option<&MoRef>,
        request: RemoteRequest,
    ) -> Outcome {
        let vm = require_vm(vm)?;
        self.issue(operation, vm, request, true).await
    }

    async fn issue(
        &self,
        operation: Operation,
        target: &MoRef,
        request: RemoteRequest,
        expects_task: bool,
    ) -> Outcome {
        log_info!("Sending {} to {}", operation, target);

        let task = self
            .api
            .submit(target, &request)
            .await
            .map_err(|e| self.failed(operation, target, e))?;

        let handle = match task {
            Some(task) => AcceptedHandle::Task(task),
            None if expects_task => {
                return Err(self.failed(operation, target, "no task handle returned"));
            }
            None => AcceptedHandle::Submitted,
        };

        log_debug!("{} accepted for {}: {:?}", operation, target, handle);
        Ok(Accepted {
            operation,
            target: target.clone(),
            handle,
        })
    }

    fn failed(&self, operation: Operation, target: &MoRef, cause: impl fmt::Display) -> Rejected {
        log_warn!("{} on {} failed: {}", operation, target, cause);
        Rejected::remote(operation, cause)
    }
}

/// A VM reference is required; anything else counts as no selection
fn require_vm(vm: Option<&MoRef>) -> Result<&MoRef, Rejected> {
    match vm {
        Some(vm) if vm.is_vm() => Ok(vm),
        _ => Err(Rejected::NoTargetSelected),
    }
}

fn non_empty(value: &str, what: &str) -> Result<String, Rejected> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Rejected::InvalidArgument(format!("{} is empty", what)));
    }
    Ok(value.to_string())
}

fn optional_name(name: Option<&str>) -> Option<String> {
    name.map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}
