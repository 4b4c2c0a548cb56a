//! Management API abstraction
//!
//! The wire client that talks to the management endpoint lives outside this
//! crate. Everything here describes what that client must provide:
//! - session login/logout and the content root
//! - container views and the paginated property collector
//! - mutation requests that hand back asynchronous task references
//! - the task collector and in-guest program execution

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for calls into the management API
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Remote object types the core needs to tell apart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectKind {
    VirtualMachine,
    HostSystem,
    Datastore,
    Network,
    DistributedVirtualSwitch,
    DistributedVirtualPortgroup,
    Folder,
    ContainerView,
    Task,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::VirtualMachine => "VirtualMachine",
            ObjectKind::HostSystem => "HostSystem",
            ObjectKind::Datastore => "Datastore",
            ObjectKind::Network => "Network",
            ObjectKind::DistributedVirtualSwitch => "DistributedVirtualSwitch",
            ObjectKind::DistributedVirtualPortgroup => "DistributedVirtualPortgroup",
            ObjectKind::Folder => "Folder",
            ObjectKind::ContainerView => "ContainerView",
            ObjectKind::Task => "Task",
        }
    }

    /// Whether an object of kind `self` shows up in a container view of `view_type`.
    pub fn is_a(&self, view_type: ObjectKind) -> bool {
        *self == view_type
            || (view_type == ObjectKind::Network
                && *self == ObjectKind::DistributedVirtualPortgroup)
    }
}

/// Managed object reference: identifies a remote entity without its state
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MoRef {
    pub kind: ObjectKind,
    pub value: String,
}

impl MoRef {
    pub fn new(kind: ObjectKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    pub fn is_vm(&self) -> bool {
        self.kind == ObjectKind::VirtualMachine
    }

    pub fn is_host(&self) -> bool {
        self.kind == ObjectKind::HostSystem
    }
}

impl fmt::Display for MoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.value)
    }
}

/// Where to connect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    /// Skip certificate verification
    pub insecure: bool,
}

impl Endpoint {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 443,
            insecure: false,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Login credentials for the management endpoint
#[derive(Clone)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Credentials for an account inside a guest OS
#[derive(Clone)]
pub struct GuestCredentials {
    pub user: String,
    pub password: String,
}

impl GuestCredentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for GuestCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuestCredentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Opaque key of an authenticated remote session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey(pub String);

/// Product information reported by the endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AboutInfo {
    pub full_name: String,
    pub api_version: String,
}

/// Root handle for querying the object graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRoot {
    pub root_folder: MoRef,
    pub about: AboutInfo,
}

/// Remote enumeration of every object of one type under a root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerView {
    pub view: MoRef,
    pub objects: Vec<MoRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSpec {
    pub obj: MoRef,
    pub skip: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertySpec {
    pub object_type: ObjectKind,
    pub all: bool,
    pub path_set: Vec<String>,
}

/// Batch of objects plus the properties to read from each of them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyFilterSpec {
    pub object_set: Vec<ObjectSpec>,
    pub prop_set: Vec<PropertySpec>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetrieveOptions {
    /// Page size hint; the server may return fewer objects per page.
    pub max_objects: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DynamicProperty {
    pub name: String,
    pub val: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectContent {
    pub obj: MoRef,
    pub prop_set: Vec<DynamicProperty>,
}

impl ObjectContent {
    pub fn property(&self, name: &str) -> Option<&serde_json::Value> {
        self.prop_set
            .iter()
            .find(|prop| prop.name == name)
            .map(|prop| &prop.val)
    }
}

/// One page of a property collection; `token` is set while pages remain
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RetrieveResult {
    pub objects: Vec<ObjectContent>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloneMode {
    Full,
    Linked,
    Instant,
}

/// Mutations the core asks the endpoint to perform on a managed object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteRequest {
    PowerOn,
    PowerOff,
    Reset,
    RebootGuest,
    ShutdownGuest,
    Rename {
        new_name: String,
    },
    Clone {
        mode: CloneMode,
        name: Option<String>,
    },
    PromoteDisks {
        unlink: bool,
    },
    Relocate {
        host: MoRef,
        datastore: MoRef,
    },
    CreateSnapshot {
        name: String,
        description: String,
        memory: bool,
        quiesce: bool,
    },
    Destroy,
    SetScreenResolution {
        width: u32,
        height: u32,
    },
    EnterSetupOnNextBoot,
}

impl RemoteRequest {
    /// Remote description identifier of the task this request creates
    pub fn description_id(&self) -> &'static str {
        match self {
            RemoteRequest::PowerOn => "VirtualMachine.powerOn",
            RemoteRequest::PowerOff => "VirtualMachine.powerOff",
            RemoteRequest::Reset => "VirtualMachine.reset",
            RemoteRequest::RebootGuest => "VirtualMachine.rebootGuest",
            RemoteRequest::ShutdownGuest => "VirtualMachine.shutdownGuest",
            RemoteRequest::Rename { .. } => "ManagedEntity.rename",
            RemoteRequest::Clone { mode, .. } => match mode {
                CloneMode::Instant => "VirtualMachine.instantClone",
                CloneMode::Full | CloneMode::Linked => "VirtualMachine.clone",
            },
            RemoteRequest::PromoteDisks { .. } => "VirtualMachine.promoteDisks",
            RemoteRequest::Relocate { .. } => "VirtualMachine.relocate",
            RemoteRequest::CreateSnapshot { .. } => "VirtualMachine.createSnapshot",
            RemoteRequest::Destroy => "ManagedEntity.destroy",
            RemoteRequest::SetScreenResolution { .. } => "VirtualMachine.setScreenResolution",
            RemoteRequest::EnterSetupOnNextBoot => "VirtualMachine.reconfigure",
        }
    }
}

/// Program to start inside a guest after its payload was uploaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestProgramSpec {
    pub program_path: String,
    pub arguments: String,
    pub working_directory: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Queued,
    Running,
    Success,
    Error,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskState::Queued => "queued",
            TaskState::Running => "running",
            TaskState::Success => "success",
            TaskState::Error => "error",
        };
        f.write_str(label)
    }
}

/// How far below the filtered entity the task collector looks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskRecursion {
    SelfOnly,
    Children,
    All,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFilterSpec {
    pub entity: MoRef,
    pub recursion: TaskRecursion,
}

/// Remote view of one task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub task: MoRef,
    pub entity: Option<MoRef>,
    pub description_id: String,
    pub state: TaskState,
    pub start_time: DateTime<Utc>,
    pub complete_time: Option<DateTime<Utc>>,
    pub progress: Option<u8>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerState {
    PoweredOn,
    PoweredOff,
    Suspended,
}

/// Raw runtime figures of a VM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmRuntime {
    pub num_cpu: u32,
    pub overall_cpu_usage_mhz: u32,
    pub max_cpu_usage_mhz: u32,
    pub guest_memory_usage_mb: u64,
    pub memory_size_mb: u64,
    pub swapped_memory_mb: u64,
    pub committed_storage_bytes: u64,
    pub uncommitted_storage_bytes: u64,
    pub power_state: PowerState,
    pub instant_clone_frozen: bool,
    pub disk_count: u32,
    pub snapshot_count: u32,
    pub files_per_disk: Vec<u32>,
    pub host_name: Option<String>,
}

/// Raw runtime figures of a host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostRuntime {
    pub cpu_mhz: u32,
    pub num_cpu_cores: u32,
    pub overall_cpu_usage_mhz: u32,
    pub memory_size_bytes: u64,
    pub overall_memory_usage_mb: u64,
    pub power_state: PowerState,
    pub in_maintenance_mode: bool,
}

/// Capacity figures for one datastore
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatastoreCapacity {
    pub datastore: MoRef,
    pub name: String,
    pub capacity_bytes: u64,
    pub free_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteErrorKind {
    InvalidLogin,
    Unreachable,
    Timeout,
    ManagedObjectNotFound,
    PermissionDenied,
    InvalidState,
    Transport,
    Other,
}

/// Failure reported by the management API client
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(what: impl fmt::Display) -> Self {
        Self::new(
            RemoteErrorKind::ManagedObjectNotFound,
            format!("managed object {} not found", what),
        )
    }
}

/// Client for a vSphere-style management endpoint
#[async_trait]
pub trait ManagementApi: Send + Sync {
    /// Authenticate and open a session
    async fn login(&self, endpoint: &Endpoint, credentials: &Credentials)
    -> RemoteResult<SessionKey>;

    /// Close a session
    async fn logout(&self, session: &SessionKey) -> RemoteResult<()>;

    /// Fetch the content root of a session
    async fn retrieve_content(&self, session: &SessionKey) -> RemoteResult<ContentRoot>;

    /// Create a view over every object of `object_type` below `root`
    async fn create_container_view(
        &self,
        root: &MoRef,
        object_type: ObjectKind,
        recursive: bool,
    ) -> RemoteResult<ContainerView>;

    /// Release a container view
    async fn destroy_view(&self, view: &MoRef) -> RemoteResult<()>;

    /// First page of a property collection
    async fn retrieve_properties(
        &self,
        filter: &PropertyFilterSpec,
        options: &RetrieveOptions,
    ) -> RemoteResult<RetrieveResult>;

    /// Next page for a continuation token
    async fn continue_retrieve_properties(&self, token: &str) -> RemoteResult<RetrieveResult>;

    /// Submit a mutation; `None` means the endpoint accepted the call but
    /// handed back no task
    async fn submit(&self, target: &MoRef, request: &RemoteRequest)
    -> RemoteResult<Option<MoRef>>;

    /// Tasks matching a filter, newest page first
    async fn collect_tasks(&self, filter: &TaskFilterSpec) -> RemoteResult<Vec<TaskInfo>>;

    /// Datastores attached to a host
    async fn host_datastores(&self, host: &MoRef) -> RemoteResult<Vec<DatastoreCapacity>>;

    async fn vm_runtime(&self, vm: &MoRef) -> RemoteResult<VmRuntime>;

    async fn host_runtime(&self, host: &MoRef) -> RemoteResult<HostRuntime>;

    /// Upload a file into the guest file system
    async fn upload_guest_file(
        &self,
        vm: &MoRef,
        auth: &GuestCredentials,
        guest_path: &str,
        content: &[u8],
    ) -> RemoteResult<()>;

    /// Start a program inside the guest; positive values are process ids
    async fn start_guest_program(
        &self,
        vm: &MoRef,
        auth: &GuestCredentials,
        program: &GuestProgramSpec,
    ) -> RemoteResult<i64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn portgroups_appear_in_network_views() {
        assert!(ObjectKind::DistributedVirtualPortgroup.is_a(ObjectKind::Network));
        assert!(ObjectKind::Network.is_a(ObjectKind::Network));
        assert!(!ObjectKind::Network.is_a(ObjectKind::DistributedVirtualPortgroup));
        assert!(!ObjectKind::HostSystem.is_a(ObjectKind::VirtualMachine));
    }

    #[test]
    fn credentials_debug_hides_password() {
        let creds = Credentials::new("admin", "hunter2");
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("hunter2"));

        let guest = GuestCredentials::new("root", "s3cret");
        assert!(!format!("{:?}", guest).contains("s3cret"));
    }

    #[test]
    fn moref_display() {
        let vm = MoRef::new(ObjectKind::VirtualMachine, "vm-42");
        assert_eq!(vm.to_string(), "VirtualMachine:vm-42");
        assert!(vm.is_vm());
        assert!(!vm.is_host());
    }
}
