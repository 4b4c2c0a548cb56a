//! In-process management endpoint
//!
//! Implements [`ManagementApi`] over an in-memory object graph so the core
//! can run without a live endpoint:
//! - paginated property collection with continuation tokens
//! - stale views and failing retrievals per object type
//! - mutation requests that create remote tasks and apply their effect
//! - guest file upload and program start
//!
//! Every API call is counted, which lets tests assert exactly how many
//! remote calls an operation made.

use crate::remote::{
    AboutInfo, CloneMode, ContainerView, ContentRoot, Credentials, DatastoreCapacity,
    DynamicProperty, Endpoint, GuestCredentials, GuestProgramSpec, HostRuntime, ManagementApi,
    MoRef, ObjectContent, ObjectKind, PowerState, PropertyFilterSpec, RemoteError,
    RemoteErrorKind, RemoteRequest, RemoteResult, RetrieveOptions, RetrieveResult, SessionKey,
    TaskFilterSpec, TaskInfo, TaskRecursion, TaskState, VmRuntime,
};
use crate::{Result, log_debug};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const DEFAULT_PAGE_SIZE: usize = 100;
const DEFAULT_GUEST_PID: i64 = 4242;
const GIB: u64 = 1024 * 1024 * 1024;

/// Inventory description loaded from TOML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulatorFixture {
    #[serde(default)]
    pub page_size: Option<usize>,
    #[serde(default)]
    pub users: Vec<UserFixture>,
    #[serde(default)]
    pub hosts: Vec<HostFixture>,
    #[serde(default)]
    pub datastores: Vec<DatastoreFixture>,
    #[serde(default)]
    pub vms: Vec<VmFixture>,
    #[serde(default)]
    pub networks: Vec<String>,
    #[serde(default)]
    pub portgroups: Vec<String>,
    #[serde(default)]
    pub dvswitches: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserFixture {
    pub name: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostFixture {
    pub name: String,
    #[serde(default)]
    pub datastores: Vec<String>,
    #[serde(default = "default_cpu_mhz")]
    pub cpu_mhz: u32,
    #[serde(default = "default_cores")]
    pub cores: u32,
    #[serde(default = "default_host_memory_gb")]
    pub memory_gb: u64,
    #[serde(default)]
    pub maintenance: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatastoreFixture {
    pub name: String,
    #[serde(default = "default_capacity_gb")]
    pub capacity_gb: u64,
    #[serde(default = "default_free_gb")]
    pub free_gb: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmFixture {
    pub name: String,
    pub host: Option<String>,
    #[serde(default = "default_vm_cpus")]
    pub cpus: u32,
    #[serde(default = "default_vm_memory_mb")]
    pub memory_mb: u64,
    #[serde(default)]
    pub powered_on: bool,
}

fn default_cpu_mhz() -> u32 {
    2400
}

fn default_cores() -> u32 {
    16
}

fn default_host_memory_gb() -> u64 {
    256
}

fn default_capacity_gb() -> u64 {
    1024
}

fn default_free_gb() -> u64 {
    512
}

fn default_vm_cpus() -> u32 {
    2
}

fn default_vm_memory_mb() -> u64 {
    4096
}

/// How many times each API entry point was called
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub login: usize,
    pub logout: usize,
    pub create_view: usize,
    pub retrieve: usize,
    pub continue_retrieve: usize,
    pub submit: usize,
    pub collect_tasks: usize,
    pub guest_upload: usize,
    pub guest_start: usize,
}

impl CallCounts {
    /// Calls that change remote state
    pub fn mutations(&self) -> usize {
        self.submit + self.guest_upload + self.guest_start
    }

    /// Property-collection round trips, first page included
    pub fn retrievals(&self) -> usize {
        self.retrieve + self.continue_retrieve
    }
}

#[derive(Default)]
struct Counters {
    login: AtomicUsize,
    logout: AtomicUsize,
    create_view: AtomicUsize,
    retrieve: AtomicUsize,
    continue_retrieve: AtomicUsize,
    submit: AtomicUsize,
    collect_tasks: AtomicUsize,
    guest_upload: AtomicUsize,
    guest_start: AtomicUsize,
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::SeqCst);
}

#[derive(Debug, Clone)]
struct SimObject {
    name: String,
    host: Option<MoRef>,
}

#[derive(Debug, Default)]
struct SimState {
    accounts: HashMap<String, String>,
    reachable: bool,
    sessions: HashSet<String>,
    objects: BTreeMap<MoRef, SimObject>,
    host_datastores: HashMap<MoRef, Vec<MoRef>>,
    datastore_capacity: HashMap<MoRef, (u64, u64)>,
    vm_runtime: HashMap<MoRef, VmRuntime>,
    host_runtime: HashMap<MoRef, HostRuntime>,
    stale_views: HashSet<ObjectKind>,
    stale_retrievals: HashSet<ObjectKind>,
    failing_continuations: HashSet<ObjectKind>,
    root_unavailable: bool,
    deny_requests: bool,
    taskless: bool,
    guest_result: i64,
    guest_files: HashMap<(MoRef, String), Vec<u8>>,
    views: HashMap<String, Vec<MoRef>>,
    pages: HashMap<String, (ObjectKind, VecDeque<Vec<ObjectContent>>)>,
    tasks: Vec<TaskInfo>,
    next_id: u64,
}

impl SimState {
    fn new() -> Self {
        Self {
            reachable: true,
            guest_result: DEFAULT_GUEST_PID,
            ..Default::default()
        }
    }

    fn next_ref(&mut self, kind: ObjectKind, prefix: &str) -> MoRef {
        self.next_id += 1;
        MoRef::new(kind, format!("{}-{}", prefix, self.next_id))
    }

    fn find(&self, kind: ObjectKind, name: &str) -> Option<MoRef> {
        self.objects
            .iter()
            .find(|(obj, sim)| obj.kind == kind && sim.name == name)
            .map(|(obj, _)| obj.clone())
    }

    fn add_object(&mut self, kind: ObjectKind, prefix: &str, name: &str) -> MoRef {
        let obj = self.next_ref(kind, prefix);
        self.objects.insert(
            obj.clone(),
            SimObject {
                name: name.to_string(),
                host: None,
            },
        );
        obj
    }

    fn ensure_datastore(&mut self, name: &str) -> MoRef {
        if let Some(existing) = self.find(ObjectKind::Datastore, name) {
            return existing;
        }
        let ds = self.add_object(ObjectKind::Datastore, "datastore", name);
        self.datastore_capacity.insert(
            ds.clone(),
            (default_capacity_gb() * GIB, default_free_gb() * GIB),
        );
        ds
    }

    fn add_host(&mut self, fixture: &HostFixture) -> MoRef {
        let host = self.add_object(ObjectKind::HostSystem, "host", &fixture.name);
        let datastores = fixture
            .datastores
            .iter()
            .map(|name| self.ensure_datastore(name))
            .collect();
        self.host_datastores.insert(host.clone(), datastores);
        self.host_runtime.insert(
            host.clone(),
            HostRuntime {
                cpu_mhz: fixture.cpu_mhz,
                num_cpu_cores: fixture.cores,
                overall_cpu_usage_mhz: fixture.cpu_mhz * fixture.cores / 4,
                memory_size_bytes: fixture.memory_gb * GIB,
                overall_memory_usage_mb: fixture.memory_gb * 1024 / 2,
                power_state: PowerState::PoweredOn,
                in_maintenance_mode: fixture.maintenance,
            },
        );
        host
    }

    fn add_vm(&mut self, fixture: &VmFixture) -> MoRef {
        let host = fixture
            .host
            .as_deref()
            .and_then(|name| self.find(ObjectKind::HostSystem, name));
        let host_name = host
            .as_ref()
            .and_then(|h| self.objects.get(h))
            .map(|h| h.name.clone());
        let max_cpu = host
            .as_ref()
            .and_then(|h| self.host_runtime.get(h))
            .map(|rt| rt.cpu_mhz)
            .unwrap_or(default_cpu_mhz());

        let vm = self.add_object(ObjectKind::VirtualMachine, "vm", &fixture.name);
        if let Some(sim) = self.objects.get_mut(&vm) {
            sim.host = host;
        }
        self.vm_runtime.insert(
            vm.clone(),
            VmRuntime {
                num_cpu: fixture.cpus,
                overall_cpu_usage_mhz: if fixture.powered_on { max_cpu / 2 } else { 0 },
                max_cpu_usage_mhz: max_cpu * fixture.cpus,
                guest_memory_usage_mb: if fixture.powered_on { fixture.memory_mb / 4 } else { 0 },
                memory_size_mb: fixture.memory_mb,
                swapped_memory_mb: 0,
                committed_storage_bytes: 40 * GIB,
                uncommitted_storage_bytes: 0,
                power_state: if fixture.powered_on {
                    PowerState::PoweredOn
                } else {
                    PowerState::PoweredOff
                },
                instant_clone_frozen: false,
                disk_count: 1,
                snapshot_count: 0,
                files_per_disk: vec![1],
                host_name,
            },
        );
        vm
    }

    fn clone_vm(&mut self, source: &MoRef, mode: CloneMode, name: Option<&str>) -> MoRef {
        let source_obj = self.objects.get(source).cloned();
        let suffix = match mode {
            CloneMode::Full => "clone",
            CloneMode::Linked => "linked",
            CloneMode::Instant => "instant",
        };
        let name = match (name, &source_obj) {
            (Some(name), _) => name.to_string(),
            (None, Some(obj)) => format!("{}-{}", obj.name, suffix),
            (None, None) => suffix.to_string(),
        };

        let vm = self.add_object(ObjectKind::VirtualMachine, "vm", &name);
        if let Some(sim) = self.objects.get_mut(&vm) {
            sim.host = source_obj.and_then(|obj| obj.host);
        }
        if let Some(mut runtime) = self.vm_runtime.get(source).cloned() {
            runtime.snapshot_count = 0;
            runtime.instant_clone_frozen = false;
            runtime.power_state = match mode {
                CloneMode::Instant => PowerState::PoweredOn,
                CloneMode::Full | CloneMode::Linked => PowerState::PoweredOff,
            };
            self.vm_runtime.insert(vm.clone(), runtime);
        }
        vm
    }

    fn set_power(&mut self, vm: &MoRef, state: PowerState) {
        if let Some(runtime) = self.vm_runtime.get_mut(vm) {
            runtime.power_state = state;
        }
    }

    fn apply(&mut self, target: &MoRef, request: &RemoteRequest) -> RemoteResult<()> {
        match request {
            RemoteRequest::PowerOn => self.set_power(target, PowerState::PoweredOn),
            RemoteRequest::PowerOff | RemoteRequest::ShutdownGuest => {
                self.set_power(target, PowerState::PoweredOff)
            }
            RemoteRequest::Rename { new_name } => {
                if let Some(obj) = self.objects.get_mut(target) {
                    obj.name = new_name.clone();
                }
            }
            RemoteRequest::Clone { mode, name } => {
                self.clone_vm(target, *mode, name.as_deref());
            }
            RemoteRequest::Relocate { host, datastore } => {
                let attached = self
                    .host_datastores
                    .get(host)
                    .is_some_and(|list| list.contains(datastore));
                if !attached {
                    return Err(RemoteError::new(
                        RemoteErrorKind::InvalidState,
                        format!("{} is not attached to {}", datastore, host),
                    ));
                }
                let host_name = self.objects.get(host).map(|h| h.name.clone());
                if let Some(obj) = self.objects.get_mut(target) {
                    obj.host = Some(host.clone());
                }
                if let Some(runtime) = self.vm_runtime.get_mut(target) {
                    runtime.host_name = host_name;
                }
            }
            RemoteRequest::CreateSnapshot { .. } => {
                if let Some(runtime) = self.vm_runtime.get_mut(target) {
                    runtime.snapshot_count += 1;
                }
            }
            RemoteRequest::Destroy => {
                self.objects.remove(target);
                self.vm_runtime.remove(target);
            }
            RemoteRequest::Reset
            | RemoteRequest::RebootGuest
            | RemoteRequest::PromoteDisks { .. }
            | RemoteRequest::SetScreenResolution { .. }
            | RemoteRequest::EnterSetupOnNextBoot => {}
        }
        Ok(())
    }

    fn content_of(&self, obj: &MoRef, paths: &[String]) -> RemoteResult<ObjectContent> {
        let sim = self.objects.get(obj).ok_or_else(|| RemoteError::not_found(obj))?;
        let prop_set = paths
            .iter()
            .filter(|path| path.as_str() == "name")
            .map(|path| DynamicProperty {
                name: path.clone(),
                val: serde_json::Value::String(sim.name.clone()),
            })
            .collect();
        Ok(ObjectContent {
            obj: obj.clone(),
            prop_set,
        })
    }

    fn running_vm(&self, vm: &MoRef) -> RemoteResult<()> {
        match self.vm_runtime.get(vm) {
            None => Err(RemoteError::not_found(vm)),
            Some(rt) if rt.power_state != PowerState::PoweredOn => Err(RemoteError::new(
                RemoteErrorKind::InvalidState,
                format!("guest operations need {} to be powered on", vm),
            )),
            Some(_) => Ok(()),
        }
    }
}

pub struct SimulatedEndpoint {
    state: Mutex<SimState>,
    counters: Counters,
    login_delay: Option<Duration>,
    page_size: usize,
}

pub struct SimulatedEndpointBuilder {
    state: SimState,
    login_delay: Option<Duration>,
    page_size: usize,
}

impl SimulatedEndpointBuilder {
    pub fn user(mut self, name: &str, password: &str) -> Self {
        self.state
            .accounts
            .insert(name.to_string(), password.to_string());
        self
    }

    pub fn host(mut self, name: &str, datastores: &[&str]) -> Self {
        self.state.add_host(&HostFixture {
            name: name.to_string(),
            datastores: datastores.iter().map(|ds| ds.to_string()).collect(),
            cpu_mhz: default_cpu_mhz(),
            cores: default_cores(),
            memory_gb: default_host_memory_gb(),
            maintenance: false,
        });
        self
    }

    pub fn datastore(mut self, name: &str, capacity_gb: u64, free_gb: u64) -> Self {
        let ds = self.state.ensure_datastore(name);
        self.state
            .datastore_capacity
            .insert(ds, (capacity_gb * GIB, free_gb * GIB));
        self
    }

    /// VM placed on `host`, which must have been added before
    pub fn vm(mut self, name: &str, host: &str) -> Self {
        self.state.add_vm(&VmFixture {
            name: name.to_string(),
            host: Some(host.to_string()),
            cpus: default_vm_cpus(),
            memory_mb: default_vm_memory_mb(),
            powered_on: false,
        });
        self
    }

    pub fn network(mut self, name: &str) -> Self {
        self.state.add_object(ObjectKind::Network, "network", name);
        self
    }

    pub fn portgroup(mut self, name: &str) -> Self {
        self.state
            .add_object(ObjectKind::DistributedVirtualPortgroup, "dvportgroup", name);
        self
    }

    pub fn dvswitch(mut self, name: &str) -> Self {
        self.state
            .add_object(ObjectKind::DistributedVirtualSwitch, "dvs", name);
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn login_delay(mut self, delay: Duration) -> Self {
        self.login_delay = Some(delay);
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.state.reachable = false;
        self
    }

    /// Views of this type report themselves as not found
    pub fn stale_view(mut self, kind: ObjectKind) -> Self {
        self.state.stale_views.insert(kind);
        self
    }

    /// Property collection over objects of this type reports not found
    pub fn stale_retrieval(mut self, kind: ObjectKind) -> Self {
        self.state.stale_retrievals.insert(kind);
        self
    }

    /// Continuation pages for this type fail after the first page
    pub fn failing_continuation(mut self, kind: ObjectKind) -> Self {
        self.state.failing_continuations.insert(kind);
        self
    }

    /// Container views on the root folder fail outright
    pub fn root_unavailable(mut self) -> Self {
        self.state.root_unavailable = true;
        self
    }

    pub fn deny_requests(mut self) -> Self {
        self.state.deny_requests = true;
        self
    }

    /// Mutations succeed without handing back a task
    pub fn taskless(mut self) -> Self {
        self.state.taskless = true;
        self
    }

    pub fn guest_program_result(mut self, result: i64) -> Self {
        self.state.guest_result = result;
        self
    }

    pub fn build(self) -> SimulatedEndpoint {
        SimulatedEndpoint {
            state: Mutex::new(self.state),
            counters: Counters::default(),
            login_delay: self.login_delay,
            page_size: self.page_size,
        }
    }
}

impl SimulatedEndpoint {
    pub fn builder() -> SimulatedEndpointBuilder {
        SimulatedEndpointBuilder {
            state: SimState::new(),
            login_delay: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn from_fixture(fixture: &SimulatorFixture) -> Self {
        let mut builder = Self::builder();
        if let Some(page_size) = fixture.page_size {
            builder = builder.page_size(page_size);
        }
        for user in &fixture.users {
            builder = builder.user(&user.name, &user.password);
        }
        for ds in &fixture.datastores {
            builder = builder.datastore(&ds.name, ds.capacity_gb, ds.free_gb);
        }
        for host in &fixture.hosts {
            builder.state.add_host(host);
        }
        for vm in &fixture.vms {
            builder.state.add_vm(vm);
        }
        for name in &fixture.networks {
            builder = builder.network(name);
        }
        for name in &fixture.portgroups {
            builder = builder.portgroup(name);
        }
        for name in &fixture.dvswitches {
            builder = builder.dvswitch(name);
        }
        builder.build()
    }

    pub fn from_fixture_str(contents: &str) -> Result<Self> {
        let fixture: SimulatorFixture = toml::from_str(contents)?;
        Ok(Self::from_fixture(&fixture))
    }

    pub fn from_fixture_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_fixture_str(&contents)
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn calls(&self) -> CallCounts {
        let c = &self.counters;
        CallCounts {
            login: c.login.load(Ordering::SeqCst),
            logout: c.logout.load(Ordering::SeqCst),
            create_view: c.create_view.load(Ordering::SeqCst),
            retrieve: c.retrieve.load(Ordering::SeqCst),
            continue_retrieve: c.continue_retrieve.load(Ordering::SeqCst),
            submit: c.submit.load(Ordering::SeqCst),
            collect_tasks: c.collect_tasks.load(Ordering::SeqCst),
            guest_upload: c.guest_upload.load(Ordering::SeqCst),
            guest_start: c.guest_start.load(Ordering::SeqCst),
        }
    }

    pub fn object_ref(&self, kind: ObjectKind, name: &str) -> Option<MoRef> {
        self.lock().find(kind, name)
    }

    pub fn name_of(&self, obj: &MoRef) -> Option<String> {
        self.lock().objects.get(obj).map(|sim| sim.name.clone())
    }

    pub fn power_state(&self, vm: &MoRef) -> Option<PowerState> {
        self.lock().vm_runtime.get(vm).map(|rt| rt.power_state)
    }

    pub fn tasks(&self) -> Vec<TaskInfo> {
        self.lock().tasks.clone()
    }

    pub fn open_sessions(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn guest_file(&self, vm: &MoRef, path: &str) -> Option<Vec<u8>> {
        self.lock()
            .guest_files
            .get(&(vm.clone(), path.to_string()))
            .cloned()
    }

    /// Rename an object behind the core's back, as another client would
    pub fn rename_object(&self, obj: &MoRef, name: &str) {
        if let Some(sim) = self.lock().objects.get_mut(obj) {
            sim.name = name.to_string();
        }
    }

    pub fn set_task_progress(&self, task: &MoRef, progress: u8) {
        let mut state = self.lock();
        if let Some(info) = state.tasks.iter_mut().find(|info| &info.task == task) {
            info.progress = Some(progress.min(100));
        }
    }

    /// Mark every running task as successfully finished
    pub fn complete_tasks(&self) {
        let now = Utc::now();
        let mut state = self.lock();
        for info in state
            .tasks
            .iter_mut()
            .filter(|info| matches!(info.state, TaskState::Queued | TaskState::Running))
        {
            info.state = TaskState::Success;
            info.complete_time = Some(now.max(info.start_time));
            info.progress = Some(100);
        }
    }

    fn check_session(state: &SimState, session: &SessionKey) -> RemoteResult<()> {
        if state.sessions.contains(&session.0) {
            Ok(())
        } else {
            Err(RemoteError::new(
                RemoteErrorKind::InvalidState,
                "session is not authenticated",
            ))
        }
    }
}

#[async_trait]
impl ManagementApi for SimulatedEndpoint {
    async fn login(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> RemoteResult<SessionKey> {
        bump(&self.counters.login);
        if let Some(delay) = self.login_delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        if !state.reachable {
            return Err(RemoteError::new(
                RemoteErrorKind::Unreachable,
                format!("cannot reach {}", endpoint),
            ));
        }
        match state.accounts.get(&credentials.user) {
            Some(password) if *password == credentials.password => {}
            _ => {
                return Err(RemoteError::new(
                    RemoteErrorKind::InvalidLogin,
                    "incorrect user name or password",
                ));
            }
        }

        let key = uuid::Uuid::new_v4().to_string();
        state.sessions.insert(key.clone());
        log_debug!("Simulator session {} opened for {}", key, credentials.user);
        Ok(SessionKey(key))
    }

    async fn logout(&self, session: &SessionKey) -> RemoteResult<()> {
        bump(&self.counters.logout);
        let mut state = self.lock();
        Self::check_session(&state, session)?;
        state.sessions.remove(&session.0);
        Ok(())
    }

    async fn retrieve_content(&self, session: &SessionKey) -> RemoteResult<ContentRoot> {
        let state = self.lock();
        Self::check_session(&state, session)?;
        Ok(ContentRoot {
            root_folder: MoRef::new(ObjectKind::Folder, "group-d1"),
            about: AboutInfo {
                full_name: "Simulated Management Endpoint".to_string(),
                api_version: "8.0.0".to_string(),
            },
        })
    }

    async fn create_container_view(
        &self,
        root: &MoRef,
        object_type: ObjectKind,
        _recursive: bool,
    ) -> RemoteResult<ContainerView> {
        bump(&self.counters.create_view);
        let mut state = self.lock();
        if state.root_unavailable {
            return Err(RemoteError::new(
                RemoteErrorKind::Transport,
                format!("view on {} failed", root),
            ));
        }
        if state.stale_views.contains(&object_type) {
            return Err(RemoteError::not_found(format!(
                "view of {}",
                object_type.as_str()
            )));
        }

        let objects: Vec<MoRef> = state
            .objects
            .keys()
            .filter(|obj| obj.kind.is_a(object_type))
            .cloned()
            .collect();
        let view = state.next_ref(ObjectKind::ContainerView, "session[view]");
        state.views.insert(view.value.clone(), objects.clone());
        Ok(ContainerView { view, objects })
    }

    async fn destroy_view(&self, view: &MoRef) -> RemoteResult<()> {
        self.lock()
            .views
            .remove(&view.value)
            .map(|_| ())
            .ok_or_else(|| RemoteError::not_found(view))
    }

    async fn retrieve_properties(
        &self,
        filter: &PropertyFilterSpec,
        options: &RetrieveOptions,
    ) -> RemoteResult<RetrieveResult> {
        bump(&self.counters.retrieve);
        let mut state = self.lock();

        let Some(prop) = filter.prop_set.first() else {
            return Ok(RetrieveResult::default());
        };
        if state.stale_retrievals.contains(&prop.object_type) {
            return Err(RemoteError::not_found(format!(
                "objects of {}",
                prop.object_type.as_str()
            )));
        }

        let mut objects = Vec::with_capacity(filter.object_set.len());
        for spec in filter.object_set.iter().filter(|spec| !spec.skip) {
            objects.push(state.content_of(&spec.obj, &prop.path_set)?);
        }

        let page_size = options
            .max_objects
            .map(|max| max.max(1) as usize)
            .unwrap_or(self.page_size);
        let mut pages: VecDeque<Vec<ObjectContent>> = objects
            .chunks(page_size)
            .map(|chunk| chunk.to_vec())
            .collect();
        let first = pages.pop_front().unwrap_or_default();

        let token = if pages.is_empty() {
            None
        } else {
            state.next_id += 1;
            let token = format!("token-{}", state.next_id);
            state
                .pages
                .insert(token.clone(), (prop.object_type, pages));
            Some(token)
        };

        Ok(RetrieveResult {
            objects: first,
            token,
        })
    }

    async fn continue_retrieve_properties(&self, token: &str) -> RemoteResult<RetrieveResult> {
        bump(&self.counters.continue_retrieve);
        let mut state = self.lock();

        let Some((kind, mut pages)) = state.pages.remove(token) else {
            return Err(RemoteError::new(
                RemoteErrorKind::InvalidState,
                format!("unknown continuation token {}", token),
            ));
        };
        if state.failing_continuations.contains(&kind) {
            return Err(RemoteError::not_found(format!(
                "continuation of {}",
                kind.as_str()
            )));
        }

        let objects = pages.pop_front().unwrap_or_default();
        let token = if pages.is_empty() {
            None
        } else {
            state.pages.insert(token.to_string(), (kind, pages));
            Some(token.to_string())
        };

        Ok(RetrieveResult { objects, token })
    }

    async fn submit(&self, target: &MoRef, request: &RemoteRequest) -> RemoteResult<Option<MoRef>> {
        bump(&self.counters.submit);
        let mut state = self.lock();

        if state.deny_requests {
            return Err(RemoteError::new(
                RemoteErrorKind::PermissionDenied,
                format!("permission to perform {} denied", request.description_id()),
            ));
        }
        if !state.objects.contains_key(target) {
            return Err(RemoteError::not_found(target));
        }

        state.apply(target, request)?;

        if state.taskless || matches!(request, RemoteRequest::SetScreenResolution { .. }) {
            return Ok(None);
        }

        let task = state.next_ref(ObjectKind::Task, "task");
        state.tasks.push(TaskInfo {
            task: task.clone(),
            entity: Some(target.clone()),
            description_id: request.description_id().to_string(),
            state: TaskState::Running,
            start_time: Utc::now(),
            complete_time: None,
            progress: Some(0),
            error: None,
        });
        Ok(Some(task))
    }

    async fn collect_tasks(&self, filter: &TaskFilterSpec) -> RemoteResult<Vec<TaskInfo>> {
        bump(&self.counters.collect_tasks);
        let state = self.lock();

        let in_scope = |entity: &MoRef| {
            if *entity == filter.entity {
                return true;
            }
            match filter.recursion {
                TaskRecursion::SelfOnly => false,
                TaskRecursion::Children | TaskRecursion::All => state
                    .objects
                    .get(entity)
                    .and_then(|obj| obj.host.as_ref())
                    .is_some_and(|host| *host == filter.entity),
            }
        };

        Ok(state
            .tasks
            .iter()
            .rev()
            .filter(|info| info.entity.as_ref().is_some_and(|entity| in_scope(entity)))
            .cloned()
            .collect())
    }

    async fn host_datastores(&self, host: &MoRef) -> RemoteResult<Vec<DatastoreCapacity>> {
        let state = self.lock();
        let attached = state
            .host_datastores
            .get(host)
            .ok_or_else(|| RemoteError::not_found(host))?;

        Ok(attached
            .iter()
            .filter_map(|ds| {
                let name = state.objects.get(ds)?.name.clone();
                let (capacity_bytes, free_bytes) =
                    state.datastore_capacity.get(ds).copied().unwrap_or((0, 0));
                Some(DatastoreCapacity {
                    datastore: ds.clone(),
                    name,
                    capacity_bytes,
                    free_bytes,
                })
            })
            .collect())
    }

    async fn vm_runtime(&self, vm: &MoRef) -> RemoteResult<VmRuntime> {
        self.lock()
            .vm_runtime
            .get(vm)
            .cloned()
            .ok_or_else(|| RemoteError::not_found(vm))
    }

    async fn host_runtime(&self, host: &MoRef) -> RemoteResult<HostRuntime> {
        self.lock()
            .host_runtime
            .get(host)
            .cloned()
            .ok_or_else(|| RemoteError::not_found(host))
    }

    async fn upload_guest_file(
        &self,
        vm: &MoRef,
        _auth: &GuestCredentials,
        guest_path: &str,
        content: &[u8],
    ) -> RemoteResult<()> {
        bump(&self.counters.guest_upload);
        let mut state = self.lock();
        state.running_vm(vm)?;
        state
            .guest_files
            .insert((vm.clone(), guest_path.to_string()), content.to_vec());
        Ok(())
    }

    async fn start_guest_program(
        &self,
        vm: &MoRef,
        _auth: &GuestCredentials,
        program: &GuestProgramSpec,
    ) -> RemoteResult<i64> {
        bump(&self.counters.guest_start);
        let mut state = self.lock();
        state.running_vm(vm)?;
        log_debug!(
            "Simulator starting '{} {}' in {}",
            program.program_path,
            program.arguments,
            vm
        );

        let result = state.guest_result;
        if result > 0 {
            if let Some(runtime) = state.vm_runtime.get_mut(vm) {
                runtime.instant_clone_frozen = true;
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixture_parses_from_toml() {
        let sim = SimulatedEndpoint::from_fixture_str(
            r#"
page_size = 2
networks = ["VM Network"]

[[users]]
name = "admin"
password = "secret"

[[datastores]]
name = "ds-shared"
capacity_gb = 2048
free_gb = 100

[[hosts]]
name = "esx01"
datastores = ["ds-local", "ds-shared"]

[[vms]]
name = "db01"
host = "esx01"
powered_on = true
"#,
        )
        .unwrap();
        assert!(sim.object_ref(ObjectKind::HostSystem, "esx01").is_some());
        assert!(sim.object_ref(ObjectKind::Datastore, "ds-local").is_some());

        let db01 = sim.object_ref(ObjectKind::VirtualMachine, "db01").unwrap();
        assert_eq!(sim.power_state(&db01), Some(PowerState::PoweredOn));
        assert!(sim.object_ref(ObjectKind::Network, "VM Network").is_some());
    }

    #[tokio::test]
    async fn continuation_tokens_walk_every_page() {
        let sim = SimulatedEndpoint::builder()
            .host("esx01", &[])
            .vm("a", "esx01")
            .vm("b", "esx01")
            .vm("c", "esx01")
            .page_size(2)
            .build();
        let root = MoRef::new(ObjectKind::Folder, "group-d1");
        let view = sim
            .create_container_view(&root, ObjectKind::VirtualMachine, true)
            .await
            .unwrap();
        let filter = PropertyFilterSpec {
            object_set: view
                .objects
                .iter()
                .map(|obj| crate::remote::ObjectSpec {
                    obj: obj.clone(),
                    skip: false,
                })
                .collect(),
            prop_set: vec![crate::remote::PropertySpec {
                object_type: ObjectKind::VirtualMachine,
                all: false,
                path_set: vec!["name".to_string()],
            }],
        };

        let first = sim
            .retrieve_properties(&filter, &RetrieveOptions::default())
            .await
            .unwrap();
        assert_eq!(first.objects.len(), 2);
        let token = first.token.unwrap();

        let second = sim.continue_retrieve_properties(&token).await.unwrap();
        assert_eq!(second.objects.len(), 1);
        assert!(second.token.is_none());
        assert!(sim.continue_retrieve_properties(&token).await.is_err());
    }

    #[tokio::test]
    async fn submit_records_tasks_against_the_target() {
        let sim = SimulatedEndpoint::builder()
            .host("esx01", &["ds1"])
            .vm("web", "esx01")
            .build();
        let web = sim.object_ref(ObjectKind::VirtualMachine, "web").unwrap();

        let task = sim
            .submit(&web, &RemoteRequest::PowerOn)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sim.power_state(&web), Some(PowerState::PoweredOn));

        let tasks = sim.tasks();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].task, task);
        assert_eq!(tasks[0].state, TaskState::Running);

        sim.complete_tasks();
        assert_eq!(sim.tasks()[0].state, TaskState::Success);
        assert_eq!(sim.tasks()[0].progress, Some(100));
    }
}
