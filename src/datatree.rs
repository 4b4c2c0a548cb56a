//! Inventory store shared by every component of a running session.
//!
//! One `DataTree` is built at startup and handed around as `Arc<DataTree>`.
//! Only the connection manager writes to it; the inventory is replaced as a
//! whole so readers never observe a half-populated pass.

use crate::inventory::{InventoryKind, InventorySnapshot};
use crate::remote::{ContentRoot, Endpoint, MoRef, SessionKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Authenticated connection to the management endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub key: SessionKey,
    pub endpoint: Endpoint,
    pub user: String,
    pub established_at: DateTime<Utc>,
}

#[derive(Debug)]
struct TreeState {
    status: SessionState,
    session: Option<Session>,
    content: Option<ContentRoot>,
    inventory: Arc<InventorySnapshot>,
    synchronized_at: Option<DateTime<Utc>>,
}

impl TreeState {
    fn cleared() -> Self {
        Self {
            status: SessionState::Disconnected,
            session: None,
            content: None,
            inventory: Arc::new(InventorySnapshot::empty()),
            synchronized_at: None,
        }
    }
}

#[derive(Debug)]
pub struct DataTree {
    state: RwLock<TreeState>,
}

impl Default for DataTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DataTree {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(TreeState::cleared()),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self) -> RwLockReadGuard<'_, TreeState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TreeState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> SessionState {
        self.read().status
    }

    pub fn is_connected(&self) -> bool {
        self.status() == SessionState::Connected
    }

    pub fn session(&self) -> Option<Session> {
        self.read().session.clone()
    }

    pub fn content(&self) -> Option<ContentRoot> {
        self.read().content.clone()
    }

    /// The snapshot installed by the last completed pass
    pub fn inventory(&self) -> Arc<InventorySnapshot> {
        Arc::clone(&self.read().inventory)
    }

    pub fn synchronized_at(&self) -> Option<DateTime<Utc>> {
        self.read().synchronized_at
    }

    /// Display names of one kind, sorted case-insensitively
    pub fn names(&self, kind: InventoryKind) -> Vec<String> {
        self.inventory().index(kind).sorted_names()
    }

    pub fn lookup(&self, kind: InventoryKind, name: &str) -> Option<MoRef> {
        self.inventory().index(kind).get(name).cloned()
    }

    /// Display name of a selection, as of the last completed pass
    pub fn name_of(&self, obj: &MoRef) -> Option<String> {
        let inventory = self.inventory();
        InventoryKind::ALL
            .iter()
            .filter(|kind| kind.accepts(obj))
            .find_map(|kind| inventory.index(*kind).name_of(obj).map(str::to_string))
    }

    pub(crate) fn mark_connecting(&self) {
        let mut state = self.write();
        *state = TreeState::cleared();
        state.status = SessionState::Connecting;
    }

    /// Record a fresh session. The inventory starts out empty until the
    /// first pass is installed.
    pub(crate) fn attach(&self, session: Session, content: ContentRoot) {
        let mut state = self.write();
        state.status = SessionState::Connected;
        state.session = Some(session);
        state.content = Some(content);
        state.inventory = Arc::new(InventorySnapshot::empty());
        state.synchronized_at = None;
    }

    /// Swap in a completed pass. Ignored when the session went away meanwhile.
    pub(crate) fn install(&self, snapshot: InventorySnapshot) -> bool {
        let mut state = self.write();
        if state.status != SessionState::Connected {
            return false;
        }
        state.inventory = Arc::new(snapshot);
        state.synchronized_at = Some(Utc::now());
        true
    }

    /// Drop everything; returns the session that was held so the caller can
    /// release it remotely.
    pub(crate) fn clear(&self) -> Option<Session> {
        let mut state = self.write();
        let previous = state.session.take();
        *state = TreeState::cleared();
        previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::InventoryIndex;
    use crate::remote::{AboutInfo, ObjectKind};

    fn session() -> Session {
        Session {
            key: SessionKey("session-1".to_string()),
            endpoint: Endpoint::new("vcenter.lab"),
            user: "admin".to_string(),
            established_at: Utc::now(),
        }
    }

    fn content() -> ContentRoot {
        ContentRoot {
            root_folder: MoRef::new(ObjectKind::Folder, "group-d1"),
            about: AboutInfo {
                full_name: "Test Endpoint".to_string(),
                api_version: "8.0".to_string(),
            },
        }
    }

    fn snapshot_with_vm(name: &str) -> InventorySnapshot {
        let mut snapshot = InventorySnapshot::empty();
        let index: InventoryIndex = vec![(name, MoRef::new(ObjectKind::VirtualMachine, "vm-1"))]
            .into_iter()
            .collect();
        snapshot.set_index(InventoryKind::Vm, index);
        snapshot
    }

    #[test]
    fn starts_disconnected_and_empty() {
        let tree = DataTree::new();
        assert_eq!(tree.status(), SessionState::Disconnected);
        assert!(tree.session().is_none());
        assert!(tree.content().is_none());
        assert!(tree.inventory().is_empty());
    }

    #[test]
    fn install_requires_a_session() {
        let tree = DataTree::new();
        assert!(!tree.install(snapshot_with_vm("web")));
        assert!(tree.names(InventoryKind::Vm).is_empty());

        tree.attach(session(), content());
        assert!(tree.install(snapshot_with_vm("web")));
        assert_eq!(tree.names(InventoryKind::Vm), vec!["web"]);
        assert!(tree.synchronized_at().is_some());
    }

    #[test]
    fn selections_are_labelled_by_name() {
        let tree = DataTree::new();
        tree.attach(session(), content());
        tree.install(snapshot_with_vm("web"));

        let web = tree.lookup(InventoryKind::Vm, "web").unwrap();
        assert_eq!(tree.name_of(&web).as_deref(), Some("web"));
        assert_eq!(tree.name_of(&MoRef::new(ObjectKind::VirtualMachine, "vm-404")), None);
    }

    #[test]
    fn readers_keep_their_snapshot_across_swaps() {
        let tree = DataTree::new();
        tree.attach(session(), content());
        tree.install(snapshot_with_vm("old"));

        let held = tree.inventory();
        tree.install(snapshot_with_vm("new"));

        assert!(held.index(InventoryKind::Vm).contains("old"));
        assert!(tree.lookup(InventoryKind::Vm, "new").is_some());
        assert!(tree.lookup(InventoryKind::Vm, "old").is_none());
    }

    #[test]
    fn clear_returns_session_once() {
        let tree = DataTree::new();
        tree.attach(session(), content());
        tree.install(snapshot_with_vm("web"));

        assert!(tree.clear().is_some());
        assert!(tree.clear().is_none());
        assert_eq!(tree.status(), SessionState::Disconnected);
        assert!(tree.inventory().is_empty());
        assert!(tree.content().is_none());
    }
}
