use crate::remote::{MoRef, ObjectKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Kinds of objects kept in the inventory store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InventoryKind {
    Vm,
    Host,
    Datastore,
    Network,
    DvSwitch,
    PortGroup,
}

impl InventoryKind {
    pub const ALL: [InventoryKind; 6] = [
        InventoryKind::Vm,
        InventoryKind::Host,
        InventoryKind::Datastore,
        InventoryKind::Network,
        InventoryKind::DvSwitch,
        InventoryKind::PortGroup,
    ];

    /// Object type the container view is created for.
    /// Port groups are read out of the network view.
    pub fn view_type(&self) -> ObjectKind {
        match self {
            InventoryKind::Vm => ObjectKind::VirtualMachine,
            InventoryKind::Host => ObjectKind::HostSystem,
            InventoryKind::Datastore => ObjectKind::Datastore,
            InventoryKind::Network | InventoryKind::PortGroup => ObjectKind::Network,
            InventoryKind::DvSwitch => ObjectKind::DistributedVirtualSwitch,
        }
    }

    /// Whether a reference from this kind's view belongs in this kind's index
    pub fn accepts(&self, obj: &MoRef) -> bool {
        match self {
            InventoryKind::PortGroup => obj.kind == ObjectKind::DistributedVirtualPortgroup,
            other => obj.kind.is_a(other.view_type()),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InventoryKind::Vm => "vm",
            InventoryKind::Host => "host",
            InventoryKind::Datastore => "datastore",
            InventoryKind::Network => "network",
            InventoryKind::DvSwitch => "dvswitch",
            InventoryKind::PortGroup => "portgroup",
        }
    }
}

impl fmt::Display for InventoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Display name -> object reference for a single kind.
///
/// Names are unique within the index; a later insert for the same name wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InventoryIndex {
    entries: HashMap<String, MoRef>,
}

impl InventoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the reference previously stored under `name`, if any.
    pub fn insert(&mut self, name: impl Into<String>, obj: MoRef) -> Option<MoRef> {
        self.entries.insert(name.into(), obj)
    }

    pub fn get(&self, name: &str) -> Option<&MoRef> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MoRef)> {
        self.entries.iter()
    }

    /// Names sorted case-insensitively, ties broken by the exact name
    pub fn sorted_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort_by(|a, b| {
            a.to_lowercase()
                .cmp(&b.to_lowercase())
                .then_with(|| a.cmp(b))
        });
        names
    }

    /// Reverse lookup, used to label selections
    pub fn name_of(&self, obj: &MoRef) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, candidate)| *candidate == obj)
            .map(|(name, _)| name.as_str())
    }
}

impl<S: Into<String>> FromIterator<(S, MoRef)> for InventoryIndex {
    fn from_iter<I: IntoIterator<Item = (S, MoRef)>>(iter: I) -> Self {
        let mut index = InventoryIndex::new();
        for (name, obj) in iter {
            index.insert(name, obj);
        }
        index
    }
}

/// One index per kind, all produced by the same synchronization pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventorySnapshot {
    indices: BTreeMap<InventoryKind, InventoryIndex>,
}

impl Default for InventorySnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

impl InventorySnapshot {
    pub fn empty() -> Self {
        Self {
            indices: InventoryKind::ALL
                .iter()
                .map(|kind| (*kind, InventoryIndex::new()))
                .collect(),
        }
    }

    pub fn index(&self, kind: InventoryKind) -> &InventoryIndex {
        // every kind is seeded in `empty`
        &self.indices[&kind]
    }

    pub fn set_index(&mut self, kind: InventoryKind, index: InventoryIndex) {
        self.indices.insert(kind, index);
    }

    pub fn is_empty(&self) -> bool {
        self.indices.values().all(InventoryIndex::is_empty)
    }

    pub fn counts(&self) -> BTreeMap<InventoryKind, usize> {
        self.indices
            .iter()
            .map(|(kind, index)| (*kind, index.len()))
            .collect()
    }
}
