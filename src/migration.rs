use crate::datatree::DataTree;
use crate::error::Rejected;
use crate::dispatch::Operation;
use crate::inventory::InventoryKind;
use crate::remote::{DatastoreCapacity, ManagementApi, MoRef};
use crate::{log_debug, log_info};
use std::collections::BTreeMap;

/// Host and datastore picked for one relocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationTarget {
    pub host_name: String,
    pub host: MoRef,
    pub datastore_name: String,
    pub datastore: MoRef,
}

/// Two-phase target selection for a single migration workflow.
///
/// A host is chosen first, which loads the datastores attached to it; the
/// datastore must then come from that host's set. Choosing a different host
/// discards an earlier datastore choice.
#[derive(Debug, Clone)]
pub struct MigrationSelection {
    vm: Option<MoRef>,
    host: Option<(String, MoRef)>,
    host_datastores: BTreeMap<String, DatastoreCapacity>,
    datastore: Option<String>,
}

impl MigrationSelection {
    pub fn new(vm: Option<MoRef>) -> Self {
        Self {
            vm,
            host: None,
            host_datastores: BTreeMap::new(),
            datastore: None,
        }
    }

    pub fn vm(&self) -> Option<&MoRef> {
        self.vm.as_ref()
    }

    /// Pick the destination host from the host index and load its datastores.
    pub async fn choose_host(
        &mut self,
        api: &dyn ManagementApi,
        tree: &DataTree,
        host_name: &str,
    ) -> Result<Vec<String>, Rejected> {
        let host = tree
            .lookup(InventoryKind::Host, host_name)
            .ok_or(Rejected::NoTargetSelected)?;

        let datastores = api
            .host_datastores(&host)
            .await
            .map_err(|e| Rejected::remote(Operation::Migrate, e))?;
        log_debug!(
            "Host '{}' exposes {} datastore(s)",
            host_name,
            datastores.len()
        );

        self.host = Some((host_name.to_string(), host));
        self.host_datastores = datastores
            .into_iter()
            .map(|ds| (ds.name.clone(), ds))
            .collect();
        self.datastore = None;

        Ok(self.datastores())
    }

    /// Datastore names of the chosen host, sorted case-insensitively
    pub fn datastores(&self) -> Vec<String> {
        let mut names: Vec<String> = self.host_datastores.keys().cloned().collect();
        names.sort_by_key(|name| name.to_lowercase());
        names
    }

    pub fn choose_datastore(&mut self, datastore_name: &str) -> Result<(), Rejected> {
        let Some((host_name, _)) = &self.host else {
            return Err(Rejected::NoTargetSelected);
        };

        if !self.host_datastores.contains_key(datastore_name) {
            return Err(Rejected::InvalidMigrationTarget {
                datastore: datastore_name.to_string(),
                host: host_name.clone(),
            });
        }

        log_info!(
            "Migration target set to {} / {}",
            host_name,
            datastore_name
        );
        self.datastore = Some(datastore_name.to_string());
        Ok(())
    }

    /// The complete target once both phases are done
    pub fn target(&self) -> Result<MigrationTarget, Rejected> {
        let (host_name, host) = self.host.as_ref().ok_or(Rejected::NoTargetSelected)?;
        let datastore_name = self.datastore.as_ref().ok_or(Rejected::NoTargetSelected)?;
        let datastore = self
            .host_datastores
            .get(datastore_name)
            .ok_or_else(|| Rejected::InvalidMigrationTarget {
                datastore: datastore_name.clone(),
                host: host_name.clone(),
            })?;

        Ok(MigrationTarget {
            host_name: host_name.clone(),
            host: host.clone(),
            datastore_name: datastore_name.clone(),
            datastore: datastore.datastore.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datastore_before_host_is_rejected() {
        let mut selection = MigrationSelection::new(None);
        assert_eq!(
            selection.choose_datastore("ds1"),
            Err(Rejected::NoTargetSelected)
        );
        assert_eq!(selection.target(), Err(Rejected::NoTargetSelected));
    }
}
