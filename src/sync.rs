//! Inventory synchronization
//!
//! For each inventory kind a container view is opened on the root folder,
//! the `name` property of every object in it is read through the property
//! collector (draining every continuation page) and the result is folded
//! into a name index. A failing kind is skipped with a warning; only a
//! failure to open a view on the root aborts the pass.

use crate::error::{SyncError, SyncPartialFailure};
use crate::inventory::{InventoryIndex, InventoryKind, InventorySnapshot};
use crate::remote::{
    ContentRoot, ManagementApi, ObjectContent, ObjectSpec, PropertyFilterSpec, PropertySpec,
    RemoteErrorKind, RemoteResult, RetrieveOptions,
};
use crate::{log_debug, log_info, log_warn};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

const NAME_PROPERTY: &str = "name";

/// Receives advisory progress while a pass runs
pub trait ProgressSink: Send + Sync {
    fn report(&self, stage: &str, fraction: f32);
}

impl<F> ProgressSink for F
where
    F: Fn(&str, f32) + Send + Sync,
{
    fn report(&self, stage: &str, fraction: f32) {
        self(stage, fraction)
    }
}

/// Progress sink that drops every update
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _stage: &str, _fraction: f32) {}
}

/// Result of a completed pass
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub snapshot: InventorySnapshot,
    pub warnings: Vec<SyncPartialFailure>,
    pub elapsed: Duration,
}

/// Summary handed back to callers once a pass was installed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub counts: BTreeMap<InventoryKind, usize>,
    pub warnings: Vec<SyncPartialFailure>,
    pub elapsed: Duration,
}

impl From<&SyncOutcome> for SyncReport {
    fn from(outcome: &SyncOutcome) -> Self {
        Self {
            counts: outcome.snapshot.counts(),
            warnings: outcome.warnings.clone(),
            elapsed: outcome.elapsed,
        }
    }
}

/// Keeps progress monotonic across kinds
struct ProgressTracker<'a> {
    sink: &'a dyn ProgressSink,
    last: f32,
}

impl<'a> ProgressTracker<'a> {
    fn new(sink: &'a dyn ProgressSink) -> Self {
        Self { sink, last: 0.0 }
    }

    fn report(&mut self, stage: &str, fraction: f32) {
        let fraction = fraction.clamp(0.0, 1.0).max(self.last);
        self.last = fraction;
        self.sink.report(stage, fraction);
    }
}

pub struct Synchronizer {
    api: Arc<dyn ManagementApi>,
    options: RetrieveOptions,
}

impl Synchronizer {
    pub fn new(api: Arc<dyn ManagementApi>) -> Self {
        Self {
            api,
            options: RetrieveOptions::default(),
        }
    }

    pub fn with_page_size(mut self, page_size: Option<u32>) -> Self {
        self.options.max_objects = page_size;
        self
    }

    pub async fn synchronize(
        &self,
        content: &ContentRoot,
        progress: &dyn ProgressSink,
    ) -> Result<SyncOutcome, SyncError> {
        let started = Instant::now();
        let mut tracker = ProgressTracker::new(progress);
        let mut snapshot = InventorySnapshot::empty();
        let mut warnings = Vec::new();
        let total = InventoryKind::ALL.len() as f32;

        log_info!(
            "Synchronizing inventory from {} (API {})",
            content.about.full_name,
            content.about.api_version
        );
        tracker.report("Getting views", 0.0);

        for (position, kind) in InventoryKind::ALL.iter().enumerate() {
            let base = position as f32 / total;
            let stage = format!("Building {} index", kind);
            tracker.report(&stage, base);

            match self
                .synchronize_kind(content, *kind, &mut tracker, &stage, base, 1.0 / total)
                .await?
            {
                Ok(index) => {
                    log_debug!("Indexed {} {} object(s)", index.len(), kind);
                    snapshot.set_index(*kind, index);
                }
                Err(cause) => {
                    log_warn!("Skipping {} inventory: {}", kind, cause);
                    warnings.push(SyncPartialFailure { kind: *kind, cause });
                }
            }
            tracker.report(&stage, (position + 1) as f32 / total);
        }

        tracker.report("Done", 1.0);
        let elapsed = started.elapsed();
        log_info!(
            "Inventory synchronized in {:?} ({} warning(s))",
            elapsed,
            warnings.len()
        );

        Ok(SyncOutcome {
            snapshot,
            warnings,
            elapsed,
        })
    }

    /// Outer error aborts the whole pass, inner error skips only this kind.
    async fn synchronize_kind(
        &self,
        content: &ContentRoot,
        kind: InventoryKind,
        tracker: &mut ProgressTracker<'_>,
        stage: &str,
        base: f32,
        span: f32,
    ) -> Result<RemoteResult<InventoryIndex>, SyncError> {
        let view = match self
            .api
            .create_container_view(&content.root_folder, kind.view_type(), true)
            .await
        {
            Ok(view) => view,
            Err(err) if err.kind == RemoteErrorKind::ManagedObjectNotFound => return Ok(Err(err)),
            Err(err) => return Err(SyncError::Fatal(err)),
        };

        let objects: Vec<ObjectSpec> = view
            .objects
            .iter()
            .filter(|obj| kind.accepts(obj))
            .map(|obj| ObjectSpec {
                obj: obj.clone(),
                skip: false,
            })
            .collect();

        let result = if objects.is_empty() {
            Ok(InventoryIndex::new())
        } else {
            let filter = PropertyFilterSpec {
                object_set: objects,
                prop_set: vec![PropertySpec {
                    object_type: kind.view_type(),
                    all: false,
                    path_set: vec![NAME_PROPERTY.to_string()],
                }],
            };
            match self.retrieve_all(&filter).await {
                Ok(found) => Ok(build_index(kind, found, |done, count| {
                    tracker.report(stage, base + span * (done as f32 / count as f32));
                })),
                Err(err) => Err(err),
            }
        };

        if let Err(err) = self.api.destroy_view(&view.view).await {
            log_debug!("Failed to destroy {} view: {}", kind, err);
        }

        Ok(result)
    }

    /// Runs the property collection and follows continuation tokens until
    /// the server reports no more pages.
    async fn retrieve_all(&self, filter: &PropertyFilterSpec) -> RemoteResult<Vec<ObjectContent>> {
        let mut result = self.api.retrieve_properties(filter, &self.options).await?;
        let mut objects = std::mem::take(&mut result.objects);
        let mut pages = 1usize;

        while let Some(token) = result.token.take() {
            result = self.api.continue_retrieve_properties(&token).await?;
            objects.append(&mut result.objects);
            pages += 1;
        }

        log_debug!(
            "Property collection returned {} object(s) in {} page(s)",
            objects.len(),
            pages
        );
        Ok(objects)
    }
}

fn build_index(
    kind: InventoryKind,
    objects: Vec<ObjectContent>,
    mut on_progress: impl FnMut(usize, usize),
) -> InventoryIndex {
    let mut index = InventoryIndex::new();
    let count = objects.len();

    for (done, content) in objects.into_iter().enumerate() {
        match content.property(NAME_PROPERTY).and_then(|value| value.as_str()) {
            Some(name) => {
                if let Some(previous) = index.insert(name, content.obj.clone()) {
                    log_debug!(
                        "Duplicate {} name '{}': {} replaces {}",
                        kind,
                        name,
                        content.obj,
                        previous
                    );
                }
            }
            None => log_warn!("{} {} returned without a name", kind, content.obj),
        }
        on_progress(done + 1, count);
    }

    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{DynamicProperty, MoRef, ObjectKind};
    use serde_json::json;

    fn named(kind: ObjectKind, id: &str, name: &str) -> ObjectContent {
        ObjectContent {
            obj: MoRef::new(kind, id),
            prop_set: vec![DynamicProperty {
                name: NAME_PROPERTY.to_string(),
                val: json!(name),
            }],
        }
    }

    #[test]
    fn build_index_keeps_last_duplicate() {
        let objects = vec![
            named(ObjectKind::VirtualMachine, "vm-1", "web"),
            named(ObjectKind::VirtualMachine, "vm-2", "db"),
            named(ObjectKind::VirtualMachine, "vm-3", "web"),
        ];

        let index = build_index(InventoryKind::Vm, objects, |_, _| {});
        assert_eq!(index.len(), 2);
        assert_eq!(index.get("web").map(|obj| obj.value.as_str()), Some("vm-3"));
    }

    #[test]
    fn build_index_skips_nameless_objects() {
        let nameless = ObjectContent {
            obj: MoRef::new(ObjectKind::HostSystem, "host-9"),
            prop_set: Vec::new(),
        };
        let objects = vec![nameless, named(ObjectKind::HostSystem, "host-1", "esx01")];

        let mut calls = Vec::new();
        let index = build_index(InventoryKind::Host, objects, |done, count| {
            calls.push((done, count))
        });
        assert_eq!(index.len(), 1);
        assert_eq!(calls, vec![(1, 2), (2, 2)]);
    }

    #[test]
    fn progress_never_moves_backwards() {
        let seen = std::sync::Mutex::new(Vec::new());
        let sink = |_: &str, fraction: f32| seen.lock().unwrap().push(fraction);
        let mut tracker = ProgressTracker::new(&sink);

        tracker.report("a", 0.5);
        tracker.report("b", 0.25);
        tracker.report("c", 1.5);

        assert_eq!(*seen.lock().unwrap(), vec![0.5, 0.5, 1.0]);
    }
}
