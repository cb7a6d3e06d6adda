//! Per-entity scope and status state machine.

use fleet_meta::Trigger;

use super::{Breadcrumb, LineKind, ProgressRoot, ProviderProgress, TriggerOrigin};
use crate::lock::{LockKey, LockStore, Status, Versioned};
use crate::{Error, Result};

/// One entity's lifecycle within a batch.
///
/// [`enter`](Self::enter) moves the record to `started`; providers and the
/// data source push it further through `updating` and `installing`; and
/// [`exit`](Self::exit) settles it. On error the status stays where it was
/// so the entity reads as unfinished until the next successful update.
pub struct EntityProgress<'a> {
    root: &'a mut ProgressRoot,
    store: &'a mut LockStore,
    key: LockKey,
    origin: TriggerOrigin,
    log: Breadcrumb,
}

impl<'a> EntityProgress<'a> {
    pub fn enter(root: &'a mut ProgressRoot, store: &'a mut LockStore, key: LockKey, origin: TriggerOrigin) -> Self {
        let log = root.breadcrumb().child(origin.entity.clone());
        let record = store.always(&key);
        record.last_error = None;
        if matches!(record.status, Status::Finished | Status::Unknown) {
            record.status = Status::Started;
        }
        tracing::debug!(entity = %key, status = ?record.status, "entered lifecycle");
        Self {
            root,
            store,
            key,
            origin,
            log,
        }
    }

    pub fn key(&self) -> &LockKey {
        &self.key
    }

    pub fn log(&self) -> &Breadcrumb {
        &self.log
    }

    pub fn origin(&self) -> &TriggerOrigin {
        &self.origin
    }

    /// Replace the trigger origin, e.g. once the manifest is known. Later
    /// lines carry the new entity label.
    pub fn set_origin(&mut self, origin: TriggerOrigin) {
        if origin.entity != self.origin.entity {
            self.log = self.root.breadcrumb().child(origin.entity.clone());
        }
        self.origin = origin;
    }

    pub fn record(&mut self) -> &mut Versioned {
        self.store.always(&self.key)
    }

    pub fn status(&mut self) -> Status {
        self.record().status
    }

    pub fn mark_changed(&mut self) {
        let record = self.record();
        if record.status == Status::Started {
            record.status = Status::Updating;
        }
    }

    pub fn mark_installing(&mut self) {
        let record = self.record();
        if matches!(record.status, Status::Started | Status::Updating) {
            record.status = Status::Installing;
        }
    }

    /// Removal overrides whatever an earlier failed lifecycle left behind.
    pub fn mark_removing(&mut self) {
        self.record().status = Status::Removing;
    }

    pub fn notify(&mut self, trigger: Trigger) {
        let origin = self.origin.clone();
        self.root.notify(trigger, origin);
    }

    /// Open a provider scope, detaching the provider's provenance bucket.
    pub fn provider(&mut self, name: &str) -> ProviderProgress {
        let bucket = self.record().provided.take(name);
        ProviderProgress::new(name, bucket, self.log.child(name))
    }

    /// Close a provider scope opened with [`provider`](Self::provider).
    ///
    /// Must be called on success and on failure so the bucket goes back
    /// into the record.
    pub fn finish_provider(&mut self, progress: ProviderProgress, ok: bool) {
        let (name, bucket, outcome) = progress.into_parts();
        self.record().provided.restore(&name, bucket);
        if outcome.installing {
            self.mark_installing();
        }
        if ok && outcome.changed {
            self.mark_changed();
        }
        for trigger in outcome.triggers {
            self.notify(trigger);
        }
    }

    /// Settle the lifecycle and persist the store.
    ///
    /// The status is read before anything else so the batch report counts
    /// what the lifecycle reached, including removals whose record is gone
    /// afterwards.
    pub fn exit(self, error: Option<&Error>) -> Result<()> {
        let record = self.store.always(&self.key);
        let status = record.status;
        match error {
            Some(error) => {
                record.last_error = Some(error.to_string());
                self.log.emit(LineKind::Error, error.to_string());
            }
            None if status == Status::Removing => {
                self.store.remove(&self.key);
            }
            None => record.status = Status::Finished,
        }
        self.store.save()?;
        self.root.report_mut().count(status, error.is_some());
        tracing::info!(entity = %self.key, ?status, failed = error.is_some(), "lifecycle finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::progress::testing::RecordingSink;
    use fleet_meta::Identifier;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn setup() -> (TempDir, LockStore, ProgressRoot, LockKey) {
        let dir = TempDir::new().unwrap();
        let store = LockStore::load(dir.path().join(".fleet.lock")).unwrap();
        let root = ProgressRoot::new(Arc::new(RecordingSink::default()));
        (dir, store, root, LockKey::Package(Identifier::new("git", "https://x/a.git")))
    }

    #[test]
    fn status_walks_forward_only() {
        let (_dir, mut store, mut root, key) = setup();
        let mut scope = EntityProgress::enter(&mut root, &mut store, key.clone(), TriggerOrigin::new("A", "/tmp"));
        assert_eq!(scope.status(), Status::Started);

        scope.mark_installing();
        scope.mark_changed();
        assert_eq!(scope.status(), Status::Installing);
        scope.exit(None).unwrap();

        assert_eq!(store.get(&key).unwrap().status, Status::Finished);
        assert_eq!(root.report().installed, 1);
    }

    #[test]
    fn failure_keeps_unfinished_status() {
        let (_dir, mut store, mut root, key) = setup();
        let mut scope = EntityProgress::enter(&mut root, &mut store, key.clone(), TriggerOrigin::new("A", "/tmp"));
        scope.mark_changed();
        scope.exit(Some(&Error::NotFound("boom".into()))).unwrap();

        let record = store.get(&key).unwrap();
        assert_eq!(record.status, Status::Updating);
        assert_eq!(record.last_error.as_deref(), Some("Not found: boom"));
        assert!(record.status.unfinished());
        assert_eq!(root.report().failed, 1);

        let reloaded = LockStore::load(store.path()).unwrap();
        assert_eq!(reloaded.get(&key).unwrap().status, Status::Updating);
    }

    #[test]
    fn retry_resumes_from_unfinished() {
        let (_dir, mut store, mut root, key) = setup();
        store.always(&key).status = Status::Installing;
        store.always(&key).last_error = Some("earlier".into());

        let scope = EntityProgress::enter(&mut root, &mut store, key.clone(), TriggerOrigin::new("A", "/tmp"));
        scope.exit(None).unwrap();

        let record = store.get(&key).unwrap();
        assert_eq!(record.status, Status::Finished);
        assert_eq!(record.last_error, None);
        assert_eq!(root.report().installed, 1);
    }

    #[test]
    fn successful_removal_drops_record() {
        let (_dir, mut store, mut root, key) = setup();
        let mut scope = EntityProgress::enter(&mut root, &mut store, key.clone(), TriggerOrigin::new("A", "/tmp"));
        scope.mark_removing();
        scope.exit(None).unwrap();

        assert!(store.get(&key).is_none());
        assert_eq!(root.report().removed, 1);
    }

    #[test]
    fn removal_of_an_unfinished_install_drops_record() {
        let (_dir, mut store, mut root, key) = setup();
        store.always(&key).status = Status::Installing;

        let mut scope = EntityProgress::enter(&mut root, &mut store, key.clone(), TriggerOrigin::new("A", "/tmp"));
        scope.mark_removing();
        assert_eq!(scope.status(), Status::Removing);
        scope.exit(None).unwrap();

        assert!(store.get(&key).is_none());
        assert_eq!(root.report().to_string(), "[Installed 0] [Updated 0] [Removed 1] [Unchanged 0]");
    }

    #[test]
    fn provider_changes_propagate_only_on_success() {
        let (_dir, mut store, mut root, key) = setup();
        let mut scope = EntityProgress::enter(&mut root, &mut store, key.clone(), TriggerOrigin::new("A", "/tmp"));

        let mut provider = scope.provider("user-config");
        provider.scope().log_changed("created", Some("a".into()), Some("b".into()));
        scope.finish_provider(provider, false);
        assert_eq!(scope.status(), Status::Started);
        assert!(scope.record().provided.has("user-config"));

        let mut provider = scope.provider("user-config");
        provider.scope().log_changed("updated", Some("a".into()), Some("b".into()));
        provider.notify(Trigger::service_reload("klipper.service"));
        scope.finish_provider(provider, true);
        assert_eq!(scope.status(), Status::Updating);
        scope.exit(None).unwrap();

        let triggers = root.take_triggers();
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].origin.entity, "A");
    }
}
