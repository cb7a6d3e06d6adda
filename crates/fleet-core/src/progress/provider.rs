//! Provider and operation scopes with provenance bookkeeping.

use fleet_meta::Trigger;

use super::{Breadcrumb, LineKind};
use crate::lock::{Entry, ProviderProvided};

/// What a provider scope hands back to its entity.
#[derive(Debug, Default)]
pub(crate) struct Outcome {
    pub changed: bool,
    pub installing: bool,
    pub triggers: Vec<Trigger>,
}

/// Scope of one provider's apply or remove call.
///
/// Owns the provider's provenance bucket for the duration of the call; the
/// entity scope takes it back in
/// [`finish_provider`](super::EntityProgress::finish_provider).
#[derive(Debug)]
pub struct ProviderProgress {
    name: String,
    bucket: ProviderProvided,
    log: Breadcrumb,
    outcome: Outcome,
}

impl ProviderProgress {
    pub(crate) fn new(name: &str, mut bucket: ProviderProvided, log: Breadcrumb) -> Self {
        bucket.start_pass();
        Self {
            name: name.to_string(),
            bucket,
            log,
            outcome: Outcome::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn log(&self) -> &Breadcrumb {
        &self.log
    }

    /// The top-level operation scope.
    pub fn scope(&mut self) -> SubProgress<'_> {
        let log = self.log.clone();
        SubProgress {
            inner: self,
            path: Vec::new(),
            log,
        }
    }

    pub fn changed(&self) -> bool {
        self.outcome.changed
    }

    pub fn mark_changed(&mut self) {
        self.outcome.changed = true;
    }

    /// The provider created something rather than updating it.
    pub fn mark_installing(&mut self) {
        self.outcome.installing = true;
    }

    pub fn notify(&mut self, trigger: Trigger) {
        self.outcome.triggers.push(trigger);
    }

    /// Every recorded entry, including ones from earlier passes.
    pub fn all(&self) -> Vec<Entry> {
        self.bucket.all().cloned().collect()
    }

    /// Recorded entries this pass has not produced (yet).
    pub fn untouched(&self) -> Vec<Entry> {
        self.bucket.untouched()
    }

    pub(crate) fn into_parts(self) -> (String, ProviderProvided, Outcome) {
        (self.name, self.bucket, self.outcome)
    }
}

/// A nested operation scope.
///
/// [`sub`](Self::sub) extends both the provenance path and the breadcrumb;
/// [`case`](Self::case) only labels output, so entries logged under a case
/// keep the parent's path.
pub struct SubProgress<'p> {
    inner: &'p mut ProviderProgress,
    path: Vec<String>,
    log: Breadcrumb,
}

impl SubProgress<'_> {
    pub fn sub(&mut self, name: &str) -> SubProgress<'_> {
        let mut path = self.path.clone();
        path.push(name.to_string());
        SubProgress {
            log: self.log.child(name),
            inner: &mut *self.inner,
            path,
        }
    }

    pub fn case(&mut self, label: impl Into<String>) -> SubProgress<'_> {
        SubProgress {
            log: self.log.child(label),
            path: self.path.clone(),
            inner: &mut *self.inner,
        }
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn log(&self) -> &Breadcrumb {
        &self.log
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log.info(message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log.warn(message);
    }

    /// Report a change and record what produced it.
    pub fn log_changed(&mut self, message: &str, input: Option<String>, output: Option<String>) {
        self.inner.outcome.changed = true;
        self.log.emit(LineKind::Changed, message);
        self.notice(input, output);
    }

    /// Report an up-to-date result; still recorded so the entry is not
    /// collected as stale.
    pub fn log_unchanged(&mut self, message: &str, input: Option<String>, output: Option<String>) {
        self.log.emit(LineKind::Unchanged, message);
        self.notice(input, output);
    }

    /// Drop a recorded entry whose effect was undone.
    pub fn log_removed(&mut self, entry: &Entry, message: &str) {
        self.inner.outcome.changed = true;
        self.inner.bucket.forget(entry);
        self.log.emit(LineKind::Removed, message);
    }

    /// Stop tracking an entry whose effect is left in place. The record
    /// changed, so this counts as a change.
    pub fn log_retained(&mut self, entry: &Entry, message: &str) {
        self.inner.outcome.changed = true;
        self.inner.bucket.forget(entry);
        self.log.emit(LineKind::Warning, message);
    }

    pub fn mark_installing(&mut self) {
        self.inner.mark_installing();
    }

    pub fn notify(&mut self, trigger: Trigger) {
        self.inner.notify(trigger);
    }

    pub fn untouched(&self) -> Vec<Entry> {
        self.inner.untouched()
    }

    fn notice(&mut self, input: Option<String>, output: Option<String>) {
        if input.is_some() || output.is_some() {
            self.inner
                .bucket
                .notice(Entry::new(self.path.clone(), input, output));
        }
    }
}
