//! Progress hierarchy
//!
//! Output is scoped: a batch root, one scope per entity, one per provider
//! and any number of nested operation scopes below that. Every scope adds a
//! label to the [`Breadcrumb`] it hands down, so a line reads
//! `[entity] [provider] [operation] message` without any component knowing
//! where it sits.
//!
//! The entity scope also owns the status state machine and the provider
//! scopes own their provenance bucket; see [`EntityProgress`] and
//! [`ProviderProgress`].

mod entity;
mod provider;

pub use entity::EntityProgress;
pub use provider::{ProviderProgress, SubProgress};

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use fleet_meta::Trigger;
use serde_json::Value;

use crate::lock::Status;

/// What a progress line reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Info,
    Changed,
    Unchanged,
    Removed,
    Warning,
    Error,
    /// A line of subprocess output
    Output,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressLine {
    pub crumbs: Vec<String>,
    pub kind: LineKind,
    pub message: String,
}

impl fmt::Display for ProgressLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for crumb in &self.crumbs {
            write!(f, "[{crumb}] ")?;
        }
        f.write_str(&self.message)
    }
}

/// Receives formatted progress lines.
pub trait ProgressSink: Send + Sync {
    fn line(&self, line: &ProgressLine);
}

/// Forwards progress to `tracing` under the `fleet::progress` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn line(&self, line: &ProgressLine) {
        match line.kind {
            LineKind::Warning => tracing::warn!(target: "fleet::progress", "{line}"),
            LineKind::Error => tracing::error!(target: "fleet::progress", "{line}"),
            LineKind::Output => tracing::debug!(target: "fleet::progress", "{line}"),
            _ => tracing::info!(target: "fleet::progress", "{line}"),
        }
    }
}

/// A labelled position in the hierarchy that can emit lines.
#[derive(Clone)]
pub struct Breadcrumb {
    sink: Arc<dyn ProgressSink>,
    crumbs: Vec<String>,
}

impl fmt::Debug for Breadcrumb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Breadcrumb").field("crumbs", &self.crumbs).finish()
    }
}

impl Breadcrumb {
    pub fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            sink,
            crumbs: Vec::new(),
        }
    }

    /// A breadcrumb one level down.
    pub fn child(&self, label: impl Into<String>) -> Self {
        let mut crumbs = self.crumbs.clone();
        crumbs.push(label.into());
        Self {
            sink: Arc::clone(&self.sink),
            crumbs,
        }
    }

    pub fn crumbs(&self) -> &[String] {
        &self.crumbs
    }

    pub fn emit(&self, kind: LineKind, message: impl Into<String>) {
        self.sink.line(&ProgressLine {
            crumbs: self.crumbs.clone(),
            kind,
            message: message.into(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(LineKind::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(LineKind::Warning, message);
    }

    pub fn output(&self, line: &str) {
        self.emit(LineKind::Output, line);
    }
}

/// Where a notified trigger came from; shell and message triggers run in
/// this context.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerOrigin {
    pub entity: String,
    /// Working directory for shell triggers
    pub workdir: PathBuf,
    /// Directory `!PKG` references resolve against, when it differs
    pub package_path: Option<PathBuf>,
    pub context: Value,
}

impl TriggerOrigin {
    pub fn new(entity: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            entity: entity.into(),
            workdir: workdir.into(),
            package_path: None,
            context: Value::Null,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingTrigger {
    pub trigger: Trigger,
    pub origin: TriggerOrigin,
}

/// Per-batch entity counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub installed: usize,
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
    pub failed: usize,
}

impl BatchReport {
    /// Count one finished lifecycle by the status it reached.
    pub fn count(&mut self, status: Status, failed: bool) {
        if failed {
            self.failed += 1;
            return;
        }
        match status {
            Status::Installing => self.installed += 1,
            Status::Updating => self.updated += 1,
            Status::Removing => self.removed += 1,
            _ => self.unchanged += 1,
        }
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[Installed {}] [Updated {}] [Removed {}] [Unchanged {}]",
            self.installed, self.updated, self.removed, self.unchanged
        )?;
        if self.failed > 0 {
            write!(f, " [Failed {}]", self.failed)?;
        }
        Ok(())
    }
}

/// Root of one batch: the sink, the triggers waiting for dispatch and the
/// running counts.
pub struct ProgressRoot {
    sink: Arc<dyn ProgressSink>,
    triggers: Vec<PendingTrigger>,
    report: BatchReport,
}

impl ProgressRoot {
    pub fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            sink,
            triggers: Vec::new(),
            report: BatchReport::default(),
        }
    }

    pub fn breadcrumb(&self) -> Breadcrumb {
        Breadcrumb::new(Arc::clone(&self.sink))
    }

    pub fn sink(&self) -> Arc<dyn ProgressSink> {
        Arc::clone(&self.sink)
    }

    pub fn notify(&mut self, trigger: Trigger, origin: TriggerOrigin) {
        self.triggers.push(PendingTrigger { trigger, origin });
    }

    pub fn report(&self) -> BatchReport {
        self.report
    }

    pub(crate) fn report_mut(&mut self) -> &mut BatchReport {
        &mut self.report
    }

    /// Hand over everything notified so far.
    pub fn take_triggers(&mut self) -> Vec<PendingTrigger> {
        std::mem::take(&mut self.triggers)
    }
}
