//! End-of-run report

use crate::error::DocumentError;
use std::collections::BTreeMap;
use std::fmt::Write;

/// What happened to one document during a run
#[derive(Debug)]
pub enum SyncAction {
    Added { path: String },
    Updated { path: String },
    MovedAndUpdated { old_path: String, path: String },
    Removed { old_path: String },
    Unchanged,
    Failed { error: DocumentError },
}

/// Aggregated outcome of a sync run, keyed by document id
#[derive(Debug, Default)]
pub struct SyncReport {
    actions: BTreeMap<String, SyncAction>,
    /// Documents gone from the remote library whose local copies were kept
    pub retained: usize,
    /// Whether the run was cancelled before every document was processed
    pub cancelled: bool,
}

impl SyncReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, id: impl Into<String>, action: SyncAction) {
        self.actions.insert(id.into(), action);
    }

    pub fn action(&self, id: &str) -> Option<&SyncAction> {
        self.actions.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SyncAction)> {
        self.actions.iter().map(|(id, action)| (id.as_str(), action))
    }

    pub fn added(&self) -> usize {
        self.count(|a| matches!(a, SyncAction::Added { .. }))
    }

    pub fn updated(&self) -> usize {
        self.count(|a| matches!(a, SyncAction::Updated { .. }))
    }

    pub fn moved(&self) -> usize {
        self.count(|a| matches!(a, SyncAction::MovedAndUpdated { .. }))
    }

    pub fn removed(&self) -> usize {
        self.count(|a| matches!(a, SyncAction::Removed { .. }))
    }

    pub fn unchanged(&self) -> usize {
        self.count(|a| matches!(a, SyncAction::Unchanged))
    }

    /// Ids of documents that failed, in stable order
    pub fn failed_ids(&self) -> Vec<&str> {
        self.actions
            .iter()
            .filter(|(_, action)| matches!(action, SyncAction::Failed { .. }))
            .map(|(id, _)| id.as_str())
            .collect()
    }

    pub fn has_failures(&self) -> bool {
        self.actions
            .values()
            .any(|action| matches!(action, SyncAction::Failed { .. }))
    }

    fn count(&self, predicate: impl Fn(&SyncAction) -> bool) -> usize {
        self.actions.values().filter(|a| predicate(a)).count()
    }

    /// Human-readable summary printed at the end of a run
    pub fn format_summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{} new documents were added", self.added());
        let _ = writeln!(out, "{} documents were removed", self.removed());
        let _ = writeln!(out, "{} documents were updated", self.updated());
        let _ = writeln!(
            out,
            "{} documents were moved and possibly updated",
            self.moved()
        );
        let _ = writeln!(out, "{} documents were unchanged", self.unchanged());
        if self.retained > 0 {
            let _ = writeln!(
                out,
                "{} documents are no longer in the library; their local copies were kept",
                self.retained
            );
        }
        let failed = self.failed_ids();
        if !failed.is_empty() {
            let _ = writeln!(
                out,
                "{} documents failed to sync: {}",
                failed.len(),
                failed.join(", ")
            );
        }
        if self.cancelled {
            let _ = writeln!(out, "the run was cancelled before completion");
        }
        out.trim_end().to_string()
    }
}
