//! Per-project results of a pull or push.

use std::path::PathBuf;

/// Direction of a sync operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    /// Cloud to local
    Pull,
    /// Local to cloud
    Push,
}

impl std::fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pull => write!(f, "pull"),
            Self::Push => write!(f, "push"),
        }
    }
}

/// What happened to one project.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Something was written locally or sent to the cloud.
    Updated,
    /// Everything was already in sync.
    #[default]
    Unchanged,
    /// The project could not be synced; see [`ProjectSyncResult::error`].
    Failed,
}

/// Result of syncing a single project.
#[derive(Debug, Clone, Default)]
pub struct ProjectSyncResult {
    /// Cloud name (pull) or path relative to the root (push).
    pub name: String,
    /// Cloud project id, when known.
    pub cloud_id: Option<u64>,
    /// Local project directory.
    pub local_path: Option<PathBuf>,
    pub outcome: SyncOutcome,
    /// Whether the cloud project was created by this push.
    pub created: bool,
    /// Number of files written to disk (pull).
    pub files_written: usize,
    /// Number of files already up to date (pull).
    pub files_unchanged: usize,
    /// Categories sent to the cloud (push).
    pub updated: Vec<String>,
    /// File being processed when the project failed.
    pub failed_file: Option<String>,
    /// Error message if the project failed.
    pub error: Option<String>,
    /// Non-fatal problems, e.g. library references that could not be updated.
    pub warnings: Vec<String>,
    /// Duration of the sync of this project.
    pub duration_ms: u64,
}

impl ProjectSyncResult {
    pub fn new(name: impl Into<String>, cloud_id: Option<u64>) -> Self {
        Self {
            name: name.into(),
            cloud_id,
            ..Default::default()
        }
    }

    pub fn failed(
        name: impl Into<String>,
        cloud_id: Option<u64>,
        error: impl ToString,
        failed_file: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            cloud_id,
            outcome: SyncOutcome::Failed,
            error: Some(error.to_string()),
            failed_file,
            ..Default::default()
        }
    }

    pub fn success(&self) -> bool {
        self.outcome != SyncOutcome::Failed
    }
}

/// Report of a whole pull or push batch.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub direction: SyncDirection,
    /// Results, in processing order.
    pub results: Vec<ProjectSyncResult>,
    pub total_duration_ms: u64,
    /// Whether every project synced successfully.
    pub all_succeeded: bool,
}

impl SyncReport {
    pub fn new(direction: SyncDirection) -> Self {
        Self {
            direction,
            results: Vec::new(),
            total_duration_ms: 0,
            all_succeeded: true,
        }
    }

    pub fn add_result(&mut self, result: ProjectSyncResult) {
        if !result.success() {
            self.all_succeeded = false;
        }
        self.results.push(result);
    }

    /// Projects that were changed.
    pub fn succeeded(&self) -> impl Iterator<Item = &ProjectSyncResult> {
        self.results.iter().filter(|r| r.outcome == SyncOutcome::Updated)
    }

    /// Projects that were already in sync.
    pub fn skipped(&self) -> impl Iterator<Item = &ProjectSyncResult> {
        self.results.iter().filter(|r| r.outcome == SyncOutcome::Unchanged)
    }

    pub fn failed(&self) -> impl Iterator<Item = &ProjectSyncResult> {
        self.results.iter().filter(|r| r.outcome == SyncOutcome::Failed)
    }

    pub fn total_files_written(&self) -> usize {
        self.results.iter().map(|r| r.files_written).sum()
    }

    pub fn result_for(&self, cloud_id: u64) -> Option<&ProjectSyncResult> {
        self.results.iter().find(|r| r.cloud_id == Some(cloud_id))
    }

    pub(crate) fn result_for_mut(&mut self, cloud_id: u64) -> Option<&mut ProjectSyncResult> {
        self.results.iter_mut().find(|r| r.cloud_id == Some(cloud_id))
    }

    /// One line summary, e.g. `pull: 2 updated, 1 unchanged, 0 failed`.
    pub fn summary(&self) -> String {
        format!(
            "{}: {} updated, {} unchanged, {} failed",
            self.direction,
            self.succeeded().count(),
            self.skipped().count(),
            self.failed().count()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_tracks_failures() {
        let mut report = SyncReport::new(SyncDirection::Push);
        let mut updated = ProjectSyncResult::new("A", Some(1));
        updated.outcome = SyncOutcome::Updated;
        report.add_result(updated);
        report.add_result(ProjectSyncResult::new("B", Some(2)));
        assert!(report.all_succeeded);

        report.add_result(ProjectSyncResult::failed("C", None, "boom", Some("main.py".into())));
        assert!(!report.all_succeeded);
        assert_eq!(report.succeeded().count(), 1);
        assert_eq!(report.skipped().count(), 1);
        assert_eq!(report.failed().next().unwrap().error.as_deref(), Some("boom"));
        assert_eq!(report.summary(), "push: 1 updated, 1 unchanged, 1 failed");
        assert_eq!(report.result_for(2).unwrap().name, "B");
    }
}
