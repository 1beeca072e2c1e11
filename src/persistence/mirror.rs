//! State mirror: copies the server's database artifacts into the shared
//! destination directory.
//!
//! Every step is best-effort: missing sources are skipped, and a failed
//! copy is recorded in the [`PersistReport`] without aborting the
//! remaining steps. Copies overwrite, so running the mirror repeatedly with
//! unchanged sources leaves the destination unchanged.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, info_span};
use walkdir::WalkDir;

use crate::config::{PersistConfig, ServerLayout};
use crate::errors::note_best_effort_failure;

/// Summary of one persistence run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistReport {
    /// Files copied into the destination.
    pub copied: usize,
    /// Sources that were absent and therefore skipped.
    pub skipped: usize,
    /// Copy or directory-creation steps that failed.
    pub failed: usize,
}

/// Mirrors configured state artifacts into a shared directory.
#[derive(Debug, Clone)]
pub struct Persister {
    state_dir: PathBuf,
    destination: PathBuf,
    files: Vec<String>,
    directory: String,
    report_failures: bool,
}

impl Persister {
    /// Build a persister from explicit paths.
    #[must_use]
    pub fn new(
        state_dir: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        persist: &PersistConfig,
        report_failures: bool,
    ) -> Self {
        Self {
            state_dir: state_dir.into(),
            destination: destination.into(),
            files: persist.files.clone(),
            directory: persist.directory.clone(),
            report_failures,
        }
    }

    /// Build a persister for a resolved server layout.
    #[must_use]
    pub fn for_layout(
        layout: &ServerLayout,
        persist: &PersistConfig,
        report_failures: bool,
    ) -> Self {
        Self::new(
            &layout.state_dir,
            &layout.destination,
            persist,
            report_failures,
        )
    }

    /// Shared output directory.
    #[must_use]
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Copy the configured files and directory into the destination.
    #[must_use]
    pub fn persist(&self) -> PersistReport {
        let _span = info_span!("persist", destination = %self.destination.display()).entered();
        let mut report = PersistReport::default();

        if let Err(err) = fs::create_dir_all(&self.destination) {
            note_best_effort_failure(self.report_failures, "create destination", &err);
            report.failed += 1;
            return report;
        }

        for name in &self.files {
            let source = self.state_dir.join(name);
            if !source.is_file() {
                debug!(source = %source.display(), "state file absent, skipping");
                report.skipped += 1;
                continue;
            }
            self.copy_file(&source, &self.destination.join(name), &mut report);
        }

        if !self.directory.is_empty() {
            let source = self.state_dir.join(&self.directory);
            if source.is_dir() {
                self.copy_tree(&source, &self.destination.join(&self.directory), &mut report);
            } else {
                debug!(source = %source.display(), "state directory absent, skipping");
                report.skipped += 1;
            }
        }

        info!(
            copied = report.copied,
            skipped = report.skipped,
            failed = report.failed,
            "state persisted"
        );
        report
    }

    fn copy_tree(&self, source: &Path, target: &Path, report: &mut PersistReport) {
        for entry in WalkDir::new(source).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    note_best_effort_failure(self.report_failures, "walk state directory", &err);
                    report.failed += 1;
                    continue;
                }
            };

            // `strip_prefix` cannot fail for entries yielded under `source`.
            let Ok(relative) = entry.path().strip_prefix(source) else {
                continue;
            };
            let dest = target.join(relative);

            if entry.file_type().is_dir() {
                if let Err(err) = fs::create_dir_all(&dest) {
                    note_best_effort_failure(self.report_failures, "create directory", &err);
                    report.failed += 1;
                }
            } else if entry.file_type().is_file() {
                self.copy_file(entry.path(), &dest, report);
            }
        }
    }

    fn copy_file(&self, source: &Path, dest: &Path, report: &mut PersistReport) {
        match fs::copy(source, dest) {
            Ok(_) => {
                debug!(source = %source.display(), dest = %dest.display(), "copied");
                report.copied += 1;
            }
            Err(err) => {
                note_best_effort_failure(self.report_failures, "copy state file", &err);
                report.failed += 1;
            }
        }
    }
}
