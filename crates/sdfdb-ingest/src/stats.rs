//! Run statistics and the terminal summary

use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::validator::RejectReason;

/// Counters for one input file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileStatistics {
    pub file: String,
    pub seen: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub rejections: BTreeMap<RejectReason, u64>,
    pub parse_errors: u64,
    pub coercion_failures: u64,
    /// Rows of this file known to be committed
    pub committed: u64,
    /// The file was read to its end
    pub complete: bool,
    pub skipped: bool,
}

impl FileStatistics {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            ..Default::default()
        }
    }

    pub fn reject(&mut self, reason: RejectReason) {
        self.rejected += 1;
        *self.rejections.entry(reason).or_insert(0) += 1;
    }
}

/// Counters for the whole run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStatistics {
    pub seen: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub rejections: BTreeMap<RejectReason, u64>,
    pub parse_errors: u64,
    pub coercion_failures: u64,
    pub batches_committed: u64,
    pub rows_committed: u64,
    pub indexes_built: u64,
    pub files_skipped: u64,
    pub files: Vec<FileStatistics>,
}

impl RunStatistics {
    pub fn rejections_for(&self, reason: RejectReason) -> u64 {
        self.rejections.get(&reason).copied().unwrap_or(0)
    }

    /// Fold one file's record counters into the totals
    pub fn add_file(&mut self, file: FileStatistics) {
        self.seen += file.seen;
        self.accepted += file.accepted;
        self.rejected += file.rejected;
        for (reason, n) in &file.rejections {
            *self.rejections.entry(*reason).or_insert(0) += n;
        }
        self.parse_errors += file.parse_errors;
        self.coercion_failures += file.coercion_failures;
        if file.skipped {
            self.files_skipped += 1;
        }
        self.files.push(file);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned by every run that got past schema validation
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub table: String,
    pub stats: RunStatistics,
    /// Why the run failed, if it did
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl RunSummary {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_reject_tally() {
        let mut a = FileStatistics::new("a.sdf");
        a.reject(RejectReason::DuplicatePrimaryKey);
        a.reject(RejectReason::MissingRequiredColumn);
        let mut b = FileStatistics::new("b.sdf");
        b.reject(RejectReason::DuplicatePrimaryKey);

        let mut stats = RunStatistics::default();
        stats.add_file(a);
        stats.add_file(b);

        assert_eq!(stats.rejected, 3);
        assert_eq!(stats.rejections_for(RejectReason::DuplicatePrimaryKey), 2);
        assert_eq!(stats.rejections_for(RejectReason::InvalidValue), 0);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["rejections"]["duplicate-primary-key"], 2);
    }

    #[test]
    fn test_add_file() {
        let mut stats = RunStatistics::default();
        stats.add_file(FileStatistics {
            seen: 5,
            accepted: 3,
            parse_errors: 1,
            ..FileStatistics::new("a.sdf")
        });
        stats.add_file(FileStatistics {
            skipped: true,
            ..FileStatistics::new("b.sdf")
        });
        assert_eq!((stats.seen, stats.accepted, stats.parse_errors), (5, 3, 1));
        assert_eq!(stats.files_skipped, 1);
        assert_eq!(stats.files.len(), 2);
    }
}
