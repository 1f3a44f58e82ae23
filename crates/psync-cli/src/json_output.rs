//! JSON output structures for the psync CLI

use psync_protocol::{DirectoryOutcome, NegotiationReport};
use serde::{Deserialize, Serialize};

/// Complete JSON output of a run
#[derive(Debug, Serialize, Deserialize)]
pub struct RunResultJson {
    /// Operation metadata
    pub metadata: OperationMetadata,
    /// One entry per directory shared with the peer
    pub directories: Vec<DirectoryResultJson>,
    /// Process exit status
    pub exit_code: i32,
}

/// Operation metadata
#[derive(Debug, Serialize, Deserialize)]
pub struct OperationMetadata {
    /// psync version
    pub version: String,
    /// Operation type
    pub operation: String,
    /// Timestamp when the run finished
    pub timestamp: String,
}

/// How a directory ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectoryStatus {
    /// Synchronized and committed
    Synced,
    /// Locked on one side
    Skipped,
    /// Abandoned on error
    Failed,
}

/// Result of one directory
#[derive(Debug, Serialize, Deserialize)]
pub struct DirectoryResultJson {
    /// Directory name
    pub name: String,
    /// Outcome
    pub status: DirectoryStatus,
    /// Status code, zero when synchronized
    pub code: i32,
    /// Error message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Change counts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changes: Option<ChangesJson>,
}

/// Change counts of a synchronized directory
#[derive(Debug, Serialize, Deserialize)]
pub struct ChangesJson {
    /// Local entries deleted
    pub deleted: usize,
    /// Entries added from the peer
    pub added: usize,
    /// Entries replaced by the peer's version
    pub modified: usize,
    /// Entries sent to the peer
    pub uploaded: usize,
    /// Content bytes sent
    pub bytes_uploaded: u64,
    /// Content bytes received
    pub bytes_downloaded: u64,
    /// Files kept as backups
    pub backups: usize,
    /// Expired snapshots removed
    pub expired: usize,
    /// Snapshot folder of this round
    pub snapshot: String,
}

impl From<&DirectoryOutcome> for DirectoryResultJson {
    fn from(outcome: &DirectoryOutcome) -> Self {
        match &outcome.result {
            Ok(report) => Self {
                name: outcome.name.clone(),
                status: DirectoryStatus::Synced,
                code: 0,
                message: None,
                changes: Some(ChangesJson {
                    deleted: report.summary.deleted,
                    added: report.summary.added,
                    modified: report.summary.modified,
                    uploaded: report.summary.uploaded,
                    bytes_uploaded: report.bytes_uploaded,
                    bytes_downloaded: report.bytes_downloaded,
                    backups: report.backups,
                    expired: report.expired,
                    snapshot: report.snapshot.display().to_string(),
                }),
            },
            Err(e) => Self {
                name: outcome.name.clone(),
                status: if e.code() > 0 {
                    DirectoryStatus::Skipped
                } else {
                    DirectoryStatus::Failed
                },
                code: e.code(),
                message: Some(e.to_string()),
                changes: None,
            },
        }
    }
}

impl RunResultJson {
    /// Build the JSON view of a finished run
    pub fn new(operation: &str, report: &NegotiationReport) -> Self {
        Self {
            metadata: OperationMetadata {
                version: env!("CARGO_PKG_VERSION").to_string(),
                operation: operation.to_string(),
                timestamp: chrono::Utc::now().to_rfc3339(),
            },
            directories: report.directories.iter().map(Into::into).collect(),
            exit_code: report.exit_code(),
        }
    }

    /// Serialize to pretty-printed JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use psync_types::{Error, Side};

    #[test]
    fn test_skipped_and_failed_directories() {
        let report = NegotiationReport {
            directories: vec![
                DirectoryOutcome {
                    name: "docs".into(),
                    result: Err(Error::NotReady { side: Side::Remote }),
                },
                DirectoryOutcome {
                    name: "music".into(),
                    result: Err(Error::PermissionDenied { path: "a".into() }),
                },
            ],
        };
        let json = RunResultJson::new("sync", &report);
        assert_eq!(json.exit_code, 3);
        assert_eq!(json.directories[0].status, DirectoryStatus::Skipped);
        assert_eq!(json.directories[1].status, DirectoryStatus::Failed);

        let text = json.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["directories"][0]["status"], "skipped");
        assert_eq!(value["directories"][1]["code"], -3);
        assert!(value["directories"][0].get("changes").is_none());
    }
}
