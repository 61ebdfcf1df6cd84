use serde::{Deserialize, Serialize};

/// Lifecycle of a single tool download, replayed by the UI from progress events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Extracting,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DownloadProgress {
    /// Tool identifier; the UI keys its display state on this.
    pub name: String,
    pub total_bytes: u64,
    pub downloaded_bytes: u64,
    pub percent: f64,
    pub bytes_per_sec: f64,
    pub eta_seconds: u64,
    pub status: DownloadStatus,
    pub error: Option<String>,
}

impl DownloadProgress {
    pub fn new(name: impl Into<String>, status: DownloadStatus) -> Self {
        Self {
            name: name.into(),
            total_bytes: 0,
            downloaded_bytes: 0,
            percent: 0.0,
            bytes_per_sec: 0.0,
            eta_seconds: 0,
            status,
            error: None,
        }
    }

    pub fn failed(name: impl Into<String>, error: impl Into<String>) -> Self {
        let mut progress = Self::new(name, DownloadStatus::Failed);
        progress.error = Some(error.into());
        progress
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstallationStatus {
    pub tool: String,
    pub installed: bool,
    pub executable_path: Option<String>,
    /// Version from the catalog, not introspected from the binary.
    pub version: String,
}

/// One parsed `logcat -v threadtime` line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: String,
    pub pid: i64,
    pub tid: i64,
    pub level: String,
    pub tag: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogcatFilters {
    /// Minimum severity letter (V, D, I, W, E). Compared lexically against
    /// the entry's letter, matching the behaviour the UI has always shown.
    pub min_level: Option<String>,
    /// Substring match against the message body.
    pub text: Option<String>,
    /// Exact tag, forwarded to logcat itself as a `TAG:V *:S` spec.
    pub tag: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandResponse<T> {
    pub trace_id: String,
    pub data: T,
}
