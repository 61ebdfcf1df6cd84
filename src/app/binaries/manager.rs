use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::app::binaries::catalog::{ToolDescriptor, ToolKind, TOOL_CATALOG};
use crate::app::binaries::download::{DownloadEngine, ProgressSample};
use crate::app::binaries::extract::{extract, mark_executable};
use crate::app::binaries::paths::{
    install_dir, jar_path, jars_dir, resolve_executable, temp_dir,
};
use crate::app::error::AppError;
use crate::app::events::ProgressBus;
use crate::app::models::{DownloadProgress, DownloadStatus, InstallationStatus};
use crate::app::platform::{select_url, PlatformTarget};

/// Outcome of a `download_missing` batch. Partial failure is not fatal;
/// callers re-check installation status to see what landed.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub attempted: usize,
    pub failed: Vec<String>,
}

/// Orchestrates path resolution, downloading, and extraction over the tool
/// catalog, publishing per-tool state transitions on the progress bus:
/// pending -> downloading -> extracting -> completed, with failed reachable
/// from either active state.
pub struct BinaryManager {
    data_root: PathBuf,
    engine: DownloadEngine,
    bus: Arc<ProgressBus>,
    catalog: &'static [ToolDescriptor],
}

impl BinaryManager {
    pub fn new(data_root: PathBuf, bus: Arc<ProgressBus>, trace_id: &str) -> Result<Self, AppError> {
        Ok(Self {
            data_root,
            engine: DownloadEngine::new(trace_id)?,
            bus,
            catalog: TOOL_CATALOG,
        })
    }

    pub fn with_timeout(
        data_root: PathBuf,
        bus: Arc<ProgressBus>,
        timeout: Duration,
        trace_id: &str,
    ) -> Result<Self, AppError> {
        Ok(Self {
            data_root,
            engine: DownloadEngine::with_timeout(timeout, trace_id)?,
            bus,
            catalog: TOOL_CATALOG,
        })
    }

    #[cfg(test)]
    fn with_catalog(mut self, catalog: &'static [ToolDescriptor]) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn bus(&self) -> Arc<ProgressBus> {
        Arc::clone(&self.bus)
    }

    /// Installation status for every catalog entry. Tools the OS image
    /// already provides are reported installed without touching disk.
    pub fn check_all(&self, target: PlatformTarget) -> Vec<InstallationStatus> {
        self.catalog
            .iter()
            .map(|tool| self.status_of(tool, target))
            .collect()
    }

    fn status_of(&self, tool: &ToolDescriptor, target: PlatformTarget) -> InstallationStatus {
        if tool.native_on.contains(&target.os) {
            return InstallationStatus {
                tool: tool.id.to_string(),
                installed: true,
                executable_path: tool.system_name.map(str::to_string),
                version: tool.version.to_string(),
            };
        }
        let resolved = resolve_executable(tool, target, &self.data_root);
        InstallationStatus {
            tool: tool.id.to_string(),
            installed: resolved.is_some(),
            executable_path: resolved.map(|path| path.to_string_lossy().to_string()),
            version: tool.version.to_string(),
        }
    }

    /// Download, install, and verify a single tool, emitting progress along
    /// the way. Concurrent calls for the same tool are not deduplicated here;
    /// the UI disables the trigger while one is in flight.
    pub fn download_tool(
        &self,
        tool_id: &str,
        target: PlatformTarget,
        trace_id: &str,
    ) -> Result<(), AppError> {
        let tool = self
            .catalog
            .iter()
            .find(|tool| tool.id == tool_id)
            .ok_or_else(|| {
                AppError::validation(format!("Unknown tool: {tool_id}"), trace_id)
            })?;

        self.bus
            .emit(&DownloadProgress::new(tool.id, DownloadStatus::Pending));

        let result = self.run_download(tool, target, trace_id);
        match &result {
            Ok(()) => {
                let mut done = DownloadProgress::new(tool.id, DownloadStatus::Completed);
                done.percent = 100.0;
                self.bus.emit(&done);
                info!(trace_id = %trace_id, tool = tool.id, "tool installed");
            }
            Err(err) => {
                self.bus.emit(&DownloadProgress::failed(tool.id, &err.error));
                warn!(trace_id = %trace_id, tool = tool.id, error = %err, "tool download failed");
            }
        }
        result
    }

    fn run_download(
        &self,
        tool: &ToolDescriptor,
        target: PlatformTarget,
        trace_id: &str,
    ) -> Result<(), AppError> {
        let url = select_url(tool.urls, target).ok_or_else(|| {
            AppError::validation(
                format!(
                    "No download URL for {} on {}_{}",
                    tool.id,
                    target.os.key(),
                    target.arch.key()
                ),
                trace_id,
            )
        })?;

        let scratch = temp_dir(&self.data_root);
        let archive = scratch.join(archive_file_name(url, tool));

        let bus = Arc::clone(&self.bus);
        let name = tool.id.to_string();
        let mut on_progress = move |sample: ProgressSample| {
            bus.emit(&downloading_progress(&name, sample));
        };
        self.engine
            .download(url, &archive, &mut on_progress, trace_id)?;

        match tool.kind {
            ToolKind::Jar => {
                let jar = jar_path(&self.data_root, tool);
                fs::create_dir_all(jars_dir(&self.data_root)).map_err(|err| {
                    AppError::system(format!("Failed to create jars dir: {err}"), trace_id)
                })?;
                move_file(&archive, &jar, trace_id)?;
            }
            ToolKind::Archive => {
                self.bus
                    .emit(&DownloadProgress::new(tool.id, DownloadStatus::Extracting));
                extract(&archive, &install_dir(&self.data_root, tool), trace_id)?;
                if !target.is_windows() {
                    if let Some(executable) = resolve_executable(tool, target, &self.data_root) {
                        if executable.starts_with(&self.data_root) {
                            mark_executable(&executable, trace_id)?;
                        }
                    }
                }
            }
        }

        // Re-query so a bad archive surfaces now instead of at first spawn.
        if resolve_executable(tool, target, &self.data_root).is_none() {
            return Err(AppError::dependency(
                format!("{} archive did not contain the expected executable", tool.id),
                trace_id,
            ));
        }
        Ok(())
    }

    /// Sequentially download every tool `check_all` reports missing, in
    /// catalog order. Individual failures are collected; the batch only
    /// fails when every attempted download failed.
    pub fn download_missing(
        &self,
        target: PlatformTarget,
        trace_id: &str,
    ) -> Result<BatchOutcome, AppError> {
        let missing: Vec<&ToolDescriptor> = self
            .catalog
            .iter()
            .zip(self.check_all(target))
            .filter(|(_, status)| !status.installed)
            .map(|(tool, _)| tool)
            .collect();

        let mut outcome = BatchOutcome {
            attempted: missing.len(),
            failed: Vec::new(),
        };
        for tool in missing {
            if let Err(err) = self.download_tool(tool.id, target, trace_id) {
                outcome.failed.push(format!("{}: {}", tool.id, err.error));
            }
        }

        if outcome.attempted > 0 && outcome.failed.len() == outcome.attempted {
            return Err(AppError::dependency(
                format!("All downloads failed: {}", outcome.failed.join("; ")),
                trace_id,
            ));
        }
        Ok(outcome)
    }
}

fn downloading_progress(name: &str, sample: ProgressSample) -> DownloadProgress {
    let mut progress = DownloadProgress::new(name, DownloadStatus::Downloading);
    progress.total_bytes = sample.total_bytes;
    progress.downloaded_bytes = sample.downloaded_bytes;
    progress.bytes_per_sec = sample.bytes_per_sec;
    if sample.total_bytes > 0 {
        progress.percent =
            (sample.downloaded_bytes as f64 / sample.total_bytes as f64 * 100.0).min(100.0);
        if sample.bytes_per_sec > 0.0 {
            let remaining = sample.total_bytes.saturating_sub(sample.downloaded_bytes);
            progress.eta_seconds = (remaining as f64 / sample.bytes_per_sec).ceil() as u64;
        }
    }
    progress
}

fn archive_file_name(url: &str, tool: &ToolDescriptor) -> String {
    url.rsplit('/')
        .next()
        .map(|segment| segment.split(['?', '#']).next().unwrap_or(segment))
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}.bin", tool.id))
}

fn move_file(from: &std::path::Path, to: &std::path::Path, trace_id: &str) -> Result<(), AppError> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to).map_err(|err| {
        AppError::system(format!("Failed to move {}: {err}", from.display()), trace_id)
    })?;
    let _ = fs::remove_file(from);
    Ok(())
}
