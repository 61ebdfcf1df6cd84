use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::app::binaries::download::{DownloadEngine, ProgressSample};
use crate::app::binaries::extract::{extract, mark_executable};
use crate::app::binaries::paths::{dev_tools_root, temp_dir};
use crate::app::error::AppError;
use crate::app::events::ProgressBus;
use crate::app::models::{DownloadProgress, DownloadStatus};
use crate::app::platform::{select_url, HostOs, PlatformTarget};
use crate::app::process::{ManagedProcess, ProcessRegistry};

/// Per-OS executable path relative to the tool's install directory. The macOS
/// entry may point inside an `.app` bundle.
#[derive(Debug, Clone, Copy)]
pub struct DevToolExecutable {
    pub unix: &'static str,
    pub macos: &'static str,
    pub windows: &'static str,
}

pub struct DevToolDescriptor {
    pub id: &'static str,
    pub label: &'static str,
    pub version: &'static str,
    pub urls: &'static [(&'static str, &'static str)],
    pub install_subdir: &'static str,
    pub executable: DevToolExecutable,
}

/// Optional third-party debugging tools, provisioned under `dev-tools/` and
/// tracked separately from the core catalog.
pub const DEV_TOOL_CATALOG: &[DevToolDescriptor] = &[DevToolDescriptor {
    id: "jadx",
    label: "JADX Decompiler",
    version: "1.5.0",
    urls: &[(
        "all",
        "https://github.com/skylot/jadx/releases/download/v1.5.0/jadx-1.5.0.zip",
    )],
    install_subdir: "jadx",
    executable: DevToolExecutable {
        unix: "bin/jadx-gui",
        macos: "bin/jadx-gui",
        windows: "bin/jadx-gui.bat",
    },
}];

pub fn find_dev_tool(id: &str) -> Option<&'static DevToolDescriptor> {
    DEV_TOOL_CATALOG.iter().find(|tool| tool.id == id)
}

/// Locate an installed dev tool's executable, probing the flat layout first
/// and then version-stamped subdirectories the archive may have expanded
/// into. `None` means not installed.
pub fn resolve_dev_tool(
    tool: &DevToolDescriptor,
    target: PlatformTarget,
    data_root: &Path,
) -> Option<PathBuf> {
    let install = dev_tools_root(data_root).join(tool.install_subdir);
    let relative = match target.os {
        HostOs::Win32 => tool.executable.windows,
        HostOs::Darwin => tool.executable.macos,
        HostOs::Linux => tool.executable.unix,
    };

    let direct = install.join(relative);
    if direct.is_file() {
        return Some(direct);
    }
    let entries = fs::read_dir(&install).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_lowercase();
        if !name.contains(tool.id) {
            continue;
        }
        let candidate = path.join(relative);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

/// Downloads and installs dev tools, publishing `downloading -> extracting ->
/// completed` transitions on its own progress bus. Dev tools skip the
/// `pending` state: there is no batch queue to wait in.
pub struct DevToolDownloader {
    data_root: PathBuf,
    engine: DownloadEngine,
    bus: Arc<ProgressBus>,
}

impl DevToolDownloader {
    pub fn new(data_root: PathBuf, bus: Arc<ProgressBus>, trace_id: &str) -> Result<Self, AppError> {
        Ok(Self {
            data_root,
            engine: DownloadEngine::new(trace_id)?,
            bus,
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
        })
    }

    pub fn bus(&self) -> Arc<ProgressBus> {
        Arc::clone(&self.bus)
    }

    pub fn download(
        &self,
        tool_id: &str,
        target: PlatformTarget,
        trace_id: &str,
    ) -> Result<(), AppError> {
        let tool = find_dev_tool(tool_id).ok_or_else(|| {
            AppError::validation(format!("Unknown dev tool: {tool_id}"), trace_id)
        })?;

        let result = self.run_download(tool, target, trace_id);
        match &result {
            Ok(()) => {
                let mut done = DownloadProgress::new(tool.id, DownloadStatus::Completed);
                done.percent = 100.0;
                self.bus.emit(&done);
                info!(trace_id = %trace_id, tool = tool.id, "dev tool installed");
            }
            Err(err) => {
                self.bus.emit(&DownloadProgress::failed(tool.id, &err.error));
                warn!(trace_id = %trace_id, tool = tool.id, error = %err, "dev tool download failed");
            }
        }
        result
    }

    fn run_download(
        &self,
        tool: &DevToolDescriptor,
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

        let archive_name = url
            .rsplit('/')
            .next()
            .map(|segment| segment.split(['?', '#']).next().unwrap_or(segment))
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}.bin", tool.id));
        let archive = temp_dir(&self.data_root).join(archive_name);

        let bus = Arc::clone(&self.bus);
        let name = tool.id.to_string();
        let mut on_progress = move |sample: ProgressSample| {
            let mut progress = DownloadProgress::new(&name, DownloadStatus::Downloading);
            progress.total_bytes = sample.total_bytes;
            progress.downloaded_bytes = sample.downloaded_bytes;
            progress.bytes_per_sec = sample.bytes_per_sec;
            if sample.total_bytes > 0 {
                progress.percent =
                    (sample.downloaded_bytes as f64 / sample.total_bytes as f64 * 100.0).min(100.0);
            }
            bus.emit(&progress);
        };
        self.engine
            .download(url, &archive, &mut on_progress, trace_id)?;

        self.bus
            .emit(&DownloadProgress::new(tool.id, DownloadStatus::Extracting));
        let install = dev_tools_root(&self.data_root).join(tool.install_subdir);
        extract(&archive, &install, trace_id)?;

        let executable = resolve_dev_tool(tool, target, &self.data_root).ok_or_else(|| {
            AppError::dependency(
                format!("{} archive did not contain the expected executable", tool.id),
                trace_id,
            )
        })?;
        if !target.is_windows() {
            mark_executable(&executable, trace_id)?;
        }
        Ok(())
    }
}

pub struct DevToolHandle {
    pub child: Child,
}

impl ManagedProcess for DevToolHandle {
    fn terminate(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub type DevToolRegistry = ProcessRegistry<String, DevToolHandle>;

const EXIT_POLL: Duration = Duration::from_millis(500);

/// Launch an installed dev tool detached. Returns `false` without spawning
/// when the tool is already tracked as running. A watcher thread untracks the
/// entry once the process exits on its own.
pub fn launch_dev_tool(
    registry: &Arc<DevToolRegistry>,
    tool_id: &str,
    target: PlatformTarget,
    data_root: &Path,
    trace_id: &str,
) -> Result<bool, AppError> {
    let tool = find_dev_tool(tool_id).ok_or_else(|| {
        AppError::validation(format!("Unknown dev tool: {tool_id}"), trace_id)
    })?;
    let executable = resolve_dev_tool(tool, target, data_root).ok_or_else(|| {
        AppError::dependency(format!("{} is not installed", tool.id), trace_id)
    })?;
    launch_dev_tool_with_spawner(registry, tool_id, trace_id, move |trace_id| {
        Command::new(&executable)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| {
                AppError::dependency(format!("Failed to launch {tool_id}: {err}"), trace_id)
            })
    })
}

pub fn launch_dev_tool_with_spawner(
    registry: &Arc<DevToolRegistry>,
    tool_id: &str,
    trace_id: &str,
    spawner: impl FnOnce(&str) -> Result<Child, AppError>,
) -> Result<bool, AppError> {
    if registry.contains(&tool_id.to_string(), trace_id)? {
        return Ok(false);
    }
    let child = spawner(trace_id)?;
    registry.insert(tool_id.to_string(), DevToolHandle { child }, trace_id)?;
    info!(trace_id = %trace_id, tool = %tool_id, "dev tool launched");

    let watched = Arc::clone(registry);
    let key = tool_id.to_string();
    std::thread::spawn(move || loop {
        std::thread::sleep(EXIT_POLL);
        let exited = match watched.with_mut(&key, "dev-tool-watcher", |handle| {
            matches!(handle.child.try_wait(), Ok(Some(_)))
        }) {
            Ok(Some(exited)) => exited,
            // Untracked (stopped) or registry unavailable: the watch is over.
            _ => break,
        };
        if exited {
            let _ = watched.remove(&key, "dev-tool-watcher");
            break;
        }
    });
    Ok(true)
}

/// Kill a running dev tool and untrack it immediately. `false` when nothing
/// was tracked for the id.
pub fn stop_dev_tool(
    registry: &DevToolRegistry,
    tool_id: &str,
    trace_id: &str,
) -> Result<bool, AppError> {
    match registry.remove(&tool_id.to_string(), trace_id)? {
        Some(mut handle) => {
            handle.terminate();
            info!(trace_id = %trace_id, tool = %tool_id, "dev tool stopped");
            Ok(true)
        }
        None => Ok(false),
    }
}
