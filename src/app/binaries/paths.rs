use std::fs;
use std::path::{Path, PathBuf};

use crate::app::binaries::catalog::{ExecutableSpec, ToolDescriptor, ToolKind};
use crate::app::platform::{HostOs, PlatformTarget};

pub fn binaries_root(data_root: &Path) -> PathBuf {
    data_root.join("binaries")
}

pub fn jars_dir(data_root: &Path) -> PathBuf {
    binaries_root(data_root).join("jars")
}

pub fn temp_dir(data_root: &Path) -> PathBuf {
    binaries_root(data_root).join("temp")
}

pub fn dev_tools_root(data_root: &Path) -> PathBuf {
    data_root.join("dev-tools")
}

pub fn install_dir(data_root: &Path, tool: &ToolDescriptor) -> PathBuf {
    binaries_root(data_root).join(tool.install_subdir)
}

pub fn jar_path(data_root: &Path, tool: &ToolDescriptor) -> PathBuf {
    jars_dir(data_root).join(format!("{}.jar", tool.id))
}

/// Resolve the on-disk executable for a tool, or `None` when the tool is not
/// installed. Never errors; callers treat `None` as "not installed". Called
/// on every status check and spawn, so it stays to bounded directory scans.
pub fn resolve_executable(
    tool: &ToolDescriptor,
    target: PlatformTarget,
    data_root: &Path,
) -> Option<PathBuf> {
    if tool.kind == ToolKind::Jar {
        let jar = jar_path(data_root, tool);
        if jar.is_file() {
            return Some(jar);
        }
        return system_fallback(tool);
    }

    let install = install_dir(data_root, tool);
    let found = match tool.executable {
        ExecutableSpec::Fixed { unix, windows } => {
            let relative = if target.is_windows() { windows } else { unix };
            let candidate = binaries_root(data_root).join(relative);
            candidate.is_file().then_some(candidate)
        }
        ExecutableSpec::VersionedScan {
            marker,
            unix,
            macos,
            windows,
        } => {
            let relative = match target.os {
                HostOs::Win32 => windows,
                HostOs::Darwin => macos,
                HostOs::Linux => unix,
            };
            scan_versioned(&install, marker, relative)
        }
        ExecutableSpec::SelfContained => None,
    };

    found.or_else(|| system_fallback(tool))
}

/// The archive expanded into a version-stamped folder (`jdk-17.0.11+9-jre`,
/// `scrcpy-win64-v3.1`, ...). Probe the flat layout first, then each
/// immediate child whose name contains the marker.
fn scan_versioned(install: &Path, marker: &str, relative: &str) -> Option<PathBuf> {
    let direct = install.join(relative);
    if direct.is_file() {
        return Some(direct);
    }

    let entries = fs::read_dir(install).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_lowercase();
        if !name.contains(&marker.to_lowercase()) {
            continue;
        }
        let candidate = path.join(relative);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

fn system_fallback(tool: &ToolDescriptor) -> Option<PathBuf> {
    let name = tool.system_name?;
    let resolved = which::which(name).ok()?;
    resolved.is_file().then_some(resolved)
}
