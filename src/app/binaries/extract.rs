use std::fs::{self, File};
use std::path::Path;

use tracing::{info, warn};

use crate::app::error::AppError;

/// Extract `archive` into `dest_dir`, dispatching on the file extension, then
/// delete the archive (best effort). `.dmg` is only meaningful on macOS.
pub fn extract(archive: &Path, dest_dir: &Path, trace_id: &str) -> Result<(), AppError> {
    fs::create_dir_all(dest_dir).map_err(|err| {
        AppError::system(format!("Failed to create {}: {err}", dest_dir.display()), trace_id)
    })?;

    let name = archive
        .file_name()
        .map(|value| value.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    if name.ends_with(".zip") {
        extract_zip(archive, dest_dir, trace_id)?;
    } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        extract_tar_gz(archive, dest_dir, trace_id)?;
    } else if name.ends_with(".dmg") {
        extract_dmg(archive, dest_dir, trace_id)?;
    } else {
        return Err(AppError::validation(
            format!("Unsupported archive format: {name}"),
            trace_id,
        ));
    }

    if let Err(err) = fs::remove_file(archive) {
        // Stale archives do not affect the next attempt; just note it.
        warn!(trace_id = %trace_id, archive = %archive.display(), error = %err, "failed to delete archive after extraction");
    }
    info!(trace_id = %trace_id, archive = %archive.display(), dest = %dest_dir.display(), "archive extracted");
    Ok(())
}

fn extract_zip(archive: &Path, dest_dir: &Path, trace_id: &str) -> Result<(), AppError> {
    let file = File::open(archive).map_err(|err| {
        AppError::system(format!("Failed to open {}: {err}", archive.display()), trace_id)
    })?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|err| AppError::dependency(format!("Invalid zip archive: {err}"), trace_id))?;
    zip.extract(dest_dir)
        .map_err(|err| AppError::dependency(format!("Zip extraction failed: {err}"), trace_id))
}

fn extract_tar_gz(archive: &Path, dest_dir: &Path, trace_id: &str) -> Result<(), AppError> {
    let file = File::open(archive).map_err(|err| {
        AppError::system(format!("Failed to open {}: {err}", archive.display()), trace_id)
    })?;
    let decoder = flate2::read::GzDecoder::new(file);
    tar::Archive::new(decoder)
        .unpack(dest_dir)
        .map_err(|err| AppError::dependency(format!("Tar extraction failed: {err}"), trace_id))
}

/// Mount the image, copy the first `.app` bundle at its root into `dest_dir`,
/// and detach the mount whether or not the copy succeeded.
#[cfg(target_os = "macos")]
fn extract_dmg(archive: &Path, dest_dir: &Path, trace_id: &str) -> Result<(), AppError> {
    use crate::app::adb::runner::run_checked;
    use std::path::PathBuf;

    let attach = run_checked(
        "hdiutil",
        &[
            "attach".to_string(),
            "-nobrowse".to_string(),
            "-readonly".to_string(),
            archive.to_string_lossy().to_string(),
        ],
        trace_id,
    )?;
    let mount_point = attach
        .stdout
        .lines()
        .filter_map(|line| line.split('\t').map(str::trim).find(|field| field.starts_with("/Volumes/")))
        .last()
        .map(PathBuf::from)
        .ok_or_else(|| AppError::dependency("hdiutil reported no mount point", trace_id))?;

    let copy_result = copy_first_bundle(&mount_point, dest_dir, trace_id);

    let detach = run_checked(
        "hdiutil",
        &[
            "detach".to_string(),
            mount_point.to_string_lossy().to_string(),
            "-force".to_string(),
        ],
        trace_id,
    );
    if let Err(err) = detach {
        warn!(trace_id = %trace_id, mount = %mount_point.display(), error = %err, "failed to detach disk image");
    }

    copy_result
}

#[cfg(not(target_os = "macos"))]
fn extract_dmg(_archive: &Path, _dest_dir: &Path, trace_id: &str) -> Result<(), AppError> {
    Err(AppError::validation(
        "Disk images are only supported on macOS",
        trace_id,
    ))
}

#[cfg(target_os = "macos")]
fn copy_first_bundle(mount_point: &Path, dest_dir: &Path, trace_id: &str) -> Result<(), AppError> {
    let entries = fs::read_dir(mount_point).map_err(|err| {
        AppError::system(format!("Failed to list {}: {err}", mount_point.display()), trace_id)
    })?;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_bundle = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("app"))
            .unwrap_or(false);
        if is_bundle && path.is_dir() {
            let target = dest_dir.join(entry.file_name());
            copy_dir_recursive(&path, &target, trace_id)?;
            return Ok(());
        }
    }
    Err(AppError::dependency(
        "Disk image contains no application bundle",
        trace_id,
    ))
}

#[cfg(target_os = "macos")]
fn copy_dir_recursive(source: &Path, dest: &Path, trace_id: &str) -> Result<(), AppError> {
    fs::create_dir_all(dest).map_err(|err| {
        AppError::system(format!("Failed to create {}: {err}", dest.display()), trace_id)
    })?;
    let entries = fs::read_dir(source).map_err(|err| {
        AppError::system(format!("Failed to list {}: {err}", source.display()), trace_id)
    })?;
    for entry in entries.flatten() {
        let from = entry.path();
        let to = dest.join(entry.file_name());
        if from.is_dir() {
            copy_dir_recursive(&from, &to, trace_id)?;
        } else {
            fs::copy(&from, &to).map_err(|err| {
                AppError::system(format!("Failed to copy {}: {err}", from.display()), trace_id)
            })?;
        }
    }
    Ok(())
}

/// Non-Windows: flip the executable bit on a freshly extracted binary.
/// Bundle installs keep whatever permissions the image carried.
pub fn mark_executable(path: &Path, trace_id: &str) -> Result<(), AppError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let metadata = fs::metadata(path).map_err(|err| {
            AppError::system(format!("Failed to stat {}: {err}", path.display()), trace_id)
        })?;
        let mut permissions = metadata.permissions();
        permissions.set_mode(permissions.mode() | 0o755);
        fs::set_permissions(path, permissions).map_err(|err| {
            AppError::system(format!("Failed to chmod {}: {err}", path.display()), trace_id)
        })?;
    }
    #[cfg(not(unix))]
    {
        let _ = (path, trace_id);
    }
    Ok(())
}
