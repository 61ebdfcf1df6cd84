use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{info, warn};

use crate::app::adb::runner::{run_checked, run_command};
use crate::app::config::ScreenRecordSettings;
use crate::app::error::AppError;
use crate::app::process::{ManagedProcess, ProcessRegistry};

pub type RecordingRegistry = ProcessRegistry<String, RecordingHandle>;

/// The remote output path is part of the handle: stop needs it to retrieve
/// the finished capture.
pub struct RecordingHandle {
    pub child: Child,
    pub remote_path: String,
}

impl ManagedProcess for RecordingHandle {
    fn terminate(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// screenrecord needs a moment after SIGINT to write the MP4 moov atom.
const FINALIZE_SETTLE: Duration = Duration::from_millis(1000);
const STOP_WAIT: Duration = Duration::from_secs(5);

pub fn build_screenrecord_args(
    serial: &str,
    settings: &ScreenRecordSettings,
    remote_path: &str,
) -> Vec<String> {
    let mut args = vec![
        "-s".to_string(),
        serial.to_string(),
        "shell".to_string(),
        "screenrecord".to_string(),
    ];
    if !settings.bit_rate.trim().is_empty() {
        args.push("--bit-rate".to_string());
        args.push(settings.bit_rate.trim().to_string());
    }
    if settings.time_limit_sec > 0 {
        args.push("--time-limit".to_string());
        args.push(settings.time_limit_sec.to_string());
    }
    if !settings.size.trim().is_empty() {
        args.push("--size".to_string());
        args.push(settings.size.trim().to_string());
    }
    if !settings.extra_args.trim().is_empty() {
        args.extend(settings.extra_args.split_whitespace().map(|item| item.to_string()));
    }
    args.push(remote_path.to_string());
    args
}

pub fn remote_recording_path(serial: &str) -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    format!("/sdcard/screenrecord_{serial}_{timestamp}.mp4")
}

/// Start capturing a device's screen to a device-local temporary file.
/// Returns the remote path the capture is writing to.
pub fn start_screen_record(
    registry: &RecordingRegistry,
    adb_program: &str,
    serial: &str,
    settings: &ScreenRecordSettings,
    trace_id: &str,
) -> Result<String, AppError> {
    let program = adb_program.to_string();
    let args = build_screenrecord_args(serial, settings, &remote_recording_path(serial));
    start_screen_record_with_spawner(registry, serial, args, trace_id, move |args, trace_id| {
        Command::new(&program)
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| {
                AppError::dependency(format!("Failed to start screenrecord: {err}"), trace_id)
            })
    })
}

pub fn start_screen_record_with_spawner(
    registry: &RecordingRegistry,
    serial: &str,
    args: Vec<String>,
    trace_id: &str,
    spawner: impl FnOnce(&[String], &str) -> Result<Child, AppError>,
) -> Result<String, AppError> {
    if serial.trim().is_empty() {
        return Err(AppError::validation("serial is required", trace_id));
    }
    if registry.contains(&serial.to_string(), trace_id)? {
        return Err(AppError::validation("Recording already active", trace_id));
    }
    let remote_path = args
        .last()
        .cloned()
        .ok_or_else(|| AppError::system("screenrecord args missing output path", trace_id))?;

    let child = spawner(&args, trace_id)?;
    registry.insert(
        serial.to_string(),
        RecordingHandle {
            child,
            remote_path: remote_path.clone(),
        },
        trace_id,
    )?;
    info!(trace_id = %trace_id, serial = %serial, remote = %remote_path, "screen recording started");
    Ok(remote_path)
}

/// Stop the capture for a device, wait for it to finalize, pull the file to
/// `output_dir`, and delete the remote copy. Unlike logcat/mirror stops this
/// is an error when nothing is recording: without a tracked handle there is
/// no remote path to retrieve.
pub fn stop_screen_record(
    registry: &RecordingRegistry,
    adb_program: &str,
    serial: &str,
    output_dir: &str,
    trace_id: &str,
) -> Result<PathBuf, AppError> {
    if serial.trim().is_empty() {
        return Err(AppError::validation("serial is required", trace_id));
    }
    let handle = registry
        .remove(&serial.to_string(), trace_id)?
        .ok_or_else(|| AppError::validation("No recording in progress", trace_id))?;
    let mut child = handle.child;

    // Interrupt rather than kill so screenrecord can close the file cleanly.
    let _ = run_command(
        adb_program,
        &[
            "-s".to_string(),
            serial.to_string(),
            "shell".to_string(),
            "pkill".to_string(),
            "-SIGINT".to_string(),
            "screenrecord".to_string(),
        ],
        trace_id,
    );

    let started = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(_)) => break,
            Ok(None) => {
                if started.elapsed() >= STOP_WAIT {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(AppError::system("Timeout waiting for screenrecord", trace_id));
                }
                std::thread::sleep(Duration::from_millis(100));
            }
            Err(err) => {
                return Err(AppError::system(
                    format!("Failed to stop screenrecord: {err}"),
                    trace_id,
                ));
            }
        }
    }
    std::thread::sleep(FINALIZE_SETTLE);

    std::fs::create_dir_all(output_dir).map_err(|err| {
        AppError::system(format!("Failed to create output dir: {err}"), trace_id)
    })?;
    let filename = PathBuf::from(&handle.remote_path)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| format!("screenrecord_{serial}.mp4"));
    let local_path = PathBuf::from(output_dir).join(filename);

    run_checked(
        adb_program,
        &[
            "-s".to_string(),
            serial.to_string(),
            "pull".to_string(),
            handle.remote_path.clone(),
            local_path.to_string_lossy().to_string(),
        ],
        trace_id,
    )?;

    // The device-side temp file has served its purpose.
    if let Err(err) = run_checked(
        adb_program,
        &[
            "-s".to_string(),
            serial.to_string(),
            "shell".to_string(),
            "rm".to_string(),
            "-f".to_string(),
            handle.remote_path.clone(),
        ],
        trace_id,
    ) {
        warn!(trace_id = %trace_id, remote = %handle.remote_path, error = %err, "failed to delete remote recording");
    }

    info!(trace_id = %trace_id, serial = %serial, local = %local_path.display(), "screen recording retrieved");
    Ok(local_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_without_recording_is_an_error() {
        let registry = RecordingRegistry::new();
        let err = stop_screen_record(&registry, "adb", "device-a", "/tmp", "test-trace")
            .expect_err("expected no-recording error");
        assert_eq!(err.code, "ERR_VALIDATION");
        assert!(err.error.contains("No recording in progress"));
    }

    #[cfg(unix)]
    #[test]
    fn start_twice_for_same_device_is_rejected() {
        let registry = RecordingRegistry::new();
        let spawner = |_: &[String], trace_id: &str| {
            Command::new("sh")
                .args(["-c", "sleep 5"])
                .stdout(Stdio::null())
                .spawn()
                .map_err(|err| AppError::system(format!("spawn failed: {err}"), trace_id))
        };
        let args = build_screenrecord_args(
            "device-a",
            &ScreenRecordSettings::default(),
            "/sdcard/rec.mp4",
        );

        let remote =
            start_screen_record_with_spawner(&registry, "device-a", args.clone(), "test-trace", spawner)
                .expect("first start");
        assert_eq!(remote, "/sdcard/rec.mp4");

        let err =
            start_screen_record_with_spawner(&registry, "device-a", args, "test-trace", spawner)
                .expect_err("expected duplicate error");
        assert!(err.error.contains("Recording already active"));
        assert_eq!(registry.len("test-trace").expect("len"), 1);
        assert_eq!(registry.kill_all(), 1);
    }

    #[test]
    fn screenrecord_args_carry_settings_and_output() {
        let settings = ScreenRecordSettings {
            bit_rate: "4M".to_string(),
            time_limit_sec: 30,
            size: "1280x720".to_string(),
            extra_args: "--verbose".to_string(),
        };
        let args = build_screenrecord_args("device-a", &settings, "/sdcard/out.mp4");
        assert_eq!(args[..4], ["-s", "device-a", "shell", "screenrecord"]);
        assert!(args.contains(&"--bit-rate".to_string()));
        assert!(args.contains(&"--time-limit".to_string()));
        assert!(args.contains(&"--size".to_string()));
        assert!(args.contains(&"--verbose".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("/sdcard/out.mp4"));
    }

    #[test]
    fn remote_path_is_device_and_time_stamped() {
        let path = remote_recording_path("emulator-5554");
        assert!(path.starts_with("/sdcard/screenrecord_emulator-5554_"));
        assert!(path.ends_with(".mp4"));
    }
}
