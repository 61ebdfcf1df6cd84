use std::process::{Child, Command, Stdio};

use tracing::info;

use crate::app::adb::scrcpy::build_mirror_args;
use crate::app::config::ScrcpySettings;
use crate::app::error::AppError;
use crate::app::process::{HandleAllocator, ManagedProcess, ProcessRegistry};

pub type MirrorRegistry = ProcessRegistry<u64, MirrorHandle>;

pub struct MirrorHandle {
    pub child: Child,
    pub serial: String,
}

impl ManagedProcess for MirrorHandle {
    fn terminate(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Spawn a mirroring window for a device and return a fresh opaque handle.
/// Every call gets its own process and its own handle.
pub fn start_mirror(
    registry: &MirrorRegistry,
    handles: &HandleAllocator,
    scrcpy_program: &str,
    serial: &str,
    settings: &ScrcpySettings,
    major_version: i32,
    trace_id: &str,
) -> Result<u64, AppError> {
    let program = scrcpy_program.to_string();
    start_mirror_with_spawner(
        registry,
        handles,
        serial,
        trace_id,
        move |args, trace_id| {
            Command::new(&program)
                .args(args)
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
                .map_err(|err| {
                    AppError::dependency(format!("Failed to start scrcpy: {err}"), trace_id)
                })
        },
        &build_mirror_args(serial, settings, major_version),
    )
}

pub fn start_mirror_with_spawner(
    registry: &MirrorRegistry,
    handles: &HandleAllocator,
    serial: &str,
    trace_id: &str,
    spawner: impl FnOnce(&[String], &str) -> Result<Child, AppError>,
    args: &[String],
) -> Result<u64, AppError> {
    if serial.trim().is_empty() {
        return Err(AppError::validation("serial is required", trace_id));
    }
    let child = spawner(args, trace_id)?;
    let handle = handles.allocate();
    registry.insert(
        handle,
        MirrorHandle {
            child,
            serial: serial.to_string(),
        },
        trace_id,
    )?;
    info!(trace_id = %trace_id, serial = %serial, handle, "mirror started");
    Ok(handle)
}

/// Stop one mirror window. Safe to call for unknown handles; returns whether
/// anything was stopped.
pub fn stop_mirror(registry: &MirrorRegistry, handle: u64, trace_id: &str) -> Result<bool, AppError> {
    match registry.remove(&handle, trace_id)? {
        Some(mut tracked) => {
            tracked.terminate();
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Liveness by handle. A mirror observed to have exited is dropped from
/// tracking on the spot.
pub fn is_mirror_running(
    registry: &MirrorRegistry,
    handle: u64,
    trace_id: &str,
) -> Result<bool, AppError> {
    let exited = registry.with_mut(&handle, trace_id, |tracked| {
        matches!(tracked.child.try_wait(), Ok(Some(_)) | Err(_))
    })?;
    match exited {
        None => Ok(false),
        Some(false) => Ok(true),
        Some(true) => {
            let _ = registry.remove(&handle, trace_id)?;
            Ok(false)
        }
    }
}

/// Shutdown sweep: kill every tracked mirror unconditionally.
pub fn stop_all_mirrors(registry: &MirrorRegistry) -> usize {
    registry.kill_all()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn spawn_shell(command: &'static str) -> impl FnOnce(&[String], &str) -> Result<Child, AppError> {
        move |_args, trace_id| {
            Command::new("sh")
                .args(["-c", command])
                .stdout(Stdio::null())
                .spawn()
                .map_err(|err| AppError::system(format!("spawn failed: {err}"), trace_id))
        }
    }

    fn start(registry: &MirrorRegistry, handles: &HandleAllocator, command: &'static str) -> u64 {
        start_mirror_with_spawner(
            registry,
            handles,
            "device-a",
            "test-trace",
            spawn_shell(command),
            &[],
        )
        .expect("start")
    }

    #[test]
    fn handles_are_fresh_per_start() {
        let registry = MirrorRegistry::new();
        let handles = HandleAllocator::new();
        let first = start(&registry, &handles, "sleep 5");
        let second = start(&registry, &handles, "sleep 5");
        assert!(second > first);
        assert_eq!(registry.len("test-trace").expect("len"), 2);

        assert!(is_mirror_running(&registry, first, "test-trace").expect("running"));
        assert!(stop_mirror(&registry, first, "test-trace").expect("stop"));
        assert!(stop_mirror(&registry, second, "test-trace").expect("stop"));
    }

    #[test]
    fn stop_unknown_handle_is_a_no_op() {
        let registry = MirrorRegistry::new();
        assert!(!stop_mirror(&registry, 42, "test-trace").expect("no-op"));
        assert_eq!(registry.len("test-trace").expect("len"), 0);
    }

    #[test]
    fn exited_mirror_vanishes_from_tracking() {
        let registry = MirrorRegistry::new();
        let handles = HandleAllocator::new();
        let handle = start(&registry, &handles, "true");

        // Give the short-lived child time to exit.
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        loop {
            if !is_mirror_running(&registry, handle, "test-trace").expect("probe") {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "child never exited");
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        assert_eq!(registry.len("test-trace").expect("len"), 0);
    }

    #[test]
    fn stop_all_kills_every_tracked_mirror() {
        let registry = MirrorRegistry::new();
        let handles = HandleAllocator::new();
        start(&registry, &handles, "sleep 5");
        start(&registry, &handles, "sleep 5");
        start(&registry, &handles, "sleep 5");

        assert_eq!(stop_all_mirrors(&registry), 3);
        assert_eq!(registry.len("test-trace").expect("len"), 0);
    }
}
