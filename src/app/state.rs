use std::sync::Arc;

use tracing::info;

use crate::app::adb::logcat::LogcatRegistry;
use crate::app::adb::mirror::MirrorRegistry;
use crate::app::adb::recording::RecordingRegistry;
use crate::app::devtools::DevToolRegistry;
use crate::app::process::HandleAllocator;

/// Shared handle to every supervised child process. Each sub-supervisor keeps
/// its own keying scheme; `shutdown` is the single sweep that kills them all.
pub struct AppState {
    pub logcat: LogcatRegistry,
    pub recordings: RecordingRegistry,
    pub mirrors: MirrorRegistry,
    pub dev_tools: Arc<DevToolRegistry>,
    pub mirror_handles: HandleAllocator,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            logcat: LogcatRegistry::new(),
            recordings: RecordingRegistry::new(),
            mirrors: MirrorRegistry::new(),
            dev_tools: Arc::new(DevToolRegistry::new()),
            mirror_handles: HandleAllocator::new(),
        }
    }

    /// Kill everything still tracked. Called once when the application exits;
    /// any recording still running loses its capture.
    pub fn shutdown(&self) {
        let killed = self.logcat.kill_all()
            + self.recordings.kill_all()
            + self.mirrors.kill_all()
            + self.dev_tools.kill_all();
        if killed > 0 {
            info!(killed, "terminated tracked processes on shutdown");
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::app::adb::logcat::LogcatHandle;
    use crate::app::adb::mirror::MirrorHandle;
    use crate::app::devtools::DevToolHandle;
    use std::process::{Command, Stdio};
    use std::sync::atomic::AtomicBool;

    fn sleeper() -> std::process::Child {
        Command::new("sh")
            .args(["-c", "sleep 5"])
            .stdout(Stdio::null())
            .spawn()
            .expect("spawn")
    }

    #[test]
    fn shutdown_sweeps_every_registry() {
        let state = AppState::new();
        state
            .logcat
            .insert(
                "serial-a".to_string(),
                LogcatHandle {
                    child: sleeper(),
                    stop_flag: Arc::new(AtomicBool::new(false)),
                },
                "test-trace",
            )
            .expect("insert logcat");
        state
            .mirrors
            .insert(
                state.mirror_handles.allocate(),
                MirrorHandle {
                    child: sleeper(),
                    serial: "serial-a".to_string(),
                },
                "test-trace",
            )
            .expect("insert mirror");
        state
            .dev_tools
            .insert(
                "jadx".to_string(),
                DevToolHandle { child: sleeper() },
                "test-trace",
            )
            .expect("insert dev tool");

        state.shutdown();
        assert!(state.logcat.is_empty("test-trace").expect("logcat"));
        assert!(state.mirrors.is_empty("test-trace").expect("mirrors"));
        assert!(state.dev_tools.is_empty("test-trace").expect("dev tools"));
        assert!(state.recordings.is_empty("test-trace").expect("recordings"));
    }
}
