use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use regex::Regex;
use tracing::{debug, warn};

use crate::app::adb::runner::run_checked;
use crate::app::error::AppError;
use crate::app::models::{LogEntry, LogcatFilters};
use crate::app::process::{ManagedProcess, ProcessRegistry};

pub type LogcatSink = Arc<dyn Fn(LogEntry) + Send + Sync>;
pub type LogcatRegistry = ProcessRegistry<String, LogcatHandle>;

pub struct LogcatHandle {
    pub child: Child,
    pub stop_flag: Arc<AtomicBool>,
}

impl ManagedProcess for LogcatHandle {
    fn terminate(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// `adb -s <serial> logcat -v threadtime`, with tag filtering pushed down to
/// logcat itself as a `TAG:V *:S` spec.
pub fn logcat_args(serial: &str, filters: &LogcatFilters) -> Vec<String> {
    let mut args = vec![
        "-s".to_string(),
        serial.to_string(),
        "logcat".to_string(),
        "-v".to_string(),
        "threadtime".to_string(),
    ];
    if let Some(tag) = filters.tag.as_deref().map(str::trim).filter(|tag| !tag.is_empty()) {
        args.push(format!("{tag}:V"));
        args.push("*:S".to_string());
    }
    args
}

/// Start streaming a device's log. A stream already running for the serial is
/// stopped first: the device identifier is the handle, so at most one stream
/// per device is representable.
pub fn start_logcat_stream(
    registry: &LogcatRegistry,
    adb_program: &str,
    serial: String,
    filters: LogcatFilters,
    sink: LogcatSink,
    trace_id: &str,
) -> Result<(), AppError> {
    let program = adb_program.to_string();
    start_logcat_with_spawner(registry, serial, filters, sink, trace_id, move |args, trace_id| {
        Command::new(&program)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| {
                AppError::dependency(format!("Failed to start logcat: {err}"), trace_id)
            })
    })
}

pub fn start_logcat_with_spawner(
    registry: &LogcatRegistry,
    serial: String,
    filters: LogcatFilters,
    sink: LogcatSink,
    trace_id: &str,
    spawner: impl FnOnce(&[String], &str) -> Result<Child, AppError>,
) -> Result<(), AppError> {
    if serial.trim().is_empty() {
        return Err(AppError::validation("serial is required", trace_id));
    }

    // Last writer wins: replace any existing stream for this device.
    if let Some(mut existing) = registry.remove(&serial, trace_id)? {
        debug!(trace_id = %trace_id, serial = %serial, "replacing existing logcat stream");
        existing.terminate();
    }

    let args = logcat_args(&serial, &filters);
    let mut child = spawner(&args, trace_id)?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::system("Failed to capture logcat stdout", trace_id))?;

    let stop_flag = Arc::new(AtomicBool::new(false));
    let reader_stop = Arc::clone(&stop_flag);
    let reader_trace = trace_id.to_string();
    std::thread::spawn(move || {
        let pattern = logcat_regex();
        let reader = BufReader::new(stdout);
        for line in reader.lines() {
            if reader_stop.load(Ordering::Relaxed) {
                break;
            }
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    warn!(trace_id = %reader_trace, error = %err, "failed to read logcat stdout");
                    break;
                }
            };
            // Malformed lines are dropped, never forwarded, never fatal.
            let Some(entry) = parse_logcat_line(&line, &pattern) else {
                continue;
            };
            if entry_passes_filters(&entry, &filters) {
                sink(entry);
            }
        }
    });

    registry.insert(serial, LogcatHandle { child, stop_flag }, trace_id)?;
    Ok(())
}

/// Stop the stream for a device. Safe to call when nothing is running;
/// returns whether a stream was actually stopped.
pub fn stop_logcat_stream(
    registry: &LogcatRegistry,
    serial: &str,
    trace_id: &str,
) -> Result<bool, AppError> {
    match registry.remove(&serial.to_string(), trace_id)? {
        Some(mut handle) => {
            handle.terminate();
            Ok(true)
        }
        None => Ok(false),
    }
}

pub fn clear_logcat(adb_program: &str, serial: &str, trace_id: &str) -> Result<(), AppError> {
    if serial.trim().is_empty() {
        return Err(AppError::validation("serial is required", trace_id));
    }
    let args = vec![
        "-s".to_string(),
        serial.to_string(),
        "logcat".to_string(),
        "-c".to_string(),
    ];
    run_checked(adb_program, &args, trace_id).map(|_| ())
}

/// Severity floor compares single-letter codes lexically, matching the
/// filtering the UI has always shown (F sorts below W, so Fatal entries do
/// not pass a Warning floor).
pub fn entry_passes_filters(entry: &LogEntry, filters: &LogcatFilters) -> bool {
    if let Some(min_level) = filters.min_level.as_deref().map(str::trim) {
        if !min_level.is_empty() && entry.level.as_str() < min_level {
            return false;
        }
    }
    if let Some(text) = filters.text.as_deref().map(str::trim) {
        if !text.is_empty() && !entry.message.contains(text) {
            return false;
        }
    }
    true
}

pub fn parse_logcat_line(line: &str, pattern: &Regex) -> Option<LogEntry> {
    let caps = pattern.captures(line)?;
    Some(LogEntry {
        timestamp: format!("{} {}", &caps["date"], &caps["time"]),
        pid: caps["pid"].parse().unwrap_or(0),
        tid: caps["tid"].parse().unwrap_or(0),
        level: caps["level"].to_string(),
        tag: caps["tag"].trim().to_string(),
        message: caps["msg"].to_string(),
    })
}

pub fn logcat_regex() -> Regex {
    Regex::new(
        r"^(?P<date>\d{2}-\d{2})\s+(?P<time>\d{2}:\d{2}:\d{2}\.\d{3})\s+(?:\S+\s+)?(?P<pid>\d+)\s+(?P<tid>\d+)\s+(?P<level>[VDIWEF])\s+(?P<tag>[^:]+):\s(?P<msg>.*)$",
    )
    .expect("logcat regex should compile")
}
