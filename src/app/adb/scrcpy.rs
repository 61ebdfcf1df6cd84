use std::process::Command;

use crate::app::config::ScrcpySettings;

pub struct ScrcpyAvailability {
    pub available: bool,
    pub version_output: String,
    pub major_version: i32,
    pub command_path: String,
}

/// Probe a resolved scrcpy executable (managed install or PATH fallback) for
/// availability and version. Flag behaviour changed across major versions,
/// so the probe result feeds `build_mirror_args`.
pub fn check_scrcpy_availability(program: &str) -> ScrcpyAvailability {
    let mut result = ScrcpyAvailability {
        available: false,
        version_output: String::new(),
        major_version: 2,
        command_path: program.to_string(),
    };
    if let Some(output) = try_version(program) {
        result.available = true;
        result.major_version = parse_scrcpy_major(&output);
        result.version_output = output;
    }
    result
}

pub fn build_mirror_args(
    serial: &str,
    settings: &ScrcpySettings,
    major_version: i32,
) -> Vec<String> {
    let mut args = vec!["-s".to_string(), serial.to_string()];
    let audio_mode = if major_version >= 3 {
        AudioFlagMode::NoAudioOnly
    } else if major_version >= 2 {
        AudioFlagMode::AudioToggle
    } else {
        AudioFlagMode::Unsupported
    };
    if settings.stay_awake {
        args.push("--stay-awake".to_string());
    }
    if settings.turn_screen_off {
        args.push("--turn-screen-off".to_string());
    }
    if settings.disable_screensaver {
        args.push("--disable-screensaver".to_string());
    }
    match audio_mode {
        AudioFlagMode::AudioToggle => {
            if settings.enable_audio_playback {
                args.push("--audio".to_string());
            } else {
                args.push("--no-audio".to_string());
            }
        }
        AudioFlagMode::NoAudioOnly => {
            if !settings.enable_audio_playback {
                args.push("--no-audio".to_string());
            }
        }
        AudioFlagMode::Unsupported => {}
    }
    if !settings.bitrate.trim().is_empty() {
        args.push("--bit-rate".to_string());
        args.push(settings.bitrate.trim().to_string());
    }
    if settings.max_size > 0 {
        args.push("--max-size".to_string());
        args.push(settings.max_size.to_string());
    }
    if !settings.extra_args.trim().is_empty() {
        args.extend(settings.extra_args.split_whitespace().map(|s| s.to_string()));
    }
    args
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum AudioFlagMode {
    AudioToggle,
    NoAudioOnly,
    Unsupported,
}

fn try_version(command: &str) -> Option<String> {
    let output = Command::new(command).arg("--version").output().ok()?;
    if output.status.success() {
        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        None
    }
}

fn parse_scrcpy_major(output: &str) -> i32 {
    let lower = output.to_lowercase();
    for token in lower.split_whitespace() {
        if token.starts_with("scrcpy") {
            let version = token.trim_start_matches("scrcpy");
            if let Some(version) = version.strip_prefix("v") {
                if let Some(major) = version.split('.').next() {
                    if let Ok(value) = major.parse::<i32>() {
                        return value;
                    }
                }
            }
        }
        if let Some(major) = token.split('.').next() {
            if let Ok(value) = major.parse::<i32>() {
                return value;
            }
        }
    }
    2
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_settings() -> ScrcpySettings {
        ScrcpySettings {
            stay_awake: false,
            turn_screen_off: false,
            disable_screensaver: false,
            enable_audio_playback: true,
            bitrate: String::new(),
            max_size: 0,
            extra_args: String::new(),
        }
    }

    fn has_flag(args: &[String], flag: &str) -> bool {
        args.iter().any(|item| item == flag)
    }

    #[test]
    fn major3_enabled_audio_needs_no_flag() {
        let args = build_mirror_args("device", &base_settings(), 3);
        assert!(!has_flag(&args, "--audio"));
        assert!(!has_flag(&args, "--no-audio"));
    }

    #[test]
    fn major3_disabled_audio_adds_no_audio() {
        let mut settings = base_settings();
        settings.enable_audio_playback = false;
        let args = build_mirror_args("device", &settings, 3);
        assert!(has_flag(&args, "--no-audio"));
    }

    #[test]
    fn major2_toggles_audio_flag_both_ways() {
        let mut settings = base_settings();
        assert!(has_flag(&build_mirror_args("device", &settings, 2), "--audio"));
        settings.enable_audio_playback = false;
        assert!(has_flag(&build_mirror_args("device", &settings, 2), "--no-audio"));
    }

    #[test]
    fn major1_ignores_audio_flags() {
        let args = build_mirror_args("device", &base_settings(), 1);
        assert!(!has_flag(&args, "--audio"));
        assert!(!has_flag(&args, "--no-audio"));
    }

    #[test]
    fn serial_and_tuning_flags_are_passed_through() {
        let mut settings = base_settings();
        settings.bitrate = "8M".to_string();
        settings.max_size = 1280;
        settings.extra_args = "--always-on-top".to_string();
        let args = build_mirror_args("device-1", &settings, 2);
        assert_eq!(args[0], "-s");
        assert_eq!(args[1], "device-1");
        assert!(has_flag(&args, "--bit-rate"));
        assert!(has_flag(&args, "--max-size"));
        assert!(has_flag(&args, "--always-on-top"));
    }

    #[test]
    fn parses_major_from_version_banner() {
        assert_eq!(parse_scrcpy_major("scrcpy 3.1 <https://github.com/Genymobile/scrcpy>"), 3);
        assert_eq!(parse_scrcpy_major("scrcpy v2.4"), 2);
        assert_eq!(parse_scrcpy_major("unintelligible"), 2);
    }
}
