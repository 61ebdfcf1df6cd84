use serde::{Deserialize, Serialize};

/// Host OS tag, using the key names the tool catalog's URL maps are written in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum HostOs {
    Win32,
    Darwin,
    Linux,
}

impl HostOs {
    pub fn key(&self) -> &'static str {
        match self {
            HostOs::Win32 => "win32",
            HostOs::Darwin => "darwin",
            HostOs::Linux => "linux",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum HostArch {
    X64,
    Arm64,
}

impl HostArch {
    pub fn key(&self) -> &'static str {
        match self {
            HostArch::X64 => "x64",
            HostArch::Arm64 => "arm64",
        }
    }
}

/// Explicit platform value passed into path resolution and downloads instead
/// of reading ambient environment state, so every OS/arch combination is
/// testable on any host.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PlatformTarget {
    pub os: HostOs,
    pub arch: HostArch,
}

impl PlatformTarget {
    pub fn new(os: HostOs, arch: HostArch) -> Self {
        Self { os, arch }
    }

    pub fn current() -> Self {
        let os = match std::env::consts::OS {
            "windows" => HostOs::Win32,
            "macos" => HostOs::Darwin,
            _ => HostOs::Linux,
        };
        let arch = match std::env::consts::ARCH {
            "aarch64" => HostArch::Arm64,
            _ => HostArch::X64,
        };
        Self { os, arch }
    }

    pub fn is_windows(&self) -> bool {
        self.os == HostOs::Win32
    }
}

/// Ordered URL-map keys for a target: `os_arch` first, then bare `os`, then
/// the architecture-independent `all`. First key present in the map wins.
pub fn candidate_url_keys(target: PlatformTarget) -> [String; 3] {
    [
        format!("{}_{}", target.os.key(), target.arch.key()),
        target.os.key().to_string(),
        "all".to_string(),
    ]
}

/// Resolve a download URL from a catalog URL map for the given target.
pub fn select_url<'a>(urls: &'a [(&'a str, &'a str)], target: PlatformTarget) -> Option<&'a str> {
    let candidates = candidate_url_keys(target);
    for candidate in &candidates {
        if let Some((_, url)) = urls.iter().find(|(key, _)| *key == candidate.as_str()) {
            return Some(url);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const URLS: &[(&str, &str)] = &[
        ("darwin_arm64", "https://example.com/macos-arm64.tar.gz"),
        ("darwin", "https://example.com/macos.tar.gz"),
        ("win32", "https://example.com/windows.zip"),
    ];

    #[test]
    fn exact_os_arch_key_wins() {
        let target = PlatformTarget::new(HostOs::Darwin, HostArch::Arm64);
        assert_eq!(
            select_url(URLS, target),
            Some("https://example.com/macos-arm64.tar.gz")
        );
    }

    #[test]
    fn falls_back_to_bare_os_key() {
        let target = PlatformTarget::new(HostOs::Darwin, HostArch::X64);
        assert_eq!(select_url(URLS, target), Some("https://example.com/macos.tar.gz"));
    }

    #[test]
    fn falls_back_to_all_key() {
        let urls = &[("all", "https://example.com/tool.jar")];
        let target = PlatformTarget::new(HostOs::Linux, HostArch::X64);
        assert_eq!(select_url(urls, target), Some("https://example.com/tool.jar"));
    }

    #[test]
    fn missing_platform_yields_none() {
        let target = PlatformTarget::new(HostOs::Linux, HostArch::Arm64);
        assert_eq!(select_url(URLS, target), None);
    }

    #[test]
    fn candidate_keys_are_ordered_most_specific_first() {
        let keys = candidate_url_keys(PlatformTarget::new(HostOs::Win32, HostArch::X64));
        assert_eq!(keys, ["win32_x64".to_string(), "win32".to_string(), "all".to_string()]);
    }
}
