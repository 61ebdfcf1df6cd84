use crate::app::platform::HostOs;

/// How a downloaded artifact is installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    /// Archive extracted into the tool's install directory.
    Archive,
    /// Single-file jar moved flat into `binaries/jars/`.
    Jar,
}

/// Where the tool's executable lives once installed.
#[derive(Debug, Clone, Copy)]
pub enum ExecutableSpec {
    /// Fixed path relative to `binaries/`.
    Fixed {
        unix: &'static str,
        windows: &'static str,
    },
    /// The archive expands into a version-stamped directory whose exact name
    /// is unknown ahead of time; scan children whose name contains `marker`
    /// and probe the per-OS relative path under each.
    VersionedScan {
        marker: &'static str,
        unix: &'static str,
        macos: &'static str,
        windows: &'static str,
    },
    /// The artifact itself (jar tools).
    SelfContained,
}

pub struct ToolDescriptor {
    pub id: &'static str,
    pub label: &'static str,
    pub version: &'static str,
    /// Ordered (key, url) pairs; keys are `os`, `os_arch`, or `all`.
    pub urls: &'static [(&'static str, &'static str)],
    /// Directory under `binaries/` the archive is extracted into. Empty when
    /// the archive already carries its own top-level directory.
    pub install_subdir: &'static str,
    pub executable: ExecutableSpec,
    pub kind: ToolKind,
    /// Name to try on PATH when no managed install exists.
    pub system_name: Option<&'static str>,
    /// Platforms whose OS image already ships the tool; no download needed.
    pub native_on: &'static [HostOs],
}

/// The compiled-in catalog of tools the app provisions. Order matters:
/// `download_missing` walks it front to back.
pub const TOOL_CATALOG: &[ToolDescriptor] = &[
    ToolDescriptor {
        id: "adb",
        label: "Android Platform Tools",
        version: "35.0.2",
        urls: &[
            (
                "win32",
                "https://dl.google.com/android/repository/platform-tools-latest-windows.zip",
            ),
            (
                "darwin",
                "https://dl.google.com/android/repository/platform-tools-latest-darwin.zip",
            ),
            (
                "linux",
                "https://dl.google.com/android/repository/platform-tools-latest-linux.zip",
            ),
        ],
        // The zip expands to a platform-tools/ directory of its own.
        install_subdir: "",
        executable: ExecutableSpec::Fixed {
            unix: "platform-tools/adb",
            windows: "platform-tools/adb.exe",
        },
        kind: ToolKind::Archive,
        system_name: Some("adb"),
        native_on: &[],
    },
    ToolDescriptor {
        id: "scrcpy",
        label: "scrcpy",
        version: "3.1",
        urls: &[
            (
                "win32",
                "https://github.com/Genymobile/scrcpy/releases/download/v3.1/scrcpy-win64-v3.1.zip",
            ),
            (
                "darwin_arm64",
                "https://github.com/Genymobile/scrcpy/releases/download/v3.1/scrcpy-macos-aarch64-v3.1.tar.gz",
            ),
            (
                "darwin",
                "https://github.com/Genymobile/scrcpy/releases/download/v3.1/scrcpy-macos-x86_64-v3.1.tar.gz",
            ),
            (
                "linux",
                "https://github.com/Genymobile/scrcpy/releases/download/v3.1/scrcpy-linux-x86_64-v3.1.tar.gz",
            ),
        ],
        install_subdir: "scrcpy",
        executable: ExecutableSpec::VersionedScan {
            marker: "scrcpy",
            unix: "scrcpy",
            macos: "scrcpy",
            windows: "scrcpy.exe",
        },
        kind: ToolKind::Archive,
        system_name: Some("scrcpy"),
        native_on: &[],
    },
    ToolDescriptor {
        id: "apktool",
        label: "Apktool",
        version: "2.9.3",
        urls: &[(
            "all",
            "https://bitbucket.org/iBotPeaches/apktool/downloads/apktool_2.9.3.jar",
        )],
        install_subdir: "jars",
        executable: ExecutableSpec::SelfContained,
        kind: ToolKind::Jar,
        system_name: None,
        native_on: &[],
    },
    ToolDescriptor {
        id: "uber-apk-signer",
        label: "Uber APK Signer",
        version: "1.3.0",
        urls: &[(
            "all",
            "https://github.com/patrickfav/uber-apk-signer/releases/download/v1.3.0/uber-apk-signer-1.3.0.jar",
        )],
        install_subdir: "jars",
        executable: ExecutableSpec::SelfContained,
        kind: ToolKind::Jar,
        system_name: None,
        native_on: &[],
    },
    ToolDescriptor {
        id: "jre",
        label: "Java Runtime",
        version: "17.0.11",
        urls: &[
            (
                "win32",
                "https://github.com/adoptium/temurin17-binaries/releases/download/jdk-17.0.11%2B9/OpenJDK17U-jre_x64_windows_hotspot_17.0.11_9.zip",
            ),
            (
                "darwin_arm64",
                "https://github.com/adoptium/temurin17-binaries/releases/download/jdk-17.0.11%2B9/OpenJDK17U-jre_aarch64_mac_hotspot_17.0.11_9.tar.gz",
            ),
            (
                "darwin",
                "https://github.com/adoptium/temurin17-binaries/releases/download/jdk-17.0.11%2B9/OpenJDK17U-jre_x64_mac_hotspot_17.0.11_9.tar.gz",
            ),
            (
                "linux",
                "https://github.com/adoptium/temurin17-binaries/releases/download/jdk-17.0.11%2B9/OpenJDK17U-jre_x64_linux_hotspot_17.0.11_9.tar.gz",
            ),
        ],
        install_subdir: "jre",
        executable: ExecutableSpec::VersionedScan {
            marker: "jdk",
            unix: "bin/java",
            macos: "Contents/Home/bin/java",
            windows: "bin/java.exe",
        },
        kind: ToolKind::Archive,
        // Most distros ship a usable JRE; fall back to it instead of downloading.
        system_name: Some("java"),
        native_on: &[HostOs::Linux],
    },
];

pub fn find_tool(id: &str) -> Option<&'static ToolDescriptor> {
    TOOL_CATALOG.iter().find(|tool| tool.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::binaries::extract::extract;
    use crate::app::binaries::paths::{install_dir, resolve_executable};
    use crate::app::platform::{select_url, HostArch, PlatformTarget};
    use std::fs::File;
    use std::io::Write;
    use std::path::Path;
    use tempfile::TempDir;

    #[test]
    fn catalog_ids_are_unique() {
        let mut ids: Vec<&str> = TOOL_CATALOG.iter().map(|tool| tool.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), TOOL_CATALOG.len());
    }

    #[test]
    fn every_tool_has_a_linux_url() {
        let target = PlatformTarget::new(HostOs::Linux, HostArch::X64);
        for tool in TOOL_CATALOG {
            assert!(
                select_url(tool.urls, target).is_some(),
                "tool {} has no linux url",
                tool.id
            );
        }
    }

    #[test]
    fn jar_tools_install_flat() {
        for tool in TOOL_CATALOG.iter().filter(|tool| tool.kind == ToolKind::Jar) {
            assert_eq!(tool.install_subdir, "jars");
            assert!(matches!(tool.executable, ExecutableSpec::SelfContained));
        }
    }

    #[test]
    fn find_tool_resolves_known_ids() {
        assert!(find_tool("adb").is_some());
        assert!(find_tool("nonexistent").is_none());
    }

    fn write_zip_fixture(path: &Path, entries: &[&str]) {
        let file = File::create(path).expect("create zip");
        let mut writer = zip::ZipWriter::new(file);
        for name in entries {
            writer
                .start_file(*name, zip::write::SimpleFileOptions::default())
                .expect("start entry");
            writer.write_all(b"binary").expect("write entry");
        }
        writer.finish().expect("finish zip");
    }

    fn write_tar_gz_fixture(path: &Path, entries: &[&str]) {
        let file = File::create(path).expect("create tar.gz");
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for name in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(6);
            header.set_mode(0o755);
            header.set_cksum();
            builder
                .append_data(&mut header, name, &b"binary"[..])
                .expect("append");
        }
        builder.into_inner().expect("finish tar").finish().expect("finish gz");
    }

    fn target(os: HostOs, arch: HostArch) -> PlatformTarget {
        PlatformTarget::new(os, arch)
    }

    /// Extract a fixture shaped like the tool's real archive and assert the
    /// executable spec finds the binary inside the data root (a PATH fallback
    /// hit would not satisfy `starts_with`).
    fn assert_resolves_from_archive(
        tool: &ToolDescriptor,
        root: &Path,
        archive_name: &str,
        entries: &[&str],
        target: PlatformTarget,
        expected_suffix: &str,
    ) {
        let archive = root.join(archive_name);
        if archive_name.ends_with(".zip") {
            write_zip_fixture(&archive, entries);
        } else {
            write_tar_gz_fixture(&archive, entries);
        }
        extract(&archive, &install_dir(root, tool), "test-trace").expect("extract");

        let resolved = resolve_executable(tool, target, root)
            .unwrap_or_else(|| panic!("{} did not resolve after extraction", tool.id));
        assert!(
            resolved.starts_with(root),
            "{} resolved outside the data root: {}",
            tool.id,
            resolved.display()
        );
        assert!(
            resolved.ends_with(expected_suffix),
            "{} resolved to {}",
            tool.id,
            resolved.display()
        );
    }

    #[test]
    fn adb_archive_layout_resolves_after_extract() {
        // Google's platform-tools zips carry a top-level platform-tools/ dir.
        let root = TempDir::new().expect("tmp");
        let adb = find_tool("adb").expect("catalog");
        assert_resolves_from_archive(
            adb,
            root.path(),
            "platform-tools-latest-linux.zip",
            &["platform-tools/adb", "platform-tools/fastboot"],
            target(HostOs::Linux, HostArch::X64),
            "binaries/platform-tools/adb",
        );

        let win_root = TempDir::new().expect("tmp");
        assert_resolves_from_archive(
            adb,
            win_root.path(),
            "platform-tools-latest-windows.zip",
            &["platform-tools/adb.exe", "platform-tools/AdbWinApi.dll"],
            target(HostOs::Win32, HostArch::X64),
            "binaries/platform-tools/adb.exe",
        );
    }

    #[test]
    fn scrcpy_archive_layout_resolves_after_extract() {
        let root = TempDir::new().expect("tmp");
        let scrcpy = find_tool("scrcpy").expect("catalog");
        assert_resolves_from_archive(
            scrcpy,
            root.path(),
            "scrcpy-linux-x86_64-v3.1.tar.gz",
            &["scrcpy-linux-x86_64-v3.1/scrcpy", "scrcpy-linux-x86_64-v3.1/scrcpy-server"],
            target(HostOs::Linux, HostArch::X64),
            "scrcpy-linux-x86_64-v3.1/scrcpy",
        );

        let win_root = TempDir::new().expect("tmp");
        assert_resolves_from_archive(
            scrcpy,
            win_root.path(),
            "scrcpy-win64-v3.1.zip",
            &["scrcpy-win64-v3.1/scrcpy.exe", "scrcpy-win64-v3.1/adb.exe"],
            target(HostOs::Win32, HostArch::X64),
            "scrcpy-win64-v3.1/scrcpy.exe",
        );
    }

    #[test]
    fn jre_archive_layout_resolves_after_extract() {
        let root = TempDir::new().expect("tmp");
        let jre = find_tool("jre").expect("catalog");
        assert_resolves_from_archive(
            jre,
            root.path(),
            "OpenJDK17U-jre_x64_linux_hotspot.tar.gz",
            &["jdk-17.0.11+9-jre/bin/java", "jdk-17.0.11+9-jre/lib/modules"],
            target(HostOs::Linux, HostArch::X64),
            "jdk-17.0.11+9-jre/bin/java",
        );

        let mac_root = TempDir::new().expect("tmp");
        assert_resolves_from_archive(
            jre,
            mac_root.path(),
            "OpenJDK17U-jre_aarch64_mac_hotspot.tar.gz",
            &["jdk-17.0.11+9-jre/Contents/Home/bin/java"],
            target(HostOs::Darwin, HostArch::Arm64),
            "Contents/Home/bin/java",
        );
    }
}
