//! Build kind detection

use std::fmt;

use camino::Utf8Path;

/// Executable a package may ship to drive its own build
pub const BUILD_SCRIPT: &str = "build_package";

const MAKEFILES: &[&str] = &["Makefile", "GNUmakefile", "GNUMakefile"];

/// How a package is built
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildKind {
    /// The package's own `build_package` script
    Script,
    CMake,
    Make,
    /// No recognized build entry point
    Unknown,
}

impl fmt::Display for BuildKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildKind::Script => "script",
            BuildKind::CMake => "cmake",
            BuildKind::Make => "make",
            BuildKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Filesystem capabilities needed to classify a package
pub trait PackageProbe {
    fn is_executable(&self, path: &Utf8Path) -> bool;
    fn is_file(&self, path: &Utf8Path) -> bool;

    /// Classify the package rooted at `source_dir`
    fn build_kind(&self, source_dir: &Utf8Path) -> BuildKind {
        if self.is_executable(&source_dir.join(BUILD_SCRIPT)) {
            BuildKind::Script
        } else if self.is_file(&source_dir.join("CMakeLists.txt")) {
            BuildKind::CMake
        } else if MAKEFILES
            .iter()
            .any(|name| self.is_file(&source_dir.join(name)))
        {
            BuildKind::Make
        } else {
            BuildKind::Unknown
        }
    }
}

/// Probe backed by the real filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FsProbe;

impl PackageProbe for FsProbe {
    #[cfg(unix)]
    fn is_executable(&self, path: &Utf8Path) -> bool {
        use std::os::unix::fs::PermissionsExt;
        path.metadata()
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }

    #[cfg(not(unix))]
    fn is_executable(&self, path: &Utf8Path) -> bool {
        path.is_file()
    }

    fn is_file(&self, path: &Utf8Path) -> bool {
        path.is_file()
    }
}
