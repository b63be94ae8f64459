//! Throw-away project trees
//!
//! A [`ProjectFixture`] owns a temporary project root laid out the way
//! buildcentral expects (`project/build/build_central.cfg`, the rule
//! directory rc file) and writes packages driven by `build_package` scripts.

use buildcentral::config::LoadOptions;
use buildcentral::project::Project;
use camino::{Utf8Path, Utf8PathBuf};
use serde_json::{Value, json};
use tempfile::TempDir;

/// Architecture id used as the host
pub const HOST: &str = "host";

/// Cross architecture declared next to the host
pub const TARGET: &str = "arm";

/// Variant declared for both architectures
pub const VARIANT: &str = "full";

/// A project tree in a temporary directory
pub struct ProjectFixture {
    _dir: TempDir,
    root: Utf8PathBuf,
    project: Value,
}

impl Default for ProjectFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectFixture {
    /// Empty project declaring [`HOST`] and [`TARGET`] with one variant
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp directory");
        let root = Utf8Path::from_path(dir.path())
            .expect("Temp directory is not UTF-8")
            .to_path_buf();
        for name in ["external", "workspace", "project/build", "tools/buildcentral/rules"] {
            std::fs::create_dir_all(root.join(name)).expect("Failed to create project layout");
        }

        let project = json!({
            "PROJECT_NAME": "fixture",
            "HOST": HOST,
            "TARGETS": [HOST, TARGET],
            "DEFAULT_TARGET": TARGET,
            "VARIANTS": {VARIANT: {"MACRO": "VARIANT_FULL"}},
            "DEFAULT_VARIANT": VARIANT,
            "PACKAGES": {},
            "BUILD": {
                HOST: {VARIANT: {"PACKAGES": []}},
                TARGET: {VARIANT: {"PACKAGES": []}}
            }
        });

        Self {
            _dir: dir,
            root,
            project,
        }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Declare a package and list it in the variant of each of `archs`
    pub fn package(&mut self, name: &str, entry: Value, archs: &[&str]) -> &mut Self {
        self.project["PACKAGES"][name] = entry;
        for arch in archs {
            if let Some(list) = self.project["BUILD"][*arch][VARIANT]["PACKAGES"].as_array_mut() {
                list.push(Value::from(name));
            }
        }
        self
    }

    /// Write an executable `build_package` script into `dir` (relative to the root)
    pub fn script(&self, dir: &str, body: &str) -> Utf8PathBuf {
        let dir = self.root.join(dir);
        std::fs::create_dir_all(&dir).expect("Failed to create package directory");
        let script = dir.join("build_package");
        std::fs::write(&script, format!("#!/bin/sh\n{}\n", body)).expect("Failed to write script");
        make_executable(&script);
        script
    }

    /// Write the project file and the toolchain rc
    pub fn write(&self) {
        std::fs::write(
            self.root.join("project/build/build_central.cfg"),
            serde_json::to_string_pretty(&self.project).expect("Project is serializable"),
        )
        .expect("Failed to write project file");

        let rc = json!({
            HOST: {"TARGET_ARCH": "x86_64", "TARGET_OS": "linux"},
            TARGET: {"TARGET_ARCH": "armv7", "TARGET_OS": "linux"}
        });
        std::fs::write(
            self.root.join("tools/buildcentral/rules/buildcentralrc"),
            rc.to_string(),
        )
        .expect("Failed to write rc file");
    }

    /// Write the tree and load it without the user's private rc
    pub fn load(&self) -> buildcentral::Result<Project> {
        self.write();
        Project::load(&LoadOptions::new(self.root.clone()).without_user_rc())
    }
}

#[cfg(unix)]
fn make_executable(path: &Utf8Path) {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .expect("Failed to make script executable");
}

#[cfg(not(unix))]
fn make_executable(_path: &Utf8Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_loads() {
        let mut fixture = ProjectFixture::new();
        fixture.package("zlib", json!({"Path": "external/zlib"}), &[HOST, TARGET]);
        let project = fixture.load().unwrap();

        assert_eq!(project.host(), HOST);
        assert!(project.graph(TARGET, VARIANT).unwrap().contains("zlib"));
    }
}
