//! The assembled project: configuration, toolchains, graphs and path layout
//!
//! A [`Project`] is built once and is immutable afterwards. Every path it
//! hands out is derived from the configuration, so nothing needs caching.

use camino::{Utf8Path, Utf8PathBuf};

use crate::config::{Config, LoadOptions, Package};
use crate::graph::{BUILD_ALL, BuildGraph, GraphSet};
use crate::order::{self, BuildPlan, ResolveRequest};
use crate::toolchain::ToolchainProfile;
use crate::{Error, Result};

/// Name of the file CMake writes the installed file list into
pub const INSTALL_MANIFEST: &str = "install_manifest.txt";

/// Archive suffixes recognized for package sources, longest first
const ARCHIVE_SUFFIXES: &[&str] = &[".tar.gz", ".tgz", ".tar"];

/// Filesystem locations of one (architecture, package, variant)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagePaths {
    /// Directory holding the package sources
    pub source_dir: Utf8PathBuf,
    /// Archive the sources are extracted from, if the package ships as one
    pub archive: Option<Utf8PathBuf>,
    /// Out-of-tree build directory
    pub build_dir: Utf8PathBuf,
    /// Install prefix
    pub stage_dir: Utf8PathBuf,
}

/// Directories added to `PATH` / `LD_LIBRARY_PATH` of every child process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostToolPaths {
    pub bin_dirs: Vec<Utf8PathBuf>,
    pub lib_dirs: Vec<Utf8PathBuf>,
}

/// Result of reading a package's install manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstalledFiles {
    /// The package has not been installed yet
    NotBuilt,
    /// Installed files, sorted
    Files(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct Project {
    config: Config,
    graphs: GraphSet,
}

impl Project {
    /// Load configuration and build every graph. All validation happens here,
    /// before anything is executed.
    pub fn load(options: &LoadOptions) -> Result<Self> {
        let config = Config::load(options)?;
        Self::from_config(config)
    }

    pub fn from_config(config: Config) -> Result<Self> {
        let graphs = GraphSet::build(&config)?;
        tracing::debug!(
            project = %config.project_name,
            graphs = graphs.len(),
            "Project loaded"
        );
        Ok(Project { config, graphs })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn root(&self) -> &Utf8Path {
        &self.config.project_root
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    /// Graph of `arch`/`variant`
    pub fn graph(&self, arch: &str, variant: &str) -> Result<&BuildGraph> {
        self.graphs.get(arch, variant).ok_or_else(|| {
            Error::graph(
                format!("Variant {} is invalid for arch {}", variant, arch),
                format!(
                    "Available variants: {}",
                    self.config
                        .variants_for(arch)
                        .iter()
                        .map(|v| v.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            )
        })
    }

    /// Resolve the build plan of `request` on `arch`/`variant`
    pub fn resolve(&self, arch: &str, variant: &str, request: &ResolveRequest) -> Result<BuildPlan> {
        order::resolve(&self.graphs, &self.config.host, arch, variant, request)
    }

    pub fn package(&self, arch: &str, name: &str) -> Result<&Package> {
        self.config.package(arch, name).ok_or_else(|| {
            Error::graph(
                format!("Package {} is not defined for arch {}", name, arch),
                "Declare the package in PACKAGES or PACKAGES-PER-ARCH",
            )
        })
    }

    /// Architecture profile with the package's own override layers applied
    pub fn package_toolchain(&self, arch: &str, package: &str) -> Result<ToolchainProfile> {
        let mut profile = self.config.toolchain(arch)?.clone();
        for layer in &self.package(arch, package)?.toolchain_layers {
            profile.apply_layer(layer, &format!("package {} [{}]", package, arch))?;
        }
        Ok(profile)
    }

    /// Install prefix shared by every package of `arch`/`variant`
    pub fn stage_dir(&self, arch: &str, variant: &str) -> Utf8PathBuf {
        let stage = self.config.output_dir().join("stage");
        if self.config.is_host(arch) {
            // No variant for host builds
            stage.join(arch)
        } else {
            stage.join(variant).join(arch)
        }
    }

    /// Source, archive, build and stage locations of a package
    pub fn package_paths(&self, arch: &str, package: &str, variant: &str) -> Result<PackagePaths> {
        let declared = self.package(arch, package)?;
        let output = self.config.output_dir();
        let declared_path = self.root().join(&declared.path);

        let (source_dir, archive) = if declared_path.is_file() {
            let relative = declared_path
                .strip_prefix(self.root())
                .map(Utf8Path::to_path_buf)
                .unwrap_or_else(|_| Utf8PathBuf::from(declared_path.file_name().unwrap_or(package)));
            (output.join(strip_archive_suffix(&relative)), Some(declared_path))
        } else {
            (declared_path, None)
        };

        let stage_dir = match &self.package_toolchain(arch, package)?.stage_dir {
            Some(dir) => dir.clone(),
            None => self.stage_dir(arch, variant),
        };

        Ok(PackagePaths {
            source_dir,
            archive,
            build_dir: output.join("build").join(variant).join(package).join(arch),
            stage_dir,
        })
    }

    /// Run log of `arch`
    pub fn log_file(&self, arch: &str) -> Utf8PathBuf {
        self.config.log_dir().join(arch).join("log")
    }

    /// Host tool directories that exist on disk
    pub fn host_tool_paths(&self) -> HostToolPaths {
        let host = &self.config.host;
        let host_stage = self
            .config
            .toolchain(host)
            .ok()
            .and_then(|toolchain| toolchain.stage_dir.clone())
            .unwrap_or_else(|| self.stage_dir(host, &self.config.default_variant));
        let os = std::env::consts::OS;
        let existing = |dirs: [Utf8PathBuf; 3]| -> Vec<Utf8PathBuf> {
            dirs.into_iter().filter(|dir| dir.is_dir()).collect()
        };

        HostToolPaths {
            bin_dirs: existing([
                self.root().join("tools").join("bin").join(os),
                host_stage.join("bin"),
                host_stage.join("usr").join("bin"),
            ]),
            lib_dirs: existing([
                self.root().join("tools").join("lib").join(os),
                host_stage.join("lib"),
                host_stage.join("usr").join("lib"),
            ]),
        }
    }

    /// Files a previous install of `package` put into the stage directory
    pub fn installed_files(&self, arch: &str, package: &str, variant: &str) -> Result<InstalledFiles> {
        let paths = self.package_paths(arch, package, variant)?;
        let manifest = paths.build_dir.join(INSTALL_MANIFEST);
        let text = match std::fs::read_to_string(&manifest) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(InstalledFiles::NotBuilt);
            }
            Err(e) => return Err(e.into()),
        };

        let mut files: Vec<String> = text
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        files.sort();
        Ok(InstalledFiles::Files(files))
    }

    /// Packages whose source directory contains `cwd`.
    ///
    /// The longest matching source directory wins; every package sharing it
    /// is returned. Inside the project but outside any package this is the
    /// synthetic root, outside the project it is empty.
    pub fn guess_current_packages(&self, cwd: &Utf8Path, arch: &str) -> Vec<String> {
        let Some(pool) = self.config.packages.get(arch) else {
            return Vec::new();
        };

        let source_dir = |package: &Package| self.root().join(&package.path);
        let best = pool
            .values()
            .map(source_dir)
            .filter(|dir| cwd.starts_with(dir))
            .max_by_key(|dir| dir.as_str().len());

        match best {
            Some(best) => pool
                .values()
                .filter(|package| source_dir(package) == best)
                .map(|package| package.name.clone())
                .collect(),
            None if cwd.starts_with(self.root()) => vec![BUILD_ALL.to_string()],
            None => Vec::new(),
        }
    }

    /// Every package of `arch`/`variant` except `excluded`
    pub fn packages_except(&self, arch: &str, variant: &str, excluded: &[String]) -> Result<Vec<String>> {
        if excluded.is_empty() {
            return Err(Error::graph(
                "Exclusive selection needs at least one package to leave out",
                "Name the packages to exclude",
            ));
        }
        if excluded.iter().any(|p| p == BUILD_ALL) {
            return Err(Error::graph(
                format!("{} cannot be excluded", BUILD_ALL),
                "Name the packages to exclude",
            ));
        }

        let graph = self.graph(arch, variant)?;
        let mut packages: Vec<String> = graph
            .packages()
            .into_iter()
            .filter(|p| !excluded.iter().any(|e| e == p))
            .map(str::to_string)
            .collect();
        packages.sort();
        Ok(packages)
    }
}

fn strip_archive_suffix(path: &Utf8Path) -> Utf8PathBuf {
    let text = path.as_str();
    ARCHIVE_SUFFIXES
        .iter()
        .find_map(|suffix| text.strip_suffix(suffix))
        .map(Utf8PathBuf::from)
        .unwrap_or_else(|| path.to_path_buf())
}
