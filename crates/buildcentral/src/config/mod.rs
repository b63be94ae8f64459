//! Project configuration loading and validation
//!
//! The project file (`build_central.cfg`) declares architectures, variants,
//! build groups and the package pool. Toolchain rc files are layered on top:
//! built-in defaults, then the project-default rc, the project rc and the
//! user's private rc, each later layer taking precedence.

mod template;

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::toolchain::ToolchainProfile;
use crate::{Error, Result};

pub use template::{PROJECT_ROOT_PLACEHOLDER, expand_home, guess_project_root, substitute};

/// Project file name
pub const PROJECT_FILE: &str = "build_central.cfg";

/// Toolchain rc file name used inside the project
pub const RC_FILE: &str = "buildcentralrc";

/// User-private rc file, relative to `$HOME`
pub const USER_RC_FILE: &str = ".buildcentral";

/// Rule directory (cmake helpers, toolchain files), relative to the project root
pub const RULE_DIR: &str = "tools/buildcentral/rules";

/// Where to load configuration from
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Project root
    pub project_root: Utf8PathBuf,
    /// Directory holding the project file, instead of `<root>/project/build`
    pub config_dir: Option<Utf8PathBuf>,
    /// User-private rc file; `None` skips that layer
    pub user_rc: Option<Utf8PathBuf>,
}

impl LoadOptions {
    /// Load from `project_root`, including `~/.buildcentral`
    pub fn new(project_root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            config_dir: None,
            user_rc: std::env::var("HOME")
                .ok()
                .map(|home| Utf8PathBuf::from(home).join(USER_RC_FILE)),
        }
    }

    /// Read the project file from `dir`
    pub fn with_config_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.config_dir = Some(dir.into());
        self
    }

    /// Use `path` as the user-private rc file
    pub fn with_user_rc(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.user_rc = Some(path.into());
        self
    }

    /// Skip the user-private rc layer
    pub fn without_user_rc(mut self) -> Self {
        self.user_rc = None;
        self
    }

    /// Path of the project file
    pub fn project_file(&self) -> Utf8PathBuf {
        self.config_dir
            .clone()
            .unwrap_or_else(|| self.project_root.join("project").join("build"))
            .join(PROJECT_FILE)
    }

    /// Toolchain rc layers, lowest precedence first
    pub fn rc_files(&self) -> Vec<Utf8PathBuf> {
        let mut files = vec![
            self.project_root.join(RULE_DIR).join(RC_FILE),
            self.project_root.join("project").join("build").join(RC_FILE),
        ];
        files.extend(self.user_rc.clone());
        files
    }
}

/// A named build configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub name: String,
    /// Macro string handed to build scripts and to cmake as `MACRO_VARIANT`
    pub macro_def: String,
}

/// A named, inheritable collection of packages
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Group {
    #[serde(rename = "BASE", default)]
    pub base: Vec<String>,
    #[serde(rename = "PACKAGES", default)]
    pub packages: Vec<String>,
}

/// A buildable unit as declared for one architecture
#[derive(Debug, Clone, PartialEq)]
pub struct Package {
    pub name: String,
    /// Source directory or archive, relative to the project root
    pub path: Utf8PathBuf,
    /// Packages (same architecture) that must be built first
    pub dependencies: Vec<String>,
    /// Host packages needed as build-time tools when cross-compiling
    pub tools: Vec<String>,
    /// Whether the package is installed into the stage directory
    pub install: bool,
    pub make_target: Option<String>,
    /// `NAME[=VALUE]` items passed to cmake as `-D` or to make as assignments
    pub make_vars: Vec<String>,
    /// Extra macro definitions appended to `MACRO_DEF`
    pub build_vars: Vec<String>,
    /// Toolchain layers: the pool entry first, then the per-architecture entry
    pub toolchain_layers: Vec<Map<String, Value>>,
}

/// Package entry as written in the project file
#[derive(Debug, Clone, Default, Deserialize)]
struct PackageDecl {
    #[serde(rename = "Path")]
    path: Option<Utf8PathBuf>,
    #[serde(rename = "Dependency")]
    dependency: Option<Vec<String>>,
    #[serde(rename = "Tools")]
    tools: Option<Vec<String>>,
    #[serde(rename = "Install")]
    install: Option<bool>,
    #[serde(rename = "MakeTarget")]
    make_target: Option<String>,
    #[serde(rename = "MakeVar")]
    make_var: Option<Vec<String>>,
    #[serde(rename = "BuildVar")]
    build_var: Option<Vec<String>>,
    /// Remaining keys are toolchain overrides
    #[serde(flatten)]
    toolchain: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct VariantDecl {
    #[serde(rename = "MACRO", default)]
    macro_def: String,
}

/// Project file as written on disk
#[derive(Debug, Default, Deserialize)]
struct ProjectFile {
    #[serde(rename = "PROJECT_NAME")]
    project_name: Option<String>,
    #[serde(rename = "HOST")]
    host: Option<String>,
    #[serde(rename = "TARGETS")]
    targets: Option<Vec<String>>,
    #[serde(rename = "DEFAULT_TARGET")]
    default_target: Option<String>,
    #[serde(rename = "VARIANTS")]
    variants: Option<BTreeMap<String, VariantDecl>>,
    #[serde(rename = "DEFAULT_VARIANT")]
    default_variant: Option<String>,
    #[serde(rename = "PACKAGES", default)]
    packages: BTreeMap<String, PackageDecl>,
    #[serde(rename = "PACKAGES-PER-ARCH", default)]
    packages_per_arch: BTreeMap<String, BTreeMap<String, PackageDecl>>,
    #[serde(rename = "BUILD", default)]
    build: BTreeMap<String, BTreeMap<String, Group>>,
    #[serde(rename = "RUNTIME_ENV", default)]
    runtime_env: BTreeMap<String, String>,
}

/// Validated project configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub project_root: Utf8PathBuf,
    pub project_name: String,
    /// Architecture the orchestrator runs on
    pub host: String,
    pub architectures: Vec<String>,
    pub default_architecture: String,
    pub variants: BTreeMap<String, Variant>,
    pub default_variant: String,
    /// Package pool per architecture
    pub packages: BTreeMap<String, BTreeMap<String, Package>>,
    /// Build groups per architecture
    pub groups: BTreeMap<String, BTreeMap<String, Group>>,
    pub runtime_env: BTreeMap<String, String>,
    /// Toolchain profile per architecture
    pub toolchains: BTreeMap<String, ToolchainProfile>,
}

impl Config {
    /// Load and validate the project file and its toolchain rc layers
    pub fn load(options: &LoadOptions) -> Result<Self> {
        let project_file = options.project_file();
        let text = std::fs::read_to_string(&project_file).map_err(|e| {
            Error::config(
                format!("Cannot open config file {}: {}", project_file, e),
                "Pass the project root or the directory holding build_central.cfg",
            )
        })?;

        let mut config = Self::parse(&text, &options.project_root, &project_file)?;
        config.load_toolchains(&options.rc_files())?;
        Ok(config)
    }

    /// Parse project file text (placeholders are substituted first)
    pub fn parse(text: &str, project_root: &Utf8Path, origin: &Utf8Path) -> Result<Self> {
        let text = substitute(text, project_root, origin)?;
        let file: ProjectFile = serde_json::from_str(&text).map_err(|error| Error::Json {
            path: origin.to_path_buf(),
            error,
        })?;

        let project_name = required(file.project_name, "PROJECT_NAME", origin)?;
        let host = required(file.host, "HOST", origin)?;
        let architectures = required(file.targets, "TARGETS", origin)?;
        let default_architecture = required(file.default_target, "DEFAULT_TARGET", origin)?;
        let variant_decls = required(file.variants, "VARIANTS", origin)?;
        let default_variant = required(file.default_variant, "DEFAULT_VARIANT", origin)?;

        if !architectures.contains(&host) {
            return Err(Error::config(
                format!("HOST {} is not listed in TARGETS", host),
                "Add the host architecture to TARGETS",
            ));
        }
        if !architectures.contains(&default_architecture) {
            return Err(Error::config(
                format!("Invalid DEFAULT_TARGET {}", default_architecture),
                "DEFAULT_TARGET must be one of TARGETS",
            ));
        }
        if !variant_decls.contains_key(&default_variant) {
            return Err(Error::config(
                format!("Invalid DEFAULT_VARIANT {}", default_variant),
                "DEFAULT_VARIANT must be one of VARIANTS",
            ));
        }

        let variants = variant_decls
            .into_iter()
            .map(|(name, decl)| {
                let variant = Variant {
                    name: name.clone(),
                    macro_def: decl.macro_def,
                };
                (name, variant)
            })
            .collect();

        let packages =
            resolve_package_pools(&architectures, file.packages, file.packages_per_arch, origin)?;

        for (arch, groups) in &file.build {
            if !architectures.contains(arch) {
                return Err(Error::config(
                    format!("Arch {} is invalid for BUILD in {}", arch, origin),
                    "Every BUILD architecture must be listed in TARGETS",
                ));
            }
            if !groups.contains_key(&default_variant) {
                return Err(Error::config(
                    format!(
                        "Default variant {} is not in BUILD for arch {}",
                        default_variant, arch
                    ),
                    "Declare the default variant for every architecture in BUILD",
                ));
            }
        }

        Ok(Config {
            project_root: project_root.to_path_buf(),
            project_name,
            host,
            architectures,
            default_architecture,
            variants,
            default_variant,
            packages,
            groups: file.build,
            runtime_env: file.runtime_env,
            toolchains: BTreeMap::new(),
        })
    }

    /// Layer the toolchain rc files onto built-in defaults.
    ///
    /// Missing files are skipped. Afterwards every declared architecture must
    /// have resolved its required fields.
    pub fn load_toolchains(&mut self, rc_files: &[Utf8PathBuf]) -> Result<()> {
        let mut toolchains: BTreeMap<String, ToolchainProfile> = self
            .architectures
            .iter()
            .map(|arch| (arch.clone(), ToolchainProfile::default()))
            .collect();

        for rc_file in rc_files {
            let text = match std::fs::read_to_string(rc_file) {
                Ok(text) => text,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!("{} does not exist, skipping", rc_file);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let text = substitute(&text, &self.project_root, rc_file)?;
            let layers: Map<String, Value> =
                serde_json::from_str(&text).map_err(|error| Error::Json {
                    path: rc_file.clone(),
                    error,
                })?;

            for (key, layer) in &layers {
                let Some(arch) = self.rc_architecture(key) else {
                    tracing::debug!("{}: skipping undeclared architecture {}", rc_file, key);
                    continue;
                };
                let layer = layer.as_object().ok_or_else(|| {
                    Error::config(
                        format!("{}: entry {} must be an object", rc_file, key),
                        "Each architecture maps to an object of toolchain keys",
                    )
                })?;
                let origin = format!("{} [{}]", rc_file, key);
                if let Some(profile) = toolchains.get_mut(arch) {
                    profile.apply_layer(layer, &origin)?;
                }
            }
        }

        for (arch, profile) in &toolchains {
            profile.check_required(arch)?;
        }

        self.toolchains = toolchains;
        Ok(())
    }

    /// Architecture an rc key configures; the running OS name aliases the host
    fn rc_architecture(&self, key: &str) -> Option<&str> {
        if let Some(arch) = self.architectures.iter().find(|a| a.as_str() == key) {
            return Some(arch.as_str());
        }
        (key == std::env::consts::OS).then_some(self.host.as_str())
    }

    /// Whether `arch` is the host architecture
    pub fn is_host(&self, arch: &str) -> bool {
        arch == self.host
    }

    /// Variants declared in BUILD for `arch`
    pub fn variants_for(&self, arch: &str) -> Vec<&Variant> {
        match self.groups.get(arch) {
            Some(groups) => self
                .variants
                .values()
                .filter(|v| groups.contains_key(&v.name))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Look up a package declared for `arch`
    pub fn package(&self, arch: &str, name: &str) -> Option<&Package> {
        self.packages.get(arch).and_then(|pool| pool.get(name))
    }

    /// Toolchain profile of `arch`
    pub fn toolchain(&self, arch: &str) -> Result<&ToolchainProfile> {
        self.toolchains.get(arch).ok_or_else(|| {
            Error::config(
                format!("Architecture {} is not declared", arch),
                format!("Use one of: {}", self.architectures.join(", ")),
            )
        })
    }

    /// `export NAME=VALUE;` string for consumers that launch built programs
    pub fn runtime_env_exports(&self) -> String {
        self.runtime_env
            .iter()
            .map(|(name, value)| format!("export {}={};", name, value))
            .collect()
    }

    /// Output directory for all generated files
    pub fn output_dir(&self) -> Utf8PathBuf {
        self.project_root.join("output")
    }

    /// Directory holding run logs
    pub fn log_dir(&self) -> Utf8PathBuf {
        self.output_dir().join("log")
    }

    /// Rule directory passed to cmake
    pub fn rule_dir(&self) -> Utf8PathBuf {
        self.project_root.join(RULE_DIR)
    }
}

fn required<T>(value: Option<T>, key: &str, origin: &Utf8Path) -> Result<T> {
    value.ok_or_else(|| {
        Error::config(
            format!("{} should be defined in {}", key, origin),
            "Add the missing key to the project file",
        )
    })
}

/// Copy the shared pool to every architecture and overlay per-arch entries
fn resolve_package_pools(
    architectures: &[String],
    pool: BTreeMap<String, PackageDecl>,
    per_arch: BTreeMap<String, BTreeMap<String, PackageDecl>>,
    origin: &Utf8Path,
) -> Result<BTreeMap<String, BTreeMap<String, Package>>> {
    for arch in per_arch.keys() {
        if !architectures.contains(arch) {
            return Err(Error::config(
                format!("arch {} in PACKAGES-PER-ARCH of {} is invalid", arch, origin),
                "Every PACKAGES-PER-ARCH architecture must be listed in TARGETS",
            ));
        }
    }

    let empty = BTreeMap::new();
    let mut pools = BTreeMap::new();
    for arch in architectures {
        let overrides = per_arch.get(arch).unwrap_or(&empty);
        let mut packages = BTreeMap::new();

        let names = pool.keys().chain(overrides.keys().filter(|n| !pool.contains_key(*n)));
        for name in names {
            let package = overlay_package(name, pool.get(name), overrides.get(name), arch)?;
            packages.insert(name.clone(), package);
        }
        pools.insert(arch.clone(), packages);
    }
    Ok(pools)
}

fn overlay_package(
    name: &str,
    base: Option<&PackageDecl>,
    arch_decl: Option<&PackageDecl>,
    arch: &str,
) -> Result<Package> {
    let pick = |f: fn(&PackageDecl) -> Option<&Vec<String>>| {
        arch_decl
            .and_then(f)
            .or_else(|| base.and_then(f))
            .cloned()
            .unwrap_or_default()
    };

    let path = arch_decl
        .and_then(|d| d.path.clone())
        .or_else(|| base.and_then(|d| d.path.clone()))
        .ok_or_else(|| {
            Error::config(
                format!("Package {} has no Path for arch {}", name, arch),
                "Every package needs a Path relative to the project root",
            )
        })?;

    Ok(Package {
        name: name.to_string(),
        path,
        dependencies: pick(|d| d.dependency.as_ref()),
        tools: pick(|d| d.tools.as_ref()),
        install: arch_decl
            .and_then(|d| d.install)
            .or_else(|| base.and_then(|d| d.install))
            .unwrap_or(true),
        make_target: arch_decl
            .and_then(|d| d.make_target.clone())
            .or_else(|| base.and_then(|d| d.make_target.clone())),
        make_vars: pick(|d| d.make_var.as_ref()),
        build_vars: pick(|d| d.build_var.as_ref()),
        toolchain_layers: base
            .into_iter()
            .chain(arch_decl)
            .map(|d| d.toolchain.clone())
            .filter(|layer| !layer.is_empty())
            .collect(),
    })
}
