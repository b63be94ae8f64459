//! Build command synthesis
//!
//! Turns a package, its architecture's toolchain profile and a stage into the
//! argument vector and environment of one child process.

use std::collections::BTreeMap;
use std::fmt;

use camino::Utf8PathBuf;

use crate::config::Package;
use crate::project::{PackagePaths, Project};
use crate::toolchain::{Generator, ToolchainProfile, definition_items, script_environment};
use crate::Result;

use super::probe::{BUILD_SCRIPT, BuildKind};

/// Replaces the configured sysroots for `SYSTEM_ROOT` when set
pub const SYSROOT_OVERRIDE_VAR: &str = "SROOT_OVERRIDE";

const PATH_SEPARATOR: &str = if cfg!(windows) { ";" } else { ":" };

/// One phase of a package's lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Configure,
    Build,
    Install,
    Clean,
    Uninstall,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Configure => "configure",
            Stage::Build => "build",
            Stage::Install => "install",
            Stage::Clean => "clean",
            Stage::Uninstall => "uninstall",
        };
        f.write_str(name)
    }
}

/// A synthesized child process invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildCommand {
    /// Program followed by its arguments
    pub argv: Vec<String>,
    /// Variables set on top of the inherited environment
    pub env: BTreeMap<String, String>,
}

impl BuildCommand {
    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or_default()
    }

    pub fn args(&self) -> &[String] {
        self.argv.get(1..).unwrap_or_default()
    }
}

impl fmt::Display for BuildCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.argv.join(" "))
    }
}

/// Run-wide switches that shape every synthesized command
#[derive(Debug, Clone)]
pub struct SynthesisOptions {
    pub debug: bool,
    pub verbose: bool,
    pub jobs: usize,
    /// Generator chosen on the command line, over the toolchain's
    pub generator: Option<Generator>,
    /// Extra `NAME[=VALUE]` items passed to cmake as `-D`
    pub extra_definitions: Vec<String>,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            debug: false,
            verbose: false,
            jobs: 1,
            generator: None,
            extra_definitions: Vec::new(),
        }
    }
}

/// Synthesize the command for `stage` of `package` on `arch`/`variant`.
///
/// Returns `None` when the stage does not apply to the package's build kind.
pub fn synthesize(
    project: &Project,
    arch: &str,
    variant: &str,
    package: &str,
    kind: BuildKind,
    stage: Stage,
    options: &SynthesisOptions,
) -> Result<Option<BuildCommand>> {
    let synthesizer = Synthesizer::new(project, arch, variant, package, options)?;
    let argv = match kind {
        BuildKind::Script => synthesizer.script_argv(stage),
        BuildKind::CMake => synthesizer.cmake_argv(stage),
        BuildKind::Make => synthesizer.make_argv(stage),
        BuildKind::Unknown => None,
    };

    let Some(argv) = argv else {
        return Ok(None);
    };
    let env = synthesizer.environment(kind)?;
    let command = BuildCommand { argv, env };
    tracing::debug!(package, %stage, "Synthesized: {}", command);
    Ok(Some(command))
}

struct Synthesizer<'a> {
    project: &'a Project,
    arch: &'a str,
    package: &'a Package,
    variant_macro: String,
    profile: ToolchainProfile,
    paths: PackagePaths,
    options: &'a SynthesisOptions,
}

impl<'a> Synthesizer<'a> {
    fn new(
        project: &'a Project,
        arch: &'a str,
        variant: &str,
        package: &str,
        options: &'a SynthesisOptions,
    ) -> Result<Self> {
        let variant_macro = project
            .config()
            .variants
            .get(variant)
            .map(|v| v.macro_def.clone())
            .unwrap_or_default();

        Ok(Self {
            project,
            arch,
            package: project.package(arch, package)?,
            variant_macro,
            profile: project.package_toolchain(arch, package)?,
            paths: project.package_paths(arch, package, variant)?,
            options,
        })
    }

    fn jobs(&self) -> String {
        self.options.jobs.max(1).to_string()
    }

    fn is_host(&self) -> bool {
        self.project.config().is_host(self.arch)
    }

    fn script_argv(&self, stage: Stage) -> Option<Vec<String>> {
        let flag = match stage {
            Stage::Configure => return None,
            Stage::Build => "-m",
            Stage::Install => "-i",
            Stage::Clean => "-c",
            Stage::Uninstall => "-u",
        };
        let script = self.paths.source_dir.join(BUILD_SCRIPT);
        Some(vec![
            script.to_string(),
            flag.to_string(),
            self.variant_macro.clone(),
        ])
    }

    fn generator(&self) -> Generator {
        self.options
            .generator
            .or(self.profile.generator)
            .unwrap_or_else(|| Generator::platform_default(self.is_host()))
    }

    fn cmake_argv(&self, stage: Stage) -> Option<Vec<String>> {
        if stage == Stage::Configure {
            return Some(self.cmake_configure_argv());
        }

        let tool = self.generator().native_tool()?;
        let mut argv = vec![tool.program.to_string()];
        match stage {
            Stage::Build | Stage::Install => {
                if tool.parallel {
                    argv.extend(["-j".to_string(), self.jobs()]);
                }
                if stage == Stage::Install {
                    argv.push("install".to_string());
                }
            }
            Stage::Clean => argv.push("clean".to_string()),
            Stage::Uninstall => argv.push("uninstall".to_string()),
            Stage::Configure => {}
        }
        Some(argv)
    }

    fn cmake_configure_argv(&self) -> Vec<String> {
        let profile = &self.profile;
        let rule_dir = self.project.config().rule_dir();
        let mut argv = vec!["cmake".to_string()];
        let mut define = |name: &str, value: &dyn fmt::Display| {
            argv.push(format!("-D{}={}", name, value));
        };

        define("PROJECT_ROOT", &self.project.root());
        define("RULE_DIR", &rule_dir);
        if !self.is_host() {
            let file = profile.toolchain_file.as_deref().unwrap_or("toolchain.cmake");
            define("CMAKE_TOOLCHAIN_FILE", &rule_dir.join(file));
        }
        define(
            "CMAKE_BUILD_TYPE",
            &if self.options.debug { "Debug" } else { "Release" },
        );
        argv.push("-G".to_string());
        argv.push(self.generator().cmake_name().to_string());

        for item in self.make_variables() {
            argv.push(format!("-D{}", item));
        }
        let macros = self.macro_definitions();
        if !macros.is_empty() {
            argv.push(format!("-DMACRO_DEF={}", macros.join(";")));
        }
        argv.push(format!("-DMACRO_VARIANT={}", self.variant_macro));

        let optional_path = |p: &Option<Utf8PathBuf>| p.as_ref().map(|p| p.to_string());
        let optional_fields = [
            ("TOOL_ROOT", optional_path(&profile.toolchain_root)),
            ("COMPILER_TYPE", profile.compiler_type.clone()),
            ("TARGET_ARCH", profile.target_arch.clone()),
            ("TARGET_OS", profile.target_os.clone()),
            ("CMAKE_AR", optional_path(&profile.archiver)),
            ("CMAKE_ASM_COMPILER", optional_path(&profile.asm_compiler)),
            ("CMAKE_C_FLAGS", Some(profile.c_flags.clone())),
            ("CMAKE_CXX_FLAGS", Some(profile.cxx_flags.clone())),
            ("CMAKE_ASM_FLAGS", Some(profile.asm_flags.clone())),
            ("REL_FLAGS", Some(profile.release_flags.clone())),
            ("DBG_FLAGS", Some(profile.debug_flags.clone())),
            ("CMAKE_SHARED_LINKER_FLAGS", Some(profile.shared_ld_flags.clone())),
            ("CMAKE_EXE_LINKER_FLAGS", Some(profile.exe_ld_flags.clone())),
            ("LIB_PATH", Some(join_paths(&self.lib_paths(), ";"))),
            ("INC_PATH", Some(join_paths(&self.include_paths(), ";"))),
        ];
        for (name, value) in optional_fields {
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                argv.push(format!("-D{}={}", name, value));
            }
        }

        argv.push(format!(
            "-DCMAKE_VERBOSE_MAKEFILE={}",
            if self.options.verbose { "on" } else { "off" }
        ));
        argv.push(format!("-DCMAKE_INSTALL_PREFIX={}", self.paths.stage_dir));
        argv.push(format!(
            "-DSYSTEM_ROOT={}",
            join_paths(&self.system_roots(), ";")
        ));

        for item in &self.options.extra_definitions {
            argv.push(format!("-D{}", item));
        }
        argv.push(format!("-DPACKAGE_NAME={}", self.package.name));
        argv.push(self.paths.source_dir.to_string());
        argv
    }

    fn make_argv(&self, stage: Stage) -> Option<Vec<String>> {
        let mut argv = vec!["make".to_string()];
        match stage {
            Stage::Configure => return None,
            Stage::Build | Stage::Install => {
                argv.extend(["-j".to_string(), self.jobs()]);
                argv.extend(self.package.make_target.clone());
                if stage == Stage::Install {
                    argv.push("install".to_string());
                }
            }
            Stage::Clean => argv.push("clean".to_string()),
            Stage::Uninstall => argv.push("uninstall".to_string()),
        }
        argv.extend(self.make_variables());
        if matches!(stage, Stage::Install | Stage::Uninstall) {
            argv.push(format!("DESTDIR={}", self.paths.stage_dir));
        }
        Some(argv)
    }

    /// Toolchain `MAKE_VAR` items followed by the package's `MakeVar`
    fn make_variables(&self) -> Vec<String> {
        definition_items(&self.profile.make_vars)
            .chain(self.package.make_vars.iter().cloned())
            .collect()
    }

    /// Toolchain `MACRO_DEF` items followed by the package's `BuildVar`
    fn macro_definitions(&self) -> Vec<String> {
        definition_items(&self.profile.macros)
            .chain(self.package.build_vars.iter().cloned())
            .collect()
    }

    /// Sysroots for `SYSTEM_ROOT`, honoring the override variable
    fn sysroots(&self) -> Vec<Utf8PathBuf> {
        match std::env::var(SYSROOT_OVERRIDE_VAR) {
            Ok(value) if !value.is_empty() => value
                .split(';')
                .filter(|s| !s.is_empty())
                .map(Utf8PathBuf::from)
                .collect(),
            _ => self.profile.sysroots.clone(),
        }
    }

    /// Sysroots followed by the stage directory
    fn system_roots(&self) -> Vec<Utf8PathBuf> {
        let mut roots = self.sysroots();
        roots.push(self.paths.stage_dir.clone());
        roots
    }

    fn lib_paths(&self) -> Vec<Utf8PathBuf> {
        self.search_paths(&self.profile.lib_paths, "lib")
    }

    fn include_paths(&self) -> Vec<Utf8PathBuf> {
        self.search_paths(&self.profile.include_paths, "include")
    }

    /// Explicit paths, then `<root>/<dir>` and `<root>/usr/<dir>` per system root
    fn search_paths(&self, explicit: &[Utf8PathBuf], dir: &str) -> Vec<Utf8PathBuf> {
        let mut paths = explicit.to_vec();
        for root in self.system_roots() {
            paths.push(root.join(dir));
            paths.push(root.join("usr").join(dir));
        }
        paths
    }

    fn environment(&self, kind: BuildKind) -> Result<BTreeMap<String, String>> {
        let profile = &self.profile;
        let mut env = BTreeMap::new();

        let host_paths = self.project.host_tool_paths();
        for (name, dirs) in [
            ("PATH", &host_paths.bin_dirs),
            ("LD_LIBRARY_PATH", &host_paths.lib_dirs),
        ] {
            if dirs.is_empty() {
                continue;
            }
            let added = join_paths(dirs, PATH_SEPARATOR);
            let value = match std::env::var(name) {
                Ok(current) if !current.is_empty() => {
                    format!("{}{}{}", current, PATH_SEPARATOR, added)
                }
                _ => added,
            };
            env.insert(name.to_string(), value);
        }

        let (cc, cxx) = match kind {
            BuildKind::CMake => ("C_COMPILER", "CXX_COMPILER"),
            _ => ("CC", "CXX"),
        };
        if matches!(kind, BuildKind::CMake | BuildKind::Make) {
            if let Some(compiler) = &profile.c_compiler {
                env.insert(cc.to_string(), compiler.to_string());
            }
            if let Some(compiler) = &profile.cxx_compiler {
                env.insert(cxx.to_string(), compiler.to_string());
            }
        }
        if kind == BuildKind::Make && profile.env_script.is_none() {
            self.insert_make_flags(&mut env);
        }

        if let Some(script) = &profile.env_script {
            env.extend(
                script_environment(script)?
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone())),
            );
        }
        env.extend(profile.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(env)
    }

    fn insert_make_flags(&self, env: &mut BTreeMap<String, String>) {
        let profile = &self.profile;
        let build_type_flags = profile.build_type_flags(self.options.debug);
        let includes: Vec<String> = self
            .include_paths()
            .iter()
            .map(|p| format!("-I{}", p))
            .collect();
        let macros: Vec<String> = self
            .macro_definitions()
            .iter()
            .map(|m| format!("-D{}", m))
            .collect();
        let libs: Vec<String> = self
            .lib_paths()
            .iter()
            .map(|p| format!("-L{}", p))
            .collect();

        let compile_flags = |flags: &str| {
            join_flags(
                [flags, build_type_flags]
                    .into_iter()
                    .map(str::to_string)
                    .chain(includes.iter().cloned())
                    .chain(macros.iter().cloned()),
            )
        };

        env.insert("CFLAGS".to_string(), compile_flags(&profile.c_flags));
        env.insert("CXXFLAGS".to_string(), compile_flags(&profile.cxx_flags));
        env.insert(
            "LDFLAGS".to_string(),
            join_flags(std::iter::once(profile.exe_ld_flags.clone()).chain(libs)),
        );
    }
}

fn join_paths(paths: &[Utf8PathBuf], separator: &str) -> String {
    paths
        .iter()
        .map(|p| p.as_str())
        .collect::<Vec<_>>()
        .join(separator)
}

fn join_flags(flags: impl Iterator<Item = String>) -> String {
    flags
        .filter(|f| !f.trim().is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
