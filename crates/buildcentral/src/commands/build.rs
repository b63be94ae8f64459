//! Build command implementation
//!
//! This module provides the CLI interface for building packages.

use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::Args;
use jobserver::Client;
use miette::{IntoDiagnostic, Result};

use crate::build::{BuildSession, CleanMode, ExecuteOptions, Executor, RunStatus, SynthesisOptions};
use crate::config::{LoadOptions, guess_project_root};
use crate::graph::BUILD_ALL;
use crate::order::ResolveRequest;
use crate::project::{InstalledFiles, Project};
use crate::toolchain::Generator;
use crate::Error;

/// Arguments for the build command
#[derive(Debug, Args)]
pub struct BuildArgs {
    /// Packages to build, separated by ","; guessed from the current directory when omitted
    pub packages: Option<String>,

    /// Target architecture (see --list)
    #[arg(short = 't', long = "target-arch")]
    pub target_arch: Option<String>,

    /// Variant to build (see --list)
    #[arg(short = 'm', long = "variant")]
    pub variant: Option<String>,

    /// Build the debug version
    #[arg(short, long)]
    pub debug: bool,

    /// Show the output of build commands
    #[arg(short, long)]
    pub verbose: bool,

    /// Uninstall and clean the packages
    #[arg(short, long)]
    pub clean: bool,

    /// With -c: build again after cleaning
    #[arg(short = 'b', long = "clean-build")]
    pub clean_build: bool,

    /// List packages (with -a: list build orders)
    #[arg(short, long)]
    pub list: bool,

    /// Include dependencies and host tools
    #[arg(short = 'a', long = "dep")]
    pub dependencies: bool,

    /// Build every package except the ones given
    #[arg(short, long)]
    pub exclusive: bool,

    /// Number of jobs for make
    #[arg(short, long, default_value_t = 0)]
    pub jobs: usize,

    /// CMake generator id (see --info)
    #[arg(short = 'g', long = "cmake-generator")]
    pub generator: Option<String>,

    /// Extra (c)make variables, separated by ","
    #[arg(short = 'D', long = "extra-make-var", value_delimiter = ',')]
    pub extra_make_vars: Vec<String>,

    /// Show installed files and generator information
    #[arg(short, long)]
    pub info: bool,
}

/// Where the project lives
#[derive(Debug, Clone, Default)]
pub struct Location {
    pub project_root: Option<Utf8PathBuf>,
    pub config_dir: Option<Utf8PathBuf>,
}

fn current_dir() -> Utf8PathBuf {
    std::env::current_dir()
        .ok()
        .and_then(|p| Utf8PathBuf::try_from(p).ok())
        .unwrap_or_else(|| Utf8PathBuf::from("."))
}

/// Run the build command
pub fn run(location: Location, args: BuildArgs) -> Result<()> {
    let generator = args
        .generator
        .as_deref()
        .map(str::parse::<Generator>)
        .transpose()
        .into_diagnostic()?;

    let cwd = current_dir();
    let root = location
        .project_root
        .unwrap_or_else(|| guess_project_root(&cwd));
    let mut load = LoadOptions::new(root);
    if let Some(dir) = location.config_dir {
        load = load.with_config_dir(dir);
    }
    let project = Project::load(&load).into_diagnostic()?;
    let config = project.config();

    let arch = args
        .target_arch
        .clone()
        .unwrap_or_else(|| config.default_architecture.clone());
    if !config.architectures.contains(&arch) {
        return Err(Error::config(
            format!("invalid target arch: {}", arch),
            format!("Use one of: {}", config.architectures.join(", ")),
        ))
        .into_diagnostic();
    }

    let variant = args
        .variant
        .clone()
        .unwrap_or_else(|| config.default_variant.clone());
    let available: Vec<&str> = config
        .variants_for(&arch)
        .into_iter()
        .map(|v| v.name.as_str())
        .collect();
    if !available.contains(&variant.as_str()) {
        return Err(Error::config(
            format!("variant {} is invalid for arch {}", variant, arch),
            format!("Available variants for {}: {}", arch, available.join(", ")),
        ))
        .into_diagnostic();
    }

    let graph = project.graph(&arch, &variant).into_diagnostic()?;
    let mut listed: Vec<&str> = graph.packages();
    listed.sort_unstable();

    if args.list && !args.dependencies {
        show_info(&project, &arch, &variant);
        println!("=========================Packages===============================");
        for name in &listed {
            match project.package(&arch, name) {
                Ok(package) => println!("{:<28}> {}", name, package.path),
                Err(_) => println!("{}", name),
            }
        }
        println!("{}", BUILD_ALL);
        return Ok(());
    }

    let mut requested: Vec<String> = Vec::new();
    match &args.packages {
        Some(list) => {
            for name in list.split(',').filter(|n| !n.is_empty()) {
                if name != BUILD_ALL && !graph.contains(name) {
                    return Err(Error::graph(
                        format!("invalid package {} for {}", name, arch),
                        format!("Select packages from: {}", listed.join(", ")),
                    ))
                    .into_diagnostic();
                }
                requested.push(name.to_string());
            }
        }
        None => {
            for name in project.guess_current_packages(&cwd, &arch) {
                if name == BUILD_ALL || graph.contains(&name) {
                    requested.push(name);
                } else {
                    tracing::warn!(
                        "Work directory matches package {} but it is not in the build list, skipping",
                        name
                    );
                }
            }
        }
    }

    let mut selected = if args.exclusive {
        project
            .packages_except(&arch, &variant, &requested)
            .into_diagnostic()?
    } else {
        requested
    };
    selected.sort();
    selected.dedup();
    if selected.is_empty() {
        return Err(Error::config(
            "no package selected",
            "Name packages to build or run inside a package directory",
        ))
        .into_diagnostic();
    }

    let build_all = selected.len() == 1 && selected[0] == BUILD_ALL;
    let with_dependencies = args.dependencies || build_all;
    let request = |packages: Vec<String>| {
        let request = ResolveRequest::packages(packages);
        if with_dependencies {
            request
        } else {
            request.without_dependencies()
        }
    };

    if args.list {
        show_info(&project, &arch, &variant);
        for name in &selected {
            println!("{}", name);
            let plan = project
                .resolve(&arch, &variant, &request(vec![name.clone()]))
                .into_diagnostic()?;
            for tool in &plan.host_tools {
                println!("    {}(host)", tool);
            }
            for package in &plan.target {
                println!("    {}", package);
            }
        }
        return Ok(());
    }

    let plan = project
        .resolve(&arch, &variant, &request(selected.clone()))
        .into_diagnostic()?;

    if args.info {
        return show_installed(&project, &arch, &variant, &plan.target);
    }

    let jobs = args.jobs.max(1);

    // SAFETY: `Client::from_env()` is unsafe because it may take ownership
    // of file descriptors named by MAKEFLAGS. We are the top-level process
    // of the build and nothing else in this process uses those descriptors;
    // invalid values make it return None and we create our own jobserver.
    let jobserver = unsafe { Client::from_env() }.or_else(|| {
        tracing::debug!("Creating new jobserver with {} jobs", jobs);
        Client::new(jobs).ok()
    });

    let options = ExecuteOptions {
        synthesis: SynthesisOptions {
            debug: args.debug,
            verbose: args.verbose,
            jobs,
            generator,
            extra_definitions: args.extra_make_vars.clone(),
        },
        clean: if args.clean {
            CleanMode::UninstallThenClean
        } else {
            CleanMode::None
        },
        stop_after_clean: args.clean && !args.clean_build,
        ..ExecuteOptions::new(arch.as_str(), variant.as_str())
    };

    let mut executor = Executor::new(&project).with_progress(!args.verbose);
    if args.verbose {
        executor = executor.with_output(Arc::new(|line: &str| println!("{}", line)));
    }
    if let Some(js) = jobserver {
        executor = executor.with_jobserver(js);
    }

    let mut session = BuildSession::new();
    let report = executor
        .execute_plan(&plan, &options, &mut session)
        .into_diagnostic()?;

    println!();
    show_info(&project, &arch, &variant);
    println!("==== The following packages are specified: ====");
    for name in &selected {
        println!("  {}", name);
    }

    let host_build = project.config().is_host(&arch);
    let failing = report.failing_package.as_ref().map(|package| {
        let in_host_phase =
            !host_build && report.failing_arch.as_deref() == Some(project.host());
        if in_host_phase {
            format!("{}(host)", package)
        } else {
            package.clone()
        }
    });
    let build_list = plan
        .host_tools
        .iter()
        .map(|tool| format!("{}(host)", tool))
        .chain(plan.target.iter().cloned());

    println!("\n==== Build status: ====");
    let mut symbol = '>';
    for name in build_list {
        if failing.as_deref() == Some(name.as_str()) {
            symbol = '?';
        }
        println!("{} {}", symbol, name);
        if symbol == '?' {
            symbol = ' ';
        }
    }
    println!("Log: {}", project.log_file(&arch));

    match report.status {
        RunStatus::Ok => {
            println!("==== Success! ====");
            Ok(())
        }
        RunStatus::Break => {
            println!("==== Failure! ====");
            Err(miette::miette!("Build cancelled"))
        }
        RunStatus::Failed => {
            println!("==== Failure! ====");
            match report.error {
                Some(error) => Err(miette::Report::new(error)),
                None => Err(miette::miette!("Build failed")),
            }
        }
    }
}

fn show_info(project: &Project, arch: &str, variant: &str) {
    let config = project.config();
    println!("================================================================");
    println!("            buildcentral version {}", env!("CARGO_PKG_VERSION"));
    println!("Project: {}", config.project_name);
    println!(
        "Supported target architectures: {}",
        config.architectures.join(", ")
    );
    let variants: Vec<&str> = config.variants.keys().map(String::as_str).collect();
    println!("Supported variants: {}", variants.join(", "));
    println!("Building architecture: {}", arch);
    println!("Building variant: {}", variant);
    println!("================================================================");
}

fn show_generators() {
    println!("=======================CMake Generator==========================");
    for generator in Generator::ALL {
        println!("{:<8} {}", generator.id(), generator.cmake_name());
    }
    println!("================================================================");
}

/// Print the files each package installed, or ask for a build first
fn show_installed(project: &Project, arch: &str, variant: &str, packages: &[String]) -> Result<()> {
    let mut not_built = Vec::new();
    for package in packages {
        match project
            .installed_files(arch, package, variant)
            .into_diagnostic()?
        {
            InstalledFiles::NotBuilt => not_built.push(package.as_str()),
            InstalledFiles::Files(files) => {
                println!("> {}", package);
                for file in files {
                    println!("{}", file);
                }
            }
        }
    }
    if !not_built.is_empty() {
        println!(
            "==== Warning! Please build the following packages before the install list is available. ===="
        );
        for package in not_built {
            println!("  {}", package);
        }
    }

    show_info(project, arch, variant);
    show_generators();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Debug, Parser)]
    struct TestCli {
        #[command(flatten)]
        args: BuildArgs,
    }

    #[test]
    fn test_parse_short_flags() {
        let cli = TestCli::parse_from([
            "buildcentral",
            "-t",
            "arm",
            "-m",
            "full",
            "-cb",
            "-a",
            "-j",
            "8",
            "-g",
            "unix",
            "-D",
            "A=1,B",
            "zlib,app",
        ]);
        let args = cli.args;
        assert_eq!(args.target_arch.as_deref(), Some("arm"));
        assert_eq!(args.variant.as_deref(), Some("full"));
        assert!(args.clean && args.clean_build && args.dependencies);
        assert_eq!(args.jobs, 8);
        assert_eq!(args.generator.as_deref(), Some("unix"));
        assert_eq!(args.extra_make_vars, vec!["A=1", "B"]);
        assert_eq!(args.packages.as_deref(), Some("zlib,app"));
    }

    #[test]
    fn test_defaults() {
        let args = TestCli::parse_from(["buildcentral"]).args;
        assert_eq!(args.jobs, 0);
        assert!(args.packages.is_none());
        assert!(!args.verbose && !args.list && !args.info && !args.exclusive);
    }
}
