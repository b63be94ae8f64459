//! Build execution
//!
//! Packages run strictly one after another, one stage at a time. A run first
//! cleans every requested package (when asked to), then builds them in order:
//! archive extraction, source check, working-directory collision handling,
//! configure, then build or install. The first failing command halts the run;
//! a cancellation request kills the in-flight command and halts it with a
//! `Break` status.

use std::fs::File;

use camino::Utf8Path;
use flate2::read::GzDecoder;

use crate::order::BuildPlan;
use crate::project::Project;
use crate::{Error, Result};

use super::command::{Stage, SynthesisOptions, synthesize};
use super::command_logger::{CommandOutcome, LogCallback, run_command_with_logging};
use super::probe::{BuildKind, FsProbe, PackageProbe};
use super::progress::BuildProgress;
use super::session::{BuildSession, InFlight, Step};

/// What happens to a package's previous build before it is built again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CleanMode {
    #[default]
    None,
    /// Run the clean stage
    CleanOnly,
    /// Run the uninstall stage for installed packages, then clean
    UninstallThenClean,
}

/// Parameters of one execution
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    pub arch: String,
    pub variant: String,
    pub synthesis: SynthesisOptions,
    pub clean: CleanMode,
    /// Return right after the clean phase
    pub stop_after_clean: bool,
}

impl ExecuteOptions {
    pub fn new(arch: impl Into<String>, variant: impl Into<String>) -> Self {
        Self {
            arch: arch.into(),
            variant: variant.into(),
            synthesis: SynthesisOptions::default(),
            clean: CleanMode::None,
            stop_after_clean: false,
        }
    }

    fn for_arch(&self, arch: &str) -> Self {
        Self {
            arch: arch.to_string(),
            ..self.clone()
        }
    }
}

/// Final state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Ok,
    /// Cancelled on request
    Break,
    Failed,
}

/// Outcome of a run
#[derive(Debug)]
pub struct RunReport {
    pub status: RunStatus,
    pub failing_package: Option<String>,
    pub failing_arch: Option<String>,
    /// Why the run failed
    pub error: Option<Error>,
    /// Commands started and directories removed, in order
    pub steps: Vec<Step>,
}

impl RunReport {
    pub fn is_ok(&self) -> bool {
        self.status == RunStatus::Ok
    }

    fn ok(steps: Vec<Step>) -> Self {
        Self {
            status: RunStatus::Ok,
            failing_package: None,
            failing_arch: None,
            error: None,
            steps,
        }
    }
}

/// Why a run stopped early
enum Halt {
    Break,
    Failed { package: String, error: Error },
}

impl Halt {
    fn failed(package: &str, error: Error) -> Self {
        Halt::Failed {
            package: package.to_string(),
            error,
        }
    }
}

/// How a single stage ended when it did not halt the run
enum StageOutcome {
    /// The stage does not apply to the package's build kind
    Skipped,
    Succeeded,
    ExitFailure(Option<i32>),
}

/// Runs package build stages for a project
pub struct Executor<'a> {
    project: &'a Project,
    probe: Box<dyn PackageProbe + 'a>,
    show_progress: bool,
    /// Optional jobserver client handed to build and install commands
    jobserver: Option<jobserver::Client>,
    output: Option<LogCallback>,
}

impl<'a> Executor<'a> {
    pub fn new(project: &'a Project) -> Self {
        Self {
            project,
            probe: Box::new(FsProbe),
            show_progress: false,
            jobserver: None,
            output: None,
        }
    }

    /// Replace the filesystem probe used to classify packages
    pub fn with_probe(mut self, probe: impl PackageProbe + 'a) -> Self {
        self.probe = Box::new(probe);
        self
    }

    /// Draw progress bars while running
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Set the jobserver client for parallel build coordination
    pub fn with_jobserver(mut self, client: jobserver::Client) -> Self {
        self.jobserver = Some(client);
        self
    }

    /// Receive every output line of every command
    pub fn with_output(mut self, output: LogCallback) -> Self {
        self.output = Some(output);
        self
    }

    /// Run the host tool order on the host architecture, then the target order
    pub fn execute_plan(
        &self,
        plan: &BuildPlan,
        options: &ExecuteOptions,
        session: &mut BuildSession,
    ) -> Result<RunReport> {
        session.cancel_handle().reset();

        let mut steps = Vec::new();
        if !plan.host_tools.is_empty() {
            let host_options = options.for_arch(self.project.host());
            let report = self.run_packages(&plan.host_tools, &host_options, session)?;
            if !report.is_ok() {
                return Ok(report);
            }
            steps = report.steps;
        }

        let mut report = self.run_packages(&plan.target, options, session)?;
        steps.append(&mut report.steps);
        report.steps = steps;
        Ok(report)
    }

    /// Run `packages` in the given order on `options.arch`
    pub fn execute(
        &self,
        packages: &[String],
        options: &ExecuteOptions,
        session: &mut BuildSession,
    ) -> Result<RunReport> {
        session.cancel_handle().reset();
        self.run_packages(packages, options, session)
    }

    /// Run `packages` without clearing a cancellation requested earlier
    fn run_packages(
        &self,
        packages: &[String],
        options: &ExecuteOptions,
        session: &mut BuildSession,
    ) -> Result<RunReport> {
        let packages: Vec<&str> = packages
            .iter()
            .map(String::as_str)
            .filter(|p| *p != crate::graph::BUILD_ALL)
            .collect();

        session.open_log(&self.project.log_file(&options.arch))?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::build("Failed to create async runtime", e.to_string()))?;

        let progress = self
            .show_progress
            .then(|| BuildProgress::new(packages.len()));
        let mut run = Run {
            executor: self,
            options,
            session,
            progress,
        };
        let result = runtime.block_on(run.run(&packages));
        if let Some(progress) = &run.progress {
            progress.finish();
        }

        let session = run.session;
        let steps = session.take_steps();
        session.finish();

        let report = match result {
            Ok(()) => RunReport::ok(steps),
            Err(Halt::Break) => {
                tracing::warn!("Build of {} cancelled", options.arch);
                RunReport {
                    status: RunStatus::Break,
                    failing_package: None,
                    failing_arch: None,
                    error: None,
                    steps,
                }
            }
            Err(Halt::Failed { package, error }) => {
                tracing::error!("{}", error);
                RunReport {
                    status: RunStatus::Failed,
                    failing_package: Some(package),
                    failing_arch: Some(options.arch.clone()),
                    error: Some(error),
                    steps,
                }
            }
        };
        Ok(report)
    }
}

/// State of one `execute` call
struct Run<'r, 'a> {
    executor: &'r Executor<'a>,
    options: &'r ExecuteOptions,
    session: &'r mut BuildSession,
    progress: Option<BuildProgress>,
}

impl Run<'_, '_> {
    fn project(&self) -> &Project {
        self.executor.project
    }

    fn check_cancelled(&self) -> std::result::Result<(), Halt> {
        if self.session.is_cancelled() {
            Err(Halt::Break)
        } else {
            Ok(())
        }
    }

    async fn run(&mut self, packages: &[&str]) -> std::result::Result<(), Halt> {
        if self.options.clean != CleanMode::None {
            for package in packages {
                self.check_cancelled()?;
                self.clean_package(package, self.options.clean).await?;
            }
        }
        if self.options.stop_after_clean {
            return Ok(());
        }

        for package in packages {
            self.check_cancelled()?;
            self.build_package(package).await?;
        }
        tracing::info!(
            "Built {} package(s) for {}/{}",
            packages.len(),
            self.options.arch,
            self.options.variant
        );
        Ok(())
    }

    /// Uninstall and clean a package's previous build. Only cancellation and
    /// an unknown package halt the run; command failures are logged.
    async fn clean_package(&mut self, package: &str, mode: CleanMode) -> std::result::Result<(), Halt> {
        let (arch, variant) = (&self.options.arch, &self.options.variant);
        let project = self.project();
        let paths = project
            .package_paths(arch, package, variant)
            .map_err(|e| Halt::failed(package, e))?;
        let install = project
            .package(arch, package)
            .map_err(|e| Halt::failed(package, e))?
            .install;

        let kind = self.executor.probe.build_kind(&paths.source_dir);
        let work_dir = if kind == BuildKind::CMake {
            paths.build_dir.clone()
        } else {
            paths.source_dir.clone()
        };
        if !work_dir.exists() {
            tracing::debug!("Nothing to clean for {} at {}", package, work_dir);
            return Ok(());
        }
        self.session.set_current_package(package);

        let mut stages = Vec::new();
        if mode == CleanMode::UninstallThenClean && install {
            stages.push(Stage::Uninstall);
        }
        if mode != CleanMode::None {
            stages.push(Stage::Clean);
        }
        for stage in stages {
            match self.run_stage(package, kind, stage, &work_dir).await {
                Ok(StageOutcome::ExitFailure(code)) => {
                    tracing::warn!("{} of {} exited with {:?}", stage, package, code);
                }
                Ok(_) => {}
                Err(Halt::Break) => return Err(Halt::Break),
                Err(Halt::Failed { error, .. }) => {
                    tracing::warn!("{} of {} did not run: {}", stage, package, error);
                }
            }
        }

        if kind == BuildKind::CMake {
            tracing::info!("Removing working directory: {}", work_dir);
            if let Err(e) = std::fs::remove_dir_all(&work_dir) {
                tracing::warn!("Failed to remove {}: {}", work_dir, e);
            }
            self.session.record(Step::RemoveDir {
                package: package.to_string(),
                path: work_dir,
            });
        }
        Ok(())
    }

    async fn build_package(&mut self, package: &str) -> std::result::Result<(), Halt> {
        self.session.set_current_package(package);
        let (arch, variant) = (&self.options.arch, &self.options.variant);
        let project = self.project();
        let paths = project
            .package_paths(arch, package, variant)
            .map_err(|e| Halt::failed(package, e))?;
        let install = project
            .package(arch, package)
            .map_err(|e| Halt::failed(package, e))?
            .install;

        if let Some(archive) = &paths.archive {
            let into = paths.source_dir.parent().unwrap_or(paths.source_dir.as_path());
            tracing::info!("Extracting {} into {}", archive, into);
            extract_archive(archive, into).map_err(|e| {
                Halt::failed(
                    package,
                    Error::package_io(
                        package,
                        format!("{} does not exist or is not a valid tarball: {}", archive, e),
                    ),
                )
            })?;
            if !paths.source_dir.exists() {
                return Err(Halt::failed(
                    package,
                    Error::package_io(
                        package,
                        format!("{} was not extracted to {}", archive, paths.source_dir),
                    ),
                ));
            }
        }

        if !paths.source_dir.is_dir() {
            return Err(Halt::failed(
                package,
                Error::package_io(
                    package,
                    format!("base directory {} does not exist", paths.source_dir),
                ),
            ));
        }

        let kind = self.executor.probe.build_kind(&paths.source_dir);
        let work_dir = match kind {
            BuildKind::CMake => paths.build_dir.clone(),
            BuildKind::Unknown => {
                return Err(Halt::failed(
                    package,
                    Error::package_io(
                        package,
                        format!(
                            "cannot create a build command: no build_package, CMakeLists.txt, Makefile or GNUmakefile in {}",
                            paths.source_dir
                        ),
                    ),
                ));
            }
            _ => paths.source_dir.clone(),
        };

        if let Some(earlier) = self.session.claim_work_dir(&work_dir, package) {
            tracing::warn!(
                "Package {} is cleared because the work path of {} overlaps with it",
                earlier,
                package
            );
            match self.clean_package(&earlier, CleanMode::CleanOnly).await {
                Err(Halt::Break) => return Err(Halt::Break),
                Err(Halt::Failed { error, .. }) => {
                    tracing::warn!("Failed to clear {}: {}", earlier, error);
                }
                Ok(()) => {}
            }
            self.session.set_current_package(package);
        }

        std::fs::create_dir_all(&work_dir).map_err(|e| {
            Halt::failed(
                package,
                Error::package_io(package, format!("cannot create work path {}: {}", work_dir, e)),
            )
        })?;

        if let Some(progress) = &mut self.progress {
            progress.start_package(package, &kind.to_string());
        }

        let final_stage = if install { Stage::Install } else { Stage::Build };
        for stage in [Stage::Configure, final_stage] {
            let result = match self.run_stage(package, kind, stage, &work_dir).await {
                Ok(StageOutcome::ExitFailure(code)) => Err(Halt::failed(
                    package,
                    Error::Process {
                        package: package.to_string(),
                        operation: stage.to_string(),
                        code,
                    },
                )),
                Ok(_) => Ok(()),
                Err(halt) => Err(halt),
            };
            if let Err(halt) = result {
                if let Some(progress) = &mut self.progress {
                    let reason = match &halt {
                        Halt::Break => "cancelled".to_string(),
                        Halt::Failed { error, .. } => error.to_string(),
                    };
                    progress.fail_package(package, &reason);
                }
                return Err(halt);
            }
        }

        if let Some(progress) = &mut self.progress {
            progress.finish_package(package);
        }
        Ok(())
    }

    /// Synthesize and run one stage of `package` inside `cwd`
    async fn run_stage(
        &mut self,
        package: &str,
        kind: BuildKind,
        stage: Stage,
        cwd: &Utf8Path,
    ) -> std::result::Result<StageOutcome, Halt> {
        self.check_cancelled()?;
        let options = self.options;
        let command = synthesize(
            self.executor.project,
            &options.arch,
            &options.variant,
            package,
            kind,
            stage,
            &options.synthesis,
        )
        .map_err(|e| Halt::failed(package, e))?;
        let Some(command) = command else {
            return Ok(StageOutcome::Skipped);
        };

        tracing::info!("{} {} ({}/{})", stage, package, options.arch, options.variant);
        if let Some(progress) = &self.progress {
            progress.update_package(package, &stage.to_string());
        }
        self.session.record(Step::Command {
            package: package.to_string(),
            stage,
            argv: command.argv.clone(),
            cwd: cwd.to_path_buf(),
        });

        let mut cmd = tokio::process::Command::new(command.program());
        cmd.args(command.args())
            .envs(&command.env)
            .current_dir(cwd);
        if matches!(stage, Stage::Build | Stage::Install) {
            if let Some(js) = &self.executor.jobserver {
                js.configure(cmd.as_std_mut());
                tracing::debug!("Configured jobserver for {} of {}", stage, package);
            }
        }

        let cancel = self.session.cancel_handle();
        let in_flight = self.session.in_flight_handle();
        let output = self.executor.output.clone();
        let progress = &self.progress;
        let session = &mut *self.session;
        let operation = stage.to_string();

        let outcome = run_command_with_logging(
            &mut cmd,
            package,
            &operation,
            &cancel,
            |pid| {
                let mut slot = in_flight
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                *slot = Some(InFlight {
                    package: package.to_string(),
                    stage,
                    pid,
                });
            },
            |line| {
                if let Some(output) = &output {
                    output(line);
                }
                session.log_line(line);
                if let Some(progress) = progress {
                    progress.update_package(package, line);
                }
            },
        )
        .await;
        session.set_in_flight(None);

        match outcome.map_err(|e| Halt::failed(package, e))? {
            CommandOutcome::Cancelled => Err(Halt::Break),
            CommandOutcome::Exited(status) if status.success() => Ok(StageOutcome::Succeeded),
            CommandOutcome::Exited(status) => Ok(StageOutcome::ExitFailure(status.code())),
        }
    }
}

/// Unpack a `.tar`, `.tar.gz` or `.tgz` archive into `into`
fn extract_archive(archive: &Utf8Path, into: &Utf8Path) -> std::io::Result<()> {
    let file = File::open(archive)?;
    std::fs::create_dir_all(into)?;
    let name = archive.as_str();
    if name.ends_with(".gz") || name.ends_with(".tgz") {
        tar::Archive::new(GzDecoder::new(file)).unpack(into)
    } else {
        tar::Archive::new(file).unpack(into)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::order::ResolveRequest;
    use camino::Utf8PathBuf;
    use serde_json::json;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::{Arc, Mutex};

    fn write_script(dir: &Utf8Path, body: &str) {
        std::fs::create_dir_all(dir).unwrap();
        let script = dir.join("build_package");
        std::fs::write(&script, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn project(root: &Utf8Path, packages: serde_json::Value, build: &[&str]) -> Project {
        let text = json!({
            "PROJECT_NAME": "demo",
            "HOST": "host",
            "TARGETS": ["host"],
            "DEFAULT_TARGET": "host",
            "VARIANTS": {"full": {"MACRO": "FULL"}},
            "DEFAULT_VARIANT": "full",
            "PACKAGES": packages,
            "BUILD": {"host": {"full": {"PACKAGES": build}}}
        })
        .to_string();
        let mut config = Config::parse(&text, root, Utf8Path::new("build_central.cfg")).unwrap();
        let rc = root.join("rc");
        std::fs::write(
            &rc,
            json!({"host": {"TARGET_ARCH": "x86_64", "TARGET_OS": "linux"}}).to_string(),
        )
        .unwrap();
        config.load_toolchains(&[rc]).unwrap();
        Project::from_config(config).unwrap()
    }

    fn commands(steps: &[Step]) -> Vec<(String, Stage)> {
        steps
            .iter()
            .filter_map(|s| match s {
                Step::Command { package, stage, .. } => Some((package.clone(), *stage)),
                Step::RemoveDir { .. } => None,
            })
            .collect()
    }

    #[test]
    fn test_builds_in_order_and_logs_output() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(temp_dir.path()).unwrap();
        write_script(&root.join("src/a"), "echo \"a $1 $2\"");
        write_script(&root.join("src/b"), "echo \"b $1 $2\"");
        let project = project(
            root,
            json!({
                "a": {"Path": "src/a", "Dependency": ["b"]},
                "b": {"Path": "src/b", "Install": false}
            }),
            &["a"],
        );

        let plan = project.resolve("host", "full", &ResolveRequest::all()).unwrap();
        assert_eq!(plan.target, vec!["b", "a"]);

        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        let executor = Executor::new(&project)
            .with_output(Arc::new(move |line: &str| sink.lock().unwrap().push(line.to_string())));
        let mut session = BuildSession::new();
        let report = executor
            .execute_plan(&plan, &ExecuteOptions::new("host", "full"), &mut session)
            .unwrap();

        assert_eq!(report.status, RunStatus::Ok);
        assert_eq!(*lines.lock().unwrap(), vec!["b -m FULL", "a -i FULL"]);
        assert_eq!(
            commands(&report.steps),
            vec![("b".to_string(), Stage::Build), ("a".to_string(), Stage::Install)]
        );

        let log = std::fs::read_to_string(project.log_file("host")).unwrap();
        assert_eq!(log, "b -m FULL\na -i FULL\n");
    }

    #[test]
    fn test_failure_halts_remaining_packages() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(temp_dir.path()).unwrap();
        write_script(&root.join("src/a"), "exit 0");
        write_script(&root.join("src/b"), "exit 4");
        write_script(&root.join("src/c"), "exit 0");
        let project = project(
            root,
            json!({
                "a": {"Path": "src/a"},
                "b": {"Path": "src/b"},
                "c": {"Path": "src/c"}
            }),
            &["a", "b", "c"],
        );

        let order: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let mut session = BuildSession::new();
        let report = Executor::new(&project)
            .execute(&order, &ExecuteOptions::new("host", "full"), &mut session)
            .unwrap();

        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.failing_package.as_deref(), Some("b"));
        assert!(matches!(
            report.error,
            Some(Error::Process { code: Some(4), .. })
        ));
        assert!(!commands(&report.steps).iter().any(|(p, _)| p == "c"));
    }

    #[test]
    fn test_missing_source_is_io_failure() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(temp_dir.path()).unwrap();
        let project = project(root, json!({"a": {"Path": "src/missing"}}), &["a"]);

        let mut session = BuildSession::new();
        let report = Executor::new(&project)
            .execute(&["a".to_string()], &ExecuteOptions::new("host", "full"), &mut session)
            .unwrap();

        assert_eq!(report.status, RunStatus::Failed);
        assert!(matches!(report.error, Some(Error::PackageIo { .. })));
        assert!(report.steps.is_empty());
    }

    #[test]
    fn test_unknown_kind_fails() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(temp_dir.path()).unwrap();
        std::fs::create_dir_all(root.join("src/a")).unwrap();
        let project = project(root, json!({"a": {"Path": "src/a"}}), &["a"]);

        let mut session = BuildSession::new();
        let report = Executor::new(&project)
            .execute(&["a".to_string()], &ExecuteOptions::new("host", "full"), &mut session)
            .unwrap();
        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.failing_package.as_deref(), Some("a"));
    }

    #[test]
    fn test_probe_decides_build_kind() {
        struct NothingBuildable;
        impl PackageProbe for NothingBuildable {
            fn is_executable(&self, _path: &Utf8Path) -> bool {
                false
            }

            fn is_file(&self, _path: &Utf8Path) -> bool {
                false
            }
        }

        let temp_dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(temp_dir.path()).unwrap();
        write_script(&root.join("src/a"), "exit 0");
        let project = project(root, json!({"a": {"Path": "src/a"}}), &["a"]);

        let mut session = BuildSession::new();
        let report = Executor::new(&project)
            .with_probe(NothingBuildable)
            .execute(&["a".to_string()], &ExecuteOptions::new("host", "full"), &mut session)
            .unwrap();
        assert_eq!(report.status, RunStatus::Failed);
        assert!(matches!(report.error, Some(Error::PackageIo { .. })));
        assert!(report.steps.is_empty());
    }

    #[test]
    fn test_archive_is_extracted() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(temp_dir.path()).unwrap();

        let staging = root.join("staging/zlib");
        write_script(&staging, "echo extracted");
        let archive_path = root.join("src/zlib.tar");
        std::fs::create_dir_all(archive_path.parent().unwrap()).unwrap();
        {
            let file = File::create(&archive_path).unwrap();
            let mut builder = tar::Builder::new(file);
            builder.append_dir_all("zlib", &staging).unwrap();
            builder.finish().unwrap();
        }

        let project = project(root, json!({"zlib": {"Path": "src/zlib.tar"}}), &["zlib"]);
        let mut session = BuildSession::new();
        let report = Executor::new(&project)
            .execute(&["zlib".to_string()], &ExecuteOptions::new("host", "full"), &mut session)
            .unwrap();

        assert_eq!(report.status, RunStatus::Ok, "{:?}", report.error);
        assert!(root.join("output/src/zlib/build_package").is_file());
    }

    #[test]
    fn test_bad_archive_is_io_failure() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(temp_dir.path()).unwrap();
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::write(root.join("src/zlib.tar.gz"), "not a tarball").unwrap();

        let project = project(root, json!({"zlib": {"Path": "src/zlib.tar.gz"}}), &["zlib"]);
        let mut session = BuildSession::new();
        let report = Executor::new(&project)
            .execute(&["zlib".to_string()], &ExecuteOptions::new("host", "full"), &mut session)
            .unwrap();

        assert_eq!(report.status, RunStatus::Failed);
        assert!(matches!(report.error, Some(Error::PackageIo { .. })));
    }

    #[test]
    fn test_shared_work_dir_clears_earlier_package() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(temp_dir.path()).unwrap();
        write_script(&root.join("src/mono"), "echo \"$1\"");
        let project = project(
            root,
            json!({
                "x": {"Path": "src/mono", "Install": false},
                "y": {"Path": "src/mono", "Install": false}
            }),
            &["x", "y"],
        );

        let order = vec!["x".to_string(), "y".to_string()];
        let mut session = BuildSession::new();
        let report = Executor::new(&project)
            .execute(&order, &ExecuteOptions::new("host", "full"), &mut session)
            .unwrap();

        assert_eq!(report.status, RunStatus::Ok);
        assert_eq!(
            commands(&report.steps),
            vec![
                ("x".to_string(), Stage::Build),
                ("x".to_string(), Stage::Clean),
                ("y".to_string(), Stage::Build),
            ]
        );
    }

    #[test]
    fn test_shared_work_dir_clears_most_recent_user() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(temp_dir.path()).unwrap();
        write_script(&root.join("src/mono"), "echo \"$1\"");
        let project = project(
            root,
            json!({
                "x": {"Path": "src/mono", "Install": false},
                "y": {"Path": "src/mono", "Install": false},
                "z": {"Path": "src/mono", "Install": false}
            }),
            &["x", "y", "z"],
        );

        let order = vec!["x".to_string(), "y".to_string(), "z".to_string()];
        let mut session = BuildSession::new();
        let report = Executor::new(&project)
            .execute(&order, &ExecuteOptions::new("host", "full"), &mut session)
            .unwrap();

        assert_eq!(report.status, RunStatus::Ok);
        assert_eq!(
            commands(&report.steps),
            vec![
                ("x".to_string(), Stage::Build),
                ("x".to_string(), Stage::Clean),
                ("y".to_string(), Stage::Build),
                ("y".to_string(), Stage::Clean),
                ("z".to_string(), Stage::Build),
            ]
        );
    }

    #[test]
    fn test_clean_only_stops_after_clean() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(temp_dir.path()).unwrap();
        write_script(&root.join("src/a"), "echo \"$1\"; [ \"$1\" != -u ] || exit 1");
        let project = project(root, json!({"a": {"Path": "src/a"}}), &["a"]);

        let options = ExecuteOptions {
            clean: CleanMode::UninstallThenClean,
            stop_after_clean: true,
            ..ExecuteOptions::new("host", "full")
        };
        let mut session = BuildSession::new();
        let report = Executor::new(&project)
            .execute(&["a".to_string()], &options, &mut session)
            .unwrap();

        // A failing uninstall does not fail the run
        assert_eq!(report.status, RunStatus::Ok);
        assert_eq!(
            commands(&report.steps),
            vec![("a".to_string(), Stage::Uninstall), ("a".to_string(), Stage::Clean)]
        );
    }

    #[test]
    fn test_cancel_during_build_is_break() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(temp_dir.path()).unwrap();
        write_script(&root.join("src/a"), "while true; do echo tick; sleep 0.05; done");
        write_script(&root.join("src/b"), "echo never");
        let project = project(
            root,
            json!({"a": {"Path": "src/a"}, "b": {"Path": "src/b"}}),
            &["a", "b"],
        );

        let mut session = BuildSession::new();
        let cancel = session.cancel_handle();
        let executor = Executor::new(&project)
            .with_output(Arc::new(move |_line: &str| cancel.cancel()));
        let order = vec!["a".to_string(), "b".to_string()];
        let report = executor
            .execute(&order, &ExecuteOptions::new("host", "full"), &mut session)
            .unwrap();

        assert_eq!(report.status, RunStatus::Break);
        assert_eq!(report.failing_package, None);
        assert!(!commands(&report.steps).iter().any(|(p, _)| p == "b"));
        assert_eq!(session.in_flight(), None);
    }

    #[test]
    fn test_pending_cancel_stops_next_phase() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(temp_dir.path()).unwrap();
        write_script(&root.join("src/a"), "echo built");
        let project = project(root, json!({"a": {"Path": "src/a"}}), &["a"]);
        let executor = Executor::new(&project);
        let order = vec!["a".to_string()];
        let options = ExecuteOptions::new("host", "full");

        // A cancel landing after one phase finished must stop the next one
        let mut session = BuildSession::new();
        session.cancel_handle().cancel();
        let report = executor.run_packages(&order, &options, &mut session).unwrap();
        assert_eq!(report.status, RunStatus::Break);
        assert!(report.steps.is_empty());

        // A new run starts from a clear flag
        let report = executor.execute(&order, &options, &mut session).unwrap();
        assert_eq!(report.status, RunStatus::Ok);
        assert_eq!(commands(&report.steps), vec![("a".to_string(), Stage::Build)]);
    }

    #[test]
    fn test_extract_archive_gz() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(temp_dir.path()).unwrap();
        let archive: Utf8PathBuf = root.join("pkg.tgz");
        {
            let file = File::create(&archive).unwrap();
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            let mut builder = tar::Builder::new(encoder);
            let data = b"all:\n";
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, "pkg/Makefile", &data[..])
                .unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }

        extract_archive(&archive, &root.join("out")).unwrap();
        assert!(root.join("out/pkg/Makefile").is_file());
    }
}
