//! End-to-end builds of fixture projects driven by build_package scripts

#![cfg(unix)]

use std::sync::{Arc, Mutex};

use buildcentral::Error;
use buildcentral::build::{BuildSession, CleanMode, ExecuteOptions, Executor, RunStatus, Stage, Step};
use buildcentral::order::ResolveRequest;
use buildcentral_integration_tests::fixture::{HOST, ProjectFixture, TARGET, VARIANT};
use serde_json::json;

fn executed(steps: &[Step]) -> Vec<String> {
    steps
        .iter()
        .filter_map(|step| match step {
            Step::Command { package, stage, .. } => Some(format!("{}:{}", package, stage)),
            Step::RemoveDir { .. } => None,
        })
        .collect()
}

fn collecting_executor<'a>(
    project: &'a buildcentral::project::Project,
) -> (Executor<'a>, Arc<Mutex<Vec<String>>>) {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&lines);
    let executor = Executor::new(project)
        .with_output(Arc::new(move |line: &str| sink.lock().unwrap().push(line.to_string())));
    (executor, lines)
}

#[test]
fn test_cross_build_runs_host_tools_first() {
    let mut fixture = ProjectFixture::new();
    let host_bin = fixture.root().join("output/stage/host/bin");
    fixture.script(
        "workspace/codegen",
        &format!("mkdir -p {}\necho \"codegen $1\"", host_bin),
    );
    fixture.script("workspace/lib", "echo \"lib $1 $2\"");
    fixture.script("workspace/app", "echo \"app $1 $2\"\necho \"PATH=$PATH\"");
    fixture
        .package("codegen", json!({"Path": "workspace/codegen"}), &[HOST])
        .package("lib", json!({"Path": "workspace/lib", "Install": false}), &[TARGET])
        .package(
            "app",
            json!({"Path": "workspace/app", "Dependency": ["lib"], "Tools": ["codegen"]}),
            &[TARGET],
        );
    let project = fixture.load().unwrap();

    let plan = project
        .resolve(TARGET, VARIANT, &ResolveRequest::packages(["app"]))
        .unwrap();
    assert_eq!(plan.host_tools, vec!["codegen"]);
    assert_eq!(plan.target, vec!["lib", "app"]);

    let (executor, lines) = collecting_executor(&project);
    let mut session = BuildSession::new();
    let report = executor
        .execute_plan(&plan, &ExecuteOptions::new(TARGET, VARIANT), &mut session)
        .unwrap();

    assert_eq!(report.status, RunStatus::Ok, "{:?}", report.error);
    assert_eq!(
        executed(&report.steps),
        vec!["codegen:install", "lib:build", "app:install"]
    );

    let lines = lines.lock().unwrap();
    assert_eq!(lines[0], "codegen -i");
    assert_eq!(lines[1], "lib -m VARIANT_FULL");
    assert_eq!(lines[2], "app -i VARIANT_FULL");
    // The host tool's stage bin directory exists by now and is searched
    assert!(lines[3].starts_with("PATH="));
    assert!(lines[3].contains(host_bin.as_str()));

    let host_log = std::fs::read_to_string(project.log_file(HOST)).unwrap();
    assert!(host_log.contains("codegen -i"));
    let target_log = std::fs::read_to_string(project.log_file(TARGET)).unwrap();
    assert!(target_log.contains("app -i VARIANT_FULL"));
}

#[test]
fn test_failure_stops_the_run() {
    let mut fixture = ProjectFixture::new();
    fixture.script("workspace/a", "echo a");
    fixture.script("workspace/b", "echo broken >&2\nexit 2");
    fixture.script("workspace/c", "echo c");
    fixture
        .package("a", json!({"Path": "workspace/a"}), &[TARGET])
        .package("b", json!({"Path": "workspace/b", "Dependency": ["a"]}), &[TARGET])
        .package("c", json!({"Path": "workspace/c", "Dependency": ["b"]}), &[TARGET]);
    let project = fixture.load().unwrap();

    let plan = project
        .resolve(TARGET, VARIANT, &ResolveRequest::packages(["c"]))
        .unwrap();
    let (executor, lines) = collecting_executor(&project);
    let mut session = BuildSession::new();
    let report = executor
        .execute_plan(&plan, &ExecuteOptions::new(TARGET, VARIANT), &mut session)
        .unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.failing_package.as_deref(), Some("b"));
    assert_eq!(report.failing_arch.as_deref(), Some(TARGET));
    assert!(matches!(
        report.error,
        Some(Error::Process { ref operation, code: Some(2), .. }) if operation == "install"
    ));
    assert_eq!(executed(&report.steps), vec!["a:install", "b:install"]);
    // stderr is captured too
    assert!(lines.lock().unwrap().contains(&"broken".to_string()));
}

#[test]
fn test_shared_source_tree_is_cleaned_before_reuse() {
    let mut fixture = ProjectFixture::new();
    fixture.script("workspace/mono", "echo \"mono $1\"");
    fixture
        .package("mono-core", json!({"Path": "workspace/mono", "Install": false}), &[TARGET])
        .package(
            "mono-extra",
            json!({"Path": "workspace/mono", "Install": false, "Dependency": ["mono-core"]}),
            &[TARGET],
        );
    let project = fixture.load().unwrap();

    let plan = project.resolve(TARGET, VARIANT, &ResolveRequest::all()).unwrap();
    assert_eq!(plan.target, vec!["mono-core", "mono-extra"]);

    let mut session = BuildSession::new();
    let report = Executor::new(&project)
        .execute_plan(&plan, &ExecuteOptions::new(TARGET, VARIANT), &mut session)
        .unwrap();

    assert_eq!(report.status, RunStatus::Ok);
    assert_eq!(
        executed(&report.steps),
        vec!["mono-core:build", "mono-core:clean", "mono-extra:build"]
    );
}

#[test]
fn test_clean_then_build() {
    let mut fixture = ProjectFixture::new();
    fixture.script("workspace/a", "echo \"a $1\"");
    fixture.package("a", json!({"Path": "workspace/a"}), &[TARGET]);
    let project = fixture.load().unwrap();

    let options = ExecuteOptions {
        clean: CleanMode::UninstallThenClean,
        ..ExecuteOptions::new(TARGET, VARIANT)
    };
    let mut session = BuildSession::new();
    let report = Executor::new(&project)
        .execute(&["a".to_string()], &options, &mut session)
        .unwrap();

    assert_eq!(report.status, RunStatus::Ok);
    let stages: Vec<Stage> = report
        .steps
        .iter()
        .filter_map(|step| match step {
            Step::Command { stage, .. } => Some(*stage),
            Step::RemoveDir { .. } => None,
        })
        .collect();
    assert_eq!(stages, vec![Stage::Uninstall, Stage::Clean, Stage::Install]);
}

#[test]
fn test_cmake_package_work_dir_is_removed_on_clean() {
    let mut fixture = ProjectFixture::new();
    let source = fixture.root().join("workspace/cm");
    std::fs::create_dir_all(&source).unwrap();
    std::fs::write(source.join("CMakeLists.txt"), "project(cm)\n").unwrap();
    fixture.package("cm", json!({"Path": "workspace/cm"}), &[TARGET]);
    let project = fixture.load().unwrap();

    let build_dir = project.package_paths(TARGET, "cm", VARIANT).unwrap().build_dir;
    std::fs::create_dir_all(&build_dir).unwrap();

    let options = ExecuteOptions {
        clean: CleanMode::CleanOnly,
        stop_after_clean: true,
        ..ExecuteOptions::new(TARGET, VARIANT)
    };
    let mut session = BuildSession::new();
    let report = Executor::new(&project)
        .execute(&["cm".to_string()], &options, &mut session)
        .unwrap();

    // `make clean` fails in an unconfigured tree; the run still succeeds
    assert_eq!(report.status, RunStatus::Ok);
    assert!(!build_dir.exists());
    assert!(report.steps.iter().any(|step| matches!(
        step,
        Step::RemoveDir { package, path } if package == "cm" && *path == build_dir
    )));
}

#[test]
fn test_cycle_is_reported_before_anything_runs() {
    let mut fixture = ProjectFixture::new();
    fixture.script("workspace/a", "touch ran");
    fixture
        .package("a", json!({"Path": "workspace/a", "Dependency": ["b"]}), &[TARGET])
        .package("b", json!({"Path": "workspace/a", "Dependency": ["a"]}), &[TARGET]);

    let err = fixture.load().unwrap_err();
    match err {
        Error::CircularDependency { arch, cycles, .. } => {
            assert_eq!(arch, TARGET);
            assert_eq!(cycles, vec![vec!["a", "b", "a"]]);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(!fixture.root().join("workspace/a/ran").exists());
}
