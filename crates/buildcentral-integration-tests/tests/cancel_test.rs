//! Cancelling a running build from another thread

#![cfg(unix)]

use std::thread;
use std::time::{Duration, Instant};

use buildcentral::build::{BuildSession, ExecuteOptions, Executor, RunStatus, Stage, Step};
use buildcentral::order::ResolveRequest;
use buildcentral_integration_tests::fixture::{ProjectFixture, TARGET, VARIANT};
use buildcentral_integration_tests::process_monitor::{
    ProcessMonitor, count_processes_matching, wait_until_gone,
};
use serde_json::json;

#[test]
fn test_cancel_kills_in_flight_process() {
    let mut fixture = ProjectFixture::new();
    let spinner = fixture.script(
        "workspace/spinner",
        "echo started\nwhile true; do echo tick; sleep 0.1; done",
    );
    fixture.script("workspace/after", "echo after");
    fixture
        .package("spinner", json!({"Path": "workspace/spinner"}), &[TARGET])
        .package(
            "after",
            json!({"Path": "workspace/after", "Dependency": ["spinner"]}),
            &[TARGET],
        );
    let project = fixture.load().unwrap();
    let plan = project
        .resolve(TARGET, VARIANT, &ResolveRequest::packages(["after"]))
        .unwrap();
    assert_eq!(plan.target, vec!["spinner", "after"]);

    let mut session = BuildSession::new();
    let cancel = session.cancel_handle();
    let in_flight = session.in_flight_handle();

    let canceller = thread::spawn(move || {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let running = in_flight.lock().unwrap().clone();
            if let Some(running) = running {
                thread::sleep(Duration::from_millis(300));
                cancel.cancel();
                return Some(running);
            }
            if Instant::now() >= deadline {
                cancel.cancel();
                return None;
            }
            thread::sleep(Duration::from_millis(20));
        }
    });

    let monitor = ProcessMonitor::start(spinner.as_str());
    let report = Executor::new(&project)
        .execute_plan(&plan, &ExecuteOptions::new(TARGET, VARIANT), &mut session)
        .unwrap();
    let observed = monitor.stop();
    let running = canceller.join().unwrap().expect("spinner never started");

    assert_eq!(running.package, "spinner");
    assert_eq!(running.stage, Stage::Install);
    assert!(running.pid.is_some());
    assert!(observed >= 1, "spinner was never observed running");

    assert_eq!(report.status, RunStatus::Break);
    assert_eq!(report.failing_package, None);
    assert!(report.error.is_none());
    assert!(!report.steps.iter().any(|step| matches!(
        step,
        Step::Command { package, .. } if package == "after"
    )));
    assert_eq!(session.in_flight(), None);

    assert!(wait_until_gone(spinner.as_str(), Duration::from_secs(2)));
    assert_eq!(count_processes_matching(spinner.as_str()), Ok(0));
}

#[test]
fn test_session_can_run_again_after_break() {
    let mut fixture = ProjectFixture::new();
    fixture.script("workspace/quick", "echo quick");
    fixture.package("quick", json!({"Path": "workspace/quick"}), &[TARGET]);
    let project = fixture.load().unwrap();

    let mut session = BuildSession::new();
    session.cancel_handle().cancel();

    // A cancellation left over from an earlier run does not stop a new one
    let report = Executor::new(&project)
        .execute(&["quick".to_string()], &ExecuteOptions::new(TARGET, VARIANT), &mut session)
        .unwrap();
    assert_eq!(report.status, RunStatus::Ok);
}
