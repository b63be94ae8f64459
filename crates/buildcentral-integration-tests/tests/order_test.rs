//! Build orders resolved from loaded projects

use buildcentral::Error;
use buildcentral::graph::BUILD_ALL;
use buildcentral::order::ResolveRequest;
use buildcentral_integration_tests::fixture::{HOST, ProjectFixture, TARGET, VARIANT};
use serde_json::json;

fn layered_fixture() -> ProjectFixture {
    let mut fixture = ProjectFixture::new();
    fixture
        .package("libc", json!({"Path": "external/libc"}), &[HOST, TARGET])
        .package("zlib", json!({"Path": "external/zlib", "Dependency": ["libc"]}), &[TARGET])
        .package("png", json!({"Path": "external/png", "Dependency": ["zlib", "libc"]}), &[TARGET])
        .package("ssl", json!({"Path": "external/ssl", "Dependency": ["libc"]}), &[TARGET])
        .package("curl", json!({"Path": "external/curl", "Dependency": ["ssl", "zlib"]}), &[TARGET])
        .package(
            "viewer",
            json!({"Path": "workspace/viewer", "Dependency": ["png", "curl"], "Tools": ["rcc"]}),
            &[TARGET],
        )
        .package("rcc", json!({"Path": "tools/rcc", "Dependency": ["libc"]}), &[HOST]);
    fixture
}

#[test]
fn test_every_package_follows_its_dependencies() {
    let project = layered_fixture().load().unwrap();
    let graph = project.graph(TARGET, VARIANT).unwrap();

    let plan = project.resolve(TARGET, VARIANT, &ResolveRequest::all()).unwrap();
    let mut sorted = plan.target.clone();
    sorted.sort();
    assert_eq!(sorted, vec!["curl", "libc", "png", "ssl", "viewer", "zlib"]);

    for (position, package) in plan.target.iter().enumerate() {
        for dependency in graph.dependencies(package) {
            let dep_position = plan.target.iter().position(|p| p == dependency).unwrap();
            assert!(
                dep_position < position,
                "{} must come before {}",
                dependency,
                package
            );
        }
    }

    assert_eq!(plan.host_tools, vec!["libc", "rcc"]);
    assert!(!plan.target.iter().any(|p| p == BUILD_ALL));
}

#[test]
fn test_single_package_pulls_only_what_it_needs() {
    let project = layered_fixture().load().unwrap();
    let plan = project
        .resolve(TARGET, VARIANT, &ResolveRequest::packages(["png"]))
        .unwrap();

    assert_eq!(plan.target, vec!["libc", "zlib", "png"]);
    assert!(plan.host_tools.is_empty());

    let only = project
        .resolve(
            TARGET,
            VARIANT,
            &ResolveRequest::packages(["png", "libc"]).without_dependencies(),
        )
        .unwrap();
    assert_eq!(only.target, vec!["libc", "png"]);
}

#[test]
fn test_exclusive_selection() {
    let project = layered_fixture().load().unwrap();
    let rest = project
        .packages_except(TARGET, VARIANT, &["viewer".to_string(), "curl".to_string()])
        .unwrap();
    assert_eq!(rest, vec!["libc", "png", "ssl", "zlib"]);
}

#[test]
fn test_undefined_tool_is_rejected_at_load() {
    let mut fixture = ProjectFixture::new();
    fixture.package(
        "app",
        json!({"Path": "workspace/app", "Tools": ["missing-tool"]}),
        &[TARGET],
    );

    match fixture.load().unwrap_err() {
        Error::UndefinedPackage { arch, package, referenced_by, .. } => {
            assert_eq!(arch, HOST);
            assert_eq!(package, "missing-tool");
            assert_eq!(referenced_by, "app");
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_current_directory_inference() {
    let project = layered_fixture().load().unwrap();
    let root = project.root().to_path_buf();

    assert_eq!(
        project.guess_current_packages(&root.join("external/zlib/src"), TARGET),
        vec!["zlib"]
    );
    assert_eq!(
        project.guess_current_packages(&root.join("project"), TARGET),
        vec![BUILD_ALL]
    );
}
