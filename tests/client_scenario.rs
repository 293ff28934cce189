//! Client-under-test scenario against a fake container runtime.

#[macro_use]
mod common;

use common::*;
use std::time::Duration;
use tempfile::tempdir;
use wsconform::artifact::RelocationOutcome;
use wsconform::container::{MountMode, ReadinessPolicy};
use wsconform::{
    ConformanceRun, ContainerError, EndpointAddress, EndpointError, HarnessError,
    HarnessSettings, Role, RunConfig, RunResult,
};

fn init_test(name: &str) {
    init_test_logging();
    test_phase!(name);
}

#[test]
fn client_runs_against_mapped_port_and_reports_index() {
    init_test("client_runs_against_mapped_port_and_reports_index");
    let temp = tempdir().expect("temp dir");
    write_fuzzing_configs(temp.path());
    let config = RunConfig::from_base_directory(temp.path());
    let runtime = FakeRuntime {
        watch_mirror: Some(temp.path().join("target/reports-client")),
        ..FakeRuntime::default()
    };
    let events = std::rc::Rc::clone(&runtime.events);
    let mut run = ConformanceRun::new(runtime);

    test_section!("run");
    let mut calls = Vec::new();
    let mut client = |address: &EndpointAddress| {
        calls.push(address.clone());
        Ok::<_, EndpointError>(RunResult::elapsed(Duration::from_millis(3)))
    };
    let report = run
        .run_client_under_test(&config, &mut client)
        .expect("client scenario");

    test_section!("verify");
    assert_with_log!(
        calls == vec![EndpointAddress::new("localhost", 54321)],
        "client address",
        vec![EndpointAddress::new("localhost", 54321)],
        calls
    );
    assert!(report.report_index.ends_with("clients/index.html"));
    assert!(report.report_index.starts_with(&config.report_directory));
    assert_eq!(report.role, Role::ClientUnderTest);
    assert_eq!(
        report.client_result.as_ref().map(|r| r.elapsed),
        Some(Duration::from_millis(3))
    );

    let runtime = run.runtime();
    assert_eq!(runtime.launched.len(), 1);
    assert_eq!(runtime.removes, 1);
    assert_eq!(runtime.stops, 1);
    assert_eq!(runtime.probes.len(), 1);
    assert_eq!(runtime.probes[0].port(), 54321);

    test_section!("relocation");
    // The mirror must not exist yet when the container is removed.
    assert_eq!(*events.borrow(), ["launch", "remove"]);
    let mirror = temp.path().join("target/reports-client");
    assert_eq!(report.mirror_directory, mirror);
    assert!(mirror.join("clients/index.html").is_file());
    assert!(report.relocations.all_copied());
    let summary = report.summary.as_ref().expect("verdict index");
    assert!(summary.passed());
    assert_eq!(summary.totals().total(), 2);
    test_complete!("client_runs_against_mapped_port_and_reports_index");
}

#[test]
fn client_container_runs_fuzzing_server_with_mounts() {
    init_test("client_container_runs_fuzzing_server_with_mounts");
    let temp = tempdir().expect("temp dir");
    write_fuzzing_configs(temp.path());
    let config = RunConfig::from_base_directory(temp.path());
    let run = ConformanceRun::new(FakeRuntime::default());

    let spec = run.container_spec(Role::ClientUnderTest, &config);
    assert_eq!(spec.image, "crossbario/autobahn-testsuite:latest");
    assert_eq!(
        spec.command,
        vec![
            "/bin/bash".to_string(),
            "-c".to_string(),
            "wstest -m fuzzingserver -s /config/fuzzingserver.json ; \
             [ -d /target/reports ] && chown -R `stat -c '%u' /target/reports` /target/reports/*"
                .to_string(),
        ]
    );
    assert!(spec.exposed_ports.contains(&9001));
    assert!(spec.host_ports.is_empty());
    assert!(matches!(
        spec.readiness,
        ReadinessPolicy::PortReady { port: 9001, timeout, .. } if timeout == Duration::from_secs(60)
    ));
    assert_eq!(spec.bind_mounts.len(), 2);
    assert_eq!(spec.bind_mounts[0].host_path, config.fuzzing_server_config);
    assert_eq!(spec.bind_mounts[0].container_path, "/config/fuzzingserver.json");
    assert_eq!(spec.bind_mounts[0].mode, MountMode::ReadOnly);
    assert_eq!(spec.bind_mounts[1].host_path, config.report_directory);
    assert_eq!(spec.bind_mounts[1].container_path, "/target/reports");
    assert_eq!(spec.bind_mounts[1].mode, MountMode::ReadWrite);
    test_complete!("client_container_runs_fuzzing_server_with_mounts");
}

#[test]
fn missing_server_config_fails_before_any_resource() {
    init_test("missing_server_config_fails_before_any_resource");
    let temp = tempdir().expect("temp dir");
    write_file(&temp.path().join("fuzzingclient.json"), "{}");
    let config = RunConfig::from_base_directory(temp.path());
    let mut run = ConformanceRun::new(FakeRuntime::default());

    let mut called = false;
    let mut client = |_: &EndpointAddress| {
        called = true;
        Ok::<_, EndpointError>(RunResult::default())
    };
    let err = run
        .run_client_under_test(&config, &mut client)
        .expect_err("config missing");

    assert!(err.cause.is_config(), "{err}");
    assert!(err.to_string().contains("fuzzingserver.json not exists"), "{err}");
    assert!(err.partial_report.is_none());
    assert!(!called);
    assert!(run.runtime().launched.is_empty());
    assert!(!temp.path().join("target").exists());
    test_complete!("missing_server_config_fails_before_any_resource");
}

#[test]
fn client_failure_still_tears_down_and_relocates() {
    init_test("client_failure_still_tears_down_and_relocates");
    let temp = tempdir().expect("temp dir");
    write_fuzzing_configs(temp.path());
    let config = RunConfig::from_base_directory(temp.path());
    let mut run = ConformanceRun::new(FakeRuntime::default());

    let mut client = |_: &EndpointAddress| {
        Err::<RunResult, _>(EndpointError::Invocation("handshake rejected".into()))
    };
    let err = run
        .run_client_under_test(&config, &mut client)
        .expect_err("client failed");

    assert_eq!(err.role, Role::ClientUnderTest);
    assert!(matches!(
        err.cause,
        HarnessError::Endpoint(EndpointError::Invocation(_))
    ));
    assert_eq!(
        err.partial_report.as_deref(),
        Some(config.report_directory.join("clients").as_path())
    );
    assert_eq!(run.runtime().removes, 1);
    assert!(
        temp.path()
            .join("target/reports-client/clients/index.html")
            .is_file()
    );
    test_complete!("client_failure_still_tears_down_and_relocates");
}

#[test]
fn reference_server_never_ready_skips_client() {
    init_test("reference_server_never_ready_skips_client");
    let temp = tempdir().expect("temp dir");
    write_fuzzing_configs(temp.path());
    let config = RunConfig::from_base_directory(temp.path());
    let settings = HarnessSettings {
        ready_timeout: Duration::from_secs(1),
        ..HarnessSettings::default()
    };
    let runtime = FakeRuntime {
        probe_ok: false,
        write_reports: false,
        ..FakeRuntime::default()
    };
    let mut run = ConformanceRun::with_settings(runtime, settings);

    let mut called = false;
    let mut client = |_: &EndpointAddress| {
        called = true;
        Ok::<_, EndpointError>(RunResult::default())
    };
    let err = run
        .run_client_under_test(&config, &mut client)
        .expect_err("never ready");

    assert!(matches!(
        err.cause,
        HarnessError::Container(ContainerError::TimedOut { .. })
    ));
    assert!(!called);
    assert_eq!(run.runtime().removes, 1);
    assert!(err.partial_report.is_none());
    test_complete!("reference_server_never_ready_skips_client");
}

#[test]
fn missing_report_source_does_not_abort() {
    init_test("missing_report_source_does_not_abort");
    let temp = tempdir().expect("temp dir");
    write_fuzzing_configs(temp.path());
    let config = RunConfig::from_base_directory(temp.path());

    // A client that removes the shared report directory while running.
    let report_directory = config.report_directory.clone();
    let mut client = move |_: &EndpointAddress| {
        std::fs::remove_dir_all(&report_directory).expect("remove reports");
        Ok::<_, EndpointError>(RunResult::default())
    };
    let mut run = ConformanceRun::new(FakeRuntime::default());
    let report = run
        .run_client_under_test(&config, &mut client)
        .expect("relocation failure is not fatal");

    assert_eq!(report.relocations.len(), 1);
    assert_eq!(
        report.relocations.entries()[0].outcome,
        RelocationOutcome::MissingSource
    );
    assert!(report.summary.is_none());
    assert_eq!(run.runtime().removes, 1);
    test_complete!("missing_report_source_does_not_abort");
}
