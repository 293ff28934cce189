//! Scenario orchestration.
//!
//! A [`ConformanceRun`] drives one scenario per role:
//!
//! - client under test: the reference fuzzing server runs in a container, the
//!   local client is pointed at its mapped port, and the container is
//!   stopped once the client returns.
//! - server under test: the local server is started first, the reference
//!   fuzzing client runs in a container that can reach it, and the scenario
//!   ends when that container exits.
//!
//! In both cases the container writes into the shared report directory, the
//! ownership fix runs as its last command, and the tree is mirrored once the
//! container is gone.

use crate::artifact::{ArtifactStore, ReportTree, ownership_fix_command};
use crate::config::{HarnessSettings, RunConfig};
use crate::container::{
    BindMount, ContainerRuntime, ContainerSession, ContainerSpec, ContainerState,
    DEFAULT_POLL_INTERVAL, LogSink, MountMode, ReadinessPolicy,
};
use crate::endpoint::{
    ClientEntryPoint, EndpointAddress, LocalServer, RunResult, ServerEntryPoint,
};
use crate::error::{ConfigError, ConformanceRunFailed, ContainerError, HarnessError};
use crate::report::ReportSummary;
use crate::role::Role;
use crate::tracing_compat::{info, warn};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;

/// What a completed scenario produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioReport {
    /// Role that ran.
    pub role: Role,
    /// HTML overview written by the reference tool.
    pub report_index: PathBuf,
    /// Role subtree of the report directory.
    pub report_directory: PathBuf,
    /// Where the report tree was mirrored.
    pub mirror_directory: PathBuf,
    /// Relocations applied after the container exited.
    pub relocations: ReportTree,
    /// Container exit status, if it exited on its own.
    pub container_exit: Option<i64>,
    /// What the client under test reported.
    pub client_result: Option<RunResult>,
    /// Verdict tally, if the reference tool wrote one.
    pub summary: Option<ReportSummary>,
}

impl ScenarioReport {
    /// Whether every case passed, when the verdicts are known.
    #[must_use]
    pub fn verdicts_passed(&self) -> Option<bool> {
        self.summary.as_ref().map(ReportSummary::passed)
    }
}

/// Results of running both scenarios.
#[derive(Debug)]
pub struct RunAllOutcome {
    /// Client-under-test scenario.
    pub client: Result<ScenarioReport, ConformanceRunFailed>,
    /// Server-under-test scenario.
    pub server: Result<ScenarioReport, ConformanceRunFailed>,
}

impl RunAllOutcome {
    /// Returns true if both scenarios completed.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.client.is_ok() && self.server.is_ok()
    }
}

/// Orchestrates conformance scenarios against one container runtime.
#[derive(Debug)]
pub struct ConformanceRun<R: ContainerRuntime> {
    runtime: R,
    settings: HarnessSettings,
}

impl<R: ContainerRuntime> ConformanceRun<R> {
    /// Creates a run with default settings.
    #[must_use]
    pub fn new(runtime: R) -> Self {
        Self::with_settings(runtime, HarnessSettings::default())
    }

    /// Creates a run with `settings`.
    #[must_use]
    pub fn with_settings(runtime: R, settings: HarnessSettings) -> Self {
        Self { runtime, settings }
    }

    /// Active settings.
    #[must_use]
    pub const fn settings(&self) -> &HarnessSettings {
        &self.settings
    }

    /// The container runtime.
    #[must_use]
    pub const fn runtime(&self) -> &R {
        &self.runtime
    }

    /// Consumes the run and returns the runtime.
    pub fn into_runtime(self) -> R {
        self.runtime
    }

    /// Container spec used for `role`.
    #[must_use]
    pub fn container_spec(&self, role: Role, config: &RunConfig) -> ContainerSpec {
        let settings = &self.settings;
        let script = format!(
            "wstest -m {} -s {} ; {}",
            role.wstest_mode(),
            settings.container_config_path(role),
            ownership_fix_command(&settings.container_report_dir)
        );
        let log_sink = if settings.stream_logs {
            LogSink::tracing(role.wstest_mode())
        } else {
            LogSink::Discard
        };
        let spec = ContainerSpec::new(settings.image.clone())
            .with_command(["/bin/bash".to_string(), "-c".to_string(), script])
            .with_bind_mount(BindMount::new(
                config.config_file(role),
                settings.container_config_path(role),
                MountMode::ReadOnly,
            ))
            .with_bind_mount(BindMount::new(
                &config.report_directory,
                settings.container_report_dir.clone(),
                MountMode::ReadWrite,
            ))
            .with_log_sink(log_sink);

        match role {
            Role::ClientUnderTest => spec
                .with_exposed_port(settings.fuzzing_port)
                .with_readiness(ReadinessPolicy::PortReady {
                    port: settings.fuzzing_port,
                    timeout: settings.ready_timeout,
                    poll_interval: DEFAULT_POLL_INTERVAL,
                }),
            Role::ServerUnderTest => spec.with_readiness(ReadinessPolicy::ExitReady {
                timeout: settings.exit_timeout,
            }),
        }
    }

    /// Runs the local client against the reference fuzzing server.
    pub fn run_client_under_test<C>(
        &mut self,
        config: &RunConfig,
        client: &mut C,
    ) -> Result<ScenarioReport, ConformanceRunFailed>
    where
        C: ClientEntryPoint + ?Sized,
    {
        let role = Role::ClientUnderTest;
        let started = Instant::now();
        info!(role = %role, base = %config.base_directory.display(), "scenario starting");
        let store = prepare(config).map_err(|err| ConformanceRunFailed::new(role, err))?;

        let spec = self.container_spec(role, config);
        let port = self.settings.fuzzing_port;
        let mut session =
            ContainerSession::new(&mut self.runtime, spec).with_stop_grace(self.settings.stop_grace);
        let client_outcome = drive_client(&mut session, port, client);
        let container_exit = finish(session);

        let mirror = self.settings.mirror_directory(&config.base_directory, role);
        let mut relocations = ReportTree::new();
        store.mirror_into(&mirror, &mut relocations);

        let client_result = client_outcome.map_err(|err| fail(role, err, &store))?;
        let container_exit = container_exit.map_err(|err| fail(role, err, &store))?;

        let report = build_report(role, &store, mirror, relocations, container_exit, Some(client_result));
        info!(
            role = %role,
            report = %report.report_index.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "scenario finished"
        );
        Ok(report)
    }

    /// Runs the reference fuzzing client against the local server.
    pub fn run_server_under_test<S>(
        &mut self,
        config: &RunConfig,
        server: &mut S,
    ) -> Result<ScenarioReport, ConformanceRunFailed>
    where
        S: ServerEntryPoint + ?Sized,
    {
        let role = Role::ServerUnderTest;
        let started = Instant::now();
        info!(role = %role, base = %config.base_directory.display(), "scenario starting");
        let store = prepare(config).map_err(|err| ConformanceRunFailed::new(role, err))?;

        let mut local = LocalServer::start(server, self.settings.fuzzing_port)
            .map_err(|err| ConformanceRunFailed::new(role, err))?;

        let spec = self.container_spec(role, config);
        let mut session =
            ContainerSession::new(&mut self.runtime, spec).with_stop_grace(self.settings.stop_grace);
        let container_outcome = session
            .expose_host_port(local.port())
            .and_then(|()| session.start());
        let container_exit = finish(session);
        let server_stopped = local.stop();

        let mirror = self.settings.mirror_directory(&config.base_directory, role);
        let mut relocations = ReportTree::new();
        store.mirror_into(&mirror, &mut relocations);

        container_outcome.map_err(|err| fail(role, err, &store))?;
        let container_exit = container_exit.map_err(|err| fail(role, err, &store))?;
        server_stopped.map_err(|err| fail(role, err, &store))?;

        let report = build_report(role, &store, mirror, relocations, container_exit, None);
        info!(
            role = %role,
            report = %report.report_index.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "scenario finished"
        );
        Ok(report)
    }

    /// Runs both scenarios, client first. A failure in one does not skip the
    /// other.
    pub fn run_all<C, S>(&mut self, config: &RunConfig, client: &mut C, server: &mut S) -> RunAllOutcome
    where
        C: ClientEntryPoint + ?Sized,
        S: ServerEntryPoint + ?Sized,
    {
        let client = self.run_client_under_test(config, client);
        if let Err(err) = &client {
            warn!(error = %err, "continuing with server scenario");
        }
        let server = self.run_server_under_test(config, server);
        RunAllOutcome { client, server }
    }
}

fn prepare(config: &RunConfig) -> Result<ArtifactStore, ConfigError> {
    config.validate()?;
    config.prepare_report_directory()
}

fn drive_client<R, C>(
    session: &mut ContainerSession<R>,
    port: u16,
    client: &mut C,
) -> Result<RunResult, HarnessError>
where
    R: ContainerRuntime,
    C: ClientEntryPoint + ?Sized,
{
    session.start()?;
    let address = EndpointAddress::localhost(session.mapped_host_port(port)?);
    info!(address = %address, "client under test connecting");
    let result = client.run(&address)?;
    info!(elapsed_ms = result.elapsed.as_millis() as u64, "client under test finished");
    Ok(result)
}

/// Ends the session, stopping it if it is still running.
fn finish<R: ContainerRuntime>(mut session: ContainerSession<R>) -> Result<Option<i64>, ContainerError> {
    if session.state() == ContainerState::Running {
        session.stop()
    } else {
        Ok(session.exit_code())
    }
}

fn fail(role: Role, cause: impl Into<HarnessError>, store: &ArtifactStore) -> ConformanceRunFailed {
    let failure = ConformanceRunFailed::new(role, cause).with_partial_report(store.partial_report(role));
    warn!(
        role = %role,
        error = %failure.cause,
        partial_report = ?failure.partial_report,
        "scenario failed"
    );
    failure
}

fn build_report(
    role: Role,
    store: &ArtifactStore,
    mirror_directory: PathBuf,
    relocations: ReportTree,
    container_exit: Option<i64>,
    client_result: Option<RunResult>,
) -> ScenarioReport {
    let report_directory = store.role_directory(role);
    ScenarioReport {
        role,
        report_index: store.report_index(role),
        summary: ReportSummary::load(&report_directory),
        report_directory,
        mirror_directory,
        relocations,
        container_exit,
        client_result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{ContainerId, WaitOutcome};
    use crate::test_utils::init_test_logging;
    use std::time::Duration;

    struct NoRuntime;

    impl ContainerRuntime for NoRuntime {
        fn launch(&mut self, _spec: &ContainerSpec) -> Result<ContainerId, ContainerError> {
            Err(ContainerError::Start("unused".into()))
        }

        fn host_port(&mut self, _id: &ContainerId, _port: u16) -> Result<Option<u16>, ContainerError> {
            Ok(None)
        }

        fn wait_exit(&mut self, _id: &ContainerId, _timeout: Duration) -> Result<WaitOutcome, ContainerError> {
            Ok(WaitOutcome::TimedOut)
        }

        fn stop(&mut self, _id: &ContainerId, _grace: Duration) -> Result<(), ContainerError> {
            Ok(())
        }

        fn remove(&mut self, _id: &ContainerId) -> Result<(), ContainerError> {
            Ok(())
        }
    }

    #[test]
    fn spec_follows_settings() {
        init_test_logging();
        crate::test_phase!("spec_follows_settings");
        let settings = HarnessSettings {
            image: "autobahn:pinned".into(),
            fuzzing_port: 9100,
            container_config_dir: "/etc/fuzz/".into(),
            stream_logs: false,
            ..HarnessSettings::default()
        };
        let run = ConformanceRun::with_settings(NoRuntime, settings);
        let config = RunConfig::from_base_directory("/work");

        let client = run.container_spec(Role::ClientUnderTest, &config);
        crate::assert_with_log!(
            client.exposed_ports.contains(&9100),
            "exposed port",
            9100,
            client.exposed_ports
        );
        assert_eq!(client.image, "autobahn:pinned");
        assert_eq!(client.log_sink, LogSink::Discard);
        assert!(client.command[2].contains("-s /etc/fuzz/fuzzingserver.json"));

        let server = run.container_spec(Role::ServerUnderTest, &config);
        assert!(server.exposed_ports.is_empty());
        assert_eq!(server.bind_mounts[0].container_path, "/etc/fuzz/fuzzingclient.json");
        crate::test_complete!("spec_follows_settings");
    }

    #[test]
    fn default_specs_stream_logs_by_mode() {
        let run = ConformanceRun::new(NoRuntime);
        let config = RunConfig::from_base_directory("/work");
        assert_eq!(
            run.container_spec(Role::ServerUnderTest, &config).log_sink,
            LogSink::tracing("fuzzingclient")
        );
    }
}
