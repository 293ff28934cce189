//! Shared helpers for integration tests.

#![allow(dead_code, unused_macros)]

use std::cell::{Cell, RefCell};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Once;
use std::time::Duration;
use wsconform::container::{
    ContainerId, ContainerRuntime, ContainerSpec, MountMode, WaitOutcome,
};
use wsconform::{ContainerError, EndpointError, ServerHandle};

macro_rules! test_phase {
    ($name:expr) => {
        ::tracing::info!(test = $name, "=== test phase ===");
    };
}

macro_rules! test_section {
    ($name:expr) => {
        ::tracing::info!(section = $name, "--- section ---");
    };
}

macro_rules! test_complete {
    ($name:expr) => {
        ::tracing::info!(test = $name, "=== test complete ===");
    };
}

macro_rules! assert_with_log {
    ($cond:expr, $what:expr, $expected:expr, $actual:expr) => {{
        ::tracing::debug!(
            check = $what,
            expected = ?$expected,
            actual = ?$actual,
            "assert"
        );
        assert!($cond, "{}: expected {:?}, got {:?}", $what, $expected, $actual);
    }};
}

static INIT_LOGGING: Once = Once::new();

/// Installs a test-writer tracing subscriber once per process.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Writes `content` to `path`, creating parent directories.
pub fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent directories");
    }
    fs::write(path, content).expect("write file");
}

/// Writes both fuzzing configs under `base`.
pub fn write_fuzzing_configs(base: &Path) {
    write_file(
        &base.join("fuzzingserver.json"),
        r#"{"url": "ws://127.0.0.1:9001", "outdir": "/target/reports/clients", "cases": ["*"]}"#,
    );
    write_file(
        &base.join("fuzzingclient.json"),
        r#"{"servers": [{"url": "ws://host.testcontainers.internal:9001"}], "outdir": "/target/reports/servers", "cases": ["*"]}"#,
    );
}

pub const VERDICT_INDEX: &str = r#"{
    "wsconform": {
        "1.1.1": {"behavior": "OK", "behaviorClose": "OK", "duration": 1, "remoteCloseCode": 1000, "reportfile": "wsconform_case_1_1_1.json"},
        "2.10": {"behavior": "NON-STRICT", "behaviorClose": "OK", "duration": 1, "remoteCloseCode": 1000, "reportfile": "wsconform_case_2_10.json"}
    }
}"#;

/// Shared, ordered record of lifecycle events across fakes.
pub type EventLog = Rc<RefCell<Vec<&'static str>>>;

/// Stand-in for the Docker daemon.
///
/// On launch it plays the reference tool: it writes an overview and a verdict
/// index into the read-write bind mount, under the subtree matching the
/// `wstest` mode in the command.
#[derive(Debug)]
pub struct FakeRuntime {
    pub host_port: Option<u16>,
    pub probe_ok: bool,
    pub exit: WaitOutcome,
    pub fail_launch: bool,
    pub write_reports: bool,
    pub launched: Vec<ContainerSpec>,
    pub probes: Vec<SocketAddr>,
    pub stops: usize,
    pub removes: usize,
    /// Receives `launch` and `remove`.
    pub events: EventLog,
    /// When set, `remove` logs `mirror_present` if this path already exists.
    pub watch_mirror: Option<PathBuf>,
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self {
            host_port: Some(54321),
            probe_ok: true,
            exit: WaitOutcome::Exited { code: 0 },
            fail_launch: false,
            write_reports: true,
            launched: Vec::new(),
            probes: Vec::new(),
            stops: 0,
            removes: 0,
            events: EventLog::default(),
            watch_mirror: None,
        }
    }
}

impl FakeRuntime {
    fn write_reference_output(spec: &ContainerSpec) {
        let subtree = if spec.command.join(" ").contains("-m fuzzingserver") {
            "clients"
        } else {
            "servers"
        };
        for mount in &spec.bind_mounts {
            if mount.mode == MountMode::ReadWrite {
                let dir = mount.host_path.join(subtree);
                write_file(&dir.join("index.html"), "<html>report</html>");
                write_file(&dir.join("index.json"), VERDICT_INDEX);
                write_file(&dir.join("wsconform_case_1_1_1.html"), "case");
            }
        }
    }
}

impl ContainerRuntime for FakeRuntime {
    fn launch(&mut self, spec: &ContainerSpec) -> Result<ContainerId, ContainerError> {
        self.events.borrow_mut().push("launch");
        self.launched.push(spec.clone());
        if self.fail_launch {
            return Err(ContainerError::Start("image not found".into()));
        }
        if self.write_reports {
            Self::write_reference_output(spec);
        }
        Ok(ContainerId::new(format!("fake{:08}", self.launched.len())))
    }

    fn host_port(
        &mut self,
        _id: &ContainerId,
        _container_port: u16,
    ) -> Result<Option<u16>, ContainerError> {
        Ok(self.host_port)
    }

    fn wait_exit(
        &mut self,
        _id: &ContainerId,
        _timeout: Duration,
    ) -> Result<WaitOutcome, ContainerError> {
        Ok(self.exit)
    }

    fn probe(&mut self, addr: SocketAddr, _timeout: Duration) -> bool {
        self.probes.push(addr);
        self.probe_ok
    }

    fn stop(&mut self, _id: &ContainerId, _grace: Duration) -> Result<(), ContainerError> {
        self.stops += 1;
        Ok(())
    }

    fn remove(&mut self, _id: &ContainerId) -> Result<(), ContainerError> {
        self.removes += 1;
        let mut events = self.events.borrow_mut();
        events.push("remove");
        if self.watch_mirror.as_deref().is_some_and(Path::exists) {
            events.push("mirror_present");
        }
        Ok(())
    }
}

/// Server handle counting its stops.
pub struct CountingServer {
    pub stops: Rc<Cell<usize>>,
    pub events: EventLog,
}

impl ServerHandle for CountingServer {
    fn stop(&mut self) -> Result<(), EndpointError> {
        self.stops.set(self.stops.get() + 1);
        self.events.borrow_mut().push("server_stop");
        Ok(())
    }
}
