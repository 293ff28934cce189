//! Reference-implementation containers.
//!
//! A [`ContainerSpec`] describes one run of the reference image: command,
//! exposed ports, bind mounts, how to decide that it is ready, and where its
//! output goes. A [`ContainerSession`] owns one started instance and
//! guarantees teardown. The actual engine sits behind [`ContainerRuntime`],
//! so sessions can be driven against Docker or against a fake in tests.

mod session;

#[cfg(feature = "docker")]
pub mod docker;

pub use session::ContainerSession;

use crate::error::ContainerError;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::net::{SocketAddr, TcpStream};
use std::path::PathBuf;
use std::time::Duration;

/// Default bound on waiting for an exposed port to accept connections.
pub const DEFAULT_PORT_READY_TIMEOUT: Duration = Duration::from_secs(60);

/// Default bound on waiting for a one-shot container to exit.
pub const DEFAULT_EXIT_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Default interval between readiness probes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Default grace period between stop signal and kill.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(10);

/// Lifecycle state of a container session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    /// Configured, not launched.
    Created,
    /// Launched, readiness not yet satisfied.
    Starting,
    /// Readiness satisfied.
    Running,
    /// Teardown in progress.
    Stopping,
    /// Torn down.
    Stopped,
    /// Start or readiness failed; torn down.
    Failed,
}

impl ContainerState {
    /// Returns true for states that admit no further transition.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }
}

/// Returns true when a state transition is legal.
///
/// `Failed` is reachable from every non-terminal state.
#[must_use]
pub fn is_valid_transition(from: ContainerState, to: ContainerState) -> bool {
    use ContainerState::{Created, Failed, Running, Starting, Stopped, Stopping};
    match (from, to) {
        (Created, Starting) | (Starting, Running) | (Running, Stopping) | (Stopping, Stopped) => {
            true
        }
        (from, Failed) => !from.is_terminal(),
        _ => false,
    }
}

/// Validates a state transition against the session state machine.
pub fn validate_transition(
    from: ContainerState,
    to: ContainerState,
) -> Result<(), ContainerError> {
    if is_valid_transition(from, to) {
        Ok(())
    } else {
        Err(ContainerError::InvalidTransition { from, to })
    }
}

/// Access mode of a bind mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MountMode {
    /// Container may only read.
    ReadOnly,
    /// Container may write.
    ReadWrite,
}

impl MountMode {
    /// Docker bind suffix.
    #[must_use]
    pub const fn as_bind_flag(self) -> &'static str {
        match self {
            Self::ReadOnly => "ro",
            Self::ReadWrite => "rw",
        }
    }
}

/// A host path mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindMount {
    /// Path on the host.
    pub host_path: PathBuf,
    /// Path inside the container.
    pub container_path: String,
    /// Access mode.
    pub mode: MountMode,
}

impl BindMount {
    /// Creates a bind mount.
    #[must_use]
    pub fn new(host_path: impl Into<PathBuf>, container_path: impl Into<String>, mode: MountMode) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            mode,
        }
    }

    /// Renders the mount in Docker `binds` syntax.
    #[must_use]
    pub fn to_bind_string(&self) -> String {
        format!(
            "{}:{}:{}",
            self.host_path.display(),
            self.container_path,
            self.mode.as_bind_flag()
        )
    }
}

/// Condition a started container must satisfy before it is usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReadinessPolicy {
    /// An exposed port accepts TCP connections on its host mapping.
    PortReady {
        /// Container port to probe.
        port: u16,
        /// Give up after this long.
        timeout: Duration,
        /// Delay between probes.
        poll_interval: Duration,
    },
    /// The container process exits on its own.
    ExitReady {
        /// Give up after this long.
        timeout: Duration,
    },
}

impl ReadinessPolicy {
    /// Port-ready policy with default timeout and poll interval.
    #[must_use]
    pub const fn port(port: u16) -> Self {
        Self::PortReady {
            port,
            timeout: DEFAULT_PORT_READY_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Exit-ready policy with the default one hour bound.
    #[must_use]
    pub const fn one_shot() -> Self {
        Self::ExitReady {
            timeout: DEFAULT_EXIT_TIMEOUT,
        }
    }

    /// Returns the policy timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        match self {
            Self::PortReady { timeout, .. } | Self::ExitReady { timeout } => *timeout,
        }
    }

    /// Replaces the policy timeout.
    #[must_use]
    pub const fn with_timeout(self, timeout: Duration) -> Self {
        match self {
            Self::PortReady {
                port,
                poll_interval,
                ..
            } => Self::PortReady {
                port,
                timeout,
                poll_interval,
            },
            Self::ExitReady { .. } => Self::ExitReady { timeout },
        }
    }
}

/// Where container stdout/stderr goes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogSink {
    /// Forward each line to `tracing` under the given label.
    Tracing {
        /// Label attached to each forwarded line.
        label: String,
    },
    /// Drop container output.
    #[default]
    Discard,
}

impl LogSink {
    /// Forward to tracing with `label`.
    #[must_use]
    pub fn tracing(label: impl Into<String>) -> Self {
        Self::Tracing {
            label: label.into(),
        }
    }
}

/// Everything needed to launch one reference container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerSpec {
    /// Image reference.
    pub image: String,
    /// Command and arguments.
    pub command: Vec<String>,
    /// Container ports published to ephemeral host ports.
    pub exposed_ports: BTreeSet<u16>,
    /// Host ports the container must be able to reach.
    pub host_ports: BTreeSet<u16>,
    /// Bind mounts in order.
    pub bind_mounts: Vec<BindMount>,
    /// Readiness condition awaited by `start()`.
    pub readiness: ReadinessPolicy,
    /// Output destination.
    pub log_sink: LogSink,
}

impl ContainerSpec {
    /// Creates a spec for `image` that waits for exit with default bounds.
    #[must_use]
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            command: Vec::new(),
            exposed_ports: BTreeSet::new(),
            host_ports: BTreeSet::new(),
            bind_mounts: Vec::new(),
            readiness: ReadinessPolicy::one_shot(),
            log_sink: LogSink::Discard,
        }
    }

    /// Sets the command.
    #[must_use]
    pub fn with_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    /// Exposes a container port.
    #[must_use]
    pub fn with_exposed_port(mut self, port: u16) -> Self {
        self.exposed_ports.insert(port);
        self
    }

    /// Adds a bind mount.
    #[must_use]
    pub fn with_bind_mount(mut self, mount: BindMount) -> Self {
        self.bind_mounts.push(mount);
        self
    }

    /// Sets the readiness policy.
    #[must_use]
    pub fn with_readiness(mut self, readiness: ReadinessPolicy) -> Self {
        self.readiness = readiness;
        self
    }

    /// Sets the log sink.
    #[must_use]
    pub fn with_log_sink(mut self, log_sink: LogSink) -> Self {
        self.log_sink = log_sink;
        self
    }
}

/// Host-visible address of an exposed container port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PortMapping {
    /// Port inside the container.
    pub container_port: u16,
    /// Port on the host.
    pub host_port: u16,
}

/// Backend identifier of a launched container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Wraps a backend identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for logs.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of waiting for a container to exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WaitOutcome {
    /// Container exited with this status code.
    Exited {
        /// Exit status.
        code: i64,
    },
    /// The wait bound elapsed first.
    TimedOut,
}

/// Blocking container engine operations used by [`ContainerSession`].
pub trait ContainerRuntime {
    /// Creates and starts a container for `spec`.
    fn launch(&mut self, spec: &ContainerSpec) -> Result<ContainerId, ContainerError>;

    /// Host port bound to `container_port`, if published.
    fn host_port(
        &mut self,
        id: &ContainerId,
        container_port: u16,
    ) -> Result<Option<u16>, ContainerError>;

    /// Blocks until the container exits or `timeout` elapses.
    fn wait_exit(
        &mut self,
        id: &ContainerId,
        timeout: Duration,
    ) -> Result<WaitOutcome, ContainerError>;

    /// Returns true if `addr` accepts a TCP connection within `timeout`.
    fn probe(&mut self, addr: SocketAddr, timeout: Duration) -> bool {
        TcpStream::connect_timeout(&addr, timeout).is_ok()
    }

    /// Stops the container, killing it after `grace`.
    fn stop(&mut self, id: &ContainerId, grace: Duration) -> Result<(), ContainerError>;

    /// Removes the container and its anonymous volumes.
    fn remove(&mut self, id: &ContainerId) -> Result<(), ContainerError>;
}

impl<R: ContainerRuntime + ?Sized> ContainerRuntime for &mut R {
    fn launch(&mut self, spec: &ContainerSpec) -> Result<ContainerId, ContainerError> {
        (**self).launch(spec)
    }

    fn host_port(
        &mut self,
        id: &ContainerId,
        container_port: u16,
    ) -> Result<Option<u16>, ContainerError> {
        (**self).host_port(id, container_port)
    }

    fn wait_exit(
        &mut self,
        id: &ContainerId,
        timeout: Duration,
    ) -> Result<WaitOutcome, ContainerError> {
        (**self).wait_exit(id, timeout)
    }

    fn probe(&mut self, addr: SocketAddr, timeout: Duration) -> bool {
        (**self).probe(addr, timeout)
    }

    fn stop(&mut self, id: &ContainerId, grace: Duration) -> Result<(), ContainerError> {
        (**self).stop(id, grace)
    }

    fn remove(&mut self, id: &ContainerId) -> Result<(), ContainerError> {
        (**self).remove(id)
    }
}
