//! Error types for conformance runs.
//!
//! Errors are split by the resource that produced them so callers can tell a
//! setup mistake (missing config) from an infrastructure failure (container
//! never became ready) from a defect in the implementation under test
//! (client entry point failed).
//!
//! Every scenario failure reaches the caller as a [`ConformanceRunFailed`],
//! which labels the [`Role`] that failed and, when the reference tool got far
//! enough to write something, where the partial report lives.

use crate::container::ContainerState;
use crate::role::Role;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Filesystem operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsOp {
    /// Creating a directory.
    CreateDir,
    /// Reading directory entries or metadata.
    Read,
    /// Copying a file.
    Copy,
}

impl FsOp {
    /// Returns the operation name used in messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreateDir => "create directory",
            Self::Read => "read",
            Self::Copy => "copy",
        }
    }
}

/// A host filesystem failure in the report tree.
#[derive(Debug, Error)]
#[error("failed to {} {}: {source}", .op.as_str(), .path.display())]
pub struct FilesystemError {
    /// What was being attempted.
    pub op: FsOp,
    /// Path the operation targeted.
    pub path: PathBuf,
    /// Underlying I/O error.
    #[source]
    pub source: io::Error,
}

impl FilesystemError {
    /// Creates a filesystem error for `op` on `path`.
    #[must_use]
    pub fn new(op: FsOp, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self {
            op,
            path: path.into(),
            source,
        }
    }

    /// Returns true if the error is due to a missing path.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.source.kind() == io::ErrorKind::NotFound
    }
}

/// Invalid or incomplete run configuration.
///
/// Raised before any container or socket is acquired.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required fuzzing configuration file is absent.
    #[error("{} not exists", .path.display())]
    MissingFile {
        /// Expected location of the file.
        path: PathBuf,
    },
    /// The report directory could not be prepared.
    #[error("report directory unusable: {0}")]
    ReportDirectory(#[source] FilesystemError),
    /// The settings file could not be read.
    #[error("failed to read settings {}: {source}", .path.display())]
    SettingsIo {
        /// Settings file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The settings file is not valid TOML for [`HarnessSettings`](crate::HarnessSettings).
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
}

impl ConfigError {
    /// Creates a missing-file error.
    #[must_use]
    pub fn missing_file(path: &Path) -> Self {
        Self::MissingFile {
            path: path.to_path_buf(),
        }
    }
}

/// Failure in a container session or its backend.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// The container could not be created or started.
    #[error("container failed to start: {0}")]
    Start(String),
    /// The readiness policy was not satisfied in time.
    #[error("container not ready after {timeout:?}")]
    TimedOut {
        /// Timeout that elapsed.
        timeout: Duration,
    },
    /// A mapped port was requested for a port the container does not expose,
    /// or before the container was running.
    #[error("container port {port} is not exposed")]
    PortNotExposed {
        /// Requested container port.
        port: u16,
    },
    /// A lifecycle transition violated the session state machine.
    #[error("invalid container transition: {from:?} -> {to:?}")]
    InvalidTransition {
        /// Current state.
        from: ContainerState,
        /// Requested next state.
        to: ContainerState,
    },
    /// The session can no longer be reconfigured.
    #[error("container session is {state:?}; configuration must happen before start")]
    NotConfigurable {
        /// State the session was in.
        state: ContainerState,
    },
    /// The container backend reported an error.
    #[error("container runtime error: {0}")]
    Runtime(String),
}

/// Failure of the implementation under test.
#[derive(Debug, Error)]
pub enum EndpointError {
    /// The entry point returned an error.
    #[error("endpoint invocation failed: {0}")]
    Invocation(String),
    /// An external endpoint process exited unsuccessfully.
    #[error("endpoint process exited with {}", .code.map_or_else(|| "signal".to_string(), |c| format!("status {c}")))]
    Exited {
        /// Exit status, `None` when terminated by a signal.
        code: Option<i32>,
    },
    /// An external endpoint process could not be spawned.
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        /// Program that failed to launch.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// A local server never started accepting connections.
    #[error("server on port {port} not accepting connections after {timeout:?}")]
    NotReady {
        /// Port that was polled.
        port: u16,
        /// Timeout that elapsed.
        timeout: Duration,
    },
    /// Stopping a local server failed.
    #[error("failed to stop server: {0}")]
    Stop(String),
}

/// Any failure that can end a scenario.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Configuration problem.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Filesystem problem.
    #[error(transparent)]
    Filesystem(#[from] FilesystemError),
    /// Container problem.
    #[error(transparent)]
    Container(#[from] ContainerError),
    /// Implementation-under-test problem.
    #[error(transparent)]
    Endpoint(#[from] EndpointError),
}

impl HarnessError {
    /// Returns true for configuration errors.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Returns true for container errors.
    #[must_use]
    pub const fn is_container(&self) -> bool {
        matches!(self, Self::Container(_))
    }

    /// Returns true for endpoint errors.
    #[must_use]
    pub const fn is_endpoint(&self) -> bool {
        matches!(self, Self::Endpoint(_))
    }
}

/// A labeled scenario failure.
#[derive(Debug, Error)]
#[error("{role} conformance run failed: {cause}")]
pub struct ConformanceRunFailed {
    /// Role whose scenario failed.
    pub role: Role,
    /// What went wrong.
    #[source]
    pub cause: HarnessError,
    /// Report location if the reference tool wrote anything.
    pub partial_report: Option<PathBuf>,
}

impl ConformanceRunFailed {
    /// Creates a failure without a partial report.
    #[must_use]
    pub fn new(role: Role, cause: impl Into<HarnessError>) -> Self {
        Self {
            role,
            cause: cause.into(),
            partial_report: None,
        }
    }

    /// Attaches a partial report location.
    #[must_use]
    pub fn with_partial_report(mut self, path: Option<PathBuf>) -> Self {
        self.partial_report = path;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display_names_path() {
        let err = ConfigError::missing_file(Path::new("/base/fuzzingserver.json"));
        assert_eq!(err.to_string(), "/base/fuzzingserver.json not exists");
    }

    #[test]
    fn filesystem_error_reports_op_and_path() {
        let err = FilesystemError::new(
            FsOp::CreateDir,
            "/nope/reports",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        let display = err.to_string();
        assert!(display.contains("create directory"), "{display}");
        assert!(display.contains("/nope/reports"), "{display}");
        assert!(!err.is_not_found());
    }

    #[test]
    fn endpoint_exit_display() {
        assert_eq!(
            EndpointError::Exited { code: Some(3) }.to_string(),
            "endpoint process exited with status 3"
        );
        assert_eq!(
            EndpointError::Exited { code: None }.to_string(),
            "endpoint process exited with signal"
        );
    }

    #[test]
    fn run_failure_carries_role_and_cause() {
        let failure = ConformanceRunFailed::new(
            Role::ServerUnderTest,
            ContainerError::TimedOut {
                timeout: Duration::from_secs(1),
            },
        )
        .with_partial_report(Some(PathBuf::from("/r/servers")));
        assert_eq!(failure.role, Role::ServerUnderTest);
        assert!(failure.cause.is_container());
        assert!(failure.to_string().starts_with("server-under-test"));
        let source = std::error::Error::source(&failure).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("container not ready after 1s"));
    }
}
