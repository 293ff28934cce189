//! Run inputs and harness settings.
//!
//! [`RunConfig`] names the files a run consumes and the directory it writes.
//! [`HarnessSettings`] holds the orchestrator knobs; its defaults reproduce
//! the reference setup, and a TOML file can override any subset of them.

use crate::artifact::ArtifactStore;
use crate::error::ConfigError;
use crate::role::Role;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Reference image run for both roles.
pub const DEFAULT_IMAGE: &str = "crossbario/autobahn-testsuite:latest";

/// Port the reference fuzzing server listens on, and the port the local
/// server must use for the reference fuzzing client.
pub const DEFAULT_FUZZING_PORT: u16 = 9001;

/// Where fuzzing configs are mounted inside the container.
pub const DEFAULT_CONTAINER_CONFIG_DIR: &str = "/config";

/// Where the container writes reports.
pub const DEFAULT_CONTAINER_REPORT_DIR: &str = "/target/reports";

/// Input files and report location for one harness invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunConfig {
    /// Directory holding the fuzzing configs.
    pub base_directory: PathBuf,
    /// Config for the reference fuzzing server.
    pub fuzzing_server_config: PathBuf,
    /// Config for the reference fuzzing client.
    pub fuzzing_client_config: PathBuf,
    /// Host directory bind-mounted as the container report directory.
    pub report_directory: PathBuf,
}

impl RunConfig {
    /// Standard layout under `base`: both configs at the top level, reports
    /// in `target/reports`.
    #[must_use]
    pub fn from_base_directory(base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        Self {
            fuzzing_server_config: base.join(Role::ClientUnderTest.config_file_name()),
            fuzzing_client_config: base.join(Role::ServerUnderTest.config_file_name()),
            report_directory: base.join("target").join("reports"),
            base_directory: base,
        }
    }

    /// Overrides the report directory.
    #[must_use]
    pub fn with_report_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.report_directory = path.into();
        self
    }

    /// Config file mounted for `role`.
    #[must_use]
    pub fn config_file(&self, role: Role) -> &Path {
        match role {
            Role::ClientUnderTest => &self.fuzzing_server_config,
            Role::ServerUnderTest => &self.fuzzing_client_config,
        }
    }

    /// Checks that both fuzzing configs exist as files.
    ///
    /// Touches nothing on disk.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for path in [&self.fuzzing_server_config, &self.fuzzing_client_config] {
            if !path.is_file() {
                return Err(ConfigError::missing_file(path));
            }
        }
        Ok(())
    }

    /// Creates the report directory if absent and wraps it.
    pub fn prepare_report_directory(&self) -> Result<ArtifactStore, ConfigError> {
        ArtifactStore::prepare(&self.report_directory).map_err(ConfigError::ReportDirectory)
    }
}

/// Orchestrator settings.
///
/// Durations are whole seconds in TOML. Absent keys keep their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessSettings {
    /// Reference image.
    pub image: String,
    /// Fuzzing port on both sides.
    pub fuzzing_port: u16,
    /// Bound on the reference server becoming connectable.
    #[serde(with = "duration_secs")]
    pub ready_timeout: Duration,
    /// Bound on the reference client finishing.
    #[serde(with = "duration_secs")]
    pub exit_timeout: Duration,
    /// Grace period before the container is killed.
    #[serde(with = "duration_secs")]
    pub stop_grace: Duration,
    /// Config mount point inside the container.
    pub container_config_dir: String,
    /// Report mount point inside the container.
    pub container_report_dir: String,
    /// Mirror of the report tree after the client scenario, relative to the
    /// base directory.
    pub client_mirror: PathBuf,
    /// Mirror of the report tree after the server scenario, relative to the
    /// base directory.
    pub server_mirror: PathBuf,
    /// Forward container output to the log.
    pub stream_logs: bool,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            fuzzing_port: DEFAULT_FUZZING_PORT,
            ready_timeout: crate::container::DEFAULT_PORT_READY_TIMEOUT,
            exit_timeout: crate::container::DEFAULT_EXIT_TIMEOUT,
            stop_grace: crate::container::DEFAULT_STOP_GRACE,
            container_config_dir: DEFAULT_CONTAINER_CONFIG_DIR.to_string(),
            container_report_dir: DEFAULT_CONTAINER_REPORT_DIR.to_string(),
            client_mirror: PathBuf::from("target/reports-client"),
            server_mirror: PathBuf::from("target/reports-server"),
            stream_logs: true,
        }
    }
}

impl HarnessSettings {
    /// Parses settings from TOML text.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let settings: Self =
            toml::from_str(text).map_err(|err| ConfigError::InvalidSettings(err.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reads settings from a TOML file.
    #[cfg(feature = "config-file")]
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::SettingsIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Rejects settings no run could succeed with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.image.trim().is_empty() {
            return Err(ConfigError::InvalidSettings("image must not be empty".into()));
        }
        if self.fuzzing_port == 0 {
            return Err(ConfigError::InvalidSettings(
                "fuzzing_port must be non-zero".into(),
            ));
        }
        for (key, dir) in [
            ("container_config_dir", &self.container_config_dir),
            ("container_report_dir", &self.container_report_dir),
        ] {
            if !dir.starts_with('/') {
                return Err(ConfigError::InvalidSettings(format!(
                    "{key} must be an absolute container path, got `{dir}`"
                )));
            }
        }
        Ok(())
    }

    /// Mirror directory for `role`, resolved against `base`.
    #[must_use]
    pub fn mirror_directory(&self, base: &Path, role: Role) -> PathBuf {
        match role {
            Role::ClientUnderTest => base.join(&self.client_mirror),
            Role::ServerUnderTest => base.join(&self.server_mirror),
        }
    }

    /// Path of the `role` config inside the container.
    #[must_use]
    pub fn container_config_path(&self, role: Role) -> String {
        format!(
            "{}/{}",
            self.container_config_dir.trim_end_matches('/'),
            role.config_file_name()
        )
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
