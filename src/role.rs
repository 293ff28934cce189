//! Which side the local implementation plays in a scenario.

use core::fmt;
use serde::{Deserialize, Serialize};

/// Role of the implementation under test.
///
/// The role decides everything that differs between the two scenarios: the
/// `wstest` mode the reference container runs in, which configuration file is
/// mounted into it, and where its report subtree lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Local client against the reference fuzzing server.
    ClientUnderTest,
    /// Local server against the reference fuzzing client.
    ServerUnderTest,
}

impl Role {
    /// Both roles in the order the harness runs them.
    pub const ALL: [Self; 2] = [Self::ClientUnderTest, Self::ServerUnderTest];

    /// Returns the stable label used in logs and reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClientUnderTest => "client-under-test",
            Self::ServerUnderTest => "server-under-test",
        }
    }

    /// Mode flag passed to `wstest -m`. The reference plays the opposite side.
    #[must_use]
    pub const fn wstest_mode(self) -> &'static str {
        match self {
            Self::ClientUnderTest => "fuzzingserver",
            Self::ServerUnderTest => "fuzzingclient",
        }
    }

    /// Name of the configuration file mounted into the container.
    #[must_use]
    pub const fn config_file_name(self) -> &'static str {
        match self {
            Self::ClientUnderTest => "fuzzingserver.json",
            Self::ServerUnderTest => "fuzzingclient.json",
        }
    }

    /// Report subtree the reference tool writes under the report directory.
    #[must_use]
    pub const fn report_subtree(self) -> &'static str {
        match self {
            Self::ClientUnderTest => "clients",
            Self::ServerUnderTest => "servers",
        }
    }

    /// Returns true if the local implementation runs as a server.
    #[must_use]
    pub const fn is_server(self) -> bool {
        matches!(self, Self::ServerUnderTest)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
