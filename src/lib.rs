//! wsconform: two-role WebSocket conformance orchestration.
//!
//! # Overview
//!
//! wsconform runs the Autobahn fuzzing suite (`wstest`, shipped in the
//! `crossbario/autobahn-testsuite` image) against a locally built WebSocket
//! implementation, in both directions:
//!
//! - **client under test**: the reference fuzzing server runs in a container
//!   and the local client connects to its published port.
//! - **server under test**: the local server listens on the host and the
//!   reference fuzzing client in the container connects back to it.
//!
//! The crate does not speak WebSocket and does not judge individual cases.
//! It sequences three independently owned resources (the local endpoint, the
//! container, and the shared report directory), guarantees each is released
//! on every path, and collects the reports the reference tool writes.
//!
//! # Module Structure
//!
//! - [`artifact`]: report directory creation and relocation
//! - [`container`]: container specs, the session state machine, backends
//! - [`endpoint`]: client/server entry points for the implementation under test
//! - [`run`]: scenario orchestration
//! - [`config`]: run inputs and harness settings
//! - [`report`]: verdict tallies from `index.json`
//! - [`role`]: the two roles and what differs between them
//! - [`error`](mod@error): error types
//! - [`tracing_compat`]: optional tracing integration
//!
//! # Example
//!
//! ```ignore
//! use wsconform::{ConformanceRun, RunConfig, RunResult, EndpointAddress};
//! use wsconform::container::docker::DockerRuntime;
//!
//! let config = RunConfig::from_base_directory(".");
//! let mut run = ConformanceRun::new(DockerRuntime::connect()?);
//! let report = run.run_client_under_test(&config, &mut |address: &EndpointAddress| {
//!     my_client::run_all_cases(&address.ws_url())
//! })?;
//! println!("report: {}", report.report_index.display());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

pub mod artifact;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod container;
pub mod endpoint;
pub mod error;
pub mod report;
pub mod role;
pub mod run;
pub mod tracing_compat;

#[cfg(test)]
mod test_utils;

pub use artifact::{ArtifactStore, CopyStats, ReportTree, ensure_directory, relocate};
pub use config::{HarnessSettings, RunConfig};
pub use container::{ContainerRuntime, ContainerSession, ContainerSpec, ReadinessPolicy};
pub use endpoint::{
    ClientEntryPoint, EndpointAddress, LocalServer, RunResult, ServerEntryPoint, ServerHandle,
};
pub use error::{
    ConfigError, ConformanceRunFailed, ContainerError, EndpointError, FilesystemError,
    HarnessError,
};
pub use report::ReportSummary;
pub use role::Role;
pub use run::{ConformanceRun, RunAllOutcome, ScenarioReport};
