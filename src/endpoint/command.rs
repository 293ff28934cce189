//! External programs as entry points.
//!
//! Templates are split with POSIX shell quoting rules, so
//! `sh -c 'my-client {host} {port}'` keeps its quoted argument whole.
//! `{host}` and `{port}` are replaced in every argument before the program
//! is spawned, so `my-client {host} {port}` becomes
//! `my-client localhost 54321`.

use super::{ClientEntryPoint, EndpointAddress, RunResult, ServerEntryPoint, ServerHandle};
use crate::error::EndpointError;
use crate::tracing_compat::{debug, info, warn};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::process::{Child, Command, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

/// Default bound on a spawned server becoming connectable.
pub const DEFAULT_SERVER_READY_TIMEOUT: Duration = Duration::from_secs(10);

const READY_POLL: Duration = Duration::from_millis(50);

/// A parsed command template.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Template {
    program: String,
    args: Vec<String>,
}

impl Template {
    fn parse(template: &str) -> Result<Self, EndpointError> {
        let mut parts = shlex::split(template)
            .ok_or_else(|| {
                EndpointError::Invocation(format!("unbalanced quotes in command template: {template}"))
            })?
            .into_iter();
        let program = parts
            .next()
            .ok_or_else(|| EndpointError::Invocation("empty command template".to_string()))?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    fn render(&self, host: &str, port: u16) -> Command {
        let port = port.to_string();
        let substitute = |arg: &str| arg.replace("{host}", host).replace("{port}", &port);
        let mut command = Command::new(substitute(&self.program));
        command.args(self.args.iter().map(|arg| substitute(arg)));
        command
    }

    fn spawn(&self, host: &str, port: u16) -> Result<Child, EndpointError> {
        let mut command = self.render(host, port);
        debug!(command = ?command, "spawning endpoint process");
        command.spawn().map_err(|source| EndpointError::Spawn {
            program: self.program.clone(),
            source,
        })
    }
}

fn check_status(status: ExitStatus) -> Result<(), EndpointError> {
    if status.success() {
        Ok(())
    } else {
        Err(EndpointError::Exited {
            code: status.code(),
        })
    }
}

/// Runs an external client program to completion.
#[derive(Debug, Clone)]
pub struct CommandClient {
    template: Template,
}

impl CommandClient {
    /// Parses `template`, e.g. `"my-client {host} {port}"`.
    pub fn parse(template: &str) -> Result<Self, EndpointError> {
        Ok(Self {
            template: Template::parse(template)?,
        })
    }

    /// Program name from the template.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.template.program
    }
}

impl ClientEntryPoint for CommandClient {
    fn run(&mut self, address: &EndpointAddress) -> Result<RunResult, EndpointError> {
        let started = Instant::now();
        let mut child = self.template.spawn(&address.host, address.port)?;
        info!(program = %self.template.program, address = %address, "client under test running");
        let status = child.wait().map_err(|source| EndpointError::Spawn {
            program: self.template.program.clone(),
            source,
        })?;
        check_status(status)?;
        let elapsed = started.elapsed();
        Ok(RunResult::elapsed(elapsed).with_detail(format!(
            "{} finished in {:.1}s",
            self.template.program,
            elapsed.as_secs_f64()
        )))
    }
}

/// Spawns an external server program and waits until it accepts connections.
#[derive(Debug, Clone)]
pub struct CommandServer {
    template: Template,
    ready_timeout: Duration,
}

impl CommandServer {
    /// Parses `template`, e.g. `"my-server {port}"`.
    pub fn parse(template: &str) -> Result<Self, EndpointError> {
        Ok(Self {
            template: Template::parse(template)?,
            ready_timeout: DEFAULT_SERVER_READY_TIMEOUT,
        })
    }

    /// Sets how long to wait for the port to accept connections.
    #[must_use]
    pub const fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }
}

impl ServerEntryPoint for CommandServer {
    type Handle = CommandServerHandle;

    fn start(&mut self, port: u16) -> Result<CommandServerHandle, EndpointError> {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        // A stale listener would pass the readiness check.
        if TcpStream::connect_timeout(&addr, READY_POLL).is_ok() {
            return Err(EndpointError::Invocation(format!(
                "port {port} is already accepting connections"
            )));
        }

        let child = self.template.spawn("0.0.0.0", port)?;
        let mut handle = CommandServerHandle {
            child: Some(child),
            program: self.template.program.clone(),
        };
        let deadline = Instant::now() + self.ready_timeout;

        loop {
            if let Some(status) = handle.try_exit_status()? {
                handle.child = None;
                return Err(EndpointError::Exited {
                    code: status.code(),
                });
            }
            if TcpStream::connect_timeout(&addr, READY_POLL).is_ok() {
                // A bind failure can surface just after the port answers.
                thread::sleep(READY_POLL);
                if let Some(status) = handle.try_exit_status()? {
                    handle.child = None;
                    return Err(EndpointError::Exited {
                        code: status.code(),
                    });
                }
                return Ok(handle);
            }
            if Instant::now() >= deadline {
                handle.stop()?;
                return Err(EndpointError::NotReady {
                    port,
                    timeout: self.ready_timeout,
                });
            }
            thread::sleep(READY_POLL);
        }
    }
}

/// Handle to a spawned server process. Killed and reaped on stop or drop.
#[derive(Debug)]
pub struct CommandServerHandle {
    child: Option<Child>,
    program: String,
}

impl CommandServerHandle {
    /// OS process id, while running.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    fn try_exit_status(&mut self) -> Result<Option<ExitStatus>, EndpointError> {
        match self.child.as_mut() {
            Some(child) => child
                .try_wait()
                .map_err(|err| EndpointError::Stop(err.to_string())),
            None => Ok(None),
        }
    }
}

impl ServerHandle for CommandServerHandle {
    fn stop(&mut self) -> Result<(), EndpointError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        match child.kill() {
            Ok(()) => {}
            // Already exited.
            Err(err) if err.kind() == io::ErrorKind::InvalidInput => {}
            Err(err) => return Err(EndpointError::Stop(err.to_string())),
        }
        let status = child
            .wait()
            .map_err(|err| EndpointError::Stop(err.to_string()))?;
        debug!(program = %self.program, status = %status, "server process reaped");
        Ok(())
    }
}

impl Drop for CommandServerHandle {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!(program = %self.program, error = %err, "server process cleanup failed");
        }
    }
}
