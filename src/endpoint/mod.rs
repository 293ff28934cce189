//! The local implementation under test.
//!
//! The harness never speaks WebSocket itself. It hands an address to a
//! client entry point, or a port to a server entry point, and leaves the
//! protocol to the implementation. Closures work as entry points directly;
//! [`command`] adapts external programs.

pub mod command;

pub use command::{CommandClient, CommandServer, CommandServerHandle};

use crate::error::EndpointError;
use crate::tracing_compat::{info, warn};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Where a client under test should connect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct EndpointAddress {
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl EndpointAddress {
    /// Creates an address.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `localhost` on `port`.
    #[must_use]
    pub fn localhost(port: u16) -> Self {
        Self::new("localhost", port)
    }

    /// WebSocket URL for this address.
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// What a client run reports back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunResult {
    /// Wall time of the run.
    pub elapsed: Duration,
    /// Free-form detail for logs.
    pub detail: Option<String>,
}

impl RunResult {
    /// A result with only the elapsed time.
    #[must_use]
    pub const fn elapsed(elapsed: Duration) -> Self {
        Self {
            elapsed,
            detail: None,
        }
    }

    /// Attaches detail text.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// A client implementation that can be pointed at the reference server.
///
/// `run` blocks until the client has gone through every case the reference
/// server offers. It has no timeout of its own.
pub trait ClientEntryPoint {
    /// Runs the client against `address`.
    fn run(&mut self, address: &EndpointAddress) -> Result<RunResult, EndpointError>;
}

impl<F> ClientEntryPoint for F
where
    F: FnMut(&EndpointAddress) -> Result<RunResult, EndpointError>,
{
    fn run(&mut self, address: &EndpointAddress) -> Result<RunResult, EndpointError> {
        self(address)
    }
}

/// A running server under test.
pub trait ServerHandle {
    /// Stops the server. Calling it again is a no-op.
    fn stop(&mut self) -> Result<(), EndpointError>;
}

/// A server implementation the reference client can connect to.
pub trait ServerEntryPoint {
    /// Handle to the started server.
    type Handle: ServerHandle;

    /// Starts the server on `port`. The socket must be bound on return.
    fn start(&mut self, port: u16) -> Result<Self::Handle, EndpointError>;
}

impl<F, H> ServerEntryPoint for F
where
    F: FnMut(u16) -> Result<H, EndpointError>,
    H: ServerHandle,
{
    type Handle = H;

    fn start(&mut self, port: u16) -> Result<H, EndpointError> {
        self(port)
    }
}

/// Started server that is stopped exactly once, explicitly or on drop.
pub struct LocalServer<H: ServerHandle> {
    handle: H,
    port: u16,
    stopped: bool,
}

impl<H: ServerHandle> LocalServer<H> {
    /// Starts `entry` on `port`.
    pub fn start<S>(entry: &mut S, port: u16) -> Result<Self, EndpointError>
    where
        S: ServerEntryPoint<Handle = H> + ?Sized,
    {
        let handle = entry.start(port)?;
        info!(port, "server under test started");
        Ok(Self {
            handle,
            port,
            stopped: false,
        })
    }

    /// Port the server listens on.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Returns true once the server has been stopped.
    #[must_use]
    pub const fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Stops the server. Later calls and the drop are no-ops.
    pub fn stop(&mut self) -> Result<(), EndpointError> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        self.handle.stop()?;
        info!(port = self.port, "server under test stopped");
        Ok(())
    }
}

impl<H: ServerHandle> Drop for LocalServer<H> {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!(port = self.port, error = %err, "server stop on drop failed");
        }
    }
}

impl<H: ServerHandle> fmt::Debug for LocalServer<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalServer")
            .field("port", &self.port)
            .field("stopped", &self.stopped)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    struct CountingHandle {
        stops: Rc<Cell<usize>>,
    }

    impl ServerHandle for CountingHandle {
        fn stop(&mut self) -> Result<(), EndpointError> {
            self.stops.set(self.stops.get() + 1);
            Ok(())
        }
    }

    #[test]
    fn closure_client_receives_address() {
        let mut seen = None;
        let mut client = |address: &EndpointAddress| {
            seen = Some(address.clone());
            Ok::<_, EndpointError>(RunResult::elapsed(Duration::from_millis(5)))
        };
        let result = client
            .run(&EndpointAddress::localhost(54321))
            .expect("run");
        assert_eq!(result.elapsed, Duration::from_millis(5));
        assert_eq!(seen, Some(EndpointAddress::new("localhost", 54321)));
    }

    #[test]
    fn local_server_stops_once_across_stop_and_drop() {
        let stops = Rc::new(Cell::new(0));
        let counter = Rc::clone(&stops);
        let mut entry = move |_port: u16| {
            Ok::<_, EndpointError>(CountingHandle {
                stops: Rc::clone(&counter),
            })
        };
        let mut server = LocalServer::start(&mut entry, 9001).expect("start");
        assert_eq!(server.port(), 9001);
        server.stop().expect("stop");
        server.stop().expect("second stop");
        assert!(server.is_stopped());
        drop(server);
        assert_eq!(stops.get(), 1);
    }

    #[test]
    fn local_server_stops_on_drop() {
        let stops = Rc::new(Cell::new(0));
        let counter = Rc::clone(&stops);
        let mut entry = move |_port: u16| {
            Ok::<_, EndpointError>(CountingHandle {
                stops: Rc::clone(&counter),
            })
        };
        {
            let _server = LocalServer::start(&mut entry, 9001).expect("start");
        }
        assert_eq!(stops.get(), 1);
    }

    #[test]
    fn address_formats() {
        let address = EndpointAddress::localhost(9001);
        assert_eq!(address.to_string(), "localhost:9001");
        assert_eq!(address.ws_url(), "ws://localhost:9001");
    }
}
