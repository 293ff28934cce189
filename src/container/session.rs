//! Scoped lifecycle of one reference container.

use super::{
    ContainerId, ContainerRuntime, ContainerSpec, ContainerState, DEFAULT_STOP_GRACE,
    PortMapping, ReadinessPolicy, WaitOutcome, validate_transition,
};
use crate::error::ContainerError;
use crate::tracing_compat::{debug, info, warn};
use std::net::{Ipv4Addr, SocketAddr};
use std::thread;
use std::time::{Duration, Instant};

/// One reference container, from configuration to removal.
///
/// The session is a state machine
/// (`Created -> Starting -> Running -> Stopping -> Stopped`, with `Failed`
/// reachable from any live state). Teardown runs exactly once: from
/// [`stop`](Self::stop), from a failed [`start`](Self::start), or from `Drop`
/// if the owner unwinds first.
pub struct ContainerSession<R: ContainerRuntime> {
    runtime: R,
    spec: ContainerSpec,
    state: ContainerState,
    id: Option<ContainerId>,
    mappings: Vec<PortMapping>,
    exit_code: Option<i64>,
    stop_grace: Duration,
    torn_down: bool,
}

impl<R: ContainerRuntime> ContainerSession<R> {
    /// Creates a session in the `Created` state. Nothing is launched yet.
    #[must_use]
    pub fn new(runtime: R, spec: ContainerSpec) -> Self {
        Self {
            runtime,
            spec,
            state: ContainerState::Created,
            id: None,
            mappings: Vec::new(),
            exit_code: None,
            stop_grace: DEFAULT_STOP_GRACE,
            torn_down: false,
        }
    }

    /// Sets the grace period given to the container on stop.
    #[must_use]
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ContainerState {
        self.state
    }

    /// The spec this session launches.
    #[must_use]
    pub fn spec(&self) -> &ContainerSpec {
        &self.spec
    }

    /// Backend identifier, once launched.
    #[must_use]
    pub fn id(&self) -> Option<&ContainerId> {
        self.id.as_ref()
    }

    /// Exit status, once the container has exited.
    #[must_use]
    pub fn exit_code(&self) -> Option<i64> {
        self.exit_code
    }

    /// Port mappings resolved at start.
    #[must_use]
    pub fn port_mappings(&self) -> &[PortMapping] {
        &self.mappings
    }

    /// Makes host `port` reachable from inside the container.
    ///
    /// Only legal before [`start`](Self::start).
    pub fn expose_host_port(&mut self, port: u16) -> Result<(), ContainerError> {
        if self.state != ContainerState::Created {
            return Err(ContainerError::NotConfigurable { state: self.state });
        }
        self.spec.host_ports.insert(port);
        debug!(port, "host port exposed to container");
        Ok(())
    }

    /// Launches the container and blocks until its readiness policy holds.
    ///
    /// On any error the session moves to `Failed` and the container is torn
    /// down before the error is returned.
    pub fn start(&mut self) -> Result<(), ContainerError> {
        self.transition(ContainerState::Starting)?;
        match self.launch_and_await() {
            Ok(()) => self.transition(ContainerState::Running),
            Err(err) => {
                warn!(image = %self.spec.image, error = %err, "container start failed");
                self.fail();
                Err(err)
            }
        }
    }

    /// Host port bound to `container_port`.
    ///
    /// Fails with [`ContainerError::PortNotExposed`] if the port was not
    /// exposed or the session is not running.
    pub fn mapped_host_port(&self, container_port: u16) -> Result<u16, ContainerError> {
        if self.state != ContainerState::Running {
            return Err(ContainerError::PortNotExposed {
                port: container_port,
            });
        }
        self.mappings
            .iter()
            .find(|mapping| mapping.container_port == container_port)
            .map(|mapping| mapping.host_port)
            .ok_or(ContainerError::PortNotExposed {
                port: container_port,
            })
    }

    /// Stops and removes the container. Returns its exit status if known.
    pub fn stop(&mut self) -> Result<Option<i64>, ContainerError> {
        self.transition(ContainerState::Stopping)?;
        let result = self.teardown();
        self.transition(ContainerState::Stopped)?;
        result.map(|()| self.exit_code)
    }

    fn transition(&mut self, to: ContainerState) -> Result<(), ContainerError> {
        validate_transition(self.state, to)?;
        debug!(from = ?self.state, to = ?to, "container state");
        self.state = to;
        Ok(())
    }

    fn launch_and_await(&mut self) -> Result<(), ContainerError> {
        let id = self.runtime.launch(&self.spec)?;
        info!(
            container = %id.short(),
            image = %self.spec.image,
            "container started"
        );
        self.id = Some(id.clone());

        for &port in &self.spec.exposed_ports {
            let host_port = self
                .runtime
                .host_port(&id, port)?
                .ok_or(ContainerError::PortNotExposed { port })?;
            debug!(container_port = port, host_port, "port mapped");
            self.mappings.push(PortMapping {
                container_port: port,
                host_port,
            });
        }

        match self.spec.readiness {
            ReadinessPolicy::PortReady {
                port,
                timeout,
                poll_interval,
            } => self.await_port(port, timeout, poll_interval),
            ReadinessPolicy::ExitReady { timeout } => self.await_exit(&id, timeout),
        }
    }

    fn await_port(
        &mut self,
        port: u16,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<(), ContainerError> {
        let host_port = self
            .mappings
            .iter()
            .find(|mapping| mapping.container_port == port)
            .map(|mapping| mapping.host_port)
            .ok_or(ContainerError::PortNotExposed { port })?;
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, host_port));
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if self.runtime.probe(addr, remaining.min(poll_interval).max(Duration::from_millis(1))) {
                info!(port, host_port, "container port accepting connections");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ContainerError::TimedOut { timeout });
            }
            thread::sleep(poll_interval.min(deadline.saturating_duration_since(Instant::now())));
        }
    }

    fn await_exit(&mut self, id: &ContainerId, timeout: Duration) -> Result<(), ContainerError> {
        match self.runtime.wait_exit(id, timeout)? {
            WaitOutcome::Exited { code } => {
                self.exit_code = Some(code);
                if code == 0 {
                    info!(container = %id.short(), "container exited");
                } else {
                    // The last command is the ownership fix; its status is advisory.
                    warn!(container = %id.short(), code, "container exited with non-zero status");
                }
                Ok(())
            }
            WaitOutcome::TimedOut => Err(ContainerError::TimedOut { timeout }),
        }
    }

    fn fail(&mut self) {
        if let Err(err) = self.teardown() {
            warn!(error = %err, "teardown after failed start");
        }
        if !self.state.is_terminal() {
            self.state = ContainerState::Failed;
        }
    }

    fn teardown(&mut self) -> Result<(), ContainerError> {
        if self.torn_down {
            return Ok(());
        }
        self.torn_down = true;
        let Some(id) = self.id.clone() else {
            return Ok(());
        };
        if let Err(err) = self.runtime.stop(&id, self.stop_grace) {
            warn!(container = %id.short(), error = %err, "container stop failed");
        }
        self.runtime.remove(&id)?;
        info!(container = %id.short(), "container removed");
        Ok(())
    }
}

impl<R: ContainerRuntime> Drop for ContainerSession<R> {
    fn drop(&mut self) {
        if self.torn_down {
            return;
        }
        if let Err(err) = self.teardown() {
            warn!(error = %err, "container teardown on drop failed");
        }
        if !self.state.is_terminal() {
            self.state = ContainerState::Stopped;
        }
    }
}

impl<R: ContainerRuntime> std::fmt::Debug for ContainerSession<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerSession")
            .field("image", &self.spec.image)
            .field("state", &self.state)
            .field("id", &self.id)
            .field("mappings", &self.mappings)
            .field("exit_code", &self.exit_code)
            .finish_non_exhaustive()
    }
}
