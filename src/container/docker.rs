//! Docker Engine backend.
//!
//! Talks to the local daemon through `bollard`. The engine API is async, so
//! the runtime owns a small tokio runtime and blocks on it; the rest of the
//! harness stays synchronous.

use super::{ContainerId, ContainerRuntime, ContainerSpec, LogSink, WaitOutcome};
use crate::error::ContainerError;
use crate::tracing_compat::{debug, info, warn};
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StopContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use futures_lite::StreamExt;
use std::collections::HashMap;
use std::fs;
use std::io::{self, Read};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

/// Host aliases resolving to the host gateway inside the container.
pub const HOST_GATEWAY_ALIASES: [&str; 2] =
    ["host.testcontainers.internal", "host.docker.internal"];

/// How long a probe waits to see whether an accepted connection is closed
/// straight away.
const PROBE_SETTLE: Duration = Duration::from_millis(100);

const LOG_TARGET: &str = "wsconform::container";

/// [`ContainerRuntime`] backed by the local Docker daemon.
pub struct DockerRuntime {
    docker: Docker,
    runtime: tokio::runtime::Runtime,
}

impl DockerRuntime {
    /// Connects with the platform defaults (`DOCKER_HOST` or the local socket).
    pub fn connect() -> Result<Self, ContainerError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("wsconform-docker")
            .enable_all()
            .build()
            .map_err(|err| ContainerError::Runtime(format!("tokio runtime: {err}")))?;
        let docker = {
            let _guard = runtime.enter();
            Docker::connect_with_local_defaults().map_err(runtime_error)?
        };
        Ok(Self { docker, runtime })
    }

    /// Checks that the daemon answers and returns its version string.
    pub fn server_version(&self) -> Result<String, ContainerError> {
        let docker = self.docker.clone();
        self.runtime.block_on(async move {
            docker.ping().await.map_err(runtime_error)?;
            let version = docker.version().await.map_err(runtime_error)?;
            Ok(version.version.unwrap_or_else(|| "unknown".to_string()))
        })
    }

    fn forward_logs(&self, id: &ContainerId, label: &str) {
        let docker = self.docker.clone();
        let id = id.as_str().to_string();
        let label = label.to_string();
        self.runtime.spawn(async move {
            let options = LogsOptions::<String> {
                follow: true,
                stdout: true,
                stderr: true,
                ..Default::default()
            };
            let mut stream = Box::pin(docker.logs(&id, Some(options)));
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(output) => emit_log_lines(&label, &output),
                    Err(err) => {
                        debug!(target: LOG_TARGET, label = %label, error = %err, "log stream ended");
                        break;
                    }
                }
            }
        });
    }
}

impl std::fmt::Debug for DockerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerRuntime").finish_non_exhaustive()
    }
}

impl ContainerRuntime for DockerRuntime {
    fn launch(&mut self, spec: &ContainerSpec) -> Result<ContainerId, ContainerError> {
        let config = container_config(spec)?;
        let docker = self.docker.clone();
        let image = spec.image.clone();

        let id = self.runtime.block_on(async move {
            ensure_image(&docker, &image).await?;
            let created = docker
                .create_container(None::<CreateContainerOptions<String>>, config)
                .await
                .map_err(start_error)?;
            for warning in &created.warnings {
                warn!(container = %created.id, warning = %warning, "docker create warning");
            }
            if let Err(err) = docker.start_container::<String>(&created.id, None).await {
                let _ = docker
                    .remove_container(
                        &created.id,
                        Some(RemoveContainerOptions {
                            force: true,
                            ..Default::default()
                        }),
                    )
                    .await;
                return Err(start_error(err));
            }
            Ok(ContainerId::new(created.id))
        })?;

        if let LogSink::Tracing { label } = &spec.log_sink {
            self.forward_logs(&id, label);
        }
        Ok(id)
    }

    fn host_port(
        &mut self,
        id: &ContainerId,
        container_port: u16,
    ) -> Result<Option<u16>, ContainerError> {
        let docker = self.docker.clone();
        let id = id.as_str().to_string();
        let info = self.runtime.block_on(async move {
            docker
                .inspect_container(&id, None::<InspectContainerOptions>)
                .await
                .map_err(runtime_error)
        })?;
        let key = format!("{container_port}/tcp");
        Ok(info
            .network_settings
            .and_then(|settings| settings.ports)
            .and_then(|mut ports| ports.remove(&key))
            .flatten()
            .and_then(|bindings| bindings.into_iter().find_map(|binding| binding.host_port))
            .and_then(|port| port.parse().ok()))
    }

    fn wait_exit(
        &mut self,
        id: &ContainerId,
        timeout: Duration,
    ) -> Result<WaitOutcome, ContainerError> {
        let docker = self.docker.clone();
        let id = id.as_str().to_string();
        self.runtime.block_on(async move {
            let options = WaitContainerOptions {
                condition: "not-running".to_string(),
            };
            let mut stream = Box::pin(docker.wait_container(&id, Some(options)));
            match tokio::time::timeout(timeout, stream.next()).await {
                Err(_) => Ok(WaitOutcome::TimedOut),
                Ok(None) => Err(ContainerError::Runtime(
                    "wait stream ended without a status".to_string(),
                )),
                Ok(Some(Ok(response))) => Ok(WaitOutcome::Exited {
                    code: response.status_code,
                }),
                // bollard reports a non-zero exit as an error.
                Ok(Some(Err(DockerError::DockerContainerWaitError { code, .. }))) => {
                    Ok(WaitOutcome::Exited { code })
                }
                Ok(Some(Err(err))) => Err(runtime_error(err)),
            }
        })
    }

    fn probe(&mut self, addr: SocketAddr, timeout: Duration) -> bool {
        let Ok(mut stream) = TcpStream::connect_timeout(&addr, timeout) else {
            return false;
        };
        // The userland proxy accepts for a container that is not listening
        // yet and closes the connection at once.
        if stream.set_read_timeout(Some(PROBE_SETTLE)).is_err() {
            return true;
        }
        let mut buf = [0_u8; 1];
        match stream.read(&mut buf) {
            Ok(0) => false,
            Ok(_) => true,
            Err(err) => matches!(
                err.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
        }
    }

    fn stop(&mut self, id: &ContainerId, grace: Duration) -> Result<(), ContainerError> {
        let docker = self.docker.clone();
        let id = id.as_str().to_string();
        let t = i64::try_from(grace.as_secs()).unwrap_or(i64::MAX);
        self.runtime.block_on(async move {
            match docker
                .stop_container(&id, Some(StopContainerOptions { t }))
                .await
            {
                Ok(()) => Ok(()),
                // Already stopped.
                Err(DockerError::DockerResponseServerError {
                    status_code: 304, ..
                }) => Ok(()),
                Err(err) => Err(runtime_error(err)),
            }
        })
    }

    fn remove(&mut self, id: &ContainerId) -> Result<(), ContainerError> {
        let docker = self.docker.clone();
        let id = id.as_str().to_string();
        self.runtime.block_on(async move {
            let options = RemoveContainerOptions {
                force: true,
                v: true,
                ..Default::default()
            };
            match docker.remove_container(&id, Some(options)).await {
                Ok(()) => Ok(()),
                Err(DockerError::DockerResponseServerError {
                    status_code: 404, ..
                }) => Ok(()),
                Err(err) => Err(runtime_error(err)),
            }
        })
    }
}

/// Builds the engine-level container configuration for `spec`.
///
/// Bind sources are canonicalized because the daemon only accepts absolute
/// host paths.
pub fn container_config(spec: &ContainerSpec) -> Result<Config<String>, ContainerError> {
    let binds = spec
        .bind_mounts
        .iter()
        .map(|mount| {
            let host_path = fs::canonicalize(&mount.host_path).map_err(|err| {
                ContainerError::Start(format!(
                    "bind source {}: {err}",
                    mount.host_path.display()
                ))
            })?;
            Ok(format!(
                "{}:{}:{}",
                host_path.display(),
                mount.container_path,
                mount.mode.as_bind_flag()
            ))
        })
        .collect::<Result<Vec<_>, ContainerError>>()?;

    let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
        .exposed_ports
        .iter()
        .map(|port| (format!("{port}/tcp"), HashMap::new()))
        .collect();

    let extra_hosts = (!spec.host_ports.is_empty()).then(|| {
        HOST_GATEWAY_ALIASES
            .iter()
            .map(|alias| format!("{alias}:host-gateway"))
            .collect::<Vec<_>>()
    });

    let host_config = HostConfig {
        binds: (!binds.is_empty()).then_some(binds),
        publish_all_ports: Some(!exposed_ports.is_empty()),
        extra_hosts,
        ..Default::default()
    };

    Ok(Config {
        image: Some(spec.image.clone()),
        cmd: (!spec.command.is_empty()).then(|| spec.command.clone()),
        exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
        host_config: Some(host_config),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        tty: Some(false),
        ..Default::default()
    })
}

async fn ensure_image(docker: &Docker, image: &str) -> Result<(), ContainerError> {
    if docker.inspect_image(image).await.is_ok() {
        debug!(image, "image present");
        return Ok(());
    }
    info!(image, "pulling image");
    let options = CreateImageOptions {
        from_image: image.to_string(),
        ..Default::default()
    };
    let mut stream = Box::pin(docker.create_image(Some(options), None, None));
    while let Some(progress) = stream.next().await {
        let progress = progress.map_err(start_error)?;
        if let Some(status) = progress.status {
            debug!(image, status = %status, "pull");
        }
    }
    Ok(())
}

fn emit_log_lines(label: &str, output: &LogOutput) {
    let (stream, message) = match output {
        LogOutput::StdOut { message } => ("stdout", message),
        LogOutput::StdErr { message } => ("stderr", message),
        LogOutput::Console { message } => ("console", message),
        LogOutput::StdIn { .. } => return,
    };
    for line in String::from_utf8_lossy(message).lines() {
        let line = line.trim_end();
        if !line.is_empty() {
            info!(target: LOG_TARGET, label = %label, stream, "{line}");
        }
    }
}

fn runtime_error(err: DockerError) -> ContainerError {
    ContainerError::Runtime(err.to_string())
}

fn start_error(err: DockerError) -> ContainerError {
    ContainerError::Start(err.to_string())
}
