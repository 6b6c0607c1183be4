use crate::config::DEFAULT_PORT;
use crate::health::{self, Health};
use crate::paths;
use crate::poll::Poll;
use crate::scanner::{self, Introspect, PROGRAM_NAME, ServerInstance};
use crate::serve::ServeSpec;
use crate::sys::Host;
use nix::sys::signal::Signal;
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// How long the pre-flight connect waits before calling a port free.
pub const PREFLIGHT_TIMEOUT: Duration = Duration::from_millis(200);

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// One invocation's parameters; used unchanged for start, stop, status and
/// restart.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Port to start on or to select instances by. `None` selects every
    /// instance and starts on the default port.
    pub port: Option<u16>,
    pub bind: String,
    pub dir: PathBuf,
    pub log_file: PathBuf,
    pub legacy_log: PathBuf,
    pub timeout: Duration,
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StartOutcome {
    AlreadyRunning {
        pid: u32,
        ports: Vec<u16>,
    },
    Started {
        pid: u32,
        spec: ServeSpec,
        exposed: bool,
    },
    /// Launched, but the port never showed up as listening within the poll
    /// bound.
    NotConfirmed {
        child_pid: u32,
        spec: ServeSpec,
        exposed: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StopOutcome {
    NotRunning {
        port: Option<u16>,
    },
    Ambiguous {
        port: Option<u16>,
        instances: Vec<ServerInstance>,
    },
    Stopped {
        pid: u32,
        ports: Vec<u16>,
        /// SIGTERM was not enough and SIGKILL was sent.
        forced: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StatusReport {
    NotRunning {
        port: Option<u16>,
    },
    Ambiguous {
        port: Option<u16>,
        instances: Vec<ServerInstance>,
    },
    /// `health` is only checked when the instance serves exactly one port.
    Running {
        instance: ServerInstance,
        health: Option<Health>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestartOutcome {
    pub stop: StopOutcome,
    pub start: StartOutcome,
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),
    #[error("port {port} already in use on {bind}")]
    PortInUse { bind: String, port: u16 },
    #[error("failed to launch server: {0}")]
    Launch(#[source] io::Error),
    #[error("failed to signal PID {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: io::Error,
    },
}

impl LifecycleError {
    pub fn exit_code(&self) -> u8 {
        1
    }

    pub fn hint(&self) -> Option<String> {
        match self {
            LifecycleError::PortInUse { port, .. } => Some(format!(
                "Suggestion: use 'ss -lntp | grep :{port}' to find the process or choose --port."
            )),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub struct Controller<I, H> {
    introspect: I,
    host: H,
    program: String,
    start_poll: Poll,
    stop_poll: Poll,
}

impl<I: Introspect, H: Host> Controller<I, H> {
    pub fn new(introspect: I, host: H) -> Self {
        Self {
            introspect,
            host,
            program: PROGRAM_NAME.to_string(),
            start_poll: Poll::START_CONFIRM,
            stop_poll: Poll::STOP_CONFIRM,
        }
    }

    pub fn with_polls(mut self, start_poll: Poll, stop_poll: Poll) -> Self {
        self.start_poll = start_poll;
        self.stop_poll = stop_poll;
        self
    }

    /// Fresh (pid, port) pairs, optionally restricted to one port.
    pub fn discover(&self, port: Option<u16>) -> Vec<(u32, u16)> {
        scanner::filter_port(scanner::discover(&self.introspect, &self.program), port)
    }

    pub async fn start(&self, request: &Request) -> Result<StartOutcome, LifecycleError> {
        if !request.dir.is_dir() {
            return Err(LifecycleError::DirectoryNotFound(request.dir.clone()));
        }

        match paths::migrate_legacy_log(&request.legacy_log, &request.log_file) {
            Ok(true) => tracing::info!(
                from = %request.legacy_log.display(),
                to = %request.log_file.display(),
                "moved legacy log file"
            ),
            Ok(false) => {}
            Err(e) => tracing::debug!("legacy log migration skipped: {e}"),
        }

        let existing = self.discover(request.port);
        if let Some(&(pid, _)) = existing.first() {
            let ports = existing
                .iter()
                .filter(|&&(p, _)| p == pid)
                .map(|&(_, port)| port)
                .collect();
            return Ok(StartOutcome::AlreadyRunning { pid, ports });
        }

        let port = request.port.unwrap_or(DEFAULT_PORT);

        // Advisory only: another process can still take the port between
        // this check and the child's bind.
        if self
            .host
            .port_answers(&request.bind, port, PREFLIGHT_TIMEOUT)
            .await
        {
            return Err(LifecycleError::PortInUse {
                bind: request.bind.clone(),
                port,
            });
        }

        let spec = ServeSpec {
            bind: request.bind.clone(),
            port,
            dir: request.dir.clone(),
            log_file: request.log_file.clone(),
        };
        let exposed = health::is_wildcard(&request.bind);
        let child_pid = self.host.launch(&spec).map_err(LifecycleError::Launch)?;
        tracing::debug!(child_pid, port, "waiting for listener");

        let confirmed = self
            .start_poll
            .until(|| self.discover(Some(port)).first().map(|&(pid, _)| pid))
            .await;

        Ok(match confirmed {
            Some(pid) => StartOutcome::Started { pid, spec, exposed },
            None => StartOutcome::NotConfirmed {
                child_pid,
                spec,
                exposed,
            },
        })
    }

    pub async fn stop(&self, request: &Request) -> Result<StopOutcome, LifecycleError> {
        let pairs = self.discover(request.port);
        if pairs.is_empty() {
            return Ok(StopOutcome::NotRunning { port: request.port });
        }

        let mut instances = scanner::group_instances(&pairs);
        if instances.len() > 1 {
            return Ok(StopOutcome::Ambiguous {
                port: request.port,
                instances,
            });
        }
        let instance = instances.remove(0);
        let pid = instance.pid;

        self.signal(pid, Signal::SIGTERM)?;
        let gone = self
            .stop_poll
            .until(|| (!self.host.is_alive(pid)).then_some(()))
            .await
            .is_some();

        if !gone {
            tracing::debug!(pid, "still alive after SIGTERM, escalating");
            self.signal(pid, Signal::SIGKILL)?;
        }

        Ok(StopOutcome::Stopped {
            pid,
            ports: instance.ports,
            forced: !gone,
        })
    }

    /// Read-only. Process liveness and endpoint health are reported
    /// separately; a failed probe still reports `Running`.
    pub async fn status(&self, request: &Request) -> StatusReport {
        let pairs = self.discover(request.port);
        if pairs.is_empty() {
            return StatusReport::NotRunning { port: request.port };
        }

        let mut instances = scanner::group_instances(&pairs);
        if instances.len() > 1 {
            return StatusReport::Ambiguous {
                port: request.port,
                instances,
            };
        }
        let instance = instances.remove(0);

        let health = match instance.ports.as_slice() {
            [port] => {
                let url = health::probe_url(&request.bind, *port);
                Some(self.host.probe(&url, request.timeout).await)
            }
            _ => None,
        };

        StatusReport::Running { instance, health }
    }

    /// Not atomic: another instance may claim the port between the two
    /// halves. A stop that fails with an error skips the start.
    pub async fn restart(&self, request: &Request) -> Result<RestartOutcome, LifecycleError> {
        let stop = self.stop(request).await?;
        let start = self.start(request).await?;
        Ok(RestartOutcome { stop, start })
    }

    fn signal(&self, pid: u32, signal: Signal) -> Result<(), LifecycleError> {
        tracing::debug!(pid, %signal, "sending signal");
        self.host
            .send_signal(pid, signal)
            .map_err(|source| LifecycleError::Signal { pid, source })
    }
}
