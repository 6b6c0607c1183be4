use crate::health::{self, Health};
use crate::serve::ServeSpec;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::io;
use std::process::{Command, Stdio};
use std::time::Duration;
use tokio::net::TcpStream;

/// Operating system actions the lifecycle controller depends on.
pub trait Host {
    /// Deliver `signal` to `pid`. A process that is already gone is not an
    /// error.
    fn send_signal(&self, pid: u32, signal: Signal) -> io::Result<()>;

    fn is_alive(&self, pid: u32) -> bool;

    /// Whether anything accepts a TCP connection on `bind:port` within
    /// `timeout`.
    fn port_answers(
        &self,
        bind: &str,
        port: u16,
        timeout: Duration,
    ) -> impl Future<Output = bool>;

    /// Start a detached instance and return its pid.
    fn launch(&self, spec: &ServeSpec) -> io::Result<u32>;

    fn probe(&self, url: &str, timeout: Duration) -> impl Future<Output = Health>;
}

// ---------------------------------------------------------------------------
// SystemHost
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct SystemHost;

impl SystemHost {
    pub fn new() -> Self {
        Self
    }
}

impl Host for SystemHost {
    fn send_signal(&self, pid: u32, signal: Signal) -> io::Result<()> {
        match signal::kill(Pid::from_raw(pid as i32), signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(io::Error::from(e)),
        }
    }

    fn is_alive(&self, pid: u32) -> bool {
        match signal::kill(Pid::from_raw(pid as i32), None) {
            Ok(()) => true,
            Err(Errno::ESRCH) => false,
            // Exists, but belongs to someone else
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    async fn port_answers(&self, bind: &str, port: u16, timeout: Duration) -> bool {
        let host = if bind.is_empty() { "0.0.0.0" } else { bind };
        tokio::time::timeout(timeout, TcpStream::connect((host, port)))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }

    fn launch(&self, spec: &ServeSpec) -> io::Result<u32> {
        let exe = std::env::current_exe()?;
        tracing::debug!(exe = %exe.display(), ?spec, "launching detached instance");

        // The child redirects its own stdio to the log once detached.
        let child = Command::new(exe)
            .args(spec.to_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        Ok(child.id())
    }

    async fn probe(&self, url: &str, timeout: Duration) -> Health {
        health::check_http(url, timeout).await
    }
}

/// Resolves on SIGTERM or SIGINT.
pub async fn signal_shutdown() {
    use tokio::signal::unix::{SignalKind, signal};

    let (Ok(mut sigterm), Ok(mut sigint)) = (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) else {
        tracing::warn!("could not install signal handlers; falling back to ctrl-c");
        let _ = tokio::signal::ctrl_c().await;
        return;
    };

    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_is_alive() {
        assert!(SystemHost.is_alive(std::process::id()));
    }

    #[test]
    fn test_missing_pid_is_not_alive() {
        // Above the kernel's pid_max
        assert!(!SystemHost.is_alive(4_194_305));
    }

    #[test]
    fn test_signal_to_missing_pid_is_ok() {
        assert!(SystemHost.send_signal(4_194_305, Signal::SIGTERM).is_ok());
    }

    #[test]
    fn test_terminate_child_process() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();
        assert!(SystemHost.is_alive(pid));

        SystemHost.send_signal(pid, Signal::SIGTERM).unwrap();
        let status = child.wait().unwrap();
        assert!(!status.success());
        assert!(!SystemHost.is_alive(pid));
    }

    #[tokio::test]
    async fn test_port_answers() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(
            SystemHost
                .port_answers("127.0.0.1", port, Duration::from_millis(500))
                .await
        );

        drop(listener);
        assert!(
            !SystemHost
                .port_answers("127.0.0.1", port, Duration::from_millis(500))
                .await
        );
    }
}
