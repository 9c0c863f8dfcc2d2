use crate::types::{Result, SubproxyError};
use std::path::Path;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{info, warn};

/// Owns the sing-box subprocess. At most one instance runs at a time.
///
/// sing-box has no reload API reachable from here, so a restart is always
/// stop-then-start. The child is never awaited.
#[derive(Debug, Default)]
pub struct ProcessSupervisor {
    child: Option<Child>,
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self { child: None }
    }

    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Stop the current instance, if any, then spawn `<bin> run -c <config_path>`
    /// with inherited stdio.
    pub fn start(&mut self, config_path: &Path, bin: &str) -> Result<()> {
        self.stop();

        let child = Command::new(bin)
            .arg("run")
            .arg("-c")
            .arg(config_path)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| SubproxyError::Process(format!("failed to spawn {}: {}", bin, e)))?;

        info!(
            "Started {} (pid {}) with {}",
            bin,
            child.id().map(|pid| pid.to_string()).unwrap_or_else(|| "?".to_string()),
            config_path.display()
        );
        self.child = Some(child);
        Ok(())
    }

    /// Ask the running instance to terminate and forget it. No-op when stopped.
    pub fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        match child.id() {
            Some(pid) => terminate(&mut child, pid),
            None => info!("Process already exited"),
        }
    }
}

#[cfg(unix)]
fn terminate(_child: &mut Child, pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) => info!("Sent SIGTERM to pid {}", pid),
        Err(nix::errno::Errno::ESRCH) => info!("Process {} already exited", pid),
        Err(e) => warn!("Failed to signal pid {}: {}", pid, e),
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child, pid: u32) {
    match child.start_kill() {
        Ok(()) => info!("Terminating pid {}", pid),
        Err(e) => warn!("Failed to terminate pid {}: {}", pid, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_when_stopped_is_noop() {
        let mut supervisor = ProcessSupervisor::new();
        supervisor.stop();
        assert!(!supervisor.is_running());
        assert_eq!(supervisor.pid(), None);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_process_error() {
        let mut supervisor = ProcessSupervisor::new();
        let err = supervisor
            .start(Path::new("/tmp/none.json"), "/nonexistent/subproxy-test-binary")
            .unwrap_err();
        assert!(matches!(err, SubproxyError::Process(_)));
        assert!(!supervisor.is_running());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_start_replaces_previous_instance() {
        let mut supervisor = ProcessSupervisor::new();

        // `sleep run -c <path>` exits on its own; only the handle bookkeeping matters here.
        supervisor.start(Path::new("/tmp/a.json"), "sleep").unwrap();
        assert!(supervisor.is_running());
        let first = supervisor.pid();
        assert!(first.is_some());

        supervisor.start(Path::new("/tmp/b.json"), "sleep").unwrap();
        assert!(supervisor.is_running());
        assert_ne!(supervisor.pid(), first);

        supervisor.stop();
        assert!(!supervisor.is_running());
    }
}
