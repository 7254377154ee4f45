use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::supervisor::SessionHost;
use crate::error::{ManagerError, Result};

/// Stderr fragments that mean "nothing to act on" rather than failure.
const ABSENT_MARKERS: &[&str] = &[
    "no server running",
    "no sessions",
    "can't find session",
    "can't find window",
    "error connecting to",
];

/// A session host backed by a tmux server; units are tmux windows.
pub struct TmuxHost {
    program: String,
    timeout: Duration,
}

impl TmuxHost {
    pub fn new(timeout: Duration) -> Self {
        Self::with_program("tmux", timeout)
    }

    pub fn with_program(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    async fn run_tmux(&self, arguments: &[&str]) -> Result<String> {
        let output = self.output(arguments).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !is_absent(&stderr) {
                return Err(ManagerError::Tmux(format!(
                    "tmux {} failed (exit {}): {}",
                    arguments.first().copied().unwrap_or_default(),
                    output.status.code().unwrap_or(-1),
                    stderr.trim()
                )));
            }
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Like `run_tmux`, but a missing target is an error too.
    async fn run_tmux_strict(&self, arguments: &[&str]) -> Result<()> {
        let output = self.output(arguments).await?;
        if !output.status.success() {
            return Err(ManagerError::Tmux(format!(
                "tmux {} failed: {}",
                arguments.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn output(&self, arguments: &[&str]) -> Result<std::process::Output> {
        let mut command = Command::new(&self.program);
        command.args(arguments).stdin(Stdio::null()).kill_on_drop(true);
        match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(result) => result.map_err(|e| {
                ManagerError::Tmux(format!("failed to start {}: {e}", self.program))
            }),
            Err(_) => Err(ManagerError::CollaboratorTimeout {
                command: format!("{} {}", self.program, arguments.join(" ")),
                timeout: self.timeout,
            }),
        }
    }
}

#[async_trait]
impl SessionHost for TmuxHost {
    async fn session_exists(&self, host: &str) -> Result<bool> {
        let target = session_target(host);
        let output = self.output(&["has-session", "-t", &target]).await?;
        Ok(output.status.success())
    }

    async fn create_session(&self, host: &str) -> Result<()> {
        self.run_tmux_strict(&["new-session", "-d", "-s", host]).await
    }

    async fn list_units(&self, host: &str) -> Result<Vec<String>> {
        let target = session_target(host);
        let output = self
            .run_tmux(&["list-windows", "-t", &target, "-F", "#{window_name}"])
            .await?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn create_unit(&self, host: &str, name: &str) -> Result<()> {
        let target = format!("{}:", session_target(host));
        self.run_tmux_strict(&["new-window", "-d", "-t", &target, "-n", name])
            .await
    }

    async fn rename_unit(&self, host: &str, old_name: &str, new_name: &str) -> Result<()> {
        let target = window_target(host, old_name);
        self.run_tmux_strict(&["rename-window", "-t", &target, new_name])
            .await
    }

    async fn kill_unit(&self, host: &str, name: &str) -> Result<()> {
        let target = window_target(host, name);
        self.run_tmux(&["kill-window", "-t", &target]).await?;
        Ok(())
    }

    async fn send_command(&self, host: &str, unit: &str, command: &str) -> Result<()> {
        let target = window_target(host, unit);
        self.run_tmux_strict(&["send-keys", "-t", &target, command, "Enter"])
            .await
    }

    async fn attach(&self, host: &str, unit: &str) -> Result<()> {
        let target = window_target(host, unit);
        self.run_tmux_strict(&["select-window", "-t", &target]).await?;

        // Inside tmux already: move this client instead of nesting.
        let subcommand = if std::env::var_os("TMUX").is_some() {
            "switch-client"
        } else {
            "attach-session"
        };
        let status = Command::new(&self.program)
            .args([subcommand, "-t", &session_target(host)])
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| ManagerError::Tmux(format!("failed to attach: {e}")))?;
        if !status.success() {
            return Err(ManagerError::Tmux(format!(
                "tmux {subcommand} exited with {}",
                status.code().unwrap_or(-1)
            )));
        }
        Ok(())
    }
}

fn is_absent(stderr: &str) -> bool {
    ABSENT_MARKERS.iter().any(|marker| stderr.contains(marker))
}

/// Exact-match session target, so "dsm" never resolves to "dsm-old".
fn session_target(host: &str) -> String {
    format!("={host}")
}

fn window_target(host: &str, window: &str) -> String {
    format!("={host}:={window}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_use_exact_matching() {
        assert_eq!(session_target("dsm"), "=dsm");
        assert_eq!(window_target("dsm", "nginx"), "=dsm:=nginx");
    }

    #[test]
    fn missing_server_is_not_a_failure() {
        assert!(is_absent("no server running on /tmp/tmux-0/default\n"));
        assert!(is_absent("can't find window: =nginx"));
        assert!(!is_absent("unknown option -- z"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hung_tmux_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let tmux = crate::testing::write_script(dir.path(), "tmux", "sleep 5");
        let host = TmuxHost::with_program(tmux.to_string_lossy(), Duration::from_millis(100));

        let err = host.session_exists("dsm").await.unwrap_err();
        assert!(matches!(err, ManagerError::CollaboratorTimeout { .. }));
        assert_eq!(err.kind(), crate::ErrorKind::CollaboratorFailure);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_session_reads_as_no_units() {
        let dir = tempfile::tempdir().unwrap();
        let tmux = crate::testing::write_script(
            dir.path(),
            "tmux",
            "echo 'no server running on /tmp/tmux-0/default' >&2; exit 1",
        );
        let host = TmuxHost::with_program(tmux.to_string_lossy(), Duration::from_secs(5));

        assert!(!host.session_exists("dsm").await.unwrap());
        assert!(host.list_units("dsm").await.unwrap().is_empty());
        host.kill_unit("dsm", "nginx").await.unwrap();
    }
}
