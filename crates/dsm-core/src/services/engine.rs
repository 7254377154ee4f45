use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;

use crate::error::{ManagerError, Result};
use crate::models::{ManagerConfig, ServiceRecord};

static PORT_SPEC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,5})/(?:tcp|udp)\b").unwrap());

/// What `inspect` could learn about a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerInfo {
    /// Ports the image declares, ascending.
    pub exposed_ports: Vec<u16>,
}

/// The container runtime, consumed as an external program.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn pull(&self, image: &str) -> Result<()>;

    /// Create a container from `image` and return its engine handle.
    async fn create(&self, container_name: &str, image: &str) -> Result<String>;

    async fn setup(&self, container: &str, mode: &str) -> Result<()>;

    async fn remove(&self, container: &str) -> Result<()>;

    async fn remove_image(&self, image: &str) -> Result<()>;

    async fn inspect(&self, container: &str) -> Result<ContainerInfo>;

    /// The foreground command line that runs `record`'s container.
    fn run_command(&self, record: &ServiceRecord) -> String;
}

/// [`ContainerEngine`] backed by the `udocker` CLI.
#[derive(Debug, Clone)]
pub struct UdockerEngine {
    program: String,
    command_timeout: Duration,
    pull_timeout: Duration,
}

impl UdockerEngine {
    pub fn new(program: impl Into<String>, command_timeout: Duration, pull_timeout: Duration) -> Self {
        Self {
            program: program.into(),
            command_timeout,
            pull_timeout,
        }
    }

    pub fn from_config(config: &ManagerConfig) -> Self {
        Self::new(
            config.engine.clone(),
            config.command_timeout(),
            config.pull_timeout(),
        )
    }

    async fn run_engine(&self, args: &[&str], timeout: Duration) -> Result<String> {
        let command_line = format!("{} {}", self.program, args.join(" "));
        tracing::debug!(command = %command_line, "engine call");

        let result = tokio::time::timeout(
            timeout,
            Command::new(&self.program)
                .args(args)
                .kill_on_drop(true)
                .output(),
        )
        .await;

        let output = match result {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ManagerError::Engine(format!(
                    "failed to start {}: {e}",
                    self.program
                )))
            }
            Err(_) => {
                return Err(ManagerError::CollaboratorTimeout {
                    command: command_line,
                    timeout,
                })
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ManagerError::Engine(format!(
                "{command_line} failed (exit {}): {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl ContainerEngine for UdockerEngine {
    async fn pull(&self, image: &str) -> Result<()> {
        self.run_engine(&["pull", image], self.pull_timeout).await?;
        Ok(())
    }

    async fn create(&self, container_name: &str, image: &str) -> Result<String> {
        let name_arg = format!("--name={container_name}");
        let output = self
            .run_engine(&["create", &name_arg, image], self.command_timeout)
            .await?;
        // udocker prints the new container id as the last line
        let id = output
            .lines()
            .last()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.contains(' '))
            .unwrap_or(container_name);
        Ok(id.to_string())
    }

    async fn setup(&self, container: &str, mode: &str) -> Result<()> {
        let mode_arg = format!("--execmode={mode}");
        self.run_engine(&["setup", &mode_arg, container], self.command_timeout)
            .await?;
        Ok(())
    }

    async fn remove(&self, container: &str) -> Result<()> {
        self.run_engine(&["rm", container], self.command_timeout)
            .await?;
        Ok(())
    }

    async fn remove_image(&self, image: &str) -> Result<()> {
        self.run_engine(&["rmi", image], self.command_timeout).await?;
        Ok(())
    }

    async fn inspect(&self, container: &str) -> Result<ContainerInfo> {
        let output = self
            .run_engine(&["inspect", container], self.command_timeout)
            .await?;
        Ok(ContainerInfo {
            exposed_ports: parse_exposed_ports(&output),
        })
    }

    fn run_command(&self, record: &ServiceRecord) -> String {
        build_run_command(&self.program, record)
    }
}

/// `<program> run -p <ext>:<int> -v <data_dir>:<mount> <container>`.
pub fn build_run_command(program: &str, record: &ServiceRecord) -> String {
    [
        shell_quote(program),
        "run".to_string(),
        "-p".to_string(),
        record.port_mapping(),
        "-v".to_string(),
        shell_quote(&record.volume_mapping()),
        shell_quote(&record.container),
    ]
    .join(" ")
}

/// Declared ports from `inspect` output. Understands the JSON image config
/// (`ExposedPorts` under `config`/`Config`/`container_config`/`ContainerConfig`)
/// and falls back to scanning plain text for `NNNN/tcp`. Anything unparseable
/// yields an empty list.
pub fn parse_exposed_ports(output: &str) -> Vec<u16> {
    let mut ports = match serde_json::from_str::<serde_json::Value>(output) {
        Ok(json) => ports_from_json(&json),
        Err(_) => Vec::new(),
    };
    if ports.is_empty() {
        ports = PORT_SPEC_RE
            .captures_iter(output)
            .filter_map(|caps| caps[1].parse::<u16>().ok())
            .collect();
    }
    ports.retain(|&p| p != 0);
    ports.sort_unstable();
    ports.dedup();
    ports
}

fn ports_from_json(json: &serde_json::Value) -> Vec<u16> {
    // Some engines wrap the config in a one-element array.
    let root = match json {
        serde_json::Value::Array(items) => match items.first() {
            Some(first) => first,
            None => return Vec::new(),
        },
        other => other,
    };

    ["config", "Config", "container_config", "ContainerConfig"]
        .iter()
        .filter_map(|section| root.get(section)?.get("ExposedPorts")?.as_object())
        .flat_map(|exposed| exposed.keys())
        .filter_map(|spec| spec.split('/').next()?.parse::<u16>().ok())
        .collect()
}

fn shell_quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c));
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::path::PathBuf;

    fn record() -> ServiceRecord {
        ServiceRecord {
            name: "nginx".into(),
            image: "library/nginx:latest".into(),
            container: "nginx".into(),
            external_port: 3000,
            internal_port: 80,
            data_dir: PathBuf::from("/home/user/.dsm/data/nginx"),
            window_name: "nginx".into(),
            mount_path: "/data".into(),
            installed_at: Utc::now(),
        }
    }

    #[test]
    fn run_command_maps_port_and_volume() {
        assert_eq!(
            build_run_command("udocker", &record()),
            "udocker run -p 3000:80 -v /home/user/.dsm/data/nginx:/data nginx"
        );
    }

    #[test]
    fn run_command_is_reproducible() {
        let r = record();
        assert_eq!(
            build_run_command("udocker", &r),
            build_run_command("udocker", &r)
        );
    }

    #[test]
    fn run_command_quotes_paths_with_spaces() {
        let mut r = record();
        r.data_dir = PathBuf::from("/home/user/my data/nginx");
        assert_eq!(
            build_run_command("udocker", &r),
            "udocker run -p 3000:80 -v '/home/user/my data/nginx:/data' nginx"
        );
    }

    #[test]
    fn shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn exposed_ports_from_json_config() {
        let json = r#"{"config": {"ExposedPorts": {"80/tcp": {}, "443/tcp": {}}}}"#;
        assert_eq!(parse_exposed_ports(json), vec![80, 443]);
    }

    #[test]
    fn exposed_ports_from_docker_style_array() {
        let json = r#"[{"ContainerConfig": {"ExposedPorts": {"6379/tcp": {}}}}]"#;
        assert_eq!(parse_exposed_ports(json), vec![6379]);
    }

    #[test]
    fn exposed_ports_from_plain_text() {
        let text = "Container: abc\n ExposedPorts: 8080/tcp 53/udp\n";
        assert_eq!(parse_exposed_ports(text), vec![53, 8080]);
    }

    #[test]
    fn exposed_ports_missing_is_empty() {
        assert!(parse_exposed_ports(r#"{"config": {"Env": []}}"#).is_empty());
        assert!(parse_exposed_ports("").is_empty());
        assert!(parse_exposed_ports("[]").is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hung_engine_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let udocker = crate::testing::write_script(dir.path(), "udocker", "sleep 5");
        let engine = UdockerEngine::new(
            udocker.to_string_lossy(),
            Duration::from_millis(100),
            Duration::from_millis(100),
        );

        let started = std::time::Instant::now();
        let err = engine.pull("nginx:latest").await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(3));
        match err {
            ManagerError::CollaboratorTimeout { command, timeout } => {
                assert!(command.ends_with("pull nginx:latest"));
                assert_eq!(timeout, Duration::from_millis(100));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn engine_failure_carries_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let udocker = crate::testing::write_script(
            dir.path(),
            "udocker",
            "echo 'image not found' >&2; exit 3",
        );
        let engine = UdockerEngine::new(
            udocker.to_string_lossy(),
            Duration::from_secs(5),
            Duration::from_secs(5),
        );

        let err = engine.create("nginx", "nginx:latest").await.unwrap_err();
        assert!(matches!(err, ManagerError::Engine(_)));
        let message = err.to_string();
        assert!(message.contains("exit 3"));
        assert!(message.contains("image not found"));
    }
}
