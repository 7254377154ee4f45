use std::path::PathBuf;
use std::time::Duration;

/// Coarse classification of every [`ManagerError`], used by callers to decide
/// whether to re-prompt, retry with another port, or give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Conflict,
    NotFound,
    CollaboratorFailure,
    InvalidInput,
    PartialTeardown,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("service '{0}' already exists")]
    ServiceAlreadyExists(String),

    #[error("window '{window}' is already used by service '{owner}'")]
    WindowAlreadyUsed { window: String, owner: String },

    #[error("port {port} is already assigned to service '{owner}'")]
    PortInUse { port: u16, owner: String },

    #[error("port {port} is not available (try {suggestion})")]
    PortUnavailable { port: u16, suggestion: u16 },

    #[error("service '{0}' not found")]
    ServiceNotFound(String),

    #[error("container engine operation failed: {0}")]
    Engine(String),

    #[error("tmux operation failed: {0}")]
    Tmux(String),

    #[error("'{command}' did not finish within {}s", timeout.as_secs())]
    CollaboratorTimeout { command: String, timeout: Duration },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("service '{name}' removed, but teardown was incomplete: {}", failures.join("; "))]
    PartialTeardown { name: String, failures: Vec<String> },

    #[error("registry operation failed: {0}")]
    Registry(String),

    #[error("config file not found at {0}")]
    ConfigNotFound(PathBuf),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ManagerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ServiceAlreadyExists(_)
            | Self::WindowAlreadyUsed { .. }
            | Self::PortInUse { .. }
            | Self::PortUnavailable { .. } => ErrorKind::Conflict,
            Self::ServiceNotFound(_) => ErrorKind::NotFound,
            Self::Engine(_) | Self::Tmux(_) | Self::CollaboratorTimeout { .. } => {
                ErrorKind::CollaboratorFailure
            }
            Self::InvalidInput(_) | Self::InvalidConfig(_) => ErrorKind::InvalidInput,
            Self::PartialTeardown { .. } => ErrorKind::PartialTeardown,
            Self::Registry(_)
            | Self::ConfigNotFound(_)
            | Self::Io(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, ManagerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_conflict_is_a_conflict() {
        let err = ManagerError::PortUnavailable {
            port: 3000,
            suggestion: 3001,
        };
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.to_string().contains("try 3001"));
    }

    #[test]
    fn timeout_is_a_collaborator_failure() {
        let err = ManagerError::CollaboratorTimeout {
            command: "udocker pull nginx".into(),
            timeout: Duration::from_secs(30),
        };
        assert_eq!(err.kind(), ErrorKind::CollaboratorFailure);
        assert_eq!(
            err.to_string(),
            "'udocker pull nginx' did not finish within 30s"
        );
    }

    #[test]
    fn partial_teardown_lists_failures() {
        let err = ManagerError::PartialTeardown {
            name: "nginx".into(),
            failures: vec!["rm failed".into(), "rmi failed".into()],
        };
        assert_eq!(err.kind(), ErrorKind::PartialTeardown);
        assert!(err.to_string().ends_with("rm failed; rmi failed"));
    }
}
