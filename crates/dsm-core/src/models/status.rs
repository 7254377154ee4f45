use std::path::PathBuf;

use serde::Serialize;

use super::service::ServiceRecord;

/// Whether a supervised unit currently exists inside the session host.
///
/// Never persisted: every value is the answer to a live query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum UnitStatus {
    Running,
    Absent,
}

/// A registry record paired with the live status of its unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    #[serde(flatten)]
    pub record: ServiceRecord,
    pub status: UnitStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotRunning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The unit was created; `access` is where the service listens on this host.
    Started { access: String },
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotInstalled,
}

/// Where the internal port of a fresh install came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InternalPortSource {
    Explicit,
    Detected,
    /// Nothing was declared by the image; the configured default was used.
    Defaulted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    pub record: ServiceRecord,
    pub internal_port_source: InternalPortSource,
}

/// A divergence between the registry and its collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Drift {
    MissingDataDir { service: String, path: PathBuf },
    ContainerUnresolvable { service: String, reason: String },
    OrphanUnit { unit: String },
}

impl std::fmt::Display for Drift {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingDataDir { service, path } => {
                write!(f, "{service}: data directory {} is missing", path.display())
            }
            Self::ContainerUnresolvable { service, reason } => {
                write!(f, "{service}: container cannot be resolved ({reason})")
            }
            Self::OrphanUnit { unit } => {
                write!(f, "window '{unit}' is running without a registered service")
            }
        }
    }
}
