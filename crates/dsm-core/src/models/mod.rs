pub mod config;
pub mod service;
pub mod status;

pub use config::{ManagerConfig, StateLayout};
pub use service::{derive_service_name, normalize_image_ref, normalize_label, ServiceRecord};
pub use status::{
    Drift, InstallOutcome, InternalPortSource, RemoveOutcome, RunOutcome, ServiceStatus,
    StartOutcome, StopOutcome, UnitStatus,
};
