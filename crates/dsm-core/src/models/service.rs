use std::path::PathBuf;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ManagerError, Result};

/// `[registry[:port]/]path[/path...][:tag][@digest]`
static IMAGE_REF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:[a-zA-Z0-9][a-zA-Z0-9.-]*(?::[0-9]+)?/)?[a-z0-9]+(?:[._-][a-z0-9]+)*(?:/[a-z0-9]+(?:[._-][a-z0-9]+)*)*(?::[A-Za-z0-9_][A-Za-z0-9_.-]{0,127})?(?:@[A-Za-z0-9]+:[0-9a-fA-F]{32,})?$",
    )
    .unwrap()
});

static SEPARATOR_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// One installed service, as persisted in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRecord {
    pub name: String,
    pub image: String,
    pub container: String,
    pub external_port: u16,
    pub internal_port: u16,
    pub data_dir: PathBuf,
    pub window_name: String,
    /// Path inside the container where `data_dir` is bound.
    pub mount_path: String,
    pub installed_at: DateTime<Utc>,
}

impl ServiceRecord {
    /// `host:container` port mapping handed to the engine.
    pub fn port_mapping(&self) -> String {
        format!("{}:{}", self.external_port, self.internal_port)
    }

    /// `host:container` volume mapping handed to the engine.
    pub fn volume_mapping(&self) -> String {
        format!("{}:{}", self.data_dir.to_string_lossy(), self.mount_path)
    }

    pub fn access_address(&self) -> String {
        format!("localhost:{}", self.external_port)
    }
}

/// Validate an image reference and pin it to `:latest` when no tag or digest is given.
pub fn normalize_image_ref(input: &str) -> Result<String> {
    let image = input.trim();
    if image.is_empty() {
        return Err(ManagerError::InvalidInput("image reference is empty".into()));
    }
    if !IMAGE_REF_RE.is_match(image) {
        return Err(ManagerError::InvalidInput(format!(
            "'{image}' is not a valid image reference"
        )));
    }

    let last_segment = image.rsplit('/').next().unwrap_or(image);
    if image.contains('@') || last_segment.contains(':') {
        Ok(image.to_string())
    } else {
        Ok(format!("{image}:latest"))
    }
}

/// Derive the registry key for an image: the last repository path component
/// with tag and digest removed, separators collapsed to `-`.
///
/// `library/nginx:latest` becomes `nginx`.
pub fn derive_service_name(image: &str) -> Result<String> {
    let without_digest = image.trim().split('@').next().unwrap_or_default();
    let last_segment = without_digest.rsplit('/').next().unwrap_or_default();
    let repository = last_segment.split(':').next().unwrap_or_default();
    normalize_label(repository)
}

/// Lowercase `input` and collapse every run of non-alphanumeric characters to `-`.
///
/// The result is safe to use as a file stem and as a tmux window target.
pub fn normalize_label(input: &str) -> Result<String> {
    let lowered = input.trim().to_lowercase();
    let collapsed = SEPARATOR_RUN_RE.replace_all(&lowered, "-");
    let label = collapsed.trim_matches('-').to_string();
    if label.is_empty() {
        return Err(ManagerError::InvalidInput(format!(
            "'{input}' does not contain any usable characters"
        )));
    }
    Ok(label)
}
