use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::io::AsyncWriteExt;

use crate::error::{ManagerError, Result};
use crate::models::{normalize_label, ServiceRecord};

pub const RECORD_FORMAT_VERSION: u32 = 1;
const RECORD_EXTENSION: &str = "conf";
const TEMP_EXTENSION: &str = "tmp";

/// Catalogue of installed services, one `<name>.conf` file per record.
///
/// Records are read once at [`open`](Self::open) and kept in memory in
/// lexical name order; every mutation is written through to disk before the
/// in-memory view changes.
pub struct ServiceRegistry {
    services_dir: PathBuf,
    records: BTreeMap<String, ServiceRecord>,
}

impl ServiceRegistry {
    pub async fn open(services_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(services_dir).await.map_err(|e| {
            ManagerError::Registry(format!(
                "failed to create {}: {e}",
                services_dir.display()
            ))
        })?;

        let mut loaded = Vec::new();
        let mut entries = tokio::fs::read_dir(services_dir)
            .await
            .map_err(|e| ManagerError::Registry(format!("reading services dir: {e}")))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ManagerError::Registry(format!("reading services entry: {e}")))?
        {
            let path = entry.path();
            match path.extension().and_then(|e| e.to_str()) {
                Some(TEMP_EXTENSION) => {
                    tracing::warn!(path = %path.display(), "removing interrupted registry write");
                    tokio::fs::remove_file(&path).await.ok();
                }
                Some(RECORD_EXTENSION) => {
                    if let Some(record) = load_record_file(&path).await {
                        loaded.push(record);
                    }
                }
                _ => {}
            }
        }

        let records = admit_unique(loaded);
        tracing::debug!(count = records.len(), dir = %services_dir.display(), "registry loaded");
        Ok(Self {
            services_dir: services_dir.to_path_buf(),
            records,
        })
    }

    pub fn get(&self, name: &str) -> Result<&ServiceRecord> {
        self.records
            .get(name)
            .ok_or_else(|| ManagerError::ServiceNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    /// All records, ordered by name.
    pub fn list(&self) -> Vec<ServiceRecord> {
        self.records.values().cloned().collect()
    }

    pub fn external_ports(&self) -> HashSet<u16> {
        self.records.values().map(|r| r.external_port).collect()
    }

    pub fn record_path(&self, name: &str) -> PathBuf {
        self.services_dir.join(format!("{name}.{RECORD_EXTENSION}"))
    }

    /// Persist a new record. With `overwrite`, an existing record of the same
    /// name is replaced wholesale.
    pub async fn create(&mut self, record: ServiceRecord, overwrite: bool) -> Result<()> {
        if normalize_label(&record.name)? != record.name {
            return Err(ManagerError::InvalidInput(format!(
                "'{}' is not a normalised service name",
                record.name
            )));
        }
        if self.contains(&record.name) && !overwrite {
            return Err(ManagerError::ServiceAlreadyExists(record.name));
        }
        if let Some(other) = self
            .records
            .values()
            .find(|r| r.name != record.name && r.external_port == record.external_port)
        {
            return Err(ManagerError::PortInUse {
                port: record.external_port,
                owner: other.name.clone(),
            });
        }
        if let Some(other) = self
            .records
            .values()
            .find(|r| r.name != record.name && r.window_name == record.window_name)
        {
            return Err(ManagerError::WindowAlreadyUsed {
                window: record.window_name,
                owner: other.name.clone(),
            });
        }

        let path = self.record_path(&record.name);
        atomic_write(&path, &encode_record(&record)).await?;
        tracing::info!(service = %record.name, port = record.external_port, "registry record written");
        self.records.insert(record.name.clone(), record);
        Ok(())
    }

    /// Remove a record. Returns whether anything was removed; a missing record
    /// is not an error.
    pub async fn delete(&mut self, name: &str) -> Result<bool> {
        let path = self.record_path(name);
        let removed_file = match tokio::fs::remove_file(&path).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                return Err(ManagerError::Registry(format!(
                    "failed to delete {}: {e}",
                    path.display()
                )))
            }
        };
        let removed_entry = self.records.remove(name).is_some();
        Ok(removed_file || removed_entry)
    }
}

/// Keep records in name order, skipping any that reuse a port or window of
/// an earlier one.
fn admit_unique(mut loaded: Vec<ServiceRecord>) -> BTreeMap<String, ServiceRecord> {
    loaded.sort_by(|a, b| a.name.cmp(&b.name));
    let mut records: BTreeMap<String, ServiceRecord> = BTreeMap::new();
    for record in loaded {
        if let Some(owner) = records
            .values()
            .find(|r| r.external_port == record.external_port)
        {
            tracing::warn!(
                service = %record.name,
                port = record.external_port,
                owner = %owner.name,
                "skipping record with duplicate external port"
            );
            continue;
        }
        if let Some(owner) = records
            .values()
            .find(|r| r.window_name == record.window_name)
        {
            tracing::warn!(
                service = %record.name,
                window = %record.window_name,
                owner = %owner.name,
                "skipping record with duplicate window"
            );
            continue;
        }
        records.insert(record.name.clone(), record);
    }
    records
}

async fn load_record_file(path: &Path) -> Option<ServiceRecord> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "skipping unreadable record");
            return None;
        }
    };
    let record = match decode_record(&contents) {
        Ok(record) => record,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "skipping malformed record");
            return None;
        }
    };
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    if stem != record.name {
        tracing::warn!(path = %path.display(), name = %record.name, "record name does not match file name");
        return None;
    }
    Some(record)
}

/// Write to a sibling temp file, fsync, then rename over `path`.
async fn atomic_write(path: &Path, contents: &str) -> Result<()> {
    let temp_path = path.with_extension(format!("{RECORD_EXTENSION}.{TEMP_EXTENSION}"));
    let result = async {
        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(contents.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&temp_path, path).await
    }
    .await;

    if let Err(e) = result {
        tokio::fs::remove_file(&temp_path).await.ok();
        return Err(ManagerError::Registry(format!(
            "failed to write {}: {e}",
            path.display()
        )));
    }
    Ok(())
}

/// Serialise a record as `key=value` lines.
pub fn encode_record(record: &ServiceRecord) -> String {
    let mut out = String::new();
    out.push_str(&format!("version={RECORD_FORMAT_VERSION}\n"));
    out.push_str(&format!("name={}\n", record.name));
    out.push_str(&format!("image={}\n", record.image));
    out.push_str(&format!("container={}\n", record.container));
    out.push_str(&format!("external_port={}\n", record.external_port));
    out.push_str(&format!("internal_port={}\n", record.internal_port));
    out.push_str(&format!("data_dir={}\n", record.data_dir.to_string_lossy()));
    out.push_str(&format!("window_name={}\n", record.window_name));
    out.push_str(&format!("mount_path={}\n", record.mount_path));
    out.push_str(&format!(
        "installed_at={}\n",
        record
            .installed_at
            .to_rfc3339_opts(SecondsFormat::AutoSi, true)
    ));
    out
}

/// Parse a record file. Unknown keys and `#` comments are ignored.
pub fn decode_record(contents: &str) -> std::result::Result<ServiceRecord, String> {
    let mut fields: BTreeMap<&str, &str> = BTreeMap::new();
    for (index, raw) in contents.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| format!("line {}: expected key=value", index + 1))?;
        fields.insert(key.trim(), value.trim());
    }

    let field = |key: &str| -> std::result::Result<&str, String> {
        fields
            .get(key)
            .copied()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| format!("missing field '{key}'"))
    };
    let port = |key: &str| -> std::result::Result<u16, String> {
        field(key)?
            .parse::<u16>()
            .ok()
            .filter(|&p| p != 0)
            .ok_or_else(|| format!("field '{key}' is not a port number"))
    };

    let version: u32 = field("version")?
        .parse()
        .map_err(|_| "field 'version' is not a number".to_string())?;
    if version != RECORD_FORMAT_VERSION {
        return Err(format!("unsupported record version {version}"));
    }

    let installed_at = DateTime::parse_from_rfc3339(field("installed_at")?)
        .map_err(|e| format!("field 'installed_at': {e}"))?
        .with_timezone(&Utc);

    Ok(ServiceRecord {
        name: field("name")?.to_string(),
        image: field("image")?.to_string(),
        container: field("container")?.to_string(),
        external_port: port("external_port")?,
        internal_port: port("internal_port")?,
        data_dir: PathBuf::from(field("data_dir")?),
        window_name: field("window_name")?.to_string(),
        mount_path: field("mount_path")?.to_string(),
        installed_at,
    })
}
