//! Known-endpoint snapshot
//!
//! The snapshot is written once by the configurator and only read here. Each
//! endpoint is keyed by its USB bus/port address when one is known, else by
//! its device path, and carries the FRU table bytes captured at that time.

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// One endpoint recorded by the configurator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KnownEndpoint {
    /// Bus/port address or device path this entry is keyed by
    pub key: String,
    /// Device path at capture time
    pub device: Option<String>,
    /// `Id` of the resource this endpoint backs
    pub resource_id: String,
    pub resource_path: String,
    /// Trimmed FRU record table captured at configuration time
    #[serde(skip)]
    pub inventory: Option<Vec<u8>>,
}

impl KnownEndpoint {
    pub fn has_inventory(&self) -> bool {
        self.inventory.as_ref().is_some_and(|b| !b.is_empty())
    }
}

#[derive(Deserialize)]
struct RawSnapshot {
    #[serde(default)]
    endpoints: Vec<serde_json::Value>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawEndpoint {
    bus_port: Option<String>,
    #[serde(rename = "USBAddress")]
    usb_address: Option<String>,
    usb_addr: Option<RawUsbAddr>,
    dev: Option<String>,
    device: Option<String>,
    resource_id: Option<String>,
    resource_path: Option<String>,
    raw_fru_data: Option<String>,
    fru_records: Vec<RawFruRecord>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawUsbAddr {
    sysfs_path: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawFruRecord {
    raw_fru_data: Option<String>,
}

fn non_empty(s: &Option<String>) -> Option<&str> {
    s.as_deref().filter(|s| !s.is_empty())
}

impl RawEndpoint {
    fn key(&self) -> Option<String> {
        non_empty(&self.bus_port)
            .or(non_empty(&self.usb_address))
            .map(str::to_string)
            .or_else(|| {
                self.usb_addr
                    .as_ref()
                    .and_then(|a| a.sysfs_path.as_deref())
                    .and_then(bus_port_from_sysfs)
            })
            .or_else(|| non_empty(&self.dev).or(non_empty(&self.device)).map(str::to_string))
    }

    fn inventory(&self, key: &str) -> Option<Vec<u8>> {
        let encoded = non_empty(&self.raw_fru_data)
            .or_else(|| self.fru_records.first().and_then(|r| non_empty(&r.raw_fru_data)))?;

        match BASE64_STANDARD.decode(encoded.trim()) {
            Ok(bytes) => {
                debug!(key, len = bytes.len(), "Loaded endpoint FRU data");
                Some(bytes)
            }
            Err(e) => {
                debug!(key, error = %e, "Failed to decode endpoint FRU data");
                None
            }
        }
    }

    fn into_endpoint(self) -> Option<KnownEndpoint> {
        let key = self.key()?;
        let inventory = self.inventory(&key);

        let resource_path = self.resource_path.clone().unwrap_or_else(|| {
            format!(
                "/redfish/v1/AutomationNodes/{}",
                self.resource_id.as_deref().unwrap_or("unknown")
            )
        });

        Some(KnownEndpoint {
            resource_id: self.resource_id.unwrap_or_else(|| format!("unknown_{key}")),
            resource_path,
            device: self.device,
            inventory,
            key,
        })
    }
}

/// USB bus/port key (e.g. `3-5.4`) from a sysfs path: the leaf-most
/// component starting with a digit and containing `-`, minus any
/// `:config.interface` suffix.
pub fn bus_port_from_sysfs(path: &str) -> Option<String> {
    path.trim()
        .split('/')
        .rev()
        .find(|part| part.starts_with(|c: char| c.is_ascii_digit()) && part.contains('-'))
        .map(|part| part.split(':').next().unwrap_or(part).to_string())
}

/// Loaded snapshot, keyed by endpoint key
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    endpoints: BTreeMap<String, KnownEndpoint>,
}

impl Snapshot {
    /// Load from disk. A missing file is an empty snapshot.
    pub fn load(path: &Path) -> Result<Self, SnapshotError> {
        if !path.exists() {
            warn!(path = %path.display(), "Snapshot file not found, no known endpoints");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let snapshot = Self::from_json(&content)?;
        info!(
            path = %path.display(),
            endpoints = snapshot.len(),
            with_fru = snapshot.iter().filter(|e| e.has_inventory()).count(),
            "Loaded snapshot"
        );
        Ok(snapshot)
    }

    /// Parse snapshot JSON. Entries that are malformed or have no key are skipped.
    pub fn from_json(content: &str) -> Result<Self, SnapshotError> {
        let raw: RawSnapshot = serde_json::from_str(content)?;
        let mut endpoints = BTreeMap::new();

        for value in raw.endpoints {
            let entry = match serde_json::from_value::<RawEndpoint>(value) {
                Ok(e) => e,
                Err(e) => {
                    debug!(error = %e, "Skipping malformed endpoint entry");
                    continue;
                }
            };
            match entry.into_endpoint() {
                Some(ep) => {
                    endpoints.insert(ep.key.clone(), ep);
                }
                None => debug!("Skipping endpoint without bus port or device"),
            }
        }

        Ok(Self { endpoints })
    }

    pub fn from_endpoints(endpoints: impl IntoIterator<Item = KnownEndpoint>) -> Self {
        Self {
            endpoints: endpoints.into_iter().map(|e| (e.key.clone(), e)).collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&KnownEndpoint> {
        self.endpoints.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &KnownEndpoint> {
        self.endpoints.values()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_bus_port_from_sysfs() {
        assert_eq!(
            bus_port_from_sysfs("/sys/devices/pci0000:00/0000:00:14.0/usb3/3-5/3-5.4/3-5.4:1.0/ttyUSB0"),
            Some("3-5.4".to_string())
        );
        assert_eq!(bus_port_from_sysfs("/sys/devices/platform/serial8250/tty/ttyS0"), None);
        assert_eq!(bus_port_from_sysfs(""), None);
    }

    #[test]
    fn test_key_precedence_and_defaults() {
        let json = r#"{
            "endpoints": [
                {"bus_port": "1-1", "USBAddress": "9-9", "resource_id": "Node1", "raw_fru_data": "AQID"},
                {"usb_addr": {"sysfs_path": "/sys/devices/usb1/1-2/1-2:1.0/ttyUSB1"}},
                {"dev": "/dev/pts/8", "fru_records": [{"raw_fru_data": "BAU="}]},
                {"resource_id": "orphan"},
                {"bus_port": "2-1", "raw_fru_data": "not base64!"},
                "garbage"
            ]
        }"#;
        let snap = Snapshot::from_json(json).unwrap();
        assert_eq!(snap.len(), 4);

        let a = snap.get("1-1").unwrap();
        assert_eq!(a.resource_id, "Node1");
        assert_eq!(a.resource_path, "/redfish/v1/AutomationNodes/Node1");
        assert_eq!(a.inventory.as_deref(), Some(&[1u8, 2, 3][..]));

        let b = snap.get("1-2").unwrap();
        assert_eq!(b.resource_id, "unknown_1-2");
        assert_eq!(b.resource_path, "/redfish/v1/AutomationNodes/unknown");
        assert!(!b.has_inventory());

        let c = snap.get("/dev/pts/8").unwrap();
        assert_eq!(c.inventory.as_deref(), Some(&[4u8, 5][..]));

        assert!(!snap.get("2-1").unwrap().has_inventory());
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let snap = Snapshot::load(&temp_dir.path().join("absent.json")).unwrap();
        assert!(snap.is_empty());
    }

    #[test]
    fn test_load_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("snapshot.json");
        std::fs::write(&path, r#"{"endpoints": [{"bus_port": "1-4", "resource_path": "/redfish/v1/Chassis/X"}]}"#).unwrap();

        let snap = Snapshot::load(&path).unwrap();
        assert_eq!(snap.get("1-4").unwrap().resource_path, "/redfish/v1/Chassis/X");
    }

    #[test]
    fn test_load_malformed_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("snapshot.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Snapshot::load(&path), Err(SnapshotError::JsonError(_))));
    }
}
