//! Serial port topology scanning
//!
//! A scan maps a stable identifier per visible USB serial device to its
//! device node. The identifier is the USB bus/port address from the device's
//! sysfs ancestry (e.g. `3-5.4`), so a device unplugged and replugged into
//! the same socket keeps its identifier even if its tty number changes.

use pldm_core::snapshot::bus_port_from_sysfs;
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Identifier to device path, as seen by one scan
pub type ScanResult = BTreeMap<String, String>;

/// Source of the current serial topology
pub trait PortScanner: Send + Sync {
    fn scan(&self) -> io::Result<ScanResult>;
}

/// Device nodes that have no hardware address (pseudo-terminals used by
/// simulators). These may match any snapshot entry.
pub fn is_addressless(device: &str) -> bool {
    device.starts_with("/dev/pts")
}

/// Set difference between two scans: `(added, removed)`.
pub fn diff(previous: &BTreeSet<String>, current: &BTreeSet<String>) -> (Vec<String>, Vec<String>) {
    let added = current.difference(previous).cloned().collect();
    let removed = previous.difference(current).cloned().collect();
    (added, removed)
}

/// Scanner walking the sysfs device tree for `ttyUSB*` entries
#[derive(Debug, Clone)]
pub struct SysfsScanner {
    root: PathBuf,
    prefix: String,
}

impl Default for SysfsScanner {
    fn default() -> Self {
        Self::new("/sys/devices")
    }
}

impl SysfsScanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            prefix: "ttyUSB".to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn walk(&self, dir: &Path, found: &mut ScanResult) -> io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            // Symlinks in sysfs point back up the tree
            let file_type = entry.file_type()?;
            if file_type.is_symlink() {
                continue;
            }

            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();

            if name.starts_with(&self.prefix) {
                let device = format!("/dev/{name}");
                let sysfs = path.to_string_lossy();
                let id = bus_port_from_sysfs(&sysfs).unwrap_or_else(|| device.clone());
                trace!(id = %id, device = %device, sysfs = %sysfs, "Found serial device");
                found.insert(id, device);
                continue;
            }

            if file_type.is_dir() {
                // Unreadable subtrees are common in sysfs and not fatal
                if let Err(e) = self.walk(&path, found) {
                    trace!(path = %path.display(), error = %e, "Skipping sysfs subtree");
                }
            }
        }
        Ok(())
    }
}

impl PortScanner for SysfsScanner {
    fn scan(&self) -> io::Result<ScanResult> {
        let mut found = ScanResult::new();
        self.walk(&self.root, &mut found)?;
        debug!(root = %self.root.display(), ports = found.len(), "Sysfs scan complete");
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_diff() {
        let (added, removed) = diff(&set(&["1-1", "1-2"]), &set(&["1-2", "1-3"]));
        assert_eq!(added, vec!["1-3".to_string()]);
        assert_eq!(removed, vec!["1-1".to_string()]);

        let (added, removed) = diff(&set(&["1-1"]), &set(&["1-1"]));
        assert!(added.is_empty() && removed.is_empty());
    }

    #[test]
    fn test_is_addressless() {
        assert!(is_addressless("/dev/pts/4"));
        assert!(!is_addressless("/dev/ttyUSB0"));
        assert!(!is_addressless("1-1"));
    }

    #[test]
    fn test_sysfs_scan() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        let usb0 = root.join("pci0000:00/usb3/3-5/3-5.4/3-5.4:1.0/ttyUSB0/tty/ttyUSB0");
        let usb1 = root.join("pci0000:00/usb1/1-2/1-2:1.0/ttyUSB1");
        let other = root.join("platform/serial8250/tty/ttyS0");
        std::fs::create_dir_all(&usb0).unwrap();
        std::fs::create_dir_all(&usb1).unwrap();
        std::fs::create_dir_all(&other).unwrap();

        let ports = SysfsScanner::new(root).scan().unwrap();
        assert_eq!(ports.len(), 2);
        assert_eq!(ports.get("3-5.4").map(String::as_str), Some("/dev/ttyUSB0"));
        assert_eq!(ports.get("1-2").map(String::as_str), Some("/dev/ttyUSB1"));
    }

    #[test]
    fn test_sysfs_scan_without_address_uses_device_path() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("virtual/ttyUSB7")).unwrap();

        let ports = SysfsScanner::new(temp_dir.path()).scan().unwrap();
        assert_eq!(ports.get("/dev/ttyUSB7").map(String::as_str), Some("/dev/ttyUSB7"));
    }

    #[test]
    fn test_sysfs_scan_missing_root() {
        let temp_dir = TempDir::new().unwrap();
        assert!(SysfsScanner::new(temp_dir.path().join("absent")).scan().is_err());
    }
}
