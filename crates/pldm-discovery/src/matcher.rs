//! Inventory-based endpoint re-identification
//!
//! A newly seen port is identified by reading its FRU record table and
//! comparing it byte for byte with the tables captured in the snapshot.
//! Ports with a hardware address only ever match the snapshot entry recorded
//! under that address; address-less ports may match any entry.

use async_trait::async_trait;
use pldm_core::{KnownEndpoint, Snapshot};
use pldm_mctp::{FruOptions, ReadTiming, Requester, SerialTransport, TransferError, DEFAULT_BAUD_RATE};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::monitor::is_addressless;

/// Extra time allowed on top of the probe read deadline for open and write
const PROBE_GRACE: Duration = Duration::from_millis(500);

/// Live inventory access for one device path
#[async_trait]
pub trait InventoryReader: Send + Sync {
    /// Quick metadata fetch. True if the device reports any FRU data.
    async fn probe(&self, device: &str) -> bool;

    /// Full, trimmed FRU record table. `None` when nothing could be read.
    async fn read(&self, device: &str) -> Option<Vec<u8>>;
}

/// Serial reader settings
#[derive(Debug, Clone)]
pub struct SerialReaderConfig {
    pub baud_rate: u32,
    /// Timing for metadata probes
    pub probe_timing: ReadTiming,
    /// Timing for full table reads
    pub read_timing: ReadTiming,
    pub fru: FruOptions,
    /// Run full reads on the polling task instead of a blocking worker.
    /// Experimental: stalls every other probe in the cycle while it runs.
    pub inline_io: bool,
}

impl Default for SerialReaderConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            probe_timing: ReadTiming::probe(),
            read_timing: ReadTiming::inventory(),
            fru: FruOptions {
                strip_fragment_checksum: true,
            },
            inline_io: false,
        }
    }
}

/// Inventory reader over the MCTP serial binding
pub struct SerialInventoryReader {
    config: SerialReaderConfig,
    abort: Arc<AtomicBool>,
}

impl SerialInventoryReader {
    pub fn new(config: SerialReaderConfig, abort: Arc<AtomicBool>) -> Self {
        Self { config, abort }
    }

    fn open(device: &str, baud_rate: u32, timing: ReadTiming, abort: Arc<AtomicBool>) -> Result<Requester<SerialTransport>, TransferError> {
        let transport = SerialTransport::open(device, baud_rate, timing)?.with_abort(abort);
        Ok(Requester::new(transport))
    }

    fn probe_blocking(device: &str, config: &SerialReaderConfig, abort: Arc<AtomicBool>) -> Result<bool, TransferError> {
        let mut requester = Self::open(device, config.baud_rate, config.probe_timing, abort)?;
        let metadata = requester.get_fru_metadata()?;
        debug!(
            device,
            records = metadata.record_count,
            table_length = metadata.table_length,
            "FRU metadata probe"
        );
        Ok(metadata.has_data())
    }

    fn read_blocking(device: &str, config: &SerialReaderConfig, abort: Arc<AtomicBool>) -> Result<Vec<u8>, TransferError> {
        let mut requester = Self::open(device, config.baud_rate, config.read_timing, abort)?;
        Ok(requester.read_inventory(&config.fru)?.table)
    }
}

fn log_failure(device: &str, stage: &str, e: &TransferError) {
    if e.is_transport() {
        info!(device, stage, error = %e, "No usable response from device");
    } else {
        warn!(device, stage, error = %e, "Device returned an error");
    }
}

#[async_trait]
impl InventoryReader for SerialInventoryReader {
    async fn probe(&self, device: &str) -> bool {
        let config = self.config.clone();
        let abort = self.abort.clone();
        let path = device.to_string();
        let handle = tokio::task::spawn_blocking(move || Self::probe_blocking(&path, &config, abort));

        match tokio::time::timeout(self.config.probe_timing.overall + PROBE_GRACE, handle).await {
            Ok(Ok(Ok(present))) => present,
            Ok(Ok(Err(e))) => {
                log_failure(device, "probe", &e);
                false
            }
            Ok(Err(e)) => {
                warn!(device, error = %e, "Probe task failed");
                false
            }
            Err(_) => {
                info!(device, "Probe timed out");
                false
            }
        }
    }

    async fn read(&self, device: &str) -> Option<Vec<u8>> {
        let result = if self.config.inline_io {
            Self::read_blocking(device, &self.config, self.abort.clone())
        } else {
            let config = self.config.clone();
            let abort = self.abort.clone();
            let path = device.to_string();
            match tokio::task::spawn_blocking(move || Self::read_blocking(&path, &config, abort)).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(device, error = %e, "Inventory read task failed");
                    return None;
                }
            }
        };

        match result {
            Ok(table) if !table.is_empty() => Some(table),
            Ok(_) => {
                info!(device, "Device returned an empty FRU table");
                None
            }
            Err(e) => {
                log_failure(device, "read", &e);
                None
            }
        }
    }
}

/// Exact inventory comparison. Empty tables never match.
pub fn inventory_equal(a: &[u8], b: &[u8]) -> bool {
    !a.is_empty() && !b.is_empty() && a == b
}

/// Snapshot entries a port is allowed to match
pub fn candidates<'a>(snapshot: &'a Snapshot, port: &str, device: &str) -> Vec<&'a KnownEndpoint> {
    if is_addressless(device) {
        snapshot.iter().filter(|e| e.has_inventory()).collect()
    } else {
        snapshot
            .get(port)
            .filter(|e| e.has_inventory())
            .into_iter()
            .collect()
    }
}

/// First candidate whose captured table equals `live`
pub fn find_match<'a>(candidates: &[&'a KnownEndpoint], live: &[u8]) -> Option<&'a KnownEndpoint> {
    candidates.iter().copied().find(|ep| {
        let known = ep.inventory.as_deref().unwrap_or_default();
        let equal = inventory_equal(live, known);
        if !equal {
            debug!(key = %ep.key, live = live.len(), known = known.len(), "Inventory mismatch");
        }
        equal
    })
}

/// Result of trying to identify one new port
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// Quick probe failed; exclude the port for the rest of the cycle
    ProbeFailed,
    /// No inventory could be read
    NoData,
    /// No candidate carried an equal table
    NoMatch,
    /// Snapshot key of the matched endpoint
    Matched(String),
}

/// Probe, read and match one port against the snapshot.
pub async fn identify(
    reader: &dyn InventoryReader,
    snapshot: &Snapshot,
    port: &str,
    device: &str,
    probe_enabled: bool,
) -> MatchOutcome {
    info!(port, device, "Attempting FRU match");

    if probe_enabled && !reader.probe(device).await {
        info!(port, device, "Quick probe failed, excluding for this cycle");
        return MatchOutcome::ProbeFailed;
    }

    let Some(live) = reader.read(device).await else {
        warn!(port, device, "Could not retrieve FRU data");
        return MatchOutcome::NoData;
    };
    info!(port, device, len = live.len(), "Retrieved FRU data");
    debug!(port, fru = %hex::encode(&live[..live.len().min(64)]), "Live FRU table prefix");

    let candidates = candidates(snapshot, port, device);
    if candidates.is_empty() {
        warn!(port, addressless = is_addressless(device), "No candidate endpoints to compare");
        return MatchOutcome::NoMatch;
    }

    match find_match(&candidates, &live) {
        Some(ep) => {
            info!(port, endpoint = %ep.key, resource = %ep.resource_id, "FRU match");
            MatchOutcome::Matched(ep.key.clone())
        }
        None => {
            warn!(port, candidates = candidates.len(), "No FRU match found");
            MatchOutcome::NoMatch
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn endpoint(key: &str, inventory: Option<&[u8]>) -> KnownEndpoint {
        KnownEndpoint {
            key: key.to_string(),
            device: None,
            resource_id: format!("res_{key}"),
            resource_path: format!("/redfish/v1/Chassis/res_{key}"),
            inventory: inventory.map(<[u8]>::to_vec),
        }
    }

    struct FakeReader {
        probe_ok: bool,
        tables: HashMap<String, Vec<u8>>,
    }

    #[async_trait]
    impl InventoryReader for FakeReader {
        async fn probe(&self, _device: &str) -> bool {
            self.probe_ok
        }

        async fn read(&self, device: &str) -> Option<Vec<u8>> {
            self.tables.get(device).cloned()
        }
    }

    #[test]
    fn test_inventory_equal() {
        let a = [1u8, 2, 3];
        let b = [1u8, 2, 4];
        assert!(inventory_equal(&a, &a));
        assert_eq!(inventory_equal(&a, &b), inventory_equal(&b, &a));
        assert!(!inventory_equal(&a, &b));
        assert!(!inventory_equal(&a, &a[..2]));
        assert!(!inventory_equal(&[], &[]));
    }

    #[test]
    fn test_candidates_by_address() {
        let snapshot = Snapshot::from_endpoints([
            endpoint("1-1", Some(&[1])),
            endpoint("1-2", Some(&[2])),
            endpoint("1-3", None),
        ]);

        let found = candidates(&snapshot, "1-2", "/dev/ttyUSB0");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].key, "1-2");

        assert!(candidates(&snapshot, "1-3", "/dev/ttyUSB1").is_empty());
        assert!(candidates(&snapshot, "9-9", "/dev/ttyUSB2").is_empty());
    }

    #[test]
    fn test_candidates_addressless() {
        let snapshot = Snapshot::from_endpoints([
            endpoint("1-1", Some(&[1])),
            endpoint("1-2", Some(&[2])),
            endpoint("1-3", None),
        ]);
        let found = candidates(&snapshot, "/dev/pts/3", "/dev/pts/3");
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn test_identify() {
        let snapshot = Snapshot::from_endpoints([endpoint("1-1", Some(&[7, 7, 7])), endpoint("1-2", Some(&[8, 8]))]);
        let reader = FakeReader {
            probe_ok: true,
            tables: HashMap::from([
                ("/dev/ttyUSB0".to_string(), vec![7, 7, 7]),
                ("/dev/ttyUSB1".to_string(), vec![7, 7, 7]),
                ("/dev/pts/5".to_string(), vec![8, 8]),
            ]),
        };

        assert_eq!(
            identify(&reader, &snapshot, "1-1", "/dev/ttyUSB0", true).await,
            MatchOutcome::Matched("1-1".to_string())
        );
        // Same table, different address: no cross-address match
        assert_eq!(identify(&reader, &snapshot, "1-2", "/dev/ttyUSB1", true).await, MatchOutcome::NoMatch);
        assert_eq!(
            identify(&reader, &snapshot, "/dev/pts/5", "/dev/pts/5", true).await,
            MatchOutcome::Matched("1-2".to_string())
        );
        assert_eq!(identify(&reader, &snapshot, "1-1", "/dev/ttyUSB9", true).await, MatchOutcome::NoData);
    }

    #[tokio::test]
    async fn test_identify_probe() {
        let snapshot = Snapshot::from_endpoints([endpoint("1-1", Some(&[7]))]);
        let reader = FakeReader {
            probe_ok: false,
            tables: HashMap::from([("/dev/ttyUSB0".to_string(), vec![7])]),
        };

        assert_eq!(identify(&reader, &snapshot, "1-1", "/dev/ttyUSB0", true).await, MatchOutcome::ProbeFailed);
        assert_eq!(
            identify(&reader, &snapshot, "1-1", "/dev/ttyUSB0", false).await,
            MatchOutcome::Matched("1-1".to_string())
        );
    }
}
