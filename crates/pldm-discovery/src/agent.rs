//! Hot-plug polling agent
//!
//! One task owns all live port state. Each cycle scans the serial topology,
//! identifies newly added ports concurrently, and reports removed ports one
//! at a time so enable/disable ordering stays deterministic.

use async_trait::async_trait;
use futures_util::future::join_all;
use pldm_core::{KnownEndpoint, Snapshot};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::matcher::{identify, InventoryReader, MatchOutcome};
use crate::monitor::{diff, PortScanner};
use crate::shutdown::ShutdownToken;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Port scan failed: {0}")]
    ScanFailed(#[from] std::io::Error),
}

/// Receiver of availability changes for matched endpoints
#[async_trait]
pub trait ResourceStateSink: Send + Sync {
    async fn enable(&self, endpoint: &KnownEndpoint) -> anyhow::Result<()>;
    async fn disable(&self, endpoint: &KnownEndpoint) -> anyhow::Result<()>;
}

/// Agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Time between scans
    pub poll_interval: Duration,
    /// Time between status lines
    pub status_interval: Duration,
    /// Probe FRU metadata before attempting a full read
    pub probe_enabled: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            status_interval: Duration::from_secs(10),
            probe_enabled: true,
        }
    }
}

/// Topology and identification events for real-time observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotplugEvent {
    PortAdded { port: String, device: String },
    PortRemoved { port: String },
    /// A new port was recognised as a snapshot endpoint
    EndpointConnected { port: String, endpoint: String },
    EndpointDisconnected { port: String, endpoint: String },
}

/// What one poll cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub enabled: Vec<String>,
    pub disabled: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PortState {
    Connected,
    Disconnected,
}

#[derive(Debug, Default)]
struct LiveState {
    connected: BTreeSet<String>,
    devices: BTreeMap<String, String>,
    /// Detected port to matched snapshot key
    endpoints: BTreeMap<String, String>,
    /// Ports whose probe failed during the last cycle
    probe_failed: BTreeSet<String>,
    /// Last reported state per snapshot key
    port_states: BTreeMap<String, PortState>,
}

/// Hot-plug agent
pub struct HotplugAgent {
    config: AgentConfig,
    snapshot: Snapshot,
    scanner: Box<dyn PortScanner>,
    reader: Arc<dyn InventoryReader>,
    sink: Arc<dyn ResourceStateSink>,
    state: LiveState,
    event_tx: broadcast::Sender<HotplugEvent>,
}

impl HotplugAgent {
    pub fn new(
        config: AgentConfig,
        snapshot: Snapshot,
        scanner: Box<dyn PortScanner>,
        reader: Arc<dyn InventoryReader>,
        sink: Arc<dyn ResourceStateSink>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            config,
            snapshot,
            scanner,
            reader,
            sink,
            state: LiveState::default(),
            event_tx,
        }
    }

    /// Subscribe to hot-plug events
    pub fn subscribe(&self) -> broadcast::Receiver<HotplugEvent> {
        self.event_tx.subscribe()
    }

    pub fn connected_ports(&self) -> impl Iterator<Item = &str> {
        self.state.connected.iter().map(String::as_str)
    }

    /// Snapshot key a detected port was matched to
    pub fn matched_endpoint(&self, port: &str) -> Option<&str> {
        self.state.endpoints.get(port).map(String::as_str)
    }

    fn emit(&self, event: HotplugEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    /// Run one scan, diff, identify and propagate cycle.
    pub async fn poll_once(&mut self) -> Result<CycleSummary, DiscoveryError> {
        let current = self.scanner.scan()?;
        self.state.probe_failed.clear();
        let current_ids: BTreeSet<String> = current.keys().cloned().collect();
        let (added, removed) = diff(&self.state.connected, &current_ids);

        self.state.devices.extend(current);
        self.state.connected = current_ids;

        if !added.is_empty() || !removed.is_empty() {
            info!(?added, ?removed, "Serial topology change");
        }

        let mut summary = CycleSummary {
            added: added.clone(),
            removed: removed.clone(),
            ..Default::default()
        };

        if !added.is_empty() {
            self.process_added(&added, &mut summary).await;
        }

        for port in &removed {
            self.process_removed(port, &mut summary).await;
        }

        Ok(summary)
    }

    async fn process_added(&mut self, added: &[String], summary: &mut CycleSummary) {
        let mut ports = Vec::with_capacity(added.len());
        for port in added {
            info!(port = %port, "Serial port added");
            let Some(device) = self.state.devices.get(port).cloned() else {
                warn!(port = %port, "No device path for port");
                continue;
            };
            self.emit(HotplugEvent::PortAdded {
                port: port.clone(),
                device: device.clone(),
            });
            ports.push((port.clone(), device));
        }

        debug!(count = ports.len(), "Identifying added ports");
        let outcomes = {
            let reader = self.reader.as_ref();
            let snapshot = &self.snapshot;
            let probe = self.config.probe_enabled;
            join_all(
                ports
                    .iter()
                    .map(|(port, device)| identify(reader, snapshot, port, device, probe)),
            )
            .await
        };

        for ((port, _), outcome) in ports.into_iter().zip(outcomes) {
            match outcome {
                MatchOutcome::Matched(key) => {
                    let Some(endpoint) = self.snapshot.get(&key).cloned() else {
                        warn!(port = %port, endpoint = %key, "Matched endpoint missing from snapshot");
                        continue;
                    };
                    info!(
                        port = %port,
                        endpoint = %key,
                        resource = %endpoint.resource_id,
                        "Recognized endpoint, enabling resources"
                    );
                    if let Err(e) = self.sink.enable(&endpoint).await {
                        error!(resource = %endpoint.resource_id, error = %e, "Failed to enable resources");
                    }
                    self.state.endpoints.insert(port.clone(), key.clone());
                    self.state.port_states.insert(key.clone(), PortState::Connected);
                    summary.enabled.push(endpoint.resource_id);
                    self.emit(HotplugEvent::EndpointConnected { port, endpoint: key });
                }
                MatchOutcome::ProbeFailed => {
                    self.state.probe_failed.insert(port);
                }
                MatchOutcome::NoData | MatchOutcome::NoMatch => {
                    debug!(port = %port, "Unknown device, ignoring");
                }
            }
        }
    }

    async fn process_removed(&mut self, port: &str, summary: &mut CycleSummary) {
        info!(port, "Serial port removed");
        self.state.devices.remove(port);
        self.emit(HotplugEvent::PortRemoved { port: port.to_string() });

        let key = match self.state.endpoints.remove(port) {
            Some(mapped) => mapped,
            None => port.to_string(),
        };

        let Some(endpoint) = self.snapshot.get(&key).cloned() else {
            debug!(port, "Unknown port, no action needed");
            return;
        };

        info!(
            port,
            endpoint = %key,
            resource = %endpoint.resource_id,
            "Endpoint disconnected, disabling resources"
        );
        if let Err(e) = self.sink.disable(&endpoint).await {
            error!(resource = %endpoint.resource_id, error = %e, "Failed to disable resources");
        }
        self.state.port_states.insert(key.clone(), PortState::Disconnected);
        summary.disabled.push(endpoint.resource_id);
        self.emit(HotplugEvent::EndpointDisconnected {
            port: port.to_string(),
            endpoint: key,
        });
    }

    fn log_status(&self) {
        info!(
            connected = self.state.connected.len(),
            unresponsive = self.state.probe_failed.len(),
            "Agent status"
        );
        if !self.state.port_states.is_empty() {
            debug!(states = ?self.state.port_states, "Port states");
        }
    }

    /// Poll until `shutdown` is cancelled.
    pub async fn run(&mut self, shutdown: ShutdownToken) {
        info!(
            poll_secs = self.config.poll_interval.as_secs_f32(),
            endpoints = self.snapshot.len(),
            with_fru = self.snapshot.iter().filter(|e| e.has_inventory()).count(),
            "Starting hot-plug agent"
        );
        if self.snapshot.is_empty() {
            warn!("No known endpoints loaded, run the configurator first");
        }

        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_status = Instant::now();

        while !shutdown.is_cancelled() {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.cancelled() => break,
            }

            if let Err(e) = self.poll_once().await {
                error!(error = %e, "Poll cycle failed, continuing");
            }

            if last_status.elapsed() >= self.config.status_interval {
                self.log_status();
                last_status = Instant::now();
            }
        }

        info!("Hot-plug agent stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::ScanResult;
    use std::collections::HashMap;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct FakeScanner {
        ports: Arc<Mutex<ScanResult>>,
        fail: Arc<Mutex<bool>>,
    }

    impl FakeScanner {
        fn set(&self, ports: &[(&str, &str)]) {
            *self.ports.lock().unwrap() = ports.iter().map(|(p, d)| (p.to_string(), d.to_string())).collect();
        }
    }

    impl PortScanner for FakeScanner {
        fn scan(&self) -> io::Result<ScanResult> {
            if *self.fail.lock().unwrap() {
                return Err(io::Error::new(io::ErrorKind::NotFound, "no sysfs"));
            }
            Ok(self.ports.lock().unwrap().clone())
        }
    }

    #[derive(Default)]
    struct FakeReader {
        tables: HashMap<String, Vec<u8>>,
        failing_probes: BTreeSet<String>,
        probes: AtomicUsize,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl InventoryReader for FakeReader {
        async fn probe(&self, device: &str) -> bool {
            self.probes.fetch_add(1, Ordering::SeqCst);
            !self.failing_probes.contains(device)
        }

        async fn read(&self, device: &str) -> Option<Vec<u8>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.tables.get(device).cloned()
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        calls: Mutex<Vec<(String, String, String)>>,
    }

    impl RecordingSink {
        fn calls(&self) -> Vec<(String, String, String)> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, action: &str, endpoint: &KnownEndpoint) {
            self.calls.lock().unwrap().push((
                action.to_string(),
                endpoint.resource_id.clone(),
                endpoint.resource_path.clone(),
            ));
        }
    }

    #[async_trait]
    impl ResourceStateSink for RecordingSink {
        async fn enable(&self, endpoint: &KnownEndpoint) -> anyhow::Result<()> {
            self.record("enable", endpoint);
            Ok(())
        }

        async fn disable(&self, endpoint: &KnownEndpoint) -> anyhow::Result<()> {
            self.record("disable", endpoint);
            Ok(())
        }
    }

    fn endpoint(key: &str, resource: &str, inventory: &[u8]) -> KnownEndpoint {
        KnownEndpoint {
            key: key.to_string(),
            device: None,
            resource_id: resource.to_string(),
            resource_path: format!("/redfish/v1/Chassis/{resource}"),
            inventory: Some(inventory.to_vec()),
        }
    }

    fn agent(
        snapshot: Snapshot,
        scanner: &FakeScanner,
        reader: Arc<FakeReader>,
        sink: Arc<RecordingSink>,
    ) -> HotplugAgent {
        HotplugAgent::new(AgentConfig::default(), snapshot, Box::new(scanner.clone()), reader, sink)
    }

    #[tokio::test]
    async fn test_hotplug_enable_then_disable() {
        let fru = vec![1u8, 0, 1, 1, 1, 2, 3, b'A', b'C', b'M'];
        let snapshot = Snapshot::from_endpoints([endpoint("1-1", "Node1", &fru)]);
        let scanner = FakeScanner::default();
        let reader = Arc::new(FakeReader {
            tables: HashMap::from([("/dev/ttyUSB0".to_string(), fru.clone())]),
            ..Default::default()
        });
        let sink = Arc::new(RecordingSink::default());
        let mut agent = agent(snapshot, &scanner, reader.clone(), sink.clone());
        let mut events = agent.subscribe();

        scanner.set(&[("1-1", "/dev/ttyUSB0")]);
        let summary = agent.poll_once().await.unwrap();
        assert_eq!(summary.added, vec!["1-1".to_string()]);
        assert_eq!(summary.enabled, vec!["Node1".to_string()]);
        assert_eq!(agent.matched_endpoint("1-1"), Some("1-1"));

        // Unchanged topology does nothing
        let summary = agent.poll_once().await.unwrap();
        assert_eq!(summary, CycleSummary::default());

        scanner.set(&[]);
        let summary = agent.poll_once().await.unwrap();
        assert_eq!(summary.disabled, vec!["Node1".to_string()]);
        assert_eq!(reader.reads.load(Ordering::SeqCst), 1);
        assert_eq!(agent.matched_endpoint("1-1"), None);

        assert_eq!(
            sink.calls(),
            vec![
                ("enable".to_string(), "Node1".to_string(), "/redfish/v1/Chassis/Node1".to_string()),
                ("disable".to_string(), "Node1".to_string(), "/redfish/v1/Chassis/Node1".to_string()),
            ]
        );

        assert!(matches!(events.try_recv(), Ok(HotplugEvent::PortAdded { .. })));
        assert_eq!(
            events.try_recv().unwrap(),
            HotplugEvent::EndpointConnected {
                port: "1-1".to_string(),
                endpoint: "1-1".to_string()
            }
        );
        assert!(matches!(events.try_recv(), Ok(HotplugEvent::PortRemoved { .. })));
        assert!(matches!(events.try_recv(), Ok(HotplugEvent::EndpointDisconnected { .. })));
    }

    #[tokio::test]
    async fn test_mismatch_does_not_enable() {
        let snapshot = Snapshot::from_endpoints([endpoint("1-1", "Node1", &[1, 2, 3])]);
        let scanner = FakeScanner::default();
        let reader = Arc::new(FakeReader {
            tables: HashMap::from([("/dev/ttyUSB0".to_string(), vec![1, 2, 4])]),
            ..Default::default()
        });
        let sink = Arc::new(RecordingSink::default());
        let mut agent = agent(snapshot, &scanner, reader, sink.clone());

        scanner.set(&[("1-1", "/dev/ttyUSB0")]);
        let summary = agent.poll_once().await.unwrap();
        assert!(summary.enabled.is_empty());
        assert!(sink.calls().is_empty());
    }

    #[tokio::test]
    async fn test_removal_falls_back_to_port_key() {
        let snapshot = Snapshot::from_endpoints([endpoint("1-2", "Node2", &[9])]);
        let scanner = FakeScanner::default();
        let reader = Arc::new(FakeReader {
            failing_probes: BTreeSet::from(["/dev/ttyUSB1".to_string()]),
            ..Default::default()
        });
        let sink = Arc::new(RecordingSink::default());
        let mut agent = agent(snapshot, &scanner, reader.clone(), sink.clone());

        scanner.set(&[("1-2", "/dev/ttyUSB1")]);
        agent.poll_once().await.unwrap();
        assert_eq!(reader.reads.load(Ordering::SeqCst), 0);
        assert!(sink.calls().is_empty());

        scanner.set(&[]);
        let summary = agent.poll_once().await.unwrap();
        assert_eq!(summary.disabled, vec!["Node2".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_probe_retried_after_replug() {
        let scanner = FakeScanner::default();
        let reader = Arc::new(FakeReader {
            failing_probes: BTreeSet::from(["/dev/ttyUSB3".to_string()]),
            ..Default::default()
        });
        let sink = Arc::new(RecordingSink::default());
        let mut agent = agent(Snapshot::default(), &scanner, reader.clone(), sink);

        scanner.set(&[("9-9", "/dev/ttyUSB3")]);
        agent.poll_once().await.unwrap();
        assert!(agent.state.probe_failed.contains("9-9"));

        // Still attached: the exclusion resets but the port is not probed again
        agent.poll_once().await.unwrap();
        assert!(agent.state.probe_failed.is_empty());
        assert_eq!(reader.probes.load(Ordering::SeqCst), 1);

        scanner.set(&[]);
        agent.poll_once().await.unwrap();

        scanner.set(&[("9-9", "/dev/ttyUSB3")]);
        agent.poll_once().await.unwrap();
        assert_eq!(reader.probes.load(Ordering::SeqCst), 2);
        assert!(agent.state.probe_failed.contains("9-9"));
    }

    #[tokio::test]
    async fn test_probe_exclusion_resets_next_cycle() {
        let snapshot = Snapshot::from_endpoints([endpoint("1-1", "Node1", &[5, 5])]);
        let scanner = FakeScanner::default();
        let reader = Arc::new(FakeReader {
            tables: HashMap::from([("/dev/ttyUSB0".to_string(), vec![5, 5])]),
            failing_probes: BTreeSet::from(["/dev/ttyUSB3".to_string()]),
            ..Default::default()
        });
        let sink = Arc::new(RecordingSink::default());
        let mut agent = agent(snapshot, &scanner, reader.clone(), sink.clone());

        scanner.set(&[("9-9", "/dev/ttyUSB3")]);
        agent.poll_once().await.unwrap();
        assert!(agent.state.probe_failed.contains("9-9"));

        scanner.set(&[("9-9", "/dev/ttyUSB3"), ("1-1", "/dev/ttyUSB0")]);
        let summary = agent.poll_once().await.unwrap();
        assert!(!agent.state.probe_failed.contains("9-9"));
        assert_eq!(summary.enabled, vec!["Node1".to_string()]);
        // Only the new port is probed
        assert_eq!(reader.probes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_pts_matches_any_endpoint() {
        let snapshot = Snapshot::from_endpoints([
            endpoint("1-1", "Node1", &[1, 1]),
            endpoint("1-2", "Node2", &[2, 2]),
        ]);
        let scanner = FakeScanner::default();
        let reader = Arc::new(FakeReader {
            tables: HashMap::from([
                ("/dev/pts/4".to_string(), vec![2, 2]),
                ("/dev/ttyUSB0".to_string(), vec![1, 1]),
            ]),
            ..Default::default()
        });
        let sink = Arc::new(RecordingSink::default());
        let mut agent = agent(snapshot, &scanner, reader, sink.clone());

        scanner.set(&[("/dev/pts/4", "/dev/pts/4"), ("1-1", "/dev/ttyUSB0")]);
        let summary = agent.poll_once().await.unwrap();
        assert_eq!(summary.enabled.len(), 2);
        assert!(summary.enabled.contains(&"Node1".to_string()));
        assert!(summary.enabled.contains(&"Node2".to_string()));
        assert_eq!(agent.matched_endpoint("/dev/pts/4"), Some("1-2"));

        scanner.set(&[("1-1", "/dev/ttyUSB0")]);
        let summary = agent.poll_once().await.unwrap();
        assert_eq!(summary.disabled, vec!["Node2".to_string()]);
    }

    #[tokio::test]
    async fn test_scan_failure_keeps_state() {
        let snapshot = Snapshot::from_endpoints([endpoint("1-1", "Node1", &[1])]);
        let scanner = FakeScanner::default();
        let reader = Arc::new(FakeReader {
            tables: HashMap::from([("/dev/ttyUSB0".to_string(), vec![1])]),
            ..Default::default()
        });
        let sink = Arc::new(RecordingSink::default());
        let mut agent = agent(snapshot, &scanner, reader, sink.clone());

        scanner.set(&[("1-1", "/dev/ttyUSB0")]);
        agent.poll_once().await.unwrap();

        *scanner.fail.lock().unwrap() = true;
        assert!(matches!(agent.poll_once().await, Err(DiscoveryError::ScanFailed(_))));
        assert_eq!(agent.connected_ports().collect::<Vec<_>>(), vec!["1-1"]);
        assert_eq!(sink.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let scanner = FakeScanner::default();
        let mut agent = agent(
            Snapshot::default(),
            &scanner,
            Arc::new(FakeReader::default()),
            Arc::new(RecordingSink::default()),
        );
        let token = ShutdownToken::new();
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), agent.run(token))
            .await
            .unwrap();
    }
}
