//! PLDM Discovery - Hot-plug reconciliation for serial PLDM endpoints
//!
//! This crate provides the runtime side of endpoint tracking:
//! - Sysfs scanning for USB serial ports and set-difference against the last scan
//! - Inventory probing and exact byte matching against a configuration snapshot
//! - A polling agent that reports reconnects and disconnects to a resource-state sink

pub mod agent;
pub mod matcher;
pub mod monitor;
pub mod shutdown;

pub use agent::{AgentConfig, DiscoveryError, HotplugAgent, HotplugEvent, ResourceStateSink};
pub use matcher::{inventory_equal, InventoryReader, SerialInventoryReader, SerialReaderConfig};
pub use monitor::{diff, is_addressless, PortScanner, ScanResult, SysfsScanner};
pub use shutdown::ShutdownToken;
