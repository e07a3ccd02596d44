//! PLDM MCTP - PLDM over the MCTP serial binding
//!
//! This crate provides the wire stack used to talk to PLDM termini over
//! serial and USB-serial links:
//! - Frame codec with byte stuffing and FCS-16 (DSP0253)
//! - Command codec for descriptor record and FRU table retrieval
//! - Multi-part transfer engine with iteration and cycle guards
//! - Blocking serial transport with idle-gap reads

pub mod checksum;
pub mod command;
pub mod frame;
pub mod transfer;
pub mod transport;

pub use command::{CommandError, FruTableMetadata, PdrRepositoryInfo};
pub use frame::{FrameError, ParsedFrame};
pub use transfer::{FruOptions, InventoryRead, PdrRecord, Requester, TransferError, WalkOptions};
pub use transport::{ReadTiming, SerialTransport, Transport, DEFAULT_BAUD_RATE};
