//! PLDM Core - Shared types for PLDM discovery and hot-plug
//!
//! This crate provides the device-independent pieces of the system:
//! - Descriptor record (PDR) decoding with two-phase state set resolution
//! - DSP0248 unit codes rendered as UCUM strings
//! - FRU record table parsing and trimming
//! - Entity, record type and state set name tables
//! - The known-endpoint snapshot produced at configuration time

pub mod fru;
pub mod names;
pub mod pdr;
pub mod snapshot;
pub mod units;

pub use fru::{parse_record_table, trimmed_table_len, FruField, FruRecord};
pub use pdr::{collect_state_sets, decode, decode_all, DecodeError, DecodedPdr, PdrEntry, StateSetMap};
pub use snapshot::{KnownEndpoint, Snapshot, SnapshotError};
pub use units::{to_ucum, AuxRelationship, UnitSpec};
