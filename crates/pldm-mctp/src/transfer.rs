//! Multi-part PLDM transfers over a byte-stream transport
//!
//! [`Requester`] sends one framed request at a time and drives the
//! first-part/next-part loop for descriptor records (GetPDR) and the FRU
//! record table (GetFRURecordTable). Every failure is a [`TransferError`]
//! value; retry or abort is the caller's call.

use pldm_core::fru::trimmed_table_len;
use serde::Serialize;
use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::checksum::crc32;
use crate::command::{
    self, completion, fru_op, fru_transfer_progress, pdr_transfer_progress, pldm_type, platform,
    CommandError, FruTableMetadata, GetPdrRequest, PdrRepositoryInfo, TransferProgress,
};
use crate::frame::{self, FrameError, ParsedFrame, MSG_TYPE_PLDM};
use crate::transport::Transport;

/// Iteration cap for one descriptor record
pub const MAX_PDR_ITERATIONS: usize = 10;

/// Iteration cap for the FRU record table
pub const MAX_FRU_ITERATIONS: usize = 50;

/// Length of the common descriptor record header
const PDR_HEADER_LEN: usize = 10;

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("No response from device")]
    NoResponse,
    #[error("No frame found in {0} received bytes")]
    NoFrame(usize),
    #[error("Frame check mismatch: received 0x{received:04x}, computed 0x{computed:04x}")]
    ChecksumMismatch { received: u16, computed: u16 },
    #[error("Unexpected message: msg type 0x{msg_type:02x}, PLDM type {pldm_type:?}, command {command:?}")]
    UnexpectedMessage {
        msg_type: u8,
        pldm_type: Option<u8>,
        command: Option<u8>,
    },
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("Unknown transfer flag 0x{0:02x}")]
    UnknownTransferFlag(u8),
    #[error("Transfer did not complete within {0} iterations")]
    IterationLimit(usize),
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    /// Completion code carried by the error, if the device sent one
    pub fn completion_code(&self) -> Option<u8> {
        match self {
            TransferError::Command(CommandError::CompletionCode(cc)) => Some(*cc),
            _ => None,
        }
    }

    /// Errors caused by the link rather than by the device's answer
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            TransferError::NoResponse
                | TransferError::NoFrame(_)
                | TransferError::ChecksumMismatch { .. }
                | TransferError::Io(_)
        )
    }
}

/// One retrieved descriptor record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PdrRecord {
    /// Handle that was requested
    pub handle: u32,
    pub next_handle: u32,
    /// Record bytes, common header included
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
}

mod hex_bytes {
    use serde::Serializer;

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }
}

/// Repository walk tuning
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Attempts per record handle
    pub retries: u32,
    /// Pause between attempts
    pub retry_delay: Duration,
    /// Upper bound on records collected
    pub max_records: usize,
    /// Rebuild the common header when the device returns the body only
    pub reconstruct_headers: bool,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            retries: 3,
            retry_delay: Duration::from_millis(100),
            max_records: 50,
            reconstruct_headers: true,
        }
    }
}

/// FRU table transfer tuning
#[derive(Debug, Clone, Default)]
pub struct FruOptions {
    /// Drop a trailing CRC-32 that some firmware appends to every table part
    pub strip_fragment_checksum: bool,
}

/// Result of a complete inventory read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryRead {
    pub metadata: FruTableMetadata,
    /// Table bytes, trimmed to the logical table
    pub table: Vec<u8>,
}

/// PLDM requester bound to one transport
pub struct Requester<T> {
    transport: T,
    instance_id: u8,
}

impl<T: Transport> Requester<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            instance_id: 0,
        }
    }

    pub fn with_instance_id(mut self, instance_id: u8) -> Self {
        self.instance_id = instance_id & 0x1F;
        self
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Send one request and return the validated response frame.
    fn transact(&mut self, message: &[u8], pldm_type: u8, command: u8) -> Result<ParsedFrame, TransferError> {
        let request = frame::build_pldm(message)?;
        trace!(tx = %hex::encode(&request), "Sending PLDM request");

        let rx = self.transport.exchange(&request)?;
        if rx.is_empty() {
            return Err(TransferError::NoResponse);
        }
        trace!(rx = %hex::encode(&rx), "Received bytes");

        let parsed: Vec<Option<ParsedFrame>> = frame::extract(&rx).iter().map(|f| frame::parse(f)).collect();
        let response = frame::reassemble(&parsed)
            .or_else(|| parsed.iter().flatten().next().cloned())
            // Stuffed frames never survive extraction; try the buffer whole
            .or_else(|| frame::parse(&rx))
            .ok_or(TransferError::NoFrame(rx.len()))?;

        if !response.fcs_ok() {
            return Err(TransferError::ChecksumMismatch {
                received: response.fcs_received,
                computed: response.fcs_computed,
            });
        }

        match response.pldm {
            Some(fields)
                if response.msg_type == MSG_TYPE_PLDM
                    && fields.pldm_type == pldm_type
                    && fields.command == command =>
            {
                Ok(response)
            }
            other => Err(TransferError::UnexpectedMessage {
                msg_type: response.msg_type,
                pldm_type: other.map(|f| f.pldm_type),
                command: other.map(|f| f.command),
            }),
        }
    }

    pub fn get_pdr_repository_info(&mut self) -> Result<PdrRepositoryInfo, TransferError> {
        let msg = command::encode_get_pdr_repository_info(self.instance_id);
        let rsp = self.transact(&msg, pldm_type::PLATFORM, platform::GET_PDR_REPOSITORY_INFO)?;
        Ok(command::decode_pdr_repository_info(&rsp.payload)?)
    }

    /// Retrieve one descriptor record, following next-part requests.
    pub fn get_pdr(&mut self, handle: u32) -> Result<PdrRecord, TransferError> {
        let mut request = GetPdrRequest::first_part(handle);
        let mut accumulated = Vec::new();
        let mut next_handle = 0;

        for iteration in 0..MAX_PDR_ITERATIONS {
            let msg = request.encode(self.instance_id);
            let rsp = self.transact(&msg, pldm_type::PLATFORM, platform::GET_PDR)?;
            let part = command::decode_get_pdr(&rsp.payload)?;

            accumulated.extend_from_slice(&part.record_data);
            next_handle = part.next_record_handle;

            debug!(
                handle = format_args!("0x{:08x}", handle),
                iteration,
                flag = format_args!("0x{:02x}", part.transfer_flag),
                next_transfer = part.next_data_transfer_handle,
                count = part.response_count,
                "GetPDR part"
            );

            let progress = pdr_transfer_progress(part.transfer_flag)
                .ok_or(TransferError::UnknownTransferFlag(part.transfer_flag))?;
            if progress == TransferProgress::Complete || part.next_data_transfer_handle == 0 {
                return Ok(PdrRecord {
                    handle,
                    next_handle,
                    data: accumulated,
                });
            }

            let change_number = if iteration == 0 && accumulated.len() >= 8 {
                u16::from_le_bytes([accumulated[6], accumulated[7]])
            } else {
                request.record_change_number
            };
            request = GetPdrRequest::next_part(handle, part.next_data_transfer_handle, change_number);
        }

        warn!(handle = format_args!("0x{:08x}", handle), next_handle, "GetPDR iteration limit reached");
        Err(TransferError::IterationLimit(MAX_PDR_ITERATIONS))
    }

    /// Walk the whole descriptor repository starting at handle 0.
    ///
    /// Stops when the next handle is zero or repeats, when the device reports
    /// an invalid handle (an empty repository included), or after
    /// `max_records` handles. A failure on the first handle is returned; a
    /// handle that keeps failing later is skipped for the one after it.
    pub fn walk_repository(&mut self, opts: &WalkOptions) -> Result<Vec<PdrRecord>, TransferError> {
        let mut records: Vec<PdrRecord> = Vec::new();
        let mut seen = BTreeSet::new();
        let mut handle = 0u32;

        for _ in 0..opts.max_records {
            let mut attempt = 0;
            let fetched = loop {
                attempt += 1;
                match self.get_pdr(handle) {
                    Ok(record) => break Ok(record),
                    Err(e) if e.completion_code() == Some(completion::INVALID_RECORD_HANDLE) => break Err(e),
                    Err(e) if attempt < opts.retries.max(1) => {
                        debug!(handle, attempt, error = %e, "GetPDR failed, retrying");
                        std::thread::sleep(opts.retry_delay);
                    }
                    Err(e) => break Err(e),
                }
            };
            seen.insert(handle);

            let mut record = match fetched {
                Ok(record) => record,
                Err(e) if e.completion_code() == Some(completion::INVALID_RECORD_HANDLE) => {
                    debug!(handle, collected = records.len(), "End of PDR repository");
                    break;
                }
                Err(e) if records.is_empty() && handle == 0 => return Err(e),
                Err(e) => {
                    warn!(handle, collected = records.len(), error = %e, "Skipping unreadable PDR handle");
                    handle = handle.wrapping_add(1);
                    if handle as usize >= opts.max_records || seen.contains(&handle) {
                        break;
                    }
                    continue;
                }
            };

            if opts.reconstruct_headers {
                record.data = with_common_header(handle, record.data);
            }

            let next = record.next_handle;
            records.push(record);

            if next == 0 || seen.contains(&next) {
                if next != 0 {
                    warn!(handle, next, "PDR handle chain loops, stopping walk");
                }
                break;
            }
            handle = next;
        }

        debug!(count = records.len(), "PDR walk finished");
        Ok(records)
    }

    pub fn get_fru_metadata(&mut self) -> Result<FruTableMetadata, TransferError> {
        let msg = command::encode_get_fru_metadata(self.instance_id);
        let rsp = self.transact(&msg, pldm_type::FRU, command::fru::GET_FRU_RECORD_TABLE_METADATA)?;
        Ok(command::decode_fru_metadata(&rsp.payload)?)
    }

    /// Retrieve the FRU record table, truncated to `expected_len` when the
    /// transfer returned more.
    pub fn get_fru_table(&mut self, opts: &FruOptions, expected_len: Option<usize>) -> Result<Vec<u8>, TransferError> {
        let mut table = Vec::new();
        let mut transfer_handle = 0u32;
        let mut op = fru_op::GET_FIRST_PART;

        for iteration in 0..MAX_FRU_ITERATIONS {
            let msg = command::encode_get_fru_table(self.instance_id, transfer_handle, op);
            let rsp = self.transact(&msg, pldm_type::FRU, command::fru::GET_FRU_RECORD_TABLE)?;
            let part = command::decode_fru_table_part(&rsp.payload)?;

            let data = if opts.strip_fragment_checksum {
                strip_fragment_crc(&part.data)
            } else {
                &part.data[..]
            };
            table.extend_from_slice(data);

            debug!(
                iteration,
                flag = format_args!("0x{:02x}", part.transfer_flag),
                next_transfer = part.next_data_transfer_handle,
                len = data.len(),
                "GetFRURecordTable part"
            );

            let progress = fru_transfer_progress(part.transfer_flag)
                .ok_or(TransferError::UnknownTransferFlag(part.transfer_flag))?;
            if progress == TransferProgress::Complete || part.next_data_transfer_handle == 0 {
                if let Some(expected) = expected_len {
                    table.truncate(expected);
                }
                return Ok(table);
            }

            transfer_handle = part.next_data_transfer_handle;
            op = fru_op::GET_NEXT_PART;
        }

        warn!(len = table.len(), "GetFRURecordTable iteration limit reached");
        Err(TransferError::IterationLimit(MAX_FRU_ITERATIONS))
    }

    /// Metadata, table and trim in one go.
    pub fn read_inventory(&mut self, opts: &FruOptions) -> Result<InventoryRead, TransferError> {
        let metadata = self.get_fru_metadata()?;
        let declared = metadata.table_length as usize;
        let expected = (declared > 0).then_some(declared);

        let mut table = self.get_fru_table(opts, expected)?;
        let keep = trimmed_table_len(&table, declared);
        if keep < table.len() {
            debug!(from = table.len(), to = keep, "Trimmed FRU table");
            table.truncate(keep);
        }

        Ok(InventoryRead { metadata, table })
    }
}

/// Remove a trailing little-endian CRC-32 of the preceding bytes, if present.
pub fn strip_fragment_crc(data: &[u8]) -> &[u8] {
    if data.len() < 4 {
        return data;
    }
    let (body, tail) = data.split_at(data.len() - 4);
    let stored = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
    if stored == crc32(body) {
        body
    } else {
        data
    }
}

/// Prepend a common header when `data` is a bare record body.
///
/// A record is taken as complete when it starts with header version 1 and
/// either echoes the requested handle or answers the handle-0 request.
pub fn with_common_header(handle: u32, data: Vec<u8>) -> Vec<u8> {
    if data.len() >= PDR_HEADER_LEN {
        let returned = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        if data[4] == 0x01 && (returned == handle || handle == 0) {
            return data;
        }
    }

    let record_type = data.first().copied().unwrap_or(0);
    let mut out = Vec::with_capacity(PDR_HEADER_LEN + data.len());
    out.extend_from_slice(&handle.to_le_bytes());
    out.push(0x01);
    out.push(record_type);
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&(data.len() as u16).to_le_bytes());
    out.extend_from_slice(&data);
    out
}
