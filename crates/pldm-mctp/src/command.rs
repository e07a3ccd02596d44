//! PLDM request encoding and response decoding
//!
//! Covers the discovery subset of DSP0248 (platform monitoring and control)
//! and DSP0257 (FRU data). All multi-byte fields are little-endian.
//! Response decoders take the command payload starting at the completion code.

use serde::Serialize;
use thiserror::Error;

/// PLDM type codes
pub mod pldm_type {
    pub const PLATFORM: u8 = 0x02;
    pub const FRU: u8 = 0x04;
}

/// Platform (type 2) command codes
pub mod platform {
    pub const GET_PDR_REPOSITORY_INFO: u8 = 0x50;
    pub const GET_PDR: u8 = 0x51;
}

/// FRU (type 4) command codes
pub mod fru {
    pub const GET_FRU_RECORD_TABLE_METADATA: u8 = 0x01;
    pub const GET_FRU_RECORD_TABLE: u8 = 0x02;
}

/// Completion codes the discovery path cares about
pub mod completion {
    pub const SUCCESS: u8 = 0x00;
    pub const ERROR: u8 = 0x01;
    pub const ERROR_INVALID_DATA: u8 = 0x02;
    pub const ERROR_INVALID_LENGTH: u8 = 0x03;
    pub const ERROR_NOT_READY: u8 = 0x04;
    pub const ERROR_UNSUPPORTED_PLDM_CMD: u8 = 0x05;
    /// GetPDR: the requested record handle does not exist
    pub const INVALID_RECORD_HANDLE: u8 = 0x82;
    /// GetFRURecordTableMetadata: no table is available
    pub const NO_FRU_METADATA: u8 = 0x83;
}

/// GetPDR transfer operation flags
pub mod pdr_op {
    pub const GET_NEXT_PART: u8 = 0x00;
    pub const GET_FIRST_PART: u8 = 0x01;
}

/// GetFRURecordTable transfer operation flags
pub mod fru_op {
    pub const GET_FIRST_PART: u8 = 0x00;
    pub const GET_NEXT_PART: u8 = 0x01;
}

/// Transfer flags reported in multi-part responses
pub mod transfer_flag {
    pub const START: u8 = 0x00;
    pub const MIDDLE: u8 = 0x01;
    pub const END: u8 = 0x04;
    pub const START_AND_END: u8 = 0x05;
}

/// Request count asked for in every GetPDR request
pub const PDR_REQUEST_COUNT: u16 = 255;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Completion code 0x{0:02x}")]
    CompletionCode(u8),
    #[error("Payload too short: expected {expected} bytes, got {actual}")]
    ShortPayload { expected: usize, actual: usize },
}

/// Where a multi-part transfer stands after one response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferProgress {
    /// More parts follow
    More,
    /// The last part has been received
    Complete,
}

/// Classify a GetPDR transfer flag; `None` for unknown flags.
pub fn pdr_transfer_progress(flag: u8) -> Option<TransferProgress> {
    match flag {
        transfer_flag::START | transfer_flag::MIDDLE => Some(TransferProgress::More),
        transfer_flag::END | transfer_flag::START_AND_END => Some(TransferProgress::Complete),
        _ => None,
    }
}

/// Classify a GetFRURecordTable transfer flag; `None` for unknown flags.
///
/// Some FRU responders use 0x02 for a middle part and 0x08 for the last.
pub fn fru_transfer_progress(flag: u8) -> Option<TransferProgress> {
    match flag {
        transfer_flag::START | transfer_flag::MIDDLE | 0x02 => Some(TransferProgress::More),
        transfer_flag::END | transfer_flag::START_AND_END | 0x08 => Some(TransferProgress::Complete),
        _ => None,
    }
}

/// Encode a request header: Rq=1, D=0, header version 0.
pub fn request_header(instance_id: u8, pldm_type: u8, command: u8) -> [u8; 3] {
    [0x80 | (instance_id & 0x1F), pldm_type & 0x3F, command]
}

pub fn encode_get_pdr_repository_info(instance_id: u8) -> Vec<u8> {
    request_header(instance_id, pldm_type::PLATFORM, platform::GET_PDR_REPOSITORY_INFO).to_vec()
}

/// GetPDR request parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetPdrRequest {
    pub record_handle: u32,
    pub data_transfer_handle: u32,
    pub transfer_op: u8,
    pub request_count: u16,
    pub record_change_number: u16,
}

impl GetPdrRequest {
    /// First-part request for `record_handle`
    pub fn first_part(record_handle: u32) -> Self {
        Self {
            record_handle,
            data_transfer_handle: 0,
            transfer_op: pdr_op::GET_FIRST_PART,
            request_count: PDR_REQUEST_COUNT,
            record_change_number: 0,
        }
    }

    /// Next-part request continuing from a previous response
    pub fn next_part(record_handle: u32, data_transfer_handle: u32, record_change_number: u16) -> Self {
        Self {
            record_handle,
            data_transfer_handle,
            transfer_op: pdr_op::GET_NEXT_PART,
            request_count: PDR_REQUEST_COUNT,
            record_change_number,
        }
    }

    pub fn encode(&self, instance_id: u8) -> Vec<u8> {
        let mut msg = Vec::with_capacity(16);
        msg.extend_from_slice(&request_header(instance_id, pldm_type::PLATFORM, platform::GET_PDR));
        msg.extend_from_slice(&self.record_handle.to_le_bytes());
        msg.extend_from_slice(&self.data_transfer_handle.to_le_bytes());
        msg.push(self.transfer_op);
        msg.extend_from_slice(&self.request_count.to_le_bytes());
        msg.extend_from_slice(&self.record_change_number.to_le_bytes());
        msg
    }
}

pub fn encode_get_fru_metadata(instance_id: u8) -> Vec<u8> {
    request_header(instance_id, pldm_type::FRU, fru::GET_FRU_RECORD_TABLE_METADATA).to_vec()
}

pub fn encode_get_fru_table(instance_id: u8, data_transfer_handle: u32, transfer_op: u8) -> Vec<u8> {
    let mut msg = Vec::with_capacity(8);
    msg.extend_from_slice(&request_header(instance_id, pldm_type::FRU, fru::GET_FRU_RECORD_TABLE));
    msg.extend_from_slice(&data_transfer_handle.to_le_bytes());
    msg.push(transfer_op);
    msg
}

/// GetPDRRepositoryInfo response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PdrRepositoryInfo {
    pub change_count: u32,
    pub total_records: u32,
    pub repository_size: u32,
}

/// GetPDR response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetPdrResponse {
    pub next_record_handle: u32,
    pub next_data_transfer_handle: u32,
    pub transfer_flag: u8,
    pub response_count: u16,
    pub record_data: Vec<u8>,
}

/// GetFRURecordTableMetadata response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FruTableMetadata {
    pub major_version: u8,
    pub minor_version: u8,
    pub max_table_size: u32,
    pub table_length: u32,
    pub record_set_count: u16,
    pub record_count: u16,
    pub table_crc32: u32,
}

impl FruTableMetadata {
    /// Whether the endpoint claims to hold any inventory data
    pub fn has_data(&self) -> bool {
        self.record_count > 0 || self.table_length > 0
    }
}

/// One GetFRURecordTable response part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FruTablePart {
    pub next_data_transfer_handle: u32,
    pub transfer_flag: u8,
    pub data: Vec<u8>,
}

fn check_completion(payload: &[u8]) -> Result<(), CommandError> {
    match payload.first() {
        None => Err(CommandError::ShortPayload { expected: 1, actual: 0 }),
        Some(&completion::SUCCESS) => Ok(()),
        Some(&cc) => Err(CommandError::CompletionCode(cc)),
    }
}

fn check_len(payload: &[u8], expected: usize) -> Result<(), CommandError> {
    if payload.len() < expected {
        return Err(CommandError::ShortPayload { expected, actual: payload.len() });
    }
    Ok(())
}

fn le_u16(b: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([b[at], b[at + 1]])
}

fn le_u32(b: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

pub fn decode_pdr_repository_info(payload: &[u8]) -> Result<PdrRepositoryInfo, CommandError> {
    check_completion(payload)?;
    check_len(payload, 13)?;
    Ok(PdrRepositoryInfo {
        change_count: le_u32(payload, 1),
        total_records: le_u32(payload, 5),
        repository_size: le_u32(payload, 9),
    })
}

pub fn decode_get_pdr(payload: &[u8]) -> Result<GetPdrResponse, CommandError> {
    check_completion(payload)?;
    check_len(payload, 12)?;
    let response_count = le_u16(payload, 10);
    let end = (12 + response_count as usize).min(payload.len());
    Ok(GetPdrResponse {
        next_record_handle: le_u32(payload, 1),
        next_data_transfer_handle: le_u32(payload, 5),
        transfer_flag: payload[9],
        response_count,
        record_data: payload[12..end].to_vec(),
    })
}

pub fn decode_fru_metadata(payload: &[u8]) -> Result<FruTableMetadata, CommandError> {
    check_completion(payload)?;
    check_len(payload, 19)?;
    Ok(FruTableMetadata {
        major_version: payload[1],
        minor_version: payload[2],
        max_table_size: le_u32(payload, 3),
        table_length: le_u32(payload, 7),
        record_set_count: le_u16(payload, 11),
        record_count: le_u16(payload, 13),
        table_crc32: le_u32(payload, 15),
    })
}

pub fn decode_fru_table_part(payload: &[u8]) -> Result<FruTablePart, CommandError> {
    check_completion(payload)?;
    check_len(payload, 6)?;
    Ok(FruTablePart {
        next_data_transfer_handle: le_u32(payload, 1),
        transfer_flag: payload[5],
        data: payload[6..].to_vec(),
    })
}
