//! One-shot device inspection
//!
//! Reads everything a device exposes over PLDM and renders it as one JSON
//! document. A failing stage is reported in place and the remaining stages
//! still run.

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use pldm_core::{decode_all, parse_record_table};
use pldm_mctp::{FruOptions, Requester, Transport, WalkOptions};
use serde_json::{json, Value};
use tracing::{info, warn};

fn stage_error(stage: &str, e: impl std::fmt::Display) -> Value {
    warn!(stage, error = %e, "Inspection stage failed");
    json!({ "error": e.to_string() })
}

/// Read repository, descriptor records and FRU table from one device.
pub fn inspect<T: Transport>(device: &str, transport: T, walk: &WalkOptions, fru: &FruOptions) -> Value {
    let mut requester = Requester::new(transport);
    info!(device, "Inspecting device");

    let repository = match requester.get_pdr_repository_info() {
        Ok(info) => json!(info),
        Err(e) => stage_error("repository", e),
    };

    let pdr_records = match requester.walk_repository(walk) {
        Ok(records) => {
            let raw: Vec<&[u8]> = records.iter().map(|r| r.data.as_slice()).collect();
            json!(decode_all(&raw))
        }
        Err(e) => stage_error("pdr", e),
    };

    let (fru_metadata, fru_records, raw_fru_data) = match requester.read_inventory(fru) {
        Ok(read) => {
            let (records, consumed) = parse_record_table(&read.table, None);
            info!(
                device,
                records = records.len(),
                consumed,
                len = read.table.len(),
                "Parsed FRU table"
            );
            (
                json!(read.metadata),
                json!(records),
                json!(BASE64_STANDARD.encode(&read.table)),
            )
        }
        Err(e) => (stage_error("fru", e), Value::Array(Vec::new()), Value::Null),
    };

    json!({
        "device": device,
        "repository": repository,
        "pdrRecords": pdr_records,
        "fruMetadata": fru_metadata,
        "fruRecords": fru_records,
        "rawFruData": raw_fru_data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    /// Device that never answers
    struct Silent;

    impl Transport for Silent {
        fn exchange(&mut self, _request: &[u8]) -> io::Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_inspect_reports_stage_errors() {
        let walk = WalkOptions {
            retries: 1,
            retry_delay: std::time::Duration::ZERO,
            ..Default::default()
        };
        let doc = inspect("/dev/ttyUSB0", Silent, &walk, &FruOptions::default());

        assert_eq!(doc["device"], "/dev/ttyUSB0");
        assert!(doc["repository"]["error"].is_string());
        assert!(doc["pdrRecords"]["error"].is_string());
        assert!(doc["fruMetadata"]["error"].is_string());
        assert_eq!(doc["fruRecords"], json!([]));
        assert!(doc["rawFruData"].is_null());
    }
}
