//! FRU record table parsing (DSP0257)
//!
//! A table is a run of records, each a 5-byte header (record set id, record
//! type, field count, string encoding) followed by type/length/value fields.
//! Parsing reports how many bytes the records actually occupied so callers
//! can cut off padding and trailing check bytes.

use chrono::{NaiveDate, SecondsFormat, TimeZone, Utc};
use serde::Serialize;

/// Record type for vendor-defined records
pub const RECORD_TYPE_OEM: u8 = 254;

/// Field type carrying a manufacture timestamp in general records
pub const FIELD_MANUFACTURE_DATE: u8 = 6;
/// Field type carrying a vendor IANA number in general records
pub const FIELD_VENDOR_IANA: u8 = 15;
/// Field type carrying a vendor IANA number in OEM records
pub const FIELD_OEM_VENDOR_IANA: u8 = 1;

const RECORD_HEADER_LEN: usize = 5;
const TIMESTAMP104_LEN: usize = 13;

/// One record from the table
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FruRecord {
    pub record_set_id: u16,
    pub record_type: u8,
    /// Declared field count; `fields` may be shorter if the table was cut
    pub field_count: u8,
    pub encoding: u8,
    pub fields: Vec<FruField>,
}

impl FruRecord {
    /// First field of the given type
    pub fn field(&self, field_type: u8) -> Option<&FruField> {
        self.fields.iter().find(|f| f.field_type == field_type)
    }
}

/// One type/length/value field
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FruField {
    pub field_type: u8,
    pub type_name: String,
    /// Declared length, which may exceed the bytes actually present
    pub length: u8,
    pub format: FieldFormat,
    pub value: FieldValue,
    pub raw_hex: String,
}

/// How a field's bytes were interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FieldFormat {
    #[serde(rename = "uint32")]
    Uint32,
    #[serde(rename = "timestamp104")]
    Timestamp104,
    #[serde(rename = "strASCII")]
    Ascii,
    #[serde(rename = "strUTF-8")]
    Utf8,
    #[serde(rename = "strUTF-16")]
    Utf16,
    #[serde(rename = "strUTF-16LE")]
    Utf16Le,
    #[serde(rename = "strUTF-16BE")]
    Utf16Be,
    #[serde(rename = "octetArray")]
    Octets,
}

/// Interpreted field value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Uint32(u32),
    Timestamp(Timestamp104),
    Text(String),
    /// Lowercase hex of the raw bytes
    Octets(String),
}

/// Decoded `timestamp104` manufacture date
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Timestamp104 {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    /// RFC 3339 UTC rendering, absent when the components are out of range
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iso8601: Option<String>,
}

impl Timestamp104 {
    fn from_bytes(b: &[u8]) -> Self {
        let year = u16::from_le_bytes([b[0], b[1]]);
        let (month, day, hour, minute, second) = (b[2], b[3], b[4], b[5], b[6]);

        let iso8601 = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
            .and_then(|d| d.and_hms_opt(hour as u32, minute as u32, second as u32))
            .map(|dt| Utc.from_utc_datetime(&dt).to_rfc3339_opts(SecondsFormat::Secs, true));

        Self {
            year,
            month,
            day,
            hour,
            minute,
            second,
            iso8601,
        }
    }
}

/// DSP0257 Table 5 field names
pub fn field_type_name(record_type: u8, field_type: u8) -> String {
    if record_type == RECORD_TYPE_OEM {
        return if field_type == FIELD_OEM_VENDOR_IANA {
            "Vendor IANA".to_string()
        } else {
            "OEM-defined".to_string()
        };
    }

    let name = match field_type {
        1 => "Chassis Type",
        2 => "Model",
        3 => "Part Number",
        4 => "Serial Number",
        5 => "Manufacturer",
        6 => "Manufacture Date",
        7 => "Vendor",
        8 => "Name",
        9 => "SKU",
        10 => "Version",
        11 => "Asset Tag",
        12 => "Description",
        13 => "Engineering Change Level",
        14 => "Other Information",
        15 => "Vendor IANA",
        16 => "Spare Part Number",
        _ => "Reserved",
    };
    name.to_string()
}

fn text_format(encoding: u8) -> Option<FieldFormat> {
    match encoding {
        1 => Some(FieldFormat::Ascii),
        2 => Some(FieldFormat::Utf8),
        3 => Some(FieldFormat::Utf16),
        4 => Some(FieldFormat::Utf16Le),
        5 => Some(FieldFormat::Utf16Be),
        _ => None,
    }
}

fn utf16(bytes: &[u8], big_endian: bool) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| {
            if big_endian {
                u16::from_be_bytes([c[0], c[1]])
            } else {
                u16::from_le_bytes([c[0], c[1]])
            }
        })
        .collect();
    String::from_utf16_lossy(&units)
}

fn decode_text(format: FieldFormat, bytes: &[u8]) -> String {
    match format {
        FieldFormat::Ascii => bytes
            .iter()
            .map(|&b| if b.is_ascii() { b as char } else { char::REPLACEMENT_CHARACTER })
            .collect(),
        FieldFormat::Utf16 => match bytes {
            [0xFF, 0xFE, rest @ ..] => utf16(rest, false),
            [0xFE, 0xFF, rest @ ..] => utf16(rest, true),
            _ => utf16(bytes, false),
        },
        FieldFormat::Utf16Le => utf16(bytes, false),
        FieldFormat::Utf16Be => utf16(bytes, true),
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

fn interpret(record_type: u8, encoding: u8, field_type: u8, bytes: &[u8]) -> (FieldFormat, FieldValue) {
    let octets = || (FieldFormat::Octets, FieldValue::Octets(hex::encode(bytes)));
    let uint32 = || {
        if bytes.len() == 4 {
            let v = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            (FieldFormat::Uint32, FieldValue::Uint32(v))
        } else {
            octets()
        }
    };

    if record_type == RECORD_TYPE_OEM {
        return if field_type == FIELD_OEM_VENDOR_IANA {
            uint32()
        } else {
            octets()
        };
    }

    match field_type {
        FIELD_VENDOR_IANA => uint32(),
        FIELD_MANUFACTURE_DATE if bytes.len() == TIMESTAMP104_LEN => (
            FieldFormat::Timestamp104,
            FieldValue::Timestamp(Timestamp104::from_bytes(bytes)),
        ),
        1..=5 | 7..=14 | 16 => match text_format(encoding) {
            Some(format) => (format, FieldValue::Text(decode_text(format, bytes))),
            None => octets(),
        },
        _ => octets(),
    }
}

/// Parse records from `data`, reading no further than `total_length`.
///
/// Returns the records and the number of bytes they occupied. Field values
/// that run past the bound are clamped to it.
pub fn parse_record_table(data: &[u8], total_length: Option<usize>) -> (Vec<FruRecord>, usize) {
    let end = total_length.map_or(data.len(), |n| n.min(data.len()));
    let mut records = Vec::new();
    let mut offset = 0;

    while offset + RECORD_HEADER_LEN <= end {
        let record_set_id = u16::from_le_bytes([data[offset], data[offset + 1]]);
        let record_type = data[offset + 2];
        let field_count = data[offset + 3];
        let encoding = data[offset + 4];
        offset += RECORD_HEADER_LEN;

        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            if offset + 2 > end {
                break;
            }
            let field_type = data[offset];
            let length = data[offset + 1];
            offset += 2;

            let value_end = (offset + length as usize).min(end);
            let bytes = &data[offset..value_end];
            offset = value_end;

            let (format, value) = interpret(record_type, encoding, field_type, bytes);
            fields.push(FruField {
                field_type,
                type_name: field_type_name(record_type, field_type),
                length,
                format,
                value,
                raw_hex: hex::encode(bytes),
            });
        }

        records.push(FruRecord {
            record_set_id,
            record_type,
            field_count,
            encoding,
            fields,
        });
    }

    (records, offset)
}

/// Length to keep from an assembled table.
///
/// The parsed byte count wins when nonzero; otherwise a nonzero declared
/// length the data can satisfy; otherwise everything.
pub fn trimmed_table_len(data: &[u8], declared: usize) -> usize {
    let (_, consumed) = parse_record_table(data, None);
    if consumed > 0 {
        consumed
    } else if declared > 0 && data.len() >= declared {
        declared
    } else {
        data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn general_record() -> Vec<u8> {
        let mut t = vec![0x01, 0x00, 0x01, 0x04, 0x01];
        t.extend_from_slice(&[2, 5]);
        t.extend_from_slice(b"PX-01");
        t.extend_from_slice(&[4, 4]);
        t.extend_from_slice(b"S123");
        t.extend_from_slice(&[15, 4, 0x39, 0x30, 0x00, 0x00]);
        t.extend_from_slice(&[6, 13, 0xE8, 0x07, 3, 14, 9, 30, 5, 0, 0, 0, 0, 0, 0]);
        t
    }

    #[test]
    fn test_parse_general_record() {
        let table = general_record();
        let (records, consumed) = parse_record_table(&table, None);

        assert_eq!(consumed, table.len());
        assert_eq!(records.len(), 1);
        let rec = &records[0];
        assert_eq!(rec.record_set_id, 1);
        assert_eq!(rec.fields.len(), 4);

        let model = rec.field(2).unwrap();
        assert_eq!(model.type_name, "Model");
        assert_eq!(model.format, FieldFormat::Ascii);
        assert_eq!(model.value, FieldValue::Text("PX-01".to_string()));

        let iana = rec.field(FIELD_VENDOR_IANA).unwrap();
        assert_eq!(iana.value, FieldValue::Uint32(12345));

        match &rec.field(FIELD_MANUFACTURE_DATE).unwrap().value {
            FieldValue::Timestamp(ts) => {
                assert_eq!(ts.year, 2024);
                assert_eq!(ts.iso8601.as_deref(), Some("2024-03-14T09:30:05Z"));
            }
            other => panic!("unexpected value {other:?}"),
        }
    }

    #[test]
    fn test_invalid_timestamp_has_no_iso() {
        let mut t = vec![0x01, 0x00, 0x01, 0x01, 0x01];
        t.extend_from_slice(&[6, 13, 0xE8, 0x07, 13, 40, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        let (records, _) = parse_record_table(&t, None);
        match &records[0].fields[0].value {
            FieldValue::Timestamp(ts) => assert!(ts.iso8601.is_none()),
            other => panic!("unexpected value {other:?}"),
        }
    }

    #[test]
    fn test_oem_record() {
        let t = [0x02, 0x00, RECORD_TYPE_OEM, 0x02, 0x01, 1, 4, 0xAA, 0x00, 0x00, 0x00, 2, 2, 0xDE, 0xAD];
        let (records, consumed) = parse_record_table(&t, None);
        assert_eq!(consumed, t.len());

        let rec = &records[0];
        assert_eq!(rec.fields[0].type_name, "Vendor IANA");
        assert_eq!(rec.fields[0].value, FieldValue::Uint32(0xAA));
        assert_eq!(rec.fields[1].type_name, "OEM-defined");
        assert_eq!(rec.fields[1].value, FieldValue::Octets("dead".to_string()));
    }

    #[test]
    fn test_text_encodings() {
        assert_eq!(decode_text(FieldFormat::Utf16Le, &[0x41, 0x00, 0x42, 0x00]), "AB");
        assert_eq!(decode_text(FieldFormat::Utf16Be, &[0x00, 0x41]), "A");
        assert_eq!(decode_text(FieldFormat::Utf16, &[0xFE, 0xFF, 0x00, 0x41]), "A");
        assert_eq!(decode_text(FieldFormat::Utf16, &[0x41, 0x00]), "A");
        assert_eq!(decode_text(FieldFormat::Ascii, &[0x41, 0xC0]), "A\u{FFFD}");
    }

    #[test]
    fn test_unspecified_encoding_is_octets() {
        let t = [0x01, 0x00, 0x01, 0x01, 0x00, 2, 2, b'h', b'i'];
        let (records, _) = parse_record_table(&t, None);
        assert_eq!(records[0].fields[0].format, FieldFormat::Octets);
        assert_eq!(records[0].fields[0].value, FieldValue::Octets("6869".to_string()));
    }

    #[test]
    fn test_value_clamped_to_bound() {
        let t = [0x01, 0x00, 0x01, 0x01, 0x01, 2, 10, b'A', b'B'];
        let (records, consumed) = parse_record_table(&t, None);
        assert_eq!(consumed, t.len());
        assert_eq!(records[0].fields[0].length, 10);
        assert_eq!(records[0].fields[0].value, FieldValue::Text("AB".to_string()));
    }

    #[test]
    fn test_total_length_bounds_parse() {
        let mut t = general_record();
        let real = t.len();
        t.extend_from_slice(&[0x11, 0x22, 0x33, 0x44]);
        let (records, consumed) = parse_record_table(&t, Some(real));
        assert_eq!(records.len(), 1);
        assert_eq!(consumed, real);
    }

    #[test]
    fn test_trimmed_table_len() {
        let mut t = vec![0x01, 0x00, 0x01, 0x01, 0x01, 0x02, 0x03, b'A', b'C', b'M'];
        t.extend_from_slice(&[0, 0, 0]);
        assert_eq!(trimmed_table_len(&t, 0), 10);
        assert_eq!(trimmed_table_len(&t, 12), 10);

        // Too short for any record header
        assert_eq!(trimmed_table_len(&[1, 2, 3], 2), 2);
        assert_eq!(trimmed_table_len(&[1, 2, 3], 8), 3);
        assert_eq!(trimmed_table_len(&[], 0), 0);
    }

    #[test]
    fn test_serialized_shape() {
        let (records, _) = parse_record_table(&general_record(), None);
        let json = serde_json::to_value(&records[0]).unwrap();
        assert_eq!(json["recordSetId"], 1);
        assert_eq!(json["fields"][0]["format"], "strASCII");
        assert_eq!(json["fields"][2]["value"], 12345);
        assert_eq!(json["fields"][3]["value"]["iso8601"], "2024-03-14T09:30:05Z");
    }
}
