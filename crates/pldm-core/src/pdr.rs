//! Platform Descriptor Record decoding (DSP0248)
//!
//! Decoding is two-phase. [`collect_state_sets`] scans a whole repository for
//! OEM State Set records and builds the lookup table that state sensor and
//! state effecter records resolve names through. [`decode`] is then a pure
//! function of one record and that table, so retrieval order never matters.

use crate::names::{self, StateSet};
use crate::units::{self, AuxRelationship, UnitSpec};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Common header length
pub const HEADER_LEN: usize = 10;

/// PDR type codes with dedicated decoders
pub mod pdr_type {
    pub const TERMINUS_LOCATOR: u8 = 1;
    pub const NUMERIC_SENSOR: u8 = 2;
    pub const STATE_SENSOR: u8 = 4;
    pub const OEM_STATE_SET: u8 = 8;
    pub const NUMERIC_EFFECTER: u8 = 9;
    pub const STATE_EFFECTER: u8 = 11;
    pub const ENTITY_ASSOCIATION: u8 = 15;
    pub const ENTITY_AUXILIARY_NAMES: u8 = 16;
    pub const OEM_ENTITY_ID: u8 = 17;
    pub const FRU_RECORD_SET: u8 = 20;
    pub const COMPACT_NUMERIC_SENSOR: u8 = 21;
}

/// Shortest record (header included) each decoder accepts; shorter records
/// decode to the header alone.
fn min_record_len(pdr_type: u8) -> Option<usize> {
    Some(match pdr_type {
        pdr_type::TERMINUS_LOCATOR => 18,
        pdr_type::NUMERIC_SENSOR => 20,
        pdr_type::STATE_SENSOR => 25,
        pdr_type::OEM_STATE_SET => 22,
        pdr_type::NUMERIC_EFFECTER => 44,
        pdr_type::STATE_EFFECTER => 27,
        pdr_type::ENTITY_ASSOCIATION => 25,
        pdr_type::ENTITY_AUXILIARY_NAMES => 13,
        pdr_type::OEM_ENTITY_ID => 19,
        pdr_type::FRU_RECORD_SET => 20,
        pdr_type::COMPACT_NUMERIC_SENSOR => 20,
        _ => return None,
    })
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("PDR too short: {0} bytes")]
    ShortHeader(usize),

    #[error("Field at offset {offset} needs {len} bytes, only {available} in record body")]
    OutOfBounds {
        offset: usize,
        len: usize,
        available: usize,
    },
}

/// Little-endian reader over a record body
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn at(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    fn fits(&self, len: usize) -> bool {
        self.pos.checked_add(len).is_some_and(|end| end <= self.data.len())
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if !self.fits(len) {
            return Err(DecodeError::OutOfBounds {
                offset: self.pos,
                len,
                available: self.data.len(),
            });
        }
        let out = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn i8(&mut self) -> Result<i8, DecodeError> {
        Ok(self.u8()? as i8)
    }

    fn bool(&mut self) -> Result<bool, DecodeError> {
        Ok(self.u8()? != 0)
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn f32(&mut self) -> Result<f32, DecodeError> {
        Ok(f32::from_le_bytes(self.array()?))
    }

    /// Byte at the cursor or zero past the end; advances either way.
    fn u8_or_zero(&mut self) -> u8 {
        let v = self.data.get(self.pos).copied().unwrap_or(0);
        self.pos += 1;
        v
    }

    /// Typed value that is simply absent (cursor unmoved) when it does not fit.
    fn typed(&mut self, format: Option<NumericFormat>) -> Option<NumericValue> {
        let format = format?;
        let b = self.take(format.size()).ok()?;
        Some(format.read(b))
    }

    fn entity(&mut self) -> Result<EntityId, DecodeError> {
        let entity_type = self.u16()?;
        Ok(EntityId {
            entity_type,
            entity_type_name: names::entity_type_name(entity_type),
            entity_instance_number: self.u16()?,
            container_id: self.u16()?,
        })
    }

    fn rest(&self) -> &'a [u8] {
        self.data.get(self.pos..).unwrap_or(&[])
    }
}

/// Wire format of a variable-width numeric field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericFormat {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
    U64,
    I64,
}

impl NumericFormat {
    /// Sensor/effecter data size enumeration
    pub fn from_data_size(value: u8) -> Option<Self> {
        use NumericFormat::*;
        [U8, I8, U16, I16, U32, I32, U64, I64].get(value as usize).copied()
    }

    /// Range field format enumeration
    pub fn from_range_format(value: u8) -> Option<Self> {
        use NumericFormat::*;
        [U8, I8, U16, I16, U32, I32, F32, U64, I64].get(value as usize).copied()
    }

    fn size(self) -> usize {
        use NumericFormat::*;
        match self {
            U8 | I8 => 1,
            U16 | I16 => 2,
            U32 | I32 | F32 => 4,
            U64 | I64 => 8,
        }
    }

    fn read(self, b: &[u8]) -> NumericValue {
        use NumericFormat::*;
        match self {
            U8 => NumericValue::Unsigned(b[0] as u64),
            I8 => NumericValue::Signed(b[0] as i8 as i64),
            U16 => NumericValue::Unsigned(u16::from_le_bytes([b[0], b[1]]) as u64),
            I16 => NumericValue::Signed(i16::from_le_bytes([b[0], b[1]]) as i64),
            U32 => NumericValue::Unsigned(u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as u64),
            I32 => NumericValue::Signed(i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as i64),
            F32 => NumericValue::Real(f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            U64 => NumericValue::Unsigned(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])),
            I64 => NumericValue::Signed(i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NumericValue {
    Unsigned(u64),
    Signed(i64),
    Real(f32),
}

/// OEM state sets keyed by their OEM state set id handle
pub type StateSetMap = BTreeMap<u16, StateSet>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PdrHeader {
    pub record_handle: u32,
    pub pdr_header_version: u8,
    pub pdr_type: u8,
    pub record_change_number: u16,
    pub record_length: u16,
}

impl PdrHeader {
    pub fn parse(record: &[u8]) -> Result<Self, DecodeError> {
        if record.len() < HEADER_LEN {
            return Err(DecodeError::ShortHeader(record.len()));
        }
        let mut c = Cursor::new(record);
        Ok(Self {
            record_handle: c.u32()?,
            pdr_header_version: c.u8()?,
            pdr_type: c.u8()?,
            record_change_number: c.u16()?,
            record_length: c.u16()?,
        })
    }
}

/// One decoded record
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedPdr {
    #[serde(flatten)]
    pub header: PdrHeader,
    pub pdr_type_name: String,
    /// Absent for types without a decoder and for records below the type's minimum length
    #[serde(flatten)]
    pub body: Option<PdrBody>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PdrBody {
    TerminusLocator(TerminusLocator),
    NumericSensor(Box<NumericSensor>),
    StateSensor(StateSensor),
    OemStateSet(OemStateSet),
    NumericEffecter(Box<NumericEffecter>),
    StateEffecter(StateEffecter),
    EntityAssociation(EntityAssociation),
    EntityAuxiliaryNames(EntityAuxiliaryNames),
    OemEntityId(OemEntityId),
    FruRecordSet(FruRecordSet),
    CompactNumericSensor(CompactNumericSensor),
}

/// Entity type, instance and container triple
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityId {
    pub entity_type: u16,
    pub entity_type_name: String,
    pub entity_instance_number: u16,
    pub container_id: u16,
}

/// An ASCII language tag with an optional UTF-16BE name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalizedName {
    pub language_tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

fn utf16_be(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

fn ascii(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| if b.is_ascii() { b as char } else { char::REPLACEMENT_CHARACTER })
        .collect()
}

/// Up to `count` NUL-terminated language tags each followed by a
/// double-NUL-terminated UTF-16BE name. Stops at the first string that has
/// no terminator.
fn localized_names(c: &mut Cursor<'_>, count: u8) -> Vec<LocalizedName> {
    let body = c.data;
    let mut out = Vec::new();

    for _ in 0..count {
        if c.pos >= body.len() {
            break;
        }
        let Some(tag_len) = body[c.pos..].iter().position(|&b| b == 0) else {
            break;
        };
        let language_tag = ascii(&body[c.pos..c.pos + tag_len]);
        c.pos += tag_len + 1;

        let start = c.pos;
        let mut end = start;
        while end + 1 < body.len() && !(body[end] == 0 && body[end + 1] == 0) {
            end += 2;
        }

        if end + 1 < body.len() {
            out.push(LocalizedName {
                language_tag,
                name: Some(utf16_be(&body[start..end])),
            });
            c.pos = end + 2;
        } else {
            out.push(LocalizedName {
                language_tag,
                name: None,
            });
            break;
        }
    }

    out
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum LocatorValue {
    Uid {
        terminus_instance: u8,
        device_uid: Uuid,
    },
    MctpEid {
        eid: u8,
    },
    SmBusRelative {
        uid: Uuid,
        bus_number: u8,
        slave_address: u8,
    },
    SystemSoftware {
        software_class: u8,
        software_class_name: String,
        uuid: Uuid,
    },
}

fn uuid_at(b: &[u8]) -> Uuid {
    let mut raw = [0u8; 16];
    raw.copy_from_slice(&b[..16]);
    Uuid::from_bytes(raw)
}

impl LocatorValue {
    fn parse(locator_type: u8, v: &[u8]) -> Option<Self> {
        match locator_type {
            0 if v.len() >= 17 => Some(Self::Uid {
                terminus_instance: v[0],
                device_uid: uuid_at(&v[1..]),
            }),
            1 if !v.is_empty() => Some(Self::MctpEid { eid: v[0] }),
            2 if v.len() >= 18 => Some(Self::SmBusRelative {
                uid: uuid_at(v),
                bus_number: v[16],
                slave_address: v[17],
            }),
            3 if v.len() >= 17 => Some(Self::SystemSoftware {
                software_class: v[0],
                software_class_name: names::software_class_name(v[0]),
                uuid: uuid_at(&v[1..]),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminusLocator {
    pub terminus_handle: u16,
    pub validity: u8,
    pub validity_name: String,
    pub tid: u8,
    pub container_id: u16,
    pub terminus_locator_type: u8,
    pub terminus_locator_type_name: String,
    pub terminus_locator_value_size: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminus_locator_value: Option<LocatorValue>,
    /// Raw locator bytes when the type is unknown or the value is short
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminus_locator_value_hex: Option<String>,
}

fn decode_terminus_locator(c: &mut Cursor<'_>) -> Result<TerminusLocator, DecodeError> {
    let terminus_handle = c.u16()?;
    let validity = c.u8()?;
    let tid = c.u8()?;
    let container_id = c.u16()?;
    let locator_type = c.u8()?;
    let value_size = c.u8()?;

    let rest = c.rest();
    let value = &rest[..(value_size as usize).min(rest.len())];
    let parsed = LocatorValue::parse(locator_type, value);

    Ok(TerminusLocator {
        terminus_handle,
        validity,
        validity_name: names::validity_name(validity),
        tid,
        container_id,
        terminus_locator_type: locator_type,
        terminus_locator_type_name: names::locator_type_name(locator_type),
        terminus_locator_value_size: value_size,
        terminus_locator_value_hex: parsed.is_none().then(|| hex::encode(value)),
        terminus_locator_value: parsed,
    })
}

/// DSP0248 supportedThresholds bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdSupport {
    pub upper_threshold_warning: bool,
    pub upper_threshold_critical: bool,
    pub upper_threshold_fatal: bool,
    pub lower_threshold_warning: bool,
    pub lower_threshold_critical: bool,
    pub lower_threshold_fatal: bool,
}

impl ThresholdSupport {
    pub fn from_bits(b: u8) -> Self {
        Self {
            upper_threshold_warning: b & 0x01 != 0,
            upper_threshold_critical: b & 0x02 != 0,
            upper_threshold_fatal: b & 0x04 != 0,
            lower_threshold_warning: b & 0x08 != 0,
            lower_threshold_critical: b & 0x10 != 0,
            lower_threshold_fatal: b & 0x20 != 0,
        }
    }
}

/// DSP0248 thresholdAndHysteresisVolatility bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdVolatility {
    pub init_agent_restart: bool,
    pub subsystem_power_up: bool,
    pub hard_reset: bool,
    pub warm_reset: bool,
    pub terminus_online: bool,
}

impl ThresholdVolatility {
    pub fn from_bits(b: u8) -> Self {
        Self {
            init_agent_restart: b & 0x01 != 0,
            subsystem_power_up: b & 0x02 != 0,
            hard_reset: b & 0x04 != 0,
            warm_reset: b & 0x10 != 0,
            terminus_online: b & 0x20 != 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorRangeSupport {
    pub nominal_value_supported: bool,
    pub normal_max_supported: bool,
    pub normal_min_supported: bool,
    pub critical_high_supported: bool,
    pub critical_low_supported: bool,
    pub fatal_high_supported: bool,
    pub fatal_low_supported: bool,
}

impl SensorRangeSupport {
    pub fn from_bits(b: u8) -> Self {
        Self {
            nominal_value_supported: b & 0x01 != 0,
            normal_max_supported: b & 0x02 != 0,
            normal_min_supported: b & 0x04 != 0,
            critical_high_supported: b & 0x08 != 0,
            critical_low_supported: b & 0x10 != 0,
            fatal_high_supported: b & 0x20 != 0,
            fatal_low_supported: b & 0x40 != 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EffecterRangeSupport {
    pub nominal_value_supported: bool,
    pub normal_max_supported: bool,
    pub normal_min_supported: bool,
    pub rated_max_supported: bool,
    pub rated_min_supported: bool,
}

impl EffecterRangeSupport {
    pub fn from_bits(b: u8) -> Self {
        Self {
            nominal_value_supported: b & 0x01 != 0,
            normal_max_supported: b & 0x02 != 0,
            normal_min_supported: b & 0x04 != 0,
            rated_max_supported: b & 0x08 != 0,
            rated_min_supported: b & 0x10 != 0,
        }
    }
}

/// Unit fields shared by numeric sensors and effecters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Units {
    pub base_unit: u8,
    pub base_unit_name: String,
    pub unit_modifier: i8,
    pub rate_unit: u8,
    pub rate_unit_name: String,
    pub base_oem_unit_handle: u8,
    pub aux_unit: u8,
    pub aux_unit_name: String,
    pub aux_unit_modifier: i8,
    pub aux_rate_unit: u8,
    pub aux_rate_unit_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aux_unit_relationship: Option<String>,
    pub aux_oem_unit_handle: u8,
    pub ucum_unit: String,
}

fn unit_name(code: u8) -> String {
    units::unit_name(code).map_or_else(|| names::unknown(code), str::to_string)
}

fn rate_name(code: u8) -> String {
    units::rate_name(code).map_or_else(|| names::unknown(code), str::to_string)
}

/// Numeric sensors carry a relationship byte between the aux rate and the
/// aux OEM handle; effecters do not and always multiply.
fn read_units(c: &mut Cursor<'_>, with_relationship: bool) -> Result<Units, DecodeError> {
    let base_unit = c.u8()?;
    let unit_modifier = c.i8()?;
    let rate_unit = c.u8()?;
    let base_oem_unit_handle = c.u8()?;
    let aux_unit = c.u8()?;
    let aux_unit_modifier = c.i8()?;
    let aux_rate_unit = c.u8()?;
    let rel = if with_relationship { Some(c.u8()?) } else { None };
    let aux_oem_unit_handle = c.u8()?;

    let relationship = match rel {
        Some(r) => AuxRelationship::from_wire(r),
        None => Some(AuxRelationship::MultipliedBy),
    };

    let ucum_unit = units::to_ucum(&UnitSpec {
        base_unit,
        unit_modifier,
        rate_unit,
        // An undefined relationship leaves nothing to combine the aux unit by
        aux_unit: if relationship.is_some() { aux_unit } else { 0 },
        aux_unit_modifier,
        relationship: relationship.unwrap_or(AuxRelationship::MultipliedBy),
        aux_rate_unit,
    });

    Ok(Units {
        base_unit,
        base_unit_name: unit_name(base_unit),
        unit_modifier,
        rate_unit,
        rate_unit_name: rate_name(rate_unit),
        base_oem_unit_handle,
        aux_unit,
        aux_unit_name: unit_name(aux_unit),
        aux_unit_modifier,
        aux_rate_unit,
        aux_rate_unit_name: rate_name(aux_rate_unit),
        aux_unit_relationship: rel.map(|r| match r {
            0 => "dividedBy".to_string(),
            1 => "multipliedBy".to_string(),
            other => names::unknown(other),
        }),
        aux_oem_unit_handle,
        ucum_unit,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NumericSensor {
    pub terminus_handle: u16,
    pub sensor_id: u16,
    #[serde(flatten)]
    pub entity: EntityId,
    pub sensor_init: u8,
    pub sensor_init_name: String,
    pub sensor_auxiliary_names_pdr: bool,
    #[serde(flatten)]
    pub units: Units,
    pub is_linear: bool,
    pub sensor_data_size: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensor_data_size_name: Option<&'static str>,
    pub resolution: Option<NumericValue>,
    pub offset: Option<NumericValue>,
    pub accuracy: u16,
    pub plus_tolerance: u8,
    pub minus_tolerance: u8,
    pub hysteresis: Option<NumericValue>,
    pub supported_thresholds: u8,
    pub supported_thresholds_flags: ThresholdSupport,
    pub threshold_volatility: u8,
    pub threshold_volatility_flags: ThresholdVolatility,
    pub state_transition_interval: Option<NumericValue>,
    pub update_interval: Option<NumericValue>,
    pub max_readable: Option<NumericValue>,
    pub min_readable: Option<NumericValue>,
    pub range_field_format: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range_field_format_name: Option<&'static str>,
    pub range_field_support: u8,
    pub range_field_support_flags: SensorRangeSupport,
    pub nominal_value: Option<NumericValue>,
    pub normal_max: Option<NumericValue>,
    pub normal_min: Option<NumericValue>,
    pub warning_high: Option<NumericValue>,
    pub warning_low: Option<NumericValue>,
    pub critical_high: Option<NumericValue>,
    pub critical_low: Option<NumericValue>,
    pub fatal_high: Option<NumericValue>,
    pub fatal_low: Option<NumericValue>,
}

fn decode_numeric_sensor(c: &mut Cursor<'_>) -> Result<NumericSensor, DecodeError> {
    let terminus_handle = c.u16()?;
    let sensor_id = c.u16()?;
    let entity = c.entity()?;
    let sensor_init = c.u8()?;
    let sensor_auxiliary_names_pdr = c.bool()?;
    let units = read_units(c, true)?;
    let is_linear = c.bool()?;
    let sensor_data_size = c.u8()?;
    let data_format = NumericFormat::from_data_size(sensor_data_size);

    let resolution = c.typed(Some(NumericFormat::F32));
    let offset = c.typed(Some(NumericFormat::F32));
    let accuracy = c.u16()?;
    let plus_tolerance = c.u8()?;
    let minus_tolerance = c.u8()?;
    let hysteresis = c.typed(data_format);
    let supported_thresholds = c.u8()?;
    let threshold_volatility = c.u8()?;
    let state_transition_interval = c.typed(Some(NumericFormat::F32));
    let update_interval = c.typed(Some(NumericFormat::F32));
    let max_readable = c.typed(data_format);
    let min_readable = c.typed(data_format);
    let range_field_format = c.u8()?;
    let range_field_support = c.u8()?;

    let range_format = NumericFormat::from_range_format(range_field_format);
    let mut range = [None; 9];
    if range_format.is_some() {
        for slot in range.iter_mut() {
            *slot = c.typed(range_format);
        }
    }
    let [nominal_value, normal_max, normal_min, warning_high, warning_low, critical_high, critical_low, fatal_high, fatal_low] =
        range;

    Ok(NumericSensor {
        terminus_handle,
        sensor_id,
        entity,
        sensor_init,
        sensor_init_name: names::sensor_init_name(sensor_init),
        sensor_auxiliary_names_pdr,
        units,
        is_linear,
        sensor_data_size,
        sensor_data_size_name: names::data_size_name(sensor_data_size),
        resolution,
        offset,
        accuracy,
        plus_tolerance,
        minus_tolerance,
        hysteresis,
        supported_thresholds,
        supported_thresholds_flags: ThresholdSupport::from_bits(supported_thresholds),
        threshold_volatility,
        threshold_volatility_flags: ThresholdVolatility::from_bits(threshold_volatility),
        state_transition_interval,
        update_interval,
        max_readable,
        min_readable,
        range_field_format,
        range_field_format_name: names::range_format_name(range_field_format),
        range_field_support,
        range_field_support_flags: SensorRangeSupport::from_bits(range_field_support),
        nominal_value,
        normal_max,
        normal_min,
        warning_high,
        warning_low,
        critical_high,
        critical_low,
        fatal_high,
        fatal_low,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NumericEffecter {
    pub terminus_handle: u16,
    pub effecter_id: u16,
    #[serde(flatten)]
    pub entity: EntityId,
    pub effecter_semantic_id: u16,
    pub effecter_init: u8,
    pub effecter_init_name: String,
    pub effecter_auxiliary_names_pdr: bool,
    #[serde(flatten)]
    pub units: Units,
    pub is_linear: bool,
    pub effecter_data_size: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effecter_data_size_name: Option<&'static str>,
    pub resolution: f32,
    pub offset: f32,
    pub accuracy: u16,
    pub plus_tolerance: u8,
    pub minus_tolerance: u8,
    pub state_transition_interval: f32,
    pub transition_interval: f32,
    pub max_settable: Option<NumericValue>,
    pub min_settable: Option<NumericValue>,
    pub range_field_format: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range_field_format_name: Option<&'static str>,
    pub range_field_support: u8,
    pub range_field_support_flags: EffecterRangeSupport,
    pub nominal_value: Option<NumericValue>,
    pub normal_max: Option<NumericValue>,
    pub normal_min: Option<NumericValue>,
    pub rated_max: Option<NumericValue>,
    pub rated_min: Option<NumericValue>,
}

fn decode_numeric_effecter(c: &mut Cursor<'_>) -> Result<NumericEffecter, DecodeError> {
    let terminus_handle = c.u16()?;
    let effecter_id = c.u16()?;
    let entity = c.entity()?;
    let effecter_semantic_id = c.u16()?;
    let effecter_init = c.u8()?;
    let effecter_auxiliary_names_pdr = c.bool()?;
    let units = read_units(c, false)?;
    let is_linear = c.bool()?;
    let effecter_data_size = c.u8()?;
    let data_format = NumericFormat::from_data_size(effecter_data_size);

    let resolution = c.f32()?;
    let offset = c.f32()?;
    let accuracy = c.u16()?;
    let plus_tolerance = c.u8()?;
    let minus_tolerance = c.u8()?;
    let state_transition_interval = c.f32()?;
    let transition_interval = c.f32()?;
    let max_settable = c.typed(data_format);
    let min_settable = c.typed(data_format);

    // Some firmware ends the record before the range fields
    let range_field_format = c.u8_or_zero();
    let range_field_support = c.u8_or_zero();

    let range_format = NumericFormat::from_range_format(range_field_format);
    let mut range = [None; 5];
    if range_format.is_some() {
        for slot in range.iter_mut() {
            *slot = c.typed(range_format);
        }
    }
    let [nominal_value, normal_max, normal_min, rated_max, rated_min] = range;

    Ok(NumericEffecter {
        terminus_handle,
        effecter_id,
        entity,
        effecter_semantic_id,
        effecter_init,
        effecter_init_name: names::effecter_init_name(effecter_init),
        effecter_auxiliary_names_pdr,
        units,
        is_linear,
        effecter_data_size,
        effecter_data_size_name: names::data_size_name(effecter_data_size),
        resolution,
        offset,
        accuracy,
        plus_tolerance,
        minus_tolerance,
        state_transition_interval,
        transition_interval,
        max_settable,
        min_settable,
        range_field_format,
        range_field_format_name: names::range_format_name(range_field_format),
        range_field_support,
        range_field_support_flags: EffecterRangeSupport::from_bits(range_field_support),
        nominal_value,
        normal_max,
        normal_min,
        rated_max,
        rated_min,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateValue {
    pub state_value: u16,
    pub state_name: String,
}

/// Possible states of one composite sensor or effecter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PossibleStates {
    pub state_set_id: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_set_name: Option<String>,
    pub possible_states_size: u8,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub possible_state_values: Vec<StateValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub possible_states_hex: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<&'static str>,
}

/// Name and value table for a state set, OEM sets first.
pub fn state_set_info(id: u16, state_sets: &StateSetMap) -> StateSet {
    if let Some(set) = state_sets.get(&id) {
        return set.clone();
    }
    names::standard_state_set(id).unwrap_or_else(|| StateSet {
        name: format!("Unknown State Set (0x{id:04x})"),
        values: BTreeMap::new(),
    })
}

/// Bit `n` of byte `k` marks state value `k * 8 + n + 1`.
fn possible_states(
    c: &mut Cursor<'_>,
    count: u8,
    state_sets: &StateSetMap,
    unavailable_note: &'static str,
) -> Vec<PossibleStates> {
    let mut out = Vec::new();

    for _ in 0..count {
        let (Ok(state_set_id), Ok(size)) = (c.u16(), c.u8()) else {
            break;
        };

        if size == 0 {
            out.push(PossibleStates {
                state_set_id,
                state_set_name: None,
                possible_states_size: 0,
                possible_state_values: Vec::new(),
                possible_states_hex: None,
                note: Some(unavailable_note),
            });
            continue;
        }

        let Ok(bitfield) = c.take(size as usize) else {
            break;
        };

        let set = state_set_info(state_set_id, state_sets);
        let mut values = Vec::new();
        for (byte_idx, byte) in bitfield.iter().enumerate() {
            for bit in 0..8 {
                if byte & (1 << bit) != 0 {
                    let state_value = (byte_idx * 8 + bit + 1) as u16;
                    let state_name = u8::try_from(state_value)
                        .ok()
                        .and_then(|v| set.values.get(&v).cloned())
                        .unwrap_or_else(|| format!("Unknown(0x{state_value:02x})"));
                    values.push(StateValue {
                        state_value,
                        state_name,
                    });
                }
            }
        }

        debug!(state_set_id, name = %set.name, count = values.len(), "Resolved possible states");

        out.push(PossibleStates {
            state_set_id,
            state_set_name: Some(set.name),
            possible_states_size: size,
            possible_state_values: values,
            possible_states_hex: Some(hex::encode(bitfield)),
            note: None,
        });
    }

    out
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSensor {
    pub terminus_handle: u16,
    pub sensor_id: u16,
    #[serde(flatten)]
    pub entity: EntityId,
    pub sensor_init: u8,
    pub sensor_init_name: String,
    pub sensor_auxiliary_names_pdr: bool,
    pub composite_sensor_count: u8,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub state_set_possible_states: Vec<PossibleStates>,
}

fn decode_state_sensor(c: &mut Cursor<'_>, state_sets: &StateSetMap) -> Result<StateSensor, DecodeError> {
    let terminus_handle = c.u16()?;
    let sensor_id = c.u16()?;
    let entity = c.entity()?;
    let sensor_init = c.u8()?;
    let sensor_auxiliary_names_pdr = c.bool()?;
    let composite_sensor_count = c.u8()?;

    Ok(StateSensor {
        terminus_handle,
        sensor_id,
        entity,
        sensor_init,
        sensor_init_name: names::sensor_init_name(sensor_init),
        sensor_auxiliary_names_pdr,
        composite_sensor_count,
        state_set_possible_states: possible_states(
            c,
            composite_sensor_count,
            state_sets,
            "Sensor unavailable or disabled",
        ),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateEffecter {
    pub terminus_handle: u16,
    pub effecter_id: u16,
    #[serde(flatten)]
    pub entity: EntityId,
    pub effecter_semantic_id: u16,
    pub effecter_init: u8,
    pub effecter_init_name: String,
    pub effecter_description_pdr: bool,
    pub composite_effecter_count: u8,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub state_set_possible_states: Vec<PossibleStates>,
}

fn decode_state_effecter(c: &mut Cursor<'_>, state_sets: &StateSetMap) -> Result<StateEffecter, DecodeError> {
    let terminus_handle = c.u16()?;
    let effecter_id = c.u16()?;
    let entity = c.entity()?;
    let effecter_semantic_id = c.u16()?;
    let effecter_init = c.u8()?;
    let effecter_description_pdr = c.bool()?;
    let composite_effecter_count = c.u8()?;

    Ok(StateEffecter {
        terminus_handle,
        effecter_id,
        entity,
        effecter_semantic_id,
        effecter_init,
        effecter_init_name: names::effecter_init_name(effecter_init),
        effecter_description_pdr,
        composite_effecter_count,
        state_set_possible_states: possible_states(
            c,
            composite_effecter_count,
            state_sets,
            "Effecter unavailable or disabled",
        ),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OemStateValueRecord {
    pub min_state_value: u8,
    pub max_state_value: u8,
    pub string_count: u8,
    pub state_names: Vec<LocalizedName>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OemStateSet {
    pub terminus_handle: u16,
    pub oem_state_set_id_handle: u16,
    pub vendor_iana: u32,
    pub oem_state_set_id: u16,
    pub unspecified_value_hint: String,
    pub state_count: u8,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub oem_state_value_records: Vec<OemStateValueRecord>,
}

impl OemStateSet {
    /// Value table this record defines, if it names any value.
    ///
    /// A value record with one name per value in its range maps each value
    /// to its own name; otherwise every value in the range takes the first.
    pub fn state_set(&self) -> Option<StateSet> {
        let mut values = BTreeMap::new();

        for rec in &self.oem_state_value_records {
            let (lo, hi) = (rec.min_state_value, rec.max_state_value);
            let span = hi as i32 - lo as i32 + 1;

            if rec.state_names.len() as i32 == span {
                for (v, n) in (lo..=hi).zip(&rec.state_names) {
                    if let Some(name) = &n.name {
                        values.insert(v, name.clone());
                    }
                }
            } else if let Some(name) = rec.state_names.first().and_then(|n| n.name.as_ref()) {
                for v in lo..=hi {
                    values.insert(v, name.clone());
                }
            }
        }

        (!values.is_empty()).then(|| StateSet {
            name: format!("OEM State Set {}", self.oem_state_set_id),
            values,
        })
    }
}

fn decode_oem_state_set(c: &mut Cursor<'_>) -> Result<OemStateSet, DecodeError> {
    let terminus_handle = c.u16()?;
    let oem_state_set_id_handle = c.u16()?;
    let vendor_iana = c.u32()?;
    let oem_state_set_id = c.u16()?;
    let hint = c.u8()?;
    let state_count = c.u8()?;

    let mut records = Vec::new();
    for _ in 0..state_count {
        let (Ok(min_state_value), Ok(max_state_value), Ok(string_count)) = (c.u8(), c.u8(), c.u8()) else {
            break;
        };
        records.push(OemStateValueRecord {
            min_state_value,
            max_state_value,
            string_count,
            state_names: localized_names(c, string_count),
        });
    }

    Ok(OemStateSet {
        terminus_handle,
        oem_state_set_id_handle,
        vendor_iana,
        oem_state_set_id,
        unspecified_value_hint: names::unspecified_value_hint_name(hint),
        state_count,
        oem_state_value_records: records,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityAssociation {
    pub container_id: u16,
    pub association_type: u8,
    pub association_type_name: String,
    pub container_entity: EntityId,
    pub number_of_contained_entities: u8,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub contained_entities: Vec<EntityId>,
}

fn decode_entity_association(c: &mut Cursor<'_>) -> Result<EntityAssociation, DecodeError> {
    let container_id = c.u16()?;
    let association_type = c.u8()?;
    let container_entity = c.entity()?;
    let count = c.u8()?;

    let mut contained = Vec::new();
    for _ in 0..count {
        let Ok(e) = c.entity() else { break };
        contained.push(e);
    }

    Ok(EntityAssociation {
        container_id,
        association_type,
        association_type_name: names::association_type_name(association_type),
        container_entity,
        number_of_contained_entities: count,
        contained_entities: contained,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityAuxiliaryNames {
    pub entity_type: u16,
    pub entity_type_name: String,
    pub entity_instance_number: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_name_language_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_name: Option<String>,
}

fn decode_entity_auxiliary_names(c: &mut Cursor<'_>) -> Result<EntityAuxiliaryNames, DecodeError> {
    let entity_type = c.u16()?;
    let entity_instance_number = c.u16()?;

    // Fixed 6-byte language tag, then the UTF-16BE name to the end
    let rest = c.rest();
    let tag = (!rest.is_empty()).then(|| ascii(&rest[..rest.len().min(6)]).trim_end_matches('\0').to_string());
    let name = (rest.len() > 6).then(|| utf16_be(&rest[6..]).trim_end_matches('\0').to_string());

    Ok(EntityAuxiliaryNames {
        entity_type,
        entity_type_name: names::entity_type_name(entity_type),
        entity_instance_number,
        entity_name_language_tag: tag,
        entity_name: name,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OemEntityId {
    pub terminus_handle: u16,
    pub oem_entity_id_handle: u16,
    pub vendor_iana: u32,
    pub vendor_entity_id: u16,
    pub string_count: u8,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub entity_names: Vec<LocalizedName>,
}

fn decode_oem_entity_id(c: &mut Cursor<'_>) -> Result<OemEntityId, DecodeError> {
    let terminus_handle = c.u16()?;
    let oem_entity_id_handle = c.u16()?;
    let vendor_iana = c.u32()?;
    let vendor_entity_id = c.u16()?;
    let string_count = c.u8()?;

    Ok(OemEntityId {
        terminus_handle,
        oem_entity_id_handle,
        vendor_iana,
        vendor_entity_id,
        string_count,
        entity_names: localized_names(c, string_count),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FruRecordSet {
    pub terminus_handle: u16,
    pub fru_record_set_identifier: u16,
    #[serde(flatten)]
    pub entity: EntityId,
}

fn decode_fru_record_set(c: &mut Cursor<'_>) -> Result<FruRecordSet, DecodeError> {
    Ok(FruRecordSet {
        terminus_handle: c.u16()?,
        fru_record_set_identifier: c.u16()?,
        entity: c.entity()?,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactNumericSensor {
    pub sensor_type: u8,
    pub sensor_number: u16,
    pub entity_type: u16,
    pub entity_type_name: String,
    pub entity_instance_number: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_fields_hex: Option<String>,
}

fn decode_compact_numeric_sensor(c: &mut Cursor<'_>) -> Result<CompactNumericSensor, DecodeError> {
    let sensor_type = c.u8()?;
    let sensor_number = c.u16()?;
    let entity_type = c.u16()?;
    let entity_instance_number = c.u16()?;
    let rest = c.rest();

    Ok(CompactNumericSensor {
        sensor_type,
        sensor_number,
        entity_type,
        entity_type_name: names::entity_type_name(entity_type),
        entity_instance_number,
        remaining_fields_hex: (!rest.is_empty()).then(|| hex::encode(rest)),
    })
}

/// First pass: every OEM state set defined anywhere in `records`.
pub fn collect_state_sets<R: AsRef<[u8]>>(records: &[R]) -> StateSetMap {
    let mut map = StateSetMap::new();

    for record in records {
        let record = record.as_ref();
        let Ok(header) = PdrHeader::parse(record) else {
            continue;
        };
        if header.pdr_type != pdr_type::OEM_STATE_SET
            || min_record_len(pdr_type::OEM_STATE_SET).is_some_and(|min| record.len() < min)
        {
            continue;
        }

        match decode_oem_state_set(&mut Cursor::at(record, HEADER_LEN)) {
            Ok(oem) => {
                if let Some(set) = oem.state_set() {
                    debug!(handle = oem.oem_state_set_id_handle, name = %set.name, values = set.values.len(), "Collected OEM state set");
                    map.insert(oem.oem_state_set_id_handle, set);
                }
            }
            Err(e) => {
                debug!(handle = header.record_handle, error = %e, "Skipping unreadable OEM state set");
            }
        }
    }

    map
}

/// Second pass: decode one record against the collected state sets.
pub fn decode(record: &[u8], state_sets: &StateSetMap) -> Result<DecodedPdr, DecodeError> {
    let header = PdrHeader::parse(record)?;
    let pdr_type_name = names::pdr_type_name(header.pdr_type);

    let full = min_record_len(header.pdr_type).is_some_and(|min| record.len() >= min);
    if !full {
        return Ok(DecodedPdr {
            header,
            pdr_type_name,
            body: None,
        });
    }

    let c = &mut Cursor::at(record, HEADER_LEN);
    let body = match header.pdr_type {
        pdr_type::TERMINUS_LOCATOR => PdrBody::TerminusLocator(decode_terminus_locator(c)?),
        pdr_type::NUMERIC_SENSOR => PdrBody::NumericSensor(Box::new(decode_numeric_sensor(c)?)),
        pdr_type::STATE_SENSOR => PdrBody::StateSensor(decode_state_sensor(c, state_sets)?),
        pdr_type::OEM_STATE_SET => PdrBody::OemStateSet(decode_oem_state_set(c)?),
        pdr_type::NUMERIC_EFFECTER => PdrBody::NumericEffecter(Box::new(decode_numeric_effecter(c)?)),
        pdr_type::STATE_EFFECTER => PdrBody::StateEffecter(decode_state_effecter(c, state_sets)?),
        pdr_type::ENTITY_ASSOCIATION => PdrBody::EntityAssociation(decode_entity_association(c)?),
        pdr_type::ENTITY_AUXILIARY_NAMES => PdrBody::EntityAuxiliaryNames(decode_entity_auxiliary_names(c)?),
        pdr_type::OEM_ENTITY_ID => PdrBody::OemEntityId(decode_oem_entity_id(c)?),
        pdr_type::FRU_RECORD_SET => PdrBody::FruRecordSet(decode_fru_record_set(c)?),
        pdr_type::COMPACT_NUMERIC_SENSOR => PdrBody::CompactNumericSensor(decode_compact_numeric_sensor(c)?),
        _ => {
            return Ok(DecodedPdr {
                header,
                pdr_type_name,
                body: None,
            })
        }
    };

    Ok(DecodedPdr {
        header,
        pdr_type_name,
        body: Some(body),
    })
}

/// Error marker standing in for a record that failed to decode
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodeFailure {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_handle: Option<u32>,
    pub decode_error: String,
    pub raw_hex: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PdrEntry {
    Decoded(DecodedPdr),
    Failed(DecodeFailure),
}

/// Both passes over a repository. A record that fails to decode becomes a
/// [`DecodeFailure`] in its slot; the rest still decode.
pub fn decode_all<R: AsRef<[u8]>>(records: &[R]) -> Vec<PdrEntry> {
    let state_sets = collect_state_sets(records);

    records
        .iter()
        .map(|r| {
            let r = r.as_ref();
            match decode(r, &state_sets) {
                Ok(d) => PdrEntry::Decoded(d),
                Err(e) => {
                    let record_handle = r.get(..4).map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]));
                    warn!(handle = ?record_handle, error = %e, "PDR decode failed");
                    PdrEntry::Failed(DecodeFailure {
                        record_handle,
                        decode_error: e.to_string(),
                        raw_hex: hex::encode(r),
                    })
                }
            }
        })
        .collect()
}
