//! Name tables for DSP0248/DSP0249 enumerations

use std::collections::BTreeMap;

/// DSP0249 entity ID codes
static ENTITY_TYPES: &[(u16, &str)] = &[
    (0, "Unspecified"),
    (1, "Other"),
    (2, "Network"),
    (3, "Group"),
    (4, "Remote (Out of Band) Management Communication Device"),
    (5, "External Environment"),
    (6, "Communication Channel"),
    (7, "PLDM Terminus"),
    (8, "Platform Event Log"),
    (15, "Keypad"),
    (16, "Switch"),
    (17, "Pushbutton"),
    (18, "Display"),
    (19, "Indicator"),
    (30, "System Management Software"),
    (31, "System Firmware"),
    (32, "Operating System"),
    (33, "Virtual Machine Manager"),
    (34, "OS Loader"),
    (35, "Device Driver"),
    (36, "Management Controller Firmware"),
    (45, "System chassis"),
    (46, "Sub-chassis"),
    (47, "Disk Drive Bay"),
    (48, "Peripheral Bay"),
    (49, "Device Bay"),
    (50, "Door"),
    (51, "Access Panel"),
    (52, "Cover"),
    (60, "Board"),
    (61, "Card"),
    (62, "Module"),
    (63, "System management module"),
    (64, "System board"),
    (65, "Memory board"),
    (66, "Memory module"),
    (67, "Processor module"),
    (68, "Add-in card"),
    (69, "Chassis front panel board"),
    (70, "Back panel board"),
    (71, "Power management/power distribution board"),
    (72, "Power system board"),
    (73, "Drive backplane"),
    (74, "System internal expansion board"),
    (75, "Other system board"),
    (76, "Chassis back panel board"),
    (77, "Processing blade"),
    (78, "Connectivity switch"),
    (79, "Processor/memory module"),
    (80, "I/O module"),
    (81, "Processor/I/O module"),
    (90, "Cooling device"),
    (91, "Cooling subsystem"),
    (92, "Cooling unit/domain"),
    (93, "Fan"),
    (94, "Peltier Cooling Device"),
    (95, "Liquid Cooling Device"),
    (96, "Liquid Cooling subsystem"),
    (105, "Other storage device"),
    (106, "Floppy Drive"),
    (107, "Fixed Disk / Hard Drive"),
    (108, "CD Drive"),
    (109, "CD/DVD Drive"),
    (110, "Other Silicon Storage Device"),
    (111, "Solid State Drive"),
    (120, "Power supply"),
    (121, "Battery"),
    (122, "Super capacitor"),
    (123, "Power converter"),
    (124, "DC-DC converter"),
    (125, "AC mains power supply"),
    (126, "DC mains power supply"),
    (135, "Processor"),
    (136, "Chipset component"),
    (137, "Management controller"),
    (138, "Peripheral controller"),
    (139, "SEEPROM"),
    (140, "NVRAM chip"),
    (141, "FLASH Memory chip"),
    (142, "Memory chip"),
    (143, "Memory controller"),
    (144, "Network controller"),
    (145, "I/O controller"),
    (146, "South bridge"),
    (147, "Real Time Clock (RTC)"),
    (160, "Other Bus"),
    (161, "System Bus"),
    (162, "I2C Bus"),
    (163, "SMBus Bus"),
    (164, "SPI Bus"),
    (165, "PCI Bus"),
    (166, "PCI Express Bus"),
    (167, "PECI Bus"),
    (168, "LPC Bus"),
    (169, "USB Bus"),
    (170, "FireWire Bus"),
    (171, "SCSI Bus"),
    (172, "SATA/SAS Bus"),
    (173, "Processor/front-side Bus"),
    (174, "Inter-processor Bus"),
    (185, "Connector"),
    (186, "Slot"),
    (187, "Cable"),
    (188, "Interconnect"),
    (189, "Plug"),
    (190, "Socket"),
];

/// Human-readable entity type, honouring the logical bit (bit 15).
pub fn entity_type_name(entity_type: u16) -> String {
    let logical = entity_type & 0x8000 != 0;
    let id = entity_type & 0x7FFF;

    let name = match ENTITY_TYPES.binary_search_by_key(&id, |(code, _)| *code) {
        Ok(i) => ENTITY_TYPES[i].1.to_string(),
        Err(_) => match id {
            192..=16383 => format!("Chassis-specific (0x{id:04x})"),
            16384..=24575 => format!("Board-set specific (0x{id:04x})"),
            24576..=32767 => format!("OEM System Integrator (0x{id:04x})"),
            _ => format!("Reserved (0x{id:04x})"),
        },
    };

    if logical {
        format!("Logical {name}")
    } else {
        name
    }
}

/// DSP0248 Table 77
pub fn pdr_type_name(pdr_type: u8) -> String {
    let name = match pdr_type {
        1 => "Terminus Locator PDR",
        2 => "Numeric Sensor PDR",
        3 => "Numeric Sensor Initialization PDR",
        4 => "State Sensor PDR",
        5 => "State Sensor Initialization PDR",
        6 => "Sensor Auxiliary Names PDR",
        7 => "OEM Unit PDR",
        8 => "OEM State Set PDR",
        9 => "Numeric Effecter PDR",
        10 => "Numeric Effecter Initialization PDR",
        11 => "State Effecter PDR",
        12 => "State Effecter Initialization PDR",
        13 => "Effecter Auxiliary Names PDR",
        14 => "Effecter OEM Semantic PDR",
        15 => "Entity Association PDR",
        16 => "Entity Auxiliary Names PDR",
        17 => "OEM Entity ID PDR",
        18 => "Interrupt Association PDR",
        19 => "PLDM Event Log PDR",
        20 => "FRU Record Set PDR",
        21 => "Compact Numeric Sensor PDR",
        22 => "Redfish Resource PDR",
        23 => "Redfish Entity Association PDR",
        24 => "Redfish Action PDR",
        _ => return format!("PDR Type 0x{pdr_type:02x}"),
    };
    name.to_string()
}

/// `Unknown(0x..)` placeholder used for unnamed enumeration values
pub fn unknown(value: u8) -> String {
    format!("Unknown(0x{value:02x})")
}

fn named(value: u8, names: &[&str]) -> String {
    names
        .get(value as usize)
        .map(|s| s.to_string())
        .unwrap_or_else(|| unknown(value))
}

pub fn sensor_init_name(value: u8) -> String {
    named(value, &["noInit", "useInitPDR", "enableSensor", "disableSensor"])
}

pub fn effecter_init_name(value: u8) -> String {
    named(value, &["noInit", "useInitPDR", "enableEffecter", "disableEffecter"])
}

pub fn association_type_name(value: u8) -> String {
    match value {
        0 => "physicalToPhysicalContainment".to_string(),
        1 => "logicalContainment".to_string(),
        _ => format!("Unknown (0x{value:02x})"),
    }
}

pub fn validity_name(value: u8) -> String {
    named(value, &["notValid", "valid"])
}

pub fn locator_type_name(value: u8) -> String {
    named(value, &["UID", "MCTP_EID", "SMBusRelative", "systemSoftware", "NC_SI"])
}

pub fn software_class_name(value: u8) -> String {
    named(
        value,
        &[
            "unspecified",
            "other",
            "systemFirmware",
            "OSloader",
            "OS",
            "CIMprovider",
            "otherProvider",
            "virtualMachineManager",
        ],
    )
}

pub fn unspecified_value_hint_name(value: u8) -> String {
    named(value, &["treatAsUnspecified", "treatAsError"])
}

/// Sensor/effecter data size format name
pub fn data_size_name(value: u8) -> Option<&'static str> {
    ["uint8", "sint8", "uint16", "sint16", "uint32", "sint32", "uint64", "sint64"]
        .get(value as usize)
        .copied()
}

/// Range field format name
pub fn range_format_name(value: u8) -> Option<&'static str> {
    [
        "uint8", "sint8", "uint16", "sint16", "uint32", "sint32", "real32", "uint64", "sint64",
    ]
    .get(value as usize)
    .copied()
}

/// A named state set and the names of its values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSet {
    pub name: String,
    pub values: BTreeMap<u8, String>,
}

/// DSP0249 state sets known without any vendor records
pub fn standard_state_set(id: u16) -> Option<StateSet> {
    let (name, values): (&str, &[&str]) = match id {
        64 => ("Smoke State", &["Unknown", "Normal", "Smoke"]),
        65 => ("Humidity State", &["Unknown", "Normal", "Humid"]),
        66 => ("Door State", &["Unknown", "Open", "Closed"]),
        67 => ("Switch State", &["Unknown", "Pressed/On", "Released/Off"]),
        96 => ("Lock State", &["Unknown", "Locked", "Unlocked", "Locked Out"]),
        _ => return None,
    };
    Some(StateSet {
        name: name.to_string(),
        values: values
            .iter()
            .enumerate()
            .map(|(i, v)| (i as u8, v.to_string()))
            .collect(),
    })
}
