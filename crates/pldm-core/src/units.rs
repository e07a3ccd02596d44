//! DSP0248 sensor units and their UCUM rendering
//!
//! Each PLDM unit code maps to multisets of UCUM numerator and denominator
//! symbols plus a power-of-ten modifier. A sensor's base unit, auxiliary
//! unit and rates are combined, common symbols cancelled, and the net power
//! rendered as an SI prefix.

use serde::Serialize;
use std::collections::BTreeMap;

struct UnitDef {
    code: u8,
    name: &'static str,
    numerators: &'static [&'static str],
    denominators: &'static [&'static str],
    modifier: i32,
}

const fn unit(
    code: u8,
    name: &'static str,
    numerators: &'static [&'static str],
    denominators: &'static [&'static str],
    modifier: i32,
) -> UnitDef {
    UnitDef {
        code,
        name,
        numerators,
        denominators,
        modifier,
    }
}

// DSP0248 Table 75
static SENSOR_UNITS: &[UnitDef] = &[
    unit(0, "None", &[], &[], 0),
    unit(1, "Unspecified", &[], &[], 0),
    unit(2, "Degrees C", &["Cel"], &[], 0),
    unit(3, "Degrees F", &["degF"], &[], 0),
    unit(4, "Kelvins", &["K"], &[], 0),
    unit(5, "Volts", &["V"], &[], 0),
    unit(6, "Amps", &["A"], &[], 0),
    unit(7, "Watts", &["W"], &[], 0),
    unit(8, "Joules", &["J"], &[], 0),
    unit(9, "Coulombs", &["C"], &[], 0),
    unit(10, "VA", &["VA"], &[], 0),
    unit(11, "Nits", &[], &[], 0),
    unit(12, "Lumens", &["lm"], &[], 0),
    unit(13, "Lux", &["lx"], &[], 0),
    unit(14, "Candelas", &["cd"], &[], 0),
    unit(15, "kPa", &["Pa"], &[], 3),
    unit(16, "PSI", &["psi"], &[], 0),
    unit(17, "Newtons", &["N"], &[], 0),
    unit(18, "CFM", &[], &[], 0),
    unit(19, "RPM", &["rev"], &["min"], 0),
    unit(20, "Hertz", &["Hz"], &[], 0),
    unit(21, "Seconds", &["s"], &[], 0),
    unit(22, "Minutes", &["min"], &[], 0),
    unit(23, "Hours", &["h"], &[], 0),
    unit(24, "Days", &["d"], &[], 0),
    unit(25, "Weeks", &["wk"], &[], 0),
    unit(26, "Mils", &["mil"], &[], 0),
    unit(27, "Inches", &["in"], &[], 0),
    unit(28, "Feet", &["ft"], &[], 0),
    unit(29, "Cubic Inches", &["in", "in", "in"], &[], 0),
    unit(30, "Cubic Feet", &["ft", "ft", "ft"], &[], 0),
    unit(31, "Meters", &["m"], &[], 0),
    unit(32, "Cubic Centimeters", &["cm", "cm", "cm"], &[], 0),
    unit(33, "Cubic Meters", &["m", "m", "m"], &[], 0),
    unit(34, "Liters", &["L"], &[], 0),
    unit(35, "Fluid Ounces", &["floz"], &[], 0),
    unit(36, "Radians", &["rad"], &[], 0),
    unit(37, "Steradians", &["sr"], &[], 0),
    unit(38, "Revolutions", &["rev"], &[], 0),
    unit(39, "Cycles", &["cycle"], &[], 0),
    unit(40, "Gravities", &["g"], &[], 0),
    unit(41, "Ounces", &["oz"], &[], 0),
    unit(42, "Pounds", &["lb"], &[], 0),
    unit(43, "Foot-Pounds", &["ft", "lb"], &[], 0),
    unit(44, "Ounce-Inches", &["oz", "in"], &[], 0),
    unit(45, "Gauss", &["G"], &[], 0),
    unit(46, "Gilberts", &["Gb"], &[], 0),
    unit(47, "Henries", &["H"], &[], 0),
    unit(48, "Farads", &["F"], &[], 0),
    unit(49, "Ohms", &["Ohm"], &[], 0),
    unit(50, "Siemens", &["S"], &[], 0),
    unit(51, "Moles", &["mol"], &[], 0),
    unit(52, "Becquerels", &["Bq"], &[], 0),
    unit(53, "PPM (parts/million)", &["ppm"], &[], 0),
    unit(54, "Decibels", &["dB"], &[], 0),
    unit(55, "DbA", &["dB(A)"], &[], 0),
    unit(56, "DbC", &["dB(C)"], &[], 0),
    unit(57, "Grays", &["Gy"], &[], 0),
    unit(58, "Sieverts", &["Sv"], &[], 0),
    unit(59, "Color Temperature Degrees K", &["K"], &[], 0),
    unit(60, "Bits", &["bit"], &[], 0),
    unit(61, "Bytes", &["By"], &[], 0),
    unit(62, "Words (data)", &[], &[], 0),
    unit(63, "DoubleWords", &[], &[], 0),
    unit(64, "QuadWords", &[], &[], 0),
    unit(65, "Percentage", &["%"], &[], 0),
    unit(66, "Pascals", &["Pa"], &[], 0),
    unit(67, "Counts", &[""], &[], 0),
    unit(68, "Grams", &["g"], &[], 0),
    unit(69, "Newton-meters", &["N", "m"], &[], 0),
    unit(70, "Hits", &[""], &[], 0),
    unit(71, "Misses", &[""], &[], 0),
    unit(72, "Retries", &[""], &[], 0),
    unit(73, "Overruns/Overflows", &[""], &[], 0),
    unit(74, "Underruns", &[""], &[], 0),
    unit(75, "Collisions", &[""], &[], 0),
    unit(76, "Packets", &[""], &[], 0),
    unit(77, "Messages", &[""], &[], 0),
    unit(78, "Characters", &[""], &[], 0),
    unit(79, "Errors", &[""], &[], 0),
    unit(80, "Corrected Errors", &[""], &[], 0),
    unit(81, "Uncorrectable Errors", &[""], &[], 0),
    unit(82, "Square Mils", &["mil", "mil"], &[], 0),
    unit(83, "Square Inches", &["in", "in"], &[], 0),
    unit(84, "Square Feet", &["ft", "ft"], &[], 0),
    unit(85, "Square Centimeters", &["cm", "cm"], &[], 0),
    unit(86, "Square Meters", &["m", "m"], &[], 0),
    unit(255, "OEMUnit", &[], &[], 0),
];

// A rate of "per microsecond" is a million per second, hence the positive
// modifier on the shared "s" denominator.
static RATE_UNITS: &[UnitDef] = &[
    unit(0, "None", &[], &[], 0),
    unit(1, "Per MicroSecond", &[], &["s"], 6),
    unit(2, "Per MilliSecond", &[], &["s"], 3),
    unit(3, "Per Second", &[], &["s"], 0),
    unit(4, "Per Minute", &[], &["min"], 0),
    unit(5, "Per Hour", &[], &["h"], 0),
    unit(6, "Per Day", &[], &["d"], 0),
    unit(7, "Per Week", &[], &["wk"], 0),
    unit(8, "Per Month", &[], &["mo"], 0),
    unit(9, "Per Year", &[], &["a"], 0),
];

static SI_PREFIXES: &[(i32, &str)] = &[
    (24, "Y"),
    (21, "Z"),
    (18, "E"),
    (15, "P"),
    (12, "T"),
    (9, "G"),
    (6, "M"),
    (3, "k"),
    (2, "h"),
    (1, "da"),
    (-1, "d"),
    (-2, "c"),
    (-3, "m"),
    (-6, "u"),
    (-9, "n"),
    (-12, "p"),
    (-15, "f"),
    (-18, "a"),
    (-21, "z"),
    (-24, "y"),
];

fn lookup(table: &'static [UnitDef], code: u8) -> Option<&'static UnitDef> {
    table.iter().find(|u| u.code == code)
}

/// Table 75 name of a unit code
pub fn unit_name(code: u8) -> Option<&'static str> {
    lookup(SENSOR_UNITS, code).map(|u| u.name)
}

/// Name of a rate unit code
pub fn rate_name(code: u8) -> Option<&'static str> {
    lookup(RATE_UNITS, code).map(|u| u.name)
}

/// SI prefix for a power of ten, empty when there is none
pub fn si_prefix(power: i32) -> &'static str {
    SI_PREFIXES
        .iter()
        .find(|(p, _)| *p == power)
        .map(|(_, s)| *s)
        .unwrap_or("")
}

/// How the auxiliary unit combines with the base unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AuxRelationship {
    DividedBy,
    MultipliedBy,
}

impl AuxRelationship {
    /// Wire encoding: 0 divided-by, 1 multiplied-by
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::DividedBy),
            1 => Some(Self::MultipliedBy),
            _ => None,
        }
    }
}

/// Unit fields as declared in a numeric sensor or effecter record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitSpec {
    pub base_unit: u8,
    pub unit_modifier: i8,
    pub rate_unit: u8,
    pub aux_unit: u8,
    pub aux_unit_modifier: i8,
    pub relationship: AuxRelationship,
    pub aux_rate_unit: u8,
}

#[derive(Default)]
struct Composite {
    numerators: Vec<&'static str>,
    denominators: Vec<&'static str>,
    power: i32,
}

impl Composite {
    fn multiply(&mut self, def: &UnitDef, power: i32) {
        self.numerators.extend_from_slice(def.numerators);
        self.denominators.extend_from_slice(def.denominators);
        self.power += def.modifier + power;
    }

    fn divide(&mut self, def: &UnitDef, power: i32) {
        self.numerators.extend_from_slice(def.denominators);
        self.denominators.extend_from_slice(def.numerators);
        self.power -= def.modifier + power;
    }

    fn render(self) -> String {
        let mut num = count(&self.numerators);
        let mut den = count(&self.denominators);
        for (sym, n) in num.iter_mut() {
            if let Some(d) = den.get_mut(sym) {
                let common = (*n).min(*d);
                *n -= common;
                *d -= common;
            }
        }

        let numerator = join_symbols(&num);
        let denominator = join_symbols(&den);

        match (numerator.is_empty(), denominator.is_empty()) {
            (_, true) => format!("{}{}", si_prefix(self.power), numerator),
            (false, false) => format!("{}{}/{}", si_prefix(self.power), numerator, denominator),
            (true, false) => format!("1/{}{}", si_prefix(-self.power), denominator),
        }
    }
}

fn count(symbols: &[&'static str]) -> BTreeMap<&'static str, u32> {
    let mut map = BTreeMap::new();
    for s in symbols {
        *map.entry(*s).or_insert(0) += 1;
    }
    map
}

/// Join symbols in sorted order with '.', suffixing repeat counts.
fn join_symbols(counts: &BTreeMap<&'static str, u32>) -> String {
    counts
        .iter()
        .filter(|(sym, n)| !sym.is_empty() && **n > 0)
        .map(|(sym, n)| if *n > 1 { format!("{sym}{n}") } else { sym.to_string() })
        .collect::<Vec<_>>()
        .join(".")
}

/// Render a unit declaration as a UCUM string.
///
/// Unknown base or auxiliary codes yield an empty string. Unknown rate codes
/// contribute nothing.
pub fn to_ucum(spec: &UnitSpec) -> String {
    let mut c = Composite::default();

    if spec.base_unit != 0 {
        let Some(def) = lookup(SENSOR_UNITS, spec.base_unit) else {
            return String::new();
        };
        c.multiply(def, spec.unit_modifier as i32);
    }

    if spec.aux_unit != 0 {
        let Some(def) = lookup(SENSOR_UNITS, spec.aux_unit) else {
            return String::new();
        };
        match spec.relationship {
            AuxRelationship::MultipliedBy => c.multiply(def, spec.aux_unit_modifier as i32),
            AuxRelationship::DividedBy => c.divide(def, spec.aux_unit_modifier as i32),
        }
    }

    for rate in [spec.rate_unit, spec.aux_rate_unit] {
        if rate == 0 {
            continue;
        }
        if let Some(def) = lookup(RATE_UNITS, rate) {
            c.multiply(def, 0);
        }
    }

    c.render()
}
