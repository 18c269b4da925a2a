//! Byte-value maps
//!
//! Bidirectional tables from a canonical numeric code (or bit position) to
//! a `{val, name, desc}` record. Every protocol-level comparison and API
//! serialization goes through a map; names are derived from codes, never
//! compared internally. Maps are immutable after construction.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::ops::RangeInclusive;

/// One entry in a byte-value map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ByteValue {
    pub val: u8,
    pub name: &'static str,
    pub desc: &'static str,
}

/// Immutable numeric-code table
#[derive(Debug, Clone)]
pub struct ByteValueMap {
    entries: Vec<ByteValue>,
}

impl ByteValueMap {
    pub fn new(entries: Vec<ByteValue>) -> Self {
        Self { entries }
    }

    pub fn get(&self, val: u8) -> Option<&ByteValue> {
        self.entries.iter().find(|e| e.val == val)
    }

    pub fn by_name(&self, name: &str) -> Option<&ByteValue> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn contains(&self, val: u8) -> bool {
        self.get(val).is_some()
    }

    /// Derived name for a code; "unknown" when unmapped
    pub fn name(&self, val: u8) -> &'static str {
        self.get(val).map(|e| e.name).unwrap_or("unknown")
    }

    pub fn entries(&self) -> &[ByteValue] {
        &self.entries
    }
}

/// Everything one controller variant enumerates on the wire
#[derive(Debug, Clone)]
pub struct ValueMaps {
    pub circuit_functions: ByteValueMap,
    pub heat_modes: ByteValueMap,
    pub heat_sources: ByteValueMap,
    pub pump_types: ByteValueMap,
    pub chlorinator_status: ByteValueMap,
    pub schedule_types: ByteValueMap,
    pub light_themes: ByteValueMap,
    pub controller_modes: ByteValueMap,
    /// Permitted heat setpoint range, degrees F
    pub heat_setpoint_range: RangeInclusive<u8>,
    /// Permitted cooling setpoint range, degrees F
    pub cool_setpoint_range: RangeInclusive<u8>,
    /// Permitted pH setpoint range
    pub ph_setpoint_range: RangeInclusive<f64>,
    /// Permitted ORP setpoint range, millivolts
    pub orp_setpoint_range: RangeInclusive<f64>,
    /// Permitted RPM range for variable-speed drives
    pub pump_rpm_range: RangeInclusive<u32>,
    /// Permitted GPM range for variable-flow drives
    pub pump_flow_range: RangeInclusive<u32>,
}

/// Circuit function codes shared by the Pentair-16 panels
pub mod circuit_function {
    pub const GENERIC: u8 = 0;
    pub const SPA: u8 = 1;
    pub const POOL: u8 = 2;
    pub const MASTER_CLEANER: u8 = 5;
    pub const LIGHT: u8 = 7;
    pub const SAM_LIGHT: u8 = 9;
    pub const INTELLIBRITE: u8 = 16;
    pub const SPILLWAY: u8 = 14;
}

/// Heat mode codes
pub mod heat_mode {
    pub const OFF: u8 = 0;
    pub const HEATER: u8 = 1;
    pub const SOLAR_PREFERRED: u8 = 2;
    pub const SOLAR: u8 = 3;
    pub const HEAT_PUMP: u8 = 4;
}

/// Pump type codes
pub mod pump_type {
    pub const RELAY: u8 = 0;
    pub const SINGLE_SPEED: u8 = 1;
    pub const DUAL_SPEED: u8 = 2;
    pub const VS: u8 = 3;
    pub const VSF: u8 = 4;
    pub const VF: u8 = 5;
}

fn base_circuit_functions() -> ByteValueMap {
    ByteValueMap::new(vec![
        ByteValue { val: circuit_function::GENERIC, name: "generic", desc: "Generic" },
        ByteValue { val: circuit_function::SPA, name: "spa", desc: "Spa" },
        ByteValue { val: circuit_function::POOL, name: "pool", desc: "Pool" },
        ByteValue { val: circuit_function::MASTER_CLEANER, name: "mastercleaner", desc: "Master Cleaner" },
        ByteValue { val: circuit_function::LIGHT, name: "light", desc: "Light" },
        ByteValue { val: circuit_function::SAM_LIGHT, name: "samlight", desc: "SAm Light" },
        ByteValue { val: circuit_function::SPILLWAY, name: "spillway", desc: "Spillway" },
        ByteValue { val: circuit_function::INTELLIBRITE, name: "intellibrite", desc: "IntelliBrite" },
    ])
}

fn base_heat_modes() -> ByteValueMap {
    ByteValueMap::new(vec![
        ByteValue { val: heat_mode::OFF, name: "off", desc: "Off" },
        ByteValue { val: heat_mode::HEATER, name: "heater", desc: "Heater" },
        ByteValue { val: heat_mode::SOLAR_PREFERRED, name: "solarpref", desc: "Solar Preferred" },
        ByteValue { val: heat_mode::SOLAR, name: "solar", desc: "Solar Only" },
    ])
}

fn base_heat_sources() -> ByteValueMap {
    ByteValueMap::new(vec![
        ByteValue { val: 0, name: "nochange", desc: "No Change" },
        ByteValue { val: 1, name: "off", desc: "Off" },
        ByteValue { val: 2, name: "heater", desc: "Heater" },
        ByteValue { val: 4, name: "solar", desc: "Solar" },
        ByteValue { val: 32, name: "heatpump", desc: "Heat Pump" },
    ])
}

fn base_pump_types() -> ByteValueMap {
    ByteValueMap::new(vec![
        ByteValue { val: pump_type::RELAY, name: "relay", desc: "Relay" },
        ByteValue { val: pump_type::SINGLE_SPEED, name: "ss", desc: "Single Speed" },
        ByteValue { val: pump_type::DUAL_SPEED, name: "ds", desc: "Dual Speed" },
        ByteValue { val: pump_type::VS, name: "vs", desc: "Variable Speed" },
        ByteValue { val: pump_type::VSF, name: "vsf", desc: "Variable Speed/Flow" },
        ByteValue { val: pump_type::VF, name: "vf", desc: "Variable Flow" },
    ])
}

fn base_chlorinator_status() -> ByteValueMap {
    ByteValueMap::new(vec![
        ByteValue { val: 0, name: "ok", desc: "Ok" },
        ByteValue { val: 1, name: "lowflow", desc: "Low Flow" },
        ByteValue { val: 2, name: "lowsalt", desc: "Low Salt" },
        ByteValue { val: 4, name: "verylowsalt", desc: "Very Low Salt" },
        ByteValue { val: 8, name: "highcurrent", desc: "High Current" },
        ByteValue { val: 16, name: "cleancell", desc: "Clean Cell" },
        ByteValue { val: 32, name: "lowvoltage", desc: "Low Voltage" },
        ByteValue { val: 64, name: "lowtemp", desc: "Water Temp Low" },
        ByteValue { val: 128, name: "commlost", desc: "Communication Lost" },
    ])
}

fn base_schedule_types() -> ByteValueMap {
    ByteValueMap::new(vec![
        ByteValue { val: 0, name: "repeat", desc: "Repeats" },
        ByteValue { val: 1, name: "runonce", desc: "Run Once" },
    ])
}

fn full_light_themes() -> ByteValueMap {
    ByteValueMap::new(vec![
        ByteValue { val: 0, name: "white", desc: "White" },
        ByteValue { val: 1, name: "green", desc: "Green" },
        ByteValue { val: 2, name: "blue", desc: "Blue" },
        ByteValue { val: 3, name: "magenta", desc: "Magenta" },
        ByteValue { val: 4, name: "red", desc: "Red" },
        ByteValue { val: 5, name: "sam", desc: "SAm Mode" },
        ByteValue { val: 6, name: "party", desc: "Party" },
        ByteValue { val: 7, name: "romance", desc: "Romance" },
        ByteValue { val: 8, name: "caribbean", desc: "Caribbean" },
        ByteValue { val: 9, name: "american", desc: "American" },
        ByteValue { val: 10, name: "sunset", desc: "Sunset" },
        ByteValue { val: 11, name: "royal", desc: "Royal" },
    ])
}

fn partial_light_themes() -> ByteValueMap {
    ByteValueMap::new(vec![
        ByteValue { val: 0, name: "white", desc: "White" },
        ByteValue { val: 1, name: "green", desc: "Green" },
        ByteValue { val: 2, name: "blue", desc: "Blue" },
        ByteValue { val: 3, name: "magenta", desc: "Magenta" },
        ByteValue { val: 4, name: "red", desc: "Red" },
    ])
}

fn base_controller_modes() -> ByteValueMap {
    ByteValueMap::new(vec![
        ByteValue { val: 0, name: "auto", desc: "Auto" },
        ByteValue { val: 1, name: "service", desc: "Service" },
        ByteValue { val: 128, name: "timeout", desc: "Timeout" },
    ])
}

fn base_maps(light_themes: ByteValueMap) -> ValueMaps {
    ValueMaps {
        circuit_functions: base_circuit_functions(),
        heat_modes: base_heat_modes(),
        heat_sources: base_heat_sources(),
        pump_types: base_pump_types(),
        chlorinator_status: base_chlorinator_status(),
        schedule_types: base_schedule_types(),
        light_themes,
        controller_modes: base_controller_modes(),
        heat_setpoint_range: 40..=104,
        cool_setpoint_range: 60..=100,
        ph_setpoint_range: 6.8..=7.8,
        orp_setpoint_range: 400.0..=800.0,
        pump_rpm_range: 450..=3450,
        pump_flow_range: 15..=130,
    }
}

/// IntelliTouch map set
pub static INTELLITOUCH: Lazy<ValueMaps> = Lazy::new(|| base_maps(full_light_themes()));

/// IntelliCenter map set: IntelliTouch tables plus heat-pump modes and a
/// cooling setpoint
pub static INTELLICENTER: Lazy<ValueMaps> = Lazy::new(|| {
    let mut maps = base_maps(full_light_themes());
    let mut modes = maps.heat_modes.entries().to_vec();
    modes.push(ByteValue {
        val: heat_mode::HEAT_PUMP,
        name: "heatpump",
        desc: "Heat Pump",
    });
    maps.heat_modes = ByteValueMap::new(modes);
    maps
});

/// EasyTouch map set: IntelliTouch tables with the reduced theme list
pub static EASYTOUCH: Lazy<ValueMaps> = Lazy::new(|| base_maps(partial_light_themes()));

/// SunTouch map set: same reductions as EasyTouch
pub static SUNTOUCH: Lazy<ValueMaps> = Lazy::new(|| base_maps(partial_light_themes()));

/// IntelliCom map set: no lights at all
pub static INTELLICOM: Lazy<ValueMaps> = Lazy::new(|| base_maps(ByteValueMap::new(Vec::new())));

/// AquaLink map set: partial themes, gas/solar heat only
pub static AQUALINK: Lazy<ValueMaps> = Lazy::new(|| base_maps(partial_light_themes()));

/// Standalone map set: everything the host can drive directly
pub static STANDALONE: Lazy<ValueMaps> = Lazy::new(|| base_maps(full_light_themes()));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_val_and_name() {
        let map = base_heat_modes();
        assert_eq!(map.get(heat_mode::HEATER).unwrap().name, "heater");
        assert_eq!(map.by_name("solar").unwrap().val, heat_mode::SOLAR);
        assert!(map.get(99).is_none());
        assert_eq!(map.name(99), "unknown");
    }

    #[test]
    fn variant_maps_differ_where_they_should() {
        assert!(INTELLITOUCH.light_themes.contains(11));
        assert!(!EASYTOUCH.light_themes.contains(11));
        assert!(EASYTOUCH.light_themes.contains(4));
        assert!(INTELLICOM.light_themes.entries().is_empty());
        assert!(INTELLICENTER.heat_modes.contains(heat_mode::HEAT_PUMP));
        assert!(!INTELLITOUCH.heat_modes.contains(heat_mode::HEAT_PUMP));
    }

    #[test]
    fn ranges_are_sane() {
        assert!(INTELLITOUCH.heat_setpoint_range.contains(&82));
        assert!(!INTELLITOUCH.heat_setpoint_range.contains(&110));
        assert!(INTELLITOUCH.ph_setpoint_range.contains(&7.5));
        assert!(INTELLITOUCH.pump_rpm_range.contains(&2500));
        assert!(!INTELLITOUCH.pump_rpm_range.contains(&4000));
    }
}
