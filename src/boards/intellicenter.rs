//! IntelliCenter variant profile
//!
//! Pentair-2 framing, the full capability set including cooling
//! setpoints, and a partially different action space.

use crate::boards::panel::{ActionSet, VariantProfile};
use crate::boards::valuemaps;
use crate::boards::Capability;
use crate::config::ControllerType;

const CAPABILITIES: &[Capability] = &[
    Capability::DualBody,
    Capability::LightThemes,
    Capability::IntelliChem,
    Capability::NativeSchedules,
    Capability::ValveConfig,
    Capability::CoolSetpoint,
];

pub fn profile() -> VariantProfile {
    VariantProfile {
        controller_type: ControllerType::IntelliCenter,
        maps: &valuemaps::INTELLICENTER,
        actions: ActionSet {
            status: 0xCC,
            get_status: 0xE3,
            get_config: 0x1E,
            ..ActionSet::default()
        },
        flag: 0x00,
        panel_address: 0x10,
        host_address: 0x00,
        chem_address_base: 0x90,
        capabilities: CAPABILITIES,
    }
}
