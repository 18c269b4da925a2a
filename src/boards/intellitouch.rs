//! IntelliTouch variant profile
//!
//! The reference Pentair-16 panel: dual body, full light themes,
//! IntelliChem binding, native schedules, and (limited) valve
//! configuration.

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
];

pub fn profile() -> VariantProfile {
    VariantProfile {
        controller_type: ControllerType::IntelliTouch,
        maps: &valuemaps::INTELLITOUCH,
        actions: ActionSet::default(),
        flag: 0x00,
        panel_address: 0x10,
        host_address: 0x00,
        chem_address_base: 0x90,
        capabilities: CAPABILITIES,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_shape() {
        let p = profile();
        assert_eq!(p.controller_type, ControllerType::IntelliTouch);
        assert_eq!(p.panel_address, 0x10);
        assert_eq!(p.actions.circuit_set, 0x86);
        assert!(p.capabilities.contains(&Capability::IntelliChem));
        assert!(!p.capabilities.contains(&Capability::CoolSetpoint));
    }
}
