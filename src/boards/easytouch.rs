//! EasyTouch variant profile
//!
//! Derives from the IntelliTouch tables with the reduced light-theme set.

use crate::boards::panel::VariantProfile;
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
        maps: &valuemaps::EASYTOUCH,
        controller_type: ControllerType::EasyTouch,
        capabilities: CAPABILITIES,
        ..crate::boards::intellitouch::profile()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_from_intellitouch() {
        let p = profile();
        assert_eq!(p.controller_type, ControllerType::EasyTouch);
        assert_eq!(p.actions.circuit_set, 0x86);
        // Reduced theme table
        assert!(!p.maps.light_themes.contains(11));
    }
}
