//! AquaLink variant profile
//!
//! Rides the Pentair-16 framing with partial light themes and limited
//! valve configuration; no IntelliChem binding.

use crate::boards::panel::VariantProfile;
use crate::boards::valuemaps;
use crate::boards::Capability;
use crate::config::ControllerType;

const CAPABILITIES: &[Capability] = &[
    Capability::DualBody,
    Capability::LightThemes,
    Capability::NativeSchedules,
    Capability::ValveConfig,
];

pub fn profile() -> VariantProfile {
    VariantProfile {
        maps: &valuemaps::AQUALINK,
        controller_type: ControllerType::AquaLink,
        capabilities: CAPABILITIES,
        ..crate::boards::intellitouch::profile()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_themes_no_chem() {
        let p = profile();
        assert!(p.maps.light_themes.contains(4));
        assert!(!p.maps.light_themes.contains(11));
        assert!(!p.capabilities.contains(&Capability::IntelliChem));
    }
}
