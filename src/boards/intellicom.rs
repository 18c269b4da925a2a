//! IntelliCom variant profile
//!
//! A bare serial adapter: circuits and heat only. No light themes (the
//! theme map is empty), no chemistry, no valve configuration.

use crate::boards::panel::VariantProfile;
use crate::boards::valuemaps;
use crate::boards::Capability;
use crate::config::ControllerType;

const CAPABILITIES: &[Capability] = &[Capability::DualBody, Capability::NativeSchedules];

pub fn profile() -> VariantProfile {
    VariantProfile {
        maps: &valuemaps::INTELLICOM,
        controller_type: ControllerType::IntelliCom,
        capabilities: CAPABILITIES,
        ..crate::boards::intellitouch::profile()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_lights_at_all() {
        let p = profile();
        assert!(!p.capabilities.contains(&Capability::LightThemes));
        assert!(p.maps.light_themes.entries().is_empty());
    }
}
