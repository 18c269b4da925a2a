//! SunTouch variant profile
//!
//! EasyTouch's smaller sibling: same tables, no IntelliChem binding and
//! no valve configuration.

use crate::boards::panel::VariantProfile;
use crate::boards::valuemaps;
use crate::boards::Capability;
use crate::config::ControllerType;

const CAPABILITIES: &[Capability] = &[
    Capability::DualBody,
    Capability::LightThemes,
    Capability::NativeSchedules,
];

pub fn profile() -> VariantProfile {
    VariantProfile {
        maps: &valuemaps::SUNTOUCH,
        controller_type: ControllerType::SunTouch,
        capabilities: CAPABILITIES,
        ..crate::boards::intellitouch::profile()
    }
}
