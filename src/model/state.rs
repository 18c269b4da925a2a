//! Live-state entities
//!
//! The rapidly-changing half of the equipment model, persisted to
//! *pool-state*. State items shadow configuration items of the same kind
//! and id; they are created lazily and pruned when their configuration
//! counterpart disappears. Items written by local command optimism carry
//! `pending` until an inbound status message confirms them.

use crate::model::collections::{Collection, Identified};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn is_false(v: &bool) -> bool {
    !*v
}

/// Body live state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BodyState {
    pub id: u32,
    /// Water temperature, last measured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp: Option<f64>,
    pub set_point: u8,
    /// Cooling setpoint, variants with chillers/heat pumps only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cool_set_point: Option<u8>,
    pub heat_mode: u8,
    pub heat_status: u8,
    pub is_on: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solar_temp: Option<f64>,
    #[serde(skip_serializing_if = "is_false")]
    pub pending: bool,
}

/// Circuit live state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CircuitState {
    pub id: u32,
    pub is_on: bool,
    /// When a timed run (egg timer) expires
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lighting_theme: Option<u8>,
    #[serde(skip_serializing_if = "is_false")]
    pub pending: bool,
}

/// Feature live state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeatureState {
    pub id: u32,
    pub is_on: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "is_false")]
    pub pending: bool,
}

/// Virtual circuit: read-only, derived from other state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VirtualCircuitState {
    pub id: u32,
    pub name: String,
    pub is_on: bool,
}

/// Pump live state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PumpState {
    pub id: u32,
    pub rpm: u32,
    pub watts: u32,
    /// Flow in GPM, flow-capable drives only
    pub flow: u32,
    pub status: u8,
    pub drive_state: u8,
    #[serde(skip_serializing_if = "is_false")]
    pub pending: bool,
}

/// Heater live state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeaterState {
    pub id: u32,
    pub is_on: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

/// Chlorinator live state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChlorinatorState {
    pub id: u32,
    /// Output percentage currently produced
    pub current_output: u8,
    /// Output percentage the controller is driving toward
    pub target_output: u8,
    pub salt_level: u32,
    pub salt_required: bool,
    pub super_chlor: bool,
    pub super_chlor_remaining_hours: u8,
    pub status: u8,
    #[serde(skip_serializing_if = "is_false")]
    pub pending: bool,
}

/// One chemical's live readings and dosing progress
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChemicalState {
    pub level: f64,
    /// Supply tank fill, 0.0 to 1.0
    pub tank_level: f64,
    /// Seconds spent in the current dose
    pub dose_time: u32,
    /// Milliliters delivered in the current dose
    pub dose_volume: u32,
    /// Milliliters remaining in the current dose
    pub dose_remaining: u32,
}

/// Chemistry controller live state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChemControllerState {
    pub id: u32,
    pub ph: ChemicalState,
    pub orp: ChemicalState,
    /// Active alarm bits
    pub alarms: u32,
    /// Active warning bits
    pub warnings: u32,
    #[serde(skip_serializing_if = "is_false")]
    pub pending: bool,
}

/// Schedule live state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScheduleState {
    pub id: u32,
    pub is_on: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_trigger_time: Option<DateTime<Utc>>,
}

/// Valve live state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValveState {
    pub id: u32,
    pub is_on: bool,
    /// Actuator position, 0.0 intake to 1.0 return
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<f64>,
}

/// Filter live state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterState {
    pub id: u32,
    pub pressure: f64,
    /// Derived cleanliness estimate against the reference pressure
    pub clean_percentage: f64,
}

/// Circuit-group live state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CircuitGroupState {
    pub id: u32,
    pub is_on: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "is_false")]
    pub pending: bool,
}

/// Light-group live state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LightGroupState {
    pub id: u32,
    pub is_on: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lighting_theme: Option<u8>,
    #[serde(skip_serializing_if = "is_false")]
    pub pending: bool,
}

/// Cover live state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoverState {
    pub id: u32,
    pub is_closed: bool,
}

/// Controller status record: code, derived name, boot progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatusRecord {
    pub val: u8,
    pub name: String,
    pub percent: u8,
}

impl Default for StatusRecord {
    fn default() -> Self {
        Self {
            val: 0,
            name: "unknown".to_string(),
            percent: 0,
        }
    }
}

/// Controller status codes for [`StatusRecord`]
pub mod controller_status {
    pub const UNKNOWN: u8 = 0;
    pub const READY: u8 = 1;
    pub const LOADING: u8 = 2;
    pub const DEGRADED: u8 = 3;
    pub const LOST: u8 = 4;

    pub fn name(val: u8) -> &'static str {
        match val {
            READY => "ready",
            LOADING => "loading",
            DEGRADED => "degraded",
            LOST => "lost",
            _ => "unknown",
        }
    }
}

/// Equipment singleton live state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EquipmentState {
    pub status: StatusRecord,
    /// Controller mode code (auto/service/timeout)
    pub mode: u8,
    /// Controller freeze-protection active
    pub freeze: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot_time: Option<DateTime<Utc>>,
}

/// Site temperature readings singleton
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TempsState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub air: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solar: Option<f64>,
    /// Temperature units code (0 = F, 1 = C)
    pub units: u8,
}

/// Root of the persisted *pool-state* document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolState {
    pub equipment: EquipmentState,
    pub temps: TempsState,
    pub bodies: Collection<BodyState>,
    pub circuits: Collection<CircuitState>,
    pub features: Collection<FeatureState>,
    pub virtual_circuits: Collection<VirtualCircuitState>,
    pub pumps: Collection<PumpState>,
    pub heaters: Collection<HeaterState>,
    pub chlorinators: Collection<ChlorinatorState>,
    pub chem_controllers: Collection<ChemControllerState>,
    pub schedules: Collection<ScheduleState>,
    pub valves: Collection<ValveState>,
    pub filters: Collection<FilterState>,
    pub circuit_groups: Collection<CircuitGroupState>,
    pub light_groups: Collection<LightGroupState>,
    pub covers: Collection<CoverState>,
}

macro_rules! identified {
    ($($ty:ty),+ $(,)?) => {
        $(impl Identified for $ty {
            fn id(&self) -> u32 {
                self.id
            }
        })+
    };
}

identified!(
    BodyState,
    CircuitState,
    FeatureState,
    VirtualCircuitState,
    PumpState,
    HeaterState,
    ChlorinatorState,
    ChemControllerState,
    ScheduleState,
    ValveState,
    FilterState,
    CircuitGroupState,
    LightGroupState,
    CoverState,
);
