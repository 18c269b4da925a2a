//! Configuration entities
//!
//! The slowly-changing half of the equipment model, persisted to
//! *pool-config*. Every enum-like field holds its canonical numeric code
//! from the variant's byte-value maps; textual names are derived at the
//! API surface, never stored as authoritative.

use crate::model::collections::{Collection, Identified};
use serde::{Deserialize, Serialize};

/// Pool, spa, or auxiliary body of water
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BodyConfig {
    pub id: u32,
    pub name: String,
    /// Body type code (pool/spa/auxiliary)
    #[serde(rename = "type")]
    pub body_type: u8,
    /// Capacity in gallons
    pub capacity: u32,
    /// Bitmask of heat sources plumbed to this body
    pub heat_sources: u8,
}

impl Default for BodyConfig {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            body_type: 0,
            capacity: 0,
            heat_sources: 0,
        }
    }
}

/// Relay-backed circuit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CircuitConfig {
    pub id: u32,
    pub name: String,
    /// Circuit function code (generic, pool, spa, light, ...)
    pub function: u8,
    pub show_in_features: bool,
    pub freeze_protect: bool,
    /// Runtime limit in minutes; 0 means no egg timer
    pub egg_timer: u16,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            function: 0,
            show_in_features: true,
            freeze_protect: false,
            egg_timer: 0,
        }
    }
}

/// Feature: a named virtual toggle without a dedicated relay
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeatureConfig {
    pub id: u32,
    pub name: String,
    pub function: u8,
    pub show_in_features: bool,
}

/// One circuit-to-speed binding on a pump
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PumpCircuitConfig {
    pub circuit: u32,
    /// RPM for speed-driven pump types
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<u32>,
    /// GPM for flow-driven pump types
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow: Option<u32>,
}

/// Pump definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PumpConfig {
    pub id: u32,
    pub name: String,
    /// Pump type code (relay/single/dual/VS/VSF/VF)
    #[serde(rename = "type")]
    pub pump_type: u8,
    /// Bus address of the pump drive
    pub address: u8,
    pub circuits: Vec<PumpCircuitConfig>,
}

/// Heater definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeaterConfig {
    pub id: u32,
    pub name: String,
    /// Heater type code (gas/solar/heat-pump/ultratemp/...)
    #[serde(rename = "type")]
    pub heater_type: u8,
    /// Bitmask of bodies this heater serves
    pub body: u8,
    pub priority: u8,
    /// Pump run-on after heat off, in seconds
    pub cooldown: u16,
}

/// Salt chlorine generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChlorinatorConfig {
    pub id: u32,
    pub body: u8,
    /// Output percentage while the pool circuit runs
    pub pool_setpoint: u8,
    /// Output percentage while the spa circuit runs
    pub spa_setpoint: u8,
    pub super_chlor_hours: u8,
    #[serde(rename = "type")]
    pub chlor_type: u8,
}

impl Default for ChlorinatorConfig {
    fn default() -> Self {
        Self {
            id: 0,
            body: 1,
            pool_setpoint: 50,
            spa_setpoint: 10,
            super_chlor_hours: 8,
            chlor_type: 0,
        }
    }
}

/// Per-chemical dosing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChemDoseConfig {
    pub setpoint: f64,
    /// Largest single dose in milliliters
    pub dose_limit: u32,
    /// Supply tank volume in milliliters
    pub tank_volume: u32,
}

impl Default for ChemDoseConfig {
    fn default() -> Self {
        Self {
            setpoint: 0.0,
            dose_limit: 0,
            tank_volume: 0,
        }
    }
}

/// Chemistry controller (IntelliChem or homegrown probes plus dosers)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChemControllerConfig {
    pub id: u32,
    /// Controller type code (intellichem/homegrown)
    #[serde(rename = "type")]
    pub controller_type: u8,
    pub body: u8,
    pub ph: ChemDoseConfig,
    pub orp: ChemDoseConfig,
    /// Langelier saturation index target
    pub lsi_target: f64,
}

impl Default for ChemControllerConfig {
    fn default() -> Self {
        Self {
            id: 0,
            controller_type: 0,
            body: 1,
            ph: ChemDoseConfig {
                setpoint: 7.5,
                dose_limit: 0,
                tank_volume: 0,
            },
            orp: ChemDoseConfig {
                setpoint: 700.0,
                dose_limit: 0,
                tank_volume: 0,
            },
            lsi_target: 0.0,
        }
    }
}

/// How a schedule edge is anchored
pub mod schedule_time {
    /// Fixed wall-clock minutes
    pub const MANUAL: u8 = 0;
    /// Computed sunrise
    pub const SUNRISE: u8 = 1;
    /// Computed sunset
    pub const SUNSET: u8 = 2;
}

/// Timed circuit program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScheduleConfig {
    pub id: u32,
    pub circuit: u32,
    /// Start minute of day, normalized to [0, 1440)
    pub start_time: u16,
    /// End minute of day, normalized to [0, 1440)
    pub end_time: u16,
    /// Day-of-week bitmask, bit 0 = Monday
    pub days: u8,
    /// Schedule type code (repeating/run-once)
    pub schedule_type: u8,
    /// Anchoring of the start edge (manual/sunrise/sunset)
    pub start_time_type: u8,
    /// Anchoring of the end edge (manual/sunrise/sunset)
    pub end_time_type: u8,
    /// The window crosses midnight
    pub wraps_midnight: bool,
    /// Heat mode to apply while the schedule runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heat_mode: Option<u8>,
    /// Setpoint to apply while the schedule runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set_point: Option<u8>,
    pub enabled: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            id: 0,
            circuit: 0,
            start_time: 0,
            end_time: 0,
            days: 0,
            schedule_type: 0,
            start_time_type: schedule_time::MANUAL,
            end_time_type: schedule_time::MANUAL,
            wraps_midnight: false,
            heat_mode: None,
            set_point: None,
            enabled: true,
        }
    }
}

impl ScheduleConfig {
    /// Normalize both edges into [0, 1440) and derive the wrap flag for
    /// legacy inverted windows
    pub fn normalize(&mut self) {
        self.start_time %= 1440;
        self.end_time %= 1440;
        if self.start_time > self.end_time && !self.wraps_midnight {
            self.wraps_midnight = true;
        }
    }
}

/// Valve actuator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValveConfig {
    pub id: u32,
    pub circuit: u32,
    pub name: String,
    pub is_intake: bool,
    pub is_return: bool,
}

/// Filter definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterConfig {
    pub id: u32,
    pub body: u8,
    pub filter_type: u8,
    /// Clean-filter reference pressure
    pub ref_pressure: f64,
    /// Pressure units code (psi/kPa)
    pub pressure_units: u8,
}

/// One member circuit of a group
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GroupMemberConfig {
    pub id: u32,
    /// State this member takes when the group turns on
    pub desired_state: bool,
    /// Color-swim stagger in seconds, light groups only
    pub swim_delay: u16,
}

/// Circuit group: one switch driving several circuits
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CircuitGroupConfig {
    pub id: u32,
    pub name: String,
    #[serde(rename = "type")]
    pub group_type: u8,
    pub circuits: Vec<GroupMemberConfig>,
}

/// Light group: synchronized color control across light circuits
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LightGroupConfig {
    pub id: u32,
    pub name: String,
    #[serde(rename = "type")]
    pub group_type: u8,
    pub circuits: Vec<GroupMemberConfig>,
}

/// Pool or spa cover with its interlocked circuits
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoverConfig {
    pub id: u32,
    pub body: u8,
    pub name: String,
}

/// Wall-mount or wireless remote
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemoteConfig {
    pub id: u32,
    pub name: String,
    #[serde(rename = "type")]
    pub remote_type: u8,
    /// Circuit bound to each button, in button order
    pub buttons: Vec<u32>,
}

/// Controller identity singleton
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EquipmentConfig {
    pub model: String,
    pub controller_type: String,
    pub firmware: String,
    pub software_version: String,
}

/// Miscellaneous site options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OptionsConfig {
    /// 12 or 24
    pub clock_mode: u8,
    /// "server" or "manual"
    pub clock_source: String,
    pub adjust_dst: bool,
}

impl Default for OptionsConfig {
    fn default() -> Self {
        Self {
            clock_mode: 12,
            clock_source: "server".to_string(),
            adjust_dst: true,
        }
    }
}

/// Root of the persisted *pool-config* document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolConfig {
    pub equipment: EquipmentConfig,
    pub bodies: Collection<BodyConfig>,
    pub circuits: Collection<CircuitConfig>,
    pub features: Collection<FeatureConfig>,
    pub pumps: Collection<PumpConfig>,
    pub heaters: Collection<HeaterConfig>,
    pub chlorinators: Collection<ChlorinatorConfig>,
    pub chem_controllers: Collection<ChemControllerConfig>,
    pub schedules: Collection<ScheduleConfig>,
    pub valves: Collection<ValveConfig>,
    pub filters: Collection<FilterConfig>,
    pub circuit_groups: Collection<CircuitGroupConfig>,
    pub light_groups: Collection<LightGroupConfig>,
    pub covers: Collection<CoverConfig>,
    pub remotes: Collection<RemoteConfig>,
    pub options: OptionsConfig,
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
    BodyConfig,
    CircuitConfig,
    FeatureConfig,
    PumpConfig,
    HeaterConfig,
    ChlorinatorConfig,
    ChemControllerConfig,
    ScheduleConfig,
    ValveConfig,
    FilterConfig,
    CircuitGroupConfig,
    LightGroupConfig,
    CoverConfig,
    RemoteConfig,
);
