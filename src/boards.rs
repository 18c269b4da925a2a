//! Board dispatch
//!
//! A board binds one controller variant to its value maps, message
//! codecs, capability set, and intent handlers. Intents validate their
//! inputs against the model and the variant's maps before any frame is
//! queued; wire-level failures surface as transport errors after the
//! queue. Inbound frames route through the board's decoders, which
//! produce idempotent patches on the equipment model and never block.
//!
//! Variant polymorphism is a tagged `ControllerType` plus this trait;
//! shared behavior lives in the panel realization parameterized by a
//! variant profile, not in an inheritance tree. An unsupported intent
//! fails with `InvalidOperation` naming the variant and the intent.

use crate::changes::ChangeEngine;
use crate::config::ControllerType;
use crate::delays::DelayManager;
use crate::engine::EngineHandle;
use crate::error::{Result, TritonError};
use crate::protocol::Frame;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::time::Instant;

pub mod aqualink;
pub mod easytouch;
pub mod intellicenter;
pub mod intellicom;
pub mod intellitouch;
pub mod panel;
pub mod standalone;
pub mod suntouch;
pub mod valuemaps;

pub use panel::PanelBoard;
pub use valuemaps::{ByteValue, ByteValueMap, ValueMaps};

/// Variant capabilities, the matrix behind `InvalidOperation`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    DualBody,
    LightThemes,
    IntelliChem,
    NativeSchedules,
    ValveConfig,
    CoolSetpoint,
}

/// Desired circuit state for `setCircuitState`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitRequest {
    On,
    Off,
    Toggle,
}

/// Speed request for `setPumpSpeed`, validated against the pump type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpSpeedRequest {
    Rpm(u32),
    Flow(u32),
    /// Preset index for relay and dual-speed pumps
    Speed(u8),
}

/// Settings bundle for `setChlorinator`; absent fields stay unchanged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChlorinatorRequest {
    pub pool_setpoint: Option<u8>,
    pub spa_setpoint: Option<u8>,
    pub super_chlor: Option<bool>,
    pub super_chlor_hours: Option<u8>,
}

/// Which chemical a `setChemSetpoint` targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chemical {
    Ph,
    Orp,
}

impl Chemical {
    pub fn tag(&self) -> &'static str {
        match self {
            Chemical::Ph => "ph",
            Chemical::Orp => "orp",
        }
    }
}

/// Configuration scopes for discovery requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigScope {
    Circuits,
    Schedules,
    Pumps,
    Heaters,
    Valves,
    Chlorinators,
    ChemControllers,
    All,
}

impl ConfigScope {
    /// Scope byte on the wire
    pub fn code(&self) -> u8 {
        match self {
            ConfigScope::Circuits => 1,
            ConfigScope::Schedules => 2,
            ConfigScope::Pumps => 3,
            ConfigScope::Heaters => 4,
            ConfigScope::Valves => 5,
            ConfigScope::Chlorinators => 6,
            ConfigScope::ChemControllers => 7,
            ConfigScope::All => 0,
        }
    }

    /// Expansion used when a caller asks for everything
    pub fn expand(&self) -> Vec<ConfigScope> {
        match self {
            ConfigScope::All => vec![
                ConfigScope::Circuits,
                ConfigScope::Schedules,
                ConfigScope::Pumps,
                ConfigScope::Heaters,
                ConfigScope::Valves,
                ConfigScope::Chlorinators,
                ConfigScope::ChemControllers,
            ],
            other => vec![*other],
        }
    }
}

/// Per-intent options
#[derive(Debug, Clone, Copy)]
pub struct IntentOptions {
    /// Abort the intent past this instant
    pub deadline: Option<Instant>,
    /// Fail fast instead of parking behind an active delay
    pub immediate: bool,
    /// Outbound queue tier; API calls ride *user*, the scheduler
    /// *background*
    pub priority: crate::engine::Priority,
}

impl Default for IntentOptions {
    fn default() -> Self {
        Self {
            deadline: None,
            immediate: false,
            priority: crate::engine::Priority::User,
        }
    }
}

impl IntentOptions {
    /// Options for scheduler-originated commands
    pub fn background() -> Self {
        Self {
            priority: crate::engine::Priority::Background,
            ..Self::default()
        }
    }
}

/// Data form of an intent, used by the scheduler and the delay manager's
/// pending replay
#[derive(Debug, Clone, PartialEq)]
pub enum IntentRequest {
    SetCircuitState { id: u32, on: bool },
    SetCircuitGroupState { id: u32, on: bool },
    SetLightTheme { group_id: u32, theme: u8 },
    SetBodyHeatMode { body_id: u32, mode: u8 },
    SetHeatSetpoint { body_id: u32, temp: u8 },
    SetCoolSetpoint { body_id: u32, temp: u8 },
    SetPumpSpeed { id: u32, speed: PumpSpeedRequest },
    SetChlorinator { id: u32, settings: ChlorinatorRequest },
    SetChemSetpoint { id: u32, chem: Chemical, value: f64 },
    SetClock { when: DateTime<Utc> },
    RequestConfiguration { scope: ConfigScope },
    RequestStatus,
}

impl IntentRequest {
    /// Intent name used in `InvalidOperation` payloads and logs
    pub fn name(&self) -> &'static str {
        match self {
            IntentRequest::SetCircuitState { .. } => "setCircuitState",
            IntentRequest::SetCircuitGroupState { .. } => "setCircuitGroupState",
            IntentRequest::SetLightTheme { .. } => "setLightTheme",
            IntentRequest::SetBodyHeatMode { .. } => "setBodyHeatMode",
            IntentRequest::SetHeatSetpoint { .. } => "setHeatSetpoint",
            IntentRequest::SetCoolSetpoint { .. } => "setCoolSetpoint",
            IntentRequest::SetPumpSpeed { .. } => "setPumpSpeed",
            IntentRequest::SetChlorinator { .. } => "setChlorinator",
            IntentRequest::SetChemSetpoint { .. } => "setChemSetpoint",
            IntentRequest::SetClock { .. } => "setClock",
            IntentRequest::RequestConfiguration { .. } => "requestConfiguration",
            IntentRequest::RequestStatus => "requestStatus",
        }
    }
}

/// Shared handles every intent and decoder works against
#[derive(Clone)]
pub struct BoardCtx {
    pub changes: Arc<ChangeEngine>,
    pub delays: Arc<DelayManager>,
    pub engine: EngineHandle,
}

/// One controller variant's realization
#[async_trait]
pub trait Board: Send + Sync {
    fn controller_type(&self) -> ControllerType;
    fn maps(&self) -> &ValueMaps;
    fn supports(&self, cap: Capability) -> bool;

    async fn set_circuit_state(
        &self,
        ctx: &BoardCtx,
        id: u32,
        request: CircuitRequest,
        opts: IntentOptions,
    ) -> Result<()>;

    async fn set_circuit_group_state(
        &self,
        ctx: &BoardCtx,
        id: u32,
        on: bool,
        opts: IntentOptions,
    ) -> Result<()>;

    async fn set_light_theme(
        &self,
        ctx: &BoardCtx,
        group_id: u32,
        theme: u8,
        opts: IntentOptions,
    ) -> Result<()>;

    async fn set_body_heat_mode(
        &self,
        ctx: &BoardCtx,
        body_id: u32,
        mode: u8,
        opts: IntentOptions,
    ) -> Result<()>;

    async fn set_heat_setpoint(
        &self,
        ctx: &BoardCtx,
        body_id: u32,
        temp: u8,
        opts: IntentOptions,
    ) -> Result<()>;

    async fn set_cool_setpoint(
        &self,
        ctx: &BoardCtx,
        body_id: u32,
        temp: u8,
        opts: IntentOptions,
    ) -> Result<()>;

    async fn set_pump_speed(
        &self,
        ctx: &BoardCtx,
        id: u32,
        speed: PumpSpeedRequest,
        opts: IntentOptions,
    ) -> Result<()>;

    async fn set_chlorinator(
        &self,
        ctx: &BoardCtx,
        id: u32,
        settings: ChlorinatorRequest,
        opts: IntentOptions,
    ) -> Result<()>;

    async fn set_chem_setpoint(
        &self,
        ctx: &BoardCtx,
        id: u32,
        chem: Chemical,
        value: f64,
        opts: IntentOptions,
    ) -> Result<()>;

    async fn set_clock(&self, ctx: &BoardCtx, when: DateTime<Utc>, opts: IntentOptions)
        -> Result<()>;

    async fn request_configuration(
        &self,
        ctx: &BoardCtx,
        scope: ConfigScope,
        opts: IntentOptions,
    ) -> Result<()>;

    async fn request_status(&self, ctx: &BoardCtx, opts: IntentOptions) -> Result<()>;

    /// Decode one spontaneous inbound frame into model patches.
    /// Must not block; secondary effects ride the change engine.
    fn decode(&self, ctx: &BoardCtx, port_id: u8, frame: &Frame);

    /// Dispatch the data form of an intent to its handler
    async fn dispatch(
        &self,
        ctx: &BoardCtx,
        request: IntentRequest,
        opts: IntentOptions,
    ) -> Result<()> {
        match request {
            IntentRequest::SetCircuitState { id, on } => {
                let req = if on {
                    CircuitRequest::On
                } else {
                    CircuitRequest::Off
                };
                self.set_circuit_state(ctx, id, req, opts).await
            }
            IntentRequest::SetCircuitGroupState { id, on } => {
                self.set_circuit_group_state(ctx, id, on, opts).await
            }
            IntentRequest::SetLightTheme { group_id, theme } => {
                self.set_light_theme(ctx, group_id, theme, opts).await
            }
            IntentRequest::SetBodyHeatMode { body_id, mode } => {
                self.set_body_heat_mode(ctx, body_id, mode, opts).await
            }
            IntentRequest::SetHeatSetpoint { body_id, temp } => {
                self.set_heat_setpoint(ctx, body_id, temp, opts).await
            }
            IntentRequest::SetCoolSetpoint { body_id, temp } => {
                self.set_cool_setpoint(ctx, body_id, temp, opts).await
            }
            IntentRequest::SetPumpSpeed { id, speed } => {
                self.set_pump_speed(ctx, id, speed, opts).await
            }
            IntentRequest::SetChlorinator { id, settings } => {
                self.set_chlorinator(ctx, id, settings, opts).await
            }
            IntentRequest::SetChemSetpoint { id, chem, value } => {
                self.set_chem_setpoint(ctx, id, chem, value, opts).await
            }
            IntentRequest::SetClock { when } => self.set_clock(ctx, when, opts).await,
            IntentRequest::RequestConfiguration { scope } => {
                self.request_configuration(ctx, scope, opts).await
            }
            IntentRequest::RequestStatus => self.request_status(ctx, opts).await,
        }
    }
}

/// Build the board realization for a controller variant
pub fn board_for(controller_type: ControllerType) -> Box<dyn Board> {
    match controller_type {
        ControllerType::IntelliCenter => Box::new(PanelBoard::new(intellicenter::profile())),
        ControllerType::IntelliTouch => Box::new(PanelBoard::new(intellitouch::profile())),
        ControllerType::EasyTouch => Box::new(PanelBoard::new(easytouch::profile())),
        ControllerType::SunTouch => Box::new(PanelBoard::new(suntouch::profile())),
        ControllerType::IntelliCom => Box::new(PanelBoard::new(intellicom::profile())),
        ControllerType::AquaLink => Box::new(PanelBoard::new(aqualink::profile())),
        ControllerType::Standalone => Box::new(standalone::StandaloneBoard::new()),
    }
}

/// `InvalidOperation` for an intent the variant lacks
pub fn unsupported(controller_type: ControllerType, intent: &str) -> TritonError {
    TritonError::invalid_operation(controller_type.tag(), intent)
}

/// The interlock operation key guarding heat on one body
/// ("pool-heat" / "spa-heat")
pub fn heat_op_key(body_type: u8) -> &'static str {
    match body_type {
        1 => "spa-heat",
        _ => "pool-heat",
    }
}

/// Whether a heat mode is permitted by a body's heat-sources bitmask
pub fn mode_permitted_by_sources(mode: u8, heat_sources: u8) -> bool {
    use valuemaps::heat_mode;
    match mode {
        heat_mode::OFF => true,
        heat_mode::HEATER => heat_sources & 0x02 != 0,
        heat_mode::SOLAR_PREFERRED | heat_mode::SOLAR => heat_sources & 0x04 != 0,
        heat_mode::HEAT_PUMP => heat_sources & 0x20 != 0,
        _ => false,
    }
}
