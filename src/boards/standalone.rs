//! Standalone board
//!
//! No attached panel: the core itself is the authority for relays and
//! sensors, so intents validate, respect the delay manager, and commit
//! final state directly. Nothing is optimistic and nothing reaches a
//! wire. Schedules and egg timers are host-driven by the scheduler.

use crate::boards::valuemaps::{pump_type, ValueMaps, STANDALONE};
use crate::boards::{
    heat_op_key, mode_permitted_by_sources, unsupported, BoardCtx, Capability, Chemical,
    ChlorinatorRequest, CircuitRequest, ConfigScope, IntentOptions, IntentRequest,
    PumpSpeedRequest,
};
use crate::config::ControllerType;
use crate::delays::{DelayKey, Purpose};
use crate::error::{Result, TritonError};
use crate::model::EntityKind;
use crate::protocol::Frame;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

const CAPABILITIES: &[Capability] = &[
    Capability::DualBody,
    Capability::LightThemes,
    Capability::IntelliChem,
    Capability::ValveConfig,
];

/// Host-driven realization for unattached operation
pub struct StandaloneBoard {
    maps: &'static ValueMaps,
}

impl StandaloneBoard {
    pub fn new() -> Self {
        Self { maps: &STANDALONE }
    }
}

impl Default for StandaloneBoard {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl crate::boards::Board for StandaloneBoard {
    fn controller_type(&self) -> ControllerType {
        ControllerType::Standalone
    }

    fn maps(&self) -> &ValueMaps {
        self.maps
    }

    fn supports(&self, cap: Capability) -> bool {
        CAPABILITIES.contains(&cap)
    }

    async fn set_circuit_state(
        &self,
        ctx: &BoardCtx,
        id: u32,
        request: CircuitRequest,
        opts: IntentOptions,
    ) -> Result<()> {
        let snapshot = ctx.changes.with_model(|m| {
            m.config.circuits.get(id).map(|c| {
                (
                    c.function,
                    c.egg_timer,
                    m.state.circuits.get(id).map(|s| s.is_on).unwrap_or(false),
                )
            })
        });
        let Some((function, egg_timer, current)) = snapshot else {
            return Err(TritonError::not_found("circuit", id));
        };

        let desired = match request {
            CircuitRequest::On => true,
            CircuitRequest::Off => false,
            CircuitRequest::Toggle => !current,
        };
        if desired == current {
            return Ok(());
        }

        let high_current = matches!(
            function,
            crate::boards::valuemaps::circuit_function::POOL
                | crate::boards::valuemaps::circuit_function::SPA
        );
        if desired && high_current {
            let remaining = ctx.delays.stagger_remaining();
            if !remaining.is_zero() {
                let key = DelayKey::new(EntityKind::Circuit, id, Purpose::StartupStagger);
                ctx.delays.start(key, remaining);
                if !ctx.delays.gate(
                    key,
                    IntentRequest::SetCircuitState { id, on: desired },
                    opts.immediate,
                )? {
                    return Ok(());
                }
            }
        }

        ctx.changes.commit(|txn| {
            txn.patch_circuit_state(id, |c| {
                c.is_on = desired;
                c.pending = false;
                c.end_time = if desired && egg_timer > 0 {
                    Some(Utc::now() + chrono::Duration::minutes(egg_timer as i64))
                } else {
                    None
                };
            })
        })?;

        if desired && high_current {
            ctx.delays.note_high_current_start();
        }
        Ok(())
    }

    async fn set_circuit_group_state(
        &self,
        ctx: &BoardCtx,
        id: u32,
        on: bool,
        opts: IntentOptions,
    ) -> Result<()> {
        let members = ctx.changes.with_model(|m| {
            m.config
                .circuit_groups
                .get(id)
                .map(|g| g.circuits.clone())
        });
        let Some(members) = members else {
            return Err(TritonError::not_found("circuitGroup", id));
        };

        for member in &members {
            let target = if on { member.desired_state } else { false };
            let request = if target {
                CircuitRequest::On
            } else {
                CircuitRequest::Off
            };
            self.set_circuit_state(ctx, member.id, request, opts).await?;
        }
        ctx.changes.commit(|txn| {
            txn.patch_circuit_group_state(id, |g| g.is_on = on)
        })
    }

    async fn set_light_theme(
        &self,
        ctx: &BoardCtx,
        group_id: u32,
        theme: u8,
        _opts: IntentOptions,
    ) -> Result<()> {
        if !self.maps.light_themes.contains(theme) {
            return Err(TritonError::invalid_data(
                "lightGroup".to_string(),
                group_id,
                "theme".to_string(),
                format!("theme {} is not defined", theme),
            ));
        }
        let members = ctx.changes.with_model(|m| {
            m.config.light_groups.get(group_id).map(|g| g.circuits.clone())
        });
        let Some(members) = members else {
            return Err(TritonError::not_found("lightGroup", group_id));
        };

        ctx.changes.commit(|txn| {
            txn.patch_light_group_state(group_id, |g| g.lighting_theme = Some(theme))?;
            for member in &members {
                txn.patch_circuit_state(member.id, |c| c.lighting_theme = Some(theme))
                    .ok();
            }
            Ok(())
        })
    }

    async fn set_body_heat_mode(
        &self,
        ctx: &BoardCtx,
        body_id: u32,
        mode: u8,
        _opts: IntentOptions,
    ) -> Result<()> {
        let body = ctx.changes.with_model(|m| {
            m.config
                .bodies
                .get(body_id)
                .map(|b| (b.body_type, b.heat_sources))
        });
        let Some((body_type, heat_sources)) = body else {
            return Err(TritonError::not_found("body", body_id));
        };
        if !self.maps.heat_modes.contains(mode) {
            return Err(TritonError::invalid_data(
                "body".to_string(),
                body_id,
                "heatMode".to_string(),
                format!("mode {} is not defined", mode),
            ));
        }
        if !mode_permitted_by_sources(mode, heat_sources) {
            return Err(TritonError::invalid_data(
                "body".to_string(),
                body_id,
                "heatMode".to_string(),
                "mode is not permitted by the body's heat sources".to_string(),
            ));
        }
        ctx.delays.check_interlock(heat_op_key(body_type))?;

        ctx.changes.commit(|txn| {
            txn.patch_body_state(body_id, |b| b.heat_mode = mode)
        })
    }

    async fn set_heat_setpoint(
        &self,
        ctx: &BoardCtx,
        body_id: u32,
        temp: u8,
        _opts: IntentOptions,
    ) -> Result<()> {
        let exists = ctx.changes.with_model(|m| m.config.bodies.contains(body_id));
        if !exists {
            return Err(TritonError::not_found("body", body_id));
        }
        if !self.maps.heat_setpoint_range.contains(&temp) {
            return Err(TritonError::invalid_data(
                "body".to_string(),
                body_id,
                "setPoint".to_string(),
                format!(
                    "temp {} outside permitted range {}..={}",
                    temp,
                    self.maps.heat_setpoint_range.start(),
                    self.maps.heat_setpoint_range.end()
                ),
            ));
        }
        ctx.changes.commit(|txn| {
            txn.patch_body_state(body_id, |b| b.set_point = temp)
        })
    }

    async fn set_cool_setpoint(
        &self,
        _ctx: &BoardCtx,
        _body_id: u32,
        _temp: u8,
        _opts: IntentOptions,
    ) -> Result<()> {
        Err(unsupported(ControllerType::Standalone, "setCoolSetpoint"))
    }

    async fn set_pump_speed(
        &self,
        ctx: &BoardCtx,
        id: u32,
        speed: PumpSpeedRequest,
        opts: IntentOptions,
    ) -> Result<()> {
        let pump = ctx
            .changes
            .with_model(|m| m.config.pumps.get(id).map(|p| p.pump_type));
        let Some(ptype) = pump else {
            return Err(TritonError::not_found("pump", id));
        };

        match speed {
            PumpSpeedRequest::Rpm(rpm) => {
                if !matches!(ptype, pump_type::VS | pump_type::VSF) {
                    return Err(TritonError::invalid_data(
                        "pump".to_string(),
                        id,
                        "rpm".to_string(),
                        "pump type does not accept RPM".to_string(),
                    ));
                }
                if !self.maps.pump_rpm_range.contains(&rpm) {
                    return Err(TritonError::invalid_data(
                        "pump".to_string(),
                        id,
                        "rpm".to_string(),
                        format!("rpm {} outside drive range", rpm),
                    ));
                }
            }
            PumpSpeedRequest::Flow(gpm) => {
                if !matches!(ptype, pump_type::VF | pump_type::VSF) {
                    return Err(TritonError::invalid_data(
                        "pump".to_string(),
                        id,
                        "flow".to_string(),
                        "pump type does not accept flow".to_string(),
                    ));
                }
                if !self.maps.pump_flow_range.contains(&gpm) {
                    return Err(TritonError::invalid_data(
                        "pump".to_string(),
                        id,
                        "flow".to_string(),
                        format!("flow {} outside drive range", gpm),
                    ));
                }
            }
            PumpSpeedRequest::Speed(preset) => {
                if preset == 0 || preset > 4 {
                    return Err(TritonError::invalid_data(
                        "pump".to_string(),
                        id,
                        "speed".to_string(),
                        format!("preset {} outside 1..=4", preset),
                    ));
                }
            }
        }

        let key = DelayKey::new(EntityKind::Pump, id, Purpose::ChangeCooldown);
        if !ctx
            .delays
            .gate(key, IntentRequest::SetPumpSpeed { id, speed }, opts.immediate)?
        {
            return Ok(());
        }

        ctx.changes.commit(|txn| {
            txn.patch_pump_state(id, |p| match speed {
                PumpSpeedRequest::Rpm(rpm) => p.rpm = rpm,
                PumpSpeedRequest::Flow(gpm) => p.flow = gpm,
                PumpSpeedRequest::Speed(_) => {}
            })
        })?;
        ctx.delays.start_cooldown(EntityKind::Pump, id);
        Ok(())
    }

    async fn set_chlorinator(
        &self,
        ctx: &BoardCtx,
        id: u32,
        settings: ChlorinatorRequest,
        _opts: IntentOptions,
    ) -> Result<()> {
        let existing = ctx
            .changes
            .with_model(|m| m.config.chlorinators.get(id).cloned());
        let Some(mut config) = existing else {
            return Err(TritonError::not_found("chlorinator", id));
        };
        for (field, value) in [
            ("poolSetpoint", settings.pool_setpoint),
            ("spaSetpoint", settings.spa_setpoint),
        ] {
            if let Some(v) = value {
                if v > 100 {
                    return Err(TritonError::invalid_data(
                        "chlorinator".to_string(),
                        id,
                        field.to_string(),
                        format!("{} exceeds 100 percent", v),
                    ));
                }
            }
        }

        if let Some(v) = settings.pool_setpoint {
            config.pool_setpoint = v;
        }
        if let Some(v) = settings.spa_setpoint {
            config.spa_setpoint = v;
        }
        if let Some(v) = settings.super_chlor_hours {
            config.super_chlor_hours = v;
        }

        ctx.changes.commit(|txn| {
            txn.upsert_chlorinator_config(config);
            txn.patch_chlorinator_state(id, |s| {
                if let Some(v) = settings.super_chlor {
                    s.super_chlor = v;
                }
            })
        })
    }

    async fn set_chem_setpoint(
        &self,
        ctx: &BoardCtx,
        id: u32,
        chem: Chemical,
        value: f64,
        _opts: IntentOptions,
    ) -> Result<()> {
        let existing = ctx
            .changes
            .with_model(|m| m.config.chem_controllers.get(id).cloned());
        let Some(mut config) = existing else {
            return Err(TritonError::not_found("chemController", id));
        };
        let range = match chem {
            Chemical::Ph => &self.maps.ph_setpoint_range,
            Chemical::Orp => &self.maps.orp_setpoint_range,
        };
        if !range.contains(&value) {
            return Err(TritonError::invalid_data(
                "chemController".to_string(),
                id,
                chem.tag().to_string(),
                format!(
                    "setpoint {} outside permitted range {}..={}",
                    value,
                    range.start(),
                    range.end()
                ),
            ));
        }
        match chem {
            Chemical::Ph => config.ph.setpoint = value,
            Chemical::Orp => config.orp.setpoint = value,
        }
        ctx.changes
            .commit(|txn| txn.upsert_chem_controller_config(config));
        Ok(())
    }

    async fn set_clock(
        &self,
        _ctx: &BoardCtx,
        _when: DateTime<Utc>,
        _opts: IntentOptions,
    ) -> Result<()> {
        // The host clock is already the authority
        Ok(())
    }

    async fn request_configuration(
        &self,
        _ctx: &BoardCtx,
        _scope: ConfigScope,
        _opts: IntentOptions,
    ) -> Result<()> {
        // Nothing to discover without an attached panel
        Ok(())
    }

    async fn request_status(&self, _ctx: &BoardCtx, _opts: IntentOptions) -> Result<()> {
        Ok(())
    }

    fn decode(&self, _ctx: &BoardCtx, _port_id: u8, _frame: &Frame) {
        // No attached panel sends spontaneous status
    }
}
