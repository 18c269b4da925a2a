//! Shared panel realization
//!
//! All attached-panel variants (IntelliTouch, EasyTouch, SunTouch,
//! IntelliCom, AquaLink on the Pentair-16 framing; IntelliCenter on
//! Pentair-2) share this realization, parameterized by a variant profile:
//! value maps, action codes, bus addresses, and the capability set. The
//! per-variant modules are tables; the behavior lives here.

use crate::boards::valuemaps::{heat_mode, pump_type, ValueMaps};
use crate::boards::{
    heat_op_key, mode_permitted_by_sources, unsupported, Board, BoardCtx, Capability, Chemical,
    ChlorinatorRequest, CircuitRequest, ConfigScope, IntentOptions, IntentRequest, PumpSpeedRequest,
};
use crate::config::ControllerType;
use crate::delays::{DelayKey, Purpose};
use crate::engine::{Priority, ResponseMatch};
use crate::error::{Result, TritonError};
use crate::logging::get_logger;
use crate::model::config::{CircuitConfig, ScheduleConfig};
use crate::model::state::controller_status;
use crate::model::EntityKind;
use crate::protocol::Frame;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Timelike, Utc};

/// Wire action codes one panel variant speaks
#[derive(Debug, Clone, Copy)]
pub struct ActionSet {
    pub ack: u8,
    pub status: u8,
    pub circuit_set: u8,
    pub heat_set: u8,
    pub clock_set: u8,
    pub light_theme: u8,
    pub chlor_set: u8,
    pub chlor_status: u8,
    pub chem_set: u8,
    pub chem_status: u8,
    pub pump_status: u8,
    pub get_config: u8,
    pub get_status: u8,
    pub circuit_config: u8,
    pub schedule_config: u8,
}

impl Default for ActionSet {
    fn default() -> Self {
        Self {
            ack: 0x01,
            status: 0x02,
            circuit_set: 0x86,
            heat_set: 0x88,
            clock_set: 0x85,
            light_theme: 0x60,
            chlor_set: 0x99,
            chlor_status: 0x19,
            chem_set: 0x92,
            chem_status: 0x12,
            pump_status: 0x07,
            get_config: 0xDE,
            get_status: 0xC2,
            circuit_config: 0x0B,
            schedule_config: 0x11,
        }
    }
}

/// Everything that distinguishes one panel variant from another
pub struct VariantProfile {
    pub controller_type: ControllerType,
    pub maps: &'static ValueMaps,
    pub actions: ActionSet,
    /// Pentair-16 preamble flag byte; ignored on Pentair-2
    pub flag: u8,
    /// Panel bus address
    pub panel_address: u8,
    /// Our address on the bus
    pub host_address: u8,
    /// IntelliChem source address base; controller id 1 answers from here
    pub chem_address_base: u8,
    pub capabilities: &'static [Capability],
}

/// Variant-parameterized panel board
pub struct PanelBoard {
    profile: VariantProfile,
    logger: crate::logging::StructuredLogger,
}

impl PanelBoard {
    pub fn new(profile: VariantProfile) -> Self {
        let logger = get_logger(profile.controller_type.tag());
        Self { profile, logger }
    }

    fn frame(&self, action: u8, payload: Vec<u8>) -> Frame {
        Frame::new(
            self.profile.flag,
            self.profile.panel_address,
            self.profile.host_address,
            action,
            payload,
        )
    }

    fn ack_for(&self, action: u8) -> ResponseMatch {
        ResponseMatch::ack(self.profile.panel_address, self.profile.actions.ack, 0, action)
    }

    /// Queue a command frame and await the panel's ack
    async fn command(&self, ctx: &BoardCtx, frame: Frame, opts: IntentOptions) -> Result<()> {
        let action = frame.action;
        ctx.engine
            .request(frame, opts.priority, Some(self.ack_for(action)), opts.deadline)
            .await
            .map(drop)
    }

    fn require(&self, cap: Capability, intent: &str) -> Result<()> {
        if self.supports(cap) {
            Ok(())
        } else {
            Err(unsupported(self.profile.controller_type, intent))
        }
    }

    /// Gate an operation behind a delay key; `Ok(false)` means parked
    fn gate(
        &self,
        ctx: &BoardCtx,
        key: DelayKey,
        op: IntentRequest,
        opts: IntentOptions,
    ) -> Result<bool> {
        ctx.delays.gate(key, op, opts.immediate)
    }

    // Decoders ----------------------------------------------------------

    /// Controller status broadcast.
    ///
    /// Layout: `[hour, min, mask0..mask4, mode, flags, heatStatus,
    /// body1Temp, body2Temp, airTemp, solarTemp, heatModes]`; circuit n
    /// occupies bit (n-1)%8 of mask[(n-1)/8], freeze is flags bit 3, and
    /// the heat-mode/status bytes pack pool in bits 0-1 and spa in 2-3.
    fn decode_status(&self, ctx: &BoardCtx, payload: &[u8]) {
        if payload.len() < 15 {
            return;
        }
        let masks = &payload[2..7];
        let mode = payload[7];
        let freeze = payload[8] & 0x08 != 0;
        let heat_status = payload[9];
        let body1_temp = payload[10];
        let body2_temp = payload[11];
        let air_temp = payload[12];
        let solar_temp = payload[13];
        let heat_modes = payload[14];

        let circuit_on = |id: u32| -> bool {
            let idx = (id - 1) as usize;
            masks
                .get(idx / 8)
                .map(|mask| mask & (1 << (idx % 8)) != 0)
                .unwrap_or(false)
        };

        let (circuit_ids, body_ids, heater_ids, pool_on, spa_on) = ctx.changes.with_model(|m| {
            let circuit_ids: Vec<u32> = m.config.circuits.ids().filter(|id| *id >= 1).collect();
            let body_ids: Vec<(u32, u8, u8)> = m
                .config
                .bodies
                .iter()
                .map(|b| {
                    let prev = m
                        .state
                        .bodies
                        .get(b.id)
                        .map(|s| s.heat_status)
                        .unwrap_or(0);
                    (b.id, b.body_type, prev)
                })
                .collect();
            let heater_ids: Vec<(u32, u8)> = m
                .config
                .heaters
                .iter()
                .map(|h| (h.id, h.body))
                .collect();
            let on_with_function = |function: u8| {
                m.config
                    .circuits
                    .iter()
                    .filter(|c| c.function == function)
                    .any(|c| circuit_on(c.id))
            };
            (
                circuit_ids,
                body_ids,
                heater_ids,
                on_with_function(crate::boards::valuemaps::circuit_function::POOL),
                on_with_function(crate::boards::valuemaps::circuit_function::SPA),
            )
        });

        ctx.changes.commit(|txn| {
            txn.equipment_state(|e| {
                e.mode = mode;
                e.freeze = freeze;
                if e.status.val == controller_status::UNKNOWN {
                    e.status.val = controller_status::READY;
                    e.status.name = controller_status::name(controller_status::READY).to_string();
                    e.status.percent = 100;
                }
            });
            txn.temps(|t| {
                t.air = Some(air_temp as f64);
                t.solar = Some(solar_temp as f64);
            });
            for id in circuit_ids {
                let on = circuit_on(id);
                txn.patch_circuit_state(id, |c| {
                    c.is_on = on;
                    c.pending = false;
                    if !on {
                        c.end_time = None;
                    }
                })
                .ok();
            }
            for (id, body_type, prev_heat) in body_ids {
                let temp = if id == 1 { body1_temp } else { body2_temp };
                let shift = if body_type == 1 { 2 } else { 0 };
                let is_on = if body_type == 1 { spa_on } else { pool_on };
                let heating = (heat_status >> shift) & 0x03;
                txn.patch_body_state(id, |b| {
                    b.temp = Some(temp as f64);
                    b.heat_status = heating;
                    b.heat_mode = (heat_modes >> shift) & 0x03;
                    b.is_on = is_on;
                    b.pending = false;
                })
                .ok();

                // Heater off transition starts the pump run-on window
                if prev_heat != 0 && heating == 0 {
                    ctx.delays.start_heater_run_on(id);
                }

                // Heaters plumbed to this body mirror its heat status
                let body_bit = 1u8 << (id.saturating_sub(1).min(7));
                for (heater_id, body_mask) in &heater_ids {
                    if body_mask & body_bit == 0 {
                        continue;
                    }
                    txn.patch_heater_state(*heater_id, |h| {
                        let was_on = h.is_on;
                        h.is_on = heating != 0;
                        if h.is_on && !was_on {
                            h.start_time = Some(Utc::now());
                            h.end_time = None;
                        } else if !h.is_on && was_on {
                            h.end_time = Some(Utc::now());
                        }
                    })
                    .ok();
                }
            }
            // Derived virtual circuits
            txn.virtual_circuit(245, |v| {
                v.name = "Freeze".to_string();
                v.is_on = freeze;
            });
            txn.virtual_circuit(246, |v| {
                v.name = "Heater".to_string();
                v.is_on = heat_status & 0x0F != 0;
            });
        });
    }

    /// Pump status, sent from the drive's own bus address.
    ///
    /// Layout: `[status, driveState, _, wattsHi, wattsLo, rpmHi, rpmLo,
    /// flow, ppc]`.
    fn decode_pump_status(&self, ctx: &BoardCtx, src: u8, payload: &[u8]) {
        if payload.len() < 9 {
            return;
        }
        let pump_id =
            ctx.changes
                .with_model(|m| m.config.pumps.find(|p| p.address == src).map(|p| p.id));
        let Some(id) = pump_id else {
            return;
        };

        let status = payload[0];
        let drive_state = payload[1];
        let watts = u16::from_be_bytes([payload[3], payload[4]]) as u32;
        let rpm = u16::from_be_bytes([payload[5], payload[6]]) as u32;
        let flow = payload[7] as u32;

        ctx.changes.commit(|txn| {
            txn.patch_pump_state(id, |p| {
                p.status = status;
                p.drive_state = drive_state;
                p.watts = watts;
                p.rpm = rpm;
                p.flow = flow;
                p.pending = false;
            })
            .ok();
        });
    }

    /// Chlorinator status.
    ///
    /// Layout: `[currentOutput, saltLevel/50, statusBits, superFlag,
    /// superHoursRemaining]`.
    fn decode_chlor_status(&self, ctx: &BoardCtx, payload: &[u8]) {
        if payload.len() < 5 {
            return;
        }
        let exists = ctx
            .changes
            .with_model(|m| m.config.chlorinators.contains(1));
        if !exists {
            return;
        }
        let current = payload[0];
        let salt = payload[1] as u32 * 50;
        let status = payload[2];
        let super_chlor = payload[3] != 0;
        let super_hours = payload[4];

        ctx.changes.commit(|txn| {
            txn.patch_chlorinator_state(1, |c| {
                c.current_output = current;
                c.salt_level = salt;
                c.status = status;
                c.salt_required = status & 0x06 != 0;
                c.super_chlor = super_chlor;
                c.super_chlor_remaining_hours = super_hours;
                c.pending = false;
            })
            .ok();
        });
    }

    /// IntelliChem status, sent from the chem controller's address.
    ///
    /// Layout: `[phHi, phLo (x100), orpHi, orpLo, phTank (0-7),
    /// orpTank (0-7), alarms, warnings, doseTimeHi, doseTimeLo,
    /// doseVolHi, doseVolLo]`.
    fn decode_chem_status(&self, ctx: &BoardCtx, src: u8, payload: &[u8]) {
        if payload.len() < 12 {
            return;
        }
        let id = (src - self.profile.chem_address_base) as u32 + 1;
        let exists = ctx
            .changes
            .with_model(|m| m.config.chem_controllers.contains(id));
        if !exists {
            return;
        }

        let ph = u16::from_be_bytes([payload[0], payload[1]]) as f64 / 100.0;
        let orp = u16::from_be_bytes([payload[2], payload[3]]) as f64;
        let ph_tank = (payload[4].min(7)) as f64 / 7.0;
        let orp_tank = (payload[5].min(7)) as f64 / 7.0;
        let alarms = payload[6] as u32;
        let warnings = payload[7] as u32;
        let dose_time = u16::from_be_bytes([payload[8], payload[9]]) as u32;
        let dose_volume = u16::from_be_bytes([payload[10], payload[11]]) as u32;

        ctx.changes.commit(|txn| {
            txn.patch_chem_controller_state(id, |c| {
                c.ph.level = ph;
                c.ph.tank_level = ph_tank;
                c.ph.dose_time = dose_time;
                c.ph.dose_volume = dose_volume;
                c.orp.level = orp;
                c.orp.tank_level = orp_tank;
                c.alarms = alarms;
                c.warnings = warnings;
                c.pending = false;
            })
            .ok();
        });
    }

    /// Circuit definition from discovery.
    ///
    /// Layout: `[id, function, flags, name...]`; flags bit 0 is
    /// showInFeatures, bit 1 freeze protection.
    fn decode_circuit_config(&self, ctx: &BoardCtx, payload: &[u8]) {
        if payload.len() < 3 {
            return;
        }
        let id = payload[0] as u32;
        if id == 0 {
            return;
        }
        let function = payload[1];
        let flags = payload[2];
        let name = String::from_utf8_lossy(&payload[3..])
            .trim_matches(char::from(0))
            .trim()
            .to_string();

        let existing = ctx
            .changes
            .with_model(|m| m.config.circuits.get(id).cloned());
        let mut item = existing.unwrap_or(CircuitConfig {
            id,
            ..Default::default()
        });
        item.function = function;
        item.show_in_features = flags & 0x01 != 0;
        item.freeze_protect = flags & 0x02 != 0;
        if !name.is_empty() {
            item.name = name;
        }

        ctx.changes.commit(|txn| txn.upsert_circuit_config(item));
    }

    /// Schedule definition from discovery.
    ///
    /// Layout: `[id, circuit, startHi, startLo, endHi, endLo, days,
    /// flags]`; flags bit 0 marks a midnight wrap.
    fn decode_schedule_config(&self, ctx: &BoardCtx, payload: &[u8]) {
        if payload.len() < 8 {
            return;
        }
        let id = payload[0] as u32;
        if id == 0 {
            return;
        }
        let circuit = payload[1] as u32;
        let start = u16::from_be_bytes([payload[2], payload[3]]);
        let end = u16::from_be_bytes([payload[4], payload[5]]);
        let days = payload[6];
        let wraps = payload[7] & 0x01 != 0;

        let circuit_exists = ctx.changes.with_model(|m| m.config.circuits.contains(circuit));
        if !circuit_exists {
            self.logger.debug(&format!(
                "Dropping schedule {} for unknown circuit {}",
                id, circuit
            ));
            return;
        }

        let existing = ctx
            .changes
            .with_model(|m| m.config.schedules.get(id).cloned());
        let mut item = existing.unwrap_or(ScheduleConfig {
            id,
            ..Default::default()
        });
        item.circuit = circuit;
        item.start_time = start;
        item.end_time = end;
        item.days = days;
        item.wraps_midnight = wraps;
        item.normalize();

        ctx.changes.commit(|txn| txn.upsert_schedule_config(item));
    }
}

#[async_trait]
impl crate::boards::Board for PanelBoard {
    fn controller_type(&self) -> ControllerType {
        self.profile.controller_type
    }

    fn maps(&self) -> &ValueMaps {
        self.profile.maps
    }

    fn supports(&self, cap: Capability) -> bool {
        self.profile.capabilities.contains(&cap)
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

        // No change required: coalesce without touching the wire
        if desired == current {
            return Ok(());
        }

        // High-current loads stagger their starts; turning one off waits
        // out any heater run-on
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
                if !self.gate(ctx, key, IntentRequest::SetCircuitState { id, on: desired }, opts)? {
                    return Ok(());
                }
            }
        }
        if !desired && high_current {
            let bodies = ctx
                .changes
                .with_model(|m| m.config.bodies.ids().collect::<Vec<u32>>());
            for body_id in bodies {
                let key = DelayKey::new(EntityKind::Heater, body_id, Purpose::HeaterCooldown);
                if !self.gate(ctx, key, IntentRequest::SetCircuitState { id, on: desired }, opts)? {
                    return Ok(());
                }
            }
        }

        // Optimistic state, confirmed by the ack or the next status frame
        ctx.changes.commit(|txn| {
            txn.patch_circuit_state(id, |c| {
                c.is_on = desired;
                c.pending = true;
                c.end_time = if desired && egg_timer > 0 {
                    Some(Utc::now() + chrono::Duration::minutes(egg_timer as i64))
                } else {
                    None
                };
            })
        })?;

        let frame = self.frame(
            self.profile.actions.circuit_set,
            vec![id as u8, desired as u8],
        );
        match self.command(ctx, frame, opts).await {
            Ok(()) => {
                ctx.changes.commit(|txn| {
                    txn.patch_circuit_state(id, |c| c.pending = false)
                })?;
                if desired && high_current {
                    ctx.delays.note_high_current_start();
                }
                Ok(())
            }
            Err(e) => {
                ctx.changes.commit(|txn| {
                    txn.patch_circuit_state(id, |c| {
                        c.is_on = current;
                        c.pending = false;
                        c.end_time = None;
                    })
                })?;
                Err(e)
            }
        }
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
            txn.patch_circuit_group_state(id, |g| {
                g.is_on = on;
                g.pending = false;
            })
        })?;
        Ok(())
    }

    async fn set_light_theme(
        &self,
        ctx: &BoardCtx,
        group_id: u32,
        theme: u8,
        opts: IntentOptions,
    ) -> Result<()> {
        self.require(Capability::LightThemes, "setLightTheme")?;
        if !self.profile.maps.light_themes.contains(theme) {
            return Err(TritonError::invalid_data(
                "lightGroup".to_string(),
                group_id,
                "theme".to_string(),
                format!("theme {} is not defined for this variant", theme),
            ));
        }
        let members = ctx.changes.with_model(|m| {
            m.config.light_groups.get(group_id).map(|g| g.circuits.clone())
        });
        let Some(members) = members else {
            return Err(TritonError::not_found("lightGroup", group_id));
        };

        let frame = self.frame(
            self.profile.actions.light_theme,
            vec![theme, group_id as u8],
        );
        self.command(ctx, frame, opts).await?;

        ctx.changes.commit(|txn| {
            txn.patch_light_group_state(group_id, |g| {
                g.lighting_theme = Some(theme);
                g.pending = false;
            })?;
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
        opts: IntentOptions,
    ) -> Result<()> {
        let body = ctx.changes.with_model(|m| {
            m.config.bodies.get(body_id).map(|b| {
                (
                    b.body_type,
                    b.heat_sources,
                    m.state
                        .bodies
                        .get(body_id)
                        .map(|s| (s.heat_mode, s.set_point))
                        .unwrap_or((0, 0)),
                )
            })
        });
        let Some((body_type, heat_sources, (current_mode, set_point))) = body else {
            return Err(TritonError::not_found("body", body_id));
        };

        if !self.profile.maps.heat_modes.contains(mode) {
            return Err(TritonError::invalid_data(
                "body".to_string(),
                body_id,
                "heatMode".to_string(),
                format!("mode {} is not defined for this variant", mode),
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

        // Interlocks refuse before anything reaches the wire
        ctx.delays.check_interlock(heat_op_key(body_type))?;

        if mode == current_mode {
            return Ok(());
        }

        ctx.changes.commit(|txn| {
            txn.patch_body_state(body_id, |b| {
                b.heat_mode = mode;
                b.pending = true;
            })
        })?;

        let frame = self.frame(
            self.profile.actions.heat_set,
            vec![body_id as u8, mode, set_point],
        );
        match self.command(ctx, frame, opts).await {
            Ok(()) => ctx.changes.commit(|txn| {
                txn.patch_body_state(body_id, |b| b.pending = false)
            }),
            Err(e) => {
                ctx.changes.commit(|txn| {
                    txn.patch_body_state(body_id, |b| {
                        b.heat_mode = current_mode;
                        b.pending = false;
                    })
                })?;
                Err(e)
            }
        }
    }

    async fn set_heat_setpoint(
        &self,
        ctx: &BoardCtx,
        body_id: u32,
        temp: u8,
        opts: IntentOptions,
    ) -> Result<()> {
        let body = ctx.changes.with_model(|m| {
            m.config.bodies.get(body_id).map(|_| {
                m.state
                    .bodies
                    .get(body_id)
                    .map(|s| (s.heat_mode, s.set_point))
                    .unwrap_or((0, 0))
            })
        });
        let Some((mode, current)) = body else {
            return Err(TritonError::not_found("body", body_id));
        };

        // Clamp-and-reject: out-of-range never produces a clamped frame
        if !self.profile.maps.heat_setpoint_range.contains(&temp) {
            return Err(TritonError::invalid_data(
                "body".to_string(),
                body_id,
                "setPoint".to_string(),
                format!(
                    "temp {} outside permitted range {}..={}",
                    temp,
                    self.profile.maps.heat_setpoint_range.start(),
                    self.profile.maps.heat_setpoint_range.end()
                ),
            ));
        }

        if temp == current {
            return Ok(());
        }

        ctx.changes.commit(|txn| {
            txn.patch_body_state(body_id, |b| {
                b.set_point = temp;
                b.pending = true;
            })
        })?;

        let frame = self.frame(
            self.profile.actions.heat_set,
            vec![body_id as u8, mode, temp],
        );
        match self.command(ctx, frame, opts).await {
            Ok(()) => ctx.changes.commit(|txn| {
                txn.patch_body_state(body_id, |b| b.pending = false)
            }),
            Err(e) => {
                ctx.changes.commit(|txn| {
                    txn.patch_body_state(body_id, |b| {
                        b.set_point = current;
                        b.pending = false;
                    })
                })?;
                Err(e)
            }
        }
    }

    async fn set_cool_setpoint(
        &self,
        ctx: &BoardCtx,
        body_id: u32,
        temp: u8,
        opts: IntentOptions,
    ) -> Result<()> {
        self.require(Capability::CoolSetpoint, "setCoolSetpoint")?;
        let exists = ctx.changes.with_model(|m| m.config.bodies.contains(body_id));
        if !exists {
            return Err(TritonError::not_found("body", body_id));
        }
        if !self.profile.maps.cool_setpoint_range.contains(&temp) {
            return Err(TritonError::invalid_data(
                "body".to_string(),
                body_id,
                "coolSetPoint".to_string(),
                format!(
                    "temp {} outside permitted range {}..={}",
                    temp,
                    self.profile.maps.cool_setpoint_range.start(),
                    self.profile.maps.cool_setpoint_range.end()
                ),
            ));
        }

        ctx.changes.commit(|txn| {
            txn.patch_body_state(body_id, |b| {
                b.cool_set_point = Some(temp);
                b.pending = true;
            })
        })?;

        let frame = self.frame(
            self.profile.actions.heat_set,
            vec![body_id as u8, heat_mode::HEAT_PUMP, temp],
        );
        match self.command(ctx, frame, opts).await {
            Ok(()) => ctx.changes.commit(|txn| {
                txn.patch_body_state(body_id, |b| b.pending = false)
            }),
            Err(e) => {
                ctx.changes.commit(|txn| {
                    txn.patch_body_state(body_id, |b| {
                        b.cool_set_point = None;
                        b.pending = false;
                    })
                })?;
                Err(e)
            }
        }
    }

    async fn set_pump_speed(
        &self,
        ctx: &BoardCtx,
        id: u32,
        speed: PumpSpeedRequest,
        opts: IntentOptions,
    ) -> Result<()> {
        let pump = ctx.changes.with_model(|m| {
            m.config.pumps.get(id).map(|p| {
                (
                    p.pump_type,
                    p.address,
                    m.state.pumps.get(id).map(|s| (s.rpm, s.flow)).unwrap_or((0, 0)),
                )
            })
        });
        let Some((ptype, address, (current_rpm, current_flow))) = pump else {
            return Err(TritonError::not_found("pump", id));
        };

        let payload = match speed {
            PumpSpeedRequest::Rpm(rpm) => {
                if !matches!(ptype, pump_type::VS | pump_type::VSF) {
                    return Err(TritonError::invalid_data(
                        "pump".to_string(),
                        id,
                        "rpm".to_string(),
                        "pump type does not accept RPM".to_string(),
                    ));
                }
                if !self.profile.maps.pump_rpm_range.contains(&rpm) {
                    return Err(TritonError::invalid_data(
                        "pump".to_string(),
                        id,
                        "rpm".to_string(),
                        format!("rpm {} outside drive range", rpm),
                    ));
                }
                if rpm == current_rpm {
                    return Ok(());
                }
                (rpm as u16).to_be_bytes().to_vec()
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
                if !self.profile.maps.pump_flow_range.contains(&gpm) {
                    return Err(TritonError::invalid_data(
                        "pump".to_string(),
                        id,
                        "flow".to_string(),
                        format!("flow {} outside drive range", gpm),
                    ));
                }
                if gpm == current_flow {
                    return Ok(());
                }
                (gpm as u16).to_be_bytes().to_vec()
            }
            PumpSpeedRequest::Speed(preset) => {
                if !matches!(
                    ptype,
                    pump_type::RELAY | pump_type::SINGLE_SPEED | pump_type::DUAL_SPEED
                ) {
                    return Err(TritonError::invalid_data(
                        "pump".to_string(),
                        id,
                        "speed".to_string(),
                        "pump type does not use speed presets".to_string(),
                    ));
                }
                if preset == 0 || preset > 4 {
                    return Err(TritonError::invalid_data(
                        "pump".to_string(),
                        id,
                        "speed".to_string(),
                        format!("preset {} outside 1..=4", preset),
                    ));
                }
                vec![0, preset]
            }
        };

        // Pumps carry a change cooldown
        let key = DelayKey::new(EntityKind::Pump, id, Purpose::ChangeCooldown);
        if !self.gate(ctx, key, IntentRequest::SetPumpSpeed { id, speed }, opts)? {
            return Ok(());
        }

        let frame = Frame::new(
            self.profile.flag,
            address,
            self.profile.host_address,
            0x01,
            payload,
        );
        ctx.engine
            .request(
                frame,
                opts.priority,
                Some(ResponseMatch::action(address, 0x01)),
                opts.deadline,
            )
            .await?;

        ctx.changes.commit(|txn| {
            txn.patch_pump_state(id, |p| {
                match speed {
                    PumpSpeedRequest::Rpm(rpm) => p.rpm = rpm,
                    PumpSpeedRequest::Flow(gpm) => p.flow = gpm,
                    PumpSpeedRequest::Speed(_) => {}
                }
                p.pending = true;
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
        opts: IntentOptions,
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
        if let Some(hours) = settings.super_chlor_hours {
            if hours > 24 {
                return Err(TritonError::invalid_data(
                    "chlorinator".to_string(),
                    id,
                    "superChlorHours".to_string(),
                    format!("{} exceeds 24 hours", hours),
                ));
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
        let super_on = settings.super_chlor.unwrap_or(false);

        let frame = self.frame(
            self.profile.actions.chlor_set,
            vec![
                config.pool_setpoint,
                config.spa_setpoint,
                super_on as u8,
                config.super_chlor_hours,
            ],
        );
        self.command(ctx, frame, opts).await?;

        ctx.changes.commit(|txn| {
            txn.upsert_chlorinator_config(config);
            txn.patch_chlorinator_state(id, |s| {
                if let Some(v) = settings.super_chlor {
                    s.super_chlor = v;
                }
                s.pending = true;
            })
        })?;
        Ok(())
    }

    async fn set_chem_setpoint(
        &self,
        ctx: &BoardCtx,
        id: u32,
        chem: Chemical,
        value: f64,
        opts: IntentOptions,
    ) -> Result<()> {
        self.require(Capability::IntelliChem, "setChemSetpoint")?;
        let existing = ctx
            .changes
            .with_model(|m| m.config.chem_controllers.get(id).cloned());
        let Some(mut config) = existing else {
            return Err(TritonError::not_found("chemController", id));
        };

        let range = match chem {
            Chemical::Ph => &self.profile.maps.ph_setpoint_range,
            Chemical::Orp => &self.profile.maps.orp_setpoint_range,
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

        let encoded: u16 = match chem {
            Chemical::Ph => (value * 100.0).round() as u16,
            Chemical::Orp => value.round() as u16,
        };
        let chem_code = match chem {
            Chemical::Ph => 0u8,
            Chemical::Orp => 1u8,
        };

        let frame = self.frame(
            self.profile.actions.chem_set,
            vec![
                id as u8,
                chem_code,
                (encoded >> 8) as u8,
                (encoded & 0xFF) as u8,
            ],
        );
        self.command(ctx, frame, opts).await?;

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
        ctx: &BoardCtx,
        when: DateTime<Utc>,
        _opts: IntentOptions,
    ) -> Result<()> {
        let (adjust_dst, clock_mode) = ctx.changes.with_model(|m| {
            (
                m.config.options.adjust_dst,
                m.config.options.clock_mode,
            )
        });
        let frame = self.frame(
            self.profile.actions.clock_set,
            vec![
                when.hour() as u8,
                when.minute() as u8,
                when.weekday().number_from_monday() as u8,
                when.day() as u8,
                when.month() as u8,
                (when.year() % 100) as u8,
                adjust_dst as u8,
                clock_mode,
            ],
        );
        // Clock writes are not acked by the panel
        ctx.engine.send(frame, Priority::System)
    }

    async fn request_configuration(
        &self,
        ctx: &BoardCtx,
        scope: ConfigScope,
        _opts: IntentOptions,
    ) -> Result<()> {
        for scope in scope.expand() {
            let frame = self.frame(self.profile.actions.get_config, vec![scope.code()]);
            ctx.engine.send(frame, Priority::System)?;
        }
        Ok(())
    }

    async fn request_status(&self, ctx: &BoardCtx, opts: IntentOptions) -> Result<()> {
        let frame = self.frame(self.profile.actions.get_status, vec![]);
        let response = ctx
            .engine
            .request(
                frame,
                Priority::Background,
                Some(ResponseMatch::action(
                    self.profile.panel_address,
                    self.profile.actions.status,
                )),
                opts.deadline,
            )
            .await?;
        // The matched status frame still feeds the normal decode path
        if let Some(frame) = response {
            self.decode(ctx, ctx.engine.port_id(), &frame);
        }
        Ok(())
    }

    fn decode(&self, ctx: &BoardCtx, _port_id: u8, frame: &Frame) {
        let actions = &self.profile.actions;
        match frame.action {
            a if a == actions.status => self.decode_status(ctx, &frame.payload),
            a if a == actions.pump_status => {
                self.decode_pump_status(ctx, frame.src, &frame.payload)
            }
            a if a == actions.chlor_status => self.decode_chlor_status(ctx, &frame.payload),
            a if a == actions.chem_status => {
                self.decode_chem_status(ctx, frame.src, &frame.payload)
            }
            a if a == actions.circuit_config => self.decode_circuit_config(ctx, &frame.payload),
            a if a == actions.schedule_config => self.decode_schedule_config(ctx, &frame.payload),
            a if a == actions.ack => {}
            other => {
                self.logger
                    .trace(&format!("No decoder for action {}", other));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boards::Board;
    use crate::changes::ChangeEngine;
    use crate::config::CommsConfig;
    use crate::delays::DelayManager;
    use crate::engine::runtime::EngineRuntime;
    use crate::model::config::{BodyConfig, ChlorinatorConfig, PumpConfig, PumpCircuitConfig};
    use crate::model::SystemModel;
    use crate::port::mock::MockEndpoint;
    use crate::port::Port;
    use crate::protocol::{DecodeEvent, FrameDecoder, ProtocolFamily};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::sync::{mpsc, watch};

    fn seeded_model() -> SystemModel {
        let mut model = SystemModel::default();
        model.config.circuits.upsert(CircuitConfig {
            id: 6,
            name: "Pool".to_string(),
            function: crate::boards::valuemaps::circuit_function::POOL,
            ..Default::default()
        });
        model.config.circuits.upsert(CircuitConfig {
            id: 3,
            name: "Jets".to_string(),
            function: crate::boards::valuemaps::circuit_function::GENERIC,
            ..Default::default()
        });
        model.config.bodies.upsert(BodyConfig {
            id: 1,
            name: "Pool".to_string(),
            body_type: 2,
            capacity: 20000,
            heat_sources: 0x06,
        });
        model.config.pumps.upsert(PumpConfig {
            id: 1,
            name: "Filter Pump".to_string(),
            pump_type: pump_type::VS,
            address: 0x60,
            circuits: vec![PumpCircuitConfig {
                circuit: 6,
                speed: Some(2400),
                flow: None,
            }],
        });
        model.config.chlorinators.upsert(ChlorinatorConfig {
            id: 1,
            ..Default::default()
        });
        model
    }

    /// Reads frames off the peer half and acks every one, recording what
    /// it saw
    async fn auto_ack(mut peer: DuplexStream, seen: mpsc::UnboundedSender<Frame>) {
        let mut decoder = FrameDecoder::new(ProtocolFamily::Pentair16);
        let mut buf = [0u8; 512];
        loop {
            let n = match peer.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            for event in decoder.feed(&buf[..n]) {
                if let DecodeEvent::Frame(frame) = event {
                    let reply = if frame.dest == 0x10 {
                        Frame::new(0, frame.src, 0x10, 0x01, vec![frame.action])
                    } else {
                        // Pump drives echo the set back
                        Frame::new(0, frame.src, frame.dest, 0x01, frame.payload.clone())
                    };
                    let bytes = reply.encode(ProtocolFamily::Pentair16).unwrap();
                    if peer.write_all(&bytes).await.is_err() {
                        return;
                    }
                    seen.send(frame).ok();
                }
            }
        }
    }

    struct Rig {
        board: PanelBoard,
        ctx: BoardCtx,
        seen: mpsc::UnboundedReceiver<Frame>,
        shutdown_tx: watch::Sender<bool>,
    }

    fn rig() -> Rig {
        let changes = Arc::new(ChangeEngine::new(seeded_model()));
        let (delays, _replay_rx) = DelayManager::new(Default::default());
        let delays = Arc::new(delays);

        let (endpoint, peer) = MockEndpoint::pair();
        let port = Port::new(0, Box::new(endpoint));
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut comms = CommsConfig::default();
        comms.idle_before_tx_ms = 5;
        comms.inter_frame_delay_ms = 5;
        let (runtime, engine) = EngineRuntime::new(
            port,
            ProtocolFamily::Pentair16,
            comms,
            events_tx,
            shutdown_rx,
        );
        tokio::spawn(runtime.run());

        let (seen_tx, seen) = mpsc::unbounded_channel();
        tokio::spawn(auto_ack(peer, seen_tx));

        Rig {
            board: PanelBoard::new(crate::boards::intellitouch::profile()),
            ctx: BoardCtx {
                changes,
                delays,
                engine,
            },
            seen,
            shutdown_tx,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn circuit_on_emits_canonical_frame_and_event() {
        let mut rig = rig();
        let mut sub = rig
            .ctx
            .changes
            .bus()
            .subscribe(Some(&[EntityKind::Circuit]), 8);

        rig.board
            .set_circuit_state(&rig.ctx, 6, CircuitRequest::On, IntentOptions::default())
            .await
            .unwrap();

        let wire = rig.seen.recv().await.unwrap();
        assert_eq!(wire.dest, 0x10);
        assert_eq!(wire.action, 0x86);
        assert_eq!(wire.payload, vec![0x06, 0x01]);

        let event = sub.rx.recv().await.unwrap();
        assert_eq!(event.id, 6);
        assert_eq!(event.post_image["isOn"], serde_json::json!(true));

        let state = rig.ctx.changes.state_snapshot();
        let circuit = state.circuits.get(6).unwrap();
        assert!(circuit.is_on);
        assert!(!circuit.pending);

        rig.shutdown_tx.send(true).ok();
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_circuit_on_is_coalesced() {
        let mut rig = rig();
        rig.board
            .set_circuit_state(&rig.ctx, 6, CircuitRequest::On, IntentOptions::default())
            .await
            .unwrap();
        rig.seen.recv().await.unwrap();

        rig.board
            .set_circuit_state(&rig.ctx, 6, CircuitRequest::On, IntentOptions::default())
            .await
            .unwrap();

        // Exactly one wire frame total; the second intent coalesced
        assert!(rig.seen.try_recv().is_err());
        assert!(rig
            .ctx
            .changes
            .state_snapshot()
            .circuits
            .get(6)
            .unwrap()
            .is_on);

        rig.shutdown_tx.send(true).ok();
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_circuit_is_equipment_not_found() {
        let rig = rig();
        let err = rig
            .board
            .set_circuit_state(&rig.ctx, 42, CircuitRequest::On, IntentOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TritonError::EquipmentNotFound { .. }));
        rig.shutdown_tx.send(true).ok();
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_range_setpoint_rejects_without_wire() {
        let mut rig = rig();
        let err = rig
            .board
            .set_heat_setpoint(&rig.ctx, 1, 110, IntentOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TritonError::InvalidEquipmentData { .. }));
        assert!(rig.seen.try_recv().is_err());

        // State untouched
        assert!(rig.ctx.changes.state_snapshot().bodies.get(1).is_none());
        rig.shutdown_tx.send(true).ok();
    }

    #[tokio::test(start_paused = true)]
    async fn interlock_refuses_heat_mode_before_the_wire() {
        let mut rig = rig();
        rig.ctx.delays.set_interlock("spa-heat", &["pool-heat"]);
        let mut sub = rig.ctx.changes.bus().subscribe(None, 8);

        let err = rig
            .board
            .set_body_heat_mode(
                &rig.ctx,
                1,
                heat_mode::HEATER,
                IntentOptions::default(),
            )
            .await
            .unwrap_err();

        match err {
            TritonError::InterlockViolation { conflicting_key } => {
                assert_eq!(conflicting_key, "spa-heat");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(rig.seen.try_recv().is_err());
        assert!(sub.rx.try_recv().is_err());
        rig.shutdown_tx.send(true).ok();
    }

    #[tokio::test(start_paused = true)]
    async fn heat_mode_must_be_permitted_by_sources() {
        let rig = rig();
        // Body 1 heat sources are heater+solar (0x06); heat pump is not
        // defined for IntelliTouch at all
        let err = rig
            .board
            .set_body_heat_mode(&rig.ctx, 1, heat_mode::HEAT_PUMP, IntentOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TritonError::InvalidEquipmentData { .. }));
        rig.shutdown_tx.send(true).ok();
    }

    #[tokio::test(start_paused = true)]
    async fn pump_rpm_validates_type_and_range() {
        let mut rig = rig();

        let err = rig
            .board
            .set_pump_speed(
                &rig.ctx,
                1,
                PumpSpeedRequest::Flow(50),
                IntentOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TritonError::InvalidEquipmentData { .. }));

        let err = rig
            .board
            .set_pump_speed(
                &rig.ctx,
                1,
                PumpSpeedRequest::Rpm(4000),
                IntentOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TritonError::InvalidEquipmentData { .. }));

        rig.board
            .set_pump_speed(
                &rig.ctx,
                1,
                PumpSpeedRequest::Rpm(2400),
                IntentOptions::default(),
            )
            .await
            .unwrap();

        let wire = rig.seen.recv().await.unwrap();
        assert_eq!(wire.dest, 0x60);
        assert_eq!(wire.payload, vec![0x09, 0x60]); // 2400 big-endian

        let state = rig.ctx.changes.state_snapshot();
        assert_eq!(state.pumps.get(1).unwrap().rpm, 2400);
        rig.shutdown_tx.send(true).ok();
    }

    #[tokio::test(start_paused = true)]
    async fn intellicom_rejects_light_themes() {
        let rig = rig();
        let board = PanelBoard::new(crate::boards::intellicom::profile());
        let err = board
            .set_light_theme(&rig.ctx, 1, 0, IntentOptions::default())
            .await
            .unwrap_err();
        match err {
            TritonError::InvalidOperation {
                controller_type,
                intent,
            } => {
                assert_eq!(controller_type, "intellicom");
                assert_eq!(intent, "setLightTheme");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        rig.shutdown_tx.send(true).ok();
    }

    #[tokio::test(start_paused = true)]
    async fn status_broadcast_updates_circuits_and_temps() {
        let rig = rig();
        // Circuits 6 and 3 on: mask0 = 0b0010_0100
        let payload = vec![
            10, 30, // 10:30
            0b0010_0100, 0, 0, 0, 0, // masks
            0,    // mode auto
            0x08, // freeze
            0x01, // pool heat status: heater
            82, 0, // body temps
            75, 90, // air, solar
            0x01, // pool heat mode: heater
        ];
        let frame = Frame::new(0, 0x0F, 0x10, 0x02, payload);
        rig.board.decode(&rig.ctx, 0, &frame);

        let state = rig.ctx.changes.state_snapshot();
        assert!(state.circuits.get(6).unwrap().is_on);
        assert!(state.circuits.get(3).unwrap().is_on);
        assert_eq!(state.temps.air, Some(75.0));
        assert_eq!(state.temps.solar, Some(90.0));
        assert!(state.equipment.freeze);

        let body = state.bodies.get(1).unwrap();
        assert_eq!(body.temp, Some(82.0));
        assert_eq!(body.heat_status, 1);
        assert_eq!(body.heat_mode, 1);
        assert!(body.is_on);

        let freeze = state.virtual_circuits.get(245).unwrap();
        assert!(freeze.is_on);

        rig.shutdown_tx.send(true).ok();
    }

    #[tokio::test(start_paused = true)]
    async fn pump_status_patches_by_bus_address() {
        let rig = rig();
        let payload = vec![0x01, 0x02, 0, 0x02, 0x58, 0x09, 0x60, 40, 0];
        let frame = Frame::new(0, 0x00, 0x60, 0x07, payload);
        rig.board.decode(&rig.ctx, 0, &frame);

        let state = rig.ctx.changes.state_snapshot();
        let pump = state.pumps.get(1).unwrap();
        assert_eq!(pump.watts, 600);
        assert_eq!(pump.rpm, 2400);
        assert_eq!(pump.flow, 40);
        assert_eq!(pump.status, 1);
        rig.shutdown_tx.send(true).ok();
    }

    #[tokio::test(start_paused = true)]
    async fn discovery_circuit_config_upserts() {
        let rig = rig();
        let mut payload = vec![9, 7, 0x03];
        payload.extend_from_slice(b"Waterfall");
        let frame = Frame::new(0, 0x00, 0x10, 0x0B, payload);
        rig.board.decode(&rig.ctx, 0, &frame);

        let config = rig.ctx.changes.config_snapshot();
        let circuit = config.circuits.get(9).unwrap();
        assert_eq!(circuit.name, "Waterfall");
        assert_eq!(circuit.function, 7);
        assert!(circuit.show_in_features);
        assert!(circuit.freeze_protect);
        rig.shutdown_tx.send(true).ok();
    }
}
