//! Equipment model
//!
//! The configuration graph and the live-state graph that mirrors it.
//! Configuration changes slowly and persists to *pool-config*; state
//! changes rapidly and persists to *pool-state*. All mutation flows
//! through the change engine's commit lane; readers take deep-copy
//! snapshots.

use serde::{Deserialize, Serialize};

pub mod collections;
pub mod config;
pub mod state;

pub use collections::{Collection, Identified};
pub use config::PoolConfig;
pub use state::PoolState;

/// Entity kinds, one per event topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    Controller,
    Equipment,
    Circuit,
    Feature,
    #[serde(rename = "virtualcircuit")]
    VirtualCircuit,
    Body,
    Temps,
    Pump,
    Heater,
    Chlorinator,
    ChemController,
    Filter,
    Valve,
    CircuitGroup,
    LightGroup,
    Schedule,
    Cover,
    Remote,
}

impl EntityKind {
    /// Topic string used on the event stream and in error payloads
    pub fn topic(&self) -> &'static str {
        match self {
            EntityKind::Controller => "controller",
            EntityKind::Equipment => "equipment",
            EntityKind::Circuit => "circuit",
            EntityKind::Feature => "feature",
            EntityKind::VirtualCircuit => "virtualcircuit",
            EntityKind::Body => "body",
            EntityKind::Temps => "temps",
            EntityKind::Pump => "pump",
            EntityKind::Heater => "heater",
            EntityKind::Chlorinator => "chlorinator",
            EntityKind::ChemController => "chemController",
            EntityKind::Filter => "filter",
            EntityKind::Valve => "valve",
            EntityKind::CircuitGroup => "circuitGroup",
            EntityKind::LightGroup => "lightGroup",
            EntityKind::Schedule => "schedule",
            EntityKind::Cover => "cover",
            EntityKind::Remote => "remote",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.topic())
    }
}

/// Which persisted root a mutation dirtied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelRoot {
    Config,
    State,
}

/// The whole equipment model: configuration plus mirrored live state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SystemModel {
    pub config: PoolConfig,
    pub state: PoolState,
}

impl SystemModel {
    /// Remove state items whose configuration counterpart is gone.
    ///
    /// Virtual circuits are derived and carry no configuration
    /// counterpart; they are exempt. Returns the number of pruned items.
    pub fn prune_orphans(&mut self) -> usize {
        let mut pruned = 0;
        let config = &self.config;
        pruned += self
            .state
            .bodies
            .retain_ids(|id| config.bodies.contains(id));
        pruned += self
            .state
            .circuits
            .retain_ids(|id| config.circuits.contains(id));
        pruned += self
            .state
            .features
            .retain_ids(|id| config.features.contains(id));
        pruned += self.state.pumps.retain_ids(|id| config.pumps.contains(id));
        pruned += self
            .state
            .heaters
            .retain_ids(|id| config.heaters.contains(id));
        pruned += self
            .state
            .chlorinators
            .retain_ids(|id| config.chlorinators.contains(id));
        pruned += self
            .state
            .chem_controllers
            .retain_ids(|id| config.chem_controllers.contains(id));
        pruned += self
            .state
            .schedules
            .retain_ids(|id| config.schedules.contains(id));
        pruned += self
            .state
            .valves
            .retain_ids(|id| config.valves.contains(id));
        pruned += self
            .state
            .filters
            .retain_ids(|id| config.filters.contains(id));
        pruned += self
            .state
            .circuit_groups
            .retain_ids(|id| config.circuit_groups.contains(id));
        pruned += self
            .state
            .light_groups
            .retain_ids(|id| config.light_groups.contains(id));
        pruned += self
            .state
            .covers
            .retain_ids(|id| config.covers.contains(id));
        pruned
    }
}
