//! Change engine
//!
//! The single-writer commit lane for the equipment model. Every mutation
//! goes through [`ChangeEngine::commit`], which hands the caller a
//! [`ModelTxn`] exposing typed patch methods. Each patch journals a
//! minimal diff; on commit the diffs fan out as per-entity events and mark
//! the owning persistence root dirty. Readers take deep-copy snapshots and
//! never contend with decoder hot paths.
//!
//! Persistence is debounced: a root flushes no sooner than the quiet
//! window after the most recent mutation and no later than the max window
//! after the first unflushed one. Flushes are atomic via the persistence
//! layer; failures keep the root dirty and retry on the same schedule,
//! with a warning raised after three consecutive failures.

use crate::error::{Result, TritonError};
use crate::logging::get_logger;
use crate::model::state::{
    BodyState, ChemControllerState, ChlorinatorState, CircuitGroupState, CircuitState, CoverState,
    EquipmentState, FeatureState, FilterState, HeaterState, LightGroupState, PumpState,
    ScheduleState, TempsState, ValveState, VirtualCircuitState,
};
use crate::model::{EntityKind, Identified, ModelRoot, PoolConfig, PoolState, SystemModel};
use crate::persistence::{LoadOutcome, PersistFile};
use std::sync::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

pub mod events;

pub use events::{EntityEvent, EventBus, Subscription, DEFAULT_SINK_DEPTH};

/// Consecutive flush failures before the failing warning
const FLUSH_FAILURE_WARN_AT: u32 = 3;

#[derive(Debug, Clone, Copy)]
struct DirtyWindow {
    first: Instant,
    last: Instant,
}

#[derive(Debug, Default)]
struct DirtyClocks {
    config: Option<DirtyWindow>,
    state: Option<DirtyWindow>,
    config_failures: u32,
    state_failures: u32,
}

impl DirtyClocks {
    fn window_mut(&mut self, root: ModelRoot) -> &mut Option<DirtyWindow> {
        match root {
            ModelRoot::Config => &mut self.config,
            ModelRoot::State => &mut self.state,
        }
    }

    fn failures_mut(&mut self, root: ModelRoot) -> &mut u32 {
        match root {
            ModelRoot::Config => &mut self.config_failures,
            ModelRoot::State => &mut self.state_failures,
        }
    }
}

/// What `ChangeEngine::load` found on disk
#[derive(Debug, Clone, Copy)]
pub struct LoadReport {
    pub config: LoadOutcome,
    pub state: LoadOutcome,
    /// Orphan state items pruned after load
    pub pruned: usize,
}

/// Single-writer owner of the equipment model
pub struct ChangeEngine {
    model: Mutex<SystemModel>,
    dirty: Mutex<DirtyClocks>,
    bus: EventBus,
    flush_notify: Notify,
    logger: crate::logging::StructuredLogger,
}

impl ChangeEngine {
    pub fn new(model: SystemModel) -> Self {
        Self {
            model: Mutex::new(model),
            dirty: Mutex::new(DirtyClocks::default()),
            bus: EventBus::new(),
            flush_notify: Notify::new(),
            logger: get_logger("changes"),
        }
    }

    /// Build the engine from the persisted documents, quarantining corrupt
    /// files and pruning orphan state
    pub fn load(config_file: &PersistFile, state_file: &PersistFile) -> (Self, LoadReport) {
        let (config, config_outcome): (PoolConfig, _) = config_file.load_or_default();
        let (state, state_outcome): (PoolState, _) = state_file.load_or_default();
        let mut model = SystemModel { config, state };
        let pruned = model.prune_orphans();

        let engine = Self::new(model);
        if pruned > 0 {
            engine
                .logger
                .info(&format!("Pruned {} orphan state items on load", pruned));
        }

        // A quarantined file needs a fresh default written promptly
        if config_outcome == LoadOutcome::Corrupt {
            engine.mark_dirty(ModelRoot::Config);
        }
        if state_outcome == LoadOutcome::Corrupt {
            engine.mark_dirty(ModelRoot::State);
        }

        (
            engine,
            LoadReport {
                config: config_outcome,
                state: state_outcome,
                pruned,
            },
        )
    }

    /// Event stream access
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Run `f` inside the commit lane. Journaled diffs are published to
    /// the event bus and dirty roots marked before this returns, so a
    /// synchronous intent sees its own effect.
    pub fn commit<R>(&self, f: impl FnOnce(&mut ModelTxn) -> R) -> R {
        let mut model = self.model.lock().unwrap();
        let mut txn = ModelTxn {
            model: &mut *model,
            journal: Vec::new(),
        };
        let result = f(&mut txn);
        let journal = std::mem::take(&mut txn.journal);
        drop(txn);

        if !journal.is_empty() {
            let now = Instant::now();
            let mut dirty = self.dirty.lock().unwrap();
            for entry in &journal {
                let window = dirty.window_mut(entry.root);
                match window {
                    Some(w) => w.last = now,
                    None => {
                        *window = Some(DirtyWindow {
                            first: now,
                            last: now,
                        })
                    }
                }
            }
            drop(dirty);
            // Publish while still holding the model lock: any one sink
            // observes events in commit order
            for entry in journal {
                if let Some(event) = entry.event {
                    self.bus.publish(&event);
                }
            }
            self.flush_notify.notify_one();
        }

        result
    }

    /// Deep-copy snapshot of the configuration graph
    pub fn config_snapshot(&self) -> PoolConfig {
        self.model.lock().unwrap().config.clone()
    }

    /// Deep-copy snapshot of the live-state graph
    pub fn state_snapshot(&self) -> PoolState {
        self.model.lock().unwrap().state.clone()
    }

    /// Read-only access without a full clone
    pub fn with_model<R>(&self, f: impl FnOnce(&SystemModel) -> R) -> R {
        let model = self.model.lock().unwrap();
        f(&model)
    }

    /// Navigate a dotted path (`circuits.0.name`) through the serialized
    /// model; numeric segments index into collections
    pub fn get_section(&self, path: &str) -> Option<serde_json::Value> {
        let value = {
            let model = self.model.lock().unwrap();
            serde_json::to_value(&*model).ok()?
        };
        let mut cursor = &value;
        for segment in path.split('.').filter(|s| !s.is_empty()) {
            cursor = match cursor {
                serde_json::Value::Object(map) => map.get(segment)?,
                serde_json::Value::Array(items) => {
                    let index: usize = segment.parse().ok()?;
                    items.get(index)?
                }
                _ => return None,
            };
        }
        Some(cursor.clone())
    }

    fn mark_dirty(&self, root: ModelRoot) {
        let now = Instant::now();
        let mut dirty = self.dirty.lock().unwrap();
        let window = dirty.window_mut(root);
        match window {
            Some(w) => w.last = now,
            None => {
                *window = Some(DirtyWindow {
                    first: now,
                    last: now,
                })
            }
        }
        drop(dirty);
        self.flush_notify.notify_one();
    }

    /// Earliest instant either root wants flushing, honoring the quiet
    /// and max windows
    pub fn next_flush_deadline(
        &self,
        quiet: tokio::time::Duration,
        max: tokio::time::Duration,
    ) -> Option<Instant> {
        let dirty = self.dirty.lock().unwrap();
        let deadline = |w: &Option<DirtyWindow>| {
            w.as_ref().map(|w| (w.last + quiet).min(w.first + max))
        };
        match (deadline(&dirty.config), deadline(&dirty.state)) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }

    /// Roots whose flush deadline has passed
    pub fn due_roots(
        &self,
        now: Instant,
        quiet: tokio::time::Duration,
        max: tokio::time::Duration,
    ) -> Vec<ModelRoot> {
        let dirty = self.dirty.lock().unwrap();
        let due = |w: &Option<DirtyWindow>| {
            w.as_ref()
                .map(|w| now >= (w.last + quiet).min(w.first + max))
                .unwrap_or(false)
        };
        let mut roots = Vec::new();
        if due(&dirty.config) {
            roots.push(ModelRoot::Config);
        }
        if due(&dirty.state) {
            roots.push(ModelRoot::State);
        }
        roots
    }

    /// True when either root is dirty
    pub fn has_dirty(&self) -> bool {
        let dirty = self.dirty.lock().unwrap();
        dirty.config.is_some() || dirty.state.is_some()
    }

    /// A successful flush clears the window and the failure streak
    pub fn note_flushed(&self, root: ModelRoot) {
        let mut dirty = self.dirty.lock().unwrap();
        *dirty.window_mut(root) = None;
        *dirty.failures_mut(root) = 0;
    }

    /// A failed flush keeps the root dirty and reschedules it one quiet
    /// window out; returns the consecutive failure count
    pub fn note_flush_failed(&self, root: ModelRoot) -> u32 {
        let now = Instant::now();
        let mut dirty = self.dirty.lock().unwrap();
        if let Some(w) = dirty.window_mut(root).as_mut() {
            w.last = now;
        }
        let failures = dirty.failures_mut(root);
        *failures += 1;
        *failures
    }

    /// Wait for the next commit to dirty something
    pub async fn flush_notified(&self) {
        self.flush_notify.notified().await;
    }

    /// Publish a controller-level notice outside the entity collections
    pub fn publish_notice(&self, changed: &str, detail: serde_json::Value) {
        self.bus.publish(&EntityEvent {
            kind: EntityKind::Controller,
            id: 0,
            changed_fields: vec![changed.to_string()],
            post_image: detail,
        });
    }
}

/// Debounced writer for the two persistence roots
pub struct FlushTask {
    engine: std::sync::Arc<ChangeEngine>,
    config_file: PersistFile,
    state_file: PersistFile,
    quiet: tokio::time::Duration,
    max: tokio::time::Duration,
    logger: crate::logging::StructuredLogger,
}

impl FlushTask {
    pub fn new(
        engine: std::sync::Arc<ChangeEngine>,
        config_file: PersistFile,
        state_file: PersistFile,
        quiet_ms: u64,
        max_ms: u64,
    ) -> Self {
        Self {
            engine,
            config_file,
            state_file,
            quiet: tokio::time::Duration::from_millis(quiet_ms),
            max: tokio::time::Duration::from_millis(max_ms),
            logger: get_logger("flush"),
        }
    }

    /// Run until shutdown, then flush anything still dirty
    pub async fn run(self, mut shutdown_rx: tokio::sync::watch::Receiver<bool>) {
        loop {
            let deadline = self
                .engine
                .next_flush_deadline(self.quiet, self.max)
                .unwrap_or_else(|| Instant::now() + tokio::time::Duration::from_secs(3600));

            tokio::select! {
                _ = self.engine.flush_notified() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    for root in self.engine.due_roots(Instant::now(), self.quiet, self.max) {
                        self.flush_root(root);
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        // Final flush on the way out
        if self.engine.has_dirty() {
            self.flush_root(ModelRoot::Config);
            self.flush_root(ModelRoot::State);
        }
        self.logger.debug("Flush task stopped");
    }

    fn flush_root(&self, root: ModelRoot) {
        let result = match root {
            ModelRoot::Config => {
                let snapshot = self.engine.config_snapshot();
                self.config_file.write(&snapshot)
            }
            ModelRoot::State => {
                let snapshot = self.engine.state_snapshot();
                self.state_file.write(&snapshot)
            }
        };

        match result {
            Ok(()) => {
                self.engine.note_flushed(root);
            }
            Err(e) => {
                let failures = self.engine.note_flush_failed(root);
                self.logger
                    .warn(&format!("Flush failed ({} consecutive): {}", failures, e));
                if failures == FLUSH_FAILURE_WARN_AT {
                    self.engine.publish_notice(
                        "persistenceFailing",
                        serde_json::json!({
                            "root": match root {
                                ModelRoot::Config => "pool-config",
                                ModelRoot::State => "pool-state",
                            },
                            "failures": failures,
                        }),
                    );
                }
            }
        }
    }
}

struct JournalEntry {
    root: ModelRoot,
    /// `None` marks the root dirty without emitting (removal shadows)
    event: Option<EntityEvent>,
}

/// One commit's view of the model, exposing typed patch methods
pub struct ModelTxn<'a> {
    model: &'a mut SystemModel,
    journal: Vec<JournalEntry>,
}

/// Top-level keys whose values differ between two object images
fn diff_fields(pre: &serde_json::Value, post: &serde_json::Value) -> Vec<String> {
    let empty = serde_json::Map::new();
    let pre_map = pre.as_object().unwrap_or(&empty);
    let post_map = post.as_object().unwrap_or(&empty);

    let mut changed: Vec<String> = post_map
        .iter()
        .filter(|(key, value)| pre_map.get(*key) != Some(value))
        .map(|(key, _)| key.clone())
        .collect();
    for key in pre_map.keys() {
        if !post_map.contains_key(key) {
            changed.push(key.clone());
        }
    }
    changed
}

impl ModelTxn<'_> {
    /// Direct read access inside the transaction
    pub fn model(&self) -> &SystemModel {
        self.model
    }

    fn journal_diff(
        &mut self,
        kind: EntityKind,
        id: u32,
        root: ModelRoot,
        pre: serde_json::Value,
        post: serde_json::Value,
    ) {
        let changed_fields = diff_fields(&pre, &post);
        if changed_fields.is_empty() {
            return;
        }
        self.journal.push(JournalEntry {
            root,
            event: Some(EntityEvent {
                kind,
                id,
                changed_fields,
                post_image: post,
            }),
        });
    }

    fn journal_removal(&mut self, kind: EntityKind, id: u32) {
        self.journal.push(JournalEntry {
            root: ModelRoot::Config,
            event: Some(EntityEvent {
                kind,
                id,
                changed_fields: vec!["removed".to_string()],
                post_image: serde_json::Value::Null,
            }),
        });
        // The state shadow disappears with it
        self.journal.push(JournalEntry {
            root: ModelRoot::State,
            event: None,
        });
    }

    /// Patch the equipment singleton state
    pub fn equipment_state(&mut self, f: impl FnOnce(&mut EquipmentState)) {
        let pre = serde_json::to_value(&self.model.state.equipment).unwrap_or_default();
        f(&mut self.model.state.equipment);
        let post = serde_json::to_value(&self.model.state.equipment).unwrap_or_default();
        self.journal_diff(EntityKind::Equipment, 0, ModelRoot::State, pre, post);
    }

    /// Patch the temperature readings singleton
    pub fn temps(&mut self, f: impl FnOnce(&mut TempsState)) {
        let pre = serde_json::to_value(&self.model.state.temps).unwrap_or_default();
        f(&mut self.model.state.temps);
        let post = serde_json::to_value(&self.model.state.temps).unwrap_or_default();
        self.journal_diff(EntityKind::Temps, 0, ModelRoot::State, pre, post);
    }

    /// Patch the equipment identity configuration
    pub fn equipment_config(
        &mut self,
        f: impl FnOnce(&mut crate::model::config::EquipmentConfig),
    ) {
        let pre = serde_json::to_value(&self.model.config.equipment).unwrap_or_default();
        f(&mut self.model.config.equipment);
        let post = serde_json::to_value(&self.model.config.equipment).unwrap_or_default();
        self.journal_diff(EntityKind::Equipment, 0, ModelRoot::Config, pre, post);
    }

    /// Patch or create a derived virtual circuit
    pub fn virtual_circuit(&mut self, id: u32, f: impl FnOnce(&mut VirtualCircuitState)) {
        let existing = self.model.state.virtual_circuits.get(id).cloned();
        let pre = existing
            .as_ref()
            .map(|item| serde_json::to_value(item).unwrap_or_default())
            .unwrap_or(serde_json::Value::Null);
        let mut item = existing.unwrap_or(VirtualCircuitState {
            id,
            ..Default::default()
        });
        f(&mut item);
        let post = serde_json::to_value(&item).unwrap_or_default();
        self.model.state.virtual_circuits.upsert(item);
        self.journal_diff(EntityKind::VirtualCircuit, id, ModelRoot::State, pre, post);
    }
}

macro_rules! config_methods {
    ($upsert:ident, $remove:ident, $coll:ident, $ty:ty, $kind:expr) => {
        impl ModelTxn<'_> {
            /// Create or replace a configuration item, journaling the diff
            pub fn $upsert(&mut self, item: $ty) {
                let id = item.id();
                let pre = self
                    .model
                    .config
                    .$coll
                    .get(id)
                    .map(|existing| serde_json::to_value(existing).unwrap_or_default())
                    .unwrap_or(serde_json::Value::Null);
                let post = serde_json::to_value(&item).unwrap_or_default();
                self.model.config.$coll.upsert(item);
                self.journal_diff($kind, id, ModelRoot::Config, pre, post);
            }

            /// Remove a configuration item and its state shadow
            pub fn $remove(&mut self, id: u32) -> Result<()> {
                if self.model.config.$coll.remove(id).is_none() {
                    return Err(TritonError::not_found($kind.topic(), id));
                }
                self.model.state.$coll.remove(id);
                self.journal_removal($kind, id);
                Ok(())
            }
        }
    };
}

config_methods!(
    upsert_body_config,
    remove_body_config,
    bodies,
    crate::model::config::BodyConfig,
    EntityKind::Body
);
config_methods!(
    upsert_circuit_config,
    remove_circuit_config,
    circuits,
    crate::model::config::CircuitConfig,
    EntityKind::Circuit
);
config_methods!(
    upsert_feature_config,
    remove_feature_config,
    features,
    crate::model::config::FeatureConfig,
    EntityKind::Feature
);
config_methods!(
    upsert_pump_config,
    remove_pump_config,
    pumps,
    crate::model::config::PumpConfig,
    EntityKind::Pump
);
config_methods!(
    upsert_heater_config,
    remove_heater_config,
    heaters,
    crate::model::config::HeaterConfig,
    EntityKind::Heater
);
config_methods!(
    upsert_chlorinator_config,
    remove_chlorinator_config,
    chlorinators,
    crate::model::config::ChlorinatorConfig,
    EntityKind::Chlorinator
);
config_methods!(
    upsert_chem_controller_config,
    remove_chem_controller_config,
    chem_controllers,
    crate::model::config::ChemControllerConfig,
    EntityKind::ChemController
);
config_methods!(
    upsert_schedule_config,
    remove_schedule_config,
    schedules,
    crate::model::config::ScheduleConfig,
    EntityKind::Schedule
);
config_methods!(
    upsert_valve_config,
    remove_valve_config,
    valves,
    crate::model::config::ValveConfig,
    EntityKind::Valve
);
config_methods!(
    upsert_filter_config,
    remove_filter_config,
    filters,
    crate::model::config::FilterConfig,
    EntityKind::Filter
);
config_methods!(
    upsert_circuit_group_config,
    remove_circuit_group_config,
    circuit_groups,
    crate::model::config::CircuitGroupConfig,
    EntityKind::CircuitGroup
);
config_methods!(
    upsert_light_group_config,
    remove_light_group_config,
    light_groups,
    crate::model::config::LightGroupConfig,
    EntityKind::LightGroup
);
config_methods!(
    upsert_cover_config,
    remove_cover_config,
    covers,
    crate::model::config::CoverConfig,
    EntityKind::Cover
);

impl ModelTxn<'_> {
    /// Create or replace a remote definition, journaling the diff.
    /// Remotes are configuration-only; they carry no state shadow.
    pub fn upsert_remote_config(&mut self, item: crate::model::config::RemoteConfig) {
        let id = item.id();
        let pre = self
            .model
            .config
            .remotes
            .get(id)
            .map(|existing| serde_json::to_value(existing).unwrap_or_default())
            .unwrap_or(serde_json::Value::Null);
        let post = serde_json::to_value(&item).unwrap_or_default();
        self.model.config.remotes.upsert(item);
        self.journal_diff(EntityKind::Remote, id, ModelRoot::Config, pre, post);
    }

    /// Remove a remote definition
    pub fn remove_remote_config(&mut self, id: u32) -> Result<()> {
        if self.model.config.remotes.remove(id).is_none() {
            return Err(TritonError::not_found(EntityKind::Remote.topic(), id));
        }
        self.journal.push(JournalEntry {
            root: ModelRoot::Config,
            event: Some(EntityEvent {
                kind: EntityKind::Remote,
                id,
                changed_fields: vec!["removed".to_string()],
                post_image: serde_json::Value::Null,
            }),
        });
        Ok(())
    }
}

macro_rules! state_methods {
    ($patch:ident, $coll:ident, $ty:ty, $kind:expr) => {
        impl ModelTxn<'_> {
            /// Patch a state item, creating the shadow lazily. Fails with
            /// `EquipmentNotFound` when no configuration counterpart
            /// exists.
            pub fn $patch(&mut self, id: u32, f: impl FnOnce(&mut $ty)) -> Result<()> {
                if !self.model.config.$coll.contains(id) {
                    return Err(TritonError::not_found($kind.topic(), id));
                }
                let existing = self.model.state.$coll.get(id).cloned();
                let pre = existing
                    .as_ref()
                    .map(|item| serde_json::to_value(item).unwrap_or_default())
                    .unwrap_or(serde_json::Value::Null);
                let mut item = existing.unwrap_or(<$ty>::shadow(id));
                f(&mut item);
                let post = serde_json::to_value(&item).unwrap_or_default();
                self.model.state.$coll.upsert(item);
                self.journal_diff($kind, id, ModelRoot::State, pre, post);
                Ok(())
            }
        }
    };
}

/// Lazily-created state shadow for a configuration item
trait Shadow {
    fn shadow(id: u32) -> Self;
}

macro_rules! shadow_by_id {
    ($($ty:ty),+ $(,)?) => {
        $(impl Shadow for $ty {
            fn shadow(id: u32) -> Self {
                Self { id, ..Default::default() }
            }
        })+
    };
}

shadow_by_id!(
    BodyState,
    CircuitState,
    FeatureState,
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

state_methods!(patch_body_state, bodies, BodyState, EntityKind::Body);
state_methods!(patch_circuit_state, circuits, CircuitState, EntityKind::Circuit);
state_methods!(patch_feature_state, features, FeatureState, EntityKind::Feature);
state_methods!(patch_pump_state, pumps, PumpState, EntityKind::Pump);
state_methods!(patch_heater_state, heaters, HeaterState, EntityKind::Heater);
state_methods!(
    patch_chlorinator_state,
    chlorinators,
    ChlorinatorState,
    EntityKind::Chlorinator
);
state_methods!(
    patch_chem_controller_state,
    chem_controllers,
    ChemControllerState,
    EntityKind::ChemController
);
state_methods!(
    patch_schedule_state,
    schedules,
    ScheduleState,
    EntityKind::Schedule
);
state_methods!(patch_valve_state, valves, ValveState, EntityKind::Valve);
state_methods!(patch_filter_state, filters, FilterState, EntityKind::Filter);
state_methods!(
    patch_circuit_group_state,
    circuit_groups,
    CircuitGroupState,
    EntityKind::CircuitGroup
);
state_methods!(
    patch_light_group_state,
    light_groups,
    LightGroupState,
    EntityKind::LightGroup
);
state_methods!(patch_cover_state, covers, CoverState, EntityKind::Cover);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::config::CircuitConfig;

    fn engine_with_circuit() -> ChangeEngine {
        let engine = ChangeEngine::new(SystemModel::default());
        engine.commit(|txn| {
            txn.upsert_circuit_config(CircuitConfig {
                id: 6,
                name: "Pool".to_string(),
                function: 2,
                ..Default::default()
            });
        });
        engine
    }

    #[tokio::test]
    async fn state_patch_emits_event_and_lazy_shadows() {
        let engine = engine_with_circuit();
        let mut sub = engine.bus().subscribe(Some(&[EntityKind::Circuit]), 8);

        engine
            .commit(|txn| txn.patch_circuit_state(6, |c| c.is_on = true))
            .unwrap();

        let event = sub.rx.recv().await.unwrap();
        assert_eq!(event.kind, EntityKind::Circuit);
        assert_eq!(event.id, 6);
        assert!(event.changed_fields.contains(&"isOn".to_string()));
        assert_eq!(event.post_image["isOn"], serde_json::json!(true));

        let state = engine.state_snapshot();
        assert!(state.circuits.get(6).unwrap().is_on);
    }

    #[test]
    fn state_patch_without_config_counterpart_fails() {
        let engine = ChangeEngine::new(SystemModel::default());
        let err = engine
            .commit(|txn| txn.patch_circuit_state(99, |c| c.is_on = true))
            .unwrap_err();
        assert!(matches!(err, TritonError::EquipmentNotFound { .. }));
    }

    #[tokio::test]
    async fn no_op_patch_emits_nothing() {
        let engine = engine_with_circuit();
        engine
            .commit(|txn| txn.patch_circuit_state(6, |c| c.is_on = true))
            .unwrap();

        let mut sub = engine.bus().subscribe(None, 8);
        engine
            .commit(|txn| txn.patch_circuit_state(6, |c| c.is_on = true))
            .unwrap();
        assert!(sub.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn removal_prunes_state_and_emits() {
        let engine = engine_with_circuit();
        engine
            .commit(|txn| txn.patch_circuit_state(6, |c| c.is_on = true))
            .unwrap();

        let mut sub = engine.bus().subscribe(Some(&[EntityKind::Circuit]), 8);
        engine.commit(|txn| txn.remove_circuit_config(6)).unwrap();

        let event = sub.rx.recv().await.unwrap();
        assert_eq!(event.changed_fields, vec!["removed".to_string()]);
        assert!(event.post_image.is_null());

        assert!(engine.config_snapshot().circuits.get(6).is_none());
        assert!(engine.state_snapshot().circuits.get(6).is_none());
    }

    #[tokio::test]
    async fn remote_config_crud_journals_like_any_collection() {
        let engine = ChangeEngine::new(SystemModel::default());
        let mut sub = engine.bus().subscribe(Some(&[EntityKind::Remote]), 8);

        engine.commit(|txn| {
            txn.upsert_remote_config(crate::model::config::RemoteConfig {
                id: 1,
                name: "SpaCommand".to_string(),
                remote_type: 1,
                buttons: vec![1, 6, 0, 0],
            });
        });

        let event = sub.rx.recv().await.unwrap();
        assert_eq!(event.kind, EntityKind::Remote);
        assert_eq!(event.id, 1);
        assert_eq!(event.post_image["name"], serde_json::json!("SpaCommand"));

        let config = engine.config_snapshot();
        assert_eq!(config.remotes.get(1).unwrap().buttons, vec![1, 6, 0, 0]);

        engine.commit(|txn| txn.remove_remote_config(1)).unwrap();
        let event = sub.rx.recv().await.unwrap();
        assert_eq!(event.changed_fields, vec!["removed".to_string()]);
        assert!(engine.config_snapshot().remotes.get(1).is_none());

        let err = engine
            .commit(|txn| txn.remove_remote_config(9))
            .unwrap_err();
        assert!(matches!(err, TritonError::EquipmentNotFound { .. }));
    }

    #[test]
    fn dirty_windows_honor_quiet_and_max() {
        let engine = engine_with_circuit();
        let quiet = tokio::time::Duration::from_millis(3000);
        let max = tokio::time::Duration::from_millis(30000);

        let deadline = engine.next_flush_deadline(quiet, max).unwrap();
        let now = Instant::now();
        assert!(deadline > now);
        assert!(deadline <= now + quiet);

        assert!(engine.due_roots(now + quiet, quiet, max).len() == 1);
        assert!(engine.due_roots(now, quiet, max).is_empty());

        engine.note_flushed(ModelRoot::Config);
        assert!(engine.next_flush_deadline(quiet, max).is_none());
    }

    #[test]
    fn flush_failures_count_consecutively() {
        let engine = engine_with_circuit();
        assert_eq!(engine.note_flush_failed(ModelRoot::Config), 1);
        assert_eq!(engine.note_flush_failed(ModelRoot::Config), 2);
        assert_eq!(engine.note_flush_failed(ModelRoot::Config), 3);
        engine.note_flushed(ModelRoot::Config);
        assert_eq!(engine.note_flush_failed(ModelRoot::Config), 1);
    }

    #[test]
    fn get_section_walks_paths() {
        let engine = engine_with_circuit();
        let name = engine.get_section("config.circuits.0.name").unwrap();
        assert_eq!(name, serde_json::json!("Pool"));
        assert!(engine.get_section("config.missing").is_none());
    }

    #[test]
    fn diff_fields_reports_top_level_changes() {
        let pre = serde_json::json!({"a": 1, "b": 2});
        let post = serde_json::json!({"a": 1, "b": 3, "c": 4});
        let mut fields = diff_fields(&pre, &post);
        fields.sort();
        assert_eq!(fields, vec!["b".to_string(), "c".to_string()]);
    }
}
