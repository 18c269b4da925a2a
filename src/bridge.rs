//! Bridge orchestration
//!
//! The context structure created at startup and torn down in reverse
//! order: it owns the change engine, the delay manager, the board
//! realization, one transaction engine per configured port, the
//! persistence flusher, the config watcher, and the scheduler. No
//! process-wide singletons; collaborators receive a [`BridgeHandle`].

use crate::boards::{board_for, Board, BoardCtx, ConfigScope, IntentOptions, IntentRequest};
use crate::changes::{ChangeEngine, FlushTask, Subscription};
use crate::config::{watcher::ConfigWatcher, Config, ControllerType};
use crate::delays::DelayManager;
use crate::engine::{EngineEvent, EngineHandle, EngineRuntime};
use crate::error::Result;
use crate::logging::get_logger;
use crate::model::state::controller_status;
use crate::model::EntityKind;
use crate::persistence::{LoadOutcome, PersistFile};
use crate::port::{net::NetEndpoint, serial::SerialEndpoint, Endpoint, Port};
use crate::protocol::ProtocolFamily;
use crate::scheduler::{Scheduler, SolarPosition};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, timeout, Duration};

/// Hard deadline on the shutdown sequence
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

/// Cadence of delay-manager housekeeping
const DELAY_PUMP_MS: u64 = 250;

/// Cloneable surface collaborators use to reach the core
#[derive(Clone)]
pub struct BridgeHandle {
    board: Arc<dyn Board>,
    ctx: BoardCtx,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl BridgeHandle {
    /// Dispatch one intent; the set in board dispatch plus model reads
    pub async fn intent(&self, request: IntentRequest, opts: IntentOptions) -> Result<()> {
        self.board.dispatch(&self.ctx, request, opts).await
    }

    /// Configuration graph snapshot
    pub fn get_equipment(&self) -> crate::model::PoolConfig {
        self.ctx.changes.config_snapshot()
    }

    /// Live-state graph snapshot
    pub fn get_state(&self) -> crate::model::PoolState {
        self.ctx.changes.state_snapshot()
    }

    /// Dotted-path read into the serialized model
    pub fn get_section(&self, path: &str) -> Option<serde_json::Value> {
        self.ctx.changes.get_section(path)
    }

    /// Subscribe to entity events (`None` topics = all)
    pub fn subscribe(&self, topics: Option<&[EntityKind]>, depth: usize) -> Subscription {
        self.ctx.changes.bus().subscribe(topics, depth)
    }

    /// Begin an orderly shutdown
    pub fn request_shutdown(&self) {
        self.shutdown_tx.send(true).ok();
    }
}

/// The assembled core
pub struct Bridge {
    config: Config,
    board: Arc<dyn Board>,
    ctx: BoardCtx,
    engines: Vec<EngineHandle>,
    engine_events_rx: mpsc::UnboundedReceiver<EngineEvent>,
    replay_rx: mpsc::UnboundedReceiver<IntentRequest>,
    reload_rx: mpsc::Receiver<Config>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
    logger: crate::logging::StructuredLogger,
}

impl Bridge {
    /// Build the whole stack from configuration. `config_path` enables
    /// hot reload when the config came from a file.
    pub async fn new(config: Config, config_path: Option<PathBuf>) -> Result<Self> {
        config.validate()?;
        let logger = get_logger("bridge");

        let data_dir = PathBuf::from(&config.data.dir);
        let config_file = PersistFile::new(data_dir.join("pool-config.json"));
        let state_file = PersistFile::new(data_dir.join("pool-state.json"));
        let (changes, report) = ChangeEngine::load(&config_file, &state_file);
        let changes = Arc::new(changes);

        let controller_type = config.controller.controller_type;
        let board: Arc<dyn Board> = Arc::from(board_for(controller_type));

        let (delays, replay_rx) = DelayManager::new(config.delays.clone());
        let delays = Arc::new(delays);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown_tx = Arc::new(shutdown_tx);

        // One engine per configured port; the primary is port 0
        let (engine_events_tx, engine_events_rx) = mpsc::unbounded_channel();
        let mut engines = Vec::new();
        let mut tasks = Vec::new();

        let mut port_specs: Vec<(u8, ControllerType, crate::config::CommsConfig)> =
            vec![(0, controller_type, config.controller.comms.clone())];
        for aux in &config.controller.aux_ports {
            if aux.enabled {
                port_specs.push((
                    aux.id,
                    aux.controller_type.unwrap_or(controller_type),
                    aux.comms.clone(),
                ));
            }
        }

        for (port_id, port_type, comms) in port_specs {
            let endpoint: Box<dyn Endpoint> = if comms.net_connect {
                Box::new(NetEndpoint::new(&comms.net_host, comms.net_port))
            } else {
                Box::new(SerialEndpoint::new(&comms))
            };
            let port = Port::new(port_id, endpoint);
            let family = ProtocolFamily::for_controller(port_type);
            let (runtime, handle) = EngineRuntime::new(
                port,
                family,
                comms,
                engine_events_tx.clone(),
                shutdown_rx.clone(),
            );
            tasks.push(tokio::spawn(runtime.run()));
            engines.push(handle);
        }

        let ctx = BoardCtx {
            changes: Arc::clone(&changes),
            delays: Arc::clone(&delays),
            engine: engines[0].clone(),
        };

        // Identity and boot status
        let version = option_env!("APP_VERSION").unwrap_or(env!("CARGO_PKG_VERSION"));
        changes.commit(|txn| {
            txn.equipment_config(|e| {
                e.controller_type = controller_type.tag().to_string();
                e.software_version = version.to_string();
            });
            txn.equipment_state(|e| {
                e.boot_time = Some(chrono::Utc::now());
                e.status.val = controller_status::LOADING;
                e.status.name =
                    controller_status::name(controller_status::LOADING).to_string();
                e.status.percent = 0;
            });
        });

        // A quarantined file is announced exactly once, after recovery
        if report.config == LoadOutcome::Corrupt {
            changes.publish_notice(
                "configurationCorrupt",
                serde_json::json!({ "path": config_file.path().display().to_string() }),
            );
        }
        if report.state == LoadOutcome::Corrupt {
            changes.publish_notice(
                "configurationCorrupt",
                serde_json::json!({ "path": state_file.path().display().to_string() }),
            );
        }

        // Debounced persistence
        let flush = FlushTask::new(
            Arc::clone(&changes),
            config_file,
            state_file,
            config.data.flush_quiet_ms,
            config.data.flush_max_ms,
        );
        tasks.push(tokio::spawn(flush.run(shutdown_rx.clone())));

        // Config hot reload
        let (reload_tx, reload_rx) = mpsc::channel(4);
        if let Some(path) = config_path {
            let watcher = ConfigWatcher::new(path);
            tasks.push(tokio::spawn(watcher.run(reload_tx, shutdown_rx.clone())));
        }

        // Schedule execution
        let scheduler = Scheduler::new(
            Arc::clone(&board),
            ctx.clone(),
            config.location.clone(),
            Box::new(SolarPosition),
        );
        tasks.push(tokio::spawn(scheduler.run(shutdown_rx.clone())));

        logger.info(&format!(
            "Bridge assembled: {} on {} port(s), {} orphan state item(s) pruned",
            controller_type,
            engines.len(),
            report.pruned
        ));

        Ok(Self {
            config,
            board,
            ctx,
            engines,
            engine_events_rx,
            replay_rx,
            reload_rx,
            shutdown_tx,
            shutdown_rx,
            tasks,
            logger,
        })
    }

    /// Collaborator surface
    pub fn handle(&self) -> BridgeHandle {
        BridgeHandle {
            board: Arc::clone(&self.board),
            ctx: self.ctx.clone(),
            shutdown_tx: Arc::clone(&self.shutdown_tx),
        }
    }

    fn set_equipment_status(&self, val: u8, percent: u8) {
        self.ctx.changes.commit(|txn| {
            txn.equipment_state(|e| {
                e.status.val = val;
                e.status.name = controller_status::name(val).to_string();
                e.status.percent = percent;
            });
        });
    }

    /// Kick off discovery and clock sync at *system* priority
    async fn discover(&self) {
        if let Err(e) = self
            .board
            .request_configuration(&self.ctx, ConfigScope::All, IntentOptions::default())
            .await
        {
            self.logger.warn(&format!("Discovery request failed: {}", e));
        }
        if self.config.controller.controller_type != ControllerType::Standalone
            && self.ctx.changes.with_model(|m| {
                m.config.options.clock_source == "server"
            })
        {
            if let Err(e) = self
                .board
                .set_clock(&self.ctx, chrono::Utc::now(), IntentOptions::default())
                .await
            {
                self.logger.warn(&format!("Clock sync failed: {}", e));
            }
        }
        self.set_equipment_status(controller_status::READY, 100);
    }

    /// Run until shutdown is requested
    pub async fn run(mut self) -> Result<()> {
        self.logger.info("Bridge starting");
        self.discover().await;

        let mut delay_pump = interval(Duration::from_millis(DELAY_PUMP_MS));
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                event = self.engine_events_rx.recv() => {
                    match event {
                        Some(event) => self.handle_engine_event(event),
                        None => break,
                    }
                }
                Some(request) = self.replay_rx.recv() => {
                    // Operations released from pending slots
                    let opts = IntentOptions::background();
                    if let Err(e) = self.board.dispatch(&self.ctx, request, opts).await {
                        self.logger.debug(&format!("Replayed operation failed: {}", e));
                    }
                }
                Some(new_config) = self.reload_rx.recv() => {
                    self.logger.info("Applying reloaded configuration");
                    self.config = new_config;
                    self.ctx.changes.publish_notice(
                        "configuration-reloaded",
                        serde_json::json!({}),
                    );
                }
                _ = delay_pump.tick() => {
                    self.ctx.delays.pump();
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    fn handle_engine_event(&self, event: EngineEvent) {
        match event {
            EngineEvent::Frame { port_id, frame } => {
                self.board.decode(&self.ctx, port_id, &frame);
            }
            EngineEvent::PortLost { port_id } => {
                self.logger.warn(&format!("Port {} lost", port_id));
                if port_id == 0 {
                    self.set_equipment_status(controller_status::LOST, 0);
                }
            }
            EngineEvent::PortRecovered { port_id } => {
                self.logger.info(&format!("Port {} recovered", port_id));
                if port_id == 0 {
                    self.set_equipment_status(controller_status::READY, 100);
                }
            }
            EngineEvent::Degraded { port_id } => {
                self.logger
                    .warn(&format!("Port {} protocol-error rate degraded", port_id));
                if port_id == 0 {
                    self.set_equipment_status(controller_status::DEGRADED, 100);
                }
            }
        }
    }

    /// Reverse-order teardown under a hard deadline: scheduler and
    /// watcher react to the flag, engines drain and close their ports,
    /// the flusher writes once more on its way out
    async fn shutdown(mut self) {
        self.logger.info("Bridge shutting down");
        self.shutdown_tx.send(true).ok();
        for engine in &self.engines {
            engine.shutdown();
        }

        let drain = async {
            for task in self.tasks.drain(..) {
                task.await.ok();
            }
        };
        if timeout(SHUTDOWN_DEADLINE, drain).await.is_err() {
            self.logger
                .warn("Shutdown deadline exceeded, abandoning remaining tasks");
        }
        self.logger.info("Bridge stopped");
    }
}
