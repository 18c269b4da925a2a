//! Active interlocks refuse heat intents before any wire traffic.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use triton::boards::valuemaps::heat_mode;
use triton::boards::{Board, BoardCtx, IntentOptions, PanelBoard};
use triton::changes::ChangeEngine;
use triton::config::CommsConfig;
use triton::delays::DelayManager;
use triton::engine::EngineRuntime;
use triton::error::TritonError;
use triton::model::config::BodyConfig;
use triton::model::SystemModel;
use triton::port::mock::MockEndpoint;
use triton::port::Port;
use triton::protocol::ProtocolFamily;

#[tokio::test(start_paused = true)]
async fn interlock_refuses_with_no_wire_traffic_and_no_event() {
    let mut model = SystemModel::default();
    model.config.bodies.upsert(BodyConfig {
        id: 1,
        name: "Pool".to_string(),
        body_type: 2,
        capacity: 20000,
        heat_sources: 0x06,
    });
    let changes = Arc::new(ChangeEngine::new(model));
    let (delays, _replay) = DelayManager::new(Default::default());
    let delays = Arc::new(delays);

    let (endpoint, _peer) = MockEndpoint::pair();
    let port = Port::new(0, Box::new(endpoint));
    let (events_tx, _events_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (runtime, engine) = EngineRuntime::new(
        port,
        ProtocolFamily::Pentair16,
        CommsConfig::default(),
        events_tx,
        shutdown_rx,
    );
    let task = tokio::spawn(runtime.run());

    let ctx = BoardCtx {
        changes: Arc::clone(&changes),
        delays: Arc::clone(&delays),
        engine: engine.clone(),
    };
    let board = PanelBoard::new(triton::boards::intellitouch::profile());
    let mut sub = changes.bus().subscribe(None, 8);

    delays.set_interlock("spa-heat", &["pool-heat"]);

    let err = board
        .set_body_heat_mode(&ctx, 1, heat_mode::HEATER, IntentOptions::default())
        .await
        .unwrap_err();
    match err {
        TritonError::InterlockViolation { conflicting_key } => {
            assert_eq!(conflicting_key, "spa-heat");
        }
        other => panic!("unexpected error: {:?}", other),
    }

    // Nothing queued, nothing transmitted, no event emitted
    assert_eq!(engine.stats().transmissions.load(Ordering::Relaxed), 0);
    assert!(sub.rx.try_recv().is_err());

    shutdown_tx.send(true).ok();
    task.await.unwrap();
}
