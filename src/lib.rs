//! # Triton - Pool Automation Bridge
//!
//! A Rust implementation of a pool-automation bridge speaking the RS-485
//! wire protocol of the Pentair-family pool controllers (IntelliCenter,
//! IntelliTouch, EasyTouch, SunTouch, IntelliCom, AquaLink), maintaining
//! the authoritative configuration and live state of the connected
//! equipment.
//!
//! ## Features
//!
//! - **Async-first**: Tokio runtime end to end
//! - **Multi-port RS-485**: native serial, TCP-bridged serial, and an
//!   in-memory loopback for offline testing
//! - **Two framing variants**: Pentair-16 and Pentair-2, with a resumable
//!   decoder and single-byte resync
//! - **Transaction engine**: paced transmits, response matching,
//!   timeouts and bounded retries per port
//! - **Variant boards**: one realization per controller family behind a
//!   single trait, value maps included
//! - **Equipment model**: typed configuration and state graphs with
//!   change journaling, per-entity events, and debounced atomic JSON
//!   persistence
//! - **Delay manager**: startup staggering, change cooldowns,
//!   interlocks, heater run-on
//! - **Scheduler**: 1 Hz execution with sunrise/sunset substitution
//!
//! ## Architecture
//!
//! The application follows a modular architecture with clear separation
//! of concerns:
//!
//! - `config`: user configuration with env overrides and hot reload
//! - `logging`: structured logging and tracing
//! - `port`: RS-485 endpoints and reconnect supervision
//! - `protocol`: frame codec
//! - `engine`: per-port transaction engine
//! - `boards`: variant dispatch, value maps, intent handlers, decoders
//! - `model`: equipment configuration and live state
//! - `changes`: commit lane, entity events, dirty tracking
//! - `persistence`: atomic JSON documents
//! - `delays`: delay and interlock registry
//! - `scheduler`: schedule execution
//! - `bridge`: startup wiring and teardown

pub mod boards;
pub mod bridge;
pub mod changes;
pub mod config;
pub mod delays;
pub mod engine;
pub mod error;
pub mod logging;
pub mod model;
pub mod persistence;
pub mod port;
pub mod protocol;
pub mod scheduler;

// Re-export commonly used types
pub use bridge::{Bridge, BridgeHandle};
pub use config::Config;
pub use error::{Result, TritonError};
