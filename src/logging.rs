//! Structured logging and tracing for Triton
//!
//! This module provides logging functionality with support for structured
//! logging, daily log rotation, and integration with the tracing ecosystem.

use crate::config::LogConfig;
use crate::error::{Result, TritonError};
use tracing::{debug, error, info, trace, warn, Level};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize logging system based on configuration
///
/// `POOL_LOG_LEVEL` overrides the configured application level.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let level_str = std::env::var("POOL_LOG_LEVEL").unwrap_or_else(|_| config.level.clone());
    let level = parse_log_level(&level_str)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("triton={},tokio_serial=warn", level).into());

    // Set up log file appender with rotation
    let file_appender = rolling::Builder::new()
        .rotation(rolling::Rotation::DAILY)
        .filename_prefix("triton")
        .filename_suffix("log")
        .max_log_files(config.backup_count as usize)
        .build(&config.file)
        .map_err(|e| TritonError::config(format!("Failed to create log file appender: {}", e)))?;

    let (non_blocking_appender, guard) = non_blocking(file_appender);
    // Keep the writer guard alive for the process lifetime
    std::mem::forget(guard);

    let registry = tracing_subscriber::registry().with(filter);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_appender)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false);

    let file_layer = if config.json_format {
        file_layer.json().boxed()
    } else {
        file_layer.boxed()
    };

    let subscriber = registry.with(file_layer);

    if config.console_output {
        let console_layer = fmt::layer().with_target(false).boxed();
        subscriber.with(console_layer).init();
    } else {
        subscriber.init();
    }

    info!(
        "Logging initialized - level: {}, file: {}",
        level, config.file
    );

    Ok(())
}

/// Parse log level string to tracing Level
fn parse_log_level(level_str: &str) -> Result<Level> {
    match level_str.to_uppercase().as_str() {
        "TRACE" => Ok(Level::TRACE),
        "DEBUG" => Ok(Level::DEBUG),
        "INFO" => Ok(Level::INFO),
        "WARN" => Ok(Level::WARN),
        "ERROR" => Ok(Level::ERROR),
        _ => Err(TritonError::config(format!(
            "Invalid log level: {}",
            level_str
        ))),
    }
}

/// Context information for log messages
#[derive(Debug, Clone)]
pub struct LogContext {
    /// Component name (e.g., "engine", "port", "scheduler")
    pub component: String,

    /// Port id for multi-port setups
    pub port_id: Option<u8>,

    /// Controller variant tag
    pub controller_type: Option<String>,

    /// Additional context fields
    pub extra_fields: std::collections::HashMap<String, String>,
}

impl LogContext {
    /// Create a new log context
    pub fn new(component: &str) -> Self {
        Self {
            component: component.to_string(),
            port_id: None,
            controller_type: None,
            extra_fields: std::collections::HashMap::new(),
        }
    }

    /// Set port id
    pub fn with_port_id(mut self, port_id: u8) -> Self {
        self.port_id = Some(port_id);
        self
    }

    /// Set controller variant
    pub fn with_controller_type(mut self, controller_type: String) -> Self {
        self.controller_type = Some(controller_type);
        self
    }

    /// Add extra field
    pub fn with_field(mut self, key: &str, value: String) -> Self {
        self.extra_fields.insert(key.to_string(), value);
        self
    }
}

/// Structured logger with context
#[derive(Clone)]
pub struct StructuredLogger {
    context: LogContext,
}

impl StructuredLogger {
    /// Create a new structured logger with context
    pub fn new(context: LogContext) -> Self {
        Self { context }
    }

    /// Log an info message with context
    pub fn info(&self, message: &str) {
        let fields = self.format_fields();
        info!(%fields, "{}", message);
    }

    /// Log a warning message with context
    pub fn warn(&self, message: &str) {
        let fields = self.format_fields();
        warn!(%fields, "{}", message);
    }

    /// Log an error message with context
    pub fn error(&self, message: &str) {
        let fields = self.format_fields();
        error!(%fields, "{}", message);
    }

    /// Log a debug message with context
    pub fn debug(&self, message: &str) {
        let fields = self.format_fields();
        debug!(%fields, "{}", message);
    }

    /// Log a trace message with context
    pub fn trace(&self, message: &str) {
        let fields = self.format_fields();
        trace!(%fields, "{}", message);
    }

    /// Format context fields for logging
    fn format_fields(&self) -> String {
        let mut fields = vec![format!("component={}", self.context.component)];

        if let Some(port_id) = self.context.port_id {
            fields.push(format!("port={}", port_id));
        }

        if let Some(ref controller_type) = self.context.controller_type {
            fields.push(format!("controller={}", controller_type));
        }

        for (key, value) in &self.context.extra_fields {
            fields.push(format!("{}={}", key, value));
        }

        fields.join(",")
    }
}

/// Create a logger for a specific component
pub fn get_logger(component: &str) -> StructuredLogger {
    let context = LogContext::new(component);
    StructuredLogger::new(context)
}

/// Create a logger scoped to a component on one port
pub fn get_port_logger(component: &str, port_id: u8) -> StructuredLogger {
    let context = LogContext::new(component).with_port_id(port_id);
    StructuredLogger::new(context)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("DEBUG").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level("info").unwrap(), Level::INFO);
        assert_eq!(parse_log_level("ERROR").unwrap(), Level::ERROR);
        assert!(parse_log_level("invalid").is_err());
    }

    #[test]
    fn test_log_context() {
        let context = LogContext::new("engine")
            .with_port_id(1)
            .with_controller_type("intellitouch".to_string())
            .with_field("key", "value".to_string());

        assert_eq!(context.component, "engine");
        assert_eq!(context.port_id, Some(1));
        assert_eq!(context.controller_type, Some("intellitouch".to_string()));
        assert_eq!(context.extra_fields.get("key"), Some(&"value".to_string()));
    }

    #[test]
    fn test_structured_logger() {
        let logger = get_port_logger("engine", 0);

        // These should not panic even without an initialized subscriber
        logger.info("Test info message");
        logger.debug("Test debug message");
        logger.warn("Test warning message");
        logger.error("Test error message");
    }
}
