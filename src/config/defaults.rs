use super::*;

impl Default for Config {
    fn default() -> Self {
        Self {
            controller: ControllerConfig::default(),
            location: LocationConfig::default(),
            log: LogSection::default(),
            data: DataConfig::default(),
            delays: DelaysConfig::default(),
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            controller_type: ControllerType::IntelliTouch,
            comms: CommsConfig::default(),
            aux_ports: Vec::new(),
        }
    }
}

impl Default for CommsConfig {
    fn default() -> Self {
        Self {
            net_connect: false,
            net_host: String::new(),
            net_port: 9801,
            rs485_port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            data_bits: 8,
            parity: "none".to_string(),
            stop_bits: 1,
            flow_control: "none".to_string(),
            idle_before_tx_ms: 40,
            inter_frame_delay_ms: 50,
            inter_byte_delay_ms: 0,
            response_timeout_ms: 1500,
            retries: 3,
        }
    }
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            latitude: 0.0,
            longitude: 0.0,
            timezone: "UTC".to_string(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: "logs".to_string(),
            backup_count: 5,
            json_format: false,
            console_output: true,
        }
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: "data".to_string(),
            flush_quiet_ms: 3000,
            flush_max_ms: 30000,
        }
    }
}

impl Default for DelaysConfig {
    fn default() -> Self {
        Self {
            startup_stagger_ms: 2000,
            pump_cooldown_ms: 30000,
            heater_cooldown_ms: 120_000,
            valve_cooldown_ms: 10000,
            heater_run_on_ms: 300_000,
        }
    }
}
