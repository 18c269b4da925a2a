use super::*;

#[test]
fn defaults_are_valid() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.controller.controller_type, ControllerType::IntelliTouch);
    assert_eq!(config.controller.comms.idle_before_tx_ms, 40);
    assert_eq!(config.controller.comms.inter_frame_delay_ms, 50);
    assert_eq!(config.controller.comms.inter_byte_delay_ms, 0);
    assert_eq!(config.controller.comms.response_timeout_ms, 1500);
    assert_eq!(config.controller.comms.retries, 3);
    assert_eq!(config.data.flush_quiet_ms, 3000);
    assert_eq!(config.data.flush_max_ms, 30000);
}

#[test]
fn controller_type_tags() {
    assert_eq!(ControllerType::IntelliCenter.tag(), "intellicenter");
    assert_eq!(ControllerType::Standalone.tag(), "standalone");
    let yaml = "type: easytouch\n";
    #[derive(serde::Deserialize)]
    struct Probe {
        #[serde(rename = "type")]
        t: ControllerType,
    }
    let probe: Probe = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(probe.t, ControllerType::EasyTouch);
}

#[test]
fn yaml_round_trip_uses_camel_case() {
    let config = Config::default();
    let yaml = serde_yaml::to_string(&config).unwrap();
    assert!(yaml.contains("rs485Port"));
    assert!(yaml.contains("idleBeforeTxMs"));
    assert!(yaml.contains("flushQuietMs"));
    let back: Config = serde_yaml::from_str(&yaml).unwrap();
    assert_eq!(
        back.controller.comms.rs485_port,
        config.controller.comms.rs485_port
    );
}

#[test]
fn env_overrides_apply() {
    std::env::set_var("POOL_NET_CONNECT", "true");
    std::env::set_var("POOL_NET_HOST", "bridge.local");
    std::env::set_var("POOL_NET_PORT", "9802");
    std::env::set_var("POOL_RS485_PORT", "/dev/ttyACM3");
    std::env::set_var("POOL_LATITUDE", "33.66");
    std::env::set_var("POOL_LONGITUDE", "-117.99");
    std::env::set_var("POOL_LOG_LEVEL", "debug");

    let mut config = Config::default();
    config.apply_env_overrides();

    assert!(config.controller.comms.net_connect);
    assert_eq!(config.controller.comms.net_host, "bridge.local");
    assert_eq!(config.controller.comms.net_port, 9802);
    assert_eq!(config.controller.comms.rs485_port, "/dev/ttyACM3");
    assert!((config.location.latitude - 33.66).abs() < 1e-9);
    assert!((config.location.longitude + 117.99).abs() < 1e-9);
    assert_eq!(config.log.app.level, "debug");

    for var in [
        "POOL_NET_CONNECT",
        "POOL_NET_HOST",
        "POOL_NET_PORT",
        "POOL_RS485_PORT",
        "POOL_LATITUDE",
        "POOL_LONGITUDE",
        "POOL_LOG_LEVEL",
    ] {
        std::env::remove_var(var);
    }
}

#[test]
fn validation_rejects_bad_comms() {
    let mut config = Config::default();
    config.controller.comms.data_bits = 9;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.controller.comms.parity = "mark".to_string();
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.controller.comms.net_connect = true;
    config.controller.comms.net_host.clear();
    assert!(config.validate().is_err());
}

#[test]
fn validation_rejects_aux_port_zero() {
    let mut config = Config::default();
    config.controller.aux_ports.push(AuxPortConfig {
        id: 0,
        controller_type: None,
        comms: CommsConfig::default(),
        enabled: true,
    });
    assert!(config.validate().is_err());
}

#[test]
fn validation_rejects_inverted_flush_window() {
    let mut config = Config::default();
    config.data.flush_quiet_ms = 60000;
    assert!(config.validate().is_err());
}

#[test]
fn validation_rejects_out_of_range_location() {
    let mut config = Config::default();
    config.location.latitude = 91.0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.location.longitude = -200.0;
    assert!(config.validate().is_err());
}
