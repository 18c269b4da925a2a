//! Local serial (RS-485) endpoint
//!
//! Maps the comms configuration onto a tokio-serial builder and opens the
//! device. Line parameter validation happens at config load; this module
//! only translates the already-validated strings into tokio-serial types.

use crate::config::CommsConfig;
use crate::error::{Result, TritonError};
use crate::port::{Endpoint, IoStream};
use async_trait::async_trait;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, StopBits};

/// Serial device endpoint
pub struct SerialEndpoint {
    device: String,
    baud_rate: u32,
    data_bits: DataBits,
    stop_bits: StopBits,
    parity: Parity,
    flow_control: FlowControl,
}

impl SerialEndpoint {
    /// Build from validated comms configuration
    pub fn new(comms: &CommsConfig) -> Self {
        let data_bits = match comms.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        };

        let stop_bits = match comms.stop_bits {
            2 => StopBits::Two,
            _ => StopBits::One,
        };

        let parity = match comms.parity.as_str() {
            "even" => Parity::Even,
            "odd" => Parity::Odd,
            _ => Parity::None,
        };

        let flow_control = match comms.flow_control.as_str() {
            "software" => FlowControl::Software,
            "hardware" => FlowControl::Hardware,
            _ => FlowControl::None,
        };

        Self {
            device: comms.rs485_port.clone(),
            baud_rate: comms.baud_rate,
            data_bits,
            stop_bits,
            parity,
            flow_control,
        }
    }
}

#[async_trait]
impl Endpoint for SerialEndpoint {
    fn describe(&self) -> String {
        format!("serial {} @ {} baud", self.device, self.baud_rate)
    }

    async fn open(&self) -> Result<Box<dyn IoStream>> {
        let builder = tokio_serial::new(self.device.as_str(), self.baud_rate)
            .data_bits(self.data_bits)
            .stop_bits(self.stop_bits)
            .parity(self.parity)
            .flow_control(self.flow_control);

        let stream = builder
            .open_native_async()
            .map_err(|e| TritonError::internal(format!("{}: {}", self.device, e)))?;

        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_line_parameters() {
        let mut comms = CommsConfig::default();
        comms.data_bits = 7;
        comms.stop_bits = 2;
        comms.parity = "even".to_string();
        comms.flow_control = "hardware".to_string();

        let endpoint = SerialEndpoint::new(&comms);
        assert_eq!(endpoint.data_bits, DataBits::Seven);
        assert_eq!(endpoint.stop_bits, StopBits::Two);
        assert_eq!(endpoint.parity, Parity::Even);
        assert_eq!(endpoint.flow_control, FlowControl::Hardware);
    }

    #[test]
    fn describes_device() {
        let comms = CommsConfig::default();
        let endpoint = SerialEndpoint::new(&comms);
        assert!(endpoint.describe().contains("/dev/ttyUSB0"));
    }
}
