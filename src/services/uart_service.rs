use crate::error::Result;
use serde::Serialize;

/// Serial device discovery for the API surface: lists candidate UART
/// ports with USB identity where the platform exposes it, so operators
/// can build stable `uart_port_map` entries.
#[derive(Clone, Default)]
pub struct UartService;

#[derive(Debug, Serialize)]
pub struct UartPortInfo {
    pub port: String,
    pub serial: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

impl UartService {
    pub fn new() -> Self {
        Self
    }

    pub fn list_ports(&self) -> Result<Vec<UartPortInfo>> {
        let ports = serialport::available_ports()
            .map_err(|e| crate::error::AppError::Transport(format!("Port scan failed: {}", e)))?;

        Ok(ports
            .into_iter()
            .map(|info| match info.port_type {
                serialport::SerialPortType::UsbPort(usb) => UartPortInfo {
                    port: info.port_name,
                    serial: usb.serial_number,
                    manufacturer: usb.manufacturer,
                    product: usb.product,
                },
                _ => UartPortInfo {
                    port: info.port_name,
                    serial: None,
                    manufacturer: None,
                    product: None,
                },
            })
            .collect())
    }
}
