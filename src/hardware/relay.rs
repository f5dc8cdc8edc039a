use crate::dut::PowerConfig;
use crate::error::{AppError, Result};
use crate::hardware::uart::LinkIo;
use diqwest::blocking::WithDigestAuth;
use serde::Deserialize;
use std::time::Duration;

const OUTLET_COUNT: u8 = 8;
const SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Serial relay board init handshake bytes.
const INIT_COMMAND: [u8; 2] = [0x50, 0x51];

/// Power-control surface over one relay endpoint. Outlets are numbered
/// from 1. Implementations keep a last-known state per outlet so `toggle`
/// can apply the logical complement.
pub trait Relay: Send {
    fn initialize(&mut self) -> Result<()>;
    fn on(&mut self, outlet: u8) -> Result<()>;
    fn off(&mut self, outlet: u8) -> Result<()>;
    fn toggle(&mut self, outlet: u8) -> Result<()>;
    fn power_on_reset(&mut self, outlet: u8) -> Result<()>;
}

/// A relay plus the outlet the DUT is plugged into, as configured in the
/// device definition's power settings.
pub struct PowerEndpoint {
    pub relay: Box<dyn Relay>,
    pub outlet: u8,
}

/// Builds the configured power backend. Unknown module names are a
/// validation error, caught before any hardware is touched.
pub fn create(config: &PowerConfig) -> Result<PowerEndpoint> {
    match config.module.as_str() {
        "serial" => {
            let settings: SerialRelaySettings = parse_settings(&config.settings)?;
            let relay = SerialRelay::open(&settings.uart_port, settings.baudrate)?;
            Ok(PowerEndpoint {
                relay: Box::new(relay),
                outlet: settings.outlet,
            })
        }
        "ip" => {
            let settings: IpRelaySettings = parse_settings(&config.settings)?;
            let relay = IpRelay::new(
                &settings.ip_address,
                &settings.username,
                &settings.password,
            );
            Ok(PowerEndpoint {
                relay: Box::new(relay),
                outlet: settings.outlet,
            })
        }
        other => Err(AppError::Validation(format!(
            "Unknown power module '{}' (available: serial, ip)",
            other
        ))),
    }
}

fn parse_settings<T: for<'de> Deserialize<'de>>(settings: &serde_json::Value) -> Result<T> {
    serde_json::from_value(settings.clone())
        .map_err(|e| AppError::Validation(format!("Invalid power settings: {}", e)))
}

#[derive(Debug, Deserialize)]
struct SerialRelaySettings {
    uart_port: String,
    #[serde(default = "default_baudrate")]
    baudrate: u32,
    #[serde(default = "default_outlet")]
    outlet: u8,
}

#[derive(Debug, Deserialize)]
struct IpRelaySettings {
    ip_address: String,
    username: String,
    password: String,
    #[serde(default = "default_outlet")]
    outlet: u8,
}

fn default_baudrate() -> u32 {
    9600
}

fn default_outlet() -> u8 {
    1
}

fn check_outlet(outlet: u8) -> Result<usize> {
    if outlet == 0 || outlet > OUTLET_COUNT {
        return Err(AppError::Relay(format!(
            "Outlet {} out of range (1..={})",
            outlet, OUTLET_COUNT
        )));
    }
    Ok((outlet - 1) as usize)
}

/// Direct byte-level protocol to a relay board behind a serial link. The
/// protocol has no readback, so the logical outlet states are cached
/// locally.
pub struct SerialRelay {
    link: Box<dyn LinkIo>,
    prev_state: [u8; OUTLET_COUNT as usize],
    settle_delay: Duration,
}

impl SerialRelay {
    /// Failing to open the link is fatal to the job, unlike later
    /// per-operation failures.
    pub fn open(uart_port: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(uart_port, baudrate)
            .timeout(Duration::from_secs(1))
            .open()
            .map_err(|e| {
                AppError::Setup(format!(
                    "Failed to open relay serial port {}: {}",
                    uart_port, e
                ))
            })?;
        Ok(Self::with_link(Box::new(port), SETTLE_DELAY))
    }

    fn with_link(link: Box<dyn LinkIo>, settle_delay: Duration) -> Self {
        Self {
            link,
            prev_state: [0; OUTLET_COUNT as usize],
            settle_delay,
        }
    }

    fn set_state(&mut self, outlet: u8, state: u8) -> Result<()> {
        let index = check_outlet(outlet)?;
        let encoded = (outlet - 1) ^ state;
        self.link
            .write_all(&[encoded])
            .and_then(|_| self.link.flush())
            .map_err(|e| AppError::Relay(format!("Relay write failed: {}", e)))?;
        self.prev_state[index] = state;
        Ok(())
    }
}

impl Relay for SerialRelay {
    fn initialize(&mut self) -> Result<()> {
        tracing::info!("Relay initialization in progress");
        for byte in INIT_COMMAND {
            std::thread::sleep(self.settle_delay);
            self.link
                .write_all(&[byte])
                .and_then(|_| self.link.flush())
                .map_err(|e| AppError::Setup(format!("Relay init handshake failed: {}", e)))?;
        }
        std::thread::sleep(self.settle_delay);
        tracing::info!("Relay initialization done");
        Ok(())
    }

    fn on(&mut self, outlet: u8) -> Result<()> {
        self.set_state(outlet, 1)
    }

    fn off(&mut self, outlet: u8) -> Result<()> {
        self.set_state(outlet, 0)
    }

    fn toggle(&mut self, outlet: u8) -> Result<()> {
        let index = check_outlet(outlet)?;
        self.set_state(outlet, self.prev_state[index] ^ 1)
    }

    fn power_on_reset(&mut self, outlet: u8) -> Result<()> {
        self.set_state(outlet, 0)?;
        std::thread::sleep(self.settle_delay);
        self.set_state(outlet, 1)
    }
}

/// Network power-distribution unit driven over its REST API with digest
/// authentication. State-changing requests are followed by a full outlet
/// re-sync so the cached view stays authoritative.
pub struct IpRelay {
    base_url: String,
    username: String,
    password: String,
    client: reqwest::blocking::Client,
    prev_state: Vec<bool>,
    settle_delay: Duration,
}

impl IpRelay {
    pub fn new(ip_address: &str, username: &str, password: &str) -> Self {
        Self {
            base_url: format!("http://{}/restapi", ip_address),
            username: username.to_string(),
            password: password.to_string(),
            client: reqwest::blocking::Client::new(),
            prev_state: vec![false; OUTLET_COUNT as usize],
            settle_delay: SETTLE_DELAY,
        }
    }

    /// Read-after-write state refresh of all outlets.
    fn sync_state(&mut self) -> Result<()> {
        let url = format!("{}/relay/outlets/all;/physical_state/", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send_with_digest_auth(&self.username, &self.password)
            .map_err(|e| AppError::Relay(format!("Relay state sync failed: {}", e)))?
            .error_for_status()
            .map_err(|e| AppError::Relay(format!("Relay state sync failed: {}", e)))?;

        self.prev_state = response
            .json()
            .map_err(|e| AppError::Relay(format!("Relay state sync returned bad JSON: {}", e)))?;
        Ok(())
    }

    fn set_state(&mut self, outlet: u8, state: bool) -> Result<()> {
        check_outlet(outlet)?;
        let url = format!("{}/relay/outlets/{}/state/", self.base_url, outlet - 1);
        let body = [("value", if state { "true" } else { "false" })];

        let result = self
            .client
            .put(&url)
            .header("X-CSRF", "x")
            .form(&body)
            .send_with_digest_auth(&self.username, &self.password);

        match result {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                tracing::error!("Relay request to {} failed: HTTP {}", url, response.status());
                return Err(AppError::Relay(format!(
                    "Relay returned HTTP {}",
                    response.status()
                )));
            }
            Err(e) => {
                tracing::error!("Relay request to {} failed: {}", url, e);
                return Err(AppError::Relay(format!("Relay request failed: {}", e)));
            }
        }

        self.sync_state()
    }
}

impl Relay for IpRelay {
    fn initialize(&mut self) -> Result<()> {
        tracing::info!("Relay initialization in progress");
        self.sync_state()?;
        tracing::info!("Relay initialization done");
        Ok(())
    }

    fn on(&mut self, outlet: u8) -> Result<()> {
        self.set_state(outlet, true)
    }

    fn off(&mut self, outlet: u8) -> Result<()> {
        self.set_state(outlet, false)
    }

    fn toggle(&mut self, outlet: u8) -> Result<()> {
        let index = check_outlet(outlet)?;
        // the device decides how many outlets the sync reports; an outlet
        // it never reported is treated as off
        let last = self.prev_state.get(index).copied().unwrap_or(false);
        self.set_state(outlet, !last)
    }

    fn power_on_reset(&mut self, outlet: u8) -> Result<()> {
        self.set_state(outlet, false)?;
        std::thread::sleep(self.settle_delay);
        self.set_state(outlet, true)?;
        std::thread::sleep(self.settle_delay);
        Ok(())
    }
}
