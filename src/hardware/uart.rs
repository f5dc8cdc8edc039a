use crate::error::{AppError, Result};
use regex::Regex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Byte-stream surface of a serial link. `serialport` handles satisfy this
/// automatically; tests substitute a scripted implementation.
pub trait LinkIo: Read + Write + Send {}
impl<T: Read + Write + Send> LinkIo for T {}

/// Read poll quantum; also the serial handle's own read timeout, so a wait
/// loop wakes up at least this often to check its deadline.
const POLL_QUANTUM: Duration = Duration::from_millis(100);

/// Console links run at the usual debug-header rate.
const BAUD_RATE: u32 = 115200;

/// One physical serial connection: connect/disconnect lifecycle, line
/// oriented command send with expect-style pattern wait, and an optional
/// append-only transcript of all traffic.
///
/// Lifecycle is `disconnected -> connected -> disconnected`; disconnect is
/// idempotent and safe on every exit path.
pub struct UartTransport {
    port_name: String,
    log_file_path: Option<PathBuf>,
    link: Option<Box<dyn LinkIo>>,
    log_file: Option<File>,
}

impl UartTransport {
    pub fn new(port_name: impl Into<String>, log_file_path: Option<PathBuf>) -> Self {
        Self {
            port_name: port_name.into(),
            log_file_path,
            link: None,
            log_file: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// Opens the serial device (8N1, no flow control) and the transcript
    /// file when one was configured.
    pub fn connect(&mut self) -> Result<()> {
        let port = serialport::new(&self.port_name, BAUD_RATE)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(POLL_QUANTUM)
            .open()
            .map_err(|e| {
                AppError::Transport(format!(
                    "Failed to open serial port {}: {}",
                    self.port_name, e
                ))
            })?;
        tracing::info!("Serial connection opened for port {}", self.port_name);

        if let Some(path) = &self.log_file_path {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            self.log_file = Some(file);
            tracing::debug!("UART transcript opened at {}", path.display());
        }

        self.attach(Box::new(port));
        Ok(())
    }

    /// Binds an already-open byte stream; `connect` goes through here and
    /// tests call it directly with a scripted link.
    fn attach(&mut self, link: Box<dyn LinkIo>) {
        self.link = Some(link);
    }

    /// Writes `cmd` (newline-terminated unless `enter_new_line` is off).
    /// With an expect pattern, waits up to `timeout` for it to appear in
    /// the stream and retries the full send+wait up to `retry_count`
    /// attempts; without one the command is fire-and-forget.
    pub fn send_command(
        &mut self,
        cmd: &str,
        expected: Option<&str>,
        enter_new_line: bool,
        timeout: Duration,
        retry_count: u32,
    ) -> Result<()> {
        let pattern = match expected {
            Some(raw) => Some(Regex::new(raw).map_err(|e| {
                AppError::Step(format!("Invalid expected_output pattern '{}': {}", raw, e))
            })?),
            None => None,
        };

        let attempts = retry_count.max(1);
        for attempt in 1..=attempts {
            tracing::debug!("Sending UART command: {}", cmd);
            self.write_line(cmd, enter_new_line)?;

            let Some(pattern) = &pattern else {
                return Ok(());
            };

            tracing::debug!("Waiting for: {}", pattern.as_str());
            if self.wait_for(pattern, timeout)? {
                tracing::debug!("UART command matched on attempt {}", attempt);
                return Ok(());
            }

            if attempt < attempts {
                tracing::warn!(
                    "No match for '{}' within {:?}, trying again (attempt {} of {})",
                    pattern.as_str(),
                    timeout,
                    attempt + 1,
                    attempts
                );
            }
        }

        Err(AppError::UartTimeout(format!(
            "No match for '{}' after {} attempt(s) of command: {}",
            expected.unwrap_or_default(),
            attempts,
            cmd
        )))
    }

    fn write_line(&mut self, cmd: &str, enter_new_line: bool) -> Result<()> {
        let link = self
            .link
            .as_mut()
            .ok_or_else(|| AppError::Transport("Serial port is not connected".to_string()))?;

        let mut data = cmd.as_bytes().to_vec();
        if enter_new_line {
            data.push(b'\n');
        }
        link.write_all(&data)
            .and_then(|_| link.flush())
            .map_err(|e| AppError::Transport(format!("Serial write failed: {}", e)))?;

        if let Some(file) = &mut self.log_file {
            let _ = file.write_all(&data);
        }
        Ok(())
    }

    /// Drain-reads into a rolling buffer until the pattern matches, the
    /// stream ends, or the deadline passes. Returns whether it matched.
    fn wait_for(&mut self, pattern: &Regex, timeout: Duration) -> Result<bool> {
        let link = self
            .link
            .as_mut()
            .ok_or_else(|| AppError::Transport("Serial port is not connected".to_string()))?;

        let deadline = Instant::now() + timeout;
        let mut window = String::new();
        let mut chunk = [0u8; 256];

        loop {
            match link.read(&mut chunk) {
                Ok(0) => {
                    // end of stream; nothing more will arrive this attempt
                    return Ok(false);
                }
                Ok(n) => {
                    // console streams are effectively latin-1; decode
                    // byte-per-char so split sequences cannot corrupt the
                    // match window
                    window.extend(chunk[..n].iter().map(|&b| b as char));
                    if let Some(file) = &mut self.log_file {
                        let _ = file.write_all(&chunk[..n]);
                    }
                    if pattern.is_match(&window) {
                        return Ok(true);
                    }
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::TimedOut
                        || e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => {
                    return Err(AppError::Transport(format!("Serial read failed: {}", e)));
                }
            }

            if Instant::now() >= deadline {
                return Ok(false);
            }
        }
    }

    /// Closes the stream and the transcript. Each resource is released
    /// independently; close-time failures are logged and never propagated.
    pub fn disconnect(&mut self) {
        if let Some(mut link) = self.link.take() {
            if let Err(e) = link.flush() {
                tracing::warn!("Error while closing serial port {}: {}", self.port_name, e);
            }
            tracing::info!("Serial connection closed for port {}", self.port_name);
        }
        if let Some(mut file) = self.log_file.take() {
            if let Err(e) = file.flush() {
                tracing::warn!("Error while closing UART transcript: {}", e);
            }
        }
    }
}

impl Drop for UartTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}
