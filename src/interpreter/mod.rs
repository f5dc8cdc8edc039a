use crate::dut::DutConfig;
use crate::error::{AppError, Result};
use crate::hardware::relay::{self, PowerEndpoint};
use crate::hardware::uart::UartTransport;
use crate::models::{PowerState, StatusPatch, TestStep};
use crate::plugins::{HookEvent, HookPhase, PluginEngine, SharedContext};
use crate::repository::StatusStore;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Cooperative cancellation handle checked between steps. Nothing triggers
/// it yet; a submitted job runs to completion or failure.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Walks an ordered list of typed steps against the job's hardware,
/// applying per-step retry/timeout policy. Owns every UART connection and
/// relay handle it creates; all of them are job-local and torn down before
/// `run` returns, whatever the exit path.
pub struct StepInterpreter {
    job_id: String,
    log_dir: PathBuf,
    dut: Option<DutConfig>,
    hooks: Arc<PluginEngine>,
    store: Arc<StatusStore>,
    cancel: CancelToken,
    uarts: HashMap<String, UartTransport>,
    power: Option<PowerEndpoint>,
    host_log_recorded: bool,
}

impl StepInterpreter {
    pub fn new(
        job_id: impl Into<String>,
        log_dir: PathBuf,
        dut: Option<DutConfig>,
        hooks: Arc<PluginEngine>,
        store: Arc<StatusStore>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            log_dir,
            dut,
            hooks,
            store,
            cancel: CancelToken::default(),
            uarts: HashMap::new(),
            power: None,
            host_log_recorded: false,
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Executes the steps strictly in order; the first failure aborts the
    /// remainder. Teardown of opened connections is guaranteed.
    pub fn run(&mut self, steps: &[TestStep], ctx: &mut SharedContext) -> Result<()> {
        let outcome = self.run_sequence(steps, ctx);
        self.disconnect_all();
        outcome
    }

    fn run_sequence(&mut self, steps: &[TestStep], ctx: &mut SharedContext) -> Result<()> {
        for step in steps {
            if self.cancel.is_cancelled() {
                return Err(AppError::Step("Execution cancelled".to_string()));
            }

            if let Err(e) = self.run_step(step, ctx) {
                let detail = format!("{}: {}", step.kind(), e);
                self.hooks
                    .dispatch(HookEvent::Error, HookPhase::Pre, ctx, &detail);
                self.hooks
                    .dispatch(HookEvent::Error, HookPhase::Post, ctx, &detail);
                return Err(e);
            }
        }
        Ok(())
    }

    fn run_step(&mut self, step: &TestStep, ctx: &mut SharedContext) -> Result<()> {
        tracing::info!("Running step '{}'", step.kind());
        match step {
            TestStep::PowerControl {
                power_state,
                pre_delay,
                post_delay,
            } => {
                sleep_opt(*pre_delay);
                self.apply_power_state(*power_state)?;
                sleep_opt(*post_delay);
                Ok(())
            }
            TestStep::BootMode {
                boot_mode_name,
                pre_delay,
                post_delay,
            } => {
                sleep_opt(*pre_delay);
                self.resolve_boot_mode(boot_mode_name, ctx)?;
                sleep_opt(*post_delay);
                Ok(())
            }
            TestStep::Delay { delay_in_seconds } => {
                std::thread::sleep(Duration::from_secs_f64(*delay_in_seconds));
                Ok(())
            }
            TestStep::UartCommand {
                command,
                uart_port,
                enter_new_line,
                expected_output,
                timeout,
                retry_count,
            } => {
                self.hooks
                    .dispatch(HookEvent::Command, HookPhase::Pre, ctx, command);
                let result = self.run_uart_command(
                    command,
                    uart_port,
                    *enter_new_line,
                    expected_output.as_deref(),
                    Duration::from_secs(*timeout),
                    *retry_count,
                );
                self.hooks
                    .dispatch(HookEvent::Command, HookPhase::Post, ctx, command);
                result
            }
            TestStep::UartImageFlashing {
                image_path,
                flashing_port,
                log_port,
                timeout: _,
            } => self.run_image_flashing(image_path, flashing_port, log_port, ctx),
            TestStep::HostCommand {
                command,
                cwd,
                env,
                expected_output,
                return_code,
                error_patterns,
                timeout,
                retry_count,
            } => {
                self.hooks
                    .dispatch(HookEvent::Command, HookPhase::Pre, ctx, command);
                let result = self.run_host_command_step(
                    command,
                    cwd.as_deref(),
                    env.as_ref(),
                    expected_output.as_deref(),
                    *return_code,
                    error_patterns,
                    Duration::from_secs(*timeout),
                    *retry_count,
                    ctx,
                );
                self.hooks
                    .dispatch(HookEvent::Command, HookPhase::Post, ctx, command);
                result
            }
            TestStep::Loop {
                loop_count,
                block,
                values,
            } => self.run_loop(*loop_count, block, values, ctx),
        }
    }

    fn dut(&self) -> Result<&DutConfig> {
        self.dut
            .as_ref()
            .ok_or_else(|| AppError::Step("Step requires a device but none is configured".to_string()))
    }

    fn apply_power_state(&mut self, state: PowerState) -> Result<()> {
        if self.power.is_none() {
            let mut endpoint = relay::create(self.dut()?.power_config())?;
            endpoint.relay.initialize()?;
            self.power = Some(endpoint);
        }
        let Some(endpoint) = self.power.as_mut() else {
            return Err(AppError::Step("Power endpoint unavailable".to_string()));
        };
        let outlet = endpoint.outlet;

        match state {
            PowerState::On => endpoint.relay.on(outlet),
            PowerState::Off => endpoint.relay.off(outlet),
            PowerState::Toggle => endpoint.relay.toggle(outlet),
            PowerState::PowerOnReset => endpoint.relay.power_on_reset(outlet),
        }
    }

    /// Resolves the logical boot mode to its hardware code and records it.
    /// Driving the boot-strap GPIOs with the code is an extension point.
    fn resolve_boot_mode(&mut self, mode_name: &str, ctx: &mut SharedContext) -> Result<()> {
        let code = self
            .dut()?
            .boot_mode(mode_name)
            .ok_or_else(|| {
                AppError::Step(format!("Boot mode '{}' is not defined for this device", mode_name))
            })?
            .to_string();

        tracing::info!("Boot mode '{}' resolves to code {}", mode_name, code);
        ctx.insert(
            "boot_mode".to_string(),
            serde_json::json!({ "name": mode_name, "code": code }),
        );
        Ok(())
    }

    fn run_uart_command(
        &mut self,
        command: &str,
        uart_port: &str,
        enter_new_line: bool,
        expected_output: Option<&str>,
        timeout: Duration,
        retry_count: u32,
    ) -> Result<()> {
        let transport = self.uart_for(uart_port)?;
        transport.send_command(command, expected_output, enter_new_line, timeout, retry_count)
    }

    /// Resolves a logical port name and returns its connection, opening and
    /// caching it on first use for this job.
    fn uart_for(&mut self, uart_port: &str) -> Result<&mut UartTransport> {
        if !self.uarts.contains_key(uart_port) {
            let path = self
                .dut()?
                .uart_port(uart_port)
                .ok_or_else(|| {
                    AppError::Step(format!(
                        "UART port '{}' is not defined for this device",
                        uart_port
                    ))
                })?
                .to_string();

            let transcript_name = format!("uart_{}.log", uart_port);
            let mut transport =
                UartTransport::new(path, Some(self.log_dir.join(&transcript_name)));
            transport.connect()?;
            self.record_log_artifact(&transcript_name)?;
            self.uarts.insert(uart_port.to_string(), transport);
        }
        self.uarts.get_mut(uart_port).ok_or_else(|| {
            AppError::Transport(format!("UART connection '{}' unavailable", uart_port))
        })
    }

    /// Contract-only extension point: locating the image and verifying the
    /// flash via the log port are specified, but the transfer mechanics are
    /// not implemented. Fails explicitly instead of reporting success for
    /// an unflashed image.
    fn run_image_flashing(
        &mut self,
        image_path: &str,
        flashing_port: &str,
        log_port: &str,
        ctx: &mut SharedContext,
    ) -> Result<()> {
        self.hooks
            .dispatch(HookEvent::Flash, HookPhase::Pre, ctx, image_path);

        let result = (|| -> Result<()> {
            if !std::path::Path::new(image_path).is_file() {
                return Err(AppError::Step(format!("Image not found: {}", image_path)));
            }
            self.dut()?.uart_port(flashing_port).ok_or_else(|| {
                AppError::Step(format!(
                    "Flashing port '{}' is not defined for this device",
                    flashing_port
                ))
            })?;
            self.dut()?.uart_port(log_port).ok_or_else(|| {
                AppError::Step(format!(
                    "Log port '{}' is not defined for this device",
                    log_port
                ))
            })?;
            Err(AppError::Step(
                "UART image flashing transfer is not implemented".to_string(),
            ))
        })();

        self.hooks
            .dispatch(HookEvent::Flash, HookPhase::Post, ctx, image_path);
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn run_host_command_step(
        &mut self,
        command: &str,
        cwd: Option<&str>,
        env: Option<&HashMap<String, String>>,
        expected_output: Option<&str>,
        return_code: Option<i32>,
        error_patterns: &[String],
        timeout: Duration,
        retry_count: u32,
        ctx: &mut SharedContext,
    ) -> Result<()> {
        let attempts = retry_count.max(1);
        let mut last_reason = String::new();

        for attempt in 1..=attempts {
            let output = self.run_host_command(command, cwd, env, timeout)?;

            self.hooks
                .dispatch(HookEvent::ConstraintCheck, HookPhase::Pre, ctx, command);
            let verdict = check_host_output(&output, expected_output, return_code, error_patterns);
            self.hooks
                .dispatch(HookEvent::ConstraintCheck, HookPhase::Post, ctx, command);

            match verdict {
                Ok(()) => {
                    tracing::debug!("Host command succeeded on attempt {}", attempt);
                    return Ok(());
                }
                Err(reason) => {
                    last_reason = reason;
                    if attempt < attempts {
                        tracing::warn!(
                            "Host command failed ({}), trying again (attempt {} of {})",
                            last_reason,
                            attempt + 1,
                            attempts
                        );
                    }
                }
            }
        }

        Err(AppError::Step(format!(
            "Host command '{}' failed after {} attempt(s): {}",
            command, attempts, last_reason
        )))
    }

    /// Runs one shell command attempt with a hard timeout, capturing
    /// combined output and appending it to the job's host transcript.
    fn run_host_command(
        &mut self,
        command: &str,
        cwd: Option<&str>,
        env: Option<&HashMap<String, String>>,
        timeout: Duration,
    ) -> Result<HostCommandOutput> {
        tracing::debug!("Executing host command: {}", command);

        let mut cmd = std::process::Command::new("sh");
        cmd.arg("-c").arg(command);
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        if let Some(env) = env {
            for (key, value) in env {
                cmd.env(key, value);
            }
        }
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let start = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| AppError::Step(format!("Failed to spawn '{}': {}", command, e)))?;

        let stdout_handle = child.stdout.take().map(|mut stream| {
            std::thread::spawn(move || {
                let mut buf = String::new();
                let _ = std::io::Read::read_to_string(&mut stream, &mut buf);
                buf
            })
        });
        let stderr_handle = child.stderr.take().map(|mut stream| {
            std::thread::spawn(move || {
                let mut buf = String::new();
                let _ = std::io::Read::read_to_string(&mut stream, &mut buf);
                buf
            })
        });

        let mut timed_out = false;
        let exit_status = loop {
            if let Some(status) = child.try_wait()? {
                break Some(status);
            }
            if start.elapsed() >= timeout {
                timed_out = true;
                let _ = child.kill();
                break child.wait().ok();
            }
            std::thread::sleep(Duration::from_millis(25));
        };

        let stdout = stdout_handle
            .and_then(|h| h.join().ok())
            .unwrap_or_default();
        let stderr = stderr_handle
            .and_then(|h| h.join().ok())
            .unwrap_or_default();

        let mut combined = stdout;
        combined.push_str(&stderr);

        let output = HostCommandOutput {
            exit_code: exit_status.and_then(|status| status.code()),
            combined,
            timed_out,
        };

        self.append_host_transcript(command, &output)?;
        Ok(output)
    }

    fn append_host_transcript(&mut self, command: &str, output: &HostCommandOutput) -> Result<()> {
        let transcript_name = "host_commands.log";
        if !self.host_log_recorded {
            self.record_log_artifact(transcript_name)?;
            self.host_log_recorded = true;
        }

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_dir.join(transcript_name))?;
        writeln!(
            file,
            "$ {}\n{}[exit: {:?}{}]",
            command,
            output.combined,
            output.exit_code,
            if output.timed_out { ", timed out" } else { "" }
        )?;
        Ok(())
    }

    fn record_log_artifact(&self, file_name: &str) -> Result<()> {
        let patch = StatusPatch {
            push_log: Some(format!("{}/{}", self.job_id, file_name)),
            ..Default::default()
        };
        self.store.update_by_id(&self.job_id, &patch)?;
        Ok(())
    }

    fn run_loop(
        &mut self,
        loop_count: usize,
        block: &TestStep,
        values: &HashMap<String, Vec<String>>,
        ctx: &mut SharedContext,
    ) -> Result<()> {
        for iteration in 0..loop_count {
            // a key with no element for this iteration simply leaves its
            // placeholder unresolved
            let vars: HashMap<String, String> = values
                .iter()
                .filter_map(|(name, seq)| {
                    seq.get(iteration).map(|value| (name.clone(), value.clone()))
                })
                .collect();

            let resolved = block.substituted(&vars)?;
            tracing::debug!("Loop iteration {} of {}", iteration + 1, loop_count);
            self.run_step(&resolved, ctx).map_err(|e| {
                AppError::Step(format!(
                    "Loop iteration {} of {} failed: {}",
                    iteration + 1,
                    loop_count,
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Disconnects every UART connection opened during the run. Safe on
    /// every exit path; close-time errors never mask the run's outcome.
    fn disconnect_all(&mut self) {
        for (port_name, mut transport) in self.uarts.drain() {
            tracing::debug!("Releasing UART connection '{}'", port_name);
            transport.disconnect();
        }
        self.power = None;
    }
}

fn sleep_opt(seconds: Option<f64>) {
    if let Some(seconds) = seconds {
        if seconds > 0.0 {
            std::thread::sleep(Duration::from_secs_f64(seconds));
        }
    }
}

struct HostCommandOutput {
    exit_code: Option<i32>,
    combined: String,
    timed_out: bool,
}

/// Success requires the exit code to match (when specified), the combined
/// output to contain the expected text (when specified), and none of the
/// error patterns to appear. The first unmet condition is the verdict.
fn check_host_output(
    output: &HostCommandOutput,
    expected_output: Option<&str>,
    return_code: Option<i32>,
    error_patterns: &[String],
) -> std::result::Result<(), String> {
    if output.timed_out {
        return Err("timed out".to_string());
    }

    if let Some(expected_code) = return_code {
        if output.exit_code != Some(expected_code) {
            return Err(format!(
                "exit code {:?} did not match expected {}",
                output.exit_code, expected_code
            ));
        }
    }

    if let Some(expected) = expected_output {
        if !output.combined.contains(expected) {
            return Err(format!("output did not contain '{}'", expected));
        }
    }

    for pattern in error_patterns {
        if output.combined.contains(pattern.as_str()) {
            return Err(format!("output matched error pattern '{}'", pattern));
        }
    }

    Ok(())
}
