use crate::dut::DutConfig;
use crate::error::{AppError, Result};
use crate::flow::{FlowEnv, TestFlow};
use crate::interpreter::StepInterpreter;
use crate::models::TestStep;
use crate::plugins::SharedContext;
use std::sync::Arc;

/// Hardware/command-line flow: loads the device definition during setup,
/// checks that every logical reference in the steps resolves during
/// validate, and hands the steps to the interpreter for execute.
#[derive(Default)]
pub struct CommandLineFlow {
    env: Option<FlowEnv>,
    dut: Option<DutConfig>,
}

impl TestFlow for CommandLineFlow {
    fn setup(&mut self, env: FlowEnv, ctx: &mut SharedContext) -> Result<()> {
        tracing::info!("Setting up command line flow for job {}", env.job_id);

        if let Some(device_name) = &env.request.device_name {
            let dut = DutConfig::load(device_name, &env.devices_dir)?;
            tracing::info!(
                "Loaded device definition for {} ({})",
                device_name,
                dut.device_type()
            );
            ctx.insert(
                "device_type".to_string(),
                serde_json::Value::String(dut.device_type().to_string()),
            );
            self.dut = Some(dut);
        }

        self.env = Some(env);
        Ok(())
    }

    fn validate(&mut self, _ctx: &mut SharedContext) -> Result<()> {
        let env = self
            .env
            .as_ref()
            .ok_or_else(|| AppError::Setup("Flow was not set up".to_string()))?;
        let steps = &env.request.test_steps;

        if steps.is_empty() {
            return Err(AppError::Validation(
                "command_line flow requires at least one test step".to_string(),
            ));
        }

        for step in steps {
            self.check_step(step)?;
        }
        tracing::info!("Validated {} test step(s)", steps.len());
        Ok(())
    }

    fn execute(&mut self, ctx: &mut SharedContext) -> Result<()> {
        let env = self
            .env
            .take()
            .ok_or_else(|| AppError::Setup("Flow was not set up".to_string()))?;

        let mut interpreter = StepInterpreter::new(
            env.job_id.clone(),
            env.log_dir.clone(),
            self.dut.take(),
            Arc::clone(&env.hooks),
            Arc::clone(&env.store),
        );
        interpreter.run(&env.request.test_steps, ctx)
    }
}

impl CommandLineFlow {
    /// Static checks for one step (recursing into loop blocks): hardware
    /// steps need a device, and logical port/mode names must resolve.
    /// Names still carrying a `{placeholder}` are resolved at run time by
    /// loop substitution and are skipped here.
    fn check_step(&self, step: &TestStep) -> Result<()> {
        match step {
            TestStep::PowerControl { .. } => {
                let dut = self.require_device(step)?;
                if dut.power_config().module.is_empty() {
                    return Err(AppError::Validation(format!(
                        "Device {} has no power_config module",
                        dut.device_name()
                    )));
                }
            }
            TestStep::BootMode { boot_mode_name, .. } => {
                let dut = self.require_device(step)?;
                if !has_placeholder(boot_mode_name) && dut.boot_mode(boot_mode_name).is_none() {
                    return Err(AppError::Validation(format!(
                        "Boot mode '{}' is not defined for this device",
                        boot_mode_name
                    )));
                }
            }
            TestStep::UartCommand { uart_port, .. } => {
                self.check_uart_port(step, uart_port)?;
            }
            TestStep::UartImageFlashing {
                flashing_port,
                log_port,
                ..
            } => {
                self.check_uart_port(step, flashing_port)?;
                self.check_uart_port(step, log_port)?;
            }
            TestStep::Delay { .. } | TestStep::HostCommand { .. } => {}
            TestStep::Loop {
                loop_count, block, ..
            } => {
                if *loop_count == 0 {
                    return Err(AppError::Validation(
                        "loop step requires loop_count >= 1".to_string(),
                    ));
                }
                self.check_step(block)?;
            }
        }
        Ok(())
    }

    fn check_uart_port(&self, step: &TestStep, uart_port: &str) -> Result<()> {
        let dut = self.require_device(step)?;
        if !has_placeholder(uart_port) && dut.uart_port(uart_port).is_none() {
            return Err(AppError::Validation(format!(
                "UART port '{}' is not defined for this device",
                uart_port
            )));
        }
        Ok(())
    }

    fn require_device(&self, step: &TestStep) -> Result<&DutConfig> {
        self.dut.as_ref().ok_or_else(|| {
            AppError::Validation(format!(
                "Step '{}' requires device_name in the request",
                step.kind()
            ))
        })
    }
}

fn has_placeholder(name: &str) -> bool {
    name.contains('{')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::run_lifecycle;
    use crate::plugins::PluginEngine;
    use crate::repository::StatusStore;
    use serde_json::json;
    use std::path::Path;

    fn env_with(dir: &Path, request: serde_json::Value) -> FlowEnv {
        let log_dir = dir.join("job-1");
        std::fs::create_dir_all(&log_dir).unwrap();
        FlowEnv {
            request: serde_json::from_value(request).unwrap(),
            job_id: "job-1".to_string(),
            log_dir,
            devices_dir: dir.join("devices"),
            store: Arc::new(StatusStore::open(dir.join("db.json")).unwrap()),
            hooks: Arc::new(PluginEngine::new()),
        }
    }

    #[test]
    fn host_only_steps_run_without_a_device() {
        let dir = tempfile::tempdir().unwrap();
        let env = env_with(
            dir.path(),
            json!({
                "test_flow": "command_line",
                "test_steps": [
                    { "type": "host_command", "command": "true", "return_code": 0 }
                ]
            }),
        );

        let mut flow = CommandLineFlow::default();
        let mut ctx = SharedContext::new();
        run_lifecycle(&mut flow, env, &mut ctx).unwrap();
    }

    #[test]
    fn empty_steps_fail_validation() {
        let dir = tempfile::tempdir().unwrap();
        let env = env_with(dir.path(), json!({ "test_flow": "command_line" }));

        let mut flow = CommandLineFlow::default();
        let mut ctx = SharedContext::new();
        let err = run_lifecycle(&mut flow, env, &mut ctx).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn hardware_steps_without_device_fail_validation() {
        let dir = tempfile::tempdir().unwrap();
        let env = env_with(
            dir.path(),
            json!({
                "test_flow": "command_line",
                "test_steps": [
                    { "type": "uart_command", "command": "ls", "uart_port": "debug" }
                ]
            }),
        );

        let mut flow = CommandLineFlow::default();
        let mut ctx = SharedContext::new();
        let err = run_lifecycle(&mut flow, env, &mut ctx).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn unknown_uart_port_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let devices = dir.path().join("devices");
        std::fs::create_dir_all(&devices).unwrap();
        std::fs::write(
            devices.join("evm-001.json"),
            r#"{ "uart_port_map": { "debug": "/dev/ttyUSB0" } }"#,
        )
        .unwrap();

        let env = env_with(
            dir.path(),
            json!({
                "test_flow": "command_line",
                "device_name": "evm-001",
                "test_steps": [
                    { "type": "uart_command", "command": "ls", "uart_port": "mcu7" }
                ]
            }),
        );

        let mut flow = CommandLineFlow::default();
        let mut ctx = SharedContext::new();
        let err = run_lifecycle(&mut flow, env, &mut ctx).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn placeholder_port_names_pass_validation() {
        let dir = tempfile::tempdir().unwrap();
        let devices = dir.path().join("devices");
        std::fs::create_dir_all(&devices).unwrap();
        std::fs::write(
            devices.join("evm-001.json"),
            r#"{ "uart_port_map": { "debug": "/dev/ttyUSB0" } }"#,
        )
        .unwrap();

        let env = env_with(
            dir.path(),
            json!({
                "test_flow": "command_line",
                "device_name": "evm-001",
                "test_steps": [
                    { "type": "loop", "loop_count": 1,
                      "values": { "port": ["debug"] },
                      "block": { "type": "uart_command", "command": "ls", "uart_port": "{port}" } }
                ]
            }),
        );

        let mut flow = CommandLineFlow::default();
        let mut ctx = SharedContext::new();
        // validation passes; execute then fails because /dev/ttyUSB0 does
        // not exist in the test environment
        assert!(flow.setup(env, &mut ctx).is_ok());
        assert!(flow.validate(&mut ctx).is_ok());
    }
}
