use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// One unit of work inside a flow's execute phase. The `type` tag is the
/// closed dispatch set; an unknown tag fails deserialization at admission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TestStep {
    PowerControl {
        power_state: PowerState,
        #[serde(default)]
        pre_delay: Option<f64>,
        #[serde(default)]
        post_delay: Option<f64>,
    },
    BootMode {
        boot_mode_name: String,
        #[serde(default)]
        pre_delay: Option<f64>,
        #[serde(default)]
        post_delay: Option<f64>,
    },
    Delay {
        delay_in_seconds: f64,
    },
    UartCommand {
        command: String,
        uart_port: String,
        #[serde(default = "default_true")]
        enter_new_line: bool,
        #[serde(default)]
        expected_output: Option<String>,
        #[serde(default = "default_timeout")]
        timeout: u64,
        #[serde(default = "default_retry_count")]
        retry_count: u32,
    },
    UartImageFlashing {
        image_path: String,
        flashing_port: String,
        log_port: String,
        #[serde(default = "default_timeout")]
        timeout: u64,
    },
    HostCommand {
        command: String,
        #[serde(default)]
        cwd: Option<String>,
        #[serde(default)]
        env: Option<HashMap<String, String>>,
        #[serde(default)]
        expected_output: Option<String>,
        #[serde(default)]
        return_code: Option<i32>,
        #[serde(default)]
        error_patterns: Vec<String>,
        #[serde(default = "default_timeout")]
        timeout: u64,
        #[serde(default = "default_retry_count")]
        retry_count: u32,
    },
    Loop {
        loop_count: usize,
        block: Box<TestStep>,
        #[serde(default)]
        values: HashMap<String, Vec<String>>,
    },
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    120
}

fn default_retry_count() -> u32 {
    1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    On,
    Off,
    Toggle,
    PowerOnReset,
}

impl TestStep {
    /// Short human label used in logs and hook details.
    pub fn kind(&self) -> &'static str {
        match self {
            TestStep::PowerControl { .. } => "power_control",
            TestStep::BootMode { .. } => "boot_mode",
            TestStep::Delay { .. } => "delay",
            TestStep::UartCommand { .. } => "uart_command",
            TestStep::UartImageFlashing { .. } => "uart_image_flashing",
            TestStep::HostCommand { .. } => "host_command",
            TestStep::Loop { .. } => "loop",
        }
    }

    /// Produces a new step with every `{name}` placeholder reachable inside
    /// this step resolved against `vars`. The template itself is never
    /// mutated; placeholders with no matching variable are left as-is.
    pub fn substituted(&self, vars: &HashMap<String, String>) -> Result<TestStep> {
        let mut tree = serde_json::to_value(self)?;
        substitute_value(&mut tree, vars);
        let step = serde_json::from_value(tree)
            .map_err(|e| AppError::Step(format!("Substituted step is invalid: {}", e)))?;
        Ok(step)
    }
}

/// Generic placeholder substitution over a JSON tree. Walks the closed set
/// of node kinds (scalar, sequence, mapping) so new step shapes pick up
/// substitution without schema-specific code.
pub fn substitute_value(value: &mut Value, vars: &HashMap<String, String>) {
    match value {
        Value::String(text) => {
            for (name, replacement) in vars {
                let placeholder = format!("{{{}}}", name);
                if text.contains(&placeholder) {
                    *text = text.replace(&placeholder, replacement);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                substitute_value(item, vars);
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                substitute_value(item, vars);
            }
        }
        _ => {}
    }
}
