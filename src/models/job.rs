use crate::models::TestStep;
use serde::{Deserialize, Serialize};

/// Inbound job submission. Immutable once accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestJobRequest {
    pub jira_id: Option<String>,
    pub test_flow: String,
    pub device_name: Option<String>,
    pub device_id: Option<String>,
    #[serde(default)]
    pub test_steps: Vec<TestStep>,
}
