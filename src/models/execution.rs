use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub jira_id: Option<String>,
    pub test_flow: String,
    pub status: TestStatus,
    pub message: Option<String>,
    pub logs: Vec<String>,
    pub created_at: i64,
    pub finished_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Initialized,
    Running,
    Completed,
    Failed,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Initialized => "initialized",
            TestStatus::Running => "running",
            TestStatus::Completed => "completed",
            TestStatus::Failed => "failed",
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TestStatus::Completed | TestStatus::Failed)
    }
}

/// Field patch applied by [`crate::repository::StatusStore::update`].
/// `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct StatusPatch {
    pub status: Option<TestStatus>,
    pub message: Option<String>,
    pub push_log: Option<String>,
    pub finished_at: Option<i64>,
}

impl StatusPatch {
    pub fn status(status: TestStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn apply(&self, record: &mut ExecutionRecord) -> bool {
        let mut changed = false;
        if let Some(status) = self.status {
            if record.status != status {
                record.status = status;
                changed = true;
            }
        }
        if let Some(message) = &self.message {
            if record.message.as_deref() != Some(message.as_str()) {
                record.message = Some(message.clone());
                changed = true;
            }
        }
        if let Some(log) = &self.push_log {
            record.logs.push(log.clone());
            changed = true;
        }
        if let Some(finished_at) = self.finished_at {
            if record.finished_at != Some(finished_at) {
                record.finished_at = Some(finished_at);
                changed = true;
            }
        }
        changed
    }
}
