use crate::models::{ExecutionRecord, TestStatus};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct RunTestResponse {
    pub id: String,
    pub test_status: String,
    pub polling_url: String,
    pub status: bool,
}

impl RunTestResponse {
    pub fn new(id: String, test_status: TestStatus) -> Self {
        let polling_url = format!("/api/v1/test/status/{}", id);
        Self {
            id,
            test_status: test_status.as_str().to_string(),
            polling_url,
            status: true,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TestStatusResponse {
    pub test_id: String,
    pub test_status: String,
    pub message: Option<String>,
    pub logs: Vec<String>,
    pub polling_url: String,
}

impl From<ExecutionRecord> for TestStatusResponse {
    fn from(record: ExecutionRecord) -> Self {
        let polling_url = format!("/api/v1/test/status/{}", record.id);
        Self {
            test_id: record.id,
            test_status: record.status.as_str().to_string(),
            message: record.message,
            logs: record.logs,
            polling_url,
        }
    }
}
