use crate::error::{AppError, Result};
use crate::flow::{FlowEnv, FlowRegistry, TestFlow, run_lifecycle};
use crate::models::{ExecutionRecord, StatusPatch, TestJobRequest, TestStatus};
use crate::plugins::{PluginEngine, SharedContext};
use crate::repository::StatusStore;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;

/// Orchestrates the job lifecycle: validates the request, allocates the
/// execution identity, records the initial status and launches the flow
/// worker. The admitting call never waits on flow completion; the
/// returned id is the sole handle clients poll with.
#[derive(Clone)]
pub struct ExecutorService {
    store: Arc<StatusStore>,
    registry: Arc<FlowRegistry>,
    hooks: Arc<PluginEngine>,
    logs_root: PathBuf,
    devices_dir: PathBuf,
}

impl ExecutorService {
    pub fn new(
        store: Arc<StatusStore>,
        registry: Arc<FlowRegistry>,
        hooks: Arc<PluginEngine>,
        logs_root: PathBuf,
        devices_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            registry,
            hooks,
            logs_root,
            devices_dir,
        }
    }

    pub fn submit(&self, request: TestJobRequest) -> Result<(String, TestStatus)> {
        self.validate_request(&request)?;

        let flow = self
            .registry
            .create(&request.test_flow)
            .ok_or_else(|| self.unknown_flow_error(&request.test_flow))?;

        let record = ExecutionRecord {
            id: String::new(),
            jira_id: request.jira_id.clone(),
            test_flow: request.test_flow.clone(),
            status: TestStatus::Initialized,
            message: None,
            logs: Vec::new(),
            created_at: Utc::now().timestamp_millis(),
            finished_at: None,
        };
        let id = self.store.insert(record)?;

        let log_dir = self.logs_root.join(&id);
        std::fs::create_dir_all(&log_dir)?;
        tracing::info!("Accepted job {} for flow '{}'", id, request.test_flow);

        let env = FlowEnv {
            request,
            job_id: id.clone(),
            log_dir,
            devices_dir: self.devices_dir.clone(),
            store: Arc::clone(&self.store),
            hooks: Arc::clone(&self.hooks),
        };

        let store = Arc::clone(&self.store);
        let worker_id = id.clone();
        tokio::task::spawn_blocking(move || run_job(store, worker_id, flow, env));

        Ok((id, TestStatus::Initialized))
    }

    pub fn status(&self, id: &str) -> Result<ExecutionRecord> {
        self.store
            .get(id)
            .ok_or_else(|| AppError::ExecutionNotFound(id.to_string()))
    }

    fn validate_request(&self, request: &TestJobRequest) -> Result<()> {
        if request.test_flow.trim().is_empty() {
            return Err(AppError::Validation(
                "Missing required field: test_flow".to_string(),
            ));
        }
        if !self.registry.contains(&request.test_flow) {
            return Err(self.unknown_flow_error(&request.test_flow));
        }
        Ok(())
    }

    fn unknown_flow_error(&self, flow_name: &str) -> AppError {
        AppError::Validation(format!(
            "Test flow '{}' is not recognized. Available test flows are: {}",
            flow_name,
            self.registry.available().join(", ")
        ))
    }
}

/// The per-job worker: drives the flow lifecycle and owns every status
/// transition after admission. Transitions are monotonic (initialized to
/// running to one of completed/failed) and nothing else writes this id.
fn run_job(
    store: Arc<StatusStore>,
    id: String,
    mut flow: Box<dyn TestFlow>,
    env: FlowEnv,
) {
    let patch = StatusPatch::status(TestStatus::Running);
    if let Err(e) = store.update_by_id(&id, &patch) {
        tracing::error!("Failed to mark job {} running: {}", id, e);
    }

    let mut ctx = SharedContext::new();
    let outcome = run_lifecycle(flow.as_mut(), env, &mut ctx);

    let mut patch = match &outcome {
        Ok(()) => StatusPatch::status(TestStatus::Completed).with_message("Test flow completed"),
        Err(e) => {
            tracing::error!("Job {} failed: {}", id, e);
            StatusPatch::status(TestStatus::Failed).with_message(e.to_string())
        }
    };
    patch.finished_at = Some(Utc::now().timestamp_millis());

    if let Err(e) = store.update_by_id(&id, &patch) {
        tracing::error!("Failed to record outcome of job {}: {}", id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::Path;
    use std::time::Duration;

    fn service(dir: &Path) -> ExecutorService {
        ExecutorService::new(
            Arc::new(StatusStore::open(dir.join("db.json")).unwrap()),
            Arc::new(FlowRegistry::with_defaults()),
            Arc::new(PluginEngine::new()),
            dir.join("logs"),
            dir.join("devices"),
        )
    }

    fn request(body: serde_json::Value) -> TestJobRequest {
        serde_json::from_value(body).unwrap()
    }

    async fn wait_for_terminal(service: &ExecutorService, id: &str) -> ExecutionRecord {
        for _ in 0..100 {
            let record = service.status(id).unwrap();
            if record.status.is_terminal() {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("job {} never reached a terminal status", id);
    }

    #[tokio::test]
    async fn missing_test_flow_is_rejected_without_a_record() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());

        let err = service
            .submit(request(json!({ "test_flow": "" })))
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(service.store.all().is_empty());
    }

    #[tokio::test]
    async fn unknown_flow_is_rejected_without_a_record() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());

        let err = service
            .submit(request(json!({ "test_flow": "teleport" })))
            .unwrap_err();
        assert!(err.to_string().contains("not recognized"));
        assert!(service.store.all().is_empty());
    }

    #[tokio::test]
    async fn example_flow_completes_and_status_is_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());

        let (id, status) = service
            .submit(request(json!({ "test_flow": "example", "jira_id": "HIL-7" })))
            .unwrap();
        assert_eq!(status, TestStatus::Initialized);

        let record = wait_for_terminal(&service, &id).await;
        assert_eq!(record.status, TestStatus::Completed);
        assert_eq!(record.jira_id.as_deref(), Some("HIL-7"));
        assert!(record.finished_at.is_some());
        assert!(dir.path().join("logs").join(&id).is_dir());
    }

    #[tokio::test]
    async fn failing_command_line_flow_is_marked_failed() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());

        let (id, _) = service
            .submit(request(json!({
                "test_flow": "command_line",
                "test_steps": [
                    { "type": "host_command", "command": "false", "return_code": 0 }
                ]
            })))
            .unwrap();

        let record = wait_for_terminal(&service, &id).await;
        assert_eq!(record.status, TestStatus::Failed);
        assert!(record.message.is_some());
    }

    #[tokio::test]
    async fn each_submission_gets_a_distinct_id() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());

        let (a, _) = service
            .submit(request(json!({ "test_flow": "example" })))
            .unwrap();
        let (b, _) = service
            .submit(request(json!({ "test_flow": "example" })))
            .unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn status_of_unknown_id_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        assert!(matches!(
            service.status("missing"),
            Err(AppError::ExecutionNotFound(_))
        ));
    }
}
