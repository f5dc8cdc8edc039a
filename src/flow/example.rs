use crate::error::Result;
use crate::flow::{FlowEnv, TestFlow};
use crate::plugins::SharedContext;

/// Trivial flow used for connectivity smoke checks: it runs the full
/// lifecycle with no hardware and completes immediately.
#[derive(Default)]
pub struct ExampleFlow {
    job_id: Option<String>,
}

impl TestFlow for ExampleFlow {
    fn setup(&mut self, env: FlowEnv, ctx: &mut SharedContext) -> Result<()> {
        tracing::info!("Setting up example flow for job {}", env.job_id);
        self.job_id = Some(env.job_id);
        ctx.insert("setup_complete".to_string(), serde_json::Value::Bool(true));
        Ok(())
    }

    fn validate(&mut self, _ctx: &mut SharedContext) -> Result<()> {
        tracing::info!("Validating example flow");
        Ok(())
    }

    fn execute(&mut self, _ctx: &mut SharedContext) -> Result<()> {
        tracing::info!(
            "Executing example flow for job {}",
            self.job_id.as_deref().unwrap_or("<unknown>")
        );
        Ok(())
    }
}
