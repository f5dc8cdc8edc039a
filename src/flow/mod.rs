pub mod command_line;
pub mod example;

pub use command_line::CommandLineFlow;
pub use example::ExampleFlow;

use crate::error::Result;
use crate::models::TestJobRequest;
use crate::plugins::{HookEvent, HookPhase, PluginEngine, SharedContext};
use crate::repository::StatusStore;
use std::path::PathBuf;
use std::sync::Arc;

/// Everything a flow needs from the node: the accepted request, the job's
/// identity and log directory, and handles to the shared services.
pub struct FlowEnv {
    pub request: TestJobRequest,
    pub job_id: String,
    pub log_dir: PathBuf,
    pub devices_dir: PathBuf,
    pub store: Arc<StatusStore>,
    pub hooks: Arc<PluginEngine>,
}

/// A named, reusable test procedure. Phases are driven strictly in order
/// by [`run_lifecycle`]; a flow never sees `validate` before `setup`, or
/// `execute` without a successful `validate`.
pub trait TestFlow: Send {
    fn setup(&mut self, env: FlowEnv, ctx: &mut SharedContext) -> Result<()>;
    fn validate(&mut self, ctx: &mut SharedContext) -> Result<()>;
    fn execute(&mut self, ctx: &mut SharedContext) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Created,
    SetupComplete,
    Validated,
    Executing,
    Succeeded,
    Failed,
}

/// Drives a flow through its phase state machine with hook dispatch
/// bracketing each phase. Returns the first phase failure, after
/// dispatching the exception hooks for it.
pub fn run_lifecycle(
    flow: &mut dyn TestFlow,
    env: FlowEnv,
    ctx: &mut SharedContext,
) -> Result<()> {
    let hooks = Arc::clone(&env.hooks);
    let mut state = FlowState::Created;

    let result = (|| -> Result<()> {
        hooks.dispatch(HookEvent::Configure, HookPhase::Pre, ctx, "setup");
        let setup_result = flow.setup(env, ctx);
        hooks.dispatch(HookEvent::Configure, HookPhase::Post, ctx, "setup");
        setup_result?;
        state = FlowState::SetupComplete;
        tracing::debug!("Flow state: {:?}", state);

        hooks.dispatch(HookEvent::Test, HookPhase::Pre, ctx, "validate");
        let validate_result = flow.validate(ctx);
        hooks.dispatch(HookEvent::Test, HookPhase::Post, ctx, "validate");
        validate_result?;
        state = FlowState::Validated;
        tracing::debug!("Flow state: {:?}", state);

        state = FlowState::Executing;
        tracing::debug!("Flow state: {:?}", state);
        hooks.dispatch(HookEvent::Command, HookPhase::Pre, ctx, "execute");
        let execute_result = flow.execute(ctx);
        hooks.dispatch(HookEvent::Command, HookPhase::Post, ctx, "execute");
        execute_result
    })();

    match &result {
        Ok(()) => {
            state = FlowState::Succeeded;
        }
        Err(e) => {
            let detail = e.to_string();
            hooks.dispatch(HookEvent::Exception, HookPhase::Pre, ctx, &detail);
            hooks.dispatch(HookEvent::Exception, HookPhase::Post, ctx, &detail);
            state = FlowState::Failed;
        }
    }
    tracing::debug!("Flow finished in state {:?}", state);

    result
}

type FlowCtor = fn() -> Box<dyn TestFlow>;

/// Closed set of flow implementations, resolved once at startup. Unknown
/// names are a data-validation error at admission, never a runtime
/// dispatch failure.
pub struct FlowRegistry {
    flows: Vec<(&'static str, FlowCtor)>,
}

impl FlowRegistry {
    pub fn with_defaults() -> Self {
        Self {
            flows: vec![
                ("example", || Box::new(ExampleFlow::default()) as Box<dyn TestFlow>),
                ("command_line", || {
                    Box::new(CommandLineFlow::default()) as Box<dyn TestFlow>
                }),
            ],
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.flows.iter().any(|(flow_name, _)| *flow_name == name)
    }

    pub fn create(&self, name: &str) -> Option<Box<dyn TestFlow>> {
        self.flows
            .iter()
            .find(|(flow_name, _)| *flow_name == name)
            .map(|(_, ctor)| ctor())
    }

    pub fn available(&self) -> Vec<&'static str> {
        self.flows.iter().map(|(name, _)| *name).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FailsValidate {
        executed: Arc<AtomicBool>,
    }

    impl TestFlow for FailsValidate {
        fn setup(&mut self, _env: FlowEnv, _ctx: &mut SharedContext) -> Result<()> {
            Ok(())
        }

        fn validate(&mut self, _ctx: &mut SharedContext) -> Result<()> {
            Err(AppError::Validation("bad parameters".to_string()))
        }

        fn execute(&mut self, _ctx: &mut SharedContext) -> Result<()> {
            self.executed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn env(dir: &std::path::Path) -> FlowEnv {
        FlowEnv {
            request: serde_json::from_value(serde_json::json!({ "test_flow": "example" }))
                .unwrap(),
            job_id: "job-1".to_string(),
            log_dir: dir.join("job-1"),
            devices_dir: dir.join("devices"),
            store: Arc::new(StatusStore::open(dir.join("db.json")).unwrap()),
            hooks: Arc::new(PluginEngine::new()),
        }
    }

    #[test]
    fn failing_validate_never_reaches_execute() {
        let dir = tempfile::tempdir().unwrap();
        let executed = Arc::new(AtomicBool::new(false));
        let mut flow = FailsValidate {
            executed: Arc::clone(&executed),
        };
        let mut ctx = SharedContext::new();

        assert!(run_lifecycle(&mut flow, env(dir.path()), &mut ctx).is_err());
        assert!(!executed.load(Ordering::SeqCst));
    }

    #[test]
    fn registry_resolves_known_flows_only() {
        let registry = FlowRegistry::with_defaults();
        assert!(registry.contains("example"));
        assert!(registry.contains("command_line"));
        assert!(!registry.contains("teleport"));
        assert!(registry.create("example").is_some());
        assert!(registry.create("teleport").is_none());
    }
}
