use crate::error::Result;
use crate::plugins::{HookPhase, SharedContext, TestObserver};

/// Default observer: mirrors every lifecycle event into the tracing log
/// together with the shared context, so a job's phase progression can be
/// reconstructed from the node log alone.
pub struct ResultObserver;

impl ResultObserver {
    fn log(&self, event: &str, phase: HookPhase, ctx: &SharedContext, detail: &str) {
        let when = match phase {
            HookPhase::Pre => "before",
            HookPhase::Post => "after",
        };
        tracing::info!(
            "[{}] {} {}: ctx = {}",
            event,
            when,
            detail,
            serde_json::Value::Object(ctx.clone())
        );
    }
}

impl TestObserver for ResultObserver {
    fn name(&self) -> &str {
        "result"
    }

    fn on_configure(&self, phase: HookPhase, ctx: &mut SharedContext, detail: &str) -> Result<()> {
        self.log("configure", phase, ctx, detail);
        Ok(())
    }

    fn on_test(&self, phase: HookPhase, ctx: &mut SharedContext, detail: &str) -> Result<()> {
        self.log("test", phase, ctx, detail);
        Ok(())
    }

    fn on_flash(&self, phase: HookPhase, ctx: &mut SharedContext, detail: &str) -> Result<()> {
        self.log("flash", phase, ctx, detail);
        Ok(())
    }

    fn on_command(&self, phase: HookPhase, ctx: &mut SharedContext, detail: &str) -> Result<()> {
        self.log("command", phase, ctx, detail);
        Ok(())
    }

    fn on_constraint_check(
        &self,
        phase: HookPhase,
        ctx: &mut SharedContext,
        detail: &str,
    ) -> Result<()> {
        self.log("constraint_check", phase, ctx, detail);
        Ok(())
    }

    fn on_exception(&self, phase: HookPhase, ctx: &mut SharedContext, detail: &str) -> Result<()> {
        self.log("exception", phase, ctx, detail);
        Ok(())
    }

    fn on_error(&self, phase: HookPhase, ctx: &mut SharedContext, detail: &str) -> Result<()> {
        self.log("error", phase, ctx, detail);
        Ok(())
    }
}
