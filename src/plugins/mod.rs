pub mod result_observer;

pub use result_observer::ResultObserver;

use crate::error::Result;
use std::panic::{AssertUnwindSafe, catch_unwind};

/// Per-job mutable context threaded through every hook call and flow
/// phase, mirroring what the flows themselves read and write.
pub type SharedContext = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    Configure,
    Test,
    Flash,
    Command,
    ConstraintCheck,
    Exception,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    Pre,
    Post,
}

/// Lifecycle observer. Every handler has a no-op default, so an observer
/// implements exactly the subset of events it cares about; the engine
/// treats a missing override as silence, not an error.
#[allow(unused_variables)]
pub trait TestObserver: Send + Sync {
    fn name(&self) -> &str;

    fn on_configure(&self, phase: HookPhase, ctx: &mut SharedContext, detail: &str) -> Result<()> {
        Ok(())
    }

    fn on_test(&self, phase: HookPhase, ctx: &mut SharedContext, detail: &str) -> Result<()> {
        Ok(())
    }

    fn on_flash(&self, phase: HookPhase, ctx: &mut SharedContext, detail: &str) -> Result<()> {
        Ok(())
    }

    fn on_command(&self, phase: HookPhase, ctx: &mut SharedContext, detail: &str) -> Result<()> {
        Ok(())
    }

    fn on_constraint_check(
        &self,
        phase: HookPhase,
        ctx: &mut SharedContext,
        detail: &str,
    ) -> Result<()> {
        Ok(())
    }

    fn on_exception(&self, phase: HookPhase, ctx: &mut SharedContext, detail: &str) -> Result<()> {
        Ok(())
    }

    fn on_error(&self, phase: HookPhase, ctx: &mut SharedContext, detail: &str) -> Result<()> {
        Ok(())
    }
}

/// Process-wide observer registry. Built once at bootstrap, then read-only;
/// dispatch order is registration order. Observer failures (errors and
/// panics alike) are logged and isolated; they never stop dispatch to the
/// remaining observers or abort the underlying step.
#[derive(Default)]
pub struct PluginEngine {
    observers: Vec<Box<dyn TestObserver>>,
}

impl PluginEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, observer: Box<dyn TestObserver>) {
        tracing::debug!("Registered observer '{}'", observer.name());
        self.observers.push(observer);
    }

    pub fn dispatch(
        &self,
        event: HookEvent,
        phase: HookPhase,
        ctx: &mut SharedContext,
        detail: &str,
    ) {
        for observer in &self.observers {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                Self::route(observer.as_ref(), event, phase, ctx, detail)
            }));

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(
                        "Observer '{}' failed during {:?} {:?}: {}",
                        observer.name(),
                        event,
                        phase,
                        e
                    );
                }
                Err(_) => {
                    tracing::error!(
                        "Observer '{}' panicked during {:?} {:?}",
                        observer.name(),
                        event,
                        phase
                    );
                }
            }
        }
    }

    fn route(
        observer: &dyn TestObserver,
        event: HookEvent,
        phase: HookPhase,
        ctx: &mut SharedContext,
        detail: &str,
    ) -> Result<()> {
        match event {
            HookEvent::Configure => observer.on_configure(phase, ctx, detail),
            HookEvent::Test => observer.on_test(phase, ctx, detail),
            HookEvent::Flash => observer.on_flash(phase, ctx, detail),
            HookEvent::Command => observer.on_command(phase, ctx, detail),
            HookEvent::ConstraintCheck => observer.on_constraint_check(phase, ctx, detail),
            HookEvent::Exception => observer.on_exception(phase, ctx, detail),
            HookEvent::Error => observer.on_error(phase, ctx, detail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: Arc<AtomicUsize>,
    }

    impl TestObserver for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn on_command(
            &self,
            _phase: HookPhase,
            _ctx: &mut SharedContext,
            _detail: &str,
        ) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Panicking;

    impl TestObserver for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        fn on_command(
            &self,
            _phase: HookPhase,
            _ctx: &mut SharedContext,
            _detail: &str,
        ) -> Result<()> {
            panic!("observer bug");
        }
    }

    struct Failing;

    impl TestObserver for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn on_command(
            &self,
            _phase: HookPhase,
            _ctx: &mut SharedContext,
            _detail: &str,
        ) -> Result<()> {
            Err(AppError::Step("observer error".to_string()))
        }
    }

    #[test]
    fn misbehaving_observers_do_not_stop_dispatch() {
        let calls = Arc::new(AtomicUsize::new(0));

        let mut engine = PluginEngine::new();
        engine.register(Box::new(Panicking));
        engine.register(Box::new(Failing));
        engine.register(Box::new(Counting {
            calls: Arc::clone(&calls),
        }));

        let mut ctx = SharedContext::new();
        engine.dispatch(HookEvent::Command, HookPhase::Pre, &mut ctx, "step");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unhandled_events_are_silent_noops() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut engine = PluginEngine::new();
        engine.register(Box::new(Counting {
            calls: Arc::clone(&calls),
        }));

        let mut ctx = SharedContext::new();
        engine.dispatch(HookEvent::Flash, HookPhase::Pre, &mut ctx, "flash");

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
