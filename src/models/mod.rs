pub mod execution;
pub mod job;
pub mod step;

pub use execution::{ExecutionRecord, StatusPatch, TestStatus};
pub use job::TestJobRequest;
pub use step::{PowerState, TestStep};
