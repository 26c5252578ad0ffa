pub mod audio;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod format;
pub mod geometry;
pub mod project;
pub mod render;
pub mod score;
pub mod sync;
pub mod timing;
pub mod tools;

pub use context::RunContext;
pub use engine::{CancelToken, PipelineDriver, PreparedRun, Progress, ProgressCallback, RunSummary};
pub use error::{RunError, Stage, SyncError, SyncResult};
pub use project::Project;
