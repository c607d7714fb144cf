pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod files;
pub mod router;
pub mod workspace;
pub mod ws;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use workspace::{PathGuard, Workspace, WorkspaceError};
