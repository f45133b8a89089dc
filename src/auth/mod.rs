//! Authentication strategies.
//!
//! A strategy decides where a session's browser profile lives and how it is
//! persisted: [`LocalAuth`] lets the engine own a profile directory,
//! [`SnapshotAuth`] also writes a cookie/local-storage snapshot and replays
//! it on the next launch.

mod local;
mod snapshot;

use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::engine::{BrowserContext, BrowserEngine, EngineError, ProxySettings};

pub use local::LocalAuth;
pub use snapshot::{PersistError, SnapshotAuth};

/// Session name used when none is given.
pub const DEFAULT_SESSION: &str = "default";

/// Errors raised while preparing a browsing context.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("failed to prepare session directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Launch parameters the controller hands to a strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextOptions {
    pub headless: bool,
    pub user_agent: Option<String>,
    pub args: Vec<String>,
    pub proxy: Option<ProxySettings>,
    pub bypass_csp: bool,
}

/// Strategy for creating and persisting a session's browsing context.
#[async_trait]
pub trait AuthStrategy: Send + Sync + Debug {
    /// Launch the browsing context for this session.
    async fn create_context(
        &self,
        engine: &dyn BrowserEngine,
        options: ContextOptions,
    ) -> Result<Arc<dyn BrowserContext>, AuthError>;

    /// Persist whatever the strategy keeps across launches.
    async fn save_session(&self) {}

    /// Release strategy resources.
    async fn destroy(&self) {}
}

/// Remove duplicate flags, keeping the first occurrence of each.
pub fn dedupe_args(args: &[String]) -> Vec<String> {
    let mut deduped: Vec<String> = Vec::with_capacity(args.len());
    for arg in args {
        if !deduped.contains(arg) {
            deduped.push(arg.clone());
        }
    }
    deduped
}

/// Root under which session directories are created.
///
/// Falls back to the working directory when the platform has no cache dir.
pub fn default_data_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("wwebjs-rs")
}
