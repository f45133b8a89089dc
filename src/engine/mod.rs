//! Browser automation engine interface.
//!
//! The engine (launching an isolated browsing context, navigating,
//! evaluating script, exposing host functions) is an external collaborator.
//! This module only describes the primitives the session layer consumes;
//! adapters for a concrete engine implement these traits.

mod memory;
mod storage;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use memory::*;
pub use storage::*;

/// Host-side callback exposed to page script under a global name.
///
/// Receives the JSON arguments the page passed to the function.
pub type HostFunction = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Errors reported by the automation engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to launch browsing context: {0}")]
    Launch(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("timed out after {timeout_ms}ms waiting for {what}")]
    Timeout { what: String, timeout_ms: u64 },
    #[error("script evaluation failed: {0}")]
    Evaluation(String),
    #[error("host function `{0}` is already exposed")]
    FunctionExists(String),
    #[error("browsing context is closed")]
    Closed,
    #[error("engine I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

/// Condition `goto` waits for before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitUntil {
    Load,
    #[default]
    DomContentLoaded,
    NetworkIdle,
}

/// Proxy routing for the browsing context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxySettings {
    /// Proxy URL, e.g. `http://proxy.local:3128` or `socks5://127.0.0.1:1080`.
    pub server: String,
    /// Comma-separated hosts that bypass the proxy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bypass: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Parameters for launching a persistent browsing context.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchOptions {
    /// Profile directory owned by the engine.
    pub user_data_dir: PathBuf,
    pub headless: bool,
    pub user_agent: Option<String>,
    /// Extra command-line flags; callers pass them de-duplicated.
    pub args: Vec<String>,
    pub proxy: Option<ProxySettings>,
    pub bypass_csp: bool,
}

/// Entry point of an automation engine.
#[async_trait]
pub trait BrowserEngine: Send + Sync {
    /// Launch an isolated browsing context backed by `user_data_dir`.
    async fn launch_persistent_context(
        &self,
        options: LaunchOptions,
    ) -> Result<Arc<dyn BrowserContext>, EngineError>;

    /// Stop the engine and any processes it owns.
    async fn stop(&self) -> Result<(), EngineError>;
}

/// An isolated browsing context (cookie jar, storage, open pages).
#[async_trait]
pub trait BrowserContext: Send + Sync {
    /// Pages currently open, in creation order.
    fn pages(&self) -> Vec<Arc<dyn Page>>;

    async fn new_page(&self) -> Result<Arc<dyn Page>, EngineError>;

    async fn add_cookies(&self, cookies: Vec<Cookie>) -> Result<(), EngineError>;

    /// Capture cookies and per-origin local storage.
    async fn storage_state(&self) -> Result<StorageState, EngineError>;

    async fn close(&self) -> Result<(), EngineError>;
}

/// A single page inside a browsing context.
#[async_trait]
pub trait Page: Send + Sync {
    /// Register script evaluated before any page script on every navigation.
    async fn add_init_script(&self, script: &str) -> Result<(), EngineError>;

    async fn goto(&self, url: &str, wait_until: WaitUntil) -> Result<(), EngineError>;

    /// Wait until any element matching `selector` is attached.
    ///
    /// Returns [`EngineError::Timeout`] once `timeout` elapses.
    async fn wait_for_selector(&self, selector: &str, timeout: Duration)
        -> Result<(), EngineError>;

    /// Make `function` callable from page script as `window[name]`.
    async fn expose_function(&self, name: &str, function: HostFunction)
        -> Result<(), EngineError>;

    /// Evaluate `script` (a function expression) with a single JSON argument.
    async fn evaluate(&self, script: &str, arg: Value) -> Result<Value, EngineError>;
}
