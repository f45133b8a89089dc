use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use log::info;
use tokio::fs;

use crate::auth::{
    dedupe_args, default_data_path, AuthError, AuthStrategy, ContextOptions, DEFAULT_SESSION,
};
use crate::engine::{BrowserContext, BrowserEngine, LaunchOptions};

/// Keeps the session in a browser profile directory owned by the engine.
///
/// Nothing else is written; the profile itself carries the login.
#[derive(Debug, Clone)]
pub struct LocalAuth {
    session_name: String,
    data_path: PathBuf,
}

impl LocalAuth {
    pub fn new(session_name: impl Into<String>) -> Self {
        Self {
            session_name: session_name.into(),
            data_path: default_data_path(),
        }
    }

    /// Use `path` instead of the platform cache directory.
    pub fn with_data_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_path = path.into();
        self
    }

    /// Profile directory handed to the engine.
    pub fn user_data_dir(&self) -> PathBuf {
        self.data_path.join(&self.session_name)
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }
}

impl Default for LocalAuth {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION)
    }
}

#[async_trait]
impl AuthStrategy for LocalAuth {
    async fn create_context(
        &self,
        engine: &dyn BrowserEngine,
        options: ContextOptions,
    ) -> Result<Arc<dyn BrowserContext>, AuthError> {
        let user_data_dir = self.user_data_dir();
        fs::create_dir_all(&user_data_dir).await?;
        info!("launching profile at {}", user_data_dir.display());

        let context = engine
            .launch_persistent_context(LaunchOptions {
                user_data_dir,
                headless: options.headless,
                user_agent: options.user_agent,
                args: dedupe_args(&options.args),
                proxy: options.proxy,
                bypass_csp: options.bypass_csp,
            })
            .await?;
        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryEngine;

    fn options(args: &[&str]) -> ContextOptions {
        ContextOptions {
            headless: true,
            user_agent: Some("agent".into()),
            args: args.iter().map(|a| a.to_string()).collect(),
            proxy: None,
            bypass_csp: true,
        }
    }

    #[tokio::test]
    async fn test_launches_in_session_directory() {
        let root = tempfile::tempdir().unwrap();
        let auth = LocalAuth::new("work").with_data_path(root.path());
        let engine = MemoryEngine::new();

        auth.create_context(&engine, options(&["--x", "--x", "--y"]))
            .await
            .unwrap();

        let launch = &engine.launches()[0];
        assert_eq!(launch.user_data_dir, root.path().join("work"));
        assert!(launch.user_data_dir.is_dir());
        assert_eq!(launch.args, vec!["--x", "--y"]);
        assert_eq!(launch.user_agent.as_deref(), Some("agent"));
    }

    #[tokio::test]
    async fn test_launch_failure_is_reported() {
        let root = tempfile::tempdir().unwrap();
        let auth = LocalAuth::default().with_data_path(root.path());
        let engine = MemoryEngine::new();
        engine.fail_launch("no browser");

        let Err(err) = auth.create_context(&engine, options(&[])).await else {
            panic!("launch should have failed");
        };
        assert!(matches!(err, AuthError::Engine(_)));
        assert!(engine.launches().is_empty());
    }
}
