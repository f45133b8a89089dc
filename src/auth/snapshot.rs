use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::fs;
use uuid::Uuid;

use crate::auth::{
    dedupe_args, default_data_path, AuthError, AuthStrategy, ContextOptions, DEFAULT_SESSION,
};
use crate::engine::{BrowserContext, BrowserEngine, EngineError, LaunchOptions, StorageState};

const SNAPSHOT_FILE: &str = "session.json";
const PROFILE_DIR: &str = "browser_data";

/// Writes each entry of the argument into the page's local storage.
const REPLAY_LOCAL_STORAGE: &str = r#"(items) => {
    for (const [key, value] of Object.entries(items)) {
        localStorage.setItem(key, value);
    }
}"#;

/// Errors raised while writing a snapshot.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to capture storage state: {0}")]
    Engine(#[from] EngineError),
    #[error("failed to write snapshot: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize snapshot: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Persists cookies and local storage to a snapshot file and replays them
/// into the next context.
///
/// Layout per session: `<root>/<session>/session.json` for the snapshot and
/// `<root>/<session>/browser_data/` for the engine's profile.
pub struct SnapshotAuth {
    session_dir: PathBuf,
    context: Mutex<Option<Arc<dyn BrowserContext>>>,
}

impl SnapshotAuth {
    pub fn new(session_name: impl AsRef<str>) -> Self {
        Self::in_dir(default_data_path().join(session_name.as_ref()))
    }

    /// Keep the session under `root/<session_name>`.
    pub fn with_data_path(root: impl AsRef<Path>, session_name: impl AsRef<str>) -> Self {
        Self::in_dir(root.as_ref().join(session_name.as_ref()))
    }

    fn in_dir(session_dir: PathBuf) -> Self {
        Self {
            session_dir,
            context: Mutex::new(None),
        }
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.session_dir.join(SNAPSHOT_FILE)
    }

    pub fn profile_dir(&self) -> PathBuf {
        self.session_dir.join(PROFILE_DIR)
    }

    /// Read the saved snapshot; any failure reads as "no snapshot".
    pub async fn load_snapshot(&self) -> Option<StorageState> {
        let path = self.snapshot_path();
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("no snapshot at {}", path.display());
                return None;
            }
            Err(err) => {
                warn!("ignoring unreadable snapshot {}: {err}", path.display());
                return None;
            }
        };

        match serde_json::from_slice::<StorageState>(&bytes) {
            Ok(state) => {
                info!(
                    "loaded snapshot with {} cookie(s) from {}",
                    state.cookies.len(),
                    path.display()
                );
                Some(state)
            }
            Err(err) => {
                warn!("ignoring corrupt snapshot {}: {err}", path.display());
                None
            }
        }
    }

    /// Capture the current storage state and replace the snapshot atomically.
    ///
    /// Does nothing before a context has been created.
    pub async fn write_snapshot(&self) -> Result<(), PersistError> {
        let Some(context) = self.current_context() else {
            debug!("no context to snapshot");
            return Ok(());
        };

        let state = context.storage_state().await?;
        let bytes = serde_json::to_vec_pretty(&state)?;

        fs::create_dir_all(&self.session_dir).await?;
        let path = self.snapshot_path();
        let temp = self
            .session_dir
            .join(format!(".{SNAPSHOT_FILE}.{}.tmp", Uuid::new_v4()));

        if let Err(err) = write_then_rename(&temp, &path, &bytes).await {
            let _ = fs::remove_file(&temp).await;
            return Err(err.into());
        }

        info!("snapshot saved to {}", path.display());
        Ok(())
    }

    fn current_context(&self) -> Option<Arc<dyn BrowserContext>> {
        self.context
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_context(&self, context: Option<Arc<dyn BrowserContext>>) {
        *self
            .context
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = context;
    }
}

async fn write_then_rename(temp: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    fs::write(temp, bytes).await?;
    fs::rename(temp, path).await
}

/// Replay a snapshot into a fresh context. Every step is best-effort.
async fn replay(context: &dyn BrowserContext, snapshot: StorageState) {
    if !snapshot.cookies.is_empty() {
        let count = snapshot.cookies.len();
        match context.add_cookies(snapshot.cookies.clone()).await {
            Ok(()) => debug!("restored {count} cookie(s)"),
            Err(err) => warn!("failed to restore cookies: {err}"),
        }
    }

    let pages = context.pages();
    for (origin, entries) in snapshot.local_storage() {
        if entries.is_empty() {
            continue;
        }
        let items = serde_json::json!(entries);
        for page in &pages {
            if let Err(err) = page.evaluate(REPLAY_LOCAL_STORAGE, items.clone()).await {
                debug!("failed to restore local storage for {origin} on a page: {err}");
            }
        }
    }
}

impl Default for SnapshotAuth {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION)
    }
}

impl fmt::Debug for SnapshotAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotAuth")
            .field("session_dir", &self.session_dir)
            .field("has_context", &self.current_context().is_some())
            .finish()
    }
}

#[async_trait]
impl AuthStrategy for SnapshotAuth {
    async fn create_context(
        &self,
        engine: &dyn BrowserEngine,
        options: ContextOptions,
    ) -> Result<Arc<dyn BrowserContext>, AuthError> {
        fs::create_dir_all(self.profile_dir()).await?;
        let snapshot = self.load_snapshot().await;

        let context = engine
            .launch_persistent_context(LaunchOptions {
                user_data_dir: self.profile_dir(),
                headless: options.headless,
                user_agent: options.user_agent,
                args: dedupe_args(&options.args),
                proxy: options.proxy,
                bypass_csp: options.bypass_csp,
            })
            .await?;

        if let Some(snapshot) = snapshot {
            replay(context.as_ref(), snapshot).await;
        }

        self.set_context(Some(context.clone()));
        Ok(context)
    }

    async fn save_session(&self) {
        match self.write_snapshot().await {
            Ok(()) => {}
            Err(PersistError::Engine(EngineError::Closed)) => {
                warn!("context already closed; snapshot not saved");
            }
            Err(err) => {
                error!("failed to save session to {}: {err}", self.snapshot_path().display());
            }
        }
    }

    async fn destroy(&self) {
        if self.current_context().is_some() {
            self.save_session().await;
        }
        self.set_context(None);
    }
}
