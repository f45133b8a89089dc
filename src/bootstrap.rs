//! One-time injection of the message store and utilities into the page.

use std::sync::Arc;

use log::{debug, info};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::bridge::{self, host_fns, BridgeScripts, Notification, NotificationSink};
use crate::engine::{EngineError, HostFunction, Page};

/// Injects `Store.js`/`Utils.js` and the message listener at most once per
/// session.
///
/// Concurrent callers serialize on an async lock held across the whole
/// injection; whoever comes second sees the flag already set. A failed
/// attempt leaves the flag unset so a later call retries.
#[derive(Debug)]
pub struct StoreBootstrapper {
    injected: Mutex<bool>,
    scripts: Arc<BridgeScripts>,
}

impl StoreBootstrapper {
    pub fn new(scripts: Arc<BridgeScripts>) -> Self {
        Self {
            injected: Mutex::new(false),
            scripts,
        }
    }

    /// Inject if needed. Returns `true` when this call performed the injection.
    pub async fn ensure_bootstrapped(
        &self,
        page: &dyn Page,
        sink: &NotificationSink,
    ) -> Result<bool, EngineError> {
        let mut injected = self.injected.lock().await;
        if *injected {
            debug!("store already injected");
            return Ok(false);
        }

        page.evaluate(&bridge::wrap_commonjs(&self.scripts.store, "ExposeStore"), Value::Null)
            .await?;
        page.evaluate(&bridge::wrap_commonjs(&self.scripts.utils, "LoadUtils"), Value::Null)
            .await?;

        expose_if_missing(
            page,
            host_fns::MESSAGE,
            sink.host_function(Notification::message_added),
        )
        .await?;
        expose_if_missing(
            page,
            host_fns::MESSAGE_CREATED,
            sink.host_function(Notification::message_created),
        )
        .await?;

        page.evaluate(bridge::INSTALL_MESSAGE_LISTENER, Value::Null)
            .await?;

        *injected = true;
        info!("message store injected");
        Ok(true)
    }

    pub async fn is_bootstrapped(&self) -> bool {
        *self.injected.lock().await
    }
}

/// A retry after a partial failure finds the functions already exposed.
async fn expose_if_missing(
    page: &dyn Page,
    name: &str,
    function: HostFunction,
) -> Result<(), EngineError> {
    match page.expose_function(name, function).await {
        Err(EngineError::FunctionExists(_)) => Ok(()),
        other => other,
    }
}
