use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::bridge::NotificationSink;
use crate::engine::{BrowserContext, Page};

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    #[default]
    Uninitialized,
    Initializing,
    AwaitingPairing,
    Syncing,
    Ready,
    Disconnected,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Uninitialized => "UNINITIALIZED",
            SessionState::Initializing => "INITIALIZING",
            SessionState::AwaitingPairing => "AWAITING_PAIRING",
            SessionState::Syncing => "SYNCING",
            SessionState::Ready => "READY",
            SessionState::Disconnected => "DISCONNECTED",
        }
    }

    /// No transition leaves this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Disconnected)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable per-session data owned by the session controller.
#[derive(Default)]
pub struct Session {
    pub state: SessionState,
    /// Pairing strings emitted so far.
    pub qr_retries: u32,
    pub context: Option<Arc<dyn BrowserContext>>,
    pub page: Option<Arc<dyn Page>>,
    /// Queue the page's host functions push into.
    pub sink: Option<NotificationSink>,
    /// Whether the engine was asked to launch, so teardown knows to stop it.
    pub engine_started: bool,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("qr_retries", &self.qr_retries)
            .field("has_context", &self.context.is_some())
            .field("has_page", &self.page.is_some())
            .field("engine_started", &self.engine_started)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_names() {
        assert_eq!(SessionState::AwaitingPairing.to_string(), "AWAITING_PAIRING");
        assert_eq!(
            serde_json::to_string(&SessionState::Uninitialized).unwrap(),
            "\"UNINITIALIZED\""
        );
        assert!(SessionState::Disconnected.is_terminal());
        assert!(!SessionState::Ready.is_terminal());
    }

    #[test]
    fn test_new_session_is_uninitialized() {
        let session = Session::new();
        assert_eq!(session.state, SessionState::Uninitialized);
        assert_eq!(session.qr_retries, 0);
        assert!(session.context.is_none() && !session.engine_started);
    }
}
