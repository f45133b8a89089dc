//! Event types published on the session's event bus.
//!
//! The set of kinds is closed; each kind carries a statically known payload.

use std::fmt;
use std::str::FromStr;

use crate::types::Message;

/// Well-known `Disconnected` reasons.
pub mod reasons {
    /// The pairing-code retry budget ran out.
    pub const QR_MAX_RETRIES: &str = "qr_max_retries";
    /// The web application logged the device out.
    pub const LOGOUT: &str = "LOGOUT";
    /// Launching or wiring up the browsing context failed.
    pub const INIT_FAILED: &str = "init_failed";
}

/// All events a client can observe.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A fresh pairing string to render as a QR code.
    Qr(String),
    Authenticated,
    Ready,
    /// A new message not sent by this account.
    Message(Message),
    /// Any new message, including our own.
    MessageCreated(Message),
    /// The web application's raw phase string changed.
    StateChanged(String),
    /// The session ended; carries the reason.
    Disconnected(String),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Qr(_) => EventKind::Qr,
            Event::Authenticated => EventKind::Authenticated,
            Event::Ready => EventKind::Ready,
            Event::Message(_) => EventKind::Message,
            Event::MessageCreated(_) => EventKind::MessageCreated,
            Event::StateChanged(_) => EventKind::StateChanged,
            Event::Disconnected(_) => EventKind::Disconnected,
        }
    }
}

/// Discriminant of [`Event`], used to subscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Qr,
    Authenticated,
    Ready,
    Message,
    MessageCreated,
    StateChanged,
    Disconnected,
}

impl EventKind {
    pub const ALL: [EventKind; 7] = [
        EventKind::Qr,
        EventKind::Authenticated,
        EventKind::Ready,
        EventKind::Message,
        EventKind::MessageCreated,
        EventKind::StateChanged,
        EventKind::Disconnected,
    ];

    /// Conventional wire name of the event.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Qr => "qr",
            EventKind::Authenticated => "authenticated",
            EventKind::Ready => "ready",
            EventKind::Message => "message",
            EventKind::MessageCreated => "message_create",
            EventKind::StateChanged => "change_state",
            EventKind::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown event name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEventKind(pub String);

impl fmt::Display for UnknownEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown event kind: {}", self.0)
    }
}

impl std::error::Error for UnknownEventKind {}

impl FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownEventKind(s.to_string()))
    }
}
