//! Whatsweb-rust: typed, event-driven WhatsApp Web sessions
//!
//! Drives the WhatsApp Web application inside a browser automation engine,
//! turning its internal notifications into a small set of typed events and
//! exposing a handful of request/response operations.
//!
//! ## Modules
//!
//! - `engine` - Automation engine interface plus an in-memory engine
//! - `auth` - Where a session's profile lives and how it is persisted
//! - `types` - Events and normalized entities (messages, chats, contacts)
//! - `bus` - Ordered event delivery to subscribers
//! - `bridge` - Injected scripts and host-function plumbing
//! - `session` - The session state machine
//! - `client` - High-level client API
//! - `config` - Client options

pub mod auth;
pub mod bridge;
pub mod bus;
pub mod engine;
pub mod types;

mod bootstrap;
mod client;
mod config;
mod session;
mod state;

pub use auth::{AuthError, AuthStrategy, LocalAuth, PersistError, SnapshotAuth};
pub use bootstrap::StoreBootstrapper;
pub use bridge::BridgeScripts;
pub use bus::{EmitOutcome, EventBus, HandlerError, HandlerResult};
pub use client::{Client, ClientError, MessageContent, SendOptions};
pub use config::ClientOptions;
pub use engine::{BrowserContext, BrowserEngine, EngineError, Page};
pub use session::SessionController;
pub use state::{Session, SessionState};
pub use types::{Chat, Contact, Event, EventKind, Message, MessageMedia};
