use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::auth::AuthStrategy;
use crate::bridge::{self, BridgeScripts};
use crate::bus::{EventBus, HandlerResult};
use crate::config::ClientOptions;
use crate::engine::{BrowserEngine, EngineError};
use crate::session::SessionController;
use crate::state::SessionState;
use crate::types::{Chat, Contact, Event, EventKind, Message, MessageMedia};

/// High-level facade over one web session.
#[derive(Debug)]
pub struct Client {
    controller: Arc<SessionController>,
    bus: EventBus,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("web application did not render `{selector}` within {timeout_ms}ms")]
    ReadyTimeout { selector: String, timeout_ms: u64 },
    #[error("session was already initialized (state {0})")]
    AlreadyInitialized(SessionState),
    #[error("client is not initialized; call `initialize` first")]
    NotInitialized,
    #[error("bridge request failed: {0}")]
    Bridge(#[from] EngineError),
}

/// What to send.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageContent {
    Text(String),
    Media(MessageMedia),
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        MessageContent::Text(text.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        MessageContent::Text(text)
    }
}

impl From<MessageMedia> for MessageContent {
    fn from(media: MessageMedia) -> Self {
        MessageContent::Media(media)
    }
}

/// Free-form options forwarded to the bridge's send call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SendOptions(Map<String, Value>);

impl SendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an arbitrary option.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Reply to the message with this serialized id.
    pub fn quoted_message(self, message_id: impl Into<String>) -> Self {
        self.with("quotedMessageId", Value::String(message_id.into()))
    }

    /// Caption shown with a media message.
    pub fn caption(self, caption: impl Into<String>) -> Self {
        self.with("caption", Value::String(caption.into()))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

impl Client {
    /// Create a client with an empty script bundle.
    pub fn new(
        engine: Arc<dyn BrowserEngine>,
        auth: Arc<dyn AuthStrategy>,
        options: ClientOptions,
    ) -> Self {
        Self::with_scripts(engine, auth, options, BridgeScripts::default())
    }

    pub fn with_scripts(
        engine: Arc<dyn BrowserEngine>,
        auth: Arc<dyn AuthStrategy>,
        options: ClientOptions,
        scripts: BridgeScripts,
    ) -> Self {
        let bus = EventBus::new();
        let controller =
            SessionController::new(options, engine, auth, Arc::new(scripts), bus.clone());
        Self { controller, bus }
    }

    /// Launch the session. See [`SessionController::initialize`].
    pub async fn initialize(&self) -> Result<(), ClientError> {
        self.controller.initialize().await
    }

    /// Tear the session down; never fails.
    ///
    /// The context is closed before the auth strategy is released, so a
    /// strategy that snapshots the session cannot capture it here. Call
    /// [`Client::save_session`] once the session is `Ready` to persist it.
    pub async fn destroy(&self) {
        self.controller.destroy().await
    }

    /// Persist the session through the auth strategy, typically on `Ready`.
    pub async fn save_session(&self) {
        self.controller.auth().save_session().await
    }

    pub fn state(&self) -> SessionState {
        self.controller.state()
    }

    pub fn options(&self) -> &ClientOptions {
        self.controller.options()
    }

    /// Subscribe an async handler to `kind`.
    pub fn on<F, Fut>(&self, kind: EventKind, handler: F)
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.bus.on(kind, handler);
    }

    /// Subscribe a plain closure to `kind`.
    pub fn on_sync<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        self.bus.on_sync(kind, handler);
    }

    /// Subscribe an async handler to every kind.
    pub fn on_any<F, Fut>(&self, handler: F)
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.bus.on_any(handler);
    }

    /// Receive every event from now on.
    pub fn events(&self) -> mpsc::UnboundedReceiver<Event> {
        self.bus.listen()
    }

    /// Send text or media to `chat_id`. `None` when the bridge reports no message.
    pub async fn send_message(
        &self,
        chat_id: &str,
        content: impl Into<MessageContent>,
        options: SendOptions,
    ) -> Result<Option<Message>, ClientError> {
        let page = self.controller.ensure_bootstrapped().await?;

        let SendOptions(mut options) = options;
        let body = match content.into() {
            MessageContent::Text(body) => body,
            MessageContent::Media(media) => {
                options.insert("media".to_string(), media.to_json());
                String::new()
            }
        };

        let sent = page
            .evaluate(
                bridge::SEND_MESSAGE,
                json!({ "chatId": chat_id, "body": body, "options": options }),
            )
            .await?;
        Ok(Message::from_raw_opt(sent))
    }

    pub async fn get_chats(&self) -> Result<Vec<Chat>, ClientError> {
        let chats = self.request(bridge::GET_CHATS, Value::Null).await?;
        Ok(into_list(chats).map(Chat::from_raw).collect())
    }

    pub async fn get_contacts(&self) -> Result<Vec<Contact>, ClientError> {
        let contacts = self.request(bridge::GET_CONTACTS, Value::Null).await?;
        Ok(into_list(contacts).map(Contact::from_raw).collect())
    }

    pub async fn get_chat_by_id(&self, chat_id: &str) -> Result<Option<Chat>, ClientError> {
        let chat = self.request(bridge::GET_CHAT, json!(chat_id)).await?;
        Ok(Chat::from_raw_opt(chat))
    }

    pub async fn get_message_by_id(
        &self,
        message_id: &str,
    ) -> Result<Option<Message>, ClientError> {
        let message = self.request(bridge::GET_MESSAGE, json!(message_id)).await?;
        Ok(Message::from_raw_opt(message))
    }

    async fn request(&self, script: &str, arg: Value) -> Result<Value, ClientError> {
        let page = self.controller.ensure_bootstrapped().await?;
        Ok(page.evaluate(script, arg).await?)
    }
}

/// Items of a JSON array; nothing for any other value.
fn into_list(value: Value) -> impl Iterator<Item = Value> {
    let items = match value {
        Value::Array(items) => items,
        _ => Vec::new(),
    };
    items.into_iter().filter(|item| !item.is_null())
}
