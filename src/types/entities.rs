//! Domain entities normalized from bridge payloads.
//!
//! Each `from_raw` is total: identity is coalesced from `{ _serialized }` or
//! a flat string, every optional field falls back to an explicit default,
//! and the original payload is kept in `raw` for fields not modelled here.

use std::fs;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::RawPayload;

/// A chat message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub id: String,
    pub body: String,
    pub from_me: bool,
    pub chat_id: String,
    /// Epoch seconds; `0` when unknown.
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub from: String,
    pub to: String,
    /// Sender inside a group chat.
    pub author: String,
    pub has_media: bool,
    pub raw: Value,
}

impl Message {
    pub fn from_raw(value: Value) -> Self {
        let raw = RawPayload::new(value);
        let id = raw.nested("id");

        Self {
            id: raw.serialized_id().unwrap_or_default(),
            body: raw.text("body").unwrap_or_default().to_string(),
            from_me: id
                .flag("fromMe")
                .or_else(|| raw.flag("fromMe"))
                .unwrap_or(false),
            chat_id: id
                .wid("remote")
                .or_else(|| raw.wid("chatId"))
                .unwrap_or_default(),
            timestamp: raw
                .integer("t")
                .or_else(|| raw.integer("timestamp"))
                .unwrap_or(0),
            kind: raw
                .text("type")
                .or_else(|| raw.text("messageType"))
                .unwrap_or("unknown")
                .to_string(),
            from: raw.wid("from").unwrap_or_default(),
            to: raw.wid("to").unwrap_or_default(),
            author: raw.wid("author").unwrap_or_default(),
            has_media: raw.flag("hasMedia").unwrap_or(false),
            raw: raw.into_value(),
        }
    }

    /// `None` when the page reported no message.
    pub fn from_raw_opt(value: Value) -> Option<Self> {
        (!value.is_null()).then(|| Self::from_raw(value))
    }

    /// Send time, if the payload carried one.
    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        if self.timestamp == 0 {
            return None;
        }
        DateTime::from_timestamp(self.timestamp, 0)
    }
}

/// A conversation, direct or group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chat {
    pub id: String,
    pub name: String,
    pub unread_count: u32,
    pub is_group: bool,
    pub archived: bool,
    pub pinned: bool,
    pub raw: Value,
}

impl Chat {
    pub fn from_raw(value: Value) -> Self {
        let raw = RawPayload::new(value);

        Self {
            id: raw.serialized_id().unwrap_or_default(),
            name: raw
                .text("name")
                .or_else(|| raw.text("formattedTitle"))
                .unwrap_or_default()
                .to_string(),
            unread_count: raw
                .integer("unreadCount")
                .map(|count| count.clamp(0, u32::MAX as i64) as u32)
                .unwrap_or(0),
            is_group: raw.flag("isGroup").unwrap_or(false),
            archived: raw.flag("archived").unwrap_or(false),
            pinned: raw.flag("pinned").unwrap_or(false),
            raw: raw.into_value(),
        }
    }

    pub fn from_raw_opt(value: Value) -> Option<Self> {
        (!value.is_null()).then(|| Self::from_raw(value))
    }
}

/// A known account.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contact {
    pub id: String,
    pub name: String,
    pub pushname: String,
    pub number: String,
    pub is_business: bool,
    pub is_me: bool,
    pub is_my_contact: bool,
    pub is_blocked: bool,
    pub raw: Value,
}

impl Contact {
    pub fn from_raw(value: Value) -> Self {
        let raw = RawPayload::new(value);

        Self {
            id: raw.serialized_id().unwrap_or_default(),
            name: raw.text("name").unwrap_or_default().to_string(),
            pushname: raw.text("pushname").unwrap_or_default().to_string(),
            number: raw.text("number").unwrap_or_default().to_string(),
            is_business: raw.flag("isBusiness").unwrap_or(false),
            is_me: raw.flag("isMe").unwrap_or(false),
            is_my_contact: raw.flag("isMyContact").unwrap_or(false),
            is_blocked: raw.flag("isBlocked").unwrap_or(false),
            raw: raw.into_value(),
        }
    }
}

/// Media attachment, base64 encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageMedia {
    pub mimetype: String,
    pub data: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub filesize: u64,
    #[serde(skip)]
    pub raw: Value,
}

impl MessageMedia {
    pub fn new(mimetype: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            mimetype: mimetype.into(),
            data: data.into(),
            filename: String::new(),
            filesize: 0,
            raw: Value::Null,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    /// Read and encode a local file, guessing its mimetype from the extension.
    pub fn from_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        let mimetype = mime_guess::from_path(path).first_or_octet_stream();

        Ok(Self {
            mimetype: mimetype.essence_str().to_string(),
            data: STANDARD.encode(&bytes),
            filename: path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            filesize: bytes.len() as u64,
            raw: Value::Null,
        })
    }

    pub fn from_raw(value: Value) -> Self {
        let raw = RawPayload::new(value);

        Self {
            mimetype: raw.text("mimetype").unwrap_or_default().to_string(),
            data: raw.text("data").unwrap_or_default().to_string(),
            filename: raw.text("filename").unwrap_or_default().to_string(),
            filesize: raw
                .integer("filesize")
                .map(|size| size.max(0) as u64)
                .unwrap_or(0),
            raw: raw.into_value(),
        }
    }

    /// Shape the bridge expects in the `media` send option.
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "mimetype": self.mimetype,
            "data": self.data,
            "filename": (!self.filename.is_empty()).then_some(&self.filename),
            "filesize": (self.filesize > 0).then_some(self.filesize),
        })
    }
}
