//! Cookie and storage-state types exchanged with the automation engine.
//!
//! These mirror the engine's own storage snapshot shape (cookie list plus
//! per-origin local-storage entries), which is also the on-disk format used
//! by [`SnapshotAuth`](crate::auth::SnapshotAuth).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// SameSite cookie attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SameSite {
    #[serde(rename = "None")]
    None,
    #[default]
    #[serde(rename = "Lax")]
    Lax,
    #[serde(rename = "Strict")]
    Strict,
}

/// A browser cookie as reported by (and injected into) a browsing context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Unix timestamp in seconds, `-1` for session cookies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<SameSite>,
}

impl Cookie {
    /// Create a cookie scoped to `domain`.
    pub fn new(
        name: impl Into<String>,
        value: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: Some(domain.into()),
            path: Some("/".into()),
            expires: None,
            http_only: None,
            secure: None,
            same_site: None,
        }
    }

    /// Mark the cookie secure and HTTP-only.
    pub fn hardened(mut self) -> Self {
        self.secure = Some(true);
        self.http_only = Some(true);
        self
    }

    /// Identity used when merging cookie sets: name, domain and path.
    pub fn key(&self) -> (String, String, String) {
        (
            self.name.clone(),
            self.domain.clone().unwrap_or_default(),
            self.path.clone().unwrap_or_default(),
        )
    }
}

/// A single local-storage key/value pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalStorageEntry {
    pub name: String,
    pub value: String,
}

/// Local-storage contents of one origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginState {
    pub origin: String,
    #[serde(default)]
    pub local_storage: Vec<LocalStorageEntry>,
}

impl OriginState {
    /// Local-storage entries as a key/value map.
    pub fn entries(&self) -> BTreeMap<String, String> {
        self.local_storage
            .iter()
            .map(|entry| (entry.name.clone(), entry.value.clone()))
            .collect()
    }
}

/// Serialized capture of cookies and per-origin local storage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageState {
    #[serde(default)]
    pub cookies: Vec<Cookie>,
    #[serde(default)]
    pub origins: Vec<OriginState>,
}

impl StorageState {
    /// Whether the snapshot carries nothing worth replaying.
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty() && self.origins.iter().all(|o| o.local_storage.is_empty())
    }

    /// Per-origin local storage flattened into nested maps.
    pub fn local_storage(&self) -> BTreeMap<String, BTreeMap<String, String>> {
        self.origins
            .iter()
            .map(|origin| (origin.origin.clone(), origin.entries()))
            .collect()
    }

    /// Set a local-storage entry, creating the origin if needed.
    pub fn set_local_storage(
        &mut self,
        origin: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) {
        let origin = origin.into();
        let name = name.into();
        let value = value.into();

        let slot = match self.origins.iter().position(|o| o.origin == origin) {
            Some(index) => &mut self.origins[index],
            None => {
                self.origins.push(OriginState {
                    origin,
                    local_storage: Vec::new(),
                });
                let last = self.origins.len() - 1;
                &mut self.origins[last]
            }
        };

        match slot.local_storage.iter_mut().find(|e| e.name == name) {
            Some(entry) => entry.value = value,
            None => slot.local_storage.push(LocalStorageEntry { name, value }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_serializes_camel_case() {
        let cookie = Cookie::new("wa_sess", "abc", ".web.whatsapp.com").hardened();
        let json = serde_json::to_string(&cookie).unwrap();
        assert!(json.contains("\"httpOnly\":true"));
        assert!(!json.contains("sameSite"));
    }

    #[test]
    fn test_storage_state_tolerates_missing_sections() {
        let state: StorageState = serde_json::from_str("{\"cookies\": []}").unwrap();
        assert!(state.is_empty());
        assert!(state.origins.is_empty());
    }

    #[test]
    fn test_set_local_storage_overwrites_existing_key() {
        let mut state = StorageState::default();
        state.set_local_storage("https://web.whatsapp.com", "WAToken1", "a");
        state.set_local_storage("https://web.whatsapp.com", "WAToken1", "b");
        state.set_local_storage("https://web.whatsapp.com", "last-wid", "123@c.us");

        let map = state.local_storage();
        let origin = &map["https://web.whatsapp.com"];
        assert_eq!(origin.len(), 2);
        assert_eq!(origin["WAToken1"], "b");
        assert!(!state.is_empty());
    }
}
