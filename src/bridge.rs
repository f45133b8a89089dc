//! Glue between the session controller and the scripts injected into the page.
//!
//! The bundle itself (`moduleraid.js`, `AuthStore.js`, `Store.js`,
//! `Utils.js`) is an external asset shipped next to the binary. This module
//! loads it, wraps its CommonJS modules for evaluation, and defines the small
//! inline scripts and host-function names the session relies on.
//!
//! Page script talks back through host functions. Each call is decoded into a
//! [`Notification`] and pushed onto the session's queue, so the controller
//! handles them one at a time and in delivery order.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use futures::FutureExt;
use log::debug;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::engine::HostFunction;
use crate::types::reasons;

/// Global names under which host functions are exposed to page script.
pub mod host_fns {
    pub const PAIRING_REF: &str = "__wweb_onPairingRef";
    pub const STATE_CHANGED: &str = "__wweb_onStateChanged";
    pub const SYNCED: &str = "__wweb_onSynced";
    pub const LOGOUT: &str = "__wweb_onLogout";
    pub const MESSAGE: &str = "__wweb_onMessage";
    pub const MESSAGE_CREATED: &str = "__wweb_onMessageCreated";
}

/// App phases during which the device still has to be paired.
pub const PAIRING_PHASES: [&str; 5] = [
    "UNPAIRED",
    "UNPAIRED_IDLE",
    "OPENING",
    "UNLAUNCHED",
    "PAIRING",
];

pub fn is_pairing_phase(phase: &str) -> bool {
    PAIRING_PHASES.contains(&phase)
}

/// The injected script bundle.
///
/// Empty sources are allowed; the corresponding evaluation then only defines
/// an empty module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeScripts {
    /// Module loader registered as an init script before navigation.
    pub module_raid: String,
    /// CommonJS module exporting `ExposeAuthStore`.
    pub auth_store: String,
    /// CommonJS module exporting `ExposeStore`.
    pub store: String,
    /// CommonJS module exporting `LoadUtils`.
    pub utils: String,
}

impl BridgeScripts {
    /// Load the bundle from `dir`.
    pub fn load(dir: impl AsRef<Path>) -> io::Result<Self> {
        let dir = dir.as_ref();
        let read = |relative: &str| fs::read_to_string(dir.join(relative));

        Ok(Self {
            module_raid: read("moduleraid.js")?,
            auth_store: read("Injected/AuthStore/AuthStore.js")?,
            store: read("Injected/Store.js")?,
            utils: read("Injected/Utils.js")?,
        })
    }
}

/// Turn a CommonJS module into an expression that runs `export` once.
pub fn wrap_commonjs(source: &str, export: &str) -> String {
    format!(
        "(function(){{ const exports = {{}}; {source}; return exports.{export} && exports.{export}(); }})();"
    )
}

/// Hides the automation flag from page script.
pub const STEALTH_INIT: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
"#;

/// Matches once the web application has rendered either the pairing screen
/// or the main chat list.
pub const READY_SELECTOR: &str = "#app .landing-wrapper, #app canvas, #side";

/// Subscribes the auth listeners to the exposed host functions.
pub const INSTALL_AUTH_LISTENERS: &str = r#"() => {
    window.AuthStore.Conn.on('change:ref', (_conn, ref) => window.__wweb_onPairingRef(ref));
    window.AuthStore.AppState.on('change:state', (_state, phase) => window.__wweb_onStateChanged(phase));
    window.AuthStore.AppState.on('change:hasSynced', () => window.__wweb_onSynced(true));
    window.AuthStore.Cmd.on('logout', async () => { await window.__wweb_onLogout('LOGOUT'); });
}"#;

pub const CURRENT_PHASE: &str = "() => window.AuthStore.AppState.state";

pub const CURRENT_PAIRING_REF: &str = "() => window.AuthStore.Conn.ref";

/// Builds the pairing string for a reference, or `null` without one.
pub const DERIVE_PAIRING_STRING: &str = r#"async (ref) => {
    if (!ref) return null;
    const utils = window.AuthStore.RegistrationUtils;
    const registration = await utils.waSignalStore.getRegistrationInfo();
    const noise = await utils.waNoiseInfo.get();
    const staticKey = window.AuthStore.Base64Tools.encodeB64(noise.staticKeyPair.pubKey);
    const identityKey = window.AuthStore.Base64Tools.encodeB64(registration.identityKeyPair.pubKey);
    const advSecret = await utils.getADVSecretKey();
    return [ref, staticKey, identityKey, advSecret, utils.DEVICE_PLATFORM].join(',');
}"#;

/// Forwards new messages; `created` for all of them, `message` only for
/// messages not sent by this account.
pub const INSTALL_MESSAGE_LISTENER: &str = r#"() => {
    window.Store.Msg.on('add', (msg) => {
        if (!msg.isNewMsg) return;
        const model = window.WWebJS.getMessageModel(msg);
        window.__wweb_onMessageCreated(model);
        if (!(model.id && model.id.fromMe)) window.__wweb_onMessage(model);
    });
}"#;

pub const SEND_MESSAGE: &str =
    "({ chatId, body, options }) => window.WWebJS.sendMessage(chatId, body, options)";

pub const GET_CHATS: &str = "() => window.WWebJS.getChats()";

pub const GET_CONTACTS: &str = "() => window.WWebJS.getContacts()";

pub const GET_CHAT: &str = "(chatId) => window.WWebJS.getChat(chatId)";

pub const GET_MESSAGE: &str = r#"(messageId) => {
    const msg = window.Store.Msg.get(messageId);
    return msg ? window.WWebJS.getMessageModel(msg) : null;
}"#;

/// A decoded call from page script.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    PairingRefChanged(String),
    PhaseChanged(String),
    Synced(bool),
    Logout(String),
    MessageAdded(Value),
    MessageCreated(Value),
}

impl Notification {
    pub fn pairing_ref(args: Vec<Value>) -> Option<Self> {
        first_text(&args).map(Notification::PairingRefChanged)
    }

    pub fn phase_changed(args: Vec<Value>) -> Option<Self> {
        first_text(&args).map(Notification::PhaseChanged)
    }

    pub fn synced(args: Vec<Value>) -> Option<Self> {
        let synced = args.first().and_then(Value::as_bool).unwrap_or(true);
        Some(Notification::Synced(synced))
    }

    pub fn logout(args: Vec<Value>) -> Option<Self> {
        let reason = first_text(&args).unwrap_or_else(|| reasons::LOGOUT.to_string());
        Some(Notification::Logout(reason))
    }

    pub fn message_added(args: Vec<Value>) -> Option<Self> {
        args.into_iter().next().map(Notification::MessageAdded)
    }

    pub fn message_created(args: Vec<Value>) -> Option<Self> {
        args.into_iter().next().map(Notification::MessageCreated)
    }
}

fn first_text(args: &[Value]) -> Option<String> {
    args.first()
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

/// Sending half of a session's notification queue.
#[derive(Debug, Clone)]
pub struct NotificationSink {
    tx: mpsc::UnboundedSender<Notification>,
}

impl NotificationSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue `notification`; dropped if the session is gone.
    pub fn send(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            debug!("notification dropped: session queue closed");
        }
    }

    /// Host function that decodes its arguments with `decode` and queues the result.
    pub fn host_function(&self, decode: fn(Vec<Value>) -> Option<Notification>) -> HostFunction {
        let sink = self.clone();
        Arc::new(move |args: Vec<Value>| {
            match decode(args) {
                Some(notification) => sink.send(notification),
                None => debug!("ignoring host call without a usable payload"),
            }
            futures::future::ready(()).boxed()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wrap_commonjs() {
        let wrapped = wrap_commonjs("exports.LoadUtils = () => 1", "LoadUtils");
        assert!(wrapped.starts_with("(function(){ const exports = {}; exports.LoadUtils"));
        assert!(wrapped.ends_with("return exports.LoadUtils && exports.LoadUtils(); })();"));
    }

    #[test]
    fn test_pairing_phases() {
        assert!(is_pairing_phase("UNPAIRED_IDLE"));
        assert!(is_pairing_phase("OPENING"));
        assert!(!is_pairing_phase("CONNECTED"));
        assert!(!is_pairing_phase(""));
    }

    #[test]
    fn test_notification_decoding() {
        assert_eq!(Notification::pairing_ref(vec![]), None);
        assert_eq!(Notification::pairing_ref(vec![json!("")]), None);
        assert_eq!(
            Notification::pairing_ref(vec![json!("2@abc")]),
            Some(Notification::PairingRefChanged("2@abc".into()))
        );
        assert_eq!(Notification::synced(vec![]), Some(Notification::Synced(true)));
        assert_eq!(
            Notification::logout(vec![json!(null)]),
            Some(Notification::Logout("LOGOUT".into()))
        );
        assert_eq!(Notification::message_added(vec![]), None);
    }

    #[tokio::test]
    async fn test_host_function_queues_in_call_order() {
        let (sink, mut rx) = NotificationSink::channel();
        let on_phase = sink.host_function(Notification::phase_changed);

        on_phase(vec![json!("OPENING")]).await;
        on_phase(vec![json!(42)]).await;
        on_phase(vec![json!("CONNECTED")]).await;
        drop(on_phase);
        drop(sink);

        assert_eq!(rx.recv().await, Some(Notification::PhaseChanged("OPENING".into())));
        assert_eq!(rx.recv().await, Some(Notification::PhaseChanged("CONNECTED".into())));
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn test_load_reads_bundle_layout() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("Injected/AuthStore")).unwrap();
        fs::write(dir.path().join("moduleraid.js"), "raid").unwrap();
        fs::write(dir.path().join("Injected/AuthStore/AuthStore.js"), "auth").unwrap();
        fs::write(dir.path().join("Injected/Store.js"), "store").unwrap();
        fs::write(dir.path().join("Injected/Utils.js"), "utils").unwrap();

        let scripts = BridgeScripts::load(dir.path()).unwrap();
        assert_eq!(scripts.auth_store, "auth");
        assert_eq!(scripts.utils, "utils");

        fs::remove_file(dir.path().join("Injected/Utils.js")).unwrap();
        assert!(BridgeScripts::load(dir.path()).is_err());
    }
}
