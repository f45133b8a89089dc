//! Session controller: drives one session from launch to disconnect.
//!
//! ```text
//! UNINITIALIZED -> INITIALIZING -> AWAITING_PAIRING -> SYNCING -> READY
//!                        \________________\_______________\_________\__-> DISCONNECTED
//! ```
//!
//! Bridge notifications are queued by the page's host functions and handled
//! by a single pump task, one at a time and in delivery order. Every handler
//! recovers from its own failures: they become a log line or a
//! `Disconnected` event, never an error returned to the caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use log::{debug, error, info, warn};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::auth::{AuthError, AuthStrategy, ContextOptions};
use crate::bootstrap::StoreBootstrapper;
use crate::bridge::{self, host_fns, BridgeScripts, Notification, NotificationSink};
use crate::bus::EventBus;
use crate::client::ClientError;
use crate::config::ClientOptions;
use crate::engine::{BrowserContext, BrowserEngine, EngineError, Page, WaitUntil};
use crate::state::{Session, SessionState};
use crate::types::{reasons, Event, Message};

type Decoder = fn(Vec<Value>) -> Option<Notification>;

/// Failures while bringing a session up.
#[derive(Debug, Error)]
enum StartError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("`{selector}` did not appear within {timeout_ms}ms")]
    ReadyTimeout { selector: String, timeout_ms: u64 },
    #[error("session was destroyed while starting")]
    Destroyed,
}

/// Owns a session's state machine and its browsing context.
pub struct SessionController {
    options: ClientOptions,
    engine: Arc<dyn BrowserEngine>,
    auth: Arc<dyn AuthStrategy>,
    scripts: Arc<BridgeScripts>,
    bus: EventBus,
    session: Mutex<Session>,
    bootstrapper: StoreBootstrapper,
    /// One-shot gate for the `Authenticated`/`Ready` pair.
    synced_emitted: AtomicBool,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl SessionController {
    pub fn new(
        options: ClientOptions,
        engine: Arc<dyn BrowserEngine>,
        auth: Arc<dyn AuthStrategy>,
        scripts: Arc<BridgeScripts>,
        bus: EventBus,
    ) -> Arc<Self> {
        Arc::new(Self {
            options,
            engine,
            auth,
            bootstrapper: StoreBootstrapper::new(scripts.clone()),
            scripts,
            bus,
            session: Mutex::new(Session::new()),
            synced_emitted: AtomicBool::new(false),
            pump: Mutex::new(None),
        })
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn auth(&self) -> &Arc<dyn AuthStrategy> {
        &self.auth
    }

    /// Launch the browsing context, open the web application and wire up the
    /// bridge listeners.
    ///
    /// Only a ready-selector timeout is returned as an error; any other
    /// failure is logged and reported as `Disconnected("init_failed")`.
    pub async fn initialize(self: &Arc<Self>) -> Result<(), ClientError> {
        {
            let mut session = self.lock();
            if session.state != SessionState::Uninitialized {
                return Err(ClientError::AlreadyInitialized(session.state));
            }
            session.state = SessionState::Initializing;
        }
        info!("initializing session");

        match self.start().await {
            Ok(()) => {
                info!("session listeners installed");
                Ok(())
            }
            Err(err) if self.state().is_terminal() => {
                info!("initialization abandoned: {err}");
                Ok(())
            }
            Err(StartError::ReadyTimeout {
                selector,
                timeout_ms,
            }) => {
                error!("web application did not render within {timeout_ms}ms");
                self.lock().state = SessionState::Disconnected;
                Err(ClientError::ReadyTimeout {
                    selector,
                    timeout_ms,
                })
            }
            Err(err) => {
                error!("session initialization failed: {err}");
                self.disconnect(reasons::INIT_FAILED).await;
                Ok(())
            }
        }
    }

    async fn start(self: &Arc<Self>) -> Result<(), StartError> {
        let options = ContextOptions {
            headless: self.options.headless,
            user_agent: Some(self.options.user_agent.clone()).filter(|agent| !agent.is_empty()),
            args: self.options.launch_args(),
            proxy: self.options.proxy.clone(),
            bypass_csp: self.options.bypass_csp,
        };

        self.lock().engine_started = true;
        let context = self
            .auth
            .create_context(self.engine.as_ref(), options)
            .await?;
        self.adopt_context(&context).await?;

        let page = match context.pages().into_iter().next() {
            Some(page) => page,
            None => context.new_page().await?,
        };
        let (sink, notifications) = NotificationSink::channel();
        {
            let mut session = self.lock();
            if session.state.is_terminal() {
                return Err(StartError::Destroyed);
            }
            session.page = Some(page.clone());
            session.sink = Some(sink.clone());
        }
        self.spawn_pump(notifications);

        if !self.scripts.module_raid.is_empty() {
            page.add_init_script(&self.scripts.module_raid).await?;
        }
        page.add_init_script(bridge::STEALTH_INIT).await?;

        page.goto(&self.options.web_url, WaitUntil::DomContentLoaded).await?;
        self.ensure_live()?;
        debug!("navigated to {}", self.options.web_url);

        match page
            .wait_for_selector(bridge::READY_SELECTOR, self.options.ready_timeout())
            .await
        {
            Ok(()) => {}
            Err(EngineError::Timeout { timeout_ms, .. }) => {
                return Err(StartError::ReadyTimeout {
                    selector: bridge::READY_SELECTOR.to_string(),
                    timeout_ms,
                })
            }
            Err(err) => return Err(err.into()),
        }
        self.ensure_live()?;

        let listeners: [(&str, Decoder); 4] = [
            (host_fns::PAIRING_REF, Notification::pairing_ref),
            (host_fns::STATE_CHANGED, Notification::phase_changed),
            (host_fns::SYNCED, Notification::synced),
            (host_fns::LOGOUT, Notification::logout),
        ];
        for (name, decode) in listeners {
            page.expose_function(name, sink.host_function(decode)).await?;
        }

        page.evaluate(
            &bridge::wrap_commonjs(&self.scripts.auth_store, "ExposeAuthStore"),
            Value::Null,
        )
        .await?;
        page.evaluate(bridge::INSTALL_AUTH_LISTENERS, Value::Null).await?;
        self.ensure_live()?;

        self.resume_phase(page.as_ref(), &sink).await?;
        Ok(())
    }

    /// Hand `context` to the session, or close it when `destroy()` already ran.
    async fn adopt_context(&self, context: &Arc<dyn BrowserContext>) -> Result<(), StartError> {
        {
            let mut session = self.lock();
            if !session.state.is_terminal() {
                session.context = Some(context.clone());
                return Ok(());
            }
        }
        if let Err(err) = context.close().await {
            warn!("failed to close context launched after destroy: {err}");
        }
        Err(StartError::Destroyed)
    }

    /// Stop starting once the session is terminal. A context already adopted
    /// is closed by `destroy()`.
    fn ensure_live(&self) -> Result<(), StartError> {
        if self.state().is_terminal() {
            return Err(StartError::Destroyed);
        }
        Ok(())
    }

    /// Act on the phase the application is already in when listeners attach.
    async fn resume_phase(
        &self,
        page: &dyn Page,
        sink: &NotificationSink,
    ) -> Result<(), EngineError> {
        let phase = page.evaluate(bridge::CURRENT_PHASE, Value::Null).await?;
        let phase = phase.as_str().unwrap_or_default();

        if bridge::is_pairing_phase(phase) {
            {
                let mut session = self.lock();
                if session.state == SessionState::Initializing {
                    session.state = SessionState::AwaitingPairing;
                }
            }
            info!("device is not paired (phase {phase})");
            let current = page.evaluate(bridge::CURRENT_PAIRING_REF, Value::Null).await?;
            match Notification::pairing_ref(vec![current]) {
                Some(notification) => sink.send(notification),
                None => debug!("no pairing reference yet"),
            }
        } else if !phase.is_empty() {
            debug!("resuming paired session (phase {phase})");
            sink.send(Notification::Synced(true));
        }
        Ok(())
    }

    fn spawn_pump(self: &Arc<Self>, mut notifications: mpsc::UnboundedReceiver<Notification>) {
        let controller: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            while let Some(notification) = notifications.recv().await {
                let Some(controller) = controller.upgrade() else {
                    break;
                };
                controller.handle(notification).await;
            }
            debug!("notification pump stopped");
        });

        if let Some(previous) = self.lock_pump().replace(handle) {
            previous.abort();
        }
    }

    /// Apply one bridge notification.
    pub(crate) async fn handle(&self, notification: Notification) {
        let state = self.state();
        if state.is_terminal() {
            debug!("ignoring {notification:?} in state {state}");
            return;
        }

        match notification {
            Notification::PairingRefChanged(pairing_ref) => self.on_pairing_ref(pairing_ref).await,
            Notification::PhaseChanged(phase) => self.on_phase_changed(phase).await,
            Notification::Synced(_) => self.on_synced().await,
            Notification::Logout(reason) => self.disconnect(&reason).await,
            Notification::MessageAdded(raw) => {
                let message = Message::from_raw(raw);
                if message.from_me {
                    debug!("skipping own message {}", message.id);
                    return;
                }
                self.bus.emit(Event::Message(message)).await;
            }
            Notification::MessageCreated(raw) => {
                self.bus
                    .emit(Event::MessageCreated(Message::from_raw(raw)))
                    .await;
            }
        }
    }

    async fn on_pairing_ref(&self, pairing_ref: String) {
        let (exhausted, page) = {
            let mut session = self.lock();
            match session.state {
                SessionState::Initializing => session.state = SessionState::AwaitingPairing,
                SessionState::AwaitingPairing => {}
                other => {
                    debug!("ignoring pairing reference in state {other}");
                    return;
                }
            }

            if self.options.limits_qr() && session.qr_retries >= self.options.qr_max_retries {
                (true, None)
            } else {
                session.qr_retries += 1;
                (false, session.page.clone())
            }
        };

        if exhausted {
            warn!(
                "giving up after {} pairing code(s)",
                self.options.qr_max_retries
            );
            self.disconnect(reasons::QR_MAX_RETRIES).await;
            return;
        }
        let Some(page) = page else {
            return;
        };

        let derived = page
            .evaluate(bridge::DERIVE_PAIRING_STRING, Value::String(pairing_ref))
            .await;
        match derived {
            Ok(Value::String(code)) if !code.is_empty() => {
                if self.state().is_terminal() {
                    return;
                }
                self.bus.emit(Event::Qr(code)).await;
            }
            Ok(_) => warn!("bridge returned no pairing string"),
            Err(err) => warn!("failed to derive pairing string: {err}"),
        }
    }

    async fn on_phase_changed(&self, phase: String) {
        {
            let mut session = self.lock();
            let pairing = bridge::is_pairing_phase(&phase);
            match session.state {
                SessionState::Initializing if pairing => {
                    session.state = SessionState::AwaitingPairing
                }
                SessionState::AwaitingPairing if !pairing => session.state = SessionState::Syncing,
                _ => {}
            }
        }
        info!("app phase changed to {phase}");
        self.bus.emit(Event::StateChanged(phase)).await;
    }

    async fn on_synced(&self) {
        if self.synced_emitted.swap(true, Ordering::SeqCst) {
            debug!("duplicate synced notification ignored");
            return;
        }

        let (page, sink) = {
            let mut session = self.lock();
            if session.state.is_terminal() {
                debug!("synced notification after disconnect ignored");
                return;
            }
            session.state = SessionState::Syncing;
            (session.page.clone(), session.sink.clone())
        };

        if let (Some(page), Some(sink)) = (page, sink) {
            if let Err(err) = self
                .bootstrapper
                .ensure_bootstrapped(page.as_ref(), &sink)
                .await
            {
                warn!("store injection failed after sync: {err}");
            }
        }

        {
            let mut session = self.lock();
            if session.state.is_terminal() {
                return;
            }
            session.state = SessionState::Ready;
        }
        info!("session ready");
        self.bus.emit(Event::Authenticated).await;
        self.bus.emit(Event::Ready).await;
    }

    /// Move to `Disconnected` and announce it, once.
    async fn disconnect(&self, reason: &str) {
        {
            let mut session = self.lock();
            if session.state.is_terminal() {
                return;
            }
            session.state = SessionState::Disconnected;
        }
        info!("session disconnected: {reason}");
        self.bus.emit(Event::Disconnected(reason.to_string())).await;
    }

    /// Page with the message store injected, for request/response calls.
    pub(crate) async fn ensure_bootstrapped(&self) -> Result<Arc<dyn Page>, ClientError> {
        let (page, sink) = {
            let session = self.lock();
            match (session.page.clone(), session.sink.clone()) {
                (Some(page), Some(sink)) => (page, sink),
                _ => return Err(ClientError::NotInitialized),
            }
        };
        self.bootstrapper
            .ensure_bootstrapped(page.as_ref(), &sink)
            .await?;
        Ok(page)
    }

    /// Tear the session down. Safe in any state; every step is best-effort.
    pub async fn destroy(&self) {
        let (context, engine_started) = {
            let mut session = self.lock();
            session.state = SessionState::Disconnected;
            session.page = None;
            session.sink = None;
            (
                session.context.take(),
                std::mem::take(&mut session.engine_started),
            )
        };

        let mut failures = Vec::new();
        if let Some(context) = context {
            if let Err(err) = context.close().await {
                failures.push(format!("closing context: {err}"));
            }
        }
        if engine_started {
            if let Err(err) = self.engine.stop().await {
                failures.push(format!("stopping engine: {err}"));
            }
        }
        self.auth.destroy().await;

        if failures.is_empty() {
            info!("session destroyed");
        } else {
            warn!("session destroyed with errors: {}", failures.join("; "));
        }
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_pump(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.pump
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(pump) = self.lock_pump().take() {
            pump.abort();
        }
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("session", &*self.lock())
            .field("auth", &self.auth)
            .field("bus", &self.bus)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;

    use serde_json::json;
    use tempfile::TempDir;

    use crate::auth::LocalAuth;
    use crate::config::AUTOMATION_FLAG;
    use crate::engine::{MemoryContext, MemoryEngine, MemoryPage};

    struct Harness {
        engine: Arc<MemoryEngine>,
        controller: Arc<SessionController>,
        events: mpsc::UnboundedReceiver<Event>,
        _root: TempDir,
    }

    impl Harness {
        fn new(options: ClientOptions) -> Self {
            Self::with_context(options, Arc::new(MemoryContext::new()))
        }

        fn with_context(options: ClientOptions, context: Arc<MemoryContext>) -> Self {
            let root = tempfile::tempdir().unwrap();
            let auth = Arc::new(LocalAuth::new("test").with_data_path(root.path()));
            Self::build(options, context, auth, root)
        }

        fn build(
            options: ClientOptions,
            context: Arc<MemoryContext>,
            auth: Arc<dyn AuthStrategy>,
            root: TempDir,
        ) -> Self {
            let engine = Arc::new(MemoryEngine::with_context(context));
            let bus = EventBus::new();
            let events = bus.listen();
            let scripts = Arc::new(BridgeScripts {
                module_raid: "window.mR = {}".into(),
                ..BridgeScripts::default()
            });
            let controller = SessionController::new(options, engine.clone(), auth, scripts, bus);
            Self {
                engine,
                controller,
                events,
                _root: root,
            }
        }

        fn page(&self) -> Arc<MemoryPage> {
            self.engine.context().page(0).unwrap()
        }

        async fn next(&mut self) -> Event {
            tokio::time::timeout(Duration::from_secs(1), self.events.recv())
                .await
                .expect("timed out waiting for event")
                .expect("event bus closed")
        }

        async fn assert_quiet(&mut self) {
            tokio::time::sleep(Duration::from_millis(30)).await;
            assert!(self.events.try_recv().is_err());
        }
    }

    /// Profile-directory auth that counts `destroy` calls.
    #[derive(Debug)]
    struct CountingAuth {
        inner: LocalAuth,
        destroyed: AtomicUsize,
    }

    #[async_trait]
    impl AuthStrategy for CountingAuth {
        async fn create_context(
            &self,
            engine: &dyn BrowserEngine,
            options: ContextOptions,
        ) -> Result<Arc<dyn BrowserContext>, AuthError> {
            self.inner.create_context(engine, options).await
        }

        async fn destroy(&self) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn unpaired(page: &MemoryPage, pairing_ref: &str) {
        page.respond_with("AppState.state", json!("UNPAIRED"));
        page.respond_with("Conn.ref", json!(pairing_ref));
        page.respond_to("getADVSecretKey", |arg| {
            Ok(json!(format!("{},static,identity,adv,web", arg.as_str().unwrap_or_default())))
        });
    }

    #[tokio::test]
    async fn test_initialize_wires_up_page() {
        let h = Harness::new(ClientOptions::default().with_browser_arg("--mute-audio"));
        h.controller.initialize().await.unwrap();

        let launch = &h.engine.launches()[0];
        assert_eq!(launch.args, vec!["--mute-audio", AUTOMATION_FLAG]);
        assert!(launch.headless && launch.bypass_csp);

        let page = h.page();
        assert_eq!(page.url().as_deref(), Some("https://web.whatsapp.com/"));
        assert_eq!(page.init_scripts()[0], "window.mR = {}");
        assert_eq!(page.init_scripts()[1], bridge::STEALTH_INIT);
        assert_eq!(
            page.exposed_functions(),
            vec![
                host_fns::LOGOUT,
                host_fns::PAIRING_REF,
                host_fns::STATE_CHANGED,
                host_fns::SYNCED
            ]
        );
        assert_eq!(page.evaluation_count("ExposeAuthStore"), 1);
        assert_eq!(h.engine.context().page_count(), 1);
        assert_eq!(h.controller.state(), SessionState::Initializing);
    }

    #[tokio::test]
    async fn test_initialize_opens_page_when_context_has_none() {
        let h = Harness::with_context(
            ClientOptions::default(),
            Arc::new(MemoryContext::without_pages()),
        );
        h.controller.initialize().await.unwrap();
        assert_eq!(h.engine.context().page_count(), 1);
        assert!(h.page().url().is_some());
    }

    #[tokio::test]
    async fn test_second_initialize_is_rejected() {
        let h = Harness::new(ClientOptions::default());
        h.controller.initialize().await.unwrap();

        let err = h.controller.initialize().await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::AlreadyInitialized(SessionState::Initializing)
        ));
        assert_eq!(h.engine.launches().len(), 1);
    }

    #[tokio::test]
    async fn test_ready_timeout_is_returned() {
        let options = ClientOptions::default().with_ready_timeout(Duration::from_millis(250));
        let mut h = Harness::new(options);
        h.page().time_out_selectors();

        let err = h.controller.initialize().await.unwrap_err();
        assert!(matches!(err, ClientError::ReadyTimeout { timeout_ms: 250, .. }));
        assert_eq!(h.controller.state(), SessionState::Disconnected);
        h.assert_quiet().await;
    }

    #[tokio::test]
    async fn test_launch_failure_disconnects() {
        let mut h = Harness::new(ClientOptions::default());
        h.engine.fail_launch("browser binary not found");

        h.controller.initialize().await.unwrap();
        assert_eq!(h.next().await, Event::Disconnected("init_failed".into()));
        assert_eq!(h.controller.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_qr_retry_budget() {
        let mut h = Harness::new(ClientOptions::default().with_qr_max_retries(2));
        unpaired(&h.page(), "ref-1");

        h.controller.initialize().await.unwrap();
        assert_eq!(h.controller.state(), SessionState::AwaitingPairing);
        assert_eq!(h.next().await, Event::Qr("ref-1,static,identity,adv,web".into()));

        let page = h.page();
        page.invoke(host_fns::PAIRING_REF, vec![json!("ref-2")])
            .await
            .unwrap();
        assert_eq!(h.next().await, Event::Qr("ref-2,static,identity,adv,web".into()));

        page.invoke(host_fns::PAIRING_REF, vec![json!("ref-3")])
            .await
            .unwrap();
        assert_eq!(h.next().await, Event::Disconnected("qr_max_retries".into()));

        page.invoke(host_fns::PAIRING_REF, vec![json!("ref-4")])
            .await
            .unwrap();
        h.assert_quiet().await;
        assert_eq!(h.controller.state(), SessionState::Disconnected);
        assert_eq!(page.evaluation_count("getADVSecretKey"), 2);
    }

    #[tokio::test]
    async fn test_every_pairing_ref_emits_qr() {
        let mut h = Harness::new(ClientOptions::default());
        unpaired(&h.page(), "a");
        h.controller.initialize().await.unwrap();

        let page = h.page();
        for pairing_ref in ["b", "c", "d"] {
            page.invoke(host_fns::PAIRING_REF, vec![json!(pairing_ref)])
                .await
                .unwrap();
        }

        for expected in ["a", "b", "c", "d"] {
            match h.next().await {
                Event::Qr(code) => assert!(code.starts_with(&format!("{expected},"))),
                other => panic!("expected qr event, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_underivable_pairing_string_emits_nothing() {
        let mut h = Harness::new(ClientOptions::default().with_qr_max_retries(1));
        h.controller.initialize().await.unwrap();

        h.controller
            .handle(Notification::PairingRefChanged("ref".into()))
            .await;
        h.assert_quiet().await;
        assert_eq!(h.controller.state(), SessionState::AwaitingPairing);

        h.controller
            .handle(Notification::PairingRefChanged("ref".into()))
            .await;
        assert_eq!(h.next().await, Event::Disconnected("qr_max_retries".into()));
    }

    #[tokio::test]
    async fn test_synced_session_becomes_ready_once() {
        let mut h = Harness::new(ClientOptions::default());
        h.page().respond_with("AppState.state", json!("CONNECTED"));

        h.controller.initialize().await.unwrap();
        assert_eq!(h.next().await, Event::Authenticated);
        assert_eq!(h.next().await, Event::Ready);
        assert_eq!(h.controller.state(), SessionState::Ready);

        h.controller.handle(Notification::Synced(true)).await;
        h.page()
            .invoke(host_fns::SYNCED, vec![json!(true)])
            .await
            .unwrap();
        h.assert_quiet().await;

        assert_eq!(h.page().evaluation_count("ExposeStore"), 1);
        assert!(h
            .page()
            .exposed_functions()
            .contains(&host_fns::MESSAGE.to_string()));
    }

    #[tokio::test]
    async fn test_phase_changes_drive_state() {
        let mut h = Harness::new(ClientOptions::default());
        h.controller.initialize().await.unwrap();

        h.controller
            .handle(Notification::PhaseChanged("UNPAIRED".into()))
            .await;
        assert_eq!(h.next().await, Event::StateChanged("UNPAIRED".into()));
        assert_eq!(h.controller.state(), SessionState::AwaitingPairing);

        h.controller
            .handle(Notification::PhaseChanged("CONNECTED".into()))
            .await;
        assert_eq!(h.next().await, Event::StateChanged("CONNECTED".into()));
        assert_eq!(h.controller.state(), SessionState::Syncing);
    }

    #[tokio::test]
    async fn test_logout_disconnects_once() {
        let mut h = Harness::new(ClientOptions::default());
        h.controller.initialize().await.unwrap();

        h.page().invoke(host_fns::LOGOUT, vec![]).await.unwrap();
        assert_eq!(h.next().await, Event::Disconnected("LOGOUT".into()));

        h.controller
            .handle(Notification::Logout("LOGOUT".into()))
            .await;
        h.controller
            .handle(Notification::MessageCreated(json!({ "body": "late" })))
            .await;
        h.assert_quiet().await;
    }

    #[tokio::test]
    async fn test_messages_are_normalized_and_filtered() {
        let mut h = Harness::new(ClientOptions::default());
        h.controller.initialize().await.unwrap();

        let incoming = json!({
            "id": { "_serialized": "false_1@c.us_A", "fromMe": false, "remote": "1@c.us" },
            "body": "hi"
        });
        let own = json!({ "id": { "_serialized": "true_1@c.us_B", "fromMe": true }, "body": "yo" });

        h.controller
            .handle(Notification::MessageAdded(incoming))
            .await;
        h.controller
            .handle(Notification::MessageAdded(own.clone()))
            .await;
        h.controller.handle(Notification::MessageCreated(own)).await;

        match h.next().await {
            Event::Message(message) => {
                assert_eq!(message.body, "hi");
                assert_eq!(message.chat_id, "1@c.us");
            }
            other => panic!("expected message, got {other:?}"),
        }
        match h.next().await {
            Event::MessageCreated(message) => assert!(message.from_me),
            other => panic!("expected message_create, got {other:?}"),
        }
        h.assert_quiet().await;
    }

    #[tokio::test]
    async fn test_destroy_before_initialize() {
        let mut h = Harness::new(ClientOptions::default());
        h.controller.destroy().await;

        assert_eq!(h.controller.state(), SessionState::Disconnected);
        assert_eq!(h.engine.stop_count(), 0);
        assert!(matches!(
            h.controller.initialize().await,
            Err(ClientError::AlreadyInitialized(SessionState::Disconnected))
        ));
        h.assert_quiet().await;
    }

    #[tokio::test]
    async fn test_destroy_after_partial_initialize() {
        let h = Harness::new(ClientOptions::default());
        h.page().time_out_selectors();
        assert!(h.controller.initialize().await.is_err());

        h.controller.destroy().await;
        assert!(h.engine.context().is_closed());
        assert_eq!(h.engine.stop_count(), 1);

        h.controller.destroy().await;
        assert_eq!(h.engine.stop_count(), 1);
    }

    #[tokio::test]
    async fn test_destroy_during_launch_closes_late_context() {
        let mut h = Harness::new(ClientOptions::default());
        h.engine.delay_launch(Duration::from_millis(100));

        let controller = h.controller.clone();
        let init = tokio::spawn(async move { controller.initialize().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        h.controller.destroy().await;

        assert!(init.await.unwrap().is_ok());
        assert_eq!(h.controller.state(), SessionState::Disconnected);
        assert!(h.engine.context().is_closed());
        assert!(h.page().url().is_none());
        assert!(h.page().exposed_functions().is_empty());
        assert!(matches!(
            h.controller.ensure_bootstrapped().await,
            Err(ClientError::NotInitialized)
        ));
        h.assert_quiet().await;
    }

    #[tokio::test]
    async fn test_synced_after_destroy_stays_disconnected() {
        let mut h = Harness::new(ClientOptions::default());
        h.controller.initialize().await.unwrap();
        h.controller.destroy().await;

        h.controller.on_synced().await;
        assert_eq!(h.controller.state(), SessionState::Disconnected);
        assert_eq!(h.page().evaluation_count("ExposeStore"), 0);
        h.assert_quiet().await;
    }

    #[tokio::test]
    async fn test_destroy_steps_are_independent() {
        let root = tempfile::tempdir().unwrap();
        let auth = Arc::new(CountingAuth {
            inner: LocalAuth::new("test").with_data_path(root.path()),
            destroyed: AtomicUsize::new(0),
        });
        let h = Harness::build(
            ClientOptions::default(),
            Arc::new(MemoryContext::new()),
            auth.clone(),
            root,
        );
        h.controller.initialize().await.unwrap();

        h.engine.context().close().await.unwrap();
        h.controller.destroy().await;

        assert_eq!(h.controller.state(), SessionState::Disconnected);
        assert_eq!(h.engine.stop_count(), 1);
        assert_eq!(auth.destroyed.load(Ordering::SeqCst), 1);
    }
}
