//! In-memory automation engine for development and testing.
//!
//! Nothing is rendered and no script actually runs: evaluations are recorded
//! and answered by responders registered per page, and exposed host
//! functions can be invoked directly to play the part of the injected
//! bridge scripts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::engine::{
    BrowserContext, BrowserEngine, Cookie, EngineError, HostFunction, LaunchOptions, Page,
    StorageState, WaitUntil,
};

/// Computes the result of an evaluation from its argument.
pub type Responder = Arc<dyn Fn(&Value) -> Result<Value, EngineError> + Send + Sync>;

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A recorded `evaluate` call.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub script: String,
    pub arg: Value,
}

/// Page that records every call made against it.
#[derive(Default)]
pub struct MemoryPage {
    url: Mutex<Option<String>>,
    init_scripts: Mutex<Vec<String>>,
    functions: Mutex<HashMap<String, HostFunction>>,
    evaluations: Mutex<Vec<Evaluation>>,
    responders: Mutex<Vec<(String, Responder)>>,
    selector_timeout: AtomicBool,
}

impl MemoryPage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer evaluations whose script contains `pattern` with `value`.
    pub fn respond_with(&self, pattern: impl Into<String>, value: Value) {
        self.respond_to(pattern, move |_| Ok(value.clone()));
    }

    /// Answer evaluations whose script contains `pattern` by calling `responder`.
    ///
    /// Later registrations win over earlier ones.
    pub fn respond_to<F>(&self, pattern: impl Into<String>, responder: F)
    where
        F: Fn(&Value) -> Result<Value, EngineError> + Send + Sync + 'static,
    {
        locked(&self.responders).push((pattern.into(), Arc::new(responder)));
    }

    /// Make evaluations whose script contains `pattern` fail.
    pub fn fail_evaluations(&self, pattern: impl Into<String>, message: impl Into<String>) {
        let message = message.into();
        self.respond_to(pattern, move |_| Err(EngineError::Evaluation(message.clone())));
    }

    /// Make every `wait_for_selector` call time out.
    pub fn time_out_selectors(&self) {
        self.selector_timeout.store(true, Ordering::SeqCst);
    }

    /// Last URL navigated to.
    pub fn url(&self) -> Option<String> {
        locked(&self.url).clone()
    }

    pub fn init_scripts(&self) -> Vec<String> {
        locked(&self.init_scripts).clone()
    }

    pub fn evaluations(&self) -> Vec<Evaluation> {
        locked(&self.evaluations).clone()
    }

    /// Number of evaluations whose script contains `needle`.
    pub fn evaluation_count(&self, needle: &str) -> usize {
        locked(&self.evaluations)
            .iter()
            .filter(|e| e.script.contains(needle))
            .count()
    }

    /// Names of exposed host functions, sorted.
    pub fn exposed_functions(&self) -> Vec<String> {
        let mut names: Vec<String> = locked(&self.functions).keys().cloned().collect();
        names.sort();
        names
    }

    /// Call an exposed host function as page script would.
    pub async fn invoke(&self, name: &str, args: Vec<Value>) -> Result<(), EngineError> {
        let function = locked(&self.functions)
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::Evaluation(format!("window.{name} is not a function")))?;
        function(args).await;
        Ok(())
    }

    fn responder_for(&self, script: &str) -> Option<Responder> {
        locked(&self.responders)
            .iter()
            .rev()
            .find(|(pattern, _)| script.contains(pattern.as_str()))
            .map(|(_, responder)| responder.clone())
    }
}

#[async_trait]
impl Page for MemoryPage {
    async fn add_init_script(&self, script: &str) -> Result<(), EngineError> {
        locked(&self.init_scripts).push(script.to_string());
        Ok(())
    }

    async fn goto(&self, url: &str, _wait_until: WaitUntil) -> Result<(), EngineError> {
        *locked(&self.url) = Some(url.to_string());
        Ok(())
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), EngineError> {
        if self.selector_timeout.load(Ordering::SeqCst) {
            return Err(EngineError::Timeout {
                what: selector.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        Ok(())
    }

    async fn expose_function(
        &self,
        name: &str,
        function: HostFunction,
    ) -> Result<(), EngineError> {
        let mut functions = locked(&self.functions);
        if functions.contains_key(name) {
            return Err(EngineError::FunctionExists(name.to_string()));
        }
        functions.insert(name.to_string(), function);
        Ok(())
    }

    async fn evaluate(&self, script: &str, arg: Value) -> Result<Value, EngineError> {
        locked(&self.evaluations).push(Evaluation {
            script: script.to_string(),
            arg: arg.clone(),
        });
        // Real engines suspend here; give concurrent callers a chance to interleave.
        tokio::task::yield_now().await;

        match self.responder_for(script) {
            Some(responder) => responder(&arg),
            None => Ok(Value::Null),
        }
    }
}

/// Browsing context holding pages, cookies and local storage in memory.
pub struct MemoryContext {
    pages: Mutex<Vec<Arc<MemoryPage>>>,
    state: Mutex<StorageState>,
    closed: AtomicBool,
    reject_cookies: AtomicBool,
}

impl MemoryContext {
    /// A context with a single blank page, like a freshly launched profile.
    pub fn new() -> Self {
        Self {
            pages: Mutex::new(vec![Arc::new(MemoryPage::new())]),
            state: Mutex::new(StorageState::default()),
            closed: AtomicBool::new(false),
            reject_cookies: AtomicBool::new(false),
        }
    }

    /// A context with no open pages.
    pub fn without_pages() -> Self {
        let context = Self::new();
        locked(&context.pages).clear();
        context
    }

    pub fn page(&self, index: usize) -> Option<Arc<MemoryPage>> {
        locked(&self.pages).get(index).cloned()
    }

    pub fn page_count(&self) -> usize {
        locked(&self.pages).len()
    }

    /// Open another page without going through the engine.
    pub fn open_page(&self) -> Arc<MemoryPage> {
        let page = Arc::new(MemoryPage::new());
        locked(&self.pages).push(page.clone());
        page
    }

    pub fn cookies(&self) -> Vec<Cookie> {
        locked(&self.state).cookies.clone()
    }

    pub fn seed_cookie(&self, cookie: Cookie) {
        merge_cookies(&mut locked(&self.state), vec![cookie]);
    }

    pub fn seed_local_storage(
        &self,
        origin: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) {
        locked(&self.state).set_local_storage(origin, name, value);
    }

    /// Make `add_cookies` fail.
    pub fn reject_cookies(&self) {
        self.reject_cookies.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.is_closed() {
            return Err(EngineError::Closed);
        }
        Ok(())
    }
}

impl Default for MemoryContext {
    fn default() -> Self {
        Self::new()
    }
}

fn merge_cookies(state: &mut StorageState, cookies: Vec<Cookie>) {
    for cookie in cookies {
        let key = cookie.key();
        match state.cookies.iter_mut().find(|c| c.key() == key) {
            Some(existing) => *existing = cookie,
            None => state.cookies.push(cookie),
        }
    }
}

#[async_trait]
impl BrowserContext for MemoryContext {
    fn pages(&self) -> Vec<Arc<dyn Page>> {
        locked(&self.pages)
            .iter()
            .map(|page| page.clone() as Arc<dyn Page>)
            .collect()
    }

    async fn new_page(&self) -> Result<Arc<dyn Page>, EngineError> {
        self.ensure_open()?;
        Ok(self.open_page())
    }

    async fn add_cookies(&self, cookies: Vec<Cookie>) -> Result<(), EngineError> {
        self.ensure_open()?;
        if self.reject_cookies.load(Ordering::SeqCst) {
            return Err(EngineError::Evaluation("cookie injection rejected".into()));
        }
        merge_cookies(&mut locked(&self.state), cookies);
        Ok(())
    }

    async fn storage_state(&self) -> Result<StorageState, EngineError> {
        self.ensure_open()?;
        Ok(locked(&self.state).clone())
    }

    async fn close(&self) -> Result<(), EngineError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(EngineError::Closed);
        }
        Ok(())
    }
}

/// Engine that hands out a single shared [`MemoryContext`].
pub struct MemoryEngine {
    context: Arc<MemoryContext>,
    launches: Mutex<Vec<LaunchOptions>>,
    launch_failure: Mutex<Option<String>>,
    launch_delay: Mutex<Option<Duration>>,
    stops: AtomicUsize,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::with_context(Arc::new(MemoryContext::new()))
    }

    pub fn with_context(context: Arc<MemoryContext>) -> Self {
        Self {
            context,
            launches: Mutex::new(Vec::new()),
            launch_failure: Mutex::new(None),
            launch_delay: Mutex::new(None),
            stops: AtomicUsize::new(0),
        }
    }

    /// The context returned by every launch.
    pub fn context(&self) -> Arc<MemoryContext> {
        self.context.clone()
    }

    /// Options of every launch so far.
    pub fn launches(&self) -> Vec<LaunchOptions> {
        locked(&self.launches).clone()
    }

    /// Make subsequent launches fail with `message`.
    pub fn fail_launch(&self, message: impl Into<String>) {
        *locked(&self.launch_failure) = Some(message.into());
    }

    /// Make subsequent launches take `delay` before they resolve.
    pub fn delay_launch(&self, delay: Duration) {
        *locked(&self.launch_delay) = Some(delay);
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrowserEngine for MemoryEngine {
    async fn launch_persistent_context(
        &self,
        options: LaunchOptions,
    ) -> Result<Arc<dyn BrowserContext>, EngineError> {
        let delay = *locked(&self.launch_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = locked(&self.launch_failure).clone() {
            return Err(EngineError::Launch(message));
        }
        locked(&self.launches).push(options);
        Ok(self.context.clone())
    }

    async fn stop(&self) -> Result<(), EngineError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_responders_match_by_substring() {
        let page = MemoryPage::new();
        page.respond_with("AppState.state", json!("UNPAIRED"));
        page.respond_to("Conn.ref", |_| Ok(json!("ref-1")));

        let phase = page
            .evaluate("() => window.AuthStore.AppState.state", Value::Null)
            .await
            .unwrap();
        assert_eq!(phase, json!("UNPAIRED"));
        assert_eq!(page.evaluate("() => 1", Value::Null).await.unwrap(), Value::Null);
        assert_eq!(page.evaluations().len(), 2);
    }

    #[tokio::test]
    async fn test_expose_function_rejects_duplicates() {
        let page = MemoryPage::new();
        let noop: HostFunction = Arc::new(|_args: Vec<Value>| async {}.boxed());

        page.expose_function("onQr", noop.clone()).await.unwrap();
        let err = page.expose_function("onQr", noop).await.unwrap_err();
        assert!(matches!(err, EngineError::FunctionExists(name) if name == "onQr"));
        assert!(page.invoke("missing", vec![]).await.is_err());
    }

    #[tokio::test]
    async fn test_closed_context_refuses_storage_access() {
        let context = MemoryContext::new();
        context.seed_cookie(Cookie::new("a", "1", ".example.com"));
        assert_eq!(context.storage_state().await.unwrap().cookies.len(), 1);

        context.close().await.unwrap();
        assert!(matches!(context.storage_state().await, Err(EngineError::Closed)));
        assert!(context.close().await.is_err());
    }
}
