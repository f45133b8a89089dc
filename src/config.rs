use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::ProxySettings;

/// Flag that keeps the automation marker off `navigator`.
pub const AUTOMATION_FLAG: &str = "--disable-blink-features=AutomationControlled";

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Options applied when a client initializes its session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientOptions {
    /// Run the browsing context without a visible window.
    pub headless: bool,
    /// User agent presented to the web application.
    pub user_agent: String,
    /// Extra flags passed to the engine.
    pub browser_args: Vec<String>,
    /// Maximum pairing strings to emit; `0` means unlimited.
    pub qr_max_retries: u32,
    /// Disable content security policy so injected scripts can run.
    pub bypass_csp: bool,
    pub proxy: Option<ProxySettings>,
    /// Address of the web application.
    pub web_url: String,
    /// How long to wait for the application shell to render.
    pub ready_timeout_ms: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            headless: true,
            user_agent: DEFAULT_USER_AGENT.into(),
            browser_args: Vec::new(),
            qr_max_retries: 0,
            bypass_csp: true,
            proxy: None,
            web_url: "https://web.whatsapp.com/".into(),
            ready_timeout_ms: 60_000,
        }
    }
}

impl ClientOptions {
    /// Toggle headless mode.
    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Override the user agent string.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Append an engine flag.
    pub fn with_browser_arg(mut self, arg: impl Into<String>) -> Self {
        self.browser_args.push(arg.into());
        self
    }

    /// Cap the number of pairing strings emitted before giving up.
    pub fn with_qr_max_retries(mut self, retries: u32) -> Self {
        self.qr_max_retries = retries;
        self
    }

    pub fn with_bypass_csp(mut self, bypass: bool) -> Self {
        self.bypass_csp = bypass;
        self
    }

    /// Route the browsing context through a proxy.
    pub fn with_proxy(mut self, proxy: ProxySettings) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Override the web application address.
    pub fn with_web_url(mut self, url: impl Into<String>) -> Self {
        self.web_url = url.into();
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    /// Engine flags with the automation flag appended unless already present.
    pub fn launch_args(&self) -> Vec<String> {
        let mut args = self.browser_args.clone();
        if !args.iter().any(|arg| arg.contains("AutomationControlled")) {
            args.push(AUTOMATION_FLAG.to_string());
        }
        args
    }

    /// Whether pairing strings are capped.
    pub fn limits_qr(&self) -> bool {
        self.qr_max_retries > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ClientOptions::default();
        assert!(options.headless);
        assert!(options.bypass_csp);
        assert!(!options.limits_qr());
        assert_eq!(options.ready_timeout(), Duration::from_secs(60));
        assert!(options.user_agent.contains("Chrome/120"));
    }

    #[test]
    fn test_launch_args_append_automation_flag_once() {
        let options = ClientOptions::default().with_browser_arg("--no-sandbox");
        assert_eq!(options.launch_args(), vec!["--no-sandbox", AUTOMATION_FLAG]);

        let options = ClientOptions::default().with_browser_arg(AUTOMATION_FLAG);
        assert_eq!(options.launch_args(), vec![AUTOMATION_FLAG]);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let options: ClientOptions =
            serde_json::from_str(r#"{ "headless": false, "qr_max_retries": 3 }"#).unwrap();
        assert!(!options.headless);
        assert_eq!(options.qr_max_retries, 3);
        assert_eq!(options.web_url, "https://web.whatsapp.com/");
    }
}
