//! Local action backend.
//!
//! Executes the small fixed set of primitive browser actions against a tab
//! through the [`TabHost`] capability. Every internal failure is caught at
//! the `execute` boundary and converted into a `StepResult`; nothing
//! propagates past it.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, warn};

use tabpilot_core::{BrowserConfig, Error, Result, StepResult, TabInfo};

use crate::host::TabHost;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// A fully resolved primitive action. `tab_id` is filled in by the resolver
/// from the active tab when the step omitted it; actions that require a tab
/// still fail with `tab-id-required` when none could be attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimitiveAction {
    Navigate {
        tab_id: Option<String>,
        url: String,
    },
    Click {
        tab_id: Option<String>,
        selector: String,
    },
    Fill {
        tab_id: Option<String>,
        selector: String,
        value: String,
    },
    EvaluateScript {
        tab_id: Option<String>,
        code: String,
    },
    TakeScreenshot {
        window_id: Option<String>,
    },
    /// Declared step kind outside the supported set; fails at execution with
    /// `unknown-action:<type>` instead of aborting plan parsing.
    Unknown {
        kind: String,
    },
}

pub struct LocalBackend {
    host: Arc<dyn TabHost>,
    selector_budget: Duration,
    navigate_budget: Duration,
}

impl LocalBackend {
    pub fn new(host: Arc<dyn TabHost>, config: &BrowserConfig) -> Self {
        Self::with_waits(
            host,
            Duration::from_millis(config.selector_timeout_ms),
            Duration::from_millis(config.navigate_timeout_ms),
        )
    }

    pub fn with_waits(
        host: Arc<dyn TabHost>,
        selector_budget: Duration,
        navigate_budget: Duration,
    ) -> Self {
        Self {
            host,
            selector_budget,
            navigate_budget,
        }
    }

    pub async fn list_tabs(&self) -> Result<Vec<TabInfo>> {
        self.host.list_tabs().await
    }

    pub async fn active_tab(&self) -> Option<String> {
        self.host.active_tab().await
    }

    /// Execute one primitive action. Never returns an error past this
    /// boundary; failures become `StepResult { success: false, error }`.
    pub async fn execute(&self, action: &PrimitiveAction) -> StepResult {
        match self.try_execute(action).await {
            Ok(value) => StepResult::ok(value),
            Err(e) => StepResult::err(e.to_string()),
        }
    }

    pub async fn try_execute(&self, action: &PrimitiveAction) -> Result<Value> {
        match action {
            PrimitiveAction::Navigate { tab_id, url } => self.navigate(tab_id.as_deref(), url).await,
            PrimitiveAction::Click { tab_id, selector } => {
                let tab = required_tab(tab_id)?;
                self.click(tab, selector).await
            }
            PrimitiveAction::Fill {
                tab_id,
                selector,
                value,
            } => {
                let tab = required_tab(tab_id)?;
                self.fill(tab, selector, value).await
            }
            PrimitiveAction::EvaluateScript { tab_id, code } => {
                let tab = required_tab(tab_id)?;
                self.evaluate(tab, code).await
            }
            PrimitiveAction::TakeScreenshot { window_id } => {
                let data = self.host.capture_screenshot(window_id.as_deref()).await?;
                Ok(json!({"data": format!("data:image/png;base64,{}", data)}))
            }
            PrimitiveAction::Unknown { kind } => Err(Error::UnknownAction(kind.clone())),
        }
    }

    /// Navigate falls back to the active tab; the settle wait is bounded and
    /// its expiry is non-fatal since the navigation may have partially
    /// completed.
    async fn navigate(&self, tab_id: Option<&str>, url: &str) -> Result<Value> {
        let tab = match tab_id {
            Some(t) => t.to_string(),
            None => self.host.active_tab().await.ok_or(Error::TabIdRequired)?,
        };
        self.host.navigate(&tab, url).await?;

        let deadline = tokio::time::Instant::now() + self.navigate_budget;
        loop {
            if self.host.is_ready(&tab).await.unwrap_or(false) {
                debug!(tab, url, "navigation settled");
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(tab, url, "navigation wait expired, continuing");
                break;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        Ok(Value::Null)
    }

    async fn click(&self, tab: &str, selector: &str) -> Result<Value> {
        self.wait_ready(tab).await;
        if !self.wait_for_selector(tab, selector).await? {
            return Err(Error::SelectorNotFound);
        }
        let resp = self
            .host
            .send_to_tab(tab, "click", json!({"selector": selector}))
            .await?;
        check_content_response(&resp)?;
        Ok(Value::Null)
    }

    async fn fill(&self, tab: &str, selector: &str, value: &str) -> Result<Value> {
        self.wait_ready(tab).await;
        if !self.wait_for_selector(tab, selector).await? {
            return Err(Error::SelectorNotFound);
        }
        let resp = self
            .host
            .send_to_tab(tab, "fill", json!({"selector": selector, "value": value}))
            .await?;
        check_content_response(&resp)?;
        Ok(Value::Null)
    }

    async fn evaluate(&self, tab: &str, code: &str) -> Result<Value> {
        let resp = self
            .host
            .send_to_tab(tab, "evaluate", json!({"code": code}))
            .await?;
        check_content_response(&resp)?;
        Ok(resp.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Bounded page-readiness wait shared by element actions. Best effort:
    /// a page that never reports ready still gets the element poll below.
    async fn wait_ready(&self, tab: &str) {
        let deadline = tokio::time::Instant::now() + self.navigate_budget;
        while tokio::time::Instant::now() < deadline {
            if self.host.is_ready(tab).await.unwrap_or(false) {
                return;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        debug!(tab, "page readiness wait expired");
    }

    /// Poll the page for a selector up to the budget. First match wins;
    /// false on expiry, never blocks indefinitely.
    async fn wait_for_selector(&self, tab: &str, selector: &str) -> Result<bool> {
        let deadline = tokio::time::Instant::now() + self.selector_budget;
        loop {
            let resp = self
                .host
                .send_to_tab(tab, "exists", json!({"selector": selector}))
                .await?;
            if resp.get("found").and_then(Value::as_bool).unwrap_or(false) {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

fn required_tab(tab_id: &Option<String>) -> Result<&str> {
    tab_id.as_deref().ok_or(Error::TabIdRequired)
}

/// Map a structured content response onto the error taxonomy.
fn check_content_response(resp: &Value) -> Result<()> {
    if resp.get("success").and_then(Value::as_bool).unwrap_or(true) {
        return Ok(());
    }
    Err(match resp.get("error").and_then(Value::as_str) {
        Some("unsupported-element") => Error::UnsupportedElement,
        Some("selector-not-found") => Error::SelectorNotFound,
        Some(msg) => Error::Tool(msg.to_string()),
        None => Error::Tool("tab action failed".into()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Scripted page double: a set of present selectors, a readiness flag,
    /// and a log of content actions.
    #[derive(Default)]
    struct FakePage {
        selectors: Mutex<HashSet<String>>,
        ready: Mutex<bool>,
        unsupported: Mutex<HashSet<String>>,
        log: Mutex<Vec<(String, String, Value)>>,
        active: Option<String>,
    }

    impl FakePage {
        fn with_active(tab: &str) -> Self {
            Self {
                ready: Mutex::new(true),
                active: Some(tab.to_string()),
                ..Default::default()
            }
        }

        fn add_selector(&self, sel: &str) {
            self.selectors.lock().unwrap().insert(sel.to_string());
        }

        fn mark_unsupported(&self, sel: &str) {
            self.unsupported.lock().unwrap().insert(sel.to_string());
        }
    }

    #[async_trait]
    impl TabHost for FakePage {
        async fn navigate(&self, tab_id: &str, url: &str) -> Result<()> {
            self.log
                .lock()
                .unwrap()
                .push((tab_id.into(), "navigate".into(), json!({"url": url})));
            Ok(())
        }

        async fn is_ready(&self, _tab_id: &str) -> Result<bool> {
            Ok(*self.ready.lock().unwrap())
        }

        async fn list_tabs(&self) -> Result<Vec<TabInfo>> {
            Ok(vec![])
        }

        async fn send_to_tab(&self, tab_id: &str, action: &str, payload: Value) -> Result<Value> {
            self.log
                .lock()
                .unwrap()
                .push((tab_id.into(), action.into(), payload.clone()));
            let selector = payload
                .get("selector")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            match action {
                "exists" => {
                    let found = self.selectors.lock().unwrap().contains(&selector);
                    Ok(json!({"found": found}))
                }
                "click" => Ok(json!({"success": true})),
                "fill" => {
                    if self.unsupported.lock().unwrap().contains(&selector) {
                        Ok(json!({"success": false, "error": "unsupported-element"}))
                    } else {
                        Ok(json!({"success": true}))
                    }
                }
                "evaluate" => Ok(json!({"success": true, "result": 42})),
                other => Ok(json!({"success": false, "error": format!("bad action {other}")})),
            }
        }

        async fn capture_screenshot(&self, _window_id: Option<&str>) -> Result<String> {
            Ok("aGVsbG8=".to_string())
        }

        async fn active_tab(&self) -> Option<String> {
            self.active.clone()
        }
    }

    fn backend(page: Arc<FakePage>) -> LocalBackend {
        LocalBackend::with_waits(page, Duration::from_millis(500), Duration::from_millis(500))
    }

    #[tokio::test(start_paused = true)]
    async fn test_click_requires_tab_id() {
        let page = Arc::new(FakePage::with_active("1"));
        let result = backend(page)
            .execute(&PrimitiveAction::Click {
                tab_id: None,
                selector: ".btn".into(),
            })
            .await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("tab-id-required"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_action_kind() {
        let page = Arc::new(FakePage::with_active("1"));
        let result = backend(page)
            .execute(&PrimitiveAction::Unknown { kind: "HOVER".into() })
            .await;
        assert_eq!(result.error.as_deref(), Some("unknown-action:HOVER"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_click_selector_never_appears() {
        let page = Arc::new(FakePage::with_active("1"));
        let result = backend(page.clone())
            .execute(&PrimitiveAction::Click {
                tab_id: Some("1".into()),
                selector: ".btn".into(),
            })
            .await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("selector-not-found"));
        // The poll loop probed but never dispatched a click.
        let log = page.log.lock().unwrap();
        assert!(log.iter().all(|(_, action, _)| action != "click"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_click_present_selector() {
        let page = Arc::new(FakePage::with_active("1"));
        page.add_selector(".btn");
        let result = backend(page.clone())
            .execute(&PrimitiveAction::Click {
                tab_id: Some("1".into()),
                selector: ".btn".into(),
            })
            .await;
        assert!(result.success);
        let log = page.log.lock().unwrap();
        assert!(log
            .iter()
            .any(|(tab, action, _)| tab == "1" && action == "click"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fill_unsupported_element() {
        let page = Arc::new(FakePage::with_active("1"));
        page.add_selector("div.out");
        page.mark_unsupported("div.out");
        let result = backend(page)
            .execute(&PrimitiveAction::Fill {
                tab_id: Some("1".into()),
                selector: "div.out".into(),
                value: "x".into(),
            })
            .await;
        assert_eq!(result.error.as_deref(), Some("unsupported-element"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigate_uses_active_tab_and_settle_expiry_is_non_fatal() {
        let page = Arc::new(FakePage::with_active("7"));
        *page.ready.lock().unwrap() = false; // never settles
        let result = backend(page.clone())
            .execute(&PrimitiveAction::Navigate {
                tab_id: None,
                url: "https://example.com".into(),
            })
            .await;
        assert!(result.success);
        let log = page.log.lock().unwrap();
        assert_eq!(log[0].0, "7");
        assert_eq!(log[0].1, "navigate");
    }

    #[tokio::test(start_paused = true)]
    async fn test_evaluate_returns_value() {
        let page = Arc::new(FakePage::with_active("1"));
        let result = backend(page)
            .execute(&PrimitiveAction::EvaluateScript {
                tab_id: Some("1".into()),
                code: "6 * 7".into(),
            })
            .await;
        assert!(result.success);
        assert_eq!(result.result, Some(json!(42)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_screenshot_is_data_url() {
        let page = Arc::new(FakePage::with_active("1"));
        let result = backend(page)
            .execute(&PrimitiveAction::TakeScreenshot { window_id: None })
            .await;
        assert!(result.success);
        let data = result.result.unwrap();
        assert_eq!(data["data"], json!("data:image/png;base64,aGVsbG8="));
    }
}
