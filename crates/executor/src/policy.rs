//! Dispatch policy for resolved tool calls.
//!
//! Decides, per tool name, whether a call runs against the local browser or
//! is forwarded to the remote bridge. The policy also enforces the safety
//! rules around page lifecycle: a plan never opens a new window unless the
//! planner explicitly forced it while the bridge is connected, and it never
//! switches which tab the user is looking at.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use tabpilot_browser::{LocalBackend, PrimitiveAction};
use tabpilot_core::{Error, ResolvedCall, Result, StepResult, ToolBridge};

/// Coarse routing class of a tool name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolClass {
    /// Tab and window management; handled locally wherever possible.
    PageLifecycle,
    /// In-page primitives exposed under an `extension_` prefix.
    Extension,
    /// Anything else; the bridge owns it.
    Opaque,
}

pub fn classify(name: &str) -> ToolClass {
    if matches!(name, "new_page" | "navigate_page" | "list_pages" | "select_page")
        || name.starts_with("pages_")
    {
        ToolClass::PageLifecycle
    } else if name.starts_with("extension_") {
        ToolClass::Extension
    } else {
        ToolClass::Opaque
    }
}

pub struct Dispatcher {
    backend: Arc<LocalBackend>,
    bridge: Arc<dyn ToolBridge>,
}

impl Dispatcher {
    pub fn new(backend: Arc<LocalBackend>, bridge: Arc<dyn ToolBridge>) -> Self {
        Self { backend, bridge }
    }

    pub fn backend(&self) -> &Arc<LocalBackend> {
        &self.backend
    }

    /// Route one resolved call and fold the outcome into a step result.
    pub async fn dispatch_call(&self, call: &ResolvedCall) -> StepResult {
        match self.dispatch(call).await {
            Ok(value) => StepResult::ok(value),
            Err(e) => StepResult::err(e.to_string()),
        }
    }

    pub async fn dispatch(&self, call: &ResolvedCall) -> Result<Value> {
        let class = classify(&call.tool);
        debug!(tool = %call.tool, ?class, "dispatching tool call");
        match class {
            ToolClass::PageLifecycle => self.page_lifecycle(call).await,
            ToolClass::Extension => self.extension(call).await,
            ToolClass::Opaque => self.forward(call).await,
        }
    }

    async fn page_lifecycle(&self, call: &ResolvedCall) -> Result<Value> {
        let name = call.tool.as_str();
        if name == "new_page" {
            return self.new_page(call).await;
        }
        if name.contains("navigate") {
            let url = arg_str(call, "url").ok_or(Error::NavigateMissingUrl)?;
            return self.navigate_local(call, url).await;
        }
        if name.contains("list") {
            return self.list_pages().await;
        }
        if name.contains("select") {
            return self.select_page(call).await;
        }
        self.forward(call).await
    }

    /// New pages are refused unless the planner both supplied a destination
    /// and explicitly forced a new window while the bridge can host one.
    /// Everything else downgrades to navigating an existing tab.
    async fn new_page(&self, call: &ResolvedCall) -> Result<Value> {
        let url = arg_str(call, "url").ok_or(Error::NewPageWithoutUrl)?;
        let forced = truthy(call.arguments.get("forceNew"))
            || truthy(call.arguments.get("force_new"));
        if forced {
            if !self.bridge.connected() {
                return Err(Error::ForceNewBridgeOff);
            }
            return self.forward(call).await;
        }
        self.navigate_local(call, url).await
    }

    /// Selecting a page never switches the user's tab. The requested URL is
    /// loaded into the current tab instead.
    async fn select_page(&self, call: &ResolvedCall) -> Result<Value> {
        let url = arg_str(call, "url")
            .or_else(|| arg_str(call, "pageUrl"))
            .or_else(|| arg_str(call, "page"))
            .ok_or(Error::SelectPageMissingUrl)?;
        let tab = self.backend.active_tab().await;
        self.backend
            .try_execute(&PrimitiveAction::Navigate {
                tab_id: tab,
                url: url.to_string(),
            })
            .await
    }

    async fn navigate_local(&self, call: &ResolvedCall, url: &str) -> Result<Value> {
        self.backend
            .try_execute(&PrimitiveAction::Navigate {
                tab_id: arg_tab(call),
                url: url.to_string(),
            })
            .await
    }

    async fn list_pages(&self) -> Result<Value> {
        let tabs = self.backend.list_tabs().await?;
        let lines: Vec<String> = tabs
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let marker = if t.active { " [selected]" } else { "" };
                format!("{}: {} - {}{}", i, t.url, t.title, marker)
            })
            .collect();
        Ok(Value::String(lines.join("\n")))
    }

    /// Known `extension_` primitives run locally when their required
    /// arguments are present; anything else goes to the bridge untouched.
    async fn extension(&self, call: &ResolvedCall) -> Result<Value> {
        let name = call.tool.as_str();
        let tab = || arg_tab(call);

        if name.contains("select_page") {
            return self.select_page(call).await;
        }
        if name.contains("fill") {
            if let (Some(selector), Some(value)) = (arg_str(call, "selector"), arg_str(call, "value")) {
                return self
                    .backend
                    .try_execute(&PrimitiveAction::Fill {
                        tab_id: tab().or(self.backend.active_tab().await),
                        selector: selector.to_string(),
                        value: value.to_string(),
                    })
                    .await;
            }
        }
        if name.contains("click") {
            if let Some(selector) = arg_str(call, "selector") {
                return self
                    .backend
                    .try_execute(&PrimitiveAction::Click {
                        tab_id: tab().or(self.backend.active_tab().await),
                        selector: selector.to_string(),
                    })
                    .await;
            }
        }
        if name.contains("evaluate") {
            if let Some(code) = arg_str(call, "code") {
                return self
                    .backend
                    .try_execute(&PrimitiveAction::EvaluateScript {
                        tab_id: tab().or(self.backend.active_tab().await),
                        code: code.to_string(),
                    })
                    .await;
            }
        }
        if name.contains("screenshot") {
            return self
                .backend
                .try_execute(&PrimitiveAction::TakeScreenshot { window_id: tab() })
                .await;
        }
        self.forward(call).await
    }

    async fn forward(&self, call: &ResolvedCall) -> Result<Value> {
        if !self.bridge.connected() {
            return Err(Error::BridgeNotConnected);
        }
        let result = self
            .bridge
            .call_tool(&call.tool, Value::Object(call.arguments.clone()))
            .await?;
        if let Some(message) = tool_result_error(&result) {
            return Err(Error::Tool(message));
        }
        Ok(result)
    }
}

/// Detect an error-shaped tool result: either `isError` is set or the first
/// text content part reads like an error. Returns the best message found.
pub fn tool_result_error(result: &Value) -> Option<String> {
    let text = first_text(result);
    let flagged = result
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false)
        || text.map_or(false, |t| t.starts_with("Error"));
    if !flagged {
        return None;
    }
    let message = text
        .map(str::to_string)
        .or_else(|| match result.get("error") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => other
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
            None => None,
        })
        .or_else(|| {
            result
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| "tool call failed".to_string());
    Some(message)
}

fn first_text(result: &Value) -> Option<&str> {
    result
        .get("content")
        .and_then(Value::as_array)?
        .iter()
        .find(|part| part.get("type").and_then(Value::as_str) == Some("text"))
        .and_then(|part| part.get("text"))
        .and_then(Value::as_str)
}

fn arg_str<'a>(call: &'a ResolvedCall, key: &str) -> Option<&'a str> {
    call.arguments
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn arg_tab(call: &ResolvedCall) -> Option<String> {
    match call
        .arguments
        .get("tabId")
        .or_else(|| call.arguments.get("tab_id"))
    {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s == "true",
        Some(Value::Number(n)) => n.as_i64().map_or(false, |i| i != 0),
        _ => false,
    }
}
