//! Chrome launcher and the CDP-backed [`TabHost`].
//!
//! Launches (or attaches to) a Chrome/Chromium instance with remote
//! debugging enabled, discovers page targets over the HTTP endpoint, and
//! services the content-action protocol via Runtime.evaluate.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info};

use tabpilot_core::{BrowserConfig, Error, Result, TabInfo};

use crate::cdp::CdpClient;
use crate::host::TabHost;

/// TabHost over the Chrome DevTools Protocol. One CdpClient per page
/// target, connected lazily and cached.
pub struct CdpHost {
    debug_port: u16,
    clients: Mutex<HashMap<String, Arc<CdpClient>>>,
    child: Mutex<Option<Child>>,
}

impl CdpHost {
    /// Launch a browser with remote debugging and wait for CDP readiness.
    pub async fn launch(config: &BrowserConfig, user_data_dir: &Path) -> Result<Self> {
        let binary = find_browser_binary(config.binary.as_deref())
            .ok_or_else(|| Error::Config("no chrome/chromium binary found".into()))?;

        std::fs::create_dir_all(user_data_dir)?;
        let debug_port = find_free_port().await?;
        let args = browser_args(debug_port, user_data_dir, config.headed);

        info!(%binary, port = debug_port, headed = config.headed, "launching browser");
        let child = Command::new(&binary)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Config(format!("launch {}: {}", binary, e)))?;

        wait_for_cdp_ready(debug_port, 15).await?;

        Ok(Self {
            debug_port,
            clients: Mutex::new(HashMap::new()),
            child: Mutex::new(Some(child)),
        })
    }

    /// Attach to an already-running browser with `--remote-debugging-port`.
    pub async fn attach(debug_port: u16) -> Result<Self> {
        wait_for_cdp_ready(debug_port, 3).await?;
        Ok(Self {
            debug_port,
            clients: Mutex::new(HashMap::new()),
            child: Mutex::new(None),
        })
    }

    pub async fn close(&self) {
        self.clients.lock().await.clear();
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.kill().await;
        }
    }

    async fn client_for(&self, tab_id: &str) -> Result<Arc<CdpClient>> {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(tab_id) {
            return Ok(client.clone());
        }
        let ws_url = target_ws_url(self.debug_port, tab_id).await?;
        let client = Arc::new(CdpClient::connect(&ws_url).await?);
        client.enable_domain("Page").await?;
        client.enable_domain("Runtime").await?;
        debug!(tab = tab_id, "cdp client attached to page target");
        clients.insert(tab_id.to_string(), client.clone());
        Ok(client)
    }

    async fn first_page_target(&self) -> Option<String> {
        let targets = page_targets(self.debug_port).await.ok()?;
        targets
            .first()
            .and_then(|t| t.get("id").and_then(Value::as_str))
            .map(str::to_string)
    }
}

#[async_trait]
impl TabHost for CdpHost {
    async fn navigate(&self, tab_id: &str, url: &str) -> Result<()> {
        self.client_for(tab_id).await?.navigate(url).await
    }

    async fn is_ready(&self, tab_id: &str) -> Result<bool> {
        let client = self.client_for(tab_id).await?;
        let resp = client
            .evaluate("document.readyState === 'complete'")
            .await?;
        Ok(eval_value(&resp).as_bool().unwrap_or(false))
    }

    async fn list_tabs(&self) -> Result<Vec<TabInfo>> {
        let targets = page_targets(self.debug_port).await?;
        Ok(targets
            .iter()
            .enumerate()
            .map(|(i, t)| TabInfo {
                id: t.get("id").and_then(Value::as_str).unwrap_or("").to_string(),
                url: t.get("url").and_then(Value::as_str).unwrap_or("").to_string(),
                title: t
                    .get("title")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string(),
                // Chrome lists the frontmost page first.
                active: i == 0,
            })
            .collect())
    }

    async fn send_to_tab(&self, tab_id: &str, action: &str, payload: Value) -> Result<Value> {
        let client = self.client_for(tab_id).await?;
        let selector = payload
            .get("selector")
            .and_then(Value::as_str)
            .unwrap_or_default();

        match action {
            "exists" => {
                let js = format!("!!document.querySelector('{}')", escape_js(selector));
                let resp = client.evaluate(&js).await?;
                Ok(json!({"found": eval_value(&resp).as_bool().unwrap_or(false)}))
            }
            "click" => {
                let js = format!(
                    concat!(
                        "(function() {{ var el = document.querySelector('{}');",
                        " if (!el) return 'selector-not-found';",
                        " el.scrollIntoView({{block: 'center'}});",
                        " el.click(); return 'ok'; }})()"
                    ),
                    escape_js(selector)
                );
                let resp = client.evaluate(&js).await?;
                Ok(content_outcome(&resp))
            }
            "fill" => {
                let value = payload
                    .get("value")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let js = format!(
                    concat!(
                        "(function() {{ var el = document.querySelector('{}');",
                        " if (!el) return 'selector-not-found';",
                        " if (!('value' in el)) return 'unsupported-element';",
                        " el.focus(); el.value = '{}';",
                        " el.dispatchEvent(new Event('input', {{bubbles: true}}));",
                        " el.dispatchEvent(new Event('change', {{bubbles: true}}));",
                        " return 'ok'; }})()"
                    ),
                    escape_js(selector),
                    escape_js(value)
                );
                let resp = client.evaluate(&js).await?;
                Ok(content_outcome(&resp))
            }
            "evaluate" => {
                let code = payload.get("code").and_then(Value::as_str).unwrap_or("");
                let resp = client.evaluate(code).await?;
                if let Some(text) = resp
                    .get("exceptionDetails")
                    .map(|e| exception_message(e))
                {
                    Ok(json!({"success": false, "error": text}))
                } else {
                    Ok(json!({"success": true, "result": eval_value(&resp)}))
                }
            }
            other => Err(Error::Tool(format!("unsupported content action: {}", other))),
        }
    }

    async fn capture_screenshot(&self, window_id: Option<&str>) -> Result<String> {
        let tab = match window_id {
            Some(t) => t.to_string(),
            None => self
                .first_page_target()
                .await
                .ok_or_else(|| Error::Tool("no page target to capture".into()))?,
        };
        self.client_for(&tab).await?.screenshot().await
    }

    async fn active_tab(&self) -> Option<String> {
        self.first_page_target().await
    }
}

/// Extract result.value from a Runtime.evaluate response.
fn eval_value(resp: &Value) -> Value {
    resp.get("result")
        .and_then(|r| r.get("value"))
        .cloned()
        .unwrap_or(Value::Null)
}

/// Map the sentinel strings returned by the injected IIFEs onto the
/// structured content-response shape.
fn content_outcome(resp: &Value) -> Value {
    match eval_value(resp).as_str() {
        Some("ok") => json!({"success": true}),
        Some(err) => json!({"success": false, "error": err}),
        None => json!({"success": false, "error": "tab action failed"}),
    }
}

fn exception_message(details: &Value) -> String {
    details
        .get("exception")
        .and_then(|e| e.get("description"))
        .or_else(|| details.get("text"))
        .and_then(Value::as_str)
        .unwrap_or("script threw")
        .to_string()
}

fn escape_js(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Locate a Chrome/Chromium binary, honoring an explicit override.
pub fn find_browser_binary(explicit: Option<&str>) -> Option<String> {
    if let Some(path) = explicit {
        return Some(path.to_string());
    }
    let candidates: &[&str] = if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ]
    } else if cfg!(target_os = "linux") {
        &[
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
        ]
    } else {
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    };

    for candidate in candidates {
        if Path::new(candidate).exists() {
            return Some(candidate.to_string());
        }
        if !candidate.contains('/') && !candidate.contains('\\') && which::which(candidate).is_ok()
        {
            return Some(candidate.to_string());
        }
    }
    None
}

fn browser_args(debug_port: u16, user_data_dir: &Path, headed: bool) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", debug_port),
        format!("--user-data-dir={}", user_data_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-background-networking".to_string(),
        "--disable-extensions".to_string(),
        "--disable-sync".to_string(),
    ];
    if !headed {
        args.push("--headless=new".to_string());
    }
    args.push("--window-size=1280,720".to_string());
    args.push("about:blank".to_string());
    args
}

async fn find_free_port() -> Result<u16> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let port = listener
        .local_addr()
        .map_err(|e| Error::Config(format!("local addr: {}", e)))?
        .port();
    drop(listener);
    Ok(port)
}

/// Poll /json/version until the CDP HTTP endpoint answers.
async fn wait_for_cdp_ready(port: u16, timeout_secs: u64) -> Result<()> {
    let url = format!("http://127.0.0.1:{}/json/version", port);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_secs);
    loop {
        if reqwest::get(&url).await.is_ok() {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(Error::Config(format!(
                "cdp endpoint not ready on port {} after {}s",
                port, timeout_secs
            )));
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// Page-type targets from /json/list, in front-to-back order.
async fn page_targets(port: u16) -> Result<Vec<Value>> {
    let url = format!("http://127.0.0.1:{}/json/list", port);
    let targets: Vec<Value> = reqwest::get(&url)
        .await
        .map_err(|e| Error::Tool(format!("cdp list targets: {}", e)))?
        .json()
        .await
        .map_err(|e| Error::Tool(format!("cdp list targets: {}", e)))?;
    Ok(targets
        .into_iter()
        .filter(|t| t.get("type").and_then(Value::as_str) == Some("page"))
        .collect())
}

/// Resolve a target id to its debugger WebSocket URL. Retries briefly since
/// fresh targets may not be listed immediately.
async fn target_ws_url(port: u16, target_id: &str) -> Result<String> {
    for attempt in 0..10 {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        let targets = match page_targets(port).await {
            Ok(t) => t,
            Err(_) => continue,
        };
        for target in &targets {
            if target.get("id").and_then(Value::as_str) == Some(target_id) {
                if let Some(ws) = target.get("webSocketDebuggerUrl").and_then(Value::as_str) {
                    return Ok(ws.to_string());
                }
            }
        }
    }
    Err(Error::Tool(format!(
        "no debugger url for target '{}'",
        target_id
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_escape_js() {
        assert_eq!(escape_js("a'b"), "a\\'b");
        assert_eq!(escape_js(r"a\b"), r"a\\b");
    }

    #[test]
    fn test_content_outcome_mapping() {
        let ok = json!({"result": {"value": "ok"}});
        assert_eq!(content_outcome(&ok), json!({"success": true}));

        let missing = json!({"result": {"value": "selector-not-found"}});
        assert_eq!(
            content_outcome(&missing),
            json!({"success": false, "error": "selector-not-found"})
        );

        let odd = json!({"result": {}});
        assert_eq!(content_outcome(&odd)["success"], json!(false));
    }

    #[test]
    fn test_browser_args_headless_toggle() {
        let dir = PathBuf::from("/tmp/profile");
        let headless = browser_args(9222, &dir, false);
        assert!(headless.iter().any(|a| a == "--headless=new"));
        let headed = browser_args(9222, &dir, true);
        assert!(!headed.iter().any(|a| a == "--headless=new"));
    }

    #[test]
    fn test_eval_value_extraction() {
        let resp = json!({"result": {"value": 5}});
        assert_eq!(eval_value(&resp), json!(5));
        assert_eq!(eval_value(&json!({})), Value::Null);
    }
}
