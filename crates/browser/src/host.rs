//! The tab/page collaborator as a capability trait.
//!
//! The local backend depends on this surface and nothing else about the
//! browser, so tests run against a scripted double and production runs
//! against [`crate::chrome::CdpHost`].
//!
//! Content actions sent via [`TabHost::send_to_tab`] use a small structured
//! protocol; the callee always answers with a JSON object:
//!
//! - `"exists"  {selector}`        -> `{"found": bool}`
//! - `"click"   {selector}`        -> `{"success": bool, "error"?: string}`
//! - `"fill"    {selector, value}` -> `{"success": bool, "error"?: string}`
//! - `"evaluate" {code}`           -> `{"success": bool, "result"?: any, "error"?: string}`

use async_trait::async_trait;
use serde_json::Value;

use tabpilot_core::{Result, TabInfo};

#[async_trait]
pub trait TabHost: Send + Sync {
    /// Begin navigating a tab. Returns once the navigation is issued, not
    /// once the page settles.
    async fn navigate(&self, tab_id: &str, url: &str) -> Result<()>;

    /// Single non-blocking readiness probe for a tab's document.
    async fn is_ready(&self, tab_id: &str) -> Result<bool>;

    /// Enumerate currently open tabs.
    async fn list_tabs(&self) -> Result<Vec<TabInfo>>;

    /// Send a structured action to the page content and await its response.
    async fn send_to_tab(&self, tab_id: &str, action: &str, payload: Value) -> Result<Value>;

    /// Capture the visible tab as base64 PNG data.
    async fn capture_screenshot(&self, window_id: Option<&str>) -> Result<String>;

    /// The tab the user currently has selected, if known.
    async fn active_tab(&self) -> Option<String>;
}
