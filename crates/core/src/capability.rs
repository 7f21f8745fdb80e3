//! Capability seams shared across crates.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// The remote tool bridge as seen by the dispatch policy.
///
/// Implemented by the real WebSocket client and by test doubles; the
/// executor never constructs a connection itself.
#[async_trait]
pub trait ToolBridge: Send + Sync {
    /// Snapshot of connectivity; the policy refuses bridge-only work when
    /// this is false rather than queueing it.
    fn connected(&self) -> bool;

    /// Invoke a named remote tool. Exactly one outcome per call: result,
    /// remote error message, `mcp-timeout`, or `disconnected`.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value>;
}
