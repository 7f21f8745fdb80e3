//! Plan data model.
//!
//! A plan is an ordered list of loosely-typed action descriptors produced by
//! the planning collaborator (an LLM). Steps are read-only inputs; everything
//! derived from them (resolved calls, results, progress events) is ephemeral
//! and recomputed per run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The closed set of step kinds the executor understands.
///
/// Planner output is not trusted: an unrecognized wire name deserializes to
/// `Other` and fails later with `unknown-action:<type>` instead of aborting
/// the whole plan parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    Navigate,
    Click,
    Fill,
    EvaluateScript,
    TakeScreenshot,
    CallTool,
    Other(String),
}

impl ActionKind {
    pub fn from_wire(s: &str) -> Self {
        match s {
            "NAVIGATE" => Self::Navigate,
            "CLICK" => Self::Click,
            "FILL" => Self::Fill,
            "EVALUATE_SCRIPT" => Self::EvaluateScript,
            "TAKE_SCREENSHOT" => Self::TakeScreenshot,
            "CALL_TOOL" => Self::CallTool,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Navigate => "NAVIGATE",
            Self::Click => "CLICK",
            Self::Fill => "FILL",
            Self::EvaluateScript => "EVALUATE_SCRIPT",
            Self::TakeScreenshot => "TAKE_SCREENSHOT",
            Self::CallTool => "CALL_TOOL",
            Self::Other(s) => s,
        }
    }
}

impl Serialize for ActionKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ActionKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from_wire(&s))
    }
}

/// One step of a plan: a declared kind plus a free-form parameter bag.
///
/// Planners emit several equivalent encodings (tool name nested in params or
/// hoisted to the top level, argument bags under different keys), so unknown
/// top-level keys are captured in `extra` for the resolver to inspect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PlanStep {
    pub fn new(kind: ActionKind, params: Map<String, Value>) -> Self {
        Self {
            kind,
            params,
            extra: Map::new(),
        }
    }

    /// Non-empty string value of a params key.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Non-empty string value of a top-level (hoisted) key.
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

/// Ordered, strictly linear sequence of steps.
pub type Plan = Vec<PlanStep>;

/// A normalized tool call derived from a `CALL_TOOL` step. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedCall {
    pub tool: String,
    pub arguments: Map<String, Value>,
}

/// Outcome of one attempted step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepResult {
    /// Successful step. A `Null` payload is recorded as no payload.
    pub fn ok(value: Value) -> Self {
        let result = match value {
            Value::Null => None,
            v => Some(v),
        };
        Self {
            success: true,
            result,
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Running,
    Completed,
    Failed,
}

/// Emitted once per step per status transition: one `Running`, then exactly
/// one of `Completed`/`Failed`. Consumed by an external listener, never
/// stored by the core.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub status: ProgressStatus,
    pub index: usize,
    pub step: PlanStep,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn running(index: usize, step: &PlanStep) -> Self {
        Self {
            status: ProgressStatus::Running,
            index,
            step: step.clone(),
            result: None,
            error: None,
            at: Utc::now(),
        }
    }

    pub fn completed(index: usize, step: &PlanStep, result: Option<Value>) -> Self {
        Self {
            status: ProgressStatus::Completed,
            index,
            step: step.clone(),
            result,
            error: None,
            at: Utc::now(),
        }
    }

    pub fn failed(index: usize, step: &PlanStep, error: String) -> Self {
        Self {
            status: ProgressStatus::Failed,
            index,
            step: step.clone(),
            result: None,
            error: Some(error),
            at: Utc::now(),
        }
    }
}

/// One open tab as reported by the tab/page collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabInfo {
    pub id: String,
    pub url: String,
    pub title: String,
    pub active: bool,
}

/// Connection state of the remote tool bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeStatus {
    Connecting,
    Connected,
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_kind_wire_roundtrip() {
        assert_eq!(ActionKind::from_wire("NAVIGATE"), ActionKind::Navigate);
        assert_eq!(ActionKind::from_wire("CALL_TOOL"), ActionKind::CallTool);
        assert_eq!(
            ActionKind::from_wire("TELEPORT"),
            ActionKind::Other("TELEPORT".into())
        );
        assert_eq!(ActionKind::EvaluateScript.as_str(), "EVALUATE_SCRIPT");
    }

    #[test]
    fn test_plan_step_captures_hoisted_keys() {
        let step: PlanStep = serde_json::from_value(json!({
            "type": "CALL_TOOL",
            "params": {"arguments": {"a": 1}},
            "toolName": "search_web"
        }))
        .unwrap();
        assert_eq!(step.kind, ActionKind::CallTool);
        assert_eq!(step.extra_str("toolName"), Some("search_web"));
        assert!(step.params.contains_key("arguments"));
    }

    #[test]
    fn test_plan_step_defaults_params() {
        let step: PlanStep = serde_json::from_value(json!({"type": "CLICK"})).unwrap();
        assert!(step.params.is_empty());
        assert!(step.extra.is_empty());
    }

    #[test]
    fn test_step_result_null_payload_dropped() {
        let r = StepResult::ok(Value::Null);
        assert!(r.success);
        assert!(r.result.is_none());

        let r = StepResult::ok(json!({"data": 1}));
        assert_eq!(r.result, Some(json!({"data": 1})));

        let r = StepResult::err("selector-not-found");
        assert!(!r.success);
        assert_eq!(r.error.as_deref(), Some("selector-not-found"));
    }

    #[test]
    fn test_unknown_kind_does_not_fail_plan_parse() {
        let plan: Plan = serde_json::from_value(json!([
            {"type": "NAVIGATE", "params": {"url": "https://example.com"}},
            {"type": "HOVER", "params": {}}
        ]))
        .unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[1].kind, ActionKind::Other("HOVER".into()));
    }
}
