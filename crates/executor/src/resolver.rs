//! Step normalization.
//!
//! Planner output is loosely shaped: the tool name may sit under several
//! keys, nested in `params` or hoisted to the top level, and argument bags
//! arrive under several spellings. The resolver flattens all of that into
//! either a [`PrimitiveAction`] or a [`ResolvedCall`] before any dispatch
//! decision is made. Resolution is pure; it never talks to the browser or
//! the bridge.

use serde_json::{Map, Value};

use tabpilot_browser::PrimitiveAction;
use tabpilot_core::{ActionKind, Error, PlanStep, ResolvedCall, Result};

/// Accepted spellings of the tool name, in precedence order. `params`
/// entries are consulted before hoisted top-level ones.
const NAME_KEYS: [&str; 4] = ["tool", "toolName", "tool_name", "name"];

/// Accepted spellings of the nested argument bag.
const BAG_KEYS: [&str; 4] = ["arguments", "tool_params", "toolParams", "args"];

/// Scalars that planners often place beside the bag instead of inside it.
/// They overlay whatever the bag carried.
const OVERLAY_KEYS: [&str; 4] = ["url", "selector", "value", "code"];

/// A step after normalization: run locally or forward as a tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    Primitive(PrimitiveAction),
    ToolCall(ResolvedCall),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub action: Resolved,
    /// Set when the tool name was inferred from argument shape rather than
    /// stated by the planner.
    pub inferred: Option<String>,
}

/// Normalize one plan step. `active_tab` is attached to primitives that
/// omitted a tab id.
pub fn resolve(step: &PlanStep, active_tab: Option<&str>) -> Result<Resolution> {
    match &step.kind {
        ActionKind::CallTool => resolve_call(step),
        ActionKind::Navigate => {
            let url = step_str(step, "url").ok_or(Error::NavigateMissingUrl)?;
            Ok(primitive(PrimitiveAction::Navigate {
                tab_id: step_tab(step, active_tab),
                url: url.to_string(),
            }))
        }
        ActionKind::Click => {
            let selector = step_str(step, "selector")
                .ok_or_else(|| Error::Tool("click requires a selector".into()))?;
            Ok(primitive(PrimitiveAction::Click {
                tab_id: step_tab(step, active_tab),
                selector: selector.to_string(),
            }))
        }
        ActionKind::Fill => {
            let selector = step_str(step, "selector")
                .ok_or_else(|| Error::Tool("fill requires a selector".into()))?;
            // Planners use "text" and "value" interchangeably here.
            let value = step_str(step, "value")
                .or_else(|| step_str(step, "text"))
                .ok_or_else(|| Error::Tool("fill requires a value".into()))?;
            Ok(primitive(PrimitiveAction::Fill {
                tab_id: step_tab(step, active_tab),
                selector: selector.to_string(),
                value: value.to_string(),
            }))
        }
        ActionKind::EvaluateScript => {
            let code = step_str(step, "code")
                .ok_or_else(|| Error::Tool("evaluate_script requires code".into()))?;
            Ok(primitive(PrimitiveAction::EvaluateScript {
                tab_id: step_tab(step, active_tab),
                code: code.to_string(),
            }))
        }
        ActionKind::TakeScreenshot => Ok(primitive(PrimitiveAction::TakeScreenshot {
            window_id: id_string(step_value(step, "windowId").or_else(|| step_value(step, "window_id"))),
        })),
        ActionKind::Other(kind) => Ok(primitive(PrimitiveAction::Unknown { kind: kind.clone() })),
    }
}

fn resolve_call(step: &PlanStep) -> Result<Resolution> {
    let name = NAME_KEYS
        .iter()
        .find_map(|k| step.param_str(k))
        .or_else(|| NAME_KEYS.iter().find_map(|k| step.extra_str(k)));

    let mut arguments = merged_arguments(step);

    if let Some(name) = name {
        return Ok(Resolution {
            action: Resolved::ToolCall(ResolvedCall {
                tool: name.to_string(),
                arguments,
            }),
            inferred: None,
        });
    }

    // No name anywhere. Infer one from the parameter shape, most specific
    // first, so a {selector, value} pair reads as a fill rather than a
    // click on the same selector. The well-known scalars are overlaid into
    // the merged bag already; `text` is not one of them, so it is read from
    // the step directly as well as from any bag.
    let has = |k: &str| {
        arguments
            .get(k)
            .and_then(Value::as_str)
            .map_or(false, |s| !s.is_empty())
    };
    let has_selector = has("selector");
    let has_value = has("value");
    let has_url = has("url");
    let has_code = has("code");
    let text = arguments
        .get("text")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| step_str(step, "text").map(str::to_string));

    let tool = if has_selector && has_value {
        "extension_fill"
    } else if has_selector {
        "extension_click"
    } else if has_url {
        "navigate_page"
    } else if has_code {
        "extension_evaluate"
    } else if let Some(text) = text {
        // Bare text means "type this somewhere"; target a generic input
        // unless the planner said otherwise.
        arguments.remove("text");
        arguments.insert("value".to_string(), Value::String(text));
        arguments
            .entry("selector".to_string())
            .or_insert_with(|| Value::String("input".to_string()));
        "extension_fill"
    } else {
        return Err(Error::MissingToolName);
    };

    Ok(Resolution {
        action: Resolved::ToolCall(ResolvedCall {
            tool: tool.to_string(),
            arguments,
        }),
        inferred: Some(tool.to_string()),
    })
}

/// Merge every recognized argument bag, nested bags first so hoisted ones
/// win, then overlay the well-known scalars sitting beside the bags.
fn merged_arguments(step: &PlanStep) -> Map<String, Value> {
    let mut merged = Map::new();
    for key in BAG_KEYS {
        if let Some(bag) = step.params.get(key).and_then(Value::as_object) {
            for (k, v) in bag {
                merged.insert(k.clone(), v.clone());
            }
        }
    }
    for key in BAG_KEYS {
        if let Some(bag) = step.extra.get(key).and_then(Value::as_object) {
            for (k, v) in bag {
                merged.insert(k.clone(), v.clone());
            }
        }
    }
    for key in OVERLAY_KEYS {
        if let Some(v) = step.param_str(key) {
            merged.insert(key.to_string(), Value::String(v.to_string()));
        }
        if let Some(v) = step.extra_str(key) {
            merged.insert(key.to_string(), Value::String(v.to_string()));
        }
    }
    merged
}

fn primitive(action: PrimitiveAction) -> Resolution {
    Resolution {
        action: Resolved::Primitive(action),
        inferred: None,
    }
}

fn step_str<'a>(step: &'a PlanStep, key: &str) -> Option<&'a str> {
    step.param_str(key).or_else(|| step.extra_str(key))
}

fn step_value<'a>(step: &'a PlanStep, key: &str) -> Option<&'a Value> {
    step.params.get(key).or_else(|| step.extra.get(key))
}

/// Tab ids arrive as strings or numbers depending on the planner.
fn id_string(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn step_tab(step: &PlanStep, active_tab: Option<&str>) -> Option<String> {
    id_string(step_value(step, "tabId").or_else(|| step_value(step, "tab_id")))
        .or_else(|| active_tab.map(str::to_string))
}
