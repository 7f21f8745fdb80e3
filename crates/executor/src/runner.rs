//! Sequential plan execution.
//!
//! Steps run strictly in order. Each step gets one `running` progress event
//! followed by exactly one of `completed` or `failed`; the first failure
//! halts the run, so the result list is a prefix of the plan.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use tabpilot_core::{PlanStep, ProgressEvent, StepResult};

use crate::policy::Dispatcher;
use crate::resolver::{resolve, Resolved};

/// Listener for per-step lifecycle. All hooks default to no-ops so callers
/// implement only what they observe.
pub trait PlanObserver: Send + Sync {
    fn on_progress(&self, _event: &ProgressEvent) {}

    /// Fired when a step's tool name had to be inferred from its arguments.
    fn on_inferred_tool(&self, _index: usize, _tool: &str) {}
}

/// Observer that discards everything.
pub struct NoopObserver;

impl PlanObserver for NoopObserver {}

pub struct PlanExecutor {
    dispatcher: Dispatcher,
    observer: Arc<dyn PlanObserver>,
}

impl PlanExecutor {
    pub fn new(dispatcher: Dispatcher, observer: Arc<dyn PlanObserver>) -> Self {
        Self {
            dispatcher,
            observer,
        }
    }

    /// Run a plan to completion or first failure. Returns one result per
    /// attempted step; unattempted steps have no entry.
    pub async fn run(&self, plan: &[PlanStep]) -> Vec<StepResult> {
        let run_id = Uuid::new_v4();
        info!(%run_id, steps = plan.len(), "plan run started");

        let mut results = Vec::with_capacity(plan.len());
        for (index, step) in plan.iter().enumerate() {
            self.emit(ProgressEvent::running(index, step));

            let result = self.run_step(index, step).await;
            let failed = !result.success;

            if failed {
                let error = result
                    .error
                    .clone()
                    .unwrap_or_else(|| "step failed".to_string());
                warn!(%run_id, index, %error, "step failed, halting plan");
                self.emit(ProgressEvent::failed(index, step, error));
            } else {
                self.emit(ProgressEvent::completed(index, step, result.result.clone()));
            }
            results.push(result);

            if failed {
                break;
            }
        }

        info!(%run_id, attempted = results.len(), "plan run finished");
        results
    }

    async fn run_step(&self, index: usize, step: &PlanStep) -> StepResult {
        let active = self.dispatcher.backend().active_tab().await;
        let resolution = match resolve(step, active.as_deref()) {
            Ok(r) => r,
            Err(e) => return StepResult::err(e.to_string()),
        };

        if let Some(tool) = &resolution.inferred {
            warn!(index, tool, "tool name inferred from argument shape");
            self.observer.on_inferred_tool(index, tool);
        }

        match &resolution.action {
            Resolved::Primitive(action) => self.dispatcher.backend().execute(action).await,
            Resolved::ToolCall(call) => self.dispatcher.dispatch_call(call).await,
        }
    }

    fn emit(&self, event: ProgressEvent) {
        self.observer.on_progress(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::Duration;

    use tabpilot_browser::{LocalBackend, TabHost};
    use tabpilot_core::{ProgressStatus, Result, TabInfo, ToolBridge};

    struct OfflineBridge;

    #[async_trait]
    impl ToolBridge for OfflineBridge {
        fn connected(&self) -> bool {
            false
        }

        async fn call_tool(&self, _name: &str, _arguments: Value) -> Result<Value> {
            Err(tabpilot_core::Error::BridgeNotConnected)
        }
    }

    struct FakeTabs {
        selectors: HashSet<String>,
        actions: Mutex<Vec<String>>,
    }

    impl FakeTabs {
        fn new(selectors: &[&str]) -> Self {
            Self {
                selectors: selectors.iter().map(|s| s.to_string()).collect(),
                actions: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TabHost for FakeTabs {
        async fn navigate(&self, _tab_id: &str, url: &str) -> Result<()> {
            self.actions.lock().unwrap().push(format!("navigate {url}"));
            Ok(())
        }

        async fn is_ready(&self, _tab_id: &str) -> Result<bool> {
            Ok(true)
        }

        async fn list_tabs(&self) -> Result<Vec<TabInfo>> {
            Ok(vec![])
        }

        async fn send_to_tab(&self, _tab_id: &str, action: &str, payload: Value) -> Result<Value> {
            self.actions.lock().unwrap().push(action.to_string());
            match action {
                "exists" => {
                    let sel = payload["selector"].as_str().unwrap_or_default();
                    Ok(json!({"found": self.selectors.contains(sel)}))
                }
                _ => Ok(json!({"success": true})),
            }
        }

        async fn capture_screenshot(&self, _window_id: Option<&str>) -> Result<String> {
            Ok("cGl4ZWxz".into())
        }

        async fn active_tab(&self) -> Option<String> {
            Some("1".into())
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(ProgressStatus, usize)>>,
        inferred: Mutex<Vec<(usize, String)>>,
    }

    impl PlanObserver for Recorder {
        fn on_progress(&self, event: &ProgressEvent) {
            self.events
                .lock()
                .unwrap()
                .push((event.status, event.index));
        }

        fn on_inferred_tool(&self, index: usize, tool: &str) {
            self.inferred.lock().unwrap().push((index, tool.to_string()));
        }
    }

    fn executor(tabs: Arc<FakeTabs>, observer: Arc<Recorder>) -> PlanExecutor {
        let backend = Arc::new(LocalBackend::with_waits(
            tabs,
            Duration::from_millis(200),
            Duration::from_millis(200),
        ));
        PlanExecutor::new(
            Dispatcher::new(backend, Arc::new(OfflineBridge)),
            observer,
        )
    }

    fn plan(value: Value) -> Vec<PlanStep> {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_steps_succeed_in_order() {
        let tabs = Arc::new(FakeTabs::new(&[".btn"]));
        let observer = Arc::new(Recorder::default());
        let results = executor(tabs.clone(), observer.clone())
            .run(&plan(json!([
                {"type": "NAVIGATE", "params": {"url": "https://example.com"}},
                {"type": "CLICK", "params": {"selector": ".btn"}}
            ])))
            .await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.success));
        assert_eq!(
            *observer.events.lock().unwrap(),
            vec![
                (ProgressStatus::Running, 0),
                (ProgressStatus::Completed, 0),
                (ProgressStatus::Running, 1),
                (ProgressStatus::Completed, 1),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_halts_before_later_steps() {
        let tabs = Arc::new(FakeTabs::new(&[]));
        let observer = Arc::new(Recorder::default());
        let results = executor(tabs.clone(), observer.clone())
            .run(&plan(json!([
                {"type": "NAVIGATE", "params": {"url": "https://example.com"}},
                {"type": "CLICK", "params": {"selector": ".btn"}},
                {"type": "NAVIGATE", "params": {"url": "https://never.example"}}
            ])))
            .await;

        // One result per attempted step, none for the step after the failure.
        assert_eq!(results.len(), 2);
        assert!(results[0].success);
        assert_eq!(results[1].error.as_deref(), Some("selector-not-found"));

        let actions = tabs.actions.lock().unwrap();
        assert!(!actions.iter().any(|a| a == "navigate https://never.example"));

        assert_eq!(
            *observer.events.lock().unwrap(),
            vec![
                (ProgressStatus::Running, 0),
                (ProgressStatus::Completed, 0),
                (ProgressStatus::Running, 1),
                (ProgressStatus::Failed, 1),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolution_failure_is_a_step_failure() {
        let tabs = Arc::new(FakeTabs::new(&[]));
        let observer = Arc::new(Recorder::default());
        let results = executor(tabs, observer)
            .run(&plan(json!([{"type": "CALL_TOOL", "params": {}}])))
            .await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].error.as_deref(), Some("call-tool-missing-name"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_inferred_tool_is_reported() {
        let tabs = Arc::new(FakeTabs::new(&["#q"]));
        let observer = Arc::new(Recorder::default());
        let results = executor(tabs, observer.clone())
            .run(&plan(json!([
                {"type": "CALL_TOOL", "params": {"selector": "#q", "value": "rust"}}
            ])))
            .await;
        assert!(results[0].success);
        assert_eq!(
            *observer.inferred.lock().unwrap(),
            vec![(0, "extension_fill".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_plan_yields_no_results() {
        let tabs = Arc::new(FakeTabs::new(&[]));
        let observer = Arc::new(Recorder::default());
        let results = executor(tabs, observer.clone()).run(&[]).await;
        assert!(results.is_empty());
        assert!(observer.events.lock().unwrap().is_empty());
    }
}
