use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use base64::Engine;
use serde_json::Value;
use tracing::warn;

use tabpilot_bridge::BridgeClient;
use tabpilot_browser::{CdpHost, LocalBackend};
use tabpilot_core::{BridgeStatus, Config, Paths, Plan, ProgressEvent, ProgressStatus};
use tabpilot_executor::{Dispatcher, PlanExecutor, PlanObserver};

/// Execute a plan file end to end.
pub async fn run(
    plan_path: PathBuf,
    bridge_override: Option<String>,
    attach: Option<u16>,
    headed: bool,
) -> anyhow::Result<()> {
    let paths = Paths::new();
    let mut config = Config::load_or_default(&paths)?;
    if headed {
        config.browser.headed = true;
    }
    if bridge_override.is_some() {
        config.bridge.endpoint = bridge_override;
    }

    let plan = load_plan(&plan_path)
        .with_context(|| format!("loading plan {}", plan_path.display()))?;
    if plan.is_empty() {
        println!("Plan is empty, nothing to do.");
        return Ok(());
    }

    let host = match attach {
        Some(port) => Arc::new(CdpHost::attach(port).await?),
        None => Arc::new(CdpHost::launch(&config.browser, &paths.browser_data_dir()).await?),
    };
    let backend = Arc::new(LocalBackend::new(host.clone(), &config.browser));

    let bridge = Arc::new(BridgeClient::new(&config.bridge));
    if let Some(endpoint) = config.bridge.endpoint.clone() {
        bridge.configure(Some(&endpoint)).await;
        wait_for_bridge(&bridge).await;
    }

    let media_dir = paths.media_dir();
    std::fs::create_dir_all(&media_dir)?;
    let observer = Arc::new(PrintObserver { media_dir });

    let executor = PlanExecutor::new(Dispatcher::new(backend, bridge), observer);
    let results = executor.run(&plan).await;
    host.close().await;

    let failed = results.iter().filter(|r| !r.success).count();
    println!(
        "\n{}/{} steps completed, {} failed",
        results.iter().filter(|r| r.success).count(),
        plan.len(),
        failed
    );
    if failed > 0 {
        bail!("plan halted after {} of {} steps", results.len(), plan.len());
    }
    Ok(())
}

/// Plan files are JSON by default; .yaml/.yml parses as YAML.
fn load_plan(path: &Path) -> anyhow::Result<Plan> {
    let raw = std::fs::read_to_string(path)?;
    let plan = match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => serde_yaml::from_str(&raw)?,
        _ => serde_json::from_str(&raw)?,
    };
    Ok(plan)
}

async fn wait_for_bridge(bridge: &BridgeClient) {
    let mut status = bridge.status();
    let settled = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if *status.borrow() == BridgeStatus::Connected {
                return;
            }
            if status.changed().await.is_err() {
                return;
            }
        }
    })
    .await;
    if settled.is_err() || !bridge.connected() {
        warn!("bridge not connected, remote tools will be refused");
    }
}

/// Prints per-step progress and saves screenshot payloads to the media dir.
struct PrintObserver {
    media_dir: PathBuf,
}

impl PlanObserver for PrintObserver {
    fn on_progress(&self, event: &ProgressEvent) {
        let label = event.step.kind.as_str();
        match event.status {
            ProgressStatus::Running => {
                println!("[{}] {} ...", event.index + 1, label);
            }
            ProgressStatus::Completed => {
                println!("[{}] {} done", event.index + 1, label);
                if let Some(result) = &event.result {
                    self.save_screenshot(result);
                }
            }
            ProgressStatus::Failed => {
                println!(
                    "[{}] {} FAILED: {}",
                    event.index + 1,
                    label,
                    event.error.as_deref().unwrap_or("unknown")
                );
            }
        }
    }

    fn on_inferred_tool(&self, index: usize, tool: &str) {
        println!("[{}] tool name inferred: {}", index + 1, tool);
    }
}

impl PrintObserver {
    fn save_screenshot(&self, result: &Value) {
        let Some(data_url) = result.get("data").and_then(Value::as_str) else {
            return;
        };
        let Some(encoded) = data_url.strip_prefix("data:image/png;base64,") else {
            return;
        };
        let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(encoded) else {
            warn!("screenshot payload is not valid base64");
            return;
        };
        let name = format!("shot-{}.png", chrono::Utc::now().format("%Y%m%d-%H%M%S"));
        let path = self.media_dir.join(name);
        match std::fs::write(&path, bytes) {
            Ok(()) => println!("    screenshot saved to {}", path.display()),
            Err(e) => warn!("failed to save screenshot: {}", e),
        }
    }
}
