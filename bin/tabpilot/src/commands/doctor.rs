use std::time::Duration;

use tabpilot_bridge::BridgeClient;
use tabpilot_browser::chrome::find_browser_binary;
use tabpilot_core::{BridgeStatus, Config, Paths};

/// Run environment diagnostics.
pub async fn run() -> anyhow::Result<()> {
    let paths = Paths::new();

    println!();
    println!("🩺 tabpilot doctor — Environment Diagnostics");
    println!("================================");
    println!();

    let mut warn_count = 0u32;
    let mut err_count = 0u32;

    println!("📋 Configuration");
    if paths.config_file().exists() {
        print_ok("Config file exists", &paths.config_file().display().to_string());
    } else {
        print_warn(
            "Config file not found",
            "Defaults will be used; create config.json to customize",
        );
        warn_count += 1;
    }
    let config = match Config::load_or_default(&paths) {
        Ok(c) => c,
        Err(e) => {
            print_err("Config unreadable", &e.to_string());
            return Err(e.into());
        }
    };
    println!();

    println!("🌐 Browser");
    match find_browser_binary(config.browser.binary.as_deref()) {
        Some(binary) => print_ok("Browser binary found", &binary),
        None => {
            print_err(
                "No Chrome/Chromium binary found",
                "Install Chrome or set browser.binary in config.json",
            );
            err_count += 1;
        }
    }
    let data_dir = paths.browser_data_dir();
    match std::fs::create_dir_all(&data_dir) {
        Ok(()) => print_ok("Profile directory writable", &data_dir.display().to_string()),
        Err(e) => {
            print_err("Profile directory not writable", &e.to_string());
            err_count += 1;
        }
    }
    println!();

    println!("🔌 Tool bridge");
    match &config.bridge.endpoint {
        None => {
            print_warn(
                "No bridge endpoint configured",
                "Remote tool calls will be refused",
            );
            warn_count += 1;
        }
        Some(endpoint) => {
            let bridge = BridgeClient::new(&config.bridge);
            bridge.configure(Some(endpoint)).await;
            let mut status = bridge.status();
            let reached = tokio::time::timeout(Duration::from_secs(3), async {
                loop {
                    if *status.borrow() == BridgeStatus::Connected {
                        return true;
                    }
                    if status.changed().await.is_err() {
                        return false;
                    }
                }
            })
            .await
            .unwrap_or(false);
            if reached {
                print_ok("Bridge reachable", endpoint);
            } else {
                print_err("Bridge unreachable", endpoint);
                err_count += 1;
            }
            bridge.configure(None).await;
        }
    }
    println!();

    if err_count == 0 && warn_count == 0 {
        println!("All checks passed.");
    } else {
        println!("{} error(s), {} warning(s)", err_count, warn_count);
    }
    Ok(())
}

fn print_ok(label: &str, detail: &str) {
    if detail.is_empty() {
        println!("  ✅ {}", label);
    } else {
        println!("  ✅ {} ({})", label, detail);
    }
}

fn print_warn(label: &str, detail: &str) {
    println!("  ⚠️  {}: {}", label, detail);
}

fn print_err(label: &str, detail: &str) {
    println!("  ❌ {}: {}", label, detail);
}
