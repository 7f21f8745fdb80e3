use tabpilot_browser::{CdpHost, TabHost};

/// List the open tabs of a running browser with remote debugging enabled.
pub async fn run(port: u16) -> anyhow::Result<()> {
    let host = CdpHost::attach(port)
        .await
        .map_err(|e| anyhow::anyhow!("no browser on CDP port {}: {}", port, e))?;

    let tabs = host.list_tabs().await?;
    if tabs.is_empty() {
        println!("No open tabs.");
        return Ok(());
    }
    for (i, tab) in tabs.iter().enumerate() {
        let marker = if tab.active { " [selected]" } else { "" };
        println!("{}: {} - {}{}", i, tab.url, tab.title, marker);
    }
    Ok(())
}
