//! Status command - pings a running server's health endpoint

use serde::Deserialize;

#[derive(Deserialize)]
struct Health {
    ok: bool,
    version: String,
    uptime_seconds: u64,
}

pub async fn run(port: u16) -> anyhow::Result<()> {
    println!("🛡️ Agent Warden Status");
    println!("─────────────────────");

    let url = format!("http://127.0.0.1:{port}/health");
    match reqwest::get(&url).await {
        Ok(response) if response.status().is_success() => {
            let health: Health = response.json().await?;
            if health.ok {
                println!("Status: 🟢 Running (v{})", health.version);
                println!("Uptime: {}s", health.uptime_seconds);
            } else {
                println!("Status: 🟡 Responding but unhealthy");
            }
        }
        Ok(response) => {
            println!("Status: 🟡 Unexpected response ({})", response.status());
        }
        Err(_) => {
            println!("Status: 🔴 Stopped");
            println!("\nRun 'agent-warden serve' to start the engine");
        }
    }

    Ok(())
}
