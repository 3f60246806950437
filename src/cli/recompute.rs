//! Recompute command - rescores every agent and prints the drift report

use agent_warden::db::Database;
use agent_warden::watchdog;
use std::path::Path;

pub async fn run(db_path: &str) -> anyhow::Result<()> {
    let db = Database::open(Path::new(db_path))?;
    let report = watchdog::run(&db)?;

    println!("🔄 Recompute complete");
    println!("─────────────────────");
    println!("Agents rescored: {}", report.agents_processed);
    println!("Red before/after: {} -> {}", report.red_before, report.red_after);

    if !report.bands.is_empty() {
        println!("\nBand distribution:");
        for (band, count) in &report.bands {
            println!("  {band}: {count}");
        }
    }

    if !report.new_red_agents.is_empty() {
        println!("\n🚨 Newly red:");
        for agent_id in &report.new_red_agents {
            println!("  {agent_id}");
        }
    }
    if !report.resolved_red_agents.is_empty() {
        println!("\n✅ No longer red:");
        for agent_id in &report.resolved_red_agents {
            println!("  {agent_id}");
        }
    }

    println!("\nRun id: {}", report.watchdog_run_id);

    Ok(())
}
