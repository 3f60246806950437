//! Agents command - lists governed agents with band and score

use agent_warden::db::Database;
use agent_warden::RiskBand;
use std::path::Path;

fn band_icon(band: RiskBand) -> &'static str {
    match band {
        RiskBand::Green => "🟢",
        RiskBand::Amber => "🟡",
        RiskBand::Red => "🔴",
    }
}

pub async fn run(db_path: &str) -> anyhow::Result<()> {
    let db = Database::open(Path::new(db_path))?;
    let agents = db.list_agents()?;
    if agents.is_empty() {
        println!("No agents registered yet. Ingest canonical events to discover some.");
        return Ok(());
    }

    println!("🤖 Governed Agents ({})", agents.len());
    println!("──────────────────────────────────────────────────────────");

    for agent in agents {
        let score = db.latest_score(&agent.agent_id)?;
        let (icon, summary) = match score {
            Some(s) => (band_icon(s.band), format!("{} ({})", s.band, s.score)),
            None => ("⚪", "unscored".to_string()),
        };

        println!(
            "{} {:<32} {:<10} {}",
            icon, agent.agent_id, agent.platform, summary
        );
    }

    Ok(())
}
