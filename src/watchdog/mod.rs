//! Full-population recompute: rebuild every snapshot and score, then
//! report band drift against the previous state

use std::collections::{BTreeMap, HashSet};

use chrono::Utc;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::config;
use crate::db::Database;
use crate::error::EngineError;
use crate::scoring;
use crate::signals;
use crate::WatchdogRunRecord;

/// Drift report returned to the recompute caller
#[derive(Debug, Clone, Serialize)]
pub struct RecomputeReport {
    pub agents_processed: i64,
    pub bands: BTreeMap<String, i64>,
    pub red_before: usize,
    pub red_after: usize,
    pub new_red_agents: Vec<String>,
    pub resolved_red_agents: Vec<String>,
    pub watchdog_run_id: String,
}

/// Wipe and rebuild all signal snapshots and risk scores in one immediate
/// transaction, so readers never observe a half-rebuilt population.
/// Idempotent for unchanged inputs.
pub fn run(db: &Database) -> Result<RecomputeReport, EngineError> {
    let started_at = Utc::now();
    let tx = db.begin()?;

    let red_before: HashSet<String> = db.red_agents()?.into_iter().collect();

    db.wipe_snapshots()?;
    db.wipe_scores()?;

    let rules = db.list_classification_rules()?;
    let audience = db.audience_map()?;
    let risk_config = config::load_risk_config(db)?;

    let agents = db.list_agents()?;
    for agent in &agents {
        let derived = signals::derive_and_store(db, agent, &rules, &audience)?;
        scoring::score_and_store(db, &agent.agent_id, &derived.context, &risk_config)?;
    }

    let red_after: HashSet<String> = db.red_agents()?.into_iter().collect();
    let mut new_red: Vec<String> = red_after.difference(&red_before).cloned().collect();
    new_red.sort();
    let mut resolved_red: Vec<String> = red_before.difference(&red_after).cloned().collect();
    resolved_red.sort();

    let mut bands = BTreeMap::new();
    for score in db.current_scores()? {
        *bands.entry(score.band.to_string()).or_insert(0i64) += 1;
    }

    let run = WatchdogRunRecord {
        id: Uuid::new_v4().to_string(),
        started_at,
        finished_at: Some(Utc::now()),
        rescored: agents.len() as i64,
        changes: (new_red.len() + resolved_red.len()) as i64,
        new_red: new_red.clone(),
        resolved_red: resolved_red.clone(),
    };
    db.insert_watchdog_run(&run)?;

    tx.commit()?;

    info!(
        "🔄 Watchdog rescored {} agents ({} band changes)",
        agents.len(),
        run.changes
    );

    Ok(RecomputeReport {
        agents_processed: agents.len() as i64,
        bands,
        red_before: red_before.len(),
        red_after: red_after.len(),
        new_red_agents: new_red,
        resolved_red_agents: resolved_red,
        watchdog_run_id: run.id,
    })
}
