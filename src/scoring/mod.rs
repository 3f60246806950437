//! Risk scoring: pure function of a signal snapshot and weight config

use chrono::Utc;

use crate::config::RiskConfig;
use crate::db::Database;
use crate::error::EngineError;
use crate::{Autonomy, DataClass, ReachBucket, RiskBand, SignalContext};

#[derive(Debug, Clone)]
pub struct ScoreOutcome {
    pub score: i64,
    pub band: RiskBand,
    pub reasons: Vec<String>,
}

/// Accumulate weighted contributions in fixed order: data class, output
/// scope, autonomy, reach, external tools. Each non-zero contribution
/// appends one reason, so the reason list reads as the score breakdown.
pub fn score(signals: &SignalContext, config: &RiskConfig) -> ScoreOutcome {
    let weights = &config.weights;
    let mut total = 0i64;
    let mut reasons = Vec::new();

    let class_weight = weights
        .data_class
        .get(&signals.data_class)
        .copied()
        .unwrap_or(0);
    total += class_weight;
    if class_weight != 0 {
        match signals.data_class {
            DataClass::Confidential => reasons.push("confidential data".to_string()),
            DataClass::Internal => reasons.push("internal data".to_string()),
            DataClass::Public => {}
        }
    }

    // Only the widest egress token present counts
    if let Some(top) = signals.output_scope.iter().max() {
        let scope_weight = weights.output_scope.get(top).copied().unwrap_or(0);
        total += scope_weight;
        if scope_weight != 0 {
            if top.is_egress() {
                reasons.push("external API egress enabled".to_string());
            } else {
                reasons.push("internal-only outputs".to_string());
            }
        }
    }

    let autonomy_weight = weights
        .autonomy
        .get(&signals.autonomy)
        .copied()
        .unwrap_or(0);
    total += autonomy_weight;
    if autonomy_weight != 0 {
        match signals.autonomy {
            Autonomy::AutoAction => reasons.push("autonomous actions enabled".to_string()),
            Autonomy::Readonly => reasons.push("read-only / human-in-loop".to_string()),
        }
    }

    let reach_weight = weights.reach.get(&signals.reach).copied().unwrap_or(0);
    total += reach_weight;
    if reach_weight != 0 {
        match signals.reach {
            ReachBucket::OrgWide => reasons.push("organisation-wide reach".to_string()),
            ReachBucket::Department => reasons.push("department-level reach".to_string()),
            ReachBucket::Team => reasons.push("team-level reach".to_string()),
            ReachBucket::Individual => {}
        }
    }

    let tool_weight = if signals.external_tools.is_empty() {
        weights.external_tools.none
    } else {
        weights.external_tools.has_tools
    };
    total += tool_weight;
    if tool_weight != 0 && !signals.external_tools.is_empty() {
        let listed: Vec<&str> = signals
            .external_tools
            .iter()
            .take(3)
            .map(String::as_str)
            .collect();
        reasons.push(format!("integrates external tools: {}", listed.join(", ")));
    }

    let score = total.min(config.score_ceiling);
    let thresholds = &config.band_thresholds;
    let band = if score >= thresholds.red {
        RiskBand::Red
    } else if score >= thresholds.amber {
        RiskBand::Amber
    } else {
        RiskBand::Green
    };

    ScoreOutcome {
        score,
        band,
        reasons,
    }
}

/// Score and append to the agent's score history
pub fn score_and_store(
    db: &Database,
    agent_id: &str,
    signals: &SignalContext,
    config: &RiskConfig,
) -> Result<ScoreOutcome, EngineError> {
    let outcome = score(signals, config);
    db.insert_score(agent_id, outcome.band, outcome.score, &outcome.reasons, Utc::now())?;
    Ok(outcome)
}
