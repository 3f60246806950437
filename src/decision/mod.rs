//! Decision orchestration for one agent + action request:
//! derive signals, score, evaluate policy, reconcile the approval

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use crate::approvals;
use crate::config;
use crate::db::Database;
use crate::error::EngineError;
use crate::policy::{self, PolicyInput};
use crate::scoring;
use crate::signals;
use crate::{AgentRecord, ApprovalRecord, Decision, RiskBand, SignalContext};

#[derive(Debug, Clone, Default)]
pub struct DecisionRequest {
    pub agent_id: String,
    pub action: Option<String>,
    pub prompt: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub requested_by: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DecisionOutcome {
    pub agent_id: String,
    pub decision: Decision,
    pub approval: Option<ApprovalRecord>,
}

/// Full decision pipeline. Persists a fresh snapshot and score for the
/// agent as a side effect, so decisions always reflect current config.
pub fn check(db: &Database, request: &DecisionRequest) -> Result<DecisionOutcome, EngineError> {
    let agent = db
        .get_agent(&request.agent_id)?
        .ok_or_else(|| EngineError::NotFound(format!("agent {}", request.agent_id)))?;

    let rules = db.list_classification_rules()?;
    let audience = db.audience_map()?;
    let risk_config = config::load_risk_config(db)?;

    let derived = signals::derive_and_store(db, &agent, &rules, &audience)?;
    let outcome = scoring::score_and_store(db, &agent.agent_id, &derived.context, &risk_config)?;

    let action = request
        .action
        .clone()
        .unwrap_or_else(|| "unspecified".to_string());
    let action_policy = db.ensure_action_policy(&action, Utc::now())?;

    let mut decision = policy::evaluate(&PolicyInput {
        signals: &derived.context,
        dlp_template: derived.dlp_template.as_deref(),
        band: outcome.band,
        score: outcome.score,
        score_reasons: &outcome.reasons,
        action: Some(&action),
        action_policy: Some(&action_policy),
    });

    let requested_by = request.requested_by.as_deref().unwrap_or("sdk");
    let request_payload = json!({
        "prompt": request.prompt,
        "metadata": request.metadata.clone().unwrap_or_else(|| json!({})),
        "action": action,
    });

    let approval = approvals::reconcile(
        db,
        &agent.agent_id,
        &action,
        requested_by,
        &mut decision,
        request_payload,
    )?;

    debug!(
        "Decision for {}/{}: band={} score={} approval_required={} blocked={}",
        agent.agent_id,
        action,
        decision.risk_band,
        decision.risk_score,
        decision.approval_required,
        decision.blocked
    );

    Ok(DecisionOutcome {
        agent_id: agent.agent_id,
        decision,
        approval,
    })
}

/// Read-only governance state for one agent
#[derive(Debug, Clone, Serialize)]
pub struct GovernanceView {
    pub agent: AgentRecord,
    pub signals: SignalContext,
    pub band: RiskBand,
    pub score: i64,
    pub reasons: Vec<String>,
    pub approvals: Vec<ApprovalRecord>,
}

/// Current governance view without side effects. Prefers the stored
/// snapshot and score; an agent that was never scored gets an in-memory
/// derivation instead of an error.
pub fn governance_view(db: &Database, agent_id: &str) -> Result<GovernanceView, EngineError> {
    let agent = db
        .get_agent(agent_id)?
        .ok_or_else(|| EngineError::NotFound(format!("agent {agent_id}")))?;

    let snapshot = db.latest_snapshot(agent_id)?;
    let score_row = db.latest_score(agent_id)?;

    let (signals_ctx, band, score, reasons) = match (snapshot, score_row) {
        (Some(snapshot), Some(score_row)) => (
            snapshot.signals,
            score_row.band,
            score_row.score,
            score_row.reasons,
        ),
        (snapshot, _) => {
            let rules = db.list_classification_rules()?;
            let audience = db.audience_map()?;
            let risk_config = config::load_risk_config(db)?;
            let context = match snapshot {
                Some(s) => s.signals,
                None => signals::derive(&agent, &rules, &audience).context,
            };
            let outcome = scoring::score(&context, &risk_config);
            (context, outcome.band, outcome.score, outcome.reasons)
        }
    };

    let approvals = db.approvals_for_agent(agent_id, 10)?;

    Ok(GovernanceView {
        agent,
        signals: signals_ctx,
        band,
        score,
        reasons,
        approvals,
    })
}
