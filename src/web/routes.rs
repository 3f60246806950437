//! REST API routes

use super::AppState;
use crate::approvals::{self, ActionPolicyPatch};
use crate::config::{self, RiskConfig};
use crate::db::{self, Database};
use crate::decision::{self, DecisionRequest, GovernanceView};
use crate::error::EngineError;
use crate::ingest::{self, IngestStatus};
use crate::watchdog::{self, RecomputeReport};
use crate::{
    ActionPolicyRecord, ApprovalRecord, ApprovalStatus, AudienceRecord, CanonicalEvent,
    ClassificationRule, RiskBand, SignalContext,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path as StdPath;
use std::sync::Arc;

fn open_db(state: &AppState) -> Result<Database, StatusCode> {
    Database::open(StdPath::new(&state.db_path)).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

fn engine_status(err: &EngineError) -> StatusCode {
    match err {
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::AlreadyDecided(_) => StatusCode::CONFLICT,
        EngineError::Validation(_) => StatusCode::BAD_REQUEST,
        EngineError::Conflict(_) => StatusCode::CONFLICT,
        EngineError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ============================================================================
// Health
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub version: String,
    pub uptime_seconds: u64,
}

pub async fn get_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let uptime = chrono::Utc::now()
        .signed_duration_since(state.started_at)
        .num_seconds()
        .max(0) as u64;

    Json(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
    })
}

// ============================================================================
// Canonical ingest
// ============================================================================

#[derive(Serialize)]
pub struct IngestResponse {
    pub status: String,
    pub event_id: String,
}

pub async fn ingest_canonical(
    State(state): State<Arc<AppState>>,
    Json(event): Json<CanonicalEvent>,
) -> Result<Json<IngestResponse>, StatusCode> {
    let db = open_db(&state)?;
    let status = ingest::ingest(&db, &event).map_err(|e| engine_status(&e))?;

    Ok(Json(IngestResponse {
        status: match status {
            IngestStatus::Recorded => "ok".to_string(),
            IngestStatus::Duplicate => "duplicate".to_string(),
        },
        event_id: event.event_id,
    }))
}

// ============================================================================
// SDK decision surface
// ============================================================================

#[derive(Deserialize)]
pub struct CheckRequest {
    pub agent_id: String,
    pub action: Option<String>,
    pub prompt: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub requested_by: Option<String>,
}

#[derive(Serialize)]
pub struct CheckResponse {
    pub agent_id: String,
    pub risk_band: RiskBand,
    pub risk_score: i64,
    pub approval_required: bool,
    pub blocked: bool,
    pub system_header: String,
    pub reasons: Vec<String>,
    pub violations: Vec<String>,
    pub signals: SignalContext,
    pub approval_id: Option<String>,
    pub approval_status: Option<ApprovalStatus>,
}

pub async fn check_and_header(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CheckRequest>,
) -> Result<Json<CheckResponse>, StatusCode> {
    let db = open_db(&state)?;
    let request = DecisionRequest {
        agent_id: body.agent_id,
        action: body.action,
        prompt: body.prompt,
        metadata: body.metadata,
        requested_by: body.requested_by,
    };
    let outcome = decision::check(&db, &request).map_err(|e| engine_status(&e))?;

    let decision = outcome.decision;
    Ok(Json(CheckResponse {
        agent_id: outcome.agent_id,
        risk_band: decision.risk_band,
        risk_score: decision.risk_score,
        approval_required: decision.approval_required,
        blocked: decision.blocked,
        system_header: decision.system_header,
        reasons: decision.reasons,
        violations: decision.violations,
        signals: decision.signals,
        approval_id: outcome.approval.as_ref().map(|a| a.id.clone()),
        approval_status: outcome.approval.as_ref().map(|a| a.status),
    }))
}

// ============================================================================
// Approvals
// ============================================================================

#[derive(Deserialize)]
pub struct ApprovalsQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct ApprovalResponse {
    pub id: String,
    pub agent_id: String,
    pub action: String,
    pub risk_band: RiskBand,
    pub status: ApprovalStatus,
    pub requested_by: String,
    pub requested_at: String,
    pub decided_by: Option<String>,
    pub decided_at: Option<String>,
    pub violations: Vec<String>,
    pub reasons: Vec<String>,
    pub signals: Option<SignalContext>,
    pub request: serde_json::Value,
    pub admin_note: Option<String>,
}

impl From<ApprovalRecord> for ApprovalResponse {
    fn from(record: ApprovalRecord) -> Self {
        ApprovalResponse {
            id: record.id,
            agent_id: record.agent_id,
            action: record.action,
            risk_band: record.risk_band,
            status: record.status,
            requested_by: record.requested_by,
            requested_at: record.requested_at.to_rfc3339(),
            decided_by: record.decided_by,
            decided_at: record.decided_at.map(|t| t.to_rfc3339()),
            violations: record.payload.violations,
            reasons: record.payload.reasons,
            signals: record.payload.signals,
            request: record.payload.request,
            admin_note: record.payload.admin_note,
        }
    }
}

pub async fn list_approvals(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ApprovalsQuery>,
) -> Result<Json<Vec<ApprovalResponse>>, StatusCode> {
    let db = open_db(&state)?;

    // default view is the pending queue; an empty status means all
    let status = query.status.unwrap_or_else(|| "pending".to_string());
    let filter = if status.is_empty() {
        None
    } else {
        Some(status.parse().map_err(|_| StatusCode::BAD_REQUEST)?)
    };
    let limit = query.limit.unwrap_or(50);

    let approvals = db
        .list_approvals(filter, limit)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(approvals.into_iter().map(ApprovalResponse::from).collect()))
}

#[derive(Deserialize)]
pub struct ApprovalDecisionRequest {
    pub status: ApprovalStatus,
    pub decided_by: String,
    pub note: Option<String>,
}

pub async fn decide_approval(
    State(state): State<Arc<AppState>>,
    Path(approval_id): Path<String>,
    Json(body): Json<ApprovalDecisionRequest>,
) -> Result<Json<ApprovalResponse>, StatusCode> {
    let db = open_db(&state)?;
    let decided = approvals::decide(&db, &approval_id, body.status, &body.decided_by, body.note)
        .map_err(|e| engine_status(&e))?;
    Ok(Json(decided.into()))
}

// ============================================================================
// Metrics & recompute
// ============================================================================

#[derive(Serialize)]
pub struct MetricsResponse {
    pub canonical_total: i64,
    pub agents_total: i64,
    pub classification_rules: i64,
    pub action_policies: i64,
    pub watchdog_runs: i64,
    pub approvals: BTreeMap<String, i64>,
    pub risk_bands: BTreeMap<String, i64>,
}

pub async fn get_metrics(
    State(state): State<Arc<AppState>>,
) -> Result<Json<MetricsResponse>, StatusCode> {
    let db = open_db(&state)?;

    let mut approvals = BTreeMap::new();
    for (status, count) in db
        .approval_status_counts()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    {
        approvals.insert(status.to_string(), count);
    }

    let mut risk_bands = BTreeMap::new();
    for score in db
        .current_scores()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    {
        *risk_bands.entry(score.band.to_string()).or_insert(0i64) += 1;
    }

    Ok(Json(MetricsResponse {
        canonical_total: db.count_events().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?,
        agents_total: db.count_agents().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?,
        classification_rules: db
            .count_classification_rules()
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?,
        action_policies: db
            .count_action_policies()
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?,
        watchdog_runs: db
            .count_watchdog_runs()
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?,
        approvals,
        risk_bands,
    }))
}

pub async fn recompute_all(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RecomputeReport>, StatusCode> {
    let db = open_db(&state)?;
    let report = watchdog::run(&db).map_err(|e| engine_status(&e))?;
    Ok(Json(report))
}

// ============================================================================
// Policy configuration
// ============================================================================

#[derive(Deserialize)]
pub struct RiskConfigPayload {
    pub config: RiskConfig,
}

pub async fn get_risk_config(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RiskConfig>, StatusCode> {
    let db = open_db(&state)?;
    let config = config::load_risk_config(&db).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(config))
}

pub async fn put_risk_config(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RiskConfigPayload>,
) -> Result<Json<RiskConfig>, StatusCode> {
    payload.config.validate().map_err(|e| engine_status(&e))?;

    let db = open_db(&state)?;
    config::save_risk_config(&db, &payload.config)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(payload.config))
}

#[derive(Serialize, Deserialize)]
pub struct ClassificationsPayload {
    pub rules: Vec<ClassificationRule>,
    pub project_audience: Vec<AudienceRecord>,
}

#[derive(Serialize)]
pub struct ClassificationsUpdated {
    pub rules: Vec<ClassificationRule>,
    pub project_audience: Vec<AudienceRecord>,
    pub recompute: RecomputeReport,
}

pub async fn get_classifications(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ClassificationsPayload>, StatusCode> {
    let db = open_db(&state)?;
    Ok(Json(ClassificationsPayload {
        rules: db
            .list_classification_rules()
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?,
        project_audience: db.list_audience().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?,
    }))
}

/// Whole-set replace; every agent is rescored against the new rules
/// before the response returns.
pub async fn put_classifications(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ClassificationsPayload>,
) -> Result<Json<ClassificationsUpdated>, StatusCode> {
    let db = open_db(&state)?;
    db.replace_classifications(&payload.rules, &payload.project_audience)
        .map_err(|e| {
            if db::is_unique_violation(&e) {
                // duplicate selectors reject the payload as a whole
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        })?;

    let report = watchdog::run(&db).map_err(|e| engine_status(&e))?;

    Ok(Json(ClassificationsUpdated {
        rules: db
            .list_classification_rules()
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?,
        project_audience: db.list_audience().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?,
        recompute: report,
    }))
}

pub async fn list_action_policies(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ActionPolicyRecord>>, StatusCode> {
    let db = open_db(&state)?;
    let policies = db
        .list_action_policies()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(policies))
}

#[derive(Serialize)]
pub struct ActionPolicyUpdated {
    #[serde(flatten)]
    pub policy: ActionPolicyRecord,
    pub expired_approvals: usize,
}

pub async fn put_action_policy(
    State(state): State<Arc<AppState>>,
    Path(policy_id): Path<i64>,
    Json(patch): Json<ActionPolicyPatch>,
) -> Result<Json<ActionPolicyUpdated>, StatusCode> {
    let db = open_db(&state)?;
    let (policy, expired_approvals) = approvals::update_action_policy(&db, policy_id, &patch)
        .map_err(|e| engine_status(&e))?;
    Ok(Json(ActionPolicyUpdated {
        policy,
        expired_approvals,
    }))
}

pub async fn apply_policies(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RecomputeReport>, StatusCode> {
    let db = open_db(&state)?;
    let report = watchdog::run(&db).map_err(|e| engine_status(&e))?;
    Ok(Json(report))
}

// ============================================================================
// Governance views
// ============================================================================

#[derive(Serialize)]
pub struct AgentSummary {
    pub agent_id: String,
    pub platform: String,
    pub project_id: Option<String>,
    pub location: Option<String>,
    pub owner_email: Option<String>,
    pub data_class: String,
    pub autonomy: String,
    pub reach: Option<String>,
    pub risk_band: Option<RiskBand>,
    pub risk_score: Option<i64>,
    pub updated_at: String,
}

pub async fn list_agents(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<AgentSummary>>, StatusCode> {
    let db = open_db(&state)?;
    let agents = db.list_agents().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let mut summaries = Vec::with_capacity(agents.len());
    for agent in agents {
        let snapshot = db
            .latest_snapshot(&agent.agent_id)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let score = db
            .latest_score(&agent.agent_id)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        summaries.push(AgentSummary {
            agent_id: agent.agent_id,
            platform: agent.platform,
            project_id: agent.project_id,
            location: agent.location,
            owner_email: agent.owner_email,
            data_class: agent.data_class.to_string(),
            autonomy: agent.autonomy.to_string(),
            reach: snapshot.map(|s| s.signals.reach.to_string()),
            risk_band: score.as_ref().map(|s| s.band),
            risk_score: score.as_ref().map(|s| s.score),
            updated_at: agent.updated_at.to_rfc3339(),
        });
    }

    Ok(Json(summaries))
}

pub async fn get_governance(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
) -> Result<Json<GovernanceView>, StatusCode> {
    let db = open_db(&state)?;
    let view = decision::governance_view(&db, &agent_id).map_err(|e| engine_status(&e))?;
    Ok(Json(view))
}
