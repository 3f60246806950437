//! Approval lifecycle: one state machine reconciling the latest approval
//! for an (agent, action) pair against the agent's current band

use chrono::Utc;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::db::{self, Database};
use crate::error::EngineError;
use crate::{
    ActionPolicyRecord, ApprovalPayload, ApprovalRecord, ApprovalStatus, BandFlags, Decision,
    RiskBand,
};

const RISK_SHIFT_REASON: &str = "risk band changed";
const POLICY_EXPIRED_REASON: &str = "action policy changed";

/// What reconciliation decided for the pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcilePlan {
    /// No live approval; open a pending one if the decision gates
    OpenIfGated,
    /// A pending approval at the current band already exists
    KeepPending,
    /// A matching approval lifts the gate
    HonorApproved { decided_by: String },
    /// A rejection stands; the action stays blocked
    HonorRejected { decided_by: String },
    /// The stale record moves to risk_shift, then the pair reopens
    ShiftThenOpen { stale_id: String },
}

/// Pure transition function over the most recently requested approval.
/// Invalidated records (risk_shift, policy_expired) are history and
/// resolve the same as no approval at all.
pub fn plan(existing: Option<&ApprovalRecord>, current_band: RiskBand) -> ReconcilePlan {
    let Some(approval) = existing else {
        return ReconcilePlan::OpenIfGated;
    };
    let decider = || approval.decided_by.clone().unwrap_or_else(|| "admin".to_string());

    match approval.status {
        ApprovalStatus::Pending if approval.risk_band == current_band => ReconcilePlan::KeepPending,
        ApprovalStatus::Pending => ReconcilePlan::ShiftThenOpen {
            stale_id: approval.id.clone(),
        },
        ApprovalStatus::Approved if approval.risk_band == current_band => {
            ReconcilePlan::HonorApproved { decided_by: decider() }
        }
        ApprovalStatus::Approved => ReconcilePlan::ShiftThenOpen {
            stale_id: approval.id.clone(),
        },
        ApprovalStatus::Rejected => ReconcilePlan::HonorRejected { decided_by: decider() },
        ApprovalStatus::RiskShift | ApprovalStatus::PolicyExpired => ReconcilePlan::OpenIfGated,
    }
}

/// Run the state machine for one decision request. The decision's gating
/// flags and reasons are updated to reflect approval state; the returned
/// record is the live approval for the pair, if any.
pub fn reconcile(
    db: &Database,
    agent_id: &str,
    action: &str,
    requested_by: &str,
    decision: &mut Decision,
    request_payload: serde_json::Value,
) -> Result<Option<ApprovalRecord>, EngineError> {
    let existing = db.latest_approval_for(agent_id, action)?;

    match plan(existing.as_ref(), decision.risk_band) {
        ReconcilePlan::KeepPending => Ok(existing),
        ReconcilePlan::HonorApproved { decided_by } => {
            decision.approval_required = false;
            decision.blocked = false;
            decision.reasons.push(format!("approved_by={decided_by}"));
            Ok(existing)
        }
        ReconcilePlan::HonorRejected { decided_by } => {
            decision.blocked = true;
            decision.approval_required = false;
            decision.reasons.push(format!("rejected_by={decided_by}"));
            Ok(existing)
        }
        ReconcilePlan::ShiftThenOpen { stale_id } => {
            invalidate(db, &stale_id, ApprovalStatus::RiskShift, RISK_SHIFT_REASON)?;
            open_if_gated(db, agent_id, action, requested_by, decision, request_payload)
        }
        ReconcilePlan::OpenIfGated => {
            open_if_gated(db, agent_id, action, requested_by, decision, request_payload)
        }
    }
}

fn invalidate(
    db: &Database,
    id: &str,
    status: ApprovalStatus,
    reason: &str,
) -> Result<(), EngineError> {
    if let Some(approval) = db.get_approval(id)? {
        let mut payload = approval.payload;
        payload.expired_reason = Some(reason.to_string());
        db.set_approval_status(id, status, &payload)?;
        info!("Approval {} invalidated: {}", id, status);
    }
    Ok(())
}

fn open_if_gated(
    db: &Database,
    agent_id: &str,
    action: &str,
    requested_by: &str,
    decision: &Decision,
    request_payload: serde_json::Value,
) -> Result<Option<ApprovalRecord>, EngineError> {
    if !decision.approval_required && !decision.blocked {
        return Ok(None);
    }

    let approval = ApprovalRecord {
        id: Uuid::new_v4().to_string(),
        agent_id: agent_id.to_string(),
        action: action.to_string(),
        risk_band: decision.risk_band,
        status: ApprovalStatus::Pending,
        requested_by: requested_by.to_string(),
        requested_at: Utc::now(),
        decided_by: None,
        decided_at: None,
        payload: ApprovalPayload {
            request: request_payload,
            reasons: decision.reasons.clone(),
            violations: decision.violations.clone(),
            signals: Some(decision.signals.clone()),
            admin_note: None,
            expired_reason: None,
        },
    };

    match db.insert_approval(&approval) {
        Ok(()) => {
            info!(
                "🛡️ Opened pending approval {} for {}/{}",
                approval.id, agent_id, action
            );
            Ok(Some(approval))
        }
        Err(e) if db::is_unique_violation(&e) => Err(EngineError::Conflict(format!(
            "pending approval already open for {agent_id}/{action}"
        ))),
        Err(e) => Err(e.into()),
    }
}

/// Record a human decision on a pending approval
pub fn decide(
    db: &Database,
    approval_id: &str,
    status: ApprovalStatus,
    decided_by: &str,
    note: Option<String>,
) -> Result<ApprovalRecord, EngineError> {
    if !matches!(status, ApprovalStatus::Approved | ApprovalStatus::Rejected) {
        return Err(EngineError::Validation(format!(
            "decision status must be approved or rejected, got {status}"
        )));
    }

    let approval = db
        .get_approval(approval_id)?
        .ok_or_else(|| EngineError::NotFound(format!("approval {approval_id}")))?;
    if approval.status != ApprovalStatus::Pending {
        return Err(EngineError::AlreadyDecided(approval_id.to_string()));
    }

    let mut payload = approval.payload.clone();
    payload.admin_note = note;
    let decided_at = Utc::now();
    db.record_decision(approval_id, status, decided_by, decided_at, &payload)?;
    info!("✅ Approval {} {} by {}", approval_id, status, decided_by);

    Ok(ApprovalRecord {
        status,
        decided_by: Some(decided_by.to_string()),
        decided_at: Some(decided_at),
        payload,
        ..approval
    })
}

/// Partial edit to one action policy row
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionPolicyPatch {
    pub description: Option<String>,
    pub status: Option<String>,
    pub allow: Option<BandFlagsPatch>,
    pub approval: Option<BandFlagsPatch>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct BandFlagsPatch {
    pub green: Option<bool>,
    pub amber: Option<bool>,
    pub red: Option<bool>,
}

fn apply_flags(flags: &mut BandFlags, patch: &BandFlagsPatch) -> bool {
    let mut changed = false;
    if let Some(green) = patch.green {
        changed |= flags.green != green;
        flags.green = green;
    }
    if let Some(amber) = patch.amber {
        changed |= flags.amber != amber;
        flags.amber = amber;
    }
    if let Some(red) = patch.red {
        changed |= flags.red != red;
        flags.red = red;
    }
    changed
}

/// Apply a partial edit to an action policy. Any change to the row expires
/// the action's live approvals before the edit is saved, so no approval
/// granted under the old policy survives it. No-op patches change nothing.
pub fn update_action_policy(
    db: &Database,
    policy_id: i64,
    patch: &ActionPolicyPatch,
) -> Result<(ActionPolicyRecord, usize), EngineError> {
    let mut policy = db
        .get_action_policy(policy_id)?
        .ok_or_else(|| EngineError::NotFound(format!("action policy {policy_id}")))?;

    let mut changed = false;
    if let Some(description) = &patch.description {
        changed |= policy.description.as_deref() != Some(description);
        policy.description = Some(description.clone());
    }
    if let Some(status) = &patch.status {
        changed |= &policy.status != status;
        policy.status = status.clone();
    }
    if let Some(allow) = &patch.allow {
        changed |= apply_flags(&mut policy.allow, allow);
    }
    if let Some(approval) = &patch.approval {
        changed |= apply_flags(&mut policy.approval, approval);
    }

    let mut expired = 0;
    if changed {
        expired = expire_for_action(db, &policy.action_name)?;
        db.save_action_policy(&policy)?;
    }
    Ok((policy, expired))
}

/// Eagerly invalidate every live approval for an action whose policy
/// changed. Returns how many records moved to policy_expired.
pub fn expire_for_action(db: &Database, action: &str) -> Result<usize, EngineError> {
    let live = db.actionable_approvals_for_action(action)?;
    let count = live.len();
    for approval in live {
        let mut payload = approval.payload;
        payload.expired_reason = Some(POLICY_EXPIRED_REASON.to_string());
        db.set_approval_status(&approval.id, ApprovalStatus::PolicyExpired, &payload)?;
    }
    if count > 0 {
        info!("Expired {} approvals for action {}", count, action);
    }
    Ok(count)
}
