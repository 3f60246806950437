use agent_warden::approvals::{self, ActionPolicyPatch, BandFlagsPatch};
use agent_warden::config::{self, RiskConfig};
use agent_warden::db::Database;
use agent_warden::decision::{self, DecisionRequest};
use agent_warden::{
    AgentRecord, ApprovalStatus, Autonomy, ClassificationRule, DataClass, RiskBand, ScopeToken,
    SelectorType,
};
use chrono::Utc;

fn setup_db() -> Database {
    Database::open_in_memory().unwrap()
}

/// Registers an agent that lands on the amber threshold under default
/// weights (internal 10 + api_external 30).
fn setup_amber_agent(db: &Database, agent_id: &str) {
    db.replace_classifications(
        &[ClassificationRule {
            id: 0,
            selector_type: SelectorType::Project,
            selector_value: "acme-ml-edge".to_string(),
            data_class: DataClass::Internal,
            default_output_scope: vec![ScopeToken::ApiExternal],
            required_dlp_template: None,
        }],
        &[],
    )
    .unwrap();

    db.insert_agent(&AgentRecord {
        agent_id: agent_id.to_string(),
        platform: "vertex".to_string(),
        project_id: Some("acme-ml-edge".to_string()),
        location: None,
        owner_email: None,
        data_class: DataClass::Internal,
        output_scope: vec![ScopeToken::InternalOnly],
        autonomy: Autonomy::Readonly,
        dlp_template: None,
        external_tools: Vec::new(),
        updated_at: Utc::now(),
    })
    .unwrap();
}

fn check(db: &Database, agent_id: &str, action: &str) -> decision::DecisionOutcome {
    decision::check(
        db,
        &DecisionRequest {
            agent_id: agent_id.to_string(),
            action: Some(action.to_string()),
            prompt: None,
            metadata: None,
            requested_by: Some("sdk".to_string()),
        },
    )
    .unwrap()
}

#[test]
fn integration_repeat_checks_reuse_one_pending_approval() {
    let db = setup_db();
    setup_amber_agent(&db, "vertex-poller-1");

    let first = check(&db, "vertex-poller-1", "agent.query");
    let second = check(&db, "vertex-poller-1", "agent.query");

    let first_id = first.approval.unwrap().id;
    let second_id = second.approval.unwrap().id;
    assert_eq!(first_id, second_id);
    assert_eq!(db.approvals_for_agent("vertex-poller-1", 10).unwrap().len(), 1);
}

#[test]
fn integration_band_shift_expires_and_reopens() {
    let db = setup_db();
    setup_amber_agent(&db, "vertex-poller-2");

    let first = check(&db, "vertex-poller-2", "agent.query");
    let stale_id = first.approval.unwrap().id;
    assert_eq!(first.decision.risk_band, RiskBand::Amber);

    // tighten thresholds so the same score now lands in red
    let mut tightened = RiskConfig::default();
    tightened.band_thresholds.red = 40;
    tightened.band_thresholds.amber = 20;
    config::save_risk_config(&db, &tightened).unwrap();

    let second = check(&db, "vertex-poller-2", "agent.query");
    assert_eq!(second.decision.risk_band, RiskBand::Red);

    let fresh = second.approval.unwrap();
    assert_ne!(fresh.id, stale_id);
    assert_eq!(fresh.status, ApprovalStatus::Pending);
    assert_eq!(fresh.risk_band, RiskBand::Red);

    let stale = db.get_approval(&stale_id).unwrap().unwrap();
    assert_eq!(stale.status, ApprovalStatus::RiskShift);
    assert_eq!(stale.payload.expired_reason.as_deref(), Some("risk band changed"));
}

#[test]
fn integration_stale_grant_does_not_carry_across_bands() {
    let db = setup_db();
    setup_amber_agent(&db, "vertex-poller-3");

    let first = check(&db, "vertex-poller-3", "agent.query");
    let approval = first.approval.unwrap();
    approvals::decide(&db, &approval.id, ApprovalStatus::Approved, "sec-lead", None).unwrap();

    // approval was granted at amber; the agent then drifts to red
    let mut tightened = RiskConfig::default();
    tightened.band_thresholds.red = 40;
    tightened.band_thresholds.amber = 20;
    config::save_risk_config(&db, &tightened).unwrap();

    let second = check(&db, "vertex-poller-3", "agent.query");
    assert!(second.decision.approval_required);
    let reopened = second.approval.unwrap();
    assert_eq!(reopened.status, ApprovalStatus::Pending);
    assert_ne!(reopened.id, approval.id);

    let shifted = db.get_approval(&approval.id).unwrap().unwrap();
    assert_eq!(shifted.status, ApprovalStatus::RiskShift);
}

#[test]
fn integration_policy_edit_expires_live_approvals() {
    let db = setup_db();
    setup_amber_agent(&db, "vertex-poller-4");

    let first = check(&db, "vertex-poller-4", "agent.predict");
    let approval_id = first.approval.unwrap().id;

    let policy = db.get_action_policy_by_name("agent.predict").unwrap().unwrap();
    let patch = ActionPolicyPatch {
        allow: Some(BandFlagsPatch {
            amber: Some(false),
            ..Default::default()
        }),
        ..Default::default()
    };
    let (updated, expired) = approvals::update_action_policy(&db, policy.id, &patch).unwrap();

    assert!(!updated.allow.amber);
    assert_eq!(expired, 1);

    let expired_record = db.get_approval(&approval_id).unwrap().unwrap();
    assert_eq!(expired_record.status, ApprovalStatus::PolicyExpired);
    assert_eq!(
        expired_record.payload.expired_reason.as_deref(),
        Some("action policy changed")
    );

    // expired history does not satisfy the gate; the next check reopens
    // and the tightened matrix now blocks amber outright
    let second = check(&db, "vertex-poller-4", "agent.predict");
    assert!(second.decision.blocked);
    let reopened = second.approval.unwrap();
    assert_ne!(reopened.id, approval_id);
    assert_eq!(reopened.status, ApprovalStatus::Pending);
}

#[test]
fn integration_noop_policy_patch_keeps_approvals_alive() {
    let db = setup_db();
    setup_amber_agent(&db, "vertex-poller-5");

    let first = check(&db, "vertex-poller-5", "agent.predict");
    let approval_id = first.approval.unwrap().id;

    let policy = db.get_action_policy_by_name("agent.predict").unwrap().unwrap();
    // same values the row already has
    let patch = ActionPolicyPatch {
        allow: Some(BandFlagsPatch {
            amber: Some(policy.allow.amber),
            ..Default::default()
        }),
        ..Default::default()
    };
    let (_, expired) = approvals::update_action_policy(&db, policy.id, &patch).unwrap();
    assert_eq!(expired, 0);

    let untouched = db.get_approval(&approval_id).unwrap().unwrap();
    assert_eq!(untouched.status, ApprovalStatus::Pending);
}

#[test]
fn integration_double_decision_conflicts() {
    let db = setup_db();
    setup_amber_agent(&db, "vertex-poller-6");

    let first = check(&db, "vertex-poller-6", "agent.query");
    let approval_id = first.approval.unwrap().id;

    approvals::decide(&db, &approval_id, ApprovalStatus::Approved, "sec-lead", None).unwrap();
    let err = approvals::decide(&db, &approval_id, ApprovalStatus::Rejected, "sec-lead", None)
        .unwrap_err();
    assert!(matches!(err, agent_warden::error::EngineError::AlreadyDecided(_)));
}

#[test]
fn integration_decision_must_be_terminal_status() {
    let db = setup_db();
    setup_amber_agent(&db, "vertex-poller-7");

    let first = check(&db, "vertex-poller-7", "agent.query");
    let approval_id = first.approval.unwrap().id;

    let err = approvals::decide(&db, &approval_id, ApprovalStatus::Pending, "sec-lead", None)
        .unwrap_err();
    assert!(matches!(err, agent_warden::error::EngineError::Validation(_)));
}
