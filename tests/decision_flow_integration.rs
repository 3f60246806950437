use agent_warden::db::Database;
use agent_warden::decision::{self, DecisionRequest};
use agent_warden::{
    AgentRecord, ApprovalStatus, AudienceRecord, Autonomy, ClassificationRule, DataClass,
    RiskBand, ScopeToken, SelectorType,
};
use chrono::Utc;

fn setup_db() -> Database {
    Database::open_in_memory().unwrap()
}

fn insert_agent(db: &Database, agent_id: &str, project: Option<&str>, autonomy: Autonomy) {
    let agent = AgentRecord {
        agent_id: agent_id.to_string(),
        platform: "vertex".to_string(),
        project_id: project.map(|p| p.to_string()),
        location: Some("europe-west1".to_string()),
        owner_email: Some("ml-team@acme.io".to_string()),
        data_class: DataClass::Internal,
        output_scope: vec![ScopeToken::InternalOnly],
        autonomy,
        dlp_template: None,
        external_tools: Vec::new(),
        updated_at: Utc::now(),
    };
    db.insert_agent(&agent).unwrap();
}

fn project_rule(project: &str, data_class: DataClass, scope: Vec<ScopeToken>) -> ClassificationRule {
    ClassificationRule {
        id: 0,
        selector_type: SelectorType::Project,
        selector_value: project.to_string(),
        data_class,
        default_output_scope: scope,
        required_dlp_template: None,
    }
}

fn check_request(agent_id: &str, action: &str) -> DecisionRequest {
    DecisionRequest {
        agent_id: agent_id.to_string(),
        action: Some(action.to_string()),
        prompt: Some("summarise quarterly revenue".to_string()),
        metadata: None,
        requested_by: Some("sdk".to_string()),
    }
}

#[test]
fn integration_red_autonomous_agent_is_blocked() {
    let db = setup_db();
    db.replace_classifications(
        &[project_rule(
            "acme-ml-prod",
            DataClass::Confidential,
            vec![ScopeToken::ApiExternal],
        )],
        &[AudienceRecord {
            project_id: "acme-ml-prod".to_string(),
            reach_count: 12500,
        }],
    )
    .unwrap();
    insert_agent(&db, "vertex-forecaster-9", Some("acme-ml-prod"), Autonomy::AutoAction);

    let outcome = decision::check(&db, &check_request("vertex-forecaster-9", "pipeline.run")).unwrap();
    let decision = &outcome.decision;

    // 40 + 30 + 20 + 20 = 110, clamped to the ceiling
    assert_eq!(decision.risk_score, 100);
    assert_eq!(decision.risk_band, RiskBand::Red);
    assert!(decision.blocked);
    assert!(decision.approval_required);
    assert!(decision
        .violations
        .contains(&"Confidential data with external API but no DLP template".to_string()));
    assert!(decision
        .violations
        .contains(&"Red-band autonomous agent is blocked for action".to_string()));

    // gated, so a pending approval was opened
    let approval = outcome.approval.unwrap();
    assert_eq!(approval.status, ApprovalStatus::Pending);
    assert_eq!(approval.risk_band, RiskBand::Red);
    assert_eq!(approval.requested_by, "sdk");

    // snapshot and score were persisted as side effects
    assert!(db.latest_snapshot("vertex-forecaster-9").unwrap().is_some());
    let stored = db.latest_score("vertex-forecaster-9").unwrap().unwrap();
    assert_eq!(stored.score, 100);
}

#[test]
fn integration_quiet_agent_is_allowed() {
    let db = setup_db();
    insert_agent(&db, "copilot-notes-summary", None, Autonomy::Readonly);

    let outcome = decision::check(&db, &check_request("copilot-notes-summary", "agent.query")).unwrap();
    let decision = &outcome.decision;

    assert_eq!(decision.risk_score, 10);
    assert_eq!(decision.risk_band, RiskBand::Green);
    assert!(!decision.blocked);
    assert!(!decision.approval_required);
    assert!(decision.violations.is_empty());
    assert!(outcome.approval.is_none());

    // two-line header: base instructions plus the internal-systems clause
    assert_eq!(decision.system_header.lines().count(), 2);
}

#[test]
fn integration_approved_agent_passes_next_check() {
    let db = setup_db();
    // internal 10 + api_external 30 = 40, lands on the amber threshold
    db.replace_classifications(
        &[project_rule(
            "acme-ml-edge",
            DataClass::Internal,
            vec![ScopeToken::ApiExternal],
        )],
        &[],
    )
    .unwrap();
    insert_agent(&db, "vertex-enrichment-2", Some("acme-ml-edge"), Autonomy::Readonly);

    let first = decision::check(&db, &check_request("vertex-enrichment-2", "agent.query")).unwrap();
    assert_eq!(first.decision.risk_band, RiskBand::Amber);
    assert!(first.decision.approval_required);
    let approval = first.approval.unwrap();

    agent_warden::approvals::decide(
        &db,
        &approval.id,
        ApprovalStatus::Approved,
        "sec-lead",
        Some("verified DLP coverage".to_string()),
    )
    .unwrap();

    let second = decision::check(&db, &check_request("vertex-enrichment-2", "agent.query")).unwrap();
    assert!(!second.decision.approval_required);
    assert!(!second.decision.blocked);
    assert!(second
        .decision
        .reasons
        .contains(&"approved_by=sec-lead".to_string()));
    assert_eq!(second.approval.unwrap().status, ApprovalStatus::Approved);
}

#[test]
fn integration_rejected_agent_stays_blocked() {
    let db = setup_db();
    db.replace_classifications(
        &[project_rule(
            "acme-ml-edge",
            DataClass::Internal,
            vec![ScopeToken::ApiExternal],
        )],
        &[],
    )
    .unwrap();
    insert_agent(&db, "vertex-enrichment-3", Some("acme-ml-edge"), Autonomy::Readonly);

    let first = decision::check(&db, &check_request("vertex-enrichment-3", "agent.query")).unwrap();
    let approval = first.approval.unwrap();

    agent_warden::approvals::decide(&db, &approval.id, ApprovalStatus::Rejected, "sec-lead", None)
        .unwrap();

    // rejection is sticky: every later check blocks without reopening
    for _ in 0..2 {
        let next = decision::check(&db, &check_request("vertex-enrichment-3", "agent.query")).unwrap();
        assert!(next.decision.blocked);
        assert!(!next.decision.approval_required);
        assert!(next
            .decision
            .reasons
            .contains(&"rejected_by=sec-lead".to_string()));
        assert_eq!(next.approval.unwrap().status, ApprovalStatus::Rejected);
    }

    let all = db.approvals_for_agent("vertex-enrichment-3", 10).unwrap();
    assert_eq!(all.len(), 1);
}

#[test]
fn integration_unknown_agent_is_not_found() {
    let db = setup_db();
    let err = decision::check(&db, &check_request("ghost-agent", "agent.query")).unwrap_err();
    assert!(matches!(err, agent_warden::error::EngineError::NotFound(_)));
}

#[test]
fn integration_destructive_action_needs_approval_on_amber() {
    let db = setup_db();
    db.replace_classifications(
        &[project_rule(
            "acme-ml-edge",
            DataClass::Internal,
            vec![ScopeToken::ApiExternal],
        )],
        &[],
    )
    .unwrap();
    insert_agent(&db, "vertex-cleaner-1", Some("acme-ml-edge"), Autonomy::Readonly);

    let outcome = decision::check(&db, &check_request("vertex-cleaner-1", "dataset.delete")).unwrap();
    assert!(outcome
        .decision
        .violations
        .contains(&"Destructive action requested on non-green agent".to_string()));
    assert!(outcome.decision.approval_required);
}
