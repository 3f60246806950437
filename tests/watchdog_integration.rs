use agent_warden::db::Database;
use agent_warden::ingest::{self, IngestStatus};
use agent_warden::watchdog;
use agent_warden::{
    AudienceRecord, CanonicalEvent, ClassificationRule, DataClass, ScopeToken, SelectorType,
};
use chrono::Utc;

fn setup_db() -> Database {
    Database::open_in_memory().unwrap()
}

fn event(event_id: &str, agent_id: &str, event_type: &str, project: Option<&str>) -> CanonicalEvent {
    CanonicalEvent {
        event_id: event_id.to_string(),
        event_type: event_type.to_string(),
        event_time: Utc::now(),
        agent_id: agent_id.to_string(),
        platform: if agent_id.starts_with("copilot") {
            "copilot".to_string()
        } else {
            "vertex".to_string()
        },
        project_id: project.map(|p| p.to_string()),
        location: Some("europe-west1".to_string()),
        owner_email: None,
        payload: serde_json::json!({"model": "gemini-pro"}),
    }
}

fn confidential_prod_rules() -> (Vec<ClassificationRule>, Vec<AudienceRecord>) {
    (
        vec![ClassificationRule {
            id: 0,
            selector_type: SelectorType::Project,
            selector_value: "acme-ml-prod".to_string(),
            data_class: DataClass::Confidential,
            default_output_scope: vec![ScopeToken::ApiExternal],
            required_dlp_template: None,
        }],
        vec![AudienceRecord {
            project_id: "acme-ml-prod".to_string(),
            reach_count: 12500,
        }],
    )
}

fn ingest_population(db: &Database) {
    let events = [
        event("evt-1001", "vertex-forecaster-9", "agent.action", Some("acme-ml-prod")),
        event("evt-1002", "vertex-summariser-1", "agent.query", None),
        event("evt-1003", "copilot-notes-1", "CopilotChat", None),
    ];
    for e in &events {
        assert_eq!(ingest::ingest(db, e).unwrap(), IngestStatus::Recorded);
    }
}

#[test]
fn integration_recompute_scores_whole_population() {
    let db = setup_db();
    ingest_population(&db);
    let (rules, audience) = confidential_prod_rules();
    db.replace_classifications(&rules, &audience).unwrap();

    let report = watchdog::run(&db).unwrap();

    assert_eq!(report.agents_processed, 3);
    assert_eq!(report.red_before, 0);
    assert_eq!(report.red_after, 1);
    assert_eq!(report.new_red_agents, vec!["vertex-forecaster-9".to_string()]);
    assert!(report.resolved_red_agents.is_empty());
    assert_eq!(report.bands.get("red"), Some(&1));
    assert_eq!(report.bands.get("green"), Some(&2));

    // every agent holds a fresh snapshot and score after the pass
    for agent in db.list_agents().unwrap() {
        assert!(db.latest_snapshot(&agent.agent_id).unwrap().is_some());
        assert!(db.latest_score(&agent.agent_id).unwrap().is_some());
    }
    assert_eq!(db.count_watchdog_runs().unwrap(), 1);
}

#[test]
fn integration_rule_removal_resolves_red() {
    let db = setup_db();
    ingest_population(&db);
    let (rules, audience) = confidential_prod_rules();
    db.replace_classifications(&rules, &audience).unwrap();
    watchdog::run(&db).unwrap();

    // drop every rule; the prod agent falls back to internal defaults
    db.replace_classifications(&[], &[]).unwrap();
    let report = watchdog::run(&db).unwrap();

    assert_eq!(report.red_before, 1);
    assert_eq!(report.red_after, 0);
    assert!(report.new_red_agents.is_empty());
    assert_eq!(
        report.resolved_red_agents,
        vec!["vertex-forecaster-9".to_string()]
    );
    // autonomy ratchet and assigned tools survive the rule change
    assert_eq!(report.bands.get("amber"), Some(&1));
    assert_eq!(report.bands.get("green"), Some(&2));
}

#[test]
fn integration_repeat_recompute_reports_no_drift() {
    let db = setup_db();
    ingest_population(&db);
    let (rules, audience) = confidential_prod_rules();
    db.replace_classifications(&rules, &audience).unwrap();

    let first = watchdog::run(&db).unwrap();
    let second = watchdog::run(&db).unwrap();

    assert_eq!(second.agents_processed, first.agents_processed);
    assert_eq!(second.red_before, second.red_after);
    assert!(second.new_red_agents.is_empty());
    assert!(second.resolved_red_agents.is_empty());
    assert_eq!(second.bands, first.bands);
    assert_ne!(second.watchdog_run_id, first.watchdog_run_id);
    assert_eq!(db.count_watchdog_runs().unwrap(), 2);
}

#[test]
fn integration_recompute_on_empty_store() {
    let db = setup_db();
    let report = watchdog::run(&db).unwrap();

    assert_eq!(report.agents_processed, 0);
    assert!(report.bands.is_empty());
    assert!(report.new_red_agents.is_empty());
    assert!(report.resolved_red_agents.is_empty());
}
