//! Canonical event ingest: idempotent event recording plus agent upkeep
//! (registration, autonomy ratchet, tool assignment, policy discovery)

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::db::Database;
use crate::error::EngineError;
use crate::{AgentRecord, Autonomy, CanonicalEvent, DataClass, ScopeToken};

/// Event types that imply the agent acts on its own
pub const AUTO_ACTION_EVENTS: [&str; 5] = [
    "agent.action",
    "agent.predict",
    "pipeline.run",
    "CopilotActionExecuted",
    "CopilotActionSuggested",
];

pub const EXTERNAL_TOOL_POOL: [&str; 6] = [
    "slack",
    "jira",
    "github",
    "snowflake",
    "zendesk",
    "salesforce",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStatus {
    Recorded,
    Duplicate,
}

/// Autonomy only ratchets upward; nothing moves an agent back to readonly
fn derive_autonomy(current: Autonomy, event_type: &str) -> Autonomy {
    if current == Autonomy::AutoAction || AUTO_ACTION_EVENTS.contains(&event_type) {
        Autonomy::AutoAction
    } else {
        current
    }
}

/// Stable tool assignment for agents that never reported any integrations.
/// Pool entry i is picked when byte i of the id digest is divisible by 3;
/// an empty pick falls back to the single entry indexed by the first byte.
pub fn deterministic_tools(agent_id: &str) -> Vec<String> {
    let digest = Sha256::digest(agent_id.as_bytes());
    let mut picks: Vec<String> = EXTERNAL_TOOL_POOL
        .iter()
        .enumerate()
        .filter(|(idx, _)| digest[*idx] % 3 == 0)
        .map(|(_, tool)| tool.to_string())
        .collect();
    if picks.is_empty() {
        let idx = digest[0] as usize % EXTERNAL_TOOL_POOL.len();
        picks.push(EXTERNAL_TOOL_POOL[idx].to_string());
    }
    picks
}

fn validate(event: &CanonicalEvent) -> Result<(), EngineError> {
    if event.event_id.len() < 3 {
        return Err(EngineError::Validation("event_id too short".to_string()));
    }
    if event.agent_id.len() < 3 {
        return Err(EngineError::Validation("agent_id too short".to_string()));
    }
    if event.event_type.len() < 2 {
        return Err(EngineError::Validation("event_type too short".to_string()));
    }
    if event.platform.len() < 2 {
        return Err(EngineError::Validation("platform too short".to_string()));
    }
    Ok(())
}

/// Record one canonical event. A replayed event_id is a no-op: the event
/// is dropped and no agent or policy state changes.
pub fn ingest(db: &Database, event: &CanonicalEvent) -> Result<IngestStatus, EngineError> {
    validate(event)?;

    if !db.insert_event(event)? {
        debug!("Duplicate event {} ignored", event.event_id);
        return Ok(IngestStatus::Duplicate);
    }

    let now = Utc::now();
    db.ensure_action_policy(&event.event_type, now)?;

    match db.get_agent(&event.agent_id)? {
        None => {
            let agent = AgentRecord {
                agent_id: event.agent_id.clone(),
                platform: event.platform.clone(),
                project_id: event.project_id.clone(),
                location: event.location.clone(),
                owner_email: event.owner_email.clone(),
                data_class: DataClass::Internal,
                output_scope: vec![ScopeToken::InternalOnly],
                autonomy: derive_autonomy(Autonomy::Readonly, &event.event_type),
                dlp_template: None,
                external_tools: deterministic_tools(&event.agent_id),
                updated_at: now,
            };
            db.insert_agent(&agent)?;
            info!("Registered agent {} from {}", agent.agent_id, agent.platform);
        }
        Some(mut agent) => {
            agent.platform = event.platform.clone();
            if event.project_id.is_some() {
                agent.project_id = event.project_id.clone();
            }
            if event.location.is_some() {
                agent.location = event.location.clone();
            }
            if event.owner_email.is_some() {
                agent.owner_email = event.owner_email.clone();
            }
            agent.autonomy = derive_autonomy(agent.autonomy, &event.event_type);
            if agent.external_tools.is_empty() {
                agent.external_tools = deterministic_tools(&agent.agent_id);
            }
            agent.updated_at = now;
            db.update_agent(&agent)?;
        }
    }

    Ok(IngestStatus::Recorded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(event_id: &str, event_type: &str, agent_id: &str) -> CanonicalEvent {
        CanonicalEvent {
            event_id: event_id.to_string(),
            event_type: event_type.to_string(),
            event_time: Utc::now(),
            agent_id: agent_id.to_string(),
            platform: "vertex".to_string(),
            project_id: Some("proj-x".to_string()),
            location: None,
            owner_email: None,
            payload: serde_json::json!({}),
        }
    }

    #[test]
    fn test_first_event_registers_agent() {
        let db = Database::open_in_memory().unwrap();
        let status = ingest(&db, &event("evt-1", "agent.predict", "agent-1")).unwrap();
        assert_eq!(status, IngestStatus::Recorded);

        let agent = db.get_agent("agent-1").unwrap().unwrap();
        assert_eq!(agent.data_class, DataClass::Internal);
        assert_eq!(agent.autonomy, Autonomy::AutoAction);
        assert!(!agent.external_tools.is_empty());
        assert!(db.get_action_policy_by_name("agent.predict").unwrap().is_some());
    }

    #[test]
    fn test_duplicate_event_is_noop() {
        let db = Database::open_in_memory().unwrap();
        ingest(&db, &event("evt-1", "agent.log", "agent-1")).unwrap();
        let before = db.get_agent("agent-1").unwrap().unwrap();

        let mut replay = event("evt-1", "agent.predict", "agent-1");
        replay.platform = "copilot".to_string();
        let status = ingest(&db, &replay).unwrap();
        assert_eq!(status, IngestStatus::Duplicate);

        // the replay changed nothing, including the autonomy ratchet
        let after = db.get_agent("agent-1").unwrap().unwrap();
        assert_eq!(after.platform, before.platform);
        assert_eq!(after.autonomy, Autonomy::Readonly);
        assert_eq!(db.count_events().unwrap(), 1);
    }

    #[test]
    fn test_autonomy_never_ratchets_down() {
        let db = Database::open_in_memory().unwrap();
        ingest(&db, &event("evt-1", "pipeline.run", "agent-1")).unwrap();
        assert_eq!(
            db.get_agent("agent-1").unwrap().unwrap().autonomy,
            Autonomy::AutoAction
        );

        ingest(&db, &event("evt-2", "agent.log", "agent-1")).unwrap();
        assert_eq!(
            db.get_agent("agent-1").unwrap().unwrap().autonomy,
            Autonomy::AutoAction
        );
    }

    #[test]
    fn test_metadata_kept_when_later_events_omit_it() {
        let db = Database::open_in_memory().unwrap();
        ingest(&db, &event("evt-1", "agent.log", "agent-1")).unwrap();

        let mut sparse = event("evt-2", "agent.log", "agent-1");
        sparse.project_id = None;
        ingest(&db, &sparse).unwrap();

        let agent = db.get_agent("agent-1").unwrap().unwrap();
        assert_eq!(agent.project_id.as_deref(), Some("proj-x"));
    }

    #[test]
    fn test_deterministic_tools_are_stable() {
        let first = deterministic_tools("agent-under-test");
        let second = deterministic_tools("agent-under-test");
        assert_eq!(first, second);
        assert!(!first.is_empty());
        for tool in &first {
            assert!(EXTERNAL_TOOL_POOL.contains(&tool.as_str()));
        }
    }

    #[test]
    fn test_short_ids_rejected() {
        let db = Database::open_in_memory().unwrap();
        let mut bad = event("e", "agent.log", "agent-1");
        bad.event_id = "e".to_string();
        let err = ingest(&db, &bad).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
