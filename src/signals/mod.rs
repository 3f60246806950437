//! Signal derivation: agent attributes + classification/audience config
//! resolved into one normalized snapshot per agent

use std::collections::HashMap;

use chrono::Utc;

use crate::db::Database;
use crate::error::EngineError;
use crate::{
    AgentRecord, ClassificationRule, DataClass, ReachBucket, ScopeToken, SelectorType,
    SignalContext,
};

/// Derivation output: the five signals plus the DLP template the matched
/// rule requires, if any. The template is mirrored onto the agent and
/// consulted by the policy rules, but is not part of the snapshot itself.
#[derive(Debug, Clone)]
pub struct DerivedSignals {
    pub context: SignalContext,
    pub dlp_template: Option<String>,
}

/// Audience count to categorical reach tier
pub fn bucket_reach(reach_count: i64) -> ReachBucket {
    if reach_count >= 5000 {
        ReachBucket::OrgWide
    } else if reach_count >= 200 {
        ReachBucket::Department
    } else if reach_count >= 20 {
        ReachBucket::Team
    } else {
        ReachBucket::Individual
    }
}

/// An agent-scoped rule beats a project-scoped rule for the same agent
fn match_rule<'a>(
    agent: &AgentRecord,
    rules: &'a [ClassificationRule],
) -> Option<&'a ClassificationRule> {
    rules
        .iter()
        .find(|r| r.selector_type == SelectorType::Agent && r.selector_value == agent.agent_id)
        .or_else(|| {
            let project = agent.project_id.as_deref().unwrap_or("");
            rules
                .iter()
                .find(|r| r.selector_type == SelectorType::Project && r.selector_value == project)
        })
}

/// Pure derivation. Classification (class, scope, DLP template) comes from
/// the matched rule or falls back to internal / internal_only / none.
/// Autonomy and tools come from the agent's own stored fields. Reach comes
/// from the project audience table; an unknown project counts as 1.
pub fn derive(
    agent: &AgentRecord,
    rules: &[ClassificationRule],
    audience: &HashMap<String, i64>,
) -> DerivedSignals {
    let (data_class, output_scope, dlp_template) = match match_rule(agent, rules) {
        Some(rule) => {
            let scope = if rule.default_output_scope.is_empty() {
                vec![ScopeToken::InternalOnly]
            } else {
                rule.default_output_scope.clone()
            };
            (rule.data_class, scope, rule.required_dlp_template.clone())
        }
        None => (DataClass::Internal, vec![ScopeToken::InternalOnly], None),
    };

    let project = agent.project_id.as_deref().unwrap_or("");
    let reach_count = audience.get(project).copied().unwrap_or(1);

    DerivedSignals {
        context: SignalContext {
            data_class,
            output_scope,
            reach: bucket_reach(reach_count),
            autonomy: agent.autonomy,
            external_tools: agent.external_tools.clone(),
        },
        dlp_template,
    }
}

/// Derive and persist: writes a fresh snapshot row and mirrors the resolved
/// classification back onto the agent record.
pub fn derive_and_store(
    db: &Database,
    agent: &AgentRecord,
    rules: &[ClassificationRule],
    audience: &HashMap<String, i64>,
) -> Result<DerivedSignals, EngineError> {
    let derived = derive(agent, rules, audience);
    let now = Utc::now();
    db.insert_snapshot(&agent.agent_id, &derived.context, now)?;
    db.mirror_classification(
        &agent.agent_id,
        derived.context.data_class,
        &derived.context.output_scope,
        derived.context.autonomy,
        derived.dlp_template.as_deref(),
        now,
    )?;
    Ok(derived)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Autonomy;

    fn agent(agent_id: &str, project_id: Option<&str>) -> AgentRecord {
        AgentRecord {
            agent_id: agent_id.to_string(),
            platform: "vertex".to_string(),
            project_id: project_id.map(String::from),
            location: None,
            owner_email: None,
            data_class: DataClass::Internal,
            output_scope: vec![ScopeToken::InternalOnly],
            autonomy: Autonomy::AutoAction,
            dlp_template: None,
            external_tools: vec!["jira".to_string()],
            updated_at: Utc::now(),
        }
    }

    fn project_rule(project: &str, class: DataClass) -> ClassificationRule {
        ClassificationRule {
            id: 0,
            selector_type: SelectorType::Project,
            selector_value: project.to_string(),
            data_class: class,
            default_output_scope: vec![ScopeToken::ApiExternal],
            required_dlp_template: None,
        }
    }

    #[test]
    fn test_bucket_reach_thresholds() {
        assert_eq!(bucket_reach(1), ReachBucket::Individual);
        assert_eq!(bucket_reach(19), ReachBucket::Individual);
        assert_eq!(bucket_reach(20), ReachBucket::Team);
        assert_eq!(bucket_reach(199), ReachBucket::Team);
        assert_eq!(bucket_reach(200), ReachBucket::Department);
        assert_eq!(bucket_reach(4999), ReachBucket::Department);
        assert_eq!(bucket_reach(5000), ReachBucket::OrgWide);
    }

    #[test]
    fn test_defaults_when_no_rule_matches() {
        let derived = derive(&agent("a-1", Some("proj-x")), &[], &HashMap::new());
        assert_eq!(derived.context.data_class, DataClass::Internal);
        assert_eq!(derived.context.output_scope, vec![ScopeToken::InternalOnly]);
        assert_eq!(derived.context.reach, ReachBucket::Individual);
        assert_eq!(derived.dlp_template, None);
    }

    #[test]
    fn test_agent_rule_beats_project_rule() {
        let rules = vec![
            project_rule("proj-x", DataClass::Public),
            ClassificationRule {
                id: 0,
                selector_type: SelectorType::Agent,
                selector_value: "a-1".to_string(),
                data_class: DataClass::Confidential,
                default_output_scope: vec![ScopeToken::InternalOnly],
                required_dlp_template: Some("dlp_tpl_finance_v2".to_string()),
            },
        ];
        let derived = derive(&agent("a-1", Some("proj-x")), &rules, &HashMap::new());
        assert_eq!(derived.context.data_class, DataClass::Confidential);
        assert_eq!(derived.dlp_template.as_deref(), Some("dlp_tpl_finance_v2"));
    }

    #[test]
    fn test_reach_from_audience_table() {
        let mut audience = HashMap::new();
        audience.insert("proj-x".to_string(), 12_500);
        let derived = derive(&agent("a-1", Some("proj-x")), &[], &audience);
        assert_eq!(derived.context.reach, ReachBucket::OrgWide);

        // unknown project falls back to a reach count of 1
        let derived = derive(&agent("a-1", Some("proj-y")), &[], &audience);
        assert_eq!(derived.context.reach, ReachBucket::Individual);
    }

    #[test]
    fn test_autonomy_and_tools_come_from_agent() {
        let rules = vec![project_rule("proj-x", DataClass::Confidential)];
        let derived = derive(&agent("a-1", Some("proj-x")), &rules, &HashMap::new());
        assert_eq!(derived.context.autonomy, Autonomy::AutoAction);
        assert_eq!(derived.context.external_tools, vec!["jira".to_string()]);
        // the rule's scope replaces the agent's stored scope
        assert_eq!(derived.context.output_scope, vec![ScopeToken::ApiExternal]);
    }
}
