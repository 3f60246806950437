//! Check command - one-shot decision for an agent and action

use agent_warden::db::Database;
use agent_warden::decision::{self, DecisionRequest};
use std::path::Path;

pub async fn run(
    agent_id: &str,
    action: &str,
    db_path: &str,
    requested_by: &str,
) -> anyhow::Result<()> {
    let db = Database::open(Path::new(db_path))?;

    let request = DecisionRequest {
        agent_id: agent_id.to_string(),
        action: Some(action.to_string()),
        prompt: None,
        metadata: None,
        requested_by: Some(requested_by.to_string()),
    };
    let outcome = decision::check(&db, &request)?;
    let decision = &outcome.decision;

    let verdict = if decision.blocked {
        "⛔ BLOCKED"
    } else if decision.approval_required {
        "⏸️  APPROVAL REQUIRED"
    } else {
        "✅ ALLOWED"
    };

    println!("🛡️ Decision for {} / {}", outcome.agent_id, action);
    println!("──────────────────────────────────────────");
    println!("Verdict: {verdict}");
    println!("Band:    {} ({})", decision.risk_band, decision.risk_score);

    if !decision.reasons.is_empty() {
        println!("\nReasons:");
        for reason in &decision.reasons {
            println!("  - {reason}");
        }
    }
    if !decision.violations.is_empty() {
        println!("\nViolations:");
        for violation in &decision.violations {
            println!("  - {violation}");
        }
    }

    if let Some(approval) = &outcome.approval {
        println!("\nApproval: {} ({})", approval.id, approval.status);
    }

    println!("\nSystem header:");
    println!("{}", decision.system_header);

    Ok(())
}
