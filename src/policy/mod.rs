//! Structural policy rules, the per-action matrix, and the safety header

use crate::{
    ActionPolicyRecord, Autonomy, DataClass, Decision, ReachBucket, RiskBand, ScopeToken,
    SignalContext,
};

pub const BASE_HEADER: &str = "SYSTEM: You operate under ACME AI Guardrails. \
Never handle policy-violating requests, redact PII, and escalate anything uncertain.";

/// Everything the evaluator needs about one agent + requested action
pub struct PolicyInput<'a> {
    pub signals: &'a SignalContext,
    pub dlp_template: Option<&'a str>,
    pub band: RiskBand,
    pub score: i64,
    pub score_reasons: &'a [String],
    pub action: Option<&'a str>,
    pub action_policy: Option<&'a ActionPolicyRecord>,
}

/// Apply the structural rules, then the action matrix, then synthesize the
/// header. The matrix is a lower bound: it can add gating on top of the
/// structural rules but never relaxes a block or approval requirement.
pub fn evaluate(input: &PolicyInput<'_>) -> Decision {
    let signals = input.signals;
    let mut violations = Vec::new();
    let mut approval_required = false;
    let mut blocked = false;

    let has_api_external = signals.output_scope.contains(&ScopeToken::ApiExternal);
    let missing_dlp = input.dlp_template.map_or(true, str::is_empty);

    if signals.data_class == DataClass::Confidential && has_api_external && missing_dlp {
        violations.push("Confidential data with external API but no DLP template".to_string());
        approval_required = true;
    }

    if signals.autonomy == Autonomy::AutoAction
        && matches!(signals.reach, ReachBucket::OrgWide | ReachBucket::Department)
    {
        violations.push("Autonomous agent with high reach requires approval".to_string());
        approval_required = true;
    }

    if input.band == RiskBand::Red && signals.autonomy == Autonomy::AutoAction {
        violations.push("Red-band autonomous agent is blocked for action".to_string());
        blocked = true;
    }

    if let Some(action) = input.action {
        if action.to_lowercase().contains("delete") && input.band != RiskBand::Green {
            violations.push("Destructive action requested on non-green agent".to_string());
            approval_required = true;
        }
    }

    if let Some(policy) = input.action_policy {
        if !policy.allow.for_band(input.band) {
            blocked = true;
        }
        if policy.approval.for_band(input.band) {
            approval_required = true;
        }
    }

    let mut reasons = input.score_reasons.to_vec();
    if approval_required {
        reasons.push("human approval required".to_string());
    }
    if blocked {
        reasons.push("blocked by policy".to_string());
    }

    Decision {
        risk_band: input.band,
        risk_score: input.score,
        approval_required,
        blocked,
        violations,
        reasons,
        system_header: build_header(signals, input.band, has_api_external),
        signals: signals.clone(),
    }
}

fn build_header(signals: &SignalContext, band: RiskBand, has_api_external: bool) -> String {
    let mut lines = vec![BASE_HEADER.to_string()];

    if signals.data_class == DataClass::Confidential {
        lines.push("Handle all content as CONFIDENTIAL. Mask PII and restrict sharing.".to_string());
    }

    if has_api_external {
        lines.push("External API egress is limited to approved integrations only.".to_string());
    } else {
        lines.push("Outputs must remain within internal systems.".to_string());
    }

    if !signals.external_tools.is_empty() {
        let listed: Vec<&str> = signals
            .external_tools
            .iter()
            .take(4)
            .map(String::as_str)
            .collect();
        lines.push(format!("Allowed tools: {}", listed.join(", ")));
    }

    if band == RiskBand::Red {
        lines.push("Escalate responses for human review.".to_string());
    }

    lines.join("\n")
}
