//! Agent Warden Library
//!
//! Core components for AI agent risk governance: signal derivation,
//! risk scoring, policy decisions, and approval lifecycle.

pub mod approvals;
pub mod config;
pub mod db;
pub mod decision;
pub mod error;
pub mod ingest;
pub mod policy;
pub mod scoring;
pub mod signals;
pub mod watchdog;
pub mod web;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Discrete risk tier for an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskBand {
    Green,
    Amber,
    Red,
}

impl std::fmt::Display for RiskBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskBand::Green => write!(f, "green"),
            RiskBand::Amber => write!(f, "amber"),
            RiskBand::Red => write!(f, "red"),
        }
    }
}

impl std::str::FromStr for RiskBand {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "green" => Ok(RiskBand::Green),
            "amber" => Ok(RiskBand::Amber),
            "red" => Ok(RiskBand::Red),
            other => Err(EngineError::Validation(format!("unknown risk band: {other}"))),
        }
    }
}

/// Data sensitivity classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataClass {
    Public,
    Internal,
    Confidential,
}

impl std::fmt::Display for DataClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataClass::Public => write!(f, "public"),
            DataClass::Internal => write!(f, "internal"),
            DataClass::Confidential => write!(f, "confidential"),
        }
    }
}

impl std::str::FromStr for DataClass {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(DataClass::Public),
            "internal" => Ok(DataClass::Internal),
            "confidential" => Ok(DataClass::Confidential),
            other => Err(EngineError::Validation(format!("unknown data class: {other}"))),
        }
    }
}

/// Output egress scope token. Ordering follows egress exposure:
/// `internal_only` ranks below `api_external`, which ranks below `public`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeToken {
    InternalOnly,
    ApiExternal,
    Public,
}

impl ScopeToken {
    /// Whether this token sends outputs beyond internal systems
    pub fn is_egress(self) -> bool {
        matches!(self, ScopeToken::ApiExternal | ScopeToken::Public)
    }
}

impl std::fmt::Display for ScopeToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScopeToken::InternalOnly => write!(f, "internal_only"),
            ScopeToken::ApiExternal => write!(f, "api_external"),
            ScopeToken::Public => write!(f, "public"),
        }
    }
}

impl std::str::FromStr for ScopeToken {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "internal_only" => Ok(ScopeToken::InternalOnly),
            "api_external" => Ok(ScopeToken::ApiExternal),
            "public" => Ok(ScopeToken::Public),
            other => Err(EngineError::Validation(format!("unknown scope token: {other}"))),
        }
    }
}

/// How independently the agent acts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Autonomy {
    Readonly,
    AutoAction,
}

impl std::fmt::Display for Autonomy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Autonomy::Readonly => write!(f, "readonly"),
            Autonomy::AutoAction => write!(f, "auto_action"),
        }
    }
}

impl std::str::FromStr for Autonomy {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "readonly" => Ok(Autonomy::Readonly),
            "auto_action" => Ok(Autonomy::AutoAction),
            other => Err(EngineError::Validation(format!("unknown autonomy level: {other}"))),
        }
    }
}

/// Categorical audience-size tier, smallest to widest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReachBucket {
    Individual,
    Team,
    Department,
    OrgWide,
}

impl std::fmt::Display for ReachBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReachBucket::Individual => write!(f, "individual"),
            ReachBucket::Team => write!(f, "team"),
            ReachBucket::Department => write!(f, "department"),
            ReachBucket::OrgWide => write!(f, "org_wide"),
        }
    }
}

impl std::str::FromStr for ReachBucket {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "individual" => Ok(ReachBucket::Individual),
            "team" => Ok(ReachBucket::Team),
            "department" => Ok(ReachBucket::Department),
            "org_wide" => Ok(ReachBucket::OrgWide),
            other => Err(EngineError::Validation(format!("unknown reach bucket: {other}"))),
        }
    }
}

/// Lifecycle state of an approval record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    /// Auto-invalidated: the agent's band changed since the approval was recorded
    RiskShift,
    /// Auto-invalidated: the action's policy changed since the approval was recorded
    PolicyExpired,
}

impl ApprovalStatus {
    /// States that can still gate or lift a decision
    pub fn is_actionable(self) -> bool {
        matches!(self, ApprovalStatus::Pending | ApprovalStatus::Approved)
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApprovalStatus::Pending => write!(f, "pending"),
            ApprovalStatus::Approved => write!(f, "approved"),
            ApprovalStatus::Rejected => write!(f, "rejected"),
            ApprovalStatus::RiskShift => write!(f, "risk_shift"),
            ApprovalStatus::PolicyExpired => write!(f, "policy_expired"),
        }
    }
}

impl std::str::FromStr for ApprovalStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ApprovalStatus::Pending),
            "approved" => Ok(ApprovalStatus::Approved),
            "rejected" => Ok(ApprovalStatus::Rejected),
            "risk_shift" => Ok(ApprovalStatus::RiskShift),
            "policy_expired" => Ok(ApprovalStatus::PolicyExpired),
            other => Err(EngineError::Validation(format!("unknown approval status: {other}"))),
        }
    }
}

/// What a classification rule matches against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorType {
    Agent,
    Project,
}

impl std::fmt::Display for SelectorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectorType::Agent => write!(f, "agent"),
            SelectorType::Project => write!(f, "project"),
        }
    }
}

impl std::str::FromStr for SelectorType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "agent" => Ok(SelectorType::Agent),
            "project" => Ok(SelectorType::Project),
            other => Err(EngineError::Validation(format!("unknown selector type: {other}"))),
        }
    }
}

/// A governed agent with its mirrored classification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Unique agent identity
    pub agent_id: String,
    /// Source platform (vertex, copilot, ...)
    pub platform: String,
    pub project_id: Option<String>,
    pub location: Option<String>,
    pub owner_email: Option<String>,
    /// Mirrored from the latest signal derivation
    pub data_class: DataClass,
    /// Mirrored from the latest signal derivation
    pub output_scope: Vec<ScopeToken>,
    pub autonomy: Autonomy,
    pub dlp_template: Option<String>,
    /// External tool names the agent integrates with
    pub external_tools: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

///// Classification rule: selector -> data class + default scope + DLP requirement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationRule {
    #[serde(default)]
    pub id: i64,
    pub selector_type: SelectorType,
    pub selector_value: String,
    pub data_class: DataClass,
    pub default_output_scope: Vec<ScopeToken>,
    #[serde(default)]
    pub required_dlp_template: Option<String>,
}

/// Project audience size used for reach bucketing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudienceRecord {
    pub project_id: String,
    pub reach_count: i64,
}

/// The five normalized risk signals for one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalContext {
    pub data_class: DataClass,
    pub output_scope: Vec<ScopeToken>,
    pub reach: ReachBucket,
    pub autonomy: Autonomy,
    pub external_tools: Vec<String>,
}

impl Default for SignalContext {
    fn default() -> Self {
        Self {
            data_class: DataClass::Internal,
            output_scope: vec![ScopeToken::InternalOnly],
            reach: ReachBucket::Individual,
            autonomy: Autonomy::Readonly,
            external_tools: Vec::new(),
        }
    }
}

/// Stored signal snapshot; the newest row per agent is authoritative
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalSnapshot {
    pub agent_id: String,
    pub signals: SignalContext,
    pub updated_at: DateTime<Utc>,
}

/// One entry in the append-only risk score history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskScoreRecord {
    pub agent_id: String,
    pub band: RiskBand,
    pub score: i64,
    pub reasons: Vec<String>,
    pub computed_at: DateTime<Utc>,
}

/// Per-band boolean flags for the action policy matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandFlags {
    pub green: bool,
    pub amber: bool,
    pub red: bool,
}

impl BandFlags {
    pub fn for_band(self, band: RiskBand) -> bool {
        match band {
            RiskBand::Green => self.green,
            RiskBand::Amber => self.amber,
            RiskBand::Red => self.red,
        }
    }
}

/// Per-action allow/approval matrix row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionPolicyRecord {
    pub id: i64,
    pub action_name: String,
    pub description: Option<String>,
    /// Review status of the row itself (needs_review, reviewed, ...)
    pub status: String,
    pub allow: BandFlags,
    pub approval: BandFlags,
    pub last_seen_at: Option<DateTime<Utc>>,
}

/// Structured context stored with an approval
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApprovalPayload {
    /// Original request (prompt, metadata, action)
    #[serde(default)]
    pub request: serde_json::Value,
    #[serde(default)]
    pub reasons: Vec<String>,
    #[serde(default)]
    pub violations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signals: Option<SignalContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expired_reason: Option<String>,
}

/// A human-approval record gating one (agent, action) pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub id: String,
    pub agent_id: String,
    pub action: String,
    /// Band the agent was in when the approval was requested
    pub risk_band: RiskBand,
    pub status: ApprovalStatus,
    pub requested_by: String,
    pub requested_at: DateTime<Utc>,
    pub decided_by: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    pub payload: ApprovalPayload,
}

/// Audit record of one full recompute pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogRunRecord {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Agents rescored in this pass
    pub rescored: i64,
    /// Band changes observed (new red + resolved red)
    pub changes: i64,
    pub new_red: Vec<String>,
    pub resolved_red: Vec<String>,
}

/// Canonical audit event as posted by the out-of-process adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub event_id: String,
    pub event_type: String,
    pub event_time: DateTime<Utc>,
    pub agent_id: String,
    pub platform: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub owner_email: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Outcome of evaluating policy for one agent + action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub risk_band: RiskBand,
    pub risk_score: i64,
    pub approval_required: bool,
    pub blocked: bool,
    pub violations: Vec<String>,
    pub reasons: Vec<String>,
    pub system_header: String,
    pub signals: SignalContext,
}
