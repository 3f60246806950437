//! Risk-weight configuration
//!
//! The weight/threshold config is persisted in the store under the
//! `risk_scoring` setting and loaded once per operation. A YAML seed
//! file can bootstrap classification rules and audience data on the
//! first boot; after that the store is authoritative.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::db::Database;
use crate::error::EngineError;
use crate::{AudienceRecord, Autonomy, ClassificationRule, DataClass, ReachBucket, ScopeToken};

/// Settings key the persisted risk config lives under
pub const RISK_CONFIG_KEY: &str = "risk_scoring";

/// Weights per signal value. Values missing from a map contribute zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskWeights {
    #[serde(default)]
    pub data_class: HashMap<DataClass, i64>,
    #[serde(default)]
    pub output_scope: HashMap<ScopeToken, i64>,
    #[serde(default)]
    pub autonomy: HashMap<Autonomy, i64>,
    #[serde(default)]
    pub reach: HashMap<ReachBucket, i64>,
    #[serde(default)]
    pub external_tools: ToolWeights,
}

/// Flat weight applied when the agent's tool set is non-empty
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ToolWeights {
    #[serde(default)]
    pub has_tools: i64,
    #[serde(default)]
    pub none: i64,
}

impl Default for ToolWeights {
    fn default() -> Self {
        Self { has_tools: 10, none: 0 }
    }
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            data_class: HashMap::from([(DataClass::Confidential, 40), (DataClass::Internal, 10)]),
            output_scope: HashMap::from([(ScopeToken::ApiExternal, 30), (ScopeToken::Public, 30)]),
            autonomy: HashMap::from([(Autonomy::AutoAction, 20)]),
            reach: HashMap::from([
                (ReachBucket::OrgWide, 20),
                (ReachBucket::Department, 10),
                (ReachBucket::Team, 5),
            ]),
            external_tools: ToolWeights::default(),
        }
    }
}

/// Score cutoffs for band assignment: >= red is red, >= amber is amber
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BandThresholds {
    pub red: i64,
    pub amber: i64,
}

impl Default for BandThresholds {
    fn default() -> Self {
        Self { red: 80, amber: 40 }
    }
}

fn default_score_ceiling() -> i64 {
    100
}

/// Full scoring configuration as stored and served
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default)]
    pub weights: RiskWeights,
    #[serde(default)]
    pub band_thresholds: BandThresholds,
    #[serde(default = "default_score_ceiling")]
    pub score_ceiling: i64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            weights: RiskWeights::default(),
            band_thresholds: BandThresholds::default(),
            score_ceiling: default_score_ceiling(),
        }
    }
}

impl RiskConfig {
    /// Reject configurations a replace must never persist
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.band_thresholds.red < self.band_thresholds.amber {
            return Err(EngineError::Validation(format!(
                "red threshold {} below amber threshold {}",
                self.band_thresholds.red, self.band_thresholds.amber
            )));
        }
        if self.score_ceiling < 1 {
            return Err(EngineError::Validation(format!(
                "score ceiling must be positive, got {}",
                self.score_ceiling
            )));
        }
        Ok(())
    }
}

/// Seed document for first-boot bootstrap
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedConfig {
    #[serde(default)]
    pub classification_rules: Vec<ClassificationRule>,
    #[serde(default)]
    pub project_audience: Vec<AudienceRecord>,
    #[serde(default)]
    pub risk_scoring: Option<RiskConfig>,
}

/// Load the seed document from a YAML file
pub fn load_seed_from_file(path: &std::path::Path) -> anyhow::Result<SeedConfig> {
    let content = std::fs::read_to_string(path)?;
    let seed: SeedConfig = serde_yaml::from_str(&content)?;
    Ok(seed)
}

/// Read the persisted risk config, falling back to defaults when the
/// setting is absent or unreadable
pub fn load_risk_config(db: &Database) -> anyhow::Result<RiskConfig> {
    match db.get_setting(RISK_CONFIG_KEY)? {
        Some(raw) => match serde_json::from_str(&raw) {
            Ok(config) => Ok(config),
            Err(err) => {
                warn!("stored risk config unreadable, using defaults: {}", err);
                Ok(RiskConfig::default())
            }
        },
        None => Ok(RiskConfig::default()),
    }
}

/// Persist a full risk config replacement
pub fn save_risk_config(db: &Database, config: &RiskConfig) -> anyhow::Result<()> {
    db.set_setting(RISK_CONFIG_KEY, &serde_json::to_string(config)?)
}

/// First-boot bootstrap: persist the seed's risk config and install its
/// classification/audience sets. No-op once a risk config is stored.
pub fn bootstrap(db: &Database, seed_path: Option<&std::path::Path>) -> anyhow::Result<bool> {
    if db.get_setting(RISK_CONFIG_KEY)?.is_some() {
        return Ok(false);
    }

    let seed = match seed_path {
        Some(path) if path.exists() => load_seed_from_file(path)?,
        _ => SeedConfig::default(),
    };

    let config = seed.risk_scoring.clone().unwrap_or_default();
    config.validate()?;
    save_risk_config(db, &config)?;

    if !seed.classification_rules.is_empty() || !seed.project_audience.is_empty() {
        db.replace_classifications(&seed.classification_rules, &seed.project_audience)?;
    }

    Ok(true)
}
