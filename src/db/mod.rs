//! SQLite store for agents, signals, scores, approvals, and policies

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::error::EngineError;
use crate::{
    ActionPolicyRecord, AgentRecord, ApprovalPayload, ApprovalRecord, ApprovalStatus,
    AudienceRecord, Autonomy, BandFlags, CanonicalEvent, ClassificationRule, DataClass, RiskBand,
    RiskScoreRecord, ScopeToken, SignalContext, SignalSnapshot, WatchdogRunRecord,
};

pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create the database
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Initialize database schema
    fn initialize(&self) -> anyhow::Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS events_canonical (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id TEXT NOT NULL UNIQUE,
                event_type TEXT NOT NULL,
                event_time TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                platform TEXT NOT NULL,
                project_id TEXT,
                location TEXT,
                owner_email TEXT,
                payload_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS agents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                agent_id TEXT NOT NULL UNIQUE,
                platform TEXT NOT NULL,
                project_id TEXT,
                location TEXT,
                owner_email TEXT,
                data_class TEXT NOT NULL,
                output_scope TEXT NOT NULL,
                autonomy TEXT NOT NULL,
                dlp_template TEXT,
                external_tools TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS classification_map (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                selector_type TEXT NOT NULL,
                selector_value TEXT NOT NULL,
                data_class TEXT NOT NULL,
                default_output_scope TEXT NOT NULL,
                required_dlp_template TEXT,
                UNIQUE (selector_type, selector_value)
            );

            CREATE TABLE IF NOT EXISTS project_audience (
                project_id TEXT PRIMARY KEY,
                reach_count INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS agent_signals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                agent_id TEXT NOT NULL,
                data_class TEXT NOT NULL,
                output_scope TEXT NOT NULL,
                reach TEXT NOT NULL,
                autonomy TEXT NOT NULL,
                external_tools TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS risk_scores (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                agent_id TEXT NOT NULL,
                band TEXT NOT NULL,
                score INTEGER NOT NULL,
                reasons TEXT NOT NULL,
                computed_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS approvals (
                id TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL,
                action TEXT NOT NULL,
                risk_band TEXT NOT NULL,
                status TEXT NOT NULL,
                requested_by TEXT NOT NULL,
                requested_at TEXT NOT NULL,
                decided_by TEXT,
                decided_at TEXT,
                payload TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS action_policies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                action_name TEXT NOT NULL UNIQUE,
                description TEXT,
                status TEXT NOT NULL DEFAULT 'needs_review',
                allow_green INTEGER NOT NULL DEFAULT 1,
                allow_amber INTEGER NOT NULL DEFAULT 1,
                allow_red INTEGER NOT NULL DEFAULT 0,
                approve_green INTEGER NOT NULL DEFAULT 0,
                approve_amber INTEGER NOT NULL DEFAULT 1,
                approve_red INTEGER NOT NULL DEFAULT 1,
                last_seen_at TEXT
            );

            CREATE TABLE IF NOT EXISTS policy_settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS watchdog_runs (
                id TEXT PRIMARY KEY,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                rescored INTEGER NOT NULL DEFAULT 0,
                changes INTEGER NOT NULL DEFAULT 0,
                new_red TEXT NOT NULL DEFAULT '[]',
                resolved_red TEXT NOT NULL DEFAULT '[]'
            );

            CREATE INDEX IF NOT EXISTS idx_events_agent ON events_canonical(agent_id);
            CREATE INDEX IF NOT EXISTS idx_signals_agent ON agent_signals(agent_id);
            CREATE INDEX IF NOT EXISTS idx_scores_agent ON risk_scores(agent_id);
            CREATE INDEX IF NOT EXISTS idx_approvals_pair ON approvals(agent_id, action);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_approvals_one_pending
                ON approvals(agent_id, action) WHERE status = 'pending';
            "#,
        )?;

        info!("Database initialized");
        Ok(())
    }

    /// Begin an immediate transaction spanning multiple statements.
    /// Rolls back on drop unless committed.
    pub fn begin(&self) -> anyhow::Result<rusqlite::Transaction<'_>> {
        Ok(rusqlite::Transaction::new_unchecked(
            &self.conn,
            rusqlite::TransactionBehavior::Immediate,
        )?)
    }

    // ------------------------------------------------------------------
    // Canonical events
    // ------------------------------------------------------------------

    /// Store a canonical event. Returns false when the event_id was
    /// already recorded (idempotent replay).
    pub fn insert_event(&self, event: &CanonicalEvent) -> anyhow::Result<bool> {
        let changed = self.conn.execute(
            r#"
            INSERT OR IGNORE INTO events_canonical
                (event_id, event_type, event_time, agent_id, platform, project_id, location, owner_email, payload_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                event.event_id,
                event.event_type,
                event.event_time.to_rfc3339(),
                event.agent_id,
                event.platform,
                event.project_id,
                event.location,
                event.owner_email,
                event.payload.to_string(),
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn count_events(&self) -> anyhow::Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM events_canonical", [], |row| row.get(0))?)
    }

    // ------------------------------------------------------------------
    // Agents
    // ------------------------------------------------------------------

    pub fn insert_agent(&self, agent: &AgentRecord) -> anyhow::Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO agents
                (agent_id, platform, project_id, location, owner_email, data_class, output_scope, autonomy, dlp_template, external_tools, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                agent.agent_id,
                agent.platform,
                agent.project_id,
                agent.location,
                agent.owner_email,
                agent.data_class.to_string(),
                serde_json::to_string(&agent.output_scope)?,
                agent.autonomy.to_string(),
                agent.dlp_template,
                serde_json::to_string(&agent.external_tools)?,
                agent.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn update_agent(&self, agent: &AgentRecord) -> anyhow::Result<()> {
        self.conn.execute(
            r#"
            UPDATE agents
            SET platform = ?2, project_id = ?3, location = ?4, owner_email = ?5,
                data_class = ?6, output_scope = ?7, autonomy = ?8, dlp_template = ?9,
                external_tools = ?10, updated_at = ?11
            WHERE agent_id = ?1
            "#,
            params![
                agent.agent_id,
                agent.platform,
                agent.project_id,
                agent.location,
                agent.owner_email,
                agent.data_class.to_string(),
                serde_json::to_string(&agent.output_scope)?,
                agent.autonomy.to_string(),
                agent.dlp_template,
                serde_json::to_string(&agent.external_tools)?,
                agent.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_agent(&self, agent_id: &str) -> anyhow::Result<Option<AgentRecord>> {
        Ok(self
            .conn
            .query_row(
                r#"
                SELECT agent_id, platform, project_id, location, owner_email, data_class,
                       output_scope, autonomy, dlp_template, external_tools, updated_at
                FROM agents WHERE agent_id = ?1
                "#,
                [agent_id],
                Self::map_agent,
            )
            .optional()?)
    }

    pub fn list_agents(&self) -> anyhow::Result<Vec<AgentRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT agent_id, platform, project_id, location, owner_email, data_class,
                   output_scope, autonomy, dlp_template, external_tools, updated_at
            FROM agents ORDER BY agent_id
            "#,
        )?;
        let agents = stmt
            .query_map([], Self::map_agent)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(agents)
    }

    pub fn count_agents(&self) -> anyhow::Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM agents", [], |row| row.get(0))?)
    }

    /// Write derivation results back onto the agent row
    pub fn mirror_classification(
        &self,
        agent_id: &str,
        data_class: DataClass,
        output_scope: &[ScopeToken],
        autonomy: Autonomy,
        dlp_template: Option<&str>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        self.conn.execute(
            r#"
            UPDATE agents
            SET data_class = ?2, output_scope = ?3, autonomy = ?4, dlp_template = ?5, updated_at = ?6
            WHERE agent_id = ?1
            "#,
            params![
                agent_id,
                data_class.to_string(),
                serde_json::to_string(output_scope)?,
                autonomy.to_string(),
                dlp_template,
                now.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn map_agent(row: &rusqlite::Row<'_>) -> rusqlite::Result<AgentRecord> {
        Ok(AgentRecord {
            agent_id: row.get(0)?,
            platform: row.get(1)?,
            project_id: row.get(2)?,
            location: row.get(3)?,
            owner_email: row.get(4)?,
            data_class: parse_col(5, row.get(5)?)?,
            output_scope: parse_json_col(6, row.get(6)?)?,
            autonomy: parse_col(7, row.get(7)?)?,
            dlp_template: row.get(8)?,
            external_tools: parse_json_col(9, row.get(9)?)?,
            updated_at: parse_ts(&row.get::<_, String>(10)?),
        })
    }

    // ------------------------------------------------------------------
    // Classification rules + audience
    // ------------------------------------------------------------------

    pub fn list_classification_rules(&self) -> anyhow::Result<Vec<ClassificationRule>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, selector_type, selector_value, data_class, default_output_scope, required_dlp_template
            FROM classification_map ORDER BY id
            "#,
        )?;
        let rules = stmt
            .query_map([], |row| {
                Ok(ClassificationRule {
                    id: row.get(0)?,
                    selector_type: parse_col(1, row.get(1)?)?,
                    selector_value: row.get(2)?,
                    data_class: parse_col(3, row.get(3)?)?,
                    default_output_scope: parse_json_col(4, row.get(4)?)?,
                    required_dlp_template: row.get(5)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rules)
    }

    pub fn count_classification_rules(&self) -> anyhow::Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM classification_map", [], |row| row.get(0))?)
    }

    /// Replace the whole classification rule set and audience table in
    /// one transaction. Incremental edits are not supported.
    pub fn replace_classifications(
        &self,
        rules: &[ClassificationRule],
        audience: &[AudienceRecord],
    ) -> anyhow::Result<()> {
        let tx = self.begin()?;
        self.conn.execute("DELETE FROM classification_map", [])?;
        self.conn.execute("DELETE FROM project_audience", [])?;
        for rule in rules {
            self.conn.execute(
                r#"
                INSERT INTO classification_map
                    (selector_type, selector_value, data_class, default_output_scope, required_dlp_template)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    rule.selector_type.to_string(),
                    rule.selector_value,
                    rule.data_class.to_string(),
                    serde_json::to_string(&rule.default_output_scope)?,
                    rule.required_dlp_template,
                ],
            )?;
        }
        for record in audience {
            self.conn.execute(
                "INSERT INTO project_audience (project_id, reach_count) VALUES (?1, ?2)",
                params![record.project_id, record.reach_count],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn list_audience(&self) -> anyhow::Result<Vec<AudienceRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT project_id, reach_count FROM project_audience ORDER BY project_id")?;
        let records = stmt
            .query_map([], |row| {
                Ok(AudienceRecord {
                    project_id: row.get(0)?,
                    reach_count: row.get(1)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(records)
    }

    pub fn audience_map(&self) -> anyhow::Result<HashMap<String, i64>> {
        Ok(self
            .list_audience()?
            .into_iter()
            .map(|a| (a.project_id, a.reach_count))
            .collect())
    }

    // ------------------------------------------------------------------
    // Signal snapshots
    // ------------------------------------------------------------------

    pub fn insert_snapshot(
        &self,
        agent_id: &str,
        signals: &SignalContext,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO agent_signals (agent_id, data_class, output_scope, reach, autonomy, external_tools, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                agent_id,
                signals.data_class.to_string(),
                serde_json::to_string(&signals.output_scope)?,
                signals.reach.to_string(),
                signals.autonomy.to_string(),
                serde_json::to_string(&signals.external_tools)?,
                now.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn latest_snapshot(&self, agent_id: &str) -> anyhow::Result<Option<SignalSnapshot>> {
        Ok(self
            .conn
            .query_row(
                r#"
                SELECT agent_id, data_class, output_scope, reach, autonomy, external_tools, updated_at
                FROM agent_signals WHERE agent_id = ?1 ORDER BY id DESC LIMIT 1
                "#,
                [agent_id],
                |row| {
                    Ok(SignalSnapshot {
                        agent_id: row.get(0)?,
                        signals: SignalContext {
                            data_class: parse_col(1, row.get(1)?)?,
                            output_scope: parse_json_col(2, row.get(2)?)?,
                            reach: parse_col(3, row.get(3)?)?,
                            autonomy: parse_col(4, row.get(4)?)?,
                            external_tools: parse_json_col(5, row.get(5)?)?,
                        },
                        updated_at: parse_ts(&row.get::<_, String>(6)?),
                    })
                },
            )
            .optional()?)
    }

    pub fn wipe_snapshots(&self) -> anyhow::Result<()> {
        self.conn.execute("DELETE FROM agent_signals", [])?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Risk scores
    // ------------------------------------------------------------------

    pub fn insert_score(
        &self,
        agent_id: &str,
        band: RiskBand,
        score: i64,
        reasons: &[String],
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO risk_scores (agent_id, band, score, reasons, computed_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                agent_id,
                band.to_string(),
                score,
                serde_json::to_string(reasons)?,
                now.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn latest_score(&self, agent_id: &str) -> anyhow::Result<Option<RiskScoreRecord>> {
        Ok(self
            .conn
            .query_row(
                r#"
                SELECT agent_id, band, score, reasons, computed_at
                FROM risk_scores WHERE agent_id = ?1 ORDER BY id DESC LIMIT 1
                "#,
                [agent_id],
                Self::map_score,
            )
            .optional()?)
    }

    /// Latest score row per agent
    pub fn current_scores(&self) -> anyhow::Result<Vec<RiskScoreRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT agent_id, band, score, reasons, computed_at
            FROM risk_scores rs
            WHERE id = (SELECT MAX(id) FROM risk_scores WHERE agent_id = rs.agent_id)
            ORDER BY agent_id
            "#,
        )?;
        let scores = stmt
            .query_map([], Self::map_score)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(scores)
    }

    /// Agents whose current band is red
    pub fn red_agents(&self) -> anyhow::Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT agent_id FROM risk_scores rs
            WHERE id = (SELECT MAX(id) FROM risk_scores WHERE agent_id = rs.agent_id)
              AND band = 'red'
            ORDER BY agent_id
            "#,
        )?;
        let agents = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(agents)
    }

    pub fn wipe_scores(&self) -> anyhow::Result<()> {
        self.conn.execute("DELETE FROM risk_scores", [])?;
        Ok(())
    }

    fn map_score(row: &rusqlite::Row<'_>) -> rusqlite::Result<RiskScoreRecord> {
        Ok(RiskScoreRecord {
            agent_id: row.get(0)?,
            band: parse_col(1, row.get(1)?)?,
            score: row.get(2)?,
            reasons: parse_json_col(3, row.get(3)?)?,
            computed_at: parse_ts(&row.get::<_, String>(4)?),
        })
    }

    // ------------------------------------------------------------------
    // Approvals
    // ------------------------------------------------------------------

    /// Insert a new approval. A second pending row for the same
    /// (agent, action) pair violates the partial unique index.
    pub fn insert_approval(&self, approval: &ApprovalRecord) -> anyhow::Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO approvals
                (id, agent_id, action, risk_band, status, requested_by, requested_at, decided_by, decided_at, payload)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                approval.id,
                approval.agent_id,
                approval.action,
                approval.risk_band.to_string(),
                approval.status.to_string(),
                approval.requested_by,
                approval.requested_at.to_rfc3339(),
                approval.decided_by,
                approval.decided_at.map(|t| t.to_rfc3339()),
                serde_json::to_string(&approval.payload)?,
            ],
        )?;
        Ok(())
    }

    pub fn get_approval(&self, id: &str) -> anyhow::Result<Option<ApprovalRecord>> {
        Ok(self
            .conn
            .query_row(
                r#"
                SELECT id, agent_id, action, risk_band, status, requested_by, requested_at, decided_by, decided_at, payload
                FROM approvals WHERE id = ?1
                "#,
                [id],
                Self::map_approval,
            )
            .optional()?)
    }

    /// The single most recently requested approval for the pair
    pub fn latest_approval_for(
        &self,
        agent_id: &str,
        action: &str,
    ) -> anyhow::Result<Option<ApprovalRecord>> {
        Ok(self
            .conn
            .query_row(
                r#"
                SELECT id, agent_id, action, risk_band, status, requested_by, requested_at, decided_by, decided_at, payload
                FROM approvals WHERE agent_id = ?1 AND action = ?2
                ORDER BY requested_at DESC, rowid DESC LIMIT 1
                "#,
                params![agent_id, action],
                Self::map_approval,
            )
            .optional()?)
    }

    /// Status + payload update (lifecycle transitions)
    pub fn set_approval_status(
        &self,
        id: &str,
        status: ApprovalStatus,
        payload: &ApprovalPayload,
    ) -> anyhow::Result<()> {
        self.conn.execute(
            "UPDATE approvals SET status = ?2, payload = ?3 WHERE id = ?1",
            params![id, status.to_string(), serde_json::to_string(payload)?],
        )?;
        Ok(())
    }

    /// Record an explicit human decision
    pub fn record_decision(
        &self,
        id: &str,
        status: ApprovalStatus,
        decided_by: &str,
        decided_at: DateTime<Utc>,
        payload: &ApprovalPayload,
    ) -> anyhow::Result<()> {
        self.conn.execute(
            r#"
            UPDATE approvals
            SET status = ?2, decided_by = ?3, decided_at = ?4, payload = ?5
            WHERE id = ?1
            "#,
            params![
                id,
                status.to_string(),
                decided_by,
                decided_at.to_rfc3339(),
                serde_json::to_string(payload)?,
            ],
        )?;
        Ok(())
    }

    pub fn list_approvals(
        &self,
        status: Option<ApprovalStatus>,
        limit: usize,
    ) -> anyhow::Result<Vec<ApprovalRecord>> {
        let mut out = Vec::new();
        match status {
            Some(s) => {
                let mut stmt = self.conn.prepare(
                    r#"
                    SELECT id, agent_id, action, risk_band, status, requested_by, requested_at, decided_by, decided_at, payload
                    FROM approvals WHERE status = ?1
                    ORDER BY requested_at DESC, rowid DESC LIMIT ?2
                    "#,
                )?;
                let rows = stmt.query_map(params![s.to_string(), limit], Self::map_approval)?;
                out.extend(rows.filter_map(|r| r.ok()));
            }
            None => {
                let mut stmt = self.conn.prepare(
                    r#"
                    SELECT id, agent_id, action, risk_band, status, requested_by, requested_at, decided_by, decided_at, payload
                    FROM approvals
                    ORDER BY requested_at DESC, rowid DESC LIMIT ?1
                    "#,
                )?;
                let rows = stmt.query_map([limit], Self::map_approval)?;
                out.extend(rows.filter_map(|r| r.ok()));
            }
        }
        Ok(out)
    }

    pub fn approvals_for_agent(
        &self,
        agent_id: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<ApprovalRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, agent_id, action, risk_band, status, requested_by, requested_at, decided_by, decided_at, payload
            FROM approvals WHERE agent_id = ?1
            ORDER BY requested_at DESC, rowid DESC LIMIT ?2
            "#,
        )?;
        let approvals = stmt
            .query_map(params![agent_id, limit], Self::map_approval)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(approvals)
    }

    /// Pending or approved rows for an action name (cascade targets)
    pub fn actionable_approvals_for_action(
        &self,
        action: &str,
    ) -> anyhow::Result<Vec<ApprovalRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, agent_id, action, risk_band, status, requested_by, requested_at, decided_by, decided_at, payload
            FROM approvals WHERE action = ?1 AND status IN ('pending', 'approved')
            "#,
        )?;
        let approvals = stmt
            .query_map([action], Self::map_approval)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(approvals)
    }

    pub fn approval_status_counts(&self) -> anyhow::Result<Vec<(ApprovalStatus, i64)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM approvals GROUP BY status")?;
        let counts = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .filter_map(|r| r.ok())
            .filter_map(|(status, count)| status.parse().ok().map(|s| (s, count)))
            .collect();
        Ok(counts)
    }

    fn map_approval(row: &rusqlite::Row<'_>) -> rusqlite::Result<ApprovalRecord> {
        Ok(ApprovalRecord {
            id: row.get(0)?,
            agent_id: row.get(1)?,
            action: row.get(2)?,
            risk_band: parse_col(3, row.get(3)?)?,
            status: parse_col(4, row.get(4)?)?,
            requested_by: row.get(5)?,
            requested_at: parse_ts(&row.get::<_, String>(6)?),
            decided_by: row.get(7)?,
            decided_at: row.get::<_, Option<String>>(8)?.map(|t| parse_ts(&t)),
            payload: parse_json_col(9, row.get(9)?)?,
        })
    }

    // ------------------------------------------------------------------
    // Action policies
    // ------------------------------------------------------------------

    /// Create the row with the default posture on first sight of an
    /// action name; refresh last_seen_at either way.
    pub fn ensure_action_policy(
        &self,
        action_name: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<ActionPolicyRecord> {
        self.conn.execute(
            r#"
            INSERT OR IGNORE INTO action_policies (action_name, description, status, last_seen_at)
            VALUES (?1, ?2, 'needs_review', ?3)
            "#,
            params![
                action_name,
                format!("Auto-discovered action {action_name}"),
                now.to_rfc3339(),
            ],
        )?;
        self.conn.execute(
            "UPDATE action_policies SET last_seen_at = ?2 WHERE action_name = ?1",
            params![action_name, now.to_rfc3339()],
        )?;
        self.get_action_policy_by_name(action_name)?
            .ok_or_else(|| anyhow::anyhow!("action policy row missing after insert"))
    }

    pub fn get_action_policy(&self, id: i64) -> anyhow::Result<Option<ActionPolicyRecord>> {
        Ok(self
            .conn
            .query_row(
                r#"
                SELECT id, action_name, description, status, allow_green, allow_amber, allow_red,
                       approve_green, approve_amber, approve_red, last_seen_at
                FROM action_policies WHERE id = ?1
                "#,
                [id],
                Self::map_action_policy,
            )
            .optional()?)
    }

    pub fn get_action_policy_by_name(
        &self,
        action_name: &str,
    ) -> anyhow::Result<Option<ActionPolicyRecord>> {
        Ok(self
            .conn
            .query_row(
                r#"
                SELECT id, action_name, description, status, allow_green, allow_amber, allow_red,
                       approve_green, approve_amber, approve_red, last_seen_at
                FROM action_policies WHERE action_name = ?1
                "#,
                [action_name],
                Self::map_action_policy,
            )
            .optional()?)
    }

    pub fn list_action_policies(&self) -> anyhow::Result<Vec<ActionPolicyRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, action_name, description, status, allow_green, allow_amber, allow_red,
                   approve_green, approve_amber, approve_red, last_seen_at
            FROM action_policies ORDER BY action_name
            "#,
        )?;
        let policies = stmt
            .query_map([], Self::map_action_policy)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(policies)
    }

    pub fn count_action_policies(&self) -> anyhow::Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM action_policies", [], |row| row.get(0))?)
    }

    pub fn save_action_policy(&self, policy: &ActionPolicyRecord) -> anyhow::Result<()> {
        self.conn.execute(
            r#"
            UPDATE action_policies
            SET description = ?2, status = ?3, allow_green = ?4, allow_amber = ?5, allow_red = ?6,
                approve_green = ?7, approve_amber = ?8, approve_red = ?9
            WHERE id = ?1
            "#,
            params![
                policy.id,
                policy.description,
                policy.status,
                policy.allow.green as i64,
                policy.allow.amber as i64,
                policy.allow.red as i64,
                policy.approval.green as i64,
                policy.approval.amber as i64,
                policy.approval.red as i64,
            ],
        )?;
        Ok(())
    }

    fn map_action_policy(row: &rusqlite::Row<'_>) -> rusqlite::Result<ActionPolicyRecord> {
        Ok(ActionPolicyRecord {
            id: row.get(0)?,
            action_name: row.get(1)?,
            description: row.get(2)?,
            status: row.get(3)?,
            allow: BandFlags {
                green: row.get::<_, i64>(4)? != 0,
                amber: row.get::<_, i64>(5)? != 0,
                red: row.get::<_, i64>(6)? != 0,
            },
            approval: BandFlags {
                green: row.get::<_, i64>(7)? != 0,
                amber: row.get::<_, i64>(8)? != 0,
                red: row.get::<_, i64>(9)? != 0,
            },
            last_seen_at: row.get::<_, Option<String>>(10)?.map(|t| parse_ts(&t)),
        })
    }

    // ------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------

    pub fn get_setting(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT value FROM policy_settings WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO policy_settings (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
            params![key, value],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Watchdog runs
    // ------------------------------------------------------------------

    pub fn insert_watchdog_run(&self, run: &WatchdogRunRecord) -> anyhow::Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO watchdog_runs (id, started_at, finished_at, rescored, changes, new_red, resolved_red)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                run.id,
                run.started_at.to_rfc3339(),
                run.finished_at.map(|t| t.to_rfc3339()),
                run.rescored,
                run.changes,
                serde_json::to_string(&run.new_red)?,
                serde_json::to_string(&run.resolved_red)?,
            ],
        )?;
        Ok(())
    }

    pub fn count_watchdog_runs(&self) -> anyhow::Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM watchdog_runs", [], |row| row.get(0))?)
    }
}

/// True when the error is the store's uniqueness guard firing
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<rusqlite::Error>(),
        Some(rusqlite::Error::SqliteFailure(f, _)) if f.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn parse_col<T>(idx: usize, raw: String) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = EngineError>,
{
    raw.parse().map_err(|e: EngineError| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_json_col<T: serde::de::DeserializeOwned>(idx: usize, raw: String) -> rusqlite::Result<T> {
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_ts(raw: &str) -> DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .unwrap_or_default()
        .with_timezone(&Utc)
}
