//! SQLite-backed store
//!
//! One versioned schema. Migrations are applied in order at open time and
//! recorded in `schema_migrations`; there is no fallback schema. Every table
//! keeps query columns next to a `record_json` blob that reconstructs the
//! full record.

use super::{MetricsStore, StoreError};
use crate::model::creative::{Creative, CreativeStatus, MetricSnapshot};
use crate::model::experiment::Experiment;
use crate::model::fatigue::FatigueVerdict;
use crate::model::intent::PlatformIntent;
use crate::model::rotation::RotationSchedule;
use crate::model::selection::{ImplementationStatus, SelectionResult};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;
use uuid::Uuid;

/// Ordered schema migrations: (version, SQL)
const MIGRATIONS: &[(i64, &str)] = &[
    (
        1,
        "CREATE TABLE creatives (
            id TEXT PRIMARY KEY,
            ad_group_id TEXT NOT NULL,
            campaign_id TEXT NOT NULL,
            status TEXT NOT NULL,
            record_json TEXT NOT NULL
        );
        CREATE TABLE metric_snapshots (
            creative_id TEXT NOT NULL,
            date TEXT NOT NULL,
            impressions INTEGER NOT NULL,
            clicks INTEGER NOT NULL,
            conversions INTEGER NOT NULL,
            cost REAL NOT NULL,
            revenue REAL NOT NULL,
            record_json TEXT NOT NULL,
            PRIMARY KEY (creative_id, date)
        );
        CREATE TABLE fatigue_verdicts (
            creative_id TEXT NOT NULL,
            analysis_date TEXT NOT NULL,
            severity TEXT NOT NULL,
            score REAL NOT NULL,
            analyzed_at TEXT NOT NULL,
            record_json TEXT NOT NULL,
            PRIMARY KEY (creative_id, analysis_date)
        );
        CREATE TABLE experiments (
            id TEXT PRIMARY KEY,
            ad_group_id TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            record_json TEXT NOT NULL
        );
        CREATE TABLE selection_results (
            id TEXT PRIMARY KEY,
            experiment_id TEXT NOT NULL,
            decision TEXT NOT NULL,
            winner TEXT,
            implementation_status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            record_json TEXT NOT NULL
        );",
    ),
    (
        2,
        "CREATE TABLE rotation_schedules (
            ad_group_id TEXT PRIMARY KEY,
            strategy TEXT NOT NULL,
            effective_from TEXT NOT NULL,
            record_json TEXT NOT NULL
        );
        CREATE TABLE platform_intents (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            kind TEXT NOT NULL,
            recorded_at TEXT NOT NULL,
            record_json TEXT NOT NULL
        );",
    ),
    (
        3,
        "CREATE INDEX idx_creatives_ad_group ON creatives(ad_group_id);
        CREATE INDEX idx_creatives_campaign ON creatives(campaign_id);
        CREATE INDEX idx_experiments_ad_group ON experiments(ad_group_id);
        CREATE INDEX idx_selection_results_experiment ON selection_results(experiment_id);",
    ),
];

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(mut conn: Connection) -> Result<Self, StoreError> {
        migrate(&mut conn)?;
        Ok(SqliteStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Highest applied migration version
    pub async fn schema_version(&self) -> Result<i64, StoreError> {
        self.call(|conn| {
            Ok(conn.query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
                [],
                |row| row.get(0),
            )?)
        })
        .await
    }

    /// Run blocking SQLite work off the async executor
    async fn call<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Database("connection lock poisoned".to_string()))?;
            f(&mut *guard)
        })
        .await
        .map_err(|e| StoreError::Database(format!("store task failed: {}", e)))?
    }
}

fn migrate(conn: &mut Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );",
    )?;

    let current: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    for (version, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > current) {
        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.execute(
            "INSERT INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
            params![version, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;
        info!(version = version, "Applied schema migration");
    }

    Ok(())
}

fn decode<T: DeserializeOwned>(json: &str) -> Result<T, StoreError> {
    Ok(serde_json::from_str(json)?)
}

fn decode_all<T: DeserializeOwned>(rows: Vec<String>) -> Result<Vec<T>, StoreError> {
    rows.iter().map(|json| decode(json)).collect()
}

/// Collect the `record_json` column of a query
fn query_records(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, |row| row.get::<_, String>(0))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn query_record(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Option<String>, StoreError> {
    Ok(conn
        .query_row(sql, params, |row| row.get::<_, String>(0))
        .optional()?)
}

fn day(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

#[async_trait]
impl MetricsStore for SqliteStore {
    async fn get_creative(&self, id: &str) -> Result<Option<Creative>, StoreError> {
        let id = id.to_string();
        self.call(move |conn| {
            query_record(
                conn,
                "SELECT record_json FROM creatives WHERE id = ?1",
                params![id],
            )?
            .map(|json| decode(&json))
            .transpose()
        })
        .await
    }

    async fn creatives_in_ad_group(&self, ad_group_id: &str) -> Result<Vec<Creative>, StoreError> {
        let ad_group_id = ad_group_id.to_string();
        self.call(move |conn| {
            decode_all(query_records(
                conn,
                "SELECT record_json FROM creatives WHERE ad_group_id = ?1 ORDER BY id",
                params![ad_group_id],
            )?)
        })
        .await
    }

    async fn creatives_in_campaign(&self, campaign_id: &str) -> Result<Vec<Creative>, StoreError> {
        let campaign_id = campaign_id.to_string();
        self.call(move |conn| {
            decode_all(query_records(
                conn,
                "SELECT record_json FROM creatives WHERE campaign_id = ?1 ORDER BY id",
                params![campaign_id],
            )?)
        })
        .await
    }

    async fn upsert_creative(&self, creative: &Creative) -> Result<(), StoreError> {
        let json = serde_json::to_string(creative)?;
        let creative = creative.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO creatives(id, ad_group_id, campaign_id, status, record_json)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    ad_group_id = excluded.ad_group_id,
                    campaign_id = excluded.campaign_id,
                    status = excluded.status,
                    record_json = excluded.record_json",
                params![
                    creative.id,
                    creative.ad_group_id,
                    creative.campaign_id,
                    creative.status.as_str(),
                    json
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn set_creative_status(
        &self,
        id: &str,
        status: CreativeStatus,
    ) -> Result<(), StoreError> {
        let id = id.to_string();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let json = query_record(
                &tx,
                "SELECT record_json FROM creatives WHERE id = ?1",
                params![id],
            )?
            .ok_or_else(|| StoreError::Missing(format!("creative {}", id)))?;

            let mut creative: Creative = decode(&json)?;
            creative.status = status;
            tx.execute(
                "UPDATE creatives SET status = ?2, record_json = ?3 WHERE id = ?1",
                params![id, status.as_str(), serde_json::to_string(&creative)?],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn snapshots(
        &self,
        creative_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<MetricSnapshot>, StoreError> {
        let creative_id = creative_id.to_string();
        self.call(move |conn| {
            decode_all(query_records(
                conn,
                "SELECT record_json FROM metric_snapshots
                 WHERE creative_id = ?1 AND date >= ?2 AND date <= ?3
                 ORDER BY date",
                params![creative_id, day(start), day(end)],
            )?)
        })
        .await
    }

    async fn record_snapshot(&self, snapshot: &MetricSnapshot) -> Result<(), StoreError> {
        let json = serde_json::to_string(snapshot)?;
        let s = snapshot.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO metric_snapshots
                    (creative_id, date, impressions, clicks, conversions, cost, revenue, record_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(creative_id, date) DO UPDATE SET
                    impressions = excluded.impressions,
                    clicks = excluded.clicks,
                    conversions = excluded.conversions,
                    cost = excluded.cost,
                    revenue = excluded.revenue,
                    record_json = excluded.record_json",
                params![
                    s.creative_id,
                    day(s.date),
                    s.impressions as i64,
                    s.clicks as i64,
                    s.conversions as i64,
                    s.cost,
                    s.revenue,
                    json
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn upsert_fatigue_verdict(&self, verdict: &FatigueVerdict) -> Result<(), StoreError> {
        let json = serde_json::to_string(verdict)?;
        let v = verdict.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO fatigue_verdicts
                    (creative_id, analysis_date, severity, score, analyzed_at, record_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(creative_id, analysis_date) DO UPDATE SET
                    severity = excluded.severity,
                    score = excluded.score,
                    analyzed_at = excluded.analyzed_at,
                    record_json = excluded.record_json",
                params![
                    v.creative_id,
                    day(v.analysis_date),
                    v.severity.as_str(),
                    v.score,
                    v.analyzed_at.to_rfc3339(),
                    json
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn fatigue_verdicts(
        &self,
        creative_id: &str,
        since: NaiveDate,
    ) -> Result<Vec<FatigueVerdict>, StoreError> {
        let creative_id = creative_id.to_string();
        self.call(move |conn| {
            decode_all(query_records(
                conn,
                "SELECT record_json FROM fatigue_verdicts
                 WHERE creative_id = ?1 AND analysis_date >= ?2
                 ORDER BY analysis_date",
                params![creative_id, day(since)],
            )?)
        })
        .await
    }

    async fn insert_experiment(&self, experiment: &Experiment) -> Result<(), StoreError> {
        let json = serde_json::to_string(experiment)?;
        let e = experiment.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO experiments(id, ad_group_id, status, created_at, record_json)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    e.id.to_string(),
                    e.ad_group_id,
                    e.status.as_str(),
                    e.created_at.to_rfc3339(),
                    json
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn update_experiment(&self, experiment: &Experiment) -> Result<(), StoreError> {
        let json = serde_json::to_string(experiment)?;
        let e = experiment.clone();
        self.call(move |conn| {
            let changed = conn.execute(
                "UPDATE experiments SET status = ?2, record_json = ?3 WHERE id = ?1",
                params![e.id.to_string(), e.status.as_str(), json],
            )?;
            if changed == 0 {
                return Err(StoreError::Missing(format!("experiment {}", e.id)));
            }
            Ok(())
        })
        .await
    }

    async fn get_experiment(&self, id: Uuid) -> Result<Option<Experiment>, StoreError> {
        self.call(move |conn| {
            query_record(
                conn,
                "SELECT record_json FROM experiments WHERE id = ?1",
                params![id.to_string()],
            )?
            .map(|json| decode(&json))
            .transpose()
        })
        .await
    }

    async fn list_experiments(
        &self,
        ad_group_id: Option<&str>,
    ) -> Result<Vec<Experiment>, StoreError> {
        let ad_group_id = ad_group_id.map(str::to_string);
        self.call(move |conn| {
            let rows = match ad_group_id {
                Some(group) => query_records(
                    conn,
                    "SELECT record_json FROM experiments WHERE ad_group_id = ?1 ORDER BY created_at",
                    params![group],
                )?,
                None => query_records(
                    conn,
                    "SELECT record_json FROM experiments ORDER BY created_at",
                    [],
                )?,
            };
            decode_all(rows)
        })
        .await
    }

    async fn insert_selection(&self, result: &SelectionResult) -> Result<(), StoreError> {
        let json = serde_json::to_string(result)?;
        let r = result.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO selection_results
                    (id, experiment_id, decision, winner, implementation_status, created_at, record_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    r.id.to_string(),
                    r.experiment_id.to_string(),
                    r.decision.as_str(),
                    r.winner.map(|w| w.as_str()),
                    r.implementation_status.as_str(),
                    r.created_at.to_rfc3339(),
                    json
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_selection(&self, id: Uuid) -> Result<Option<SelectionResult>, StoreError> {
        self.call(move |conn| {
            query_record(
                conn,
                "SELECT record_json FROM selection_results WHERE id = ?1",
                params![id.to_string()],
            )?
            .map(|json| decode(&json))
            .transpose()
        })
        .await
    }

    async fn selections_for_experiment(
        &self,
        experiment_id: Uuid,
    ) -> Result<Vec<SelectionResult>, StoreError> {
        self.call(move |conn| {
            decode_all(query_records(
                conn,
                "SELECT record_json FROM selection_results
                 WHERE experiment_id = ?1 ORDER BY created_at",
                params![experiment_id.to_string()],
            )?)
        })
        .await
    }

    async fn set_implementation_status(
        &self,
        id: Uuid,
        status: ImplementationStatus,
    ) -> Result<(), StoreError> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let json = query_record(
                &tx,
                "SELECT record_json FROM selection_results WHERE id = ?1",
                params![id.to_string()],
            )?
            .ok_or_else(|| StoreError::Missing(format!("selection {}", id)))?;

            let mut result: SelectionResult = decode(&json)?;
            result.implementation_status = status;
            tx.execute(
                "UPDATE selection_results SET implementation_status = ?2, record_json = ?3
                 WHERE id = ?1",
                params![
                    id.to_string(),
                    status.as_str(),
                    serde_json::to_string(&result)?
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn upsert_rotation_schedule(
        &self,
        schedule: &RotationSchedule,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(schedule)?;
        let s = schedule.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO rotation_schedules(ad_group_id, strategy, effective_from, record_json)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(ad_group_id) DO UPDATE SET
                    strategy = excluded.strategy,
                    effective_from = excluded.effective_from,
                    record_json = excluded.record_json",
                params![
                    s.ad_group_id,
                    s.strategy.as_str(),
                    s.effective_from.to_rfc3339(),
                    json
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_rotation_schedule(
        &self,
        ad_group_id: &str,
    ) -> Result<Option<RotationSchedule>, StoreError> {
        let ad_group_id = ad_group_id.to_string();
        self.call(move |conn| {
            query_record(
                conn,
                "SELECT record_json FROM rotation_schedules WHERE ad_group_id = ?1",
                params![ad_group_id],
            )?
            .map(|json| decode(&json))
            .transpose()
        })
        .await
    }

    async fn append_intent(&self, intent: &PlatformIntent) -> Result<(), StoreError> {
        let json = serde_json::to_string(intent)?;
        let i = intent.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO platform_intents(id, kind, recorded_at, record_json)
                 VALUES (?1, ?2, ?3, ?4)",
                params![i.id, i.action.kind(), i.recorded_at.to_rfc3339(), json],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_intents(&self) -> Result<Vec<PlatformIntent>, StoreError> {
        self.call(|conn| {
            decode_all(query_records(
                conn,
                "SELECT record_json FROM platform_intents ORDER BY seq",
                [],
            )?)
        })
        .await
    }
}
