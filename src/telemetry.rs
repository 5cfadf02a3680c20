//! Telemetry and logging infrastructure
//!
//! - Console logging (human-readable, verbose mode only)
//! - JSON file logging through a daily rolling appender
//! - SQLite storage for turns, tool calls and reloads (queryable history)

use crate::events::TurnResult;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

const LOG_FILE_PREFIX: &str = "pierre.log";

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the life of the process.
pub fn init_logging(log_dir: &Path, verbose: bool) -> anyhow::Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug,hyper=info,reqwest=info,h2=info,rustls=info,rustyline=info")
        } else {
            EnvFilter::new("info,hyper=warn,reqwest=warn,h2=warn,rustls=warn,rustyline=warn")
        }
    });

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json().with_writer(non_blocking));

    if verbose {
        registry
            .with(fmt::layer().with_target(false).compact().with_writer(std::io::stderr))
            .try_init()
            .ok();
    } else {
        registry.try_init().ok();
    }

    tracing::info!(log_dir = %log_dir.display(), verbose, "Logging initialized");
    Ok(guard)
}

/// How a reload was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadTrigger {
    /// The model called `reload_tools`
    Tool,
    /// The tools directory watcher fired
    Watcher,
    /// `pierre tools --reload`
    Cli,
}

impl ReloadTrigger {
    fn as_str(&self) -> &'static str {
        match self {
            ReloadTrigger::Tool => "tool",
            ReloadTrigger::Watcher => "watcher",
            ReloadTrigger::Cli => "cli",
        }
    }
}

/// SQLite-backed record of one process run
pub struct TelemetryStore {
    session_id: Uuid,
    started_at: DateTime<Utc>,
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl TelemetryStore {
    /// Open (creating if needed) the database and register a new session
    pub fn open(path: &Path, model: Option<&str>, provider: Option<&str>) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;

        let session_id = Uuid::new_v4();
        let started_at = Utc::now();
        conn.execute(
            "INSERT INTO sessions (id, started_at, model, provider) VALUES (?1, ?2, ?3, ?4)",
            params![session_id.to_string(), started_at.to_rfc3339(), model, provider],
        )?;

        Ok(Self {
            session_id,
            started_at,
            path: path.to_path_buf(),
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                started_at TEXT NOT NULL,
                model TEXT,
                provider TEXT
            );

            CREATE TABLE IF NOT EXISTS interactions (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                input TEXT NOT NULL,
                output TEXT,
                reason TEXT,
                iterations INTEGER,
                generation INTEGER,
                input_tokens INTEGER,
                output_tokens INTEGER,
                duration_ms INTEGER,
                error TEXT,
                FOREIGN KEY (session_id) REFERENCES sessions(id)
            );

            CREATE TABLE IF NOT EXISTS tool_calls (
                id TEXT PRIMARY KEY,
                interaction_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                tool_name TEXT NOT NULL,
                arguments TEXT,
                output TEXT,
                is_error INTEGER NOT NULL,
                duration_ms INTEGER,
                FOREIGN KEY (interaction_id) REFERENCES interactions(id),
                FOREIGN KEY (session_id) REFERENCES sessions(id)
            );

            CREATE TABLE IF NOT EXISTS reloads (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                trigger TEXT NOT NULL,
                identifier TEXT NOT NULL,
                tool_count INTEGER NOT NULL,
                generation INTEGER NOT NULL,
                error TEXT,
                FOREIGN KEY (session_id) REFERENCES sessions(id)
            );

            CREATE INDEX IF NOT EXISTS idx_interactions_session ON interactions(session_id);
            CREATE INDEX IF NOT EXISTS idx_tool_calls_name ON tool_calls(tool_name);
            CREATE INDEX IF NOT EXISTS idx_reloads_session ON reloads(session_id);
            "#,
        )
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn db_path(&self) -> &Path {
        &self.path
    }

    /// Record a completed turn and the tool calls it made
    pub fn record_turn(&self, input: &str, result: &TurnResult, duration_ms: u64) {
        let interaction_id = Uuid::new_v4();

        tracing::info!(
            interaction_id = %interaction_id,
            reason = result.reason.as_str(),
            iterations = result.iterations,
            tool_calls = result.tool_calls.len(),
            generation = result.generation,
            duration_ms,
            "Turn complete"
        );

        let Ok(mut conn) = self.conn.lock() else {
            tracing::error!("Failed to lock telemetry db");
            return;
        };
        if let Err(e) = self.insert_turn(&mut conn, interaction_id, input, result, duration_ms) {
            tracing::error!(error = %e, "Failed to record turn");
        }
    }

    fn insert_turn(
        &self,
        conn: &mut Connection,
        interaction_id: Uuid,
        input: &str,
        result: &TurnResult,
        duration_ms: u64,
    ) -> rusqlite::Result<()> {
        let now = Utc::now().to_rfc3339();
        let tx = conn.transaction()?;
        tx.execute(
            r#"INSERT INTO interactions
               (id, session_id, timestamp, input, output, reason, iterations,
                generation, input_tokens, output_tokens, duration_ms)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#,
            params![
                interaction_id.to_string(),
                self.session_id.to_string(),
                now,
                input,
                result.output,
                result.reason.as_str(),
                result.iterations as i64,
                result.generation as i64,
                result.usage.input as i64,
                result.usage.output as i64,
                duration_ms as i64
            ],
        )?;
        for call in &result.tool_calls {
            tx.execute(
                r#"INSERT INTO tool_calls
                   (id, interaction_id, session_id, timestamp, tool_name, arguments,
                    output, is_error, duration_ms)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
                params![
                    Uuid::new_v4().to_string(),
                    interaction_id.to_string(),
                    self.session_id.to_string(),
                    now,
                    call.name,
                    call.arguments.to_string(),
                    call.output,
                    call.is_error,
                    call.duration_ms as i64
                ],
            )?;
        }
        tx.commit()
    }

    /// Record a turn that failed with an error
    pub fn record_error(&self, input: &str, error: &str, duration_ms: u64) {
        let Ok(conn) = self.conn.lock() else {
            tracing::error!("Failed to lock telemetry db");
            return;
        };
        let saved = conn.execute(
            r#"INSERT INTO interactions (id, session_id, timestamp, input, duration_ms, error)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
            params![
                Uuid::new_v4().to_string(),
                self.session_id.to_string(),
                Utc::now().to_rfc3339(),
                input,
                duration_ms as i64,
                error
            ],
        );
        if let Err(e) = saved {
            tracing::error!(error = %e, "Failed to record error");
        }
    }

    pub fn record_reload(
        &self,
        trigger: ReloadTrigger,
        identifier: &str,
        tool_count: usize,
        generation: u64,
        error: Option<&str>,
    ) {
        let Ok(conn) = self.conn.lock() else {
            tracing::error!("Failed to lock telemetry db");
            return;
        };
        let saved = conn.execute(
            r#"INSERT INTO reloads (session_id, timestamp, trigger, identifier, tool_count, generation, error)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
            params![
                self.session_id.to_string(),
                Utc::now().to_rfc3339(),
                trigger.as_str(),
                identifier,
                tool_count as i64,
                generation as i64,
                error
            ],
        );
        if let Err(e) = saved {
            tracing::error!(error = %e, "Failed to record reload");
        }
    }

    /// Most recent interactions across all sessions, newest first
    pub fn recent_interactions(&self, limit: usize) -> anyhow::Result<Vec<InteractionSummary>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(
            r#"
            SELECT i.timestamp, i.input, i.output, i.reason, i.duration_ms, i.error,
                   (SELECT COUNT(*) FROM tool_calls t WHERE t.interaction_id = i.id)
            FROM interactions i
            ORDER BY i.timestamp DESC, i.rowid DESC
            LIMIT ?1
            "#,
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
            Ok(InteractionSummary {
                timestamp: row.get(0)?,
                input: row.get(1)?,
                output: row.get(2)?,
                reason: row.get(3)?,
                duration_ms: row.get::<_, Option<i64>>(4)?.map(|d| d as u64),
                error: row.get(5)?,
                tool_calls: row.get::<_, i64>(6)? as u64,
            })
        })?;

        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Per-tool usage across all sessions
    pub fn tool_stats(&self) -> anyhow::Result<Vec<ToolUsageStat>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(
            r#"
            SELECT tool_name,
                   COUNT(*) as call_count,
                   AVG(duration_ms) as avg_duration_ms,
                   SUM(CASE WHEN is_error = 0 THEN 1 ELSE 0 END) as success_count,
                   SUM(CASE WHEN is_error != 0 THEN 1 ELSE 0 END) as error_count
            FROM tool_calls
            GROUP BY tool_name
            ORDER BY call_count DESC, tool_name
            "#,
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(ToolUsageStat {
                tool_name: row.get(0)?,
                call_count: row.get::<_, i64>(1)? as u64,
                avg_duration_ms: row.get(2)?,
                success_count: row.get::<_, i64>(3)? as u64,
                error_count: row.get::<_, i64>(4)? as u64,
            })
        })?;

        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn reload_stats(&self) -> anyhow::Result<ReloadStats> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        let (total, failed) = conn.query_row(
            "SELECT COUNT(*), SUM(CASE WHEN error IS NOT NULL THEN 1 ELSE 0 END) FROM reloads",
            [],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Option<i64>>(1)?)),
        )?;
        let last = conn
            .query_row(
                "SELECT timestamp FROM reloads ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get::<_, String>(0),
            )
            .ok();
        Ok(ReloadStats {
            total: total as u64,
            failed: failed.unwrap_or(0) as u64,
            last,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InteractionSummary {
    pub timestamp: String,
    pub input: String,
    pub output: Option<String>,
    pub reason: Option<String>,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
    pub tool_calls: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolUsageStat {
    pub tool_name: String,
    pub call_count: u64,
    pub avg_duration_ms: f64,
    pub success_count: u64,
    pub error_count: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReloadStats {
    pub total: u64,
    pub failed: u64,
    pub last: Option<String>,
}

impl std::fmt::Display for ReloadStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Reloads: {} ({} failed)", self.total, self.failed)?;
        if let Some(last) = &self.last {
            write!(f, " | Last: {}", last)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ExecutedToolCall, TokenUsage, TurnCompleteReason};
    use serde_json::json;
    use tempfile::TempDir;

    fn turn(calls: &[(&str, bool)]) -> TurnResult {
        TurnResult {
            output: "done".to_string(),
            partial: None,
            tool_calls: calls
                .iter()
                .enumerate()
                .map(|(i, (name, is_error))| ExecutedToolCall {
                    id: format!("call_{}", i),
                    name: name.to_string(),
                    arguments: json!({}),
                    output: "ok".to_string(),
                    is_error: *is_error,
                    duration_ms: 10,
                })
                .collect(),
            reason: TurnCompleteReason::TextResponse,
            usage: TokenUsage {
                input: 100,
                output: 20,
            },
            iterations: calls.len() + 1,
            generation: 3,
        }
    }

    fn store(temp: &TempDir) -> TelemetryStore {
        TelemetryStore::open(&temp.path().join("telemetry.db"), Some("llama3.1"), Some("Ollama"))
            .unwrap()
    }

    #[test]
    fn test_tool_stats() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        store.record_turn("what time is it", &turn(&[("get_time", false)]), 50);
        store.record_turn(
            "read it twice",
            &turn(&[("read_file", false), ("read_file", true)]),
            80,
        );

        let stats = store.tool_stats().unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].tool_name, "read_file");
        assert_eq!(stats[0].call_count, 2);
        assert_eq!(stats[0].success_count, 1);
        assert_eq!(stats[0].error_count, 1);
        assert_eq!(stats[1].tool_name, "get_time");
    }

    #[test]
    fn test_recent_interactions() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        store.record_turn("first", &turn(&[]), 5);
        store.record_error("second", "connection refused", 7);

        let recent = store.recent_interactions(10).unwrap();
        assert_eq!(recent.len(), 2);
        let error = recent.iter().find(|i| i.input == "second").unwrap();
        assert_eq!(error.error.as_deref(), Some("connection refused"));
        assert_eq!(error.output, None);
        let ok = recent.iter().find(|i| i.input == "first").unwrap();
        assert_eq!(ok.reason.as_deref(), Some("text_response"));

        assert_eq!(store.recent_interactions(1).unwrap().len(), 1);
    }

    #[test]
    fn test_reload_stats() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        assert_eq!(store.reload_stats().unwrap().total, 0);

        store.record_reload(ReloadTrigger::Tool, "all", 5, 2, None);
        store.record_reload(ReloadTrigger::Watcher, "time", 5, 3, Some("invalid manifest"));

        let stats = store.reload_stats().unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.failed, 1);
        assert!(stats.last.is_some());
    }

    #[test]
    fn test_history_survives_reopen() {
        let temp = TempDir::new().unwrap();
        let first = store(&temp);
        first.record_turn("hello", &turn(&[("get_time", false)]), 5);
        let first_id = first.session_id();
        drop(first);

        let second = store(&temp);
        assert_ne!(second.session_id(), first_id);
        assert_eq!(second.recent_interactions(10).unwrap().len(), 1);
        assert_eq!(second.tool_stats().unwrap()[0].call_count, 1);
    }
}
