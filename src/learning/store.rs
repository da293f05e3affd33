//! SQLite-backed Learning Store (spec.md §4.9).
//!
//! `rusqlite::Connection` is not `Send`/`Sync`; following the teacher's
//! `dashflow-streaming` SQLite backend, every query runs on a single
//! dedicated blocking worker thread and callers communicate with it over
//! `tokio::sync::{mpsc, oneshot}` channels. Writes are append-only except
//! for the two recomputed views (`sweet_spot_samples`, `learned_thresholds`),
//! which are replace-all, never row-level updates.

use std::path::PathBuf;

use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::error::{Error, Result};
use crate::params::GenerationParameters;

/// One row about to be inserted into `generations` + its child tables,
/// built by the retry loop after evaluation completes.
#[derive(Debug, Clone)]
pub struct GenerationRecord {
    pub domain: String,
    pub item: String,
    pub component: String,
    pub author_id: String,
    pub retry_session_id: String,
    pub attempt_ordinal: u32,
    pub is_retry: bool,
    pub content: String,
    pub overall_score: f64,
    pub passed: bool,
    pub params: GenerationParameters,
}

/// A single evaluator's score for a logged generation.
#[derive(Debug, Clone)]
pub struct EvaluationRecord {
    pub evaluator_name: String,
    pub score: f64,
    pub details_json: serde_json::Value,
}

/// A single rubric criterion row (spec.md's `grok_evaluation_criteria`).
#[derive(Debug, Clone)]
pub struct RubricCriterionRecord {
    pub criterion_key: String,
    pub score: f64,
    pub min_score: f64,
    pub pass: bool,
}

/// Result of averaging successful generations' temperature for a
/// `(component, domain)` pair, used by the Parameter Calculator's
/// sweet-spot blend (spec.md §4.3 step 3).
#[derive(Debug, Clone, Copy)]
pub struct SweetSpotTemperature {
    pub temperature: f64,
    pub n_samples: u32,
}

enum WorkerCommand {
    LogGeneration {
        record: GenerationRecord,
        resp: oneshot::Sender<Result<i64>>,
    },
    LogEvaluation {
        generation_id: i64,
        evaluation: EvaluationRecord,
        resp: oneshot::Sender<Result<()>>,
    },
    LogRubricCriteria {
        generation_id: i64,
        criteria: Vec<RubricCriterionRecord>,
        resp: oneshot::Sender<Result<()>>,
    },
    RecentSuccesses {
        component: String,
        domain: String,
        limit: u32,
        resp: oneshot::Sender<Result<Vec<f64>>>,
    },
    SweetSpotTemperature {
        component: String,
        domain: String,
        min_samples: u32,
        resp: oneshot::Sender<Result<Option<SweetSpotTemperature>>>,
    },
    LearnedThreshold {
        name: String,
        fallback: f64,
        resp: oneshot::Sender<Result<f64>>,
    },
    RecomputeLearnedThreshold {
        name: String,
        min_samples: u32,
        percentile: f64,
        resp: oneshot::Sender<Result<Option<f64>>>,
    },
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS generations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp INTEGER NOT NULL,
    domain TEXT NOT NULL,
    item TEXT NOT NULL,
    component TEXT NOT NULL,
    author_id TEXT NOT NULL,
    retry_session_id TEXT NOT NULL,
    attempt_ordinal INTEGER NOT NULL,
    is_retry INTEGER NOT NULL,
    content TEXT NOT NULL,
    overall_score REAL NOT NULL CHECK(overall_score >= 0.0 AND overall_score <= 1.0),
    passed INTEGER NOT NULL,
    UNIQUE(retry_session_id, attempt_ordinal)
);

CREATE INDEX IF NOT EXISTS idx_generations_domain_item_component
    ON generations(domain, item, component);
CREATE INDEX IF NOT EXISTS idx_generations_session
    ON generations(retry_session_id);

CREATE TABLE IF NOT EXISTS generation_parameters (
    generation_id INTEGER UNIQUE NOT NULL REFERENCES generations(id),
    temperature REAL NOT NULL,
    max_tokens INTEGER NOT NULL,
    frequency_penalty REAL NOT NULL,
    presence_penalty REAL NOT NULL,
    voice_vector_json TEXT NOT NULL,
    enrichment_json TEXT NOT NULL,
    validation_json TEXT NOT NULL,
    retry_json TEXT NOT NULL,
    full_params_json TEXT NOT NULL,
    param_hash TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS evaluation_scores (
    generation_id INTEGER NOT NULL REFERENCES generations(id),
    evaluator_name TEXT NOT NULL,
    score REAL NOT NULL CHECK(score >= 0.0 AND score <= 1.0),
    details_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_evaluation_scores_generation
    ON evaluation_scores(generation_id);

CREATE TABLE IF NOT EXISTS grok_evaluation_criteria (
    generation_id INTEGER NOT NULL REFERENCES generations(id),
    criterion_key TEXT NOT NULL,
    score REAL NOT NULL,
    min_score REAL NOT NULL,
    pass INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS sweet_spot_samples (
    component TEXT NOT NULL,
    domain TEXT NOT NULL,
    param_hash TEXT NOT NULL,
    avg_score REAL NOT NULL,
    n_samples INTEGER NOT NULL,
    PRIMARY KEY(component, domain, param_hash)
);

CREATE TABLE IF NOT EXISTS learned_thresholds (
    name TEXT PRIMARY KEY,
    value REAL NOT NULL,
    n_samples INTEGER NOT NULL,
    computed_at INTEGER NOT NULL
);
"#;

/// Handle to the learning store's worker thread. Cheaply cloneable; every
/// clone shares the same underlying connection and command queue.
#[derive(Clone)]
pub struct LearningStore {
    tx: mpsc::Sender<WorkerCommand>,
}

impl LearningStore {
    /// Open (creating if absent) the SQLite database at `path` and spawn
    /// its dedicated worker thread.
    pub async fn open(path: PathBuf) -> Result<Self> {
        let (tx, mut rx) = mpsc::channel::<WorkerCommand>(256);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();

        tokio::task::spawn_blocking(move || {
            let conn = match rusqlite::Connection::open(&path) {
                Ok(conn) => conn,
                Err(e) => {
                    let _ = ready_tx.send(Err(Error::from(e)));
                    return;
                }
            };
            if let Err(e) = conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;") {
                let _ = ready_tx.send(Err(Error::from(e)));
                return;
            }
            if let Err(e) = conn.execute_batch(SCHEMA) {
                let _ = ready_tx.send(Err(Error::from(e)));
                return;
            }
            let _ = ready_tx.send(Ok(()));

            while let Some(cmd) = rx.blocking_recv() {
                handle_command(&conn, cmd);
            }
        });

        ready_rx
            .await
            .map_err(|_| Error::persistence("learning store worker thread died during startup"))??;

        Ok(Self { tx })
    }

    /// Open an in-process, ephemeral store for tests.
    pub async fn open_in_memory() -> Result<Self> {
        Self::open(PathBuf::from(":memory:")).await
    }

    async fn send<T>(&self, make: impl FnOnce(oneshot::Sender<Result<T>>) -> WorkerCommand) -> Result<T> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx
            .send(make(resp_tx))
            .await
            .map_err(|_| Error::persistence("learning store worker thread is gone"))?;
        resp_rx
            .await
            .map_err(|_| Error::persistence("learning store worker thread dropped the response"))?
    }

    /// Insert a `generations` row plus its `generation_parameters` child
    /// row. Returns the new generation id.
    pub async fn log_generation(&self, record: GenerationRecord) -> Result<i64> {
        self.send(|resp| WorkerCommand::LogGeneration { record, resp }).await
    }

    /// Insert one `evaluation_scores` row.
    pub async fn log_evaluation(&self, generation_id: i64, evaluation: EvaluationRecord) -> Result<()> {
        self.send(|resp| WorkerCommand::LogEvaluation {
            generation_id,
            evaluation,
            resp,
        })
        .await
    }

    /// Insert `grok_evaluation_criteria` rows for one generation.
    pub async fn log_rubric_criteria(
        &self,
        generation_id: i64,
        criteria: Vec<RubricCriterionRecord>,
    ) -> Result<()> {
        self.send(|resp| WorkerCommand::LogRubricCriteria {
            generation_id,
            criteria,
            resp,
        })
        .await
    }

    /// Overall scores of the most recent passing generations for
    /// `(component, domain)`, most recent first, capped at `limit`.
    pub async fn recent_successes(&self, component: &str, domain: &str, limit: u32) -> Result<Vec<f64>> {
        self.send(|resp| WorkerCommand::RecentSuccesses {
            component: component.to_string(),
            domain: domain.to_string(),
            limit,
            resp,
        })
        .await
    }

    /// The average temperature of successful generations for
    /// `(component, domain)`, if at least `min_samples` exist.
    pub async fn sweet_spot_temperature(
        &self,
        component: &str,
        domain: &str,
        min_samples: u32,
    ) -> Result<Option<SweetSpotTemperature>> {
        self.send(|resp| WorkerCommand::SweetSpotTemperature {
            component: component.to_string(),
            domain: domain.to_string(),
            min_samples,
            resp,
        })
        .await
    }

    /// The latest cached value of a learned threshold, or `fallback` if
    /// none has been computed yet.
    pub async fn learned_threshold(&self, name: &str, fallback: f64) -> Result<f64> {
        self.send(|resp| WorkerCommand::LearnedThreshold {
            name: name.to_string(),
            fallback,
            resp,
        })
        .await
    }

    /// Recompute and persist a learned threshold as the given percentile
    /// of recent successful runs' scores, if `min_samples` qualify.
    /// Returns the freshly computed value, or `None` if insufficient data
    /// (the previously cached value, if any, is left untouched).
    pub async fn recompute_learned_threshold(
        &self,
        name: &str,
        min_samples: u32,
        percentile: f64,
    ) -> Result<Option<f64>> {
        self.send(|resp| WorkerCommand::RecomputeLearnedThreshold {
            name: name.to_string(),
            min_samples,
            percentile,
            resp,
        })
        .await
    }
}

fn handle_command(conn: &rusqlite::Connection, cmd: WorkerCommand) {
    match cmd {
        WorkerCommand::LogGeneration { record, resp } => {
            let result = insert_generation(conn, &record);
            respond(resp, result, "log_generation");
        }
        WorkerCommand::LogEvaluation {
            generation_id,
            evaluation,
            resp,
        } => {
            let result = insert_evaluation(conn, generation_id, &evaluation);
            respond(resp, result, "log_evaluation");
        }
        WorkerCommand::LogRubricCriteria {
            generation_id,
            criteria,
            resp,
        } => {
            let result = insert_rubric_criteria(conn, generation_id, &criteria);
            respond(resp, result, "log_rubric_criteria");
        }
        WorkerCommand::RecentSuccesses {
            component,
            domain,
            limit,
            resp,
        } => {
            let result = recent_successes(conn, &component, &domain, limit);
            respond(resp, result, "recent_successes");
        }
        WorkerCommand::SweetSpotTemperature {
            component,
            domain,
            min_samples,
            resp,
        } => {
            let result = sweet_spot_temperature(conn, &component, &domain, min_samples);
            respond(resp, result, "sweet_spot_temperature");
        }
        WorkerCommand::LearnedThreshold { name, fallback, resp } => {
            let result = learned_threshold(conn, &name, fallback);
            respond(resp, result, "learned_threshold");
        }
        WorkerCommand::RecomputeLearnedThreshold {
            name,
            min_samples,
            percentile,
            resp,
        } => {
            let result = recompute_learned_threshold(conn, &name, min_samples, percentile);
            respond(resp, result, "recompute_learned_threshold");
        }
    }
}

fn respond<T>(resp: oneshot::Sender<Result<T>>, result: Result<T>, op: &str) {
    let err_msg = result.as_ref().err().map(ToString::to_string);
    if resp.send(result).is_err() {
        if let Some(e) = err_msg {
            warn!(operation = op, error = %e, "learning store response dropped by caller");
        }
    }
}

/// Inserts (or, on a repeated `(retry_session_id, attempt_ordinal)`, updates
/// in place) a `generations` row plus its `generation_parameters` child row.
/// Idempotent per-attempt (spec.md §4.9): retrying the same attempt never
/// produces a duplicate row, and `last_insert_rowid` is unreliable once an
/// upsert resolves via the `UPDATE` branch, so the stable id is always
/// re-read with a follow-up `SELECT`.
fn insert_generation(conn: &rusqlite::Connection, record: &GenerationRecord) -> Result<i64> {
    if !(0.0..=1.0).contains(&record.overall_score) {
        return Err(Error::validation(format!(
            "overall_score out of [0,1]: {}",
            record.overall_score
        )));
    }
    let now = now_unix_seconds();
    conn.execute(
        "INSERT INTO generations \
         (timestamp, domain, item, component, author_id, retry_session_id, attempt_ordinal, is_retry, content, overall_score, passed) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
         ON CONFLICT(retry_session_id, attempt_ordinal) DO UPDATE SET \
            timestamp = excluded.timestamp, domain = excluded.domain, item = excluded.item, \
            component = excluded.component, author_id = excluded.author_id, is_retry = excluded.is_retry, \
            content = excluded.content, overall_score = excluded.overall_score, passed = excluded.passed",
        rusqlite::params![
            now,
            record.domain,
            record.item,
            record.component,
            record.author_id,
            record.retry_session_id,
            record.attempt_ordinal,
            record.is_retry as i64,
            record.content,
            record.overall_score,
            record.passed as i64,
        ],
    )?;
    let generation_id: i64 = conn.query_row(
        "SELECT id FROM generations WHERE retry_session_id = ?1 AND attempt_ordinal = ?2",
        rusqlite::params![record.retry_session_id, record.attempt_ordinal],
        |row| row.get(0),
    )?;

    let params = &record.params;
    conn.execute(
        "INSERT INTO generation_parameters \
         (generation_id, temperature, max_tokens, frequency_penalty, presence_penalty, \
          voice_vector_json, enrichment_json, validation_json, retry_json, full_params_json, param_hash) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
         ON CONFLICT(generation_id) DO UPDATE SET \
            temperature = excluded.temperature, max_tokens = excluded.max_tokens, \
            frequency_penalty = excluded.frequency_penalty, presence_penalty = excluded.presence_penalty, \
            voice_vector_json = excluded.voice_vector_json, enrichment_json = excluded.enrichment_json, \
            validation_json = excluded.validation_json, retry_json = excluded.retry_json, \
            full_params_json = excluded.full_params_json, param_hash = excluded.param_hash",
        rusqlite::params![
            generation_id,
            params.temperature,
            params.max_tokens,
            params.frequency_penalty,
            params.presence_penalty,
            params.voice_vector.to_json().to_string(),
            params.enrichment.to_json().to_string(),
            params.validation.to_json().to_string(),
            params.retry.to_json().to_string(),
            params.to_json().to_string(),
            params.param_hash(),
        ],
    )?;

    Ok(generation_id)
}

fn insert_evaluation(conn: &rusqlite::Connection, generation_id: i64, evaluation: &EvaluationRecord) -> Result<()> {
    if !(0.0..=1.0).contains(&evaluation.score) {
        return Err(Error::validation(format!(
            "evaluator score out of [0,1]: {}",
            evaluation.score
        )));
    }
    conn.execute(
        "INSERT INTO evaluation_scores (generation_id, evaluator_name, score, details_json) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![
            generation_id,
            evaluation.evaluator_name,
            evaluation.score,
            evaluation.details_json.to_string(),
        ],
    )?;
    Ok(())
}

fn insert_rubric_criteria(
    conn: &rusqlite::Connection,
    generation_id: i64,
    criteria: &[RubricCriterionRecord],
) -> Result<()> {
    for c in criteria {
        conn.execute(
            "INSERT INTO grok_evaluation_criteria (generation_id, criterion_key, score, min_score, pass) VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![generation_id, c.criterion_key, c.score, c.min_score, c.pass as i64],
        )?;
    }
    Ok(())
}

fn recent_successes(conn: &rusqlite::Connection, component: &str, domain: &str, limit: u32) -> Result<Vec<f64>> {
    let mut stmt = conn.prepare(
        "SELECT overall_score FROM generations \
         WHERE component = ?1 AND domain = ?2 AND passed = 1 \
         ORDER BY timestamp DESC LIMIT ?3",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![component, domain, limit], |row| row.get::<_, f64>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn sweet_spot_temperature(
    conn: &rusqlite::Connection,
    component: &str,
    domain: &str,
    min_samples: u32,
) -> Result<Option<SweetSpotTemperature>> {
    let row: (Option<f64>, i64) = conn.query_row(
        "SELECT AVG(p.temperature), COUNT(*) FROM generations g \
         JOIN generation_parameters p ON p.generation_id = g.id \
         WHERE g.component = ?1 AND g.domain = ?2 AND g.passed = 1",
        rusqlite::params![component, domain],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    let (avg, count) = row;
    if count < i64::from(min_samples) {
        return Ok(None);
    }
    avg.map(|temperature| {
        Ok(Some(SweetSpotTemperature {
            temperature,
            n_samples: count as u32,
        }))
    })
    .unwrap_or(Ok(None))
}

fn learned_threshold(conn: &rusqlite::Connection, name: &str, fallback: f64) -> Result<f64> {
    let value: Option<f64> = conn
        .query_row(
            "SELECT value FROM learned_thresholds WHERE name = ?1",
            rusqlite::params![name],
            |row| row.get(0),
        )
        .ok();
    Ok(value.unwrap_or(fallback))
}

fn recompute_learned_threshold(
    conn: &rusqlite::Connection,
    name: &str,
    min_samples: u32,
    percentile: f64,
) -> Result<Option<f64>> {
    let mut stmt = conn.prepare(
        "SELECT overall_score FROM generations WHERE passed = 1 ORDER BY overall_score ASC",
    )?;
    let scores: Vec<f64> = stmt
        .query_map([], |row| row.get::<_, f64>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if scores.len() < min_samples as usize {
        return Ok(None);
    }

    let idx = (((scores.len() - 1) as f64) * percentile).round() as usize;
    let value = scores[idx.min(scores.len() - 1)];
    let now = now_unix_seconds();

    conn.execute(
        "INSERT INTO learned_thresholds (name, value, n_samples, computed_at) VALUES (?1, ?2, ?3, ?4) \
         ON CONFLICT(name) DO UPDATE SET value = excluded.value, n_samples = excluded.n_samples, computed_at = excluded.computed_at",
        rusqlite::params![name, value, scores.len() as i64, now],
    )?;

    Ok(Some(value))
}

fn now_unix_seconds() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
