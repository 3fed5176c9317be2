// THEORY:
// The `history` module is the persistence collaborator. The engine hands it a
// `SessionSummary` when a session stops; the store folds that into a per-user
// record (running totals plus one appended entry per session), keyed uniquely
// by user id. Reading a progress report back is entirely the store's job.
//
// Two implementations share the `HistoryStore` trait: an in-memory map, and a
// single JSON document on disk that is rewritten atomically on every write.

use crate::core_modules::session_registry::SessionSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("No record found for user: {0}")]
    UnknownUser(String),
    #[error("history store I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("history store JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEntry {
    pub date: DateTime<Utc>,
    pub reps: u32,
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub total_reps: u64,
    pub total_duration: f64,
    pub session_history: Vec<SessionEntry>,
}

impl UserRecord {
    fn new(user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            created_at: now,
            last_updated: now,
            total_reps: 0,
            total_duration: 0.0,
            session_history: Vec::new(),
        }
    }

    fn append(&mut self, summary: &SessionSummary, now: DateTime<Utc>) {
        let duration = round_centis(summary.elapsed.as_secs_f64());
        self.total_reps += u64::from(summary.repetition_count);
        self.total_duration = round_centis(self.total_duration + duration);
        self.session_history.push(SessionEntry {
            date: now,
            reps: summary.repetition_count,
            duration,
        });
        self.last_updated = now;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSummary {
    pub total_reps_all_time: u64,
    pub total_duration_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    pub user: String,
    pub summary: ProgressSummary,
    pub history: Vec<SessionEntry>,
}

impl From<&UserRecord> for ProgressReport {
    fn from(record: &UserRecord) -> Self {
        Self {
            user: record.user_id.clone(),
            summary: ProgressSummary {
                total_reps_all_time: record.total_reps,
                total_duration_seconds: record.total_duration,
            },
            history: record.session_history.clone(),
        }
    }
}

pub trait HistoryStore: Send + Sync {
    /// Upserts the user's record with one more finished session.
    fn record_session(&self, summary: &SessionSummary) -> Result<UserRecord, StoreError>;

    fn progress_report(&self, user_id: &str) -> Result<ProgressReport, StoreError>;
}

fn round_centis(seconds: f64) -> f64 {
    (seconds * 100.0).round() / 100.0
}

#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    records: RwLock<HashMap<String, UserRecord>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn record_session(&self, summary: &SessionSummary) -> Result<UserRecord, StoreError> {
        let now = Utc::now();
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let record = records
            .entry(summary.user_id.clone())
            .or_insert_with(|| UserRecord::new(&summary.user_id, now));
        record.append(summary, now);
        Ok(record.clone())
    }

    fn progress_report(&self, user_id: &str) -> Result<ProgressReport, StoreError> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_id)
            .map(ProgressReport::from)
            .ok_or_else(|| StoreError::UnknownUser(user_id.to_string()))
    }
}

/// All records in one pretty-printed JSON object keyed by user id.
#[derive(Debug)]
pub struct JsonFileHistoryStore {
    path: PathBuf,
    records: Mutex<HashMap<String, UserRecord>>,
}

impl JsonFileHistoryStore {
    /// Opens the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let records = match fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => HashMap::new(),
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::info!(path = %path.display(), users = records.len(), "history store opened");
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, records: &HashMap<String, UserRecord>) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl HistoryStore for JsonFileHistoryStore {
    fn record_session(&self, summary: &SessionSummary) -> Result<UserRecord, StoreError> {
        let now = Utc::now();
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let mut record = records
            .get(&summary.user_id)
            .cloned()
            .unwrap_or_else(|| UserRecord::new(&summary.user_id, now));
        record.append(summary, now);

        // Only commit in memory what made it to disk.
        let previous = records.insert(summary.user_id.clone(), record.clone());
        if let Err(e) = self.persist(&records) {
            match previous {
                Some(prev) => records.insert(summary.user_id.clone(), prev),
                None => records.remove(&summary.user_id),
            };
            tracing::warn!(error = %e, user_id = summary.user_id.as_str(), "failed to persist session");
            return Err(e);
        }
        Ok(record)
    }

    fn progress_report(&self, user_id: &str) -> Result<ProgressReport, StoreError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_id)
            .map(ProgressReport::from)
            .ok_or_else(|| StoreError::UnknownUser(user_id.to_string()))
    }
}
