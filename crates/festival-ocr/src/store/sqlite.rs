//! SQLite-backed record store.
//!
//! All access is serialized through a `Mutex<Connection>`; the worker is
//! single-threaded so there is no contention in practice.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::types::ToSql;
use rusqlite::{params, Connection, Row};

use super::{format_timestamp, migrations, RecordStore, RecordUpdate, SelectionFilter, StoreError};
use crate::model::{OcrStatus, RecordId, StagedContent};

const COLUMNS: &str = "id, category, raw_data, ocr_status, ocr_attempts, ocr_claimed_at";

/// Columns as stored, before JSON and status decoding.
struct RawRow {
    id: String,
    category: String,
    raw_data: String,
    ocr_status: Option<String>,
    ocr_attempts: u32,
    ocr_claimed_at: Option<String>,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            category: row.get("category")?,
            raw_data: row.get("raw_data")?,
            ocr_status: row.get("ocr_status")?,
            ocr_attempts: row.get("ocr_attempts")?,
            ocr_claimed_at: row.get("ocr_claimed_at")?,
        })
    }

    fn decode(self) -> Result<StagedContent, StoreError> {
        let decode_err = |reason: String| StoreError::Decode {
            id: self.id.clone(),
            reason,
        };

        let raw_data = serde_json::from_str(&self.raw_data)
            .map_err(|e| decode_err(format!("raw_data: {}", e)))?;
        let ocr_status = self
            .ocr_status
            .as_deref()
            .map(str::parse::<OcrStatus>)
            .transpose()
            .map_err(decode_err)?;
        let ocr_claimed_at = self
            .ocr_claimed_at
            .as_deref()
            .map(DateTime::parse_from_rfc3339)
            .transpose()
            .map_err(|e| decode_err(format!("ocr_claimed_at: {}", e)))?
            .map(|ts| ts.with_timezone(&Utc));

        Ok(StagedContent {
            id: RecordId::new(self.id),
            category: self.category,
            raw_data,
            ocr_status,
            ocr_attempts: self.ocr_attempts,
            ocr_claimed_at,
        })
    }
}

/// Thread-safe handle to a SQLite database holding `staged_contents`.
///
/// Cloning is cheap (inner `Arc`).
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) the database at `path` and runs pending migrations.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        migrations::run_all(&conn)?;

        log::info!("Record store opened at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        migrations::run_all(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        f(&conn)
    }

    /// Inserts a row as the ingestion side would.
    pub fn insert(&self, record: &StagedContent) -> Result<(), StoreError> {
        let raw_data = record.raw_data.to_string();
        let status = record.ocr_status.map(|s| s.as_str());
        let claimed_at = record.ocr_claimed_at.map(format_timestamp);
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO staged_contents (id, category, raw_data, ocr_status, ocr_attempts, ocr_claimed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.id.as_str(),
                    record.category,
                    raw_data,
                    status,
                    record.ocr_attempts,
                    claimed_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn find_by_id(&self, id: &RecordId) -> Result<Option<StagedContent>, StoreError> {
        let raw = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM staged_contents WHERE id = ?1",
                COLUMNS
            ))?;
            let mut rows = stmt.query_map(params![id.as_str()], RawRow::from_row)?;
            match rows.next() {
                Some(row) => Ok(Some(row?)),
                None => Ok(None),
            }
        })?;
        raw.map(RawRow::decode).transpose()
    }

    /// Last error recorded against a row, if any.
    pub fn last_error(&self, id: &RecordId) -> Result<Option<String>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT ocr_error FROM staged_contents WHERE id = ?1")?;
            let mut rows = stmt.query_map(params![id.as_str()], |r| r.get::<_, Option<String>>(0))?;
            match rows.next() {
                Some(row) => Ok(row?),
                None => Err(StoreError::NotFound(id.to_string())),
            }
        })
    }
}

impl RecordStore for SqliteStore {
    fn select(&self, filter: &SelectionFilter) -> Result<Vec<StagedContent>, StoreError> {
        if filter.category_in.is_empty() || filter.limit == 0 {
            return Ok(Vec::new());
        }

        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn ToSql>> = Vec::new();

        let placeholders: Vec<String> = filter
            .category_in
            .iter()
            .map(|category| {
                param_values.push(Box::new(category.as_str()));
                format!("?{}", param_values.len())
            })
            .collect();
        conditions.push(format!("category IN ({})", placeholders.join(", ")));

        if filter.status_is_null {
            match filter.reclaim_claimed_before {
                Some(before) => {
                    param_values.push(Box::new(format_timestamp(before)));
                    conditions.push(format!(
                        "(ocr_status IS NULL OR (ocr_status = 'PROCESSING' AND ocr_claimed_at < ?{}))",
                        param_values.len()
                    ));
                }
                None => conditions.push("ocr_status IS NULL".to_string()),
            }
        }

        param_values.push(Box::new(filter.limit as i64));
        let sql = format!(
            "SELECT {} FROM staged_contents WHERE {} ORDER BY created_at, id LIMIT ?{}",
            COLUMNS,
            conditions.join(" AND "),
            param_values.len()
        );

        let raw_rows = self.with_conn(|conn| {
            let params_ref: Vec<&dyn ToSql> = param_values.iter().map(|p| p.as_ref()).collect();
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_ref.as_slice(), RawRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        raw_rows.into_iter().map(RawRow::decode).collect()
    }

    fn claim(&self, record: &StagedContent, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let now = format_timestamp(now);
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE staged_contents
                 SET ocr_status = 'PROCESSING', ocr_attempts = ocr_attempts + 1,
                     ocr_claimed_at = ?2, updated_at = ?2
                 WHERE id = ?1 AND ocr_attempts = ?3
                   AND (ocr_status IS NULL OR ocr_status = 'PROCESSING')",
                params![record.id.as_str(), now, record.ocr_attempts],
            )?;
            Ok(changed == 1)
        })
    }

    fn update(&self, id: &RecordId, update: &RecordUpdate) -> Result<(), StoreError> {
        let raw_data = update.raw_data.as_ref().map(|v| v.to_string());
        let status = update.ocr_status.map(|s| s.as_str());
        let now = format_timestamp(Utc::now());
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE staged_contents
                 SET raw_data = COALESCE(?2, raw_data), ocr_status = ?3, ocr_error = ?4,
                     ocr_attempts = CASE WHEN ?3 = 'DONE' THEN 0 ELSE ocr_attempts END,
                     ocr_claimed_at = NULL, updated_at = ?5
                 WHERE id = ?1
                   AND (?6 IS NULL OR (ocr_status = 'PROCESSING' AND ocr_attempts = ?6))",
                params![
                    id.as_str(),
                    raw_data,
                    status,
                    update.ocr_error,
                    now,
                    update.claimed_attempts
                ],
            )?;
            if changed == 0 {
                return Err(match update.claimed_attempts {
                    Some(_) => StoreError::ClaimLost(id.to_string()),
                    None => StoreError::NotFound(id.to_string()),
                });
            }
            Ok(())
        })
    }
}

/// Returns the default local database path: `~/.festival-ocr/staged.db`.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".festival-ocr").join("staged.db"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Category;
    use chrono::Duration;
    use serde_json::json;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory().expect("Failed to create test database")
    }

    fn row(id: &str, category: Category) -> StagedContent {
        StagedContent {
            id: RecordId::new(id),
            category: category.as_str().to_string(),
            raw_data: json!({"festival_name": "Pentaport", "items": [{"url": "https://x/a.jpg"}]}),
            ocr_status: None,
            ocr_attempts: 0,
            ocr_claimed_at: None,
        }
    }

    fn pending_filter(limit: usize) -> SelectionFilter {
        SelectionFilter::pending(Category::ocr_defaults(), limit)
    }

    #[test]
    fn test_insert_and_find() {
        let store = store();
        store.insert(&row("r1", Category::OfficialLineup)).unwrap();

        let found = store.find_by_id(&RecordId::new("r1")).unwrap().unwrap();
        assert_eq!(found.category, "OFFICIAL_LINEUP");
        assert_eq!(found.festival_name(), Some("Pentaport"));
        assert_eq!(found.ocr_status, None);
    }

    #[test]
    fn test_find_nonexistent() {
        assert!(store().find_by_id(&RecordId::new("missing")).unwrap().is_none());
    }

    #[test]
    fn test_select_filters_category_and_status() {
        let store = store();
        store.insert(&row("lineup", Category::OfficialLineup)).unwrap();
        store.insert(&row("timetable", Category::OfficialTimetable)).unwrap();
        store.insert(&row("notice", Category::OfficialNotice)).unwrap();
        let mut done = row("done", Category::OfficialLineup);
        done.ocr_status = Some(OcrStatus::Done);
        store.insert(&done).unwrap();

        let mut ids: Vec<String> = store
            .select(&pending_filter(10))
            .unwrap()
            .into_iter()
            .map(|r| r.id.to_string())
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["lineup", "timetable"]);
    }

    #[test]
    fn test_select_respects_limit() {
        let store = store();
        for i in 0..5 {
            store.insert(&row(&format!("r{}", i), Category::OfficialLineup)).unwrap();
        }
        assert_eq!(store.select(&pending_filter(3)).unwrap().len(), 3);
    }

    #[test]
    fn test_select_with_no_categories_is_empty() {
        let store = store();
        store.insert(&row("r1", Category::OfficialLineup)).unwrap();
        let filter = SelectionFilter::pending(vec![], 3);
        assert!(store.select(&filter).unwrap().is_empty());
    }

    #[test]
    fn test_claim_is_exclusive() {
        let store = store();
        store.insert(&row("c1", Category::OfficialLineup)).unwrap();
        let selected = store.select(&pending_filter(3)).unwrap();

        assert!(store.claim(&selected[0], Utc::now()).unwrap());
        // Same snapshot again: attempts moved on, so the second claim loses.
        assert!(!store.claim(&selected[0], Utc::now()).unwrap());

        let claimed = store.find_by_id(&RecordId::new("c1")).unwrap().unwrap();
        assert_eq!(claimed.ocr_status, Some(OcrStatus::Processing));
        assert_eq!(claimed.ocr_attempts, 1);
        assert!(claimed.ocr_claimed_at.is_some());
        assert!(store.select(&pending_filter(3)).unwrap().is_empty());
    }

    #[test]
    fn test_stale_claims_are_reselected() {
        let store = store();
        let mut stale = row("stale", Category::OfficialLineup);
        stale.ocr_status = Some(OcrStatus::Processing);
        stale.ocr_attempts = 1;
        stale.ocr_claimed_at = Some(Utc::now() - Duration::hours(2));
        store.insert(&stale).unwrap();

        let mut fresh = row("fresh", Category::OfficialLineup);
        fresh.ocr_status = Some(OcrStatus::Processing);
        fresh.ocr_attempts = 1;
        fresh.ocr_claimed_at = Some(Utc::now());
        store.insert(&fresh).unwrap();

        let mut filter = pending_filter(10);
        filter.reclaim_claimed_before = Some(Utc::now() - Duration::minutes(10));
        let selected = store.select(&filter).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id.as_str(), "stale");

        assert!(store.claim(&selected[0], Utc::now()).unwrap());
        let reclaimed = store.find_by_id(&RecordId::new("stale")).unwrap().unwrap();
        assert_eq!(reclaimed.ocr_attempts, 2);
    }

    #[test]
    fn test_update_done_is_idempotent_and_final() {
        let store = store();
        store.insert(&row("u1", Category::OfficialTimetable)).unwrap();
        let id = RecordId::new("u1");
        let update = RecordUpdate::done(json!({"festival_name": "Pentaport", "ocr_result": []}));

        store.update(&id, &update).unwrap();
        let first = store.find_by_id(&id).unwrap().unwrap();
        store.update(&id, &update).unwrap();
        let second = store.find_by_id(&id).unwrap().unwrap();

        assert_eq!(first, second);
        assert_eq!(second.ocr_status, Some(OcrStatus::Done));
        assert!(store.select(&pending_filter(10)).unwrap().is_empty());
    }

    #[test]
    fn test_retry_keeps_raw_data_and_records_error() {
        let store = store();
        let original = row("u2", Category::OfficialLineup);
        store.insert(&original).unwrap();
        let id = RecordId::new("u2");

        store.claim(&original, Utc::now()).unwrap();
        store.update(&id, &RecordUpdate::retry("store hiccup")).unwrap();

        let found = store.find_by_id(&id).unwrap().unwrap();
        assert_eq!(found.ocr_status, None);
        assert_eq!(found.raw_data, original.raw_data);
        assert_eq!(found.ocr_claimed_at, None);
        assert_eq!(store.last_error(&id).unwrap().as_deref(), Some("store hiccup"));
    }

    #[test]
    fn test_done_resets_attempts_for_requeue() {
        let store = store();
        let original = row("rq", Category::OfficialLineup);
        store.insert(&original).unwrap();
        let id = RecordId::new("rq");

        for _ in 0..4 {
            let selected = store.select(&pending_filter(3)).unwrap();
            assert_eq!(selected.len(), 1);
            assert!(store.claim(&selected[0], Utc::now()).unwrap());
            store
                .update(&id, &RecordUpdate::done(json!({})).fenced(1))
                .unwrap();
            assert_eq!(store.find_by_id(&id).unwrap().unwrap().ocr_attempts, 0);

            // Admin "retry OCR" puts the row back in the queue.
            store
                .with_conn(|conn| {
                    conn.execute("UPDATE staged_contents SET ocr_status = NULL WHERE id = 'rq'", [])?;
                    Ok(())
                })
                .unwrap();
        }
    }

    #[test]
    fn test_fenced_update_loses_to_newer_claim() {
        let store = store();
        let original = row("f1", Category::OfficialLineup);
        store.insert(&original).unwrap();
        let id = RecordId::new("f1");

        assert!(store.claim(&original, Utc::now()).unwrap());
        // Lease ran out and a second worker reclaimed the row.
        let taken = store.find_by_id(&id).unwrap().unwrap();
        assert!(store.claim(&taken, Utc::now()).unwrap());

        let result = store.update(&id, &RecordUpdate::done(json!({"ocr_result": []})).fenced(1));
        assert!(matches!(result, Err(StoreError::ClaimLost(_))));

        let current = store.find_by_id(&id).unwrap().unwrap();
        assert_eq!(current.ocr_status, Some(OcrStatus::Processing));
        assert_eq!(current.ocr_attempts, 2);
        assert!(current.raw_data.get("ocr_result").is_none());

        store
            .update(&id, &RecordUpdate::done(json!({"ocr_result": []})).fenced(2))
            .unwrap();
        assert_eq!(
            store.find_by_id(&id).unwrap().unwrap().ocr_status,
            Some(OcrStatus::Done)
        );
    }

    #[test]
    fn test_update_missing_row() {
        let result = store().update(&RecordId::new("ghost"), &RecordUpdate::failed("x"));
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_undecodable_raw_data_is_decode_error() {
        let store = store();
        store
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO staged_contents (id, category, raw_data) VALUES ('bad', 'OFFICIAL_LINEUP', '{not json')",
                    [],
                )?;
                Ok(())
            })
            .unwrap();
        assert!(matches!(
            store.find_by_id(&RecordId::new("bad")),
            Err(StoreError::Decode { .. })
        ));
    }

    #[test]
    fn test_open_file_db() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("staged.db");
        let store = SqliteStore::open(&path).unwrap();
        store.insert(&row("f1", Category::OfficialLineup)).unwrap();
        assert!(path.exists());

        let reopened = SqliteStore::open(&path).unwrap();
        assert!(reopened.find_by_id(&RecordId::new("f1")).unwrap().is_some());
    }

    #[test]
    fn test_default_database_path() {
        let path = default_database_path().unwrap();
        assert!(path.ends_with("staged.db"));
    }
}
