//! `SQLite` record and duplicate group store.

use super::connection::{acquire_lock, open, record_operation};
use crate::models::{DuplicateGroup, EntityType, GroupId, GroupStatus, Record, RecordId};
use crate::storage::{CandidateSource, DuplicateStore, MergeCommit};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL,
    entity_type TEXT NOT NULL,
    name TEXT NOT NULL,
    fields TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_records_scan ON records(project_id, entity_type, id);

CREATE TABLE IF NOT EXISTS duplicate_groups (
    id TEXT PRIMARY KEY,
    project_id INTEGER NOT NULL,
    entity_type TEXT NOT NULL,
    suggested_master INTEGER NOT NULL,
    max_score REAL NOT NULL,
    status TEXT NOT NULL,
    task_id TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_duplicate_groups_project ON duplicate_groups(project_id, status);

CREATE TABLE IF NOT EXISTS duplicate_group_members (
    group_id TEXT NOT NULL,
    record_id INTEGER NOT NULL,
    PRIMARY KEY (group_id, record_id),
    FOREIGN KEY (group_id) REFERENCES duplicate_groups(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_duplicate_group_members_record ON duplicate_group_members(record_id);
";

const GROUP_COLUMNS: &str = "id, project_id, entity_type, suggested_master, max_score, status, \
                             task_id, created_at, updated_at";

/// SQLite-based store for records and duplicate groups.
pub struct SqliteStore {
    /// Database connection (mutex for interior mutability).
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

/// Raw `records` row before field JSON is decoded.
type RecordRow = (i64, i64, String, String, String);

impl SqliteStore {
    /// Opens (creating if needed) a store at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let store = Self {
            conn: Mutex::new(open(Some(&path))?),
            path: Some(path),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Creates an in-memory store (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(open(None)?),
            path: None,
        };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Default database location: `<platform data dir>/dupscan/dupscan.db`.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "dupscan").map(|d| d.data_dir().join("dupscan.db"))
    }

    /// Returns the database path, or `None` for in-memory stores.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn initialize_schema(&self) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        conn.execute_batch(SCHEMA)
            .map_err(|e| Error::operation("initialize_schema", e))
    }

    /// Inserts or replaces records in one transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails; nothing is written in that case.
    pub fn upsert_records(&self, records: &[Record]) -> Result<usize> {
        let start = Instant::now();
        let mut conn = acquire_lock(&self.conn);
        let result = write_records(&mut conn, records);
        record_operation("upsert_records", start, result.is_ok());
        result
    }

    /// Gets a record by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub fn record(&self, id: RecordId) -> Result<Option<Record>> {
        let conn = acquire_lock(&self.conn);
        let row: Option<RecordRow> = conn
            .query_row(
                "SELECT id, project_id, entity_type, name, fields FROM records WHERE id = ?1",
                params![id.get()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )
            .optional()
            .map_err(|e| Error::operation("get_record", e))?;
        row.map(build_record).transpose()
    }
}

fn encode_fields(fields: &BTreeMap<String, String>) -> Result<String> {
    serde_json::to_string(fields).map_err(|e| Error::operation("encode_fields", e))
}

fn decode_fields(raw: &str) -> Result<BTreeMap<String, String>> {
    serde_json::from_str(raw).map_err(|e| Error::operation("decode_fields", e))
}

fn build_record((id, project_id, entity_type, name, fields): RecordRow) -> Result<Record> {
    Ok(Record {
        id: RecordId::new(id),
        project_id,
        entity_type: EntityType::parse(&entity_type).unwrap_or_default(),
        name,
        fields: decode_fields(&fields)?,
    })
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn to_db_limit(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// Loads one group with its members.
fn load_group(conn: &Connection, id: &str) -> Result<Option<DuplicateGroup>> {
    let sql = format!("SELECT {GROUP_COLUMNS} FROM duplicate_groups WHERE id = ?1");
    let group = conn
        .query_row(&sql, params![id], group_from_row)
        .optional()
        .map_err(|e| Error::operation("get_group", e))?;
    group.map(|g| with_members(conn, g)).transpose()
}

fn group_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DuplicateGroup> {
    let entity_type: String = row.get(2)?;
    let status: String = row.get(5)?;
    Ok(DuplicateGroup {
        id: GroupId::new(row.get::<_, String>(0)?),
        project_id: row.get(1)?,
        entity_type: EntityType::parse(&entity_type).unwrap_or_default(),
        members: Vec::new(),
        suggested_master: RecordId::new(row.get(3)?),
        max_score: row.get(4)?,
        status: GroupStatus::parse(&status).unwrap_or_default(),
        task_id: row.get(6)?,
        created_at: from_millis(row.get(7)?),
        updated_at: from_millis(row.get(8)?),
    })
}

fn with_members(conn: &Connection, mut group: DuplicateGroup) -> Result<DuplicateGroup> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT record_id FROM duplicate_group_members WHERE group_id = ?1 ORDER BY record_id",
        )
        .map_err(|e| Error::operation("prepare_group_members", e))?;
    group.members = stmt
        .query_map(params![group.id.as_str()], |row| row.get::<_, i64>(0))
        .and_then(|rows| rows.map(|r| r.map(RecordId::new)).collect())
        .map_err(|e| Error::operation("get_group_members", e))?;
    Ok(group)
}

/// Drops records from every group membership, touching the affected groups.
fn strip_members(tx: &Transaction<'_>, ids: &[RecordId], now: i64) -> Result<()> {
    for id in ids {
        tx.execute(
            "UPDATE duplicate_groups SET updated_at = ?1
             WHERE id IN (SELECT group_id FROM duplicate_group_members WHERE record_id = ?2)",
            params![now, id.get()],
        )
        .map_err(|e| Error::operation("touch_groups", e))?;
        tx.execute(
            "DELETE FROM duplicate_group_members WHERE record_id = ?1",
            params![id.get()],
        )
        .map_err(|e| Error::operation("strip_group_member", e))?;
    }
    Ok(())
}

impl CandidateSource for SqliteStore {
    fn fetch_candidate_batch(
        &self,
        project_id: i64,
        entity_type: EntityType,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Record>> {
        let start = Instant::now();
        let conn = acquire_lock(&self.conn);
        let rows: rusqlite::Result<Vec<RecordRow>> = conn
            .prepare_cached(
                "SELECT id, project_id, entity_type, name, fields FROM records
                 WHERE project_id = ?1 AND entity_type = ?2
                 ORDER BY id LIMIT ?3 OFFSET ?4",
            )
            .and_then(|mut stmt| {
                stmt.query_map(
                    params![
                        project_id,
                        entity_type.as_str(),
                        to_db_limit(limit),
                        to_db_limit(offset)
                    ],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
                )?
                .collect()
            });
        record_operation("fetch_candidate_batch", start, rows.is_ok());
        rows.map_err(|e| Error::DataSource(format!("candidate fetch failed: {e}")))?
            .into_iter()
            .map(build_record)
            .collect()
    }

    fn count_candidates(&self, project_id: i64, entity_type: EntityType) -> Result<usize> {
        let conn = acquire_lock(&self.conn);
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM records WHERE project_id = ?1 AND entity_type = ?2",
                params![project_id, entity_type.as_str()],
                |row| row.get(0),
            )
            .map_err(|e| Error::DataSource(format!("candidate count failed: {e}")))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

impl DuplicateStore for SqliteStore {
    fn save_group(&self, group: &DuplicateGroup) -> Result<()> {
        let start = Instant::now();
        let mut conn = acquire_lock(&self.conn);
        let result = write_group(&mut conn, group);
        record_operation("save_group", start, result.is_ok());
        result
    }

    fn get_group(&self, id: &GroupId) -> Result<Option<DuplicateGroup>> {
        let conn = acquire_lock(&self.conn);
        load_group(&conn, id.as_str())
    }

    fn list_groups(
        &self,
        project_id: i64,
        status: Option<GroupStatus>,
    ) -> Result<Vec<DuplicateGroup>> {
        let start = Instant::now();
        let conn = acquire_lock(&self.conn);
        let sql = format!(
            "SELECT {GROUP_COLUMNS} FROM duplicate_groups
             WHERE project_id = ?1 AND (?2 IS NULL OR status = ?2)
             ORDER BY created_at, id"
        );
        let groups: Vec<DuplicateGroup> = conn
            .prepare(&sql)
            .and_then(|mut stmt| {
                stmt.query_map(
                    params![project_id, status.map(|s| s.as_str())],
                    group_from_row,
                )?
                .collect()
            })
            .map_err(|e| Error::operation("list_groups", e))?;
        let result = groups
            .into_iter()
            .map(|g| with_members(&conn, g))
            .collect::<Result<Vec<_>>>();
        record_operation("list_groups", start, result.is_ok());
        result
    }

    fn save_open_group(&self, group: &DuplicateGroup) -> Result<bool> {
        let start = Instant::now();
        let mut conn = acquire_lock(&self.conn);
        let result = write_open_group(&mut conn, group);
        record_operation("save_open_group", start, result.is_ok());
        result
    }

    fn remove_open_group(&self, id: &GroupId) -> Result<bool> {
        let conn = acquire_lock(&self.conn);
        let removed = conn
            .execute(
                "DELETE FROM duplicate_groups WHERE id = ?1 AND status = ?2",
                params![id.as_str(), GroupStatus::Open.as_str()],
            )
            .map_err(|e| Error::operation("remove_open_group", e))?;
        Ok(removed > 0)
    }

    fn set_group_status(&self, id: &GroupId, status: GroupStatus) -> Result<bool> {
        let conn = acquire_lock(&self.conn);
        let updated = conn
            .execute(
                "UPDATE duplicate_groups SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), to_millis(Utc::now()), id.as_str()],
            )
            .map_err(|e| Error::operation("set_group_status", e))?;
        Ok(updated > 0)
    }

    fn get_records(&self, project_id: i64, ids: &[RecordId]) -> Result<Vec<Record>> {
        let conn = acquire_lock(&self.conn);
        let mut stmt = conn
            .prepare_cached(
                "SELECT id, project_id, entity_type, name, fields FROM records
                 WHERE id = ?1 AND project_id = ?2",
            )
            .map_err(|e| Error::operation("prepare_get_records", e))?;
        let mut ids = ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            let row: Option<RecordRow> = stmt
                .query_row(params![id.get(), project_id], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
                })
                .optional()
                .map_err(|e| Error::operation("get_records", e))?;
            if let Some(row) = row {
                records.push(build_record(row)?);
            }
        }
        Ok(records)
    }

    fn update_master_fields(
        &self,
        master: RecordId,
        fields: &BTreeMap<String, String>,
    ) -> Result<()> {
        let mut conn = acquire_lock(&self.conn);
        let tx = conn
            .transaction()
            .map_err(|e| Error::operation("begin_update_master", e))?;
        merge_fields(&tx, master, fields)?;
        tx.commit()
            .map_err(|e| Error::operation("commit_update_master", e))
    }

    fn delete_members(&self, ids: &[RecordId]) -> Result<usize> {
        let mut conn = acquire_lock(&self.conn);
        let tx = conn
            .transaction()
            .map_err(|e| Error::operation("begin_delete_members", e))?;
        let mut deleted = 0;
        for id in ids {
            deleted += tx
                .execute("DELETE FROM records WHERE id = ?1", params![id.get()])
                .map_err(|e| Error::operation("delete_member", e))?;
        }
        strip_members(&tx, ids, to_millis(Utc::now()))?;
        tx.commit()
            .map_err(|e| Error::operation("commit_delete_members", e))?;
        Ok(deleted)
    }

    fn commit_merge(&self, merge: &MergeCommit) -> Result<()> {
        let start = Instant::now();
        let mut conn = acquire_lock(&self.conn);
        let result = apply_merge(&mut conn, merge);
        record_operation("commit_merge", start, result.is_ok());
        result
    }
}

/// Upserts records in one transaction.
fn write_records(conn: &mut Connection, records: &[Record]) -> Result<usize> {
    let tx = conn
        .transaction()
        .map_err(|e| Error::operation("begin_upsert_records", e))?;
    {
        let mut stmt = tx
            .prepare_cached(
                "INSERT INTO records (id, project_id, entity_type, name, fields)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                     project_id = excluded.project_id,
                     entity_type = excluded.entity_type,
                     name = excluded.name,
                     fields = excluded.fields",
            )
            .map_err(|e| Error::operation("prepare_upsert_record", e))?;
        for record in records {
            stmt.execute(params![
                record.id.get(),
                record.project_id,
                record.entity_type.as_str(),
                record.name,
                encode_fields(&record.fields)?,
            ])
            .map_err(|e| Error::operation("upsert_record", e))?;
        }
    }
    tx.commit()
        .map_err(|e| Error::operation("commit_upsert_records", e))?;
    Ok(records.len())
}

/// Upserts a group and replaces its membership in one transaction.
fn write_group(conn: &mut Connection, group: &DuplicateGroup) -> Result<()> {
    let tx = conn
        .transaction()
        .map_err(|e| Error::operation("begin_save_group", e))?;
    upsert_group(&tx, group)?;
    tx.commit()
        .map_err(|e| Error::operation("commit_save_group", e))
}

/// Like [`write_group`], but leaves a closed group untouched.
fn write_open_group(conn: &mut Connection, group: &DuplicateGroup) -> Result<bool> {
    let tx = conn
        .transaction()
        .map_err(|e| Error::operation("begin_save_open_group", e))?;
    let status: Option<String> = tx
        .query_row(
            "SELECT status FROM duplicate_groups WHERE id = ?1",
            params![group.id.as_str()],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| Error::operation("save_open_group_lookup", e))?;
    if status.is_some_and(|s| s != GroupStatus::Open.as_str()) {
        return Ok(false);
    }
    upsert_group(&tx, group)?;
    tx.commit()
        .map_err(|e| Error::operation("commit_save_open_group", e))?;
    Ok(true)
}

fn upsert_group(tx: &Transaction<'_>, group: &DuplicateGroup) -> Result<()> {
    tx.execute(
        "INSERT INTO duplicate_groups
             (id, project_id, entity_type, suggested_master, max_score, status,
              task_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(id) DO UPDATE SET
             suggested_master = excluded.suggested_master,
             max_score = excluded.max_score,
             status = excluded.status,
             task_id = excluded.task_id,
             updated_at = excluded.updated_at",
        params![
            group.id.as_str(),
            group.project_id,
            group.entity_type.as_str(),
            group.suggested_master.get(),
            group.max_score,
            group.status.as_str(),
            group.task_id,
            to_millis(group.created_at),
            to_millis(group.updated_at),
        ],
    )
    .map_err(|e| Error::operation("save_group", e))?;
    tx.execute(
        "DELETE FROM duplicate_group_members WHERE group_id = ?1",
        params![group.id.as_str()],
    )
    .map_err(|e| Error::operation("clear_group_members", e))?;
    {
        let mut stmt = tx
            .prepare_cached(
                "INSERT INTO duplicate_group_members (group_id, record_id) VALUES (?1, ?2)",
            )
            .map_err(|e| Error::operation("prepare_group_member", e))?;
        for member in &group.members {
            stmt.execute(params![group.id.as_str(), member.get()])
                .map_err(|e| Error::operation("save_group_member", e))?;
        }
    }
    Ok(())
}

/// Applies a merge in one transaction.
fn apply_merge(conn: &mut Connection, merge: &MergeCommit) -> Result<()> {
    let tx = conn
        .transaction()
        .map_err(|e| Error::operation("begin_merge", e))?;
    let status: Option<String> = tx
        .query_row(
            "SELECT status FROM duplicate_groups WHERE id = ?1",
            params![merge.group_id.as_str()],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| Error::operation("merge_lookup_group", e))?;
    match status {
        None => return Err(Error::not_found("group", &merge.group_id)),
        Some(status) if status != GroupStatus::Open.as_str() => {
            return Err(Error::MergeConflict(format!(
                "group {} is {status}",
                merge.group_id
            )));
        },
        Some(_) => {},
    }

    let now = to_millis(Utc::now());
    merge_fields(&tx, merge.master, &merge.fields)?;
    for id in &merge.deleted {
        tx.execute("DELETE FROM records WHERE id = ?1", params![id.get()])
            .map_err(|e| Error::operation("merge_delete_record", e))?;
    }
    strip_members(&tx, &merge.deleted, now)?;
    tx.execute(
        "UPDATE duplicate_groups SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![
            GroupStatus::Resolved.as_str(),
            now,
            merge.group_id.as_str()
        ],
    )
    .map_err(|e| Error::operation("merge_resolve_group", e))?;
    // Dropping an uncommitted transaction rolls it back.
    tx.commit().map_err(|e| Error::operation("commit_merge", e))
}

/// Adds `fields` to a record's stored attributes.
fn merge_fields(
    tx: &Transaction<'_>,
    master: RecordId,
    fields: &BTreeMap<String, String>,
) -> Result<()> {
    let raw: Option<String> = tx
        .query_row(
            "SELECT fields FROM records WHERE id = ?1",
            params![master.get()],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| Error::operation("load_master_fields", e))?;
    let mut current = decode_fields(&raw.ok_or_else(|| Error::not_found("record", master))?)?;
    current.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
    tx.execute(
        "UPDATE records SET fields = ?1 WHERE id = ?2",
        params![encode_fields(&current)?, master.get()],
    )
    .map_err(|e| Error::operation("update_master_fields", e))?;
    Ok(())
}
