//! One decrypted message database and its cached time bounds.

use super::message::{Cursor, MessageRecord, RECORD_COLUMNS};
use crate::error::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};

/// Scan direction inside a single shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Walk {
    Older,
    Newer,
}

const OLDER_PREDICATE: &str = "(CreateTime < ?2 OR (CreateTime = ?2 AND Sequence < ?3))";
const NEWER_PREDICATE: &str = "(CreateTime > ?2 OR (CreateTime = ?2 AND Sequence > ?3))";

pub struct MessageShard {
    path: PathBuf,
    conn: Mutex<Connection>,
    start_time: i64,
    end_time: i64,
}

impl MessageShard {
    /// Opens a shard read-only. A shard with no messages yields `None`.
    pub fn open(path: &Path) -> Result<Option<Self>> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        let bounds: (Option<i64>, Option<i64>) = conn.query_row(
            "SELECT MIN(CreateTime), MAX(CreateTime) FROM MSG",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let (Some(start_time), Some(end_time)) = bounds else {
            return Ok(None);
        };
        Ok(Some(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(conn),
            start_time,
            end_time,
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn close(self) -> Result<()> {
        super::close_connection(self.conn.into_inner())
    }

    pub fn start_time(&self) -> i64 {
        self.start_time
    }

    pub fn end_time(&self) -> i64 {
        self.end_time
    }

    /// Whether the shard's time range can hold anything past `cursor`.
    pub fn may_contain(&self, cursor: Cursor, walk: Walk) -> bool {
        match walk {
            Walk::Older => self.start_time <= cursor.create_time,
            Walk::Newer => self.end_time >= cursor.create_time,
        }
    }

    /// Cheap existence check for `talker` rows past `cursor`.
    pub fn has_rows(&self, talker: &str, cursor: Cursor, walk: Walk) -> rusqlite::Result<bool> {
        let predicate = match walk {
            Walk::Older => OLDER_PREDICATE,
            Walk::Newer => NEWER_PREDICATE,
        };
        let sql = format!("SELECT 1 FROM MSG WHERE StrTalker = ?1 AND {predicate} LIMIT 1");
        let conn = self.conn.lock();
        let hit: Option<i64> = conn
            .query_row(&sql, params![talker, cursor.create_time, cursor.sequence], |row| row.get(0))
            .optional()?;
        Ok(hit.is_some())
    }

    /// Up to `limit` rows past `cursor`, nearest first: newest-first when
    /// walking older, oldest-first when walking newer.
    pub fn page(&self, talker: &str, cursor: Cursor, walk: Walk, limit: usize) -> Result<Vec<MessageRecord>> {
        let (predicate, order) = match walk {
            Walk::Older => (OLDER_PREDICATE, "DESC"),
            Walk::Newer => (NEWER_PREDICATE, "ASC"),
        };
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM MSG WHERE StrTalker = ?1 AND {predicate} \
             ORDER BY CreateTime {order}, Sequence {order} LIMIT ?4"
        );
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![talker, cursor.create_time, cursor.sequence, limit as i64],
            MessageRecord::from_row,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Distinct calendar days (UTC+8) with messages for `talker`.
    pub fn message_dates(&self, talker: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT CreateTime FROM MSG WHERE StrTalker = ?1 ORDER BY CreateTime",
        )?;
        let rows = stmt.query_map(params![talker], |row| row.get::<_, i64>(0))?;
        let mut days: Vec<String> = Vec::new();
        for ts in rows {
            let Some(day) = local_day(ts?) else {
                continue;
            };
            if days.last() != Some(&day) {
                days.push(day);
            }
        }
        Ok(days)
    }
}

/// The client renders dates in China Standard Time.
const CLIENT_UTC_OFFSET_SECS: i64 = 8 * 3600;

fn local_day(ts: i64) -> Option<String> {
    let t = DateTime::<Utc>::from_timestamp(ts.checked_add(CLIENT_UTC_OFFSET_SECS)?, 0)?;
    Some(t.format("%Y-%m-%d").to_string())
}

impl std::fmt::Debug for MessageShard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageShard")
            .field("path", &self.path)
            .field("start_time", &self.start_time)
            .field("end_time", &self.end_time)
            .finish()
    }
}
