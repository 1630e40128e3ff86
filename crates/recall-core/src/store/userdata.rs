//! Reader-side state kept next to the decrypted stores: where the reader
//! left off in each conversation, and bookmarked messages.

use crate::error::Result;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::debug;

pub const USER_DATA_DB: &str = "UserData.db";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LastRead {
    pub user_name: String,
    pub timestamp: i64,
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bookmark {
    pub mark_id: String,
    pub tag: String,
    pub info: String,
}

pub struct UserData {
    conn: Mutex<Connection>,
}

impl UserData {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    pub fn close(self) -> Result<()> {
        super::close_connection(self.conn.into_inner())
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS lastTime (
                localId INTEGER PRIMARY KEY AUTOINCREMENT,
                userName TEXT,
                timestamp INT,
                messageId TEXT,
                Reserved0 INT DEFAULT 0,
                Reserved1 INT DEFAULT 0,
                Reserved2 TEXT,
                Reserved3 TEXT
            );
            CREATE TABLE IF NOT EXISTS bookMark (
                localId INTEGER PRIMARY KEY AUTOINCREMENT,
                userName TEXT,
                markId TEXT,
                tag TEXT,
                info TEXT,
                Reserved0 INT DEFAULT 0,
                Reserved1 INT DEFAULT 0,
                Reserved2 TEXT,
                Reserved3 TEXT
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn last_read(&self, user_name: &str) -> Result<Option<LastRead>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT ifnull(timestamp, 0), ifnull(messageId, '') FROM lastTime WHERE userName = ?1",
                params![user_name],
                |row| {
                    Ok(LastRead {
                        user_name: user_name.to_string(),
                        timestamp: row.get(0)?,
                        message_id: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn set_last_read(&self, last: &LastRead) -> Result<()> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE lastTime SET timestamp = ?1, messageId = ?2 WHERE userName = ?3",
            params![last.timestamp, last.message_id, last.user_name],
        )?;
        if updated == 0 {
            conn.execute(
                "INSERT INTO lastTime (userName, timestamp, messageId) VALUES (?1, ?2, ?3)",
                params![last.user_name, last.timestamp, last.message_id],
            )?;
        }
        Ok(())
    }

    /// Bookmarks are keyed by the SHA-256 of their info; adding the same
    /// info twice is a no-op. Returns the mark id.
    pub fn add_bookmark(&self, user_name: &str, tag: &str, info: &str) -> Result<String> {
        let mark_id = hex::encode(Sha256::digest(info.as_bytes()));
        let conn = self.conn.lock();
        let exists: i64 = conn.query_row(
            "SELECT COUNT(*) FROM bookMark WHERE markId = ?1",
            params![mark_id],
            |row| row.get(0),
        )?;
        if exists > 0 {
            debug!(mark_id = %mark_id, "bookmark already present");
            return Ok(mark_id);
        }
        conn.execute(
            "INSERT INTO bookMark (userName, markId, tag, info) VALUES (?1, ?2, ?3, ?4)",
            params![user_name, mark_id, tag, info],
        )?;
        Ok(mark_id)
    }

    /// Returns whether a bookmark was removed.
    pub fn remove_bookmark(&self, mark_id: &str) -> Result<bool> {
        let removed = self
            .conn
            .lock()
            .execute("DELETE FROM bookMark WHERE markId = ?1", params![mark_id])?;
        Ok(removed > 0)
    }

    pub fn bookmarks(&self, user_name: &str) -> Result<Vec<Bookmark>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT ifnull(markId,''), ifnull(tag,''), ifnull(info,'') FROM bookMark \
             WHERE userName = ?1 ORDER BY localId",
        )?;
        let rows = stmt.query_map(params![user_name], |row| {
            Ok(Bookmark {
                mark_id: row.get(0)?,
                tag: row.get(1)?,
                info: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}
