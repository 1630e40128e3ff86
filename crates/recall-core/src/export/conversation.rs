//! Single-conversation export.
//!
//! Copies the rows belonging to one talker out of a decrypted account into
//! a fresh account tree with the same layout, so the result opens with
//! [`MessageProvider::open`] like any other account:
//!
//! ```text
//! dest/Msg/MicroMsg.db        Contact, ContactHeadImgUrl, Session (+ ChatRoom, ChatRoomInfo)
//! dest/Msg/Multi/MSG.db       MSG rows from every shard, Name2ID
//! dest/Msg/UserData.db        lastTime, bookMark
//! dest/Msg/OpenIMContact.db   only when an @openim user is involved
//! dest/FileStorage/HeadImage  avatars of everyone copied
//! ```

use super::phases::{copy_file, head_image_path};
use crate::error::{RecallError, Result};
use crate::store::contacts::{MICRO_MSG_DB, OPEN_IM_CONTACT_DB};
use crate::store::provider::MSG_DIR;
use crate::store::sharded::{MULTI_DIR, SHARED_SHARD};
use crate::store::userdata::USER_DATA_DB;
use crate::store::MessageProvider;
use rusqlite::{params, params_from_iter, Connection};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

const CHATROOM_SUFFIX: &str = "@chatroom";
const OPEN_IM_SUFFIX: &str = "@openim";
const KEY_CHUNK: usize = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConversationExport {
    pub messages: usize,
    pub contacts: usize,
    pub head_images: usize,
}

/// Exports everything about `talker` from `provider` under `dest_root`.
///
/// Refuses to touch an existing destination database.
pub fn export_conversation(provider: &MessageProvider, talker: &str, dest_root: &Path) -> Result<ConversationExport> {
    let src_msg = provider.root().join(MSG_DIR);
    let dest_msg = dest_root.join(MSG_DIR);
    let targets = [
        dest_msg.join(MICRO_MSG_DB),
        dest_msg.join(MULTI_DIR).join(SHARED_SHARD),
        dest_msg.join(USER_DATA_DB),
        dest_msg.join(OPEN_IM_CONTACT_DB),
    ];
    if let Some(existing) = targets.iter().find(|p| p.exists()) {
        return Err(RecallError::OutputExists(existing.clone()));
    }
    fs::create_dir_all(dest_msg.join(MULTI_DIR))?;

    let is_group = talker.ends_with(CHATROOM_SUFFIX);
    let members = if is_group {
        provider.chatroom_member_names(talker)?
    } else {
        Vec::new()
    };
    let mut people = vec![talker.to_string(), provider.account().to_string()];
    people.extend(members.iter().cloned());
    let mut seen = HashSet::new();
    people.retain(|p| seen.insert(p.clone()));
    let talker_only = [talker.to_string()];
    let mut report = ConversationExport::default();

    // contacts, session and group metadata
    let micro = TableCopier::create(&targets[0])?;
    micro.attach(&src_msg.join(MICRO_MSG_DB))?;
    report.contacts = micro.copy("Contact", "UserName", &people, &[])?;
    micro.copy("ContactHeadImgUrl", "usrName", &people, &[])?;
    micro.copy("Session", "strUsrName", &talker_only, &[])?;
    if is_group {
        micro.copy("ChatRoom", "ChatRoomName", &talker_only, &[])?;
        micro.copy("ChatRoomInfo", "ChatRoomName", &talker_only, &[])?;
    }
    micro.finish()?;

    // messages from every shard into one
    let shards = provider.store().shards();
    if shards.is_empty() {
        warn!(talker, "account has no message shards");
    } else {
        let msg = TableCopier::create(&targets[1])?;
        for shard in shards {
            msg.attach(shard.path())?;
            // localId is per shard and would collide
            report.messages += msg.copy("MSG", "StrTalker", &talker_only, &["localId"])?;
            msg.copy("Name2ID", "UsrName", &talker_only, &[])?;
            msg.detach()?;
        }
        msg.finish()?;
    }

    let user_data_src = src_msg.join(USER_DATA_DB);
    if user_data_src.exists() {
        let user_data = TableCopier::create(&targets[2])?;
        user_data.attach(&user_data_src)?;
        user_data.copy("lastTime", "userName", &talker_only, &["localId"])?;
        user_data.copy("bookMark", "userName", &talker_only, &["localId"])?;
        user_data.finish()?;
    }

    let open_im: Vec<String> = people.iter().filter(|p| p.ends_with(OPEN_IM_SUFFIX)).cloned().collect();
    let open_im_src = src_msg.join(OPEN_IM_CONTACT_DB);
    if !open_im.is_empty() && open_im_src.exists() {
        let contacts = TableCopier::create(&targets[3])?;
        contacts.attach(&open_im_src)?;
        report.contacts += contacts.copy("OpenIMContact", "UserName", &open_im, &[])?;
        contacts.finish()?;
    }

    for person in &people {
        let rel = head_image_path(person);
        let src = provider.root().join(&rel);
        if src.is_file() {
            copy_file(&src, &dest_root.join(&rel))?;
            report.head_images += 1;
        }
    }

    info!(
        talker,
        dest = %dest_root.display(),
        messages = report.messages,
        contacts = report.contacts,
        "conversation exported"
    );
    Ok(report)
}

fn quoted(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Fresh database that pulls schema and rows from an attached source.
struct TableCopier {
    conn: Connection,
}

impl TableCopier {
    fn create(path: &Path) -> Result<Self> {
        if path.exists() {
            return Err(RecallError::OutputExists(path.to_path_buf()));
        }
        Ok(Self {
            conn: Connection::open(path)?,
        })
    }

    fn attach(&self, source: &Path) -> Result<()> {
        self.conn
            .execute("ATTACH DATABASE ?1 AS src", params![source.to_string_lossy().into_owned()])?;
        Ok(())
    }

    fn detach(&self) -> Result<()> {
        self.conn.execute_batch("DETACH DATABASE src")?;
        Ok(())
    }

    fn source_has(&self, table: &str) -> Result<bool> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM src.sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    fn has(&self, table: &str) -> Result<bool> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM main.sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    /// Recreates the source's table and its indexes in the destination.
    fn copy_schema(&self, table: &str) -> Result<()> {
        let statements: Vec<String> = {
            let mut stmt = self.conn.prepare(
                "SELECT sql FROM src.sqlite_master \
                 WHERE tbl_name = ?1 AND sql IS NOT NULL \
                 ORDER BY CASE type WHEN 'table' THEN 0 ELSE 1 END",
            )?;
            let rows = stmt.query_map(params![table], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };
        for sql in &statements {
            self.conn.execute_batch(sql)?;
        }
        Ok(())
    }

    fn columns(&self, table: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(&format!("PRAGMA main.table_info({})", quoted(table)))?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Copies rows of `table` whose `key` is one of `keys`, leaving out
    /// the `skip` columns. A table missing from the source copies nothing.
    fn copy(&self, table: &str, key: &str, keys: &[String], skip: &[&str]) -> Result<usize> {
        if !self.source_has(table)? {
            debug!(table, "not in source, skipped");
            return Ok(0);
        }
        if !self.has(table)? {
            self.copy_schema(table)?;
        }
        let columns = self
            .columns(table)?
            .into_iter()
            .filter(|c| !skip.iter().any(|s| s.eq_ignore_ascii_case(c)))
            .map(|c| quoted(&c))
            .collect::<Vec<_>>()
            .join(", ");

        let tx = self.conn.unchecked_transaction()?;
        let mut copied = 0;
        for chunk in keys.chunks(KEY_CHUNK) {
            let marks = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "INSERT OR IGNORE INTO main.{t} ({columns}) SELECT {columns} FROM src.{t} WHERE {k} IN ({marks})",
                t = quoted(table),
                k = quoted(key),
            );
            copied += tx.execute(&sql, params_from_iter(chunk.iter()))?;
        }
        tx.commit()?;
        debug!(table, copied, "rows copied");
        Ok(copied)
    }

    fn finish(self) -> Result<()> {
        crate::store::close_connection(self.conn)
    }
}
