//! Contact, session and group lookups from `MicroMsg.db`.

use crate::error::Result;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use tracing::debug;

pub const MICRO_MSG_DB: &str = "MicroMsg.db";
pub const OPEN_IM_CONTACT_DB: &str = "OpenIMContact.db";
const CHATROOM_SUFFIX: &str = "@chatroom";
const OPEN_IM_SUFFIX: &str = "@openim";
const MEMBER_SEPARATOR: &str = "^G";

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct UserInfo {
    pub user_name: String,
    pub alias: String,
    pub remark: String,
    pub nick_name: String,
    pub small_head_url: String,
    pub big_head_url: String,
    pub is_group: bool,
}

impl UserInfo {
    /// Remark if set, otherwise nickname, otherwise the raw id.
    pub fn display_name(&self) -> &str {
        if !self.remark.is_empty() {
            &self.remark
        } else if !self.nick_name.is_empty() {
            &self.nick_name
        } else {
            &self.user_name
        }
    }
}

/// Contact row with the pinyin keys used for ordering.
#[derive(Debug, Clone)]
pub struct ContactEntry {
    pub user_name: String,
    pub quan_pin: String,
    pub remark_quan_pin: String,
}

impl ContactEntry {
    pub fn sort_key(&self) -> &str {
        if self.remark_quan_pin.is_empty() {
            &self.quan_pin
        } else {
            &self.remark_quan_pin
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionEntry {
    pub user_name: String,
    pub nick_name: String,
    pub content: String,
    pub msg_type: i64,
    pub time: i64,
    pub is_group: bool,
}

fn open_read_only(path: &Path) -> rusqlite::Result<Connection> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
}

pub struct ContactBook {
    micro: Mutex<Connection>,
    open_im: Option<Mutex<Connection>>,
}

impl ContactBook {
    /// `OpenIMContact.db` is optional.
    pub fn open(msg_dir: &Path) -> Result<Self> {
        let micro = open_read_only(&msg_dir.join(MICRO_MSG_DB))?;
        let open_im_path = msg_dir.join(OPEN_IM_CONTACT_DB);
        let open_im = if open_im_path.exists() {
            Some(Mutex::new(open_read_only(&open_im_path)?))
        } else {
            None
        };
        Ok(Self {
            micro: Mutex::new(micro),
            open_im,
        })
    }

    pub fn close(self) -> Result<()> {
        let micro = super::close_connection(self.micro.into_inner());
        let open_im = match self.open_im {
            Some(conn) => super::close_connection(conn.into_inner()),
            None => Ok(()),
        };
        micro.and(open_im)
    }

    /// `None` when the name is not a known contact.
    pub fn user_info(&self, name: &str) -> Result<Option<UserInfo>> {
        let base = if name.ends_with(OPEN_IM_SUFFIX) {
            match &self.open_im {
                Some(conn) => conn
                    .lock()
                    .query_row(
                        "SELECT ifnull(UserName,''), '', ifnull(ReMark,''), ifnull(NickName,'') \
                         FROM OpenIMContact WHERE UserName = ?1",
                        params![name],
                        Self::user_row,
                    )
                    .optional()?,
                None => None,
            }
        } else {
            self.micro
                .lock()
                .query_row(
                    "SELECT ifnull(UserName,''), ifnull(Alias,''), ifnull(ReMark,''), ifnull(NickName,'') \
                     FROM Contact WHERE UserName = ?1",
                    params![name],
                    Self::user_row,
                )
                .optional()?
        };
        let Some(mut info) = base else {
            return Ok(None);
        };

        let head = self
            .micro
            .lock()
            .query_row(
                "SELECT ifnull(smallHeadImgUrl,''), ifnull(bigHeadImgUrl,'') \
                 FROM ContactHeadImgUrl WHERE usrName = ?1",
                params![info.user_name],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional();
        match head {
            Ok(Some((small, big))) => {
                info.small_head_url = small;
                info.big_head_url = big;
            }
            Ok(None) => {}
            Err(e) => debug!(user = name, error = %e, "no head image urls"),
        }
        Ok(Some(info))
    }

    fn user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserInfo> {
        let user_name: String = row.get(0)?;
        Ok(UserInfo {
            is_group: user_name.ends_with(CHATROOM_SUFFIX),
            user_name,
            alias: row.get(1)?,
            remark: row.get(2)?,
            nick_name: row.get(3)?,
            ..Default::default()
        })
    }

    /// Confirmed friends, ordered by remark pinyin, else name pinyin.
    pub fn contact_entries(&self) -> Result<Vec<ContactEntry>> {
        let conn = self.micro.lock();
        let mut stmt = conn.prepare(
            "SELECT ifnull(UserName,''), ifnull(QuanPin,''), ifnull(RemarkQuanPin,'') \
             FROM Contact WHERE Reserved1 = 1 AND Reserved2 = 1",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ContactEntry {
                user_name: row.get(0)?,
                quan_pin: row.get(1)?,
                remark_quan_pin: row.get(2)?,
            })
        })?;
        let mut entries = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        entries.sort_by(|a, b| a.sort_key().cmp(b.sort_key()));
        Ok(entries)
    }

    /// Conversation list, most recent first. Sessions without a preview
    /// are skipped before paging, so every page is full until the end.
    pub fn sessions(&self, page: usize, size: usize) -> Result<Vec<SessionEntry>> {
        let conn = self.micro.lock();
        let mut stmt = conn.prepare(
            "SELECT ifnull(strUsrName,''), ifnull(strNickName,''), ifnull(strContent,''), \
             ifnull(nMsgType, 0), ifnull(nTime, 0) \
             FROM Session WHERE ifnull(strContent,'') <> '' \
             ORDER BY nOrder DESC LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt.query_map(params![size as i64, (page * size) as i64], |row| {
            let user_name: String = row.get(0)?;
            Ok(SessionEntry {
                is_group: user_name.ends_with(CHATROOM_SUFFIX),
                user_name,
                nick_name: row.get(1)?,
                content: row.get(2)?,
                msg_type: row.get(3)?,
                time: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Member ids of a group; empty for unknown rooms.
    pub fn chatroom_member_names(&self, room: &str) -> Result<Vec<String>> {
        let list: Option<String> = self
            .micro
            .lock()
            .query_row(
                "SELECT ifnull(UserNameList,'') FROM ChatRoom WHERE ChatRoomName = ?1",
                params![room],
                |row| row.get(0),
            )
            .optional()?;
        Ok(list
            .unwrap_or_default()
            .split(MEMBER_SEPARATOR)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect())
    }
}
