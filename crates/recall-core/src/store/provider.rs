//! Per-session owner of every open store handle for one decrypted account.

use super::contacts::{ContactBook, SessionEntry, UserInfo, MICRO_MSG_DB};
use super::filter::{ContentExtractor, MessageFilter, PlainTextExtractor};
use super::message::{Direction, MessageRecord};
use super::sharded::ShardedMessageStore;
use super::userdata::{Bookmark, LastRead, UserData, USER_DATA_DB};
use crate::error::{RecallError, Result};
use crate::settings::RecallSettings;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const MSG_DIR: &str = "Msg";
pub const FILE_STORAGE: &str = "FileStorage";
pub const HEAD_IMAGE_DIR: &str = "HeadImage";

/// Avatar location relative to an account root.
pub fn head_image_path(user_name: &str) -> PathBuf {
    Path::new(FILE_STORAGE)
        .join(HEAD_IMAGE_DIR)
        .join(format!("{user_name}.headimg"))
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AccountInfo {
    #[serde(flatten)]
    pub user: UserInfo,
    /// Relative to the account root.
    pub local_head_image: Option<PathBuf>,
}

pub struct MessageProvider {
    root: PathBuf,
    account: String,
    store: ShardedMessageStore,
    contacts: ContactBook,
    user_data: UserData,
    user_cache: Mutex<HashMap<String, UserInfo>>,
    extractor: Box<dyn ContentExtractor>,
    search_batch: usize,
}

impl MessageProvider {
    /// Opens a decrypted account directory (the one holding `Msg/`).
    pub fn open(root: &Path, settings: &RecallSettings) -> Result<Self> {
        let msg_dir = root.join(MSG_DIR);
        let micro = msg_dir.join(MICRO_MSG_DB);
        if !micro.exists() {
            return Err(RecallError::ContainerMissing(micro));
        }
        let account = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let provider = Self {
            root: root.to_path_buf(),
            store: ShardedMessageStore::discover(&msg_dir)?,
            contacts: ContactBook::open(&msg_dir)?,
            user_data: UserData::open(&msg_dir.join(USER_DATA_DB))?,
            user_cache: Mutex::new(HashMap::new()),
            extractor: Box::new(PlainTextExtractor),
            search_batch: settings.query.search_batch_size,
            account,
        };
        info!(root = %root.display(), account = %provider.account, "provider opened");
        Ok(provider)
    }

    pub fn with_extractor(mut self, extractor: Box<dyn ContentExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn store(&self) -> &ShardedMessageStore {
        &self.store
    }

    pub fn query(&self, talker: &str, anchor_time: i64, count: usize, direction: Direction) -> Result<Vec<MessageRecord>> {
        self.store.query(talker, anchor_time, count, direction)
    }

    pub fn search(
        &self,
        talker: &str,
        anchor_time: i64,
        count: usize,
        direction: Direction,
        filter: &MessageFilter,
    ) -> Result<Vec<MessageRecord>> {
        self.store.search(
            talker,
            anchor_time,
            count,
            direction,
            filter,
            self.extractor.as_ref(),
            self.search_batch,
        )
    }

    pub fn message_dates(&self, talker: &str) -> Result<Vec<String>> {
        self.store.message_dates(talker)
    }

    /// Cached contact lookup.
    pub fn user_info(&self, name: &str) -> Result<Option<UserInfo>> {
        let mut cache = self.user_cache.lock();
        if let Some(info) = cache.get(name) {
            return Ok(Some(info.clone()));
        }
        let found = self.contacts.user_info(name)?;
        if let Some(info) = &found {
            cache.insert(name.to_string(), info.clone());
        }
        Ok(found)
    }

    pub fn self_info(&self) -> Result<Option<UserInfo>> {
        self.user_info(&self.account)
    }

    /// Profile of the account owner, with the cached avatar when one was
    /// exported under `FileStorage/HeadImage`.
    pub fn account_info(&self) -> Result<Option<AccountInfo>> {
        let Some(user) = self.self_info()? else {
            return Ok(None);
        };
        let avatar = head_image_path(&user.user_name);
        let local_head_image = self.root.join(&avatar).is_file().then_some(avatar);
        Ok(Some(AccountInfo { user, local_head_image }))
    }

    /// Confirmed friends with a visible name, pinyin ordered, paged.
    pub fn contacts(&self, page: usize, size: usize) -> Result<Vec<UserInfo>> {
        let mut out = Vec::new();
        for entry in self.contacts.contact_entries()? {
            match self.user_info(&entry.user_name)? {
                Some(info) if !(info.nick_name.is_empty() && info.remark.is_empty()) => out.push(info),
                _ => {}
            }
        }
        Ok(out.into_iter().skip(page * size).take(size).collect())
    }

    pub fn sessions(&self, page: usize, size: usize) -> Result<Vec<SessionEntry>> {
        self.contacts.sessions(page, size)
    }

    /// Raw member ids of a group, known contacts or not.
    pub fn chatroom_member_names(&self, room: &str) -> Result<Vec<String>> {
        self.contacts.chatroom_member_names(room)
    }

    /// Members of a group that resolve to a known contact.
    pub fn chatroom_members(&self, room: &str) -> Result<Vec<UserInfo>> {
        let mut out = Vec::new();
        for name in self.contacts.chatroom_member_names(room)? {
            match self.user_info(&name)? {
                Some(info) => out.push(info),
                None => warn!(room, member = %name, "unknown group member"),
            }
        }
        Ok(out)
    }

    pub fn last_read(&self, talker: &str) -> Result<Option<LastRead>> {
        self.user_data.last_read(talker)
    }

    pub fn set_last_read(&self, last: &LastRead) -> Result<()> {
        self.user_data.set_last_read(last)
    }

    pub fn add_bookmark(&self, talker: &str, tag: &str, info: &str) -> Result<String> {
        self.user_data.add_bookmark(talker, tag, info)
    }

    pub fn remove_bookmark(&self, mark_id: &str) -> Result<bool> {
        self.user_data.remove_bookmark(mark_id)
    }

    pub fn bookmarks(&self, talker: &str) -> Result<Vec<Bookmark>> {
        self.user_data.bookmarks(talker)
    }

    /// Releases every store handle. All stores are closed even if one of
    /// them fails; the first failure is returned.
    pub fn close(self) -> Result<()> {
        let root = self.root;
        let outcome = self
            .store
            .close()
            .and(self.contacts.close())
            .and(self.user_data.close());
        match &outcome {
            Ok(()) => info!(root = %root.display(), "provider closed"),
            Err(e) => warn!(root = %root.display(), error = %e, "provider closed with errors"),
        }
        outcome
    }
}
