//! Directional paging over message history split across shard files.
//!
//! Shards are kept newest-first by `start_time`. A directional query picks
//! the first shard that actually holds rows past the current cursor, takes
//! what it can, then moves the cursor to the last row returned and picks
//! again. Because the cursor is `(CreateTime, Sequence)` rather than a bare
//! timestamp, rows sharing a timestamp across a seam are neither repeated
//! nor skipped.

use super::filter::{ContentExtractor, MessageFilter};
use super::message::{Cursor, Direction, MessageRecord};
use super::shard::{MessageShard, Walk};
use crate::error::{RecallError, Result};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info, warn};

pub const MULTI_DIR: &str = "Multi";
pub const SHARED_SHARD: &str = "MSG.db";

#[derive(Debug, Default)]
pub struct ShardedMessageStore {
    shards: Vec<MessageShard>,
}

impl ShardedMessageStore {
    /// Opens `MSG.db` (if present) and `MSG0.db`, `MSG1.db`, ... under
    /// `msg_dir/Multi` until the first missing index.
    pub fn discover(msg_dir: &Path) -> Result<Self> {
        let multi = msg_dir.join(MULTI_DIR);
        let mut paths = Vec::new();
        let shared = multi.join(SHARED_SHARD);
        if shared.exists() {
            paths.push(shared);
        }
        for index in 0.. {
            let path = multi.join(format!("MSG{index}.db"));
            if !path.exists() {
                break;
            }
            paths.push(path);
        }

        let mut shards = Vec::with_capacity(paths.len());
        for path in paths {
            match MessageShard::open(&path) {
                Ok(Some(shard)) => {
                    debug!(
                        shard = %path.display(),
                        start = shard.start_time(),
                        end = shard.end_time(),
                        "shard opened"
                    );
                    shards.push(shard);
                }
                Ok(None) => debug!(shard = %path.display(), "shard has no messages"),
                Err(e) => warn!(shard = %path.display(), error = %e, "shard skipped"),
            }
        }
        info!(count = shards.len(), "message shards ready");
        Ok(Self::from_shards(shards))
    }

    pub fn from_shards(mut shards: Vec<MessageShard>) -> Self {
        shards.sort_by(|a, b| b.start_time().cmp(&a.start_time()));
        Self { shards }
    }

    pub fn shards(&self) -> &[MessageShard] {
        &self.shards
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Closes every shard; the first failure is returned once all are closed.
    pub fn close(self) -> Result<()> {
        let mut outcome = Ok(());
        for shard in self.shards {
            let path = shard.path().to_path_buf();
            if let Err(e) = shard.close() {
                warn!(shard = %path.display(), error = %e, "shard did not close cleanly");
                if outcome.is_ok() {
                    outcome = Err(e);
                }
            }
        }
        outcome
    }

    /// First shard in walk order holding `talker` rows past `cursor`.
    ///
    /// A failing lookup counts as "no rows here" so one damaged shard does
    /// not end the walk; the failure is logged.
    fn select_shard(&self, talker: &str, cursor: Cursor, walk: Walk) -> Option<&MessageShard> {
        let candidates: Box<dyn Iterator<Item = &MessageShard>> = match walk {
            Walk::Older => Box::new(self.shards.iter()),
            Walk::Newer => Box::new(self.shards.iter().rev()),
        };
        for shard in candidates {
            if !shard.may_contain(cursor, walk) {
                continue;
            }
            match shard.has_rows(talker, cursor, walk) {
                Ok(true) => return Some(shard),
                Ok(false) => {}
                Err(source) => {
                    let err = RecallError::ShardLookupFailed {
                        shard: shard.path().to_path_buf(),
                        source,
                    };
                    warn!(error = %err, "treating shard as empty");
                }
            }
        }
        None
    }

    /// Up to `count` rows past `cursor`, nearest first, crossing shards.
    fn walk(&self, talker: &str, mut cursor: Cursor, walk: Walk, count: usize) -> Result<Vec<MessageRecord>> {
        let mut out = Vec::with_capacity(count.min(1024));
        while out.len() < count {
            let Some(shard) = self.select_shard(talker, cursor, walk) else {
                break;
            };
            let rows = shard.page(talker, cursor, walk, count - out.len())?;
            let Some(last) = rows.last() else {
                break;
            };
            cursor = last.cursor();
            out.extend(rows);
        }
        Ok(out)
    }

    /// Messages of `talker` around `anchor_time`, always newest first.
    ///
    /// * `Forward`: up to `count` rows at or before the anchor.
    /// * `Backward`: up to `count` rows after the anchor.
    /// * `Both`: `count / 2` rows after the anchor followed by `count / 2`
    ///   rows at or before it.
    pub fn query(&self, talker: &str, anchor_time: i64, count: usize, direction: Direction) -> Result<Vec<MessageRecord>> {
        around(anchor_time, count, direction, |cursor, walk, n| self.walk(talker, cursor, walk, n))
    }

    /// Linear filtered search in windows of `batch` rows.
    ///
    /// Ordering per direction matches [`query`](Self::query).
    #[allow(clippy::too_many_arguments)]
    pub fn search(
        &self,
        talker: &str,
        anchor_time: i64,
        count: usize,
        direction: Direction,
        filter: &MessageFilter,
        extractor: &dyn ContentExtractor,
        batch: usize,
    ) -> Result<Vec<MessageRecord>> {
        around(anchor_time, count, direction, |cursor, walk, n| {
            self.scan_filtered(talker, cursor, walk, n, filter, extractor, batch)
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn scan_filtered(
        &self,
        talker: &str,
        mut cursor: Cursor,
        walk: Walk,
        count: usize,
        filter: &MessageFilter,
        extractor: &dyn ContentExtractor,
        batch: usize,
    ) -> Result<Vec<MessageRecord>> {
        let batch = batch.max(1);
        let mut found = Vec::new();
        while found.len() < count {
            let window = self.walk(talker, cursor, walk, batch)?;
            let Some(last) = window.last() else {
                break;
            };
            cursor = last.cursor();
            let exhausted = window.len() < batch;
            found.extend(window.into_iter().filter(|r| filter.matches(r, extractor)));
            if exhausted {
                break;
            }
        }
        found.truncate(count);
        Ok(found)
    }

    /// Days with messages for `talker`, ascending, across all shards.
    pub fn message_dates(&self, talker: &str) -> Result<Vec<String>> {
        let mut days = BTreeSet::new();
        for shard in &self.shards {
            days.extend(shard.message_dates(talker)?);
        }
        Ok(days.into_iter().collect())
    }
}

/// Runs `fetch` on one or both sides of `anchor_time` and lays the rows out
/// newest first. `fetch` returns rows nearest the cursor first.
fn around<F>(anchor_time: i64, count: usize, direction: Direction, mut fetch: F) -> Result<Vec<MessageRecord>>
where
    F: FnMut(Cursor, Walk, usize) -> Result<Vec<MessageRecord>>,
{
    match direction {
        Direction::Forward => fetch(Cursor::at_or_before(anchor_time), Walk::Older, count),
        Direction::Backward => {
            let mut newer = fetch(Cursor::after(anchor_time), Walk::Newer, count)?;
            newer.reverse();
            Ok(newer)
        }
        Direction::Both => {
            let half = count / 2;
            let mut rows = fetch(Cursor::after(anchor_time), Walk::Newer, half)?;
            rows.reverse();
            rows.extend(fetch(Cursor::at_or_before(anchor_time), Walk::Older, half)?);
            Ok(rows)
        }
    }
}
