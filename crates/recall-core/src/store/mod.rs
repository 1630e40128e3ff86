//! Read side over decrypted stores.

pub mod contacts;
pub mod filter;
pub mod message;
pub mod provider;
pub mod shard;
pub mod sharded;
pub mod userdata;

pub use contacts::{ContactBook, SessionEntry, UserInfo};
pub use filter::{ContentExtractor, FilterCategory, MessageFilter, PlainTextExtractor};
pub use message::{Cursor, Direction, MessageRecord};
pub use provider::{AccountInfo, MessageProvider};
pub use shard::MessageShard;
pub use sharded::ShardedMessageStore;
pub use userdata::{Bookmark, LastRead, UserData};

/// Closes `conn`, surfacing any error SQLite reports on the way out.
pub(crate) fn close_connection(conn: rusqlite::Connection) -> crate::error::Result<()> {
    conn.close().map_err(|(_, e)| crate::error::RecallError::from(e))
}
