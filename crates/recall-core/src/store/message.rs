use rusqlite::Row;
use serde::Serialize;

pub const MSG_TEXT: i64 = 1;
pub const MSG_PICTURE: i64 = 3;
pub const MSG_VOICE: i64 = 34;
pub const MSG_VISIT_CARD: i64 = 42;
pub const MSG_VIDEO: i64 = 43;
pub const MSG_EMOJI: i64 = 47;
pub const MSG_LOCATION: i64 = 48;
pub const MSG_MISC: i64 = 49;
pub const MSG_VOIP: i64 = 50;
pub const MSG_SYSTEM: i64 = 10000;

// sub types of MSG_MISC
pub const MISC_CARD_LINK: i64 = 5;
pub const MISC_THIRD_VIDEO: i64 = 4;
pub const MISC_FILE: i64 = 6;
pub const MISC_REFER: i64 = 57;

pub(crate) const RECORD_COLUMNS: &str = "localId, MsgSvrID, Type, SubType, IsSender, CreateTime, \
     Sequence, ifnull(StrTalker, ''), ifnull(StrContent, ''), CompressContent, BytesExtra";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Toward older history.
    Forward,
    /// Toward newer history.
    Backward,
    Both,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Backward => "backward",
            Self::Both => "both",
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "forward" => Ok(Self::Forward),
            "backward" => Ok(Self::Backward),
            "both" => Ok(Self::Both),
            other => Err(format!("unknown direction: {other}")),
        }
    }
}

/// Exclusive position in `(CreateTime, Sequence)` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cursor {
    pub create_time: i64,
    pub sequence: i64,
}

impl Cursor {
    /// Everything at or before `time` lies below this cursor.
    pub fn at_or_before(time: i64) -> Self {
        Self {
            create_time: time.saturating_add(1),
            sequence: i64::MIN,
        }
    }

    /// Everything strictly after `time` lies above this cursor.
    pub fn after(time: i64) -> Self {
        Self {
            create_time: time,
            sequence: i64::MAX,
        }
    }

    pub fn of(record: &MessageRecord) -> Self {
        Self {
            create_time: record.create_time,
            sequence: record.sequence,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageRecord {
    pub local_id: i64,
    pub server_id: i64,
    pub msg_type: i64,
    pub sub_type: i64,
    pub is_sender: bool,
    pub create_time: i64,
    pub sequence: i64,
    pub talker: String,
    pub content: String,
    #[serde(skip)]
    pub compress_content: Option<Vec<u8>>,
    #[serde(skip)]
    pub bytes_extra: Option<Vec<u8>>,
}

impl MessageRecord {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            local_id: row.get(0)?,
            server_id: row.get::<_, Option<i64>>(1)?.unwrap_or_default(),
            msg_type: row.get(2)?,
            sub_type: row.get::<_, Option<i64>>(3)?.unwrap_or_default(),
            is_sender: row.get::<_, Option<i64>>(4)?.unwrap_or_default() == 1,
            create_time: row.get(5)?,
            sequence: row.get::<_, Option<i64>>(6)?.unwrap_or_default(),
            talker: row.get(7)?,
            content: row.get(8)?,
            compress_content: row.get(9)?,
            bytes_extra: row.get(10)?,
        })
    }

    pub fn cursor(&self) -> Cursor {
        Cursor::of(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_bounds_are_exact() {
        let below = Cursor::at_or_before(100);
        let at = Cursor { create_time: 100, sequence: 5 };
        let next = Cursor { create_time: 101, sequence: 0 };
        assert!(at < below);
        assert!(next > below);

        let above = Cursor::after(100);
        assert!(at < above);
        assert!(next > above);
    }

    #[test]
    fn direction_parses() {
        assert_eq!("Both".parse::<Direction>().unwrap(), Direction::Both);
        assert!("sideways".parse::<Direction>().is_err());
    }
}
