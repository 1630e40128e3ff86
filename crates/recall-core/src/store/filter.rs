use super::message::*;

/// Pulls displayable text out of a record. Structured payloads (XML,
/// compressed content, extension bytes) are decoded by implementors.
pub trait ContentExtractor: Send + Sync {
    fn searchable_text(&self, record: &MessageRecord) -> Option<String>;

    /// Sender inside a group conversation, when known.
    fn sender(&self, _record: &MessageRecord) -> Option<String> {
        None
    }
}

/// Plain text and quoted replies only.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextExtractor;

impl ContentExtractor for PlainTextExtractor {
    fn searchable_text(&self, record: &MessageRecord) -> Option<String> {
        match (record.msg_type, record.sub_type) {
            (MSG_TEXT, _) | (MSG_MISC, MISC_REFER) => Some(record.content.clone()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FilterCategory {
    #[default]
    All,
    File,
    Media,
    Link,
    Voice,
    Call,
    /// Messages sent by one group member.
    Member(String),
}

impl FilterCategory {
    pub fn as_str(&self) -> &str {
        match self {
            Self::All => "all",
            Self::File => "file",
            Self::Media => "media",
            Self::Link => "link",
            Self::Voice => "voice",
            Self::Call => "call",
            Self::Member(name) => name,
        }
    }
}

impl std::str::FromStr for FilterCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(name) = s.strip_prefix("member:") {
            return Ok(Self::Member(name.to_string()));
        }
        match s.to_ascii_lowercase().as_str() {
            "" | "all" => Ok(Self::All),
            "file" => Ok(Self::File),
            "media" => Ok(Self::Media),
            "link" => Ok(Self::Link),
            "voice" => Ok(Self::Voice),
            "call" => Ok(Self::Call),
            other => Err(format!("unknown category: {other}")),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    pub keyword: Option<String>,
    pub category: FilterCategory,
}

impl MessageFilter {
    pub fn keyword(word: impl Into<String>) -> Self {
        Self {
            keyword: Some(word.into()),
            category: FilterCategory::All,
        }
    }

    pub fn category(category: FilterCategory) -> Self {
        Self {
            keyword: None,
            category,
        }
    }

    pub fn matches(&self, record: &MessageRecord, extractor: &dyn ContentExtractor) -> bool {
        let kind_ok = match &self.category {
            FilterCategory::All => true,
            FilterCategory::File => record.msg_type == MSG_MISC && record.sub_type == MISC_FILE,
            FilterCategory::Media => record.msg_type == MSG_PICTURE || record.msg_type == MSG_VIDEO,
            FilterCategory::Link => {
                record.msg_type == MSG_MISC
                    && (record.sub_type == MISC_CARD_LINK || record.sub_type == MISC_THIRD_VIDEO)
            }
            FilterCategory::Voice => record.msg_type == MSG_VOICE,
            FilterCategory::Call => record.msg_type == MSG_VOIP,
            FilterCategory::Member(name) => extractor.sender(record).as_deref() == Some(name.as_str()),
        };
        if !kind_ok {
            return false;
        }
        match self.keyword.as_deref() {
            None | Some("") => true,
            Some(word) => extractor
                .searchable_text(record)
                .map(|text| text.contains(word))
                .unwrap_or(false),
        }
    }
}
