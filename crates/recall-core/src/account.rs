//! Where a logged-in client keeps its account, worked out from the files
//! it holds open.
//!
//! The client keeps `<data>\<account>\Msg\Media.db` open for the whole
//! session, so one open-file path names both the account directory and
//! the account id.

use serde::Serialize;
use std::path::PathBuf;

pub const MEDIA_DB: &str = "Media.db";
const MSG_DIR: &str = "Msg";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountLocation {
    /// Directory holding `Msg/` and `FileStorage/`.
    pub account_dir: PathBuf,
    pub account_name: String,
}

impl AccountLocation {
    /// Container the key is checked against.
    pub fn media_db(&self) -> PathBuf {
        self.account_dir.join(MSG_DIR).join(MEDIA_DB)
    }
}

/// One running, logged-in client.
#[derive(Debug, Clone, Serialize)]
pub struct ClientInstance {
    pub pid: u32,
    pub pointer_width: &'static str,
    #[serde(flatten)]
    pub location: AccountLocation,
    /// File version of the core module, `major.minor.build.revision`.
    pub version: String,
    pub module_base: u64,
    pub module_size: u32,
}

fn strip_verbatim(path: &str) -> &str {
    ["\\\\?\\", "\\??\\"]
        .iter()
        .find_map(|prefix| path.strip_prefix(prefix))
        .unwrap_or(path)
}

/// Account location from the path of an open `...\<account>\Msg\Media.db`.
///
/// `None` for any other file, and for paths too short to hold an account.
pub fn account_from_media_path(path: &str) -> Option<AccountLocation> {
    let path = strip_verbatim(path);
    let parts: Vec<&str> = path.split('\\').collect();
    if parts.len() < 4 {
        return None;
    }
    let n = parts.len();
    if !parts[n - 1].eq_ignore_ascii_case(MEDIA_DB) || !parts[n - 2].eq_ignore_ascii_case(MSG_DIR) {
        return None;
    }
    let account_name = parts[n - 3];
    if account_name.is_empty() {
        return None;
    }
    Some(AccountLocation {
        account_dir: PathBuf::from(parts[..n - 2].join("\\")),
        account_name: account_name.to_string(),
    })
}

/// First account found among a process's open file paths.
pub fn account_from_open_files<I, S>(paths: I) -> Option<AccountLocation>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    paths.into_iter().find_map(|p| account_from_media_path(p.as_ref()))
}

/// Formats a fixed file version from its two version dwords.
pub fn format_file_version(ms: u32, ls: u32) -> String {
    format!("{}.{}.{}.{}", ms >> 16, ms & 0xffff, ls >> 16, ls & 0xffff)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_path_yields_account() {
        let loc = account_from_media_path(r"\\?\C:\Users\ann\Documents\WeChat Files\wxid_abc123\Msg\Media.db").unwrap();
        assert_eq!(loc.account_name, "wxid_abc123");
        assert_eq!(
            loc.account_dir,
            PathBuf::from(r"C:\Users\ann\Documents\WeChat Files\wxid_abc123")
        );
    }

    #[test]
    fn other_files_and_short_paths_are_ignored() {
        assert!(account_from_media_path(r"C:\data\wxid_abc\Msg\MicroMsg.db").is_none());
        assert!(account_from_media_path(r"C:\data\wxid_abc\Media.db").is_none());
        assert!(account_from_media_path(r"Msg\Media.db").is_none());
        assert!(account_from_media_path(r"C:\\Msg\Media.db").is_none());
    }

    #[test]
    fn first_matching_open_file_wins() {
        let open = [
            r"C:\Windows\System32\en-US\kernel32.dll.mui",
            r"\\?\D:\chat\wxid_one\Msg\Multi\MSG0.db",
            r"\\?\D:\chat\wxid_one\Msg\Media.db",
            r"\\?\D:\chat\wxid_two\Msg\Media.db",
        ];
        let loc = account_from_open_files(open).unwrap();
        assert_eq!(loc.account_name, "wxid_one");
        assert!(account_from_open_files(Vec::<String>::new()).is_none());
    }

    #[test]
    fn file_version_uses_full_words() {
        assert_eq!(format_file_version(0x0003_0009, 0x000c_0033), "3.9.12.51");
        assert_eq!(format_file_version(0x0003_0009, 0x0008_0119), "3.9.8.281");
    }
}
