//! The four export phases.

use super::pipeline::PhaseJob;
use super::transcode::VoiceTranscoder;
use crate::cipher::PageCipher;
use crate::error::{RecallError, Result};
use crate::imagedat;
use crate::key::KeyMaterial;
pub use crate::store::provider::{head_image_path, FILE_STORAGE, HEAD_IMAGE_DIR};
use rusqlite::{Connection, OpenFlags};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::Sender;
use tracing::debug;
use walkdir::WalkDir;

pub const XINFO_DB: &str = "xInfo.db";
pub const MSG_ATTACH: &str = "MsgAttach";
pub const COPIED_STORAGE: [&str; 3] = ["Video", "File", "Cache"];
pub const VOICE_DIR: &str = "Voice";

fn files_under<'a>(root: &'a Path, suffix: &'a str) -> impl Iterator<Item = PathBuf> + 'a {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(e) => {
                debug!(error = %e, "walk entry skipped");
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(move |p| p.to_string_lossy().ends_with(suffix))
}

/// Mirrors `path` from under `from` to under `to`.
fn mirror(path: &Path, from: &Path, to: &Path) -> PathBuf {
    match path.strip_prefix(from) {
        Ok(rel) => to.join(rel),
        Err(_) => to.join(path.file_name().unwrap_or_default()),
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

pub(crate) fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    ensure_parent(dst)?;
    let mut opts = fs_extra::file::CopyOptions::new();
    opts.overwrite = true;
    fs_extra::file::copy(src, dst, &opts)?;
    Ok(())
}

// ── Databases ───────────────────────────────────────────────────────────────

pub struct DatabaseJob {
    pub source_msg: PathBuf,
    pub dest_msg: PathBuf,
    pub cipher: PageCipher,
    pub key: KeyMaterial,
}

impl PhaseJob for DatabaseJob {
    type Item = (PathBuf, PathBuf);

    fn name(&self) -> &'static str {
        "databases"
    }

    fn total(&self) -> Result<u64> {
        Ok(files_under(&self.source_msg, ".db").count() as u64)
    }

    fn produce(&self, queue: &Sender<Self::Item>) -> Result<()> {
        for src in files_under(&self.source_msg, ".db") {
            let dst = mirror(&src, &self.source_msg, &self.dest_msg);
            if queue.blocking_send((src, dst)).is_err() {
                break;
            }
        }
        Ok(())
    }

    fn label(&self, item: &Self::Item) -> String {
        item.0.display().to_string()
    }

    fn process(&self, (src, dst): Self::Item) -> Result<()> {
        // stored in the clear
        if src.file_name().is_some_and(|n| n == XINFO_DB) {
            return copy_file(&src, &dst);
        }
        ensure_parent(&dst)?;
        self.cipher.decrypt_file(&src, &dst, &self.key)
    }
}

// ── Attachments ─────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum AttachmentTask {
    DecodeImage { src: PathBuf, dst: PathBuf },
    Copy { src: PathBuf, dst: PathBuf },
}

pub struct AttachmentJob {
    pub source_root: PathBuf,
    pub dest_root: PathBuf,
}

impl AttachmentJob {
    fn tasks(&self) -> impl Iterator<Item = AttachmentTask> + '_ {
        let storage = self.source_root.join(FILE_STORAGE);
        let images = files_under_owned(storage.join(MSG_ATTACH), ".dat").map(move |src| AttachmentTask::DecodeImage {
            dst: mirror(&src, &self.source_root, &self.dest_root),
            src,
        });
        let copies = COPIED_STORAGE.into_iter().flat_map(move |dir| {
            files_under_owned(storage.join(dir), "").map(move |src| AttachmentTask::Copy {
                dst: mirror(&src, &self.source_root, &self.dest_root),
                src,
            })
        });
        images.chain(copies)
    }
}

fn files_under_owned(root: PathBuf, suffix: &'static str) -> impl Iterator<Item = PathBuf> {
    let walked: Vec<PathBuf> = files_under(&root, suffix).collect();
    walked.into_iter()
}

impl PhaseJob for AttachmentJob {
    type Item = AttachmentTask;

    fn name(&self) -> &'static str {
        "attachments"
    }

    fn total(&self) -> Result<u64> {
        Ok(self.tasks().count() as u64)
    }

    fn produce(&self, queue: &Sender<Self::Item>) -> Result<()> {
        for task in self.tasks() {
            if queue.blocking_send(task).is_err() {
                break;
            }
        }
        Ok(())
    }

    fn label(&self, item: &Self::Item) -> String {
        match item {
            AttachmentTask::DecodeImage { src, .. } | AttachmentTask::Copy { src, .. } => {
                src.display().to_string()
            }
        }
    }

    fn process(&self, item: Self::Item) -> Result<()> {
        match item {
            AttachmentTask::DecodeImage { dst, .. } | AttachmentTask::Copy { dst, .. } if dst.exists() => Ok(()),
            AttachmentTask::DecodeImage { src, dst } => imagedat::decode_file(&src, &dst).map(|_| ()),
            AttachmentTask::Copy { src, dst } => copy_file(&src, &dst),
        }
    }
}

// ── Voice ───────────────────────────────────────────────────────────────────

pub struct VoiceClip {
    pub server_id: i64,
    pub data: Vec<u8>,
}

pub struct VoiceJob {
    pub dest_root: PathBuf,
    pub transcoder: std::sync::Arc<dyn VoiceTranscoder>,
    pub sample_rate: u32,
}

impl VoiceJob {
    /// `Msg/Multi/MediaMSG0.db`, `MediaMSG1.db`, ... in the export.
    fn media_dbs(&self) -> Vec<PathBuf> {
        let multi = self.dest_root.join("Msg").join("Multi");
        (0..)
            .map(|i| multi.join(format!("MediaMSG{i}.db")))
            .take_while(|p| p.exists())
            .collect()
    }

    fn voice_dir(&self) -> PathBuf {
        self.dest_root.join(FILE_STORAGE).join(VOICE_DIR)
    }
}

fn open_read_only(path: &Path) -> Result<Connection> {
    Ok(Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?)
}

impl PhaseJob for VoiceJob {
    type Item = VoiceClip;

    fn name(&self) -> &'static str {
        "voice"
    }

    fn total(&self) -> Result<u64> {
        let mut total = 0u64;
        for db in self.media_dbs() {
            let conn = open_read_only(&db)?;
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM Media", [], |r| r.get(0))?;
            total += n as u64;
        }
        Ok(total)
    }

    fn produce(&self, queue: &Sender<Self::Item>) -> Result<()> {
        for db in self.media_dbs() {
            let conn = open_read_only(&db)?;
            let mut stmt = conn.prepare("SELECT ifnull(Reserved0, 0), ifnull(Buf, x'') FROM Media")?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let clip = VoiceClip {
                    server_id: row.get(0)?,
                    data: row.get(1)?,
                };
                if queue.blocking_send(clip).is_err() {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    fn label(&self, item: &Self::Item) -> String {
        format!("voice {}", item.server_id)
    }

    fn process(&self, clip: Self::Item) -> Result<()> {
        let out = self
            .voice_dir()
            .join(format!("{}.{}", clip.server_id, self.transcoder.extension()));
        if out.exists() {
            return Ok(());
        }
        if clip.data.is_empty() {
            return Err(RecallError::Transcode("empty voice buffer".into()));
        }
        let audio = self.transcoder.transcode(&clip.data, self.sample_rate)?;
        fs::write(out, audio)?;
        Ok(())
    }
}

// ── Avatars ─────────────────────────────────────────────────────────────────

pub struct Avatar {
    pub user_name: String,
    pub image: Vec<u8>,
}

pub struct AvatarJob {
    pub dest_root: PathBuf,
}

impl AvatarJob {
    fn misc_db(&self) -> PathBuf {
        self.dest_root.join("Msg").join("Misc.db")
    }
}

impl PhaseJob for AvatarJob {
    type Item = Avatar;

    fn name(&self) -> &'static str {
        "avatars"
    }

    fn total(&self) -> Result<u64> {
        let db = self.misc_db();
        if !db.exists() {
            return Ok(0);
        }
        let n: i64 = open_read_only(&db)?.query_row("SELECT COUNT(*) FROM ContactHeadImg1", [], |r| r.get(0))?;
        Ok(n as u64)
    }

    fn produce(&self, queue: &Sender<Self::Item>) -> Result<()> {
        let db = self.misc_db();
        if !db.exists() {
            return Ok(());
        }
        let conn = open_read_only(&db)?;
        let mut stmt = conn.prepare("SELECT ifnull(usrName, ''), ifnull(smallHeadBuf, x'') FROM ContactHeadImg1")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let avatar = Avatar {
                user_name: row.get(0)?,
                image: row.get(1)?,
            };
            if queue.blocking_send(avatar).is_err() {
                break;
            }
        }
        Ok(())
    }

    fn label(&self, item: &Self::Item) -> String {
        format!("avatar {}", item.user_name)
    }

    fn process(&self, avatar: Self::Item) -> Result<()> {
        if avatar.user_name.is_empty() || avatar.image.is_empty() {
            return Ok(());
        }
        let out = self.dest_root.join(head_image_path(&avatar.user_name));
        if out.exists() {
            return Ok(());
        }
        fs::write(out, avatar.image)?;
        Ok(())
    }
}
