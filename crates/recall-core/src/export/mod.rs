//! Full-account export: decrypt every container, then pull attachments,
//! voice clips and avatars out next to the decrypted stores.
//!
//! Phases run one after another and own disjoint progress ranges:
//!
//! | phase        | progress |
//! |--------------|----------|
//! | databases    | 1..20    |
//! | attachments  | 21..60   |
//! | voice        | 61..80   |
//! | avatars      | 81..100  |

pub mod conversation;
pub mod phases;
pub mod pipeline;
pub mod progress;
pub mod transcode;

pub use conversation::{export_conversation, ConversationExport};
pub use pipeline::{run_phase, PhaseJob, PhaseReport, PoolConfig};
pub use progress::{EventStatus, PhaseRange, ProgressEvent, ProgressSink};
pub use transcode::{RawVoice, VoiceTranscoder};

use crate::cipher::PageCipher;
use crate::error::{RecallError, Result};
use crate::key::KeyMaterial;
use crate::settings::RecallSettings;
use phases::{AttachmentJob, AvatarJob, DatabaseJob, VoiceJob, FILE_STORAGE, HEAD_IMAGE_DIR, VOICE_DIR};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::{self, Handle};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

pub const DATABASES: PhaseRange = PhaseRange::new(1, 20);
pub const ATTACHMENTS: PhaseRange = PhaseRange::new(21, 60);
pub const VOICE: PhaseRange = PhaseRange::new(61, 80);
pub const AVATARS: PhaseRange = PhaseRange::new(81, 100);

const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone)]
pub struct ExportRequest {
    /// Client account directory (holds `Msg/` and `FileStorage/`).
    pub source_root: PathBuf,
    pub dest_root: PathBuf,
    pub key_hex: String,
}

pub struct ExportOrchestrator {
    settings: RecallSettings,
    transcoder: Arc<dyn VoiceTranscoder>,
}

impl ExportOrchestrator {
    pub fn new(settings: RecallSettings, transcoder: Arc<dyn VoiceTranscoder>) -> Self {
        Self {
            settings,
            transcoder,
        }
    }

    fn pool(&self, workers: usize) -> PoolConfig {
        PoolConfig {
            workers,
            queue_depth: self.settings.export.queue_depth,
            report_interval: self.settings.report_interval(),
        }
    }

    /// Starts the export in the background and returns the event stream.
    ///
    /// Inside a tokio runtime the export is spawned onto it; otherwise a
    /// dedicated thread drives its own runtime. The stream closes after a
    /// final `processing` event at 100, or after a single `error` event if
    /// a precondition fails.
    pub fn export_all(self, request: ExportRequest) -> mpsc::Receiver<ProgressEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(self.drive(request, tx));
            }
            Err(_) => {
                std::thread::spawn(move || match runtime::Builder::new_multi_thread().enable_all().build() {
                    Ok(rt) => rt.block_on(self.drive(request, tx)),
                    Err(e) => {
                        error!(error = %e, "export runtime failed to start");
                        let event = ProgressEvent {
                            status: EventStatus::Error,
                            result: format!("export runtime failed to start: {e}"),
                            progress: 0,
                        };
                        if tx.blocking_send(event).is_err() {
                            debug!("progress receiver dropped before the export started");
                        }
                    }
                });
            }
        }
        rx
    }

    async fn drive(self, request: ExportRequest, tx: mpsc::Sender<ProgressEvent>) {
        let sink = ProgressSink::new(tx);
        if let Err(e) = self.run(&request, &sink).await {
            error!(error = %e, "export aborted");
        }
    }

    /// Runs every phase, reporting into `sink`.
    pub async fn run(&self, request: &ExportRequest, sink: &ProgressSink) -> Result<Vec<PhaseReport>> {
        let (key, cipher) = match self.check_preconditions(request) {
            Ok(ready) => ready,
            Err(e) => {
                sink.error(e.to_string()).await;
                return Err(e);
            }
        };
        info!(
            source = %request.source_root.display(),
            dest = %request.dest_root.display(),
            "export started"
        );

        let export = &self.settings.export;
        let source_msg = request.source_root.join("Msg");
        let dest_msg = request.dest_root.join("Msg");
        let mut reports = Vec::with_capacity(4);

        let databases = Arc::new(DatabaseJob {
            source_msg,
            dest_msg,
            cipher,
            key,
        });
        reports.push(run_phase(databases, DATABASES, self.pool(export.db_workers), sink).await);

        let attachments = Arc::new(AttachmentJob {
            source_root: request.source_root.clone(),
            dest_root: request.dest_root.clone(),
        });
        reports.push(run_phase(attachments, ATTACHMENTS, self.pool(export.attachment_workers), sink).await);

        let voice = Arc::new(VoiceJob {
            dest_root: request.dest_root.clone(),
            transcoder: Arc::clone(&self.transcoder),
            sample_rate: export.voice_sample_rate,
        });
        reports.push(run_phase(voice, VOICE, self.pool(export.voice_workers), sink).await);

        let avatars = Arc::new(AvatarJob {
            dest_root: request.dest_root.clone(),
        });
        reports.push(run_phase(avatars, AVATARS, self.pool(export.avatar_workers), sink).await);

        sink.processing("export finished", 100).await;
        info!("export finished");
        Ok(reports)
    }

    fn check_preconditions(&self, request: &ExportRequest) -> Result<(KeyMaterial, PageCipher)> {
        if !request.source_root.is_dir() {
            return Err(RecallError::PhasePreconditionFailed(format!(
                "source root {} is not a directory",
                request.source_root.display()
            )));
        }
        let key = KeyMaterial::from_hex(&request.key_hex)
            .map_err(|e| RecallError::PhasePreconditionFailed(e.to_string()))?;
        let cipher = PageCipher::new(self.settings.cipher_params())
            .map_err(|e| RecallError::PhasePreconditionFailed(e.to_string()))?;

        let storage = request.dest_root.join(FILE_STORAGE);
        for dir in [
            request.dest_root.join("Msg"),
            storage.join(VOICE_DIR),
            storage.join(HEAD_IMAGE_DIR),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| {
                RecallError::PhasePreconditionFailed(format!("cannot create {}: {e}", dir.display()))
            })?;
        }
        Ok((key, cipher))
    }
}
