use crate::cipher::CipherParams;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CipherSettings {
    pub page_size: usize,
    pub kdf_iterations: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportSettings {
    pub db_workers: usize,
    pub attachment_workers: usize,
    pub voice_workers: usize,
    pub avatar_workers: usize,
    pub queue_depth: usize,
    pub report_interval_ms: u64,
    #[serde(default = "default_sample_rate")]
    pub voice_sample_rate: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerySettings {
    pub search_batch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallSettings {
    pub cipher: CipherSettings,
    pub export: ExportSettings,
    #[serde(default)]
    pub query: QuerySettings,
}

fn default_sample_rate() -> u32 {
    24_000
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            search_batch_size: 600,
        }
    }
}

impl Default for RecallSettings {
    fn default() -> Self {
        Self {
            cipher: CipherSettings {
                page_size: 4096,
                kdf_iterations: 64_000,
            },
            export: ExportSettings {
                db_workers: 19,
                attachment_workers: 29,
                voice_workers: 20,
                avatar_workers: 20,
                queue_depth: 100,
                report_interval_ms: 1000,
                voice_sample_rate: default_sample_rate(),
            },
            query: QuerySettings::default(),
        }
    }
}

impl RecallSettings {
    /// Missing file means defaults; a malformed one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    pub fn cipher_params(&self) -> CipherParams {
        CipherParams {
            page_size: self.cipher.page_size,
            kdf_iterations: self.cipher.kdf_iterations,
        }
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.export.report_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let s = RecallSettings::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(s.cipher.kdf_iterations, 64_000);
        assert_eq!(s.export.queue_depth, 100);
        assert_eq!(s.query.search_batch_size, 600);
    }

    #[test]
    fn save_then_load_keeps_overrides() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cfg").join("settings.json");
        let mut s = RecallSettings::default();
        s.export.db_workers = 3;
        s.cipher.kdf_iterations = 2;
        s.save(&path).unwrap();
        let loaded = RecallSettings::load(&path).unwrap();
        assert_eq!(loaded.export.db_workers, 3);
        assert_eq!(loaded.cipher_params().kdf_iterations, 2);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, b"{ not json").unwrap();
        assert!(RecallSettings::load(&path).is_err());
    }
}
