use crate::error::Result;

/// Converts the client's voice codec stream into a playable file.
pub trait VoiceTranscoder: Send + Sync {
    fn transcode(&self, voice: &[u8], sample_rate: u32) -> Result<Vec<u8>>;

    /// File extension of the output.
    fn extension(&self) -> &'static str {
        "mp3"
    }
}

/// Keeps the original codec bytes when no real transcoder is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawVoice;

impl VoiceTranscoder for RawVoice {
    fn transcode(&self, voice: &[u8], _sample_rate: u32) -> Result<Vec<u8>> {
        Ok(voice.to_vec())
    }

    fn extension(&self) -> &'static str {
        "silk"
    }
}
