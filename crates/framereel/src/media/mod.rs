pub mod decoder;
pub mod types;
pub mod video;
mod worker;

pub use worker::ERR_PANICKED;

use std::path::Path;

use types::{AudioPacket, Frame};

/// Error reported by a decoder while it is running.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} (code {code})")]
pub struct AdapterError {
    pub code: i32,
    pub message: String,
}

impl AdapterError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Pull-based source of decoded frames.
///
/// Every method is non-blocking. `None` from a pull means "nothing yet,
/// poll again later"; the end of the stream is signalled by
/// [`is_decoding`](Self::is_decoding) turning false once everything has been
/// pulled.
pub trait DecoderAdapter: Send {
    /// Stream headers are parsed and the stream queries below are meaningful.
    fn is_ready(&self) -> bool;
    fn has_video_stream(&self) -> bool;
    fn has_audio_stream(&self) -> bool;
    /// True while frames remain to be pulled or may still be produced.
    fn is_decoding(&self) -> bool;
    fn pull_video_frame(&mut self) -> Option<Frame>;
    fn pull_audio_packet(&mut self) -> Option<AudioPacket>;
    fn poll_error(&mut self) -> Option<AdapterError>;
    /// Stop decoding and release decoder resources. Idempotent.
    fn stop(&mut self);
}

/// Open a decoder for `path`, chosen by file extension.
pub fn open_adapter(path: &Path) -> anyhow::Result<Box<dyn DecoderAdapter>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    if ext == "gif" {
        return Ok(Box::new(decoder::GifAdapter::open(path)?));
    }

    if !video::ffmpeg_available() {
        anyhow::bail!("ffmpeg/ffprobe not found on PATH; cannot decode {}", path.display());
    }
    Ok(Box::new(video::FfmpegAdapter::open(path)?))
}
