/// Failures a playback session can report. A task that hits one of these
/// logs it, queues it as a [`super::PlaybackEvent::Failed`] and terminates;
/// nothing is thrown across threads.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaybackError {
    /// Missing or unusable source path. Reported by `start`; nothing is spawned.
    #[error("invalid input: {0}")]
    Input(String),
    /// The decoder could not be created, never became ready, or has no video.
    #[error("decoder initialisation failed: {0}")]
    AdapterInit(String),
    /// Mid-stream decode failure. Frames already buffered still play.
    #[error("decode error: {0}")]
    Decode(String),
    /// The stream's frame rate is zero or unavailable.
    #[error("stream frame rate could not be determined")]
    UnknownFrameRate,
    #[error("failed to create presentation surface: {0}")]
    SurfaceCreation(String),
    #[error("failed to spawn {0} thread: {1}")]
    TaskSpawn(&'static str, String),
}
