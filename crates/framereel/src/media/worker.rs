use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, SendTimeoutError, Sender};

use super::types::Frame;
use super::AdapterError;

/// Decoded frames buffered between a decode thread and its adapter.
const FRAME_QUEUE_DEPTH: usize = 8;
/// How long a blocked send waits before rechecking shutdown.
const SEND_RETRY: Duration = Duration::from_millis(50);

/// Reported when the decode thread unwinds.
pub const ERR_PANICKED: i32 = -1;

#[derive(Default)]
struct DecodeFlags {
    ready: AtomicBool,
    has_video: AtomicBool,
    finished: AtomicBool,
    shutdown: AtomicBool,
}

/// Producer half handed to the decode thread.
pub(super) struct DecodeSink {
    frames: Sender<Frame>,
    errors: Sender<AdapterError>,
    flags: Arc<DecodeFlags>,
}

impl DecodeSink {
    /// Stream headers are known. Must be called before the first frame.
    pub fn mark_ready(&self, has_video: bool) {
        self.flags.has_video.store(has_video, Ordering::Release);
        self.flags.ready.store(true, Ordering::Release);
    }

    pub fn shutdown_requested(&self) -> bool {
        self.flags.shutdown.load(Ordering::Acquire)
    }

    /// Queue a frame, blocking while the queue is full. Returns false once
    /// the adapter is shutting down and the thread should exit.
    pub fn send_frame(&self, mut frame: Frame) -> bool {
        loop {
            if self.shutdown_requested() {
                return false;
            }
            match self.frames.send_timeout(frame, SEND_RETRY) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(f)) => frame = f,
                Err(SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }

    pub fn fail(&self, error: AdapterError) {
        log::error!("Decode thread error: {error}");
        let _ = self.errors.try_send(error);
    }
}

impl Drop for DecodeSink {
    fn drop(&mut self) {
        // A panicking decode body must not look like a clean end of stream.
        if std::thread::panicking() {
            let _ = self.errors.try_send(AdapterError::new(
                ERR_PANICKED,
                "decode thread panicked",
            ));
        }
        // Also covers early returns before headers were read.
        self.flags.ready.store(true, Ordering::Release);
        self.flags.finished.store(true, Ordering::Release);
    }
}

/// Consumer half: owns the decode thread and exposes the non-blocking
/// queries every [`super::DecoderAdapter`] needs.
pub(super) struct DecodeThread {
    frames: Receiver<Frame>,
    errors: Receiver<AdapterError>,
    flags: Arc<DecodeFlags>,
    handle: Option<JoinHandle<()>>,
}

impl DecodeThread {
    pub fn spawn<F>(name: &str, body: F) -> anyhow::Result<Self>
    where
        F: FnOnce(DecodeSink) + Send + 'static,
    {
        let (frame_tx, frame_rx) = crossbeam_channel::bounded(FRAME_QUEUE_DEPTH);
        let (error_tx, error_rx) = crossbeam_channel::bounded(4);
        let flags = Arc::new(DecodeFlags::default());
        let sink = DecodeSink {
            frames: frame_tx,
            errors: error_tx,
            flags: flags.clone(),
        };

        let thread_name = name.to_string();
        let handle = std::thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                body(sink);
                log::debug!("{thread_name} exited");
            })
            .map_err(|e| anyhow::anyhow!("Failed to spawn {name} thread: {e}"))?;

        Ok(Self {
            frames: frame_rx,
            errors: error_rx,
            flags,
            handle: Some(handle),
        })
    }

    pub fn is_ready(&self) -> bool {
        self.flags.ready.load(Ordering::Acquire)
    }

    pub fn has_video(&self) -> bool {
        self.flags.has_video.load(Ordering::Acquire)
    }

    pub fn is_decoding(&self) -> bool {
        !self.flags.finished.load(Ordering::Acquire) || !self.frames.is_empty()
    }

    pub fn try_frame(&self) -> Option<Frame> {
        self.frames.try_recv().ok()
    }

    pub fn try_error(&self) -> Option<AdapterError> {
        self.errors.try_recv().ok()
    }

    /// Raise the shutdown flag without waiting.
    pub fn request_stop(&self) {
        self.flags.shutdown.store(true, Ordering::Release);
    }

    /// Raise the shutdown flag and join the thread. Idempotent.
    pub fn stop(&mut self) {
        self.request_stop();
        // Unblock a sender waiting on a full queue.
        while self.frames.try_recv().is_ok() {}
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Decode thread panicked");
            }
        }
    }
}

impl Drop for DecodeThread {
    fn drop(&mut self) {
        self.stop();
    }
}
