//! Scripted decoder and recording surface shared by the playback tests.

use std::cell::Cell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::media::types::{AudioPacket, Frame, FrameTiming, PixelFormat};
use crate::media::{AdapterError, DecoderAdapter};
use crate::surface::{PresentationSurface, SurfaceFactory};

/// 2x2 I420 frame whose first luma byte is `id`, timed as frame `id` of a
/// stream at `fps`.
pub fn test_frame(id: u8, fps: f64) -> Frame {
    let interval = if fps > 0.0 { 1000.0 / fps } else { 0.0 };
    let start = Duration::from_secs_f64(f64::from(id) * interval / 1000.0);
    let end = Duration::from_secs_f64((f64::from(id) + 1.0) * interval / 1000.0);
    let mut data = [16u8; 6];
    data[0] = id;
    let rate = (fps > 0.0).then_some(fps);
    Frame::from_i420(2, 2, &data, FrameTiming::Span { start, end }, rate).unwrap()
}

/// Frame `id` displayed over `[start_ms, end_ms)`.
pub fn span_frame(id: u8, start_ms: u64, end_ms: u64) -> Frame {
    let mut frame = test_frame(id, 30.0);
    frame.timing = FrameTiming::Span {
        start: Duration::from_millis(start_ms),
        end: Duration::from_millis(end_ms),
    };
    frame
}

pub fn frame_id(frame: &Frame) -> u8 {
    frame.planes[0].data[0]
}

/// Decoder that replays a fixed script.
pub struct ScriptedAdapter {
    frames: VecDeque<Frame>,
    ready_after: u32,
    ready_polls: Cell<u32>,
    has_video: bool,
    audio_packets: usize,
    error_after: Option<(usize, AdapterError)>,
    pulled: usize,
    stalled: bool,
    audio_pulled: Arc<AtomicUsize>,
    stopped: Arc<AtomicBool>,
}

impl ScriptedAdapter {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self {
            frames: frames.into(),
            ready_after: 0,
            ready_polls: Cell::new(0),
            has_video: true,
            audio_packets: 0,
            error_after: None,
            pulled: 0,
            stalled: false,
            audio_pulled: Arc::new(AtomicUsize::new(0)),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// `count` frames of a stream at `fps`.
    pub fn with_frames(count: u8, fps: f64) -> Self {
        Self::new((0..count).map(|i| test_frame(i, fps)).collect())
    }

    pub fn without_video(mut self) -> Self {
        self.has_video = false;
        self
    }

    pub fn with_audio(mut self, packets: usize) -> Self {
        self.audio_packets = packets;
        self
    }

    /// Report not-ready for the first `polls` readiness checks.
    pub fn ready_after(mut self, polls: u32) -> Self {
        self.ready_after = polls;
        self
    }

    /// Raise `error` once `frames` frames have been pulled.
    pub fn fail_after(mut self, frames: usize, error: AdapterError) -> Self {
        self.error_after = Some((frames, error));
        self
    }

    /// Never produce a frame and never finish.
    pub fn stalled(mut self) -> Self {
        self.stalled = true;
        self
    }

    pub fn audio_pulled(&self) -> Arc<AtomicUsize> {
        self.audio_pulled.clone()
    }

    pub fn stopped(&self) -> Arc<AtomicBool> {
        self.stopped.clone()
    }

    fn error_due(&self) -> bool {
        self.error_after
            .as_ref()
            .is_some_and(|(after, _)| self.pulled >= *after)
    }
}

impl DecoderAdapter for ScriptedAdapter {
    fn is_ready(&self) -> bool {
        let polls = self.ready_polls.get();
        self.ready_polls.set(polls + 1);
        polls >= self.ready_after
    }

    fn has_video_stream(&self) -> bool {
        self.has_video
    }

    fn has_audio_stream(&self) -> bool {
        self.audio_packets > 0
    }

    fn is_decoding(&self) -> bool {
        self.stalled || !self.frames.is_empty()
    }

    fn pull_video_frame(&mut self) -> Option<Frame> {
        if self.stalled || self.error_due() {
            return None;
        }
        let frame = self.frames.pop_front()?;
        self.pulled += 1;
        Some(frame)
    }

    fn pull_audio_packet(&mut self) -> Option<AudioPacket> {
        if self.audio_packets == 0 {
            return None;
        }
        self.audio_packets -= 1;
        self.audio_pulled.fetch_add(1, Ordering::Relaxed);
        Some(AudioPacket { data: vec![0; 4] })
    }

    fn poll_error(&mut self) -> Option<AdapterError> {
        if !self.error_due() {
            return None;
        }
        self.error_after.take().map(|(_, error)| error)
    }

    fn stop(&mut self) {
        self.stopped.store(true, Ordering::Release);
    }
}

/// Surface factory that records the id of every uploaded frame.
#[derive(Default, Clone)]
pub struct RecordingFactory {
    pub uploads: Arc<Mutex<Vec<u8>>>,
    pub created: Arc<AtomicUsize>,
    pub presented: Arc<AtomicUsize>,
    pub fail: bool,
}

impl RecordingFactory {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn uploaded(&self) -> Vec<u8> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::Acquire)
    }
}

impl SurfaceFactory for RecordingFactory {
    fn create_surface(
        &self,
        width: u32,
        height: u32,
        _format: PixelFormat,
    ) -> anyhow::Result<Box<dyn PresentationSurface>> {
        if self.fail {
            anyhow::bail!("no {width}x{height} surface available");
        }
        self.created.fetch_add(1, Ordering::AcqRel);
        Ok(Box::new(RecordingSurface {
            uploads: self.uploads.clone(),
            presented: self.presented.clone(),
            has_frame: false,
        }))
    }
}

pub struct RecordingSurface {
    uploads: Arc<Mutex<Vec<u8>>>,
    presented: Arc<AtomicUsize>,
    has_frame: bool,
}

impl PresentationSurface for RecordingSurface {
    fn upload_frame(&mut self, frame: &Frame) -> anyhow::Result<()> {
        self.uploads.lock().unwrap().push(frame_id(frame));
        self.has_frame = true;
        Ok(())
    }

    fn present(&mut self) {
        if self.has_frame {
            self.presented.fetch_add(1, Ordering::AcqRel);
        }
    }
}
