use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

use crossbeam_channel::Sender;

use super::error::PlaybackError;
use super::selector::SelectorState;
use super::store::Store;
use super::PlaybackEvent;

/// Stored in place of the nominal interval while it is unknown.
const UNKNOWN_INTERVAL: u64 = u64::MAX;

/// Everything the loader and presenter threads share for one playback.
///
/// Flags are plain atomics read with acquire ordering so each thread
/// always sees the latest value; the frame store carries its own ordering.
pub struct Session {
    active: AtomicBool,
    nominal_interval_ms: AtomicU64,
    discard_audio: AtomicBool,
    store: Store,
    selector_state: AtomicU8,
    rendered_frames: AtomicU64,
    events: Sender<PlaybackEvent>,
}

impl Session {
    pub fn new(block_capacity: usize, events: Sender<PlaybackEvent>) -> Self {
        Self {
            active: AtomicBool::new(false),
            nominal_interval_ms: AtomicU64::new(UNKNOWN_INTERVAL),
            discard_audio: AtomicBool::new(false),
            store: Store::new(block_capacity),
            selector_state: AtomicU8::new(SelectorState::AwaitingFirstFrame as u8),
            rendered_frames: AtomicU64::new(0),
            events,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn activate(&self) {
        self.active.store(true, Ordering::Release);
    }

    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Expected time between frames, `None` while unknown.
    pub fn nominal_interval(&self) -> Option<Duration> {
        match self.nominal_interval_ms.load(Ordering::Acquire) {
            UNKNOWN_INTERVAL => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn set_nominal_interval(&self, interval: Option<Duration>) {
        let ms = interval.map_or(UNKNOWN_INTERVAL, |d| {
            u64::try_from(d.as_millis()).unwrap_or(UNKNOWN_INTERVAL - 1)
        });
        self.nominal_interval_ms.store(ms, Ordering::Release);
    }

    pub fn discard_audio(&self) -> bool {
        self.discard_audio.load(Ordering::Acquire)
    }

    pub fn set_discard_audio(&self, discard: bool) {
        self.discard_audio.store(discard, Ordering::Release);
    }

    /// Presenter-side progress, mirrored here for observers.
    pub fn selector_state(&self) -> SelectorState {
        SelectorState::from_u8(self.selector_state.load(Ordering::Acquire))
    }

    pub fn rendered_frames(&self) -> u64 {
        self.rendered_frames.load(Ordering::Acquire)
    }

    pub(super) fn publish_progress(&self, state: SelectorState, rendered: u64) {
        self.selector_state.store(state as u8, Ordering::Release);
        self.rendered_frames.store(rendered, Ordering::Release);
    }

    pub(super) fn emit(&self, event: PlaybackEvent) {
        let _ = self.events.try_send(event);
    }

    /// Log a task failure once and queue it for the owner.
    pub(super) fn fail(&self, error: PlaybackError) -> PlaybackError {
        log::error!("{error}");
        self.emit(PlaybackEvent::Failed(error.clone()));
        error
    }
}
