//! Playback clock: decides each presenter tick which buffered frame, if any,
//! replaces the one on screen.

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::store::{Block, FillState, Store};
use crate::media::types::Frame;

/// Where the selector is in the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SelectorState {
    /// Nothing shown yet; waiting for the first block to be finalized.
    AwaitingFirstFrame = 0,
    /// Frame 0 was shown early while the first block is still filling.
    PreRollDisplay = 1,
    /// Advancing through finalized blocks on the clock.
    Playing = 2,
    /// Caught up with the loader; holding the last frame until more arrive.
    Buffering = 3,
    /// The stream ended and its last frame has had its time. Terminal.
    Exhausted = 4,
}

impl SelectorState {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => SelectorState::PreRollDisplay,
            2 => SelectorState::Playing,
            3 => SelectorState::Buffering,
            4 => SelectorState::Exhausted,
            _ => SelectorState::AwaitingFirstFrame,
        }
    }
}

/// Result of one tick.
#[derive(Debug, Clone)]
pub enum Selection {
    /// Put this frame on screen.
    Show(Arc<Frame>),
    /// Keep whatever is on screen.
    NoChange,
}

impl Selection {
    pub fn frame(&self) -> Option<&Arc<Frame>> {
        match self {
            Selection::Show(frame) => Some(frame),
            Selection::NoChange => None,
        }
    }
}

/// Consumer position in the block chain.
struct Cursor {
    block: Arc<Block>,
    index: usize,
    /// Wall-clock instant playback of frame 0 began; frame end-times are
    /// measured from here.
    base: Instant,
}

/// Presenter-owned state machine. Reads the store, never mutates it.
pub struct Selector {
    state: SelectorState,
    cursor: Option<Cursor>,
    /// Frames in blocks the cursor has fully passed.
    completed_frames: u64,
    preroll_shown: bool,
}

impl Default for Selector {
    fn default() -> Self {
        Self::new()
    }
}

impl Selector {
    pub fn new() -> Self {
        Self {
            state: SelectorState::AwaitingFirstFrame,
            cursor: None,
            completed_frames: 0,
            preroll_shown: false,
        }
    }

    pub fn state(&self) -> SelectorState {
        self.state
    }

    /// Frames shown so far through normal playback.
    pub fn rendered_frames(&self) -> u64 {
        self.completed_frames + self.cursor.as_ref().map_or(0, |c| c.index as u64 + 1)
    }

    /// Pick the frame for `now`. `nominal_interval` is the stream's expected
    /// frame spacing, used only for timestamp-only frames.
    pub fn select(
        &mut self,
        store: &Store,
        nominal_interval: Option<Duration>,
        now: Instant,
    ) -> Selection {
        match self.state {
            SelectorState::Exhausted => Selection::NoChange,
            SelectorState::AwaitingFirstFrame | SelectorState::PreRollDisplay => {
                self.begin(store, now)
            }
            SelectorState::Playing | SelectorState::Buffering => {
                self.advance(store, nominal_interval, now)
            }
        }
    }

    fn begin(&mut self, store: &Store, now: Instant) -> Selection {
        let Some(head) = store.head() else {
            if store.is_complete() {
                log::info!("Stream ended before any frame was loaded");
                self.state = SelectorState::Exhausted;
            }
            return Selection::NoChange;
        };

        match head.fill_state() {
            FillState::Open(written) => {
                if written == 0 || self.preroll_shown {
                    return Selection::NoChange;
                }
                let Some(frame) = head.frame(0) else {
                    return Selection::NoChange;
                };
                log::debug!("Showing first frame while buffering");
                self.preroll_shown = true;
                self.state = SelectorState::PreRollDisplay;
                Selection::Show(frame)
            }
            FillState::Finalized(0) => {
                log::info!("Stream ended before any frame was loaded");
                self.state = SelectorState::Exhausted;
                Selection::NoChange
            }
            FillState::Finalized(_) => {
                self.cursor = Some(Cursor {
                    block: head.clone(),
                    index: 0,
                    base: now,
                });
                self.completed_frames = 0;
                self.state = SelectorState::Playing;
                log::debug!("Playback started at first frame of first block");
                if self.preroll_shown {
                    // Frame 0 is already on screen from the pre-roll.
                    return Selection::NoChange;
                }
                head.frame(0).map_or(Selection::NoChange, Selection::Show)
            }
        }
    }

    fn advance(
        &mut self,
        store: &Store,
        nominal_interval: Option<Duration>,
        now: Instant,
    ) -> Selection {
        let Some(cursor) = self.cursor.as_mut() else {
            return Selection::NoChange;
        };
        let Some(current) = cursor.block.frame(cursor.index) else {
            return Selection::NoChange;
        };

        let elapsed = now.saturating_duration_since(cursor.base);
        match current.timing.end(nominal_interval) {
            // No interval for a timestamp-only frame: it holds forever.
            None => return Selection::NoChange,
            Some(end) if elapsed < end => return Selection::NoChange,
            Some(_) => {}
        }

        let next_index = cursor.index + 1;
        if next_index < cursor.block.len() {
            cursor.index = next_index;
            self.state = SelectorState::Playing;
            return cursor
                .block
                .frame(next_index)
                .map_or(Selection::NoChange, Selection::Show);
        }

        // End of block: move to the next finalized block that has frames.
        let passed = cursor.block.len() as u64;
        let mut tail = cursor.block.clone();
        loop {
            let Some(block) = tail.next().cloned() else {
                // Re-check the link after seeing completion; it may have
                // been set just before the store was marked complete.
                if store.is_complete() && tail.next().is_none() {
                    log::info!("Playback reached end of stream");
                    self.state = SelectorState::Exhausted;
                } else {
                    self.state = SelectorState::Buffering;
                }
                return Selection::NoChange;
            };

            match block.fill_state() {
                FillState::Open(_) => {
                    self.state = SelectorState::Buffering;
                    return Selection::NoChange;
                }
                // Empty trailing block left by a stream that ended on a
                // block boundary.
                FillState::Finalized(0) => tail = block,
                FillState::Finalized(_) => {
                    let Some(frame) = block.frame(0) else {
                        return Selection::NoChange;
                    };
                    cursor.block = block;
                    cursor.index = 0;
                    self.completed_frames += passed;
                    self.state = SelectorState::Playing;
                    log::debug!("Rendered frames: {}", self.completed_frames);
                    return Selection::Show(frame);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::types::FrameTiming;
    use crate::playback::testing::{frame_id, span_frame, test_frame};

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn shown(selection: &Selection) -> Option<u8> {
        selection.frame().map(|f| frame_id(f))
    }

    #[test]
    fn empty_store_is_no_change() {
        let store = Store::new(4);
        let mut sel = Selector::new();
        assert!(shown(&sel.select(&store, None, Instant::now())).is_none());
        assert_eq!(sel.state(), SelectorState::AwaitingFirstFrame);
    }

    #[test]
    fn preroll_shows_frame_zero_once() {
        let store = Store::new(4);
        let mut writer = store.writer().unwrap();
        writer.append(test_frame(0, 30.0));
        writer.append(test_frame(1, 30.0));

        let mut sel = Selector::new();
        let t0 = Instant::now();
        assert_eq!(shown(&sel.select(&store, None, t0)), Some(0));
        assert_eq!(sel.state(), SelectorState::PreRollDisplay);
        for i in 1..5 {
            assert!(shown(&sel.select(&store, None, t0 + ms(i * 100))).is_none());
        }
        assert_eq!(sel.state(), SelectorState::PreRollDisplay);
    }

    #[test]
    fn preroll_then_playing_does_not_repeat_frame_zero() {
        let store = Store::new(4);
        let mut writer = store.writer().unwrap();
        writer.append(span_frame(0, 0, 10));
        let mut sel = Selector::new();
        let t0 = Instant::now();
        assert_eq!(shown(&sel.select(&store, None, t0)), Some(0));

        writer.append(span_frame(1, 10, 20));
        writer.finish();
        assert!(shown(&sel.select(&store, None, t0)).is_none());
        assert_eq!(sel.state(), SelectorState::Playing);
        assert_eq!(shown(&sel.select(&store, None, t0 + ms(10))), Some(1));
    }

    #[test]
    fn finalized_first_block_starts_playing() {
        let store = Store::new(4);
        let mut writer = store.writer().unwrap();
        writer.append(span_frame(0, 0, 33));
        writer.finish();

        let mut sel = Selector::new();
        assert_eq!(shown(&sel.select(&store, None, Instant::now())), Some(0));
        assert_eq!(sel.state(), SelectorState::Playing);
        assert_eq!(sel.rendered_frames(), 1);
    }

    #[test]
    fn advances_once_per_end_time_crossing() {
        let store = Store::new(8);
        let mut writer = store.writer().unwrap();
        writer.append(span_frame(0, 0, 30));
        writer.append(span_frame(1, 30, 60));
        writer.append(span_frame(2, 60, 90));
        writer.finish();

        let mut sel = Selector::new();
        let t0 = Instant::now();
        let mut events = Vec::new();
        for step in 0..=120u64 {
            if let Some(id) = shown(&sel.select(&store, None, t0 + ms(step))) {
                events.push((step, id));
            }
        }
        assert_eq!(events, vec![(0, 0), (30, 1), (60, 2)]);
        assert_eq!(sel.state(), SelectorState::Exhausted);
        assert_eq!(sel.rendered_frames(), 3);
    }

    #[test]
    fn late_ticks_advance_one_frame_at_a_time() {
        let store = Store::new(8);
        let mut writer = store.writer().unwrap();
        for i in 0..4u8 {
            let start = u64::from(i) * 10;
            writer.append(span_frame(i, start, start + 10));
        }
        writer.finish();

        let mut sel = Selector::new();
        let t0 = Instant::now();
        sel.select(&store, None, t0);
        let late = t0 + ms(1000);
        assert_eq!(shown(&sel.select(&store, None, late)), Some(1));
        assert_eq!(shown(&sel.select(&store, None, late)), Some(2));
        assert_eq!(shown(&sel.select(&store, None, late)), Some(3));
        assert!(shown(&sel.select(&store, None, late)).is_none());
    }

    #[test]
    fn buffers_at_end_of_block_until_successor_finalized() {
        let store = Store::new(2);
        let mut writer = store.writer().unwrap();
        writer.append(span_frame(0, 0, 10));
        writer.append(span_frame(1, 10, 20));
        writer.ensure_open_block();
        writer.append(span_frame(2, 20, 30));

        let mut sel = Selector::new();
        let t0 = Instant::now();
        assert_eq!(shown(&sel.select(&store, None, t0)), Some(0));
        assert_eq!(shown(&sel.select(&store, None, t0 + ms(10))), Some(1));
        // Successor exists but is still open.
        assert!(shown(&sel.select(&store, None, t0 + ms(25))).is_none());
        assert_eq!(sel.state(), SelectorState::Buffering);

        writer.finish();
        assert_eq!(shown(&sel.select(&store, None, t0 + ms(26))), Some(2));
        assert_eq!(sel.state(), SelectorState::Playing);
        assert_eq!(sel.rendered_frames(), 3);
    }

    #[test]
    fn buffering_without_successor_until_store_complete() {
        let store = Store::new(2);
        let mut writer = store.writer().unwrap();
        writer.append(span_frame(0, 0, 10));
        writer.append(span_frame(1, 10, 20));
        // The loader finalizes a full block only when it needs the next one.
        writer.ensure_open_block();

        let mut sel = Selector::new();
        let t0 = Instant::now();
        sel.select(&store, None, t0);
        sel.select(&store, None, t0 + ms(10));
        assert!(shown(&sel.select(&store, None, t0 + ms(50))).is_none());
        assert_eq!(sel.state(), SelectorState::Buffering);

        writer.finish();
        // The trailing block is empty; nothing more will come.
        assert!(shown(&sel.select(&store, None, t0 + ms(60))).is_none());
        assert_eq!(sel.state(), SelectorState::Exhausted);
        assert!(shown(&sel.select(&store, None, t0 + ms(70))).is_none());
    }

    #[test]
    fn timestamp_frames_use_nominal_interval() {
        let store = Store::new(4);
        let mut writer = store.writer().unwrap();
        for i in 0..3u8 {
            let mut frame = test_frame(i, 25.0);
            frame.timing = FrameTiming::Timestamp {
                pts: ms(u64::from(i) * 40),
            };
            writer.append(frame);
        }
        writer.finish();

        let mut sel = Selector::new();
        let t0 = Instant::now();
        let interval = Some(ms(40));
        assert_eq!(shown(&sel.select(&store, interval, t0)), Some(0));
        assert!(shown(&sel.select(&store, interval, t0 + ms(39))).is_none());
        assert_eq!(shown(&sel.select(&store, interval, t0 + ms(40))), Some(1));
    }

    #[test]
    fn unknown_interval_holds_timestamp_frame() {
        let store = Store::new(4);
        let mut writer = store.writer().unwrap();
        for i in 0..2u8 {
            let mut frame = test_frame(i, 0.0);
            frame.timing = FrameTiming::Timestamp { pts: ms(u64::from(i)) };
            writer.append(frame);
        }
        writer.finish();

        let mut sel = Selector::new();
        let t0 = Instant::now();
        assert_eq!(shown(&sel.select(&store, None, t0)), Some(0));
        assert!(shown(&sel.select(&store, None, t0 + ms(60_000))).is_none());
        assert_eq!(sel.state(), SelectorState::Playing);
    }

    #[test]
    fn empty_finalized_stream_is_exhausted() {
        let store = Store::new(4);
        let mut writer = store.writer().unwrap();
        writer.ensure_open_block();
        writer.finish();

        let mut sel = Selector::new();
        assert!(shown(&sel.select(&store, None, Instant::now())).is_none());
        assert_eq!(sel.state(), SelectorState::Exhausted);
    }

    #[test]
    fn frames_never_go_backwards() {
        let store = Store::new(3);
        let mut writer = store.writer().unwrap();
        for i in 0..10u8 {
            let start = u64::from(i) * 5;
            writer.append(span_frame(i, start, start + 5));
        }
        writer.finish();

        let mut sel = Selector::new();
        let t0 = Instant::now();
        let mut last = None;
        for step in 0..200u64 {
            if let Some(id) = shown(&sel.select(&store, None, t0 + ms(step))) {
                if let Some(prev) = last {
                    assert_eq!(id, prev + 1);
                }
                last = Some(id);
            }
        }
        assert_eq!(last, Some(9));
        assert_eq!(sel.rendered_frames(), 10);
    }

    #[test]
    fn state_round_trips_through_u8() {
        for state in [
            SelectorState::AwaitingFirstFrame,
            SelectorState::PreRollDisplay,
            SelectorState::Playing,
            SelectorState::Buffering,
            SelectorState::Exhausted,
        ] {
            assert_eq!(SelectorState::from_u8(state as u8), state);
        }
    }
}
