//! Animated GIF decoding on a background thread.

use std::fs::File;
use std::path::Path;
use std::time::Duration;

use super::types::{AudioPacket, Frame, FrameTiming};
use super::worker::{DecodeSink, DecodeThread};
use super::{AdapterError, DecoderAdapter};

/// GIF delays below this are treated as this (browsers do the same).
const MIN_DELAY_MS: u32 = 20;

/// Largest canvas the decoder will allocate.
const MAX_CANVAS_BYTES: usize = 256 * 1024 * 1024;

pub const ERR_OPEN: i32 = 1;
pub const ERR_DECODE: i32 = 2;
pub const ERR_TOO_LARGE: i32 = 3;

/// Progressive GIF decoder. Frames are composited onto a full-size RGBA
/// canvas and carry explicit display windows built from the frame delays.
pub struct GifAdapter {
    worker: DecodeThread,
}

impl GifAdapter {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path)
            .map_err(|e| anyhow::anyhow!("Failed to open GIF {}: {e}", path.display()))?;
        let worker = DecodeThread::spawn("framereel-gif", move |sink| decode_gif(file, &sink))?;
        Ok(Self { worker })
    }
}

impl DecoderAdapter for GifAdapter {
    fn is_ready(&self) -> bool {
        self.worker.is_ready()
    }

    fn has_video_stream(&self) -> bool {
        self.worker.has_video()
    }

    fn has_audio_stream(&self) -> bool {
        false
    }

    fn is_decoding(&self) -> bool {
        self.worker.is_decoding()
    }

    fn pull_video_frame(&mut self) -> Option<Frame> {
        self.worker.try_frame()
    }

    fn pull_audio_packet(&mut self) -> Option<AudioPacket> {
        None
    }

    fn poll_error(&mut self) -> Option<AdapterError> {
        self.worker.try_error()
    }

    fn stop(&mut self) {
        self.worker.stop();
    }
}

fn decode_gif(file: File, sink: &DecodeSink) {
    let mut options = gif::DecodeOptions::new();
    options.set_color_output(gif::ColorOutput::RGBA);
    let mut reader = match options.read_info(file) {
        Ok(r) => r,
        Err(e) => {
            sink.fail(AdapterError::new(ERR_OPEN, format!("Failed to decode GIF: {e}")));
            sink.mark_ready(false);
            return;
        }
    };

    let width = u32::from(reader.width());
    let height = u32::from(reader.height());
    let Some(canvas_len) = canvas_len(width, height) else {
        sink.fail(AdapterError::new(
            ERR_TOO_LARGE,
            format!("GIF screen {width}x{height} exceeds the canvas limit"),
        ));
        sink.mark_ready(false);
        return;
    };
    sink.mark_ready(width > 0 && height > 0);
    log::info!("GIF stream: {width}x{height}");

    // GIF frames can be partial updates
    let mut canvas = vec![0u8; canvas_len];
    let mut clock = Duration::ZERO;
    let mut frame_rate = None;
    let mut count = 0usize;

    loop {
        if sink.shutdown_requested() {
            return;
        }
        let frame = match reader.read_next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                sink.fail(AdapterError::new(ERR_DECODE, format!("GIF frame error: {e}")));
                return;
            }
        };

        // GIF delay is in centiseconds
        let delay_ms = (u32::from(frame.delay) * 10).max(MIN_DELAY_MS);
        // The first delay stands in for the declared rate GIF lacks.
        let rate = *frame_rate.get_or_insert(1000.0 / f64::from(delay_ms));

        composite(
            &mut canvas,
            width,
            height,
            FrameRect {
                left: u32::from(frame.left),
                top: u32::from(frame.top),
                width: u32::from(frame.width),
                height: u32::from(frame.height),
            },
            &frame.buffer,
        );

        let start = clock;
        clock += Duration::from_millis(u64::from(delay_ms));
        let decoded = Frame::from_rgba(
            width,
            height,
            canvas.clone(),
            FrameTiming::Span { start, end: clock },
            Some(rate),
        );
        if !sink.send_frame(decoded) {
            return;
        }
        count += 1;
    }

    log::info!("GIF decode finished: {count} frames, {}ms", clock.as_millis());
}

/// RGBA canvas size in bytes, `None` when it overflows or is over the limit.
fn canvas_len(width: u32, height: u32) -> Option<usize> {
    (width as usize)
        .checked_mul(height as usize)?
        .checked_mul(4)
        .filter(|&len| len <= MAX_CANVAS_BYTES)
}

#[derive(Debug, Clone, Copy)]
struct FrameRect {
    left: u32,
    top: u32,
    width: u32,
    height: u32,
}

/// Paint a (possibly partial) RGBA frame onto the canvas at its offset.
/// Fully transparent source pixels leave the canvas untouched.
fn composite(canvas: &mut [u8], width: u32, height: u32, rect: FrameRect, pixels: &[u8]) {
    let (width, height) = (width as usize, height as usize);
    let (left, top) = (rect.left as usize, rect.top as usize);
    let rect_width = rect.width as usize;
    for y in 0..rect.height as usize {
        for x in 0..rect_width {
            let src_idx = (y * rect_width + x) * 4;
            let dst_x = left + x;
            let dst_y = top + y;
            if dst_x >= width || dst_y >= height || src_idx + 4 > pixels.len() {
                continue;
            }
            let src = &pixels[src_idx..src_idx + 4];
            if src[3] > 0 {
                let dst_idx = (dst_y * width + dst_x) * 4;
                if let Some(dst) = canvas.get_mut(dst_idx..dst_idx + 4) {
                    dst.copy_from_slice(src);
                }
            }
        }
    }
}
