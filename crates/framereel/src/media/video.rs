//! Video decode via ffmpeg subprocess.
//!
//! - `ffprobe` probes metadata (dimensions, fps, audio presence) synchronously at open time
//! - `ffmpeg -f rawvideo -pix_fmt yuv420p -an` streams frames on stdout
//! - a reader thread cuts stdout into frames and queues them for the loader
//! - audio never leaves ffmpeg, so there are no audio packets to drain

use std::io::Read;
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::OnceLock;
use std::time::Duration;

use super::types::{AudioPacket, Frame, FrameTiming, PixelFormat};
use super::worker::{DecodeSink, DecodeThread};
use super::{AdapterError, DecoderAdapter};

pub const ERR_EMPTY: i32 = 10;
pub const ERR_TRUNCATED: i32 = 11;
pub const ERR_READ: i32 = 12;

/// Check if ffmpeg/ffprobe are available on the system. Cached per process.
pub fn ffmpeg_available() -> bool {
    static AVAILABLE: OnceLock<bool> = OnceLock::new();
    *AVAILABLE.get_or_init(|| {
        Command::new("ffprobe")
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    })
}

/// Video metadata from ffprobe.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoMeta {
    pub width: u32,
    pub height: u32,
    /// Declared frame rate; `None` when ffprobe reports 0/0 or nothing.
    pub fps: Option<f64>,
    pub has_audio: bool,
}

/// Probe video metadata using ffprobe.
pub fn probe_video(path: &Path) -> anyhow::Result<VideoMeta> {
    let output = Command::new("ffprobe")
        .args([
            "-v", "quiet",
            "-print_format", "json",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .map_err(|e| anyhow::anyhow!("ffprobe failed to execute: {e}"))?;

    if !output.status.success() {
        anyhow::bail!("ffprobe returned non-zero exit code");
    }

    parse_probe_output(&output.stdout)
}

fn parse_probe_output(stdout: &[u8]) -> anyhow::Result<VideoMeta> {
    let json: serde_json::Value = serde_json::from_slice(stdout)
        .map_err(|e| anyhow::anyhow!("Failed to parse ffprobe JSON: {e}"))?;

    let streams = json["streams"]
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("No streams in ffprobe output"))?;

    let video_stream = streams
        .iter()
        .find(|s| s["codec_type"].as_str() == Some("video"))
        .ok_or_else(|| anyhow::anyhow!("No video stream found"))?;
    let has_audio = streams
        .iter()
        .any(|s| s["codec_type"].as_str() == Some("audio"));

    let width = video_stream["width"]
        .as_u64()
        .ok_or_else(|| anyhow::anyhow!("Missing width"))? as u32;
    let height = video_stream["height"]
        .as_u64()
        .ok_or_else(|| anyhow::anyhow!("Missing height"))? as u32;

    let fps = video_stream["avg_frame_rate"]
        .as_str()
        .and_then(parse_frame_rate)
        .or_else(|| video_stream["r_frame_rate"].as_str().and_then(parse_frame_rate));

    Ok(VideoMeta {
        width,
        height,
        fps,
        has_audio,
    })
}

/// Parse "num/den" or a plain number. Zero or malformed rates are `None`.
fn parse_frame_rate(rate: &str) -> Option<f64> {
    let fps = if let Some((num, den)) = rate.split_once('/') {
        let n: f64 = num.trim().parse().ok()?;
        let d: f64 = den.trim().parse().ok()?;
        if d > 0.0 { n / d } else { return None }
    } else {
        rate.trim().parse().ok()?
    };
    (fps.is_finite() && fps > 0.0).then_some(fps)
}

/// Display window of frame `index` in a constant-rate stream.
fn frame_timing(index: u64, fps: Option<f64>) -> FrameTiming {
    match fps {
        Some(fps) => FrameTiming::Span {
            start: frame_boundary(index, fps),
            end: frame_boundary(index + 1, fps),
        },
        // Without a rate only ordering is known.
        None => FrameTiming::Timestamp {
            pts: Duration::from_millis(index),
        },
    }
}

fn frame_boundary(index: u64, fps: f64) -> Duration {
    Duration::from_nanos((index as f64 * 1e9 / fps).round() as u64)
}

/// Streams frames out of an `ffmpeg` child process.
pub struct FfmpegAdapter {
    meta: VideoMeta,
    child: Option<Child>,
    worker: DecodeThread,
}

impl FfmpegAdapter {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let meta = probe_video(path)?;
        log::info!(
            "Video stream: {}x{}, {} fps, audio: {}",
            meta.width,
            meta.height,
            meta.fps.map_or_else(|| "unknown".to_string(), |f| format!("{f:.3}")),
            meta.has_audio,
        );

        let mut child = Command::new("ffmpeg")
            .args(["-v", "quiet", "-i"])
            .arg(path)
            .args([
                "-an",
                "-f", "rawvideo",
                "-pix_fmt", "yuv420p",
                "pipe:1",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| anyhow::anyhow!("Failed to spawn ffmpeg: {e}"))?;

        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            anyhow::bail!("ffmpeg: no stdout pipe");
        };

        let stream = meta.clone();
        let worker = match DecodeThread::spawn("framereel-ffmpeg", move |sink| {
            read_frames(stdout, &stream, &sink);
        }) {
            Ok(w) => w,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
        };

        Ok(Self {
            meta,
            child: Some(child),
            worker,
        })
    }
}

fn read_frames(mut stdout: ChildStdout, meta: &VideoMeta, sink: &DecodeSink) {
    sink.mark_ready(meta.width > 0 && meta.height > 0);

    let frame_size = PixelFormat::I420.frame_size(meta.width, meta.height);
    let mut buf = vec![0u8; frame_size];
    let mut index: u64 = 0;

    loop {
        if sink.shutdown_requested() {
            return;
        }
        match read_frame(&mut stdout, &mut buf) {
            Ok(ReadResult::Frame) => {}
            Ok(ReadResult::Eof) => break,
            Ok(ReadResult::Partial(n)) => {
                sink.fail(AdapterError::new(
                    ERR_TRUNCATED,
                    format!("ffmpeg output ended mid-frame ({n} of {frame_size} bytes)"),
                ));
                return;
            }
            Err(e) => {
                if !sink.shutdown_requested() {
                    sink.fail(AdapterError::new(ERR_READ, format!("ffmpeg read failed: {e}")));
                }
                return;
            }
        }

        let timing = frame_timing(index, meta.fps);
        let frame = match Frame::from_i420(meta.width, meta.height, &buf, timing, meta.fps) {
            Ok(f) => f,
            Err(e) => {
                sink.fail(AdapterError::new(ERR_TRUNCATED, e));
                return;
            }
        };
        if !sink.send_frame(frame) {
            return;
        }
        index += 1;
    }

    if index == 0 {
        sink.fail(AdapterError::new(ERR_EMPTY, "ffmpeg decoded zero frames"));
        return;
    }
    log::info!("ffmpeg decode finished: {index} frames");
}

enum ReadResult {
    Frame,
    Eof,
    Partial(usize),
}

/// Fill `buf` completely, distinguishing a clean EOF from a short frame.
fn read_frame(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<ReadResult> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Ok(if filled == 0 {
                    ReadResult::Eof
                } else {
                    ReadResult::Partial(filled)
                });
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(ReadResult::Frame)
}

impl DecoderAdapter for FfmpegAdapter {
    fn is_ready(&self) -> bool {
        self.worker.is_ready()
    }

    fn has_video_stream(&self) -> bool {
        self.worker.has_video()
    }

    fn has_audio_stream(&self) -> bool {
        self.meta.has_audio
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
        self.worker.request_stop();
        // Killing the child closes stdout and unblocks the reader thread.
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        self.worker.stop();
    }
}

impl Drop for FfmpegAdapter {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_frame_rate_fraction_and_plain() {
        assert_eq!(parse_frame_rate("30/1"), Some(30.0));
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        let ntsc = parse_frame_rate("30000/1001").unwrap();
        assert!((ntsc - 29.97).abs() < 0.01);
    }

    #[test]
    fn parse_frame_rate_rejects_zero() {
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("0/1"), None);
        assert_eq!(parse_frame_rate("abc"), None);
    }

    #[test]
    fn probe_output_detects_streams() {
        let json = br#"{"streams":[
            {"codec_type":"video","width":640,"height":360,
             "avg_frame_rate":"0/0","r_frame_rate":"24/1"},
            {"codec_type":"audio"}
        ]}"#;
        let meta = parse_probe_output(json).unwrap();
        assert_eq!(meta.width, 640);
        assert_eq!(meta.height, 360);
        assert_eq!(meta.fps, Some(24.0));
        assert!(meta.has_audio);
    }

    #[test]
    fn probe_output_without_video_fails() {
        let json = br#"{"streams":[{"codec_type":"audio"}]}"#;
        assert!(parse_probe_output(json).is_err());
    }

    #[test]
    fn frame_timing_constant_rate() {
        assert_eq!(
            frame_timing(2, Some(25.0)),
            FrameTiming::Span {
                start: Duration::from_millis(80),
                end: Duration::from_millis(120)
            }
        );
        assert!(matches!(frame_timing(0, None), FrameTiming::Timestamp { .. }));
    }

    #[test]
    fn read_frame_reports_partial_and_eof() {
        let mut buf = [0u8; 4];
        let mut full = std::io::Cursor::new(vec![1u8; 6]);
        assert!(matches!(read_frame(&mut full, &mut buf).unwrap(), ReadResult::Frame));
        assert!(matches!(read_frame(&mut full, &mut buf).unwrap(), ReadResult::Partial(2)));
        assert!(matches!(read_frame(&mut full, &mut buf).unwrap(), ReadResult::Eof));
    }
}
