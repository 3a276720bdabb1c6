use std::time::Duration;

/// Pixel layout of a decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Planar YUV 4:2:0: full-size Y plane, U and V at half width and height.
    I420,
    /// Packed RGBA8 in a single plane.
    Rgba8,
}

impl PixelFormat {
    pub fn plane_count(self) -> usize {
        match self {
            PixelFormat::I420 => 3,
            PixelFormat::Rgba8 => 1,
        }
    }

    /// Bytes per row and row count of plane `index` for a `width`x`height` frame.
    /// Chroma planes round up so odd dimensions keep their last column/row.
    pub fn plane_dimensions(self, index: usize, width: u32, height: u32) -> (usize, usize) {
        match (self, index) {
            (PixelFormat::I420, 0) => (width as usize, height as usize),
            (PixelFormat::I420, _) => (width.div_ceil(2) as usize, height.div_ceil(2) as usize),
            (PixelFormat::Rgba8, _) => (width as usize * 4, height as usize),
        }
    }

    /// Size in bytes of one tightly packed frame.
    pub fn frame_size(self, width: u32, height: u32) -> usize {
        (0..self.plane_count())
            .map(|i| {
                let (row, rows) = self.plane_dimensions(i, width, height);
                row * rows
            })
            .sum()
    }
}

/// One pixel plane. `stride` is the distance in bytes between row starts.
#[derive(Debug, Clone)]
pub struct Plane {
    pub data: Vec<u8>,
    pub stride: usize,
}

/// When a frame stops being the one on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameTiming {
    /// Explicit display window relative to stream start.
    Span { start: Duration, end: Duration },
    /// Raw presentation timestamp only. The end is derived from the stream's
    /// nominal frame interval.
    Timestamp { pts: Duration },
}

impl FrameTiming {
    /// End of the display window, measured from stream start.
    ///
    /// `None` means the frame never ends: a timestamp-only frame in a stream
    /// whose nominal interval is unknown holds the screen indefinitely.
    pub fn end(&self, nominal_interval: Option<Duration>) -> Option<Duration> {
        match *self {
            FrameTiming::Span { end, .. } => Some(end),
            FrameTiming::Timestamp { pts } => nominal_interval.map(|interval| pts + interval),
        }
    }

    pub fn start(&self) -> Duration {
        match *self {
            FrameTiming::Span { start, .. } => start,
            FrameTiming::Timestamp { pts } => pts,
        }
    }
}

/// A decoded frame ready for surface upload.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub planes: Vec<Plane>,
    pub timing: FrameTiming,
    /// Frame rate the stream declares, if the decoder knows it.
    pub frame_rate: Option<f64>,
}

impl Frame {
    /// Split a tightly packed I420 buffer (Y, then U, then V) into planes.
    pub fn from_i420(
        width: u32,
        height: u32,
        data: &[u8],
        timing: FrameTiming,
        frame_rate: Option<f64>,
    ) -> Result<Self, String> {
        let format = PixelFormat::I420;
        let expected = format.frame_size(width, height);
        if data.len() < expected {
            return Err(format!(
                "I420 buffer too short for {width}x{height}: {} < {expected}",
                data.len()
            ));
        }

        let mut planes = Vec::with_capacity(3);
        let mut offset = 0;
        for i in 0..3 {
            let (row, rows) = format.plane_dimensions(i, width, height);
            planes.push(Plane {
                data: data[offset..offset + row * rows].to_vec(),
                stride: row,
            });
            offset += row * rows;
        }

        Ok(Self {
            width,
            height,
            format,
            planes,
            timing,
            frame_rate,
        })
    }

    pub fn from_rgba(
        width: u32,
        height: u32,
        data: Vec<u8>,
        timing: FrameTiming,
        frame_rate: Option<f64>,
    ) -> Self {
        Self {
            width,
            height,
            format: PixelFormat::Rgba8,
            planes: vec![Plane {
                data,
                stride: width as usize * 4,
            }],
            timing,
            frame_rate,
        }
    }
}

/// An audio packet pulled only so the decoder's audio path keeps moving.
/// Playback never looks inside it.
#[derive(Debug, Clone, Default)]
pub struct AudioPacket {
    pub data: Vec<u8>,
}

/// Nominal frame interval for a declared frame rate, truncated to whole
/// milliseconds. Zero, negative or non-finite rates have no interval.
pub fn nominal_interval(frame_rate: f64) -> Option<Duration> {
    if !frame_rate.is_finite() || frame_rate <= 0.0 {
        return None;
    }
    let ms = (1000.0 / frame_rate) as u64;
    (ms > 0).then(|| Duration::from_millis(ms))
}
