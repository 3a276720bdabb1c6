//! CPU-side streaming texture.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use image::RgbaImage;

use super::{PresentationSurface, SurfaceFactory};
use crate::media::types::{Frame, PixelFormat};

/// Rows are padded to this many bytes, like a GPU texture pitch.
const PITCH_ALIGN: usize = 4;

/// Largest edge accepted for a surface.
const MAX_DIMENSION: u32 = 16_384;

struct PlaneBuffer {
    pitch: usize,
    row_bytes: usize,
    rows: usize,
    data: Vec<u8>,
}

/// Planar texture held in memory. Each plane keeps its own pitch, so chroma
/// planes of an I420 surface are half width and half height.
pub struct MemorySurface {
    width: u32,
    height: u32,
    format: PixelFormat,
    planes: Vec<PlaneBuffer>,
    has_frame: bool,
    uploads: u64,
    presented: Arc<AtomicU64>,
}

impl MemorySurface {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> anyhow::Result<Self> {
        if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
            anyhow::bail!("Unsupported surface size {width}x{height}");
        }
        let planes = (0..format.plane_count())
            .map(|i| {
                let (row_bytes, rows) = format.plane_dimensions(i, width, height);
                let pitch = row_bytes.next_multiple_of(PITCH_ALIGN);
                PlaneBuffer {
                    pitch,
                    row_bytes,
                    rows,
                    data: vec![0; pitch * rows],
                }
            })
            .collect();

        Ok(Self {
            width,
            height,
            format,
            planes,
            has_frame: false,
            uploads: 0,
            presented: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn uploads(&self) -> u64 {
        self.uploads
    }

    pub fn presented(&self) -> u64 {
        self.presented.load(Ordering::Relaxed)
    }

    /// Convert the current contents to RGBA (BT.601 limited range for I420).
    pub fn snapshot_rgba(&self) -> RgbaImage {
        let (w, h) = (self.width as usize, self.height as usize);
        let mut out = RgbaImage::new(self.width, self.height);
        match self.format {
            PixelFormat::Rgba8 => {
                let plane = &self.planes[0];
                for (y, row) in out.chunks_exact_mut(w * 4).enumerate() {
                    let src = &plane.data[y * plane.pitch..y * plane.pitch + w * 4];
                    row.copy_from_slice(src);
                }
            }
            PixelFormat::I420 => {
                let (yp, up, vp) = (&self.planes[0], &self.planes[1], &self.planes[2]);
                for y in 0..h {
                    for x in 0..w {
                        let luma = yp.data[y * yp.pitch + x];
                        let u = up.data[(y / 2) * up.pitch + x / 2];
                        let v = vp.data[(y / 2) * vp.pitch + x / 2];
                        let [r, g, b] = yuv_to_rgb(luma, u, v);
                        out.put_pixel(x as u32, y as u32, image::Rgba([r, g, b, 255]));
                    }
                }
            }
        }
        out
    }

    pub fn save_png(&self, path: &Path) -> anyhow::Result<()> {
        self.snapshot_rgba()
            .save_with_format(path, image::ImageFormat::Png)
            .map_err(|e| anyhow::anyhow!("Failed to write {}: {e}", path.display()))
    }
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = i32::from(y) - 16;
    let d = i32::from(u) - 128;
    let e = i32::from(v) - 128;
    let clamp = |x: i32| x.clamp(0, 255) as u8;
    [
        clamp((298 * c + 409 * e + 128) >> 8),
        clamp((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp((298 * c + 516 * d + 128) >> 8),
    ]
}

impl PresentationSurface for MemorySurface {
    fn upload_frame(&mut self, frame: &Frame) -> anyhow::Result<()> {
        if frame.width != self.width || frame.height != self.height || frame.format != self.format
        {
            anyhow::bail!(
                "Frame {}x{} {:?} does not match surface {}x{} {:?}",
                frame.width,
                frame.height,
                frame.format,
                self.width,
                self.height,
                self.format
            );
        }
        if frame.planes.len() != self.planes.len() {
            anyhow::bail!(
                "Frame has {} planes, expected {}",
                frame.planes.len(),
                self.planes.len()
            );
        }

        for (i, (dst, src)) in self.planes.iter_mut().zip(&frame.planes).enumerate() {
            let needed = src.stride * (dst.rows - 1) + dst.row_bytes;
            if src.stride < dst.row_bytes || src.data.len() < needed {
                anyhow::bail!(
                    "Plane {i} too small: {} bytes, stride {}",
                    src.data.len(),
                    src.stride
                );
            }
            for row in 0..dst.rows {
                let from = row * src.stride;
                let to = row * dst.pitch;
                dst.data[to..to + dst.row_bytes]
                    .copy_from_slice(&src.data[from..from + dst.row_bytes]);
            }
        }

        self.has_frame = true;
        self.uploads += 1;
        Ok(())
    }

    fn present(&mut self) {
        if !self.has_frame {
            return;
        }
        self.presented.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> Option<RgbaImage> {
        self.has_frame.then(|| self.snapshot_rgba())
    }
}

/// Hands out [`MemorySurface`]s and keeps a shared count of presents across
/// every surface it created.
#[derive(Default)]
pub struct MemorySurfaceFactory {
    presented: Arc<AtomicU64>,
}

impl MemorySurfaceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn presented(&self) -> u64 {
        self.presented.load(Ordering::Relaxed)
    }
}

impl SurfaceFactory for MemorySurfaceFactory {
    fn create_surface(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> anyhow::Result<Box<dyn PresentationSurface>> {
        let mut surface = MemorySurface::new(width, height, format)?;
        surface.presented = self.presented.clone();
        log::info!("Created {width}x{height} {format:?} surface");
        Ok(Box::new(surface))
    }
}
