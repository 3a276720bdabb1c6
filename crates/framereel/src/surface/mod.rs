pub mod memory;

use image::RgbaImage;

use crate::media::types::{Frame, PixelFormat};

/// Destination for presented frames: a texture the presenter uploads into
/// and the owner composites onto its output.
pub trait PresentationSurface: Send {
    /// Copy the frame's planes into the surface.
    fn upload_frame(&mut self, frame: &Frame) -> anyhow::Result<()>;
    /// Composite the current contents. No-op before the first upload.
    fn present(&mut self);
    /// Current contents as RGBA, if the surface can read them back.
    fn snapshot(&self) -> Option<RgbaImage> {
        None
    }
}

/// Creates the surface lazily once the first frame's size is known.
pub trait SurfaceFactory: Send + Sync {
    fn create_surface(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> anyhow::Result<Box<dyn PresentationSurface>>;
}
