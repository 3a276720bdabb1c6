//! Presenter thread body: runs the selector and uploads what it picks.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use super::error::PlaybackError;
use super::selector::{Selection, Selector};
use super::session::Session;
use super::PlaybackEvent;
use crate::media::types::Frame;
use crate::surface::{PresentationSurface, SurfaceFactory};

/// Surface shared between the presenter (upload) and the owner (present).
pub type SurfaceSlot = Arc<Mutex<Option<Box<dyn PresentationSurface>>>>;

pub struct Presenter {
    selector: Selector,
    factory: Arc<dyn SurfaceFactory>,
    surface: SurfaceSlot,
    uploaded: u64,
}

impl Presenter {
    pub fn new(factory: Arc<dyn SurfaceFactory>, surface: SurfaceSlot) -> Self {
        Self {
            selector: Selector::new(),
            factory,
            surface,
            uploaded: 0,
        }
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    /// Frames uploaded so far, pre-roll included.
    pub fn uploaded(&self) -> u64 {
        self.uploaded
    }

    /// One selector step at `now`. Returns whether a new frame went up.
    pub fn tick(&mut self, session: &Session, now: Instant) -> Result<bool, PlaybackError> {
        if !session.is_active() {
            return Ok(false);
        }

        let selection = self
            .selector
            .select(session.store(), session.nominal_interval(), now);
        session.publish_progress(self.selector.state(), self.selector.rendered_frames());

        match selection {
            Selection::NoChange => Ok(false),
            Selection::Show(frame) => {
                self.upload(session, &frame)?;
                Ok(true)
            }
        }
    }

    fn upload(&mut self, session: &Session, frame: &Frame) -> Result<(), PlaybackError> {
        let mut slot = self.surface.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            let surface = self
                .factory
                .create_surface(frame.width, frame.height, frame.format)
                .map_err(|e| PlaybackError::SurfaceCreation(format!("{e:#}")))?;
            log::info!("Presentation surface {}x{} ready", frame.width, frame.height);
            *slot = Some(surface);
            session.emit(PlaybackEvent::FirstFrame {
                width: frame.width,
                height: frame.height,
            });
        }

        if let Some(surface) = slot.as_mut() {
            if let Err(e) = surface.upload_frame(frame) {
                log::warn!("Frame upload failed: {e:#}");
                return Ok(());
            }
            self.uploaded += 1;
        }
        Ok(())
    }
}

/// Tick until the session is deactivated, sleeping `poll` whenever the
/// selector has nothing new. Returns the number of frames uploaded.
pub fn run_presenter(
    presenter: &mut Presenter,
    session: &Session,
    poll: Duration,
) -> Result<u64, PlaybackError> {
    while session.is_active() {
        match presenter.tick(session, Instant::now()) {
            Ok(true) => {}
            Ok(false) => thread::sleep(poll),
            Err(e) => return Err(session.fail(e)),
        }
    }
    log::debug!("Presenter stopped after {} uploads", presenter.uploaded());
    Ok(presenter.uploaded())
}
