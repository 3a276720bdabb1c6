//! Progressive playback: a loader thread fills the frame store while a
//! presenter thread plays it back on a wall clock.

pub mod error;
pub mod loader;
pub mod presenter;
pub mod selector;
pub mod session;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use image::RgbaImage;

pub use error::PlaybackError;
use presenter::{Presenter, SurfaceSlot};
use selector::SelectorState;
use session::Session;

use crate::media::DecoderAdapter;
use crate::settings::PlaybackConfig;
use crate::surface::SurfaceFactory;

/// Notifications queued by the playback threads for the owner.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    /// The presentation surface was created for the first frame.
    FirstFrame { width: u32, height: u32 },
    /// The loader reached the end of the stream.
    LoadFinished { frames: u64 },
    /// A thread hit an error and exited.
    Failed(PlaybackError),
}

/// Snapshot of session progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerStats {
    pub loaded_frames: u64,
    pub rendered_frames: u64,
    pub blocks: usize,
    pub state: SelectorState,
}

impl Default for PlayerStats {
    fn default() -> Self {
        Self {
            loaded_frames: 0,
            rendered_frames: 0,
            blocks: 0,
            state: SelectorState::AwaitingFirstFrame,
        }
    }
}

type AdapterOpener = Box<dyn Fn(&Path) -> anyhow::Result<Box<dyn DecoderAdapter>> + Send>;
type LoaderOutcome = (Box<dyn DecoderAdapter>, Result<u64, PlaybackError>);

/// Owns one playback session at a time and its two threads.
pub struct Player {
    config: PlaybackConfig,
    opener: AdapterOpener,
    surfaces: Arc<dyn SurfaceFactory>,
    surface: SurfaceSlot,
    session: Option<Arc<Session>>,
    loader: Option<JoinHandle<LoaderOutcome>>,
    presenter: Option<JoinHandle<Result<u64, PlaybackError>>>,
    events_tx: Sender<PlaybackEvent>,
    events_rx: Receiver<PlaybackEvent>,
}

impl Player {
    /// `opener` builds the decoder for a path; pass
    /// [`crate::media::open_adapter`] for files on disk.
    pub fn new<F>(config: PlaybackConfig, opener: F, surfaces: Arc<dyn SurfaceFactory>) -> Self
    where
        F: Fn(&Path) -> anyhow::Result<Box<dyn DecoderAdapter>> + Send + 'static,
    {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        Self {
            config,
            opener: Box::new(opener),
            surfaces,
            surface: Arc::new(Mutex::new(None)),
            session: None,
            loader: None,
            presenter: None,
            events_tx,
            events_rx,
        }
    }

    /// Begin playing `path`. A session already running is stopped first.
    pub fn start(&mut self, path: Option<&Path>) -> Result<(), PlaybackError> {
        if self.session.is_some() {
            self.stop();
        }

        let path = validate_path(path).inspect_err(|e| log::error!("{e}"))?;
        let adapter = (self.opener)(path).map_err(|e| {
            let err = PlaybackError::AdapterInit(format!("{e:#}"));
            log::error!("{err}");
            err
        })?;

        let session = Arc::new(Session::new(self.config.block_capacity(), self.events_tx.clone()));
        session.activate();

        let loader_session = session.clone();
        let loader_config = self.config.clone();
        let loader = thread::Builder::new()
            .name("framereel-loader".into())
            .spawn(move || {
                let mut adapter = adapter;
                let result = loader::run_loader(adapter.as_mut(), &loader_session, &loader_config);
                (adapter, result)
            })
            .map_err(|e| {
                session.deactivate();
                let err = PlaybackError::TaskSpawn("loader", e.to_string());
                log::error!("{err}");
                err
            })?;

        let presenter_session = session.clone();
        let mut task = Presenter::new(self.surfaces.clone(), self.surface.clone());
        let poll = self.config.poll_interval();
        let spawned = thread::Builder::new()
            .name("framereel-presenter".into())
            .spawn(move || presenter::run_presenter(&mut task, &presenter_session, poll));

        self.session = Some(session);
        self.loader = Some(loader);
        match spawned {
            Ok(handle) => {
                self.presenter = Some(handle);
                log::info!("Playback started: {}", path.display());
                Ok(())
            }
            Err(e) => {
                let err = PlaybackError::TaskSpawn("presenter", e.to_string());
                log::error!("{err}");
                self.stop();
                Err(err)
            }
        }
    }

    /// Stop both threads and release everything the session owned.
    /// Safe to call at any time, any number of times.
    pub fn stop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        session.deactivate();

        if let Some(handle) = self.presenter.take() {
            match handle.join() {
                Ok(Ok(uploaded)) => log::debug!("Presenter joined after {uploaded} uploads"),
                Ok(Err(_)) => {}
                Err(_) => log::error!("Presenter thread panicked"),
            }
        }

        let mut adapter = None;
        if let Some(handle) = self.loader.take() {
            match handle.join() {
                Ok((a, _)) => adapter = Some(a),
                Err(_) => log::error!("Loader thread panicked"),
            }
        }

        // Nothing else holds the session now; dropping it frees the store.
        let loaded = session.store().total_frames();
        self.surface
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(session);

        if let Some(mut adapter) = adapter {
            adapter.stop();
        }
        // Events from this session must not leak into the next one.
        while self.events_rx.try_recv().is_ok() {}
        log::info!("Playback stopped ({loaded} frames loaded)");
    }

    pub fn is_active(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.is_active())
    }

    /// Composite the current surface. No-op before the first frame.
    pub fn present(&self) {
        if let Some(surface) = self
            .surface
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
        {
            surface.present();
        }
    }

    /// Current surface contents, when a frame is up and the surface can be
    /// read back.
    pub fn snapshot(&self) -> Option<RgbaImage> {
        self.surface
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()?
            .snapshot()
    }

    pub fn stats(&self) -> PlayerStats {
        let Some(session) = &self.session else {
            return PlayerStats::default();
        };
        let store = session.store();
        PlayerStats {
            loaded_frames: store.total_frames(),
            rendered_frames: session.rendered_frames(),
            blocks: store.block_count(),
            state: session.selector_state(),
        }
    }

    /// Next queued event, if any.
    pub fn poll_event(&self) -> Option<PlaybackEvent> {
        self.events_rx.try_recv().ok()
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.stop();
    }
}

fn validate_path(path: Option<&Path>) -> Result<&Path, PlaybackError> {
    let Some(path) = path else {
        return Err(PlaybackError::Input("no source path given".into()));
    };
    if path.as_os_str().is_empty() {
        return Err(PlaybackError::Input("empty source path".into()));
    }
    if !path.is_file() {
        return Err(PlaybackError::Input(format!("{} is not a file", path.display())));
    }
    Ok(path)
}
