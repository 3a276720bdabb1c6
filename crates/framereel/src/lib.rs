//! Progressive video playback.
//!
//! A loader thread drains a [`media::DecoderAdapter`] into an append-only
//! [`playback::store::Store`] of fixed-capacity blocks while a presenter
//! thread asks the [`playback::selector::Selector`] which buffered frame is
//! due and uploads it to a [`surface::PresentationSurface`]. The store is
//! shared without a lock: blocks only grow, finalized blocks never change,
//! and every frame is published before its index becomes visible.

pub mod media;
pub mod playback;
pub mod settings;
pub mod surface;
