//! Loader thread body: drains a decoder into the session's frame store.

use std::thread;
use std::time::Instant;

use super::error::PlaybackError;
use super::session::Session;
use super::store::StoreWriter;
use super::PlaybackEvent;
use crate::media::types::{nominal_interval, Frame};
use crate::media::DecoderAdapter;
use crate::settings::PlaybackConfig;

/// Load until the stream ends, the session is deactivated, or an error
/// stops it. The last open block is always finalized before returning, so
/// the presenter can tell a finished stream from a stalled one.
///
/// Returns the number of frames stored.
pub fn run_loader(
    adapter: &mut dyn DecoderAdapter,
    session: &Session,
    config: &PlaybackConfig,
) -> Result<u64, PlaybackError> {
    let Some(mut writer) = session.store().writer() else {
        return Err(session.fail(PlaybackError::AdapterInit(
            "frame store already has a writer".into(),
        )));
    };

    let outcome = load(adapter, session, config, &mut writer);
    let frames = writer.finish();

    match outcome {
        Ok(()) => {
            log::info!("Loader finished: {frames} frames");
            session.emit(PlaybackEvent::LoadFinished { frames });
            Ok(frames)
        }
        Err(e) => {
            log::info!("Loader stopped after {frames} frames");
            Err(session.fail(e))
        }
    }
}

fn load(
    adapter: &mut dyn DecoderAdapter,
    session: &Session,
    config: &PlaybackConfig,
    writer: &mut StoreWriter<'_>,
) -> Result<(), PlaybackError> {
    if !wait_until_ready(adapter, session, config)? {
        return Ok(());
    }

    if !adapter.has_video_stream() {
        let detail = adapter
            .poll_error()
            .map_or_else(|| "no video stream".to_string(), |e| format!("no video stream: {e}"));
        return Err(PlaybackError::AdapterInit(detail));
    }

    if adapter.has_audio_stream() {
        log::debug!("Audio stream present; packets will be discarded");
        session.set_discard_audio(true);
    }

    let mut first = true;
    while session.is_active() {
        writer.ensure_open_block();

        let Some(frame) = next_frame(adapter, session, config)? else {
            break;
        };

        if first {
            first = false;
            let interval = frame.frame_rate.and_then(nominal_interval);
            session.set_nominal_interval(interval);
            log::info!(
                "First frame {}x{} {:?}, interval {:?}",
                frame.width,
                frame.height,
                frame.format,
                interval
            );
            writer.append(frame);
            if interval.is_none() {
                return Err(PlaybackError::UnknownFrameRate);
            }
            continue;
        }

        writer.append(frame);
    }

    Ok(())
}

/// Poll until the decoder is ready. `Ok(false)` means the session was
/// stopped first.
fn wait_until_ready(
    adapter: &mut dyn DecoderAdapter,
    session: &Session,
    config: &PlaybackConfig,
) -> Result<bool, PlaybackError> {
    let started = Instant::now();
    let poll = config.poll_interval();

    while !adapter.is_ready() {
        if !session.is_active() {
            return Ok(false);
        }
        if let Some(e) = adapter.poll_error() {
            return Err(PlaybackError::AdapterInit(e.to_string()));
        }
        if let Some(limit) = config.ready_timeout() {
            if started.elapsed() >= limit {
                return Err(PlaybackError::AdapterInit(format!(
                    "decoder not ready after {limit:?}"
                )));
            }
        }
        thread::sleep(poll);
    }

    log::debug!("Decoder ready after {:?}", started.elapsed());
    Ok(true)
}

/// Next decoded frame, or `None` at end of stream or on deactivation.
fn next_frame(
    adapter: &mut dyn DecoderAdapter,
    session: &Session,
    config: &PlaybackConfig,
) -> Result<Option<Frame>, PlaybackError> {
    let poll = config.poll_interval();
    loop {
        if !session.is_active() {
            return Ok(None);
        }
        if let Some(e) = adapter.poll_error() {
            return Err(PlaybackError::Decode(e.to_string()));
        }
        if session.discard_audio() {
            drain_audio(adapter, config.audio_drain_limit);
        }
        if let Some(frame) = adapter.pull_video_frame() {
            return Ok(Some(frame));
        }
        if !adapter.is_decoding() {
            log::debug!("Decoder reached end of stream");
            return Ok(None);
        }
        thread::sleep(poll);
    }
}

fn drain_audio(adapter: &mut dyn DecoderAdapter, limit: usize) {
    for _ in 0..limit {
        if adapter.pull_audio_packet().is_none() {
            break;
        }
    }
}
