use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use framereel::media::open_adapter;
use framereel::playback::selector::SelectorState;
use framereel::playback::{PlaybackError, PlaybackEvent, Player};
use framereel::settings::PlaybackConfig;
use framereel::surface::memory::MemorySurfaceFactory;

const PRESENT_INTERVAL: Duration = Duration::from_millis(16);

struct Args {
    path: Option<PathBuf>,
    seconds: Option<f64>,
    snapshot: Option<PathBuf>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        path: None,
        seconds: None,
        snapshot: None,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--seconds" => {
                let value = iter.next().context("--seconds needs a value")?;
                let secs: f64 = value
                    .parse()
                    .with_context(|| format!("invalid --seconds value '{value}'"))?;
                args.seconds = Some(secs.max(0.0));
            }
            "--snapshot" => {
                args.snapshot = Some(iter.next().context("--snapshot needs a path")?.into());
            }
            _ if arg.starts_with("--") => anyhow::bail!("unknown flag {arg}"),
            _ => args.path = Some(arg.into()),
        }
    }
    Ok(args)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = parse_args()?;
    let config = PlaybackConfig::load();
    let surfaces = Arc::new(MemorySurfaceFactory::new());
    let mut player = Player::new(config, open_adapter, surfaces.clone());

    player.start(args.path.as_deref())?;

    let deadline = args
        .seconds
        .map(|s| Instant::now() + Duration::from_secs_f64(s));
    loop {
        player.present();

        let mut fatal = false;
        while let Some(event) = player.poll_event() {
            match event {
                PlaybackEvent::FirstFrame { width, height } => {
                    log::info!("Showing {width}x{height} video");
                }
                PlaybackEvent::LoadFinished { frames } => {
                    log::info!("All {frames} frames buffered");
                }
                PlaybackEvent::Failed(
                    PlaybackError::AdapterInit(_) | PlaybackError::SurfaceCreation(_),
                ) => fatal = true,
                PlaybackEvent::Failed(_) => {}
            }
        }

        let stats = player.stats();
        if fatal || stats.state == SelectorState::Exhausted {
            break;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        std::thread::sleep(PRESENT_INTERVAL);
    }

    let stats = player.stats();
    log::info!(
        "Loaded {} frames in {} blocks, rendered {}, presented {}, state {:?}",
        stats.loaded_frames,
        stats.blocks,
        stats.rendered_frames,
        surfaces.presented(),
        stats.state
    );

    if let Some(out) = &args.snapshot {
        match player.snapshot() {
            Some(frame) => {
                frame
                    .save_with_format(out, image::ImageFormat::Png)
                    .with_context(|| format!("failed to write {}", out.display()))?;
                log::info!("Wrote {}", out.display());
            }
            None => log::warn!("No frame was presented; skipping snapshot"),
        }
    }

    player.stop();
    Ok(())
}
