//! Headless runner: plays an animation against a wall-clock tick and logs
//! what a display would have shown.

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::{debug, info, trace, warn};

use crate::cli::Args;
use crate::config::{self, AppConfig, PathConfig};
use crate::core::frame_cache::{CacheStatsSnapshot, FrameCache};
use crate::core::player::{PlaybackDriver, PlaybackStatus};
use crate::core::pressure::SystemPressureMonitor;
use crate::entities::{AnimatedImage, Frame, FrameSource, GifSource, RenderSurface, SyntheticSource, DELAY_DEFAULT};

/// Side length of generated frames for `--synthetic`
const SYNTHETIC_SIZE: u32 = 64;

/// Surface that only counts and logs redraws
#[derive(Debug, Default)]
pub struct ConsoleSurface {
    pub redraws: usize,
}

impl RenderSurface for ConsoleSurface {
    fn request_redraw(&mut self, frame: &Frame) {
        self.redraws += 1;
        debug!("Redraw #{}: {:?}", self.redraws, frame);
    }
}

/// Timing of one headless session
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub tick: Duration,
    pub duration: Duration,
    /// Pause at this offset for one second
    pub pause_after: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub ticks: u64,
    pub redraws: usize,
    pub final_index: usize,
    pub status: PlaybackStatus,
    pub stats: CacheStatsSnapshot,
}

const PAUSE_LENGTH: Duration = Duration::from_secs(1);

/// Run the player with given arguments (used by the binary).
pub fn run_app(args: Args) -> Result<()> {
    let path_config = PathConfig::from_env_and_cli(args.config_dir.clone());
    let mut app_config = AppConfig::load_from(&path_config)?;

    info!("animplay starting...");
    trace!("Command-line args: {:?}", args);
    info!(
        "Config path: {}",
        config::config_file(config::CONFIG_FILE, &path_config).display()
    );

    if let Some(fps) = args.fps {
        app_config.fps = fps;
    }
    if let Some(cap) = args.cache_cap {
        app_config.cache.budget_cap = cap;
    }
    if let Some(mb) = args.pressure_threshold {
        app_config.pressure.threshold_mb = mb;
    }

    let (image, source) = match (args.synthetic, &args.file_path) {
        (Some(frames), _) => open_synthetic(frames)?,
        (None, Some(path)) => open_file(path)?,
        (None, None) => anyhow::bail!("No input: pass FILE or --synthetic N"),
    };
    info!(
        "Source: {} frames, {}x{}, loop count {}, total {:?}",
        image.frame_count(),
        image.size().0,
        image.size().1,
        image.loop_count(),
        image.duration()
    );

    let cache = FrameCache::new(image, source, app_config.cache.clone())
        .context("Failed to create frame cache")?;

    // Keep the monitor alive for the whole session
    let _monitor = if app_config.pressure.enabled {
        match SystemPressureMonitor::start(
            app_config.pressure.threshold_bytes(),
            app_config.pressure.poll_interval(),
        ) {
            Ok(monitor) => {
                cache.attach_pressure_monitor(&monitor);
                Some(monitor)
            }
            Err(e) => {
                warn!("Memory pressure monitor unavailable: {}", e);
                None
            }
        }
    } else {
        None
    };

    let plan = RunPlan {
        tick: app_config.tick_interval(),
        duration: Duration::from_secs_f64(args.duration.max(0.0)),
        pause_after: args.pause_after.map(|s| Duration::from_secs_f64(s.max(0.0))),
    };
    let summary = play(&cache, &plan)?;

    println!(
        "{} ticks, {} redraws, final frame {} ({:?})",
        summary.ticks, summary.redraws, summary.final_index, summary.status
    );
    println!(
        "cache: {} hits, {} misses ({:.1}% hit rate), {} decode failures, {} stale, {}/{} resident, {} KB",
        summary.stats.hits,
        summary.stats.misses,
        summary.stats.hit_rate() * 100.0,
        summary.stats.decode_failures,
        summary.stats.stale_completions,
        summary.stats.resident,
        summary.stats.budget,
        summary.stats.bytes / 1024
    );
    Ok(())
}

/// True for a RIFF container tagged `WEBP`
fn is_webp(data: &[u8]) -> bool {
    data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP"
}

fn open_file(path: &Path) -> Result<(AnimatedImage, Arc<dyn FrameSource>)> {
    info!("Input file: {}", path.display());
    let data = std::fs::read(path).with_context(|| format!("Failed to open {}", path.display()))?;
    if is_webp(&data) {
        anyhow::bail!("Failed to open {}: WebP input is not supported, only GIF", path.display());
    }
    let (image, source) =
        GifSource::open(data).with_context(|| format!("Failed to open {}", path.display()))?;
    let source: Arc<dyn FrameSource> = source;
    Ok((image, source))
}

fn open_synthetic(frames: usize) -> Result<(AnimatedImage, Arc<dyn FrameSource>)> {
    info!("Synthetic source: {} frames", frames);
    let (image, source) = SyntheticSource::new(frames, SYNTHETIC_SIZE, SYNTHETIC_SIZE)
        .open(0, DELAY_DEFAULT)
        .context("Failed to build synthetic source")?;
    let source: Arc<dyn FrameSource> = source;
    Ok((image, source))
}

/// Drive `cache` in real time until the plan's duration elapses or the
/// animation finishes.
pub fn play(cache: &FrameCache, plan: &RunPlan) -> Result<RunSummary> {
    let mut driver = PlaybackDriver::new(cache);
    let mut surface = ConsoleSurface::default();
    driver.attach();

    let start = Instant::now();
    let mut last = start;
    let mut ticks = 0u64;

    loop {
        thread::sleep(plan.tick);
        let now = Instant::now();
        let offset = now - start;
        let elapsed = now - last;
        last = now;

        if let Some(pause_at) = plan.pause_after {
            let paused_window = offset >= pause_at && offset < pause_at + PAUSE_LENGTH;
            if paused_window != driver.is_paused() {
                driver.set_paused(paused_window);
                info!("Playback {} at {:?}", if paused_window { "paused" } else { "resumed" }, offset);
            }
        }

        if let Some(index) = driver.on_tick(elapsed, cache, &mut surface)? {
            trace!("Frame -> {}", index);
        }
        ticks += 1;

        if driver.status() == PlaybackStatus::Finished {
            info!("Animation finished after {:?}", offset);
            break;
        }
        if offset >= plan.duration {
            break;
        }
    }

    Ok(RunSummary {
        ticks,
        redraws: surface.redraws,
        final_index: driver.current_index(),
        status: driver.status(),
        stats: cache.stats(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache_man::CacheConfig;

    fn synthetic_cache(frames: usize, loop_count: u32, delay: Duration) -> FrameCache {
        let (image, source) = SyntheticSource::new(frames, 8, 8).open(loop_count, delay).unwrap();
        FrameCache::new(image, source, CacheConfig::default()).unwrap()
    }

    #[test]
    fn test_finite_animation_finishes_early() {
        let cache = synthetic_cache(3, 1, Duration::from_millis(20));
        let plan = RunPlan {
            tick: Duration::from_millis(2),
            duration: Duration::from_secs(5),
            pause_after: None,
        };

        let summary = play(&cache, &plan).unwrap();
        assert_eq!(summary.status, PlaybackStatus::Finished);
        assert_eq!(summary.final_index, 2);
        assert!(summary.redraws >= 3);
        assert_eq!(summary.stats.decode_failures, 0);
    }

    #[test]
    fn test_infinite_animation_stops_at_duration() {
        let cache = synthetic_cache(4, 0, Duration::from_millis(20));
        let plan = RunPlan {
            tick: Duration::from_millis(5),
            duration: Duration::from_millis(150),
            pause_after: None,
        };

        let summary = play(&cache, &plan).unwrap();
        assert_eq!(summary.status, PlaybackStatus::Playing);
        assert!(summary.ticks > 0);
        assert!(summary.stats.hits > 0);
    }

    #[test]
    fn test_open_synthetic() {
        let (image, source) = open_synthetic(5).unwrap();
        assert_eq!(image.frame_count(), 5);
        assert_eq!(image.loop_count(), 0);
        assert_eq!(source.decode(4).unwrap().width(), SYNTHETIC_SIZE);
    }

    #[test]
    fn test_open_missing_file() {
        let Err(err) = open_file(Path::new("/nonexistent/animplay.gif")) else {
            panic!("missing file opened");
        };
        assert!(format!("{:#}", err).contains("Failed to open"));
    }

    #[test]
    fn test_webp_rejected_with_reason() {
        let mut data = b"RIFF".to_vec();
        data.extend_from_slice(&[0x1a, 0, 0, 0]);
        data.extend_from_slice(b"WEBPVP8X");
        assert!(is_webp(&data));
        assert!(!is_webp(b"GIF89a\x01\x00\x01\x00\x00\x00"));

        let path = std::env::temp_dir().join(format!("animplay_webp_{}.webp", std::process::id()));
        std::fs::write(&path, &data).unwrap();
        let result = open_file(&path);
        let _ = std::fs::remove_file(&path);
        let Err(err) = result else {
            panic!("WebP input opened");
        };
        assert!(format!("{:#}", err).contains("WebP input is not supported"));
    }
}
