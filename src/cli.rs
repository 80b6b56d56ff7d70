use clap::Parser;
use std::path::PathBuf;

// Build version with decoder info
const VERSION_INFO: &str = const_format::concatcp!(
    env!("CARGO_PKG_VERSION"), "\n",
    "Decoder: gif 0.14 (GIF only)\n",
    "Target:  ", std::env::consts::ARCH, "-", std::env::consts::OS
);

/// Animated image player with an adaptive frame cache
#[derive(Parser, Debug)]
#[command(author, version = VERSION_INFO, about, long_about = None)]
pub struct Args {
    /// Animated GIF to play
    #[arg(value_name = "FILE", required_unless_present = "synthetic")]
    pub file_path: Option<PathBuf>,

    /// Play a generated animation with N frames instead of a file
    #[arg(long = "synthetic", value_name = "N", conflicts_with = "file_path")]
    pub synthetic: Option<usize>,

    /// Refresh rate of the playback clock (overrides config)
    #[arg(long = "fps", value_name = "FPS")]
    pub fps: Option<f64>,

    /// Stop after this many seconds even if the animation loops forever
    #[arg(short = 'd', long = "duration", value_name = "SECS", default_value_t = 5.0)]
    pub duration: f64,

    /// Maximum resident frames, 0 = no cap (overrides config)
    #[arg(long = "cache-cap", value_name = "N")]
    pub cache_cap: Option<usize>,

    /// Pause after this many seconds, then resume one second later
    #[arg(long = "pause-after", value_name = "SECS")]
    pub pause_after: Option<f64>,

    /// Available-memory threshold in MB for pressure events (overrides config)
    #[arg(long = "pressure-threshold", value_name = "MB")]
    pub pressure_threshold: Option<u64>,

    /// Enable debug logging to file (default: animplay.log)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE")]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// Custom configuration directory (overrides default platform paths)
    #[arg(short = 'c', long = "config-dir", value_name = "DIR")]
    pub config_dir: Option<PathBuf>,
}
