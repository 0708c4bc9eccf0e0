//! # fbcompose - X11 compositing manager
//!
//! Parses the command line, sets up logging, merges the configuration file with the
//! flags and runs the compositor until SIGINT or SIGTERM.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};

use fbcompose::config::{expand_tilde, CompositorConfig, CompositorMode};
use fbcompose::effects::BUILTIN_PLUGINS;
use fbcompose::Compositor;

/// Loaded when `--config` is not given and the file exists.
const DEFAULT_CONFIG_PATH: &str = "~/.config/fbcompose/fbcompose.toml";

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (built ",
    env!("BUILD_DATE"),
    " for ",
    env!("TARGET_TRIPLE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "fbcompose")]
#[command(about = "A damage-driven X11 compositing manager")]
#[command(version, long_version = LONG_VERSION)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// X display to use
    #[arg(short, long)]
    display: Option<String>,

    /// Rendering mode
    #[arg(short, long, value_enum)]
    mode: Option<CompositorMode>,

    /// Frames per second
    #[arg(short, long)]
    refresh_rate: Option<u32>,

    /// Plugin to load as "name [args...]"; may be repeated
    #[arg(short, long = "plugin", value_name = "PLUGIN")]
    plugins: Vec<String>,

    /// Do not print X protocol errors
    #[arg(long)]
    no_x_errors: bool,

    /// Synchronize with the X server after every event (debugging)
    #[arg(long)]
    sync: bool,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, conflicts_with = "quiet")]
    verbose: u8,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    fn log_filter(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }

    /// Applies the flags that were given on top of `config`.
    fn apply(&self, config: &mut CompositorConfig) {
        if let Some(display) = &self.display {
            config.general.display = Some(display.clone());
        }
        if let Some(mode) = self.mode {
            config.general.mode = mode;
        }
        if let Some(rate) = self.refresh_rate {
            config.general.refresh_rate = rate;
        }
        if !self.plugins.is_empty() {
            config.general.plugins = self.plugins.clone();
        }
        if self.no_x_errors {
            config.x11.ignore_errors = true;
        }
        if self.sync {
            config.x11.synchronize = true;
        }
    }

    fn load_config(&self) -> Result<CompositorConfig> {
        if let Some(path) = &self.config {
            return CompositorConfig::load(path);
        }
        let default_path = expand_tilde(Path::new(DEFAULT_CONFIG_PATH))?;
        if default_path.exists() {
            CompositorConfig::load(default_path)
        } else {
            Ok(CompositorConfig::default())
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = cli.load_config()?;
    cli.apply(&mut config);
    config.validate()?;

    info!("🚀 Starting fbcompose {}", fbcompose::VERSION);
    info!("🧩 Built-in plugins: {}", BUILTIN_PLUGINS.join(", "));

    let done = Arc::new(AtomicBool::new(false));
    let flag = done.clone();
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
        .context("Failed to install the signal handler")?;

    let mut compositor = Compositor::new(&config, done)?;
    compositor.run()?;

    info!("✅ fbcompose shutdown complete");
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_filter()))
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("❌ {:#}", e);
            eprintln!("fbcompose: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
