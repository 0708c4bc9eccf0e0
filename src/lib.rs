//! # fbcompose
//!
//! A damage-driven compositing manager for X11.
//!
//! ## Architecture
//!
//! - `compositor`: selection handling, redirection and the event loop
//! - `screen`: per-screen window stacking, damage and root properties
//! - `window`: per-window geometry, content pixmap and shape state
//! - `opengl` / `xrender`: the two rendering backends
//! - `plugin`: plugin loading and the callbacks every plugin implements
//! - `effects`: the built-in `fade` and `preview` plugins
//! - `config`: TOML configuration
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::atomic::AtomicBool;
//! use std::sync::Arc;
//! use fbcompose::{Compositor, CompositorConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = CompositorConfig::default();
//!     let done = Arc::new(AtomicBool::new(false));
//!     let mut compositor = Compositor::new(&config, done)?;
//!     compositor.run()
//! }
//! ```

pub mod compositor;
pub mod config;
pub mod damage;
pub mod effects;
pub mod error;
pub mod opengl;
pub mod plugin;
pub mod screen;
pub mod tick_tracker;
pub mod window;
pub mod x11;
pub mod xrender;

pub use compositor::Compositor;
pub use config::{CompositorConfig, CompositorMode};
pub use error::{CompositorError, PluginError};

/// Version information for fbcompose
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
