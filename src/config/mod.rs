//! Configuration for fbcompose
//!
//! Settings come from an optional TOML file and are then overridden by command line
//! flags. Every section is optional; a missing file section takes its defaults.
//!
//! ```toml
//! [general]
//! mode = "xrender"
//! refresh_rate = 60
//! plugins = ["fade", "preview 200 200"]
//!
//! [xrender]
//! preview_filter = "good"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ValueEnum;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{CompositorError, PluginError};
use crate::plugin::{PluginSearchPaths, PluginSpec};
use crate::xrender::resources::PICTURE_FILTERS;

/// Smallest texture size cap accepted in `[opengl]`.
pub const MIN_TEXTURE_SIZE: u32 = 64;

/// How the screens are composited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CompositorMode {
    #[default]
    #[value(name = "opengl")]
    OpenGl,
    #[value(name = "xrender")]
    XRender,
    /// Let the X server composite; nothing is rendered by fbcompose.
    #[value(name = "serverauto")]
    ServerAuto,
}

/// Main configuration struct
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompositorConfig {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub x11: X11Config,

    #[serde(default)]
    pub opengl: OpenGlConfig,

    #[serde(default)]
    pub xrender: XRenderConfig,

    #[serde(default)]
    pub plugin_paths: PluginPathsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub mode: CompositorMode,

    /// Frames per second
    pub refresh_rate: u32,

    /// X display to connect to; `$DISPLAY` when unset
    pub display: Option<String>,

    /// Plugins to load, each as `"name arg1 arg2"`
    pub plugins: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct X11Config {
    /// Drop X protocol errors instead of logging them
    pub ignore_errors: bool,

    /// Round-trip to the server after every event (debugging aid)
    pub synchronize: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenGlConfig {
    /// Cap on the texture size used for tiling, below what the driver allows
    pub max_texture_size: Option<u32>,

    pub prefer_double_buffer: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct XRenderConfig {
    /// Picture filter for scaled previews
    pub preview_filter: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginPathsConfig {
    pub user_dir: Option<PathBuf>,
    pub prefix_dir: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            mode: CompositorMode::OpenGl,
            refresh_rate: 60,
            display: None,
            plugins: Vec::new(),
        }
    }
}

impl Default for OpenGlConfig {
    fn default() -> Self {
        Self {
            max_texture_size: None,
            prefer_double_buffer: true,
        }
    }
}

impl Default for XRenderConfig {
    fn default() -> Self {
        Self {
            preview_filter: "fast".to_string(),
        }
    }
}

/// Replaces a leading `~` with `$HOME`.
pub fn expand_tilde(path: &Path) -> Result<PathBuf> {
    match path.strip_prefix("~") {
        Ok(rest) => {
            let home = std::env::var("HOME").context("Failed to get HOME environment variable")?;
            Ok(Path::new(&home).join(rest))
        }
        Err(_) => Ok(path.to_path_buf()),
    }
}

impl CompositorConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = expand_tilde(path.as_ref())?;

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: CompositorConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CompositorError> {
        if !(1..=1000).contains(&self.general.refresh_rate) {
            return Err(CompositorError::Config(format!(
                "refresh_rate {} is not between 1 and 1000",
                self.general.refresh_rate
            )));
        }

        if let Some(size) = self.opengl.max_texture_size {
            if size < MIN_TEXTURE_SIZE {
                return Err(CompositorError::Config(format!(
                    "max_texture_size {} is below {}",
                    size, MIN_TEXTURE_SIZE
                )));
            }
        }

        if !PICTURE_FILTERS.contains(&self.xrender.preview_filter.as_str()) {
            return Err(CompositorError::Config(format!(
                "preview_filter '{}' is not one of {}",
                self.xrender.preview_filter,
                PICTURE_FILTERS.join(", ")
            )));
        }

        for plugin in &self.general.plugins {
            plugin.parse::<PluginSpec>()?;
        }
        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        fs::write(path, contents).context("Failed to write configuration file")?;

        Ok(())
    }

    /// Parsed plugin list. A plugin named twice is only created once, the first time.
    pub fn plugin_specs(&self) -> Result<Vec<PluginSpec>, PluginError> {
        let mut specs: Vec<PluginSpec> = Vec::with_capacity(self.general.plugins.len());
        for plugin in &self.general.plugins {
            let spec: PluginSpec = plugin.parse()?;
            if specs.iter().any(|s| s.name == spec.name) {
                warn!("Plugin '{}' is listed more than once, ignoring '{}'", spec.name, spec);
                continue;
            }
            specs.push(spec);
        }
        Ok(specs)
    }

    /// The default plugin search path with the configured directories substituted.
    pub fn search_paths(&self) -> Result<PluginSearchPaths> {
        let mut paths = PluginSearchPaths::default();
        if let Some(dir) = &self.plugin_paths.user_dir {
            paths.user_dir = Some(expand_tilde(dir)?);
        }
        if let Some(dir) = &self.plugin_paths.prefix_dir {
            paths.prefix_dir = Some(expand_tilde(dir)?);
        }
        Ok(paths)
    }
}

#[cfg(test)]
mod tests;

#[cfg(test)]
mod property_tests;
