//! Error types for the compositor.
//!
//! Initialization failures (missing extensions, GLX setup, a second compositing manager)
//! are fatal and surface as [`CompositorError`]. Plugin and shader problems have their own
//! enums so that callers can tell a bad `-p` argument apart from a broken display.

use std::path::PathBuf;
use thiserror::Error;
use x11rb::errors::{ConnectError, ConnectionError, ReplyError, ReplyOrIdError};

/// Convenience alias used throughout the crate.
pub type Result<T, E = CompositorError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum CompositorError {
    #[error("Cannot connect to the X server: {0}")]
    Connect(#[from] ConnectError),

    #[error("X connection failed: {0}")]
    Connection(#[from] ConnectionError),

    #[error("X request failed: {0}")]
    Reply(#[from] ReplyError),

    #[error("X request failed: {0}")]
    ReplyOrId(#[from] ReplyOrIdError),

    #[error("Required X extension '{name}' is not available")]
    MissingExtension { name: &'static str },

    #[error("X extension '{name}' is too old: need {required}, server has {found}")]
    ExtensionVersion {
        name: &'static str,
        required: String,
        found: String,
    },

    #[error("Another compositing manager is already running on screen {screen}")]
    CompositorRunning { screen: usize },

    #[error("OpenGL initialization failed: {0}")]
    OpenGl(String),

    #[error("XRender initialization failed: {0}")]
    XRender(String),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error(transparent)]
    Shader(#[from] ShaderError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("Plugin '{name}' could not be loaded (tried: {})", display_paths(.tried))]
    NotFound { name: String, tried: Vec<PathBuf> },

    #[error("Plugin '{name}' does not export the '{symbol}' symbol: {reason}")]
    MissingSymbol {
        name: String,
        symbol: &'static str,
        reason: String,
    },

    #[error("Plugin '{name}' targets the {found} backend, but the compositor runs {expected}")]
    TypeMismatch {
        name: String,
        expected: String,
        found: String,
    },

    #[error("Plugin '{name}' rejected its arguments: {reason}")]
    InvalidArguments { name: String, reason: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShaderError {
    #[error("'{0}' is not a valid GLSL identifier")]
    InvalidEntryPoint(String),

    #[error("Plugin '{plugin}' must name its shader entry point after itself, found '{entry_point}'")]
    EntryPointMismatch { plugin: String, entry_point: String },

    /// Two loaded plugins contribute the same entry point, which happens when one shader
    /// plugin is created twice on a screen.
    #[error("Shader entry point '{0}' is registered twice")]
    DuplicateEntryPoint(String),

    #[error("{stage} source of '{entry_point}' does not define `void {entry_point}()`")]
    MissingEntryPoint {
        entry_point: String,
        stage: &'static str,
    },

    #[error("Uniform '{uniform}' required by '{entry_point}' is not declared in its source")]
    UndeclaredUniform { entry_point: String, uniform: String },

    #[error("{stage} shader failed to compile: {log}")]
    Compile { stage: &'static str, log: String },

    #[error("Shader program failed to link: {0}")]
    Link(String),
}

/// Out-of-range access to a partition, buffer or job list.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{what} index {index} out of bounds (len {len})")]
pub struct IndexError {
    pub what: &'static str,
    pub index: usize,
    pub len: usize,
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_lists_every_candidate() {
        let err = PluginError::NotFound {
            name: "blur".to_string(),
            tried: vec![PathBuf::from("/a/libblur.so"), PathBuf::from("libblur.so")],
        };
        let msg = err.to_string();
        assert!(msg.contains("'blur'"));
        assert!(msg.contains("/a/libblur.so, libblur.so"));
    }

    #[test]
    fn test_index_error_message() {
        let err = IndexError {
            what: "partition",
            index: 4,
            len: 2,
        };
        assert_eq!(err.to_string(), "partition index 4 out of bounds (len 2)");
    }
}
