//! Plugin interface
//!
//! Plugins are stateful objects bound to one screen. They receive window lifecycle
//! callbacks from [`BaseScreen`](crate::screen::BaseScreen) and contribute rendering jobs
//! (and for OpenGL, shader code) through the backend-specific traits
//! [`OpenGlPlugin`](crate::opengl::OpenGlPlugin) and
//! [`XRenderPlugin`](crate::xrender::XRenderPlugin).
//!
//! External plugins are shared libraries exporting two symbols, `pluginType` and
//! `createPlugin`, generated by [`declare_plugin!`](crate::declare_plugin).

mod manager;

pub use manager::{PluginFactory, PluginManager, PluginSearchPaths};

use std::fmt;
use std::str::FromStr;

use x11rb::protocol::xproto::{Atom, Property};

use crate::error::PluginError;
use crate::screen::ScreenInfo;

/// The backend a plugin renders with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginType {
    OpenGl,
    XRender,
}

impl PluginType {
    /// Directory name used in the plugin search paths.
    pub fn directory(self) -> &'static str {
        match self {
            PluginType::OpenGl => "opengl",
            PluginType::XRender => "xrender",
        }
    }
}

impl fmt::Display for PluginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginType::OpenGl => write!(f, "OpenGL"),
            PluginType::XRender => write!(f, "XRender"),
        }
    }
}

/// A plugin request as given on the command line: `"name arg1 arg2"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginSpec {
    pub name: String,
    pub args: Vec<String>,
}

impl PluginSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }
}

impl FromStr for PluginSpec {
    type Err = PluginError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut words = s.split_whitespace().map(str::to_string);
        let name = words.next().ok_or_else(|| PluginError::InvalidArguments {
            name: String::new(),
            reason: "empty plugin specification".to_string(),
        })?;
        Ok(Self {
            name,
            args: words.collect(),
        })
    }
}

impl fmt::Display for PluginSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Window lifecycle callbacks shared by both backends.
///
/// Every callback has an empty default. Callbacks are never invoked for ignored windows.
pub trait BasePlugin<W> {
    /// Unique name; OpenGL plugins also use it as their shader entry point.
    fn plugin_name(&self) -> &str;

    fn window_circulated(&mut self, _screen: &ScreenInfo, _window: &W) {}

    fn window_created(&mut self, _screen: &ScreenInfo, _window: &W) {}

    fn window_damaged(&mut self, _screen: &ScreenInfo, _window: &W) {}

    /// Called while the window is still tracked, right before it is dropped.
    fn window_destroyed(&mut self, _screen: &ScreenInfo, _window: &W) {}

    fn window_mapped(&mut self, _screen: &ScreenInfo, _window: &W) {}

    fn window_property_changed(
        &mut self,
        _screen: &ScreenInfo,
        _window: &W,
        _property: Atom,
        _state: Property,
    ) {
    }

    fn window_reconfigured(&mut self, _screen: &ScreenInfo, _window: &W) {}

    fn window_shape_changed(&mut self, _screen: &ScreenInfo, _window: &W) {}

    fn window_unmapped(&mut self, _screen: &ScreenInfo, _window: &W) {}

    /// A root window property the screen caches has changed.
    fn root_property_changed(&mut self, _screen: &ScreenInfo, _property: Atom) {}

    fn screen_reconfigured(&mut self, _screen: &ScreenInfo) {}
}

/// Generates the two symbols the plugin loader looks up.
///
/// ```ignore
/// fbcompose::declare_plugin!(
///     fbcompose::plugin::PluginType::OpenGl,
///     dyn fbcompose::opengl::OpenGlPlugin,
///     MyPlugin::create
/// );
/// ```
///
/// `MyPlugin::create` must have the signature of a
/// [`PluginFactory`](crate::plugin::PluginFactory).
#[macro_export]
macro_rules! declare_plugin {
    ($plugin_type:expr, $plugin:ty, $constructor:path) => {
        #[no_mangle]
        #[allow(non_snake_case)]
        pub fn pluginType() -> $crate::plugin::PluginType {
            $plugin_type
        }

        #[no_mangle]
        #[allow(non_snake_case)]
        pub fn createPlugin(
            screen: &$crate::screen::ScreenInfo,
            args: &[String],
        ) -> ::std::result::Result<Box<$plugin>, $crate::error::PluginError> {
            $constructor(screen, args)
        }
    };
}
