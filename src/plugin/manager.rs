//! Plugin library loading and instantiation.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use libloading::Library;
use log::{debug, info};

use super::{PluginSpec, PluginType};
use crate::error::PluginError;
use crate::screen::ScreenInfo;

/// Constructor exported by a plugin library as `createPlugin`.
pub type PluginFactory<P> = fn(&ScreenInfo, &[String]) -> Result<Box<P>, PluginError>;

type PluginTypeFn = fn() -> PluginType;

const PLUGIN_TYPE_SYMBOL: &[u8] = b"pluginType\0";
const CREATE_PLUGIN_SYMBOL: &[u8] = b"createPlugin\0";

/// Directories searched for `<backend>/lib<name>.so`, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginSearchPaths {
    pub build_dir: Option<PathBuf>,
    pub user_dir: Option<PathBuf>,
    pub prefix_dir: Option<PathBuf>,
}

impl Default for PluginSearchPaths {
    fn default() -> Self {
        let prefix = option_env!("FBCOMPOSE_PREFIX").unwrap_or("/usr/local");
        Self {
            build_dir: Some(PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("plugins")),
            user_dir: env::var_os("HOME")
                .map(|home| PathBuf::from(home).join(".fluxbox/fbcompose/plugins")),
            prefix_dir: Some(PathBuf::from(prefix).join("lib/fbcompose/plugins")),
        }
    }
}

impl PluginSearchPaths {
    /// Every path tried for `name`, ending with the bare file name for the system loader.
    pub fn candidates(&self, name: &str, plugin_type: PluginType) -> Vec<PathBuf> {
        let file_name = format!("lib{}.so", name);
        [&self.build_dir, &self.user_dir, &self.prefix_dir]
            .into_iter()
            .flatten()
            .map(|dir| dir.join(plugin_type.directory()).join(&file_name))
            .chain(std::iter::once(PathBuf::from(&file_name)))
            .collect()
    }
}

/// A plugin library, either built in or opened from disk.
struct PluginLibrary<P: ?Sized> {
    create: PluginFactory<P>,
    // Kept open for as long as plugins created from it may exist.
    _library: Option<Library>,
}

/// Loads plugin libraries for one backend and owns the plugins created from them.
pub struct PluginManager<P: ?Sized> {
    plugins: Vec<Box<P>>,
    libraries: HashMap<String, PluginLibrary<P>>,
    plugin_type: PluginType,
    search_paths: PluginSearchPaths,
}

impl<P: ?Sized> PluginManager<P> {
    pub fn new(plugin_type: PluginType, search_paths: PluginSearchPaths) -> Self {
        Self {
            plugins: Vec::new(),
            libraries: HashMap::new(),
            plugin_type,
            search_paths,
        }
    }

    pub fn plugin_type(&self) -> PluginType {
        self.plugin_type
    }

    /// Registers a plugin compiled into the binary. Naming it never touches the filesystem.
    pub fn register_builtin(&mut self, name: &str, create: PluginFactory<P>) {
        self.libraries.insert(
            name.to_string(),
            PluginLibrary {
                create,
                _library: None,
            },
        );
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.libraries.contains_key(name)
    }

    /// Creates one plugin per spec, in order. On failure none of them is kept.
    pub fn create_plugins(
        &mut self,
        specs: &[PluginSpec],
        screen: &ScreenInfo,
    ) -> Result<(), PluginError> {
        let mut created = Vec::with_capacity(specs.len());
        for spec in specs {
            let create = self.load_library(&spec.name)?;
            created.push(create(screen, &spec.args)?);
            info!("🧩 Plugin '{}' created", spec);
        }
        self.plugins.extend(created);
        Ok(())
    }

    /// Creates a single plugin and appends it.
    pub fn create_plugin(&mut self, spec: &PluginSpec, screen: &ScreenInfo) -> Result<(), PluginError> {
        self.create_plugins(std::slice::from_ref(spec), screen)
    }

    pub fn plugins(&self) -> &[Box<P>] {
        &self.plugins
    }

    pub fn plugins_mut(&mut self) -> &mut [Box<P>] {
        &mut self.plugins
    }

    fn load_library(&mut self, name: &str) -> Result<PluginFactory<P>, PluginError> {
        if let Some(library) = self.libraries.get(name) {
            return Ok(library.create);
        }

        let candidates = self.search_paths.candidates(name, self.plugin_type);
        let (path, library) = candidates
            .iter()
            .find_map(|path| {
                // SAFETY: plugin libraries run arbitrary initializers; loading one is an
                // explicit request by the user.
                match unsafe { Library::new(path) } {
                    Ok(library) => Some((path.clone(), library)),
                    Err(e) => {
                        debug!("Plugin '{}' not at {}: {}", name, path.display(), e);
                        None
                    }
                }
            })
            .ok_or_else(|| PluginError::NotFound {
                name: name.to_string(),
                tried: candidates.clone(),
            })?;

        // SAFETY: the symbol types are the ones `declare_plugin!` generates.
        let plugin_type: PluginTypeFn = unsafe { library.get::<PluginTypeFn>(PLUGIN_TYPE_SYMBOL) }
            .map(|symbol| *symbol)
            .map_err(|e| PluginError::MissingSymbol {
                name: name.to_string(),
                symbol: "pluginType",
                reason: e.to_string(),
            })?;

        let found = plugin_type();
        if found != self.plugin_type {
            return Err(PluginError::TypeMismatch {
                name: name.to_string(),
                expected: self.plugin_type.to_string(),
                found: found.to_string(),
            });
        }

        let create: PluginFactory<P> =
            unsafe { library.get::<PluginFactory<P>>(CREATE_PLUGIN_SYMBOL) }
                .map(|symbol| *symbol)
                .map_err(|e| PluginError::MissingSymbol {
                    name: name.to_string(),
                    symbol: "createPlugin",
                    reason: e.to_string(),
                })?;

        info!("📦 Loaded plugin library {}", path.display());
        self.libraries.insert(
            name.to_string(),
            PluginLibrary {
                create,
                _library: Some(library),
            },
        );
        Ok(create)
    }
}

impl<P: ?Sized> Drop for PluginManager<P> {
    fn drop(&mut self) {
        // Plugin code lives in the libraries, so the objects must go first.
        self.plugins.clear();
        self.libraries.clear();
    }
}
