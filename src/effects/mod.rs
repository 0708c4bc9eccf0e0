//! Built-in effect plugins
//!
//! The effects ship inside the compositor binary. Each screen's plugin manager knows
//! them as already-loaded libraries, so `-p fade` never touches the filesystem while
//! other names still go through the plugin search path.

pub mod fade;
pub mod preview;

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use x11rb::protocol::xproto::Window;

use crate::opengl::OpenGlPlugin;
use crate::plugin::PluginManager;
use crate::xrender::XRenderPlugin;

/// Names of the built-in plugins, for `--help` and error messages.
pub const BUILTIN_PLUGINS: [&str; 2] = [fade::PLUGIN_NAME, preview::PLUGIN_NAME];

pub fn register_opengl_builtins(manager: &mut PluginManager<dyn OpenGlPlugin>) {
    manager.register_builtin(fade::PLUGIN_NAME, fade::OpenGlFadePlugin::create);
    manager.register_builtin(preview::PLUGIN_NAME, preview::OpenGlPreviewPlugin::create);
}

pub fn register_xrender_builtins(manager: &mut PluginManager<dyn XRenderPlugin>) {
    manager.register_builtin(fade::PLUGIN_NAME, fade::XRenderFadePlugin::create);
    manager.register_builtin(preview::PLUGIN_NAME, preview::XRenderPreviewPlugin::create);
}

/// Per-window server resources kept across frames. An entry is rebuilt only when it was
/// made for a different key, usually the size it was allocated with.
#[derive(Debug)]
pub struct ResourceCache<K, T> {
    entries: HashMap<Window, (K, T)>,
}

impl<K, T> Default for ResourceCache<K, T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K: PartialEq, T> ResourceCache<K, T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_insert_with(&mut self, window: Window, key: K, create: impl FnOnce() -> T) -> &T {
        match self.get_or_try_insert_with(window, key, || Ok::<T, std::convert::Infallible>(create())) {
            Ok(resource) => resource,
            Err(never) => match never {},
        }
    }

    pub fn get_or_try_insert_with<E>(
        &mut self,
        window: Window,
        key: K,
        create: impl FnOnce() -> Result<T, E>,
    ) -> Result<&T, E> {
        match self.entries.entry(window) {
            Entry::Occupied(mut entry) => {
                if entry.get().0 != key {
                    entry.insert((key, create()?));
                }
                Ok(&entry.into_mut().1)
            }
            Entry::Vacant(entry) => Ok(&entry.insert((key, create()?)).1),
        }
    }

    /// Drops the resources of every window `keep` rejects.
    pub fn retain(&mut self, mut keep: impl FnMut(Window) -> bool) {
        self.entries.retain(|window, _| keep(*window));
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::plugin::{PluginSearchPaths, PluginType};

    fn no_paths() -> PluginSearchPaths {
        PluginSearchPaths {
            build_dir: None,
            user_dir: None,
            prefix_dir: None,
        }
    }

    #[test]
    fn test_builtins_are_registered_for_both_backends() {
        let mut opengl = PluginManager::<dyn OpenGlPlugin>::new(PluginType::OpenGl, no_paths());
        register_opengl_builtins(&mut opengl);
        let mut xrender = PluginManager::<dyn XRenderPlugin>::new(PluginType::XRender, no_paths());
        register_xrender_builtins(&mut xrender);

        for name in BUILTIN_PLUGINS {
            assert!(opengl.is_loaded(name));
            assert!(xrender.is_loaded(name));
        }
    }

    #[test]
    fn test_resource_reused_while_key_is_unchanged() {
        let created = Cell::new(0);
        let create = || {
            created.set(created.get() + 1);
            created.get()
        };
        let mut cache = ResourceCache::new();

        assert_eq!(*cache.get_or_insert_with(0x10, (100, 50), create), 1);
        assert_eq!(*cache.get_or_insert_with(0x10, (100, 50), create), 1);
        assert_eq!(*cache.get_or_insert_with(0x20, (100, 50), create), 2);
        assert_eq!(*cache.get_or_insert_with(0x10, (120, 50), create), 3);
        assert_eq!(created.get(), 3);
    }

    #[test]
    fn test_failed_creation_keeps_nothing_new() {
        let mut cache: ResourceCache<u32, u32> = ResourceCache::new();
        let result = cache.get_or_try_insert_with(0x10, 1, || Err("no pixmap"));
        assert_eq!(result, Err("no pixmap"));

        let resource = cache.get_or_try_insert_with(0x10, 1, || Ok::<_, &str>(7));
        assert_eq!(resource, Ok(&7));
    }

    #[test]
    fn test_retain_drops_other_windows() {
        let created = Cell::new(0);
        let create = || {
            created.set(created.get() + 1);
            created.get()
        };
        let mut cache = ResourceCache::new();
        cache.get_or_insert_with(0x10, 1, create);
        cache.get_or_insert_with(0x20, 1, create);

        cache.retain(|window| window == 0x20);
        assert_eq!(*cache.get_or_insert_with(0x20, 1, create), 2);
        assert_eq!(*cache.get_or_insert_with(0x10, 1, create), 3);
    }
}
