//! Backend-independent screen state
//!
//! A [`BaseScreen`] is the single source of truth for one X screen: the tracked windows in
//! stacking order (bottom to top), the ignore list, the accumulated damage, the head list
//! and the cached root window properties. Backends wrap it, supply a window factory, and
//! implement [`Screen`] so the compositor can drive either backend through one interface.
//!
//! Every event operation looks the window up by XID. Events about windows the screen does
//! not track are logged and dropped, since clients routinely destroy windows before their
//! events are processed.

mod info;

pub use info::{HeadMode, RootPixmapSource, ScreenInfo};

use std::rc::Rc;

use log::{debug, info, trace};
use x11rb::protocol::xproto::{Atom, Place, Property, Window, WindowClass};
use x11rb::protocol::Event;

use crate::damage::{Rect, ScreenDamage};
use crate::error::Result;
use crate::plugin::{BasePlugin, PluginManager, PluginSpec};
use crate::window::CompWindow;
use crate::x11::XServer;

/// Builds the backend window object for a newly tracked XID.
pub type WindowFactory<W> = Box<dyn Fn(&Rc<dyn XServer>, Window) -> Result<W>>;

/// The interface the compositor drives each screen through.
pub trait Screen {
    fn info(&self) -> &ScreenInfo;

    /// Whether events about `window` belong to this screen.
    fn manages(&self, window: Window) -> bool;

    fn add_to_ignore_list(&mut self, window: Window);

    fn init_plugins(&mut self, specs: &[PluginSpec]) -> Result<()>;

    fn init_windows(&mut self) -> Result<()>;

    fn update_heads(&mut self, mode: HeadMode) -> Result<()>;

    fn handle_event(&mut self, event: &Event) -> Result<()>;

    fn render_screen(&mut self) -> Result<()>;

    fn clear_screen_damage(&mut self);
}

/// Runs `upload` with the current background only if the root pixmap changed since the
/// last call. Returns whether it ran.
pub(crate) fn refresh_background<W, P, F>(base: &mut BaseScreen<W, P>, upload: F) -> Result<bool>
where
    W: CompWindow,
    P: BasePlugin<W> + ?Sized,
    F: FnOnce(&ScreenInfo) -> Result<()>,
{
    if !base.take_root_pixmap_changed() {
        return Ok(false);
    }
    upload(base.info())?;
    Ok(true)
}

/// Window list, damage and property cache shared by both backends.
pub struct BaseScreen<W, P: ?Sized> {
    server: Rc<dyn XServer>,
    pub(crate) info: ScreenInfo,
    pub(crate) windows: Vec<W>,
    ignore_list: Vec<Window>,
    damage: ScreenDamage,
    pub(crate) plugin_manager: PluginManager<P>,
    create_window_object: WindowFactory<W>,
    root_pixmap_changed: bool,
    resized: bool,
}

impl<W, P> BaseScreen<W, P>
where
    W: CompWindow,
    P: BasePlugin<W> + ?Sized,
{
    pub fn new(
        server: Rc<dyn XServer>,
        info: ScreenInfo,
        plugin_manager: PluginManager<P>,
        create_window_object: WindowFactory<W>,
    ) -> Result<Self> {
        let mut screen = Self {
            server,
            info,
            windows: Vec::new(),
            ignore_list: Vec::new(),
            damage: ScreenDamage::new(),
            plugin_manager,
            create_window_object,
            root_pixmap_changed: false,
            resized: false,
        };
        screen.read_root_properties()?;
        screen.damage_whole_screen();
        Ok(screen)
    }

    pub fn info(&self) -> &ScreenInfo {
        &self.info
    }

    pub fn server(&self) -> &Rc<dyn XServer> {
        &self.server
    }

    /// Tracked windows, bottom to top.
    pub fn windows(&self) -> &[W] {
        &self.windows
    }

    pub fn window(&self, window: Window) -> Option<&W> {
        self.windows.iter().find(|w| w.base().id() == window)
    }

    pub fn plugin_manager(&self) -> &PluginManager<P> {
        &self.plugin_manager
    }

    pub fn damage(&self) -> &ScreenDamage {
        &self.damage
    }

    pub fn is_tracked(&self, window: Window) -> bool {
        self.position(window).is_some()
    }

    pub fn manages(&self, window: Window) -> bool {
        window == self.info.root || self.is_tracked(window) || self.ignore_list.contains(&window)
    }

    /// Excludes a window from rendering and plugin callbacks.
    pub fn add_to_ignore_list(&mut self, window: Window) {
        if !self.ignore_list.contains(&window) {
            self.ignore_list.push(window);
        }
        if let Some(index) = self.position(window) {
            self.windows[index].base_mut().set_ignored(true);
        }
    }

    /// True once after the background pixmap property changed.
    pub fn take_root_pixmap_changed(&mut self) -> bool {
        std::mem::take(&mut self.root_pixmap_changed)
    }

    /// True once after the root window was resized.
    pub fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.resized)
    }

    //--- Initialization ---------------------------------------------------

    /// Instantiates the requested plugins; on failure no plugin from this call survives.
    pub fn init_plugins(&mut self, specs: &[PluginSpec]) -> Result<()> {
        self.plugin_manager.create_plugins(specs, &self.info)?;
        Ok(())
    }

    /// Starts tracking every existing child of the root window.
    pub fn init_windows(&mut self) -> Result<()> {
        let children = self.server.query_tree(self.info.root)?;
        for window in children {
            self.create_window(window)?;
        }
        debug!(
            "Screen {}: tracking {} windows",
            self.info.screen_number,
            self.windows.len()
        );
        Ok(())
    }

    /// Replaces the head list.
    pub fn update_heads(&mut self, mode: HeadMode) -> Result<()> {
        let single = vec![self.info.screen_rect()];
        self.info.heads = match mode {
            HeadMode::Single => single,
            HeadMode::Xinerama => self
                .server
                .xinerama_heads()?
                .filter(|heads| !heads.is_empty())
                .unwrap_or(single),
        };
        info!(
            "🖥️ Screen {}: {} head(s)",
            self.info.screen_number,
            self.info.heads.len()
        );
        Ok(())
    }

    //--- Damage -----------------------------------------------------------

    pub fn damage_screen_area(&mut self, area: Rect) {
        let clipped = area.intersection(&self.info.screen_rect());
        if let Some(rect) = clipped {
            self.damage.add(rect);
        }
    }

    pub fn damage_whole_screen(&mut self) {
        self.damage.clear();
        self.damage.add(self.info.screen_rect());
    }

    pub fn clear_screen_damage(&mut self) {
        self.damage.clear();
    }

    fn damage_window_area(&mut self, index: usize) {
        let base = self.windows[index].base();
        if !base.is_ignored() {
            let area = base.bordered_rect();
            self.damage_screen_area(area);
        }
    }

    //--- Event operations -------------------------------------------------

    /// Dispatches one X event. Unrelated events are ignored.
    pub fn handle_event(&mut self, event: &Event) -> Result<()> {
        match event {
            Event::CirculateNotify(e) => self.circulate_window(e.window, e.place),
            Event::ConfigureNotify(e) => self.reconfigure_window(
                e.window,
                Rect::new(e.x as i32, e.y as i32, e.width as u32, e.height as u32),
                e.border_width as u32,
                e.above_sibling,
            ),
            Event::CreateNotify(e) if e.parent == self.info.root => self.create_window(e.window),
            Event::DestroyNotify(e) => self.destroy_window(e.window),
            Event::Expose(_) => {
                self.damage_whole_screen();
                Ok(())
            }
            Event::MapNotify(e) => self.map_window(e.window),
            Event::UnmapNotify(e) => self.unmap_window(e.window),
            Event::PropertyNotify(e) => self.update_window_property(e.window, e.atom, e.state),
            Event::ReparentNotify(e) => self.reparent_window(e.window, e.parent),
            Event::DamageNotify(e) => self.damage_window(e.drawable),
            Event::ShapeNotify(e) => self.update_shape(e.affected_window),
            _ => {
                trace!("Screen {}: unhandled event {:?}", self.info.screen_number, event);
                Ok(())
            }
        }
    }

    /// Moves a window to the top or bottom of the stack.
    pub fn circulate_window(&mut self, window: Window, place: Place) -> Result<()> {
        let Some(index) = self.tracked_index(window, "circulate") else {
            return Ok(());
        };
        let tracked = self.windows.remove(index);
        let index = if place == Place::ON_BOTTOM {
            self.windows.insert(0, tracked);
            0
        } else {
            self.windows.push(tracked);
            self.windows.len() - 1
        };
        self.damage_window_area(index);
        self.notify(index, |plugin, info, window| plugin.window_circulated(info, window));
        Ok(())
    }

    /// Starts tracking a window, placing it on top of the stack.
    pub fn create_window(&mut self, window: Window) -> Result<()> {
        if window == self.info.root || self.is_tracked(window) {
            trace!("Window 0x{:x} already tracked", window);
            return Ok(());
        }

        let mut created = (self.create_window_object)(&self.server, window)?;
        {
            let base = created.base_mut();
            if base.depth() == 0
                || base.class() == WindowClass::INPUT_ONLY
                || self.ignore_list.contains(&window)
            {
                base.set_ignored(true);
            }
        }
        debug!("Tracking window {:?}", created.base());
        self.windows.push(created);

        let index = self.windows.len() - 1;
        self.notify(index, |plugin, info, window| plugin.window_created(info, window));
        if self.windows[index].base().is_mapped() {
            self.damage_window_area(index);
        }
        Ok(())
    }

    /// Marks a window's contents as changed.
    pub fn damage_window(&mut self, window: Window) -> Result<()> {
        let Some(index) = self.tracked_index(window, "damage") else {
            return Ok(());
        };
        self.windows[index].base_mut().set_damaged();
        self.damage_window_area(index);
        self.notify(index, |plugin, info, window| plugin.window_damaged(info, window));
        Ok(())
    }

    pub fn destroy_window(&mut self, window: Window) -> Result<()> {
        let Some(index) = self.tracked_index(window, "destroy") else {
            return Ok(());
        };
        if self.windows[index].base().is_mapped() {
            self.damage_window_area(index);
        }
        self.notify(index, |plugin, info, window| plugin.window_destroyed(info, window));
        let removed = self.windows.remove(index);
        debug!("Stopped tracking window {:?}", removed.base());
        Ok(())
    }

    pub fn map_window(&mut self, window: Window) -> Result<()> {
        let Some(index) = self.tracked_index(window, "map") else {
            return Ok(());
        };
        self.windows[index].base_mut().set_mapped();
        self.damage_window_area(index);
        self.notify(index, |plugin, info, window| plugin.window_mapped(info, window));
        Ok(())
    }

    pub fn unmap_window(&mut self, window: Window) -> Result<()> {
        let Some(index) = self.tracked_index(window, "unmap") else {
            return Ok(());
        };
        self.damage_window_area(index);
        self.windows[index].base_mut().set_unmapped();
        self.notify(index, |plugin, info, window| plugin.window_unmapped(info, window));
        Ok(())
    }

    /// Applies a ConfigureNotify: new geometry and a new position in the stack, directly
    /// above `above_sibling` (or at the bottom when that is `NONE`).
    pub fn reconfigure_window(
        &mut self,
        window: Window,
        geometry: Rect,
        border_width: u32,
        above_sibling: Window,
    ) -> Result<()> {
        if window == self.info.root {
            self.resize_screen(geometry.width, geometry.height);
            return Ok(());
        }
        let Some(index) = self.tracked_index(window, "reconfigure") else {
            return Ok(());
        };

        self.damage_window_area(index);
        self.windows[index].update_geometry(
            geometry.x,
            geometry.y,
            geometry.width,
            geometry.height,
            border_width,
        );
        let index = self.restack(index, above_sibling);
        self.damage_window_area(index);
        self.notify(index, |plugin, info, window| plugin.window_reconfigured(info, window));
        Ok(())
    }

    /// Reparenting onto the root starts tracking a window, reparenting elsewhere stops it.
    pub fn reparent_window(&mut self, window: Window, parent: Window) -> Result<()> {
        if parent == self.info.root {
            self.create_window(window)
        } else if self.is_tracked(window) {
            self.destroy_window(window)
        } else {
            Ok(())
        }
    }

    pub fn update_shape(&mut self, window: Window) -> Result<()> {
        let Some(index) = self.tracked_index(window, "shape") else {
            return Ok(());
        };
        self.windows[index].base_mut().set_clip_shape_changed();
        self.damage_window_area(index);
        self.notify(index, |plugin, info, window| plugin.window_shape_changed(info, window));
        Ok(())
    }

    pub fn update_window_property(
        &mut self,
        window: Window,
        property: Atom,
        state: Property,
    ) -> Result<()> {
        if window == self.info.root {
            return self.update_root_property(property);
        }
        let Some(index) = self.tracked_index(window, "property") else {
            return Ok(());
        };

        self.windows[index].update_property(property, state)?;
        if property == self.info.atoms._NET_WM_WINDOW_OPACITY {
            self.damage_window_area(index);
        }
        self.notify(index, |plugin, info, window| {
            plugin.window_property_changed(info, window, property, state)
        });
        Ok(())
    }

    //--- Internals --------------------------------------------------------

    fn position(&self, window: Window) -> Option<usize> {
        self.windows.iter().position(|w| w.base().id() == window)
    }

    fn tracked_index(&self, window: Window, operation: &str) -> Option<usize> {
        let index = self.position(window);
        if index.is_none() {
            debug!(
                "Screen {}: {} event for untracked window 0x{:x}",
                self.info.screen_number, operation, window
            );
        }
        index
    }

    /// Moves the window at `index` directly above `above_sibling`, returning its new index.
    fn restack(&mut self, index: usize, above_sibling: Window) -> usize {
        let window = self.windows.remove(index);
        let new_index = if above_sibling == x11rb::NONE {
            0
        } else {
            self.position(above_sibling).map_or_else(
                || {
                    trace!(
                        "Screen {}: sibling 0x{:x} of 0x{:x} is untracked, placing it on top",
                        self.info.screen_number,
                        above_sibling,
                        window.base().id()
                    );
                    self.windows.len()
                },
                |sibling| sibling + 1,
            )
        };
        self.windows.insert(new_index, window);
        new_index
    }

    /// Invokes `callback` on every plugin, unless the window is ignored.
    fn notify(&mut self, index: usize, mut callback: impl FnMut(&mut P, &ScreenInfo, &W)) {
        let window = &self.windows[index];
        if window.base().is_ignored() {
            return;
        }
        for plugin in self.plugin_manager.plugins_mut() {
            callback(plugin.as_mut(), &self.info, window);
        }
    }

    fn resize_screen(&mut self, width: u32, height: u32) {
        if width == self.info.width && height == self.info.height {
            return;
        }
        info!(
            "📐 Screen {} resized to {}x{}",
            self.info.screen_number, width, height
        );
        self.info.width = width;
        self.info.height = height;
        self.resized = true;
        // Background tiles are positioned relative to the screen size.
        self.root_pixmap_changed = true;
        self.damage_whole_screen();
        for plugin in self.plugin_manager.plugins_mut() {
            plugin.screen_reconfigured(&self.info);
        }
    }

    fn read_root_properties(&mut self) -> Result<()> {
        let atoms = self.info.atoms;
        for atom in [
            atoms._NET_ACTIVE_WINDOW,
            atoms._NET_CURRENT_DESKTOP,
            atoms._NET_NUMBER_OF_DESKTOPS,
            atoms._FBCOMPOSE_CURRENT_ICONBAR_ITEM,
            atoms._FBCOMPOSE_RECONFIGURE_RECT,
        ] {
            self.read_root_property(atom)?;
        }
        self.read_root_pixmap()?;
        self.root_pixmap_changed = true;
        Ok(())
    }

    fn update_root_property(&mut self, property: Atom) -> Result<()> {
        let atoms = self.info.atoms;
        if atoms.is_background_atom(property) {
            self.read_root_pixmap()?;
            self.root_pixmap_changed = true;
            self.damage_whole_screen();
        } else if property == atoms._FBCOMPOSE_RECONFIGURE_RECT {
            let old = self.info.reconfigure_rect;
            self.read_root_property(property)?;
            let new = self.info.reconfigure_rect;
            self.damage_screen_area(old);
            self.damage_screen_area(new);
        } else if !self.read_root_property(property)? {
            return Ok(());
        }

        for plugin in self.plugin_manager.plugins_mut() {
            plugin.root_property_changed(&self.info, property);
        }
        Ok(())
    }

    /// Refreshes one cached root property. Returns false for properties that are not cached.
    fn read_root_property(&mut self, property: Atom) -> Result<bool> {
        let atoms = self.info.atoms;
        let first = |values: Vec<u32>| values.first().copied().unwrap_or(0);

        if property == atoms._NET_ACTIVE_WINDOW {
            self.info.active_window = first(self.root_values(property)?);
        } else if property == atoms._NET_CURRENT_DESKTOP {
            self.info.current_workspace = first(self.root_values(property)?);
        } else if property == atoms._NET_NUMBER_OF_DESKTOPS {
            self.info.workspace_count = first(self.root_values(property)?);
        } else if property == atoms._FBCOMPOSE_CURRENT_ICONBAR_ITEM {
            self.info.current_iconbar_item = first(self.root_values(property)?);
        } else if property == atoms._FBCOMPOSE_RECONFIGURE_RECT {
            let values = self.root_values(property)?;
            self.info.reconfigure_rect = match values[..] {
                [x, y, width, height, ..] => Rect::new(x as i32, y as i32, width, height),
                _ => Rect::default(),
            };
        } else {
            return Ok(false);
        }
        Ok(true)
    }

    fn read_root_pixmap(&mut self) -> Result<()> {
        let mut source = RootPixmapSource::Unset;
        for atom in self.info.atoms.background_atoms() {
            let pixmap = self.root_values(atom)?.first().copied().unwrap_or(0);
            if pixmap != x11rb::NONE {
                source = RootPixmapSource::Property { atom, pixmap };
                break;
            }
        }
        debug!("Screen {}: background {:?}", self.info.screen_number, source);
        self.info.root_pixmap = source;
        Ok(())
    }

    fn root_values(&self, property: Atom) -> Result<Vec<u32>> {
        self.server.property_u32(self.info.root, property)
    }
}

#[cfg(test)]
mod tests;
