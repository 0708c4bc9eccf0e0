//! Per-window compositing state
//!
//! [`BaseCompWindow`] holds everything the compositor knows about one top-level window:
//! geometry, visual information, opacity, the transient damaged/remapped/resized/
//! clip-shape-changed flags, the content pixmap and the clip shape. Backends wrap it in
//! their own window type and implement [`CompWindow`] to refresh GPU resources when the
//! contents change.
//!
//! The content pixmap is named through the Composite extension only while the window is
//! mapped, and only re-named after a resize or remap. Plain damage reuses the pixmap that
//! is already held.

use std::rc::Rc;

use log::{debug, trace};
use x11rb::protocol::damage::Damage;
use x11rb::protocol::xproto::{Atom, Pixmap, Property, Visualid, Window, WindowClass};

use crate::damage::Rect;
use crate::error::Result;
use crate::x11::{Atoms, XServer};

/// EWMH window type, used by effects to decide what to animate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WindowType {
    Desktop,
    Dialog,
    Dock,
    Menu,
    #[default]
    Normal,
    Splash,
    Toolbar,
    Utility,
}

impl WindowType {
    /// First recognized entry of a `_NET_WM_WINDOW_TYPE` list.
    pub fn from_atoms(atoms: &Atoms, values: &[u32]) -> Self {
        values
            .iter()
            .find_map(|&atom| match atom {
                a if a == atoms._NET_WM_WINDOW_TYPE_DESKTOP => Some(WindowType::Desktop),
                a if a == atoms._NET_WM_WINDOW_TYPE_DIALOG => Some(WindowType::Dialog),
                a if a == atoms._NET_WM_WINDOW_TYPE_DOCK => Some(WindowType::Dock),
                a if a == atoms._NET_WM_WINDOW_TYPE_MENU => Some(WindowType::Menu),
                a if a == atoms._NET_WM_WINDOW_TYPE_NORMAL => Some(WindowType::Normal),
                a if a == atoms._NET_WM_WINDOW_TYPE_SPLASH => Some(WindowType::Splash),
                a if a == atoms._NET_WM_WINDOW_TYPE_TOOLBAR => Some(WindowType::Toolbar),
                a if a == atoms._NET_WM_WINDOW_TYPE_UTILITY => Some(WindowType::Utility),
                _ => None,
            })
            .unwrap_or_default()
    }
}

/// Converts a `_NET_WM_WINDOW_OPACITY` cardinal to an 8-bit alpha.
pub fn opacity_from_cardinal(value: u32) -> u8 {
    ((value as u64 * 255) / 0xffff_ffff) as u8
}

/// What [`BaseCompWindow::update_contents`] refreshed, for backends to react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContentChanges {
    /// A new content pixmap was named.
    pub pixmap_changed: bool,
    /// The clip shape was re-read.
    pub shape_changed: bool,
    pub resized: bool,
    pub remapped: bool,
}

/// Backend-independent state of a composited window.
pub struct BaseCompWindow {
    server: Rc<dyn XServer>,
    id: Window,

    x: i32,
    y: i32,
    width: u32,
    height: u32,
    border_width: u32,

    depth: u8,
    visual: Visualid,
    class: WindowClass,
    window_type: WindowType,
    opacity: u8,

    is_ignored: bool,
    is_mapped: bool,
    is_damaged: bool,
    is_remapped: bool,
    is_resized: bool,
    clip_shape_changed: bool,

    damage: Damage,
    content_pixmap: Pixmap,
    clip_shape_rects: Vec<Rect>,
}

impl BaseCompWindow {
    /// Starts tracking `id`. A window that vanished already yields depth 0 and no
    /// server-side objects; the screen marks such windows ignored.
    pub fn new(server: Rc<dyn XServer>, id: Window) -> Result<Self> {
        let attributes = server.window_attributes(id)?;
        let mut window = Self {
            server,
            id,
            x: 0,
            y: 0,
            width: 0,
            height: 0,
            border_width: 0,
            depth: 0,
            visual: x11rb::NONE,
            class: WindowClass::INPUT_OUTPUT,
            window_type: WindowType::Normal,
            opacity: 255,
            is_ignored: false,
            is_mapped: false,
            is_damaged: false,
            is_remapped: false,
            is_resized: false,
            clip_shape_changed: true,
            damage: x11rb::NONE,
            content_pixmap: x11rb::NONE,
            clip_shape_rects: Vec::new(),
        };

        let Some(attributes) = attributes else {
            debug!("Window 0x{:x} disappeared before it could be tracked", id);
            return Ok(window);
        };

        window.x = attributes.x;
        window.y = attributes.y;
        window.width = attributes.width;
        window.height = attributes.height;
        window.border_width = attributes.border_width;
        window.depth = attributes.depth;
        window.visual = attributes.visual;
        window.class = attributes.class;

        if window.class == WindowClass::INPUT_OUTPUT {
            window.damage = window.server.create_damage(id)?;
        }
        window.server.select_window_input(id)?;

        let atoms = *window.server.atoms();
        window.update_property(atoms._NET_WM_WINDOW_OPACITY, Property::NEW_VALUE)?;
        window.update_property(atoms._NET_WM_WINDOW_TYPE, Property::NEW_VALUE)?;

        if attributes.viewable {
            window.set_mapped();
        }
        Ok(window)
    }

    pub fn id(&self) -> Window {
        self.id
    }

    pub fn server(&self) -> &Rc<dyn XServer> {
        &self.server
    }

    pub fn x(&self) -> i32 {
        self.x
    }

    pub fn y(&self) -> i32 {
        self.y
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn border_width(&self) -> u32 {
        self.border_width
    }

    /// Width including both borders
    pub fn real_width(&self) -> u32 {
        self.width + 2 * self.border_width
    }

    /// Height including both borders
    pub fn real_height(&self) -> u32 {
        self.height + 2 * self.border_width
    }

    /// Screen area covered by the window and its border
    pub fn bordered_rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.real_width(), self.real_height())
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn visual(&self) -> Visualid {
        self.visual
    }

    pub fn class(&self) -> WindowClass {
        self.class
    }

    pub fn window_type(&self) -> WindowType {
        self.window_type
    }

    pub fn opacity(&self) -> u8 {
        self.opacity
    }

    /// Opacity as a 0.0-1.0 factor
    pub fn alpha(&self) -> f32 {
        self.opacity as f32 / 255.0
    }

    pub fn is_ignored(&self) -> bool {
        self.is_ignored
    }

    pub fn set_ignored(&mut self, ignored: bool) {
        self.is_ignored = ignored;
    }

    pub fn is_mapped(&self) -> bool {
        self.is_mapped
    }

    pub fn is_damaged(&self) -> bool {
        self.is_damaged
    }

    pub fn is_remapped(&self) -> bool {
        self.is_remapped
    }

    pub fn is_resized(&self) -> bool {
        self.is_resized
    }

    pub fn clip_shape_changed(&self) -> bool {
        self.clip_shape_changed
    }

    pub fn content_pixmap(&self) -> Pixmap {
        self.content_pixmap
    }

    /// Clip shape, relative to the top-left corner of the border.
    pub fn clip_shape_rects(&self) -> &[Rect] {
        &self.clip_shape_rects
    }

    /// True unless the clip shape is exactly the bordered rectangle.
    pub fn is_shaped(&self) -> bool {
        let full = Rect::new(0, 0, self.real_width(), self.real_height());
        !(self.clip_shape_rects.len() == 1 && self.clip_shape_rects[0] == full)
    }

    pub fn set_damaged(&mut self) {
        self.is_damaged = true;
    }

    pub fn set_mapped(&mut self) {
        self.is_mapped = true;
        self.is_remapped = true;
        self.is_damaged = true;
    }

    pub fn set_unmapped(&mut self) {
        self.is_mapped = false;
    }

    pub fn set_clip_shape_changed(&mut self) {
        self.clip_shape_changed = true;
        self.is_damaged = true;
    }

    /// Applies a ConfigureNotify. A size change forces a new pixmap and clip shape.
    pub fn update_geometry(&mut self, x: i32, y: i32, width: u32, height: u32, border_width: u32) {
        if width != self.width || height != self.height || border_width != self.border_width {
            self.is_resized = true;
            self.clip_shape_changed = true;
            self.is_damaged = true;
        }
        self.x = x;
        self.y = y;
        self.width = width;
        self.height = height;
        self.border_width = border_width;
    }

    /// Re-reads a property the window state depends on. Unknown atoms are ignored.
    pub fn update_property(&mut self, property: Atom, state: Property) -> Result<()> {
        let atoms = *self.server.atoms();
        if property == atoms._NET_WM_WINDOW_OPACITY {
            self.opacity = if state == Property::DELETE {
                255
            } else {
                self.server
                    .property_u32(self.id, property)?
                    .first()
                    .map_or(255, |&v| opacity_from_cardinal(v))
            };
            trace!("Window 0x{:x} opacity {}", self.id, self.opacity);
        } else if property == atoms._NET_WM_WINDOW_TYPE {
            let values = if state == Property::DELETE {
                Vec::new()
            } else {
                self.server.property_u32(self.id, property)?
            };
            self.window_type = WindowType::from_atoms(&atoms, &values);
        }
        Ok(())
    }

    /// Brings the content pixmap and clip shape up to date and clears all transient flags.
    pub fn update_contents(&mut self) -> Result<ContentChanges> {
        let mut changes = ContentChanges {
            resized: self.is_resized,
            remapped: self.is_remapped,
            ..ContentChanges::default()
        };

        if self.is_mapped
            && self.class == WindowClass::INPUT_OUTPUT
            && (self.content_pixmap == x11rb::NONE || self.is_remapped || self.is_resized)
        {
            self.release_content_pixmap();
            self.content_pixmap = self.server.name_window_pixmap(self.id)?;
            changes.pixmap_changed = true;
        }

        if self.clip_shape_changed {
            self.update_shape()?;
            changes.shape_changed = true;
        }

        if self.damage != x11rb::NONE {
            self.server.subtract_damage(self.damage)?;
        }

        self.contents_updated();
        Ok(changes)
    }

    /// Puts back the flags an [`update_contents`](Self::update_contents) consumed when the
    /// backend could not use its result, so the next frame tries again.
    pub fn retry_contents(&mut self, changes: &ContentChanges) {
        self.is_damaged = true;
        self.clip_shape_changed |= changes.shape_changed;
    }

    fn contents_updated(&mut self) {
        self.is_damaged = false;
        self.is_remapped = false;
        self.is_resized = false;
        self.clip_shape_changed = false;
    }

    fn update_shape(&mut self) -> Result<()> {
        let border = self.border_width as i32;
        let (max_width, max_height) = (self.real_width(), self.real_height());
        self.clip_shape_rects = self
            .server
            .shape_rectangles(self.id)?
            .into_iter()
            .map(|r| {
                let r = r.translated(border, border);
                Rect::new(r.x, r.y, r.width.min(max_width), r.height.min(max_height))
            })
            .collect();
        Ok(())
    }

    fn release_content_pixmap(&mut self) {
        if self.content_pixmap != x11rb::NONE {
            self.server.free_pixmap(self.content_pixmap);
            self.content_pixmap = x11rb::NONE;
        }
    }
}

impl Drop for BaseCompWindow {
    fn drop(&mut self) {
        self.release_content_pixmap();
        if self.damage != x11rb::NONE {
            self.server.destroy_damage(self.damage);
        }
    }
}

impl std::fmt::Debug for BaseCompWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaseCompWindow")
            .field("id", &format_args!("0x{:x}", self.id))
            .field("geometry", &self.bordered_rect())
            .field("depth", &self.depth)
            .field("mapped", &self.is_mapped)
            .field("ignored", &self.is_ignored)
            .field("opacity", &self.opacity)
            .finish()
    }
}

/// A backend window built around a [`BaseCompWindow`].
pub trait CompWindow {
    fn base(&self) -> &BaseCompWindow;

    fn base_mut(&mut self) -> &mut BaseCompWindow;

    /// Refreshes the contents and everything the backend derives from them.
    fn update_contents(&mut self) -> Result<()> {
        self.base_mut().update_contents().map(|_| ())
    }

    fn update_geometry(&mut self, x: i32, y: i32, width: u32, height: u32, border_width: u32) {
        self.base_mut()
            .update_geometry(x, y, width, height, border_width);
    }

    fn update_property(&mut self, property: Atom, state: Property) -> Result<()> {
        self.base_mut().update_property(property, state)
    }
}
