//! In-memory [`XServer`] used by the screen and window unit tests.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use x11rb::protocol::damage::Damage;
use x11rb::protocol::xproto::{Atom, Pixmap, Window, WindowClass};

use super::{Atoms, WindowAttributes, XServer};
use crate::damage::Rect;
use crate::error::Result;

pub(crate) const ROOT: Window = 0x100;

pub(crate) fn test_atoms() -> Atoms {
    Atoms {
        _NET_ACTIVE_WINDOW: 1,
        _NET_CURRENT_DESKTOP: 2,
        _NET_NUMBER_OF_DESKTOPS: 3,
        _NET_WM_WINDOW_OPACITY: 4,
        _NET_WM_WINDOW_TYPE: 5,
        _NET_WM_WINDOW_TYPE_DESKTOP: 6,
        _NET_WM_WINDOW_TYPE_DIALOG: 7,
        _NET_WM_WINDOW_TYPE_DOCK: 8,
        _NET_WM_WINDOW_TYPE_MENU: 9,
        _NET_WM_WINDOW_TYPE_NORMAL: 10,
        _NET_WM_WINDOW_TYPE_SPLASH: 11,
        _NET_WM_WINDOW_TYPE_TOOLBAR: 12,
        _NET_WM_WINDOW_TYPE_UTILITY: 13,
        _XROOTPMAP_ID: 14,
        _XSETROOT_ID: 15,
        ESETROOT_PMAP_ID: 16,
        _FBCOMPOSE_CURRENT_ICONBAR_ITEM: 17,
        _FBCOMPOSE_RECONFIGURE_RECT: 18,
    }
}

pub(crate) fn attributes(x: i32, y: i32, width: u32, height: u32) -> WindowAttributes {
    WindowAttributes {
        x,
        y,
        width,
        height,
        border_width: 0,
        depth: 24,
        visual: 0x21,
        class: WindowClass::INPUT_OUTPUT,
        viewable: true,
    }
}

#[derive(Default)]
pub(crate) struct FakeServer {
    atoms: Option<Atoms>,
    pub windows: RefCell<HashMap<Window, WindowAttributes>>,
    pub children: RefCell<Vec<Window>>,
    pub properties: RefCell<HashMap<(Window, Atom), Vec<u32>>>,
    pub shapes: RefCell<HashMap<Window, Vec<Rect>>>,
    pub heads: RefCell<Option<Vec<Rect>>>,
    pub pointer: Cell<(i32, i32)>,
    next_id: Cell<u32>,
    pub named_pixmaps: RefCell<Vec<(Window, Pixmap)>>,
    pub freed_pixmaps: RefCell<Vec<Pixmap>>,
    pub destroyed_damage: RefCell<Vec<Damage>>,
    pub subtracted_damage: Cell<usize>,
}

impl FakeServer {
    pub fn new() -> Self {
        Self {
            atoms: Some(test_atoms()),
            next_id: Cell::new(0x1000),
            ..Self::default()
        }
    }

    /// Adds a child of the root window with the given attributes.
    pub fn add_window(&self, window: Window, attributes: WindowAttributes) {
        self.windows.borrow_mut().insert(window, attributes);
        self.children.borrow_mut().push(window);
    }

    pub fn set_property(&self, window: Window, atom: Atom, values: Vec<u32>) {
        self.properties.borrow_mut().insert((window, atom), values);
    }

    fn next_id(&self) -> u32 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }
}

impl XServer for FakeServer {
    fn atoms(&self) -> &Atoms {
        self.atoms.as_ref().expect("FakeServer::new sets the atoms")
    }

    fn window_attributes(&self, window: Window) -> Result<Option<WindowAttributes>> {
        Ok(self.windows.borrow().get(&window).copied())
    }

    fn query_tree(&self, _window: Window) -> Result<Vec<Window>> {
        Ok(self.children.borrow().clone())
    }

    fn property_u32(&self, window: Window, property: Atom) -> Result<Vec<u32>> {
        Ok(self
            .properties
            .borrow()
            .get(&(window, property))
            .cloned()
            .unwrap_or_default())
    }

    fn select_window_input(&self, _window: Window) -> Result<()> {
        Ok(())
    }

    fn create_damage(&self, _window: Window) -> Result<Damage> {
        Ok(self.next_id())
    }

    fn destroy_damage(&self, damage: Damage) {
        self.destroyed_damage.borrow_mut().push(damage);
    }

    fn subtract_damage(&self, _damage: Damage) -> Result<()> {
        self.subtracted_damage.set(self.subtracted_damage.get() + 1);
        Ok(())
    }

    fn name_window_pixmap(&self, window: Window) -> Result<Pixmap> {
        let pixmap = self.next_id();
        self.named_pixmaps.borrow_mut().push((window, pixmap));
        Ok(pixmap)
    }

    fn free_pixmap(&self, pixmap: Pixmap) {
        self.freed_pixmaps.borrow_mut().push(pixmap);
    }

    fn shape_rectangles(&self, window: Window) -> Result<Vec<Rect>> {
        if let Some(rects) = self.shapes.borrow().get(&window) {
            return Ok(rects.clone());
        }
        // Unshaped windows report their bordered bounds.
        Ok(self
            .windows
            .borrow()
            .get(&window)
            .map(|a| {
                let b = a.border_width;
                vec![Rect::new(-(b as i32), -(b as i32), a.width + 2 * b, a.height + 2 * b)]
            })
            .unwrap_or_default())
    }

    fn xinerama_heads(&self) -> Result<Option<Vec<Rect>>> {
        Ok(self.heads.borrow().clone())
    }

    fn pointer_position(&self, _root: Window) -> Result<(i32, i32)> {
        Ok(self.pointer.get())
    }
}
