use x11rb::protocol::xproto::{Atom, Pixmap, Window};

use crate::damage::Rect;
use crate::x11::Atoms;

/// How the head list is populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadMode {
    /// The whole screen is one head.
    Single,
    /// One head per Xinerama screen, falling back to a single head when inactive.
    Xinerama,
}

/// Where the desktop background comes from.
///
/// The pixmap named by a root property belongs to whoever set the property, so the
/// compositor only reads from it and never frees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RootPixmapSource {
    /// None of the background properties is set; backends draw black.
    #[default]
    Unset,
    Property { atom: Atom, pixmap: Pixmap },
}

impl RootPixmapSource {
    pub fn pixmap(&self) -> Option<Pixmap> {
        match *self {
            RootPixmapSource::Unset => None,
            RootPixmapSource::Property { pixmap, .. } => Some(pixmap),
        }
    }
}

/// Screen state visible to plugins.
#[derive(Debug, Clone)]
pub struct ScreenInfo {
    pub screen_number: usize,
    pub root: Window,
    pub width: u32,
    pub height: u32,
    pub atoms: Atoms,
    /// Monitor rectangles; never empty once heads were initialized.
    pub heads: Vec<Rect>,

    pub active_window: Window,
    pub current_workspace: u32,
    pub workspace_count: u32,
    /// Window whose iconbar button the pointer hovers, `NONE` if none.
    pub current_iconbar_item: Window,
    /// Outline the window manager draws while moving or resizing; empty when inactive.
    pub reconfigure_rect: Rect,
    pub root_pixmap: RootPixmapSource,
}

impl ScreenInfo {
    pub fn new(screen_number: usize, root: Window, width: u32, height: u32, atoms: Atoms) -> Self {
        Self {
            screen_number,
            root,
            width,
            height,
            atoms,
            heads: vec![Rect::new(0, 0, width, height)],
            active_window: x11rb::NONE,
            current_workspace: 0,
            workspace_count: 0,
            current_iconbar_item: x11rb::NONE,
            reconfigure_rect: Rect::default(),
            root_pixmap: RootPixmapSource::Unset,
        }
    }

    pub fn screen_rect(&self) -> Rect {
        Rect::new(0, 0, self.width, self.height)
    }

    /// The head containing the point, or the first head if none does.
    pub fn head_at(&self, x: i32, y: i32) -> Rect {
        self.heads
            .iter()
            .find(|head| head.contains_point(x, y))
            .or_else(|| self.heads.first())
            .copied()
            .unwrap_or_else(|| self.screen_rect())
    }
}
