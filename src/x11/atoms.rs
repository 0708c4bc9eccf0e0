//! Atoms interned once per connection.
//!
//! The struct is created when the connection is opened and copied into every
//! [`ScreenInfo`](crate::screen::ScreenInfo), so nothing in the crate keeps a process-wide
//! atom cache.

use x11rb::protocol::xproto::Atom;

x11rb::atom_manager! {
    pub Atoms: AtomsCookie {
        _NET_ACTIVE_WINDOW,
        _NET_CURRENT_DESKTOP,
        _NET_NUMBER_OF_DESKTOPS,
        _NET_WM_WINDOW_OPACITY,
        _NET_WM_WINDOW_TYPE,
        _NET_WM_WINDOW_TYPE_DESKTOP,
        _NET_WM_WINDOW_TYPE_DIALOG,
        _NET_WM_WINDOW_TYPE_DOCK,
        _NET_WM_WINDOW_TYPE_MENU,
        _NET_WM_WINDOW_TYPE_NORMAL,
        _NET_WM_WINDOW_TYPE_SPLASH,
        _NET_WM_WINDOW_TYPE_TOOLBAR,
        _NET_WM_WINDOW_TYPE_UTILITY,
        _XROOTPMAP_ID,
        _XSETROOT_ID,
        ESETROOT_PMAP_ID,
        _FBCOMPOSE_CURRENT_ICONBAR_ITEM,
        _FBCOMPOSE_RECONFIGURE_RECT,
    }
}

impl Atoms {
    /// Root properties that may carry the desktop background pixmap, in lookup order.
    pub fn background_atoms(&self) -> [Atom; 3] {
        [self._XROOTPMAP_ID, self.ESETROOT_PMAP_ID, self._XSETROOT_ID]
    }

    pub fn is_background_atom(&self, atom: Atom) -> bool {
        self.background_atoms().contains(&atom)
    }
}
