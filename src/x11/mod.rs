//! X11 connection layer
//!
//! [`XConnection`] wraps the x11rb connection together with the interned atoms and the
//! error policy. The [`XServer`] trait lists every request that the backend-independent
//! core (screens and windows) issues, which lets those parts run against a fake server in
//! tests. Backends reach for [`XConnection::conn`] directly for rendering requests.

mod atoms;
#[cfg(test)]
pub(crate) mod testing;

pub use atoms::{Atoms, AtomsCookie};

use log::{debug, info, warn};
use x11rb::connection::{Connection, RequestConnection};
use x11rb::errors::ReplyError;
use x11rb::protocol::composite::ConnectionExt as _;
use x11rb::protocol::damage::{self, ConnectionExt as _};
use x11rb::protocol::shape::{self, ConnectionExt as _};
use x11rb::protocol::xfixes::ConnectionExt as _;
use x11rb::protocol::xinerama::ConnectionExt as _;
use x11rb::protocol::xproto::{
    Atom, AtomEnum, ChangeWindowAttributesAux, ConnectionExt as _, EventMask, MapState, Pixmap,
    Visualid, Window, WindowClass,
};
use x11rb::protocol::render::ConnectionExt as _;
use x11rb::protocol::{composite, render, xfixes, xinerama};
use x11rb::rust_connection::RustConnection;
use x11rb::x11_utils::X11Error;

use crate::damage::Rect;
use crate::error::{CompositorError, Result};

/// Attributes of a window as read when it starts being tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowAttributes {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub border_width: u32,
    pub depth: u8,
    pub visual: Visualid,
    pub class: WindowClass,
    pub viewable: bool,
}

/// What to do with X protocol errors delivered through the event queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XErrorPolicy {
    /// Drop them silently.
    Ignore,
    /// Log them and carry on.
    Log,
}

/// Requests issued by [`BaseScreen`](crate::screen::BaseScreen) and
/// [`BaseCompWindow`](crate::window::BaseCompWindow).
pub trait XServer {
    fn atoms(&self) -> &Atoms;

    /// Returns `None` if the window no longer exists.
    fn window_attributes(&self, window: Window) -> Result<Option<WindowAttributes>>;

    /// Children of `window`, bottom to top.
    fn query_tree(&self, window: Window) -> Result<Vec<Window>>;

    /// 32-bit property values; empty if unset or the window is gone.
    fn property_u32(&self, window: Window, property: Atom) -> Result<Vec<u32>>;

    /// Subscribes to property and shape changes of a client window.
    fn select_window_input(&self, window: Window) -> Result<()>;

    fn create_damage(&self, window: Window) -> Result<damage::Damage>;

    fn destroy_damage(&self, damage: damage::Damage);

    fn subtract_damage(&self, damage: damage::Damage) -> Result<()>;

    fn name_window_pixmap(&self, window: Window) -> Result<Pixmap>;

    fn free_pixmap(&self, pixmap: Pixmap);

    /// Bounding shape rectangles, relative to the window's outer origin.
    fn shape_rectangles(&self, window: Window) -> Result<Vec<Rect>>;

    /// Monitor geometries if Xinerama is present and active.
    fn xinerama_heads(&self) -> Result<Option<Vec<Rect>>>;

    fn pointer_position(&self, root: Window) -> Result<(i32, i32)>;
}

/// The compositor's connection to the X server.
pub struct XConnection {
    conn: RustConnection,
    atoms: Atoms,
    default_screen: usize,
    error_policy: XErrorPolicy,
    synchronous: bool,
    has_xinerama: bool,
}

impl XConnection {
    /// Opens the display and interns the atoms.
    pub fn connect(
        display: Option<&str>,
        error_policy: XErrorPolicy,
        synchronous: bool,
    ) -> Result<Self> {
        let (conn, default_screen) = x11rb::connect(display)?;
        let atoms = Atoms::new(&conn)?.reply()?;
        info!(
            "🔌 Connected to X server (default screen {}, {} screen(s))",
            default_screen,
            conn.setup().roots.len()
        );

        Ok(Self {
            conn,
            atoms,
            default_screen,
            error_policy,
            synchronous,
            has_xinerama: false,
        })
    }

    pub fn conn(&self) -> &RustConnection {
        &self.conn
    }

    pub fn default_screen(&self) -> usize {
        self.default_screen
    }

    pub fn screen_count(&self) -> usize {
        self.conn.setup().roots.len()
    }

    pub fn has_xinerama(&self) -> bool {
        self.has_xinerama
    }

    pub fn is_synchronous(&self) -> bool {
        self.synchronous
    }

    /// Verifies and initializes every extension the compositor uses.
    ///
    /// Damage and XFixes must see their version queries before any other request.
    pub fn init_extensions(&mut self) -> Result<()> {
        self.require(composite::X11_EXTENSION_NAME)?;
        let version = self.conn.composite_query_version(0, 4)?.reply()?;
        Self::check_version("Composite", (0, 3), (version.major_version, version.minor_version))?;

        self.require(damage::X11_EXTENSION_NAME)?;
        let version = self.conn.damage_query_version(1, 1)?.reply()?;
        Self::check_version("Damage", (1, 0), (version.major_version, version.minor_version))?;

        self.require(xfixes::X11_EXTENSION_NAME)?;
        let version = self.conn.xfixes_query_version(5, 0)?.reply()?;
        Self::check_version("XFixes", (2, 0), (version.major_version, version.minor_version))?;

        self.require(shape::X11_EXTENSION_NAME)?;
        self.conn.shape_query_version()?.reply()?;

        self.require(render::X11_EXTENSION_NAME)?;
        let version = self.conn.render_query_version(0, 11)?.reply()?;
        Self::check_version("Render", (0, 1), (version.major_version, version.minor_version))?;

        self.has_xinerama = self
            .conn
            .extension_information(xinerama::X11_EXTENSION_NAME)?
            .is_some();
        if self.has_xinerama {
            self.conn.xinerama_query_version(1, 1)?.reply()?;
        } else {
            debug!("Xinerama not available, using one head per screen");
        }

        info!("✅ Composite, Damage, XFixes, Shape and Render extensions available");
        Ok(())
    }

    fn require(&self, name: &'static str) -> Result<()> {
        self.conn
            .extension_information(name)?
            .map(|_| ())
            .ok_or(CompositorError::MissingExtension { name })
    }

    fn check_version(name: &'static str, required: (u32, u32), found: (u32, u32)) -> Result<()> {
        if found < required {
            return Err(CompositorError::ExtensionVersion {
                name,
                required: format!("{}.{}", required.0, required.1),
                found: format!("{}.{}", found.0, found.1),
            });
        }
        Ok(())
    }

    /// Handles an error delivered through the event queue. Never fatal.
    pub fn handle_error(&self, error: &X11Error) {
        if self.error_policy == XErrorPolicy::Log {
            warn!(
                "X error {:?} (request {}, major {}, minor {}, resource 0x{:x})",
                error.error_kind,
                error.request_name.unwrap_or("unknown"),
                error.major_opcode,
                error.minor_opcode,
                error.bad_value
            );
        }
    }

    /// Flushes and waits until the server processed every request sent so far.
    pub fn sync(&self) -> Result<()> {
        self.conn.get_input_focus()?.reply()?;
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.conn.flush()?;
        Ok(())
    }
}

/// Turns "the window is gone" into `None`, passing other failures through.
fn ignore_x11_error<T>(result: std::result::Result<T, ReplyError>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ReplyError::X11Error(error)) => {
            debug!("Ignoring {:?} for 0x{:x}", error.error_kind, error.bad_value);
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

impl XServer for XConnection {
    fn atoms(&self) -> &Atoms {
        &self.atoms
    }

    fn window_attributes(&self, window: Window) -> Result<Option<WindowAttributes>> {
        let attributes = self.conn.get_window_attributes(window)?;
        let geometry = self.conn.get_geometry(window)?;
        let (Some(attributes), Some(geometry)) = (
            ignore_x11_error(attributes.reply())?,
            ignore_x11_error(geometry.reply())?,
        ) else {
            return Ok(None);
        };

        Ok(Some(WindowAttributes {
            x: geometry.x as i32,
            y: geometry.y as i32,
            width: geometry.width as u32,
            height: geometry.height as u32,
            border_width: geometry.border_width as u32,
            depth: geometry.depth,
            visual: attributes.visual,
            class: attributes.class,
            viewable: attributes.map_state == MapState::VIEWABLE,
        }))
    }

    fn query_tree(&self, window: Window) -> Result<Vec<Window>> {
        Ok(self.conn.query_tree(window)?.reply()?.children)
    }

    fn property_u32(&self, window: Window, property: Atom) -> Result<Vec<u32>> {
        let reply = self
            .conn
            .get_property(false, window, property, AtomEnum::ANY, 0, 1024)?;
        Ok(ignore_x11_error(reply.reply())?
            .and_then(|reply| reply.value32().map(|values| values.collect()))
            .unwrap_or_default())
    }

    fn select_window_input(&self, window: Window) -> Result<()> {
        self.conn.change_window_attributes(
            window,
            &ChangeWindowAttributesAux::new().event_mask(EventMask::PROPERTY_CHANGE),
        )?;
        self.conn.shape_select_input(window, true)?;
        Ok(())
    }

    fn create_damage(&self, window: Window) -> Result<damage::Damage> {
        let damage = self.conn.generate_id()?;
        self.conn
            .damage_create(damage, window, damage::ReportLevel::NON_EMPTY)?;
        Ok(damage)
    }

    fn destroy_damage(&self, damage: damage::Damage) {
        if let Err(e) = self.conn.damage_destroy(damage) {
            warn!("Failed to destroy damage 0x{:x}: {}", damage, e);
        }
    }

    fn subtract_damage(&self, damage: damage::Damage) -> Result<()> {
        self.conn.damage_subtract(damage, x11rb::NONE, x11rb::NONE)?;
        Ok(())
    }

    fn name_window_pixmap(&self, window: Window) -> Result<Pixmap> {
        let pixmap = self.conn.generate_id()?;
        self.conn.composite_name_window_pixmap(window, pixmap)?;
        Ok(pixmap)
    }

    fn free_pixmap(&self, pixmap: Pixmap) {
        if let Err(e) = self.conn.free_pixmap(pixmap) {
            warn!("Failed to free pixmap 0x{:x}: {}", pixmap, e);
        }
    }

    fn shape_rectangles(&self, window: Window) -> Result<Vec<Rect>> {
        let reply = self.conn.shape_get_rectangles(window, shape::SK::BOUNDING)?;
        Ok(ignore_x11_error(reply.reply())?
            .map(|reply| reply.rectangles.into_iter().map(Rect::from).collect())
            .unwrap_or_default())
    }

    fn xinerama_heads(&self) -> Result<Option<Vec<Rect>>> {
        if !self.has_xinerama || self.conn.xinerama_is_active()?.reply()?.state == 0 {
            return Ok(None);
        }
        let screens = self.conn.xinerama_query_screens()?.reply()?.screen_info;
        Ok(Some(
            screens
                .into_iter()
                .map(|s| Rect::new(s.x_org as i32, s.y_org as i32, s.width as u32, s.height as u32))
                .collect(),
        ))
    }

    fn pointer_position(&self, root: Window) -> Result<(i32, i32)> {
        let reply = self.conn.query_pointer(root)?.reply()?;
        Ok((reply.root_x as i32, reply.root_y as i32))
    }
}
