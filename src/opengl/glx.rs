//! GLX bring-up
//!
//! GLX lives in `libGL` and talks to an Xlib `Display`, while the rest of the compositor
//! uses x11rb. Both libraries are opened at runtime and only the handful of entry points
//! needed to create a context are resolved. The Xlib display is private to GLX; windows
//! are created over x11rb and handed to GLX by XID, which is valid on any connection once
//! the server has processed the request.

use std::ffi::{c_char, c_int, c_ulong, c_void, CStr, CString};
use std::ptr;
use std::rc::Rc;

use libloading::Library;
use log::{debug, info, warn};
use x11rb::connection::Connection;
use x11rb::protocol::shape::SK;
use x11rb::protocol::xfixes::ConnectionExt as _;
use x11rb::protocol::xproto::{
    ColormapAlloc, ConnectionExt as _, CreateWindowAux, Window, WindowClass,
};

use crate::error::{CompositorError, Result};
use crate::x11::XConnection;

type Display = c_void;
type GlxFbConfig = *mut c_void;
type GlxContext = *mut c_void;
type GlxDrawable = c_ulong;

const GLX_DOUBLEBUFFER: c_int = 5;
const GLX_RED_SIZE: c_int = 8;
const GLX_GREEN_SIZE: c_int = 9;
const GLX_BLUE_SIZE: c_int = 10;
const GLX_DRAWABLE_TYPE: c_int = 0x8010;
const GLX_RENDER_TYPE: c_int = 0x8011;
const GLX_X_RENDERABLE: c_int = 0x8012;
const GLX_RGBA_TYPE: c_int = 0x8014;
const GLX_WINDOW_BIT: c_int = 0x0001;
const GLX_RGBA_BIT: c_int = 0x0001;

/// Oldest GL version whose shading language the shader header targets.
pub const MIN_GL_VERSION: (u32, u32) = (2, 1);

#[repr(C)]
struct XVisualInfo {
    visual: *mut c_void,
    visualid: c_ulong,
    screen: c_int,
    depth: c_int,
    class: c_int,
    red_mask: c_ulong,
    green_mask: c_ulong,
    blue_mask: c_ulong,
    colormap_size: c_int,
    bits_per_rgb: c_int,
}

/// The GLX and Xlib entry points the compositor calls.
struct GlxApi {
    x_open_display: unsafe extern "C" fn(*const c_char) -> *mut Display,
    x_close_display: unsafe extern "C" fn(*mut Display) -> c_int,
    x_free: unsafe extern "C" fn(*mut c_void) -> c_int,
    choose_fb_config:
        unsafe extern "C" fn(*mut Display, c_int, *const c_int, *mut c_int) -> *mut GlxFbConfig,
    get_visual_from_fb_config: unsafe extern "C" fn(*mut Display, GlxFbConfig) -> *mut XVisualInfo,
    create_new_context:
        unsafe extern "C" fn(*mut Display, GlxFbConfig, c_int, GlxContext, c_int) -> GlxContext,
    destroy_context: unsafe extern "C" fn(*mut Display, GlxContext),
    create_window:
        unsafe extern "C" fn(*mut Display, GlxFbConfig, c_ulong, *const c_int) -> GlxDrawable,
    destroy_window: unsafe extern "C" fn(*mut Display, GlxDrawable),
    make_context_current:
        unsafe extern "C" fn(*mut Display, GlxDrawable, GlxDrawable, GlxContext) -> c_int,
    swap_buffers: unsafe extern "C" fn(*mut Display, GlxDrawable),
    get_proc_address: unsafe extern "C" fn(*const u8) -> *const c_void,
}

fn symbol<T: Copy>(library: &Library, name: &str) -> Result<T> {
    let mut bytes = name.as_bytes().to_vec();
    bytes.push(0);
    // SAFETY: every call site names the C signature of the symbol it asks for.
    unsafe { library.get::<T>(&bytes) }
        .map(|symbol| *symbol)
        .map_err(|e| CompositorError::OpenGl(format!("cannot resolve {}: {}", name, e)))
}

fn open_library(name: &str) -> Result<Library> {
    // SAFETY: system libraries with well-known initializers.
    unsafe { Library::new(name) }
        .map_err(|e| CompositorError::OpenGl(format!("cannot open {}: {}", name, e)))
}

/// An Xlib display with GLX loaded, closed on drop.
pub struct Glx {
    api: GlxApi,
    display: *mut Display,
    _libgl: Library,
    _libx11: Library,
}

impl Glx {
    pub fn load(display_name: Option<&str>) -> Result<Self> {
        let libx11 = open_library("libX11.so.6")?;
        let libgl = open_library("libGL.so.1")?;

        let api = GlxApi {
            x_open_display: symbol(&libx11, "XOpenDisplay")?,
            x_close_display: symbol(&libx11, "XCloseDisplay")?,
            x_free: symbol(&libx11, "XFree")?,
            choose_fb_config: symbol(&libgl, "glXChooseFBConfig")?,
            get_visual_from_fb_config: symbol(&libgl, "glXGetVisualFromFBConfig")?,
            create_new_context: symbol(&libgl, "glXCreateNewContext")?,
            destroy_context: symbol(&libgl, "glXDestroyContext")?,
            create_window: symbol(&libgl, "glXCreateWindow")?,
            destroy_window: symbol(&libgl, "glXDestroyWindow")?,
            make_context_current: symbol(&libgl, "glXMakeContextCurrent")?,
            swap_buffers: symbol(&libgl, "glXSwapBuffers")?,
            get_proc_address: symbol(&libgl, "glXGetProcAddressARB")?,
        };

        let name = display_name
            .map(CString::new)
            .transpose()
            .map_err(|_| CompositorError::OpenGl("display name contains a NUL byte".into()))?;
        // SAFETY: a null name selects $DISPLAY.
        let display = unsafe { (api.x_open_display)(name.as_ref().map_or(ptr::null(), |n| n.as_ptr())) };
        if display.is_null() {
            return Err(CompositorError::OpenGl(
                "cannot open an Xlib display for GLX".into(),
            ));
        }

        Ok(Self {
            api,
            display,
            _libgl: libgl,
            _libx11: libx11,
        })
    }

    /// Picks the first RGBA window-capable config with the requested buffering.
    fn choose_fb_config(&self, screen: usize, double_buffered: bool) -> Option<FbConfig> {
        let attributes = [
            GLX_X_RENDERABLE,
            1,
            GLX_DRAWABLE_TYPE,
            GLX_WINDOW_BIT,
            GLX_RENDER_TYPE,
            GLX_RGBA_BIT,
            GLX_RED_SIZE,
            8,
            GLX_GREEN_SIZE,
            8,
            GLX_BLUE_SIZE,
            8,
            GLX_DOUBLEBUFFER,
            double_buffered as c_int,
            0,
        ];

        let mut count: c_int = 0;
        // SAFETY: the attribute list is zero terminated and the display is open.
        let configs = unsafe {
            (self.api.choose_fb_config)(self.display, screen as c_int, attributes.as_ptr(), &mut count)
        };
        if configs.is_null() {
            return None;
        }

        // SAFETY: `configs` holds `count` entries until freed below.
        let choice = unsafe {
            let found = (0..count as usize).find_map(|i| {
                let config = *configs.add(i);
                let visual = (self.api.get_visual_from_fb_config)(self.display, config);
                if visual.is_null() {
                    return None;
                }
                let choice = FbConfig {
                    config,
                    visual: (*visual).visualid as u32,
                    depth: (*visual).depth as u8,
                    double_buffered,
                };
                (self.api.x_free)(visual.cast());
                Some(choice)
            });
            (self.api.x_free)(configs.cast());
            found
        };
        choice
    }

    fn proc_address(&self, name: &str) -> *const c_void {
        match CString::new(name) {
            // SAFETY: valid C string; GLX returns null for unknown names.
            Ok(name) => unsafe { (self.api.get_proc_address)(name.as_ptr().cast()) },
            Err(_) => ptr::null(),
        }
    }
}

impl Drop for Glx {
    fn drop(&mut self) {
        // SAFETY: opened in `load`, closed once.
        unsafe {
            (self.api.x_close_display)(self.display);
        }
    }
}

#[derive(Clone, Copy)]
struct FbConfig {
    config: GlxFbConfig,
    visual: u32,
    depth: u8,
    double_buffered: bool,
}

/// A current GL context drawing into a window on the composite overlay.
pub struct GlxSurface {
    conn: Rc<XConnection>,
    glx: Glx,
    context: GlxContext,
    drawable: GlxDrawable,
    render_window: Window,
    double_buffered: bool,
}

impl GlxSurface {
    /// Creates the rendering window under `overlay`, makes a context current on it and
    /// loads the GL function pointers.
    pub fn create(
        conn: Rc<XConnection>,
        glx: Glx,
        screen_number: usize,
        overlay: Window,
        prefer_double_buffer: bool,
    ) -> Result<Self> {
        let config = prefer_double_buffer
            .then(|| glx.choose_fb_config(screen_number, true))
            .flatten()
            .or_else(|| {
                if prefer_double_buffer {
                    warn!("No double buffered fbconfig, falling back to single buffering");
                }
                glx.choose_fb_config(screen_number, false)
            })
            .ok_or_else(|| CompositorError::OpenGl("no suitable GLX fbconfig".into()))?;
        debug!(
            "Chose fbconfig with visual 0x{:x}, depth {}, double buffered: {}",
            config.visual, config.depth, config.double_buffered
        );

        let render_window = create_render_window(&conn, screen_number, overlay, &config)?;

        // SAFETY: display and config come from the same `Glx`.
        let context = unsafe {
            (glx.api.create_new_context)(glx.display, config.config, GLX_RGBA_TYPE, ptr::null_mut(), 1)
        };
        if context.is_null() {
            return Err(CompositorError::OpenGl("cannot create a GLX context".into()));
        }

        // SAFETY: the window was created with the visual of `config`.
        let drawable = unsafe {
            (glx.api.create_window)(glx.display, config.config, render_window as c_ulong, ptr::null())
        };

        let surface = Self {
            conn,
            glx,
            context,
            drawable,
            render_window,
            double_buffered: config.double_buffered,
        };

        surface.make_current()?;
        gl::load_with(|name| surface.glx.proc_address(name));
        let version = check_gl_version()?;
        info!("🎨 OpenGL {}.{} context ready", version.0, version.1);
        Ok(surface)
    }

    pub fn render_window(&self) -> Window {
        self.render_window
    }

    pub fn make_current(&self) -> Result<()> {
        // SAFETY: drawable and context belong to this display.
        let ok = unsafe {
            (self.glx.api.make_context_current)(self.glx.display, self.drawable, self.drawable, self.context)
        };
        if ok == 0 {
            return Err(CompositorError::OpenGl("glXMakeContextCurrent failed".into()));
        }
        Ok(())
    }

    /// Presents the frame: swaps if double buffered, flushes otherwise.
    pub fn present(&self) {
        if self.double_buffered {
            // SAFETY: the drawable is alive for the lifetime of the surface.
            unsafe { (self.glx.api.swap_buffers)(self.glx.display, self.drawable) };
        } else {
            unsafe { gl::Flush() };
        }
    }

    /// Resizes the rendering window along with the screen.
    pub fn resize(&self, width: u32, height: u32) -> Result<()> {
        self.conn.conn().configure_window(
            self.render_window,
            &x11rb::protocol::xproto::ConfigureWindowAux::new()
                .width(width)
                .height(height),
        )?;
        self.conn.flush()
    }
}

impl Drop for GlxSurface {
    fn drop(&mut self) {
        // SAFETY: releasing objects created in `create`, context first.
        unsafe {
            (self.glx.api.make_context_current)(self.glx.display, 0, 0, ptr::null_mut());
            (self.glx.api.destroy_window)(self.glx.display, self.drawable);
            (self.glx.api.destroy_context)(self.glx.display, self.context);
        }
        if let Err(e) = self.conn.conn().destroy_window(self.render_window) {
            warn!("Failed to destroy the rendering window: {}", e);
        }
    }
}

fn create_render_window(
    conn: &XConnection,
    screen_number: usize,
    overlay: Window,
    config: &FbConfig,
) -> Result<Window> {
    let c = conn.conn();
    let screen = &c.setup().roots[screen_number];

    let colormap = c.generate_id()?;
    c.create_colormap(ColormapAlloc::NONE, colormap, screen.root, config.visual)?;

    let window = c.generate_id()?;
    c.create_window(
        config.depth,
        window,
        overlay,
        0,
        0,
        screen.width_in_pixels,
        screen.height_in_pixels,
        0,
        WindowClass::INPUT_OUTPUT,
        config.visual,
        &CreateWindowAux::new().border_pixel(0).colormap(colormap),
    )?;

    // Input passes through to the windows below.
    let region = c.generate_id()?;
    c.xfixes_create_region(region, &[])?;
    c.xfixes_set_window_shape_region(window, SK::INPUT, 0, 0, region)?;
    c.xfixes_destroy_region(region)?;

    c.map_window(window)?;
    c.free_colormap(colormap)?;
    // GLX sees the window through another connection.
    conn.sync()?;
    Ok(window)
}

/// Parses the leading `major.minor` of a `GL_VERSION` string.
pub fn parse_gl_version(version: &str) -> Option<(u32, u32)> {
    let mut numbers = version
        .split(|c: char| c == '.' || c.is_whitespace())
        .map(|part| part.parse::<u32>());
    let major = numbers.next()?.ok()?;
    let minor = numbers.next()?.ok()?;
    Some((major, minor))
}

fn check_gl_version() -> Result<(u32, u32)> {
    // SAFETY: GL was loaded for the current context.
    let raw = unsafe { gl::GetString(gl::VERSION) };
    if raw.is_null() {
        return Err(CompositorError::OpenGl("GL_VERSION unavailable".into()));
    }
    let version = unsafe { CStr::from_ptr(raw.cast()) }.to_string_lossy();
    let parsed = parse_gl_version(&version)
        .ok_or_else(|| CompositorError::OpenGl(format!("unparsable GL version '{}'", version)))?;
    if parsed < MIN_GL_VERSION {
        return Err(CompositorError::OpenGl(format!(
            "OpenGL {}.{} or newer is required, found {}",
            MIN_GL_VERSION.0, MIN_GL_VERSION.1, version
        )));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_gl_version() {
        assert_eq!(parse_gl_version("4.6.0 NVIDIA 535.54"), Some((4, 6)));
        assert_eq!(parse_gl_version("2.1 Mesa 23.0.4"), Some((2, 1)));
        assert_eq!(parse_gl_version("3.0"), Some((3, 0)));
        assert_eq!(parse_gl_version("OpenGL ES 3.2"), None);
        assert!(parse_gl_version("2.0 Mesa").unwrap() < MIN_GL_VERSION);
    }
}
