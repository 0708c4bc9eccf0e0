//! XRender plugin interface and rendering jobs.

use std::rc::Rc;

use x11rb::protocol::render::PictOp;
use x11rb::protocol::xproto::Window;

use super::resources::{PictFormats, XRenderPicture};
use super::XRenderWindow;
use crate::damage::Rect;
use crate::plugin::BasePlugin;
use crate::screen::ScreenInfo;
use crate::x11::XConnection;

/// What plugins need to create pictures of their own.
pub struct XRenderContext {
    pub conn: Rc<XConnection>,
    pub formats: Rc<PictFormats>,
    pub root: Window,
    /// Filter for pictures drawn scaled.
    pub preview_filter: String,
}

/// One composite operation onto the back buffer.
#[derive(Clone)]
pub struct XRenderRenderingJob {
    pub operation: PictOp,
    pub source: Rc<XRenderPicture>,
    pub mask: Option<Rc<XRenderPicture>>,
    pub source_x: i32,
    pub source_y: i32,
    pub mask_x: i32,
    pub mask_y: i32,
    pub destination_x: i32,
    pub destination_y: i32,
    pub width: u32,
    pub height: u32,
}

impl XRenderRenderingJob {
    /// Job compositing `source` (and `mask`) from their origin onto `destination` with `Over`.
    pub fn over(source: Rc<XRenderPicture>, mask: Option<Rc<XRenderPicture>>, destination: Rect) -> Self {
        Self {
            operation: PictOp::OVER,
            source,
            mask,
            source_x: 0,
            source_y: 0,
            mask_x: 0,
            mask_y: 0,
            destination_x: destination.x,
            destination_y: destination.y,
            width: destination.width,
            height: destination.height,
        }
    }

    pub fn destination(&self) -> Rect {
        Rect::new(self.destination_x, self.destination_y, self.width, self.height)
    }
}

/// How a window is about to be drawn; plugins may change both.
pub struct WindowDrawParams {
    pub operation: PictOp,
    pub mask: Option<Rc<XRenderPicture>>,
}

/// Hooks an XRender plugin may implement on top of [`BasePlugin`].
pub trait XRenderPlugin: BasePlugin<XRenderWindow> {
    /// Screen areas the plugin will draw to this frame, on top of the screen's damage.
    ///
    /// Called once at the start of every frame.
    fn damaged_areas(
        &mut self,
        _screen: &ScreenInfo,
        _windows: &[XRenderWindow],
        _context: &XRenderContext,
    ) -> Vec<Rect> {
        Vec::new()
    }

    fn post_background_jobs(&mut self, _screen: &ScreenInfo, _context: &XRenderContext) -> Vec<XRenderRenderingJob> {
        Vec::new()
    }

    fn pre_window_jobs(
        &mut self,
        _screen: &ScreenInfo,
        _window: &XRenderWindow,
        _context: &XRenderContext,
    ) -> Vec<XRenderRenderingJob> {
        Vec::new()
    }

    fn window_render_init(
        &mut self,
        _screen: &ScreenInfo,
        _window: &XRenderWindow,
        _params: &mut WindowDrawParams,
        _context: &XRenderContext,
    ) {
    }

    fn post_window_jobs(
        &mut self,
        _screen: &ScreenInfo,
        _window: &XRenderWindow,
        _context: &XRenderContext,
    ) -> Vec<XRenderRenderingJob> {
        Vec::new()
    }

    fn rec_rect_render_init(&mut self, _screen: &ScreenInfo, _rect: Rect) {}

    fn rec_rect_render_cleanup(&mut self, _screen: &ScreenInfo, _rect: Rect) {}

    /// Jobs drawn after everything else.
    fn extra_jobs(
        &mut self,
        _screen: &ScreenInfo,
        _windows: &[XRenderWindow],
        _context: &XRenderContext,
    ) -> Vec<XRenderRenderingJob> {
        Vec::new()
    }
}
