//! XRender rendering backend
//!
//! [`XRenderScreen`] composites into a back-buffer pixmap and copies the result onto the
//! composite overlay. Unlike the OpenGL backend it only repaints what changed: both
//! pictures are clipped to the screen damage plus whatever areas plugins report, so an
//! idle screen costs nothing but the event round trips.

mod plugin;
pub mod resources;
mod window;

pub use plugin::{WindowDrawParams, XRenderContext, XRenderPlugin, XRenderRenderingJob};
pub use window::{needs_mask, XRenderWindow};

use std::rc::Rc;

use log::{debug, info, warn};
use x11rb::connection::Connection;
use x11rb::protocol::render::{ConnectionExt as _, PictOp, Pictformat};
use x11rb::protocol::xproto::{
    ClipOrdering, ConnectionExt as _, CreateGCAux, Gcontext, Rectangle, SubwindowMode, Window, GX,
};
use x11rb::protocol::Event;

use crate::config::XRenderConfig;
use crate::damage::Rect;
use crate::error::Result;
use crate::plugin::{PluginManager, PluginSearchPaths, PluginSpec, PluginType};
use crate::screen::{refresh_background, BaseScreen, HeadMode, Screen, ScreenInfo};
use crate::window::CompWindow;
use crate::x11::{XConnection, XServer};
use resources::{alpha_color, XRenderPicture};

/// Outline rectangle as drawn by `PolyRectangle`, which covers one extra pixel per axis.
pub fn outline_rectangle(rect: Rect) -> Rectangle {
    let mut outline = rect.to_x11();
    outline.width = outline.width.saturating_sub(1);
    outline.height = outline.height.saturating_sub(1);
    outline
}

/// Screen rendered with XRender.
pub struct XRenderScreen {
    base: BaseScreen<XRenderWindow, dyn XRenderPlugin>,
    context: XRenderContext,
    overlay: Window,
    root_depth: u8,
    root_format: Pictformat,
    front: Rc<XRenderPicture>,
    back: Rc<XRenderPicture>,
    background: Option<Rc<XRenderPicture>>,
    rec_rect_gc: Gcontext,
}

impl XRenderScreen {
    pub fn new(
        conn: Rc<XConnection>,
        screen_number: usize,
        overlay: Window,
        config: &XRenderConfig,
        search_paths: PluginSearchPaths,
    ) -> Result<Self> {
        let formats = Rc::new(resources::PictFormats::query(&conn)?);

        let setup_screen = &conn.conn().setup().roots[screen_number];
        let (root, width, height) = (
            setup_screen.root,
            setup_screen.width_in_pixels as u32,
            setup_screen.height_in_pixels as u32,
        );
        let root_depth = setup_screen.root_depth;
        let root_format = formats.for_visual(setup_screen.root_visual, root_depth);
        let white_pixel = setup_screen.white_pixel;

        let info = ScreenInfo::new(screen_number, root, width, height, *conn.atoms());

        let mut plugin_manager = PluginManager::new(PluginType::XRender, search_paths);
        crate::effects::register_xrender_builtins(&mut plugin_manager);

        let window_conn = conn.clone();
        let window_formats = formats.clone();
        let base = BaseScreen::new(
            conn.clone(),
            info,
            plugin_manager,
            Box::new(move |_server: &Rc<dyn XServer>, window: Window| {
                XRenderWindow::new(window_conn.clone(), window_formats.clone(), root, window)
            }),
        )?;

        let rec_rect_gc = conn.conn().generate_id()?;
        conn.conn().create_gc(
            rec_rect_gc,
            root,
            &CreateGCAux::new()
                .function(GX::XOR)
                .foreground(white_pixel)
                .subwindow_mode(SubwindowMode::INCLUDE_INFERIORS),
        )?;

        let front = XRenderPicture::for_drawable(conn.clone(), overlay, root_format, width, height)?;
        let back = XRenderPicture::with_pixmap(conn.clone(), root, root_depth, root_format, width, height)?;
        info!("🎨 XRender screen {} ready ({}x{})", screen_number, width, height);

        Ok(Self {
            base,
            context: XRenderContext {
                conn,
                formats,
                root,
                preview_filter: config.preview_filter.clone(),
            },
            overlay,
            root_depth,
            root_format,
            front,
            back,
            background: None,
            rec_rect_gc,
        })
    }

    pub fn base(&self) -> &BaseScreen<XRenderWindow, dyn XRenderPlugin> {
        &self.base
    }

    fn recreate_buffers(&mut self) -> Result<()> {
        let (width, height) = (self.base.info.width, self.base.info.height);
        let conn = &self.context.conn;
        self.front = XRenderPicture::for_drawable(conn.clone(), self.overlay, self.root_format, width, height)?;
        self.back = XRenderPicture::with_pixmap(
            conn.clone(),
            self.context.root,
            self.root_depth,
            self.root_format,
            width,
            height,
        )?;
        debug!("Back buffer recreated at {}x{}", width, height);
        Ok(())
    }

    fn update_background_picture(&mut self) -> Result<()> {
        let conn = &self.context.conn;
        let formats = &self.context.formats;
        let background = &mut self.background;

        refresh_background(&mut self.base, |info| {
            *background = None;
            let Some(pixmap) = info.root_pixmap.pixmap() else {
                debug!("No background pixmap set");
                return Ok(());
            };
            let geometry = match conn.conn().get_geometry(pixmap)?.reply() {
                Ok(geometry) => geometry,
                Err(e) => {
                    warn!("Background pixmap 0x{:x} is unusable: {}", pixmap, e);
                    return Ok(());
                }
            };
            *background = Some(XRenderPicture::for_drawable(
                conn.clone(),
                pixmap,
                formats.for_depth(geometry.depth),
                geometry.width as u32,
                geometry.height as u32,
            )?);
            Ok(())
        })?;
        Ok(())
    }

    fn execute_job(&self, job: &XRenderRenderingJob) -> Result<()> {
        let mask = job.mask.as_ref().map_or(x11rb::NONE, |mask| mask.id());
        let destination = job.destination().to_x11();
        self.context.conn.conn().render_composite(
            job.operation,
            job.source.id(),
            mask,
            self.back.id(),
            job.source_x as i16,
            job.source_y as i16,
            job.mask_x as i16,
            job.mask_y as i16,
            destination.x,
            destination.y,
            destination.width,
            destination.height,
        )?;
        Ok(())
    }

    fn execute_jobs(&self, jobs: &[XRenderRenderingJob]) -> Result<()> {
        for job in jobs {
            self.execute_job(job)?;
        }
        Ok(())
    }

    fn render_background(&mut self) -> Result<()> {
        let screen_rect = self.base.info.screen_rect();
        self.back.fill(PictOp::SRC, alpha_color(0), &[screen_rect])?;
        if let Some(background) = &self.background {
            let size = Rect::new(0, 0, background.width(), background.height());
            let mut job = XRenderRenderingJob::over(background.clone(), None, size);
            job.operation = PictOp::SRC;
            self.execute_job(&job)?;
        }

        let info = &self.base.info;
        let context = &self.context;
        let jobs: Vec<_> = self
            .base
            .plugin_manager
            .plugins_mut()
            .iter_mut()
            .flat_map(|plugin| plugin.post_background_jobs(info, context))
            .collect();
        self.execute_jobs(&jobs)
    }

    fn render_window(&mut self, index: usize) -> Result<()> {
        let info = &self.base.info;
        let window = &self.base.windows[index];
        let context = &self.context;
        let plugins = self.base.plugin_manager.plugins_mut();

        let Some(content) = window.content_picture() else {
            return Ok(());
        };

        let jobs: Vec<_> = plugins
            .iter_mut()
            .flat_map(|plugin| plugin.pre_window_jobs(info, window, context))
            .collect();

        let mut params = WindowDrawParams {
            operation: PictOp::OVER,
            mask: window.mask_picture(),
        };
        for plugin in plugins.iter_mut() {
            plugin.window_render_init(info, window, &mut params, context);
        }
        let mut draw = XRenderRenderingJob::over(content, params.mask, window.base().bordered_rect());
        draw.operation = params.operation;

        let post_jobs: Vec<_> = plugins
            .iter_mut()
            .flat_map(|plugin| plugin.post_window_jobs(info, window, context))
            .collect();

        self.execute_jobs(&jobs)?;
        self.execute_job(&draw)?;
        self.execute_jobs(&post_jobs)
    }

    fn render_reconfigure_rect(&mut self, clip: &[Rectangle]) -> Result<()> {
        let rect = self.base.info.reconfigure_rect;
        if rect.is_empty() {
            return Ok(());
        }
        let Some(back_pixmap) = self.back.pixmap() else {
            return Ok(());
        };
        let info = &self.base.info;
        for plugin in self.base.plugin_manager.plugins_mut() {
            plugin.rec_rect_render_init(info, rect);
        }

        let conn = self.context.conn.conn();
        conn.set_clip_rectangles(ClipOrdering::UNSORTED, self.rec_rect_gc, 0, 0, clip)?;
        conn.poly_rectangle(back_pixmap, self.rec_rect_gc, &[outline_rectangle(rect)])?;

        for plugin in self.base.plugin_manager.plugins_mut() {
            plugin.rec_rect_render_cleanup(info, rect);
        }
        Ok(())
    }

    fn render_extra_jobs(&mut self) -> Result<()> {
        let info = &self.base.info;
        let windows = &self.base.windows;
        let context = &self.context;
        let jobs: Vec<_> = self
            .base
            .plugin_manager
            .plugins_mut()
            .iter_mut()
            .flat_map(|plugin| plugin.extra_jobs(info, windows, context))
            .collect();
        self.execute_jobs(&jobs)
    }

    /// Copies the back buffer onto the overlay.
    fn present(&self) -> Result<()> {
        let (width, height) = (self.base.info.width, self.base.info.height);
        let screen = Rect::new(0, 0, width, height).to_x11();
        self.context.conn.conn().render_composite(
            PictOp::SRC,
            self.back.id(),
            x11rb::NONE,
            self.front.id(),
            0,
            0,
            0,
            0,
            0,
            0,
            screen.width,
            screen.height,
        )?;
        self.context.conn.flush()
    }
}

impl Drop for XRenderScreen {
    fn drop(&mut self) {
        if let Err(e) = self.context.conn.conn().free_gc(self.rec_rect_gc) {
            warn!("Failed to free the reconfigure rectangle GC: {}", e);
        }
    }
}

impl Screen for XRenderScreen {
    fn info(&self) -> &ScreenInfo {
        self.base.info()
    }

    fn manages(&self, window: Window) -> bool {
        self.base.manages(window)
    }

    fn add_to_ignore_list(&mut self, window: Window) {
        self.base.add_to_ignore_list(window);
    }

    fn init_plugins(&mut self, specs: &[PluginSpec]) -> Result<()> {
        self.base.init_plugins(specs)
    }

    fn init_windows(&mut self) -> Result<()> {
        self.base.init_windows()
    }

    fn update_heads(&mut self, mode: HeadMode) -> Result<()> {
        self.base.update_heads(mode)
    }

    fn handle_event(&mut self, event: &Event) -> Result<()> {
        self.base.handle_event(event)
    }

    fn render_screen(&mut self) -> Result<()> {
        if self.base.take_resized() {
            self.recreate_buffers()?;
        }
        self.update_background_picture()?;

        let info = &self.base.info;
        let windows = &self.base.windows;
        let context = &self.context;
        let plugin_damage: Vec<Rect> = self
            .base
            .plugin_manager
            .plugins_mut()
            .iter_mut()
            .flat_map(|plugin| plugin.damaged_areas(info, windows, context))
            .collect();
        let clip = self.base.damage().clip_rectangles(&plugin_damage);
        if clip.is_empty() {
            return Ok(());
        }
        self.back.set_clip(&clip)?;
        self.front.set_clip(&clip)?;

        self.render_background()?;

        for index in 0..self.base.windows.len() {
            let window = &mut self.base.windows[index];
            if !window.base().is_mapped() || window.base().is_ignored() {
                continue;
            }
            let updated = if window.base().is_damaged() {
                window.update_contents()
            } else {
                window.update_mask()
            };
            if let Err(e) = updated {
                debug!("Cannot update window 0x{:x}: {}", window.base().id(), e);
                continue;
            }
            self.render_window(index)?;
        }

        self.render_reconfigure_rect(&clip)?;
        self.render_extra_jobs()?;
        self.present()
    }

    fn clear_screen_damage(&mut self) {
        self.base.clear_screen_damage();
    }
}
