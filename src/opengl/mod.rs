//! OpenGL rendering backend
//!
//! [`OpenGlScreen`] draws the screen through one GL context per X screen, rendering into a
//! window on the composite overlay. Every frame redraws the background and every mapped
//! window in full. Contents are only re-uploaded for windows that were damaged.

mod glx;
pub mod partition;
mod plugin;
pub mod resources;
pub mod shaders;
mod window;

pub use glx::{parse_gl_version, Glx, GlxSurface, MIN_GL_VERSION};
pub use plugin::{OpenGlDefaults, OpenGlPlugin, OpenGlRenderingJob, ShaderHook};
pub use window::OpenGlWindow;

use std::num::NonZeroU32;
use std::rc::Rc;

use gl::types::{GLenum, GLint};
use log::{debug, info, warn};
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{ConnectionExt as _, Window};
use x11rb::protocol::Event;

use crate::config::OpenGlConfig;
use crate::damage::Rect;
use crate::error::{CompositorError, Result};
use crate::plugin::{BasePlugin, PluginManager, PluginSearchPaths, PluginSpec, PluginType};
use crate::screen::{refresh_background, BaseScreen, HeadMode, Screen, ScreenInfo};
use crate::window::CompWindow;
use crate::x11::{XConnection, XServer};
use resources::{rect_outline_ndc, OpenGl2DTexture, OpenGlBuffer, OpenGlTexturePartition, FULL_TEX_COORDS};
use shaders::{assemble_shaders, OpenGlShaderProgram, ShaderContribution};

/// Builds the shader program from the contributions of the loaded plugins.
fn build_shader(plugins: &[Box<dyn OpenGlPlugin>]) -> Result<OpenGlShaderProgram> {
    let contributions: Vec<(&str, ShaderContribution)> = plugins
        .iter()
        .filter_map(|plugin| {
            plugin
                .shader_contribution()
                .map(|contribution| (plugin.plugin_name(), contribution))
        })
        .collect();
    let sources = assemble_shaders(&contributions)?;
    debug!("Fragment shader:\n{}", sources.fragment);
    Ok(OpenGlShaderProgram::new(&sources)?)
}

/// Binds a job's buffers and textures and draws it.
fn draw_job(shader: &OpenGlShaderProgram, job: &OpenGlRenderingJob, mode: GLenum, vertices: i32) {
    if let Some(init) = &job.shader_init {
        init(shader);
    }
    shader.set_alpha(job.alpha);

    unsafe {
        for (attrib, buffer) in [
            (shader.prim_pos_attrib(), &job.prim_pos_buffer),
            (shader.main_tex_coord_attrib(), &job.main_tex_coord_buffer),
            (shader.shape_tex_coord_attrib(), &job.shape_tex_coord_buffer),
        ] {
            buffer.bind();
            gl::VertexAttribPointer(attrib, 2, gl::FLOAT, gl::FALSE, 0, std::ptr::null());
            gl::EnableVertexAttribArray(attrib);
        }

        gl::ActiveTexture(gl::TEXTURE0);
        job.main_texture.bind();
        gl::ActiveTexture(gl::TEXTURE1);
        job.shape_texture.bind();

        gl::DrawArrays(mode, 0, vertices);
    }

    if let Some(deinit) = &job.shader_deinit {
        deinit(shader);
    }
}

/// Runs plugin jobs, resetting plugin uniforms before each.
fn execute_jobs(
    shader: &OpenGlShaderProgram,
    plugins: &mut [Box<dyn OpenGlPlugin>],
    jobs: &[OpenGlRenderingJob],
) {
    for job in jobs {
        null_render_init(shader, plugins);
        draw_job(shader, job, gl::TRIANGLE_STRIP, 4);
    }
}

fn null_render_init(shader: &OpenGlShaderProgram, plugins: &mut [Box<dyn OpenGlPlugin>]) {
    for plugin in plugins.iter_mut() {
        plugin.null_render_init(shader);
    }
}

/// Screen rendered with OpenGL.
pub struct OpenGlScreen {
    base: BaseScreen<OpenGlWindow, dyn OpenGlPlugin>,
    conn: Rc<XConnection>,
    shader: OpenGlShaderProgram,
    defaults: OpenGlDefaults,
    background: OpenGlTexturePartition,
    background_positions: Vec<Rc<OpenGlBuffer>>,
    rec_rect_buffer: Rc<OpenGlBuffer>,
    max_texture_size: NonZeroU32,
    // Declared last so every GL object above is released while the context exists.
    surface: GlxSurface,
}

impl OpenGlScreen {
    pub fn new(
        conn: Rc<XConnection>,
        screen_number: usize,
        overlay: Window,
        display: Option<&str>,
        config: &OpenGlConfig,
        search_paths: PluginSearchPaths,
    ) -> Result<Self> {
        let glx = Glx::load(display)?;
        let surface = GlxSurface::create(
            conn.clone(),
            glx,
            screen_number,
            overlay,
            config.prefer_double_buffer,
        )?;

        let mut gl_max: GLint = 0;
        unsafe { gl::GetIntegerv(gl::MAX_TEXTURE_SIZE, &mut gl_max) };
        let limit = config
            .max_texture_size
            .map_or(gl_max as u32, |cap| cap.min(gl_max as u32));
        let max_texture_size = NonZeroU32::new(limit)
            .ok_or_else(|| CompositorError::OpenGl("GL reports no usable texture size".into()))?;
        info!("🧱 Maximum texture size {}", max_texture_size);

        let setup_screen = &conn.conn().setup().roots[screen_number];
        let info = ScreenInfo::new(
            screen_number,
            setup_screen.root,
            setup_screen.width_in_pixels as u32,
            setup_screen.height_in_pixels as u32,
            *conn.atoms(),
        );

        let mut plugin_manager = PluginManager::new(PluginType::OpenGl, search_paths);
        crate::effects::register_opengl_builtins(&mut plugin_manager);

        let window_conn = conn.clone();
        let mut base = BaseScreen::new(
            conn.clone(),
            info,
            plugin_manager,
            Box::new(move |_server: &Rc<dyn XServer>, window: Window| {
                OpenGlWindow::new(window_conn.clone(), window, max_texture_size)
            }),
        )?;
        base.add_to_ignore_list(surface.render_window());

        let defaults = OpenGlDefaults {
            server: conn.clone(),
            full_tex_coords: OpenGlBuffer::with_data(&FULL_TEX_COORDS),
            white_texture: OpenGl2DTexture::solid([0xff; 4]),
        };
        let shader = build_shader(&[])?;

        unsafe {
            gl::Viewport(0, 0, base.info().width as i32, base.info().height as i32);
            gl::Enable(gl::BLEND);
            gl::BlendFunc(gl::SRC_ALPHA, gl::ONE_MINUS_SRC_ALPHA);
        }

        Ok(Self {
            base,
            conn,
            shader,
            defaults,
            background: OpenGlTexturePartition::new(max_texture_size),
            background_positions: Vec::new(),
            rec_rect_buffer: Rc::new(OpenGlBuffer::new(gl::ARRAY_BUFFER)),
            max_texture_size,
            surface,
        })
    }

    pub fn base(&self) -> &BaseScreen<OpenGlWindow, dyn OpenGlPlugin> {
        &self.base
    }

    /// Re-reads the background pixmap after a root pixmap change.
    fn update_background_texture(&mut self) -> Result<()> {
        let conn = &self.conn;
        let background = &mut self.background;
        let positions = &mut self.background_positions;
        let max_texture_size = self.max_texture_size;

        refresh_background(&mut self.base, |info| {
            *background = OpenGlTexturePartition::new(max_texture_size);
            positions.clear();

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

            background.set_size(geometry.width as u32, geometry.height as u32);
            if let Err(e) = background.upload_from_drawable(conn, pixmap, geometry.depth) {
                warn!("Failed to read the background pixmap: {}", e);
                *background = OpenGlTexturePartition::new(max_texture_size);
                return Ok(());
            }
            *positions = background
                .tiles()
                .map(|tile| {
                    let buffer = OpenGlBuffer::new(gl::ARRAY_BUFFER);
                    buffer.set_rect(tile.rect, info.width, info.height);
                    Rc::new(buffer)
                })
                .collect();
            debug!("Background uploaded in {} tile(s)", background.len());
            Ok(())
        })?;
        Ok(())
    }

    fn render_background(&mut self) {
        let info = &self.base.info;
        let plugins = self.base.plugin_manager.plugins_mut();

        for (part_id, (tile, position)) in self
            .background
            .tiles()
            .zip(&self.background_positions)
            .enumerate()
        {
            null_render_init(&self.shader, plugins);
            for plugin in plugins.iter_mut() {
                plugin.background_render_init(info, part_id, &self.shader);
            }
            let job = OpenGlRenderingJob::textured(&self.defaults, position.clone(), tile.texture, 1.0);
            draw_job(&self.shader, &job, gl::TRIANGLE_STRIP, 4);
            for plugin in plugins.iter_mut() {
                plugin.background_render_cleanup(info, part_id);
            }
        }

        let jobs: Vec<_> = plugins
            .iter_mut()
            .flat_map(|plugin| plugin.post_background_jobs(info, &self.defaults))
            .collect();
        execute_jobs(&self.shader, plugins, &jobs);
    }

    fn render_window(&mut self, index: usize) -> Result<()> {
        let info = &self.base.info;
        let window = &self.base.windows[index];
        let plugins = self.base.plugin_manager.plugins_mut();

        let jobs: Vec<_> = plugins
            .iter_mut()
            .flat_map(|plugin| plugin.pre_window_jobs(info, window, &self.defaults))
            .collect();
        execute_jobs(&self.shader, plugins, &jobs);

        for (part_id, tile) in window.content_tiles().enumerate() {
            null_render_init(&self.shader, plugins);
            for plugin in plugins.iter_mut() {
                plugin.window_render_init(info, window, part_id, &self.shader);
            }

            let mut job = OpenGlRenderingJob::textured(
                &self.defaults,
                window.position_buffer(part_id)?,
                tile.texture,
                window.base().alpha(),
            );
            if let Some(shape) = window.shape_texture(part_id) {
                job.shape_texture = shape;
            }
            draw_job(&self.shader, &job, gl::TRIANGLE_STRIP, 4);

            for plugin in plugins.iter_mut() {
                plugin.window_render_cleanup(info, window, part_id);
            }
        }

        let jobs: Vec<_> = plugins
            .iter_mut()
            .flat_map(|plugin| plugin.post_window_jobs(info, window, &self.defaults))
            .collect();
        execute_jobs(&self.shader, plugins, &jobs);
        Ok(())
    }

    fn render_reconfigure_rect(&mut self) {
        let info = &self.base.info;
        let rect: Rect = info.reconfigure_rect;
        if rect.is_empty() {
            return;
        }
        let plugins = self.base.plugin_manager.plugins_mut();

        self.rec_rect_buffer
            .buffer_data(&rect_outline_ndc(rect, info.width, info.height));
        unsafe {
            gl::Enable(gl::COLOR_LOGIC_OP);
            gl::LogicOp(gl::XOR);
        }
        null_render_init(&self.shader, plugins);
        for plugin in plugins.iter_mut() {
            plugin.rec_rect_render_init(info, rect, &self.shader);
        }
        let job = OpenGlRenderingJob::textured(
            &self.defaults,
            self.rec_rect_buffer.clone(),
            self.defaults.white_texture.clone(),
            1.0,
        );
        draw_job(&self.shader, &job, gl::LINE_LOOP, 4);
        for plugin in plugins.iter_mut() {
            plugin.rec_rect_render_cleanup(info, rect);
        }
        unsafe { gl::Disable(gl::COLOR_LOGIC_OP) };
    }

    fn render_extra_jobs(&mut self) {
        let info = &self.base.info;
        let windows = &self.base.windows;
        let plugins = self.base.plugin_manager.plugins_mut();
        let jobs: Vec<_> = plugins
            .iter_mut()
            .flat_map(|plugin| plugin.extra_jobs(info, windows, &self.defaults))
            .collect();
        execute_jobs(&self.shader, plugins, &jobs);
    }
}

impl Screen for OpenGlScreen {
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
        self.base.init_plugins(specs)?;
        self.shader = build_shader(self.base.plugin_manager.plugins())?;
        Ok(())
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
        let (width, height) = (self.base.info.width, self.base.info.height);
        if self.base.take_resized() {
            self.surface.resize(width, height)?;
            unsafe { gl::Viewport(0, 0, width as i32, height as i32) };
        }
        self.update_background_texture()?;

        unsafe {
            gl::ClearColor(0.0, 0.0, 0.0, 1.0);
            gl::Clear(gl::COLOR_BUFFER_BIT);
        }
        self.shader.use_program();
        self.render_background();

        for index in 0..self.base.windows.len() {
            let window = &mut self.base.windows[index];
            if !window.base().is_mapped() || window.base().is_ignored() {
                continue;
            }
            if window.base().is_damaged() {
                if let Err(e) = window.update_contents() {
                    // Usually the window went away and its destroy event is still queued.
                    debug!("Cannot update window 0x{:x}: {}", window.base().id(), e);
                    continue;
                }
            }
            window.update_positions(width, height);
            self.render_window(index)?;
        }

        self.render_reconfigure_rect();
        self.render_extra_jobs();
        self.surface.present();
        Ok(())
    }

    fn clear_screen_damage(&mut self) {
        self.base.clear_screen_damage();
    }
}
