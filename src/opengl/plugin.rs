//! OpenGL plugin interface and rendering jobs.

use std::rc::Rc;

use super::resources::{OpenGl2DTexture, OpenGlBuffer};
use super::shaders::{OpenGlShaderProgram, ShaderContribution};
use super::OpenGlWindow;
use crate::damage::Rect;
use crate::plugin::BasePlugin;
use crate::screen::ScreenInfo;
use crate::x11::XServer;

/// Shader hook run right before or after a job is drawn.
pub type ShaderHook = Box<dyn Fn(&OpenGlShaderProgram)>;

/// Shared resources plugins can build jobs from.
pub struct OpenGlDefaults {
    pub server: Rc<dyn XServer>,
    /// Texture coordinates covering a whole texture.
    pub full_tex_coords: Rc<OpenGlBuffer>,
    /// Opaque white, the shape of an unshaped window.
    pub white_texture: Rc<OpenGl2DTexture>,
}

/// One extra draw contributed by a plugin.
pub struct OpenGlRenderingJob {
    pub prim_pos_buffer: Rc<OpenGlBuffer>,
    pub main_tex_coord_buffer: Rc<OpenGlBuffer>,
    pub main_texture: Rc<OpenGl2DTexture>,
    pub shape_tex_coord_buffer: Rc<OpenGlBuffer>,
    pub shape_texture: Rc<OpenGl2DTexture>,
    pub alpha: f32,
    pub shader_init: Option<ShaderHook>,
    pub shader_deinit: Option<ShaderHook>,
}

impl OpenGlRenderingJob {
    /// Job drawing `texture` at `prim_pos_buffer` without a shape.
    pub fn textured(
        defaults: &OpenGlDefaults,
        prim_pos_buffer: Rc<OpenGlBuffer>,
        texture: Rc<OpenGl2DTexture>,
        alpha: f32,
    ) -> Self {
        Self {
            prim_pos_buffer,
            main_tex_coord_buffer: defaults.full_tex_coords.clone(),
            main_texture: texture,
            shape_tex_coord_buffer: defaults.full_tex_coords.clone(),
            shape_texture: defaults.white_texture.clone(),
            alpha,
            shader_init: None,
            shader_deinit: None,
        }
    }
}

/// Hooks an OpenGL plugin may implement on top of [`BasePlugin`].
///
/// Before every draw the screen calls [`null_render_init`](Self::null_render_init) on all
/// plugins so uniforms left over from the previous draw are reset, then the hook specific
/// to what is being drawn.
pub trait OpenGlPlugin: BasePlugin<OpenGlWindow> {
    fn shader_contribution(&self) -> Option<ShaderContribution> {
        None
    }

    /// Resets the plugin's uniforms to values that leave a draw unchanged.
    fn null_render_init(&mut self, _shader: &OpenGlShaderProgram) {}

    fn background_render_init(&mut self, _screen: &ScreenInfo, _part_id: usize, _shader: &OpenGlShaderProgram) {}

    fn background_render_cleanup(&mut self, _screen: &ScreenInfo, _part_id: usize) {}

    fn post_background_jobs(&mut self, _screen: &ScreenInfo, _defaults: &OpenGlDefaults) -> Vec<OpenGlRenderingJob> {
        Vec::new()
    }

    fn pre_window_jobs(
        &mut self,
        _screen: &ScreenInfo,
        _window: &OpenGlWindow,
        _defaults: &OpenGlDefaults,
    ) -> Vec<OpenGlRenderingJob> {
        Vec::new()
    }

    fn window_render_init(
        &mut self,
        _screen: &ScreenInfo,
        _window: &OpenGlWindow,
        _part_id: usize,
        _shader: &OpenGlShaderProgram,
    ) {
    }

    fn window_render_cleanup(&mut self, _screen: &ScreenInfo, _window: &OpenGlWindow, _part_id: usize) {}

    fn post_window_jobs(
        &mut self,
        _screen: &ScreenInfo,
        _window: &OpenGlWindow,
        _defaults: &OpenGlDefaults,
    ) -> Vec<OpenGlRenderingJob> {
        Vec::new()
    }

    fn rec_rect_render_init(&mut self, _screen: &ScreenInfo, _rect: Rect, _shader: &OpenGlShaderProgram) {}

    fn rec_rect_render_cleanup(&mut self, _screen: &ScreenInfo, _rect: Rect) {}

    /// Jobs drawn after everything else.
    fn extra_jobs(
        &mut self,
        _screen: &ScreenInfo,
        _windows: &[OpenGlWindow],
        _defaults: &OpenGlDefaults,
    ) -> Vec<OpenGlRenderingJob> {
        Vec::new()
    }
}
