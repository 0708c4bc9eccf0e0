//! Fade windows in on map and out on unmap.
//!
//! [`FadeTracker`] holds the backend-independent state: one alpha per fading window,
//! stepped by one unit per fade tick. Fading-out windows are no longer mapped (or not even
//! tracked), so each fade-out carries a backend payload of reference-counted content
//! handles that keep the last image alive until the fade completes.

use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use log::{trace, warn};
use x11rb::protocol::xproto::Window;

use crate::damage::Rect;
use crate::effects::ResourceCache;
use crate::error::PluginError;
use crate::opengl::resources::{OpenGl2DTexture, OpenGlBuffer};
use crate::opengl::shaders::{OpenGlShaderProgram, ShaderContribution};
use crate::opengl::{OpenGlDefaults, OpenGlPlugin, OpenGlRenderingJob, OpenGlWindow};
use crate::plugin::BasePlugin;
use crate::screen::ScreenInfo;
use crate::tick_tracker::TickTracker;
use crate::window::CompWindow;
use crate::xrender::resources::XRenderPicture;
use crate::xrender::{WindowDrawParams, XRenderContext, XRenderPlugin, XRenderRenderingJob, XRenderWindow};

pub const PLUGIN_NAME: &str = "fade";

/// One alpha step; a full fade takes about 250 ms.
pub const FADE_TICK: Duration = Duration::from_micros(250_000 / 255);

const FADE_UNIFORM: &str = "fade_Alpha";

const FADE_SHADER: &str = "\
uniform float fade_Alpha;

void fade() {
    gl_FragColor *= vec4(1.0, 1.0, 1.0, fade_Alpha);
}
";

#[derive(Debug)]
struct FadeIn {
    alpha: u8,
    rect: Rect,
    timer: TickTracker,
    stepped: bool,
}

/// A window fading out, with whatever the backend needs to keep drawing it.
#[derive(Debug)]
pub struct FadeOut<T> {
    pub window: Window,
    pub rect: Rect,
    pub alpha: u8,
    pub payload: T,
    timer: TickTracker,
}

/// Alpha state of every fading window on a screen.
#[derive(Debug)]
pub struct FadeTracker<T> {
    fade_ins: HashMap<Window, FadeIn>,
    fade_outs: Vec<FadeOut<T>>,
}

impl<T> Default for FadeTracker<T> {
    fn default() -> Self {
        Self {
            fade_ins: HashMap::new(),
            fade_outs: Vec::new(),
        }
    }
}

impl<T> FadeTracker<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn window_mapped(&mut self, window: Window, rect: Rect) {
        self.window_mapped_at(window, rect, Instant::now());
    }

    /// Starts a fade-in, reversing a running fade-out from its current alpha.
    pub fn window_mapped_at(&mut self, window: Window, rect: Rect, now: Instant) {
        let alpha = match self.fade_outs.iter().position(|f| f.window == window) {
            Some(index) => self.fade_outs.remove(index).alpha,
            None => 0,
        };
        let mut timer = TickTracker::new(FADE_TICK);
        timer.start_at(now);
        self.fade_ins.insert(
            window,
            FadeIn {
                alpha,
                rect,
                timer,
                stepped: false,
            },
        );
    }

    pub fn window_unmapped(&mut self, window: Window, rect: Rect, payload: T) {
        self.window_unmapped_at(window, rect, payload, Instant::now());
    }

    /// Starts a fade-out from the current fade-in alpha. A fade-in that never stepped
    /// has not been seen yet, so the fade-out starts fully opaque.
    pub fn window_unmapped_at(&mut self, window: Window, rect: Rect, payload: T, now: Instant) {
        let alpha = match self.fade_ins.remove(&window) {
            Some(fade_in) if fade_in.stepped => fade_in.alpha,
            _ => u8::MAX,
        };
        let mut timer = TickTracker::new(FADE_TICK);
        timer.start_at(now);
        self.fade_outs.retain(|f| f.window != window);
        self.fade_outs.push(FadeOut {
            window,
            rect,
            alpha,
            payload,
            timer,
        });
    }

    /// Drops any fade-in of `window` without starting a fade-out.
    pub fn cancel_fade_in(&mut self, window: Window) {
        self.fade_ins.remove(&window);
    }

    pub fn window_moved(&mut self, window: Window, rect: Rect) {
        if let Some(fade_in) = self.fade_ins.get_mut(&window) {
            fade_in.rect = rect;
        }
    }

    pub fn step(&mut self) -> Vec<Rect> {
        self.step_at(Instant::now())
    }

    /// Advances every fade by the ticks elapsed since the last step. Returns the areas of
    /// fades that completed, which need one more repaint.
    pub fn step_at(&mut self, now: Instant) -> Vec<Rect> {
        let mut finished = Vec::new();

        self.fade_ins.retain(|window, fade| {
            let ticks = fade.timer.new_elapsed_ticks_at(now);
            if ticks > 0 {
                fade.stepped = true;
                fade.alpha = fade.alpha.saturating_add(ticks.min(255) as u8);
            }
            if fade.alpha == u8::MAX {
                trace!("Fade-in of 0x{:x} done", window);
                finished.push(fade.rect);
                return false;
            }
            true
        });

        self.fade_outs.retain_mut(|fade| {
            let ticks = fade.timer.new_elapsed_ticks_at(now);
            fade.alpha = fade.alpha.saturating_sub(ticks.min(255) as u8);
            if fade.alpha == 0 {
                trace!("Fade-out of 0x{:x} done", fade.window);
                finished.push(fade.rect);
                return false;
            }
            true
        });

        finished
    }

    pub fn fade_in_alpha(&self, window: Window) -> Option<u8> {
        self.fade_ins.get(&window).map(|fade| fade.alpha)
    }

    pub fn fade_outs(&self) -> &[FadeOut<T>] {
        &self.fade_outs
    }

    /// Areas of every running fade.
    pub fn active_rects(&self) -> Vec<Rect> {
        self.fade_ins
            .values()
            .map(|fade| fade.rect)
            .chain(self.fade_outs.iter().map(|fade| fade.rect))
            .collect()
    }

    pub fn is_active(&self) -> bool {
        !self.fade_ins.is_empty() || !self.fade_outs.is_empty()
    }

    pub fn is_fading(&self, window: Window) -> bool {
        self.fade_ins.contains_key(&window) || self.fade_outs.iter().any(|f| f.window == window)
    }
}

/// Scales a window alpha by a fade alpha.
pub fn combine_alpha(opacity: u8, fade: u8) -> u8 {
    ((opacity as u16 * fade as u16) / 255) as u8
}

fn reject_arguments(args: &[String]) -> Result<(), PluginError> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(PluginError::InvalidArguments {
            name: PLUGIN_NAME.to_string(),
            reason: format!("takes no arguments, got {}", args.join(" ")),
        })
    }
}

//--- OpenGL -----------------------------------------------------------------

/// Last image of a window, one entry per content tile.
pub struct OpenGlFadeImage {
    tiles: Vec<(Rc<OpenGl2DTexture>, Option<Rc<OpenGl2DTexture>>, Rc<OpenGlBuffer>)>,
    alpha: f32,
}

pub struct OpenGlFadePlugin {
    fades: FadeTracker<OpenGlFadeImage>,
}

impl OpenGlFadePlugin {
    pub fn create(_screen: &ScreenInfo, args: &[String]) -> Result<Box<dyn OpenGlPlugin>, PluginError> {
        reject_arguments(args)?;
        Ok(Box::new(Self {
            fades: FadeTracker::new(),
        }))
    }
}

impl BasePlugin<OpenGlWindow> for OpenGlFadePlugin {
    fn plugin_name(&self) -> &str {
        PLUGIN_NAME
    }

    fn window_mapped(&mut self, _screen: &ScreenInfo, window: &OpenGlWindow) {
        self.fades
            .window_mapped(window.base().id(), window.base().bordered_rect());
    }

    fn window_unmapped(&mut self, _screen: &ScreenInfo, window: &OpenGlWindow) {
        let tiles = window
            .content_tiles()
            .enumerate()
            .filter_map(|(part_id, tile)| {
                let position = window.position_buffer(part_id).ok()?;
                Some((tile.texture, window.shape_texture(part_id), position))
            })
            .collect::<Vec<_>>();
        if tiles.is_empty() {
            self.fades.cancel_fade_in(window.base().id());
            return;
        }
        let image = OpenGlFadeImage {
            tiles,
            alpha: window.base().alpha(),
        };
        self.fades
            .window_unmapped(window.base().id(), window.base().bordered_rect(), image);
    }

    fn window_destroyed(&mut self, _screen: &ScreenInfo, window: &OpenGlWindow) {
        self.fades.cancel_fade_in(window.base().id());
    }

    fn window_reconfigured(&mut self, _screen: &ScreenInfo, window: &OpenGlWindow) {
        self.fades
            .window_moved(window.base().id(), window.base().bordered_rect());
    }
}

impl OpenGlPlugin for OpenGlFadePlugin {
    fn shader_contribution(&self) -> Option<ShaderContribution> {
        Some(ShaderContribution::fragment(PLUGIN_NAME, FADE_SHADER).with_uniform(FADE_UNIFORM))
    }

    fn null_render_init(&mut self, shader: &OpenGlShaderProgram) {
        shader.set_uniform_1f(FADE_UNIFORM, 1.0);
    }

    // The first hook of every frame.
    fn post_background_jobs(&mut self, _screen: &ScreenInfo, _defaults: &OpenGlDefaults) -> Vec<OpenGlRenderingJob> {
        self.fades.step();
        Vec::new()
    }

    fn window_render_init(
        &mut self,
        _screen: &ScreenInfo,
        window: &OpenGlWindow,
        _part_id: usize,
        shader: &OpenGlShaderProgram,
    ) {
        if let Some(alpha) = self.fades.fade_in_alpha(window.base().id()) {
            shader.set_uniform_1f(FADE_UNIFORM, alpha as f32 / 255.0);
        }
    }

    fn extra_jobs(
        &mut self,
        _screen: &ScreenInfo,
        _windows: &[OpenGlWindow],
        defaults: &OpenGlDefaults,
    ) -> Vec<OpenGlRenderingJob> {
        let mut jobs = Vec::new();
        for fade in self.fades.fade_outs() {
            let alpha = fade.payload.alpha * fade.alpha as f32 / 255.0;
            for (texture, shape, position) in &fade.payload.tiles {
                let mut job = OpenGlRenderingJob::textured(defaults, position.clone(), texture.clone(), alpha);
                if let Some(shape) = shape {
                    job.shape_texture = shape.clone();
                }
                jobs.push(job);
            }
        }
        jobs
    }
}

//--- XRender ----------------------------------------------------------------

/// Last image of a window and the parts of it that are visible.
pub struct XRenderFadeImage {
    content: Rc<XRenderPicture>,
    visible_rects: Vec<Rect>,
    opacity: u8,
}

pub struct XRenderFadePlugin {
    fades: FadeTracker<XRenderFadeImage>,
    masks: ResourceCache<(u32, u32), Rc<XRenderPicture>>,
}

impl XRenderFadePlugin {
    pub fn create(_screen: &ScreenInfo, args: &[String]) -> Result<Box<dyn XRenderPlugin>, PluginError> {
        reject_arguments(args)?;
        Ok(Box::new(Self {
            fades: FadeTracker::new(),
            masks: ResourceCache::new(),
        }))
    }

    /// The fade mask of `window` redrawn for this frame, reusing the last one of that size.
    fn fade_mask(
        &mut self,
        window: Window,
        size: (u32, u32),
        rects: &[Rect],
        alpha: u8,
        context: &XRenderContext,
    ) -> crate::error::Result<Rc<XRenderPicture>> {
        let mask = self.masks.get_or_try_insert_with(window, size, || {
            XRenderPicture::alpha_mask(context.conn.clone(), context.root, &context.formats, size.0, size.1, &[], 0)
        })?;
        mask.fill_alpha_mask(rects, alpha)?;
        Ok(mask.clone())
    }

    /// A window that never rendered has no image to fade out, but its fade-in still ends.
    fn record_unmap(&mut self, window: Window, rect: Rect, image: Option<XRenderFadeImage>) {
        match image {
            Some(image) => self.fades.window_unmapped(window, rect, image),
            None => self.fades.cancel_fade_in(window),
        }
    }
}

impl BasePlugin<XRenderWindow> for XRenderFadePlugin {
    fn plugin_name(&self) -> &str {
        PLUGIN_NAME
    }

    fn window_mapped(&mut self, _screen: &ScreenInfo, window: &XRenderWindow) {
        self.fades
            .window_mapped(window.base().id(), window.base().bordered_rect());
    }

    fn window_unmapped(&mut self, _screen: &ScreenInfo, window: &XRenderWindow) {
        let image = window.content_picture().map(|content| XRenderFadeImage {
            content,
            visible_rects: window.visible_rects(),
            opacity: window.base().opacity(),
        });
        self.record_unmap(window.base().id(), window.base().bordered_rect(), image);
    }

    fn window_destroyed(&mut self, _screen: &ScreenInfo, window: &XRenderWindow) {
        self.fades.cancel_fade_in(window.base().id());
    }

    fn window_reconfigured(&mut self, _screen: &ScreenInfo, window: &XRenderWindow) {
        self.fades
            .window_moved(window.base().id(), window.base().bordered_rect());
    }
}

impl XRenderPlugin for XRenderFadePlugin {
    fn damaged_areas(
        &mut self,
        _screen: &ScreenInfo,
        _windows: &[XRenderWindow],
        _context: &XRenderContext,
    ) -> Vec<Rect> {
        let mut areas = self.fades.step();
        areas.extend(self.fades.active_rects());
        let fades = &self.fades;
        self.masks.retain(|window| fades.is_fading(window));
        areas
    }

    fn window_render_init(
        &mut self,
        _screen: &ScreenInfo,
        window: &XRenderWindow,
        params: &mut WindowDrawParams,
        context: &XRenderContext,
    ) {
        let Some(fade) = self.fades.fade_in_alpha(window.base().id()) else {
            return;
        };
        let base = window.base();
        match self.fade_mask(
            base.id(),
            (base.real_width(), base.real_height()),
            &window.visible_rects(),
            combine_alpha(base.opacity(), fade),
            context,
        ) {
            Ok(mask) => params.mask = Some(mask),
            Err(e) => warn!("Cannot build fade mask for 0x{:x}: {}", base.id(), e),
        }
    }

    fn extra_jobs(
        &mut self,
        _screen: &ScreenInfo,
        _windows: &[XRenderWindow],
        context: &XRenderContext,
    ) -> Vec<XRenderRenderingJob> {
        let mut jobs = Vec::new();
        let fade_outs: Vec<_> = self
            .fades
            .fade_outs()
            .iter()
            .map(|fade| {
                let image = &fade.payload;
                (
                    fade.window,
                    fade.rect,
                    image.content.clone(),
                    image.visible_rects.clone(),
                    combine_alpha(image.opacity, fade.alpha),
                )
            })
            .collect();
        for (window, rect, content, visible_rects, alpha) in fade_outs {
            match self.fade_mask(window, (rect.width, rect.height), &visible_rects, alpha, context) {
                Ok(mask) => jobs.push(XRenderRenderingJob::over(content, Some(mask), rect)),
                Err(e) => warn!("Cannot build fade mask for 0x{:x}: {}", window, e),
            }
        }
        jobs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opengl::shaders::assemble_shaders;

    fn ticks(n: u32) -> Duration {
        FADE_TICK * n
    }

    fn rect() -> Rect {
        Rect::new(10, 10, 100, 100)
    }

    #[test]
    fn test_fade_in_steps_once_per_tick() {
        let mut fades = FadeTracker::<()>::new();
        let start = Instant::now();
        fades.window_mapped_at(0x10, rect(), start);
        assert_eq!(fades.fade_in_alpha(0x10), Some(0));

        assert!(fades.step_at(start + ticks(10)).is_empty());
        assert_eq!(fades.fade_in_alpha(0x10), Some(10));

        assert!(fades.step_at(start + ticks(100)).is_empty());
        assert_eq!(fades.fade_in_alpha(0x10), Some(100));
    }

    #[test]
    fn test_fade_in_completes_and_reports_area() {
        let mut fades = FadeTracker::<()>::new();
        let start = Instant::now();
        fades.window_mapped_at(0x10, rect(), start);

        let finished = fades.step_at(start + ticks(300));
        assert_eq!(finished, vec![rect()]);
        assert_eq!(fades.fade_in_alpha(0x10), None);
        assert!(!fades.is_active());
    }

    #[test]
    fn test_unmap_before_first_step_fades_out_from_opaque() {
        let mut fades = FadeTracker::new();
        let start = Instant::now();
        fades.window_mapped_at(0x10, rect(), start);
        fades.window_unmapped_at(0x10, rect(), "image", start);

        assert_eq!(fades.fade_in_alpha(0x10), None);
        assert_eq!(fades.fade_outs().len(), 1);
        assert_eq!(fades.fade_outs()[0].alpha, 255);
        assert_eq!(fades.fade_outs()[0].payload, "image");
    }

    #[test]
    fn test_unmap_during_fade_in_continues_from_current_alpha() {
        let mut fades = FadeTracker::new();
        let start = Instant::now();
        fades.window_mapped_at(0x10, rect(), start);
        fades.step_at(start + ticks(40));
        fades.window_unmapped_at(0x10, rect(), (), start + ticks(40));
        assert_eq!(fades.fade_outs()[0].alpha, 40);

        fades.step_at(start + ticks(50));
        assert_eq!(fades.fade_outs()[0].alpha, 30);
    }

    #[test]
    fn test_map_during_fade_out_reverses() {
        let mut fades = FadeTracker::new();
        let start = Instant::now();
        fades.window_unmapped_at(0x10, rect(), (), start);
        fades.step_at(start + ticks(55));
        assert_eq!(fades.fade_outs()[0].alpha, 200);

        fades.window_mapped_at(0x10, rect(), start + ticks(55));
        assert!(fades.fade_outs().is_empty());
        assert_eq!(fades.fade_in_alpha(0x10), Some(200));
    }

    #[test]
    fn test_fade_out_finishes() {
        let mut fades = FadeTracker::new();
        let start = Instant::now();
        fades.window_unmapped_at(0x10, rect(), (), start);
        assert_eq!(fades.active_rects(), vec![rect()]);

        let finished = fades.step_at(start + ticks(255));
        assert_eq!(finished, vec![rect()]);
        assert!(fades.fade_outs().is_empty());
    }

    #[test]
    fn test_is_fading_covers_both_directions() {
        let mut fades = FadeTracker::new();
        let start = Instant::now();
        fades.window_mapped_at(0x10, rect(), start);
        fades.window_unmapped_at(0x20, rect(), (), start);
        assert!(fades.is_fading(0x10));
        assert!(fades.is_fading(0x20));
        assert!(!fades.is_fading(0x30));

        fades.step_at(start + ticks(255));
        assert!(!fades.is_fading(0x10));
        assert!(!fades.is_fading(0x20));
    }

    #[test]
    fn test_destroy_drops_fade_in() {
        let mut fades = FadeTracker::<()>::new();
        fades.window_mapped(0x10, rect());
        fades.cancel_fade_in(0x10);
        assert!(!fades.is_active());
    }

    #[test]
    fn test_xrender_unmap_before_first_render_leaves_no_fades() {
        let mut plugin = XRenderFadePlugin {
            fades: FadeTracker::new(),
            masks: ResourceCache::new(),
        };
        let start = Instant::now();
        plugin.fades.window_mapped_at(0x10, rect(), start);
        assert!(plugin.fades.is_active());

        plugin.record_unmap(0x10, rect(), None);
        assert_eq!(plugin.fades.fade_in_alpha(0x10), None);
        assert!(plugin.fades.fade_outs().is_empty());
        assert!(plugin.fades.active_rects().is_empty());
        assert!(plugin.fades.step_at(start + ticks(10)).is_empty());
    }

    #[test]
    fn test_gl_fade_scales_only_alpha() {
        let plugin = OpenGlFadePlugin {
            fades: FadeTracker::new(),
        };
        let contribution = plugin.shader_contribution().unwrap();
        let shaders = assemble_shaders(&[(PLUGIN_NAME, contribution)]).unwrap();

        assert!(shaders
            .fragment
            .contains("gl_FragColor *= vec4(1.0, 1.0, 1.0, fade_Alpha);"));
        assert!(!shaders.fragment.contains("gl_FragColor *= fade_Alpha;"));
        assert!(shaders.fragment.contains("    fade();"));
    }

    #[test]
    fn test_combine_alpha() {
        assert_eq!(combine_alpha(255, 255), 255);
        assert_eq!(combine_alpha(255, 0), 0);
        assert_eq!(combine_alpha(128, 255), 128);
        assert_eq!(combine_alpha(255, 51), 51);
    }

    #[test]
    fn test_fade_rejects_arguments() {
        assert!(reject_arguments(&[]).is_ok());
        let err = reject_arguments(&["fast".to_string()]).unwrap_err();
        assert!(err.to_string().contains("fade"));
    }
}
