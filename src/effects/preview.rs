//! Window previews for the iconbar.
//!
//! While the window manager advertises the iconbar button under the pointer (through
//! `_FBCOMPOSE_CURRENT_ICONBAR_ITEM` on the root window), a scaled-down translucent copy
//! of that window follows the pointer, kept inside the head the pointer is on.

use std::rc::Rc;

use log::{debug, warn};
use x11rb::protocol::xproto::{Pixmap, Window};

use crate::damage::Rect;
use crate::effects::ResourceCache;
use crate::error::PluginError;
use crate::opengl::resources::OpenGlBuffer;
use crate::opengl::{OpenGlDefaults, OpenGlPlugin, OpenGlRenderingJob, OpenGlWindow};
use crate::plugin::BasePlugin;
use crate::screen::ScreenInfo;
use crate::window::CompWindow;
use crate::x11::XServer;
use crate::xrender::resources::XRenderPicture;
use crate::xrender::{XRenderContext, XRenderPlugin, XRenderRenderingJob, XRenderWindow};

pub const PLUGIN_NAME: &str = "preview";

/// Gap between the pointer and the preview.
const POINTER_GAP: i32 = 10;

/// Preview size limits and translucency, from the plugin arguments
/// `preview [max_width max_height [alpha]]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviewSettings {
    pub max_width: u32,
    pub max_height: u32,
    pub alpha: u8,
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            max_width: 150,
            max_height: 150,
            alpha: 204,
        }
    }
}

impl PreviewSettings {
    pub fn from_args(args: &[String]) -> Result<Self, PluginError> {
        let invalid = |reason: String| PluginError::InvalidArguments {
            name: PLUGIN_NAME.to_string(),
            reason,
        };
        let number = |arg: &String| {
            arg.parse::<u32>()
                .map_err(|e| invalid(format!("'{}': {}", arg, e)))
        };

        let mut settings = Self::default();
        match args {
            [] => {}
            [width, height, rest @ ..] if rest.len() <= 1 => {
                settings.max_width = number(width)?;
                settings.max_height = number(height)?;
                if let Some(alpha) = rest.first() {
                    settings.alpha = u8::try_from(number(alpha)?)
                        .map_err(|_| invalid(format!("alpha {} is not in 0..=255", alpha)))?;
                }
            }
            _ => {
                return Err(invalid(format!(
                    "expected 'max_width max_height [alpha]', got '{}'",
                    args.join(" ")
                )))
            }
        }
        if settings.max_width == 0 || settings.max_height == 0 {
            return Err(invalid("preview size must be positive".to_string()));
        }
        Ok(settings)
    }
}

/// Where the preview of a `width`×`height` window goes: scaled to fit the limits with its
/// aspect ratio kept, centered above the pointer and moved inside `head`.
pub fn preview_geometry(
    width: u32,
    height: u32,
    pointer: (i32, i32),
    head: Rect,
    settings: &PreviewSettings,
) -> Rect {
    let scale = (settings.max_width as f64 / width.max(1) as f64)
        .min(settings.max_height as f64 / height.max(1) as f64)
        .min(1.0);
    let preview_width = ((width as f64 * scale).round() as u32).max(1);
    let preview_height = ((height as f64 * scale).round() as u32).max(1);

    let x = pointer.0 - preview_width as i32 / 2;
    let y = pointer.1 - preview_height as i32 - POINTER_GAP;
    let clamp = |value: i32, start: i32, size: u32, extent: u32| {
        let end = start + size as i32 - extent as i32;
        value.min(end).max(start)
    };
    Rect::new(
        clamp(x, head.x, head.width, preview_width),
        clamp(y, head.y, head.height, preview_height),
        preview_width,
        preview_height,
    )
}

/// Maps `rect`, given in a `from` sized space, into `to`.
pub fn scale_rect(rect: Rect, from: (u32, u32), to: Rect) -> Rect {
    let sx = to.width as f64 / from.0.max(1) as f64;
    let sy = to.height as f64 / from.1.max(1) as f64;
    let x0 = (rect.x as f64 * sx).round() as i32;
    let y0 = (rect.y as f64 * sy).round() as i32;
    let x1 = (rect.right() as f64 * sx).round() as i32;
    let y1 = (rect.bottom() as f64 * sy).round() as i32;
    Rect::new(
        to.x + x0,
        to.y + y0,
        (x1 - x0).max(0) as u32,
        (y1 - y0).max(0) as u32,
    )
}

/// The mapped window whose iconbar button is hovered, if any.
pub fn preview_target<'a, W: CompWindow>(screen: &ScreenInfo, windows: &'a [W]) -> Option<&'a W> {
    if screen.current_iconbar_item == x11rb::NONE {
        return None;
    }
    windows.iter().find(|window| {
        let base = window.base();
        base.id() == screen.current_iconbar_item && base.is_mapped() && !base.is_ignored()
    })
}

/// Target window and preview rectangle for this frame.
fn locate<'a, W: CompWindow>(
    screen: &ScreenInfo,
    windows: &'a [W],
    server: &dyn XServer,
    settings: &PreviewSettings,
) -> Option<(&'a W, Rect)> {
    let target = preview_target(screen, windows)?;
    let pointer = match server.pointer_position(screen.root) {
        Ok(pointer) => pointer,
        Err(e) => {
            warn!("Cannot query the pointer for a preview: {}", e);
            return None;
        }
    };
    let base = target.base();
    let geometry = preview_geometry(
        base.real_width(),
        base.real_height(),
        pointer,
        screen.head_at(pointer.0, pointer.1),
        settings,
    );
    Some((target, geometry))
}

//--- OpenGL -----------------------------------------------------------------

pub struct OpenGlPreviewPlugin {
    settings: PreviewSettings,
    /// One position buffer per content tile of the previewed window.
    positions: ResourceCache<usize, Vec<Rc<OpenGlBuffer>>>,
}

impl OpenGlPreviewPlugin {
    pub fn create(_screen: &ScreenInfo, args: &[String]) -> Result<Box<dyn OpenGlPlugin>, PluginError> {
        Ok(Box::new(Self {
            settings: PreviewSettings::from_args(args)?,
            positions: ResourceCache::new(),
        }))
    }
}

impl BasePlugin<OpenGlWindow> for OpenGlPreviewPlugin {
    fn plugin_name(&self) -> &str {
        PLUGIN_NAME
    }
}

impl OpenGlPlugin for OpenGlPreviewPlugin {
    fn extra_jobs(
        &mut self,
        screen: &ScreenInfo,
        windows: &[OpenGlWindow],
        defaults: &OpenGlDefaults,
    ) -> Vec<OpenGlRenderingJob> {
        let Some((window, geometry)) = locate(screen, windows, defaults.server.as_ref(), &self.settings) else {
            self.positions.retain(|_| false);
            return Vec::new();
        };
        let id = window.base().id();
        let size = (window.base().real_width(), window.base().real_height());
        let alpha = self.settings.alpha as f32 / 255.0 * window.base().alpha();

        self.positions.retain(|cached| cached == id);
        let tile_count = window.content_tiles().count();
        let positions = self.positions.get_or_insert_with(id, tile_count, || {
            (0..tile_count)
                .map(|_| Rc::new(OpenGlBuffer::new(gl::ARRAY_BUFFER)))
                .collect()
        });

        window
            .content_tiles()
            .zip(positions)
            .enumerate()
            .map(|(part_id, (tile, position))| {
                position.set_rect(scale_rect(tile.rect, size, geometry), screen.width, screen.height);
                let mut job = OpenGlRenderingJob::textured(defaults, position.clone(), tile.texture, alpha);
                if let Some(shape) = window.shape_texture(part_id) {
                    job.shape_texture = shape;
                }
                job
            })
            .collect()
    }
}

//--- XRender ----------------------------------------------------------------

/// Scaled picture of the previewed window, reused while neither the window's pixmap
/// nor the preview size change.
struct ScaledPicture {
    window: Window,
    pixmap: Pixmap,
    size: (u32, u32),
    source: Rc<XRenderPicture>,
    mask: Rc<XRenderPicture>,
}

pub struct XRenderPreviewPlugin {
    settings: PreviewSettings,
    geometry: Option<Rect>,
    scaled: Option<ScaledPicture>,
}

impl XRenderPreviewPlugin {
    pub fn create(_screen: &ScreenInfo, args: &[String]) -> Result<Box<dyn XRenderPlugin>, PluginError> {
        Ok(Box::new(Self {
            settings: PreviewSettings::from_args(args)?,
            geometry: None,
            scaled: None,
        }))
    }

    fn scaled_picture(
        &self,
        window: &XRenderWindow,
        geometry: Rect,
        context: &XRenderContext,
    ) -> crate::error::Result<ScaledPicture> {
        let base = window.base();
        let source = XRenderPicture::for_drawable(
            context.conn.clone(),
            base.content_pixmap(),
            context.formats.for_visual(base.visual(), base.depth()),
            base.real_width(),
            base.real_height(),
        )?;
        source.set_scale(geometry.width, geometry.height, &context.preview_filter)?;
        let alpha = crate::effects::fade::combine_alpha(base.opacity(), self.settings.alpha);
        let mask = XRenderPicture::alpha_mask(
            context.conn.clone(),
            context.root,
            &context.formats,
            geometry.width,
            geometry.height,
            &[Rect::new(0, 0, geometry.width, geometry.height)],
            alpha,
        )?;
        Ok(ScaledPicture {
            window: base.id(),
            pixmap: base.content_pixmap(),
            size: (geometry.width, geometry.height),
            source,
            mask,
        })
    }
}

impl BasePlugin<XRenderWindow> for XRenderPreviewPlugin {
    fn plugin_name(&self) -> &str {
        PLUGIN_NAME
    }

    fn window_destroyed(&mut self, _screen: &ScreenInfo, window: &XRenderWindow) {
        if self.scaled.as_ref().is_some_and(|s| s.window == window.base().id()) {
            self.scaled = None;
        }
    }
}

impl XRenderPlugin for XRenderPreviewPlugin {
    fn damaged_areas(
        &mut self,
        screen: &ScreenInfo,
        windows: &[XRenderWindow],
        context: &XRenderContext,
    ) -> Vec<Rect> {
        let previous = self.geometry.take();
        self.geometry = locate(screen, windows, context.conn.as_ref(), &self.settings)
            .map(|(_, geometry)| geometry);
        previous.into_iter().chain(self.geometry).collect()
    }

    fn extra_jobs(
        &mut self,
        screen: &ScreenInfo,
        windows: &[XRenderWindow],
        context: &XRenderContext,
    ) -> Vec<XRenderRenderingJob> {
        let (Some(geometry), Some(window)) = (self.geometry, preview_target(screen, windows)) else {
            return Vec::new();
        };
        if window.base().content_pixmap() == x11rb::NONE {
            return Vec::new();
        }

        let stale = self.scaled.as_ref().map_or(true, |scaled| {
            scaled.window != window.base().id()
                || scaled.pixmap != window.base().content_pixmap()
                || scaled.size != (geometry.width, geometry.height)
        });
        if stale {
            self.scaled = match self.scaled_picture(window, geometry, context) {
                Ok(scaled) => Some(scaled),
                Err(e) => {
                    debug!("Cannot build preview of 0x{:x}: {}", window.base().id(), e);
                    None
                }
            };
        }

        self.scaled
            .as_ref()
            .map(|scaled| XRenderRenderingJob::over(scaled.source.clone(), Some(scaled.mask.clone()), geometry))
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_settings_from_args() {
        assert_eq!(PreviewSettings::from_args(&[]).unwrap(), PreviewSettings::default());

        let settings = PreviewSettings::from_args(&args(&["300", "200", "128"])).unwrap();
        assert_eq!(
            settings,
            PreviewSettings {
                max_width: 300,
                max_height: 200,
                alpha: 128
            }
        );

        assert!(PreviewSettings::from_args(&args(&["300"])).is_err());
        assert!(PreviewSettings::from_args(&args(&["wide", "200"])).is_err());
        assert!(PreviewSettings::from_args(&args(&["0", "200"])).is_err());
        assert!(PreviewSettings::from_args(&args(&["300", "200", "256"])).is_err());
    }

    #[test]
    fn test_preview_keeps_aspect_ratio() {
        let head = Rect::new(0, 0, 1920, 1080);
        let settings = PreviewSettings::default();
        let geometry = preview_geometry(800, 400, (960, 900), head, &settings);
        assert_eq!((geometry.width, geometry.height), (150, 75));
        assert_eq!(geometry.x, 960 - 75);
        assert_eq!(geometry.y, 900 - 75 - POINTER_GAP);
    }

    #[test]
    fn test_small_windows_are_not_enlarged() {
        let head = Rect::new(0, 0, 1920, 1080);
        let geometry = preview_geometry(40, 30, (500, 500), head, &PreviewSettings::default());
        assert_eq!((geometry.width, geometry.height), (40, 30));
    }

    #[test]
    fn test_preview_stays_inside_the_head() {
        let head = Rect::new(1920, 0, 1280, 1024);
        let settings = PreviewSettings::default();

        let top_left = preview_geometry(300, 300, (1925, 5), head, &settings);
        assert_eq!((top_left.x, top_left.y), (1920, 0));

        let bottom_right = preview_geometry(300, 300, (3199, 1023), head, &settings);
        assert!(head.contains_rect(&bottom_right));
        assert_eq!(bottom_right.right(), head.right());
    }

    #[test]
    fn test_scale_rect() {
        let to = Rect::new(100, 100, 50, 25);
        assert_eq!(scale_rect(Rect::new(0, 0, 200, 100), (200, 100), to), to);
        assert_eq!(
            scale_rect(Rect::new(100, 0, 100, 100), (200, 100), to),
            Rect::new(125, 100, 25, 25)
        );
    }
}
