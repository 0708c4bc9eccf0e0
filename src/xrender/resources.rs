//! XRender pictures and picture formats.

use std::collections::HashMap;
use std::rc::Rc;

use log::warn;
use x11rb::connection::Connection;
use x11rb::protocol::render::{
    Color, ConnectionExt as _, CreatePictureAux, Fixed, PictOp, PictType, Pictformat,
    Pictforminfo, Picture, Transform,
};
use x11rb::protocol::xproto::{
    ConnectionExt as _, Drawable, Pixmap, Rectangle, SubwindowMode, Visualid, Window,
};

use crate::damage::Rect;
use crate::error::{CompositorError, Result};
use crate::x11::XConnection;

/// Filters accepted for scaled pictures.
pub const PICTURE_FILTERS: [&str; 5] = ["fast", "good", "best", "nearest", "bilinear"];

/// The standard formats every Render implementation provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandardFormat {
    Argb32,
    Rgb24,
    A8,
}

impl StandardFormat {
    fn matches(self, info: &Pictforminfo) -> bool {
        let d = &info.direct;
        if info.type_ != PictType::DIRECT {
            return false;
        }
        match self {
            StandardFormat::Argb32 => {
                info.depth == 32
                    && (d.alpha_shift, d.alpha_mask) == (24, 0xff)
                    && (d.red_shift, d.red_mask) == (16, 0xff)
                    && (d.green_shift, d.green_mask) == (8, 0xff)
                    && (d.blue_shift, d.blue_mask) == (0, 0xff)
            }
            StandardFormat::Rgb24 => {
                info.depth == 24
                    && d.alpha_mask == 0
                    && (d.red_shift, d.red_mask) == (16, 0xff)
                    && (d.green_shift, d.green_mask) == (8, 0xff)
                    && (d.blue_shift, d.blue_mask) == (0, 0xff)
            }
            StandardFormat::A8 => {
                info.depth == 8
                    && (d.alpha_shift, d.alpha_mask) == (0, 0xff)
                    && d.red_mask == 0
                    && d.green_mask == 0
                    && d.blue_mask == 0
            }
        }
    }
}

pub fn find_standard_format(formats: &[Pictforminfo], standard: StandardFormat) -> Option<Pictformat> {
    formats
        .iter()
        .find(|info| standard.matches(info))
        .map(|info| info.id)
}

/// Picture formats of one connection.
#[derive(Debug, Clone)]
pub struct PictFormats {
    pub argb32: Pictformat,
    pub rgb24: Pictformat,
    pub a8: Pictformat,
    visuals: HashMap<Visualid, Pictformat>,
}

impl PictFormats {
    pub fn query(conn: &XConnection) -> Result<Self> {
        let reply = conn.conn().render_query_pict_formats()?.reply()?;
        let find = |standard| {
            find_standard_format(&reply.formats, standard).ok_or_else(|| {
                CompositorError::XRender(format!("the server lacks the {:?} picture format", standard))
            })
        };
        let visuals = reply
            .screens
            .iter()
            .flat_map(|screen| &screen.depths)
            .flat_map(|depth| &depth.visuals)
            .map(|visual| (visual.visual, visual.format))
            .collect();

        Ok(Self {
            argb32: find(StandardFormat::Argb32)?,
            rgb24: find(StandardFormat::Rgb24)?,
            a8: find(StandardFormat::A8)?,
            visuals,
        })
    }

    /// Format for drawables of `visual`, falling back to a standard format of `depth`.
    pub fn for_visual(&self, visual: Visualid, depth: u8) -> Pictformat {
        self.visuals
            .get(&visual)
            .copied()
            .unwrap_or_else(|| self.for_depth(depth))
    }

    pub fn for_depth(&self, depth: u8) -> Pictformat {
        match depth {
            32 => self.argb32,
            8 => self.a8,
            _ => self.rgb24,
        }
    }
}

/// 16-bit Render color with premultiplied alpha.
pub fn alpha_color(alpha: u8) -> Color {
    let value = alpha as u16 * 0x101;
    Color {
        red: value,
        green: value,
        blue: value,
        alpha: value,
    }
}

/// Scaling transform mapping a destination of `dst` size onto a source of `src` size.
pub fn scale_transform(src: (u32, u32), dst: (u32, u32)) -> Transform {
    let ratio = |s: u32, d: u32| {
        if d == 0 {
            1 << 16
        } else {
            (((s as i64) << 16) / d as i64) as Fixed
        }
    };
    Transform {
        matrix11: ratio(src.0, dst.0),
        matrix12: 0,
        matrix13: 0,
        matrix21: 0,
        matrix22: ratio(src.1, dst.1),
        matrix23: 0,
        matrix31: 0,
        matrix32: 0,
        matrix33: 1 << 16,
    }
}

/// A Render picture, freed when the last handle drops. Pixmaps the picture was created
/// for are freed along with it.
pub struct XRenderPicture {
    conn: Rc<XConnection>,
    picture: Picture,
    owned_pixmap: Option<Pixmap>,
    width: u32,
    height: u32,
}

impl XRenderPicture {
    /// Picture reading from a drawable the caller owns.
    pub fn for_drawable(
        conn: Rc<XConnection>,
        drawable: Drawable,
        format: Pictformat,
        width: u32,
        height: u32,
    ) -> Result<Rc<Self>> {
        let picture = conn.conn().generate_id()?;
        conn.conn().render_create_picture(
            picture,
            drawable,
            format,
            &CreatePictureAux::new().subwindowmode(SubwindowMode::INCLUDE_INFERIORS),
        )?;
        Ok(Rc::new(Self {
            conn,
            picture,
            owned_pixmap: None,
            width,
            height,
        }))
    }

    /// Picture on a fresh pixmap of the given depth.
    pub fn with_pixmap(
        conn: Rc<XConnection>,
        root: Window,
        depth: u8,
        format: Pictformat,
        width: u32,
        height: u32,
    ) -> Result<Rc<Self>> {
        let pixmap = conn.conn().generate_id()?;
        conn.conn().create_pixmap(
            depth,
            pixmap,
            root,
            width.clamp(1, u16::MAX as u32) as u16,
            height.clamp(1, u16::MAX as u32) as u16,
        )?;
        let picture = conn.conn().generate_id()?;
        conn.conn()
            .render_create_picture(picture, pixmap, format, &CreatePictureAux::new())?;
        Ok(Rc::new(Self {
            conn,
            picture,
            owned_pixmap: Some(pixmap),
            width,
            height,
        }))
    }

    /// An A8 mask that is `alpha` inside `rects` and transparent elsewhere.
    pub fn alpha_mask(
        conn: Rc<XConnection>,
        root: Window,
        formats: &PictFormats,
        width: u32,
        height: u32,
        rects: &[Rect],
        alpha: u8,
    ) -> Result<Rc<Self>> {
        let mask = Self::with_pixmap(conn, root, 8, formats.a8, width, height)?;
        mask.fill_alpha_mask(rects, alpha)?;
        Ok(mask)
    }

    /// Redraws an alpha mask in place: `alpha` inside `rects`, transparent elsewhere.
    pub fn fill_alpha_mask(&self, rects: &[Rect], alpha: u8) -> Result<()> {
        self.fill(PictOp::SRC, alpha_color(0), &[Rect::new(0, 0, self.width, self.height)])?;
        self.fill(PictOp::SRC, alpha_color(alpha), rects)
    }

    pub fn id(&self) -> Picture {
        self.picture
    }

    /// The pixmap this picture owns, if it created one.
    pub fn pixmap(&self) -> Option<Pixmap> {
        self.owned_pixmap
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn fill(&self, op: PictOp, color: Color, rects: &[Rect]) -> Result<()> {
        let rects: Vec<Rectangle> = rects.iter().map(Rect::to_x11).collect();
        if !rects.is_empty() {
            self.conn
                .conn()
                .render_fill_rectangles(op, self.picture, color, &rects)?;
        }
        Ok(())
    }

    pub fn set_clip(&self, rects: &[Rectangle]) -> Result<()> {
        self.conn
            .conn()
            .render_set_picture_clip_rectangles(self.picture, 0, 0, rects)?;
        Ok(())
    }

    /// Draws this picture scaled to `dst` size, sampled with `filter`.
    pub fn set_scale(&self, dst_width: u32, dst_height: u32, filter: &str) -> Result<()> {
        let conn = self.conn.conn();
        conn.render_set_picture_transform(
            self.picture,
            scale_transform((self.width, self.height), (dst_width, dst_height)),
        )?;
        conn.render_set_picture_filter(self.picture, filter.as_bytes(), &[])?;
        Ok(())
    }
}

impl Drop for XRenderPicture {
    fn drop(&mut self) {
        if let Err(e) = self.conn.conn().render_free_picture(self.picture) {
            warn!("Failed to free picture 0x{:x}: {}", self.picture, e);
        }
        if let Some(pixmap) = self.owned_pixmap {
            if let Err(e) = self.conn.conn().free_pixmap(pixmap) {
                warn!("Failed to free pixmap 0x{:x}: {}", pixmap, e);
            }
        }
    }
}
