use std::rc::Rc;

use x11rb::protocol::xproto::{Atom, Property, Window};

use super::resources::{PictFormats, XRenderPicture};
use crate::damage::Rect;
use crate::error::Result;
use crate::window::{BaseCompWindow, CompWindow};
use crate::x11::XConnection;

/// Whether a window needs a mask picture at all.
pub fn needs_mask(shaped: bool, opacity: u8) -> bool {
    shaped || opacity < 255
}

/// A window drawn from a picture on its content pixmap.
pub struct XRenderWindow {
    base: BaseCompWindow,
    conn: Rc<XConnection>,
    formats: Rc<PictFormats>,
    root: Window,
    content: Option<Rc<XRenderPicture>>,
    mask: Option<Rc<XRenderPicture>>,
    mask_dirty: bool,
}

impl XRenderWindow {
    pub fn new(conn: Rc<XConnection>, formats: Rc<PictFormats>, root: Window, window: Window) -> Result<Self> {
        let base = BaseCompWindow::new(conn.clone(), window)?;
        Ok(Self {
            base,
            conn,
            formats,
            root,
            content: None,
            mask: None,
            mask_dirty: true,
        })
    }

    /// Content picture; `None` until the window was mapped and updated once.
    pub fn content_picture(&self) -> Option<Rc<XRenderPicture>> {
        self.content.clone()
    }

    /// Mask combining the clip shape and the opacity. `None` for unshaped opaque windows.
    pub fn mask_picture(&self) -> Option<Rc<XRenderPicture>> {
        self.mask.clone()
    }

    /// Rectangles of the window that are visible, relative to the border origin.
    pub fn visible_rects(&self) -> Vec<Rect> {
        if self.base.is_shaped() {
            self.base.clip_shape_rects().to_vec()
        } else {
            vec![Rect::new(0, 0, self.base.real_width(), self.base.real_height())]
        }
    }

    /// Rebuilds the mask if the shape or the opacity changed since it was built.
    pub fn update_mask(&mut self) -> Result<()> {
        if !self.mask_dirty {
            return Ok(());
        }
        self.mask_dirty = false;
        self.mask = if needs_mask(self.base.is_shaped(), self.base.opacity()) {
            Some(XRenderPicture::alpha_mask(
                self.conn.clone(),
                self.root,
                &self.formats,
                self.base.real_width(),
                self.base.real_height(),
                &self.visible_rects(),
                self.base.opacity(),
            )?)
        } else {
            None
        };
        Ok(())
    }
}

impl CompWindow for XRenderWindow {
    fn base(&self) -> &BaseCompWindow {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseCompWindow {
        &mut self.base
    }

    fn update_contents(&mut self) -> Result<()> {
        let changes = self.base.update_contents()?;
        let pixmap = self.base.content_pixmap();
        if pixmap != x11rb::NONE && (changes.pixmap_changed || self.content.is_none()) {
            let format = self.formats.for_visual(self.base.visual(), self.base.depth());
            let picture = XRenderPicture::for_drawable(
                self.conn.clone(),
                pixmap,
                format,
                self.base.real_width(),
                self.base.real_height(),
            );
            match picture {
                Ok(picture) => self.content = Some(picture),
                Err(e) => {
                    self.content = None;
                    self.base.retry_contents(&changes);
                    return Err(e);
                }
            }
        }
        if changes.shape_changed || changes.resized {
            self.mask_dirty = true;
        }
        self.update_mask()
    }

    fn update_property(&mut self, property: Atom, state: Property) -> Result<()> {
        let opacity = self.base.opacity();
        self.base.update_property(property, state)?;
        if self.base.opacity() != opacity {
            self.mask_dirty = true;
        }
        Ok(())
    }
}
