use std::num::NonZeroU32;
use std::rc::Rc;

use x11rb::protocol::xproto::Window;

use super::resources::{OpenGl2DTexture, OpenGlBuffer, OpenGlTexturePartition, TexturePartitionTile};
use crate::damage::Rect;
use crate::error::{IndexError, Result};
use crate::window::{BaseCompWindow, CompWindow, ContentChanges};
use crate::x11::XConnection;

/// A window drawn from per-tile content textures.
pub struct OpenGlWindow {
    base: BaseCompWindow,
    conn: Rc<XConnection>,
    content: OpenGlTexturePartition,
    /// Empty for unshaped windows, which are drawn with a plain white shape.
    shape: OpenGlTexturePartition,
    position_buffers: Vec<Rc<OpenGlBuffer>>,
    positions_for: Option<(Rect, u32, u32)>,
    max_texture_size: NonZeroU32,
}

impl OpenGlWindow {
    pub fn new(conn: Rc<XConnection>, window: Window, max_texture_size: NonZeroU32) -> Result<Self> {
        let base = BaseCompWindow::new(conn.clone(), window)?;
        Ok(Self {
            base,
            conn,
            content: OpenGlTexturePartition::new(max_texture_size),
            shape: OpenGlTexturePartition::new(max_texture_size),
            position_buffers: Vec::new(),
            positions_for: None,
            max_texture_size,
        })
    }

    /// Content tiles; empty until the contents were uploaded once.
    pub fn content_tiles(&self) -> impl Iterator<Item = TexturePartitionTile> + '_ {
        self.content.tiles()
    }

    /// Shape texture for a content tile, `None` for unshaped windows.
    pub fn shape_texture(&self, part_id: usize) -> Option<Rc<OpenGl2DTexture>> {
        if self.shape.is_empty() {
            return None;
        }
        self.shape.tile(part_id).ok().map(|tile| tile.texture)
    }

    pub fn position_buffer(&self, part_id: usize) -> std::result::Result<Rc<OpenGlBuffer>, IndexError> {
        self.position_buffers
            .get(part_id)
            .cloned()
            .ok_or(IndexError {
                what: "window position buffer",
                index: part_id,
                len: self.position_buffers.len(),
            })
    }

    /// Screen rectangle of each content tile.
    pub fn tile_screen_rects(&self) -> Vec<Rect> {
        let (x, y) = (self.base.x(), self.base.y());
        self.content.tiles().map(|tile| tile.rect.translated(x, y)).collect()
    }

    /// Rebuilds the tile position buffers if the window moved, was re-partitioned or the
    /// screen changed size.
    pub fn update_positions(&mut self, screen_width: u32, screen_height: u32) {
        let key = (self.base.bordered_rect(), screen_width, screen_height);
        if self.positions_for == Some(key) && self.position_buffers.len() == self.content.len() {
            return;
        }
        self.position_buffers = self
            .tile_screen_rects()
            .into_iter()
            .map(|rect| {
                let buffer = OpenGlBuffer::new(gl::ARRAY_BUFFER);
                buffer.set_rect(rect, screen_width, screen_height);
                Rc::new(buffer)
            })
            .collect();
        self.positions_for = Some(key);
    }

    fn update_shape_textures(&mut self) -> Result<()> {
        if self.base.is_shaped() {
            self.shape
                .set_size(self.base.real_width(), self.base.real_height());
            self.shape.upload_shape(self.base.clip_shape_rects())?;
        } else if !self.shape.is_empty() {
            self.shape = OpenGlTexturePartition::new(self.max_texture_size);
        }
        Ok(())
    }
}

impl CompWindow for OpenGlWindow {
    fn base(&self) -> &BaseCompWindow {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseCompWindow {
        &mut self.base
    }

    fn update_contents(&mut self) -> Result<()> {
        let changes = self.base.update_contents()?;
        let pixmap = self.base.content_pixmap();
        if pixmap == x11rb::NONE || !self.base.is_mapped() {
            return Ok(());
        }

        let resized = self
            .content
            .set_size(self.base.real_width(), self.base.real_height());
        if resized {
            self.positions_for = None;
        }
        if let Err(e) = self
            .content
            .upload_from_drawable(&self.conn, pixmap, self.base.depth())
        {
            // A resized partition needs its shape rebuilt on the retry as well.
            self.base.retry_contents(&ContentChanges {
                shape_changed: changes.shape_changed || resized,
                ..changes
            });
            return Err(e);
        }

        if changes.shape_changed || resized {
            self.update_shape_textures()?;
        }
        Ok(())
    }
}
