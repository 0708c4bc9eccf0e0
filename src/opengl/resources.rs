//! Reference-counted GL objects
//!
//! Buffers and textures are wrapped in `Rc` so a rendering job contributed by a plugin can
//! keep using a window's texture after the window itself is gone. The GL object is deleted
//! when the last handle drops. All of these require the screen's context to be current.

use std::num::NonZeroU32;
use std::rc::Rc;

use gl::types::{GLenum, GLint, GLsizeiptr, GLuint};
use log::trace;
use x11rb::protocol::xproto::{ConnectionExt as _, Drawable, ImageFormat};

use super::partition::{partition_space, Borders, PartitionTile, SpacePartition};
use crate::damage::Rect;
use crate::error::{IndexError, Result};
use crate::x11::XConnection;

/// Texture coordinates of a full texture, in triangle strip order.
pub const FULL_TEX_COORDS: [f32; 8] = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0];

/// Converts a screen rectangle to a triangle strip in normalized device coordinates.
///
/// Vertices are ordered top-left, top-right, bottom-left, bottom-right.
pub fn rect_to_ndc(rect: Rect, screen_width: u32, screen_height: u32) -> [f32; 8] {
    let to_x = |x: i64| 2.0 * x as f32 / screen_width as f32 - 1.0;
    let to_y = |y: i64| 1.0 - 2.0 * y as f32 / screen_height as f32;
    let (left, right) = (to_x(rect.x as i64), to_x(rect.right()));
    let (top, bottom) = (to_y(rect.y as i64), to_y(rect.bottom()));
    [left, top, right, top, left, bottom, right, bottom]
}

/// Inverse of [`rect_to_ndc`], rounding to whole pixels.
pub fn ndc_to_rect(coords: &[f32; 8], screen_width: u32, screen_height: u32) -> Rect {
    let from_x = |x: f32| ((x + 1.0) * screen_width as f32 / 2.0).round() as i64;
    let from_y = |y: f32| ((1.0 - y) * screen_height as f32 / 2.0).round() as i64;
    let (left, top) = (from_x(coords[0]), from_y(coords[1]));
    let (right, bottom) = (from_x(coords[6]), from_y(coords[7]));
    Rect::new(
        left as i32,
        top as i32,
        (right - left).max(0) as u32,
        (bottom - top).max(0) as u32,
    )
}

/// Closed outline of a rectangle for `GL_LINE_LOOP`, in NDC.
pub fn rect_outline_ndc(rect: Rect, screen_width: u32, screen_height: u32) -> [f32; 8] {
    let [l, t, r, _, _, b, ..] = rect_to_ndc(rect, screen_width, screen_height);
    [l, t, r, t, r, b, l, b]
}

/// A GL buffer object.
#[derive(Debug)]
pub struct OpenGlBuffer {
    id: GLuint,
    target: GLenum,
}

impl OpenGlBuffer {
    pub fn new(target: GLenum) -> Self {
        let mut id = 0;
        unsafe { gl::GenBuffers(1, &mut id) };
        Self { id, target }
    }

    /// Array buffer filled with `data`.
    pub fn with_data(data: &[f32]) -> Rc<Self> {
        let buffer = Self::new(gl::ARRAY_BUFFER);
        buffer.buffer_data(data);
        Rc::new(buffer)
    }

    pub fn id(&self) -> GLuint {
        self.id
    }

    pub fn bind(&self) {
        unsafe { gl::BindBuffer(self.target, self.id) };
    }

    pub fn buffer_data(&self, data: &[f32]) {
        unsafe {
            gl::BindBuffer(self.target, self.id);
            gl::BufferData(
                self.target,
                std::mem::size_of_val(data) as GLsizeiptr,
                data.as_ptr().cast(),
                gl::STATIC_DRAW,
            );
        }
    }

    /// Four-vertex position buffer for a screen rectangle.
    pub fn set_rect(&self, rect: Rect, screen_width: u32, screen_height: u32) {
        self.buffer_data(&rect_to_ndc(rect, screen_width, screen_height));
    }
}

impl Drop for OpenGlBuffer {
    fn drop(&mut self) {
        unsafe { gl::DeleteBuffers(1, &self.id) };
    }
}

/// A 2D texture with clamped, linearly filtered sampling.
#[derive(Debug)]
pub struct OpenGl2DTexture {
    id: GLuint,
    width: u32,
    height: u32,
}

impl OpenGl2DTexture {
    pub fn new() -> Self {
        let mut id = 0;
        unsafe {
            gl::GenTextures(1, &mut id);
            gl::BindTexture(gl::TEXTURE_2D, id);
            gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_WRAP_S, gl::CLAMP_TO_EDGE as GLint);
            gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_WRAP_T, gl::CLAMP_TO_EDGE as GLint);
            gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_MIN_FILTER, gl::LINEAR as GLint);
            gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_MAG_FILTER, gl::LINEAR as GLint);
        }
        Self {
            id,
            width: 0,
            height: 0,
        }
    }

    /// 1x1 texture of one BGRA color.
    pub fn solid(bgra: [u8; 4]) -> Rc<Self> {
        let mut texture = Self::new();
        texture.set_image(1, 1, gl::RGBA, &bgra);
        Rc::new(texture)
    }

    pub fn id(&self) -> GLuint {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bind(&self) {
        unsafe { gl::BindTexture(gl::TEXTURE_2D, self.id) };
    }

    /// Uploads 32-bit BGRA pixels.
    pub fn set_image(&mut self, width: u32, height: u32, internal_format: GLenum, bgra: &[u8]) {
        debug_assert!(bgra.len() >= (width * height * 4) as usize);
        unsafe {
            gl::BindTexture(gl::TEXTURE_2D, self.id);
            gl::PixelStorei(gl::UNPACK_ALIGNMENT, 4);
            gl::TexImage2D(
                gl::TEXTURE_2D,
                0,
                internal_format as GLint,
                width as i32,
                height as i32,
                0,
                gl::BGRA,
                gl::UNSIGNED_BYTE,
                bgra.as_ptr().cast(),
            );
        }
        self.width = width;
        self.height = height;
    }
}

impl Default for OpenGl2DTexture {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for OpenGl2DTexture {
    fn drop(&mut self) {
        unsafe { gl::DeleteTextures(1, &self.id) };
    }
}

/// Internal texture format for a drawable of the given depth.
pub fn internal_format_for_depth(depth: u8) -> GLenum {
    if depth == 32 {
        gl::RGBA
    } else {
        gl::RGB
    }
}

/// One tile of a partitioned texture.
#[derive(Debug, Clone)]
pub struct TexturePartitionTile {
    /// Position and size relative to the surface origin.
    pub rect: Rect,
    pub borders: Borders,
    pub texture: Rc<OpenGl2DTexture>,
}

/// A surface stored as one texture per tile.
#[derive(Debug)]
pub struct OpenGlTexturePartition {
    max_size: NonZeroU32,
    width: u32,
    height: u32,
    partition: SpacePartition,
    textures: Vec<Rc<OpenGl2DTexture>>,
}

impl OpenGlTexturePartition {
    pub fn new(max_size: NonZeroU32) -> Self {
        Self {
            max_size,
            width: 0,
            height: 0,
            partition: partition_space(0, 0, max_size),
            textures: Vec::new(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    /// Re-partitions for a new surface size. Returns true if the size changed.
    pub fn set_size(&mut self, width: u32, height: u32) -> bool {
        if width == self.width && height == self.height && !self.textures.is_empty() {
            return false;
        }
        self.width = width;
        self.height = height;
        self.partition = partition_space(width, height, self.max_size);
        let needed = self.partition.len();
        self.textures.truncate(needed);
        while self.textures.len() < needed {
            self.textures.push(Rc::new(OpenGl2DTexture::new()));
        }
        trace!(
            "Texture partition {}x{} uses {} tile(s)",
            width,
            height,
            needed
        );
        true
    }

    pub fn tiles(&self) -> impl Iterator<Item = TexturePartitionTile> + '_ {
        self.partition
            .tiles
            .iter()
            .zip(&self.textures)
            .map(|(tile, texture)| TexturePartitionTile {
                rect: tile.rect,
                borders: tile.borders,
                texture: texture.clone(),
            })
    }

    pub fn tile(&self, index: usize) -> std::result::Result<TexturePartitionTile, IndexError> {
        let (PartitionTile { rect, borders }, texture) = self
            .partition
            .tiles
            .get(index)
            .zip(self.textures.get(index))
            .ok_or(IndexError {
                what: "texture partition",
                index,
                len: self.textures.len(),
            })?;
        Ok(TexturePartitionTile {
            rect: *rect,
            borders: *borders,
            texture: texture.clone(),
        })
    }

    /// Replaces one tile's pixels.
    ///
    /// A texture still shared with a rendering job gets replaced rather than modified, so
    /// the job keeps drawing the old contents.
    pub fn set_tile_image(
        &mut self,
        index: usize,
        internal_format: GLenum,
        bgra: &[u8],
    ) -> std::result::Result<(), IndexError> {
        let len = self.textures.len();
        let rect = self
            .partition
            .tiles
            .get(index)
            .map(|tile| tile.rect)
            .ok_or(IndexError {
                what: "texture partition",
                index,
                len,
            })?;
        let slot = self.textures.get_mut(index).ok_or(IndexError {
            what: "texture partition",
            index,
            len,
        })?;
        if Rc::get_mut(slot).is_none() {
            *slot = Rc::new(OpenGl2DTexture::new());
        }
        if let Some(texture) = Rc::get_mut(slot) {
            texture.set_image(rect.width, rect.height, internal_format, bgra);
        }
        Ok(())
    }

    /// Uploads every tile from the matching region of `drawable`.
    pub fn upload_from_drawable(
        &mut self,
        conn: &XConnection,
        drawable: Drawable,
        depth: u8,
    ) -> Result<()> {
        let internal_format = internal_format_for_depth(depth);
        for index in 0..self.partition.len() {
            let rect = self.partition.tiles[index].rect;
            if rect.is_empty() {
                continue;
            }
            let image = conn
                .conn()
                .get_image(
                    ImageFormat::Z_PIXMAP,
                    drawable,
                    rect.x as i16,
                    rect.y as i16,
                    rect.width as u16,
                    rect.height as u16,
                    !0,
                )?
                .reply()?;
            self.set_tile_image(index, internal_format, &image.data)?;
        }
        Ok(())
    }

    /// Fills every tile with an A8-in-BGRA mask of `shape`, opaque inside the rectangles.
    pub fn upload_shape(&mut self, shape: &[Rect]) -> std::result::Result<(), IndexError> {
        for index in 0..self.partition.len() {
            let tile = self.partition.tiles[index].rect;
            let pixels = shape_mask_pixels(tile, shape);
            self.set_tile_image(index, gl::RGBA, &pixels)?;
        }
        Ok(())
    }
}

/// BGRA pixels of `tile` that are white inside `shape` and transparent elsewhere.
pub fn shape_mask_pixels(tile: Rect, shape: &[Rect]) -> Vec<u8> {
    let (width, height) = (tile.width as usize, tile.height as usize);
    let mut pixels = vec![0u8; width * height * 4];
    for rect in shape.iter().filter_map(|r| r.intersection(&tile)) {
        let x0 = (rect.x - tile.x) as usize;
        let y0 = (rect.y - tile.y) as usize;
        for y in y0..y0 + rect.height as usize {
            let row = (y * width + x0) * 4;
            pixels[row..row + rect.width as usize * 4].fill(0xff);
        }
    }
    pixels
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_full_screen_maps_to_unit_square() {
        let ndc = rect_to_ndc(Rect::new(0, 0, 1920, 1080), 1920, 1080);
        assert_eq!(ndc, [-1.0, 1.0, 1.0, 1.0, -1.0, -1.0, 1.0, -1.0]);
    }

    #[test]
    fn test_outline_order() {
        let outline = rect_outline_ndc(Rect::new(0, 0, 100, 100), 100, 100);
        assert_eq!(outline, [-1.0, 1.0, 1.0, 1.0, 1.0, -1.0, -1.0, -1.0]);
    }

    #[test]
    fn test_shape_mask_pixels() {
        let tile = Rect::new(10, 10, 4, 2);
        let pixels = shape_mask_pixels(tile, &[Rect::new(12, 0, 100, 11)]);
        // Only the top row, right half is inside the shape.
        let alpha: Vec<u8> = pixels.chunks(4).map(|p| p[3]).collect();
        assert_eq!(alpha, vec![0, 0, 0xff, 0xff, 0, 0, 0, 0]);
    }

    proptest! {
        #[test]
        fn test_ndc_round_trip(
            x in -2000i32..4000,
            y in -2000i32..4000,
            width in 0u32..4000,
            height in 0u32..4000,
            screen_width in 1u32..8000,
            screen_height in 1u32..8000,
        ) {
            let rect = Rect::new(x, y, width, height);
            let ndc = rect_to_ndc(rect, screen_width, screen_height);
            prop_assert_eq!(ndc_to_rect(&ndc, screen_width, screen_height), rect);
        }
    }
}
