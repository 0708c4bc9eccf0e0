//! Rectangles and screen damage accumulation
//!
//! Every mutation of a screen (window moved, mapped, damaged, reshaped...) adds the
//! affected rectangle(s) to the screen's [`ScreenDamage`]. The XRender backend clips its
//! back buffer to this set; the damage is cleared exactly once per rendered frame.
//!
//! # Example
//!
//! ```
//! use fbcompose::damage::{Rect, ScreenDamage};
//!
//! let mut damage = ScreenDamage::new();
//! damage.add(Rect::new(10, 10, 50, 50));
//! damage.add(Rect::new(200, 10, 50, 50));
//! assert_eq!(damage.rects().len(), 2);
//!
//! damage.clear();
//! assert!(damage.is_empty());
//! ```

use x11rb::protocol::xproto::Rectangle;

/// Maximum number of rectangles kept before the set collapses to its bounding box
const MAX_DAMAGE_RECTS: usize = 64;

/// An axis-aligned rectangle in screen (or window) pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn right(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    pub fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }

    /// Checks if this rectangle shares any pixel with another one
    pub fn intersects(&self, other: &Rect) -> bool {
        !(self.is_empty()
            || other.is_empty()
            || self.right() <= other.x as i64
            || other.right() <= self.x as i64
            || self.bottom() <= other.y as i64
            || other.bottom() <= self.y as i64)
    }

    /// Smallest rectangle containing both
    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x1 = self.x.min(other.x);
        let y1 = self.y.min(other.y);
        let x2 = self.right().max(other.right());
        let y2 = self.bottom().max(other.bottom());
        Rect::new(x1, y1, (x2 - x1 as i64) as u32, (y2 - y1 as i64) as u32)
    }

    /// Returns `None` if the rectangles don't intersect.
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        if !self.intersects(other) {
            return None;
        }
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.right().min(other.right());
        let y2 = self.bottom().min(other.bottom());
        Some(Rect::new(x1, y1, (x2 - x1 as i64) as u32, (y2 - y1 as i64) as u32))
    }

    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        x >= self.x && (x as i64) < self.right() && y >= self.y && (y as i64) < self.bottom()
    }

    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// Moves the rectangle by the given offset
    pub fn translated(&self, dx: i32, dy: i32) -> Rect {
        Rect::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// Converts to the wire rectangle, saturating at the protocol limits.
    pub fn to_x11(&self) -> Rectangle {
        Rectangle {
            x: self.x.clamp(i16::MIN as i32, i16::MAX as i32) as i16,
            y: self.y.clamp(i16::MIN as i32, i16::MAX as i32) as i16,
            width: self.width.min(u16::MAX as u32) as u16,
            height: self.height.min(u16::MAX as u32) as u16,
        }
    }
}

impl From<Rectangle> for Rect {
    fn from(r: Rectangle) -> Self {
        Rect::new(r.x as i32, r.y as i32, r.width as u32, r.height as u32)
    }
}

/// The set of screen rectangles changed since the last rendered frame.
#[derive(Debug, Clone, Default)]
pub struct ScreenDamage {
    rects: Vec<Rect>,
}

impl ScreenDamage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rectangle; empty rectangles and ones already covered are dropped.
    pub fn add(&mut self, rect: Rect) {
        if rect.is_empty() || self.rects.iter().any(|r| r.contains_rect(&rect)) {
            return;
        }
        self.rects.retain(|r| !rect.contains_rect(r));
        self.rects.push(rect);

        if self.rects.len() > MAX_DAMAGE_RECTS {
            let bounds = self.bounds().unwrap_or(rect);
            self.rects.clear();
            self.rects.push(bounds);
        }
    }

    pub fn rects(&self) -> &[Rect] {
        &self.rects
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    pub fn clear(&mut self) {
        self.rects.clear();
    }

    /// Bounding box of all damage
    pub fn bounds(&self) -> Option<Rect> {
        self.rects.iter().copied().reduce(|a, b| a.union(&b))
    }

    /// Damage rectangles together with `extra`, as wire rectangles, for clipping.
    pub fn clip_rectangles(&self, extra: &[Rect]) -> Vec<Rectangle> {
        self.rects
            .iter()
            .chain(extra.iter().filter(|r| !r.is_empty()))
            .map(Rect::to_x11)
            .collect()
    }
}
