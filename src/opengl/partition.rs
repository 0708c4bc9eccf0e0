//! Splitting oversized surfaces into texture-sized tiles
//!
//! GPUs refuse textures wider or taller than `GL_MAX_TEXTURE_SIZE`. Surfaces above that
//! limit are cut into a grid of tiles, each uploaded into its own texture. Every tile
//! remembers which of its edges are real edges of the surface, as opposed to seams
//! between neighbouring tiles.

use std::num::NonZeroU32;

use bitflags::bitflags;

use crate::damage::Rect;

bitflags! {
    /// Edges of a tile that coincide with the surface border.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Borders: u8 {
        const NORTH = 0b0001;
        const EAST = 0b0010;
        const SOUTH = 0b0100;
        const WEST = 0b1000;
    }
}

/// One tile, positioned relative to the surface origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionTile {
    pub rect: Rect,
    pub borders: Borders,
}

/// Row-major grid of tiles covering a surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpacePartition {
    pub columns: usize,
    pub rows: usize,
    pub tiles: Vec<PartitionTile>,
}

impl SpacePartition {
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn tile(&self, column: usize, row: usize) -> Option<&PartitionTile> {
        if column >= self.columns || row >= self.rows {
            return None;
        }
        self.tiles.get(row * self.columns + column)
    }
}

/// Splits `length` into chunks of at most `max`; a zero length is a single empty chunk.
fn split_axis(length: u32, max: u32) -> Vec<(i32, u32)> {
    let count = length.div_ceil(max).max(1);
    (0..count)
        .map(|i| {
            let start = i * max;
            (start as i32, length.saturating_sub(start).min(max))
        })
        .collect()
}

/// Partitions a `width` x `height` surface into tiles of at most `max_size` on each side.
///
/// The grid has ⌈width/max⌉ columns and ⌈height/max⌉ rows, and at least one of each.
///
/// ```
/// use std::num::NonZeroU32;
/// use fbcompose::opengl::partition::partition_space;
///
/// let partition = partition_space(1920, 1080, NonZeroU32::new(1024).unwrap());
/// assert_eq!((partition.columns, partition.rows), (2, 2));
/// ```
pub fn partition_space(width: u32, height: u32, max_size: NonZeroU32) -> SpacePartition {
    let max = max_size.get();
    let columns = split_axis(width, max);
    let rows = split_axis(height, max);
    let (last_column, last_row) = (columns.len() - 1, rows.len() - 1);

    let mut tiles = Vec::with_capacity(columns.len() * rows.len());
    for (row, &(y, tile_height)) in rows.iter().enumerate() {
        for (column, &(x, tile_width)) in columns.iter().enumerate() {
            let mut borders = Borders::empty();
            borders.set(Borders::NORTH, row == 0);
            borders.set(Borders::SOUTH, row == last_row);
            borders.set(Borders::WEST, column == 0);
            borders.set(Borders::EAST, column == last_column);
            tiles.push(PartitionTile {
                rect: Rect::new(x, y, tile_width, tile_height),
                borders,
            });
        }
    }

    SpacePartition {
        columns: columns.len(),
        rows: rows.len(),
        tiles,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn max(v: u32) -> NonZeroU32 {
        NonZeroU32::new(v).unwrap()
    }

    #[test]
    fn test_full_hd_with_1024_limit() {
        let partition = partition_space(1920, 1080, max(1024));
        let sizes: Vec<_> = partition
            .tiles
            .iter()
            .map(|t| (t.rect.width, t.rect.height))
            .collect();
        assert_eq!(sizes, vec![(1024, 1024), (896, 1024), (1024, 56), (896, 56)]);

        let bottom_right = partition.tile(1, 1).unwrap();
        assert_eq!(bottom_right.rect, Rect::new(1024, 1024, 896, 56));
        assert_eq!(bottom_right.borders, Borders::EAST | Borders::SOUTH);
        assert_eq!(
            partition.tile(0, 0).unwrap().borders,
            Borders::NORTH | Borders::WEST
        );
        assert!(partition.tile(2, 0).is_none());
    }

    #[test]
    fn test_small_surface_is_one_tile_with_all_borders() {
        let partition = partition_space(300, 200, max(1024));
        assert_eq!(partition.len(), 1);
        assert_eq!(partition.tiles[0].borders, Borders::all());
    }

    #[test]
    fn test_zero_size_is_one_empty_tile() {
        let partition = partition_space(0, 0, max(64));
        assert_eq!(partition.len(), 1);
        assert!(partition.tiles[0].rect.is_empty());
    }

    #[test]
    fn test_exact_multiple_has_no_sliver() {
        let partition = partition_space(2048, 1024, max(1024));
        assert_eq!((partition.columns, partition.rows), (2, 1));
        assert!(partition.tiles.iter().all(|t| t.rect.width == 1024));
    }

    proptest! {
        #[test]
        fn test_tiles_cover_surface_exactly(
            width in 0u32..6000,
            height in 0u32..6000,
            max_size in 1u32..2048,
        ) {
            let partition = partition_space(width, height, max(max_size));

            let expected_columns = width.div_ceil(max_size).max(1) as usize;
            let expected_rows = height.div_ceil(max_size).max(1) as usize;
            prop_assert_eq!(partition.columns, expected_columns);
            prop_assert_eq!(partition.rows, expected_rows);
            prop_assert_eq!(partition.len(), expected_columns * expected_rows);

            for tile in &partition.tiles {
                prop_assert!(tile.rect.width <= max_size);
                prop_assert!(tile.rect.height <= max_size);
            }
            for row in 0..partition.rows {
                let sum: u32 = (0..partition.columns)
                    .map(|c| partition.tile(c, row).unwrap().rect.width)
                    .sum();
                prop_assert_eq!(sum, width);
            }
            for column in 0..partition.columns {
                let sum: u32 = (0..partition.rows)
                    .map(|r| partition.tile(column, r).unwrap().rect.height)
                    .sum();
                prop_assert_eq!(sum, height);
            }
        }
    }
}
