//! Tile math for region-decoded images

use crate::region::Region;

/// A single tile of a large image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    pub column: u32,
    pub row: u32,
    /// Source pixels covered by this tile, clamped to the image
    pub region: Region,
}

/// Inclusive range of tile indices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRange {
    pub first_column: u32,
    pub last_column: u32,
    pub first_row: u32,
    pub last_row: u32,
    /// Source pixels per tile edge (`tile_size * sample_size`)
    pub effective_tile_size: u32,
    image_width: u32,
    image_height: u32,
}

impl TileRange {
    pub fn columns(&self) -> u32 {
        self.last_column - self.first_column + 1
    }

    pub fn rows(&self) -> u32 {
        self.last_row - self.first_row + 1
    }

    pub fn tile_count(&self) -> usize {
        self.columns() as usize * self.rows() as usize
    }

    pub fn contains(&self, column: u32, row: u32) -> bool {
        (self.first_column..=self.last_column).contains(&column) && (self.first_row..=self.last_row).contains(&row)
    }

    /// Row-major iteration over every tile in the range
    pub fn tiles(&self) -> impl Iterator<Item = Tile> + '_ {
        (self.first_row..=self.last_row).flat_map(move |row| {
            (self.first_column..=self.last_column).map(move |column| Tile {
                column,
                row,
                region: self.tile_region(column, row),
            })
        })
    }

    fn tile_region(&self, column: u32, row: u32) -> Region {
        let size = self.effective_tile_size;
        Region::new(
            column * size,
            row * size,
            column.saturating_add(1).saturating_mul(size),
            row.saturating_add(1).saturating_mul(size),
        )
        .clamp_to(self.image_width, self.image_height)
    }
}

/// Tiles whose bounds intersect `visible`, or `None` when nothing of the
/// image is visible.
pub fn visible_tiles(
    visible: Region,
    image_width: u32,
    image_height: u32,
    tile_size: u32,
    sample_size: u32,
) -> Option<TileRange> {
    let effective = tile_size.max(1).saturating_mul(sample_size.max(1));
    let visible = visible.clamp_to(image_width, image_height);
    if visible.is_empty() {
        return None;
    }

    let max_column = (image_width - 1) / effective;
    let max_row = (image_height - 1) / effective;

    Some(TileRange {
        first_column: (visible.left / effective).min(max_column),
        last_column: ((visible.right - 1) / effective).min(max_column),
        first_row: (visible.top / effective).min(max_row),
        last_row: ((visible.bottom - 1) / effective).min(max_row),
        effective_tile_size: effective,
        image_width,
        image_height,
    })
}
