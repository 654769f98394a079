//! Slippy-map (Web Mercator) tile addressing.

use super::GeoPoint;

/// Web Mercator latitude limit (degrees).
pub const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_59;

/// Map tile address at a fixed zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoordinate {
    pub x: u32,
    pub y: u32,
}

impl TileCoordinate {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Offset by `(dx, dy)`, or `None` when the result leaves the grid.
    pub fn offset(self, dx: i64, dy: i64, zoom: u8) -> Option<Self> {
        let n = 1i64 << zoom;
        let x = self.x as i64 + dx;
        let y = self.y as i64 + dy;
        if !(0..n).contains(&x) || !(0..n).contains(&y) {
            return None;
        }
        Some(Self::new(x as u32, y as u32))
    }
}

impl std::fmt::Display for TileCoordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.x, self.y)
    }
}

/// Tile containing `(lat, lon)` at `zoom`.
///
/// Latitudes beyond the Mercator limit are clamped so polar inputs still map
/// onto the first/last row.
pub fn tile_index(lat: f64, lon: f64, zoom: u8) -> TileCoordinate {
    let n = (1u64 << zoom) as f64;
    let lat_rad = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT).to_radians();

    let x = ((lon + 180.0) / 360.0 * n).floor();
    let y = ((1.0 - lat_rad.tan().asinh() / std::f64::consts::PI) / 2.0 * n).floor();

    let max = n - 1.0;
    TileCoordinate::new(x.clamp(0.0, max) as u32, y.clamp(0.0, max) as u32)
}

pub fn tile_index_of(point: GeoPoint, zoom: u8) -> TileCoordinate {
    tile_index(point.lat, point.lon, zoom)
}

/// The 3x3 block around `center`, center first, then its neighbors.
///
/// Cells that fall off the grid (only possible at the antimeridian or poles)
/// are omitted.
pub fn tile_neighborhood(center: TileCoordinate, zoom: u8) -> Vec<TileCoordinate> {
    const OFFSETS: [(i64, i64); 9] = [
        (0, 0),
        (1, 0),
        (-1, 0),
        (0, 1),
        (0, -1),
        (-1, -1),
        (1, -1),
        (-1, 1),
        (1, 1),
    ];

    OFFSETS
        .iter()
        .filter_map(|&(dx, dy)| center.offset(dx, dy, zoom))
        .collect()
}
