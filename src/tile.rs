#![allow(clippy::unreadable_literal)]

use std::fmt;

use crate::error::{PmtilesError, PmtilesResult};

/// Highest zoom level addressable by a 64-bit tile id.
pub const MAX_ZOOM: u8 = 31;

/// Cumulative number of tiles below each zoom level, i.e. the first tile id
/// of that zoom. Index 32 is one past the last valid id.
///
/// ```
/// # use pmtiles3::PYRAMID_SIZE_BY_ZOOM;
/// let mut below = 0_u64;
/// for (z, &base) in PYRAMID_SIZE_BY_ZOOM.iter().enumerate() {
///     assert_eq!(base, below, "invalid value at zoom {z}");
///     if z < 32 {
///         below += 4_u64.pow(z as u32);
///     }
/// }
/// ```
pub const PYRAMID_SIZE_BY_ZOOM: [u64; 33] = [
    /*  0 */ 0,
    /*  1 */ 1,
    /*  2 */ 5,
    /*  3 */ 21,
    /*  4 */ 85,
    /*  5 */ 341,
    /*  6 */ 1365,
    /*  7 */ 5461,
    /*  8 */ 21845,
    /*  9 */ 87381,
    /* 10 */ 349525,
    /* 11 */ 1398101,
    /* 12 */ 5592405,
    /* 13 */ 22369621,
    /* 14 */ 89478485,
    /* 15 */ 357913941,
    /* 16 */ 1431655765,
    /* 17 */ 5726623061,
    /* 18 */ 22906492245,
    /* 19 */ 91625968981,
    /* 20 */ 366503875925,
    /* 21 */ 1466015503701,
    /* 22 */ 5864062014805,
    /* 23 */ 23456248059221,
    /* 24 */ 93824992236885,
    /* 25 */ 375299968947541,
    /* 26 */ 1501199875790165,
    /* 27 */ 6004799503160661,
    /* 28 */ 24019198012642645,
    /* 29 */ 96076792050570581,
    /* 30 */ 384307168202282325,
    /* 31 */ 1537228672809129301,
    // zoom 32 would overflow u64, so this doubles as the id-space bound
    /* 32 */ 6148914691236517205,
];

/// Largest valid tile id (the bottom-right-most tile of zoom 31).
pub const MAX_TILE_ID: u64 = PYRAMID_SIZE_BY_ZOOM[32] - 1;

/// A validated `(z, x, y)` tile address with a top-origin y axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoord {
    z: u8,
    x: u32,
    y: u32,
}

impl TileCoord {
    /// Creates a coordinate, rejecting anything outside the `2^z` x `2^z`
    /// grid or beyond zoom 31.
    pub fn new(z: u8, x: u32, y: u32) -> PmtilesResult<Self> {
        if z > MAX_ZOOM || u64::from(x) >= 1_u64 << z || u64::from(y) >= 1_u64 << z {
            return Err(PmtilesError::InvalidCoordinate { z, x, y });
        }
        Ok(Self { z, x, y })
    }

    /// Zoom level.
    #[must_use]
    pub fn z(&self) -> u8 {
        self.z
    }

    /// Column, `0 .. 2^z`.
    #[must_use]
    pub fn x(&self) -> u32 {
        self.x
    }

    /// Row, `0 .. 2^z`, with `0` the northernmost row.
    #[must_use]
    pub fn y(&self) -> u32 {
        self.y
    }

    /// Position of this tile on the Hilbert curve enumeration of the
    /// whole pyramid.
    #[must_use]
    pub fn tile_id(&self) -> TileId {
        // xy2h rejects order 0, but the root tile is id 0 by definition
        let h: u64 = if self.z == 0 {
            0
        } else {
            fast_hilbert::xy2h(self.x, self.y, self.z)
        };
        TileId(PYRAMID_SIZE_BY_ZOOM[usize::from(self.z)] + h)
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// A position in the Hilbert enumeration of the tile pyramid.
///
/// Ids are assigned per zoom level in ascending order: id 0 is `0/0/0`,
/// ids `1..=4` are zoom 1, ids `5..=20` zoom 2, and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId(u64);

impl TileId {
    /// Wraps a raw id, rejecting values beyond the zoom-31 pyramid.
    pub fn new(value: u64) -> PmtilesResult<Self> {
        if value > MAX_TILE_ID {
            return Err(PmtilesError::IdOverflow(value));
        }
        Ok(Self(value))
    }

    /// The raw 64-bit id.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Maps the id back to its `(z, x, y)` address.
    #[must_use]
    pub fn coord(&self) -> TileCoord {
        let z = zoom_of_id(self.0);
        let h = self.0 - PYRAMID_SIZE_BY_ZOOM[usize::from(z)];
        let (x, y): (u32, u32) = if z == 0 {
            (0, 0)
        } else {
            fast_hilbert::h2xy(h, z)
        };
        TileCoord { z, x, y }
    }
}

impl From<TileCoord> for TileId {
    fn from(coord: TileCoord) -> Self {
        coord.tile_id()
    }
}

impl From<TileId> for TileCoord {
    fn from(id: TileId) -> Self {
        id.coord()
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Zoom level of a valid tile id: the largest `z` whose base id is not
/// past `id`.
pub(crate) fn zoom_of_id(id: u64) -> u8 {
    debug_assert!(id <= MAX_TILE_ID);
    let next = PYRAMID_SIZE_BY_ZOOM.partition_point(|&base| base <= id);
    (next - 1) as u8
}
