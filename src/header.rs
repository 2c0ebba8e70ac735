use std::io::Write;
use std::num::NonZeroU64;

use bytes::Buf;
use log::warn;

use crate::error::{PmtilesError, PmtilesResult};

/// Size of the fixed archive header in bytes.
pub const HEADER_SIZE: usize = 127;

/// Conventional budget for the initial range request: the header plus the
/// compressed root directory must fit in this many bytes.
pub const MAX_INITIAL_BYTES: usize = 16_384;

const V3_MAGIC: &[u8; 7] = b"PMTiles";
const V2_MAGIC: &[u8; 2] = b"PM";

/// Codec applied to a span of the archive.
///
/// `internal` compression covers the metadata and all directories; `tile`
/// compression describes how each tile payload was encoded by its producer
/// (the reader hands payloads back as stored).
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum Compression {
    /// Not recorded by the producer.
    Unknown,
    /// Plain bytes.
    None,
    /// RFC 1952 gzip.
    Gzip,
    /// Brotli (optional `brotli` feature).
    Brotli,
    /// Zstandard (optional `zstd` feature).
    Zstd,
}

impl Compression {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            Compression::Unknown => 0,
            Compression::None => 1,
            Compression::Gzip => 2,
            Compression::Brotli => 3,
            Compression::Zstd => 4,
        }
    }

    /// Lowercase name used by the reference tooling.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Compression::Unknown => "unknown",
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Brotli => "brotli",
            Compression::Zstd => "zstd",
        }
    }
}

impl TryFrom<u8> for Compression {
    type Error = PmtilesError;

    fn try_from(value: u8) -> PmtilesResult<Self> {
        match value {
            0 => Ok(Compression::Unknown),
            1 => Ok(Compression::None),
            2 => Ok(Compression::Gzip),
            3 => Ok(Compression::Brotli),
            4 => Ok(Compression::Zstd),
            v => Err(PmtilesError::InvalidCompression(v)),
        }
    }
}

/// Payload kind recorded in the header. Tiles stay opaque either way.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum TileType {
    /// Not recorded by the producer.
    Unknown,
    /// Mapbox vector tiles.
    Mvt,
    /// PNG raster tiles.
    Png,
    /// JPEG raster tiles.
    Jpeg,
    /// WebP raster tiles.
    Webp,
}

impl TileType {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            TileType::Unknown => 0,
            TileType::Mvt => 1,
            TileType::Png => 2,
            TileType::Jpeg => 3,
            TileType::Webp => 4,
        }
    }

    /// Lowercase name used by the reference tooling.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            TileType::Unknown => "unknown",
            TileType::Mvt => "mvt",
            TileType::Png => "png",
            TileType::Jpeg => "jpeg",
            TileType::Webp => "webp",
        }
    }
}

impl TryFrom<u8> for TileType {
    type Error = PmtilesError;

    fn try_from(value: u8) -> PmtilesResult<Self> {
        match value {
            0 => Ok(TileType::Unknown),
            1 => Ok(TileType::Mvt),
            2 => Ok(TileType::Png),
            3 => Ok(TileType::Jpeg),
            4 => Ok(TileType::Webp),
            v => Err(PmtilesError::InvalidTileType(v)),
        }
    }
}

/// The fixed 127-byte archive header.
///
/// Geographic values are stored exactly as on disk, as degrees times 10^7
/// in signed 32-bit integers; the `*_longitude`/`*_latitude` accessors
/// provide the floating-point view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Offset of the compressed root directory. Always 127 in v3.
    pub root_dir_offset: u64,
    /// Compressed size of the root directory.
    pub root_dir_bytes: u64,
    /// Offset of the compressed metadata blob.
    pub metadata_offset: u64,
    /// Compressed size of the metadata blob.
    pub metadata_bytes: u64,
    /// Offset of the concatenated compressed leaf directories.
    pub leaf_dirs_offset: u64,
    /// Total size of the leaf-directories section.
    pub leaf_dirs_bytes: u64,
    /// Offset of the tile-data section.
    pub tile_data_offset: u64,
    /// Total size of the tile-data section.
    pub tile_data_bytes: u64,
    /// Number of addressable tiles, `None` when not recorded.
    pub addressed_tiles_count: Option<NonZeroU64>,
    /// Number of tile entries across all directories, `None` when unknown.
    pub tile_entries_count: Option<NonZeroU64>,
    /// Number of distinct tile payloads, `None` when unknown.
    pub tile_contents_count: Option<NonZeroU64>,
    /// Whether payloads appear in first-reference order (see the writer).
    pub clustered: bool,
    /// Codec for metadata and directories.
    pub internal_compression: Compression,
    /// Codec the producer applied to each tile payload.
    pub tile_compression: Compression,
    /// Payload kind.
    pub tile_type: TileType,
    /// Lowest zoom level with tiles.
    pub min_zoom: u8,
    /// Highest zoom level with tiles.
    pub max_zoom: u8,
    /// West bound, degrees times 10^7.
    pub min_lon_e7: i32,
    /// South bound, degrees times 10^7.
    pub min_lat_e7: i32,
    /// East bound, degrees times 10^7.
    pub max_lon_e7: i32,
    /// North bound, degrees times 10^7.
    pub max_lat_e7: i32,
    /// Suggested initial zoom.
    pub center_zoom: u8,
    /// Suggested initial longitude, degrees times 10^7.
    pub center_lon_e7: i32,
    /// Suggested initial latitude, degrees times 10^7.
    pub center_lat_e7: i32,
}

impl Header {
    /// West bound in degrees.
    #[must_use]
    pub fn min_longitude(&self) -> f64 {
        f64::from(self.min_lon_e7) / 1e7
    }

    /// South bound in degrees.
    #[must_use]
    pub fn min_latitude(&self) -> f64 {
        f64::from(self.min_lat_e7) / 1e7
    }

    /// East bound in degrees.
    #[must_use]
    pub fn max_longitude(&self) -> f64 {
        f64::from(self.max_lon_e7) / 1e7
    }

    /// North bound in degrees.
    #[must_use]
    pub fn max_latitude(&self) -> f64 {
        f64::from(self.max_lat_e7) / 1e7
    }

    /// Suggested initial longitude in degrees.
    #[must_use]
    pub fn center_longitude(&self) -> f64 {
        f64::from(self.center_lon_e7) / 1e7
    }

    /// Suggested initial latitude in degrees.
    #[must_use]
    pub fn center_latitude(&self) -> f64 {
        f64::from(self.center_lat_e7) / 1e7
    }

    pub(crate) fn new(
        internal_compression: Compression,
        tile_compression: Compression,
        tile_type: TileType,
    ) -> Self {
        Self {
            root_dir_offset: HEADER_SIZE as u64,
            root_dir_bytes: 0,
            metadata_offset: 0,
            metadata_bytes: 0,
            leaf_dirs_offset: 0,
            leaf_dirs_bytes: 0,
            tile_data_offset: 0,
            tile_data_bytes: 0,
            addressed_tiles_count: None,
            tile_entries_count: None,
            tile_contents_count: None,
            clustered: true,
            internal_compression,
            tile_compression,
            tile_type,
            min_zoom: 0,
            max_zoom: 0,
            min_lon_e7: -1_800_000_000,
            min_lat_e7: -850_511_287,
            max_lon_e7: 1_800_000_000,
            max_lat_e7: 850_511_287,
            center_zoom: 0,
            center_lon_e7: 0,
            center_lat_e7: 0,
        }
    }

    /// Parses the fixed header from the first 127 bytes of an archive.
    pub fn try_from_bytes(raw: &[u8]) -> PmtilesResult<Self> {
        if raw.len() < HEADER_SIZE {
            return Err(PmtilesError::UnexpectedNumberOfBytesReturned(
                HEADER_SIZE,
                raw.len(),
            ));
        }
        if &raw[0..V3_MAGIC.len()] != V3_MAGIC {
            return if &raw[0..V2_MAGIC.len()] == V2_MAGIC {
                Err(PmtilesError::UnsupportedVersion)
            } else {
                Err(PmtilesError::InvalidMagic)
            };
        }
        if raw[7] != 3 {
            return Err(PmtilesError::UnsupportedVersion);
        }

        let mut buf = &raw[8..HEADER_SIZE];
        Ok(Self {
            root_dir_offset: buf.get_u64_le(),
            root_dir_bytes: buf.get_u64_le(),
            metadata_offset: buf.get_u64_le(),
            metadata_bytes: buf.get_u64_le(),
            leaf_dirs_offset: buf.get_u64_le(),
            leaf_dirs_bytes: buf.get_u64_le(),
            tile_data_offset: buf.get_u64_le(),
            tile_data_bytes: buf.get_u64_le(),
            addressed_tiles_count: NonZeroU64::new(buf.get_u64_le()),
            tile_entries_count: NonZeroU64::new(buf.get_u64_le()),
            tile_contents_count: NonZeroU64::new(buf.get_u64_le()),
            clustered: buf.get_u8() == 1,
            internal_compression: buf.get_u8().try_into()?,
            tile_compression: buf.get_u8().try_into()?,
            tile_type: buf.get_u8().try_into()?,
            min_zoom: buf.get_u8(),
            max_zoom: buf.get_u8(),
            min_lon_e7: buf.get_i32_le(),
            min_lat_e7: buf.get_i32_le(),
            max_lon_e7: buf.get_i32_le(),
            max_lat_e7: buf.get_i32_le(),
            center_zoom: buf.get_u8(),
            center_lon_e7: buf.get_i32_le(),
            center_lat_e7: buf.get_i32_le(),
        })
    }

    /// Serializes the header into its 127-byte wire form.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(V3_MAGIC)?;
        writer.write_all(&[3_u8])?;
        writer.write_all(&self.root_dir_offset.to_le_bytes())?;
        writer.write_all(&self.root_dir_bytes.to_le_bytes())?;
        writer.write_all(&self.metadata_offset.to_le_bytes())?;
        writer.write_all(&self.metadata_bytes.to_le_bytes())?;
        writer.write_all(&self.leaf_dirs_offset.to_le_bytes())?;
        writer.write_all(&self.leaf_dirs_bytes.to_le_bytes())?;
        writer.write_all(&self.tile_data_offset.to_le_bytes())?;
        writer.write_all(&self.tile_data_bytes.to_le_bytes())?;
        writer.write_all(&count_to_u64(self.addressed_tiles_count).to_le_bytes())?;
        writer.write_all(&count_to_u64(self.tile_entries_count).to_le_bytes())?;
        writer.write_all(&count_to_u64(self.tile_contents_count).to_le_bytes())?;
        writer.write_all(&[
            u8::from(self.clustered),
            self.internal_compression.to_u8(),
            self.tile_compression.to_u8(),
            self.tile_type.to_u8(),
            self.min_zoom,
            self.max_zoom,
        ])?;
        writer.write_all(&self.min_lon_e7.to_le_bytes())?;
        writer.write_all(&self.min_lat_e7.to_le_bytes())?;
        writer.write_all(&self.max_lon_e7.to_le_bytes())?;
        writer.write_all(&self.max_lat_e7.to_le_bytes())?;
        writer.write_all(&[self.center_zoom])?;
        writer.write_all(&self.center_lon_e7.to_le_bytes())?;
        writer.write_all(&self.center_lat_e7.to_le_bytes())?;
        Ok(())
    }

    /// Checks the structural invariants a reader relies on, clamping the
    /// zoom range like the reference implementations when a producer wrote
    /// out-of-range levels.
    pub(crate) fn validate_for_read(&mut self) -> PmtilesResult<()> {
        if self.root_dir_offset != HEADER_SIZE as u64 {
            return Err(PmtilesError::Malformed(
                "root directory does not follow the header",
            ));
        }
        if self.min_zoom > self.max_zoom {
            return Err(PmtilesError::Malformed("min_zoom is above max_zoom"));
        }
        if self.min_zoom > 30 {
            warn!("clamping min_zoom from {} to 30", self.min_zoom);
            self.min_zoom = 30;
        }
        if self.max_zoom > 30 {
            warn!("clamping max_zoom from {} to 30", self.max_zoom);
            self.max_zoom = 30;
        }
        let lon_ok = |v: i32| v.unsigned_abs() <= 1_800_000_000;
        let lat_ok = |v: i32| v.unsigned_abs() <= 900_000_000;
        if !lon_ok(self.min_lon_e7)
            || !lon_ok(self.max_lon_e7)
            || !lon_ok(self.center_lon_e7)
            || !lat_ok(self.min_lat_e7)
            || !lat_ok(self.max_lat_e7)
            || !lat_ok(self.center_lat_e7)
        {
            return Err(PmtilesError::Malformed("geographic bounds out of range"));
        }
        Ok(())
    }
}

fn count_to_u64(count: Option<NonZeroU64>) -> u64 {
    count.map_or(0, NonZeroU64::get)
}
