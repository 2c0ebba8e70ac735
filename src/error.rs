use std::io;

use crate::header::Compression;

/// Errors raised while reading, writing or converting `PMTiles` archives.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PmtilesError {
    /// The file does not start with the `PMTiles` magic number.
    #[error("archive does not start with the PMTiles magic number")]
    InvalidMagic,
    /// The archive is a recognizable `PMTiles` file, but not version 3.
    #[error("unsupported PMTiles archive version, only v3 is supported")]
    UnsupportedVersion,
    /// A structural violation anywhere in the archive. Permanent for the
    /// affected archive; reopening only helps after the file is repaired.
    #[error("malformed archive: {0}")]
    Malformed(&'static str),
    /// A varint ran past the 10-byte encoding limit of a 64-bit value.
    #[error("varint exceeds the 10-byte limit of a 64-bit value")]
    VarintTooLong,
    /// A directory buffer ended in the middle of a varint or column.
    #[error("unexpected end of directory buffer")]
    UnexpectedEndOfBuffer,
    /// The header carries a compression id outside the known enumeration.
    #[error("invalid compression id {0}")]
    InvalidCompression(u8),
    /// The header carries a tile type id outside the known enumeration.
    #[error("invalid tile type id {0}")]
    InvalidTileType(u8),
    /// The codec is known but not compiled into this build.
    #[error("{0:?} compression is not available in this build")]
    UnsupportedCompression(Compression),
    /// A section would decompress beyond the configured ceiling.
    #[error("{section} section of {size} bytes exceeds the {limit} byte ceiling")]
    SectionTooLarge {
        /// Which section tripped the ceiling.
        section: &'static str,
        /// Observed (or requested) size in bytes.
        size: u64,
        /// The configured ceiling in bytes.
        limit: u64,
    },
    /// A (z, x, y) triple outside the valid tile grid.
    #[error("invalid tile coordinate {z}/{x}/{y}")]
    InvalidCoordinate {
        /// Zoom level.
        z: u8,
        /// Tile column.
        x: u32,
        /// Tile row (top origin).
        y: u32,
    },
    /// A tile id past the end of the 32-level pyramid.
    #[error("tile id {0} is outside the tile pyramid")]
    IdOverflow(u64),
    /// An I/O failure talking to the byte source or sink. Retryable.
    #[error("archive i/o failed")]
    Reading(#[from] io::Error),
    /// The decompressor rejected a span of the archive.
    #[error("failed to decompress {section} section")]
    Decompress {
        /// Which section failed to decompress.
        section: &'static str,
        /// The underlying codec error.
        #[source]
        source: io::Error,
    },
    /// The byte source returned a short (or long) read.
    #[error("expected {0} bytes from the source but received {1}")]
    UnexpectedNumberOfBytesReturned(usize, usize),
    /// A tile payload larger than a directory entry can address.
    #[cfg(feature = "write")]
    #[error("tile payload of {0} bytes exceeds the 4 GiB entry limit")]
    PayloadTooLarge(u64),
    /// Tiles were handed to the writer out of tile-id order.
    #[cfg(feature = "write")]
    #[error("tiles must be added in ascending tile-id order")]
    UnsortedTiles,
    /// A virtual-filesystem listing would materialize too many names.
    #[cfg(feature = "vfs")]
    #[error("directory listing exceeds {0} entries")]
    TooManyEntries(usize),
    /// The memory map over a local archive could not be created.
    #[cfg(feature = "mmap")]
    #[error("unable to open memory-mapped file")]
    UnableToOpenMmapFile,
    /// An HTTP request to the remote archive failed.
    #[cfg(feature = "http")]
    #[error("http request failed")]
    Http(#[from] reqwest::Error),
    /// The computed `Range` header was not accepted by reqwest.
    #[cfg(feature = "http")]
    #[error("invalid range header value")]
    InvalidHeaderValue(#[from] reqwest::header::InvalidHeaderValue),
    /// The remote server ignored the `Range` header.
    #[cfg(feature = "http")]
    #[error("server does not support HTTP range requests")]
    RangeRequestsUnsupported,
    /// The remote server sent more bytes than were requested.
    #[cfg(feature = "http")]
    #[error("response body is longer than requested: {0} > {1}")]
    ResponseBodyTooLong(usize, usize),
    /// The MBTiles source could not be queried.
    #[cfg(feature = "mbtiles")]
    #[error("mbtiles source error")]
    Sqlite(#[from] rusqlite::Error),
    /// The MBTiles metadata table is missing or inconsistent.
    #[cfg(feature = "mbtiles")]
    #[error("invalid mbtiles metadata: {0}")]
    InvalidMbtiles(String),
}

/// Convenience alias used throughout the crate.
pub type PmtilesResult<T> = Result<T, PmtilesError>;
