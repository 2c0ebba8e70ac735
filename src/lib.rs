#![doc = include_str!("../README.md")]

#[cfg(feature = "http")]
mod backend_http;
#[cfg(feature = "mmap")]
mod backend_mmap;
mod cache;
mod compression;
mod directory;
mod error;
mod header;
mod iterate;
#[cfg(feature = "mbtiles")]
pub mod mbtiles;
mod reader;
mod tile;
#[cfg(feature = "vfs")]
mod vfs;
#[cfg(feature = "write")]
mod writer;

#[cfg(feature = "http")]
pub use backend_http::HttpBackend;
#[cfg(feature = "mmap")]
pub use backend_mmap::MmapBackend;
pub use cache::{DirCacheResult, DirectoryCache, HashMapCache, NoCache};
pub use directory::{Directory, Entry, LeafRef, TileRun};
pub use error::{PmtilesError, PmtilesResult};
pub use header::{Compression, HEADER_SIZE, Header, MAX_INITIAL_BYTES, TileType};
pub use iterate::{TileFilter, TileIterator, TileRef, TileWindow};
pub use reader::{ArchiveReader, Backend, TileLocation};
/// Re-export of the HTTP client crate exposed in our API.
#[cfg(feature = "http")]
pub use reqwest;
pub use tile::{MAX_TILE_ID, MAX_ZOOM, PYRAMID_SIZE_BY_ZOOM, TileCoord, TileId};
#[cfg(feature = "vfs")]
pub use vfs::{ArchiveFs, HEADER_JSON, METADATA_JSON, VfsKind, VfsStat};
#[cfg(feature = "write")]
pub use writer::{
    ArchiveStats, ArchiveWriter, ArchiveWriterBuilder, FileSink, MemorySink, TileDataSink,
};
