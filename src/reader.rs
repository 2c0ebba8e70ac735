use std::future::Future;

use bytes::Bytes;

use crate::cache::{DirCacheResult, DirectoryCache, NoCache};
use crate::compression::{MAX_DIRECTORY_BYTES, MAX_METADATA_BYTES, MAX_TILE_BYTES, decompress};
use crate::directory::{Directory, Entry, TileRun};
use crate::error::{PmtilesError, PmtilesResult};
use crate::header::{HEADER_SIZE, Header};
use crate::tile::TileCoord;

/// Defensive budget for the root-to-leaf descent. The format guarantees
/// two levels; anything deeper than this is treated as hostile.
const MAX_DIRECTORY_DEPTH: usize = 4;

/// A byte-addressable source of archive bytes.
///
/// Implementations issue independent positioned reads, so a reader built
/// on top of them can be shared across tasks.
pub trait Backend: Send + Sync {
    /// Reads exactly `length` bytes starting at `offset`, or fails.
    fn read_exact(
        &self,
        offset: u64,
        length: usize,
    ) -> impl Future<Output = PmtilesResult<Bytes>> + Send;
}

/// In-memory archives, mostly useful for tests and embedded data.
impl Backend for Bytes {
    async fn read_exact(&self, offset: u64, length: usize) -> PmtilesResult<Bytes> {
        let start = usize::try_from(offset)
            .map_err(|_| PmtilesError::Malformed("offset beyond addressable memory"))?;
        let end = start
            .checked_add(length)
            .ok_or(PmtilesError::Malformed("offset beyond addressable memory"))?;
        if end > self.len() {
            return Err(PmtilesError::UnexpectedNumberOfBytesReturned(
                length,
                self.len().saturating_sub(start),
            ));
        }
        Ok(self.slice(start..end))
    }
}

/// Where a tile payload lives inside the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileLocation {
    /// Absolute byte offset of the payload.
    pub offset: u64,
    /// Payload size in bytes.
    pub length: u32,
}

/// A read handle over one `PMTiles` archive.
///
/// Opening parses and validates the header and eagerly loads the root
/// directory and the metadata blob, so a warm [`get_tile`](Self::get_tile)
/// costs at most two more range reads (leaf directory, payload). The
/// reader is immutable after opening and can be shared across tasks.
pub struct ArchiveReader<B, C = NoCache> {
    backend: B,
    cache: C,
    header: Header,
    root_directory: Directory,
    metadata: Bytes,
}

impl<B: Backend> ArchiveReader<B, NoCache> {
    /// Opens an archive without leaf-directory caching.
    pub async fn open(backend: B) -> PmtilesResult<Self> {
        Self::open_with_cache(backend, NoCache).await
    }
}

impl<B: Backend, C: DirectoryCache + Send + Sync> ArchiveReader<B, C> {
    /// Opens an archive, caching fetched leaf directories in `cache`.
    pub async fn open_with_cache(backend: B, cache: C) -> PmtilesResult<Self> {
        let header_bytes = backend.read_exact(0, HEADER_SIZE).await?;
        let mut header = Header::try_from_bytes(&header_bytes)?;
        header.validate_for_read()?;

        let root_bytes = backend
            .read_exact(header.root_dir_offset, section_len(header.root_dir_bytes)?)
            .await?;
        let root_bytes = decompress(
            header.internal_compression,
            root_bytes,
            MAX_DIRECTORY_BYTES,
            "directory",
        )
        .await?;
        let root_directory = Directory::try_from(root_bytes)?;

        let metadata = backend
            .read_exact(header.metadata_offset, section_len(header.metadata_bytes)?)
            .await?;
        let metadata = decompress(
            header.internal_compression,
            metadata,
            MAX_METADATA_BYTES,
            "metadata",
        )
        .await?;

        Ok(Self {
            backend,
            cache,
            header,
            root_directory,
            metadata,
        })
    }

    /// The parsed and validated archive header.
    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// The decompressed metadata blob. By convention a JSON object.
    #[must_use]
    pub fn metadata(&self) -> &Bytes {
        &self.metadata
    }

    pub(crate) fn root_directory(&self) -> &Directory {
        &self.root_directory
    }

    /// Locates the payload for a tile without reading it.
    ///
    /// Returns `Ok(None)` when the archive holds no tile at `coord`.
    pub async fn find_tile(&self, coord: TileCoord) -> PmtilesResult<Option<TileLocation>> {
        Ok(self.lookup_run(coord.tile_id().value()).await?.map(|run| TileLocation {
            // the absolute offset was overflow-checked during the lookup
            offset: self.header.tile_data_offset + run.offset,
            length: run.length,
        }))
    }

    /// Reads a tile payload exactly as stored, without decompressing it.
    pub async fn get_tile(&self, coord: TileCoord) -> PmtilesResult<Option<Bytes>> {
        match self.find_tile(coord).await? {
            None => Ok(None),
            Some(location) => self
                .backend
                .read_exact(location.offset, location.length as usize)
                .await
                .map(Some),
        }
    }

    /// Reads a tile payload and undoes the archive's tile compression.
    pub async fn get_tile_decompressed(&self, coord: TileCoord) -> PmtilesResult<Option<Bytes>> {
        match self.get_tile(coord).await? {
            None => Ok(None),
            Some(bytes) => decompress(
                self.header.tile_compression,
                bytes,
                MAX_TILE_BYTES,
                "tile data",
            )
            .await
            .map(Some),
        }
    }

    /// Walks root and leaf directories for the run covering `tile_id`.
    /// The returned offset is still relative to the tile-data section.
    pub(crate) async fn lookup_run(&self, tile_id: u64) -> PmtilesResult<Option<TileRun>> {
        let Some(first) = self.root_directory.find_entry(tile_id) else {
            return Ok(None);
        };
        let mut entry = *first;
        for _ in 0..MAX_DIRECTORY_DEPTH {
            match entry {
                Entry::Tile(run) => {
                    self.header
                        .tile_data_offset
                        .checked_add(run.offset)
                        .ok_or(PmtilesError::Malformed("tile offset overflow"))?;
                    return Ok(Some(run));
                }
                Entry::Leaf(leaf) => {
                    let offset = self
                        .header
                        .leaf_dirs_offset
                        .checked_add(leaf.offset)
                        .ok_or(PmtilesError::Malformed("leaf directory offset overflow"))?;
                    let found = match self.cache.get_dir_entry(offset, tile_id).await {
                        DirCacheResult::Found(entry) => Some(entry),
                        DirCacheResult::NotFound => None,
                        DirCacheResult::NotCached => {
                            let directory =
                                self.read_directory(offset, leaf.length as usize).await?;
                            let found = directory.find_entry(tile_id).copied();
                            self.cache.insert_dir(offset, directory).await;
                            found
                        }
                    };
                    match found {
                        None => return Ok(None),
                        Some(next) => entry = next,
                    }
                }
            }
        }
        Err(PmtilesError::Malformed(
            "directory nesting exceeds the lookup budget",
        ))
    }

    pub(crate) async fn read_directory(
        &self,
        offset: u64,
        length: usize,
    ) -> PmtilesResult<Directory> {
        let bytes = self.backend.read_exact(offset, length).await?;
        let bytes = decompress(
            self.header.internal_compression,
            bytes,
            MAX_DIRECTORY_BYTES,
            "directory",
        )
        .await?;
        Directory::try_from(bytes)
    }
}

fn section_len(bytes: u64) -> PmtilesResult<usize> {
    if bytes > MAX_DIRECTORY_BYTES.max(MAX_METADATA_BYTES) {
        return Err(PmtilesError::SectionTooLarge {
            section: "archive section",
            size: bytes,
            limit: MAX_DIRECTORY_BYTES.max(MAX_METADATA_BYTES),
        });
    }
    usize::try_from(bytes).map_err(|_| PmtilesError::Malformed("section size overflow"))
}
