use std::io;
use std::path::Path;

use bytes::{Buf, Bytes};
use fmmap::tokio::{AsyncMmapFile, AsyncMmapFileExt as _, AsyncOptions};

use crate::cache::{DirectoryCache, NoCache};
use crate::error::{PmtilesError, PmtilesResult};
use crate::reader::{ArchiveReader, Backend};

impl ArchiveReader<MmapBackend, NoCache> {
    /// Opens a local archive through an async memory map.
    pub async fn open_path<P: AsRef<Path>>(path: P) -> PmtilesResult<Self> {
        Self::open_cached_path(NoCache, path).await
    }
}

impl<C: DirectoryCache + Send + Sync> ArchiveReader<MmapBackend, C> {
    /// Opens a local archive through an async memory map with a
    /// leaf-directory cache.
    pub async fn open_cached_path<P: AsRef<Path>>(cache: C, path: P) -> PmtilesResult<Self> {
        let backend = MmapBackend::open(path).await?;
        Self::open_with_cache(backend, cache).await
    }
}

/// Positioned reads over a memory-mapped local file.
pub struct MmapBackend {
    file: AsyncMmapFile,
}

impl MmapBackend {
    /// Maps the file at `path` read-only.
    pub async fn open<P: AsRef<Path>>(path: P) -> PmtilesResult<Self> {
        Ok(Self {
            file: AsyncMmapFile::open_with_options(path, AsyncOptions::new().read(true))
                .await
                .map_err(|_| PmtilesError::UnableToOpenMmapFile)?,
        })
    }
}

impl From<fmmap::error::Error> for PmtilesError {
    fn from(_: fmmap::error::Error) -> Self {
        Self::Reading(io::Error::from(io::ErrorKind::UnexpectedEof))
    }
}

impl Backend for MmapBackend {
    async fn read_exact(&self, offset: u64, length: usize) -> PmtilesResult<Bytes> {
        let offset = usize::try_from(offset)
            .map_err(|_| PmtilesError::Reading(io::Error::from(io::ErrorKind::UnexpectedEof)))?;
        let end = offset
            .checked_add(length)
            .ok_or(PmtilesError::Malformed("tile offset overflow"))?;
        if self.file.len() < end {
            return Err(PmtilesError::Reading(io::Error::from(
                io::ErrorKind::UnexpectedEof,
            )));
        }
        Ok(self.file.reader(offset)?.copy_to_bytes(length))
    }
}
