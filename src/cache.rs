use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use crate::directory::{Directory, Entry};

/// Result of a directory cache lookup.
pub enum DirCacheResult {
    /// The directory was not in the cache; the caller must fetch it.
    NotCached,
    /// The directory is cached but does not cover the tile.
    NotFound,
    /// The directory is cached and covers the tile.
    Found(Entry),
}

impl From<Option<&Entry>> for DirCacheResult {
    fn from(entry: Option<&Entry>) -> Self {
        match entry {
            Some(entry) => DirCacheResult::Found(*entry),
            None => DirCacheResult::NotFound,
        }
    }
}

/// A cache for leaf directories, keyed by their absolute byte offset.
///
/// Implementations must be internally synchronized; a reader may be
/// queried from many tasks at once.
pub trait DirectoryCache {
    /// Looks `tile_id` up in the cached directory at `offset`.
    fn get_dir_entry(
        &self,
        offset: u64,
        tile_id: u64,
    ) -> impl Future<Output = DirCacheResult> + Send;

    /// Stores the directory fetched from `offset`.
    fn insert_dir(&self, offset: u64, directory: Directory) -> impl Future<Output = ()> + Send;
}

/// A cache that never retains anything.
pub struct NoCache;

impl DirectoryCache for NoCache {
    #[inline]
    async fn get_dir_entry(&self, _offset: u64, _tile_id: u64) -> DirCacheResult {
        DirCacheResult::NotCached
    }

    #[inline]
    async fn insert_dir(&self, _offset: u64, _directory: Directory) {}
}

/// An unbounded `HashMap`-backed directory cache.
#[derive(Default, Clone)]
pub struct HashMapCache {
    cache: Arc<RwLock<HashMap<u64, Directory>>>,
}

impl DirectoryCache for HashMapCache {
    async fn get_dir_entry(&self, offset: u64, tile_id: u64) -> DirCacheResult {
        // A poisoned lock means a panic elsewhere; nothing useful to salvage
        #[expect(clippy::unwrap_used)]
        if let Some(dir) = self.cache.read().unwrap().get(&offset) {
            return dir.find_entry(tile_id).into();
        }
        DirCacheResult::NotCached
    }

    async fn insert_dir(&self, offset: u64, directory: Directory) {
        #[expect(clippy::unwrap_used)]
        self.cache.write().unwrap().insert(offset, directory);
    }
}

#[cfg(test)]
mod tests {
    use super::{DirCacheResult, DirectoryCache, HashMapCache, NoCache};
    use crate::directory::{Directory, Entry, TileRun};

    fn one_entry_dir() -> Directory {
        Directory::from_entries(vec![Entry::Tile(TileRun {
            tile_id: 0,
            offset: 0,
            length: 4,
            run_length: 1,
        })])
    }

    #[tokio::test]
    async fn no_cache_never_hits() {
        let cache = NoCache;
        cache.insert_dir(0, one_entry_dir()).await;
        assert!(matches!(
            cache.get_dir_entry(0, 0).await,
            DirCacheResult::NotCached
        ));
    }

    #[tokio::test]
    async fn hash_map_cache_round_trip() {
        let cache = HashMapCache::default();
        assert!(matches!(
            cache.get_dir_entry(127, 0).await,
            DirCacheResult::NotCached
        ));

        cache.insert_dir(127, one_entry_dir()).await;
        assert!(matches!(
            cache.get_dir_entry(127, 0).await,
            DirCacheResult::Found(_)
        ));
        assert!(matches!(
            cache.get_dir_entry(127, 99).await,
            DirCacheResult::NotFound
        ));
        assert!(matches!(
            cache.get_dir_entry(4096, 0).await,
            DirCacheResult::NotCached
        ));
    }
}
