//! A read-only virtual directory tree over a `PMTiles` archive.
//!
//! The archive is presented as `/{z}/{x}/{y}.{ext}` plus two synthetic
//! documents at the root: `pmtiles_header.json`, a JSON rendering of the
//! header with both the raw e7 integers and their floating-point views,
//! and `metadata.json`, the decompressed metadata verbatim. Tile files
//! contain the payload bytes exactly as stored, without decompression.

use std::collections::BTreeSet;

use bytes::Bytes;
use serde_json::json;

use crate::cache::{DirectoryCache, NoCache};
use crate::error::{PmtilesError, PmtilesResult};
use crate::header::{Compression, Header, TileType};
use crate::iterate::{TileFilter, TileWindow};
use crate::reader::{ArchiveReader, Backend};
use crate::tile::TileCoord;

/// Name of the synthetic header document.
pub const HEADER_JSON: &str = "pmtiles_header.json";

/// Name of the synthetic metadata document.
pub const METADATA_JSON: &str = "metadata.json";

/// Hard cap on the number of names a single listing will materialize.
const MAX_LISTING: usize = 1 << 20;

/// Kind of a virtual node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VfsKind {
    /// A regular file: a tile or one of the synthetic documents.
    File,
    /// A zoom or column directory, or the archive root.
    Directory,
}

/// Metadata for one virtual node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VfsStat {
    /// File or directory.
    pub kind: VfsKind,
    /// Byte size; zero for directories.
    pub size: u64,
}

enum Node {
    Root,
    HeaderJson,
    MetadataJson,
    Zoom(u8),
    Column { z: u8, x: u32 },
    Tile(TileCoord),
}

/// The virtual-filesystem view itself. Wraps a reader and stays read-only.
pub struct ArchiveFs<B, C = NoCache> {
    reader: ArchiveReader<B, C>,
}

impl<B: Backend, C: DirectoryCache + Send + Sync> ArchiveFs<B, C> {
    /// Wraps an opened reader.
    #[must_use]
    pub fn new(reader: ArchiveReader<B, C>) -> Self {
        Self { reader }
    }

    /// The wrapped reader.
    #[must_use]
    pub fn reader(&self) -> &ArchiveReader<B, C> {
        &self.reader
    }

    /// Extension used for tile files, derived from the tile type, or from
    /// the tile compression when the type was not recorded.
    #[must_use]
    pub fn tile_extension(&self) -> &'static str {
        let header = self.reader.header();
        match header.tile_type {
            TileType::Mvt => ".mvt",
            TileType::Png => ".png",
            TileType::Jpeg => ".jpg",
            TileType::Webp => ".webp",
            TileType::Unknown => match header.tile_compression {
                Compression::Gzip => ".bin.gz",
                Compression::Zstd => ".bin.zstd",
                _ => ".bin",
            },
        }
    }

    /// Reads a virtual file. `None` for paths that do not resolve to one.
    pub async fn read(&self, path: &str) -> PmtilesResult<Option<Bytes>> {
        match self.parse(path) {
            Some(Node::HeaderJson) => Ok(Some(Bytes::from(header_json(self.reader.header())))),
            Some(Node::MetadataJson) => Ok(Some(self.reader.metadata().clone())),
            Some(Node::Tile(coord)) => self.reader.get_tile(coord).await,
            _ => Ok(None),
        }
    }

    /// Stats a virtual node. `None` for paths outside the tree.
    pub async fn stat(&self, path: &str) -> PmtilesResult<Option<VfsStat>> {
        let stat = |kind, size| Ok(Some(VfsStat { kind, size }));
        match self.parse(path) {
            None => Ok(None),
            Some(Node::Root) => stat(VfsKind::Directory, 0),
            Some(Node::HeaderJson) => {
                stat(VfsKind::File, header_json(self.reader.header()).len() as u64)
            }
            Some(Node::MetadataJson) => stat(VfsKind::File, self.reader.metadata().len() as u64),
            Some(Node::Zoom(z)) => {
                if self.has_tiles(TileFilter::zoom(z)).await? {
                    stat(VfsKind::Directory, 0)
                } else {
                    Ok(None)
                }
            }
            Some(Node::Column { z, x }) => {
                if self.has_tiles(column_filter(z, x)).await? {
                    stat(VfsKind::Directory, 0)
                } else {
                    Ok(None)
                }
            }
            Some(Node::Tile(coord)) => match self.reader.find_tile(coord).await? {
                Some(location) => stat(VfsKind::File, u64::from(location.length)),
                None => Ok(None),
            },
        }
    }

    /// Lists a virtual directory, optionally bounded by `max_entries`.
    /// `None` for paths that are not directories.
    pub async fn read_dir(
        &self,
        path: &str,
        max_entries: Option<usize>,
    ) -> PmtilesResult<Option<Vec<String>>> {
        match self.parse(path) {
            Some(Node::Root) => {
                let header = self.reader.header();
                let mut names = vec![HEADER_JSON.to_string(), METADATA_JSON.to_string()];
                for z in header.min_zoom..=header.max_zoom {
                    if at_capacity(&names, max_entries) {
                        break;
                    }
                    if self.has_tiles(TileFilter::zoom(z)).await? {
                        names.push(z.to_string());
                    }
                }
                Ok(Some(names))
            }
            Some(Node::Zoom(z)) => {
                let mut columns = BTreeSet::new();
                let mut iter = self.reader.iter_tiles(TileFilter::zoom(z));
                while let Some(tile) = iter.next_tile().await? {
                    columns.insert(tile.coord.x());
                    if columns.len() >= max_entries.unwrap_or(usize::MAX) {
                        break;
                    }
                    if columns.len() >= MAX_LISTING {
                        return Err(PmtilesError::TooManyEntries(MAX_LISTING));
                    }
                }
                Ok(Some(columns.iter().map(u32::to_string).collect()))
            }
            Some(Node::Column { z, x }) => {
                let mut rows = BTreeSet::new();
                let mut iter = self.reader.iter_tiles(column_filter(z, x));
                while let Some(tile) = iter.next_tile().await? {
                    rows.insert(tile.coord.y());
                    if rows.len() >= max_entries.unwrap_or(usize::MAX) {
                        break;
                    }
                    if rows.len() >= MAX_LISTING {
                        return Err(PmtilesError::TooManyEntries(MAX_LISTING));
                    }
                }
                let ext = self.tile_extension();
                Ok(Some(rows.iter().map(|y| format!("{y}{ext}")).collect()))
            }
            _ => Ok(None),
        }
    }

    async fn has_tiles(&self, filter: TileFilter) -> PmtilesResult<bool> {
        let mut iter = self.reader.iter_tiles(filter);
        Ok(iter.next_tile().await?.is_some())
    }

    fn parse(&self, path: &str) -> Option<Node> {
        let path = path.trim_matches('/');
        if path.is_empty() {
            return Some(Node::Root);
        }
        if path == HEADER_JSON {
            return Some(Node::HeaderJson);
        }
        if path == METADATA_JSON {
            return Some(Node::MetadataJson);
        }

        let mut components = path.split('/');
        let z = parse_decimal::<u8>(components.next()?)?;
        let Some(column) = components.next() else {
            return Some(Node::Zoom(z));
        };
        let x = parse_decimal::<u32>(column)?;
        let Some(row) = components.next() else {
            return Some(Node::Column { z, x });
        };
        if components.next().is_some() {
            return None;
        }
        let stem = row.strip_suffix(self.tile_extension())?;
        let y = parse_decimal::<u32>(stem)?;
        TileCoord::new(z, x, y).ok().map(Node::Tile)
    }
}

fn column_filter(z: u8, x: u32) -> TileFilter {
    TileFilter::window(
        z,
        TileWindow {
            min_x: x,
            min_y: 0,
            max_x: x,
            max_y: u32::MAX,
        },
    )
}

fn at_capacity(names: &[String], max_entries: Option<usize>) -> bool {
    max_entries.is_some_and(|max| names.len() >= max)
}

fn parse_decimal<T: std::str::FromStr>(text: &str) -> Option<T> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

fn header_json(header: &Header) -> String {
    let count = |c: Option<std::num::NonZeroU64>| c.map_or(0, std::num::NonZeroU64::get);
    json!({
        "root_dir_offset": header.root_dir_offset,
        "root_dir_bytes": header.root_dir_bytes,
        "json_metadata_offset": header.metadata_offset,
        "json_metadata_bytes": header.metadata_bytes,
        "leaf_dirs_offset": header.leaf_dirs_offset,
        "leaf_dirs_bytes": header.leaf_dirs_bytes,
        "tile_data_offset": header.tile_data_offset,
        "tile_data_bytes": header.tile_data_bytes,
        "addressed_tiles_count": count(header.addressed_tiles_count),
        "tile_entries_count": count(header.tile_entries_count),
        "tile_contents_count": count(header.tile_contents_count),
        "clustered": header.clustered,
        "internal_compression": header.internal_compression.to_u8(),
        "internal_compression_str": header.internal_compression.name(),
        "tile_compression": header.tile_compression.to_u8(),
        "tile_compression_str": header.tile_compression.name(),
        "tile_type": header.tile_type.to_u8(),
        "tile_type_str": header.tile_type.name(),
        "min_zoom": header.min_zoom,
        "max_zoom": header.max_zoom,
        "min_lon_e7": header.min_lon_e7,
        "min_lon": header.min_longitude(),
        "min_lat_e7": header.min_lat_e7,
        "min_lat": header.min_latitude(),
        "max_lon_e7": header.max_lon_e7,
        "max_lon": header.max_longitude(),
        "max_lat_e7": header.max_lat_e7,
        "max_lat": header.max_latitude(),
        "center_zoom": header.center_zoom,
        "center_lon_e7": header.center_lon_e7,
        "center_lon": header.center_longitude(),
        "center_lat_e7": header.center_lat_e7,
        "center_lat": header.center_latitude(),
    })
    .to_string()
}
