use std::collections::HashMap;
use std::collections::hash_map::Entry as MapEntry;
use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::num::NonZeroU64;

use twox_hash::XxHash3_128;

use crate::compression::compress;
use crate::directory::{Directory, Entry, LeafRef, TileRun};
use crate::error::{PmtilesError, PmtilesResult};
use crate::header::{Compression, HEADER_SIZE, Header, MAX_INITIAL_BYTES, TileType};
use crate::tile::{PYRAMID_SIZE_BY_ZOOM, TileId, zoom_of_id};

/// The compressed root directory must fit next to the header inside the
/// initial range request.
const MAX_ROOT_DIR_BYTES: usize = MAX_INITIAL_BYTES - HEADER_SIZE;

/// First leaf granularity tried when the root has to be split.
const INITIAL_LEAF_SIZE: usize = 4096;

/// Scratch storage for the tile-data section while the archive is being
/// accumulated. `append` hands back the section-relative offset of the
/// written payload; `drain_into` replays everything into the final output.
pub trait TileDataSink {
    /// Appends a payload and returns its offset within the section.
    fn append(&mut self, bytes: &[u8]) -> io::Result<u64>;

    /// Total bytes appended so far.
    fn bytes_written(&self) -> u64;

    /// Streams the accumulated section into `out`.
    fn drain_into(&mut self, out: &mut dyn Write) -> io::Result<u64>;
}

/// Spools tile data through an unlinked temporary file.
pub struct FileSink {
    file: File,
    cursor: u64,
}

impl FileSink {
    /// Creates a scratch file in the system temp directory.
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            file: tempfile::tempfile()?,
            cursor: 0,
        })
    }
}

impl TileDataSink for FileSink {
    fn append(&mut self, bytes: &[u8]) -> io::Result<u64> {
        let offset = self.cursor;
        self.file.write_all(bytes)?;
        self.cursor += bytes.len() as u64;
        Ok(offset)
    }

    fn bytes_written(&self) -> u64 {
        self.cursor
    }

    fn drain_into(&mut self, out: &mut dyn Write) -> io::Result<u64> {
        self.file.flush()?;
        self.file.seek(SeekFrom::Start(0))?;
        io::copy(&mut self.file, out)
    }
}

/// Keeps the tile-data section in memory.
#[derive(Default)]
pub struct MemorySink {
    buf: Vec<u8>,
}

impl TileDataSink for MemorySink {
    fn append(&mut self, bytes: &[u8]) -> io::Result<u64> {
        let offset = self.buf.len() as u64;
        self.buf.extend_from_slice(bytes);
        Ok(offset)
    }

    fn bytes_written(&self) -> u64 {
        self.buf.len() as u64
    }

    fn drain_into(&mut self, out: &mut dyn Write) -> io::Result<u64> {
        out.write_all(&self.buf)?;
        Ok(self.buf.len() as u64)
    }
}

/// Configures and creates an [`ArchiveWriter`].
pub struct ArchiveWriterBuilder {
    header: Header,
    metadata: Vec<u8>,
}

impl ArchiveWriterBuilder {
    /// Starts a builder for archives of the given tile type. Vector tiles
    /// default to gzip tile compression, everything else to none;
    /// directories and metadata default to gzip.
    #[must_use]
    pub fn new(tile_type: TileType) -> Self {
        let tile_compression = match tile_type {
            TileType::Mvt => Compression::Gzip,
            _ => Compression::None,
        };
        Self {
            header: Header::new(Compression::Gzip, tile_compression, tile_type),
            metadata: b"{}".to_vec(),
        }
    }

    /// Sets the codec for metadata and directories.
    #[must_use]
    pub fn internal_compression(mut self, compression: Compression) -> Self {
        self.header.internal_compression = compression;
        self
    }

    /// Records the codec the tile payloads were produced with. The writer
    /// stores payloads exactly as handed to it.
    #[must_use]
    pub fn tile_compression(mut self, compression: Compression) -> Self {
        self.header.tile_compression = compression;
        self
    }

    /// Sets the lowest zoom level with tiles.
    #[must_use]
    pub fn min_zoom(mut self, level: u8) -> Self {
        self.header.min_zoom = level;
        self
    }

    /// Sets the highest zoom level with tiles.
    #[must_use]
    pub fn max_zoom(mut self, level: u8) -> Self {
        self.header.max_zoom = level;
        self
    }

    /// Sets the bounding box in degrees.
    #[must_use]
    pub fn bounds(mut self, min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        self.header.min_lon_e7 = to_e7(min_lon);
        self.header.min_lat_e7 = to_e7(min_lat);
        self.header.max_lon_e7 = to_e7(max_lon);
        self.header.max_lat_e7 = to_e7(max_lat);
        self
    }

    /// Sets the suggested initial position in degrees.
    #[must_use]
    pub fn center(mut self, lon: f64, lat: f64) -> Self {
        self.header.center_lon_e7 = to_e7(lon);
        self.header.center_lat_e7 = to_e7(lat);
        self
    }

    /// Sets the suggested initial zoom.
    #[must_use]
    pub fn center_zoom(mut self, level: u8) -> Self {
        self.header.center_zoom = level;
        self
    }

    /// Sets the metadata payload, conventionally a JSON object.
    #[must_use]
    pub fn metadata(mut self, metadata: impl Into<Vec<u8>>) -> Self {
        self.metadata = metadata.into();
        self
    }

    /// Creates a writer spooling tile data through a temporary file.
    pub fn build(self) -> PmtilesResult<ArchiveWriter<FileSink>> {
        Ok(self.build_with_sink(FileSink::new()?))
    }

    /// Creates a writer over a caller-provided scratch sink.
    #[must_use]
    pub fn build_with_sink<S: TileDataSink>(self, sink: S) -> ArchiveWriter<S> {
        ArchiveWriter {
            header: self.header,
            metadata: self.metadata,
            sink,
            entries: Vec::new(),
            content_locations: HashMap::new(),
            prev_hash: None,
            addressed_tiles: 0,
        }
    }
}

#[derive(Clone, Copy)]
struct ContentLocation {
    offset: u64,
    length: u32,
}

/// Single-pass archive writer.
///
/// Tiles must arrive in ascending tile-id order. Identical consecutive
/// payloads extend the previous entry's run; payloads seen before are
/// referenced instead of rewritten, which keeps the output clustered: a
/// fresh payload always lands at the current end of the tile-data section.
pub struct ArchiveWriter<S = FileSink> {
    header: Header,
    metadata: Vec<u8>,
    sink: S,
    entries: Vec<TileRun>,
    content_locations: HashMap<u128, ContentLocation>,
    prev_hash: Option<u128>,
    addressed_tiles: u64,
}

impl<S: TileDataSink> ArchiveWriter<S> {
    /// Adds one tile. Payloads are deduplicated against everything
    /// already written, and identical consecutive ids extend the
    /// previous entry's run.
    pub fn add_tile(&mut self, id: TileId, data: &[u8]) -> PmtilesResult<()> {
        let length = u32::try_from(data.len())
            .map_err(|_| PmtilesError::PayloadTooLarge(data.len() as u64))?;

        let id = id.value();
        let hash = XxHash3_128::oneshot(data);

        if let Some(last) = self.entries.last_mut() {
            let next = last.tile_id + u64::from(last.run_length);
            if id < next {
                return Err(PmtilesError::UnsortedTiles);
            }
            if id == next && self.prev_hash == Some(hash) {
                // runs may not cross into the next zoom level
                let zoom = zoom_of_id(last.tile_id);
                if id < PYRAMID_SIZE_BY_ZOOM[usize::from(zoom) + 1] {
                    last.run_length += 1;
                    self.addressed_tiles += 1;
                    return Ok(());
                }
            }
        }

        let location = match self.content_locations.entry(hash) {
            MapEntry::Occupied(seen) => *seen.get(),
            MapEntry::Vacant(slot) => {
                let offset = self.sink.append(data)?;
                *slot.insert(ContentLocation { offset, length })
            }
        };

        self.entries.push(TileRun {
            tile_id: id,
            offset: location.offset,
            length: location.length,
            run_length: 1,
        });
        self.prev_hash = Some(hash);
        self.addressed_tiles += 1;
        Ok(())
    }

    /// Builds the directories, finalizes the header and writes the whole
    /// archive to `out` in file order. On error the caller owns cleanup of
    /// whatever was already written.
    pub fn finish<W: Write>(mut self, out: &mut W) -> PmtilesResult<ArchiveStats> {
        let metadata = compress(self.header.internal_compression, &self.metadata)?;
        let built = build_directories(&self.entries, self.header.internal_compression)?;

        let header = &mut self.header;
        header.root_dir_offset = HEADER_SIZE as u64;
        header.root_dir_bytes = built.root.len() as u64;
        header.metadata_offset = header.root_dir_offset + header.root_dir_bytes;
        header.metadata_bytes = metadata.len() as u64;
        header.leaf_dirs_offset = header.metadata_offset + header.metadata_bytes;
        header.leaf_dirs_bytes = built.leaves.len() as u64;
        header.tile_data_offset = header.leaf_dirs_offset + header.leaf_dirs_bytes;
        header.tile_data_bytes = self.sink.bytes_written();
        header.addressed_tiles_count = NonZeroU64::new(self.addressed_tiles);
        header.tile_entries_count = NonZeroU64::new(self.entries.len() as u64);
        header.tile_contents_count = NonZeroU64::new(self.content_locations.len() as u64);
        header.clustered = true;

        header.write_to(out)?;
        out.write_all(&built.root)?;
        out.write_all(&metadata)?;
        out.write_all(&built.leaves)?;
        self.sink.drain_into(out)?;
        out.flush()?;

        Ok(ArchiveStats {
            addressed_tiles: self.addressed_tiles,
            tile_entries: self.entries.len() as u64,
            tile_contents: self.content_locations.len() as u64,
            tile_data_bytes: self.header.tile_data_bytes,
            root_dir_bytes: self.header.root_dir_bytes,
            leaf_dirs_bytes: self.header.leaf_dirs_bytes,
            leaf_size: built.leaf_size,
            leaf_count: built.leaf_count,
        })
    }
}

/// What [`ArchiveWriter::finish`] wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveStats {
    /// Tiles addressable in the archive, duplicates included.
    pub addressed_tiles: u64,
    /// Tile entries after run-length compaction.
    pub tile_entries: u64,
    /// Distinct payloads in the tile-data section.
    pub tile_contents: u64,
    /// Size of the tile-data section.
    pub tile_data_bytes: u64,
    /// Compressed size of the root directory.
    pub root_dir_bytes: u64,
    /// Total size of the leaf-directories section.
    pub leaf_dirs_bytes: u64,
    /// Entries per leaf, `None` for a flat archive.
    pub leaf_size: Option<usize>,
    /// Number of leaf directories.
    pub leaf_count: usize,
}

struct BuiltDirectories {
    root: Vec<u8>,
    leaves: Vec<u8>,
    leaf_size: Option<usize>,
    leaf_count: usize,
}

fn build_directories(
    entries: &[TileRun],
    compression: Compression,
) -> PmtilesResult<BuiltDirectories> {
    // first try: everything in the root
    let flat = serialize_compressed(entries.iter().copied().map(Entry::Tile).collect(), compression)?;
    if flat.len() <= MAX_ROOT_DIR_BYTES {
        return Ok(BuiltDirectories {
            root: flat,
            leaves: Vec::new(),
            leaf_size: None,
            leaf_count: 0,
        });
    }

    // promote to root + leaves, growing the leaves until the root fits
    let mut leaf_size = INITIAL_LEAF_SIZE;
    loop {
        let (root, leaves, leaf_count) = build_roots_leaves(entries, compression, leaf_size)?;
        if root.len() <= MAX_ROOT_DIR_BYTES {
            return Ok(BuiltDirectories {
                root,
                leaves,
                leaf_size: Some(leaf_size),
                leaf_count,
            });
        }
        leaf_size *= 2;
    }
}

fn build_roots_leaves(
    entries: &[TileRun],
    compression: Compression,
    leaf_size: usize,
) -> PmtilesResult<(Vec<u8>, Vec<u8>, usize)> {
    let mut root_entries = Vec::with_capacity(entries.len() / leaf_size + 1);
    let mut leaves = Vec::new();
    let mut leaf_count = 0;
    for chunk in entries.chunks(leaf_size) {
        let leaf =
            serialize_compressed(chunk.iter().copied().map(Entry::Tile).collect(), compression)?;
        root_entries.push(Entry::Leaf(LeafRef {
            tile_id: chunk[0].tile_id,
            offset: leaves.len() as u64,
            length: u32::try_from(leaf.len())
                .map_err(|_| PmtilesError::Malformed("leaf directory exceeds 32-bit length"))?,
        }));
        leaves.extend_from_slice(&leaf);
        leaf_count += 1;
    }
    let root = serialize_compressed(root_entries, compression)?;
    Ok((root, leaves, leaf_count))
}

fn serialize_compressed(entries: Vec<Entry>, compression: Compression) -> PmtilesResult<Vec<u8>> {
    let directory = Directory::from_entries(entries);
    let mut raw = Vec::new();
    directory.write_to(&mut raw)?;
    compress(compression, &raw)
}

fn to_e7(degrees: f64) -> i32 {
    (degrees * 1e7) as i32
}

#[cfg(test)]
#[expect(clippy::float_cmp)]
mod tests {
    use bytes::Bytes;

    use super::{ArchiveWriterBuilder, MemorySink};
    use crate::error::PmtilesError;
    use crate::header::{Compression, TileType};
    use crate::iterate::TileFilter;
    use crate::reader::ArchiveReader;
    use crate::tile::{TileCoord, TileId};

    fn plain_builder() -> ArchiveWriterBuilder {
        ArchiveWriterBuilder::new(TileType::Mvt)
            .internal_compression(Compression::None)
            .tile_compression(Compression::None)
    }

    async fn collect_refs(
        reader: &ArchiveReader<Bytes>,
        filter: TileFilter,
    ) -> Vec<crate::iterate::TileRef> {
        let mut iter = reader.iter_tiles(filter);
        let mut out = Vec::new();
        while let Some(tile) = iter.next_tile().await.unwrap() {
            out.push(tile);
        }
        out
    }

    #[tokio::test]
    async fn two_tile_flat_archive() {
        let mut writer = plain_builder()
            .min_zoom(0)
            .max_zoom(1)
            .bounds(-180.0, -85.0, 180.0, 85.0)
            .build_with_sink(MemorySink::default());
        writer.add_tile(TileId::new(0).unwrap(), b"AA").unwrap();
        writer.add_tile(TileId::new(1).unwrap(), b"BBB").unwrap();

        let mut archive = Vec::new();
        let stats = writer.finish(&mut archive).unwrap();
        assert_eq!(stats.addressed_tiles, 2);
        assert_eq!(stats.tile_entries, 2);
        assert_eq!(stats.tile_contents, 2);
        assert_eq!(stats.leaf_size, None);
        assert_eq!(stats.leaf_dirs_bytes, 0);

        let reader = ArchiveReader::open(Bytes::from(archive)).await.unwrap();
        let header = reader.header();
        assert!(header.clustered);
        assert_eq!(header.min_zoom, 0);
        assert_eq!(header.max_zoom, 1);
        assert_eq!(header.min_longitude(), -180.0);
        assert_eq!(header.max_latitude(), 85.0);

        let root = TileCoord::new(0, 0, 0).unwrap();
        let first = reader.find_tile(root).await.unwrap().unwrap();
        assert_eq!(first.offset, header.tile_data_offset);
        assert_eq!(first.length, 2);
        assert_eq!(reader.get_tile(root).await.unwrap().unwrap().as_ref(), b"AA");

        let second = TileCoord::new(1, 0, 0).unwrap();
        let loc = reader.find_tile(second).await.unwrap().unwrap();
        assert_eq!(loc.offset, header.tile_data_offset + 2);
        assert_eq!(loc.length, 3);
        assert_eq!(
            reader.get_tile(second).await.unwrap().unwrap().as_ref(),
            b"BBB"
        );

        assert!(reader.get_tile(TileCoord::new(1, 1, 0).unwrap()).await.unwrap().is_none());

        let refs = collect_refs(&reader, TileFilter::everything()).await;
        let ids: Vec<u64> = refs.iter().map(|t| t.tile_id.value()).collect();
        assert_eq!(ids, vec![0, 1]);
    }

    #[tokio::test]
    async fn single_root_tile() {
        let mut writer = plain_builder().build_with_sink(MemorySink::default());
        writer.add_tile(TileId::new(0).unwrap(), b"only").unwrap();

        let mut archive = Vec::new();
        let stats = writer.finish(&mut archive).unwrap();
        assert_eq!(stats.addressed_tiles, 1);

        let reader = ArchiveReader::open(Bytes::from(archive)).await.unwrap();
        let tile = reader
            .get_tile(TileCoord::new(0, 0, 0).unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tile.as_ref(), b"only");
        assert!(reader.get_tile(TileCoord::new(1, 0, 0).unwrap()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn consecutive_duplicates_form_runs_and_dedup() {
        let mut writer = plain_builder().build_with_sink(MemorySink::default());
        writer.add_tile(TileId::new(0).unwrap(), b"ZZ").unwrap();
        writer.add_tile(TileId::new(1).unwrap(), b"ZZ").unwrap();
        writer.add_tile(TileId::new(2).unwrap(), b"QQ").unwrap();

        let mut archive = Vec::new();
        let stats = writer.finish(&mut archive).unwrap();
        assert_eq!(stats.addressed_tiles, 3);
        assert_eq!(stats.tile_entries, 2);
        assert_eq!(stats.tile_contents, 2);
        assert_eq!(stats.tile_data_bytes, 4);

        let reader = ArchiveReader::open(Bytes::from(archive.clone())).await.unwrap();
        let data_start = usize::try_from(reader.header().tile_data_offset).unwrap();
        assert_eq!(&archive[data_start..], b"ZZQQ");

        let refs = collect_refs(&reader, TileFilter::everything()).await;
        assert_eq!(refs.len(), 3);
        assert_eq!(refs[0].run_length, 2);
        assert_eq!(refs[1].run_length, 1);
        assert_eq!(refs[1].tile_id.value(), 1);
        assert_eq!(refs[2].run_length, 1);
        assert_eq!(refs[0].offset, refs[1].offset);
        assert_ne!(refs[0].offset, refs[2].offset);
    }

    #[tokio::test]
    async fn nonconsecutive_duplicates_backreference() {
        let mut writer = plain_builder().build_with_sink(MemorySink::default());
        writer.add_tile(TileId::new(0).unwrap(), b"ABC").unwrap();
        writer.add_tile(TileId::new(1).unwrap(), b"X").unwrap();
        writer.add_tile(TileId::new(2).unwrap(), b"ABC").unwrap();

        let mut archive = Vec::new();
        let stats = writer.finish(&mut archive).unwrap();
        assert_eq!(stats.addressed_tiles, 3);
        assert_eq!(stats.tile_entries, 3);
        assert_eq!(stats.tile_contents, 2);

        let reader = ArchiveReader::open(Bytes::from(archive)).await.unwrap();
        let refs = collect_refs(&reader, TileFilter::everything()).await;
        assert_eq!(refs.len(), 3);
        assert_eq!(refs[0].offset, refs[2].offset);
        assert_eq!(refs[0].length, refs[2].length);
        assert_ne!(refs[1].offset, refs[0].offset);
        // every ref has run length 1: no RLE across the gap
        assert!(refs.iter().all(|t| t.run_length == 1));
    }

    #[tokio::test]
    async fn run_length_compaction() {
        let mut writer = plain_builder().build_with_sink(MemorySink::default());
        for id in 5..=9_u64 {
            writer.add_tile(TileId::new(id).unwrap(), b"X").unwrap();
        }

        let mut archive = Vec::new();
        let stats = writer.finish(&mut archive).unwrap();
        assert_eq!(stats.addressed_tiles, 5);
        assert_eq!(stats.tile_entries, 1);
        assert_eq!(stats.tile_contents, 1);
        assert_eq!(stats.tile_data_bytes, 1);

        let reader = ArchiveReader::open(Bytes::from(archive)).await.unwrap();
        let refs = collect_refs(&reader, TileFilter::everything()).await;
        assert_eq!(refs.len(), 5);
        assert_eq!(refs[0].run_length, 5);
        assert_eq!(refs[4].run_length, 1);
        for (tile, id) in refs.iter().zip(5_u64..) {
            assert_eq!(tile.tile_id.value(), id);
            assert_eq!(tile.offset, reader.header().tile_data_offset);
        }
    }

    #[tokio::test]
    async fn runs_break_at_zoom_boundaries() {
        let mut writer = plain_builder().build_with_sink(MemorySink::default());
        // ids 3 and 4 are the last tiles of zoom 1, id 5 the first of zoom 2
        for id in 3..=5_u64 {
            writer.add_tile(TileId::new(id).unwrap(), b"same").unwrap();
        }

        let mut archive = Vec::new();
        let stats = writer.finish(&mut archive).unwrap();
        assert_eq!(stats.addressed_tiles, 3);
        assert_eq!(stats.tile_entries, 2);
        assert_eq!(stats.tile_contents, 1);

        let reader = ArchiveReader::open(Bytes::from(archive)).await.unwrap();
        let refs = collect_refs(&reader, TileFilter::everything()).await;
        assert_eq!(refs.len(), 3);
        assert_eq!(refs[0].run_length, 2);
        assert_eq!(refs[2].tile_id.value(), 5);
        assert_eq!(refs[2].offset, refs[0].offset);
    }

    #[tokio::test]
    async fn promotion_to_leaves() {
        // 4200 four-byte-per-entry rows push the uncompressed root past
        // the 16257-byte budget, 3900 stay under it
        let mut writer = plain_builder().build_with_sink(MemorySink::default());
        for id in 0..3900_u64 {
            writer
                .add_tile(TileId::new(id).unwrap(), &u16::try_from(id).unwrap().to_le_bytes())
                .unwrap();
        }
        let mut archive = Vec::new();
        let stats = writer.finish(&mut archive).unwrap();
        assert_eq!(stats.leaf_size, None);
        assert_eq!(stats.leaf_count, 0);
        assert!(stats.root_dir_bytes <= 16_257);

        let mut writer = plain_builder().build_with_sink(MemorySink::default());
        for id in 0..4200_u64 {
            writer
                .add_tile(TileId::new(id).unwrap(), &u16::try_from(id).unwrap().to_le_bytes())
                .unwrap();
        }
        let mut archive = Vec::new();
        let stats = writer.finish(&mut archive).unwrap();
        assert_eq!(stats.leaf_size, Some(4096));
        assert_eq!(stats.leaf_count, 2);
        assert!(stats.leaf_dirs_bytes > 0);
        assert!(stats.root_dir_bytes <= 16_257);

        let reader = ArchiveReader::open(Bytes::from(archive)).await.unwrap();
        for id in [0_u64, 1, 4095, 4096, 4199] {
            let coord = TileId::new(id).unwrap().coord();
            let tile = reader.get_tile(coord).await.unwrap().unwrap();
            assert_eq!(tile.as_ref(), u16::try_from(id).unwrap().to_le_bytes());
        }
        assert!(
            reader
                .get_tile(TileId::new(4200).unwrap().coord())
                .await
                .unwrap()
                .is_none()
        );

        let refs = collect_refs(&reader, TileFilter::everything()).await;
        assert_eq!(refs.len(), 4200);
        assert!(refs.windows(2).all(|w| w[0].tile_id < w[1].tile_id));
    }

    #[tokio::test]
    async fn large_promoted_archive_roundtrip() {
        let mut writer = plain_builder().build_with_sink(MemorySink::default());
        for id in 0..50_000_u64 {
            writer.add_tile(TileId::new(id).unwrap(), &id.to_le_bytes()).unwrap();
        }
        let mut archive = Vec::new();
        let stats = writer.finish(&mut archive).unwrap();
        assert_eq!(stats.addressed_tiles, 50_000);
        assert_eq!(stats.tile_contents, 50_000);
        assert_eq!(stats.leaf_size, Some(4096));
        assert_eq!(stats.leaf_count, 13);

        let reader = ArchiveReader::open(Bytes::from(archive)).await.unwrap();
        for id in [0_u64, 12_345, 49_999] {
            let tile = reader
                .get_tile(TileId::new(id).unwrap().coord())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(tile.as_ref(), id.to_le_bytes());
        }
    }

    #[test]
    fn out_of_order_tiles_are_rejected() {
        let mut writer = plain_builder().build_with_sink(MemorySink::default());
        writer.add_tile(TileId::new(5).unwrap(), b"a").unwrap();
        let err = writer.add_tile(TileId::new(3).unwrap(), b"b").unwrap_err();
        assert!(matches!(err, PmtilesError::UnsortedTiles));
        let err = writer.add_tile(TileId::new(5).unwrap(), b"c").unwrap_err();
        assert!(matches!(err, PmtilesError::UnsortedTiles));
    }

    #[tokio::test]
    async fn empty_payloads_are_preserved() {
        let mut writer = plain_builder().build_with_sink(MemorySink::default());
        writer.add_tile(TileId::new(0).unwrap(), b"").unwrap();
        writer.add_tile(TileId::new(1).unwrap(), b"x").unwrap();

        let mut archive = Vec::new();
        let stats = writer.finish(&mut archive).unwrap();
        // every input tile stays addressable, zero-length or not
        assert_eq!(stats.addressed_tiles, 2);
        assert_eq!(stats.tile_entries, 2);
        assert_eq!(stats.tile_contents, 2);
        assert_eq!(stats.tile_data_bytes, 1);

        let reader = ArchiveReader::open(Bytes::from(archive)).await.unwrap();
        let root = TileCoord::new(0, 0, 0).unwrap();
        let location = reader.find_tile(root).await.unwrap().unwrap();
        assert_eq!(location.length, 0);
        let tile = reader.get_tile(root).await.unwrap().unwrap();
        assert!(tile.is_empty());
        let tile = reader
            .get_tile(TileCoord::new(1, 0, 0).unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tile.as_ref(), b"x");
    }

    #[tokio::test]
    async fn gzip_internal_compression_roundtrip() {
        let mut writer = ArchiveWriterBuilder::new(TileType::Png)
            .metadata(r#"{"name":"fixture"}"#)
            .build_with_sink(MemorySink::default());
        for id in 0..100_u64 {
            writer.add_tile(TileId::new(id).unwrap(), &id.to_le_bytes()).unwrap();
        }
        let mut archive = Vec::new();
        writer.finish(&mut archive).unwrap();

        let reader = ArchiveReader::open(Bytes::from(archive)).await.unwrap();
        assert_eq!(reader.header().internal_compression, Compression::Gzip);
        assert_eq!(reader.metadata().as_ref(), br#"{"name":"fixture"}"#);
        let tile = reader
            .get_tile(TileId::new(42).unwrap().coord())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tile.as_ref(), 42_u64.to_le_bytes());
    }
}
