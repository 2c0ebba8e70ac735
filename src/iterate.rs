use futures_util::Stream;

use crate::cache::{DirectoryCache, NoCache};
use crate::directory::{Directory, Entry, TileRun};
use crate::error::{PmtilesError, PmtilesResult};
use crate::reader::{ArchiveReader, Backend};
use crate::tile::{MAX_TILE_ID, MAX_ZOOM, PYRAMID_SIZE_BY_ZOOM, TileCoord, TileId};

/// Root frame plus the defensive four-level descent budget.
const MAX_STACK_DEPTH: usize = 5;

/// Window sizes up to this many cells are served by direct lookups
/// instead of a directory walk.
const DIRECT_LOOKUP_CELLS: u64 = 100;

/// A single run may not cover more cells than this in one step.
const MAX_RUN_CELLS: u64 = 1 << 20;

/// An inclusive rectangle of tile coordinates at some zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileWindow {
    /// Westernmost column.
    pub min_x: u32,
    /// Northernmost row.
    pub min_y: u32,
    /// Easternmost column.
    pub max_x: u32,
    /// Southernmost row.
    pub max_y: u32,
}

/// What a [`TileIterator`] should visit.
#[derive(Debug, Clone, Copy, Default)]
pub struct TileFilter {
    zoom: Option<u8>,
    window: Option<TileWindow>,
}

impl TileFilter {
    /// Visits every tile in the archive.
    #[must_use]
    pub fn everything() -> Self {
        Self::default()
    }

    /// Visits every tile of one zoom level.
    #[must_use]
    pub fn zoom(zoom: u8) -> Self {
        Self {
            zoom: Some(zoom),
            window: None,
        }
    }

    /// Visits the tiles of one zoom level inside a coordinate window.
    #[must_use]
    pub fn window(zoom: u8, window: TileWindow) -> Self {
        Self {
            zoom: Some(zoom),
            window: Some(window),
        }
    }
}

/// One tile yielded by a [`TileIterator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRef {
    /// The tile address.
    pub coord: TileCoord,
    /// The tile id, strictly increasing across one iteration.
    pub tile_id: TileId,
    /// Absolute byte offset of the payload in the archive.
    pub offset: u64,
    /// Payload size in bytes.
    pub length: u32,
    /// How many consecutive ids from this one share the payload.
    pub run_length: u32,
}

struct Frame {
    directory: Directory,
    idx: usize,
    run_pos: u32,
}

enum State {
    /// Small windows: precomputed candidate ids, probed one by one.
    Direct(std::vec::IntoIter<u64>),
    /// Everything else: a root-to-leaf directory walk.
    Walk {
        stack: Vec<Frame>,
        last_id: Option<u64>,
    },
}

/// A tile-ordered traversal over an archive.
///
/// The iterator holds a stack of decoded directory frames and advances it
/// one emitted tile at a time, so it survives hostile archives: ids must
/// strictly increase, leaves may not nest past the descent budget, and
/// absurd run lengths abort the walk instead of spinning it.
pub struct TileIterator<'a, B, C = NoCache> {
    reader: &'a ArchiveReader<B, C>,
    window: Option<TileWindow>,
    min_tile_id: u64,
    max_tile_id: u64,
    state: State,
}

impl<B: Backend, C: DirectoryCache + Send + Sync> ArchiveReader<B, C> {
    /// Starts a traversal over the tiles selected by `filter`.
    #[must_use]
    pub fn iter_tiles(&self, filter: TileFilter) -> TileIterator<'_, B, C> {
        TileIterator::new(self, filter)
    }
}

impl<'a, B: Backend, C: DirectoryCache + Send + Sync> TileIterator<'a, B, C> {
    fn new(reader: &'a ArchiveReader<B, C>, filter: TileFilter) -> Self {
        let empty = Self {
            reader,
            window: None,
            min_tile_id: 0,
            max_tile_id: 0,
            state: State::Direct(Vec::new().into_iter()),
        };

        let (min_tile_id, max_tile_id) = match filter.zoom {
            None => (0, MAX_TILE_ID),
            Some(z) if z <= MAX_ZOOM => (
                PYRAMID_SIZE_BY_ZOOM[usize::from(z)],
                PYRAMID_SIZE_BY_ZOOM[usize::from(z) + 1] - 1,
            ),
            // beyond the pyramid nothing can match
            Some(_) => return empty,
        };

        let window = match (filter.zoom, filter.window) {
            (Some(z), Some(w)) => {
                let edge = ((1_u64 << z) - 1) as u32;
                let clipped = TileWindow {
                    min_x: w.min_x,
                    min_y: w.min_y,
                    max_x: w.max_x.min(edge),
                    max_y: w.max_y.min(edge),
                };
                if clipped.min_x > clipped.max_x || clipped.min_y > clipped.max_y {
                    return empty;
                }
                let cells = u64::from(clipped.max_x - clipped.min_x + 1)
                    * u64::from(clipped.max_y - clipped.min_y + 1);
                if cells <= DIRECT_LOOKUP_CELLS {
                    let mut ids: Vec<u64> = (clipped.min_y..=clipped.max_y)
                        .flat_map(|y| (clipped.min_x..=clipped.max_x).map(move |x| (x, y)))
                        .filter_map(|(x, y)| TileCoord::new(z, x, y).ok())
                        .map(|c| c.tile_id().value())
                        .collect();
                    ids.sort_unstable();
                    return Self {
                        reader,
                        window: None,
                        min_tile_id,
                        max_tile_id,
                        state: State::Direct(ids.into_iter()),
                    };
                }
                Some(clipped)
            }
            _ => None,
        };

        let root = reader.root_directory().clone();
        let stack = match root.find_idx_lesser_or_equal(min_tile_id) {
            None => Vec::new(),
            Some(idx) => vec![Frame {
                directory: root,
                idx,
                run_pos: 0,
            }],
        };

        Self {
            reader,
            window,
            min_tile_id,
            max_tile_id,
            state: State::Walk {
                stack,
                last_id: None,
            },
        }
    }

    /// Yields the next matching tile, or `None` once the traversal is
    /// exhausted. After an error the traversal is over.
    pub async fn next_tile(&mut self) -> PmtilesResult<Option<TileRef>> {
        if matches!(self.state, State::Direct(_)) {
            return self.next_direct().await;
        }
        let result = self.walk_step().await;
        if result.is_err() {
            if let State::Walk { stack, .. } = &mut self.state {
                stack.clear();
            }
        }
        result
    }

    /// Adapts the iterator into a [`Stream`] of tiles.
    pub fn into_stream(mut self) -> impl Stream<Item = PmtilesResult<TileRef>> + Send + 'a {
        async_stream::try_stream! {
            while let Some(tile) = self.next_tile().await? {
                yield tile;
            }
        }
    }

    async fn next_direct(&mut self) -> PmtilesResult<Option<TileRef>> {
        loop {
            let next = match &mut self.state {
                State::Direct(ids) => ids.next(),
                State::Walk { .. } => None,
            };
            let Some(id) = next else {
                return Ok(None);
            };
            if let Some(run) = self.reader.lookup_run(id).await? {
                return Ok(Some(self.make_ref(&run, id)?));
            }
        }
    }

    async fn walk_step(&mut self) -> PmtilesResult<Option<TileRef>> {
        let reader = self.reader;
        let State::Walk { stack, last_id } = &mut self.state else {
            return Ok(None);
        };

        loop {
            let next = {
                let Some(frame) = stack.last() else {
                    return Ok(None);
                };
                frame.directory.entries().get(frame.idx).copied()
            };
            let Some(entry) = next else {
                stack.pop();
                continue;
            };

            match entry {
                Entry::Leaf(leaf) => {
                    if leaf.tile_id > self.max_tile_id {
                        stack.clear();
                        return Ok(None);
                    }
                    if stack.len() >= MAX_STACK_DEPTH {
                        return Err(PmtilesError::Malformed(
                            "too many levels of nested directories",
                        ));
                    }
                    let offset = reader
                        .header()
                        .leaf_dirs_offset
                        .checked_add(leaf.offset)
                        .ok_or(PmtilesError::Malformed("leaf directory offset overflow"))?;
                    let directory = reader.read_directory(offset, leaf.length as usize).await?;
                    let Some(first) = directory.entries().first() else {
                        // hostile files could chain vast numbers of these
                        return Err(PmtilesError::Malformed("empty leaf directory"));
                    };
                    if last_id.is_some_and(|last| first.tile_id() <= last) {
                        return Err(PmtilesError::Malformed(
                            "tile ids are not strictly increasing",
                        ));
                    }
                    let start = directory
                        .find_idx_lesser_or_equal(self.min_tile_id)
                        .unwrap_or(0);
                    if let Some(frame) = stack.last_mut() {
                        frame.idx += 1;
                    }
                    stack.push(Frame {
                        directory,
                        idx: start,
                        run_pos: 0,
                    });
                }
                Entry::Tile(run) => {
                    let Some(frame) = stack.last_mut() else {
                        return Ok(None);
                    };
                    if frame.run_pos >= run.run_length {
                        frame.idx += 1;
                        frame.run_pos = 0;
                        continue;
                    }
                    if frame.run_pos == 0 && u64::from(run.run_length) > MAX_RUN_CELLS {
                        return Err(PmtilesError::Malformed(
                            "run length exceeds the iteration budget",
                        ));
                    }

                    let idx_in_run = frame.run_pos;
                    let id = run.tile_id + u64::from(idx_in_run);
                    frame.run_pos += 1;

                    if id < self.min_tile_id {
                        // fast-forward the run to the start of the bracket
                        frame.run_pos =
                            if run.tile_id + u64::from(run.run_length) <= self.min_tile_id {
                                run.run_length
                            } else {
                                u32::try_from(self.min_tile_id - run.tile_id).map_err(|_| {
                                    PmtilesError::Malformed("run length exceeds 32 bits")
                                })?
                            };
                        continue;
                    }
                    if id > self.max_tile_id {
                        stack.clear();
                        return Ok(None);
                    }
                    if last_id.is_some_and(|last| id <= last) {
                        return Err(PmtilesError::Malformed(
                            "tile ids are not strictly increasing",
                        ));
                    }
                    *last_id = Some(id);

                    let tile_id = TileId::new(id)?;
                    let coord = tile_id.coord();
                    if let Some(w) = &self.window {
                        if coord.x() < w.min_x
                            || coord.x() > w.max_x
                            || coord.y() < w.min_y
                            || coord.y() > w.max_y
                        {
                            continue;
                        }
                    }

                    let offset = reader
                        .header()
                        .tile_data_offset
                        .checked_add(run.offset)
                        .ok_or(PmtilesError::Malformed("tile offset overflow"))?;
                    return Ok(Some(TileRef {
                        coord,
                        tile_id,
                        offset,
                        length: run.length,
                        run_length: run.run_length - idx_in_run,
                    }));
                }
            }
        }
    }

    fn make_ref(&self, run: &TileRun, id: u64) -> PmtilesResult<TileRef> {
        let tile_id = TileId::new(id)?;
        let offset = self
            .reader
            .header()
            .tile_data_offset
            .checked_add(run.offset)
            .ok_or(PmtilesError::Malformed("tile offset overflow"))?;
        let idx_in_run = u32::try_from(id - run.tile_id)
            .map_err(|_| PmtilesError::Malformed("run length exceeds 32 bits"))?;
        Ok(TileRef {
            coord: tile_id.coord(),
            tile_id,
            offset,
            length: run.length,
            run_length: run.run_length - idx_in_run,
        })
    }
}

#[cfg(all(test, feature = "write"))]
mod tests {
    use std::collections::BTreeMap;

    use bytes::Bytes;
    use futures_util::TryStreamExt;

    use super::{TileFilter, TileRef, TileWindow};
    use crate::directory::{Directory, Entry, LeafRef, TileRun};
    use crate::error::PmtilesError;
    use crate::header::{Compression, HEADER_SIZE, Header, TileType};
    use crate::reader::ArchiveReader;
    use crate::tile::{PYRAMID_SIZE_BY_ZOOM, TileCoord, TileId};
    use crate::writer::{ArchiveWriterBuilder, MemorySink};

    /// Tiles spread over zooms 0..=3 with some shared payloads.
    async fn fixture_reader() -> ArchiveReader<Bytes> {
        let mut tiles: BTreeMap<u64, Vec<u8>> = BTreeMap::new();
        tiles.insert(0, b"root".to_vec());
        for id in 1..=4_u64 {
            tiles.insert(id, b"z1".to_vec());
        }
        for id in (5..=20_u64).step_by(3) {
            tiles.insert(id, id.to_le_bytes().to_vec());
        }
        for id in (21..=84_u64).step_by(2) {
            tiles.insert(id, b"even".to_vec());
        }

        let mut writer = ArchiveWriterBuilder::new(TileType::Png)
            .internal_compression(Compression::None)
            .min_zoom(0)
            .max_zoom(3)
            .build_with_sink(MemorySink::default());
        for (id, data) in &tiles {
            writer.add_tile(TileId::new(*id).unwrap(), data).unwrap();
        }
        let mut archive = Vec::new();
        writer.finish(&mut archive).unwrap();
        ArchiveReader::open(Bytes::from(archive)).await.unwrap()
    }

    async fn collect(reader: &ArchiveReader<Bytes>, filter: TileFilter) -> Vec<TileRef> {
        let mut iter = reader.iter_tiles(filter);
        let mut out = Vec::new();
        while let Some(tile) = iter.next_tile().await.unwrap() {
            out.push(tile);
        }
        out
    }

    #[tokio::test]
    async fn iterate_agrees_with_get_tile() {
        let reader = fixture_reader().await;
        let emitted = collect(&reader, TileFilter::everything()).await;
        assert!(emitted.windows(2).all(|w| w[0].tile_id < w[1].tile_id));

        let mut by_coord = BTreeMap::new();
        for tile in &emitted {
            by_coord.insert(tile.coord, (tile.offset, tile.length));
        }

        for z in 0..=3_u8 {
            for x in 0..(1_u32 << z) {
                for y in 0..(1_u32 << z) {
                    let coord = TileCoord::new(z, x, y).unwrap();
                    let found = reader.find_tile(coord).await.unwrap();
                    match by_coord.get(&coord) {
                        Some(&(offset, length)) => {
                            let location = found.unwrap();
                            assert_eq!(location.offset, offset, "{coord}");
                            assert_eq!(location.length, length, "{coord}");
                        }
                        None => assert!(found.is_none(), "{coord}"),
                    }
                }
            }
        }
    }

    #[tokio::test]
    async fn zoom_filter_brackets_one_level() {
        let reader = fixture_reader().await;
        let everything = collect(&reader, TileFilter::everything()).await;
        let level: Vec<_> = everything.iter().filter(|t| t.coord.z() == 2).collect();
        let filtered = collect(&reader, TileFilter::zoom(2)).await;
        assert_eq!(filtered.len(), level.len());
        for (a, b) in filtered.iter().zip(level) {
            assert_eq!(a, b);
        }
        assert!(collect(&reader, TileFilter::zoom(9)).await.is_empty());
    }

    #[tokio::test]
    async fn small_windows_use_direct_lookups() {
        let reader = fixture_reader().await;
        let window = TileWindow { min_x: 1, min_y: 0, max_x: 3, max_y: 2 };
        let got = collect(&reader, TileFilter::window(3, window)).await;

        let mut expected = Vec::new();
        for tile in collect(&reader, TileFilter::zoom(3)).await {
            let (x, y) = (tile.coord.x(), tile.coord.y());
            if (1..=3).contains(&x) && y <= 2 {
                expected.push(tile);
            }
        }
        let mut got_sorted = got.clone();
        got_sorted.sort_by_key(|t| t.tile_id);
        assert_eq!(got_sorted, expected);
    }

    #[tokio::test]
    async fn large_windows_walk_and_filter() {
        // enough zoom-6 tiles that the 33x33 window cannot use lookups
        let mut writer = ArchiveWriterBuilder::new(TileType::Png)
            .internal_compression(Compression::None)
            .build_with_sink(MemorySink::default());
        let base = PYRAMID_SIZE_BY_ZOOM[6];
        for id in (base..base + 4096).step_by(5) {
            writer.add_tile(TileId::new(id).unwrap(), &id.to_le_bytes()).unwrap();
        }
        let mut archive = Vec::new();
        writer.finish(&mut archive).unwrap();
        let reader = ArchiveReader::open(Bytes::from(archive)).await.unwrap();

        let window = TileWindow { min_x: 0, min_y: 0, max_x: 32, max_y: 32 };
        let got = collect(&reader, TileFilter::window(6, window)).await;
        assert!(!got.is_empty());
        assert!(got.windows(2).all(|w| w[0].tile_id < w[1].tile_id));
        for tile in &got {
            assert!(tile.coord.x() <= 32 && tile.coord.y() <= 32);
        }

        let all: Vec<_> = collect(&reader, TileFilter::zoom(6))
            .await
            .into_iter()
            .filter(|t| t.coord.x() <= 32 && t.coord.y() <= 32)
            .collect();
        assert_eq!(got, all);
    }

    #[tokio::test]
    async fn stream_adapter_yields_the_same_tiles() {
        let reader = fixture_reader().await;
        let direct = collect(&reader, TileFilter::everything()).await;
        let streamed: Vec<_> = reader
            .iter_tiles(TileFilter::everything())
            .into_stream()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(direct, streamed);
    }

    fn serialize_dir(entries: Vec<Entry>) -> Vec<u8> {
        let mut out = Vec::new();
        Directory::from_entries(entries).write_to(&mut out).unwrap();
        out
    }

    /// Assembles a raw archive with uncompressed directories.
    fn assemble(root: Vec<u8>, leaves: Vec<u8>, tile_data: &[u8]) -> Bytes {
        let mut header = Header::new(Compression::None, Compression::None, TileType::Unknown);
        header.root_dir_bytes = root.len() as u64;
        header.metadata_offset = HEADER_SIZE as u64 + header.root_dir_bytes;
        header.metadata_bytes = 2;
        header.leaf_dirs_offset = header.metadata_offset + header.metadata_bytes;
        header.leaf_dirs_bytes = leaves.len() as u64;
        header.tile_data_offset = header.leaf_dirs_offset + header.leaf_dirs_bytes;
        header.tile_data_bytes = tile_data.len() as u64;

        let mut archive = Vec::new();
        header.write_to(&mut archive).unwrap();
        archive.extend_from_slice(&root);
        archive.extend_from_slice(b"{}");
        archive.extend_from_slice(&leaves);
        archive.extend_from_slice(tile_data);
        Bytes::from(archive)
    }

    #[tokio::test]
    async fn absurd_runs_abort_the_walk() {
        // legal at decode time (zoom 15 holds 2^30 tiles), hostile to walk
        let base = PYRAMID_SIZE_BY_ZOOM[15];
        let root = serialize_dir(vec![Entry::Tile(TileRun {
            tile_id: base,
            offset: 0,
            length: 1,
            run_length: (1 << 20) + 1,
        })]);
        let reader = ArchiveReader::open(assemble(root, Vec::new(), b"x")).await.unwrap();

        let mut iter = reader.iter_tiles(TileFilter::everything());
        let err = iter.next_tile().await.unwrap_err();
        assert!(matches!(err, PmtilesError::Malformed(_)));
        // the traversal is over after an error
        assert!(iter.next_tile().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deep_leaf_nesting_is_rejected() {
        // a chain of five directories in the leaf section, each pointing
        // one level further down, the deepest holding a real tile
        let mut leaves = Vec::new();
        let mut prev: Option<(u64, u32)> = None;
        for depth in 0..5 {
            let dir = match (depth, prev) {
                (0, _) | (_, None) => serialize_dir(vec![Entry::Tile(TileRun {
                    tile_id: 0,
                    offset: 0,
                    length: 1,
                    run_length: 1,
                })]),
                (_, Some((offset, length))) => {
                    serialize_dir(vec![Entry::Leaf(LeafRef { tile_id: 0, offset, length })])
                }
            };
            prev = Some((leaves.len() as u64, dir.len() as u32));
            leaves.extend_from_slice(&dir);
        }
        let (offset, length) = prev.unwrap();
        let root = serialize_dir(vec![Entry::Leaf(LeafRef { tile_id: 0, offset, length })]);
        let reader = ArchiveReader::open(assemble(root, leaves, b"x")).await.unwrap();

        let mut iter = reader.iter_tiles(TileFilter::everything());
        let err = iter.next_tile().await.unwrap_err();
        assert!(matches!(
            err,
            PmtilesError::Malformed("too many levels of nested directories")
        ));
    }

    #[tokio::test]
    async fn non_increasing_leaves_are_rejected() {
        let leaf_a = serialize_dir(vec![Entry::Tile(TileRun {
            tile_id: 50,
            offset: 0,
            length: 1,
            run_length: 1,
        })]);
        let leaf_b = serialize_dir(vec![Entry::Tile(TileRun {
            tile_id: 40,
            offset: 0,
            length: 1,
            run_length: 1,
        })]);
        let mut leaves = leaf_a.clone();
        leaves.extend_from_slice(&leaf_b);
        let root = serialize_dir(vec![
            Entry::Leaf(LeafRef { tile_id: 40, offset: 0, length: leaf_a.len() as u32 }),
            Entry::Leaf(LeafRef {
                tile_id: 100,
                offset: leaf_a.len() as u64,
                length: leaf_b.len() as u32,
            }),
        ]);
        let reader = ArchiveReader::open(assemble(root, leaves, b"x")).await.unwrap();

        let mut iter = reader.iter_tiles(TileFilter::everything());
        assert_eq!(iter.next_tile().await.unwrap().unwrap().tile_id.value(), 50);
        let err = iter.next_tile().await.unwrap_err();
        assert!(matches!(
            err,
            PmtilesError::Malformed("tile ids are not strictly increasing")
        ));
    }

    #[tokio::test]
    async fn empty_leaves_are_rejected() {
        let empty = serialize_dir(Vec::new());
        let root = serialize_dir(vec![Entry::Leaf(LeafRef {
            tile_id: 0,
            offset: 0,
            length: empty.len() as u32,
        })]);
        let reader = ArchiveReader::open(assemble(root, empty, b"")).await.unwrap();

        let mut iter = reader.iter_tiles(TileFilter::everything());
        let err = iter.next_tile().await.unwrap_err();
        assert!(matches!(err, PmtilesError::Malformed("empty leaf directory")));
    }
}
