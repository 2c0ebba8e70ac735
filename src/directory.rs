use std::fmt::{Debug, Formatter};
use std::io::Write;

use bytes::Bytes;
use varint_rs::VarintWriter;

use crate::error::{PmtilesError, PmtilesResult};
use crate::tile::{MAX_TILE_ID, PYRAMID_SIZE_BY_ZOOM, zoom_of_id};

/// Longest LEB128 encoding of a 64-bit value.
const MAX_VARINT_LEN: usize = 10;

/// A directory entry covering one or more consecutive tile ids that all
/// reference the same payload in the tile-data section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRun {
    /// First tile id of the run.
    pub tile_id: u64,
    /// Payload offset relative to the start of the tile-data section.
    pub offset: u64,
    /// Payload size in bytes.
    pub length: u32,
    /// Number of consecutive ids covered, at least 1.
    pub run_length: u32,
}

/// A root-directory entry pointing at a leaf directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafRef {
    /// First tile id covered by the leaf.
    pub tile_id: u64,
    /// Leaf offset relative to the start of the leaf-directories section.
    pub offset: u64,
    /// Compressed leaf size in bytes.
    pub length: u32,
}

/// One directory entry. On the wire both variants share a single encoding
/// where `run_length == 0` marks a leaf pointer; that sentinel never
/// escapes the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    /// A run of tiles sharing one payload.
    Tile(TileRun),
    /// A pointer to a leaf directory.
    Leaf(LeafRef),
}

impl Entry {
    /// First tile id covered by this entry.
    #[must_use]
    pub fn tile_id(&self) -> u64 {
        match self {
            Entry::Tile(run) => run.tile_id,
            Entry::Leaf(leaf) => leaf.tile_id,
        }
    }

    /// Section-relative byte offset of the referenced blob.
    #[must_use]
    pub fn offset(&self) -> u64 {
        match self {
            Entry::Tile(run) => run.offset,
            Entry::Leaf(leaf) => leaf.offset,
        }
    }

    /// Byte size of the referenced blob.
    #[must_use]
    pub fn length(&self) -> u32 {
        match self {
            Entry::Tile(run) => run.length,
            Entry::Leaf(leaf) => leaf.length,
        }
    }

    fn wire_run_length(&self) -> u32 {
        match self {
            Entry::Tile(run) => run.run_length,
            Entry::Leaf(_) => 0,
        }
    }
}

/// An ordered list of directory entries, root or leaf.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Directory {
    entries: Vec<Entry>,
}

impl Debug for Directory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Directory [entries: {}]", self.entries.len())
    }
}

impl Directory {
    /// Wraps an entry list that is already sorted by tile id.
    #[must_use]
    pub fn from_entries(entries: Vec<Entry>) -> Self {
        Self { entries }
    }

    /// The entries in tile-id order.
    #[must_use]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the directory has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Finds the entry responsible for `tile_id`: the entry with the
    /// greatest first id not past it, provided a tile run actually covers
    /// it. Leaf pointers are returned for the caller to descend into.
    #[must_use]
    pub fn find_entry(&self, tile_id: u64) -> Option<&Entry> {
        let idx = match self.entries.binary_search_by(|e| e.tile_id().cmp(&tile_id)) {
            Ok(idx) => return self.entries.get(idx),
            Err(0) => return None,
            Err(next) => next - 1,
        };
        let entry = &self.entries[idx];
        match entry {
            Entry::Leaf(_) => Some(entry),
            Entry::Tile(run) => {
                (tile_id - run.tile_id < u64::from(run.run_length)).then_some(entry)
            }
        }
    }

    /// Index of the entry a forward scan for `tile_id` should start at:
    /// the entry covering it, or the first entry if everything is past it.
    /// `None` when every entry is before `tile_id` would never happen for
    /// a seek target inside the directory span; it signals an empty or
    /// exhausted directory.
    pub(crate) fn find_idx_lesser_or_equal(&self, tile_id: u64) -> Option<usize> {
        let first = self.entries.first()?;
        if tile_id <= first.tile_id() {
            return Some(0);
        }
        match self.entries.binary_search_by(|e| e.tile_id().cmp(&tile_id)) {
            Ok(idx) => Some(idx),
            Err(next) => Some(next - 1),
        }
    }

    /// Serializes into the four-column delta/varint wire form.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_usize_varint(self.entries.len())?;

        let mut last_id = 0;
        for entry in &self.entries {
            writer.write_u64_varint(entry.tile_id() - last_id)?;
            last_id = entry.tile_id();
        }
        for entry in &self.entries {
            writer.write_u32_varint(entry.wire_run_length())?;
        }
        for entry in &self.entries {
            writer.write_u32_varint(entry.length())?;
        }
        for (idx, entry) in self.entries.iter().enumerate() {
            let contiguous = idx > 0 && {
                let prev = &self.entries[idx - 1];
                entry.offset() == prev.offset() + u64::from(prev.length())
            };
            if contiguous {
                writer.write_u64_varint(0)?;
            } else {
                writer.write_u64_varint(entry.offset() + 1)?;
            }
        }
        Ok(())
    }
}

impl TryFrom<Bytes> for Directory {
    type Error = PmtilesError;

    fn try_from(buffer: Bytes) -> PmtilesResult<Self> {
        let buf = buffer.as_ref();
        let mut pos = 0;

        let n_entries = read_varint(buf, &mut pos)?;
        // Each entry takes at least four bytes on the wire, which bounds
        // the allocation a hostile count can request.
        if n_entries / 4 > buf.len() as u64 {
            return Err(PmtilesError::Malformed("entry count exceeds directory size"));
        }
        let n_entries = usize::try_from(n_entries)
            .map_err(|_| PmtilesError::Malformed("entry count exceeds directory size"))?;

        let mut tile_ids = Vec::with_capacity(n_entries);
        let mut last_id = 0_u64;
        for idx in 0..n_entries {
            let delta = read_varint(buf, &mut pos)?;
            if idx > 0 && delta == 0 {
                return Err(PmtilesError::Malformed("duplicate tile id"));
            }
            last_id = last_id
                .checked_add(delta)
                .ok_or(PmtilesError::Malformed("tile id overflow"))?;
            if last_id > MAX_TILE_ID {
                return Err(PmtilesError::Malformed("tile id outside the pyramid"));
            }
            tile_ids.push(last_id);
        }

        let mut run_lengths = Vec::with_capacity(n_entries);
        for _ in 0..n_entries {
            run_lengths.push(read_u32_column(buf, &mut pos, "run length exceeds 32 bits")?);
        }

        let mut lengths = Vec::with_capacity(n_entries);
        for _ in 0..n_entries {
            lengths.push(read_u32_column(buf, &mut pos, "entry length exceeds 32 bits")?);
        }

        let mut entries = Vec::with_capacity(n_entries);
        let mut prev_end: Option<u64> = None;
        for idx in 0..n_entries {
            let value = read_varint(buf, &mut pos)?;
            let offset = if value == 0 {
                prev_end.ok_or(PmtilesError::Malformed(
                    "contiguous-offset marker on the first entry",
                ))?
            } else {
                value - 1
            };
            prev_end = offset.checked_add(u64::from(lengths[idx]));
            if prev_end.is_none() {
                return Err(PmtilesError::Malformed("entry offset overflow"));
            }
            entries.push(make_entry(tile_ids[idx], offset, lengths[idx], run_lengths[idx])?);
        }

        if pos != buf.len() {
            return Err(PmtilesError::Malformed("trailing bytes after directory"));
        }

        Ok(Directory { entries })
    }
}

fn make_entry(tile_id: u64, offset: u64, length: u32, run_length: u32) -> PmtilesResult<Entry> {
    if run_length == 0 {
        return Ok(Entry::Leaf(LeafRef { tile_id, offset, length }));
    }
    // A run may not spill past the end of its zoom level
    let zoom = zoom_of_id(tile_id);
    let next_base = PYRAMID_SIZE_BY_ZOOM[usize::from(zoom) + 1];
    if u64::from(run_length) > next_base - tile_id {
        return Err(PmtilesError::Malformed("run crosses a zoom boundary"));
    }
    Ok(Entry::Tile(TileRun { tile_id, offset, length, run_length }))
}

fn read_u32_column(buf: &[u8], pos: &mut usize, msg: &'static str) -> PmtilesResult<u32> {
    let value = read_varint(buf, pos)?;
    u32::try_from(value).map_err(|_| PmtilesError::Malformed(msg))
}

/// Bounded LEB128 decoder. Unlike the `varint-rs` reader this
/// distinguishes running off the buffer from an over-long encoding.
fn read_varint(buf: &[u8], pos: &mut usize) -> PmtilesResult<u64> {
    let mut value = 0_u64;
    for i in 0..MAX_VARINT_LEN {
        let byte = *buf.get(*pos).ok_or(PmtilesError::UnexpectedEndOfBuffer)?;
        *pos += 1;
        value |= u64::from(byte & 0x7f) << (7 * i as u32);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(PmtilesError::VarintTooLong)
}
