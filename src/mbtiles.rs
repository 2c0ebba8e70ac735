//! One-pass MBTiles to `PMTiles` conversion.
//!
//! The source must be a standard MBTiles database with `metadata` and
//! `tiles` tables. Rows are remapped from the bottom-origin MBTiles
//! scheme to the top-origin tile grid, sorted by tile id, and streamed
//! through the archive writer, which deduplicates payloads and compacts
//! runs along the way.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use log::warn;
use rusqlite::{Connection, OpenFlags};
use serde_json::{Map, Value};

use crate::error::{PmtilesError, PmtilesResult};
use crate::header::{Compression, TileType};
use crate::tile::TileCoord;
use crate::writer::{ArchiveStats, ArchiveWriterBuilder};

/// Converts an MBTiles database into a `PMTiles` archive.
///
/// A partially written destination is removed before the error is
/// returned.
pub fn convert(src: &Path, dst: &Path) -> PmtilesResult<ArchiveStats> {
    let conn = Connection::open_with_flags(src, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let builder = builder_from_metadata(&conn)?;

    // First pass: tile ids only, so they can be sorted without holding
    // every payload in memory.
    let mut ids = Vec::new();
    {
        let mut stmt = conn.prepare("SELECT zoom_level, tile_column, tile_row FROM tiles")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let z: i64 = row.get(0)?;
            let x: i64 = row.get(1)?;
            let y: i64 = row.get(2)?;
            let Some(coord) = top_origin_coord(z, x, y) else {
                warn!("skipping tile with invalid address {z}/{x}/{y}");
                continue;
            };
            ids.push(coord.tile_id());
        }
    }
    ids.sort_unstable();
    // a source without a unique (z, x, y) index could repeat addresses
    ids.dedup();

    // Second pass: fetch payloads in tile-id order and stream them into
    // the writer.
    let mut writer = builder.build()?;
    {
        let mut stmt = conn.prepare(
            "SELECT tile_data FROM tiles WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3",
        )?;
        for id in ids {
            let coord = id.coord();
            let row = (1_i64 << coord.z()) - 1 - i64::from(coord.y());
            let data: Vec<u8> =
                stmt.query_row((i64::from(coord.z()), i64::from(coord.x()), row), |r| {
                    r.get(0)
                })?;
            // filter out empty tiles
            if data.is_empty() {
                warn!("skipping tile {coord} with empty tile_data");
                continue;
            }
            writer.add_tile(id, &data)?;
        }
    }

    let file = File::create(dst)?;
    let mut out = BufWriter::new(file);
    match writer.finish(&mut out) {
        Ok(stats) => Ok(stats),
        Err(err) => {
            drop(out);
            let _ = std::fs::remove_file(dst);
            Err(err)
        }
    }
}

/// MBTiles rows count from the bottom of the grid.
fn top_origin_coord(z: i64, x: i64, y: i64) -> Option<TileCoord> {
    if !(0..=30).contains(&z) || x < 0 || y < 0 {
        return None;
    }
    let flipped = (1_i64 << z) - 1 - y;
    if flipped < 0 {
        return None;
    }
    TileCoord::new(z as u8, u32::try_from(x).ok()?, u32::try_from(flipped).ok()?).ok()
}

/// Builds the writer descriptor from the `metadata` table, normalizing it
/// the way the reference converter does: the Tippecanoe `json` item is
/// merged into the root object and the advertised scheme becomes `xyz`.
fn builder_from_metadata(conn: &Connection) -> PmtilesResult<ArchiveWriterBuilder> {
    let mut object = Map::new();
    {
        let mut stmt = conn
            .prepare("SELECT name, value FROM metadata")
            .map_err(|_| PmtilesError::InvalidMbtiles("metadata table not found".to_string()))?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let name: String = row.get(0)?;
            let value: String = row.get(1)?;
            if name == "json" {
                let Ok(Value::Object(extra)) = serde_json::from_str(&value) else {
                    return Err(PmtilesError::InvalidMbtiles(
                        "cannot parse the 'json' metadata item".to_string(),
                    ));
                };
                object.extend(extra);
            } else {
                object.insert(name, Value::String(value));
            }
        }
    }
    object.insert("scheme".to_string(), Value::String("xyz".to_string()));

    let format = string_item(&object, "format")?;
    let (tile_type, tile_compression) = match format.as_str() {
        "pbf" => (TileType::Mvt, Compression::Gzip),
        "png" => (TileType::Png, Compression::None),
        "jpg" | "jpeg" => (TileType::Jpeg, Compression::None),
        "webp" => (TileType::Webp, Compression::None),
        other => {
            return Err(PmtilesError::InvalidMbtiles(format!(
                "format={other} is not handled"
            )));
        }
    };

    let min_zoom = zoom_item(&object, "minzoom")?;
    let max_zoom = zoom_item(&object, "maxzoom")?;

    let bounds = string_item(&object, "bounds")?;
    let bounds: Vec<f64> = bounds
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|_| PmtilesError::InvalidMbtiles("cannot parse bounds".to_string()))?;
    let [min_lon, min_lat, max_lon, max_lat] = bounds[..] else {
        return Err(PmtilesError::InvalidMbtiles(
            "expected 4 values for bounds".to_string(),
        ));
    };
    if min_lon.abs() > 180.0 || max_lon.abs() > 180.0 || min_lat.abs() > 90.0 || max_lat.abs() > 90.0
    {
        return Err(PmtilesError::InvalidMbtiles("invalid bounds".to_string()));
    }

    let center = string_item(&object, "center")?;
    let center: Vec<f64> = center
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|_| PmtilesError::InvalidMbtiles("cannot parse center".to_string()))?;
    let [center_lon, center_lat, center_zoom] = center[..] else {
        return Err(PmtilesError::InvalidMbtiles(
            "expected 3 values for center".to_string(),
        ));
    };
    if center_lon.abs() > 180.0 || center_lat.abs() > 90.0 {
        return Err(PmtilesError::InvalidMbtiles("invalid center".to_string()));
    }
    if !(0.0..=255.0).contains(&center_zoom) {
        return Err(PmtilesError::InvalidMbtiles(
            "missing or invalid center zoom".to_string(),
        ));
    }

    Ok(ArchiveWriterBuilder::new(tile_type)
        .tile_compression(tile_compression)
        .internal_compression(Compression::Gzip)
        .min_zoom(min_zoom)
        .max_zoom(max_zoom)
        .bounds(min_lon, min_lat, max_lon, max_lat)
        .center(center_lon, center_lat)
        .center_zoom(center_zoom as u8)
        .metadata(Value::Object(object).to_string()))
}

fn string_item(object: &Map<String, Value>, key: &str) -> PmtilesResult<String> {
    match object.get(key) {
        Some(Value::String(value)) => Ok(value.clone()),
        _ => Err(PmtilesError::InvalidMbtiles(format!(
            "missing or invalid {key}"
        ))),
    }
}

fn zoom_item(object: &Map<String, Value>, key: &str) -> PmtilesResult<u8> {
    string_item(object, key)?
        .parse::<u8>()
        .map_err(|_| PmtilesError::InvalidMbtiles(format!("missing or invalid {key}")))
}
