use bytes::Bytes;
use tokio::io::AsyncReadExt;

use crate::error::{PmtilesError, PmtilesResult};
use crate::header::Compression;

/// Ceiling for a decompressed directory.
pub(crate) const MAX_DIRECTORY_BYTES: u64 = 10 * 1024 * 1024;

/// Ceiling for the decompressed metadata blob.
pub(crate) const MAX_METADATA_BYTES: u64 = 32 * 1024 * 1024;

/// Ceiling for a single decompressed tile payload.
pub(crate) const MAX_TILE_BYTES: u64 = 32 * 1024 * 1024;

/// Decompresses one archive span, enforcing `limit` on the output size.
pub(crate) async fn decompress(
    compression: Compression,
    bytes: Bytes,
    limit: u64,
    section: &'static str,
) -> PmtilesResult<Bytes> {
    match compression {
        Compression::None => {
            if bytes.len() as u64 > limit {
                return Err(PmtilesError::SectionTooLarge {
                    section,
                    size: bytes.len() as u64,
                    limit,
                });
            }
            Ok(bytes)
        }
        Compression::Gzip => {
            let decoder = async_compression::tokio::bufread::GzipDecoder::new(bytes.as_ref());
            read_capped(decoder, limit, section).await
        }
        #[cfg(feature = "zstd")]
        Compression::Zstd => {
            let decoder = async_compression::tokio::bufread::ZstdDecoder::new(bytes.as_ref());
            read_capped(decoder, limit, section).await
        }
        #[cfg(feature = "brotli")]
        Compression::Brotli => {
            let decoder = async_compression::tokio::bufread::BrotliDecoder::new(bytes.as_ref());
            read_capped(decoder, limit, section).await
        }
        v => Err(PmtilesError::UnsupportedCompression(v)),
    }
}

async fn read_capped<R>(decoder: R, limit: u64, section: &'static str) -> PmtilesResult<Bytes>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut out = Vec::new();
    let mut capped = decoder.take(limit + 1);
    capped
        .read_to_end(&mut out)
        .await
        .map_err(|source| PmtilesError::Decompress { section, source })?;
    if out.len() as u64 > limit {
        return Err(PmtilesError::SectionTooLarge {
            section,
            size: out.len() as u64,
            limit,
        });
    }
    Ok(Bytes::from(out))
}

/// Compresses one section for the writer.
#[cfg(feature = "write")]
pub(crate) fn compress(compression: Compression, bytes: &[u8]) -> PmtilesResult<Vec<u8>> {
    use std::io::Write;

    match compression {
        Compression::None => Ok(bytes.to_vec()),
        Compression::Gzip => {
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(bytes)?;
            Ok(encoder.finish()?)
        }
        #[cfg(feature = "zstd")]
        Compression::Zstd => Ok(zstd::encode_all(bytes, 0)?),
        #[cfg(feature = "brotli")]
        Compression::Brotli => {
            let mut out = Vec::new();
            {
                let mut encoder = brotli::CompressorWriter::new(&mut out, 4096, 5, 22);
                encoder.write_all(bytes)?;
            }
            Ok(out)
        }
        v => Err(PmtilesError::UnsupportedCompression(v)),
    }
}
