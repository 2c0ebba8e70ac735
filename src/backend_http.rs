use bytes::Bytes;
use reqwest::header::{HeaderValue, RANGE};
use reqwest::{Client, IntoUrl, Method, Request, StatusCode, Url};

use crate::cache::{DirectoryCache, NoCache};
use crate::error::{PmtilesError, PmtilesResult};
use crate::reader::{ArchiveReader, Backend};

impl ArchiveReader<HttpBackend, NoCache> {
    /// Opens a remote archive over HTTP range requests.
    ///
    /// Requests are made immediately to validate the archive.
    pub async fn open_url<U: IntoUrl>(client: Client, url: U) -> PmtilesResult<Self> {
        Self::open_cached_url(NoCache, client, url).await
    }
}

impl<C: DirectoryCache + Send + Sync> ArchiveReader<HttpBackend, C> {
    /// Opens a remote archive with a leaf-directory cache.
    pub async fn open_cached_url<U: IntoUrl>(
        cache: C,
        client: Client,
        url: U,
    ) -> PmtilesResult<Self> {
        let backend = HttpBackend::new(client, url)?;
        Self::open_with_cache(backend, cache).await
    }
}

/// Positioned reads over a remote archive via HTTP `Range` requests.
pub struct HttpBackend {
    client: Client,
    url: Url,
}

impl HttpBackend {
    /// Creates a backend for `url` using the given client.
    pub fn new<U: IntoUrl>(client: Client, url: U) -> PmtilesResult<Self> {
        Ok(Self {
            client,
            url: url.into_url()?,
        })
    }
}

impl Backend for HttpBackend {
    async fn read_exact(&self, offset: u64, length: usize) -> PmtilesResult<Bytes> {
        let end = offset + length as u64 - 1;
        let range = HeaderValue::try_from(format!("bytes={offset}-{end}"))?;

        let mut request = Request::new(Method::GET, self.url.clone());
        request.headers_mut().insert(RANGE, range);

        let response = self.client.execute(request).await?.error_for_status()?;
        if response.status() != StatusCode::PARTIAL_CONTENT {
            return Err(PmtilesError::RangeRequestsUnsupported);
        }

        let body = response.bytes().await?;
        if body.len() > length {
            Err(PmtilesError::ResponseBodyTooLong(body.len(), length))
        } else if body.len() < length {
            Err(PmtilesError::UnexpectedNumberOfBytesReturned(
                length,
                body.len(),
            ))
        } else {
            Ok(body)
        }
    }
}
