//! Remote server API as seen by the sync pipeline.
//!
//! The pipeline only ever talks to [`RemoteApi`]; [`HttpRemoteApi`] is the
//! bundled `reqwest` implementation.

pub mod client;
pub mod error;
pub mod types;

use std::pin::Pin;

use bytes::Bytes;
use futures_util::stream::{self, Stream, StreamExt};

pub use client::{ApiConfig, HttpRemoteApi};
pub use error::ApiError;
pub use types::{ImageOptions, ServerUserRef, UserProfile};

type ChunkStream = Pin<Box<dyn Stream<Item = Result<Bytes, ApiError>> + Send>>;

/// Body of an image response, read chunk by chunk.
///
/// Owned by whoever consumes it; dropping it releases the underlying
/// connection, so a consumer that takes it by value releases it on every
/// return path.
pub struct ImageStream {
    content_type: Option<String>,
    content_length: Option<u64>,
    chunks: ChunkStream,
}

impl std::fmt::Debug for ImageStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageStream")
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

impl ImageStream {
    pub fn new<S>(content_type: Option<String>, content_length: Option<u64>, chunks: S) -> Self
    where
        S: Stream<Item = Result<Bytes, ApiError>> + Send + 'static,
    {
        Self {
            content_type,
            content_length,
            chunks: Box::pin(chunks),
        }
    }

    /// Wrap a response whose status has already been checked.
    pub fn from_response(response: reqwest::Response) -> Self {
        let url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_length = response.content_length();
        let chunks = response.bytes_stream().map(move |chunk| {
            chunk.map_err(|source| ApiError::Http {
                source,
                url: url.clone(),
            })
        });
        Self::new(content_type, content_length, chunks)
    }

    /// A stream over an in-memory buffer, delivered in one chunk.
    pub fn from_bytes(content_type: Option<String>, data: impl Into<Bytes>) -> Self {
        let data: Bytes = data.into();
        let len = data.len() as u64;
        Self::new(content_type, Some(len), stream::iter([Ok(data)]))
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Next chunk of the body, or `None` once it is exhausted.
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes, ApiError>> {
        self.chunks.next().await
    }
}

/// Requests the sync pipeline makes against a server.
#[async_trait::async_trait]
pub trait RemoteApi: Send + Sync {
    /// Fetch the full profile of one user.
    async fn fetch_user_profile(&self, user_id: &str) -> Result<UserProfile, ApiError>;

    /// Build the URL of the user's primary image. Pure, no I/O.
    fn user_image_url(&self, profile: &UserProfile, options: &ImageOptions) -> String;

    /// Open a streaming GET on `url`.
    async fn fetch_byte_stream(&self, url: &str) -> Result<ImageStream, ApiError>;
}
