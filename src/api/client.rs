use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::{Client, Response, Url};

use super::error::ApiError;
use super::types::{ImageOptions, UserProfile};
use super::{ImageStream, RemoteApi};
use crate::retry::{self, RetryAction, RetryConfig};

/// Header carrying the server access token.
const TOKEN_HEADER: HeaderName = HeaderName::from_static("x-emby-token");

const DEFAULT_USER_AGENT: &str = concat!("offline-usersync/", env!("CARGO_PKG_VERSION"));

/// Connection settings for [`HttpRemoteApi`].
#[derive(Clone)]
pub struct ApiConfig {
    pub server_url: String,
    pub access_token: Option<String>,
    pub timeout: Duration,
    pub user_agent: String,
    pub retry: RetryConfig,
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("server_url", &self.server_url)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl ApiConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            access_token: None,
            timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            retry: RetryConfig::default(),
        }
    }
}

/// `reqwest` implementation of [`RemoteApi`].
#[derive(Debug, Clone)]
pub struct HttpRemoteApi {
    client: Client,
    base_url: Url,
    retry: RetryConfig,
}

impl HttpRemoteApi {
    pub fn new(config: ApiConfig) -> Result<Self, ApiError> {
        let base_url = Url::parse(&config.server_url).map_err(|e| ApiError::InvalidBaseUrl {
            url: config.server_url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(base_url.scheme(), "http" | "https") || base_url.cannot_be_a_base() {
            return Err(ApiError::InvalidBaseUrl {
                url: config.server_url.clone(),
                reason: format!("unsupported scheme '{}'", base_url.scheme()),
            });
        }

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_str(&config.user_agent)?);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(token) = &config.access_token {
            let mut value = HeaderValue::from_str(token)?;
            value.set_sensitive(true);
            headers.insert(TOKEN_HEADER, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|source| ApiError::Http {
                source,
                url: config.server_url.clone(),
            })?;

        Ok(Self {
            client,
            base_url,
            retry: config.retry,
        })
    }

    /// `base_url` with `segments` appended, each percent-encoded as a
    /// single path segment.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        url.set_query(None);
        url.set_fragment(None);
        // http(s) base URLs always have path segments; checked in `new`.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn profile_url(&self, user_id: &str) -> String {
        self.endpoint(&["Users", user_id, "Offline"]).into()
    }

    /// Single GET; non-2xx statuses become [`ApiError::HttpStatus`].
    async fn send_checked(&self, url: &str) -> Result<Response, ApiError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| ApiError::Http {
                source,
                url: url.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }
}

fn classify(e: &ApiError) -> RetryAction {
    if e.is_retryable() {
        RetryAction::Retry
    } else {
        RetryAction::Abort
    }
}

#[async_trait::async_trait]
impl RemoteApi for HttpRemoteApi {
    async fn fetch_user_profile(&self, user_id: &str) -> Result<UserProfile, ApiError> {
        let url = self.profile_url(user_id);
        let url = url.as_str();
        tracing::debug!(user_id, url, "Fetching user profile");

        let body = retry::retry_with_backoff(&self.retry, classify, move || async move {
            let response = self.send_checked(url).await?;
            response.bytes().await.map_err(|source| ApiError::Http {
                source,
                url: url.to_string(),
            })
        })
        .await?;

        serde_json::from_slice(&body).map_err(|source| ApiError::Decode {
            source,
            url: url.to_string(),
        })
    }

    fn user_image_url(&self, profile: &UserProfile, options: &ImageOptions) -> String {
        let mut url = self.endpoint(&["Users", &profile.id, "Images", "Primary"]);

        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(tag) = &profile.primary_image_tag {
            query.push(("tag", tag.clone()));
        }
        if let Some(w) = options.max_width {
            query.push(("maxWidth", w.to_string()));
        }
        if let Some(h) = options.max_height {
            query.push(("maxHeight", h.to_string()));
        }
        if let Some(q) = options.quality {
            query.push(("quality", q.to_string()));
        }
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        url.into()
    }

    async fn fetch_byte_stream(&self, url: &str) -> Result<ImageStream, ApiError> {
        tracing::debug!(url, "Opening byte stream");
        let response =
            retry::retry_with_backoff(&self.retry, classify, move || self.send_checked(url))
                .await?;
        Ok(ImageStream::from_response(response))
    }
}
