use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A user as listed by a server: just enough to ask for the full profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerUserRef {
    #[serde(rename = "Id", alias = "id")]
    pub id: String,
    #[serde(rename = "Name", alias = "name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ServerUserRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }
}

/// Full user profile as returned by the server.
///
/// Only the fields the sync pipeline inspects are typed. Everything else the
/// server sends is kept in `extra` so the cached record round-trips intact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "ServerId", default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    #[serde(rename = "HasPrimaryImage", default)]
    pub has_primary_image: bool,
    #[serde(rename = "PrimaryImageTag", default, skip_serializing_if = "Option::is_none")]
    pub primary_image_tag: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UserProfile {
    #[cfg(test)]
    pub(crate) fn test(id: &str, has_primary_image: bool) -> Self {
        Self {
            id: id.to_string(),
            name: format!("user-{}", id),
            server_id: Some("server-1".to_string()),
            has_primary_image,
            primary_image_tag: has_primary_image.then(|| format!("tag-{}", id)),
            extra: Map::new(),
        }
    }
}

/// Size and quality limits for primary image requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageOptions {
    pub max_width: Option<u32>,
    pub max_height: Option<u32>,
    pub quality: Option<u8>,
}

impl ImageOptions {
    /// Full-size image, no limits.
    pub fn primary() -> Self {
        Self::default()
    }
}
