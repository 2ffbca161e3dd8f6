//! Remote artifact store client
//!
//! Abstracts existence checks and recursive fetch of a model artifact tree
//! from a URI-addressed blob store. The production implementation talks to
//! Google Cloud Storage over its JSON API; tests substitute the trait with
//! an in-memory store.

use crate::error::{EngineError, Result};
use crate::utils::format_bytes;
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// URI scheme of the supported remote store
pub const GCS_SCHEME: &str = "gs://";

/// Public endpoint of the GCS JSON and download APIs
const STORAGE_API_URL: &str = "https://storage.googleapis.com";

/// A parsed `gs://bucket/prefix` artifact location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLocation {
    pub bucket: String,
    pub prefix: String,
}

impl ArtifactLocation {
    /// Parse a `gs://bucket/prefix` URI
    pub fn parse(uri: &str) -> Result<Self> {
        let rest = uri.strip_prefix(GCS_SCHEME).ok_or_else(|| {
            EngineError::config(format!(
                "Artifact location must start with {}: {}",
                GCS_SCHEME, uri
            ))
        })?;

        let (bucket, prefix) = match rest.split_once('/') {
            Some((bucket, prefix)) => (bucket, prefix.trim_end_matches('/')),
            None => (rest, ""),
        };

        if bucket.is_empty() {
            return Err(EngineError::config(format!(
                "Artifact location is missing a bucket: {}",
                uri
            )));
        }

        Ok(Self {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
        })
    }

    /// Object-name prefix used for directory-style listings
    fn dir_prefix(&self) -> String {
        if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.prefix)
        }
    }
}

impl fmt::Display for ArtifactLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.prefix.is_empty() {
            write!(f, "{}{}", GCS_SCHEME, self.bucket)
        } else {
            write!(f, "{}{}/{}", GCS_SCHEME, self.bucket, self.prefix)
        }
    }
}

/// Describes a client capable of reading a remote artifact tree
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Check whether the location holds at least one object
    async fn exists(&self, location: &ArtifactLocation) -> Result<bool>;

    /// Recursively copy the remote tree under `location` into `dest`,
    /// mirroring the relative layout
    async fn fetch_tree(&self, location: &ArtifactLocation, dest: &Path) -> Result<()>;
}

/// One object entry from a GCS listing. Sizes are decimal strings in the
/// JSON API.
#[derive(Debug, Deserialize)]
struct ObjectInfo {
    name: String,
    size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectList {
    #[serde(default)]
    items: Vec<ObjectInfo>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

/// GCS-backed artifact store
pub struct GcsArtifactStore {
    client: reqwest::Client,
    auth_token: Option<String>,
}

impl GcsArtifactStore {
    /// Create a new store client with an optional bearer token
    pub fn new(auth_token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(3600))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| EngineError::config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, auth_token })
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// List all objects under the location, following pagination
    async fn list_objects(&self, location: &ArtifactLocation) -> Result<Vec<ObjectInfo>> {
        let url = format!("{}/storage/v1/b/{}/o", STORAGE_API_URL, location.bucket);
        let prefix = location.dir_prefix();
        let mut objects = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.get(&url).query(&[("prefix", prefix.as_str())]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let response = request
                .send()
                .await
                .map_err(|e| EngineError::download(format!("Failed to list {}: {}", location, e)))?
                .error_for_status()
                .map_err(|e| {
                    EngineError::download(format!("Listing {} failed: {}", location, e))
                })?;

            let page: ObjectList = response.json().await.map_err(|e| {
                EngineError::download(format!("Failed to parse listing for {}: {}", location, e))
            })?;

            objects.extend(page.items);
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(objects)
    }

    /// Stream one object into a local file
    async fn download_object(&self, bucket: &str, name: &str, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| EngineError::download(format!("Failed to create {:?}: {}", parent, e)))?;
        }

        let url = format!("{}/{}/{}", STORAGE_API_URL, bucket, name);
        let response = self
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::download(format!("Failed to fetch {}: {}", name, e)))?
            .error_for_status()
            .map_err(|e| EngineError::download(format!("Fetching {} failed: {}", name, e)))?;

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| EngineError::download(format!("Failed to create {:?}: {}", dest, e)))?;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| EngineError::download(format!("Stream error for {}: {}", name, e)))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| EngineError::download(format!("Write error for {:?}: {}", dest, e)))?;
        }
        file.flush()
            .await
            .map_err(|e| EngineError::download(format!("Flush error for {:?}: {}", dest, e)))?;

        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for GcsArtifactStore {
    async fn exists(&self, location: &ArtifactLocation) -> Result<bool> {
        let url = format!("{}/storage/v1/b/{}/o", STORAGE_API_URL, location.bucket);
        let response = self
            .get(&url)
            .query(&[("prefix", location.dir_prefix().as_str()), ("maxResults", "1")])
            .send()
            .await
            .map_err(|e| EngineError::download(format!("Failed to probe {}: {}", location, e)))?
            .error_for_status()
            .map_err(|e| EngineError::download(format!("Probing {} failed: {}", location, e)))?;

        let page: ObjectList = response.json().await.map_err(|e| {
            EngineError::download(format!("Failed to parse probe for {}: {}", location, e))
        })?;

        Ok(!page.items.is_empty())
    }

    async fn fetch_tree(&self, location: &ArtifactLocation, dest: &Path) -> Result<()> {
        let objects = self.list_objects(location).await?;
        let dir_prefix = location.dir_prefix();

        let files: Vec<&ObjectInfo> = objects
            .iter()
            .filter(|o| !o.name.ends_with('/'))
            .collect();
        let total_bytes: u64 = files
            .iter()
            .filter_map(|o| o.size.as_deref().and_then(|s| s.parse::<u64>().ok()))
            .sum();
        info!(
            "Fetching {} objects ({}) from {}",
            files.len(),
            format_bytes(total_bytes as usize),
            location
        );

        for object in files {
            let relative = object
                .name
                .strip_prefix(dir_prefix.as_str())
                .unwrap_or(&object.name);
            if relative.is_empty() {
                continue;
            }
            let target = dest.join(relative);
            debug!("Fetching {} -> {:?}", object.name, target);
            self.download_object(&location.bucket, &object.name, &target)
                .await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_location() {
        let location = ArtifactLocation::parse("gs://models/food-vit/v3").unwrap();
        assert_eq!(location.bucket, "models");
        assert_eq!(location.prefix, "food-vit/v3");
        assert_eq!(location.to_string(), "gs://models/food-vit/v3");
    }

    #[test]
    fn test_parse_bucket_only() {
        let location = ArtifactLocation::parse("gs://models").unwrap();
        assert_eq!(location.bucket, "models");
        assert_eq!(location.prefix, "");
        assert_eq!(location.dir_prefix(), "");
    }

    #[test]
    fn test_parse_strips_trailing_slash() {
        let location = ArtifactLocation::parse("gs://models/food-vit/").unwrap();
        assert_eq!(location.prefix, "food-vit");
        assert_eq!(location.dir_prefix(), "food-vit/");
    }

    #[test]
    fn test_parse_rejects_other_schemes() {
        assert!(ArtifactLocation::parse("s3://models/food").is_err());
        assert!(ArtifactLocation::parse("models/food").is_err());
        assert!(ArtifactLocation::parse("gs://").is_err());
    }
}
