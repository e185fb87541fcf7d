//! Google Cloud Storage backend over the JSON API.

use reqwest::blocking::{Client, Response};
use reqwest::header::CONTENT_TYPE;
use reqwest::{StatusCode, Url};
use tracing::debug;

use super::{ColdStore, StoreError};


const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";


/// Bucket/object store backed by GCS. Containers are bucket names.
#[derive(Debug, Clone)]
pub struct GcsStore {
    client: Client,
    endpoint: Url,
    access_token: String,
}


impl GcsStore {
    pub fn new(access_token: impl Into<String>) -> Result<Self, StoreError> {
        Self::with_endpoint(DEFAULT_ENDPOINT, access_token)
    }

    /// Point the store at a different API root, e.g. a local emulator.
    pub fn with_endpoint(endpoint: &str, access_token: impl Into<String>) -> Result<Self, StoreError> {
        let endpoint = Url::parse(endpoint).map_err(|_| StoreError::InvalidKey {
            key: endpoint.to_string(),
            reason: "endpoint is not a valid URL",
        })?;

        Ok(Self {
            client: Client::builder().build()?,
            endpoint,
            access_token: access_token.into(),
        })
    }

    /// `.../storage/v1/b/{bucket}/o/{object}` with the object name escaped as
    /// one path segment.
    fn object_url(&self, bucket: &str, key: &str) -> Result<Url, StoreError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| invalid_endpoint(&self.endpoint))?
            .pop_if_empty()
            .extend(["storage", "v1", "b", bucket, "o", key]);
        Ok(url)
    }

    fn upload_url(&self, bucket: &str, key: &str) -> Result<Url, StoreError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| invalid_endpoint(&self.endpoint))?
            .pop_if_empty()
            .extend(["upload", "storage", "v1", "b", bucket, "o"]);
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", key);
        Ok(url)
    }

    fn get(&self, url: Url) -> Result<Response, StoreError> {
        debug!(%url, "GET");
        Ok(self.client.get(url).bearer_auth(&self.access_token).send()?)
    }
}


impl ColdStore for GcsStore {
    fn exists(&self, container: &str, key: &str) -> Result<bool, StoreError> {
        let response = self.get(self.object_url(container, key)?)?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            s if s.is_success() => Ok(true),
            _ => Err(status_error(response)),
        }
    }

    fn read(&self, container: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        let mut url = self.object_url(container, key)?;
        url.query_pairs_mut().append_pair("alt", "media");

        let response = self.get(url)?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(StoreError::NotFound {
                container: container.to_string(),
                key: key.to_string(),
            }),
            s if s.is_success() => Ok(response.bytes()?.to_vec()),
            _ => Err(status_error(response)),
        }
    }

    fn write(
        &self,
        container: &str,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), StoreError> {
        let url = self.upload_url(container, key)?;
        debug!(%url, bytes = bytes.len(), "POST");

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.access_token)
            .header(CONTENT_TYPE, content_type)
            .body(bytes.to_vec())
            .send()?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(status_error(response))
        }
    }
}


fn status_error(response: Response) -> StoreError {
    let status = response.status().as_u16();
    let body = response.text().unwrap_or_default();
    StoreError::Status { status, body }
}


fn invalid_endpoint(endpoint: &Url) -> StoreError {
    StoreError::InvalidKey {
        key: endpoint.to_string(),
        reason: "endpoint cannot be a base URL",
    }
}
