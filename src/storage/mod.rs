//! Object storage for uploaded files.
//!
//! Thin wrapper over an S3-compatible bucket. Attachment metadata lives
//! in the database; this module only moves bytes. When no bucket is
//! configured, operations fail with `Unconfigured` and the API surfaces
//! that as an upstream error rather than a crash.

use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use thiserror::Error;

use crate::config::StorageConfig;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object storage is not configured")]
    Unconfigured,
    #[error("object storage request failed: {0}")]
    Request(String),
    #[error("object not found: {0}")]
    NotFound(String),
}

pub struct ObjectStore {
    client: Option<aws_sdk_s3::Client>,
    bucket: Option<String>,
}

impl ObjectStore {
    /// Build a store from config. Returns an inert store when no bucket
    /// is configured so the rest of the app can start without storage.
    pub async fn from_config(config: &StorageConfig) -> Self {
        let Some(bucket) = config.bucket.clone() else {
            return Self {
                client: None,
                bucket: None,
            };
        };

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()));
        if let Some(ref endpoint) = config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        Self {
            client: Some(aws_sdk_s3::Client::new(&sdk_config)),
            bucket: Some(bucket),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.client.is_some()
    }

    fn parts(&self) -> Result<(&aws_sdk_s3::Client, &str), StorageError> {
        match (&self.client, &self.bucket) {
            (Some(client), Some(bucket)) => Ok((client, bucket)),
            _ => Err(StorageError::Unconfigured),
        }
    }

    pub async fn put(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let (client, bucket) = self.parts()?;
        client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| StorageError::Request(e.to_string()))?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        let (client, bucket) = self.parts()?;
        let output = client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let msg = e.to_string();
                if msg.contains("NoSuchKey") {
                    StorageError::NotFound(key.to_string())
                } else {
                    StorageError::Request(msg)
                }
            })?;
        let data = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Request(e.to_string()))?;
        Ok(data.into_bytes())
    }

    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let (client, bucket) = self.parts()?;
        client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::Request(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_store_rejects_operations() {
        let store = ObjectStore::from_config(&StorageConfig {
            bucket: None,
            endpoint: None,
            region: "us-east-1".to_string(),
        })
        .await;
        assert!(!store.is_configured());
        let err = store.put("k", Bytes::from_static(b"x"), "text/plain").await;
        assert!(matches!(err, Err(StorageError::Unconfigured)));
    }
}
