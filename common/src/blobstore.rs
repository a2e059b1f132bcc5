//! Client for the opaque object store (§1 "object storage"). The store itself is
//! an external collaborator; this module only speaks its S3-compatible wire protocol.

use anyhow::{Context, Result};
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;

use crate::args::BlobStoreArgs;

#[derive(Clone)]
pub struct BlobStoreClient {
    client: S3Client,
    bucket: String,
}

impl BlobStoreClient {
    pub async fn connect(args: &BlobStoreArgs) -> Result<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(args.region.clone()));

        if let Some(ref endpoint) = args.endpoint {
            loader = loader.endpoint_url(endpoint);
        }

        let config = loader.load().await;
        Ok(Self {
            client: S3Client::new(&config),
            bucket: args.bucket.clone(),
        })
    }

    /// Read an object in full. Used for the source PDF and rendered sheet PNGs.
    pub async fn get(&self, key: &str) -> Result<Bytes> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("failed to get object at {key}"))?;

        let body = response
            .body
            .collect()
            .await
            .with_context(|| format!("failed to read object body at {key}"))?;

        Ok(body.into_bytes())
    }

    /// Byte-range read, as named in the spec's blob-store interface (e.g. peeking a PDF header).
    pub async fn get_range(&self, key: &str, start: u64, end_inclusive: u64) -> Result<Bytes> {
        let range = format!("bytes={start}-{end_inclusive}");
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .range(range)
            .send()
            .await
            .with_context(|| format!("failed to get object range at {key}"))?;

        let body = response
            .body
            .collect()
            .await
            .with_context(|| format!("failed to read ranged object body at {key}"))?;

        Ok(body.into_bytes())
    }

    pub async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .with_context(|| format!("failed to put object at {key}"))?;
        Ok(())
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(aws_sdk_s3::error::SdkError::ServiceError(e)) if e.err().is_not_found() => {
                Ok(false)
            }
            Err(e) => Err(e).with_context(|| format!("failed to head object at {key}")),
        }
    }
}
