//! S3 (or MinIO) object storage.
//!
//! The SDK is async; calls are driven on a private current-thread runtime so
//! the rest of the crate stays synchronous.

use anyhow::{Context, Result};
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use tokio::runtime::{self, Runtime};
use tracing::trace;

use super::Storage;
use crate::constants::DEFAULT_S3_REGION;

pub struct S3Store {
    client: Client,
    bucket: String,
    runtime: Runtime,
}

impl S3Store {
    /// Connects to the server at `base_url` with static credentials.
    pub fn connect(base_url: &str, access_id: &str, access_key: &str, bucket: &str) -> Result<Self> {
        let runtime = runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("start storage runtime")?;

        let credentials = Credentials::new(access_id, access_key, None, None, "tbpipe");
        let shared = runtime.block_on(
            aws_config::defaults(BehaviorVersion::latest())
                .region(Region::new(DEFAULT_S3_REGION))
                .credentials_provider(credentials)
                .endpoint_url(base_url)
                .load(),
        );
        // MinIO serves buckets by path rather than by host name.
        let config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(config),
            bucket: bucket.to_string(),
            runtime,
        })
    }
}

impl Storage for S3Store {
    fn put(&self, key: &str, data: Bytes) -> Result<()> {
        trace!(bucket = %self.bucket, key, bytes = data.len(), "put");
        self.runtime.block_on(async {
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .body(ByteStream::from(data))
                .send()
                .await
                .with_context(|| format!("put s3://{}/{key}", self.bucket))?;
            Ok::<_, anyhow::Error>(())
        })
    }

    fn get(&self, key: &str) -> Result<Bytes> {
        trace!(bucket = %self.bucket, key, "get");
        self.runtime.block_on(async {
            let object = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .with_context(|| format!("get s3://{}/{key}", self.bucket))?;
            let data = object.body.collect().await?;
            Ok::<_, anyhow::Error>(data.into_bytes())
        })
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        trace!(bucket = %self.bucket, prefix, "list");
        self.runtime.block_on(async {
            let mut keys = Vec::new();
            let mut token = None;
            loop {
                let resp = self
                    .client
                    .list_objects_v2()
                    .bucket(&self.bucket)
                    .prefix(prefix)
                    .set_continuation_token(token.take())
                    .send()
                    .await
                    .with_context(|| format!("list s3://{}/{prefix}", self.bucket))?;
                keys.extend(resp.contents.unwrap_or_default().into_iter().filter_map(|o| o.key));
                match resp.next_continuation_token {
                    Some(next) => token = Some(next),
                    None => break,
                }
            }
            keys.sort();
            Ok::<_, anyhow::Error>(keys)
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        trace!(bucket = %self.bucket, key, "remove");
        self.runtime.block_on(async {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .with_context(|| format!("remove s3://{}/{key}", self.bucket))?;
            Ok::<_, anyhow::Error>(())
        })
    }
}
