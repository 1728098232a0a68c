use std::sync::Arc;

use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use tokio::runtime::Runtime;

use stackfleet_core::remote::{ArtifactStore, RemoteResult};

use crate::error::remote_error;

/// [`ArtifactStore`] writing objects with `PutObject`.
pub struct S3Store {
    client: Client,
    runtime: Arc<Runtime>,
}

impl S3Store {
    pub fn new(client: Client, runtime: Arc<Runtime>) -> Self {
        Self { client, runtime }
    }
}

impl ArtifactStore for S3Store {
    fn upload(&self, bucket: &str, key: &str, body: Vec<u8>) -> RemoteResult<()> {
        tracing::debug!("Uploading s3://{}/{} ({} bytes)", bucket, key, body.len());
        self.runtime
            .block_on(
                self.client
                    .put_object()
                    .bucket(bucket)
                    .key(key)
                    .body(ByteStream::from(body))
                    .send(),
            )
            .map_err(remote_error)?;
        Ok(())
    }
}
