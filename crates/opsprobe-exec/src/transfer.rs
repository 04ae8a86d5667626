//! Object storage used to move files onto VMs.
//!
//! Files too large for a command line are staged in a bucket, pulled by the
//! VM, then removed from the bucket.

use std::sync::Arc;

use async_trait::async_trait;
use opsprobe_core::CallContext;
use reqwest::Client;
use snafu::ResultExt;
use tracing::debug;
use url::Url;

use crate::error::ExecError;
use crate::error::ObjectStoreRequestSnafu;
use crate::error::ObjectStoreUrlSnafu;
use crate::error::Result;
use crate::gcloud::AccessTokenSource;

/// Default endpoint of the Cloud Storage JSON API.
pub const GCS_BASE_URL: &str = "https://storage.googleapis.com/";

/// Minimal bucket operations needed for file transfer.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, ctx: &CallContext, bucket: &str, object: &str, content: Vec<u8>) -> Result<()>;

    async fn delete(&self, ctx: &CallContext, bucket: &str, object: &str) -> Result<()>;
}

/// Cloud Storage over its JSON API.
#[derive(Clone)]
pub struct GcsObjectStore {
    client: Client,
    tokens: Arc<dyn AccessTokenSource>,
    base_url: Url,
}

impl GcsObjectStore {
    pub fn new(tokens: Arc<dyn AccessTokenSource>) -> Result<Self> {
        Self::with_base_url(tokens, GCS_BASE_URL)
    }

    pub fn with_base_url(tokens: Arc<dyn AccessTokenSource>, base_url: &str) -> Result<Self> {
        Ok(Self {
            client: Client::new(),
            tokens,
            base_url: Url::parse(base_url).context(ObjectStoreUrlSnafu)?,
        })
    }

    fn upload_url(&self, bucket: &str, object: &str) -> Result<Url> {
        let mut url = self.base_url.join(&format!("upload/storage/v1/b/{bucket}/o")).context(ObjectStoreUrlSnafu)?;
        url.query_pairs_mut().append_pair("uploadType", "media").append_pair("name", object);
        Ok(url)
    }

    fn object_url(&self, bucket: &str, object: &str) -> Result<Url> {
        let mut url = self.base_url.join(&format!("storage/v1/b/{bucket}/o/")).context(ObjectStoreUrlSnafu)?;
        url.path_segments_mut()
            .map_err(|_| ExecError::ObjectStoreUrl {
                source: url::ParseError::RelativeUrlWithCannotBeABaseBase,
            })?
            .pop_if_empty()
            .push(object);
        Ok(url)
    }

    async fn send(
        &self,
        ctx: &CallContext,
        bucket: &str,
        object: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<()> {
        let token = self.tokens.access_token(ctx).await?;
        let response = ctx
            .run(request.bearer_auth(token).send())
            .await
            .map_err(|reason| ExecError::ObjectStoreInterrupted {
                bucket: bucket.to_string(),
                object: object.to_string(),
                reason,
            })?
            .context(ObjectStoreRequestSnafu { bucket, object })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(ExecError::ObjectStoreStatus {
            bucket: bucket.to_string(),
            object: object.to_string(),
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl ObjectStore for GcsObjectStore {
    async fn put(&self, ctx: &CallContext, bucket: &str, object: &str, content: Vec<u8>) -> Result<()> {
        debug!(bucket, object, bytes = content.len(), "uploading object");
        let request = self
            .client
            .post(self.upload_url(bucket, object)?)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(content);
        self.send(ctx, bucket, object, request).await
    }

    async fn delete(&self, ctx: &CallContext, bucket: &str, object: &str) -> Result<()> {
        debug!(bucket, object, "deleting object");
        let request = self.client.delete(self.object_url(bucket, object)?);
        self.send(ctx, bucket, object, request).await
    }
}

/// Object name for a file headed to `remote_path` on `vm_name`.
pub fn transfer_object_name(vm_name: &str, remote_path: &str) -> String {
    format!("{vm_name}/{}", remote_path.trim_start_matches('/'))
}
