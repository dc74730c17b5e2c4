//! Object storage contract. Consumed, not implemented: the hosted store owns
//! buckets, paths, and serving.

use async_trait::async_trait;

use crate::AppResult;

#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub content_type: Option<String>,
    pub upsert: bool,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        options: UploadOptions,
    ) -> AppResult<()>;

    fn public_url(&self, bucket: &str, path: &str) -> String;
}
