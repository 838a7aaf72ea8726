use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;

use broker::facade::FacadeError;
use broker::messages::UploadDataRequestOptions;
use common::progress::{Progress, ProgressCallback};

use crate::client::{Client, ClientError};
use crate::state::{AppState, StateError};

#[derive(Args, Debug, Clone)]
pub struct Upload {
    /// File to upload
    pub path: PathBuf,

    /// Encrypt the content; the reference then carries the decryption key
    #[arg(long, conflicts_with = "file")]
    pub encrypt: bool,

    /// Upload as a named file through the node instead of as raw data
    #[arg(long)]
    pub file: bool,

    /// Existing upload tag to attach to
    #[arg(long)]
    pub tag: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("upload failed: {0}")]
    Facade(#[from] FacadeError),
    #[error(transparent)]
    Read(#[from] anyhow::Error),
}

#[async_trait::async_trait]
impl crate::op::Op for Upload {
    type Error = UploadError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;
        let data = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let size = data.len();

        let client = Client::connect_authenticated(&state, ctx.remote.as_ref()).await?;
        let options = UploadDataRequestOptions {
            encrypt: self.encrypt,
            tag: self.tag,
        };

        let receipt = if self.file {
            let name = self
                .path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned());
            client.facade().upload_file(data, name, options).await?
        } else {
            let progress: ProgressCallback = Arc::new(|progress: Progress| {
                tracing::info!(
                    processed = progress.processed,
                    total = progress.total,
                    "upload progress"
                );
            });
            client
                .facade()
                .upload_data(data, options, Some(progress))
                .await?
        };

        let tag_str = match receipt.tag_uid {
            Some(tag) => tag.to_string(),
            None => "none".to_string(),
        };
        Ok(format!(
            "Uploaded {} ({} bytes) to {}\n\
             - Reference: {}\n\
             - Tag: {}",
            self.path.display(),
            size,
            client.remote(),
            receipt.reference.to_hex(),
            tag_str
        ))
    }
}
