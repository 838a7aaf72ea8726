use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use broker::facade::FacadeError;

use crate::client::{Client, ClientError};
use crate::state::{AppState, StateError};

#[derive(Args, Debug, Clone)]
pub struct Download {
    /// Reference to fetch (64 hex characters, or 128 for encrypted content)
    pub reference: String,

    /// Where to write the content (prints it when omitted)
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Fetch a file uploaded with `upload --file`
    #[arg(long)]
    pub file: bool,

    /// Path inside the uploaded collection
    #[arg(long, requires = "file")]
    pub path: Option<String>,

    /// Fetch a single chunk payload
    #[arg(long, conflicts_with = "file")]
    pub chunk: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("download failed: {0}")]
    Facade(#[from] FacadeError),
    #[error(transparent)]
    Write(#[from] anyhow::Error),
}

#[async_trait::async_trait]
impl crate::op::Op for Download {
    type Error = DownloadError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;
        let client = Client::connect_authenticated(&state, ctx.remote.as_ref()).await?;
        let facade = client.facade();

        let (name, data) = if self.file {
            let file = facade
                .download_file(&self.reference, self.path.clone())
                .await?;
            (file.name, file.data)
        } else if self.chunk {
            (None, facade.download_chunk(&self.reference).await?)
        } else {
            (None, facade.download_data(&self.reference, None).await?)
        };

        let Some(output) = &self.output else {
            return Ok(String::from_utf8_lossy(&data).into_owned());
        };
        tokio::fs::write(output, &data)
            .await
            .with_context(|| format!("failed to write {}", output.display()))?;

        let mut summary = format!("Downloaded {} bytes to {}", data.len(), output.display());
        if let Some(name) = name {
            summary.push_str(&format!(" (uploaded as {})", name));
        }
        Ok(summary)
    }
}
