use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use url::Url;

use super::{FileDownload, Network, NetworkError, Postage, UploadOptions};
use crate::chunk::{Address, Chunk, Reference};
use crate::postage::BatchId;

const BATCH_ID_HEADER: &str = "swarm-postage-batch-id";
const STAMP_HEADER: &str = "swarm-postage-stamp";
const DEFERRED_HEADER: &str = "swarm-deferred-upload";
const PIN_HEADER: &str = "swarm-pin";
const TAG_HEADER: &str = "swarm-tag";

#[derive(Debug, Deserialize)]
struct ReferenceResponse {
    reference: String,
}

#[derive(Debug, Deserialize)]
struct TagResponse {
    uid: u64,
}

/// Client for a Bee-compatible node API
#[derive(Debug, Clone)]
pub struct HttpNetwork {
    remote: Url,
    client: Client,
}

impl HttpNetwork {
    pub fn new(remote: &Url) -> Result<Self, NetworkError> {
        let client = Client::builder().build()?;
        Ok(Self {
            remote: remote.clone(),
            client,
        })
    }

    pub fn remote(&self) -> &Url {
        &self.remote
    }

    fn upload_headers(options: &UploadOptions) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            DEFERRED_HEADER,
            HeaderValue::from_static(if options.deferred { "true" } else { "false" }),
        );
        headers.insert(
            PIN_HEADER,
            HeaderValue::from_static(if options.pin { "true" } else { "false" }),
        );
        if let Some(tag) = options.tag {
            headers.insert(TAG_HEADER, HeaderValue::from(tag));
        }
        headers
    }

    async fn send(request: RequestBuilder) -> Result<reqwest::Response, NetworkError> {
        let response = request.send().await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(NetworkError::HttpStatus(
                response.status(),
                response.text().await?,
            ))
        }
    }

    fn parse_reference(response: ReferenceResponse) -> Result<Reference, NetworkError> {
        Ok(response.reference.parse()?)
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn upload_chunk(
        &self,
        chunk: &Chunk,
        postage: &Postage,
        options: &UploadOptions,
    ) -> Result<Address, NetworkError> {
        let url = self.remote.join("chunks")?;
        let mut request = self
            .client
            .post(url)
            .headers(Self::upload_headers(options))
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(chunk.data());
        request = match postage {
            Postage::Stamp(stamp) => request.header(STAMP_HEADER, stamp.to_hex()),
            Postage::Batch(batch_id) => request.header(BATCH_ID_HEADER, batch_id.to_hex()),
        };

        let response: ReferenceResponse = Self::send(request).await?.json().await?;
        let reference = Self::parse_reference(response)?;
        if reference.address() != chunk.address() {
            return Err(NetworkError::Rejected(format!(
                "node stored {} as {}",
                chunk.address(),
                reference.address()
            )));
        }
        tracing::debug!(address = %chunk.address(), "uploaded chunk");
        Ok(*chunk.address())
    }

    async fn download_chunk(&self, address: &Address) -> Result<Chunk, NetworkError> {
        let url = self.remote.join(&format!("chunks/{}", address))?;
        let response = self.client.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(NetworkError::NotFound(*address));
        }
        if !response.status().is_success() {
            return Err(NetworkError::HttpStatus(
                response.status(),
                response.text().await?,
            ));
        }
        let data = response.bytes().await?;
        Ok(Chunk::verified(address, &data)?)
    }

    async fn create_tag(&self) -> Result<u64, NetworkError> {
        let url = self.remote.join("tags")?;
        let response: TagResponse = Self::send(self.client.post(url)).await?.json().await?;
        tracing::debug!(tag = response.uid, "created tag");
        Ok(response.uid)
    }

    async fn upload_file(
        &self,
        data: Bytes,
        name: Option<&str>,
        content_type: Option<&str>,
        batch_id: &BatchId,
        options: &UploadOptions,
    ) -> Result<Reference, NetworkError> {
        let mut url = self.remote.join("bzz")?;
        if let Some(name) = name {
            url.query_pairs_mut().append_pair("name", name);
        }
        let content_type = content_type
            .map(str::to_string)
            .or_else(|| name.and_then(|n| mime_guess::from_path(n).first_raw().map(str::to_string)))
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let request = self
            .client
            .post(url)
            .headers(Self::upload_headers(options))
            .header(BATCH_ID_HEADER, batch_id.to_hex())
            .header(CONTENT_TYPE, content_type)
            .body(data);
        let response: ReferenceResponse = Self::send(request).await?.json().await?;
        Self::parse_reference(response)
    }

    async fn download_file(
        &self,
        reference: &Reference,
        path: Option<&str>,
    ) -> Result<FileDownload, NetworkError> {
        let path = path.unwrap_or("").trim_start_matches('/');
        let url = self.remote.join(&format!("bzz/{}/{}", reference, path))?;
        let response = Self::send(self.client.get(url)).await?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let name = response
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(filename_from_disposition);
        let data = response.bytes().await?;
        Ok(FileDownload {
            data,
            name,
            content_type,
        })
    }
}

fn filename_from_disposition(value: &str) -> Option<String> {
    value
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("filename="))
        .map(|name| name.trim_matches('"').to_string())
}
