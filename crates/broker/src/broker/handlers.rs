use std::sync::Arc;

use bytes::Bytes;

use common::chunk::{EncryptedChunk, Reference};
use common::network::UploadOptions;
use common::progress::{Progress, ProgressCallback};
use common::upload::{UploadAuth, UploadDataOptions};

use super::{ActiveSession, BrokerError, Responder, Services};
use crate::messages::{BrokerMessage, HostRequest, UploadDataRequestOptions};

/// Run one storage request to completion and reply to the host
pub(super) async fn serve(
    services: Arc<Services>,
    session: Arc<ActiveSession>,
    responder: Responder,
    request: HostRequest,
) {
    let request_id = request.request_id().map(str::to_string);
    let kind = request.kind();
    tracing::debug!(request_id = ?request_id, kind, "serving request");

    match dispatch(&services, &session, &responder, request).await {
        Ok(response) => {
            tracing::debug!(request_id = ?request_id, kind, "request complete");
            responder.send(&response);
        }
        Err(e) => {
            tracing::error!(request_id = ?request_id, kind, "request failed: {}", e);
            responder.error(request_id, e);
        }
    }
}

async fn dispatch(
    services: &Services,
    session: &ActiveSession,
    responder: &Responder,
    request: HostRequest,
) -> Result<BrokerMessage, BrokerError> {
    match request {
        HostRequest::UploadData {
            request_id,
            data,
            options,
            enable_progress,
        } => {
            let auth = upload_auth(session)?;
            let progress = enable_progress.then(|| progress_reporter(responder, &request_id));
            let options = UploadDataOptions {
                encrypt: options.encrypt,
                tag: options.tag,
            };
            let result = services
                .uploader
                .upload_data(&data, auth, options, progress)
                .await?;
            Ok(BrokerMessage::UploadDataResponse {
                request_id,
                reference: result.reference.to_hex(),
                tag_uid: Some(result.tag_uid),
            })
        }
        HostRequest::DownloadData {
            request_id,
            reference,
            enable_progress,
        } => {
            let reference: Reference = reference.parse()?;
            let progress = enable_progress.then(|| progress_reporter(responder, &request_id));
            let (data, _) = services.downloader.download(&reference, progress).await?;
            Ok(BrokerMessage::DownloadDataResponse {
                request_id,
                data: data.to_vec(),
            })
        }
        HostRequest::UploadFile {
            request_id,
            data,
            name,
            options,
        } => {
            let (reference, tag_uid) = upload_file(services, session, data, name, options).await?;
            Ok(BrokerMessage::UploadFileResponse {
                request_id,
                reference: reference.to_hex(),
                tag_uid: Some(tag_uid),
            })
        }
        HostRequest::DownloadFile {
            request_id,
            reference,
            path,
        } => {
            let reference: Reference = reference.parse()?;
            let file = services
                .network
                .download_file(&reference, path.as_deref())
                .await?;
            Ok(BrokerMessage::DownloadFileResponse {
                request_id,
                name: file.name,
                data: file.data.to_vec(),
            })
        }
        HostRequest::UploadChunk {
            request_id,
            data,
            options,
        } => {
            let auth = upload_auth(session)?;
            let reference = services
                .uploader
                .upload_chunk(&data, auth, options.tag)
                .await?;
            Ok(BrokerMessage::UploadChunkResponse {
                request_id,
                reference: reference.to_hex(),
            })
        }
        HostRequest::DownloadChunk {
            request_id,
            reference,
        } => {
            let reference: Reference = reference.parse()?;
            let chunk = services.downloader.download_chunk(reference.address()).await?;
            let data = match reference {
                Reference::Plain(_) => chunk.payload().to_vec(),
                Reference::Encrypted { key, .. } => {
                    let (span, mut payload) = EncryptedChunk::decrypt(&chunk, &key)?;
                    payload.truncate(usize::try_from(span).unwrap_or(usize::MAX));
                    payload
                }
            };
            Ok(BrokerMessage::DownloadChunkResponse { request_id, data })
        }
        request @ (HostRequest::Identify { .. }
        | HostRequest::CheckAuth { .. }
        | HostRequest::RequestAuthUi
        | HostRequest::Disconnect { .. }) => Err(BrokerError::Protocol(format!(
            "{} is not a storage request",
            request.kind()
        ))),
    }
}

fn upload_auth(session: &ActiveSession) -> Result<&UploadAuth, BrokerError> {
    session.auth.as_ref().ok_or_else(|| {
        BrokerError::Unauthorized("session has no postage batch configured".to_string())
    })
}

async fn upload_file(
    services: &Services,
    session: &ActiveSession,
    data: Vec<u8>,
    name: Option<String>,
    options: UploadDataRequestOptions,
) -> Result<(Reference, u64), BrokerError> {
    let batch_id = match (&session.record.batch_id, &session.record.signer_key) {
        (Some(batch_id), _) => *batch_id,
        (None, Some(_)) => {
            return Err(BrokerError::Unauthorized(
                "file uploads need a postage batch id, a signer key alone is not enough"
                    .to_string(),
            ))
        }
        (None, None) => {
            return Err(BrokerError::Unauthorized(
                "session has no postage batch configured".to_string(),
            ))
        }
    };

    let tag_uid = match options.tag {
        Some(tag) => tag,
        None => services.network.create_tag().await?,
    };
    let reference = services
        .network
        .upload_file(
            Bytes::from(data),
            name.as_deref(),
            None,
            &batch_id,
            &UploadOptions::with_tag(Some(tag_uid)),
        )
        .await?;
    Ok((reference, tag_uid))
}

fn progress_reporter(responder: &Responder, request_id: &str) -> ProgressCallback {
    let responder = responder.clone();
    let request_id = request_id.to_string();
    Arc::new(move |progress: Progress| {
        responder.send(&BrokerMessage::Progress {
            request_id: request_id.clone(),
            processed: progress.processed,
            total: progress.total,
        });
    })
}
