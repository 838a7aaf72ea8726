//! Wire messages exchanged over the bus
//!
//! Every message is a JSON object tagged by its `type`. Field names are
//! camelCase and binary payloads travel as base64. Operational requests carry
//! a caller chosen `requestId` which the broker echoes verbatim; the broker
//! itself keeps no table of outstanding requests.

use serde::{Deserialize, Serialize};
use serde_with::base64::Base64;
use serde_with::serde_as;

/// Requests from the host to the broker
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum HostRequest {
    /// Pin the sender as the host origin
    Identify {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        network_url: Option<String>,
    },
    CheckAuth {
        request_id: String,
    },
    /// Ask the broker to present its sign-in affordance
    RequestAuthUi,
    UploadData {
        request_id: String,
        #[serde_as(as = "Base64")]
        data: Vec<u8>,
        #[serde(default)]
        options: UploadDataRequestOptions,
        #[serde(default)]
        enable_progress: bool,
    },
    DownloadData {
        request_id: String,
        reference: String,
        #[serde(default)]
        enable_progress: bool,
    },
    UploadFile {
        request_id: String,
        #[serde_as(as = "Base64")]
        data: Vec<u8>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default)]
        options: UploadDataRequestOptions,
    },
    DownloadFile {
        request_id: String,
        reference: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    UploadChunk {
        request_id: String,
        #[serde_as(as = "Base64")]
        data: Vec<u8>,
        #[serde(default)]
        options: UploadDataRequestOptions,
    },
    DownloadChunk {
        request_id: String,
        reference: String,
    },
    /// Forget the session of the pinned origin
    Disconnect {
        request_id: String,
    },
}

impl HostRequest {
    pub fn request_id(&self) -> Option<&str> {
        match self {
            HostRequest::Identify { .. } | HostRequest::RequestAuthUi => None,
            HostRequest::CheckAuth { request_id }
            | HostRequest::UploadData { request_id, .. }
            | HostRequest::DownloadData { request_id, .. }
            | HostRequest::UploadFile { request_id, .. }
            | HostRequest::DownloadFile { request_id, .. }
            | HostRequest::UploadChunk { request_id, .. }
            | HostRequest::DownloadChunk { request_id, .. }
            | HostRequest::Disconnect { request_id } => Some(request_id),
        }
    }

    /// Message type as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            HostRequest::Identify { .. } => "identify",
            HostRequest::CheckAuth { .. } => "checkAuth",
            HostRequest::RequestAuthUi => "requestAuthUi",
            HostRequest::UploadData { .. } => "uploadData",
            HostRequest::DownloadData { .. } => "downloadData",
            HostRequest::UploadFile { .. } => "uploadFile",
            HostRequest::DownloadFile { .. } => "downloadFile",
            HostRequest::UploadChunk { .. } => "uploadChunk",
            HostRequest::DownloadChunk { .. } => "downloadChunk",
            HostRequest::Disconnect { .. } => "disconnect",
        }
    }
}

/// Upload switches a host may set
///
/// Deferred writes and pinning are not negotiable; the broker always
/// submits deferred and unpinned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadDataRequestOptions {
    #[serde(default)]
    pub encrypt: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<u64>,
}

/// Messages from the broker to the host
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum BrokerMessage {
    /// The broker context is listening
    Initialized,
    /// Answer to identify
    Ready {
        authenticated: bool,
        host_origin: String,
    },
    InitError {
        error: String,
    },
    AuthStatusResponse {
        request_id: String,
        authenticated: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        origin: Option<String>,
    },
    /// A session was established for the pinned origin
    AuthSuccess {
        authenticated: bool,
        origin: String,
    },
    UploadDataResponse {
        request_id: String,
        reference: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tag_uid: Option<u64>,
    },
    DownloadDataResponse {
        request_id: String,
        #[serde_as(as = "Base64")]
        data: Vec<u8>,
    },
    UploadFileResponse {
        request_id: String,
        reference: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tag_uid: Option<u64>,
    },
    DownloadFileResponse {
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde_as(as = "Base64")]
        data: Vec<u8>,
    },
    UploadChunkResponse {
        request_id: String,
        reference: String,
    },
    DownloadChunkResponse {
        request_id: String,
        #[serde_as(as = "Base64")]
        data: Vec<u8>,
    },
    DisconnectResponse {
        request_id: String,
        success: bool,
        authenticated: bool,
    },
    Progress {
        request_id: String,
        processed: u64,
        total: u64,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        error: String,
    },
}

impl BrokerMessage {
    /// Correlation id of a response, if it answers a request
    pub fn request_id(&self) -> Option<&str> {
        match self {
            BrokerMessage::Initialized
            | BrokerMessage::Ready { .. }
            | BrokerMessage::InitError { .. }
            | BrokerMessage::AuthSuccess { .. } => None,
            BrokerMessage::AuthStatusResponse { request_id, .. }
            | BrokerMessage::UploadDataResponse { request_id, .. }
            | BrokerMessage::DownloadDataResponse { request_id, .. }
            | BrokerMessage::UploadFileResponse { request_id, .. }
            | BrokerMessage::DownloadFileResponse { request_id, .. }
            | BrokerMessage::UploadChunkResponse { request_id, .. }
            | BrokerMessage::DownloadChunkResponse { request_id, .. }
            | BrokerMessage::DisconnectResponse { request_id, .. }
            | BrokerMessage::Progress { request_id, .. } => Some(request_id),
            BrokerMessage::Error { request_id, .. } => request_id.as_deref(),
        }
    }
}

/// Secret material handed from the authentication context to the broker
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretBundle {
    pub secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postage_batch_id: Option<String>,
    /// Hex encoded postage signing key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer_key: Option<String>,
    /// Depth of the batch, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<u8>,
}

impl std::fmt::Debug for SecretBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretBundle")
            .field("postage_batch_id", &self.postage_batch_id)
            .field("has_signer_key", &self.signer_key.is_some())
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}

/// Messages from the authentication context to the broker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum AuthMessage {
    SetSecret {
        app_origin: String,
        data: SecretBundle,
    },
}

/// Broker acknowledgement to the authentication context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum AuthReply {
    SecretReceived { success: bool },
}

/// Anything the broker accepts
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Inbound {
    Host(HostRequest),
    Auth(AuthMessage),
}

/// Best effort correlation id of a message that failed to parse
pub fn raw_request_id(payload: &serde_json::Value) -> Option<String> {
    payload
        .get("requestId")
        .and_then(|id| id.as_str())
        .map(str::to_string)
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_host_request_wire_format() {
        let request = HostRequest::UploadData {
            request_id: "r1".to_string(),
            data: b"hi".to_vec(),
            options: UploadDataRequestOptions {
                encrypt: true,
                tag: None,
            },
            enable_progress: true,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "uploadData",
                "requestId": "r1",
                "data": "aGk=",
                "options": {"encrypt": true},
                "enableProgress": true,
            })
        );
        let parsed: HostRequest = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, request);
        assert_eq!(parsed.kind(), "uploadData");
    }

    #[test]
    fn test_unit_variants_and_defaults() {
        let parsed: HostRequest =
            serde_json::from_value(json!({"type": "requestAuthUi"})).unwrap();
        assert_eq!(parsed, HostRequest::RequestAuthUi);
        assert_eq!(parsed.request_id(), None);

        let parsed: HostRequest = serde_json::from_value(
            json!({"type": "downloadData", "requestId": "r2", "reference": "00"}),
        )
        .unwrap();
        assert!(matches!(
            parsed,
            HostRequest::DownloadData {
                enable_progress: false,
                ..
            }
        ));
    }

    #[test]
    fn test_inbound_dispatch() {
        let set_secret = json!({
            "type": "setSecret",
            "appOrigin": "https://app.example",
            "data": {"secret": "ab", "postageBatchId": "cd"},
        });
        match serde_json::from_value::<Inbound>(set_secret).unwrap() {
            Inbound::Auth(AuthMessage::SetSecret { app_origin, data }) => {
                assert_eq!(app_origin, "https://app.example");
                assert_eq!(data.postage_batch_id.as_deref(), Some("cd"));
                assert!(data.signer_key.is_none());
            }
            other => panic!("unexpected message {:?}", other),
        }

        let identify = json!({"type": "identify", "networkUrl": "http://node:1633"});
        assert!(matches!(
            serde_json::from_value::<Inbound>(identify).unwrap(),
            Inbound::Host(HostRequest::Identify { network_url: Some(_) })
        ));

        assert!(serde_json::from_value::<Inbound>(json!({"type": "bogus"})).is_err());
        assert_eq!(
            raw_request_id(&json!({"type": "bogus", "requestId": "r9"})).as_deref(),
            Some("r9")
        );
    }

    #[test]
    fn test_broker_message_request_ids() {
        let error = BrokerMessage::Error {
            request_id: Some("r1".to_string()),
            error: "boom".to_string(),
        };
        assert_eq!(error.request_id(), Some("r1"));
        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            json!({"type": "error", "requestId": "r1", "error": "boom"})
        );
        assert_eq!(BrokerMessage::Initialized.request_id(), None);
    }

    #[test]
    fn test_secret_bundle_debug_hides_secrets() {
        let bundle = SecretBundle {
            secret: "topsecret".to_string(),
            postage_batch_id: None,
            signer_key: Some("deadbeef".to_string()),
            depth: None,
        };
        let debug = format!("{:?}", bundle);
        assert!(!debug.contains("topsecret"));
        assert!(!debug.contains("deadbeef"));
    }
}
