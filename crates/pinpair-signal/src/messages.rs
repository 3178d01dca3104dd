//! Wire formats for both bindings
//!
//! The polling endpoint speaks `{action, ...}` requests answered by an
//! `{ok, data?, error?, kind?}` envelope. The WebSocket endpoint speaks one
//! JSON object per frame, tagged by `type`.

use serde::{Deserialize, Serialize};
use serde_json::error::Category;

use pinpair_core::{ErrorKind, RoomCode, SecretId, SignalError};

use crate::room::{MessageKind, Payload, Signal};

/// Frames sent from the broker to a WebSocket client
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerFrame {
    /// Room created; the sender is its initiator
    RoomCreated { pin: RoomCode },

    /// Joined a room as its joiner
    JoinSuccess { pin: RoomCode },

    /// A joiner arrived in the initiator's room
    ReceiverConnected { pin: RoomCode },

    /// The opposite peer went away
    PeerDisconnected { pin: RoomCode },

    /// Error response
    Error { message: String, kind: ErrorKind },

    /// Relayed signals
    Offer {
        pin: RoomCode,
        payload: Payload,
    },
    Answer {
        pin: RoomCode,
        payload: Payload,
    },
    IceCandidate {
        pin: RoomCode,
        payload: Payload,
    },
}

impl ServerFrame {
    pub fn error(err: &SignalError) -> Self {
        Self::Error {
            message: err.to_string(),
            kind: err.kind(),
        }
    }

    /// The frame a push client receives for a delivered signal
    pub fn from_signal(code: &RoomCode, signal: Signal) -> Self {
        let pin = code.clone();
        match signal.kind {
            MessageKind::Offer => Self::Offer {
                pin,
                payload: signal.payload,
            },
            MessageKind::Answer => Self::Answer {
                pin,
                payload: signal.payload,
            },
            MessageKind::IceCandidate => Self::IceCandidate {
                pin,
                payload: signal.payload,
            },
            MessageKind::JoinerConnected => Self::ReceiverConnected { pin },
            MessageKind::PeerDisconnected => Self::PeerDisconnected { pin },
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Frames sent from a WebSocket client to the broker
#[derive(Clone, Debug, Deserialize)]
pub struct ClientFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    #[serde(default)]
    pub pin: Option<String>,
    #[serde(default)]
    pub payload: Payload,
}

impl ClientFrame {
    pub fn from_json(json: &str) -> Result<Self, SignalError> {
        serde_json::from_str(json).map_err(|e| match e.classify() {
            Category::Data => SignalError::invalid_request("Invalid message format."),
            _ => SignalError::invalid_request("Invalid JSON payload."),
        })
    }

    pub fn pin(&self) -> &str {
        self.pin.as_deref().unwrap_or("")
    }
}

/// Actions accepted by the polling endpoint
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApiAction {
    CreateRoom,
    JoinRoom,
    SendSignal,
    Poll,
    Leave,
}

impl ApiAction {
    pub fn parse(action: &str) -> Result<Self, SignalError> {
        match action {
            "create-room" => Ok(ApiAction::CreateRoom),
            "join-room" => Ok(ApiAction::JoinRoom),
            "send-signal" => Ok(ApiAction::SendSignal),
            "poll" => Ok(ApiAction::Poll),
            "leave" => Ok(ApiAction::Leave),
            _ => Err(SignalError::invalid_request("Unsupported action.")),
        }
    }
}

/// A polling request body
///
/// Field names of the earlier browser client (`pin`, `peerId`, `type`)
/// are accepted as aliases.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiRequest {
    pub action: String,
    #[serde(default, alias = "pin")]
    pub code: Option<String>,
    #[serde(default, alias = "peerId")]
    pub secret_id: Option<String>,
    #[serde(default, alias = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub payload: Payload,
}

impl ApiRequest {
    /// Parse a raw request body
    pub fn from_slice(body: &[u8]) -> Result<Self, SignalError> {
        if body.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(SignalError::invalid_request("Missing request body."));
        }
        serde_json::from_slice(body).map_err(|e| match e.classify() {
            Category::Data => SignalError::invalid_request("Invalid request format."),
            _ => SignalError::invalid_request("Invalid JSON body."),
        })
    }

    pub fn code(&self) -> Result<RoomCode, SignalError> {
        RoomCode::parse(self.code.as_deref().ok_or(SignalError::InvalidCode)?)
    }

    pub fn secret_id(&self) -> Result<SecretId, SignalError> {
        SecretId::parse(self.secret_id.as_deref().ok_or(SignalError::InvalidSecret)?)
    }

    pub fn signal_kind(&self) -> Result<MessageKind, SignalError> {
        MessageKind::parse_signal(self.kind.as_deref().ok_or(SignalError::InvalidKind)?)
    }
}

/// Successful polling response payloads
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum ApiData {
    Credentials {
        code: RoomCode,
        #[serde(rename = "secretId")]
        secret_id: SecretId,
    },
    Messages {
        messages: Vec<Signal>,
    },
    Empty {},
}

/// The polling response envelope
#[derive(Clone, Debug, Serialize)]
pub struct ApiResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ApiData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

impl ApiResponse {
    pub fn success(data: ApiData) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
            kind: None,
        }
    }

    pub fn failure(err: &SignalError) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(err.to_string()),
            kind: Some(err.kind()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code() -> RoomCode {
        RoomCode::parse("482193").unwrap()
    }

    #[test]
    fn test_server_frame_serialization() {
        let frame = ServerFrame::RoomCreated { pin: code() };
        let json = frame.to_json().unwrap();
        assert_eq!(json, r#"{"type":"room-created","pin":"482193"}"#);

        let frame = ServerFrame::IceCandidate {
            pin: code(),
            payload: serde_json::json!({"candidate": "x"}).into(),
        };
        let json = frame.to_json().unwrap();
        assert!(json.contains(r#""type":"ice-candidate""#));
        assert!(json.contains(r#""candidate":"x""#));
    }

    #[test]
    fn test_error_frame() {
        let frame = ServerFrame::error(&SignalError::RoomNotFound);
        let json = frame.to_json().unwrap();
        assert!(json.contains(r#""type":"error""#));
        assert!(json.contains(r#""message":"Room not found.""#));
        assert!(json.contains(r#""kind":"not_found""#));
    }

    #[test]
    fn test_notice_frames() {
        let joined = Signal::notice(MessageKind::JoinerConnected, 1).unwrap();
        assert_eq!(
            ServerFrame::from_signal(&code(), joined),
            ServerFrame::ReceiverConnected { pin: code() }
        );
        let gone = Signal::notice(MessageKind::PeerDisconnected, 1).unwrap();
        assert_eq!(
            ServerFrame::from_signal(&code(), gone),
            ServerFrame::PeerDisconnected { pin: code() }
        );
    }

    #[test]
    fn test_client_frame_parse() {
        let frame = ClientFrame::from_json(r#"{"type":"offer","pin":"482193","payload":{"sdp":"x"}}"#)
            .unwrap();
        assert_eq!(frame.frame_type, "offer");
        assert_eq!(frame.pin(), "482193");
        assert_eq!(frame.payload.get(), r#"{"sdp":"x"}"#);

        let bare = ClientFrame::from_json(r#"{"type":"create-room"}"#).unwrap();
        assert_eq!(bare.pin(), "");
        assert!(bare.payload.is_null());

        assert_eq!(
            ClientFrame::from_json("not json").unwrap_err().to_string(),
            "Invalid JSON payload."
        );
        assert_eq!(
            ClientFrame::from_json(r#"{"pin":"482193"}"#).unwrap_err().to_string(),
            "Invalid message format."
        );
    }

    #[test]
    fn test_api_request_parse() {
        let request = ApiRequest::from_slice(
            br#"{"action":"send-signal","code":"482193","secretId":"0123456789abcdef0123456789abcdef","kind":"offer","payload":{"sdp":"x"}}"#,
        )
        .unwrap();
        assert_eq!(ApiAction::parse(&request.action), Ok(ApiAction::SendSignal));
        assert_eq!(request.code().unwrap(), code());
        assert!(request.secret_id().is_ok());
        assert_eq!(request.signal_kind(), Ok(MessageKind::Offer));
    }

    #[test]
    fn test_payload_passes_through_untouched() {
        let payload = r#"{"z":1,"a":123456789012345678901234567890}"#;
        let body = format!(
            r#"{{"action":"send-signal","code":"482193","secretId":"0123456789abcdef0123456789abcdef","kind":"offer","payload":{}}}"#,
            payload
        );
        let request = ApiRequest::from_slice(body.as_bytes()).unwrap();
        assert_eq!(request.payload.get(), payload);

        let text = format!(r#"{{"type":"offer","pin":"482193","payload":{}}}"#, payload);
        let frame = ClientFrame::from_json(&text).unwrap();
        let relayed = ServerFrame::Offer {
            pin: code(),
            payload: frame.payload,
        };
        assert_eq!(
            relayed.to_json().unwrap(),
            format!(r#"{{"type":"offer","pin":"482193","payload":{}}}"#, payload)
        );
    }

    #[test]
    fn test_api_request_aliases() {
        let request = ApiRequest::from_slice(
            br#"{"action":"send-signal","pin":"482193","peerId":"0123456789abcdef0123456789abcdef","type":"answer"}"#,
        )
        .unwrap();
        assert_eq!(request.code().unwrap(), code());
        assert!(request.secret_id().is_ok());
        assert_eq!(request.signal_kind(), Ok(MessageKind::Answer));
    }

    #[test]
    fn test_api_request_errors() {
        let err = |body: &[u8]| ApiRequest::from_slice(body).unwrap_err().to_string();
        assert_eq!(err(b"  \n"), "Missing request body.");
        assert_eq!(err(b"{oops"), "Invalid JSON body.");
        assert_eq!(err(br#"{"code":"482193"}"#), "Invalid request format.");
        assert_eq!(err(br#"[1,2]"#), "Invalid request format.");

        let request = ApiRequest::from_slice(br#"{"action":"join-room"}"#).unwrap();
        assert_eq!(request.code(), Err(SignalError::InvalidCode));
        assert_eq!(request.secret_id(), Err(SignalError::InvalidSecret));
        assert_eq!(request.signal_kind(), Err(SignalError::InvalidKind));

        assert!(ApiAction::parse("destroy").is_err());
    }

    #[test]
    fn test_api_response_serialization() {
        let ok = ApiResponse::success(ApiData::Empty {});
        assert_eq!(serde_json::to_string(&ok).unwrap(), r#"{"ok":true,"data":{}}"#);

        let created = ApiResponse::success(ApiData::Credentials {
            code: code(),
            secret_id: SecretId::parse("0123456789abcdef0123456789abcdef").unwrap(),
        });
        let json = serde_json::to_value(&created).unwrap();
        assert_eq!(json["data"]["code"], "482193");
        assert_eq!(json["data"]["secretId"], "0123456789abcdef0123456789abcdef");

        let failed = ApiResponse::failure(&SignalError::Unauthorized);
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["ok"], false);
        assert_eq!(json["error"], "Unauthorized peer.");
        assert_eq!(json["kind"], "auth");
        assert!(json.get("data").is_none());
    }
}
