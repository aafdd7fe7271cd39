//! Signaling wire protocol
//!
//! JSON text frames, transport-agnostic:
//!
//! - request: `{"id": 7, "method": "createTransport", "params": {"role": "producer"}}`
//! - success: `{"id": 7, "ok": true, "data": {...}}`
//! - failure: `{"id": 7, "ok": false, "error": {"kind": "...", "message": "..."}}`
//! - event: `{"event": "remoteProducer", "data": {"producerId": "..."}}`

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::{DataProduceParameters, MediaProduceParameters};
use crate::error::{ErrorBody, Result, SignalingError};
use crate::types::{
    ConsumerId, DeviceCapabilities, MediaKind, PeerId, ProducerId, TransportId, TransportRole,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadDeviceParams {
    #[serde(alias = "rtpCapabilities")]
    pub device_capabilities: DeviceCapabilities,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransportParams {
    pub role: TransportRole,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectTransportParams {
    pub transport_id: TransportId,
    pub dtls_parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallParams {
    pub remote_peer_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeParams {
    pub consumer_transport_id: TransportId,
    pub remote_producer_id: ProducerId,
    /// Falls back to the capabilities recorded by `loadDevice`
    #[serde(default, alias = "rtpCapabilities")]
    pub capabilities: Option<DeviceCapabilities>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeDataParams {
    pub consumer_transport_id: TransportId,
    pub remote_producer_id: ProducerId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeConsumerParams {
    pub consumer_id: ConsumerId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseTransportParams {
    pub transport_id: TransportId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseProducerParams {
    pub producer_id: ProducerId,
}

/// A decoded signaling request
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingRequest {
    GetCapabilities,
    LoadDevice(LoadDeviceParams),
    CreateTransport(CreateTransportParams),
    ConnectTransport(ConnectTransportParams),
    Produce(MediaProduceParameters),
    ProduceData(DataProduceParameters),
    Call(CallParams),
    Consume(ConsumeParams),
    ConsumeData(ConsumeDataParams),
    ResumeConsumer(ResumeConsumerParams),
    CloseTransport(CloseTransportParams),
    CloseProducer(CloseProducerParams),
}

impl SignalingRequest {
    /// Decode `params` according to `method`
    pub fn decode(method: &str, params: Value) -> Result<Self> {
        let request = match method {
            "getCapabilities" => Self::GetCapabilities,
            "loadDevice" => Self::LoadDevice(params_of(method, params)?),
            "createTransport" => Self::CreateTransport(params_of(method, params)?),
            "connectTransport" => Self::ConnectTransport(params_of(method, params)?),
            "produce" => Self::Produce(params_of(method, params)?),
            "produceData" => Self::ProduceData(params_of(method, params)?),
            "call" => Self::Call(params_of(method, params)?),
            "consume" => Self::Consume(params_of(method, params)?),
            "consumeData" => Self::ConsumeData(params_of(method, params)?),
            "resumeConsumer" => Self::ResumeConsumer(params_of(method, params)?),
            "closeTransport" => Self::CloseTransport(params_of(method, params)?),
            "closeProducer" => Self::CloseProducer(params_of(method, params)?),
            other => {
                return Err(SignalingError::ProtocolViolation(format!(
                    "unknown method \"{other}\""
                )))
            }
        };
        Ok(request)
    }

    /// Wire name of the request
    #[must_use]
    pub const fn method(&self) -> &'static str {
        match self {
            Self::GetCapabilities => "getCapabilities",
            Self::LoadDevice(_) => "loadDevice",
            Self::CreateTransport(_) => "createTransport",
            Self::ConnectTransport(_) => "connectTransport",
            Self::Produce(_) => "produce",
            Self::ProduceData(_) => "produceData",
            Self::Call(_) => "call",
            Self::Consume(_) => "consume",
            Self::ConsumeData(_) => "consumeData",
            Self::ResumeConsumer(_) => "resumeConsumer",
            Self::CloseTransport(_) => "closeTransport",
            Self::CloseProducer(_) => "closeProducer",
        }
    }
}

fn params_of<T: DeserializeOwned>(method: &str, params: Value) -> Result<T> {
    serde_json::from_value(params)
        .map_err(|e| SignalingError::ProtocolViolation(format!("invalid params for {method}: {e}")))
}

/// Raw request frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl RequestFrame {
    /// Parse a text frame.
    ///
    /// The request id is returned whenever it could be read, so that even a
    /// malformed request gets a correlated error response.
    pub fn parse(text: &str) -> (Option<u64>, Result<SignalingRequest>) {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                return (
                    None,
                    Err(SignalingError::ProtocolViolation(format!("malformed frame: {e}"))),
                )
            }
        };
        let id = value.get("id").and_then(Value::as_u64);

        let frame: Self = match serde_json::from_value(value) {
            Ok(frame) => frame,
            Err(e) => {
                return (
                    id,
                    Err(SignalingError::ProtocolViolation(format!("malformed request: {e}"))),
                )
            }
        };
        (Some(frame.id), SignalingRequest::decode(&frame.method, frame.params))
    }
}

/// Response to a single request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub id: Option<u64>,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl ResponseFrame {
    #[must_use]
    pub const fn success(id: Option<u64>, data: Option<Value>) -> Self {
        Self {
            id,
            ok: true,
            data,
            error: None,
        }
    }

    #[must_use]
    pub fn failure(id: Option<u64>, error: &SignalingError) -> Self {
        Self {
            id,
            ok: false,
            data: None,
            error: Some(error.to_body()),
        }
    }

    #[must_use]
    pub fn from_result(id: Option<u64>, result: Result<Option<Value>>) -> Self {
        match result {
            Ok(data) => Self::success(id, data),
            Err(e) => Self::failure(id, &e),
        }
    }
}

/// Server-initiated events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// First frame on every connection
    #[serde(rename_all = "camelCase")]
    ConnectionSuccess { peer_id: PeerId },

    /// A remote media producer offered by `call`
    #[serde(rename_all = "camelCase")]
    RemoteProducer { producer_id: ProducerId },

    /// A remote data producer offered by `call`
    #[serde(rename_all = "camelCase")]
    RemoteDataProducer { producer_id: ProducerId },

    /// One of the peer's consumers was closed by a cascade it did not start
    #[serde(rename_all = "camelCase")]
    ConsumerClosed {
        consumer_id: ConsumerId,
        producer_id: ProducerId,
    },
}

impl ServerEvent {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ConnectionSuccess { .. } => "connectionSuccess",
            Self::RemoteProducer { .. } => "remoteProducer",
            Self::RemoteDataProducer { .. } => "remoteDataProducer",
            Self::ConsumerClosed { .. } => "consumerClosed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProduceResponse {
    pub producer_id: ProducerId,
}

/// Producers of the remote peer, also emitted as events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallOffer {
    pub remote_peer_id: PeerId,
    pub producer_id: Option<ProducerId>,
    pub data_producer_id: Option<ProducerId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerParameters {
    pub consumer_id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub rtp_parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataConsumerParameters {
    pub consumer_id: ConsumerId,
    pub producer_id: ProducerId,
    pub sctp_stream_parameters: Value,
    pub label: String,
    pub protocol: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_consume_request() {
        let text = json!({
            "id": 4,
            "method": "consume",
            "params": {
                "consumerTransportId": "t9",
                "remoteProducerId": "p1",
                "rtpCapabilities": { "codecs": [] }
            }
        })
        .to_string();
        let (id, request) = RequestFrame::parse(&text);
        assert_eq!(id, Some(4));

        match request.unwrap() {
            SignalingRequest::Consume(params) => {
                assert_eq!(params.consumer_transport_id.as_str(), "t9");
                assert_eq!(params.remote_producer_id.as_str(), "p1");
                assert!(params.capabilities.is_some());
            }
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn test_parameterless_method() {
        let (_, request) = RequestFrame::parse(r#"{"id":1,"method":"getCapabilities"}"#);
        assert_eq!(request.unwrap(), SignalingRequest::GetCapabilities);
    }

    #[test]
    fn test_malformed_frames_are_protocol_violations() {
        let (id, request) = RequestFrame::parse("not json");
        assert_eq!(id, None);
        assert_eq!(request.unwrap_err().kind(), "ProtocolViolation");

        let (id, request) = RequestFrame::parse(r#"{"id":2,"method":"fly"}"#);
        assert_eq!(id, Some(2));
        assert_eq!(request.unwrap_err().kind(), "ProtocolViolation");

        let (id, request) =
            RequestFrame::parse(r#"{"id":3,"method":"createTransport","params":{"role":"x"}}"#);
        assert_eq!(id, Some(3));
        assert_eq!(request.unwrap_err().kind(), "ProtocolViolation");
    }

    #[test]
    fn test_event_wire_format() {
        let event = ServerEvent::ConsumerClosed {
            consumer_id: ConsumerId::from("c1"),
            producer_id: ProducerId::from("p1"),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({ "event": "consumerClosed", "data": { "consumerId": "c1", "producerId": "p1" } })
        );
        assert_eq!(event.name(), "consumerClosed");
    }

    #[test]
    fn test_failure_response_wire_format() {
        let response = ResponseFrame::from_result(
            Some(9),
            Err(SignalingError::NoProducer("bob has not produced".into())),
        );
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["ok"], false);
        assert_eq!(json["error"]["kind"], "NoProducer");
        assert!(json.get("data").is_none());
    }
}
