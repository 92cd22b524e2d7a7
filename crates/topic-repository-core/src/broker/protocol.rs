//! Request framing helpers over `kafka-protocol` message types.
//!
//! Only non-flexible API versions are used, so every response header is the
//! bare 4-byte correlation id.

use bytes::{Bytes, BytesMut};
use kafka_protocol::messages::{ApiKey, RequestHeader};
use kafka_protocol::protocol::{Decodable, Encodable, HeaderVersion, StrBytes};

use crate::error::{EngineError, EngineResult};

/// Metadata API version.
pub const METADATA_VERSION: i16 = 8;

/// ListOffsets API version.
pub const LIST_OFFSETS_VERSION: i16 = 5;

/// Produce API version.
pub const PRODUCE_VERSION: i16 = 7;

/// ListOffsets timestamp selecting the earliest retained offset.
pub const EARLIEST_TIMESTAMP: i64 = -2;

/// ListOffsets timestamp selecting the next offset to be written.
pub const LATEST_TIMESTAMP: i64 = -1;

/// Kafka error codes the engine reacts to.
pub mod error_codes {
    pub const NONE: i16 = 0;
    pub const UNKNOWN_TOPIC_OR_PARTITION: i16 = 3;
    pub const LEADER_NOT_AVAILABLE: i16 = 5;
    pub const NOT_LEADER_OR_FOLLOWER: i16 = 6;
}

/// Encode a request header and body, without the length prefix.
///
/// # Errors
///
/// Returns [`EngineError::ProtocolEncode`] if the message cannot be encoded at
/// `api_version`.
pub fn encode_request<R>(
    api_key: ApiKey,
    api_version: i16,
    correlation_id: i32,
    client_id: &str,
    request: &R,
) -> EngineResult<Bytes>
where
    R: Encodable + HeaderVersion,
{
    let header = RequestHeader::default()
        .with_request_api_key(api_key as i16)
        .with_request_api_version(api_version)
        .with_correlation_id(correlation_id)
        .with_client_id(Some(StrBytes::from_string(client_id.to_string())));

    let mut buf = BytesMut::new();
    header
        .encode(&mut buf, R::header_version(api_version))
        .map_err(|e| EngineError::ProtocolEncode {
            message: format!("{api_key:?} header: {e}"),
        })?;
    request
        .encode(&mut buf, api_version)
        .map_err(|e| EngineError::ProtocolEncode {
            message: format!("{api_key:?} v{api_version}: {e}"),
        })?;

    Ok(buf.freeze())
}

/// Decode a response body, skipping the correlation id.
///
/// # Errors
///
/// Returns [`EngineError::ProtocolDecode`] if the response is truncated or
/// malformed.
pub fn decode_response<R: Decodable>(response: &Bytes, api_version: i16) -> EngineResult<R> {
    if response.len() < 4 {
        return Err(EngineError::ProtocolDecode {
            message: "response too short".to_string(),
        });
    }

    let mut body = response.slice(4..);
    R::decode(&mut body, api_version).map_err(|e| EngineError::ProtocolDecode {
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kafka_protocol::messages::{MetadataRequest, MetadataResponse, ResponseHeader};

    #[test]
    fn test_encoded_request_carries_correlation_id() {
        let request = MetadataRequest::default().with_topics(None);
        let bytes = encode_request(
            ApiKey::Metadata,
            METADATA_VERSION,
            42,
            "topic-repository",
            &request,
        )
        .unwrap();

        assert_eq!(i16::from_be_bytes([bytes[0], bytes[1]]), ApiKey::Metadata as i16);
        assert_eq!(i16::from_be_bytes([bytes[2], bytes[3]]), METADATA_VERSION);
        assert_eq!(
            i32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            42
        );
    }

    #[test]
    fn test_decode_response_skips_correlation_id() {
        let mut buf = BytesMut::new();
        ResponseHeader::default()
            .with_correlation_id(7)
            .encode(&mut buf, MetadataResponse::header_version(METADATA_VERSION))
            .unwrap();
        MetadataResponse::default()
            .with_controller_id(kafka_protocol::messages::BrokerId(3))
            .encode(&mut buf, METADATA_VERSION)
            .unwrap();

        let response: MetadataResponse = decode_response(&buf.freeze(), METADATA_VERSION).unwrap();
        assert_eq!(response.controller_id.0, 3);
    }

    #[test]
    fn test_decode_truncated_response() {
        let result: EngineResult<MetadataResponse> =
            decode_response(&Bytes::from_static(&[0, 1]), METADATA_VERSION);
        assert!(matches!(result, Err(EngineError::ProtocolDecode { .. })));
    }
}
