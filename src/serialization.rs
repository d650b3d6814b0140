/*!
# UMICP Serialization

Alternative envelope encodings (CBOR, MessagePack) and format-dispatched
helpers used by the protocol orchestrator. All codecs share one serde data
model, so the round-trip law holds per format.
*/

use crate::envelope::{Envelope, EnvelopeData};
use crate::error::{Result, UmicpError};
use crate::types::ContentType;

/// Serialize an envelope to CBOR
pub fn serialize_envelope_cbor(envelope: &Envelope) -> Result<Vec<u8>> {
    serde_cbor::to_vec(&envelope.to_envelope_data())
        .map_err(|e| UmicpError::serialization(format!("CBOR encode failed: {}", e)))
}

/// Deserialize an envelope from CBOR
pub fn deserialize_envelope_cbor(data: &[u8]) -> Result<Envelope> {
    let raw: EnvelopeData = serde_cbor::from_slice(data)
        .map_err(|e| UmicpError::serialization(format!("CBOR decode failed: {}", e)))?;
    Envelope::from_envelope_data(raw)
}

/// Serialize an envelope to MessagePack (map encoding, string keys)
pub fn serialize_envelope_msgpack(envelope: &Envelope) -> Result<Vec<u8>> {
    rmp_serde::to_vec_named(&envelope.to_envelope_data())
        .map_err(|e| UmicpError::serialization(format!("MessagePack encode failed: {}", e)))
}

/// Deserialize an envelope from MessagePack
pub fn deserialize_envelope_msgpack(data: &[u8]) -> Result<Envelope> {
    let raw: EnvelopeData = rmp_serde::from_slice(data)
        .map_err(|e| UmicpError::serialization(format!("MessagePack decode failed: {}", e)))?;
    Envelope::from_envelope_data(raw)
}

/// Encode an envelope with the given wire format
pub fn encode_envelope(envelope: &Envelope, format: ContentType) -> Result<Vec<u8>> {
    match format {
        ContentType::Json => Ok(envelope.serialize()?.into_bytes()),
        ContentType::Cbor => serialize_envelope_cbor(envelope),
        ContentType::Msgpack => serialize_envelope_msgpack(envelope),
    }
}

/// Decode an envelope with the given wire format
pub fn decode_envelope(data: &[u8], format: ContentType) -> Result<Envelope> {
    match format {
        ContentType::Json => {
            let text = std::str::from_utf8(data)
                .map_err(|e| UmicpError::serialization(format!("Envelope is not UTF-8: {}", e)))?;
            Envelope::deserialize(text)
        }
        ContentType::Cbor => deserialize_envelope_cbor(data),
        ContentType::Msgpack => deserialize_envelope_msgpack(data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EncodingType, OperationType, PayloadHint, PayloadType};

    fn sample_envelope() -> Envelope {
        Envelope::builder()
            .from("node-a")
            .to("node-b")
            .operation(OperationType::Data)
            .message_id("m1")
            .timestamp("2025-01-10T10:00:00.000Z")
            .capability("model", "gpt-4")
            .schema_uri("urn:umicp:schema:embeddings")
            .accept(vec!["application/json".to_string()])
            .payload_hint(PayloadHint::new(
                PayloadType::Vector,
                64,
                EncodingType::Float32,
                16,
            ))
            .build()
            .unwrap()
    }

    #[test]
    fn test_cbor_round_trip() {
        let envelope = sample_envelope();
        let bytes = serialize_envelope_cbor(&envelope).unwrap();
        assert_eq!(deserialize_envelope_cbor(&bytes).unwrap(), envelope);
    }

    #[test]
    fn test_msgpack_round_trip() {
        let envelope = sample_envelope();
        let bytes = serialize_envelope_msgpack(&envelope).unwrap();
        assert_eq!(deserialize_envelope_msgpack(&bytes).unwrap(), envelope);
    }

    #[test]
    fn test_every_format_round_trips() {
        let envelope = sample_envelope();
        for format in [ContentType::Json, ContentType::Cbor, ContentType::Msgpack] {
            let bytes = encode_envelope(&envelope, format).unwrap();
            assert_eq!(decode_envelope(&bytes, format).unwrap(), envelope);
        }
    }

    #[test]
    fn test_cbor_decode_garbage_fails() {
        let err = deserialize_envelope_cbor(&[0xFF, 0x00, 0x13]).unwrap_err();
        assert!(matches!(err, UmicpError::SerializationFailed { .. }));
    }

    #[test]
    fn test_msgpack_missing_fields_fail_as_invalid_envelope() {
        // A map with only a version key decodes structurally but is not a
        // complete envelope.
        #[derive(serde::Serialize)]
        struct Partial {
            v: String,
        }
        let bytes = rmp_serde::to_vec_named(&Partial { v: "1.0".into() }).unwrap();
        let err = deserialize_envelope_msgpack(&bytes).unwrap_err();
        assert!(matches!(err, UmicpError::InvalidEnvelope { .. }));
    }
}
