/*!
# UMICP Envelope

Control-plane message container with canonical JSON serialization.

The canonical form writes keys in a fixed order (`v, msg_id, ts, from, to,
op`, then the optional keys) with sorted capability maps, so the SHA-256
content hash of an envelope is identical across processes and platforms.
*/

use crate::error::{Result, UmicpError};
use crate::types::*;
use crate::utils::{self, validate_non_empty};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Capability metadata attached to an envelope. A `BTreeMap` keeps the
/// serialized key order stable, which the content hash depends on.
pub type Capabilities = BTreeMap<String, String>;

/// Content types the sender accepts, in preference order
pub type AcceptTypes = Vec<String>;

/// Reference to a data-plane region carried in a separate frame stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadRef {
    pub stream_id: u64,
    pub offset: u64,
    pub length: u64,
    pub checksum: String,
}

/// Wire shape of an envelope. Field order here is the canonical key order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct EnvelopeData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    v: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    msg_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ts: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    op: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    capabilities: Option<Capabilities>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    schema_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    accept: Option<AcceptTypes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload_hint: Option<PayloadHintData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload_refs: Option<Vec<PayloadRef>>,
}

/// Wire shape of a payload hint; type and encoding are lowercase tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PayloadHintData {
    #[serde(rename = "type")]
    payload_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    count: Option<u64>,
}

/// UMICP envelope, the control-plane message. Immutable once built; use
/// [`Envelope::builder`] to construct one.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    version: String,
    message_id: String,
    timestamp: String,
    from: String,
    to: String,
    operation: OperationType,
    capabilities: Option<Capabilities>,
    schema_uri: Option<String>,
    accept: Option<AcceptTypes>,
    payload_hint: Option<PayloadHint>,
    payload_refs: Option<Vec<PayloadRef>>,
}

impl Envelope {
    /// Create an envelope builder for fluent construction
    pub fn builder() -> EnvelopeBuilder {
        EnvelopeBuilder::new()
    }

    /// Serialize to canonical JSON
    pub fn serialize(&self) -> Result<String> {
        let data = self.to_envelope_data();
        serde_json::to_string(&data)
            .map_err(|e| UmicpError::serialization(format!("Failed to serialize envelope: {}", e)))
    }

    /// Deserialize from canonical JSON. Malformed JSON surfaces as
    /// `SERIALIZATION_FAILED`; missing required fields or an unknown `op`
    /// token surface as `INVALID_ENVELOPE`.
    pub fn deserialize(json: &str) -> Result<Self> {
        let data: EnvelopeData = serde_json::from_str(json).map_err(|e| {
            UmicpError::serialization(format!("Failed to deserialize envelope: {}", e))
        })?;
        Self::from_envelope_data(data)
    }

    /// Validate the envelope invariants: required fields non-empty, version
    /// `1.0`, timestamp at least 20 characters.
    pub fn validate(&self) -> Result<()> {
        validate_non_empty(&self.from, "from")?;
        validate_non_empty(&self.to, "to")?;
        validate_non_empty(&self.message_id, "msg_id")?;
        validate_non_empty(&self.timestamp, "ts")?;

        if self.version != "1.0" {
            return Err(UmicpError::envelope(format!(
                "Unsupported protocol version '{}'",
                self.version
            )));
        }
        if self.timestamp.len() < 20 {
            return Err(UmicpError::envelope(format!(
                "Field 'ts' is not an ISO-8601 timestamp: '{}'",
                self.timestamp
            )));
        }

        if let Some(capabilities) = &self.capabilities {
            for (key, value) in capabilities {
                validate_non_empty(key, "capability key")?;
                validate_non_empty(value, "capability value")?;
            }
        }
        if let Some(schema_uri) = &self.schema_uri {
            validate_non_empty(schema_uri, "schema_uri")?;
        }
        if let Some(accept) = &self.accept {
            for content_type in accept {
                validate_non_empty(content_type, "accept type")?;
            }
        }

        Ok(())
    }

    /// SHA-256 hex digest of the canonical serialization. A content
    /// fingerprint only; not an authentication mechanism.
    pub fn hash(&self) -> Result<String> {
        let serialized = self.serialize()?;
        Ok(utils::sha256_hex(serialized.as_bytes()))
    }

    /// Protocol version
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Message id
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Creation timestamp
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// Sender identifier
    pub fn from(&self) -> &str {
        &self.from
    }

    /// Recipient identifier
    pub fn to(&self) -> &str {
        &self.to
    }

    /// Operation type
    pub fn operation(&self) -> OperationType {
        self.operation
    }

    /// Capability metadata
    pub fn capabilities(&self) -> Option<&Capabilities> {
        self.capabilities.as_ref()
    }

    /// Lookup of a single capability value
    pub fn capability(&self, key: &str) -> Option<&str> {
        self.capabilities
            .as_ref()
            .and_then(|caps| caps.get(key))
            .map(String::as_str)
    }

    /// Schema URI, when the payload is schema-gated
    pub fn schema_uri(&self) -> Option<&str> {
        self.schema_uri.as_deref()
    }

    /// Accepted content types
    pub fn accept(&self) -> Option<&AcceptTypes> {
        self.accept.as_ref()
    }

    /// Payload hint
    pub fn payload_hint(&self) -> Option<&PayloadHint> {
        self.payload_hint.as_ref()
    }

    /// Payload references
    pub fn payload_refs(&self) -> Option<&[PayloadRef]> {
        self.payload_refs.as_deref()
    }

    pub(crate) fn to_envelope_data(&self) -> EnvelopeData {
        EnvelopeData {
            v: Some(self.version.clone()),
            msg_id: Some(self.message_id.clone()),
            ts: Some(self.timestamp.clone()),
            from: Some(self.from.clone()),
            to: Some(self.to.clone()),
            op: Some(self.operation.as_token().to_string()),
            capabilities: self.capabilities.clone(),
            schema_uri: self.schema_uri.clone(),
            accept: self.accept.clone(),
            payload_hint: self.payload_hint.as_ref().map(|hint| PayloadHintData {
                payload_type: hint.payload_type.as_token().to_string(),
                size: hint.size,
                encoding: hint.encoding.map(|e| e.as_token().to_string()),
                count: hint.count,
            }),
            payload_refs: self.payload_refs.clone(),
        }
    }

    pub(crate) fn from_envelope_data(data: EnvelopeData) -> Result<Self> {
        let require = |field: Option<String>, name: &str| {
            field.ok_or_else(|| UmicpError::envelope(format!("Missing required field '{}'", name)))
        };

        let op_token = require(data.op, "op")?;
        let operation = OperationType::from_token(&op_token)
            .ok_or_else(|| UmicpError::envelope(format!("Unknown operation '{}'", op_token)))?;

        let payload_hint = match data.payload_hint {
            Some(hint) => {
                let payload_type = PayloadType::from_token(&hint.payload_type).ok_or_else(|| {
                    UmicpError::envelope(format!("Unknown payload type '{}'", hint.payload_type))
                })?;
                let encoding = match hint.encoding {
                    Some(token) => Some(EncodingType::from_token(&token).ok_or_else(|| {
                        UmicpError::envelope(format!("Unknown encoding '{}'", token))
                    })?),
                    None => None,
                };
                Some(PayloadHint {
                    payload_type,
                    size: hint.size,
                    encoding,
                    count: hint.count,
                })
            }
            None => None,
        };

        let envelope = Envelope {
            version: require(data.v, "v")?,
            message_id: require(data.msg_id, "msg_id")?,
            timestamp: require(data.ts, "ts")?,
            from: require(data.from, "from")?,
            to: require(data.to, "to")?,
            operation,
            capabilities: data.capabilities,
            schema_uri: data.schema_uri,
            accept: data.accept,
            payload_hint,
            payload_refs: data.payload_refs,
        };
        envelope.validate()?;
        Ok(envelope)
    }
}

/// Consuming builder for [`Envelope`]. Validation happens once, at
/// [`EnvelopeBuilder::build`].
#[derive(Debug, Default)]
pub struct EnvelopeBuilder {
    message_id: Option<String>,
    timestamp: Option<String>,
    from: String,
    to: String,
    operation: OperationType,
    capabilities: Option<Capabilities>,
    schema_uri: Option<String>,
    accept: Option<AcceptTypes>,
    payload_hint: Option<PayloadHint>,
    payload_refs: Option<Vec<PayloadRef>>,
}

impl EnvelopeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sender identifier
    pub fn from(mut self, from: &str) -> Self {
        self.from = from.to_string();
        self
    }

    /// Set the recipient identifier
    pub fn to(mut self, to: &str) -> Self {
        self.to = to.to_string();
        self
    }

    /// Set the operation type
    pub fn operation(mut self, operation: OperationType) -> Self {
        self.operation = operation;
        self
    }

    /// Override the generated message id
    pub fn message_id(mut self, message_id: &str) -> Self {
        self.message_id = Some(message_id.to_string());
        self
    }

    /// Override the generated timestamp
    pub fn timestamp(mut self, timestamp: &str) -> Self {
        self.timestamp = Some(timestamp.to_string());
        self
    }

    /// Add a single capability entry
    pub fn capability(mut self, key: &str, value: &str) -> Self {
        self.capabilities
            .get_or_insert_with(Capabilities::new)
            .insert(key.to_string(), value.to_string());
        self
    }

    /// Replace all capabilities
    pub fn capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    /// Set the schema URI
    pub fn schema_uri(mut self, schema_uri: &str) -> Self {
        self.schema_uri = Some(schema_uri.to_string());
        self
    }

    /// Set accepted content types
    pub fn accept(mut self, accept: AcceptTypes) -> Self {
        self.accept = Some(accept);
        self
    }

    /// Set the payload hint
    pub fn payload_hint(mut self, hint: PayloadHint) -> Self {
        self.payload_hint = Some(hint);
        self
    }

    /// Set payload references
    pub fn payload_refs(mut self, refs: Vec<PayloadRef>) -> Self {
        self.payload_refs = Some(refs);
        self
    }

    /// Validate and produce the envelope. Generates a UUID v4 message id and
    /// a millisecond-precision UTC timestamp unless overridden.
    pub fn build(self) -> Result<Envelope> {
        let envelope = Envelope {
            version: "1.0".to_string(),
            message_id: self.message_id.unwrap_or_else(utils::generate_uuid),
            timestamp: self.timestamp.unwrap_or_else(utils::current_timestamp),
            from: self.from,
            to: self.to,
            operation: self.operation,
            capabilities: self.capabilities,
            schema_uri: self.schema_uri,
            accept: self.accept,
            payload_hint: self.payload_hint,
            payload_refs: self.payload_refs,
        };
        envelope.validate()?;
        Ok(envelope)
    }
}
