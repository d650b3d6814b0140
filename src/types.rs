/*!
# UMICP Types

Core type definitions for the UMICP protocol: operation and payload enums,
payload hints, configuration surfaces, and transport metadata.
*/

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Operation types for UMICP messages. The wire token is the uppercase name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationType {
    /// Control message for protocol management
    Control = 0,
    /// Regular data message
    Data = 1,
    /// Acknowledgment message
    Ack = 2,
    /// Error message
    Error = 3,
}

impl Default for OperationType {
    fn default() -> Self {
        OperationType::Control
    }
}

impl OperationType {
    /// Wire token as written in the envelope `op` field
    pub fn as_token(&self) -> &'static str {
        match self {
            OperationType::Control => "CONTROL",
            OperationType::Data => "DATA",
            OperationType::Ack => "ACK",
            OperationType::Error => "ERROR",
        }
    }

    /// Parse a wire token back into an operation type
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "CONTROL" => Some(OperationType::Control),
            "DATA" => Some(OperationType::Data),
            "ACK" => Some(OperationType::Ack),
            "ERROR" => Some(OperationType::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_token())
    }
}

/// Payload types for message content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadType {
    /// Vector data (numeric arrays)
    Vector = 0,
    /// Text data
    Text = 1,
    /// Metadata information
    Metadata = 2,
    /// Binary data
    Binary = 3,
}

impl Default for PayloadType {
    fn default() -> Self {
        PayloadType::Metadata
    }
}

impl PayloadType {
    pub fn as_token(&self) -> &'static str {
        match self {
            PayloadType::Vector => "vector",
            PayloadType::Text => "text",
            PayloadType::Metadata => "metadata",
            PayloadType::Binary => "binary",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "vector" => Some(PayloadType::Vector),
            "text" => Some(PayloadType::Text),
            "metadata" => Some(PayloadType::Metadata),
            "binary" => Some(PayloadType::Binary),
            _ => None,
        }
    }
}

impl std::fmt::Display for PayloadType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_token())
    }
}

/// Encoding types for numeric data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodingType {
    /// 32-bit floating point
    Float32 = 0,
    /// 64-bit floating point
    Float64 = 1,
    /// 32-bit signed integer
    Int32 = 2,
    /// 64-bit signed integer
    Int64 = 3,
    /// 8-bit unsigned integer
    Uint8 = 4,
    /// 16-bit unsigned integer
    Uint16 = 5,
    /// 32-bit unsigned integer
    Uint32 = 6,
    /// 64-bit unsigned integer
    Uint64 = 7,
}

impl Default for EncodingType {
    fn default() -> Self {
        EncodingType::Float32
    }
}

impl EncodingType {
    pub fn as_token(&self) -> &'static str {
        match self {
            EncodingType::Float32 => "float32",
            EncodingType::Float64 => "float64",
            EncodingType::Int32 => "int32",
            EncodingType::Int64 => "int64",
            EncodingType::Uint8 => "uint8",
            EncodingType::Uint16 => "uint16",
            EncodingType::Uint32 => "uint32",
            EncodingType::Uint64 => "uint64",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "float32" => Some(EncodingType::Float32),
            "float64" => Some(EncodingType::Float64),
            "int32" => Some(EncodingType::Int32),
            "int64" => Some(EncodingType::Int64),
            "uint8" => Some(EncodingType::Uint8),
            "uint16" => Some(EncodingType::Uint16),
            "uint32" => Some(EncodingType::Uint32),
            "uint64" => Some(EncodingType::Uint64),
            _ => None,
        }
    }
}

impl std::fmt::Display for EncodingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_token())
    }
}

/// Content types for envelope encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentType {
    Json = 0,
    Cbor = 1,
    Msgpack = 2,
}

impl Default for ContentType {
    fn default() -> Self {
        ContentType::Cbor
    }
}

/// Transport types recognized by the router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportType {
    Websocket = 0,
    Http2 = 1,
    Matrix = 2,
    Direct = 3,
}

impl Default for TransportType {
    fn default() -> Self {
        TransportType::Websocket
    }
}

/// Compression algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionAlgorithm {
    None = 0,
    Zlib = 1,
    Gzip = 2,
    Lz4 = 3,
}

impl Default for CompressionAlgorithm {
    fn default() -> Self {
        CompressionAlgorithm::Zlib
    }
}

/// Load balancing strategies for multi-transport routing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadBalancingStrategy {
    RoundRobin = 0,
    LeastConnections = 1,
    Random = 2,
    Weighted = 3,
}

impl Default for LoadBalancingStrategy {
    fn default() -> Self {
        LoadBalancingStrategy::RoundRobin
    }
}

/// Payload hint for message content description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadHint {
    /// Type of payload
    pub payload_type: PayloadType,
    /// Size in bytes (optional)
    pub size: Option<u64>,
    /// Encoding type for numeric data (optional)
    pub encoding: Option<EncodingType>,
    /// Number of elements (optional)
    pub count: Option<u64>,
}

impl Default for PayloadHint {
    fn default() -> Self {
        PayloadHint {
            payload_type: PayloadType::Metadata,
            size: None,
            encoding: None,
            count: None,
        }
    }
}

impl PayloadHint {
    /// Hint for a fully described payload
    pub fn new(payload_type: PayloadType, size: u64, encoding: EncodingType, count: u64) -> Self {
        PayloadHint {
            payload_type,
            size: Some(size),
            encoding: Some(encoding),
            count: Some(count),
        }
    }
}

/// Protocol-level configuration
#[derive(Debug, Clone, PartialEq)]
pub struct UmicpConfig {
    /// Protocol version ("1.0" or "1.1")
    pub version: String,
    /// Maximum serialized message size in bytes
    pub max_message_size: usize,
    /// Connection timeout in milliseconds
    pub connection_timeout: u32,
    /// Heartbeat interval in milliseconds
    pub heartbeat_interval: u32,
    /// Allow binary frames on the wire
    pub enable_binary: bool,
    /// Envelope encoding used on the wire
    pub preferred_format: ContentType,
    /// Apply the compression policy on the send path
    pub enable_compression: bool,
    /// Minimum payload size eligible for compression
    pub compression_threshold: usize,
    /// Algorithm used when the compression policy fires
    pub compression_algorithm: CompressionAlgorithm,
    /// Require an authenticated peer before sending
    pub require_auth: bool,
    /// Encrypt payloads when a session is established
    pub require_encryption: bool,
    /// Verify transport certificates (advisory to implementations)
    pub validate_certificates: bool,
}

impl Default for UmicpConfig {
    fn default() -> Self {
        UmicpConfig {
            version: "1.0".to_string(),
            max_message_size: 1024 * 1024,
            connection_timeout: 30_000,
            heartbeat_interval: 30_000,
            enable_binary: true,
            preferred_format: ContentType::Cbor,
            enable_compression: true,
            compression_threshold: 1024,
            compression_algorithm: CompressionAlgorithm::Zlib,
            require_auth: true,
            require_encryption: false,
            validate_certificates: true,
        }
    }
}

/// SSL/TLS configuration, advisory to transport implementations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SslConfig {
    pub enable_ssl: bool,
    pub verify_peer: bool,
    pub verify_host: bool,
    pub check_certificate_revocation: bool,
    pub require_client_certificate: bool,
    pub ca_file: Option<String>,
    pub ca_path: Option<String>,
    pub cert_file: Option<String>,
    pub key_file: Option<String>,
    pub cipher_list: Option<String>,
    /// Minimum TLS version, e.g. 12 for TLS 1.2
    pub minimum_tls_version: u8,
    pub enable_ocsp_stapling: bool,
    pub enable_certificate_transparency: bool,
}

impl SslConfig {
    /// Defaults matching a verifying TLS 1.2+ client
    pub fn strict() -> Self {
        SslConfig {
            enable_ssl: true,
            verify_peer: true,
            verify_host: true,
            check_certificate_revocation: true,
            minimum_tls_version: 12,
            ..Default::default()
        }
    }
}

/// Per-transport configuration
#[derive(Debug, Clone, PartialEq)]
pub struct TransportConfig {
    pub transport_type: TransportType,
    pub host: String,
    pub port: u16,
    pub path: Option<String>,
    pub headers: HashMap<String, String>,
    pub max_payload_size: Option<usize>,
    pub ssl_config: Option<SslConfig>,
    /// Relative weight for the WEIGHTED strategy; absent means 1
    pub weight: Option<u32>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            transport_type: TransportType::Websocket,
            host: "localhost".to_string(),
            port: 8080,
            path: None,
            headers: HashMap::new(),
            max_payload_size: Some(1024 * 1024),
            ssl_config: None,
            weight: None,
        }
    }
}

/// Transport statistics snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransportStats {
    /// Total messages sent
    pub messages_sent: u64,
    /// Total messages received
    pub messages_received: u64,
    /// Total bytes sent
    pub bytes_sent: u64,
    /// Total bytes received
    pub bytes_received: u64,
    /// Last send or receive, as milliseconds since the UNIX epoch
    pub last_activity_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_tokens_round_trip() {
        for op in [
            OperationType::Control,
            OperationType::Data,
            OperationType::Ack,
            OperationType::Error,
        ] {
            assert_eq!(OperationType::from_token(op.as_token()), Some(op));
        }
        assert_eq!(OperationType::from_token("data"), None);
    }

    #[test]
    fn test_payload_tokens_are_lowercase() {
        assert_eq!(PayloadType::Vector.as_token(), "vector");
        assert_eq!(EncodingType::Uint64.as_token(), "uint64");
    }

    #[test]
    fn test_config_defaults() {
        let config = UmicpConfig::default();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.max_message_size, 1024 * 1024);
        assert_eq!(config.compression_threshold, 1024);
        assert_eq!(config.preferred_format, ContentType::Cbor);
        assert_eq!(config.compression_algorithm, CompressionAlgorithm::Zlib);
        assert!(!config.require_encryption);
    }
}
