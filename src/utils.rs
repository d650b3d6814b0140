/*!
# UMICP Utilities

Shared helpers: message ids, timestamps, hashing, base64, and field
validation.
*/

use crate::error::{Result, UmicpError};
use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Generate a new UUID v4 message id
pub fn generate_uuid() -> String {
    Uuid::new_v4().to_string()
}

/// Current UTC timestamp in ISO 8601 with millisecond precision and a
/// trailing `Z`, e.g. `2025-01-10T10:00:00.000Z`
pub fn current_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse an ISO 8601 timestamp
pub fn parse_timestamp(timestamp: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(timestamp)
        .map_err(|e| UmicpError::envelope(format!("Invalid timestamp format: {}", e)))
        .map(|dt| dt.with_timezone(&Utc))
}

/// SHA-256 digest of `data` as a lowercase hex string
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// SHA-256 digest of `data` as raw bytes
pub fn sha256_raw(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Check whether a string parses as a UUID
pub fn is_valid_uuid(uuid_str: &str) -> bool {
    Uuid::parse_str(uuid_str).is_ok()
}

/// Validate that a string field is not empty or whitespace
pub fn validate_non_empty(value: &str, field_name: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(UmicpError::envelope(format!(
            "Field '{}' cannot be empty",
            field_name
        )));
    }
    Ok(())
}

/// Base64 encode data
pub fn base64_encode(data: &[u8]) -> String {
    base64::encode(data)
}

/// Base64 decode data
pub fn base64_decode(data: &str) -> Result<Vec<u8>> {
    base64::decode(data).map_err(|e| UmicpError::serialization(format!("Invalid base64: {}", e)))
}

/// Render a byte count in human readable form, for log messages
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}
