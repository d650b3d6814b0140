/*!
# UMICP Schema Registry

Concurrency-safe registry of message schemas used to gate acceptance.
JSON-Schema documents are validated structurally (type, required,
properties, minLength, minimum, format); CBOR schemas decode the payload
and apply the same rules. Protobuf and custom schemas are registered but
not validated here.
*/

use crate::envelope::Envelope;
use crate::error::{Result, UmicpError};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Supported schema languages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaType {
    JsonSchema = 0,
    CborSchema = 1,
    Protobuf = 2,
    Custom = 3,
}

/// A registered schema
#[derive(Debug, Clone)]
pub struct SchemaDefinition {
    pub id: String,
    pub name: String,
    pub version: String,
    pub schema_type: SchemaType,
    pub schema_content: String,
    pub compatible_versions: HashSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SchemaDefinition {
    pub fn new(
        id: &str,
        name: &str,
        version: &str,
        schema_type: SchemaType,
        schema_content: &str,
    ) -> Self {
        let now = Utc::now();
        SchemaDefinition {
            id: id.to_string(),
            name: name.to_string(),
            version: version.to_string(),
            schema_type,
            schema_content: schema_content.to_string(),
            compatible_versions: HashSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Declare a version this schema can validate against
    pub fn with_compatible_version(mut self, version: &str) -> Self {
        self.compatible_versions.insert(version.to_string());
        self
    }
}

/// Outcome of a validation pass
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub valid: bool,
    pub error_message: Option<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    fn ok() -> Self {
        ValidationResult {
            valid: true,
            error_message: None,
            warnings: Vec::new(),
        }
    }

    fn failed<S: Into<String>>(message: S) -> Self {
        ValidationResult {
            valid: false,
            error_message: Some(message.into()),
            warnings: Vec::new(),
        }
    }
}

/// Registry statistics snapshot
#[derive(Debug, Clone)]
pub struct SchemaRegistryStats {
    pub total_schemas: usize,
    pub total_validations: u64,
    pub validation_errors: u64,
    pub last_validation: Option<DateTime<Utc>>,
}

/// Concurrency-safe schema registry
pub struct SchemaRegistry {
    schemas: RwLock<HashMap<String, SchemaDefinition>>,
    total_validations: AtomicU64,
    validation_errors: AtomicU64,
    last_validation: Mutex<Option<DateTime<Utc>>>,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaRegistry {
    pub fn new() -> Self {
        SchemaRegistry {
            schemas: RwLock::new(HashMap::new()),
            total_validations: AtomicU64::new(0),
            validation_errors: AtomicU64::new(0),
            last_validation: Mutex::new(None),
        }
    }

    /// Register a new schema. Duplicate ids are rejected.
    pub fn register_schema(&self, schema: SchemaDefinition) -> Result<()> {
        let mut schemas = self.schemas.write();
        if schemas.contains_key(&schema.id) {
            return Err(UmicpError::invalid_argument(format!(
                "Schema '{}' is already registered",
                schema.id
            )));
        }
        schemas.insert(schema.id.clone(), schema);
        Ok(())
    }

    /// Replace an existing schema, refreshing its `updated_at`
    pub fn update_schema(&self, schema_id: &str, mut schema: SchemaDefinition) -> Result<()> {
        let mut schemas = self.schemas.write();
        let existing = schemas.get(schema_id).ok_or_else(|| {
            UmicpError::invalid_argument(format!("Schema '{}' is not registered", schema_id))
        })?;
        schema.id = schema_id.to_string();
        schema.created_at = existing.created_at;
        schema.updated_at = Utc::now();
        schemas.insert(schema_id.to_string(), schema);
        Ok(())
    }

    /// Remove a schema by id
    pub fn remove_schema(&self, schema_id: &str) -> Result<()> {
        let mut schemas = self.schemas.write();
        schemas.remove(schema_id).ok_or_else(|| {
            UmicpError::invalid_argument(format!("Schema '{}' is not registered", schema_id))
        })?;
        Ok(())
    }

    /// Fetch a schema by id
    pub fn get_schema(&self, schema_id: &str) -> Result<SchemaDefinition> {
        self.schemas.read().get(schema_id).cloned().ok_or_else(|| {
            UmicpError::invalid_argument(format!("Schema '{}' is not registered", schema_id))
        })
    }

    /// All registered schema ids
    pub fn get_all_schema_ids(&self) -> Vec<String> {
        self.schemas.read().keys().cloned().collect()
    }

    /// All schemas carrying the given name
    pub fn find_schemas_by_name(&self, name: &str) -> Vec<SchemaDefinition> {
        self.schemas
            .read()
            .values()
            .filter(|schema| schema.name == name)
            .cloned()
            .collect()
    }

    /// All schemas of the given type
    pub fn find_schemas_by_type(&self, schema_type: SchemaType) -> Vec<SchemaDefinition> {
        self.schemas
            .read()
            .values()
            .filter(|schema| schema.schema_type == schema_type)
            .cloned()
            .collect()
    }

    /// Validate a message body against a registered schema. `content_type`
    /// describes the encoding of `data` ("json" or "cbor").
    pub fn validate_message(
        &self,
        schema_id: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<ValidationResult> {
        let schema = self.get_schema(schema_id)?;

        let result = match schema.schema_type {
            SchemaType::JsonSchema | SchemaType::CborSchema => {
                let instance = match decode_instance(data, content_type) {
                    Ok(value) => value,
                    Err(message) => {
                        return Ok(self.record(ValidationResult::failed(message), schema_id))
                    }
                };
                match serde_json::from_str::<Value>(&schema.schema_content) {
                    Ok(rules) => {
                        let mut result = ValidationResult::ok();
                        apply_rules(&rules, &instance, "$", &mut result);
                        result
                    }
                    Err(e) => ValidationResult::failed(format!(
                        "Schema '{}' content is not valid JSON: {}",
                        schema_id, e
                    )),
                }
            }
            SchemaType::Protobuf | SchemaType::Custom => {
                return Err(UmicpError::not_implemented(format!(
                    "Validation for schema type {:?} is not supported",
                    schema.schema_type
                )));
            }
        };

        Ok(self.record(result, schema_id))
    }

    /// Validate the structural invariants of an envelope
    pub fn validate_envelope(&self, envelope: &Envelope) -> ValidationResult {
        match envelope.validate() {
            Ok(()) => ValidationResult::ok(),
            Err(e) => ValidationResult::failed(e.to_string()),
        }
    }

    /// Whether `target_version` is listed as compatible for the schema
    pub fn is_schema_compatible(&self, schema_id: &str, target_version: &str) -> bool {
        self.schemas
            .read()
            .get(schema_id)
            .map(|schema| schema.compatible_versions.contains(target_version))
            .unwrap_or(false)
    }

    /// The compatible version set of the schema
    pub fn get_compatible_versions(&self, schema_id: &str) -> Vec<String> {
        self.schemas
            .read()
            .get(schema_id)
            .map(|schema| schema.compatible_versions.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Registry counters
    pub fn get_stats(&self) -> SchemaRegistryStats {
        SchemaRegistryStats {
            total_schemas: self.schemas.read().len(),
            total_validations: self.total_validations.load(Ordering::Relaxed),
            validation_errors: self.validation_errors.load(Ordering::Relaxed),
            last_validation: *self.last_validation.lock(),
        }
    }

    /// Zero the validation counters
    pub fn reset_stats(&self) {
        self.total_validations.store(0, Ordering::Relaxed);
        self.validation_errors.store(0, Ordering::Relaxed);
        *self.last_validation.lock() = None;
    }

    fn record(&self, result: ValidationResult, schema_id: &str) -> ValidationResult {
        self.total_validations.fetch_add(1, Ordering::Relaxed);
        *self.last_validation.lock() = Some(Utc::now());
        if !result.valid {
            self.validation_errors.fetch_add(1, Ordering::Relaxed);
            warn!(
                schema = schema_id,
                error = result.error_message.as_deref().unwrap_or("unknown"),
                "schema validation failed"
            );
        }
        result
    }
}

fn decode_instance(data: &[u8], content_type: &str) -> std::result::Result<Value, String> {
    match content_type {
        "json" => {
            let text = std::str::from_utf8(data)
                .map_err(|e| format!("Message is not UTF-8: {}", e))?;
            serde_json::from_str(text).map_err(|e| format!("Message is not valid JSON: {}", e))
        }
        "cbor" => {
            let value: serde_cbor::Value = serde_cbor::from_slice(data)
                .map_err(|e| format!("Message is not valid CBOR: {}", e))?;
            serde_json::to_value(value).map_err(|e| format!("CBOR value not representable: {}", e))
        }
        other => Err(format!("Unsupported content type '{}'", other)),
    }
}

/// Apply the supported JSON-Schema subset at one node of the instance tree
fn apply_rules(rules: &Value, instance: &Value, path: &str, result: &mut ValidationResult) {
    if !result.valid {
        return;
    }

    if let Some(expected) = rules.get("type").and_then(Value::as_str) {
        if !type_matches(expected, instance) {
            *result = ValidationResult::failed(format!(
                "{}: expected type '{}', got '{}'",
                path,
                expected,
                type_name(instance)
            ));
            return;
        }
    }

    if let Some(required) = rules.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if instance.get(field).is_none() {
                *result = ValidationResult::failed(format!(
                    "{}: missing required field '{}'",
                    path, field
                ));
                return;
            }
        }
    }

    if let Some(properties) = rules.get("properties").and_then(Value::as_object) {
        for (field, subschema) in properties {
            if let Some(value) = instance.get(field) {
                apply_rules(subschema, value, &format!("{}.{}", path, field), result);
                if !result.valid {
                    return;
                }
            }
        }
    }

    if let Some(items) = rules.get("items") {
        if let Some(array) = instance.as_array() {
            for (index, item) in array.iter().enumerate() {
                apply_rules(items, item, &format!("{}[{}]", path, index), result);
                if !result.valid {
                    return;
                }
            }
        }
    }

    if let Some(min_length) = rules.get("minLength").and_then(Value::as_u64) {
        if let Some(text) = instance.as_str() {
            if (text.chars().count() as u64) < min_length {
                *result = ValidationResult::failed(format!(
                    "{}: string shorter than minLength {}",
                    path, min_length
                ));
                return;
            }
        }
    }

    if let Some(minimum) = rules.get("minimum").and_then(Value::as_f64) {
        if let Some(number) = instance.as_f64() {
            if number < minimum {
                *result = ValidationResult::failed(format!(
                    "{}: value {} below minimum {}",
                    path, number, minimum
                ));
                return;
            }
        }
    }

    if let Some(format) = rules.get("format").and_then(Value::as_str) {
        if let Some(text) = instance.as_str() {
            match format {
                "date-time" => {
                    if crate::utils::parse_timestamp(text).is_err() {
                        *result = ValidationResult::failed(format!(
                            "{}: '{}' is not an ISO-8601 date-time",
                            path, text
                        ));
                    }
                }
                "uuid" => {
                    if !crate::utils::is_valid_uuid(text) {
                        *result = ValidationResult::failed(format!(
                            "{}: '{}' is not a UUID",
                            path, text
                        ));
                    }
                }
                other => {
                    result
                        .warnings
                        .push(format!("{}: format '{}' not checked", path, other));
                }
            }
        }
    }
}

fn type_matches(expected: &str, instance: &Value) -> bool {
    match expected {
        "object" => instance.is_object(),
        "array" => instance.is_array(),
        "string" => instance.is_string(),
        "number" => instance.is_number(),
        "integer" => instance.is_i64() || instance.is_u64(),
        "boolean" => instance.is_boolean(),
        "null" => instance.is_null(),
        _ => true,
    }
}

fn type_name(instance: &Value) -> &'static str {
    match instance {
        Value::Object(_) => "object",
        Value::Array(_) => "array",
        Value::String(_) => "string",
        Value::Number(_) => "number",
        Value::Bool(_) => "boolean",
        Value::Null => "null",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USER_SCHEMA: &str = r#"{
        "type": "object",
        "required": ["name", "age"],
        "properties": {
            "name": {"type": "string", "minLength": 2},
            "age": {"type": "integer", "minimum": 0},
            "joined": {"type": "string", "format": "date-time"}
        }
    }"#;

    fn registry_with_user_schema() -> SchemaRegistry {
        let registry = SchemaRegistry::new();
        registry
            .register_schema(
                SchemaDefinition::new("user-v1", "user", "1.0", SchemaType::JsonSchema, USER_SCHEMA)
                    .with_compatible_version("1.1"),
            )
            .unwrap();
        registry
    }

    #[test]
    fn test_register_duplicate_fails() {
        let registry = registry_with_user_schema();
        let dup = SchemaDefinition::new("user-v1", "user", "1.0", SchemaType::JsonSchema, "{}");
        assert!(matches!(
            registry.register_schema(dup).unwrap_err(),
            UmicpError::InvalidArgument { .. }
        ));
    }

    #[test]
    fn test_valid_message_passes() {
        let registry = registry_with_user_schema();
        let message = br#"{"name": "Ada", "age": 36}"#;
        let result = registry.validate_message("user-v1", message, "json").unwrap();
        assert!(result.valid, "{:?}", result.error_message);
    }

    #[test]
    fn test_missing_required_field_fails() {
        let registry = registry_with_user_schema();
        let message = br#"{"name": "Ada"}"#;
        let result = registry.validate_message("user-v1", message, "json").unwrap();
        assert!(!result.valid);
        assert!(result.error_message.unwrap().contains("age"));
    }

    #[test]
    fn test_type_and_bound_violations_fail() {
        let registry = registry_with_user_schema();

        let wrong_type = br#"{"name": "Ada", "age": "old"}"#;
        assert!(!registry.validate_message("user-v1", wrong_type, "json").unwrap().valid);

        let below_minimum = br#"{"name": "Ada", "age": -1}"#;
        assert!(!registry.validate_message("user-v1", below_minimum, "json").unwrap().valid);

        let too_short = br#"{"name": "A", "age": 3}"#;
        assert!(!registry.validate_message("user-v1", too_short, "json").unwrap().valid);
    }

    #[test]
    fn test_format_checks() {
        let registry = registry_with_user_schema();
        let bad_date = br#"{"name": "Ada", "age": 3, "joined": "yesterday"}"#;
        let result = registry.validate_message("user-v1", bad_date, "json").unwrap();
        assert!(!result.valid);

        let good_date = br#"{"name": "Ada", "age": 3, "joined": "2025-01-10T10:00:00.000Z"}"#;
        assert!(registry.validate_message("user-v1", good_date, "json").unwrap().valid);
    }

    #[test]
    fn test_cbor_schema_validation() {
        let registry = SchemaRegistry::new();
        registry
            .register_schema(SchemaDefinition::new(
                "reading-v1",
                "reading",
                "1.0",
                SchemaType::CborSchema,
                r#"{"type": "object", "required": ["sensor"]}"#,
            ))
            .unwrap();

        #[derive(serde::Serialize)]
        struct Reading {
            sensor: String,
        }
        let good = serde_cbor::to_vec(&Reading { sensor: "t0".into() }).unwrap();
        assert!(registry.validate_message("reading-v1", &good, "cbor").unwrap().valid);

        let bad = serde_cbor::to_vec(&HashMap::<String, u32>::new()).unwrap();
        assert!(!registry.validate_message("reading-v1", &bad, "cbor").unwrap().valid);
    }

    #[test]
    fn test_unsupported_schema_type() {
        let registry = SchemaRegistry::new();
        registry
            .register_schema(SchemaDefinition::new(
                "proto-v1",
                "proto",
                "1.0",
                SchemaType::Protobuf,
                "message Empty {}",
            ))
            .unwrap();
        assert!(matches!(
            registry.validate_message("proto-v1", b"", "json").unwrap_err(),
            UmicpError::NotImplemented { .. }
        ));
    }

    #[test]
    fn test_compatibility_resolution() {
        let registry = registry_with_user_schema();
        assert!(registry.is_schema_compatible("user-v1", "1.1"));
        assert!(!registry.is_schema_compatible("user-v1", "2.0"));
        assert!(!registry.is_schema_compatible("missing", "1.0"));
        assert_eq!(registry.get_compatible_versions("user-v1"), vec!["1.1"]);
    }

    #[test]
    fn test_discovery_and_stats() {
        let registry = registry_with_user_schema();
        assert_eq!(registry.find_schemas_by_name("user").len(), 1);
        assert_eq!(registry.find_schemas_by_type(SchemaType::JsonSchema).len(), 1);
        assert!(registry.find_schemas_by_type(SchemaType::Protobuf).is_empty());

        registry
            .validate_message("user-v1", br#"{"name": "Ada"}"#, "json")
            .unwrap();
        let stats = registry.get_stats();
        assert_eq!(stats.total_schemas, 1);
        assert_eq!(stats.total_validations, 1);
        assert_eq!(stats.validation_errors, 1);
        assert!(stats.last_validation.is_some());

        registry.reset_stats();
        assert_eq!(registry.get_stats().total_validations, 0);
    }

    #[test]
    fn test_update_and_remove() {
        let registry = registry_with_user_schema();
        let updated = SchemaDefinition::new(
            "user-v1",
            "user",
            "1.1",
            SchemaType::JsonSchema,
            r#"{"type": "object"}"#,
        );
        registry.update_schema("user-v1", updated).unwrap();
        assert_eq!(registry.get_schema("user-v1").unwrap().version, "1.1");

        registry.remove_schema("user-v1").unwrap();
        assert!(registry.get_schema("user-v1").is_err());
        assert!(registry.remove_schema("user-v1").is_err());
    }
}
