//! On-disk record schema and forward migrations.
//!
//! History:
//! - v1: `runs` may be missing or null, no `artifacts`, no `trace_id`. Very old
//!   records carry no `schema_version` at all.
//! - v2: `runs` is always a list; `artifacts` may be missing or null.
//! - v3: `artifacts` is always a list; `trace_id` is a non-empty string.
//!
//! Migrations run on load only. The migrated shape is what callers see; it is
//! written back the next time the record is saved.

use lifecycle_core::{CURRENT_SCHEMA_VERSION, JobKey, JobRecord};
use serde_json::{Map, Value};
use ulid::Ulid;

use crate::StoreError;

/// Decode persisted bytes into a current-schema record for `key`.
pub fn decode_record(key: &JobKey, bytes: &[u8]) -> Result<JobRecord, StoreError> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| StoreError::corrupted(key, format!("invalid JSON: {e}")))?;
    let value = migrate(key, value)?;

    let record: JobRecord = serde_json::from_value(value)
        .map_err(|e| StoreError::corrupted(key, format!("invalid record: {e}")))?;

    if record.tenant_id != key.tenant_id || record.job_id != key.job_id {
        return Err(StoreError::corrupted(
            key,
            format!("record identity {} does not match its location", record.key()),
        ));
    }
    Ok(record)
}

/// Serialize a record for storage.
pub fn encode_record(record: &JobRecord) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec_pretty(record).map_err(|e| StoreError::Io(std::io::Error::other(e)))
}

/// Read only the optimistic-concurrency token, whatever the schema version.
pub fn persisted_version(key: &JobKey, bytes: &[u8]) -> Result<u64, StoreError> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| StoreError::corrupted(key, format!("invalid JSON: {e}")))?;
    value
        .get("version")
        .and_then(Value::as_u64)
        .ok_or_else(|| StoreError::corrupted(key, "missing or non-integer `version`"))
}

/// Apply every migration between the stored schema version and the current one.
pub fn migrate(key: &JobKey, mut value: Value) -> Result<Value, StoreError> {
    let Value::Object(map) = &mut value else {
        return Err(StoreError::corrupted(key, "record is not a JSON object"));
    };

    let mut version = stored_schema_version(key, map)?;
    if version > CURRENT_SCHEMA_VERSION {
        return Err(StoreError::corrupted(
            key,
            format!("unsupported schema_version {version} (newest known is {CURRENT_SCHEMA_VERSION})"),
        ));
    }

    while version < CURRENT_SCHEMA_VERSION {
        match version {
            1 => v1_to_v2(key, map)?,
            2 => v2_to_v3(key, map)?,
            other => {
                return Err(StoreError::corrupted(
                    key,
                    format!("no migration from schema_version {other}"),
                ));
            }
        }
        version += 1;
        map.insert("schema_version".to_string(), Value::from(version));
        tracing::debug!(job_id = %key, "Migrated record to schema_version {}", version);
    }

    Ok(value)
}

fn stored_schema_version(key: &JobKey, map: &Map<String, Value>) -> Result<u32, StoreError> {
    match map.get("schema_version") {
        None | Some(Value::Null) => Ok(1),
        Some(v) => v
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .filter(|n| *n >= 1)
            .ok_or_else(|| StoreError::corrupted(key, format!("unrecognized schema_version {v}"))),
    }
}

fn v1_to_v2(key: &JobKey, map: &mut Map<String, Value>) -> Result<(), StoreError> {
    normalize_list(key, map, "runs")
}

fn v2_to_v3(key: &JobKey, map: &mut Map<String, Value>) -> Result<(), StoreError> {
    normalize_list(key, map, "artifacts")?;

    match map.get("trace_id") {
        Some(Value::String(s)) if !s.is_empty() => {}
        None | Some(Value::Null) | Some(Value::String(_)) => {
            map.insert(
                "trace_id".to_string(),
                Value::String(Ulid::new().to_string()),
            );
        }
        Some(other) => {
            return Err(StoreError::corrupted(
                key,
                format!("`trace_id` must be a string, found {}", type_name(other)),
            ));
        }
    }
    Ok(())
}

/// Missing or null becomes `[]`; any other non-list value is corruption.
fn normalize_list(
    key: &JobKey,
    map: &mut Map<String, Value>,
    field: &str,
) -> Result<(), StoreError> {
    match map.get(field) {
        None | Some(Value::Null) => {
            map.insert(field.to_string(), Value::Array(Vec::new()));
            Ok(())
        }
        Some(Value::Array(_)) => Ok(()),
        Some(other) => Err(StoreError::corrupted(
            key,
            format!("`{field}` must be a list, found {}", type_name(other)),
        )),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}
