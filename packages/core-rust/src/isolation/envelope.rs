//! Reserved-field envelope for isolated payloads.
//!
//! Objects are tagged in place (on a copy): reserved fields are added next to
//! the business fields. Anything else is wrapped as
//! `{"data": <value>, "_wrapped": true, <tags>}` so that opening the envelope
//! can tell a wrapped scalar from an object that happens to have a `data` key.

use serde_json::{Map, Value};

use crate::context::{IsolationLevel, MultiLevelContext};
use crate::error::IsolationError;

pub const TENANT_FIELD: &str = "_tenantId";
pub const ORGANIZATION_FIELD: &str = "_organizationId";
pub const DEPARTMENT_FIELD: &str = "_departmentId";
pub const USER_FIELD: &str = "_userId";
pub const LEVEL_FIELD: &str = "_isolationLevel";
pub const ISOLATED_AT_FIELD: &str = "_isolatedAt";
pub const WRAPPED_FIELD: &str = "_wrapped";
pub const DATA_FIELD: &str = "data";

/// Every field the envelope owns. Business payloads must not use these names.
pub const RESERVED_FIELDS: [&str; 7] = [
    TENANT_FIELD,
    ORGANIZATION_FIELD,
    DEPARTMENT_FIELD,
    USER_FIELD,
    LEVEL_FIELD,
    ISOLATED_AT_FIELD,
    WRAPPED_FIELD,
];

/// Reserved field carrying the id of `level`.
#[must_use]
pub fn level_field(level: IsolationLevel) -> &'static str {
    match level {
        IsolationLevel::Tenant => TENANT_FIELD,
        IsolationLevel::Organization => ORGANIZATION_FIELD,
        IsolationLevel::Department => DEPARTMENT_FIELD,
        IsolationLevel::User => USER_FIELD,
    }
}

/// Returns a copy of `data` carrying `tags`.
#[must_use]
pub fn seal(data: &Value, tags: Map<String, Value>) -> Value {
    match data {
        Value::Object(fields) => {
            let mut sealed: Map<String, Value> = fields
                .iter()
                .filter(|(k, _)| !RESERVED_FIELDS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            sealed.extend(tags);
            Value::Object(sealed)
        }
        other => {
            let mut wrapped = Map::with_capacity(tags.len() + 2);
            wrapped.insert(DATA_FIELD.to_string(), other.clone());
            wrapped.insert(WRAPPED_FIELD.to_string(), Value::Bool(true));
            wrapped.extend(tags);
            Value::Object(wrapped)
        }
    }
}

/// Returns the business payload of an envelope: unwrapped, reserved fields removed.
#[must_use]
pub fn open(data: &Value) -> Value {
    let Value::Object(fields) = data else {
        return data.clone();
    };
    if fields.get(WRAPPED_FIELD) == Some(&Value::Bool(true)) {
        if let Some(inner) = fields.get(DATA_FIELD) {
            return inner.clone();
        }
    }
    Value::Object(
        fields
            .iter()
            .filter(|(k, _)| !RESERVED_FIELDS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    )
}

/// Reads a string tag from an envelope.
///
/// # Errors
///
/// [`IsolationError::InvalidEnvelope`] when the tag exists but is not a string.
pub fn tag<'a>(data: &'a Value, field: &str) -> Result<Option<&'a str>, IsolationError> {
    match data.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(IsolationError::InvalidEnvelope(format!(
            "{field} must be a string, found {other}"
        ))),
    }
}

/// Compares every hierarchy tag present in `data` against `ctx`.
///
/// Tags absent from the envelope are not checked, so a user-scoped caller can
/// read data isolated at tenant scope. Any present tag must match exactly.
///
/// # Errors
///
/// [`IsolationError::InvalidEnvelope`] when `_tenantId` is missing,
/// [`IsolationError::ContextMismatch`] on the first disagreeing tag.
pub fn check_hierarchy_tags(data: &Value, ctx: &MultiLevelContext) -> Result<(), IsolationError> {
    if tag(data, TENANT_FIELD)?.is_none() {
        return Err(IsolationError::InvalidEnvelope(format!(
            "missing {TENANT_FIELD}"
        )));
    }
    for level in IsolationLevel::ALL {
        if let Some(stored) = tag(data, level_field(level))? {
            let caller = ctx.id_at(level);
            if caller != Some(stored) {
                tracing::warn!(
                    field = level.field_name(),
                    stored,
                    caller = ?caller,
                    "envelope does not belong to caller's context"
                );
                return Err(IsolationError::ContextMismatch {
                    field: level.field_name(),
                    stored: stored.to_string(),
                    caller: caller.map(str::to_owned),
                });
            }
        }
    }
    Ok(())
}
