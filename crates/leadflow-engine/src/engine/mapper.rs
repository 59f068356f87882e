//! Field mapping between JSON documents.
//!
//! Paths are dot-delimited (`lead.address.city`). Numeric segments index into
//! arrays when reading. Writing creates intermediate objects as needed and
//! replaces any non-object value standing in the way.
//!
//! Unresolved sources are omitted from the output rather than written as
//! `null`.

use std::fmt::Write;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Resolve a dot path. Returns `None` when any segment is missing.
pub fn get<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(data);
    }
    path.split('.').try_fold(data, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Write `value` at a dot path, creating intermediate objects.
pub fn set(data: &mut Value, path: &str, value: Value) {
    let mut segments = path.split('.').peekable();
    let mut current = data;

    while let Some(segment) = segments.next() {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Value::Object(map) = current else {
            return;
        };
        if segments.peek().is_none() {
            map.insert(segment.to_string(), value);
            return;
        }
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

/// Build a new document by copying each `source` path of `input` to its
/// `target` path. `mapping` is keyed by target.
pub fn apply_mapping(input: &Value, mapping: &Map<String, Value>) -> Value {
    let mut output = Value::Object(Map::new());

    for (target, source) in mapping {
        let Some(source) = source.as_str() else {
            tracing::debug!(target_path = %target, "Skipping mapping with non-string source");
            continue;
        };
        if let Some(value) = get(input, source) {
            set(&mut output, target, value.clone());
        }
    }

    output
}

/// Named value transform applied by trigger field mappings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transform {
    Uppercase,
    Lowercase,
    Trim,
    /// Reformat a date/time string with a `strftime` pattern.
    DateFormat { format: String },
    /// Parse a JSON string into a value.
    JsonDecode,
    /// Pick a nested field out of an object value.
    ExtractField { field: String },
    /// Not understood; the value passes through unchanged.
    Unknown(String),
}

const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";

impl Transform {
    /// Build a transform from its name and options.
    pub fn from_parts(name: &str, format: Option<&str>, field: Option<&str>) -> Self {
        match name.to_lowercase().as_str() {
            "uppercase" => Self::Uppercase,
            "lowercase" => Self::Lowercase,
            "trim" => Self::Trim,
            "date_format" => Self::DateFormat {
                format: format.unwrap_or(DEFAULT_DATE_FORMAT).to_string(),
            },
            "json_decode" => Self::JsonDecode,
            "extract_field" => match field {
                Some(field) => Self::ExtractField {
                    field: field.to_string(),
                },
                None => Self::Unknown(name.to_string()),
            },
            _ => Self::Unknown(name.to_string()),
        }
    }

    /// Apply to a single value. `None` means the value is absent after the
    /// transform (only `extract_field` on a missing field).
    pub fn apply(&self, value: &Value) -> Option<Value> {
        match self {
            Self::Uppercase => Some(map_string(value, |s| s.to_uppercase())),
            Self::Lowercase => Some(map_string(value, |s| s.to_lowercase())),
            Self::Trim => Some(map_string(value, |s| s.trim().to_string())),
            Self::DateFormat { format } => Some(
                value
                    .as_str()
                    .and_then(parse_datetime)
                    .and_then(|dt| format_datetime(&dt, format))
                    .map(Value::String)
                    .unwrap_or_else(|| value.clone()),
            ),
            Self::JsonDecode => Some(
                value
                    .as_str()
                    .and_then(|s| serde_json::from_str(s).ok())
                    .unwrap_or_else(|| value.clone()),
            ),
            Self::ExtractField { field } => get(value, field).cloned(),
            Self::Unknown(name) => {
                tracing::debug!(transform = %name, "Unknown transform, value passed through");
                Some(value.clone())
            }
        }
    }
}

fn map_string(value: &Value, f: impl Fn(&str) -> String) -> Value {
    match value {
        Value::String(s) => Value::String(f(s)),
        other => other.clone(),
    }
}

/// `None` for patterns chrono cannot render, such as unknown specifiers or
/// an offset on a naive timestamp.
fn format_datetime(dt: &NaiveDateTime, format: &str) -> Option<String> {
    let mut out = String::new();
    match write!(out, "{}", dt.format(format)) {
        Ok(()) => Some(out),
        Err(_) => {
            tracing::debug!(format, "Invalid date format, value passed through");
            None
        }
    }
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc).naive_utc());
    }
    for pattern in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, pattern) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Stored transform: a bare name (`"lowercase"`, `"date_format:%d/%m/%Y"`)
/// or an object (`{"type": "extract_field", "field": "id"}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransformSpec {
    Named(String),
    Detailed {
        #[serde(rename = "type", alias = "name")]
        kind: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        format: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },
}

impl TransformSpec {
    pub fn transform(&self) -> Transform {
        match self {
            Self::Named(name) => match name.split_once(':') {
                Some(("date_format", format)) => Transform::from_parts("date_format", Some(format), None),
                Some(("extract_field", field)) => Transform::from_parts("extract_field", None, Some(field)),
                _ => Transform::from_parts(name, None, None),
            },
            Self::Detailed {
                kind,
                format,
                field,
            } => Transform::from_parts(kind, format.as_deref(), field.as_deref()),
        }
    }
}

/// One trigger-side mapping entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Path in the event payload.
    pub source: String,

    /// Path in the workflow input.
    pub target: String,

    /// Optional transform applied before placement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<TransformSpec>,
}

/// Map an event payload into workflow input. With no mappings the payload is
/// passed through whole.
pub fn map_payload(payload: &Value, mappings: &[FieldMapping]) -> Value {
    if mappings.is_empty() {
        return payload.clone();
    }

    let mut output = Value::Object(Map::new());
    for mapping in mappings {
        let Some(value) = get(payload, &mapping.source) else {
            continue;
        };
        let value = match &mapping.transform {
            Some(spec) => spec.transform().apply(value),
            None => Some(value.clone()),
        };
        if let Some(value) = value {
            set(&mut output, &mapping.target, value);
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_nested_and_indexed() {
        let data = json!({"a": {"b": {"c": 1}}, "items": [{"id": "x"}]});
        assert_eq!(get(&data, "a.b.c"), Some(&json!(1)));
        assert_eq!(get(&data, "items.0.id"), Some(&json!("x")));
        assert_eq!(get(&data, "a.b.d"), None);
        assert_eq!(get(&data, "a.b.c.d"), None);
        assert_eq!(get(&data, "items.5"), None);
    }

    #[test]
    fn test_set_creates_intermediate_maps() {
        let mut data = json!({"a": 1});
        set(&mut data, "x.y.z", json!(true));
        assert_eq!(data, json!({"a": 1, "x": {"y": {"z": true}}}));

        // Scalars in the way are replaced.
        set(&mut data, "a.b", json!(2));
        assert_eq!(data["a"], json!({"b": 2}));
    }

    #[test]
    fn test_apply_mapping_round_trip() {
        let mapping = json!({"x.y": "a.b"});
        let output = apply_mapping(&json!({"a": {"b": 5}}), mapping.as_object().unwrap());
        assert_eq!(output, json!({"x": {"y": 5}}));
    }

    #[test]
    fn test_apply_mapping_omits_absent_sources() {
        let mapping = json!({"x.y": "a.b", "name": "missing.path"});
        let output = apply_mapping(&json!({"a": {"b": 5}}), mapping.as_object().unwrap());
        assert_eq!(output, json!({"x": {"y": 5}}));
        assert!(output.get("name").is_none());
    }

    #[test]
    fn test_string_transforms() {
        assert_eq!(Transform::Uppercase.apply(&json!("abc")), Some(json!("ABC")));
        assert_eq!(Transform::Lowercase.apply(&json!("A@B.COM")), Some(json!("a@b.com")));
        assert_eq!(Transform::Trim.apply(&json!("  hi ")), Some(json!("hi")));
        // Non-strings pass through.
        assert_eq!(Transform::Uppercase.apply(&json!(42)), Some(json!(42)));
    }

    #[test]
    fn test_date_format_transform() {
        let transform = Transform::from_parts("date_format", Some("%d/%m/%Y"), None);
        assert_eq!(
            transform.apply(&json!("2024-03-05T10:00:00Z")),
            Some(json!("05/03/2024"))
        );
        assert_eq!(
            transform.apply(&json!("2024-03-05 23:59:00")),
            Some(json!("05/03/2024"))
        );
        assert_eq!(transform.apply(&json!("not a date")), Some(json!("not a date")));
    }

    #[test]
    fn test_unrenderable_date_format_passes_value_through() {
        let mappings: Vec<FieldMapping> = serde_json::from_value(json!([
            {"source": "signup", "target": "signup", "transform": "date_format:%Q"},
            {"source": "seen", "target": "seen", "transform": "date_format:%z"}
        ]))
        .unwrap();
        let mapped = map_payload(
            &json!({"signup": "2024-03-05", "seen": "2024-03-05 10:00:00"}),
            &mappings,
        );
        assert_eq!(mapped, json!({"signup": "2024-03-05", "seen": "2024-03-05 10:00:00"}));
    }

    #[test]
    fn test_json_decode_and_extract_field() {
        assert_eq!(
            Transform::JsonDecode.apply(&json!("{\"id\": 7}")),
            Some(json!({"id": 7}))
        );
        assert_eq!(Transform::JsonDecode.apply(&json!("{oops")), Some(json!("{oops")));

        let extract = Transform::from_parts("extract_field", None, Some("owner.email"));
        assert_eq!(
            extract.apply(&json!({"owner": {"email": "o@x.io"}})),
            Some(json!("o@x.io"))
        );
        assert_eq!(extract.apply(&json!({"owner": {}})), None);
    }

    #[test]
    fn test_unknown_transform_passes_through() {
        let transform = TransformSpec::Named("rot13".to_string()).transform();
        assert_eq!(transform, Transform::Unknown("rot13".to_string()));
        assert_eq!(transform.apply(&json!("abc")), Some(json!("abc")));
    }

    #[test]
    fn test_transform_spec_shapes() {
        let named: TransformSpec = serde_json::from_value(json!("date_format:%Y")).unwrap();
        assert_eq!(
            named.transform(),
            Transform::DateFormat {
                format: "%Y".to_string()
            }
        );

        let detailed: TransformSpec =
            serde_json::from_value(json!({"type": "extract_field", "field": "id"})).unwrap();
        assert_eq!(
            detailed.transform(),
            Transform::ExtractField {
                field: "id".to_string()
            }
        );
    }

    #[test]
    fn test_map_payload() {
        let mappings: Vec<FieldMapping> = serde_json::from_value(json!([
            {"source": "email", "target": "lead.email", "transform": "lowercase"},
            {"source": "name", "target": "lead.name", "transform": {"type": "trim"}},
            {"source": "phone", "target": "lead.phone"}
        ]))
        .unwrap();

        let output = map_payload(&json!({"email": "A@B.COM", "name": " Ann "}), &mappings);
        assert_eq!(output, json!({"lead": {"email": "a@b.com", "name": "Ann"}}));
    }

    #[test]
    fn test_map_payload_without_mappings_passes_payload() {
        let payload = json!({"status": "new", "email": "a@b.com"});
        assert_eq!(map_payload(&payload, &[]), payload);
    }
}
