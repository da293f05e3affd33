//! Item record data model.
//!
//! Per spec.md §9's redesign flag ("dynamic attribute lookup on nested
//! maps... replace with explicit typed structs... use a tagged variant for
//! 'property leaf'"), this module gives nested property values an explicit
//! shape instead of ad-hoc `.get(...).get(...)` chains over `serde_yml::Value`.

use serde_yml::{Mapping, Value};

use crate::error::{Error, Result};

/// Recognized non-content metadata keys (spec.md §3). These never count as
/// narrative text fields and are never substituted into a prompt.
pub fn is_metadata_key(key: &str) -> bool {
    matches!(
        key,
        "label" | "description" | "title" | "icon" | "order" | "variant"
    ) || key.starts_with('_')
        || key.ends_with("_section")
}

/// A leaf value found while walking an item's nested component keys.
///
/// Distinguishes scalars from the recognized "property object" shapes
/// (`value`/`unit`, `min`/`max`) instead of treating every leaf as an
/// untyped `Value`.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyLeaf {
    /// A bare scalar (string, number, bool).
    Scalar(Value),
    /// An array of values.
    Array(Vec<Value>),
    /// `{ value, unit }` shaped object.
    ValueUnit { value: Value, unit: Option<String> },
    /// `{ min, max, unit }` shaped object.
    Range {
        min: Value,
        max: Value,
        unit: Option<String>,
    },
}

impl PropertyLeaf {
    /// Classify a raw YAML value into its property-leaf shape.
    #[must_use]
    pub fn classify(value: &Value) -> Self {
        if let Value::Sequence(seq) = value {
            return Self::Array(seq.clone());
        }
        if let Value::Mapping(map) = value {
            let min = map.get(Value::from("min"));
            let max = map.get(Value::from("max"));
            let val = map.get(Value::from("value"));
            let unit = map
                .get(Value::from("unit"))
                .and_then(|v| v.as_str())
                .map(str::to_string);
            if let (Some(min), Some(max)) = (min, max) {
                return Self::Range {
                    min: min.clone(),
                    max: max.clone(),
                    unit,
                };
            }
            if let Some(val) = val {
                return Self::ValueUnit {
                    value: val.clone(),
                    unit,
                };
            }
        }
        Self::Scalar(value.clone())
    }

    /// Render the leaf as prompt-ready text, the single place this crate
    /// turns a classified property value into a substitutable string.
    #[must_use]
    pub fn as_text(&self) -> String {
        match self {
            PropertyLeaf::Scalar(v) => scalar_to_text(v),
            PropertyLeaf::Array(items) => items.iter().map(scalar_to_text).collect::<Vec<_>>().join(", "),
            PropertyLeaf::ValueUnit { value, unit } => match unit {
                Some(u) => format!("{} {u}", scalar_to_text(value)),
                None => scalar_to_text(value),
            },
            PropertyLeaf::Range { min, max, unit } => match unit {
                Some(u) => format!("{}-{} {u}", scalar_to_text(min), scalar_to_text(max)),
                None => format!("{}-{}", scalar_to_text(min), scalar_to_text(max)),
            },
        }
    }
}

fn scalar_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other
            .as_i64()
            .map(|n| n.to_string())
            .or_else(|| other.as_f64().map(|n| n.to_string()))
            .or_else(|| other.as_bool().map(|b| b.to_string()))
            .unwrap_or_default(),
    }
}

/// A single domain item: a nested mapping keyed by component name and
/// nested sub-keys, backed by an order-preserving YAML mapping.
///
/// Invariant: the core never removes or reorders existing keys it does not
/// touch. All mutation goes through `set_component`, which only replaces the
/// one key path it is given.
#[derive(Debug, Clone)]
pub struct ItemRecord {
    id: String,
    fields: Mapping,
}

impl ItemRecord {
    /// Wrap an already-parsed mapping for item `id`.
    #[must_use]
    pub fn new(id: impl Into<String>, fields: Mapping) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// The item's identifier (the key it was filed under in the domain's
    /// data file).
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Read-only access to the underlying mapping, preserving on-disk order.
    #[must_use]
    pub fn fields(&self) -> &Mapping {
        &self.fields
    }

    /// Consume the record, returning the underlying mapping. Used by
    /// callers (persistence) that need to write the mutated fields back out.
    #[must_use]
    pub fn into_fields(self) -> Mapping {
        self.fields
    }

    /// Look up a dotted field path (e.g. `properties.mechanical.hardness`)
    /// exposed to the prompt assembler as a `context_key`. Returns `None` if
    /// any segment of the path is absent.
    #[must_use]
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut current = self.fields.get(Value::from(path.split('.').next()?))?;
        let mut segments = path.split('.');
        segments.next(); // already consumed above
        for segment in segments {
            current = current.as_mapping()?.get(Value::from(segment))?;
        }
        Some(current)
    }

    /// Return the author identifier field, if present under `author_id` or
    /// `author`.
    pub fn author_id(&self) -> Result<String> {
        for key in ["author_id", "author"] {
            if let Some(v) = self.fields.get(Value::from(key)) {
                return Ok(value_to_display(v));
            }
        }
        Err(Error::data(format!(
            "item '{}' has no author_id/author field",
            self.id
        )))
    }

    /// Set a single component key to `text`, creating intermediate keys in
    /// a dotted path if absent. Only the final leaf is replaced; every
    /// sibling key (at every level) is left untouched and keeps its
    /// original position.
    pub fn set_component(&mut self, key_path: &str, text: &str) {
        let segments: Vec<&str> = key_path.split('.').collect();
        set_nested(&mut self.fields, &segments, Value::from(text));
    }
}

fn set_nested(map: &mut Mapping, segments: &[&str], value: Value) {
    debug_assert!(!segments.is_empty());
    let key = Value::from(segments[0]);
    if segments.len() == 1 {
        map.insert(key, value);
        return;
    }
    let entry = map
        .entry(key.clone())
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    if !entry.is_mapping() {
        *entry = Value::Mapping(Mapping::new());
    }
    if let Value::Mapping(inner) = entry {
        set_nested(inner, &segments[1..], value);
    }
}

fn value_to_display(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other
            .as_i64()
            .map(|n| n.to_string())
            .unwrap_or_else(|| format!("{other:?}")),
    }
}
