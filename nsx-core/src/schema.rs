//! Declared fields of a resource and validation of user configuration
//! against them.
//!
//! [`validate`] runs before any remote call: it rejects unknown keys and
//! mistyped values, reports missing required fields and fills in defaults.
use nsx_api::{NsxError, NsxResult};
use serde_json::Value;

use crate::data::{Attributes, is_set};

/// Type of a field's value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// string
    String,
    /// bool
    Bool,
    /// non-negative integer
    Int,
    /// set of nested blocks with the given fields
    Set(&'static [Field]),
}

impl FieldKind {
    fn expected(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Bool => "bool",
            FieldKind::Int => "integer",
            FieldKind::Set(_) => "list of mappings",
        }
    }
}

/// Value used when the field is not configured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldDefault {
    /// bool default
    Bool(bool),
}

impl FieldDefault {
    fn value(&self) -> Value {
        match self {
            FieldDefault::Bool(b) => Value::Bool(*b),
        }
    }
}

/// A declared resource field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    /// key in the configuration mapping
    pub name: &'static str,
    /// value type
    pub kind: FieldKind,
    /// must be set by the user
    pub required: bool,
    /// set by the handler from the remote object
    pub computed: bool,
    /// default when unset
    pub default: Option<FieldDefault>,
}

impl Field {
    const fn of(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: false,
            computed: false,
            default: None,
        }
    }

    /// optional string field
    pub const fn string(name: &'static str) -> Self {
        Self::of(name, FieldKind::String)
    }

    /// optional bool field
    pub const fn bool(name: &'static str) -> Self {
        Self::of(name, FieldKind::Bool)
    }

    /// optional integer field
    pub const fn int(name: &'static str) -> Self {
        Self::of(name, FieldKind::Int)
    }

    /// optional set of nested blocks
    pub const fn set(name: &'static str, fields: &'static [Field]) -> Self {
        Self::of(name, FieldKind::Set(fields))
    }

    /// mark as required
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// mark as computed
    pub const fn computed(mut self) -> Self {
        self.computed = true;
        self
    }

    /// give a default
    pub const fn with_default(mut self, default: FieldDefault) -> Self {
        self.default = Some(default);
        self
    }
}

/// Check `attrs` against `schema`, filling in defaults.
pub fn validate(schema: &[Field], attrs: &mut Attributes) -> NsxResult<()> {
    if let Some(unknown) = attrs
        .keys()
        .find(|key| !schema.iter().any(|f| f.name == *key))
    {
        return Err(NsxError::invalid(attrs.path(unknown), "unknown field"));
    }

    for field in schema {
        match attrs.raw(field.name) {
            None | Some(Value::Null) => {
                if let Some(default) = field.default {
                    attrs.set(field.name, default.value());
                }
            }
            Some(value) => {
                let checked = check_kind(field, value, attrs)?;
                if let Some(checked) = checked {
                    attrs.set(field.name, checked);
                }
            }
        }
        if field.required && !field.computed && !attrs.raw(field.name).is_some_and(is_set) {
            return Err(NsxError::missing(attrs.path(field.name)));
        }
    }
    Ok(())
}

/// Type check one value. Nested sets are validated element by element and
/// returned so defaults applied inside them are kept.
fn check_kind(field: &Field, value: &Value, attrs: &Attributes) -> NsxResult<Option<Value>> {
    let mismatch = || NsxError::mismatch(attrs.path(field.name), field.kind.expected());
    match (field.kind, value) {
        (FieldKind::String, Value::String(_)) | (FieldKind::Bool, Value::Bool(_)) => Ok(None),
        (FieldKind::Int, Value::Number(n)) => {
            if n.as_u64().is_some() {
                Ok(None)
            } else if n.is_i64() {
                Err(NsxError::invalid(
                    attrs.path(field.name),
                    format!("must not be negative, got {n}"),
                ))
            } else {
                Err(mismatch())
            }
        }
        (FieldKind::Set(fields), Value::Array(items)) => {
            let mut checked = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                let path = attrs.path(&format!("{}.{i}", field.name));
                let Value::Object(values) = item else {
                    return Err(NsxError::mismatch(path, "mapping"));
                };
                let mut block = Attributes::nested(values.clone(), path);
                validate(fields, &mut block)?;
                checked.push(Value::Object(block.into_values()));
            }
            Ok(Some(Value::Array(checked)))
        }
        _ => Err(mismatch()),
    }
}
