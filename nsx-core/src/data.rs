//! Typed access to user-supplied resource configuration.
//!
//! Configuration arrives as a loosely typed mapping (YAML or JSON). Values are
//! read through [`Attributes`], which fails with the full field path on a
//! missing or mistyped value instead of asserting types at the call site.
//!
//! A value counts as *set* only when it is present and not the zero value of
//! its type: `null`, `""`, `0`, `false` and `[]` all read as unset.
use nsx_api::{NsxError, NsxResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A configuration mapping
pub type Mapping = Map<String, Value>;

/// is `value` something other than the zero value of its type
pub fn is_set(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// A configuration mapping plus the path it was found at
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes {
    values: Mapping,
    #[serde(skip)]
    prefix: String,
}

impl From<Mapping> for Attributes {
    fn from(values: Mapping) -> Self {
        Self::new(values)
    }
}

impl Attributes {
    /// top-level attributes
    pub fn new(values: Mapping) -> Self {
        Self {
            values,
            prefix: String::new(),
        }
    }

    /// attributes of a nested block found at `prefix`
    pub fn nested(values: Mapping, prefix: impl Into<String>) -> Self {
        Self {
            values,
            prefix: prefix.into(),
        }
    }

    /// build from any JSON value, which must be a mapping
    pub fn from_value(value: Value) -> NsxResult<Self> {
        match value {
            Value::Object(values) => Ok(Self::new(values)),
            Value::Null => Ok(Self::default()),
            _ => Err(NsxError::mismatch("attributes", "mapping")),
        }
    }

    /// full path of `key`, for error messages
    pub fn path(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_owned()
        } else {
            format!("{}.{key}", self.prefix)
        }
    }

    /// the value under `key`, set or not
    pub fn raw(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// the value under `key` if it is set
    pub fn get_ok(&self, key: &str) -> Option<&Value> {
        self.values.get(key).filter(|v| is_set(v))
    }

    /// a string that must be set
    pub fn require_str(&self, key: &str) -> NsxResult<&str> {
        self.opt_str(key)?
            .ok_or_else(|| NsxError::missing(self.path(key)))
    }

    /// a string, `None` if unset
    pub fn opt_str(&self, key: &str) -> NsxResult<Option<&str>> {
        match self.get_ok(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(_) => Err(NsxError::mismatch(self.path(key), "string")),
        }
    }

    /// a bool, `false` if unset
    pub fn opt_bool(&self, key: &str) -> NsxResult<bool> {
        match self.get_ok(key) {
            None => Ok(false),
            Some(Value::Bool(b)) => Ok(*b),
            Some(_) => Err(NsxError::mismatch(self.path(key), "bool")),
        }
    }

    /// a positive integer that must be set
    pub fn require_int(&self, key: &str) -> NsxResult<u64> {
        self.opt_int(key)?
            .ok_or_else(|| NsxError::missing(self.path(key)))
    }

    /// a non-negative integer, `None` if unset (or zero)
    pub fn opt_int(&self, key: &str) -> NsxResult<Option<u64>> {
        match self.get_ok(key) {
            None => Ok(None),
            Some(Value::Number(n)) => match n.as_u64() {
                Some(n) => Ok(Some(n)),
                None if n.is_i64() => Err(NsxError::invalid(
                    self.path(key),
                    format!("must not be negative, got {n}"),
                )),
                None => Err(NsxError::mismatch(self.path(key), "integer")),
            },
            Some(_) => Err(NsxError::mismatch(self.path(key), "integer")),
        }
    }

    /// elements of a nested set, each addressed as `key.<index>`
    pub fn blocks(&self, key: &str) -> NsxResult<Vec<Attributes>> {
        let items = match self.get_ok(key) {
            None => return Ok(Vec::new()),
            Some(Value::Array(items)) => items,
            Some(_) => return Err(NsxError::mismatch(self.path(key), "list of mappings")),
        };
        items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let path = self.path(&format!("{key}.{i}"));
                match item {
                    Value::Object(values) => Ok(Attributes::nested(values.clone(), path)),
                    _ => Err(NsxError::mismatch(path, "mapping")),
                }
            })
            .collect()
    }

    /// store `value` under `key`
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// remove `key`
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    /// iterate over keys
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// the underlying mapping
    pub fn values(&self) -> &Mapping {
        &self.values
    }

    /// consume into the underlying mapping
    pub fn into_values(self) -> Mapping {
        self.values
    }
}

/// A resource's configuration together with its persistent id, once created
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default)]
    attributes: Attributes,
}

impl ResourceData {
    /// untracked resource with the given configuration
    pub fn new(attributes: Attributes) -> Self {
        Self {
            id: None,
            attributes,
        }
    }

    /// set a known id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.set_id(id);
        self
    }

    /// persistent id, `None` if the resource does not exist remotely
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }

    /// record the persistent id
    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = Some(id.into());
    }

    /// forget the id; the resource is gone remotely
    pub fn clear_id(&mut self) {
        self.id = None;
    }

    /// configuration
    pub fn attrs(&self) -> &Attributes {
        &self.attributes
    }

    /// mutable configuration
    pub fn attrs_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn attrs(value: Value) -> Attributes {
        Attributes::from_value(value).unwrap()
    }

    #[test]
    fn test_zero_values_are_unset() {
        let a = attrs(json!({
            "s": "", "n": 0, "b": false, "l": [], "null": null,
            "s1": "x", "n1": 3, "b1": true, "l1": [1],
        }));
        for key in ["s", "n", "b", "l", "null", "absent"] {
            assert!(a.get_ok(key).is_none(), "{key}");
        }
        for key in ["s1", "n1", "b1", "l1"] {
            assert!(a.get_ok(key).is_some(), "{key}");
        }
    }

    #[test]
    fn test_required_and_optional() {
        let a = attrs(json!({ "name": "web", "sectionid": 5, "disabled": true }));
        assert_eq!(a.require_str("name").unwrap(), "web");
        assert_eq!(a.opt_str("packettype").unwrap(), None);
        assert_eq!(a.require_int("sectionid").unwrap(), 5);
        assert!(a.opt_bool("disabled").unwrap());
        assert!(!a.opt_bool("logged").unwrap());

        let err = a.require_str("action").unwrap_err();
        assert!(matches!(err, NsxError::MissingField { ref field } if field == "action"));
    }

    #[test]
    fn test_type_mismatch_names_field() {
        let a = attrs(json!({ "name": 7, "sectionid": "5", "disabled": "yes", "neg": -1 }));
        assert!(matches!(
            a.require_str("name").unwrap_err(),
            NsxError::TypeMismatch { ref field, expected: "string" } if field == "name"
        ));
        assert!(matches!(
            a.require_int("sectionid").unwrap_err(),
            NsxError::TypeMismatch { expected: "integer", .. }
        ));
        assert!(a.opt_bool("disabled").unwrap_err().is_validation());
        assert!(matches!(
            a.opt_int("neg").unwrap_err(),
            NsxError::InvalidField { .. }
        ));
    }

    #[test]
    fn test_blocks_carry_path() {
        let a = attrs(json!({
            "source": [{ "name": "s1" }, { "value": 3 }],
            "bad": [1],
        }));
        let blocks = a.blocks("source").unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].require_str("name").unwrap(), "s1");
        let err = blocks[1].require_str("name").unwrap_err();
        assert!(matches!(err, NsxError::MissingField { ref field } if field == "source.1.name"));
        let err = blocks[1].require_str("value").unwrap_err();
        assert!(matches!(err, NsxError::TypeMismatch { ref field, .. } if field == "source.1.value"));

        assert!(a.blocks("destination").unwrap().is_empty());
        assert!(a.blocks("bad").is_err());
    }

    #[test]
    fn test_resource_data_state() {
        let mut data = ResourceData::new(attrs(json!({ "name": "web" })));
        assert_eq!(data.id(), None);
        data.set_id("");
        assert_eq!(data.id(), None);
        data.set_id("1001");
        data.attrs_mut().set("ruleid", "1001");

        let state = serde_json::to_value(&data).unwrap();
        assert_eq!(
            state,
            json!({ "id": "1001", "attributes": { "name": "web", "ruleid": "1001" } })
        );
        let back: ResourceData = serde_json::from_value(state).unwrap();
        assert_eq!(back, data);

        data.clear_id();
        assert_eq!(data.id(), None);
    }

    #[test]
    fn test_from_value_requires_mapping() {
        assert!(Attributes::from_value(json!([1, 2])).is_err());
        assert!(Attributes::from_value(Value::Null).unwrap().values().is_empty());
    }
}
