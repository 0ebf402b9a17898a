//! The plain value graph exchanged with application code.
//!
//! [`Value`] is the user-facing representation of bridged state: ordinary
//! maps, arrays, and primitives, plus two special variants. [`Value::Text`]
//! is the synced-text marker — assigning it binds the path to a collaborative
//! Text container instead of a plain string. [`Value::Container`] carries a
//! reference to an existing CRDT container (a re-link request).
//!
//! Equality is structural. Snapshots render Text containers back as
//! `Value::Text`, so a written graph compares equal to its read-back.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{Error as _, Serialize, SerializeMap, SerializeSeq, Serializer};
use yrs::branch::{Branch, BranchID};
use yrs::{Any, ArrayRef, MapRef, TextRef};

/// A reference to one native CRDT container, tagged by kind.
///
/// Matches a `ProxyNode` one-to-one while the container is alive.
#[derive(Debug, Clone)]
pub enum CrdtContainer {
    Map(MapRef),
    Array(ArrayRef),
    Text(TextRef),
}

impl CrdtContainer {
    /// Returns a human-readable name for this container kind.
    pub fn kind_name(&self) -> &'static str {
        match self {
            CrdtContainer::Map(_) => "map",
            CrdtContainer::Array(_) => "array",
            CrdtContainer::Text(_) => "text",
        }
    }

    /// The engine-level identity of the backing container.
    pub fn branch_id(&self) -> BranchID {
        match self {
            CrdtContainer::Map(m) => {
                let branch: &Branch = m.as_ref();
                branch.id()
            }
            CrdtContainer::Array(a) => {
                let branch: &Branch = a.as_ref();
                branch.id()
            }
            CrdtContainer::Text(t) => {
                let branch: &Branch = t.as_ref();
                branch.id()
            }
        }
    }
}

impl PartialEq for CrdtContainer {
    fn eq(&self, other: &Self) -> bool {
        self.branch_id() == other.branch_id()
    }
}

/// A value within the bridged tree.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    /// A plain map; assigning one creates a new Map container.
    Map(BTreeMap<String, Value>),
    /// A plain array; assigning one creates a new Array container.
    Array(Vec<Value>),
    /// Synced-text marker; assigning one creates (or minimally edits) a
    /// collaborative Text container with this content.
    Text(String),
    /// An existing CRDT container, re-linked rather than cloned.
    Container(CrdtContainer),
}

impl Value {
    /// Returns a human-readable name for this value type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Map(_) => "map",
            Value::Array(_) => "array",
            Value::Text(_) => "text",
            Value::Container(c) => c.kind_name(),
        }
    }

    /// True for scalar leaves (everything that is not container-shaped).
    pub fn is_primitive(&self) -> bool {
        !matches!(
            self,
            Value::Map(_) | Value::Array(_) | Value::Text(_) | Value::Container(_)
        )
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Converts a primitive value into the engine's `Any` representation.
    ///
    /// Returns `None` for container-shaped values, which expand into native
    /// containers instead of serializing into a leaf.
    pub(crate) fn to_any(&self) -> Option<Any> {
        match self {
            Value::Null => Some(Any::Null),
            Value::Bool(b) => Some(Any::Bool(*b)),
            Value::Int(i) => Some(Any::BigInt(*i)),
            Value::Float(f) => Some(Any::Number(*f)),
            Value::String(s) => Some(Any::String(s.as_str().into())),
            Value::Bytes(b) => Some(Any::Buffer(b.as_slice().into())),
            Value::Map(_) | Value::Array(_) | Value::Text(_) | Value::Container(_) => None,
        }
    }

    /// Converts an engine `Any` leaf back into a plain value.
    pub(crate) fn from_any(any: &Any) -> Value {
        match any {
            Any::Null | Any::Undefined => Value::Null,
            Any::Bool(b) => Value::Bool(*b),
            Any::Number(f) => Value::Float(*f),
            Any::BigInt(i) => Value::Int(*i),
            Any::String(s) => Value::String(s.to_string()),
            Any::Buffer(b) => Value::Bytes(b.to_vec()),
            Any::Array(items) => Value::Array(items.iter().map(Value::from_any).collect()),
            Any::Map(entries) => Value::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from_any(v)))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Map(map)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(entries) => Value::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::String(s) | Value::Text(s) => serializer.serialize_str(s),
            Value::Bytes(b) => serializer.serialize_bytes(b),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            Value::Container(_) => Err(S::Error::custom(
                "CRDT container references cannot be serialized",
            )),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ValueVisitor;

        impl<'de> Visitor<'de> for ValueVisitor {
            type Value = Value;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a plain JSON-like value")
            }

            fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
                Ok(Value::Null)
            }

            fn visit_none<E: de::Error>(self) -> Result<Value, E> {
                Ok(Value::Null)
            }

            fn visit_some<D2: Deserializer<'de>>(self, d: D2) -> Result<Value, D2::Error> {
                Value::deserialize(d)
            }

            fn visit_bool<E: de::Error>(self, b: bool) -> Result<Value, E> {
                Ok(Value::Bool(b))
            }

            fn visit_i64<E: de::Error>(self, i: i64) -> Result<Value, E> {
                Ok(Value::Int(i))
            }

            fn visit_u64<E: de::Error>(self, u: u64) -> Result<Value, E> {
                i64::try_from(u)
                    .map(Value::Int)
                    .map_err(|_| E::custom("integer out of range"))
            }

            fn visit_f64<E: de::Error>(self, f: f64) -> Result<Value, E> {
                Ok(Value::Float(f))
            }

            fn visit_str<E: de::Error>(self, s: &str) -> Result<Value, E> {
                Ok(Value::String(s.to_string()))
            }

            fn visit_string<E: de::Error>(self, s: String) -> Result<Value, E> {
                Ok(Value::String(s))
            }

            fn visit_bytes<E: de::Error>(self, b: &[u8]) -> Result<Value, E> {
                Ok(Value::Bytes(b.to_vec()))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
                let mut items = Vec::new();
                while let Some(item) = seq.next_element()? {
                    items.push(item);
                }
                Ok(Value::Array(items))
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Value, A::Error> {
                let mut entries = BTreeMap::new();
                while let Some((k, v)) = access.next_entry::<String, Value>()? {
                    entries.insert(k, v);
                }
                Ok(Value::Map(entries))
            }
        }

        deserializer.deserialize_any(ValueVisitor)
    }
}
